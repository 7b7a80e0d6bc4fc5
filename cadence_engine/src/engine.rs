//! The engine: per-block pipeline, realtime driver, and the embeddable
//! control surface.
//!
//! One dedicated audio thread per engine owns the processing loop. External
//! callers talk to it only through the pending queues and atomic flags, so
//! nothing on the hot path ever waits on a producer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use cadence_shared::EngineConfig;

use crate::bus::OutputBus;
use crate::context::BlockCtx;
use crate::events::{Event, EventList};
use crate::generator::{BoxGen, GenOutput};
use crate::queues::PendingQueue;

/// A per-block side-effecting callback. Runs on the audio thread; a panic
/// drops the callback, a normal return retains it for the next block.
pub type ControlFn = Box<dyn FnMut(&BlockCtx) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Stopped,
    Running,
}

/// Default tempo of a fresh engine, in BPM.
pub const DEFAULT_TEMPO: f64 = 60.0;

/// How long the realtime driver sleeps between checks of the running flag.
const STOP_POLL: Duration = Duration::from_millis(10);

/// Handle to one engine. Cheap to clone; all clones control the same engine.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    running: AtomicBool,
    clear_flag: AtomicBool,
    block_num: AtomicU64,
    gain: AtomicU64,
    /// Bumped on every start so a driver from a previous run retires even
    /// if the engine was restarted before it observed the stop.
    generation: AtomicU64,
    pending_gens: PendingQueue<BoxGen>,
    pending_pre: PendingQueue<ControlFn>,
    pending_post: PendingQueue<ControlFn>,
    pending_events: PendingQueue<Event>,
    events: EventList,
}

impl Engine {
    /// Create a stopped engine and register it with the process-wide
    /// registry. Fails on an invalid configuration; an engine is never
    /// returned half-initialised.
    pub fn new(config: EngineConfig) -> Result<Engine> {
        config.validate().map_err(|e| anyhow!(e))?;
        let engine = Engine {
            shared: Arc::new(Shared {
                config,
                running: AtomicBool::new(false),
                clear_flag: AtomicBool::new(false),
                block_num: AtomicU64::new(0),
                gain: AtomicU64::new(1f64.to_bits()),
                generation: AtomicU64::new(0),
                pending_gens: PendingQueue::new(),
                pending_pre: PendingQueue::new(),
                pending_post: PendingQueue::new(),
                pending_events: PendingQueue::new(),
                events: EventList::new(config.sample_rate, DEFAULT_TEMPO),
            }),
        };
        crate::registry::register(&engine);
        Ok(engine)
    }

    pub fn with_defaults() -> Result<Engine> {
        Engine::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn status(&self) -> EngineStatus {
        if self.shared.running.load(Ordering::Relaxed) {
            EngineStatus::Running
        } else {
            EngineStatus::Stopped
        }
    }

    /// Index of the next block to be processed.
    pub fn current_block(&self) -> u64 {
        self.shared.block_num.load(Ordering::Relaxed)
    }

    /// Queue an audio generator. It joins the mix at the next block
    /// boundary and stays until its `pull` reports `Done`.
    pub fn add_afunc(&self, gen: BoxGen) {
        self.shared.pending_gens.push(gen);
    }

    /// Queue a callback to run before the mixer phase of every block.
    pub fn add_pre_cfunc(&self, f: ControlFn) {
        self.shared.pending_pre.push(f);
    }

    /// Queue a callback to run after the mixer phase of every block.
    pub fn add_post_cfunc(&self, f: ControlFn) {
        self.shared.pending_post.push(f);
    }

    /// Queue events for the event list. They merge at the next advance.
    pub fn add_events<I>(&self, events: I)
    where
        I: IntoIterator<Item = Event>,
    {
        for ev in events {
            self.shared.pending_events.push(ev);
        }
    }

    pub fn event_list(&self) -> &EventList {
        &self.shared.events
    }

    /// Current beat of the event list.
    pub fn now(&self) -> f64 {
        self.shared.events.now()
    }

    pub fn tempo(&self) -> f64 {
        self.shared.events.tempo()
    }

    pub fn set_tempo(&self, bpm: f64) {
        self.shared.events.set_tempo(bpm);
    }

    /// Master gain applied to the mixed signal before quantisation.
    pub fn gain(&self) -> f64 {
        f64::from_bits(self.shared.gain.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f64) {
        if gain.is_finite() && gain >= 0.0 {
            self.shared.gain.store(gain.to_bits(), Ordering::Relaxed);
        }
    }

    /// Start the realtime loop on a dedicated thread. A no-op when already
    /// running. Fails loudly when the output device cannot be opened with
    /// this engine's configuration.
    pub fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let my_gen = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let host = cpal::default_host();
        let device = match host.default_output_device() {
            Some(d) => d,
            None => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(anyhow!("no output device available"));
            }
        };
        match spawn_realtime(self.shared.clone(), device, my_gen) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Request a stop. Cooperative: the audio thread observes the flag at
    /// its next block boundary. A no-op when already stopped.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Request a clear. Takes effect at the end of the current block: all
    /// four pending queues are emptied, the event list is cleared, and the
    /// next block runs with an empty graph. Idempotent.
    pub fn clear(&self) {
        self.shared.clear_flag.store(true, Ordering::SeqCst);
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}

/// State owned by one run of the engine loop: the retained generator and
/// callback lists, the output bus, and the drain scratch. Realtime and
/// offline rendering both drive their blocks through here, which is what
/// keeps the two sample streams bit-identical.
pub(crate) struct RunState {
    gens: Vec<BoxGen>,
    pre: Vec<ControlFn>,
    post: Vec<ControlFn>,
    pub(crate) bus: OutputBus,
    new_gens: Vec<BoxGen>,
    new_events: Vec<Event>,
}

impl RunState {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            gens: Vec::new(),
            pre: Vec::new(),
            post: Vec::new(),
            bus: OutputBus::new(config),
            new_gens: Vec::new(),
            new_events: Vec::new(),
        }
    }

    /// Run one block of the pipeline. After this returns, `self.bus` holds
    /// the block's quantised PCM and the caller hands it to the sink.
    ///
    /// Returns true while there is still work: the event list reported
    /// events remaining, or any of the three active lists is non-empty
    /// after its phase. The offline renderer uses this to terminate.
    pub(crate) fn process_block(&mut self, shared: &Shared) -> bool {
        // 0. a clear requested during or since the previous block lands
        //    here, so this block runs with an empty graph and is silent
        if shared.clear_flag.swap(false, Ordering::SeqCst) {
            self.gens.clear();
            self.pre.clear();
            self.post.clear();
            shared.pending_gens.discard();
            shared.pending_pre.discard();
            shared.pending_post.discard();
            shared.pending_events.discard();
            shared.events.clear();
        }

        // 1. ambient context for this block
        let ctx = BlockCtx::new(&shared.config, shared.block_num.load(Ordering::Relaxed));

        // 2. hand newly queued events to the list, then advance one block
        shared.pending_events.drain_into(&mut self.new_events);
        if !self.new_events.is_empty() {
            shared.events.add(self.new_events.drain(..));
        }
        let mut more = shared
            .events
            .advance(shared.config.block_size, &ctx, &mut self.new_gens);
        // generators born from events reach the mixer phase of this block
        for g in self.new_gens.drain(..) {
            shared.pending_gens.push(g);
        }

        // 3. pre cfuncs: retained ++ drained, keep the ones that return
        shared.pending_pre.drain_into(&mut self.pre);
        self.pre.retain_mut(|f| {
            let ok = catch_unwind(AssertUnwindSafe(|| f(&ctx))).is_ok();
            if !ok {
                eprintln!("[Engine] pre cfunc panicked; dropped");
            }
            ok
        });
        more = more || !self.pre.is_empty();

        // 4. generators: zero the bus, poll each once, mix, quantise
        shared.pending_gens.drain_into(&mut self.gens);
        self.bus.zero();
        let bus = &mut self.bus;
        self.gens.retain_mut(|g| {
            let gen = g.as_mut();
            match catch_unwind(AssertUnwindSafe(|| match gen.pull(&ctx) {
                GenOutput::Mono(buf) => {
                    bus.mix_mono(buf);
                    true
                }
                GenOutput::Multi(bufs) => {
                    bus.mix_multi(bufs);
                    true
                }
                GenOutput::Done => false,
            })) {
                Ok(retain) => retain,
                Err(_) => {
                    eprintln!("[Engine] generator panicked; removed");
                    false
                }
            }
        });
        let gain = f64::from_bits(shared.gain.load(Ordering::Relaxed));
        self.bus.quantise(gain);
        more = more || !self.gens.is_empty();

        // 5. post cfuncs
        shared.pending_post.drain_into(&mut self.post);
        self.post.retain_mut(|f| {
            let ok = catch_unwind(AssertUnwindSafe(|| f(&ctx))).is_ok();
            if !ok {
                eprintln!("[Engine] post cfunc panicked; dropped");
            }
            ok
        });
        more = more || !self.post.is_empty();

        // 6. the caller writes bus.pcm() to its sink

        // 7. block counter
        shared.block_num.fetch_add(1, Ordering::Relaxed);
        more
    }
}

/// Spawn the realtime driver thread. It opens the output stream, reports
/// the result back, then parks until the running flag drops or a newer run
/// supersedes this one.
fn spawn_realtime(shared: Arc<Shared>, device: cpal::Device, my_gen: u64) -> Result<()> {
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

    thread::Builder::new()
        .name("cadence-audio".into())
        .spawn(move || {
            let stream = match build_stream(&shared, &device, my_gen) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    shared.running.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                eprintln!("[Engine] failed to play stream: {}", e);
                shared.running.store(false, Ordering::SeqCst);
            }
            while shared.running.load(Ordering::Relaxed)
                && shared.generation.load(Ordering::Relaxed) == my_gen
            {
                thread::sleep(STOP_POLL);
            }
            drop(stream);
            println!("stopping...");
        })?;

    ready_rx
        .recv()
        .map_err(|_| anyhow!("audio thread exited before the stream opened"))?
}

fn build_stream(shared: &Arc<Shared>, device: &cpal::Device, my_gen: u64) -> Result<cpal::Stream> {
    let supported = device.default_output_config()?;
    let sample_format = supported.sample_format();

    let mut stream_config: cpal::StreamConfig = supported.into();
    stream_config.channels = shared.config.nchnls as u16;
    stream_config.sample_rate = cpal::SampleRate(shared.config.sample_rate);
    stream_config.buffer_size = cpal::BufferSize::Fixed(shared.config.block_size);

    let err_fn = |err: cpal::StreamError| {
        let s = err.to_string();
        // suppress buffer under/overrun spam
        if !s.contains("underrun") && !s.contains("overrun") {
            eprintln!("[Engine] stream error: {}", s);
        }
    };

    let stream = match sample_format {
        cpal::SampleFormat::I16 => {
            let shared = shared.clone();
            let mut run = RunState::new(&shared.config);
            // start with the bus "fully consumed" so the first callback
            // processes a fresh block
            let mut offset = shared.config.out_buffer_size();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    if !shared.running.load(Ordering::Relaxed)
                        || shared.generation.load(Ordering::Relaxed) != my_gen
                    {
                        data.fill(0);
                        return;
                    }
                    let mut i = 0;
                    while i < data.len() {
                        if offset >= run.bus.pcm().len() {
                            run.process_block(&shared);
                            offset = 0;
                        }
                        let pcm = run.bus.pcm();
                        let n = (data.len() - i).min(pcm.len() - offset);
                        data[i..i + n].copy_from_slice(&pcm[offset..offset + n]);
                        i += n;
                        offset += n;
                    }
                },
                err_fn,
                None,
            )?
        }
        cpal::SampleFormat::F32 => {
            let shared = shared.clone();
            let mut run = RunState::new(&shared.config);
            let mut offset = shared.config.out_buffer_size();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !shared.running.load(Ordering::Relaxed)
                        || shared.generation.load(Ordering::Relaxed) != my_gen
                    {
                        data.fill(0.0);
                        return;
                    }
                    let mut i = 0;
                    while i < data.len() {
                        if offset >= run.bus.pcm().len() {
                            run.process_block(&shared);
                            offset = 0;
                        }
                        let pcm = run.bus.pcm();
                        let n = (data.len() - i).min(pcm.len() - offset);
                        for (dst, &s) in data[i..i + n].iter_mut().zip(&pcm[offset..offset + n]) {
                            // the quantised stream stays the source of truth
                            *dst = s as f32 / 32768.0;
                        }
                        i += n;
                        offset += n;
                    }
                },
                err_fn,
                None,
            )?
        }
        other => return Err(anyhow!("unsupported sample format: {:?}", other)),
    };

    Ok(stream)
}
