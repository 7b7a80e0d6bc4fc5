//! Beat-stamped events and the per-engine event list.
//!
//! Producers add events from any thread; the audio thread advances the list
//! once per block. Event times are expressed in beats and resolve to block
//! boundaries: an event fires during the first block whose starting beat has
//! reached it.

use std::cmp::Ordering as CmpOrdering;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::context::BlockCtx;
use crate::generator::BoxGen;

/// Context handed to an event function when it fires.
pub struct EventCtx {
    /// The beat the event was scheduled for.
    pub beat: f64,
    /// The event list's current beat.
    pub now: f64,
    /// Current tempo in BPM.
    pub tempo: f64,
    pub block: BlockCtx,
}

/// What firing an event produced. The engine interprets this
/// deterministically: generators join the mix in the same block, events are
/// rescheduled, sequences recurse, `Nothing` is ignored.
pub enum EventResult {
    Gen(BoxGen),
    Evt(Event),
    Many(Vec<EventResult>),
    Nothing,
}

pub type EventFn = Arc<dyn Fn(&EventCtx) -> EventResult + Send + Sync>;

/// A beat-stamped thunk. Arguments of the scheduled call are closure
/// captures of `func`.
#[derive(Clone)]
pub struct Event {
    pub beat: f64,
    /// Insertion order, assigned when the event enters a list. Ties on
    /// `beat` fire in `seq` order.
    seq: u64,
    func: EventFn,
}

impl Event {
    pub fn new(beat: f64, func: EventFn) -> Self {
        Self { beat, seq: 0, func }
    }
}

/// Build an event from a plain closure.
pub fn event<F>(func: F, start_beat: f64) -> Event
where
    F: Fn(&EventCtx) -> EventResult + Send + Sync + 'static,
{
    Event::new(start_beat, Arc::new(func))
}

/// Indirect, redefinable event target.
///
/// Scheduled events built with [`EventHandle::bind`] hold the cell rather
/// than the function, so `redefine` retargets every future firing and
/// `kill` turns them into no-ops. This is what makes a self-rescheduling
/// event controllable after it has been set in motion.
#[derive(Clone)]
pub struct EventHandle {
    cell: Arc<ArcSwap<EventFn>>,
}

impl EventHandle {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&EventCtx) -> EventResult + Send + Sync + 'static,
    {
        let f: EventFn = Arc::new(func);
        Self {
            cell: Arc::new(ArcSwap::from_pointee(f)),
        }
    }

    /// Swap in a new target. Future firings through any bound event run it.
    pub fn redefine<F>(&self, func: F)
    where
        F: Fn(&EventCtx) -> EventResult + Send + Sync + 'static,
    {
        let f: EventFn = Arc::new(func);
        self.cell.store(Arc::new(f));
    }

    /// Install a no-op. Already-scheduled events still fire but do nothing,
    /// which ends any temporal recursion driven through this handle.
    pub fn kill(&self) {
        let f: EventFn = Arc::new(|_: &EventCtx| EventResult::Nothing);
        self.cell.store(Arc::new(f));
    }

    /// An event function that forwards to the cell's current target.
    pub fn bind(&self) -> EventFn {
        let cell = self.cell.clone();
        Arc::new(move |ctx: &EventCtx| {
            let f = cell.load_full();
            (**f)(ctx)
        })
    }
}

/// Time-ordered collection of beat-stamped events.
///
/// `add` and `clear` are callable from any thread; `advance` is called once
/// per block by the audio thread. The clock fields are plain atomics (f64
/// bit patterns) so `now` and `tempo` never take a lock.
pub struct EventList {
    sample_rate: u32,
    pending: Mutex<Vec<Event>>,
    /// Sorted by `(beat, seq)`. Audio thread only, but behind a mutex so
    /// `clear` can reach it from other threads.
    scheduled: Mutex<Vec<Event>>,
    cur_beat: AtomicU64,
    tempo: AtomicU64,
    seq: AtomicU64,
}

impl EventList {
    pub fn new(sample_rate: u32, tempo: f64) -> Self {
        Self {
            sample_rate,
            pending: Mutex::new(Vec::new()),
            scheduled: Mutex::new(Vec::new()),
            cur_beat: AtomicU64::new(0f64.to_bits()),
            tempo: AtomicU64::new(tempo.to_bits()),
            seq: AtomicU64::new(0),
        }
    }

    /// Current beat.
    pub fn now(&self) -> f64 {
        f64::from_bits(self.cur_beat.load(Ordering::Relaxed))
    }

    pub fn tempo(&self) -> f64 {
        f64::from_bits(self.tempo.load(Ordering::Relaxed))
    }

    pub fn set_tempo(&self, bpm: f64) {
        if bpm.is_finite() && bpm > 0.0 {
            self.tempo.store(bpm.to_bits(), Ordering::Relaxed);
        }
    }

    /// Append events to the pending buffer. They merge into the schedule at
    /// the next `advance`.
    pub fn add<I>(&self, events: I)
    where
        I: IntoIterator<Item = Event>,
    {
        let mut pending = lock(&self.pending);
        for mut ev in events {
            ev.seq = self.seq.fetch_add(1, Ordering::Relaxed);
            pending.push(ev);
        }
    }

    /// Remove every pending and scheduled event.
    pub fn clear(&self) {
        lock(&self.pending).clear();
        lock(&self.scheduled).clear();
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pending).is_empty() && lock(&self.scheduled).is_empty()
    }

    /// Advance the list by `nsamples` samples of engine time.
    ///
    /// Fires every event with `beat <= cur_beat`, merging newly added events
    /// as it goes so that cascades landing at or before the current beat run
    /// in the same block. Generators produced by events are pushed onto
    /// `new_gens`. Afterwards the clock moves by
    /// `nsamples * (tempo / 60) / sample_rate` beats.
    ///
    /// Returns true while any scheduled or pending event remains.
    pub fn advance(&self, nsamples: u32, block: &BlockCtx, new_gens: &mut Vec<BoxGen>) -> bool {
        let mut due: Vec<Event> = Vec::new();
        loop {
            {
                let mut scheduled = lock(&self.scheduled);
                {
                    let mut pending = lock(&self.pending);
                    if !pending.is_empty() {
                        scheduled.append(&mut pending);
                        scheduled.sort_by(by_beat_then_seq);
                    }
                }
                let now = self.now();
                let n_due = scheduled.iter().take_while(|ev| ev.beat <= now).count();
                if n_due == 0 {
                    break;
                }
                due.extend(scheduled.drain(..n_due));
            }
            // no lock held while user code runs, so a thunk may add events,
            // change tempo, or clear the list
            for ev in due.drain(..) {
                self.fire(ev, block, new_gens);
            }
        }

        let delta = nsamples as f64 * (self.tempo() / 60.0) / self.sample_rate as f64;
        self.cur_beat
            .store((self.now() + delta).to_bits(), Ordering::Relaxed);

        !lock(&self.scheduled).is_empty() || !lock(&self.pending).is_empty()
    }

    fn fire(&self, ev: Event, block: &BlockCtx, new_gens: &mut Vec<BoxGen>) {
        let ctx = EventCtx {
            beat: ev.beat,
            now: self.now(),
            tempo: self.tempo(),
            block: *block,
        };
        match catch_unwind(AssertUnwindSafe(|| (*ev.func)(&ctx))) {
            Ok(result) => self.collect(result, new_gens),
            Err(_) => eprintln!("[Engine] event at beat {} panicked; dropped", ev.beat),
        }
    }

    fn collect(&self, result: EventResult, new_gens: &mut Vec<BoxGen>) {
        match result {
            EventResult::Gen(g) => new_gens.push(g),
            EventResult::Evt(ev) => self.add(std::iter::once(ev)),
            EventResult::Many(items) => {
                for item in items {
                    self.collect(item, new_gens);
                }
            }
            EventResult::Nothing => {}
        }
    }
}

fn by_beat_then_seq(a: &Event, b: &Event) -> CmpOrdering {
    a.beat
        .partial_cmp(&b.beat)
        .unwrap_or(CmpOrdering::Equal)
        .then(a.seq.cmp(&b.seq))
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
