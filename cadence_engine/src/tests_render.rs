#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use cadence_shared::beat::next_beat;
    use cadence_shared::EngineConfig;

    use crate::bus::quantise_sample;
    use crate::engine::{Engine, EngineStatus, RunState};
    use crate::events::{event, Event, EventHandle, EventResult};
    use crate::gens::SineGen;
    use crate::generator::{AudioGen, GenOutput};
    use crate::registry;
    use crate::render::render_pcm;
    use crate::BlockCtx;

    // engines register with process-global state, so every test touching an
    // engine runs under this lock
    static SERIAL: Mutex<()> = Mutex::new(());

    struct ConstGen {
        value: f64,
        blocks: Option<u32>,
        buf: Vec<f64>,
    }

    impl ConstGen {
        fn new(value: f64) -> Self {
            Self {
                value,
                blocks: None,
                buf: Vec::new(),
            }
        }

        fn for_blocks(value: f64, blocks: u32) -> Self {
            Self {
                value,
                blocks: Some(blocks),
                buf: Vec::new(),
            }
        }
    }

    impl AudioGen for ConstGen {
        fn pull(&mut self, ctx: &BlockCtx) -> GenOutput<'_> {
            if let Some(ref mut n) = self.blocks {
                if *n == 0 {
                    return GenOutput::Done;
                }
                *n -= 1;
            }
            self.buf.resize(ctx.block_size as usize, 0.0);
            self.buf.fill(self.value);
            GenOutput::Mono(&self.buf)
        }
    }

    struct MultiConstGen {
        values: Vec<f64>,
        bufs: Vec<Vec<f64>>,
    }

    impl MultiConstGen {
        fn new(values: Vec<f64>) -> Self {
            Self {
                values,
                bufs: Vec::new(),
            }
        }
    }

    impl AudioGen for MultiConstGen {
        fn pull(&mut self, ctx: &BlockCtx) -> GenOutput<'_> {
            self.bufs = self
                .values
                .iter()
                .map(|&v| vec![v; ctx.block_size as usize])
                .collect();
            GenOutput::Multi(&self.bufs)
        }
    }

    struct PanicGen;

    impl AudioGen for PanicGen {
        fn pull(&mut self, _ctx: &BlockCtx) -> GenOutput<'_> {
            panic!("broken generator")
        }
    }

    #[test]
    fn silence_with_no_generators() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        let mut run = RunState::new(engine.config());
        for _ in 0..10 {
            run.process_block(engine.shared());
            assert_eq!(run.bus.pcm().len(), 64);
            assert!(run.bus.pcm().iter().all(|&s| s == 0));
            assert_eq!(run.bus.bytes().len(), 128);
            assert!(run.bus.bytes().iter().all(|&b| b == 0));
        }
        assert_eq!(engine.current_block(), 10);
    }

    #[test]
    fn dc_offset_quantises_to_3fff() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        engine.add_afunc(Box::new(ConstGen::new(0.5)));
        let mut run = RunState::new(engine.config());
        run.process_block(engine.shared());
        assert_eq!(run.bus.bytes().len(), 128);
        for pair in run.bus.bytes().chunks_exact(2) {
            assert_eq!(pair, &[0xFF, 0x3F]);
        }
    }

    #[test]
    fn out_of_range_samples_saturate() {
        let _guard = SERIAL.lock().unwrap();
        let loud = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        loud.add_afunc(Box::new(ConstGen::new(2.0)));
        let mut run = RunState::new(loud.config());
        run.process_block(loud.shared());
        assert!(run.bus.pcm().iter().all(|&s| s == 0x7FFF));

        let quiet = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        quiet.add_afunc(Box::new(ConstGen::new(-2.0)));
        let mut run = RunState::new(quiet.config());
        run.process_block(quiet.shared());
        assert!(run.bus.pcm().iter().all(|&s| s == i16::MIN));
    }

    #[test]
    fn mono_and_multi_generators_mix_per_channel() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 2, 64)).unwrap();
        engine.add_afunc(Box::new(ConstGen::new(0.25)));
        engine.add_afunc(Box::new(MultiConstGen::new(vec![0.25, 0.25])));
        let mut run = RunState::new(engine.config());
        run.process_block(engine.shared());

        let ch0 = quantise_sample(0.5);
        let ch1 = quantise_sample(0.25);
        for frame in run.bus.pcm().chunks_exact(2) {
            assert_eq!(frame, &[ch0, ch1]);
        }
    }

    #[test]
    fn panicking_generator_is_removed_and_mixing_continues() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        engine.add_afunc(Box::new(PanicGen));
        engine.add_afunc(Box::new(ConstGen::new(0.5)));
        let mut run = RunState::new(engine.config());
        run.process_block(engine.shared());
        assert!(run.bus.pcm().iter().all(|&s| s == 0x3FFF));
        run.process_block(engine.shared());
        assert!(run.bus.pcm().iter().all(|&s| s == 0x3FFF));
    }

    #[test]
    fn event_fires_on_the_block_that_reaches_its_beat() {
        let _guard = SERIAL.lock().unwrap();
        for (block_size, expected_block) in [(44100u32, 1u64), (22050, 2)] {
            let engine = Engine::new(EngineConfig::new(44100, 1, block_size)).unwrap();
            assert_eq!(engine.tempo(), 60.0);
            let fired = Arc::new(Mutex::new(Vec::new()));
            let f = fired.clone();
            engine.add_events([event(
                move |ctx| {
                    f.lock().unwrap().push(ctx.block.current_block_num);
                    EventResult::Nothing
                },
                1.0,
            )]);

            let mut run = RunState::new(engine.config());
            for _ in 0..4 {
                run.process_block(engine.shared());
            }
            assert_eq!(*fired.lock().unwrap(), vec![expected_block]);
        }
    }

    #[test]
    fn event_born_generator_sounds_in_the_same_block() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        engine.add_events([event(
            |_| EventResult::Gen(Box::new(ConstGen::new(0.5))),
            0.0,
        )]);
        let mut run = RunState::new(engine.config());
        run.process_block(engine.shared());
        assert!(run.bus.pcm().iter().all(|&s| s == 0x3FFF));
    }

    #[test]
    fn temporal_recursion_fires_once_per_beat() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 44100)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        let handle = EventHandle::new(|_| EventResult::Nothing);
        let h = handle.clone();
        let c = count.clone();
        handle.redefine(move |ctx| {
            c.fetch_add(1, Ordering::Relaxed);
            EventResult::Evt(Event::new(ctx.now + next_beat(ctx.now, 1.0), h.bind()))
        });
        engine.add_events([Event::new(0.0, handle.bind())]);

        let mut run = RunState::new(engine.config());
        for _ in 0..10 {
            run.process_block(engine.shared());
        }
        // one block per beat at this block size, one firing per block
        assert_eq!(count.load(Ordering::Relaxed), 10);

        handle.kill();
        for _ in 0..3 {
            run.process_block(engine.shared());
        }
        assert_eq!(count.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn clear_silences_the_very_next_block() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        engine.add_afunc(Box::new(ConstGen::new(0.5)));
        engine.add_events([event(|_| EventResult::Nothing, 100.0)]);
        let mut run = RunState::new(engine.config());
        run.process_block(engine.shared());
        assert!(run.bus.pcm().iter().all(|&s| s == 0x3FFF));

        engine.clear();
        engine.clear(); // idempotent
        run.process_block(engine.shared());
        assert!(run.bus.pcm().iter().all(|&s| s == 0));
        assert!(engine.event_list().is_empty());
    }

    #[test]
    fn cfuncs_run_every_block_and_panics_drop_them() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        let pre_runs = Arc::new(AtomicUsize::new(0));
        let post_runs = Arc::new(AtomicUsize::new(0));

        let pre = pre_runs.clone();
        engine.add_pre_cfunc(Box::new(move |_| {
            pre.fetch_add(1, Ordering::Relaxed);
        }));
        let post = post_runs.clone();
        engine.add_post_cfunc(Box::new(move |_| {
            post.fetch_add(1, Ordering::Relaxed);
            panic!("post cfunc failure");
        }));

        let mut run = RunState::new(engine.config());
        for _ in 0..3 {
            run.process_block(engine.shared());
        }
        assert_eq!(pre_runs.load(Ordering::Relaxed), 3);
        // ran once, panicked, dropped
        assert_eq!(post_runs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn offline_render_terminates_when_drained() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        engine.add_afunc(Box::new(ConstGen::for_blocks(0.5, 3)));
        let pcm = render_pcm(&engine);
        // three sounding blocks plus the block that observes the Done
        assert_eq!(pcm.len(), 4 * 64);
        assert!(pcm[..3 * 64].iter().all(|&s| s == 0x3FFF));
        assert!(pcm[3 * 64..].iter().all(|&s| s == 0));
    }

    #[test]
    fn offline_render_is_deterministic() {
        let _guard = SERIAL.lock().unwrap();
        let build = || {
            let engine = Engine::new(EngineConfig::new(44100, 2, 64)).unwrap();
            engine.set_tempo(120.0);
            engine.add_events([
                event(
                    |_| EventResult::Gen(Box::new(SineGen::new(440.0, 0.3).lasting(0.02))),
                    0.0,
                ),
                event(
                    |_| EventResult::Gen(Box::new(SineGen::new(220.0, 0.3).lasting(0.01))),
                    1.0,
                ),
            ]);
            engine
        };
        let a = render_pcm(&build());
        let b = render_pcm(&build());
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn render_to_disk_writes_a_wav_header() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(22050, 1, 64)).unwrap();
        engine.add_afunc(Box::new(ConstGen::for_blocks(0.5, 2)));

        let path = std::env::temp_dir().join("cadence_render_test.wav");
        engine.render_to_disk(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        let channels = u16::from_le_bytes([bytes[22], bytes[23]]);
        assert_eq!(channels, 1);
        let sr = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
        assert_eq!(sr, 22050);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn generators_queued_from_other_threads_arrive() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                thread::spawn(move || {
                    engine.add_afunc(Box::new(ConstGen::new(0.1)));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut run = RunState::new(engine.config());
        run.process_block(engine.shared());
        let expected = quantise_sample(0.4);
        assert!(run.bus.pcm().iter().all(|&s| s == expected));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let _guard = SERIAL.lock().unwrap();
        assert!(Engine::new(EngineConfig::new(0, 1, 64)).is_err());
        assert!(Engine::new(EngineConfig::new(44100, 0, 64)).is_err());
        assert!(Engine::new(EngineConfig::new(44100, 1, 0)).is_err());
    }

    #[test]
    fn stop_and_clear_are_idempotent_on_a_stopped_engine() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        assert_eq!(engine.status(), EngineStatus::Stopped);
        engine.stop();
        engine.stop();
        engine.clear();
        assert_eq!(engine.status(), EngineStatus::Stopped);
    }

    #[test]
    fn kill_all_clears_registered_engines() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        engine.add_afunc(Box::new(ConstGen::new(0.5)));
        registry::kill_all();

        // the kill requested a clear, so the queued generator never sounds
        let mut run = RunState::new(engine.config());
        run.process_block(engine.shared());
        assert!(run.bus.pcm().iter().all(|&s| s == 0));
        assert_eq!(engine.status(), EngineStatus::Stopped);

        registry::clear_all_engines();
        assert!(registry::engines().is_empty());
    }

    #[test]
    fn master_gain_scales_before_quantisation() {
        let _guard = SERIAL.lock().unwrap();
        let engine = Engine::new(EngineConfig::new(44100, 1, 64)).unwrap();
        assert_eq!(engine.gain(), 1.0);
        engine.set_gain(0.5);
        engine.add_afunc(Box::new(ConstGen::new(1.0)));
        let mut run = RunState::new(engine.config());
        run.process_block(engine.shared());
        assert!(run.bus.pcm().iter().all(|&s| s == 0x3FFF));
    }
}
