//! Headless demo: schedules a temporally-recursive melody and renders it to
//! a WAV file, no audio device required.
//!
//! Usage: headless_demo [config.json] [out.wav]

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use cadence_engine::gens::SineGen;
use cadence_engine::{Engine, EngineConfig, Event, EventHandle, EventResult};
use cadence_shared::beat::next_beat;

const BEATS_TO_PLAY: i32 = 16;

fn main() -> Result<(), anyhow::Error> {
    let mut config = EngineConfig::default();
    let mut out = PathBuf::from("cadence_demo.wav");
    for arg in std::env::args().skip(1) {
        if arg.ends_with(".json") {
            config = serde_json::from_str(&std::fs::read_to_string(&arg)?)?;
        } else {
            out = PathBuf::from(arg);
        }
    }

    println!("[Demo] config: {:?}", config);
    let engine = Engine::new(config)?;
    engine.set_tempo(120.0);

    // A-minor-ish pool; one random note per beat until the counter drains.
    let scale = [220.0, 246.94, 261.63, 329.63, 392.0];
    let remaining = Arc::new(AtomicI32::new(BEATS_TO_PLAY));

    let handle = EventHandle::new(|_| EventResult::Nothing);
    let h = handle.clone();
    handle.redefine(move |ctx| {
        if remaining.fetch_sub(1, Ordering::Relaxed) <= 0 {
            return EventResult::Nothing;
        }
        let freq = scale[fastrand::usize(..scale.len())];
        EventResult::Many(vec![
            EventResult::Gen(Box::new(SineGen::new(freq, 0.2).lasting(0.4))),
            EventResult::Evt(Event::new(ctx.now + next_beat(ctx.now, 1.0), h.bind())),
        ])
    });
    engine.add_events([Event::new(0.0, handle.bind())]);

    println!("[Demo] rendering {} beats...", BEATS_TO_PLAY);
    engine.render_to_disk(&out)?;
    println!("[Demo] wrote {}", out.display());
    Ok(())
}
