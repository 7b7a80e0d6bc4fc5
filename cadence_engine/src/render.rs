//! Offline rendering: the same per-block pipeline with the sink replaced by
//! an in-memory buffer, drained to a WAV file at end-of-stream.

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Result};
use hound::{SampleFormat, WavSpec, WavWriter};

use cadence_shared::EngineConfig;

use crate::engine::{Engine, EngineStatus, RunState};

impl Engine {
    /// Render this engine's scheduled graph to a 16-bit WAV file.
    ///
    /// Runs the block pipeline on the calling thread until the event list
    /// has nothing left and every active list has emptied, then writes the
    /// accumulated PCM. Prints the elapsed wall-clock seconds.
    ///
    /// A graph containing a generator that never reports `Done` renders
    /// forever; the offline path is for finite scores.
    pub fn render_to_disk<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.status() == EngineStatus::Running {
            bail!("engine is running; stop it before rendering to disk");
        }
        let started = Instant::now();
        let pcm = render_pcm(self);
        write_wav(path.as_ref(), &pcm, self.config())?;
        println!("elapsed: {:.3} seconds", started.elapsed().as_secs_f64());
        Ok(())
    }
}

/// Drive the engine's pipeline offline and return the full interleaved
/// 16-bit sample stream. Deterministic graphs produce the same stream the
/// realtime path would feed its sink, up to the WAV header.
pub fn render_pcm(engine: &Engine) -> Vec<i16> {
    let shared = engine.shared();
    let mut run = RunState::new(&shared.config);
    let mut pcm = Vec::new();
    loop {
        let more = run.process_block(shared);
        pcm.extend_from_slice(run.bus.pcm());
        if !more {
            break;
        }
    }
    pcm
}

fn write_wav(path: &Path, pcm: &[i16], config: &EngineConfig) -> Result<()> {
    let spec = WavSpec {
        channels: config.nchnls as u16,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &s in pcm {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}
