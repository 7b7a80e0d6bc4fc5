//! A couple of built-in generators.
//!
//! The real DSP vocabulary lives outside the engine and reaches it through
//! the [`AudioGen`] contract; these two exist to drive the demo binary and
//! the tests.

use crate::context::BlockCtx;
use crate::generator::{AudioGen, GenOutput};

pub struct SineGen {
    freq: f64,
    amp: f64,
    phase: f64,
    dur_secs: Option<f64>,
    elapsed: u64,
    buf: Vec<f64>,
}

impl SineGen {
    pub fn new(freq: f64, amp: f64) -> Self {
        Self {
            freq,
            amp,
            phase: 0.0,
            dur_secs: None,
            elapsed: 0,
            buf: Vec::new(),
        }
    }

    /// Limit output to `secs`, after which the generator reports `Done`.
    pub fn lasting(mut self, secs: f64) -> Self {
        self.dur_secs = Some(secs);
        self
    }
}

impl AudioGen for SineGen {
    fn pull(&mut self, ctx: &BlockCtx) -> GenOutput<'_> {
        if let Some(dur) = self.dur_secs {
            if self.elapsed as f64 / ctx.sample_rate as f64 >= dur {
                return GenOutput::Done;
            }
        }
        // resize keeps capacity after the first block
        self.buf.resize(ctx.block_size as usize, 0.0);
        let step = self.freq / ctx.sample_rate as f64;
        for s in self.buf.iter_mut() {
            *s = (self.phase * std::f64::consts::TAU).sin() * self.amp;
            self.phase = (self.phase + step) % 1.0;
        }
        self.elapsed += ctx.block_size as u64;
        GenOutput::Mono(&self.buf)
    }
}

/// White noise at a fixed amplitude.
pub struct NoiseGen {
    amp: f64,
    dur_secs: Option<f64>,
    elapsed: u64,
    buf: Vec<f64>,
}

impl NoiseGen {
    pub fn new(amp: f64) -> Self {
        Self {
            amp,
            dur_secs: None,
            elapsed: 0,
            buf: Vec::new(),
        }
    }

    pub fn lasting(mut self, secs: f64) -> Self {
        self.dur_secs = Some(secs);
        self
    }
}

impl AudioGen for NoiseGen {
    fn pull(&mut self, ctx: &BlockCtx) -> GenOutput<'_> {
        if let Some(dur) = self.dur_secs {
            if self.elapsed as f64 / ctx.sample_rate as f64 >= dur {
                return GenOutput::Done;
            }
        }
        self.buf.resize(ctx.block_size as usize, 0.0);
        for s in self.buf.iter_mut() {
            *s = (fastrand::f64() * 2.0 - 1.0) * self.amp;
        }
        self.elapsed += ctx.block_size as u64;
        GenOutput::Mono(&self.buf)
    }
}
