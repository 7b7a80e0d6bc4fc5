//! Accumulating multi-channel output bus and 16-bit PCM quantisation.

use cadence_shared::EngineConfig;

/// The per-block mix target.
///
/// Holds one interleaved `f64` buffer of `block_size * nchnls` samples, the
/// quantised `i16` image of the last mixed block, and its little-endian byte
/// form. All three are allocated once at engine start and reused every block.
pub struct OutputBus {
    nchnls: usize,
    block_size: usize,
    mix: Vec<f64>,
    pcm: Vec<i16>,
    bytes: Vec<u8>,
}

impl OutputBus {
    pub fn new(config: &EngineConfig) -> Self {
        let frames = config.out_buffer_size();
        Self {
            nchnls: config.nchnls as usize,
            block_size: config.block_size as usize,
            mix: vec![0.0; frames],
            pcm: vec![0; frames],
            bytes: vec![0; config.byte_buffer_size()],
        }
    }

    /// Zero the float buffer. Called at the top of the mixer phase.
    pub fn zero(&mut self) {
        self.mix.fill(0.0);
    }

    /// Sum a mono buffer into channel 0, stride `nchnls`.
    pub fn mix_mono(&mut self, buf: &[f64]) {
        let n = buf.len().min(self.block_size);
        if self.nchnls == 1 {
            for (o, s) in self.mix.iter_mut().zip(&buf[..n]) {
                *o += s;
            }
        } else {
            for (frame, s) in buf[..n].iter().enumerate() {
                self.mix[frame * self.nchnls] += s;
            }
        }
    }

    /// Sum one buffer per channel, channel order.
    pub fn mix_multi(&mut self, bufs: &[Vec<f64>]) {
        for (ch, buf) in bufs.iter().enumerate().take(self.nchnls) {
            for (frame, s) in buf.iter().enumerate().take(self.block_size) {
                self.mix[frame * self.nchnls + ch] += s;
            }
        }
    }

    /// Quantise the mixed block to interleaved 16-bit PCM and refresh the
    /// byte image. `gain` scales the mixed sample before quantisation.
    pub fn quantise(&mut self, gain: f64) {
        for (dst, &x) in self.pcm.iter_mut().zip(self.mix.iter()) {
            *dst = quantise_sample(x * gain);
        }
        for (chunk, &s) in self.bytes.chunks_exact_mut(2).zip(self.pcm.iter()) {
            chunk.copy_from_slice(&s.to_le_bytes());
        }
    }

    /// Quantised samples of the last mixed block.
    pub fn pcm(&self) -> &[i16] {
        &self.pcm
    }

    /// Little-endian byte form of the last mixed block.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Map a float sample to 16-bit PCM: scale by 32767 and saturate to the
/// i16 range, truncating toward zero. 2.0 becomes 0x7FFF, -2.0 becomes
/// 0x8000.
#[inline]
pub fn quantise_sample(x: f64) -> i16 {
    (x * 32767.0).clamp(i16::MIN as f64, i16::MAX as f64) as i16
}
