use serde::{Deserialize, Serialize};

pub mod beat;

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
pub const DEFAULT_NCHNLS: u32 = 1;
pub const DEFAULT_BLOCK_SIZE: u32 = 64;

/// Audio configuration of one engine. Immutable once the engine is created;
/// an engine never changes sample rate, channel count, or block size mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Output channel count. Mono generators land on channel 0.
    pub nchnls: u32,
    /// Samples per processing block. Event timing resolves to this quantum.
    pub block_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            nchnls: DEFAULT_NCHNLS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn new(sample_rate: u32, nchnls: u32, block_size: u32) -> Self {
        Self {
            sample_rate,
            nchnls,
            block_size,
        }
    }

    /// Interleaved float samples per block.
    pub fn out_buffer_size(&self) -> usize {
        self.block_size as usize * self.nchnls as usize
    }

    /// Bytes per block of interleaved 16-bit PCM.
    pub fn byte_buffer_size(&self) -> usize {
        2 * self.out_buffer_size()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample_rate must be non-zero".into());
        }
        if self.nchnls == 0 {
            return Err("nchnls must be non-zero".into());
        }
        if self.block_size == 0 {
            return Err("block_size must be non-zero".into());
        }
        Ok(())
    }
}
