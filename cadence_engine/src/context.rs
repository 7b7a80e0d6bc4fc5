use cadence_shared::EngineConfig;

/// Per-block ambient parameters.
///
/// The engine loop builds one of these before each block and hands it by
/// reference to every generator pull, control callback, and event function
/// invoked during that block. The values are constant for the duration of
/// the block, so a generator allocated against one engine stays portable to
/// an engine with a different configuration.
///
/// Only valid during a synchronous invocation from the audio thread; do not
/// stash the values for use after the call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCtx {
    pub sample_rate: u32,
    pub block_size: u32,
    pub nchnls: u32,
    pub current_block_num: u64,
}

impl BlockCtx {
    pub fn new(config: &EngineConfig, current_block_num: u64) -> Self {
        Self {
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            nchnls: config.nchnls,
            current_block_num,
        }
    }

    /// Seconds of audio covered by one block.
    pub fn block_secs(&self) -> f64 {
        self.block_size as f64 / self.sample_rate as f64
    }
}
