use crate::context::BlockCtx;

/// One block of output from a generator.
///
/// Buffers are borrowed from the generator's own preallocated storage so the
/// hot path never allocates. A `Mono` buffer carries `block_size` samples; a
/// `Multi` return carries exactly `nchnls` buffers of `block_size` samples
/// each, in channel order.
pub enum GenOutput<'a> {
    Mono(&'a [f64]),
    Multi(&'a [Vec<f64>]),
    /// Finished. The generator is removed and never polled again.
    Done,
}

/// A stateful producer of one block of samples per invocation.
///
/// `pull` is called exactly once per engine block while the generator is
/// active, always on the engine's audio thread, never concurrently with any
/// other generator or callback. The ambient [`BlockCtx`] is set before the
/// call and unchanged during it. A panic inside `pull` is treated as `Done`:
/// the generator is dropped and the engine keeps running.
pub trait AudioGen: Send {
    fn pull(&mut self, ctx: &BlockCtx) -> GenOutput<'_>;
}

pub type BoxGen = Box<dyn AudioGen>;
