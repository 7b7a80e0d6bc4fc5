//! cadence_engine
//!
//! A block-based audio synthesis engine driven by a beat-scheduled event
//! list. Generators pull one block of samples at a time, an output bus sums
//! them into interleaved 16-bit PCM, and the same pipeline feeds either a
//! realtime output stream or an offline WAV render.

pub mod bus;
pub mod context;
pub mod engine;
pub mod events;
pub mod generator;
pub mod gens;
pub mod queues;
pub mod registry;
pub mod render;

#[cfg(test)]
mod tests_render;

pub use cadence_shared::EngineConfig;
pub use context::BlockCtx;
pub use engine::{ControlFn, Engine, EngineStatus, DEFAULT_TEMPO};
pub use events::{event, Event, EventCtx, EventFn, EventHandle, EventList, EventResult};
pub use generator::{AudioGen, BoxGen, GenOutput};
pub use render::render_pcm;
