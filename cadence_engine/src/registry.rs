//! Process-wide registry of live engines.
//!
//! Every engine registers itself on construction so a host can shut down
//! everything it ever created without threading handles around.

use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;

use crate::engine::Engine;

lazy_static! {
    static ref ENGINES: Mutex<Vec<Engine>> = Mutex::new(Vec::new());
}

pub(crate) fn register(engine: &Engine) {
    ENGINES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(engine.clone());
}

/// Snapshot of the currently registered engines.
pub fn engines() -> Vec<Engine> {
    ENGINES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Drain the registry, clearing and stopping every engine in it.
pub fn kill_all() {
    let drained: Vec<Engine> = {
        let mut engines = ENGINES.lock().unwrap_or_else(PoisonError::into_inner);
        engines.drain(..).collect()
    };
    for engine in drained {
        engine.clear();
        engine.stop();
    }
}

/// `kill_all`, then reset the registry storage. Catches engines registered
/// while the kill pass was running. Handles held from before stay valid but
/// are no longer reachable through the registry.
pub fn clear_all_engines() {
    kill_all();
    ENGINES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}
