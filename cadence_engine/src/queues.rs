//! Thread-safe drop-boxes between producer threads and the audio thread.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// An unbounded hand-off queue. Any thread may `push`; the audio thread
/// drains the whole backlog once per block boundary. Items pushed at time t
/// are observed no later than the second block starting after t.
pub struct PendingQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append from any thread.
    pub fn push(&self, item: T) {
        // the receiver lives in this struct, so the send cannot fail
        let _ = self.tx.send(item);
    }

    /// Move everything currently queued onto the end of `out`.
    /// Audio thread only.
    pub fn drain_into(&self, out: &mut Vec<T>) {
        for item in self.rx.try_iter() {
            out.push(item);
        }
    }

    /// Drop everything currently queued.
    pub fn discard(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
