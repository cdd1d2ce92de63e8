//! Process-wide cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared by every long-running loop.
///
/// Cloning yields another handle to the same flag. Loops check it between
/// units of work (before a game, before draining more of the queue, before a
/// training step); it never preempts an operation in progress.
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    /// Create a token in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request every holder of this token to stop.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = StopToken::new();
        let other = token.clone();
        assert!(!other.is_stopped());

        token.stop();
        assert!(other.is_stopped());
    }

    #[test]
    fn test_stop_visible_across_threads() {
        let token = StopToken::new();
        let worker = {
            let token = token.clone();
            std::thread::spawn(move || {
                let mut spins = 0u64;
                while !token.is_stopped() {
                    spins += 1;
                    std::thread::yield_now();
                }
                spins
            })
        };
        token.stop();
        worker.join().unwrap();
    }
}
