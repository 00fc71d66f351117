//! Cancellation for blocking listens.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

/// Creates a connected canceller/token pair.
///
/// Dropping the [`Canceller`] cancels as well, so keep it alive for as long as the
/// tokens should stay live.
pub fn cancel_pair() -> (Canceller, CancelToken) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (
        Canceller { sender: Mutex::new(Some(tx)) },
        CancelToken { signal: rx, _keep_alive: None },
    )
}

/// Triggers cancellation of every [`CancelToken`] of its pair.
#[derive(Debug)]
pub struct Canceller {
    sender: Mutex<Option<Sender<()>>>,
}

impl Canceller {
    /// Cancels all tokens. Idempotent.
    pub fn cancel(&self) {
        // Disconnecting the channel wakes every receiver, now and later.
        self.sender.lock().take();
    }
}

/// Observed by listeners; cancellation is sticky once triggered.
#[derive(Debug, Clone)]
pub struct CancelToken {
    signal: Receiver<()>,
    _keep_alive: Option<Sender<()>>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self { signal: rx, _keep_alive: Some(tx) }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.signal.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleeps for up to `timeout`, returning early with `true` if cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.signal.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn never_token_times_out() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        let started = Instant::now();
        assert!(!token.wait(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_wakes_waiters_and_sticks() {
        let (canceller, token) = cancel_pair();
        let waiter = {
            let token = token.clone();
            std::thread::spawn(move || token.wait(Duration::from_secs(10)))
        };
        std::thread::sleep(Duration::from_millis(20));
        canceller.cancel();
        assert!(waiter.join().unwrap());
        assert!(token.is_cancelled());
        assert!(token.wait(Duration::from_secs(10)));
        canceller.cancel();
    }

    #[test]
    fn dropping_the_canceller_cancels() {
        let (canceller, token) = cancel_pair();
        assert!(!token.is_cancelled());
        drop(canceller);
        assert!(token.is_cancelled());
    }
}
