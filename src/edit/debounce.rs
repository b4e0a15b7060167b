//! Arm / cancel / fire timer, independent of any rendering lifecycle.
//!
//! Arming cancels whatever was pending and starts a fresh delay. When the
//! delay elapses, a [`Fired`] message carrying the arm's ticket is delivered
//! on the debouncer's channel. The receiver must pass it back through
//! [`Debouncer::accept`]: a fire that raced with a later `arm` or `cancel`
//! is rejected there.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTicket(u64);

#[derive(Debug, Clone)]
pub struct Fired<T> {
    pub ticket: DebounceTicket,
    pub payload: T,
}

pub struct Debouncer<T> {
    delay: Duration,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<Fired<T>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<Fired<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                delay,
                generation: 0,
                pending: None,
                tx,
            },
            rx,
        )
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Restart the delay; only the most recent arm can fire.
    pub fn arm(&mut self, payload: T) -> DebounceTicket {
        self.cancel();
        self.generation += 1;
        let ticket = DebounceTicket(self.generation);
        let deadline = tokio::time::Instant::now() + self.delay;
        let tx = self.tx.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(Fired { ticket, payload });
        }));
        ticket
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Accept a delivered fire if it belongs to the current arm. Disarms.
    pub fn accept(&mut self, fired: &Fired<T>) -> bool {
        if self.pending.is_some() && fired.ticket == DebounceTicket(self.generation) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
