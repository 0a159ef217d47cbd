//! Pending-awaiter map correlating asynchronous completions back to waiting
//! requests.
//!
//! A dispatcher calls [`Correlator::begin`] before sending work out and
//! awaits the returned receiver; whoever observes the completion calls
//! [`Correlator::complete`] with the same id. A single-shot timer rejects
//! entries that outlive their deadline. Completion and timer race; whichever
//! removes the entry first wins and the loser is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

/// Why a pending entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// The deadline elapsed before a completion arrived.
    TimedOut(Duration),
}

impl fmt::Display for CorrelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut(after) => write!(f, "timed out after {}ms", after.as_millis()),
        }
    }
}

type Pending<T> = oneshot::Sender<Result<T, CorrelationError>>;

/// Map of correlation id to pending awaiter.
pub struct Correlator<T> {
    pending: Arc<Mutex<HashMap<String, Pending<T>>>>,
}

impl<T> Clone for Correlator<T> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<T> Default for Correlator<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Send + 'static> Correlator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending entry and start its deadline timer.
    ///
    /// A second `begin` with the same id replaces the first; the abandoned
    /// receiver observes a closed channel.
    pub fn begin(
        &self,
        id: &str,
        deadline: Duration,
    ) -> oneshot::Receiver<Result<T, CorrelationError>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .insert(id.to_string(), tx);

        let pending = Arc::clone(&self.pending);
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let expired = pending
                .lock()
                .expect("correlator lock poisoned")
                .remove(&id);
            if let Some(tx) = expired {
                let _ = tx.send(Err(CorrelationError::TimedOut(deadline)));
            }
        });

        rx
    }

    /// Resolve a pending entry.
    ///
    /// Returns `false` when the id is unknown (already completed, timed out,
    /// or never begun); such completions are silently dropped.
    pub fn complete(&self, id: &str, value: T) -> bool {
        let tx = self
            .pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(id);
        match tx {
            Some(tx) => tx.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Whether an entry is currently pending. Used by tests and snapshots.
    pub fn contains(&self, id: &str) -> bool {
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .contains_key(id)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.pending.lock().expect("correlator lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_resolves_the_awaiter() {
        let correlator: Correlator<u32> = Correlator::new();
        let rx = correlator.begin("abc", Duration::from_secs(60));
        assert!(correlator.complete("abc", 7));
        assert_eq!(rx.await.unwrap(), Ok(7));
        assert!(!correlator.contains("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_rejects_and_removes_the_entry() {
        let correlator: Correlator<u32> = Correlator::new();
        let rx = correlator.begin("abc", Duration::from_millis(50));
        let outcome = rx.await.unwrap();
        assert_eq!(
            outcome,
            Err(CorrelationError::TimedOut(Duration::from_millis(50)))
        );
        assert!(!correlator.contains("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_completion_after_timeout_is_a_no_op() {
        let correlator: Correlator<u32> = Correlator::new();
        let rx = correlator.begin("abc", Duration::from_millis(50));
        let _ = rx.await;
        assert!(!correlator.complete("abc", 7));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_before_timeout_makes_timer_a_no_op() {
        let correlator: Correlator<u32> = Correlator::new();
        let rx = correlator.begin("abc", Duration::from_millis(50));
        assert!(correlator.complete("abc", 1));
        assert_eq!(rx.await.unwrap(), Ok(1));
        // Let the timer fire; nothing must remain or panic.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_completion_is_dropped() {
        let correlator: Correlator<u32> = Correlator::new();
        assert!(!correlator.complete("never-begun", 1));
    }

    #[test]
    fn timeout_message_names_the_deadline() {
        let err = CorrelationError::TimedOut(Duration::from_secs(300));
        assert_eq!(err.to_string(), "timed out after 300000ms");
    }
}
