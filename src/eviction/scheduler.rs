//! Delayed-task scheduler with tag-based cancellation.
//!
//! # Responsibilities
//! - Deliver a payload onto a bounded stream once its delay elapses
//! - Keep at most one live timer per tag (a new schedule replaces the old)
//! - Cancel a timer by tag before it fires
//!
//! # Design Decisions
//! - One Tokio task per timer, parked on `sleep_until` or its cancel token
//! - Tokens are children of a root token so `stop` cancels every timer at once
//! - A firing timer claims its map entry with a ticket compare before sending,
//!   so a timer that lost a race with `unschedule` or a replacement never fires

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Identifies one scheduling of a tag. Strictly increasing per scheduler.
pub type Ticket = u64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler has been stopped")]
    Stopped,

    #[error("no Tokio runtime available to drive timers")]
    NoRuntime,
}

/// A payload whose delay elapsed without being canceled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<T> {
    pub tag: String,
    pub ticket: Ticket,
    pub payload: T,
}

#[derive(Debug)]
struct Entry {
    ticket: Ticket,
    token: CancellationToken,
    deadline: Instant,
}

pub struct DelayScheduler<T> {
    entries: Arc<DashMap<String, Entry>>,
    root: CancellationToken,
    next_ticket: AtomicU64,
    fired: mpsc::Sender<Fired<T>>,
}

impl<T: Send + 'static> DelayScheduler<T> {
    /// Create a scheduler whose fired payloads arrive on the returned receiver.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Fired<T>>) {
        let (fired, rx) = mpsc::channel(buffer);
        let scheduler = Self {
            entries: Arc::new(DashMap::new()),
            root: CancellationToken::new(),
            next_ticket: AtomicU64::new(0),
            fired,
        };
        (scheduler, rx)
    }

    /// Arm a timer for `tag`, replacing any timer already armed for it.
    pub fn schedule(&self, tag: &str, payload: T, delay: Duration) -> Result<Ticket, SchedulerError> {
        if self.root.is_cancelled() {
            return Err(SchedulerError::Stopped);
        }
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        let token = self.root.child_token();
        let deadline = Instant::now() + delay;

        let entry = Entry {
            ticket,
            token: token.clone(),
            deadline,
        };
        if let Some(previous) = self.entries.insert(tag.to_string(), entry) {
            previous.token.cancel();
            tracing::trace!(tag, replaced = previous.ticket, ticket, "Replaced scheduled timer");
        }

        let entries = Arc::clone(&self.entries);
        let fired = self.fired.clone();
        let tag = tag.to_string();
        runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = time::sleep_until(deadline) => {}
            }

            if entries.remove_if(&tag, |_, e| e.ticket == ticket).is_none() {
                return;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = fired.send(Fired { tag, ticket, payload }) => {}
            }
        });

        Ok(ticket)
    }

    /// Cancel the timer armed for `tag`. Returns whether one was armed.
    pub fn unschedule(&self, tag: &str) -> Result<bool, SchedulerError> {
        if self.root.is_cancelled() {
            return Err(SchedulerError::Stopped);
        }
        match self.entries.remove(tag) {
            Some((_, entry)) => {
                entry.token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<T> DelayScheduler<T> {
    /// Cancel every timer and refuse further scheduling.
    pub fn stop(&self) {
        self.root.cancel();
        self.entries.clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.root.is_cancelled()
    }

    pub fn is_scheduled(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    /// Remaining time before `tag` fires, if armed.
    pub fn remaining(&self, tag: &str) -> Option<Duration> {
        self.entries
            .get(tag)
            .map(|e| e.deadline.saturating_duration_since(Instant::now()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Drop for DelayScheduler<T> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(30);

    async fn recv<T>(rx: &mut mpsc::Receiver<Fired<T>>) -> Option<Fired<T>> {
        time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_payload_fires_after_delay() {
        let (scheduler, mut rx) = DelayScheduler::new(8);
        let started = Instant::now();
        let ticket = scheduler.schedule("a", 42u32, SHORT).unwrap();
        assert!(scheduler.is_scheduled("a"));

        let fired = recv(&mut rx).await.expect("timer did not fire");
        assert!(started.elapsed() >= SHORT);
        assert_eq!(
            fired,
            Fired {
                tag: "a".to_string(),
                ticket,
                payload: 42
            }
        );
        assert!(!scheduler.is_scheduled("a"));
    }

    #[tokio::test]
    async fn test_unschedule_prevents_fire() {
        let (scheduler, mut rx) = DelayScheduler::new(8);
        scheduler.schedule("a", 1u32, SHORT).unwrap();

        assert_eq!(scheduler.unschedule("a"), Ok(true));
        assert_eq!(scheduler.unschedule("a"), Ok(false));
        assert!(recv(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_unschedule_unknown_tag_is_noop() {
        let (scheduler, _rx) = DelayScheduler::<u32>::new(8);
        assert_eq!(scheduler.unschedule("ghost"), Ok(false));
    }

    #[tokio::test]
    async fn test_duplicate_tag_replaces_previous() {
        let (scheduler, mut rx) = DelayScheduler::new(8);
        let first = scheduler.schedule("a", 1u32, SHORT).unwrap();
        let second = scheduler.schedule("a", 2u32, SHORT * 2).unwrap();
        assert!(second > first);
        assert_eq!(scheduler.len(), 1);

        let fired = recv(&mut rx).await.expect("replacement did not fire");
        assert_eq!(fired.ticket, second);
        assert_eq!(fired.payload, 2);
        assert!(recv(&mut rx).await.is_none(), "superseded timer fired");
    }

    #[tokio::test]
    async fn test_fire_order_follows_deadlines() {
        let (scheduler, mut rx) = DelayScheduler::new(8);
        scheduler.schedule("late", "late", SHORT * 4).unwrap();
        scheduler.schedule("early", "early", SHORT).unwrap();

        assert_eq!(recv(&mut rx).await.unwrap().payload, "early");
        assert_eq!(recv(&mut rx).await.unwrap().payload, "late");
    }

    #[tokio::test]
    async fn test_stop_cancels_everything() {
        let (scheduler, mut rx) = DelayScheduler::new(8);
        scheduler.schedule("a", 1u32, SHORT).unwrap();
        scheduler.schedule("b", 2u32, SHORT).unwrap();

        scheduler.stop();
        assert!(scheduler.is_stopped());
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.schedule("c", 3, SHORT), Err(SchedulerError::Stopped));
        assert_eq!(scheduler.unschedule("a"), Err(SchedulerError::Stopped));
        assert!(recv(&mut rx).await.is_none());
    }

    #[test]
    fn test_schedule_outside_runtime_fails() {
        let (scheduler, _rx) = DelayScheduler::new(1);
        assert_eq!(
            scheduler.schedule("a", 1u32, SHORT),
            Err(SchedulerError::NoRuntime)
        );
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let (scheduler, _rx) = DelayScheduler::new(1);
        scheduler.schedule("a", (), Duration::from_secs(10)).unwrap();

        let remaining = scheduler.remaining("a").unwrap();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining > Duration::from_secs(9));
        assert!(scheduler.remaining("b").is_none());
    }
}
