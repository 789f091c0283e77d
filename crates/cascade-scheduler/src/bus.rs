//! In-process event bus.

use async_trait::async_trait;
use cascade_core::events::Event;
use cascade_core::ports::{EventBus, EventStream, subject_matches};
use cascade_core::{Error, Result};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::trace;

const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast-backed event bus that also keeps a bounded history, so
/// late observers and tests can inspect what already happened.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<Event>,
    history: RwLock<VecDeque<Event>>,
    history_limit: usize,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            history_limit: capacity,
        }
    }

    /// Every retained event, oldest first.
    pub async fn history(&self) -> Vec<Event> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Retained events whose subject matches `pattern`.
    pub async fn history_matching(&self, pattern: &str) -> Vec<Event> {
        self.history
            .read()
            .await
            .iter()
            .filter(|e| subject_matches(pattern, &e.subject()))
            .cloned()
            .collect()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        trace!(subject = %event.subject(), "Publishing event");

        {
            let mut history = self.history.write().await;
            if history.len() >= self.history_limit {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No live subscribers is fine.
        let _ = self.sender.send(event);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<EventStream> {
        let receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = futures::stream::unfold(receiver, move |mut rx| {
            let pattern = pattern.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) if subject_matches(&pattern, &event.subject()) => {
                            return Some((Ok(event), rx));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(missed)) => {
                            return Some((
                                Err(Error::EventBus(format!(
                                    "subscriber lagged, {missed} events dropped"
                                ))),
                                rx,
                            ));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
