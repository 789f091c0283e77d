//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the core domain and external adapters.

use crate::Result;
use crate::events::Event;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Event bus for publishing and subscribing to events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Subscribe to events whose subject matches a pattern.
    /// Pattern supports wildcards: `run.*.started`, `trigger.>`
    async fn subscribe(&self, pattern: &str) -> Result<EventStream>;
}

/// Match a dotted subject against a pattern where `*` matches one token and a
/// trailing `>` matches one or more.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_matches() {
        assert!(subject_matches("trigger.>", "trigger.a-triggerable-amd64"));
        assert!(subject_matches("run.*.stage.*.started", "run.r1.stage.s.started"));
        assert!(subject_matches(">", "anything.at.all"));
        assert!(!subject_matches("run.>", "run"));
        assert!(!subject_matches("run.*", "run.a.b"));
        assert!(subject_matches("builder.x.state", "builder.x.state"));
    }
}
