//! Time-of-day build schedules.

use crate::config::ScheduleConfig;
use crate::triggers::TriggerEvent;
use cascade_core::repository::Architecture;
use cascade_core::{Error, Result};
use chrono::{DateTime, Utc};
use std::str::FromStr;

/// One named cron schedule for one architecture.
#[derive(Debug, Clone)]
pub struct ScheduledBuild {
    pub name: String,
    pub architecture: Architecture,
    schedule: cron::Schedule,
}

impl ScheduledBuild {
    pub fn new(name: impl Into<String>, architecture: Architecture, expression: &str) -> Result<Self> {
        let name = name.into();
        let schedule = cron::Schedule::from_str(expression)
            .map_err(|e| Error::Config(format!("schedule {name} has invalid cron: {e}")))?;
        Ok(Self {
            name,
            architecture,
            schedule,
        })
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn trigger(&self) -> TriggerEvent {
        TriggerEvent::Scheduled {
            schedule: self.name.clone(),
            architecture: self.architecture,
        }
    }
}

/// All configured schedules.
#[derive(Debug, Clone, Default)]
pub struct ScheduleBook {
    entries: Vec<ScheduledBuild>,
}

impl ScheduleBook {
    pub fn from_config(schedules: &[ScheduleConfig]) -> Result<Self> {
        let entries = schedules
            .iter()
            .map(|s| ScheduledBuild::new(&s.name, s.architecture, &s.cron))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ScheduledBuild] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest fire time of any schedule strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entries.iter().filter_map(|e| e.next_after(after)).min()
    }

    /// Triggers of every schedule firing in `(from, to]`. A schedule that
    /// would fire several times in the window fires once.
    pub fn due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<TriggerEvent> {
        self.entries
            .iter()
            .filter(|e| e.next_after(from).is_some_and(|at| at <= to))
            .map(ScheduledBuild::trigger)
            .collect()
    }
}
