//! Deduplication identities for reapplied events.
//!
//! A key is derived from `(run_id, event_id, version)` and rendered to a
//! resource id string; the string is what a state records and tests
//! membership against.

use std::fmt;

use crate::events::HistoryEvent;

/// Separator between resource id segments.
pub const RESOURCE_ID_SEPARATOR: &str = "::";

/// Class of deduplicated resource. Only reapplied events exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupResourceType {
    EventReapplied = 0,
}

impl DedupResourceType {
    pub fn tag(self) -> i32 {
        self as i32
    }
}

/// Identity of one historical event reapplied to one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub run_id: String,
    pub event_id: i64,
    pub version: i64,
}

impl DedupKey {
    pub fn new(run_id: impl Into<String>, event_id: i64, version: i64) -> Self {
        Self {
            run_id: run_id.into(),
            event_id,
            version,
        }
    }

    /// Key for reapplying `event` to the run `run_id`.
    pub fn event_reapplied(run_id: &str, event: &HistoryEvent) -> Self {
        Self::new(run_id, event.event_id, event.version)
    }

    pub fn resource_type(&self) -> DedupResourceType {
        DedupResourceType::EventReapplied
    }

    /// `{type}::{run_id}::{event_id}::{version}`
    pub fn resource_id(&self) -> String {
        format!(
            "{tag}{sep}{run}{sep}{event}{sep}{version}",
            tag = self.resource_type().tag(),
            sep = RESOURCE_ID_SEPARATOR,
            run = self.run_id,
            event = self.event_id,
            version = self.version,
        )
    }

    /// Inverse of [`DedupKey::resource_id`]. Run ids may themselves contain
    /// the separator, so the numeric segments are taken from the right.
    pub fn parse_resource_id(resource_id: &str) -> Option<Self> {
        let rest = resource_id.strip_prefix(&format!(
            "{}{}",
            DedupResourceType::EventReapplied.tag(),
            RESOURCE_ID_SEPARATOR
        ))?;
        let mut tail = rest.rsplitn(3, RESOURCE_ID_SEPARATOR);
        let version = tail.next()?.parse::<i64>().ok()?;
        let event_id = tail.next()?.parse::<i64>().ok()?;
        let run_id = tail.next()?;
        if run_id.is_empty() {
            return None;
        }
        Some(Self::new(run_id, event_id, version))
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_id())
    }
}
