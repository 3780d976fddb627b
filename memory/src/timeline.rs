//! Timeline tags: the temporal anchors stored on memory nodes.
//!
//! Tags are fixed-width UTC timestamps, so string order equals time order and
//! range queries work directly on the stored column.

use chrono::{DateTime, Utc};

const TAG_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Tag for a point in conversation time.
pub fn timeline_tag(at: DateTime<Utc>) -> String {
    at.format(TAG_FORMAT).to_string()
}

/// The later of two anchors; a node's anchor never precedes its predecessor's.
pub(crate) fn later_anchor(candidate: String, floor: Option<&str>) -> String {
    match floor {
        Some(floor) if floor > candidate.as_str() => floor.to_string(),
        _ => candidate,
    }
}

/// Inclusive time window for memory queries; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub(crate) fn tags(&self) -> (Option<String>, Option<String>) {
        (self.from.map(timeline_tag), self.to.map(timeline_tag))
    }
}
