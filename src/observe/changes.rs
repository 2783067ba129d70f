//! Committed change batches and time-bounded timelines

use crate::execution::ExecutionContext;
use crate::observe::Observer;
use crate::request::Request;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

/// Immutable batch of successful change requests committed together
#[derive(Debug, Clone)]
pub struct Changes {
    sequence: u64,
    process_id: String,
    user: String,
    source_name: String,
    timestamp: DateTime<Utc>,
    data: BTreeMap<String, String>,
    requests: Vec<Request>,
}

impl Changes {
    pub fn new(
        context: &ExecutionContext,
        source_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        requests: Vec<Request>,
    ) -> Self {
        Changes {
            sequence: 0,
            process_id: context.process_id().to_string(),
            user: context.user().to_string(),
            source_name: source_name.into(),
            timestamp,
            data: context.data().clone(),
            requests,
        }
    }

    /// Copy of this batch stamped with a bus sequence number
    pub fn sequenced(&self, sequence: u64) -> Self {
        let mut stamped = self.clone();
        stamped.sequence = sequence;
        stamped
    }

    /// Bus sequence number; zero until published through a bus
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Ordered, time-bounded collection of change batches
#[derive(Debug, Clone)]
pub struct ChangeTimeline {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    changes: Vec<Changes>,
}

impl ChangeTimeline {
    /// Keep the batches stamped within `[start, end]`, ordered by timestamp
    /// and then sequence
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        changes: impl IntoIterator<Item = Changes>,
    ) -> Self {
        let mut changes: Vec<Changes> = changes
            .into_iter()
            .filter(|c| c.timestamp() >= start && c.timestamp() <= end)
            .collect();
        changes.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then(a.sequence().cmp(&b.sequence()))
        });
        ChangeTimeline {
            start,
            end,
            changes,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn changes(&self) -> &[Changes] {
        &self.changes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Changes> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Total number of change requests across all batches
    pub fn request_count(&self) -> usize {
        self.changes.iter().map(Changes::len).sum()
    }
}

/// Observer retaining recent batches for timeline queries
///
/// Batches older than `retention` (measured from the newest batch) are pruned
/// on every notification, as is anything beyond `max_batches`.
pub struct ChangeHistory {
    retention: Duration,
    max_batches: usize,
    batches: Mutex<VecDeque<Changes>>,
}

impl ChangeHistory {
    pub fn new(retention: Duration, max_batches: usize) -> Self {
        ChangeHistory {
            retention,
            max_batches: max_batches.max(1),
            batches: Mutex::new(VecDeque::new()),
        }
    }

    pub fn timeline(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ChangeTimeline {
        let batches = self.batches.lock();
        ChangeTimeline::new(start, end, batches.iter().cloned())
    }

    pub fn timeline_since(&self, start: DateTime<Utc>) -> ChangeTimeline {
        self.timeline(start, DateTime::<Utc>::MAX_UTC)
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }

    pub fn clear(&self) {
        self.batches.lock().clear();
    }
}

impl Observer for ChangeHistory {
    fn notify(&self, changes: &Changes) {
        let mut batches = self.batches.lock();
        batches.push_back(changes.clone());

        let newest = batches
            .iter()
            .map(Changes::timestamp)
            .max()
            .unwrap_or_else(|| changes.timestamp());
        let cutoff = newest.checked_sub_signed(self.retention);
        if let Some(cutoff) = cutoff {
            batches.retain(|c| c.timestamp() >= cutoff);
        }
        while batches.len() > self.max_batches {
            batches.pop_front();
        }
    }
}
