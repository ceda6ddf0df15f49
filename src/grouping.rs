//! Two-level event grouping and per-bucket aggregation
//!
//! Level 1 splits events by status and rule (`Firing_{rule}` /
//! `Recover_{rule}`), level 2 by the notice object the event routes to.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{trace, warn};

use crate::models::{AggregationType, AlertEvent, FaultCenter};

/// Marker appended by the aggregator; an annotation carrying it is never
/// annotated twice
pub const COLLAPSED_MARKER: &str = "[collapsed ";

/// Events of one rule bound for one notice object, ordered by fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct EventGroup {
    pub rule_key: String,
    pub notice_id: String,
    pub events: Vec<AlertEvent>,
}

#[derive(Debug, Default)]
pub struct Grouping {
    /// Sorted by `(rule_key, notice_id)`, events of a group by fingerprint
    pub groups: Vec<EventGroup>,

    /// Events no route or default notice applies to; never notified
    pub unrouted: Vec<AlertEvent>,
}

pub struct EventGrouper;

impl EventGrouper {
    pub fn rule_key(event: &AlertEvent) -> String {
        if event.is_recovered {
            format!("Recover_{}", event.rule_id)
        } else {
            format!("Firing_{}", event.rule_id)
        }
    }

    /// Notice ids an event is delivered to
    ///
    /// The first notice route whose label matches wins. Without a match the
    /// fault center defaults apply, which may be empty.
    pub fn resolve_notice_ids<'a>(center: &'a FaultCenter, event: &AlertEvent) -> &'a [String] {
        for route in &center.notice_routes {
            let Some(value) = event.label_text(&route.key) else {
                continue;
            };

            match Regex::new(&route.value) {
                Ok(regex) if regex.is_match(value) => return &route.notice_ids,
                Ok(_) => {}
                Err(e) => warn!("invalid notice route pattern '{}': {}", route.value, e),
            }
        }

        &center.notice_ids
    }

    pub fn group(center: &FaultCenter, events: Vec<AlertEvent>) -> Grouping {
        let mut buckets: BTreeMap<(String, String), Vec<AlertEvent>> = BTreeMap::new();
        let mut unrouted = Vec::new();

        for event in events {
            let notice_ids = Self::resolve_notice_ids(center, &event);
            if notice_ids.is_empty() {
                trace!(fingerprint = %event.fingerprint, "no notice object for event");
                unrouted.push(event);
                continue;
            }

            let rule_key = Self::rule_key(&event);
            for notice_id in notice_ids {
                buckets
                    .entry((rule_key.clone(), notice_id.clone()))
                    .or_default()
                    .push(event.clone());
            }
        }

        let groups = buckets
            .into_iter()
            .map(|((rule_key, notice_id), mut events)| {
                events.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
                EventGroup {
                    rule_key,
                    notice_id,
                    events,
                }
            })
            .collect();

        Grouping { groups, unrouted }
    }
}

/// Result of aggregating one severity bucket
#[derive(Debug, Default, PartialEq)]
pub struct Aggregation {
    /// Events handed to the senders
    pub outgoing: Vec<AlertEvent>,

    /// Events whose `last_send_time` was refreshed and must be written back
    pub refreshed: Vec<AlertEvent>,
}

pub struct Aggregator;

impl Aggregator {
    /// Collapse a severity bucket under rule aggregation
    ///
    /// Callers remove muted events first, so the collapsed count only covers
    /// notified events.
    pub fn aggregate(kind: AggregationType, events: Vec<AlertEvent>, now: i64) -> Aggregation {
        if kind != AggregationType::Rule || events.len() <= 1 {
            return Aggregation {
                outgoing: events,
                refreshed: Vec::new(),
            };
        }

        let count = events.len();
        let refreshed: Vec<AlertEvent> = events
            .into_iter()
            .map(|mut event| {
                event.last_send_time = now;
                event
            })
            .collect();

        let mut representative = refreshed[0].clone();
        if !representative.annotations.contains(COLLAPSED_MARKER) {
            representative
                .annotations
                .push_str(&format!("\n{COLLAPSED_MARKER}{count} alerts]"));
        }

        Aggregation {
            outgoing: vec![representative],
            refreshed,
        }
    }
}
