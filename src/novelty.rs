//! New and rare conversation detection.
//!
//! Compares per-flow record counts between a baseline sample and an event
//! sample. A flow is *new* when the baseline never saw it; it is *rare*
//! when the baseline saw it no more than `rare_threshold` times and the
//! event sample grew past the baseline count. A flow seen often at
//! baseline can never be flagged rare, regardless of event growth.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::model::{FlowKey, TrafficSample};

/// One flagged conversation with the counts behind the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub src_addr: String,
    pub dst_addr: String,
    pub protocol: String,
    pub baseline_count: u64,
    pub event_count: u64,
    pub is_new: bool,
    pub is_rare: bool,
}

/// Counts records per flow key, remembering first-seen order so the outer
/// join below is deterministic.
fn conversation_counts(sample: &TrafficSample) -> (Vec<FlowKey>, HashMap<FlowKey, u64>) {
    let mut order = Vec::new();
    let mut counts: HashMap<FlowKey, u64> = HashMap::new();
    for record in sample.records() {
        let key = record.flow_key();
        match counts.get_mut(&key) {
            Some(count) => *count += 1,
            None => {
                counts.insert(key.clone(), 1);
                order.push(key);
            }
        }
    }
    (order, counts)
}

/// Outer-joins baseline and event conversation counts and returns the
/// flagged flows, sorted descending by event count (stable over join
/// order, baseline-side keys first).
pub fn detect_new_or_rare_conversations(
    baseline: &TrafficSample,
    event: &TrafficSample,
    rare_threshold: u64,
) -> Result<Vec<ConversationRow>, ConfigError> {
    if rare_threshold == 0 {
        return Err(ConfigError::NonPositiveThreshold {
            name: "rare_threshold",
            value: 0.0,
        });
    }

    let (baseline_order, baseline_counts) = conversation_counts(baseline);
    let (event_order, event_counts) = conversation_counts(event);

    // Outer join: baseline keys in first-seen order, then event-only keys.
    let mut rows = Vec::new();
    let joined = baseline_order.iter().chain(
        event_order
            .iter()
            .filter(|key| !baseline_counts.contains_key(key)),
    );

    for key in joined {
        let baseline_count = baseline_counts.get(key).copied().unwrap_or(0);
        let event_count = event_counts.get(key).copied().unwrap_or(0);

        let is_new = baseline_count == 0 && event_count > 0;
        let is_rare = baseline_count > 0
            && baseline_count <= rare_threshold
            && event_count > baseline_count;

        if is_new || is_rare {
            rows.push(ConversationRow {
                src_addr: key.src_addr.clone(),
                dst_addr: key.dst_addr.clone(),
                protocol: key.protocol.clone(),
                baseline_count,
                event_count,
                is_new,
                is_rare,
            });
        }
    }

    // sort_by_key is stable: ties keep join order.
    rows.sort_by_key(|r| Reverse(r.event_count));

    debug!(
        "Conversation novelty: {} flagged ({} new, {} rare)",
        rows.len(),
        rows.iter().filter(|r| r.is_new).count(),
        rows.iter().filter(|r| r.is_rare).count()
    );

    Ok(rows)
}
