//! Silence evaluation and silence window promotion

use regex::Regex;
use tracing::{trace, warn};

use crate::models::{AlertEvent, FaultCenter, LabelMatcher, MatchOperator, SilenceRule, SilenceStatus};

/// Decides whether an event is suppressed
///
/// An event is muted when it is a recovery and the fault center does not
/// notify recoveries, or when at least one active silence matches it. The
/// stored event status is never touched.
pub struct SilenceEvaluator;

impl SilenceEvaluator {
    pub fn is_muted(event: &AlertEvent, center: &FaultCenter, silences: &[SilenceRule]) -> bool {
        if event.is_recovered && !center.recover_notify {
            trace!(fingerprint = %event.fingerprint, "recovery notifications disabled");
            return true;
        }

        silences
            .iter()
            .filter(|rule| rule.status == SilenceStatus::Active)
            .any(|rule| {
                let matched = Self::rule_matches(rule, event);
                if matched {
                    trace!(fingerprint = %event.fingerprint, silence = %rule.id, "event muted");
                }
                matched
            })
    }

    /// All matchers of a rule must pass
    ///
    /// A missing label fails the rule. A label that is not a string is never
    /// compared, so its matcher is skipped.
    fn rule_matches(rule: &SilenceRule, event: &AlertEvent) -> bool {
        rule.labels.iter().all(|matcher| {
            let Some(value) = event.labels.get(&matcher.key) else {
                return false;
            };

            match value.as_text() {
                Some(text) => Self::matcher_passes(matcher, text),
                None => true,
            }
        })
    }

    fn matcher_passes(matcher: &LabelMatcher, value: &str) -> bool {
        let regex = match Regex::new(&matcher.value) {
            Ok(regex) => regex,
            Err(e) => {
                warn!("invalid silence pattern '{}': {}", matcher.value, e);
                return false;
            }
        };

        match matcher.operator {
            MatchOperator::Equal => regex.is_match(value),
            MatchOperator::NotEqual => !regex.is_match(value),
        }
    }
}

/// Promote silence windows to their status at `now`
///
/// Returns only the rules whose status changed; those must be persisted and
/// republished by the caller.
pub fn promote_silences(silences: &mut [SilenceRule], now: i64) -> Vec<SilenceRule> {
    let mut changed = Vec::new();

    for rule in silences.iter_mut() {
        let status = rule.status_at(now);
        if status != rule.status {
            trace!(silence = %rule.id, from = ?rule.status, to = ?status, "silence promoted");
            rule.status = status;
            changed.push(rule.clone());
        }
    }

    changed
}
