//! Per-rule, per-fingerprint store used to hold recoveries
//!
//! Rule entries are kept sorted by rule id and located by binary search; each
//! holds a map from fingerprint to the stored value.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug)]
struct RuleEntry<T> {
    rule_id: String,
    values: HashMap<String, T>,
}

#[derive(Debug)]
pub struct RecoveryWaitStore<T> {
    entries: RwLock<Vec<RuleEntry<T>>>,
}

impl<T> Default for RecoveryWaitStore<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Clone> RecoveryWaitStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, rule_id: &str, fingerprint: &str, value: T) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let index = match entries.binary_search_by(|entry| entry.rule_id.as_str().cmp(rule_id)) {
            Ok(index) => index,
            Err(index) => {
                entries.insert(
                    index,
                    RuleEntry {
                        rule_id: rule_id.to_string(),
                        values: HashMap::new(),
                    },
                );
                index
            }
        };
        entries[index].values.insert(fingerprint.to_string(), value);
    }

    pub fn get(&self, rule_id: &str, fingerprint: &str) -> Option<T> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let index = entries
            .binary_search_by(|entry| entry.rule_id.as_str().cmp(rule_id))
            .ok()?;
        entries[index].values.get(fingerprint).cloned()
    }

    /// Remove one fingerprint, dropping the rule entry once it is empty
    pub fn remove(&self, rule_id: &str, fingerprint: &str) -> Option<T> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let index = entries
            .binary_search_by(|entry| entry.rule_id.as_str().cmp(rule_id))
            .ok()?;
        let removed = entries[index].values.remove(fingerprint);
        if entries[index].values.is_empty() {
            entries.remove(index);
        }
        removed
    }

    /// Copy of every value held for a rule
    pub fn list(&self, rule_id: &str) -> HashMap<String, T> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .binary_search_by(|entry| entry.rule_id.as_str().cmp(rule_id))
            .map(|index| entries[index].values.clone())
            .unwrap_or_default()
    }

    pub fn rule_ids(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|entry| entry.rule_id.clone()).collect()
    }
}
