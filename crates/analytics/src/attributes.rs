//! Latest-known attribute set per user, last-write-wins.

use dashmap::DashMap;
use insight_core::{AttributePredicate, UserAttributes};
use std::sync::Arc;

/// Directory of user attribute snapshots.
///
/// Each slot holds an immutable `Arc<UserAttributes>`; a write swaps the whole
/// `Arc`, so a reader sees either the previous set or the new one, never a mix.
pub struct UserAttributeDirectory {
    users: DashMap<String, Arc<UserAttributes>>,
}

impl UserAttributeDirectory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Replace the user's attributes wholesale. No field-level merge.
    pub fn set_attributes(&self, user_id: &str, attributes: UserAttributes) {
        self.users.insert(user_id.to_string(), Arc::new(attributes));
    }

    pub fn get_attributes(&self, user_id: &str) -> Option<UserAttributes> {
        self.users.get(user_id).map(|a| a.value().as_ref().clone())
    }

    /// True when every predicate key is present on the user with an equal value.
    /// Users without attributes never match a non-empty predicate.
    pub fn matches(&self, user_id: &str, predicate: &AttributePredicate) -> bool {
        if predicate.is_empty() {
            return true;
        }
        let Some(attributes) = self.users.get(user_id).map(|a| a.value().clone()) else {
            return false;
        };
        predicate
            .iter()
            .all(|(key, expected)| attributes.get(key) == Some(expected))
    }

    /// Every user's attribute set, each read atomically. Sorted by user id.
    pub fn snapshot(&self) -> Vec<(String, Arc<UserAttributes>)> {
        let mut users: Vec<(String, Arc<UserAttributes>)> = self
            .users
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        users.sort_by(|a, b| a.0.cmp(&b.0));
        users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Default for UserAttributeDirectory {
    fn default() -> Self {
        Self::new()
    }
}
