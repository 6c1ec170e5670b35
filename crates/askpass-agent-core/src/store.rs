//! Holding area for discovered, not yet served requests.
//!
//! The store deduplicates by request identity. It is not a priority queue:
//! the protocol gives no ordering across pending requests. Requests are
//! handed out first-discovered first.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use thiserror::Error;

/// Returned by [`RequestStore::take_one`] when nothing is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request store is empty")]
pub struct EmptyStoreError;

/// Deduplicating set of pending requests.
#[derive(Debug)]
pub struct RequestStore<F> {
    members: HashSet<F>,
    order: VecDeque<F>,
}

impl<F: Clone + Eq + Hash> RequestStore<F> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            members: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Insert a request. Returns `false` if it was already pending.
    pub fn add(&mut self, file: F) -> bool {
        if !self.members.insert(file.clone()) {
            return false;
        }
        self.order.push_back(file);
        true
    }

    /// Remove a request. Returns `false` if it was not pending.
    pub fn remove(&mut self, file: &F) -> bool {
        if !self.members.remove(file) {
            return false;
        }
        self.order.retain(|pending| pending != file);
        true
    }

    /// Remove and return one pending request.
    pub fn take_one(&mut self) -> Result<F, EmptyStoreError> {
        let file = self.order.pop_front().ok_or(EmptyStoreError)?;
        self.members.remove(&file);
        Ok(file)
    }

    /// Whether `file` is pending.
    pub fn contains(&self, file: &F) -> bool {
        self.members.contains(file)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}

impl<F: Clone + Eq + Hash> Default for RequestStore<F> {
    fn default() -> Self {
        Self::new()
    }
}
