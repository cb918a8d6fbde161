//! # Value Store
//!
//! Tracks the named bindings produced by executed code for the lifetime of a
//! kernel session. Every binding carries the [`BindingOrigin`] the pipeline
//! assigned when it was written, so bindings created by profile/bootstrap code
//! can be kept out of user-facing listings while remaining retrievable by name.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum BindingOrigin {
    User,
    Profile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueBinding {
    pub name: String,
    pub value: Value,
    pub origin: BindingOrigin,
}

/// A `{name, value}` pair as reported by `ValueInfosProduced`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name: String,
    pub value: Value,
}

impl ValueInfo {
    pub fn type_name(&self) -> &'static str {
        self.value.type_name()
    }
}

#[derive(Debug)]
struct StoredBinding {
    value: Value,
    origin: BindingOrigin,
    // position of the first definition, kept across overwrites
    sequence: u64,
}

#[derive(Debug, Default)]
pub struct ValueStore {
    bindings: DashMap<String, StoredBinding>,
    next_sequence: AtomicU64,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name`, overwriting any previous binding. The origin always
    /// reflects the most recent writer.
    pub fn set(&self, name: &str, value: Value, origin: BindingOrigin) {
        trace!("set {} ({})", name, origin);
        match self.bindings.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.value = value;
                existing.origin = origin;
            }
            Entry::Vacant(entry) => {
                let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
                entry.insert(StoredBinding {
                    value,
                    origin,
                    sequence,
                });
            }
        }
    }

    pub fn try_get(&self, name: &str) -> StoreResult<Value> {
        self.bindings
            .get(name)
            .map(|binding| binding.value.clone())
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn binding(&self, name: &str) -> Option<ValueBinding> {
        self.bindings.get(name).map(|binding| ValueBinding {
            name: name.to_string(),
            value: binding.value.clone(),
            origin: binding.origin,
        })
    }

    /// User-originated bindings in order of first definition.
    pub fn list_user_defined(&self) -> Vec<ValueInfo> {
        let mut entries: Vec<(u64, ValueInfo)> = self
            .bindings
            .iter()
            .filter(|entry| entry.origin == BindingOrigin::User)
            .map(|entry| {
                (
                    entry.sequence,
                    ValueInfo {
                        name: entry.key().clone(),
                        value: entry.value.clone(),
                    },
                )
            })
            .collect();
        entries.sort_by_key(|(sequence, _)| *sequence);
        entries.into_iter().map(|(_, info)| info).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&self) {
        self.bindings.clear();
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Value not found: {name}")]
    NotFound { name: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
