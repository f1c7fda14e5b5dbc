use std::{
    collections::HashMap,
    sync::Arc,
};
use parking_lot::Mutex;

use core_types::DataType;

use crate::types::{Convention, Rejection};
use crate::OpDescriptor;

/// Signature of a static match: identity, convention and element types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StaticKey {
    pub identity:   String,
    pub convention: Convention,
    pub inputs:     Vec<DataType>,
    pub output:     Option<DataType>,
    pub params:     Vec<DataType>,
}

/// Outcome of the static filter, in candidate order
#[derive(Debug, Default)]
pub(crate) struct StaticMatch {
    pub survivors: Vec<Arc<OpDescriptor>>,
    pub rejected:  Vec<Rejection>,
}

/// Thread-safe cache of static matches. The registry is sealed before the
/// cache is used, so entries never go stale.
#[derive(Debug, Default)]
pub(crate) struct MatchCache {
    cache: Mutex<HashMap<StaticKey, Arc<StaticMatch>>>,
}

impl MatchCache {
    pub fn get_or_insert_with(&self, key: StaticKey, filter: impl FnOnce(&StaticKey) -> StaticMatch) -> Arc<StaticMatch> {
        // cache lookup
        if let Some(hit) = self.cache.lock().get(&key) {
            return hit.clone();
        }

        // filter without holding the lock; a racing thread computes the same value
        let matched = Arc::new(filter(&key));
        self.cache.lock().entry(key).or_insert(matched).clone()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }
}
