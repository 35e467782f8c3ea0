//! Handler registry and subscription table.
//!
//! Both structures are shared between the bus facade and its channel
//! listeners, which run on a multi-threaded runtime. The registry is a
//! `DashMap`; the subscription table sits behind a mutex so that
//! "first subscriber" and "last subscriber" transitions are observed
//! atomically.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;

use super::handler::SharedHandler;

/// Mapping from handler id to handler. Independent of any channel.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, SharedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the previous binding, if any.
    pub fn insert(&self, handler: SharedHandler) -> Option<SharedHandler> {
        let id = handler.handler_id().to_string();
        self.handlers.insert(id, handler)
    }

    pub fn remove(&self, handler_id: &str) -> Option<SharedHandler> {
        self.handlers.remove(handler_id).map(|(_, h)| h)
    }

    pub fn get(&self, handler_id: &str) -> Option<SharedHandler> {
        self.handlers.get(handler_id).map(|h| h.value().clone())
    }

    pub fn contains(&self, handler_id: &str) -> bool {
        self.handlers.contains_key(handler_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }
}

/// Outcome of removing a handler from a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The handler was not subscribed to the channel.
    NotSubscribed,
    /// Removed; other handlers remain on the channel.
    Remaining(usize),
    /// Removed the last handler; the channel entry is gone.
    ChannelEmptied,
}

/// Channel name -> set of subscribed handler ids.
///
/// A channel entry exists only while its set is non-empty.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    channels: Mutex<HashMap<String, HashSet<String>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashSet<String>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `handler_id` to `channel`. Returns `false` if it was already there.
    pub fn add(&self, channel: &str, handler_id: &str) -> bool {
        self.lock()
            .entry(channel.to_string())
            .or_default()
            .insert(handler_id.to_string())
    }

    pub fn remove(&self, channel: &str, handler_id: &str) -> Removal {
        let mut channels = self.lock();
        let Some(set) = channels.get_mut(channel) else {
            return Removal::NotSubscribed;
        };
        if !set.remove(handler_id) {
            return Removal::NotSubscribed;
        }
        if set.is_empty() {
            channels.remove(channel);
            Removal::ChannelEmptied
        } else {
            Removal::Remaining(set.len())
        }
    }

    /// Handlers subscribed to `channel` right now.
    pub fn handlers_for(&self, channel: &str) -> Vec<String> {
        self.lock()
            .get(channel)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Channels `handler_id` is subscribed to.
    pub fn channels_of(&self, handler_id: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, set)| set.contains(handler_id))
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    pub fn is_subscribed(&self, channel: &str, handler_id: &str) -> bool {
        self.lock()
            .get(channel)
            .is_some_and(|set| set.contains(handler_id))
    }

    pub fn has_subscribers(&self, channel: &str) -> bool {
        self.lock().contains_key(channel)
    }

    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Total (channel, handler) pairs.
    pub fn subscription_count(&self) -> usize {
        self.lock().values().map(HashSet::len).sum()
    }

    /// Drop every subscription, returning the channels that were active.
    pub fn clear(&self) -> Vec<String> {
        self.lock().drain().map(|(channel, _)| channel).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::handler::{handler_fn, HandlerResult};
    use std::sync::Arc;

    fn noop(id: &str) -> SharedHandler {
        Arc::new(handler_fn(id.to_string(), |_| async { HandlerResult::Ok(None) }))
    }

    #[test]
    fn registry_insert_replaces_existing() {
        let reg = HandlerRegistry::new();
        assert!(reg.insert(noop("a")).is_none());
        assert!(reg.insert(noop("a")).is_some());
        assert_eq!(reg.len(), 1);
        assert!(reg.contains("a"));
        assert!(reg.remove("a").is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn table_tracks_first_and_last_subscriber() {
        let table = SubscriptionTable::new();
        assert!(!table.has_subscribers("c"));

        assert!(table.add("c", "h1"));
        assert!(!table.add("c", "h1"));
        assert!(table.add("c", "h2"));
        assert_eq!(table.subscription_count(), 2);

        assert_eq!(table.remove("c", "h1"), Removal::Remaining(1));
        assert_eq!(table.remove("c", "h1"), Removal::NotSubscribed);
        assert_eq!(table.remove("c", "h2"), Removal::ChannelEmptied);
        assert!(!table.has_subscribers("c"));
        assert!(table.channels().is_empty());
    }

    #[test]
    fn table_lists_channels_of_handler() {
        let table = SubscriptionTable::new();
        table.add("a", "h");
        table.add("b", "h");
        table.add("b", "other");

        let mut chans = table.channels_of("h");
        chans.sort();
        assert_eq!(chans, vec!["a".to_string(), "b".to_string()]);
        assert!(table.is_subscribed("b", "other"));

        let mut cleared = table.clear();
        cleared.sort();
        assert_eq!(cleared, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(table.subscription_count(), 0);
    }
}
