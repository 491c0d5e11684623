//! Table of local subscriptions: which hosted services listen to which
//! `(publisher, table)` pairs.
//!
//! Empty inner sets and empty publisher entries are pruned eagerly so
//! enumeration stays O(active subscriptions) rather than O(all ever seen).
//! Mutation relies on the node's single-execution-context assumption and is
//! not guarded beyond the interior lock; this is a documented constraint,
//! not a cross-caller guarantee.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

/// Mapping `publisher_id -> table_name -> set of local subscriber ids`.
#[derive(Default)]
pub struct SubscriptionTable {
    inner: RwLock<HashMap<String, HashMap<String, BTreeSet<String>>>>,
}

impl SubscriptionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription. Idempotent: re-subscribing an existing triple
    /// changes nothing.
    pub fn subscribe(&self, subscriber: &str, publisher: &str, table: &str) {
        self.inner
            .write()
            .entry(publisher.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default()
            .insert(subscriber.to_string());
    }

    /// Removes a subscription, pruning now-empty table and publisher
    /// entries. Returns whether anything was actually removed.
    pub fn unsubscribe(&self, subscriber: &str, publisher: &str, table: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(tables) = inner.get_mut(publisher) else {
            return false;
        };
        let Some(subscribers) = tables.get_mut(table) else {
            return false;
        };
        let removed = subscribers.remove(subscriber);
        if subscribers.is_empty() {
            tables.remove(table);
        }
        if tables.is_empty() {
            inner.remove(publisher);
        }
        removed
    }

    /// Local subscriber ids for `(publisher, table)`.
    #[must_use]
    pub fn subscribers(&self, publisher: &str, table: &str) -> Vec<String> {
        self.inner
            .read()
            .get(publisher)
            .and_then(|tables| tables.get(table))
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Tables of `publisher` that have at least one local subscriber.
    #[must_use]
    pub fn tables_for(&self, publisher: &str) -> BTreeSet<String> {
        self.inner
            .read()
            .get(publisher)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Everything `subscriber` listens to: `publisher -> set of tables`.
    #[must_use]
    pub fn subscriptions_of(&self, subscriber: &str) -> HashMap<String, BTreeSet<String>> {
        let inner = self.inner.read();
        let mut result: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (publisher, tables) in inner.iter() {
            for (table, subscribers) in tables {
                if subscribers.contains(subscriber) {
                    result
                        .entry(publisher.clone())
                        .or_default()
                        .insert(table.clone());
                }
            }
        }
        result
    }

    /// True when no subscriptions exist at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Invariant check used by tests: no publisher maps to an empty table
    /// set, and no table maps to an empty subscriber set.
    #[must_use]
    pub fn is_pruned(&self) -> bool {
        let inner = self.inner.read();
        inner.values().all(|tables| {
            !tables.is_empty() && tables.values().all(|subscribers| !subscribers.is_empty())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn subscribe_then_unsubscribe_restores_empty_table() {
        let table = SubscriptionTable::new();
        table.subscribe("sub1", "nova", "servers");
        assert!(!table.is_empty());

        assert!(table.unsubscribe("sub1", "nova", "servers"));
        assert!(table.is_empty());
    }

    #[test]
    fn subscribe_is_idempotent() {
        let table = SubscriptionTable::new();
        table.subscribe("sub1", "nova", "servers");
        table.subscribe("sub1", "nova", "servers");
        assert_eq!(table.subscribers("nova", "servers"), vec!["sub1"]);
    }

    #[test]
    fn unsubscribe_of_absent_triple_returns_false() {
        let table = SubscriptionTable::new();
        assert!(!table.unsubscribe("sub1", "nova", "servers"));

        table.subscribe("sub1", "nova", "servers");
        assert!(!table.unsubscribe("sub2", "nova", "servers"));
        assert!(!table.unsubscribe("sub1", "nova", "flavors"));
        assert!(!table.unsubscribe("sub1", "cinder", "servers"));
    }

    #[test]
    fn partial_unsubscribe_keeps_other_subscribers() {
        let table = SubscriptionTable::new();
        table.subscribe("sub1", "nova", "servers");
        table.subscribe("sub2", "nova", "servers");

        assert!(table.unsubscribe("sub1", "nova", "servers"));
        assert_eq!(table.subscribers("nova", "servers"), vec!["sub2"]);
        assert!(table.is_pruned());
    }

    #[test]
    fn tables_for_lists_only_subscribed_tables() {
        let table = SubscriptionTable::new();
        table.subscribe("sub1", "nova", "servers");
        table.subscribe("sub2", "nova", "flavors");

        let tables = table.tables_for("nova");
        assert_eq!(
            tables,
            BTreeSet::from(["flavors".to_string(), "servers".to_string()])
        );
        assert!(table.tables_for("cinder").is_empty());
    }

    #[test]
    fn subscriptions_of_inverts_the_mapping() {
        let table = SubscriptionTable::new();
        table.subscribe("sub1", "nova", "servers");
        table.subscribe("sub1", "nova", "flavors");
        table.subscribe("sub1", "cinder", "volumes");
        table.subscribe("sub2", "nova", "servers");

        let subs = table.subscriptions_of("sub1");
        assert_eq!(subs.len(), 2);
        assert_eq!(
            subs["nova"],
            BTreeSet::from(["flavors".to_string(), "servers".to_string()])
        );
        assert_eq!(subs["cinder"], BTreeSet::from(["volumes".to_string()]));
    }

    proptest! {
        /// Arbitrary subscribe/unsubscribe sequences never leave an empty
        /// table set or subscriber set behind.
        #[test]
        fn pruning_invariant_holds_for_arbitrary_sequences(
            ops in prop::collection::vec(
                (any::<bool>(), 0..4usize, 0..4usize, 0..4usize),
                0..64,
            )
        ) {
            let subscribers = ["s0", "s1", "s2", "s3"];
            let publishers = ["p0", "p1", "p2", "p3"];
            let tables = ["t0", "t1", "t2", "t3"];

            let table = SubscriptionTable::new();
            for (is_subscribe, s, p, t) in ops {
                if is_subscribe {
                    table.subscribe(subscribers[s], publishers[p], tables[t]);
                } else {
                    table.unsubscribe(subscribers[s], publishers[p], tables[t]);
                }
                prop_assert!(table.is_pruned());
            }
        }
    }
}
