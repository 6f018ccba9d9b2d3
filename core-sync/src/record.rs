//! # Sync Records
//!
//! Normalized, mergeable representation of all pending local changes for one
//! remote item, plus the stable equivalence grouping that collapses many
//! records into few remote calls.
//!
//! ## Invariants
//!
//! - `mark_read` and `mark_unread` are mutually exclusive; the later write
//!   wins
//! - `star` and `unstar` are mutually exclusive; the later write wins
//! - a label never appears in both the added and the removed set; adding a
//!   label cancels a pending removal of the same label and vice versa
//!
//! All mutation goes through the setters below so the invariants hold at
//! every instant. Merging is associative and idempotent, which is what makes
//! replays of the same change stream harmless.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use bridge_traits::{ItemChange, ItemId, StreamId};

/// Identity of a sync record: the item and the stream containing it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncKey {
    pub item: ItemId,
    pub stream: StreamId,
}

/// Pending local changes for one remote item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub key: SyncKey,
    mark_read: bool,
    mark_unread: bool,
    star: bool,
    unstar: bool,
    labels_added: BTreeSet<String>,
    labels_removed: BTreeSet<String>,
}

impl SyncRecord {
    pub fn new(key: SyncKey) -> Self {
        Self {
            key,
            mark_read: false,
            mark_unread: false,
            star: false,
            unstar: false,
            labels_added: BTreeSet::new(),
            labels_removed: BTreeSet::new(),
        }
    }

    /// Derive a record from one store change notification.
    ///
    /// Returns `None` for events on items that are not externally
    /// synchronized and for transitions that require no remote operation.
    ///
    /// A transition into the deleted/hidden state is translated as
    /// mark-read (plus unstar when the item was starred) rather than a
    /// distinct delete operation; deleted items are synced as read, not
    /// removed remotely.
    pub fn from_change(change: &ItemChange) -> Option<Self> {
        if !change.synced {
            return None;
        }

        let mut record = Self::new(SyncKey {
            item: change.item.clone(),
            stream: change.stream.clone(),
        });

        let old = &change.old;
        let new = &change.new;

        if new.hidden && !old.hidden {
            record.set_read();
            if old.starred {
                record.set_unstar();
            }
        } else {
            if new.read != old.read {
                if new.read {
                    record.set_read();
                } else {
                    record.set_unread();
                }
            }
            if new.starred != old.starred {
                if new.starred {
                    record.set_star();
                } else {
                    record.set_unstar();
                }
            }
            for label in new.labels.difference(&old.labels) {
                record.add_label(label.clone());
            }
            for label in old.labels.difference(&new.labels) {
                record.remove_label(label.clone());
            }
        }

        if record.is_empty() {
            None
        } else {
            Some(record)
        }
    }

    pub fn set_read(&mut self) {
        self.mark_read = true;
        self.mark_unread = false;
    }

    pub fn set_unread(&mut self) {
        self.mark_unread = true;
        self.mark_read = false;
    }

    pub fn set_star(&mut self) {
        self.star = true;
        self.unstar = false;
    }

    pub fn set_unstar(&mut self) {
        self.unstar = true;
        self.star = false;
    }

    pub fn add_label(&mut self, label: String) {
        self.labels_removed.remove(&label);
        self.labels_added.insert(label);
    }

    pub fn remove_label(&mut self, label: String) {
        self.labels_added.remove(&label);
        self.labels_removed.insert(label);
    }

    /// Merge a later record for the same key into this one in place
    pub fn merge(&mut self, later: &SyncRecord) {
        debug_assert_eq!(self.key, later.key);

        if later.mark_read {
            self.set_read();
        }
        if later.mark_unread {
            self.set_unread();
        }
        if later.star {
            self.set_star();
        }
        if later.unstar {
            self.set_unstar();
        }
        for label in &later.labels_added {
            self.add_label(label.clone());
        }
        for label in &later.labels_removed {
            self.remove_label(label.clone());
        }
    }

    /// Whether the record carries no remote operation at all
    pub fn is_empty(&self) -> bool {
        !self.mark_read
            && !self.mark_unread
            && !self.star
            && !self.unstar
            && self.labels_added.is_empty()
            && self.labels_removed.is_empty()
    }

    pub fn mark_read(&self) -> bool {
        self.mark_read
    }

    pub fn mark_unread(&self) -> bool {
        self.mark_unread
    }

    pub fn star(&self) -> bool {
        self.star
    }

    pub fn unstar(&self) -> bool {
        self.unstar
    }

    pub fn labels_added(&self) -> &BTreeSet<String> {
        &self.labels_added
    }

    pub fn labels_removed(&self) -> &BTreeSet<String> {
        &self.labels_removed
    }

    /// The record's structural shape: its flag and label deltas without its
    /// identity. Records with equal shapes can ride the same remote call.
    pub fn shape(&self) -> GroupShape {
        GroupShape {
            mark_read: self.mark_read,
            mark_unread: self.mark_unread,
            star: self.star,
            unstar: self.unstar,
            labels_added: self.labels_added.clone(),
            labels_removed: self.labels_removed.clone(),
        }
    }
}

/// Pure grouping key derived from a record's flag and label deltas
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupShape {
    pub mark_read: bool,
    pub mark_unread: bool,
    pub star: bool,
    pub unstar: bool,
    pub labels_added: BTreeSet<String>,
    pub labels_removed: BTreeSet<String>,
}

/// Records sharing one stream and one shape, deliverable in a single remote
/// call
#[derive(Debug, Clone)]
pub struct EquivalenceGroup {
    pub stream: StreamId,
    pub shape: GroupShape,
    pub records: Vec<SyncRecord>,
}

/// Partition records by stream, then by structural shape.
///
/// The partition is stable: group order follows the first occurrence of
/// each (stream, shape) pair in the input, and records keep their input
/// order within a group, so output is deterministic.
pub fn group_records(records: &[SyncRecord]) -> Vec<EquivalenceGroup> {
    let mut groups: Vec<EquivalenceGroup> = Vec::new();
    let mut index: HashMap<(StreamId, GroupShape), usize> = HashMap::new();

    for record in records {
        let key = (record.key.stream.clone(), record.shape());
        match index.get(&key) {
            Some(&position) => groups[position].records.push(record.clone()),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(EquivalenceGroup {
                    stream: key.0,
                    shape: key.1,
                    records: vec![record.clone()],
                });
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ItemStateSnapshot;

    fn key(item: &str, stream: &str) -> SyncKey {
        SyncKey {
            item: ItemId::new(item),
            stream: StreamId::new(stream),
        }
    }

    fn change(
        item: &str,
        synced: bool,
        old: ItemStateSnapshot,
        new: ItemStateSnapshot,
    ) -> ItemChange {
        ItemChange {
            item: ItemId::new(item),
            stream: StreamId::new("stream-1"),
            synced,
            old,
            new,
        }
    }

    fn snapshot(read: bool, starred: bool, hidden: bool, labels: &[&str]) -> ItemStateSnapshot {
        ItemStateSnapshot {
            read,
            starred,
            hidden,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_read_unread_mutually_exclusive() {
        let mut record = SyncRecord::new(key("1", "s"));
        record.set_read();
        record.set_unread();
        assert!(!record.mark_read());
        assert!(record.mark_unread());

        record.set_read();
        assert!(record.mark_read());
        assert!(!record.mark_unread());
    }

    #[test]
    fn test_label_add_cancels_pending_removal() {
        let mut record = SyncRecord::new(key("1", "s"));
        record.remove_label("work".to_string());
        record.add_label("work".to_string());
        assert!(record.labels_removed().is_empty());
        assert!(record.labels_added().contains("work"));

        record.remove_label("work".to_string());
        assert!(record.labels_added().is_empty());
        assert!(record.labels_removed().contains("work"));
    }

    #[test]
    fn test_merge_later_write_wins() {
        // Merging [mark-read, mark-unread] equals applying mark-unread alone
        let mut read_then_unread = SyncRecord::new(key("1", "s"));
        read_then_unread.set_read();
        let mut unread = SyncRecord::new(key("1", "s"));
        unread.set_unread();
        read_then_unread.merge(&unread);

        let mut unread_alone = SyncRecord::new(key("1", "s"));
        unread_alone.set_unread();
        assert_eq!(read_then_unread, unread_alone);
    }

    #[test]
    fn test_merge_label_add_then_remove_leaves_neither() {
        let mut first = SyncRecord::new(key("1", "s"));
        first.add_label("work".to_string());
        let mut second = SyncRecord::new(key("1", "s"));
        second.remove_label("work".to_string());

        first.merge(&second);
        assert!(!first.labels_added().contains("work"));
        assert!(first.labels_removed().contains("work"));

        // And the symmetric case cancels fully back to an add
        let mut third = SyncRecord::new(key("1", "s"));
        third.add_label("work".to_string());
        first.merge(&third);
        assert!(first.labels_added().contains("work"));
        assert!(!first.labels_removed().contains("work"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut record = SyncRecord::new(key("1", "s"));
        record.set_read();
        record.set_star();
        record.add_label("work".to_string());

        let mut once = record.clone();
        once.merge(&record);
        assert_eq!(once, record);

        once.merge(&record);
        assert_eq!(once, record);
    }

    #[test]
    fn test_from_change_ignores_unsynced_items() {
        let c = change(
            "1",
            false,
            snapshot(false, false, false, &[]),
            snapshot(true, false, false, &[]),
        );
        assert!(SyncRecord::from_change(&c).is_none());
    }

    #[test]
    fn test_from_change_read_transition() {
        let c = change(
            "1",
            true,
            snapshot(false, false, false, &[]),
            snapshot(true, false, false, &[]),
        );
        let record = SyncRecord::from_change(&c).unwrap();
        assert!(record.mark_read());
        assert!(!record.mark_unread());
    }

    #[test]
    fn test_from_change_label_deltas() {
        let c = change(
            "1",
            true,
            snapshot(true, false, false, &["old", "keep"]),
            snapshot(true, false, false, &["keep", "new"]),
        );
        let record = SyncRecord::from_change(&c).unwrap();
        assert!(record.labels_added().contains("new"));
        assert!(record.labels_removed().contains("old"));
        assert!(!record.labels_added().contains("keep"));
        assert!(!record.labels_removed().contains("keep"));
    }

    #[test]
    fn test_from_change_deletion_syncs_as_read() {
        // A starred, unread item transitioning into the hidden state
        let c = change(
            "1",
            true,
            snapshot(false, true, false, &[]),
            snapshot(false, true, true, &[]),
        );
        let record = SyncRecord::from_change(&c).unwrap();
        assert!(record.mark_read());
        assert!(record.unstar());
        assert!(!record.star());
    }

    #[test]
    fn test_from_change_no_op_transition_yields_nothing() {
        let c = change(
            "1",
            true,
            snapshot(true, false, false, &["a"]),
            snapshot(true, false, false, &["a"]),
        );
        assert!(SyncRecord::from_change(&c).is_none());
    }

    #[test]
    fn test_grouping_is_stable_and_shape_based() {
        let mut read_1 = SyncRecord::new(key("1", "s"));
        read_1.set_read();
        let mut star_3 = SyncRecord::new(key("3", "s"));
        star_3.set_star();
        let mut read_2 = SyncRecord::new(key("2", "s"));
        read_2.set_read();

        let groups = group_records(&[read_1, star_3, read_2]);

        assert_eq!(groups.len(), 2);
        // First-occurrence order: the read group appeared first
        assert!(groups[0].shape.mark_read);
        assert_eq!(groups[0].records.len(), 2);
        assert_eq!(groups[0].records[0].key.item.as_str(), "1");
        assert_eq!(groups[0].records[1].key.item.as_str(), "2");
        assert!(groups[1].shape.star);
        assert_eq!(groups[1].records.len(), 1);
    }

    #[test]
    fn test_grouping_separates_streams() {
        let mut a = SyncRecord::new(key("1", "stream-a"));
        a.set_read();
        let mut b = SyncRecord::new(key("2", "stream-b"));
        b.set_read();

        let groups = group_records(&[a, b]);
        assert_eq!(groups.len(), 2);
    }
}
