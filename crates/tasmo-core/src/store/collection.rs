// ── Generic document collection ──
//
// Concurrent keyed storage with per-key atomic updates and push-based
// change notification via a `broadcast` channel.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;

use crate::stream::{ChangeStream, DocumentChange};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// A document that knows its own primary key.
pub(crate) trait Document: Clone + Send + Sync + 'static {
    fn key(&self) -> &str;
}

/// A concurrent collection for a single document type.
///
/// Every mutation runs under the key's `DashMap` shard lock, so
/// read-modify-write on one document is atomic. Change events are sent
/// after the lock is released.
pub(crate) struct DocumentCollection<T: Document> {
    by_key: DashMap<String, T>,
    changes: broadcast::Sender<DocumentChange<T>>,
}

impl<T: Document> DocumentCollection<T> {
    pub(crate) fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            by_key: DashMap::new(),
            changes,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<T> {
        self.by_key.get(key).map(|r| r.value().clone())
    }

    pub(crate) fn values(&self) -> Vec<T> {
        self.by_key.iter().map(|r| r.value().clone()).collect()
    }

    /// First document matching `predicate`.
    pub(crate) fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.by_key
            .iter()
            .find(|r| predicate(r.value()))
            .map(|r| r.value().clone())
    }

    /// Insert or wholesale-replace a document. Returns `true` if the key was new.
    pub(crate) fn replace(&self, document: T) -> bool {
        let is_new = self
            .by_key
            .insert(document.key().to_owned(), document.clone())
            .is_none();
        self.notify(if is_new {
            DocumentChange::Insert(document)
        } else {
            DocumentChange::Replace(document)
        });
        is_new
    }

    /// Insert unless the key exists. Returns `true` if inserted.
    pub(crate) fn insert_if_absent(&self, document: T) -> bool {
        let inserted = match self.by_key.entry(document.key().to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(document.clone());
                true
            }
        };
        if inserted {
            self.notify(DocumentChange::Insert(document));
        }
        inserted
    }

    /// Atomically mutate the document at `key`.
    ///
    /// When the key is missing, `seed` (if any) becomes the document before
    /// `mutate` runs; otherwise nothing happens and `None` is returned.
    pub(crate) fn update_with(
        &self,
        key: &str,
        seed: Option<T>,
        mutate: impl FnOnce(&mut T),
    ) -> Option<T> {
        let (document, created) = match self.by_key.entry(key.to_owned()) {
            Entry::Occupied(mut slot) => {
                mutate(slot.get_mut());
                (slot.get().clone(), false)
            }
            Entry::Vacant(slot) => {
                let mut document = seed?;
                mutate(&mut document);
                slot.insert(document.clone());
                (document, true)
            }
        };
        self.notify(if created {
            DocumentChange::Insert(document.clone())
        } else {
            DocumentChange::Update(document.clone())
        });
        Some(document)
    }

    /// Mutate every document matching `predicate`. The predicate is
    /// re-checked under each key's lock. Returns the number changed.
    pub(crate) fn update_where(
        &self,
        predicate: impl Fn(&T) -> bool,
        mutate: impl Fn(&mut T),
    ) -> u64 {
        let keys: Vec<String> = self
            .by_key
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| r.key().clone())
            .collect();

        let mut changed = 0;
        for key in keys {
            let updated = {
                let Some(mut document) = self.by_key.get_mut(&key) else {
                    continue;
                };
                if !predicate(&document) {
                    continue;
                }
                mutate(&mut document);
                document.clone()
            };
            changed += 1;
            self.notify(DocumentChange::Update(updated));
        }
        changed
    }

    /// Remove a document by key. Returns it if it existed.
    pub(crate) fn remove(&self, key: &str) -> Option<T> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.notify(DocumentChange::Delete { id: key.to_owned() });
        }
        removed
    }

    pub(crate) fn subscribe(&self) -> ChangeStream<T> {
        ChangeStream::new(self.changes.subscribe())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn notify(&self, change: DocumentChange<T>) {
        // No subscribers is fine: nobody is watching yet.
        let _ = self.changes.send(change);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::stream::ChangeKind;

    #[derive(Debug, Clone, PartialEq)]
    struct Doc {
        id: String,
        value: u32,
    }

    impl Document for Doc {
        fn key(&self) -> &str {
            &self.id
        }
    }

    fn doc(id: &str, value: u32) -> Doc {
        Doc {
            id: id.into(),
            value,
        }
    }

    #[test]
    fn replace_returns_true_for_new_key() {
        let col = DocumentCollection::new();
        assert!(col.replace(doc("a", 1)));
        assert!(!col.replace(doc("a", 2)));
        assert_eq!(col.get("a").unwrap().value, 2);
    }

    #[test]
    fn insert_if_absent_keeps_existing() {
        let col = DocumentCollection::new();
        assert!(col.insert_if_absent(doc("a", 1)));
        assert!(!col.insert_if_absent(doc("a", 2)));
        assert_eq!(col.get("a").unwrap().value, 1);
    }

    #[test]
    fn update_with_without_seed_skips_missing() {
        let col: DocumentCollection<Doc> = DocumentCollection::new();
        assert!(col.update_with("a", None, |d| d.value = 9).is_none());
        assert_eq!(col.len(), 0);

        let created = col.update_with("a", Some(doc("a", 0)), |d| d.value = 9).unwrap();
        assert_eq!(created.value, 9);
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn update_where_counts_matches() {
        let col = DocumentCollection::new();
        col.replace(doc("a", 1));
        col.replace(doc("b", 5));
        col.replace(doc("c", 7));

        let changed = col.update_where(|d| d.value > 2, |d| d.value = 0);
        assert_eq!(changed, 2);
        assert_eq!(col.get("a").unwrap().value, 1);
        assert_eq!(col.get("c").unwrap().value, 0);
    }

    #[test]
    fn remove_returns_document() {
        let col = DocumentCollection::new();
        col.replace(doc("a", 1));
        assert_eq!(col.remove("a").unwrap().value, 1);
        assert!(col.remove("a").is_none());
        assert!(col.get("a").is_none());
    }

    #[tokio::test]
    async fn mutations_emit_changes_in_order() {
        let col = DocumentCollection::new();
        let mut changes = col.subscribe();

        col.replace(doc("a", 1));
        col.update_with("a", None, |d| d.value = 2);
        col.replace(doc("a", 3));
        col.remove("a");

        let kinds = [
            changes.next().await.unwrap().kind(),
            changes.next().await.unwrap().kind(),
            changes.next().await.unwrap().kind(),
        ];
        assert_eq!(
            kinds,
            [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Replace]
        );
        assert_eq!(
            changes.next().await.unwrap(),
            DocumentChange::Delete { id: "a".into() }
        );
    }
}
