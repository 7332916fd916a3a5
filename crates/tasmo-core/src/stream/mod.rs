// ── Store change streams ──
//
// Subscription types for consuming document changes from a `DeviceStore`.
// Delivery is at-least-once from the consumer's point of view: a lagging
// receiver skips ahead and carries on, so handlers must be idempotent.

use serde::Serialize;
use strum::Display;
use tokio::sync::broadcast;
use tracing::warn;

/// Kind of a document change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
pub enum ChangeKind {
    Insert,
    Update,
    Replace,
    Delete,
}

/// One change to a stored document. Deletes carry only the key.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange<T> {
    Insert(T),
    Update(T),
    Replace(T),
    Delete { id: String },
}

impl<T> DocumentChange<T> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Insert(_) => ChangeKind::Insert,
            Self::Update(_) => ChangeKind::Update,
            Self::Replace(_) => ChangeKind::Replace,
            Self::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// The full document, absent for deletes.
    pub fn document(&self) -> Option<&T> {
        match self {
            Self::Insert(doc) | Self::Update(doc) | Self::Replace(doc) => Some(doc),
            Self::Delete { .. } => None,
        }
    }
}

/// A subscription to one collection's changes.
pub struct ChangeStream<T: Clone + Send + 'static> {
    receiver: broadcast::Receiver<DocumentChange<T>>,
}

impl<T: Clone + Send + 'static> ChangeStream<T> {
    pub fn new(receiver: broadcast::Receiver<DocumentChange<T>>) -> Self {
        Self { receiver }
    }

    /// Wait for the next change. Returns `None` once the store is dropped.
    pub async fn next(&mut self) -> Option<DocumentChange<T>> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change stream lagged, resuming");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
