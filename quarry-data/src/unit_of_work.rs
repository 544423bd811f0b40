use tracing::debug;

use crate::entity::{EntityRef, EntitySnapshot};
use crate::error::Result;
use crate::repository::Repository;

/// Saves a group of entities, restoring their in-memory state when any
/// save fails.
///
/// Only entity state is restored. Rows already written stay written unless
/// the caller wraps the save in a storage transaction.
#[derive(Default)]
pub struct UnitOfWork {
    entries: Vec<(EntityRef, EntitySnapshot)>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `entity`, snapshotting its current state. Adding the same
    /// entity twice keeps the first snapshot.
    pub async fn add(&mut self, entity: &EntityRef) {
        if self.contains(entity) {
            return;
        }
        let snapshot = entity.lock().await.snapshot();
        self.entries.push((entity.clone(), snapshot));
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.entries.iter().any(|(e, _)| EntityRef::ptr_eq(e, entity))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Save every entity in the order added.
    ///
    /// Stops at the first save that reports a conflict or fails; the
    /// entities processed so far (the failing one included) get their
    /// snapshots back. A conflict returns `Ok(false)`, a failure its error.
    pub async fn save(&self, repo: &Repository) -> Result<bool> {
        for (done, (entity, _)) in self.entries.iter().enumerate() {
            let outcome = repo.save(entity).await;
            let saved = match &outcome {
                Ok(saved) => saved.is_success(),
                Err(_) => false,
            };
            if !saved {
                debug!(
                    type_name = entity.type_name(),
                    restored = done + 1,
                    "Unit of work failed, restoring entities"
                );
                self.restore(done + 1).await;
                return outcome.map(|_| false);
            }
        }
        Ok(true)
    }

    async fn restore(&self, count: usize) {
        for (entity, snapshot) in self.entries.iter().take(count) {
            entity.lock().await.restore(snapshot.clone());
        }
    }
}
