use std::fmt;
use std::sync::Arc;

use crate::types::{FetchResult, PersistResult};

/// Points at which a trigger can run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TriggerKind {
    BeforeDelete,
    AfterDelete,
    /// Around a whole `delete_all` call.
    BeforeDeleteAll,
    AfterDeleteAll,
    AfterLoad,
}

/// Hooks run around storage operations.
///
/// Implementors override the hooks they need and report them from
/// [`Trigger::handles`]; storage uses that to choose between bulk SQL and
/// row-by-row paths.
pub trait Trigger<T>: Send + Sync {
    fn handles(&self, kind: TriggerKind) -> bool;

    fn before_delete(&self, entity: &T) -> PersistResult<()> {
        let _ = entity;
        Ok(())
    }

    fn after_delete(&self, entity: &T) -> PersistResult<()> {
        let _ = entity;
        Ok(())
    }

    fn before_delete_all(&self) -> PersistResult<()> {
        Ok(())
    }

    /// Runs after `delete_all` with the number of rows removed.
    fn after_delete_all(&self, deleted: u64) -> PersistResult<()> {
        let _ = deleted;
        Ok(())
    }

    fn after_load(&self, entity: &mut T) -> FetchResult<()> {
        let _ = entity;
        Ok(())
    }
}

/// Triggers registered on one storage, run in registration order.
pub struct TriggerSet<T> {
    triggers: Vec<Arc<dyn Trigger<T>>>,
}

impl<T> Default for TriggerSet<T> {
    fn default() -> Self {
        Self {
            triggers: Vec::new(),
        }
    }
}

impl<T> Clone for TriggerSet<T> {
    fn clone(&self) -> Self {
        Self {
            triggers: self.triggers.clone(),
        }
    }
}

impl<T> fmt::Debug for TriggerSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerSet")
            .field("len", &self.triggers.len())
            .finish()
    }
}

impl<T: 'static> TriggerSet<T> {
    pub fn add(&mut self, trigger: Arc<dyn Trigger<T>>) {
        self.triggers.push(trigger);
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Whether any registered trigger runs at `kind`.
    pub fn has(&self, kind: TriggerKind) -> bool {
        self.triggers.iter().any(|t| t.handles(kind))
    }

    fn each(&self, kind: TriggerKind) -> impl Iterator<Item = &Arc<dyn Trigger<T>>> {
        self.triggers.iter().filter(move |t| t.handles(kind))
    }

    pub fn before_delete(&self, entity: &T) -> PersistResult<()> {
        self.each(TriggerKind::BeforeDelete)
            .try_for_each(|t| t.before_delete(entity))
    }

    pub fn after_delete(&self, entity: &T) -> PersistResult<()> {
        self.each(TriggerKind::AfterDelete)
            .try_for_each(|t| t.after_delete(entity))
    }

    pub fn before_delete_all(&self) -> PersistResult<()> {
        self.each(TriggerKind::BeforeDeleteAll)
            .try_for_each(|t| t.before_delete_all())
    }

    pub fn after_delete_all(&self, deleted: u64) -> PersistResult<()> {
        self.each(TriggerKind::AfterDeleteAll)
            .try_for_each(|t| t.after_delete_all(deleted))
    }

    pub fn after_load(&self, entity: &mut T) -> FetchResult<()> {
        for trigger in self.each(TriggerKind::AfterLoad) {
            trigger.after_load(entity)?;
        }
        Ok(())
    }
}
