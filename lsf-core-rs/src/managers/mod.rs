//! Entity managers
//!
//! Every manager composes an [`EntityTable`] (store + limits + signals) with
//! its own validation. Cross-manager references are plain shared handles
//! passed in at construction.
//!
//! Writes that check references into another table (create/update validating
//! that referenced entities exist, delete checking for dependents) hold the
//! shared [`ReferenceLock`], so a delete cannot slip between another
//! manager's validation and its insert. Peer sync replaces whole tables
//! without it; apply skips components whose reference vanished that way.

mod lamp;
mod lamp_group;
mod master_scene;
mod preset;
mod scene;

pub use lamp::LampManager;
pub use lamp_group::LampGroupManager;
pub use master_scene::MasterSceneManager;
pub use preset::PresetManager;
pub use scene::SceneManager;

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::codec::{BlobEntity, NamedEntity};
use crate::config::EntityLimits;
use crate::error::{LsfError, LsfResult};
use crate::notify::{EventKind, Notification, NotificationHub};
use crate::store::{ReplicatedStore, VersionedStore};
use crate::types::{EntityKind, LANGUAGE_EN};

/// Reject any language other than the one names are stored in
pub fn check_language(language: &str) -> LsfResult<()> {
    if language != LANGUAGE_EN {
        return Err(LsfError::InvalidArgs(format!(
            "unsupported language {:?}",
            language
        )));
    }
    Ok(())
}

/// Validate an entity name and its language
pub fn validate_name(name: &str, language: &str, limits: &EntityLimits) -> LsfResult<()> {
    if name.is_empty() {
        return Err(LsfError::EmptyName);
    }
    if name.chars().count() > limits.max_name_len {
        return Err(LsfError::InvalidArgs(format!(
            "name longer than {} characters",
            limits.max_name_len
        )));
    }
    check_language(language)
}

/// Serializes reference-checking writes across managers
#[derive(Clone, Default)]
pub struct ReferenceLock(Arc<Mutex<()>>);

impl ReferenceLock {
    pub fn hold(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }
}

/// Store plus the bookkeeping common to every entity manager
pub struct EntityTable<T: BlobEntity> {
    kind: EntityKind,
    store: Arc<VersionedStore<T>>,
    limits: EntityLimits,
    notifications: NotificationHub,
}

impl<T: BlobEntity> EntityTable<T> {
    pub fn new(
        kind: EntityKind,
        store: Arc<VersionedStore<T>>,
        limits: EntityLimits,
        notifications: NotificationHub,
    ) -> Self {
        Self {
            kind,
            store,
            limits,
            notifications,
        }
    }

    pub fn store(&self) -> &Arc<VersionedStore<T>> {
        &self.store
    }

    fn notify(&self, event: EventKind, ids: Vec<String>) {
        self.notifications
            .emit(Notification::new(self.kind, event, ids));
    }

    pub fn ids(&self) -> LsfResult<Vec<String>> {
        self.store.ids()
    }

    pub fn get(&self, id: &str) -> LsfResult<NamedEntity<T>> {
        self.store.get(id)
    }

    pub fn name(&self, id: &str, language: &str) -> LsfResult<String> {
        check_language(language)?;
        Ok(self.store.get(id)?.name)
    }

    pub fn set_name(&self, id: &str, name: &str, language: &str) -> LsfResult<()> {
        validate_name(name, language, &self.limits)?;
        self.store.rename(id, name)?;
        self.notify(EventKind::NameChanged, vec![id.to_string()]);
        Ok(())
    }

    pub fn create(&self, name: &str, language: &str, payload: T) -> LsfResult<String> {
        if self.store.len()? >= self.limits.max_entities {
            return Err(LsfError::NoSlot(self.limits.max_entities));
        }
        validate_name(name, language, &self.limits)?;
        let id = self.store.create(name, payload, self.limits.max_entities)?;
        self.notify(EventKind::Created, vec![id.clone()]);
        Ok(id)
    }

    pub fn update(&self, id: &str, payload: T) -> LsfResult<()> {
        self.store.update(id, payload)?;
        self.notify(EventKind::Updated, vec![id.to_string()]);
        Ok(())
    }

    /// Remove an entity whose dependents were already checked
    pub fn delete(&self, id: &str) -> LsfResult<()> {
        self.store.remove(id)?;
        self.notify(EventKind::Deleted, vec![id.to_string()]);
        Ok(())
    }

    /// Drop every entity, signalling all of them as deleted
    pub fn reset(&self) -> LsfResult<()> {
        let ids = self.store.ids()?;
        self.store.reset()?;
        if !ids.is_empty() {
            self.notify(EventKind::Deleted, ids);
        }
        Ok(())
    }
}

/// `Dependency` error if any entity in `store` satisfies `depends`
pub(crate) fn ensure_no_dependents<T: BlobEntity>(
    id: &str,
    store: &VersionedStore<T>,
    depends: impl Fn(&T) -> bool,
) -> LsfResult<()> {
    match store.find(depends)?.into_iter().next() {
        Some(dependent) => Err(LsfError::Dependency {
            id: id.to_string(),
            dependent,
        }),
        None => Ok(()),
    }
}

/// `InvalidArgs` unless every id exists in `store`
pub(crate) fn ensure_exist<'a, T: BlobEntity>(
    store: &VersionedStore<T>,
    ids: impl IntoIterator<Item = &'a String>,
) -> LsfResult<()> {
    for id in ids {
        if !store.contains(id)? {
            return Err(LsfError::InvalidArgs(format!(
                "{} {} does not exist",
                store.blob_type(),
                id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        let limits = EntityLimits {
            max_name_len: 4,
            ..Default::default()
        };
        assert!(validate_name("abcd", "en", &limits).is_ok());
        assert!(matches!(validate_name("", "en", &limits), Err(LsfError::EmptyName)));
        assert!(matches!(
            validate_name("abcde", "en", &limits),
            Err(LsfError::InvalidArgs(_))
        ));
        assert!(matches!(
            validate_name("abc", "de", &limits),
            Err(LsfError::InvalidArgs(_))
        ));
    }
}
