//! Presets: named lamp states

use std::sync::Arc;

use super::{ensure_no_dependents, EntityTable, ReferenceLock};
use crate::codec::NamedEntity;
use crate::config::EntityLimits;
use crate::error::LsfResult;
use crate::notify::NotificationHub;
use crate::store::VersionedStore;
use crate::types::{EntityKind, LampState, Preset, PresetId, Scene};

pub struct PresetManager {
    table: EntityTable<Preset>,
    scenes: Arc<VersionedStore<Scene>>,
    references: ReferenceLock,
}

impl PresetManager {
    pub fn new(
        store: Arc<VersionedStore<LampState>>,
        scenes: Arc<VersionedStore<Scene>>,
        limits: EntityLimits,
        notifications: NotificationHub,
        references: ReferenceLock,
    ) -> Self {
        Self {
            table: EntityTable::new(EntityKind::Preset, store, limits, notifications),
            scenes,
            references,
        }
    }

    pub fn table(&self) -> &EntityTable<Preset> {
        &self.table
    }

    pub fn get_all_ids(&self) -> LsfResult<Vec<PresetId>> {
        self.table.ids()
    }

    pub fn get(&self, id: &str) -> LsfResult<NamedEntity<Preset>> {
        self.table.get(id)
    }

    pub fn get_name(&self, id: &str, language: &str) -> LsfResult<String> {
        self.table.name(id, language)
    }

    pub fn set_name(&self, id: &str, name: &str, language: &str) -> LsfResult<()> {
        self.table.set_name(id, name, language)
    }

    pub fn create(&self, name: &str, language: &str, preset: Preset) -> LsfResult<PresetId> {
        self.table.create(name, language, preset)
    }

    pub fn update(&self, id: &str, preset: Preset) -> LsfResult<()> {
        self.table.update(id, preset)
    }

    /// Rejected while any scene uses the preset
    pub fn delete(&self, id: &str) -> LsfResult<()> {
        let _guard = self.references.hold();
        self.table.get(id)?;
        ensure_no_dependents(id, &self.scenes, |scene| scene.is_dependent_on_preset(id))?;
        self.table.delete(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{LsfError, ResponseCode};
    use crate::notify::EventKind;
    use crate::store::WriteTrigger;
    use crate::types::TransitionToPreset;

    #[tokio::test]
    async fn test_preset_lifecycle_and_signals() -> LsfResult<()> {
        let clock = Arc::new(ManualClock::new(1));
        let trigger = WriteTrigger::new();
        let hub = NotificationHub::default();
        let mut events = hub.subscribe();
        let limits = EntityLimits {
            max_entities: 1,
            ..Default::default()
        };
        let scenes = Arc::new(VersionedStore::<Scene>::new(4096, clock.clone(), trigger.clone()));
        let presets = PresetManager::new(
            Arc::new(VersionedStore::new(4096, clock, trigger)),
            scenes.clone(),
            limits,
            hub,
            ReferenceLock::default(),
        );

        let id = presets.create("Dim", "en", LampState::new(true, 0, 0, 2700, 10))?;
        assert!(matches!(
            presets.create("Bright", "en", LampState::default()),
            Err(LsfError::NoSlot(1))
        ));
        assert!(matches!(presets.set_name(&id, "", "en"), Err(LsfError::EmptyName)));
        presets.set_name(&id, "Dimmer", "en")?;
        assert_eq!(presets.get_name(&id, "en")?, "Dimmer");

        let scene = Scene {
            transition_to_preset: vec![TransitionToPreset {
                lamps: vec!["l1".into()],
                preset: id.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let scene_id = scenes.create("s", scene, 100)?;
        assert_eq!(presets.delete(&id).unwrap_err().code(), ResponseCode::Dependency);
        scenes.remove(&scene_id)?;
        presets.delete(&id)?;

        let mut seen = Vec::new();
        while let Ok(n) = events.try_recv() {
            seen.push(n.event);
        }
        assert_eq!(
            seen,
            vec![EventKind::Created, EventKind::NameChanged, EventKind::Deleted]
        );
        Ok(())
    }
}
