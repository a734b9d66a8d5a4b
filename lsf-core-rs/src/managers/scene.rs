//! Scenes: lists of transition and pulse components, applied through the
//! lamp dispatcher

use std::sync::Arc;

use tracing::{info, warn};

use super::{ensure_exist, ensure_no_dependents, EntityTable, LampGroupManager, ReferenceLock};
use crate::codec::NamedEntity;
use crate::config::EntityLimits;
use crate::error::{LsfError, LsfResult};
use crate::fanout::{AggregateReply, LampCall, LampClients};
use crate::lamp::LampRequest;
use crate::notify::{EventKind, Notification, NotificationHub};
use crate::store::VersionedStore;
use crate::types::{EntityKind, LampId, LampState, MasterScene, Scene, SceneId};

pub struct SceneManager {
    table: EntityTable<Scene>,
    groups: Arc<LampGroupManager>,
    presets: Arc<VersionedStore<LampState>>,
    master_scenes: Arc<VersionedStore<MasterScene>>,
    lamps: LampClients,
}

impl SceneManager {
    pub fn new(
        store: Arc<VersionedStore<Scene>>,
        groups: Arc<LampGroupManager>,
        presets: Arc<VersionedStore<LampState>>,
        master_scenes: Arc<VersionedStore<MasterScene>>,
        lamps: LampClients,
        limits: EntityLimits,
        notifications: NotificationHub,
    ) -> Self {
        Self {
            table: EntityTable::new(EntityKind::Scene, store, limits, notifications),
            groups,
            presets,
            master_scenes,
            lamps,
        }
    }

    pub fn table(&self) -> &EntityTable<Scene> {
        &self.table
    }

    pub fn references(&self) -> &ReferenceLock {
        self.groups.references()
    }

    pub fn get_all_ids(&self) -> LsfResult<Vec<SceneId>> {
        self.table.ids()
    }

    pub fn get(&self, id: &str) -> LsfResult<NamedEntity<Scene>> {
        self.table.get(id)
    }

    pub fn get_name(&self, id: &str, language: &str) -> LsfResult<String> {
        self.table.name(id, language)
    }

    pub fn set_name(&self, id: &str, name: &str, language: &str) -> LsfResult<()> {
        self.table.set_name(id, name, language)
    }

    pub fn create(&self, name: &str, language: &str, scene: Scene) -> LsfResult<SceneId> {
        let _guard = self.references().hold();
        self.validate(&scene)?;
        self.table.create(name, language, scene)
    }

    pub fn update(&self, id: &str, scene: Scene) -> LsfResult<()> {
        let _guard = self.references().hold();
        self.table.get(id)?;
        self.validate(&scene)?;
        self.table.update(id, scene)
    }

    /// Rejected while any master scene lists the scene
    pub fn delete(&self, id: &str) -> LsfResult<()> {
        let _guard = self.references().hold();
        self.table.get(id)?;
        ensure_no_dependents(id, &self.master_scenes, |master| {
            master.is_dependent_on_scene(id)
        })?;
        self.table.delete(id)
    }

    fn validate(&self, scene: &Scene) -> LsfResult<()> {
        ensure_exist(self.groups.table().store(), scene.lamp_groups())?;
        ensure_exist(&self.presets, scene.presets())
    }

    fn preset(&self, id: &str) -> Option<LampState> {
        match self.presets.get(id) {
            Ok(preset) => Some(preset.payload),
            Err(_) => {
                warn!("SceneManager: Skipping component with missing preset {}", id);
                None
            }
        }
    }

    fn push_calls(
        &self,
        calls: &mut Vec<LampCall>,
        lamps: &[LampId],
        groups: &[String],
        request: LampRequest,
    ) -> LsfResult<()> {
        for lamp_id in self.groups.resolve_lamps(lamps, groups)? {
            calls.push(LampCall::new(lamp_id, request.clone()));
        }
        Ok(())
    }

    /// Lamp calls for every component of a scene. Components whose preset
    /// vanished are skipped.
    pub fn resolve_calls(&self, scene: &Scene) -> LsfResult<Vec<LampCall>> {
        let mut calls = Vec::new();

        for c in &scene.transition_to_state {
            let request = LampRequest::TransitionState {
                state: c.state,
                period: c.transition_period,
            };
            self.push_calls(&mut calls, &c.lamps, &c.lamp_groups, request)?;
        }

        for c in &scene.transition_to_preset {
            if let Some(state) = self.preset(&c.preset) {
                let request = LampRequest::TransitionState {
                    state,
                    period: c.transition_period,
                };
                self.push_calls(&mut calls, &c.lamps, &c.lamp_groups, request)?;
            }
        }

        for c in &scene.pulse_with_state {
            let request = LampRequest::Pulse {
                from_state: c.from_state,
                to_state: c.to_state,
                period: c.period,
                duration: c.duration,
                num_pulses: c.num_pulses,
            };
            self.push_calls(&mut calls, &c.lamps, &c.lamp_groups, request)?;
        }

        for c in &scene.pulse_with_preset {
            let (from_state, to_state) = match (self.preset(&c.from_preset), self.preset(&c.to_preset)) {
                (Some(from), Some(to)) => (from, to),
                _ => continue,
            };
            let request = LampRequest::Pulse {
                from_state,
                to_state,
                period: c.period,
                duration: c.duration,
                num_pulses: c.num_pulses,
            };
            self.push_calls(&mut calls, &c.lamps, &c.lamp_groups, request)?;
        }

        Ok(calls)
    }

    /// Apply scenes as one aggregate call. `ScenesApplied` is emitted once
    /// if at least one lamp took the change.
    pub async fn apply(&self, ids: &[SceneId]) -> LsfResult<AggregateReply> {
        if ids.is_empty() {
            return Err(LsfError::InvalidArgs("no scenes to apply".to_string()));
        }

        let mut calls = Vec::new();
        for id in ids {
            let scene = self.table.get(id)?;
            calls.extend(self.resolve_calls(&scene.payload)?);
        }

        info!("SceneManager: Applying {:?} ({} lamp calls)", ids, calls.len());
        let applied = Notification::new(EntityKind::Scene, EventKind::Applied, ids.to_vec());
        self.lamps.submit(calls, Some(applied))?.wait().await
    }
}
