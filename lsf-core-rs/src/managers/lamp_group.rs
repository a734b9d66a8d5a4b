//! Lamp groups: nested lamp collections and their state operations

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{ensure_no_dependents, EntityTable, ReferenceLock};
use crate::codec::NamedEntity;
use crate::config::EntityLimits;
use crate::error::{LsfError, LsfResult};
use crate::fanout::{AggregateReply, LampClients};
use crate::lamp::LampRequest;
use crate::notify::{EventKind, Notification, NotificationHub};
use crate::store::VersionedStore;
use crate::types::{
    EntityKind, LampGroup, LampGroupId, LampId, LampState, LampStateField, LampStateFieldName,
    PresetId, Scene,
};

pub struct LampGroupManager {
    table: EntityTable<LampGroup>,
    scenes: Arc<VersionedStore<Scene>>,
    presets: Arc<VersionedStore<LampState>>,
    lamps: LampClients,
    default_state: LampState,
    /// Also keeps two updates from jointly forming a cycle
    references: ReferenceLock,
}

impl LampGroupManager {
    pub fn new(
        store: Arc<VersionedStore<LampGroup>>,
        scenes: Arc<VersionedStore<Scene>>,
        presets: Arc<VersionedStore<LampState>>,
        lamps: LampClients,
        limits: EntityLimits,
        default_state: LampState,
        notifications: NotificationHub,
        references: ReferenceLock,
    ) -> Self {
        Self {
            table: EntityTable::new(EntityKind::LampGroup, store, limits, notifications),
            scenes,
            presets,
            lamps,
            default_state,
            references,
        }
    }

    pub fn references(&self) -> &ReferenceLock {
        &self.references
    }

    pub fn table(&self) -> &EntityTable<LampGroup> {
        &self.table
    }

    pub fn get_all_ids(&self) -> LsfResult<Vec<LampGroupId>> {
        self.table.ids()
    }

    pub fn get(&self, id: &str) -> LsfResult<NamedEntity<LampGroup>> {
        self.table.get(id)
    }

    pub fn get_name(&self, id: &str, language: &str) -> LsfResult<String> {
        self.table.name(id, language)
    }

    pub fn set_name(&self, id: &str, name: &str, language: &str) -> LsfResult<()> {
        self.table.set_name(id, name, language)
    }

    pub fn create(&self, name: &str, language: &str, group: LampGroup) -> LsfResult<LampGroupId> {
        let _guard = self.references.hold();
        self.validate(None, &group)?;
        self.table.create(name, language, group)
    }

    pub fn update(&self, id: &str, group: LampGroup) -> LsfResult<()> {
        let _guard = self.references.hold();
        self.table.get(id)?;
        self.validate(Some(id), &group)?;
        self.table.update(id, group)
    }

    pub fn delete(&self, id: &str) -> LsfResult<()> {
        let _guard = self.references.hold();
        self.table.get(id)?;
        ensure_no_dependents(id, &self.scenes, |scene| scene.is_dependent_on_lamp_group(id))?;
        ensure_no_dependents(id, self.table.store(), |group| {
            group.is_dependent_on_lamp_group(id)
        })?;
        self.table.delete(id)
    }

    /// Nested groups must exist and the nesting graph must stay acyclic
    fn validate(&self, id: Option<&str>, group: &LampGroup) -> LsfResult<()> {
        let groups = self.table.store().snapshot()?;

        for nested in &group.lamp_groups {
            if Some(nested.as_str()) == id {
                return Err(LsfError::InvalidArgs(format!("group {} contains itself", nested)));
            }
            if !groups.contains_key(nested) {
                return Err(LsfError::InvalidArgs(format!(
                    "nested group {} does not exist",
                    nested
                )));
            }
        }

        if let Some(id) = id {
            let mut visited = HashSet::new();
            let mut stack = HashSet::new();
            if !is_group_valid(id, id, group, &groups, &mut visited, &mut stack) {
                warn!("LampGroupManager: Rejecting update of {}, nesting cycle", id);
                return Err(LsfError::InvalidArgs(format!(
                    "group {} would form a nesting cycle",
                    id
                )));
            }
        }
        Ok(())
    }

    /// Flatten lamps and (recursively) groups into a de-duplicated lamp list.
    /// Groups that no longer exist are skipped.
    pub fn resolve_lamps(&self, lamps: &[LampId], groups: &[LampGroupId]) -> LsfResult<Vec<LampId>> {
        let snapshot = self.table.store().snapshot()?;
        let mut seen_lamps = HashSet::new();
        let mut seen_groups = HashSet::new();
        let mut out = Vec::new();

        for lamp in lamps {
            if seen_lamps.insert(lamp.clone()) {
                out.push(lamp.clone());
            }
        }

        let mut pending: Vec<&LampGroupId> = groups.iter().rev().collect();
        while let Some(group_id) = pending.pop() {
            if !seen_groups.insert(group_id.clone()) {
                continue;
            }
            let group = match snapshot.get(group_id) {
                Some(group) => &group.payload,
                None => {
                    warn!("LampGroupManager: Skipping missing group {}", group_id);
                    continue;
                }
            };
            for lamp in &group.lamps {
                if seen_lamps.insert(lamp.clone()) {
                    out.push(lamp.clone());
                }
            }
            pending.extend(group.lamp_groups.iter().rev());
        }

        debug!(
            "LampGroupManager: Resolved {} groups to {} lamps",
            seen_groups.len(),
            out.len()
        );
        Ok(out)
    }

    fn preset_state(&self, preset_id: &str) -> LsfResult<LampState> {
        self.presets
            .get(preset_id)
            .map(|preset| preset.payload)
            .map_err(|_| LsfError::InvalidArgs(format!("preset {} does not exist", preset_id)))
    }

    async fn fan_out(&self, group_id: &str, request: LampRequest) -> LsfResult<AggregateReply> {
        self.table.get(group_id)?;
        let lamps = self.resolve_lamps(&[], &[group_id.to_string()])?;
        let changed = Notification::new(EntityKind::Lamp, EventKind::StateChanged, lamps.clone());
        self.lamps
            .change_lamp_state(&lamps, request, Some(changed))?
            .wait()
            .await
    }

    pub async fn transition_state(
        &self,
        id: &str,
        state: LampState,
        period: u32,
    ) -> LsfResult<AggregateReply> {
        self.fan_out(id, LampRequest::TransitionState { state, period })
            .await
    }

    pub async fn transition_state_field(
        &self,
        id: &str,
        field: LampStateField,
        period: u32,
    ) -> LsfResult<AggregateReply> {
        self.fan_out(id, LampRequest::TransitionStateField { field, period })
            .await
    }

    pub async fn transition_to_preset(
        &self,
        id: &str,
        preset_id: &PresetId,
        period: u32,
    ) -> LsfResult<AggregateReply> {
        let state = self.preset_state(preset_id)?;
        self.transition_state(id, state, period).await
    }

    pub async fn pulse_with_state(
        &self,
        id: &str,
        from_state: LampState,
        to_state: LampState,
        period: u32,
        duration: u32,
        num_pulses: u32,
    ) -> LsfResult<AggregateReply> {
        let request = LampRequest::Pulse {
            from_state,
            to_state,
            period,
            duration,
            num_pulses,
        };
        self.fan_out(id, request).await
    }

    pub async fn pulse_with_preset(
        &self,
        id: &str,
        from_preset: &PresetId,
        to_preset: &PresetId,
        period: u32,
        duration: u32,
        num_pulses: u32,
    ) -> LsfResult<AggregateReply> {
        let from_state = self.preset_state(from_preset)?;
        let to_state = self.preset_state(to_preset)?;
        self.pulse_with_state(id, from_state, to_state, period, duration, num_pulses)
            .await
    }

    pub async fn reset_state(&self, id: &str) -> LsfResult<AggregateReply> {
        self.transition_state(id, self.default_state, 0).await
    }

    pub async fn reset_state_field(
        &self,
        id: &str,
        field: LampStateFieldName,
    ) -> LsfResult<AggregateReply> {
        self.transition_state_field(id, self.default_state.field(field), 0)
            .await
    }
}

/// DFS over the nesting graph with `candidate` substituted for `candidate_id`.
/// Returns false when a group is reached again while still on the stack.
fn is_group_valid(
    node: &str,
    candidate_id: &str,
    candidate: &LampGroup,
    groups: &BTreeMap<String, NamedEntity<LampGroup>>,
    visited: &mut HashSet<String>,
    stack: &mut HashSet<String>,
) -> bool {
    if stack.contains(node) {
        return false;
    }
    if !visited.insert(node.to_string()) {
        return true;
    }
    stack.insert(node.to_string());

    let children: &[LampGroupId] = if node == candidate_id {
        &candidate.lamp_groups
    } else {
        match groups.get(node) {
            Some(group) => &group.payload.lamp_groups,
            None => &[],
        }
    };

    for child in children {
        if !is_group_valid(child, candidate_id, candidate, groups, visited, stack) {
            return false;
        }
    }

    stack.remove(node);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::FanoutConfig;
    use crate::error::ResponseCode;
    use crate::sim::SimLampLink;
    use crate::store::WriteTrigger;
    use crate::types::TransitionToState;

    fn manager(sim: Arc<SimLampLink>) -> LampGroupManager {
        manager_with_hub(sim, NotificationHub::default())
    }

    fn manager_with_hub(sim: Arc<SimLampLink>, hub: NotificationHub) -> LampGroupManager {
        let clock = Arc::new(ManualClock::new(1));
        let trigger = WriteTrigger::new();
        let lamps = LampClients::spawn(sim, FanoutConfig::default(), hub.clone());
        LampGroupManager::new(
            Arc::new(VersionedStore::new(4096, clock.clone(), trigger.clone())),
            Arc::new(VersionedStore::new(4096, clock.clone(), trigger.clone())),
            Arc::new(VersionedStore::new(4096, clock, trigger)),
            lamps,
            EntityLimits::default(),
            LampState::new(true, 0, 0, 2700, 100),
            hub,
            ReferenceLock::default(),
        )
    }

    fn group(lamps: &[&str], groups: &[&str]) -> LampGroup {
        LampGroup::new(
            lamps.iter().map(|s| s.to_string()).collect(),
            groups.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_cycle_rejected() -> LsfResult<()> {
        let m = manager(Arc::new(SimLampLink::new()));
        let a = m.create("a", "en", group(&["l1"], &[]))?;
        let b = m.create("b", "en", group(&["l2"], &[&a]))?;
        let c = m.create("c", "en", group(&[], &[&b]))?;

        // a -> c -> b -> a
        let before = m.get(&a)?;
        let err = m.update(&a, group(&["l1"], &[&c])).unwrap_err();
        assert_eq!(err.code(), ResponseCode::InvalidArgs);
        assert_eq!(m.get(&a)?, before);

        assert!(m.update(&a, group(&[], &[&a])).is_err());
        assert!(m.create("d", "en", group(&[], &["LAMP_GROUPmissing"])).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_nested_dedups() -> LsfResult<()> {
        let m = manager(Arc::new(SimLampLink::new()));
        let inner = m.create("inner", "en", group(&["l2", "l3"], &[]))?;
        let outer = m.create("outer", "en", group(&["l1", "l2"], &[&inner]))?;

        let lamps = m.resolve_lamps(&["l3".to_string()], &[outer, inner])?;
        assert_eq!(lamps, vec!["l3", "l1", "l2"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_blocked_by_scene_and_parent() -> LsfResult<()> {
        let m = manager(Arc::new(SimLampLink::new()));
        let child = m.create("child", "en", group(&["l1"], &[]))?;
        let parent = m.create("parent", "en", group(&[], &[&child]))?;

        assert_eq!(m.delete(&child).unwrap_err().code(), ResponseCode::Dependency);
        m.delete(&parent)?;

        let scene = Scene {
            transition_to_state: vec![TransitionToState {
                lamp_groups: vec![child.clone()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let scene_id = m.scenes.create("s", scene, 100)?;
        assert_eq!(m.delete(&child).unwrap_err().code(), ResponseCode::Dependency);
        assert!(m.get(&child).is_ok());

        m.scenes.remove(&scene_id)?;
        m.delete(&child)?;
        assert_eq!(m.delete(&child).unwrap_err().code(), ResponseCode::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_group_transition_reaches_nested_lamps() -> LsfResult<()> {
        let sim = Arc::new(SimLampLink::new());
        let hub = NotificationHub::default();
        let mut events = hub.subscribe();
        let m = manager_with_hub(sim.clone(), hub);
        for id in ["l1", "l2"] {
            m.lamps.lamp_found(sim.add_lamp(id, id));
        }
        for _ in 0..1000 {
            if m.lamps.lamp_ids().iter().all(|id| {
                m.lamps.connection_state(id) == Some(crate::fanout::ConnectionState::Connected)
            }) && m.lamps.lamp_ids().len() == 2
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        let inner = m.create("inner", "en", group(&["l2"], &[]))?;
        let outer = m.create("outer", "en", group(&["l1", "ghost"], &[&inner]))?;

        let reply = m.reset_state(&outer).await?;
        assert_eq!(reply.code, ResponseCode::PartialSuccess);
        assert_eq!(reply.counter.success_count, 2);
        assert_eq!(reply.counter.not_found_count, 1);
        assert_eq!(sim.state("l2"), Some(LampState::new(true, 0, 0, 2700, 100)));

        let mut state_changed = 0;
        while let Ok(n) = events.try_recv() {
            if n.signal_name() == "LampsStateChanged" {
                state_changed += 1;
            }
        }
        assert_eq!(state_changed, 1);
        Ok(())
    }
}
