//! Master scenes: ordered lists of scenes applied together

use std::sync::Arc;

use tracing::{info, warn};

use super::{ensure_exist, EntityTable, ReferenceLock, SceneManager};
use crate::codec::NamedEntity;
use crate::config::EntityLimits;
use crate::error::{LsfError, LsfResult};
use crate::fanout::{AggregateReply, LampClients};
use crate::notify::{EventKind, Notification, NotificationHub};
use crate::store::VersionedStore;
use crate::types::{EntityKind, MasterScene, MasterSceneId};

pub struct MasterSceneManager {
    table: EntityTable<MasterScene>,
    scenes: Arc<SceneManager>,
    lamps: LampClients,
}

impl MasterSceneManager {
    pub fn new(
        store: Arc<VersionedStore<MasterScene>>,
        scenes: Arc<SceneManager>,
        lamps: LampClients,
        limits: EntityLimits,
        notifications: NotificationHub,
    ) -> Self {
        Self {
            table: EntityTable::new(EntityKind::MasterScene, store, limits, notifications),
            scenes,
            lamps,
        }
    }

    pub fn table(&self) -> &EntityTable<MasterScene> {
        &self.table
    }

    pub fn get_all_ids(&self) -> LsfResult<Vec<MasterSceneId>> {
        self.table.ids()
    }

    pub fn get(&self, id: &str) -> LsfResult<NamedEntity<MasterScene>> {
        self.table.get(id)
    }

    pub fn get_name(&self, id: &str, language: &str) -> LsfResult<String> {
        self.table.name(id, language)
    }

    pub fn set_name(&self, id: &str, name: &str, language: &str) -> LsfResult<()> {
        self.table.set_name(id, name, language)
    }

    pub fn create(&self, name: &str, language: &str, master: MasterScene) -> LsfResult<MasterSceneId> {
        let _guard = self.references().hold();
        ensure_exist(self.scenes.table().store(), &master.scenes)?;
        self.table.create(name, language, master)
    }

    pub fn update(&self, id: &str, master: MasterScene) -> LsfResult<()> {
        let _guard = self.references().hold();
        self.table.get(id)?;
        ensure_exist(self.scenes.table().store(), &master.scenes)?;
        self.table.update(id, master)
    }

    fn references(&self) -> &ReferenceLock {
        self.scenes.references()
    }

    /// Nothing depends on master scenes
    pub fn delete(&self, id: &str) -> LsfResult<()> {
        self.table.delete(id)
    }

    /// Apply every scene of the listed master scenes as one aggregate call
    pub async fn apply(&self, ids: &[MasterSceneId]) -> LsfResult<AggregateReply> {
        if ids.is_empty() {
            return Err(LsfError::InvalidArgs("no master scenes to apply".to_string()));
        }

        let mut calls = Vec::new();
        for id in ids {
            let master = self.table.get(id)?;
            for scene_id in &master.payload.scenes {
                match self.scenes.get(scene_id) {
                    Ok(scene) => calls.extend(self.scenes.resolve_calls(&scene.payload)?),
                    Err(_) => warn!(
                        "MasterSceneManager: {} lists missing scene {}, skipping",
                        id, scene_id
                    ),
                }
            }
        }

        info!("MasterSceneManager: Applying {:?} ({} lamp calls)", ids, calls.len());
        let applied = Notification::new(EntityKind::MasterScene, EventKind::Applied, ids.to_vec());
        self.lamps.submit(calls, Some(applied))?.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ControllerConfig;
    use crate::error::ResponseCode;
    use crate::service::ControllerService;
    use crate::sim::SimLampLink;
    use crate::types::{LampState, Scene, TransitionToState};

    fn scene_for(lamp: &str) -> Scene {
        Scene {
            transition_to_state: vec![TransitionToState {
                lamps: vec![lamp.to_string()],
                lamp_groups: vec![],
                state: LampState::new(true, 0, 0, 3000, 50),
                transition_period: 0,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_master_scene_dependencies() -> LsfResult<()> {
        let dir = tempfile::tempdir()?;
        let s = ControllerService::new(
            ControllerConfig::new("ctrl", dir.path()),
            Arc::new(SimLampLink::new()),
            Arc::new(ManualClock::new(1)),
        )?;

        let missing = MasterScene::new(vec!["SCENEmissing".to_string()]);
        assert_eq!(
            s.master_scenes().create("m", "en", missing).unwrap_err().code(),
            ResponseCode::InvalidArgs
        );

        let scene = s.scenes().create("s", "en", scene_for("l1"))?;
        let master = s.master_scenes().create("m", "en", MasterScene::new(vec![scene.clone()]))?;
        assert_eq!(s.scenes().delete(&scene).unwrap_err().code(), ResponseCode::Dependency);

        s.master_scenes().delete(&master)?;
        s.scenes().delete(&scene)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_skips_vanished_scenes() -> LsfResult<()> {
        let dir = tempfile::tempdir()?;
        let s = ControllerService::new(
            ControllerConfig::new("ctrl", dir.path()),
            Arc::new(SimLampLink::new()),
            Arc::new(ManualClock::new(1)),
        )?;
        s.start()?;

        let kept = s.scenes().create("kept", "en", scene_for("l1"))?;
        let gone = s.scenes().create("gone", "en", scene_for("l2"))?;
        let master = s
            .master_scenes()
            .create("both", "en", MasterScene::new(vec![kept, gone.clone()]))?;

        // Removed by peer sync, bypassing the dependency check
        s.scenes().table().store().remove(&gone)?;

        let reply = s.master_scenes().apply(&[master]).await?;
        assert_eq!(reply.counter.total, 1);
        assert_eq!(reply.results[0].0, "l1");
        // l1 never joined
        assert_eq!(reply.code, ResponseCode::NotFound);

        assert!(matches!(s.master_scenes().apply(&[]).await, Err(LsfError::InvalidArgs(_))));
        Ok(())
    }
}
