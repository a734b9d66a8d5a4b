//! Client method surface
//!
//! Every named controller method as one serde-tagged enum. Dispatch always
//! answers with a [`MethodReply`]; errors become response codes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{LsfResult, ResponseCode};
use crate::fanout::AggregateReply;
use crate::service::ControllerService;
use crate::types::{
    LampGroup, LampGroupId, LampId, LampState, LampStateField, LampStateFieldName, MasterScene,
    MasterSceneId, Preset, PresetId, Scene, SceneId,
};

/// One client method call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum MethodCall {
    // Lamps
    GetAllLampIDs,
    GetLampName {
        lamp_id: LampId,
        language: String,
    },
    SetLampName {
        lamp_id: LampId,
        name: String,
        language: String,
    },
    GetLampState {
        lamp_id: LampId,
    },
    TransitionLampState {
        lamp_id: LampId,
        state: LampState,
        period: u32,
    },
    TransitionLampStateField {
        lamp_id: LampId,
        field: LampStateField,
        period: u32,
    },
    TransitionLampStateToPreset {
        lamp_id: LampId,
        preset_id: PresetId,
        period: u32,
    },
    PulseLampWithState {
        lamp_id: LampId,
        from_state: LampState,
        to_state: LampState,
        period: u32,
        duration: u32,
        num_pulses: u32,
    },
    PulseLampWithPreset {
        lamp_id: LampId,
        from_preset: PresetId,
        to_preset: PresetId,
        period: u32,
        duration: u32,
        num_pulses: u32,
    },
    ResetLampState {
        lamp_id: LampId,
    },
    ResetLampStateField {
        lamp_id: LampId,
        field: LampStateFieldName,
    },
    GetLampFaults {
        lamp_id: LampId,
    },
    ClearLampFault {
        lamp_id: LampId,
        code: u32,
    },
    GetLampDetails {
        lamp_id: LampId,
    },
    GetLampParameters {
        lamp_id: LampId,
    },
    GetLampVersion {
        lamp_id: LampId,
    },

    // Lamp groups
    GetAllLampGroupIDs,
    GetLampGroupName {
        id: LampGroupId,
        language: String,
    },
    SetLampGroupName {
        id: LampGroupId,
        name: String,
        language: String,
    },
    CreateLampGroup {
        name: String,
        language: String,
        group: LampGroup,
    },
    UpdateLampGroup {
        id: LampGroupId,
        group: LampGroup,
    },
    DeleteLampGroup {
        id: LampGroupId,
    },
    GetLampGroup {
        id: LampGroupId,
    },
    TransitionLampGroupState {
        id: LampGroupId,
        state: LampState,
        period: u32,
    },
    TransitionLampGroupStateField {
        id: LampGroupId,
        field: LampStateField,
        period: u32,
    },
    TransitionLampGroupStateToPreset {
        id: LampGroupId,
        preset_id: PresetId,
        period: u32,
    },
    PulseLampGroupWithState {
        id: LampGroupId,
        from_state: LampState,
        to_state: LampState,
        period: u32,
        duration: u32,
        num_pulses: u32,
    },
    PulseLampGroupWithPreset {
        id: LampGroupId,
        from_preset: PresetId,
        to_preset: PresetId,
        period: u32,
        duration: u32,
        num_pulses: u32,
    },
    ResetLampGroupState {
        id: LampGroupId,
    },
    ResetLampGroupStateField {
        id: LampGroupId,
        field: LampStateFieldName,
    },

    // Presets
    GetAllPresetIDs,
    GetPresetName {
        id: PresetId,
        language: String,
    },
    SetPresetName {
        id: PresetId,
        name: String,
        language: String,
    },
    CreatePreset {
        name: String,
        language: String,
        preset: Preset,
    },
    UpdatePreset {
        id: PresetId,
        preset: Preset,
    },
    DeletePreset {
        id: PresetId,
    },
    GetPreset {
        id: PresetId,
    },

    // Scenes
    GetAllSceneIDs,
    GetSceneName {
        id: SceneId,
        language: String,
    },
    SetSceneName {
        id: SceneId,
        name: String,
        language: String,
    },
    CreateScene {
        name: String,
        language: String,
        scene: Scene,
    },
    UpdateScene {
        id: SceneId,
        scene: Scene,
    },
    DeleteScene {
        id: SceneId,
    },
    GetScene {
        id: SceneId,
    },
    ApplyScene {
        ids: Vec<SceneId>,
    },

    // Master scenes
    GetAllMasterSceneIDs,
    GetMasterSceneName {
        id: MasterSceneId,
        language: String,
    },
    SetMasterSceneName {
        id: MasterSceneId,
        name: String,
        language: String,
    },
    CreateMasterScene {
        name: String,
        language: String,
        master_scene: MasterScene,
    },
    UpdateMasterScene {
        id: MasterSceneId,
        master_scene: MasterScene,
    },
    DeleteMasterScene {
        id: MasterSceneId,
    },
    GetMasterScene {
        id: MasterSceneId,
    },
    ApplyMasterScene {
        ids: Vec<MasterSceneId>,
    },

    // Controller service
    LightingResetControllerService,
    GetControllerServiceVersion,
    IsLeader,
}

/// Reply to one method call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodReply {
    pub code: ResponseCode,
    #[serde(default)]
    pub payload: Value,
}

impl MethodReply {
    pub fn ok(payload: Value) -> Self {
        Self {
            code: ResponseCode::Ok,
            payload,
        }
    }

    pub fn error(code: ResponseCode) -> Self {
        Self {
            code,
            payload: Value::Null,
        }
    }
}

fn reply<T: Serialize>(result: LsfResult<T>) -> MethodReply {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(payload) => MethodReply::ok(payload),
            Err(_) => MethodReply::error(ResponseCode::UnexpectedState),
        },
        Err(e) => {
            debug!("Rpc: Method failed: {}", e);
            MethodReply::error(e.code())
        }
    }
}

/// Aggregate calls reply with their reduced code and lamp counts
fn aggregate(result: LsfResult<AggregateReply>) -> MethodReply {
    match result {
        Ok(agg) => MethodReply {
            code: agg.code,
            payload: json!({
                "success_count": agg.counter.success_count,
                "fail_count": agg.counter.fail_count,
                "not_found_count": agg.counter.not_found_count,
            }),
        },
        Err(e) => MethodReply::error(e.code()),
    }
}

impl ControllerService {
    /// Run one client method
    pub async fn dispatch(&self, call: MethodCall) -> MethodReply {
        use MethodCall::*;

        match call {
            GetAllLampIDs => reply(Ok(self.lamps().get_all_ids())),
            GetLampName { lamp_id, language } => {
                reply(self.lamps().get_name(&lamp_id, &language).await)
            }
            SetLampName {
                lamp_id,
                name,
                language,
            } => reply(self.lamps().set_name(&lamp_id, &name, &language).await),
            GetLampState { lamp_id } => reply(self.lamps().get_state(&lamp_id).await),
            TransitionLampState {
                lamp_id,
                state,
                period,
            } => reply(self.lamps().transition_state(&lamp_id, state, period).await),
            TransitionLampStateField {
                lamp_id,
                field,
                period,
            } => reply(
                self.lamps()
                    .transition_state_field(&lamp_id, field, period)
                    .await,
            ),
            TransitionLampStateToPreset {
                lamp_id,
                preset_id,
                period,
            } => reply(
                self.lamps()
                    .transition_to_preset(&lamp_id, &preset_id, period)
                    .await,
            ),
            PulseLampWithState {
                lamp_id,
                from_state,
                to_state,
                period,
                duration,
                num_pulses,
            } => reply(
                self.lamps()
                    .pulse_with_state(&lamp_id, from_state, to_state, period, duration, num_pulses)
                    .await,
            ),
            PulseLampWithPreset {
                lamp_id,
                from_preset,
                to_preset,
                period,
                duration,
                num_pulses,
            } => reply(
                self.lamps()
                    .pulse_with_preset(&lamp_id, &from_preset, &to_preset, period, duration, num_pulses)
                    .await,
            ),
            ResetLampState { lamp_id } => reply(self.lamps().reset_state(&lamp_id).await),
            ResetLampStateField { lamp_id, field } => {
                reply(self.lamps().reset_state_field(&lamp_id, field).await)
            }
            GetLampFaults { lamp_id } => reply(self.lamps().get_faults(&lamp_id).await),
            ClearLampFault { lamp_id, code } => reply(self.lamps().clear_fault(&lamp_id, code).await),
            GetLampDetails { lamp_id } => reply(self.lamps().get_details(&lamp_id).await),
            GetLampParameters { lamp_id } => reply(self.lamps().get_parameters(&lamp_id).await),
            GetLampVersion { lamp_id } => reply(self.lamps().get_version(&lamp_id).await),

            GetAllLampGroupIDs => reply(self.lamp_groups().get_all_ids()),
            GetLampGroupName { id, language } => reply(self.lamp_groups().get_name(&id, &language)),
            SetLampGroupName { id, name, language } => {
                reply(self.lamp_groups().set_name(&id, &name, &language))
            }
            CreateLampGroup {
                name,
                language,
                group,
            } => reply(self.lamp_groups().create(&name, &language, group)),
            UpdateLampGroup { id, group } => reply(self.lamp_groups().update(&id, group)),
            DeleteLampGroup { id } => reply(self.lamp_groups().delete(&id)),
            GetLampGroup { id } => reply(self.lamp_groups().get(&id)),
            TransitionLampGroupState { id, state, period } => {
                aggregate(self.lamp_groups().transition_state(&id, state, period).await)
            }
            TransitionLampGroupStateField { id, field, period } => aggregate(
                self.lamp_groups()
                    .transition_state_field(&id, field, period)
                    .await,
            ),
            TransitionLampGroupStateToPreset {
                id,
                preset_id,
                period,
            } => aggregate(
                self.lamp_groups()
                    .transition_to_preset(&id, &preset_id, period)
                    .await,
            ),
            PulseLampGroupWithState {
                id,
                from_state,
                to_state,
                period,
                duration,
                num_pulses,
            } => aggregate(
                self.lamp_groups()
                    .pulse_with_state(&id, from_state, to_state, period, duration, num_pulses)
                    .await,
            ),
            PulseLampGroupWithPreset {
                id,
                from_preset,
                to_preset,
                period,
                duration,
                num_pulses,
            } => aggregate(
                self.lamp_groups()
                    .pulse_with_preset(&id, &from_preset, &to_preset, period, duration, num_pulses)
                    .await,
            ),
            ResetLampGroupState { id } => aggregate(self.lamp_groups().reset_state(&id).await),
            ResetLampGroupStateField { id, field } => {
                aggregate(self.lamp_groups().reset_state_field(&id, field).await)
            }

            GetAllPresetIDs => reply(self.presets().get_all_ids()),
            GetPresetName { id, language } => reply(self.presets().get_name(&id, &language)),
            SetPresetName { id, name, language } => reply(self.presets().set_name(&id, &name, &language)),
            CreatePreset {
                name,
                language,
                preset,
            } => reply(self.presets().create(&name, &language, preset)),
            UpdatePreset { id, preset } => reply(self.presets().update(&id, preset)),
            DeletePreset { id } => reply(self.presets().delete(&id)),
            GetPreset { id } => reply(self.presets().get(&id)),

            GetAllSceneIDs => reply(self.scenes().get_all_ids()),
            GetSceneName { id, language } => reply(self.scenes().get_name(&id, &language)),
            SetSceneName { id, name, language } => reply(self.scenes().set_name(&id, &name, &language)),
            CreateScene {
                name,
                language,
                scene,
            } => reply(self.scenes().create(&name, &language, scene)),
            UpdateScene { id, scene } => reply(self.scenes().update(&id, scene)),
            DeleteScene { id } => reply(self.scenes().delete(&id)),
            GetScene { id } => reply(self.scenes().get(&id)),
            ApplyScene { ids } => aggregate(self.scenes().apply(&ids).await),

            GetAllMasterSceneIDs => reply(self.master_scenes().get_all_ids()),
            GetMasterSceneName { id, language } => reply(self.master_scenes().get_name(&id, &language)),
            SetMasterSceneName { id, name, language } => {
                reply(self.master_scenes().set_name(&id, &name, &language))
            }
            CreateMasterScene {
                name,
                language,
                master_scene,
            } => reply(self.master_scenes().create(&name, &language, master_scene)),
            UpdateMasterScene { id, master_scene } => reply(self.master_scenes().update(&id, master_scene)),
            DeleteMasterScene { id } => reply(self.master_scenes().delete(&id)),
            GetMasterScene { id } => reply(self.master_scenes().get(&id)),
            ApplyMasterScene { ids } => aggregate(self.master_scenes().apply(&ids).await),

            LightingResetControllerService => reply(self.reset_controller_service()),
            GetControllerServiceVersion => reply(Ok(self.get_version())),
            IsLeader => reply(Ok(self.is_leader().await)),
        }
    }
}
