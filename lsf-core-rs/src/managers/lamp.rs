//! Lamps: per-lamp queries and state changes, each an aggregate of one

use std::sync::Arc;

use super::{check_language, validate_name};
use crate::config::EntityLimits;
use crate::error::{LsfError, LsfResult};
use crate::fanout::LampClients;
use crate::lamp::{LampDetails, LampParameters, LampReply, LampRequest};
use crate::notify::{EventKind, Notification, NotificationHub};
use crate::store::VersionedStore;
use crate::types::{EntityKind, LampId, LampState, LampStateField, LampStateFieldName, LANGUAGE_EN};

pub struct LampManager {
    lamps: LampClients,
    presets: Arc<VersionedStore<LampState>>,
    limits: EntityLimits,
    default_state: LampState,
    notifications: NotificationHub,
}

fn unexpected(reply: LampReply) -> LsfError {
    LsfError::UnexpectedState(format!("unexpected lamp reply {:?}", reply))
}

impl LampManager {
    pub fn new(
        lamps: LampClients,
        presets: Arc<VersionedStore<LampState>>,
        limits: EntityLimits,
        default_state: LampState,
        notifications: NotificationHub,
    ) -> Self {
        Self {
            lamps,
            presets,
            limits,
            default_state,
            notifications,
        }
    }

    pub fn get_all_ids(&self) -> Vec<LampId> {
        self.lamps.lamp_ids()
    }

    pub async fn get_name(&self, lamp_id: &str, language: &str) -> LsfResult<String> {
        check_language(language)?;
        let request = LampRequest::GetName {
            language: language.to_string(),
        };
        match self.lamps.call_lamp(lamp_id, request).await? {
            LampReply::Name(name) => Ok(name),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set_name(&self, lamp_id: &str, name: &str, language: &str) -> LsfResult<()> {
        validate_name(name, language, &self.limits)?;
        let request = LampRequest::SetName {
            name: name.to_string(),
            language: LANGUAGE_EN.to_string(),
        };
        self.lamps.call_lamp(lamp_id, request).await?;
        self.notifications.emit(Notification::new(
            EntityKind::Lamp,
            EventKind::NameChanged,
            vec![lamp_id.to_string()],
        ));
        Ok(())
    }

    pub async fn get_state(&self, lamp_id: &str) -> LsfResult<LampState> {
        match self.lamps.call_lamp(lamp_id, LampRequest::GetState).await? {
            LampReply::State(state) => Ok(state),
            other => Err(unexpected(other)),
        }
    }

    async fn change(&self, lamp_id: &str, request: LampRequest) -> LsfResult<()> {
        self.lamps.call_lamp(lamp_id, request).await?;
        self.notifications.emit(Notification::new(
            EntityKind::Lamp,
            EventKind::StateChanged,
            vec![lamp_id.to_string()],
        ));
        Ok(())
    }

    fn preset_state(&self, preset_id: &str) -> LsfResult<LampState> {
        self.presets
            .get(preset_id)
            .map(|preset| preset.payload)
            .map_err(|_| LsfError::InvalidArgs(format!("preset {} does not exist", preset_id)))
    }

    pub async fn transition_state(&self, lamp_id: &str, state: LampState, period: u32) -> LsfResult<()> {
        self.change(lamp_id, LampRequest::TransitionState { state, period })
            .await
    }

    pub async fn transition_state_field(
        &self,
        lamp_id: &str,
        field: LampStateField,
        period: u32,
    ) -> LsfResult<()> {
        self.change(lamp_id, LampRequest::TransitionStateField { field, period })
            .await
    }

    pub async fn transition_to_preset(&self, lamp_id: &str, preset_id: &str, period: u32) -> LsfResult<()> {
        let state = self.preset_state(preset_id)?;
        self.transition_state(lamp_id, state, period).await
    }

    pub async fn pulse_with_state(
        &self,
        lamp_id: &str,
        from_state: LampState,
        to_state: LampState,
        period: u32,
        duration: u32,
        num_pulses: u32,
    ) -> LsfResult<()> {
        let request = LampRequest::Pulse {
            from_state,
            to_state,
            period,
            duration,
            num_pulses,
        };
        self.change(lamp_id, request).await
    }

    pub async fn pulse_with_preset(
        &self,
        lamp_id: &str,
        from_preset: &str,
        to_preset: &str,
        period: u32,
        duration: u32,
        num_pulses: u32,
    ) -> LsfResult<()> {
        let from_state = self.preset_state(from_preset)?;
        let to_state = self.preset_state(to_preset)?;
        self.pulse_with_state(lamp_id, from_state, to_state, period, duration, num_pulses)
            .await
    }

    /// Transition to the configured default state
    pub async fn reset_state(&self, lamp_id: &str) -> LsfResult<()> {
        self.transition_state(lamp_id, self.default_state, 0).await
    }

    pub async fn reset_state_field(&self, lamp_id: &str, field: LampStateFieldName) -> LsfResult<()> {
        self.transition_state_field(lamp_id, self.default_state.field(field), 0)
            .await
    }

    pub async fn get_faults(&self, lamp_id: &str) -> LsfResult<Vec<u32>> {
        match self.lamps.call_lamp(lamp_id, LampRequest::GetFaults).await? {
            LampReply::Faults(faults) => Ok(faults),
            other => Err(unexpected(other)),
        }
    }

    pub async fn clear_fault(&self, lamp_id: &str, code: u32) -> LsfResult<()> {
        self.lamps
            .call_lamp(lamp_id, LampRequest::ClearFault { code })
            .await?;
        Ok(())
    }

    pub async fn get_details(&self, lamp_id: &str) -> LsfResult<LampDetails> {
        match self.lamps.call_lamp(lamp_id, LampRequest::GetDetails).await? {
            LampReply::Details(details) => Ok(details),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_parameters(&self, lamp_id: &str) -> LsfResult<LampParameters> {
        match self.lamps.call_lamp(lamp_id, LampRequest::GetParameters).await? {
            LampReply::Parameters(parameters) => Ok(parameters),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_version(&self, lamp_id: &str) -> LsfResult<u32> {
        match self.lamps.call_lamp(lamp_id, LampRequest::GetVersion).await? {
            LampReply::Version(version) => Ok(version),
            other => Err(unexpected(other)),
        }
    }
}
