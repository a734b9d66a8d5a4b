//! Lamp-facing RPC surface
//!
//! The controller talks to lamp firmware through a [`LampLink`]. The UDP
//! implementation lives in `lamp_link`, the in-memory simulator in `sim`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LsfResult;
use crate::types::{LampId, LampState, LampStateField};

/// Session handle returned by a successful join
pub type SessionId = u64;

/// Where a lamp can be reached
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LampEndpoint {
    pub lamp_id: LampId,
    /// Transport address, e.g. `192.168.1.20:9972`
    pub address: String,
}

impl LampEndpoint {
    pub fn new(lamp_id: impl Into<LampId>, address: impl Into<String>) -> Self {
        Self {
            lamp_id: lamp_id.into(),
            address: address.into(),
        }
    }
}

/// Single lamp method call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum LampRequest {
    GetState,
    GetName {
        language: String,
    },
    SetName {
        name: String,
        language: String,
    },
    TransitionState {
        state: LampState,
        period: u32,
    },
    TransitionStateField {
        field: LampStateField,
        period: u32,
    },
    Pulse {
        from_state: LampState,
        to_state: LampState,
        period: u32,
        duration: u32,
        num_pulses: u32,
    },
    GetDetails,
    GetParameters,
    GetFaults,
    ClearFault {
        code: u32,
    },
    GetVersion,
}

/// Static lamp capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LampDetails {
    pub make: String,
    pub model: String,
    pub lamp_type: String,
    pub base_type: String,
    pub dimmable: bool,
    pub color: bool,
    pub variable_color_temp: bool,
    pub min_temperature: u32,
    pub max_temperature: u32,
    pub max_lumens: u32,
    pub wattage: u32,
}

/// Live lamp measurements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LampParameters {
    pub energy_usage_milliwatts: u32,
    pub lumens: u32,
}

/// Successful reply to a lamp method call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum LampReply {
    Ack,
    State(LampState),
    Name(String),
    Details(LampDetails),
    Parameters(LampParameters),
    Faults(Vec<u32>),
    Version(u32),
}

/// Connection to lamp firmware.
///
/// Errors follow the crate convention: a lamp that answers with a non-Ok
/// code yields `LsfError::Lamp(code)`, silence yields `LsfError::Timeout`.
#[async_trait]
pub trait LampLink: Send + Sync {
    async fn join(&self, endpoint: &LampEndpoint) -> LsfResult<SessionId>;

    async fn call(
        &self,
        endpoint: &LampEndpoint,
        session: SessionId,
        request: LampRequest,
    ) -> LsfResult<LampReply>;

    /// Release a session; best effort
    async fn leave(&self, _endpoint: &LampEndpoint, _session: SessionId) {}
}
