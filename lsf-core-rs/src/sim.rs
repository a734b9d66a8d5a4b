//! In-memory lamp firmware simulator
//!
//! Used by the tests and by the node's `--sim-lamps` mode. Lamps can be
//! switched offline, made to fail calls or joins, and calls can be held
//! until released so tests control reply ordering.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{LsfError, LsfResult, ResponseCode};
use crate::lamp::{
    LampDetails, LampEndpoint, LampLink, LampParameters, LampReply, LampRequest, SessionId,
};
use crate::types::{LampId, LampState, LampStateField};

const SIM_VERSION: u32 = 1;

#[derive(Debug, Clone)]
struct SimLamp {
    name: String,
    state: LampState,
    faults: Vec<u32>,
    online: bool,
    fail_with: Option<ResponseCode>,
    join_failures_left: u32,
}

struct HeldCall {
    lamp_id: LampId,
    release: oneshot::Sender<()>,
}

#[derive(Default)]
struct SimInner {
    lamps: HashMap<LampId, SimLamp>,
    next_session: SessionId,
    hold: bool,
    held: Vec<HeldCall>,
    calls: Vec<(LampId, LampRequest)>,
}

/// Simulated lamp fleet implementing [`LampLink`]
#[derive(Default)]
pub struct SimLampLink {
    inner: Mutex<SimInner>,
}

impl SimLampLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an online lamp and return its endpoint
    pub fn add_lamp(&self, lamp_id: &str, name: &str) -> LampEndpoint {
        self.inner.lock().lamps.insert(
            lamp_id.to_string(),
            SimLamp {
                name: name.to_string(),
                state: LampState::default(),
                faults: Vec::new(),
                online: true,
                fail_with: None,
                join_failures_left: 0,
            },
        );
        LampEndpoint::new(lamp_id, format!("sim://{}", lamp_id))
    }

    pub fn set_online(&self, lamp_id: &str, online: bool) {
        if let Some(lamp) = self.inner.lock().lamps.get_mut(lamp_id) {
            lamp.online = online;
        }
    }

    /// Make every call to the lamp answer with `code`
    pub fn fail_with(&self, lamp_id: &str, code: Option<ResponseCode>) {
        if let Some(lamp) = self.inner.lock().lamps.get_mut(lamp_id) {
            lamp.fail_with = code;
        }
    }

    /// Reject the next `count` joins of the lamp
    pub fn fail_joins(&self, lamp_id: &str, count: u32) {
        if let Some(lamp) = self.inner.lock().lamps.get_mut(lamp_id) {
            lamp.join_failures_left = count;
        }
    }

    pub fn add_fault(&self, lamp_id: &str, code: u32) {
        if let Some(lamp) = self.inner.lock().lamps.get_mut(lamp_id) {
            lamp.faults.push(code);
        }
    }

    /// Park calls until released
    pub fn set_hold(&self, hold: bool) {
        self.inner.lock().hold = hold;
    }

    pub fn held_count(&self) -> usize {
        self.inner.lock().held.len()
    }

    /// Wait until at least `count` calls are parked
    pub async fn wait_held(&self, count: usize) {
        while self.held_count() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Let the parked call for `lamp_id` proceed
    pub fn release(&self, lamp_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.held.iter().position(|h| h.lamp_id == lamp_id) {
            Some(index) => {
                let held = inner.held.remove(index);
                let _ = held.release.send(());
                true
            }
            None => false,
        }
    }

    pub fn release_all(&self) {
        let held: Vec<HeldCall> = std::mem::take(&mut self.inner.lock().held);
        for h in held {
            let _ = h.release.send(());
        }
    }

    /// Every call processed so far, in order
    pub fn calls(&self) -> Vec<(LampId, LampRequest)> {
        self.inner.lock().calls.clone()
    }

    pub fn state(&self, lamp_id: &str) -> Option<LampState> {
        self.inner.lock().lamps.get(lamp_id).map(|l| l.state)
    }

    pub fn name(&self, lamp_id: &str) -> Option<String> {
        self.inner.lock().lamps.get(lamp_id).map(|l| l.name.clone())
    }

    fn execute(lamp: &mut SimLamp, request: LampRequest) -> LsfResult<LampReply> {
        if let Some(code) = lamp.fail_with {
            return Err(LsfError::Lamp(code));
        }

        match request {
            LampRequest::GetState => Ok(LampReply::State(lamp.state)),
            LampRequest::GetName { .. } => Ok(LampReply::Name(lamp.name.clone())),
            LampRequest::SetName { name, .. } => {
                lamp.name = name;
                Ok(LampReply::Ack)
            }
            LampRequest::TransitionState { state, .. } => {
                if !state.null_state {
                    lamp.state = state;
                }
                Ok(LampReply::Ack)
            }
            LampRequest::TransitionStateField { field, .. } => {
                match field {
                    LampStateField::OnOff(v) => lamp.state.on_off = v,
                    LampStateField::Hue(v) => lamp.state.hue = v,
                    LampStateField::Saturation(v) => lamp.state.saturation = v,
                    LampStateField::Brightness(v) => lamp.state.brightness = v,
                    LampStateField::ColorTemp(v) => lamp.state.color_temp = v,
                }
                Ok(LampReply::Ack)
            }
            LampRequest::Pulse { .. } => Ok(LampReply::Ack),
            LampRequest::GetDetails => Ok(LampReply::Details(LampDetails {
                make: "Sim".to_string(),
                model: "SimLamp".to_string(),
                lamp_type: "A19".to_string(),
                base_type: "E26".to_string(),
                dimmable: true,
                color: true,
                variable_color_temp: true,
                min_temperature: 2700,
                max_temperature: 6500,
                max_lumens: 800,
                wattage: 9,
            })),
            LampRequest::GetParameters => Ok(LampReply::Parameters(LampParameters {
                energy_usage_milliwatts: if lamp.state.on_off { 9000 } else { 0 },
                lumens: if lamp.state.on_off { 8 * lamp.state.brightness } else { 0 },
            })),
            LampRequest::GetFaults => Ok(LampReply::Faults(lamp.faults.clone())),
            LampRequest::ClearFault { code } => {
                let before = lamp.faults.len();
                lamp.faults.retain(|f| *f != code);
                if lamp.faults.len() == before {
                    return Err(LsfError::Lamp(ResponseCode::InvalidArgs));
                }
                Ok(LampReply::Ack)
            }
            LampRequest::GetVersion => Ok(LampReply::Version(SIM_VERSION)),
        }
    }
}

#[async_trait]
impl LampLink for SimLampLink {
    async fn join(&self, endpoint: &LampEndpoint) -> LsfResult<SessionId> {
        let mut inner = self.inner.lock();
        let lamp = inner
            .lamps
            .get_mut(&endpoint.lamp_id)
            .ok_or_else(|| LsfError::NotFound(endpoint.lamp_id.clone()))?;

        if !lamp.online {
            return Err(LsfError::Timeout);
        }
        if lamp.join_failures_left > 0 {
            lamp.join_failures_left -= 1;
            return Err(LsfError::Lamp(ResponseCode::Rejected));
        }

        inner.next_session += 1;
        Ok(inner.next_session)
    }

    async fn call(
        &self,
        endpoint: &LampEndpoint,
        _session: SessionId,
        request: LampRequest,
    ) -> LsfResult<LampReply> {
        let held = {
            let mut inner = self.inner.lock();
            if inner.hold {
                let (tx, rx) = oneshot::channel();
                inner.held.push(HeldCall {
                    lamp_id: endpoint.lamp_id.clone(),
                    release: tx,
                });
                Some(rx)
            } else {
                None
            }
        };
        if let Some(rx) = held {
            rx.await.map_err(|_| LsfError::SessionLost)?;
        }

        let mut inner = self.inner.lock();
        inner.calls.push((endpoint.lamp_id.clone(), request.clone()));
        let lamp = inner
            .lamps
            .get_mut(&endpoint.lamp_id)
            .ok_or_else(|| LsfError::NotFound(endpoint.lamp_id.clone()))?;
        if !lamp.online {
            return Err(LsfError::Timeout);
        }

        debug!("Sim: {} <- {:?}", endpoint.lamp_id, request);
        Self::execute(lamp, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_failures_then_success() {
        let sim = SimLampLink::new();
        let endpoint = sim.add_lamp("l1", "Desk");
        sim.fail_joins("l1", 2);

        assert!(sim.join(&endpoint).await.is_err());
        assert!(sim.join(&endpoint).await.is_err());
        assert!(sim.join(&endpoint).await.is_ok());
    }

    #[tokio::test]
    async fn test_transition_and_fault_clearing() -> LsfResult<()> {
        let sim = SimLampLink::new();
        let endpoint = sim.add_lamp("l1", "Desk");
        let session = sim.join(&endpoint).await?;

        let state = LampState::new(true, 1, 2, 3000, 50);
        sim.call(&endpoint, session, LampRequest::TransitionState { state, period: 0 })
            .await?;
        assert_eq!(sim.state("l1"), Some(state));

        sim.add_fault("l1", 7);
        sim.call(&endpoint, session, LampRequest::ClearFault { code: 7 }).await?;
        let again = sim
            .call(&endpoint, session, LampRequest::ClearFault { code: 7 })
            .await;
        assert!(matches!(again, Err(LsfError::Lamp(ResponseCode::InvalidArgs))));
        Ok(())
    }
}
