//! Configuration for a controller instance
//!
//! Everything a vendor would customise lives here and is passed explicitly
//! to the components at startup: rank inputs, default lamp state, limits,
//! timeouts and ports.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::LsfResult;
use crate::rank::{parse_mac, Availability, Mobility, NodeType, Power, Rank};
use crate::types::LampState;

/// Complete controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Node identity, used for discovery and peer messages
    pub node_id: String,

    /// Directory holding one blob file per entity type
    pub storage_dir: PathBuf,

    pub rank: RankConfig,
    pub limits: EntityLimits,
    pub fanout: FanoutConfig,
    pub election: ElectionConfig,

    /// State applied by the Reset* lamp operations
    pub default_lamp_state: LampState,

    /// UDP port for controller-to-controller messages
    pub controller_port: u16,
    /// UDP port for client method calls
    pub client_port: u16,
    /// UDP port the lamp link binds locally
    pub lamp_port: u16,
}

/// Inputs of the leader-election rank
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RankConfig {
    /// Device MAC address; a random one is drawn when absent
    pub mac: Option<String>,
    pub node_type: NodeType,
    pub power: Power,
    pub availability: Availability,
    pub mobility: Mobility,
}

/// Size limits of the entity tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityLimits {
    /// Maximum entities per table
    pub max_entities: usize,
    /// Maximum name length in characters
    pub max_name_len: usize,
    /// Serialized blob must stay strictly below this many bytes
    pub max_blob_len: usize,
}

/// Lamp fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Per-lamp method call timeout
    pub method_timeout_ms: u64,
    /// Aggregate calls that may wait in the queue
    pub queue_capacity: usize,
    /// Consecutive join failures before a lamp is blacklisted
    pub max_join_attempts: u32,
    /// First retry delay after a join failure
    pub retry_base_ms: u64,
    /// Cap of the exponential retry delay
    pub retry_max_ms: u64,
}

/// Leader election timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Interval of controller heartbeats
    pub announce_interval_ms: u64,
    /// Silence after which a peer counts as lost
    pub peer_timeout_ms: u64,
    /// How long to wait for the chosen leader to confirm
    pub candidate_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            node_id: "lsf-controller".to_string(),
            storage_dir: PathBuf::from("./lsf-data"),
            rank: RankConfig::default(),
            limits: EntityLimits::default(),
            fanout: FanoutConfig::default(),
            election: ElectionConfig::default(),
            default_lamp_state: LampState::new(true, 0, 0, 2700, 100),
            controller_port: 9970,
            client_port: 9971,
            lamp_port: 9972,
        }
    }
}

impl Default for EntityLimits {
    fn default() -> Self {
        Self {
            max_entities: 100,
            max_name_len: 64,
            max_blob_len: 127 * 1024,
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            method_timeout_ms: 5000,
            queue_capacity: 200,
            max_join_attempts: 3,
            retry_base_ms: 1000,
            retry_max_ms: 60_000,
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            announce_interval_ms: 1000,
            peer_timeout_ms: 5000,
            candidate_timeout_ms: 3000,
        }
    }
}

impl FanoutConfig {
    pub fn method_timeout(&self) -> Duration {
        Duration::from_millis(self.method_timeout_ms)
    }

    /// Delay before the next join attempt after `failures` consecutive failures
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        let ms = self.retry_base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(ms.min(self.retry_max_ms))
    }
}

impl ElectionConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }
}

impl RankConfig {
    /// Compute this controller's rank
    pub fn rank(&self) -> LsfResult<Rank> {
        let mac = match &self.mac {
            Some(mac) => parse_mac(mac)?,
            None => {
                use rand::Rng;
                let mac = rand::thread_rng().gen::<u64>() & 0xffff_ffff_ffff;
                warn!("Config: No MAC address configured, using random {:012x}", mac);
                mac
            }
        };

        Ok(Rank::compute(
            mac,
            self.node_type,
            self.power,
            self.availability,
            self.mobility,
        ))
    }
}

impl ControllerConfig {
    /// Create config with basic parameters
    pub fn new(node_id: impl Into<String>, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_id: node_id.into(),
            storage_dir: storage_dir.into(),
            ..Default::default()
        }
    }

    /// Load a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> LsfResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}
