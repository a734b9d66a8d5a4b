//! Controller rank used to elect a unique leader
//!
//! A rank is a 128-bit value. The lower 64 bits hold the device MAC
//! address, which makes ranks globally unique. The higher 64 bits encode
//! how suitable the device is to lead, from least to most significant:
//!
//! ```text
//! bits  0..8   controller service version
//! bits  8..10  node type
//! bits 10..12  power source
//! bits 12..16  daily availability
//! bits 16..19  mobility
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{LsfError, LsfResult};
use crate::types::CONTROLLER_SERVICE_VERSION;

/// How likely the device is to move out of range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mobility {
    #[default]
    Unknown = 0,
    HighMobility = 1,
    IntermediateMobility = 2,
    LowMobility = 3,
    AlwaysStationary = 4,
}

/// Expected hours per day the device is available, in 3-hour buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Availability {
    #[default]
    Unknown = 0,
    ZeroToThree = 1,
    ThreeToSix = 2,
    SixToNine = 3,
    NineToTwelve = 4,
    TwelveToFifteen = 5,
    FifteenToEighteen = 6,
    EighteenToTwentyOne = 7,
    TwentyOneToTwentyFour = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Power {
    #[default]
    Unknown = 0,
    BatteryNotChargeable = 1,
    BatteryChargeable = 2,
    AlwaysAcPowered = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeType {
    #[default]
    Unknown = 0,
    Wireless = 1,
    Wired = 2,
    AccessPoint = 3,
}

/// Orderable priority token. Comparison is on `higher`, then `lower`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Rank {
    pub higher: u64,
    pub lower: u64,
}

impl Rank {
    pub fn new(higher: u64, lower: u64) -> Self {
        Self { higher, lower }
    }

    /// Compute the rank from the device's characteristics
    pub fn compute(
        mac: u64,
        node_type: NodeType,
        power: Power,
        availability: Availability,
        mobility: Mobility,
    ) -> Self {
        let higher = (CONTROLLER_SERVICE_VERSION as u64 & 0xff)
            | ((node_type as u64) << 8)
            | ((power as u64) << 10)
            | ((availability as u64) << 12)
            | ((mobility as u64) << 16);

        Self {
            higher,
            lower: mac & 0xffff_ffff_ffff,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.higher != 0 || self.lower != 0
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.higher, self.lower)
    }
}

impl std::str::FromStr for Rank {
    type Err = LsfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(LsfError::InvalidArgs(format!("rank {:?} is not 32 hex chars", s)));
        }
        let parse = |part: &str| {
            u64::from_str_radix(part, 16)
                .map_err(|_| LsfError::InvalidArgs(format!("rank {:?} is not hex", s)))
        };
        Ok(Rank {
            higher: parse(&s[..16])?,
            lower: parse(&s[16..])?,
        })
    }
}

/// Parse a colon- or dash-separated MAC address into its 48-bit value
pub fn parse_mac(mac: &str) -> LsfResult<u64> {
    let octets: Vec<&str> = mac.split(|c| c == ':' || c == '-').collect();
    if octets.len() != 6 {
        return Err(LsfError::InvalidArgs(format!("bad MAC address {:?}", mac)));
    }

    octets.iter().try_fold(0u64, |acc, octet| {
        u8::from_str_radix(octet, 16)
            .map(|b| (acc << 8) | b as u64)
            .map_err(|_| LsfError::InvalidArgs(format!("bad MAC address {:?}", mac)))
    })
}
