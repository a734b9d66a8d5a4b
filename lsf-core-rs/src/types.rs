//! Core types for the lighting controller

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a controller node
pub type NodeId = String;
pub type LampId = String;
pub type LampGroupId = String;
pub type PresetId = String;
pub type SceneId = String;
pub type MasterSceneId = String;

/// The only name language the controller stores
pub const LANGUAGE_EN: &str = "en";

/// Controller service interface version reported to clients
pub const CONTROLLER_SERVICE_VERSION: u32 = 2;

/// Kind of entity a manager owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Lamp,
    LampGroup,
    Preset,
    Scene,
    MasterScene,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Lamp => "Lamp",
            EntityKind::LampGroup => "LampGroup",
            EntityKind::Preset => "Preset",
            EntityKind::Scene => "Scene",
            EntityKind::MasterScene => "MasterScene",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Blob types replicated between controllers, in persistence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlobType {
    Preset,
    LampGroup,
    Scene,
    MasterScene,
}

impl BlobType {
    pub const ALL: [BlobType; 4] = [
        BlobType::Preset,
        BlobType::LampGroup,
        BlobType::Scene,
        BlobType::MasterScene,
    ];

    /// File name used for this blob inside the storage directory
    pub fn file_name(&self) -> &'static str {
        match self {
            BlobType::Preset => "PresetData.lsf",
            BlobType::LampGroup => "LampGroupData.lsf",
            BlobType::Scene => "SceneData.lsf",
            BlobType::MasterScene => "MasterSceneData.lsf",
        }
    }

    pub fn entity(&self) -> EntityKind {
        match self {
            BlobType::Preset => EntityKind::Preset,
            BlobType::LampGroup => EntityKind::LampGroup,
            BlobType::Scene => EntityKind::Scene,
            BlobType::MasterScene => EntityKind::MasterScene,
        }
    }
}

impl std::fmt::Display for BlobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.entity().name())
    }
}

/// Generate an entity id: prefix followed by 8 random hex chars
pub fn generate_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &hex[..8])
}

/// Full state of a lamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LampState {
    pub on_off: bool,
    pub hue: u32,
    pub saturation: u32,
    pub color_temp: u32,
    pub brightness: u32,
    /// When set, the lamp keeps its current state (used as pulse origin)
    pub null_state: bool,
}

impl LampState {
    pub fn new(on_off: bool, hue: u32, saturation: u32, color_temp: u32, brightness: u32) -> Self {
        Self {
            on_off,
            hue,
            saturation,
            color_temp,
            brightness,
            null_state: false,
        }
    }

    /// Value of a single field of this state
    pub fn field(&self, name: LampStateFieldName) -> LampStateField {
        match name {
            LampStateFieldName::OnOff => LampStateField::OnOff(self.on_off),
            LampStateFieldName::Hue => LampStateField::Hue(self.hue),
            LampStateFieldName::Saturation => LampStateField::Saturation(self.saturation),
            LampStateFieldName::Brightness => LampStateField::Brightness(self.brightness),
            LampStateFieldName::ColorTemp => LampStateField::ColorTemp(self.color_temp),
        }
    }
}

/// A single field of a lamp state with its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value")]
pub enum LampStateField {
    OnOff(bool),
    Hue(u32),
    Saturation(u32),
    Brightness(u32),
    ColorTemp(u32),
}

/// Name of a lamp state field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LampStateFieldName {
    OnOff,
    Hue,
    Saturation,
    Brightness,
    ColorTemp,
}

impl std::str::FromStr for LampStateFieldName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OnOff" => Ok(LampStateFieldName::OnOff),
            "Hue" => Ok(LampStateFieldName::Hue),
            "Saturation" => Ok(LampStateFieldName::Saturation),
            "Brightness" => Ok(LampStateFieldName::Brightness),
            "ColorTemp" => Ok(LampStateFieldName::ColorTemp),
            _ => Err(()),
        }
    }
}

/// Lamps plus (possibly nested) lamp groups
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LampGroup {
    pub lamps: Vec<LampId>,
    pub lamp_groups: Vec<LampGroupId>,
}

impl LampGroup {
    pub fn new(lamps: Vec<LampId>, lamp_groups: Vec<LampGroupId>) -> Self {
        Self { lamps, lamp_groups }
    }

    pub fn is_dependent_on_lamp_group(&self, id: &str) -> bool {
        self.lamp_groups.iter().any(|g| g == id)
    }
}

/// A named lamp state
pub type Preset = LampState;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransitionToState {
    pub lamps: Vec<LampId>,
    pub lamp_groups: Vec<LampGroupId>,
    pub state: LampState,
    pub transition_period: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransitionToPreset {
    pub lamps: Vec<LampId>,
    pub lamp_groups: Vec<LampGroupId>,
    pub preset: PresetId,
    pub transition_period: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PulseWithState {
    pub lamps: Vec<LampId>,
    pub lamp_groups: Vec<LampGroupId>,
    pub from_state: LampState,
    pub to_state: LampState,
    pub period: u32,
    pub duration: u32,
    pub num_pulses: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PulseWithPreset {
    pub lamps: Vec<LampId>,
    pub lamp_groups: Vec<LampGroupId>,
    pub from_preset: PresetId,
    pub to_preset: PresetId,
    pub period: u32,
    pub duration: u32,
    pub num_pulses: u32,
}

/// A scene: four lists of state-transition and pulse components
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scene {
    pub transition_to_state: Vec<TransitionToState>,
    pub transition_to_preset: Vec<TransitionToPreset>,
    pub pulse_with_state: Vec<PulseWithState>,
    pub pulse_with_preset: Vec<PulseWithPreset>,
}

impl Scene {
    pub fn is_dependent_on_preset(&self, id: &str) -> bool {
        self.transition_to_preset.iter().any(|c| c.preset == id)
            || self
                .pulse_with_preset
                .iter()
                .any(|c| c.from_preset == id || c.to_preset == id)
    }

    pub fn is_dependent_on_lamp_group(&self, id: &str) -> bool {
        let uses = |groups: &Vec<LampGroupId>| groups.iter().any(|g| g == id);
        self.transition_to_state.iter().any(|c| uses(&c.lamp_groups))
            || self.transition_to_preset.iter().any(|c| uses(&c.lamp_groups))
            || self.pulse_with_state.iter().any(|c| uses(&c.lamp_groups))
            || self.pulse_with_preset.iter().any(|c| uses(&c.lamp_groups))
    }

    /// Every lamp group referenced by any component
    pub fn lamp_groups(&self) -> impl Iterator<Item = &LampGroupId> {
        self.transition_to_state
            .iter()
            .flat_map(|c| c.lamp_groups.iter())
            .chain(self.transition_to_preset.iter().flat_map(|c| c.lamp_groups.iter()))
            .chain(self.pulse_with_state.iter().flat_map(|c| c.lamp_groups.iter()))
            .chain(self.pulse_with_preset.iter().flat_map(|c| c.lamp_groups.iter()))
    }

    /// Every preset referenced by any component
    pub fn presets(&self) -> impl Iterator<Item = &PresetId> {
        self.transition_to_preset
            .iter()
            .map(|c| &c.preset)
            .chain(
                self.pulse_with_preset
                    .iter()
                    .flat_map(|c| [&c.from_preset, &c.to_preset]),
            )
    }

    pub fn is_empty(&self) -> bool {
        self.transition_to_state.is_empty()
            && self.transition_to_preset.is_empty()
            && self.pulse_with_state.is_empty()
            && self.pulse_with_preset.is_empty()
    }
}

/// An ordered list of scenes applied together
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MasterScene {
    pub scenes: Vec<SceneId>,
}

impl MasterScene {
    pub fn new(scenes: Vec<SceneId>) -> Self {
        Self { scenes }
    }

    pub fn is_dependent_on_scene(&self, id: &str) -> bool {
        self.scenes.iter().any(|s| s == id)
    }
}
