//! Line-oriented text format of entity blobs
//!
//! One line per entity:
//!
//! ```text
//! <Keyword> <id> "<name>" <payload tokens...> End<Keyword>
//! ```
//!
//! Tokens are whitespace separated. A token containing whitespace, quotes
//! or backslashes is written double-quoted with `\"` and `\\` escapes.
//! Names are always quoted. Id lists are count-prefixed.
//!
//! Two reserved ids replace the whole line: `<Keyword> Reset` (the table
//! is empty; clears entries read before it) and `<Keyword> InitialState`
//! (synthetic first-boot blob).

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{LsfError, LsfResult};
use crate::types::{
    BlobType, LampGroup, LampState, MasterScene, PulseWithPreset, PulseWithState, Scene,
    TransitionToPreset, TransitionToState,
};

pub const RESET_ID: &str = "Reset";
pub const INITIAL_STATE_ID: &str = "InitialState";

/// Checksum of a serialized blob: leading 32 bits of its SHA-256 digest
pub fn checksum(data: &[u8]) -> u32 {
    let digest = Sha256::digest(data);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Name and payload of one stored entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedEntity<T> {
    pub name: String,
    pub payload: T,
}

impl<T> NamedEntity<T> {
    pub fn new(name: impl Into<String>, payload: T) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Entity payload that can be written to and read from a blob
pub trait BlobEntity: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    const KEYWORD: &'static str;
    const END_KEYWORD: &'static str;
    const ID_PREFIX: &'static str;
    const BLOB_TYPE: BlobType;

    fn write_payload(&self, w: &mut BlobWriter);
    fn read_payload(r: &mut TokenReader<'_>) -> LsfResult<Self>;
}

/// Decoded content of a blob
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlob<T> {
    pub entries: BTreeMap<String, NamedEntity<T>>,
    pub initial_state: bool,
}

/// Serialize a whole map
pub fn encode<T: BlobEntity>(
    entries: &BTreeMap<String, NamedEntity<T>>,
    initial_state: bool,
) -> String {
    if initial_state {
        return format!("{} {}\n", T::KEYWORD, INITIAL_STATE_ID);
    }
    if entries.is_empty() {
        return format!("{} {}\n", T::KEYWORD, RESET_ID);
    }

    let mut out = String::new();
    for (id, entity) in entries {
        out.push_str(&encode_entry(id, entity));
    }
    out
}

/// Serialize a single entity line, including the trailing newline
pub fn encode_entry<T: BlobEntity>(id: &str, entity: &NamedEntity<T>) -> String {
    let mut w = BlobWriter::new();
    w.word(T::KEYWORD);
    w.word(id);
    w.quoted(&entity.name);
    entity.payload.write_payload(&mut w);
    w.word(T::END_KEYWORD);
    w.finish_line()
}

/// Parse a serialized map
pub fn decode<T: BlobEntity>(data: &str) -> LsfResult<DecodedBlob<T>> {
    let mut r = TokenReader::new(data);
    let mut entries = BTreeMap::new();
    let mut initial_state = false;

    while let Some(keyword) = r.next_token()? {
        if keyword != T::KEYWORD {
            return Err(LsfError::Malformed(format!(
                "expected {} but found {:?}",
                T::KEYWORD,
                keyword
            )));
        }

        let id = r.expect_token("id")?;
        if id == RESET_ID {
            entries.clear();
            initial_state = false;
            continue;
        }
        if id == INITIAL_STATE_ID {
            initial_state = true;
            continue;
        }

        let name = r.expect_token("name")?;
        let payload = T::read_payload(&mut r)?;
        r.expect_keyword(T::END_KEYWORD)?;
        entries.insert(id, NamedEntity { name, payload });
    }

    Ok(DecodedBlob {
        entries,
        initial_state,
    })
}

/// Token writer for one blob line
#[derive(Debug, Default)]
pub struct BlobWriter {
    out: String,
}

impl BlobWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn separator(&mut self) {
        if !self.out.is_empty() {
            self.out.push(' ');
        }
    }

    /// Bare token, quoted when it would not survive tokenization
    pub fn word(&mut self, token: &str) {
        let needs_quotes = token.is_empty()
            || token
                .chars()
                .any(|c| c.is_whitespace() || c == '"' || c == '\\');
        if needs_quotes {
            self.quoted(token);
        } else {
            self.separator();
            self.out.push_str(token);
        }
    }

    pub fn quoted(&mut self, text: &str) {
        self.separator();
        self.out.push('"');
        for c in text.chars() {
            if c == '"' || c == '\\' {
                self.out.push('\\');
            }
            self.out.push(c);
        }
        self.out.push('"');
    }

    pub fn number(&mut self, value: u32) {
        self.separator();
        self.out.push_str(&value.to_string());
    }

    pub fn flag(&mut self, value: bool) {
        self.number(value as u32);
    }

    pub fn ids(&mut self, ids: &[String]) {
        self.number(ids.len() as u32);
        for id in ids {
            self.word(id);
        }
    }

    pub fn state(&mut self, state: &LampState) {
        self.flag(state.null_state);
        self.flag(state.on_off);
        self.number(state.hue);
        self.number(state.saturation);
        self.number(state.color_temp);
        self.number(state.brightness);
    }

    fn finish_line(mut self) -> String {
        self.out.push('\n');
        self.out
    }
}

/// Tokenizer over blob text
pub struct TokenReader<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> TokenReader<'a> {
    pub fn new(data: &'a str) -> Self {
        Self {
            chars: data.chars().peekable(),
        }
    }

    /// Next token, or `None` at end of input
    pub fn next_token(&mut self) -> LsfResult<Option<String>> {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }

        let first = match self.chars.next() {
            Some(c) => c,
            None => return Ok(None),
        };

        let mut token = String::new();
        if first == '"' {
            loop {
                match self.chars.next() {
                    Some('"') => break,
                    Some('\\') => match self.chars.next() {
                        Some(escaped) => token.push(escaped),
                        None => return Err(LsfError::Malformed("dangling escape".into())),
                    },
                    Some(c) => token.push(c),
                    None => return Err(LsfError::Malformed("unterminated quote".into())),
                }
            }
        } else {
            token.push(first);
            while let Some(&c) = self.chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                self.chars.next();
            }
        }

        Ok(Some(token))
    }

    pub fn expect_token(&mut self, what: &str) -> LsfResult<String> {
        self.next_token()?
            .ok_or_else(|| LsfError::Malformed(format!("unexpected end of blob, expected {}", what)))
    }

    pub fn expect_keyword(&mut self, keyword: &str) -> LsfResult<()> {
        let token = self.expect_token(keyword)?;
        if token == keyword {
            Ok(())
        } else {
            Err(LsfError::Malformed(format!(
                "expected {} but found {:?}",
                keyword, token
            )))
        }
    }

    pub fn number(&mut self) -> LsfResult<u32> {
        let token = self.expect_token("number")?;
        token
            .parse()
            .map_err(|_| LsfError::Malformed(format!("{:?} is not a number", token)))
    }

    pub fn flag(&mut self) -> LsfResult<bool> {
        match self.number()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(LsfError::Malformed(format!("{} is not a flag", other))),
        }
    }

    pub fn ids(&mut self) -> LsfResult<Vec<String>> {
        let count = self.number()? as usize;
        (0..count).map(|_| self.expect_token("id")).collect()
    }

    pub fn state(&mut self) -> LsfResult<LampState> {
        Ok(LampState {
            null_state: self.flag()?,
            on_off: self.flag()?,
            hue: self.number()?,
            saturation: self.number()?,
            color_temp: self.number()?,
            brightness: self.number()?,
        })
    }

    /// Section header `<keyword> <count>`
    fn section(&mut self, keyword: &str) -> LsfResult<usize> {
        self.expect_keyword(keyword)?;
        Ok(self.number()? as usize)
    }
}

impl BlobEntity for LampGroup {
    const KEYWORD: &'static str = "LampGroup";
    const END_KEYWORD: &'static str = "EndLampGroup";
    const ID_PREFIX: &'static str = "LAMP_GROUP";
    const BLOB_TYPE: BlobType = BlobType::LampGroup;

    fn write_payload(&self, w: &mut BlobWriter) {
        w.ids(&self.lamps);
        w.ids(&self.lamp_groups);
    }

    fn read_payload(r: &mut TokenReader<'_>) -> LsfResult<Self> {
        Ok(LampGroup {
            lamps: r.ids()?,
            lamp_groups: r.ids()?,
        })
    }
}

impl BlobEntity for LampState {
    const KEYWORD: &'static str = "Preset";
    const END_KEYWORD: &'static str = "EndPreset";
    const ID_PREFIX: &'static str = "PRESET";
    const BLOB_TYPE: BlobType = BlobType::Preset;

    fn write_payload(&self, w: &mut BlobWriter) {
        w.state(self);
    }

    fn read_payload(r: &mut TokenReader<'_>) -> LsfResult<Self> {
        r.state()
    }
}

impl BlobEntity for MasterScene {
    const KEYWORD: &'static str = "MasterScene";
    const END_KEYWORD: &'static str = "EndMasterScene";
    const ID_PREFIX: &'static str = "MASTER_SCENE";
    const BLOB_TYPE: BlobType = BlobType::MasterScene;

    fn write_payload(&self, w: &mut BlobWriter) {
        w.ids(&self.scenes);
    }

    fn read_payload(r: &mut TokenReader<'_>) -> LsfResult<Self> {
        Ok(MasterScene { scenes: r.ids()? })
    }
}

const TO_STATE: &str = "TransitionToState";
const TO_PRESET: &str = "TransitionToPreset";
const PULSE_STATE: &str = "PulseWithState";
const PULSE_PRESET: &str = "PulseWithPreset";

impl BlobEntity for Scene {
    const KEYWORD: &'static str = "Scene";
    const END_KEYWORD: &'static str = "EndScene";
    const ID_PREFIX: &'static str = "SCENE";
    const BLOB_TYPE: BlobType = BlobType::Scene;

    fn write_payload(&self, w: &mut BlobWriter) {
        w.word(TO_STATE);
        w.number(self.transition_to_state.len() as u32);
        for c in &self.transition_to_state {
            w.ids(&c.lamps);
            w.ids(&c.lamp_groups);
            w.state(&c.state);
            w.number(c.transition_period);
        }

        w.word(TO_PRESET);
        w.number(self.transition_to_preset.len() as u32);
        for c in &self.transition_to_preset {
            w.ids(&c.lamps);
            w.ids(&c.lamp_groups);
            w.word(&c.preset);
            w.number(c.transition_period);
        }

        w.word(PULSE_STATE);
        w.number(self.pulse_with_state.len() as u32);
        for c in &self.pulse_with_state {
            w.ids(&c.lamps);
            w.ids(&c.lamp_groups);
            w.state(&c.from_state);
            w.state(&c.to_state);
            w.number(c.period);
            w.number(c.duration);
            w.number(c.num_pulses);
        }

        w.word(PULSE_PRESET);
        w.number(self.pulse_with_preset.len() as u32);
        for c in &self.pulse_with_preset {
            w.ids(&c.lamps);
            w.ids(&c.lamp_groups);
            w.word(&c.from_preset);
            w.word(&c.to_preset);
            w.number(c.period);
            w.number(c.duration);
            w.number(c.num_pulses);
        }
    }

    fn read_payload(r: &mut TokenReader<'_>) -> LsfResult<Self> {
        let mut scene = Scene::default();

        for _ in 0..r.section(TO_STATE)? {
            scene.transition_to_state.push(TransitionToState {
                lamps: r.ids()?,
                lamp_groups: r.ids()?,
                state: r.state()?,
                transition_period: r.number()?,
            });
        }

        for _ in 0..r.section(TO_PRESET)? {
            scene.transition_to_preset.push(TransitionToPreset {
                lamps: r.ids()?,
                lamp_groups: r.ids()?,
                preset: r.expect_token("preset")?,
                transition_period: r.number()?,
            });
        }

        for _ in 0..r.section(PULSE_STATE)? {
            scene.pulse_with_state.push(PulseWithState {
                lamps: r.ids()?,
                lamp_groups: r.ids()?,
                from_state: r.state()?,
                to_state: r.state()?,
                period: r.number()?,
                duration: r.number()?,
                num_pulses: r.number()?,
            });
        }

        for _ in 0..r.section(PULSE_PRESET)? {
            scene.pulse_with_preset.push(PulseWithPreset {
                lamps: r.ids()?,
                lamp_groups: r.ids()?,
                from_preset: r.expect_token("preset")?,
                to_preset: r.expect_token("preset")?,
                period: r.number()?,
                duration: r.number()?,
                num_pulses: r.number()?,
            });
        }

        Ok(scene)
    }
}
