//! Hotkey combinations and their canonical form.
//!
//! A combo is a set of modifiers plus at most one other key. Its canonical
//! serialization lists the modifiers alphabetically, then the key, joined
//! with `+` (e.g. `ctrl+shift+b`). Registration and persistence always go
//! through [`normalize`] so that equal combos have equal strings.

use std::{
    collections::BTreeSet,
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

pub const SEPARATOR: char = '+';

/// A modifier key. Variants are declared in alphabetical order so that the
/// derived ordering is the canonical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Modifier {
    Alt,
    Ctrl,
    Shift,
}

impl Modifier {
    pub fn name(self) -> &'static str {
        match self {
            Modifier::Alt => "alt",
            Modifier::Ctrl => "ctrl",
            Modifier::Shift => "shift",
        }
    }

    fn from_name(name: &str) -> Option<Modifier> {
        let modifier = match name {
            "alt" | "menu" | "left alt" | "right alt" | "lalt" | "ralt" | "alt gr" | "altgr" => {
                Modifier::Alt
            }
            "ctrl" | "control" | "left ctrl" | "right ctrl" | "lctrl" | "rctrl"
            | "left control" | "right control" => Modifier::Ctrl,
            "shift" | "left shift" | "right shift" | "lshift" | "rshift" => Modifier::Shift,
            _ => return None,
        };
        Some(modifier)
    }
}

/// A physical key as seen by the hotkey layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Modifier(Modifier),
    /// Any other key, by canonical lowercase name.
    Named(String),
}

impl Key {
    /// Maps a key name, in any case and with any alias, to its canonical key.
    pub fn from_name(name: &str) -> Key {
        let name = name.trim().to_lowercase();
        match Modifier::from_name(&name) {
            Some(modifier) => Key::Modifier(modifier),
            None => Key::Named(canonical_key_name(name)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Key::Modifier(m) => m.name(),
            Key::Named(name) => name,
        }
    }
}

// Every alias maps to a name that is not itself an alias.
fn canonical_key_name(name: String) -> String {
    let canonical = match name.as_str() {
        "escape" => "esc",
        "return" => "enter",
        "win" | "left windows" | "right windows" | "lwin" | "rwin" | "super" => "windows",
        "del" => "delete",
        "ins" => "insert",
        "pgup" | "prior" => "page up",
        "pgdn" | "next" => "page down",
        "spacebar" => "space",
        "back" => "backspace",
        _ => return name,
    };
    canonical.to_string()
}

/// A normalized hotkey combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HotkeyCombo {
    modifiers: BTreeSet<Modifier>,
    key: Option<String>,
}

impl HotkeyCombo {
    /// Builds a combo from already-pressed keys.
    ///
    /// Fails if no key is given or more than one non-modifier key is present.
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a Key>) -> Result<HotkeyCombo> {
        let mut modifiers = BTreeSet::new();
        let mut key: Option<String> = None;
        for k in keys {
            match k {
                Key::Modifier(m) => {
                    modifiers.insert(*m);
                }
                Key::Named(name) => match &key {
                    Some(existing) if existing != name => {
                        return Err(invalid(
                            &join_names(&modifiers, Some(existing), Some(name)),
                            "more than one non-modifier key",
                        ));
                    }
                    _ => key = Some(name.clone()),
                },
            }
        }

        if modifiers.is_empty() && key.is_none() {
            return Err(invalid("", "empty combination"));
        }
        Ok(HotkeyCombo { modifiers, key })
    }

    pub fn modifiers(&self) -> &BTreeSet<Modifier> {
        &self.modifiers
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Returns `true` if exactly `modifiers` are held and `key` is the trigger.
    pub fn matches(&self, modifiers: &BTreeSet<Modifier>, key: Option<&str>) -> bool {
        &self.modifiers == modifiers && self.key.as_deref() == key
    }
}

fn invalid(raw: &str, reason: &'static str) -> Error {
    Error::InvalidCombo {
        raw: raw.to_string(),
        reason,
    }
}

fn join_names(modifiers: &BTreeSet<Modifier>, a: Option<&str>, b: Option<&str>) -> String {
    let mut names: Vec<&str> = modifiers.iter().map(|m| m.name()).collect();
    names.extend(a);
    names.extend(b);
    names.join("+")
}

/// Parses a raw combo such as `Shift + Ctrl + B` into its canonical form.
///
/// Pure and idempotent: `normalize(&normalize(x)?.to_string())` equals
/// `normalize(x)`.
pub fn normalize(raw: &str) -> Result<HotkeyCombo> {
    let keys: Vec<Key> = raw
        .split(SEPARATOR)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(Key::from_name)
        .collect();

    HotkeyCombo::from_keys(&keys).map_err(|e| match e {
        Error::InvalidCombo { reason, .. } => invalid(raw, reason),
        other => other,
    })
}

impl FromStr for HotkeyCombo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        normalize(s)
    }
}

impl Display for HotkeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", join_names(&self.modifiers, self.key.as_deref(), None))
    }
}

impl Serialize for HotkeyCombo {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HotkeyCombo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        normalize(&raw).map_err(serde::de::Error::custom)
    }
}

/// Which of the two bindings a combo belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Block,
    Unblock,
}

impl BindingKind {
    pub fn other(self) -> BindingKind {
        match self {
            BindingKind::Block => BindingKind::Unblock,
            BindingKind::Unblock => BindingKind::Block,
        }
    }
}

impl Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BindingKind::Block => "block",
            BindingKind::Unblock => "unblock",
        };
        write!(f, "{}", s)
    }
}

/// The block and unblock hotkeys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeyBindings {
    pub block: HotkeyCombo,
    pub unblock: HotkeyCombo,
}

impl HotkeyBindings {
    pub const DEFAULT_BLOCK: &'static str = "ctrl+shift+b";
    pub const DEFAULT_UNBLOCK: &'static str = "ctrl+shift+u";

    pub fn get(&self, kind: BindingKind) -> &HotkeyCombo {
        match kind {
            BindingKind::Block => &self.block,
            BindingKind::Unblock => &self.unblock,
        }
    }

    pub fn set(&mut self, kind: BindingKind, combo: HotkeyCombo) {
        match kind {
            BindingKind::Block => self.block = combo,
            BindingKind::Unblock => self.unblock = combo,
        }
    }

    pub(crate) fn default_for(kind: BindingKind) -> HotkeyCombo {
        let raw = match kind {
            BindingKind::Block => Self::DEFAULT_BLOCK,
            BindingKind::Unblock => Self::DEFAULT_UNBLOCK,
        };
        HotkeyCombo {
            modifiers: BTreeSet::from([Modifier::Ctrl, Modifier::Shift]),
            key: raw.rsplit(SEPARATOR).next().map(str::to_string),
        }
    }
}

impl Default for HotkeyBindings {
    fn default() -> Self {
        Self {
            block: Self::default_for(BindingKind::Block),
            unblock: Self::default_for(BindingKind::Unblock),
        }
    }
}

/// Accumulates the keys pressed while the user is choosing a new hotkey.
#[derive(Debug, Default, Clone)]
pub struct ComboRecorder {
    pressed: Vec<Key>,
}

impl ComboRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: Key) {
        if !self.pressed.contains(&key) {
            self.pressed.push(key);
        }
    }

    pub fn clear(&mut self) {
        self.pressed.clear();
    }

    /// Live preview of the capture, e.g. `CTRL+SHIFT+B`.
    pub fn preview(&self) -> String {
        match self.combo() {
            Some(combo) => combo.to_string().to_uppercase(),
            None => self
                .pressed
                .iter()
                .map(Key::name)
                .collect::<Vec<_>>()
                .join("+")
                .to_uppercase(),
        }
    }

    /// The captured combo, or `None` if nothing usable was pressed.
    pub fn combo(&self) -> Option<HotkeyCombo> {
        HotkeyCombo::from_keys(&self.pressed).ok()
    }
}
