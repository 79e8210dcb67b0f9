//! Matching keyboard events against registered hotkeys.
//!
//! [`HotkeyListener`] is the OS-independent half of the global hotkey
//! listener. A [`KeyHookProvider`](crate::keyboard_hook::KeyHookProvider)
//! feeds it every key event through [`KeySink::on_key`] and obeys the
//! returned [`HookAction`]: a key that completes a registered combo is
//! suppressed so it never reaches the focused application, and the combo's
//! callback runs on a dedicated dispatcher thread rather than on the hook
//! thread.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, mpsc},
    thread,
};

use crate::{
    error::{Error, Result},
    hotkey::{HotkeyCombo, Key, Modifier},
    lock,
};

/// Represents the state of a key: pressed or released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Down,
    Up,
}

/// A single key event, already translated from the OS representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    pub key: Key,
    pub state: KeyState,
}

impl KeyInput {
    pub fn down(key: Key) -> Self {
        Self {
            key,
            state: KeyState::Down,
        }
    }

    pub fn up(key: Key) -> Self {
        Self {
            key,
            state: KeyState::Up,
        }
    }
}

/// What the hook should do with the event it just reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Let the event continue to other applications.
    Pass,
    /// Swallow the event.
    Suppress,
}

/// Receiver of raw key events from a hook.
///
/// Called on the hook's own thread, which must not be held up: implementations
/// decide quickly and push any real work elsewhere.
pub trait KeySink: Send + Sync {
    fn on_key(&self, input: &KeyInput) -> HookAction;
}

/// A callback invoked when its combo is pressed.
pub type HotkeyCallback = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Debug, Default)]
struct KeyTracker {
    modifiers: BTreeSet<Modifier>,
    named: HashSet<String>,
    // Keys whose press was swallowed; their repeats and release are swallowed too.
    suppressed: HashSet<Key>,
}

impl KeyTracker {
    /// Updates the pressed set and returns the combo the event completes, if
    /// this is a fresh (non-repeat) press.
    fn update(&mut self, input: &KeyInput) -> Option<(BTreeSet<Modifier>, Option<String>)> {
        match (&input.key, input.state) {
            (Key::Modifier(m), KeyState::Down) => {
                self.modifiers
                    .insert(*m)
                    .then(|| (self.modifiers.clone(), None))
            }
            (Key::Modifier(m), KeyState::Up) => {
                self.modifiers.remove(m);
                None
            }
            (Key::Named(name), KeyState::Down) => self
                .named
                .insert(name.clone())
                .then(|| (self.modifiers.clone(), Some(name.clone()))),
            (Key::Named(name), KeyState::Up) => {
                self.named.remove(name);
                None
            }
        }
    }
}

/// Process-wide hotkey registry with suppression.
pub struct HotkeyListener {
    registry: Mutex<HashMap<HotkeyCombo, HotkeyCallback>>,
    tracker: Mutex<KeyTracker>,
    dispatch: mpsc::Sender<HotkeyCallback>,
}

impl fmt::Debug for HotkeyListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotkeyListener")
            .field("registered", &self.registered())
            .finish_non_exhaustive()
    }
}

impl HotkeyListener {
    /// Creates a listener and spawns its dispatcher thread.
    ///
    /// The dispatcher runs matched callbacks one at a time and exits once the
    /// listener is dropped.
    pub fn start() -> (Arc<HotkeyListener>, thread::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<HotkeyCallback>();

        let handle = thread::spawn(move || {
            #[cfg(feature = "log")]
            log::debug!("started hotkey dispatcher");

            for callback in rx {
                callback();
            }
        });

        let listener = Arc::new(HotkeyListener {
            registry: Mutex::new(HashMap::new()),
            tracker: Mutex::new(KeyTracker::default()),
            dispatch: tx,
        });
        (listener, handle)
    }

    /// Registers `callback` for `combo`, replacing any callback already
    /// registered for the same combo. A [`HotkeyCombo`] is never empty, so
    /// this cannot register an empty combination.
    pub fn register(&self, combo: HotkeyCombo, callback: HotkeyCallback) -> Result<()> {
        let _previous = lock(&self.registry).insert(combo.clone(), callback);

        #[cfg(feature = "log")]
        if _previous.is_some() {
            log::info!("re-registered hotkey `{}`", combo);
        } else {
            log::info!("registered hotkey `{}`", combo);
        }
        Ok(())
    }

    /// Removes the registration for `combo`. Returns `false`, and does nothing
    /// else, if it was not registered.
    pub fn unregister(&self, combo: &HotkeyCombo) -> bool {
        let removed = lock(&self.registry).remove(combo).is_some();

        #[cfg(feature = "log")]
        if removed {
            log::info!("unregistered hotkey `{}`", combo);
        }
        removed
    }

    /// Swaps `old` for `new` in one step, so there is no moment where neither
    /// is active.
    ///
    /// Fails, leaving `old` registered, if `new` already belongs to another
    /// registration.
    pub fn replace(
        &self,
        old: &HotkeyCombo,
        new: HotkeyCombo,
        callback: HotkeyCallback,
    ) -> Result<()> {
        let mut registry = lock(&self.registry);
        if &new != old && registry.contains_key(&new) {
            return Err(Error::HotkeyRegistrationFailed {
                combo: new,
                reason: "already registered".to_string(),
            });
        }
        registry.remove(old);

        #[cfg(feature = "log")]
        log::info!("replaced hotkey `{}` with `{}`", old, new);

        registry.insert(new, callback);
        Ok(())
    }

    pub fn is_registered(&self, combo: &HotkeyCombo) -> bool {
        lock(&self.registry).contains_key(combo)
    }

    /// Registered combos in canonical string order.
    pub fn registered(&self) -> Vec<HotkeyCombo> {
        let mut combos: Vec<_> = lock(&self.registry).keys().cloned().collect();
        combos.sort_by_cached_key(|c| c.to_string());
        combos
    }
}

impl KeySink for HotkeyListener {
    fn on_key(&self, input: &KeyInput) -> HookAction {
        let mut tracker = lock(&self.tracker);

        let Some((modifiers, named)) = tracker.update(input) else {
            // Repeats and releases of a swallowed key stay swallowed.
            if tracker.suppressed.contains(&input.key) {
                if input.state == KeyState::Up {
                    tracker.suppressed.remove(&input.key);
                }
                return HookAction::Suppress;
            }
            return HookAction::Pass;
        };

        let callback = lock(&self.registry)
            .iter()
            .find(|(combo, _)| combo.matches(&modifiers, named.as_deref()))
            .map(|(_combo, callback)| {
                #[cfg(feature = "log")]
                log::debug!("hotkey `{}` pressed", _combo);
                callback.clone()
            });

        match callback {
            Some(callback) => {
                tracker.suppressed.insert(input.key.clone());
                if self.dispatch.send(callback).is_err() {
                    #[cfg(feature = "log")]
                    log::error!("hotkey dispatcher is gone");
                }
                HookAction::Suppress
            }
            None => HookAction::Pass,
        }
    }
}
