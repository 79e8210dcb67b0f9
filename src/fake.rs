//! In-memory implementations of the OS capabilities.
//!
//! They record every call so tests (and UI shells under development) can
//! drive the controller without touching real displays or keyboards.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Instant,
};

use crate::{
    error::{Error, Result},
    event_handler::{HookAction, KeyInput, KeySink},
    hotkey::{Key, SEPARATOR},
    keyboard_hook::KeyHookProvider,
    lock,
    output_mode::{OutputMode, OutputModeSwitcher},
    overlay::{DismissHandle, Overlay, OverlayManager},
    topology::{DisplaySurface, TopologyProvider},
};

type Script = Box<dyn Fn(usize) -> Vec<DisplaySurface> + Send + Sync>;

/// Topology whose snapshots follow a script indexed by call number (from 1).
pub struct FakeTopology {
    script: Mutex<Script>,
    calls: Mutex<Vec<Instant>>,
    external: AtomicBool,
}

impl FakeTopology {
    pub fn scripted<F>(script: F) -> Self
    where
        F: Fn(usize) -> Vec<DisplaySurface> + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(Box::new(script)),
            calls: Mutex::new(Vec::new()),
            external: AtomicBool::new(false),
        }
    }

    pub fn fixed(surfaces: Vec<DisplaySurface>) -> Self {
        Self::scripted(move |_| surfaces.clone())
    }

    /// Reports only `primary` until call `n`, then `primary` and `secondary`.
    pub fn secondary_from_call(
        n: usize,
        primary: DisplaySurface,
        secondary: DisplaySurface,
    ) -> Self {
        Self::scripted(move |call| {
            if call >= n {
                vec![primary, secondary]
            } else {
                vec![primary]
            }
        })
    }

    /// Replaces the script with a fixed answer.
    pub fn set(&self, surfaces: Vec<DisplaySurface>) {
        *lock(&self.script) = Box::new(move |_| surfaces.clone());
    }

    pub fn set_external_output(&self, connected: bool) {
        self.external.store(connected, Ordering::SeqCst);
    }

    /// Number of snapshots taken so far.
    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }

    /// When each snapshot was taken.
    pub fn call_times(&self) -> Vec<Instant> {
        lock(&self.calls).clone()
    }
}

impl TopologyProvider for FakeTopology {
    fn snapshot(&self) -> Vec<DisplaySurface> {
        let call = {
            let mut calls = lock(&self.calls);
            calls.push(Instant::now());
            calls.len()
        };
        let script = lock(&self.script);
        (*script)(call)
    }

    fn has_external_output(&self) -> bool {
        self.external.load(Ordering::SeqCst)
    }
}

/// Output mode switcher that records the requested modes.
#[derive(Debug, Default)]
pub struct FakeSwitcher {
    calls: Mutex<Vec<OutputMode>>,
    fail: bool,
}

impl FakeSwitcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A switcher whose dispatch always fails (the call is still recorded).
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<OutputMode> {
        lock(&self.calls).clone()
    }
}

impl OutputModeSwitcher for FakeSwitcher {
    fn switch_to(&self, mode: OutputMode) -> Result<()> {
        lock(&self.calls).push(mode);
        if self.fail {
            return Err(Error::ModeSwitchDispatchFailed(io::Error::new(
                io::ErrorKind::NotFound,
                "fake switcher",
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
struct OverlayBook {
    next_id: u64,
    live: Vec<(u64, DisplaySurface, DismissHandle)>,
    mounted: usize,
}

/// Overlay manager tracking which overlays are currently mounted.
#[derive(Default)]
pub struct FakeOverlays {
    book: Arc<Mutex<OverlayBook>>,
    failures: AtomicUsize,
}

impl FakeOverlays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` mounts fail.
    pub fn fail_next_mounts(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Surfaces of the overlays currently mounted, oldest first.
    pub fn live(&self) -> Vec<DisplaySurface> {
        lock(&self.book).live.iter().map(|(_, s, _)| *s).collect()
    }

    /// Number of successful mounts so far.
    pub fn mounted(&self) -> usize {
        lock(&self.book).mounted
    }

    /// Simulates the user pressing Escape on the newest overlay.
    ///
    /// Returns `false` if no overlay is mounted.
    pub fn dismiss_locally(&self) -> bool {
        let entry = lock(&self.book).live.pop();
        match entry {
            Some((_, _, on_dismiss)) => {
                on_dismiss.notify();
                true
            }
            None => false,
        }
    }
}

impl OverlayManager for FakeOverlays {
    fn mount(
        &self,
        surface: &DisplaySurface,
        on_dismiss: DismissHandle,
    ) -> Result<Box<dyn Overlay>> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::OverlayMountFailed(io::Error::other(
                "fake window creation failure",
            )));
        }

        let mut book = lock(&self.book);
        book.next_id += 1;
        book.mounted += 1;
        let id = book.next_id;
        book.live.push((id, *surface, on_dismiss));

        Ok(Box::new(FakeOverlay {
            id,
            surface: *surface,
            book: self.book.clone(),
        }))
    }
}

struct FakeOverlay {
    id: u64,
    surface: DisplaySurface,
    book: Arc<Mutex<OverlayBook>>,
}

impl Overlay for FakeOverlay {
    fn surface(&self) -> DisplaySurface {
        self.surface
    }

    fn is_mounted(&self) -> bool {
        lock(&self.book).live.iter().any(|(id, _, _)| *id == self.id)
    }

    fn dismiss(self: Box<Self>) {
        lock(&self.book).live.retain(|(id, _, _)| *id != self.id);
    }
}

/// Keyboard hook driven by the test instead of the OS.
#[derive(Default)]
pub struct FakeKeyHook {
    sink: Option<Arc<dyn KeySink>>,
    refuse_install: bool,
}

impl FakeKeyHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hook whose installation fails, like a hook the OS rejects.
    pub fn refusing() -> Self {
        Self {
            sink: None,
            refuse_install: true,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.sink.is_some()
    }

    /// Delivers one event. Returns `None` if no hook is installed.
    pub fn send(&self, input: KeyInput) -> Option<HookAction> {
        self.sink.as_ref().map(|sink| sink.on_key(&input))
    }

    /// Presses the keys of `combo` in order, then releases them in reverse.
    ///
    /// Returns the verdict for every event, presses first.
    pub fn press(&self, combo: &str) -> Vec<HookAction> {
        let keys: Vec<Key> = combo
            .split(SEPARATOR)
            .filter(|k| !k.trim().is_empty())
            .map(Key::from_name)
            .collect();

        let downs = keys.iter().cloned().map(KeyInput::down);
        let ups = keys.iter().rev().cloned().map(KeyInput::up);
        downs.chain(ups).filter_map(|input| self.send(input)).collect()
    }
}

impl KeyHookProvider for FakeKeyHook {
    fn install(&mut self, sink: Arc<dyn KeySink>) -> Result<()> {
        if self.refuse_install {
            return Err(Error::HookRegistrationFailed(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "fake hook refused",
            )));
        }
        self.sink = Some(sink);
        Ok(())
    }

    fn uninstall(&mut self) {
        self.sink = None;
    }
}
