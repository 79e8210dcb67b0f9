//! The display-block controller.
//!
//! [`Controller`] owns the [`Blocker`] and the hotkey bindings. Hotkeys, the
//! overlay's local dismiss and the UI shell all talk to it through
//! [`ControlEvent`]s, which a single worker thread drains in order; that
//! worker is the only writer of the block state, so block and unblock never
//! interleave. Observers get [`StateChange`]s over channels and apply them on
//! their own thread.

use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
};

use crate::{
    binding_store::BindingStore,
    blocker::{BlockOutcome, Blocker, Config, Phase},
    error::{Error, Result},
    event_handler::{HotkeyCallback, HotkeyListener},
    hotkey::{BindingKind, HotkeyBindings, HotkeyCombo, normalize},
    lock,
    output_mode::{OutputMode, OutputModeSwitcher},
    overlay::{DismissHandle, OverlayManager},
    topology::{DisplayStatus, DisplaySurface, TopologyProvider, describe_surfaces},
};

/// Requests handled by the controller worker, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    BlockRequested,
    UnblockRequested,
    RebindRequested { kind: BindingKind, combo: String },
    Shutdown,
}

/// Notifications sent to subscribers after the controller changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Blocked(DisplaySurface),
    BlockFailed,
    Unblocked,
    BindingsChanged(HotkeyBindings),
    RebindRejected { kind: BindingKind, reason: String },
}

/// The OS capabilities a controller drives.
pub struct Parts {
    pub topology: Arc<dyn TopologyProvider>,
    pub switcher: Arc<dyn OutputModeSwitcher>,
    pub overlays: Arc<dyn OverlayManager>,
    pub listener: Arc<HotkeyListener>,
    pub store: BindingStore,
}

struct Inner {
    blocker: Blocker,
    listener: Arc<HotkeyListener>,
    store: BindingStore,
    bindings: Mutex<HotkeyBindings>,
    events: mpsc::Sender<ControlEvent>,
    observers: Mutex<Vec<mpsc::Sender<StateChange>>>,
}

pub struct Controller {
    inner: Arc<Inner>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Controller {
    /// Loads the bindings, registers both hotkeys and starts the worker.
    ///
    /// A hotkey that cannot be registered is logged and left unbound; the
    /// controller still starts.
    pub fn start(parts: Parts, config: Config) -> Controller {
        let (tx, rx) = mpsc::channel::<ControlEvent>();

        let on_dismiss = {
            let tx = tx.clone();
            DismissHandle::new(move || {
                let _ = tx.send(ControlEvent::UnblockRequested);
            })
        };
        let blocker = Blocker::new(parts.topology, parts.switcher, parts.overlays, config)
            .set_on_dismiss(on_dismiss);

        let bindings = parts.store.load();
        let inner = Arc::new(Inner {
            blocker,
            listener: parts.listener,
            store: parts.store,
            bindings: Mutex::new(bindings.clone()),
            events: tx,
            observers: Mutex::new(Vec::new()),
        });

        for kind in [BindingKind::Block, BindingKind::Unblock] {
            let combo = bindings.get(kind).clone();
            if let Err(_e) = inner.listener.register(combo, inner.callback_for(kind)) {
                #[cfg(feature = "log")]
                log::error!("{}", _e);
            }
        }

        #[cfg(feature = "log")]
        log::info!(
            "hotkeys: block `{}`, unblock `{}`",
            bindings.block,
            bindings.unblock
        );

        let worker = {
            let inner = inner.clone();
            thread::spawn(move || inner.run(rx))
        };

        Controller {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queues a block. Returns immediately; the outcome arrives as a
    /// [`StateChange`].
    pub fn block(&self) -> Result<()> {
        self.send(ControlEvent::BlockRequested)
    }

    /// Queues an unblock. Harmless when nothing is blocked.
    pub fn unblock(&self) -> Result<()> {
        self.send(ControlEvent::UnblockRequested)
    }

    pub fn send(&self, event: ControlEvent) -> Result<()> {
        self.inner
            .events
            .send(event)
            .map_err(|_| Error::ControllerStopped)
    }

    /// Subscribes to state changes from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<StateChange> {
        let (tx, rx) = mpsc::channel();
        lock(&self.inner.observers).push(tx);
        rx
    }

    /// Changes one binding and persists the pair.
    ///
    /// The new combo is normalized, swapped in for the old one in a single
    /// listener step, then saved. A combo that is invalid or already used by
    /// the other binding is rejected and the old binding stays active. A save
    /// failure is only logged: the in-memory binding stays authoritative for
    /// this session.
    pub fn rebind(&self, kind: BindingKind, raw: &str) -> Result<HotkeyCombo> {
        self.inner.rebind(kind, raw)
    }

    pub fn current_bindings(&self) -> HotkeyBindings {
        lock(&self.inner.bindings).clone()
    }

    pub fn current_mode(&self) -> OutputMode {
        self.inner.blocker.current_mode()
    }

    pub fn phase(&self) -> Phase {
        self.inner.blocker.phase()
    }

    pub fn is_blocked(&self) -> bool {
        self.inner.blocker.is_blocked()
    }

    /// Home view summary of the current topology.
    pub fn status(&self) -> DisplayStatus {
        DisplayStatus::read(self.inner.blocker.topology())
    }

    /// Display management view: one line per attached surface.
    pub fn surfaces(&self) -> Vec<String> {
        describe_surfaces(&self.inner.blocker.topology().snapshot())
    }

    /// Removes both hotkeys, stops the worker after the events already
    /// queued, then unblocks so a forced extend switch is reverted.
    pub fn shutdown(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };

        let bindings = self.current_bindings();
        self.inner.listener.unregister(&bindings.block);
        self.inner.listener.unregister(&bindings.unblock);

        let _ = self.inner.events.send(ControlEvent::Shutdown);
        let _ = worker.join();

        if self.inner.blocker.unblock() {
            self.inner.notify(StateChange::Unblocked);
        }

        #[cfg(feature = "log")]
        log::info!("controller stopped");
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn run(&self, rx: mpsc::Receiver<ControlEvent>) {
        #[cfg(feature = "log")]
        log::debug!("started controller worker");

        for event in rx {
            #[cfg(feature = "log")]
            log::debug!("handling {:?}", event);

            match event {
                ControlEvent::BlockRequested => match self.blocker.block() {
                    BlockOutcome::Blocked(surface) => self.notify(StateChange::Blocked(surface)),
                    BlockOutcome::NoSecondary => self.notify(StateChange::BlockFailed),
                },
                ControlEvent::UnblockRequested => {
                    if self.blocker.unblock() {
                        self.notify(StateChange::Unblocked);
                    }
                }
                ControlEvent::RebindRequested { kind, combo } => {
                    if let Err(e) = self.rebind(kind, &combo) {
                        self.notify(StateChange::RebindRejected {
                            kind,
                            reason: e.to_string(),
                        });
                    }
                }
                ControlEvent::Shutdown => break,
            }
        }
    }

    fn rebind(&self, kind: BindingKind, raw: &str) -> Result<HotkeyCombo> {
        let combo = normalize(raw)?;
        let mut bindings = lock(&self.bindings);

        let old = bindings.get(kind).clone();
        if combo == old {
            return Ok(combo);
        }
        if bindings.get(kind.other()) == &combo {
            return Err(Error::HotkeyRegistrationFailed {
                combo,
                reason: format!("already the {} hotkey", kind.other()),
            });
        }

        self.listener
            .replace(&old, combo.clone(), self.callback_for(kind))?;
        bindings.set(kind, combo.clone());

        if let Err(_e) = self.store.save(&bindings) {
            #[cfg(feature = "log")]
            log::error!("{}; keeping the new hotkey for this session only", _e);
        }

        #[cfg(feature = "log")]
        log::info!("{} hotkey is now `{}`", kind, combo);

        let snapshot = bindings.clone();
        drop(bindings);
        self.notify(StateChange::BindingsChanged(snapshot));
        Ok(combo)
    }

    fn callback_for(&self, kind: BindingKind) -> HotkeyCallback {
        let tx = self.events.clone();
        let event = match kind {
            BindingKind::Block => ControlEvent::BlockRequested,
            BindingKind::Unblock => ControlEvent::UnblockRequested,
        };
        Arc::new(move || {
            let _ = tx.send(event.clone());
        })
    }

    fn notify(&self, change: StateChange) {
        lock(&self.observers).retain(|tx| tx.send(change.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        event_handler::HookAction,
        fake::{FakeKeyHook, FakeOverlays, FakeSwitcher, FakeTopology},
        keyboard_hook::KeyHookProvider,
        topology::Role,
    };

    const PRIMARY: DisplaySurface = DisplaySurface::new(1920, 1080, 0, 0, Role::Primary);
    const SECONDARY: DisplaySurface = DisplaySurface::new(1280, 1024, 1920, 0, Role::Secondary);
    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Rig {
        controller: Controller,
        overlays: Arc<FakeOverlays>,
        switcher: Arc<FakeSwitcher>,
        hook: FakeKeyHook,
        _dir: tempfile::TempDir,
    }

    fn rig(surfaces: Vec<DisplaySurface>) -> Rig {
        let dir = tempfile::tempdir().expect("temp dir");
        let overlays = Arc::new(FakeOverlays::new());
        let switcher = Arc::new(FakeSwitcher::new());
        let (listener, _dispatcher) = HotkeyListener::start();
        let mut hook = FakeKeyHook::new();
        hook.install(listener.clone()).unwrap();

        let controller = Controller::start(
            Parts {
                topology: Arc::new(FakeTopology::fixed(surfaces)),
                switcher: switcher.clone(),
                overlays: overlays.clone(),
                listener,
                store: BindingStore::new(dir.path().join("settings.json")),
            },
            Config::default()
                .set_retry_interval(Duration::from_millis(5))
                .set_settle_interval(Duration::ZERO),
        );

        Rig {
            controller,
            overlays,
            switcher,
            hook,
            _dir: dir,
        }
    }

    #[test]
    fn hotkeys_drive_block_and_unblock() {
        let rig = rig(vec![PRIMARY, SECONDARY]);
        let changes = rig.controller.subscribe();

        assert!(rig.hook.press("ctrl+shift+b").contains(&HookAction::Suppress));
        assert_eq!(
            changes.recv_timeout(TIMEOUT).unwrap(),
            StateChange::Blocked(SECONDARY)
        );
        assert!(rig.controller.is_blocked());

        rig.hook.press("shift+ctrl+u");
        assert_eq!(changes.recv_timeout(TIMEOUT).unwrap(), StateChange::Unblocked);
        assert!(rig.overlays.live().is_empty());
        assert!(rig.switcher.calls().is_empty());
    }

    #[test]
    fn local_dismiss_unblocks() {
        let rig = rig(vec![PRIMARY, SECONDARY]);
        let changes = rig.controller.subscribe();

        rig.controller.block().unwrap();
        assert!(matches!(
            changes.recv_timeout(TIMEOUT).unwrap(),
            StateChange::Blocked(_)
        ));

        assert!(rig.overlays.dismiss_locally());
        assert_eq!(changes.recv_timeout(TIMEOUT).unwrap(), StateChange::Unblocked);
        assert_eq!(rig.controller.phase(), Phase::Unblocked);
    }

    #[test]
    fn rebind_moves_the_hotkey_and_persists() {
        let rig = rig(vec![PRIMARY, SECONDARY]);
        let changes = rig.controller.subscribe();

        let combo = rig.controller.rebind(BindingKind::Block, "Alt + F9").unwrap();
        assert_eq!(combo.to_string(), "alt+f9");
        assert!(matches!(
            changes.recv_timeout(TIMEOUT).unwrap(),
            StateChange::BindingsChanged(b) if b.block == combo
        ));

        // The old combo now reaches other applications.
        assert!(!rig.hook.press("ctrl+shift+b").contains(&HookAction::Suppress));
        assert!(rig.hook.press("alt+f9").contains(&HookAction::Suppress));
        assert!(matches!(
            changes.recv_timeout(TIMEOUT).unwrap(),
            StateChange::Blocked(_)
        ));

        let reloaded = BindingStore::new(rig._dir.path().join("settings.json")).load();
        assert_eq!(reloaded, rig.controller.current_bindings());
    }

    #[test]
    fn rebind_onto_the_other_binding_is_rejected() {
        let rig = rig(vec![PRIMARY]);
        let before = rig.controller.current_bindings();

        let err = rig
            .controller
            .rebind(BindingKind::Unblock, "ctrl+shift+b")
            .unwrap_err();

        assert!(matches!(err, Error::HotkeyRegistrationFailed { .. }));
        assert_eq!(rig.controller.current_bindings(), before);
    }

    #[test]
    fn queued_rebind_reports_rejection() {
        let rig = rig(vec![PRIMARY]);
        let changes = rig.controller.subscribe();

        rig.controller
            .send(ControlEvent::RebindRequested {
                kind: BindingKind::Block,
                combo: "a+b".to_string(),
            })
            .unwrap();

        assert!(matches!(
            changes.recv_timeout(TIMEOUT).unwrap(),
            StateChange::RebindRejected {
                kind: BindingKind::Block,
                ..
            }
        ));
    }

    #[test]
    fn views_read_the_topology() {
        let rig = rig(vec![PRIMARY, SECONDARY]);
        assert_eq!(rig.controller.current_mode(), OutputMode::Extend);
        assert_eq!(
            rig.controller.status(),
            DisplayStatus::ExtendedSecond {
                secondary: SECONDARY
            }
        );
        assert_eq!(rig.controller.surfaces().len(), 2);
    }

    #[test]
    fn shutdown_restores_and_releases_hotkeys() {
        let rig = rig(vec![PRIMARY, SECONDARY]);
        let changes = rig.controller.subscribe();
        rig.controller.block().unwrap();
        changes.recv_timeout(TIMEOUT).unwrap();

        rig.controller.shutdown();

        assert!(rig.overlays.live().is_empty());
        assert!(!rig.hook.press("ctrl+shift+b").contains(&HookAction::Suppress));
        assert!(matches!(
            rig.controller.block(),
            Err(Error::ControllerStopped)
        ));
    }
}
