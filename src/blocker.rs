//! The block/unblock state machine.
//!
//! ```text
//!              block()                 secondary found, overlay mounted
//! Unblocked ───────────► Blocking ───────────────────────────────► Blocked
//!     ▲                     │                                          │
//!     │   retries exhausted │                   unblock() / Escape     │
//!     └─────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! [`Blocker::block`] holds the state lock for the whole attempt, including
//! the retry sleeps, so overlapping calls are serialized and at most one
//! overlay is ever mounted.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use crate::{
    lock,
    output_mode::{OutputMode, OutputModeSwitcher, current_mode},
    overlay::{DismissHandle, Overlay, OverlayManager},
    topology::{DisplaySurface, TopologyProvider, secondary_surface},
};

/// Timing of a block attempt.
///
/// By default a block makes 7 detection attempts 150ms apart, after waiting
/// 1s for the OS to settle if it had to switch to extend mode first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub attempts: u32,
    pub retry_interval: Duration,
    pub settle_interval: Duration,
}

impl Config {
    pub const DEFAULT_ATTEMPTS: u32 = 7;
    pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(150);
    pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(1);

    /// Sets how many times the topology is read looking for a secondary surface.
    pub fn set_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Sets the pause between two detection attempts.
    pub fn set_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Sets the wait after switching to extend mode, before the first attempt.
    pub fn set_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            attempts: Self::DEFAULT_ATTEMPTS,
            retry_interval: Self::DEFAULT_RETRY_INTERVAL,
            settle_interval: Self::DEFAULT_SETTLE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unblocked,
    Blocking,
    Blocked,
}

/// Result of [`Blocker::block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Blocked(DisplaySurface),
    /// Every attempt ran without a secondary surface being mounted over.
    NoSecondary,
}

#[derive(Default)]
struct BlockState {
    active: bool,
    overlay: Option<Box<dyn Overlay>>,
    mode_before_block: Option<OutputMode>,
}

impl BlockState {
    fn dismiss_overlay(&mut self) {
        if let Some(overlay) = self.overlay.take() {
            overlay.dismiss();
        }
    }
}

pub struct Blocker {
    topology: Arc<dyn TopologyProvider>,
    switcher: Arc<dyn OutputModeSwitcher>,
    overlays: Arc<dyn OverlayManager>,
    config: Config,
    on_dismiss: DismissHandle,
    state: Mutex<BlockState>,
    phase: Mutex<Phase>,
}

impl Blocker {
    pub fn new(
        topology: Arc<dyn TopologyProvider>,
        switcher: Arc<dyn OutputModeSwitcher>,
        overlays: Arc<dyn OverlayManager>,
        config: Config,
    ) -> Self {
        Self {
            topology,
            switcher,
            overlays,
            config,
            on_dismiss: DismissHandle::noop(),
            state: Mutex::new(BlockState::default()),
            phase: Mutex::new(Phase::Unblocked),
        }
    }

    /// Sets what a local dismiss of a mounted overlay triggers.
    pub fn set_on_dismiss(mut self, on_dismiss: DismissHandle) -> Self {
        self.on_dismiss = on_dismiss;
        self
    }

    pub fn topology(&self) -> &dyn TopologyProvider {
        self.topology.as_ref()
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    pub fn is_blocked(&self) -> bool {
        self.phase() == Phase::Blocked
    }

    /// Presumed output arrangement, inferred from a fresh topology read.
    pub fn current_mode(&self) -> OutputMode {
        current_mode(&self.topology.snapshot())
    }

    /// The mode to restore on unblock, if block had to switch away from it.
    pub fn mode_before_block(&self) -> Option<OutputMode> {
        lock(&self.state).mode_before_block
    }

    /// Surface covered by the mounted overlay.
    pub fn blocked_surface(&self) -> Option<DisplaySurface> {
        lock(&self.state).overlay.as_ref().map(|o| o.surface())
    }

    /// Covers the secondary display with an overlay.
    ///
    /// Switches to extend mode first if the topology looks duplicated. Calling
    /// this while already blocked re-asserts the block: the overlay is torn
    /// down and remounted over the freshly detected surface.
    pub fn block(&self) -> BlockOutcome {
        let mut state = lock(&self.state);
        self.set_phase(Phase::Blocking);

        if !state.active {
            self.prepare_extend(&mut state);
        }

        for attempt in 1..=self.config.attempts {
            match secondary_surface(&self.topology.snapshot()) {
                Some(surface) => {
                    state.dismiss_overlay();
                    match self.overlays.mount(&surface, self.on_dismiss.clone()) {
                        Ok(overlay) => {
                            state.overlay = Some(overlay);
                            state.active = true;
                            self.set_phase(Phase::Blocked);

                            #[cfg(feature = "log")]
                            log::info!(
                                "blocked {}x{} at ({}, {}) on attempt {}",
                                surface.width,
                                surface.height,
                                surface.x,
                                surface.y,
                                attempt
                            );
                            return BlockOutcome::Blocked(surface);
                        }
                        Err(_e) => {
                            #[cfg(feature = "log")]
                            log::error!("attempt {}: {}", attempt, _e);
                        }
                    }
                }
                None => {
                    #[cfg(feature = "log")]
                    log::info!("attempt {}: second screen not detected yet", attempt);
                }
            }

            if attempt < self.config.attempts {
                thread::sleep(self.config.retry_interval);
            }
        }

        // A forced extend switch stays in place; the user can retry the hotkey.
        state.dismiss_overlay();
        state.active = false;
        self.set_phase(Phase::Unblocked);

        #[cfg(feature = "log")]
        log::warn!(
            "no secondary display after {} attempts",
            self.config.attempts
        );
        BlockOutcome::NoSecondary
    }

    fn prepare_extend(&self, state: &mut BlockState) {
        match self.current_mode() {
            OutputMode::Duplicate => {
                state.mode_before_block = Some(OutputMode::Duplicate);
                match self.switcher.switch_to(OutputMode::Extend) {
                    Ok(()) => thread::sleep(self.config.settle_interval),
                    Err(_e) => {
                        #[cfg(feature = "log")]
                        log::error!("{}", _e);
                    }
                }
            }
            OutputMode::Extend => state.mode_before_block = None,
        }
    }

    /// Removes the overlay and restores duplicate mode if block switched away
    /// from it. Safe to call when not blocked.
    ///
    /// Returns `true` if an overlay was mounted.
    pub fn unblock(&self) -> bool {
        let mut state = lock(&self.state);
        let was_active = state.active || state.overlay.is_some();

        state.dismiss_overlay();
        state.active = false;
        self.set_phase(Phase::Unblocked);

        if state.mode_before_block.take() == Some(OutputMode::Duplicate) {
            #[cfg(feature = "log")]
            log::info!("reverting to duplicate mode");
            if let Err(_e) = self.switcher.switch_to(OutputMode::Duplicate) {
                #[cfg(feature = "log")]
                log::error!("{}", _e);
            }
        }

        was_active
    }

    fn set_phase(&self, phase: Phase) {
        *lock(&self.phase) = phase;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{
        fake::{FakeOverlays, FakeSwitcher, FakeTopology},
        topology::Role,
    };

    const PRIMARY: DisplaySurface = DisplaySurface::new(1920, 1080, 0, 0, Role::Primary);
    const SECONDARY: DisplaySurface = DisplaySurface::new(1280, 1024, 1920, 0, Role::Secondary);

    fn quick() -> Config {
        Config::default()
            .set_retry_interval(Duration::from_millis(5))
            .set_settle_interval(Duration::ZERO)
    }

    fn blocker(
        topology: &Arc<FakeTopology>,
        switcher: &Arc<FakeSwitcher>,
        overlays: &Arc<FakeOverlays>,
        config: Config,
    ) -> Blocker {
        Blocker::new(
            topology.clone(),
            switcher.clone(),
            overlays.clone(),
            config,
        )
    }

    #[test]
    fn config_builder() {
        let config = Config::default()
            .set_attempts(0)
            .set_retry_interval(Duration::from_millis(1));
        assert_eq!(config.attempts, 1);
        assert_eq!(config.retry_interval, Duration::from_millis(1));
        assert_eq!(config.settle_interval, Config::DEFAULT_SETTLE_INTERVAL);
    }

    #[test]
    fn extended_topology_blocks_without_switching() {
        let topology = Arc::new(FakeTopology::fixed(vec![PRIMARY, SECONDARY]));
        let switcher = Arc::new(FakeSwitcher::new());
        let overlays = Arc::new(FakeOverlays::new());
        let blocker = blocker(&topology, &switcher, &overlays, quick());

        assert_eq!(blocker.block(), BlockOutcome::Blocked(SECONDARY));
        assert!(blocker.is_blocked());
        assert_eq!(blocker.blocked_surface(), Some(SECONDARY));
        assert_eq!(blocker.mode_before_block(), None);

        assert!(blocker.unblock());
        assert!(!blocker.is_blocked());
        assert!(switcher.calls().is_empty());
        assert!(overlays.live().is_empty());
    }

    #[test]
    fn mount_failure_is_retried() {
        let topology = Arc::new(FakeTopology::fixed(vec![PRIMARY, SECONDARY]));
        let switcher = Arc::new(FakeSwitcher::new());
        let overlays = Arc::new(FakeOverlays::new());
        overlays.fail_next_mounts(2);
        let blocker = blocker(&topology, &switcher, &overlays, quick());

        assert_eq!(blocker.block(), BlockOutcome::Blocked(SECONDARY));
        assert_eq!(topology.calls(), 1 + 3);
        assert_eq!(overlays.live(), [SECONDARY]);
    }

    #[test]
    fn reassert_remounts_and_keeps_revert_mode() {
        let topology = Arc::new(FakeTopology::secondary_from_call(2, PRIMARY, SECONDARY));
        let switcher = Arc::new(FakeSwitcher::new());
        let overlays = Arc::new(FakeOverlays::new());
        let blocker = blocker(&topology, &switcher, &overlays, quick());

        assert!(matches!(blocker.block(), BlockOutcome::Blocked(_)));
        assert!(matches!(blocker.block(), BlockOutcome::Blocked(_)));

        assert_eq!(overlays.mounted(), 2);
        assert_eq!(overlays.live(), [SECONDARY]);
        assert_eq!(blocker.mode_before_block(), Some(OutputMode::Duplicate));
        assert_eq!(switcher.calls(), [OutputMode::Extend]);
    }

    #[test]
    fn failed_reassert_drops_the_old_overlay() {
        let topology = Arc::new(FakeTopology::fixed(vec![PRIMARY, SECONDARY]));
        let switcher = Arc::new(FakeSwitcher::new());
        let overlays = Arc::new(FakeOverlays::new());
        let blocker = blocker(&topology, &switcher, &overlays, quick().set_attempts(2));

        blocker.block();
        topology.set(vec![PRIMARY]);

        assert_eq!(blocker.block(), BlockOutcome::NoSecondary);
        assert_eq!(blocker.phase(), Phase::Unblocked);
        assert!(overlays.live().is_empty());
    }

    #[test]
    fn failed_block_keeps_the_extend_switch() {
        let topology = Arc::new(FakeTopology::fixed(vec![PRIMARY]));
        let switcher = Arc::new(FakeSwitcher::new());
        let overlays = Arc::new(FakeOverlays::new());
        let blocker = blocker(&topology, &switcher, &overlays, quick());

        assert_eq!(blocker.block(), BlockOutcome::NoSecondary);
        assert_eq!(switcher.calls(), [OutputMode::Extend]);
        assert_eq!(blocker.mode_before_block(), Some(OutputMode::Duplicate));

        // Unblocking afterwards still restores the mode the user started in.
        assert!(!blocker.unblock());
        assert_eq!(switcher.calls(), [OutputMode::Extend, OutputMode::Duplicate]);
        assert!(!blocker.unblock());
        assert_eq!(switcher.calls().len(), 2);
    }

    #[test]
    fn extend_block_clears_a_stale_revert() {
        let topology = Arc::new(FakeTopology::fixed(vec![PRIMARY]));
        let switcher = Arc::new(FakeSwitcher::new());
        let overlays = Arc::new(FakeOverlays::new());
        let blocker = blocker(&topology, &switcher, &overlays, quick());

        assert_eq!(blocker.block(), BlockOutcome::NoSecondary);
        assert_eq!(blocker.mode_before_block(), Some(OutputMode::Duplicate));

        topology.set(vec![PRIMARY, SECONDARY]);
        assert_eq!(blocker.block(), BlockOutcome::Blocked(SECONDARY));
        assert_eq!(blocker.mode_before_block(), None);

        assert!(blocker.unblock());
        assert_eq!(switcher.calls(), [OutputMode::Extend]);
    }

    #[test]
    fn dispatch_failure_still_detects() {
        let topology = Arc::new(FakeTopology::secondary_from_call(3, PRIMARY, SECONDARY));
        let switcher = Arc::new(FakeSwitcher::failing());
        let overlays = Arc::new(FakeOverlays::new());
        let blocker = blocker(
            &topology,
            &switcher,
            &overlays,
            quick().set_settle_interval(Duration::from_secs(10)),
        );

        let started = Instant::now();
        assert_eq!(blocker.block(), BlockOutcome::Blocked(SECONDARY));
        // no settle wait after a failed dispatch
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn local_dismiss_reaches_handle() {
        let topology = Arc::new(FakeTopology::fixed(vec![PRIMARY, SECONDARY]));
        let switcher = Arc::new(FakeSwitcher::new());
        let overlays = Arc::new(FakeOverlays::new());
        let dismissed = Arc::new(Mutex::new(0));
        let blocker = {
            let dismissed = dismissed.clone();
            blocker(&topology, &switcher, &overlays, quick())
                .set_on_dismiss(DismissHandle::new(move || *dismissed.lock().unwrap() += 1))
        };

        blocker.block();
        assert!(overlays.dismiss_locally());

        assert_eq!(*dismissed.lock().unwrap(), 1);
        assert!(overlays.live().is_empty());
        assert!(blocker.unblock());
    }
}
