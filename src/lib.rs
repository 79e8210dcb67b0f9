//! Blocks the secondary display behind an opaque overlay with a global hotkey
//! and releases it with another, switching Windows from Duplicate to Extend
//! mode for the duration of the block.
//!
//! The core ([`controller`], [`blocker`], [`event_handler`]) is written
//! against small capability traits so it runs anywhere; the Windows
//! implementations of those traits are only compiled on Windows, and
//! in-memory ones live in [`fake`].

pub mod binding_store;
pub mod blocker;
pub mod controller;
pub mod error;
pub mod event_handler;
pub mod fake;
pub mod hotkey;
pub mod keyboard_hook;
pub mod output_mode;
pub mod overlay;
pub mod topology;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use blocker::Config;
pub use controller::{ControlEvent, Controller, StateChange};
pub use error::{Error, Result};

#[cfg(windows)]
pub use platform::{Running, start};

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(windows)]
mod platform {
    use std::{sync::Arc, thread};

    use crate::{
        binding_store::BindingStore,
        blocker::Config,
        controller::{Controller, Parts},
        error::Result,
        event_handler::HotkeyListener,
        keyboard_hook::{KeyHookProvider, WindowsKeyHook},
        output_mode::DisplaySwitch,
        overlay::WindowsOverlays,
        topology::WindowsTopology,
    };

    /// Installs the keyboard hook and starts a controller on the real
    /// displays, with bindings from the per-user settings file.
    pub fn start(config: Config) -> Result<Running> {
        let (listener, dispatcher) = HotkeyListener::start();

        let mut keyboard_hook = WindowsKeyHook::new();
        keyboard_hook.install(listener.clone())?;

        let controller = Controller::start(
            Parts {
                topology: Arc::new(WindowsTopology::new()),
                switcher: Arc::new(DisplaySwitch::new()),
                overlays: Arc::new(WindowsOverlays::new()),
                listener,
                store: BindingStore::default_location(),
            },
            config,
        );

        Ok(Running {
            controller,
            keyboard_hook,
            dispatcher,
        })
    }

    pub struct Running {
        pub controller: Controller,
        keyboard_hook: WindowsKeyHook,
        dispatcher: thread::JoinHandle<()>,
    }

    impl Running {
        /// Shuts the controller down (restoring the output mode), removes the
        /// keyboard hook and waits for the hotkey dispatcher to finish.
        pub fn stop(self) -> thread::Result<()> {
            let Running {
                controller,
                mut keyboard_hook,
                dispatcher,
            } = self;

            controller.shutdown();
            keyboard_hook.uninstall();
            drop(controller);
            dispatcher.join()
        }
    }
}
