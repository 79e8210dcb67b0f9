use std::path::PathBuf;

use thiserror::Error;

use crate::hotkey::HotkeyCombo;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to query the display topology: {0}")]
    TopologyQueryFailed(String),
    #[error("failed to mount the blocking overlay")]
    OverlayMountFailed(#[source] std::io::Error),
    #[error("failed to dispatch the output mode switch")]
    ModeSwitchDispatchFailed(#[source] std::io::Error),
    #[error("cannot register hotkey `{combo}`: {reason}")]
    HotkeyRegistrationFailed { combo: HotkeyCombo, reason: String },
    #[error("invalid hotkey `{raw}`: {reason}")]
    InvalidCombo { raw: String, reason: &'static str },
    #[error("failed to persist settings to {}", path.display())]
    SettingsPersistFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to register the keyboard hook")]
    HookRegistrationFailed(#[source] std::io::Error),
    #[error("the hook thread terminated unexpectedly")]
    HookThreadCrashed,
    #[error("the controller worker has stopped")]
    ControllerStopped,
}

pub type Result<T> = std::result::Result<T, Error>;
