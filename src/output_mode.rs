//! Switching the physical output arrangement between duplicate and extend.

use std::{
    fmt::{self, Display},
    process::Command,
    thread,
};

use crate::{
    error::{Error, Result},
    topology::DisplaySurface,
};

/// Physical output arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// One image cloned to every output.
    Duplicate,
    /// Independent surfaces per output.
    Extend,
}

impl Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputMode::Duplicate => "duplicate",
            OutputMode::Extend => "extend",
        };
        write!(f, "{}", s)
    }
}

/// Infers the presumed arrangement from a topology snapshot.
///
/// The result can lag the real OS mode for as long as the OS takes to
/// renegotiate outputs after a switch.
pub fn current_mode(snapshot: &[DisplaySurface]) -> OutputMode {
    if snapshot.len() > 1 {
        OutputMode::Extend
    } else {
        OutputMode::Duplicate
    }
}

/// Issues arrangement changes to the OS.
pub trait OutputModeSwitcher: Send + Sync {
    /// Dispatches the switch and returns without waiting for the OS to finish
    /// renegotiating outputs.
    fn switch_to(&self, mode: OutputMode) -> Result<()>;
}

/// Switches modes through the stock `DisplaySwitch.exe` utility.
#[derive(Debug, Clone)]
pub struct DisplaySwitch {
    program: String,
}

impl DisplaySwitch {
    pub const PROGRAM: &'static str = "DisplaySwitch.exe";

    pub fn new() -> Self {
        Self::with_program(Self::PROGRAM)
    }

    /// Uses another executable accepting the same `/extend` and `/clone` arguments.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn argument(mode: OutputMode) -> &'static str {
        match mode {
            OutputMode::Extend => "/extend",
            OutputMode::Duplicate => "/clone",
        }
    }
}

impl Default for DisplaySwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputModeSwitcher for DisplaySwitch {
    fn switch_to(&self, mode: OutputMode) -> Result<()> {
        #[cfg(feature = "log")]
        log::info!("switching to {} mode", mode);

        let mut child = Command::new(&self.program)
            .arg(Self::argument(mode))
            .spawn()
            .map_err(Error::ModeSwitchDispatchFailed)?;

        // Reaped off the caller's thread; the exit status is only logged.
        let _program = self.program.clone();
        thread::spawn(move || {
            let _result = child.wait();

            #[cfg(feature = "log")]
            match _result {
                Ok(status) if status.success() => {
                    log::debug!("{} exited with {}", _program, status)
                }
                Ok(status) => log::warn!("{} exited with {}", _program, status),
                Err(e) => log::warn!("failed to wait for {}: {}", _program, e),
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Role;

    #[test]
    fn mode_follows_surface_count() {
        let surface = DisplaySurface::new(1920, 1080, 0, 0, Role::Primary);
        assert_eq!(current_mode(&[]), OutputMode::Duplicate);
        assert_eq!(current_mode(&[surface]), OutputMode::Duplicate);
        assert_eq!(current_mode(&[surface, surface]), OutputMode::Extend);
        assert_eq!(current_mode(&[surface; 3]), OutputMode::Extend);
    }

    #[test]
    fn display_switch_arguments() {
        assert_eq!(DisplaySwitch::argument(OutputMode::Extend), "/extend");
        assert_eq!(DisplaySwitch::argument(OutputMode::Duplicate), "/clone");
    }

    #[test]
    fn missing_program_is_a_dispatch_failure() {
        let switcher = DisplaySwitch::with_program("monit-no-such-display-switch");
        assert!(matches!(
            switcher.switch_to(OutputMode::Extend),
            Err(Error::ModeSwitchDispatchFailed(_))
        ));
    }
}
