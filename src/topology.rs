//! Reading the current display topology.
//!
//! A [`TopologyProvider`] reports the surfaces the OS is currently arranging
//! ([`TopologyProvider::snapshot`]) and, through an independent lower-level
//! query, whether any external video output is physically connected
//! ([`TopologyProvider::has_external_output`]). The second signal matters in
//! duplicate mode, where two physical outputs collapse into one reported
//! surface.

use std::fmt::{self, Display};

#[cfg(windows)]
pub use platform::WindowsTopology;

/// Role a surface plays in the current arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Secondary,
    Unknown,
}

/// One display surface as reported by a single topology query.
///
/// Values are produced fresh by every query and compared by value across
/// queries to detect change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplaySurface {
    pub width: i32,
    pub height: i32,
    pub x: i32,
    pub y: i32,
    pub role: Role,
}

impl DisplaySurface {
    pub const fn new(width: i32, height: i32, x: i32, y: i32, role: Role) -> Self {
        Self {
            width,
            height,
            x,
            y,
            role,
        }
    }

    /// Returns `true` if both surfaces cover the same rectangle, ignoring role.
    pub fn same_geometry(&self, other: &DisplaySurface) -> bool {
        (self.width, self.height, self.x, self.y) == (other.width, other.height, other.x, other.y)
    }
}

/// Source of topology snapshots.
///
/// Both queries are synchronous and side-effect free. Neither may fail the
/// caller: an implementation that cannot reach the OS answers `false` from
/// [`has_external_output`](TopologyProvider::has_external_output) and the
/// best-known prior result from [`snapshot`](TopologyProvider::snapshot).
pub trait TopologyProvider: Send + Sync {
    /// Returns the attached surfaces, primary first, then in OS-reported order.
    fn snapshot(&self) -> Vec<DisplaySurface>;

    /// Returns `true` if an external video output is physically connected.
    fn has_external_output(&self) -> bool;
}

/// Picks the surface a block overlay should cover.
pub fn secondary_surface(snapshot: &[DisplaySurface]) -> Option<DisplaySurface> {
    snapshot
        .iter()
        .find(|s| s.role == Role::Secondary)
        .or_else(|| snapshot.get(1))
        .copied()
}

/// Assigns roles to surfaces already ordered primary first.
///
/// The first non-primary surface becomes the secondary; any further surface
/// is `Unknown`, since only two displays are managed.
pub fn assign_roles(surfaces: &mut [DisplaySurface]) {
    let mut seen_secondary = false;
    for surface in surfaces.iter_mut().skip(1) {
        surface.role = if seen_secondary {
            Role::Unknown
        } else {
            seen_secondary = true;
            Role::Secondary
        };
    }
    if let Some(first) = surfaces.first_mut() {
        first.role = Role::Primary;
    }
}

/// Returns `true` for a video output technology code that denotes a
/// physically external connector.
///
/// Codes follow `DISPLAYCONFIG_VIDEO_OUTPUT_TECHNOLOGY`. Panels wired
/// internally (LVDS, embedded DisplayPort/UDI, `INTERNAL`), virtual indirect
/// displays and `OTHER` do not count.
pub fn is_external_technology(code: i32) -> bool {
    matches!(code, 0..=5 | 8..=10 | 12 | 14..=16 | 18)
}

/// What the home view tells the user about the current arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    /// One surface and no external output: nothing to block.
    PrimaryOnly,
    /// One surface but an external output is connected, so both outputs
    /// most likely mirror the primary image.
    DuplicateMirroring { primary: DisplaySurface },
    /// A separate second surface is available.
    ExtendedSecond { secondary: DisplaySurface },
}

impl DisplayStatus {
    pub fn classify(snapshot: &[DisplaySurface], external_connected: bool) -> Self {
        match (secondary_surface(snapshot), snapshot.first()) {
            (Some(secondary), _) => DisplayStatus::ExtendedSecond { secondary },
            (None, Some(primary)) if external_connected => {
                DisplayStatus::DuplicateMirroring { primary: *primary }
            }
            _ => DisplayStatus::PrimaryOnly,
        }
    }

    pub fn read(provider: &dyn TopologyProvider) -> Self {
        Self::classify(&provider.snapshot(), provider.has_external_output())
    }
}

impl Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayStatus::PrimaryOnly => write!(
                f,
                "Duplicate Mode:\nNo external display detected.\nOnly primary screen is active."
            ),
            DisplayStatus::DuplicateMirroring { primary } => write!(
                f,
                "Duplicate Mode:\nOne screen reported, but an external output is connected.\n\
                 Resolution: {}x{}\nBoth screens are likely mirroring the primary output.",
                primary.width, primary.height
            ),
            DisplayStatus::ExtendedSecond { secondary } => write!(
                f,
                "Extended Mode:\nSecond Screen Detected\nResolution: {}x{}\nPosition: ({}, {})",
                secondary.width, secondary.height, secondary.x, secondary.y
            ),
        }
    }
}

/// Renders one line per surface for the display management view.
pub fn describe_surfaces(snapshot: &[DisplaySurface]) -> Vec<String> {
    snapshot
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "Monitor {}: {}x{} at ({},{})",
                i + 1,
                s.width,
                s.height,
                s.x,
                s.y
            )
        })
        .collect()
}

#[cfg(windows)]
mod platform {
    use std::{mem, sync::Mutex};

    use windows::{
        Win32::{
            Devices::Display::{
                DISPLAYCONFIG_MODE_INFO, DISPLAYCONFIG_PATH_INFO, GetDisplayConfigBufferSizes,
                QDC_ALL_PATHS, QueryDisplayConfig,
            },
            Foundation::{LPARAM, RECT},
            Graphics::Gdi::{
                EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFO,
                MONITORINFOEXW, MONITORINFOF_PRIMARY,
            },
        },
        core::BOOL,
    };

    use super::{DisplaySurface, Role, TopologyProvider, assign_roles, is_external_technology};
    use crate::{
        error::{Error, Result},
        lock,
    };

    /// Topology reader backed by `EnumDisplayMonitors` and `QueryDisplayConfig`.
    #[derive(Debug, Default)]
    pub struct WindowsTopology {
        last_known: Mutex<Vec<DisplaySurface>>,
    }

    impl WindowsTopology {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl TopologyProvider for WindowsTopology {
        fn snapshot(&self) -> Vec<DisplaySurface> {
            let mut last_known = lock(&self.last_known);
            match enumerate_surfaces() {
                Ok(surfaces) => {
                    *last_known = surfaces.clone();
                    surfaces
                }
                Err(_e) => {
                    #[cfg(feature = "log")]
                    log::warn!("{}; using last known topology", _e);
                    last_known.clone()
                }
            }
        }

        fn has_external_output(&self) -> bool {
            match query_output_technologies() {
                Ok(codes) => codes.into_iter().any(is_external_technology),
                Err(_e) => {
                    #[cfg(feature = "log")]
                    log::warn!("{}; assuming no external display", _e);
                    false
                }
            }
        }
    }

    fn enumerate_surfaces() -> Result<Vec<DisplaySurface>> {
        let mut surfaces: Vec<DisplaySurface> = Vec::new();
        let ok = unsafe {
            EnumDisplayMonitors(
                None,
                None,
                Some(monitor_enum_proc),
                LPARAM(&mut surfaces as *mut Vec<DisplaySurface> as isize),
            )
        };
        if !ok.as_bool() {
            return Err(Error::TopologyQueryFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }

        // Stable sort keeps the OS order among non-primary surfaces.
        surfaces.sort_by_key(|s| s.role != Role::Primary);
        assign_roles(&mut surfaces);
        Ok(surfaces)
    }

    unsafe extern "system" fn monitor_enum_proc(
        monitor: HMONITOR,
        _hdc: HDC,
        _clip: *mut RECT,
        data: LPARAM,
    ) -> BOOL {
        let surfaces = unsafe { &mut *(data.0 as *mut Vec<DisplaySurface>) };
        let mut info = MONITORINFOEXW::default();
        info.monitorInfo.cbSize = mem::size_of::<MONITORINFOEXW>() as u32;
        if unsafe { GetMonitorInfoW(monitor, &mut info.monitorInfo as *mut MONITORINFO) }.as_bool()
        {
            let rc = info.monitorInfo.rcMonitor;
            let role = if info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY != 0 {
                Role::Primary
            } else {
                Role::Unknown
            };
            surfaces.push(DisplaySurface::new(
                rc.right - rc.left,
                rc.bottom - rc.top,
                rc.left,
                rc.top,
                role,
            ));
        }
        BOOL(1)
    }

    fn query_output_technologies() -> Result<Vec<i32>> {
        let query_failed = |e: windows::core::Error| Error::TopologyQueryFailed(e.to_string());

        let mut path_count = 0u32;
        let mut mode_count = 0u32;
        unsafe { GetDisplayConfigBufferSizes(QDC_ALL_PATHS, &mut path_count, &mut mode_count) }
            .ok()
            .map_err(query_failed)?;

        let mut paths = vec![DISPLAYCONFIG_PATH_INFO::default(); path_count as usize];
        let mut modes = vec![DISPLAYCONFIG_MODE_INFO::default(); mode_count as usize];
        unsafe {
            QueryDisplayConfig(
                QDC_ALL_PATHS,
                &mut path_count,
                paths.as_mut_ptr(),
                &mut mode_count,
                modes.as_mut_ptr(),
                None,
            )
        }
        .ok()
        .map_err(query_failed)?;
        paths.truncate(path_count as usize);

        Ok(paths
            .iter()
            .filter(|p| p.targetInfo.targetAvailable.as_bool())
            .map(|p| p.targetInfo.outputTechnology.0)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY: DisplaySurface = DisplaySurface::new(1920, 1080, 0, 0, Role::Primary);
    const SECONDARY: DisplaySurface = DisplaySurface::new(1280, 1024, 1920, 0, Role::Secondary);

    #[test]
    fn secondary_is_found_by_role_or_position() {
        assert_eq!(secondary_surface(&[PRIMARY]), None);
        assert_eq!(secondary_surface(&[PRIMARY, SECONDARY]), Some(SECONDARY));

        let unlabeled = DisplaySurface::new(800, 600, -800, 0, Role::Unknown);
        assert_eq!(secondary_surface(&[PRIMARY, unlabeled]), Some(unlabeled));
    }

    #[test]
    fn roles_follow_order() {
        let mut surfaces = vec![
            DisplaySurface::new(1, 1, 0, 0, Role::Unknown),
            DisplaySurface::new(2, 2, 1, 0, Role::Unknown),
            DisplaySurface::new(3, 3, 3, 0, Role::Primary),
        ];
        assign_roles(&mut surfaces);
        let roles: Vec<_> = surfaces.iter().map(|s| s.role).collect();
        assert_eq!(roles, [Role::Primary, Role::Secondary, Role::Unknown]);
    }

    #[test]
    fn internal_panels_are_not_external() {
        // HD15, DVI, HDMI, DisplayPort external
        for code in [0, 4, 5, 10] {
            assert!(is_external_technology(code), "code {code}");
        }
        // OTHER, LVDS, embedded DisplayPort, INTERNAL
        for code in [-1, 6, 11, i32::MIN] {
            assert!(!is_external_technology(code), "code {code}");
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            DisplayStatus::classify(&[PRIMARY], false),
            DisplayStatus::PrimaryOnly
        );
        assert_eq!(
            DisplayStatus::classify(&[PRIMARY], true),
            DisplayStatus::DuplicateMirroring { primary: PRIMARY }
        );
        assert_eq!(
            DisplayStatus::classify(&[PRIMARY, SECONDARY], false),
            DisplayStatus::ExtendedSecond {
                secondary: SECONDARY
            }
        );
        assert_eq!(DisplayStatus::classify(&[], true), DisplayStatus::PrimaryOnly);
    }

    #[test]
    fn status_text_names_the_second_screen() {
        let text = DisplayStatus::ExtendedSecond {
            secondary: SECONDARY,
        }
        .to_string();
        assert!(text.contains("Resolution: 1280x1024"));
        assert!(text.contains("Position: (1920, 0)"));
    }

    #[test]
    fn surfaces_are_listed_one_based() {
        assert_eq!(
            describe_surfaces(&[PRIMARY, SECONDARY]),
            [
                "Monitor 1: 1920x1080 at (0,0)",
                "Monitor 2: 1280x1024 at (1920,0)"
            ]
        );
    }
}
