//! Opaque always-on-top surfaces covering a display.
//!
//! An overlay shows a static "blocked" notice over exactly one surface. It
//! also answers a local dismiss gesture (Escape) so the user can recover even
//! if the global hotkey layer stops responding; the gesture is reported
//! through the [`DismissHandle`] given at mount time.

use std::{fmt, sync::Arc};

use crate::{error::Result, topology::DisplaySurface};

#[cfg(windows)]
pub use platform::WindowsOverlays;

pub const BLOCKED_NOTICE: &str = "Your display is blocked";

/// Called when the user dismisses an overlay locally.
#[derive(Clone)]
pub struct DismissHandle(Arc<dyn Fn() + Send + Sync + 'static>);

impl DismissHandle {
    pub fn new<F: Fn() + Send + Sync + 'static>(f: F) -> Self {
        Self(Arc::new(f))
    }

    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn notify(&self) {
        (self.0)()
    }
}

impl fmt::Debug for DismissHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DismissHandle")
    }
}

/// A mounted overlay.
pub trait Overlay: Send {
    /// The surface this overlay was mounted over.
    fn surface(&self) -> DisplaySurface;

    /// Returns `false` once the overlay is gone, including after a local dismiss.
    fn is_mounted(&self) -> bool;

    /// Destroys the overlay. Harmless if it was already dismissed locally.
    fn dismiss(self: Box<Self>);
}

/// Creates overlays.
pub trait OverlayManager: Send + Sync {
    /// Mounts a new overlay whose bounds equal `surface`'s geometry.
    ///
    /// Callers dismiss any previous overlay first.
    fn mount(
        &self,
        surface: &DisplaySurface,
        on_dismiss: DismissHandle,
    ) -> Result<Box<dyn Overlay>>;
}

#[cfg(windows)]
mod platform {
    use std::{
        cell::{Cell, OnceCell},
        io,
        sync::OnceLock,
        thread,
    };

    use windows::{
        Win32::{
            Foundation::{COLORREF, HWND, LPARAM, LRESULT, RECT, WPARAM},
            Graphics::Gdi::{
                BLACK_BRUSH, BeginPaint, DT_CENTER, DT_SINGLELINE, DT_VCENTER, DrawTextW,
                EndPaint, FillRect, GetStockObject, HBRUSH, PAINTSTRUCT, SetBkMode, SetTextColor,
                TRANSPARENT,
            },
            System::LibraryLoader::GetModuleHandleW,
            UI::{
                Input::KeyboardAndMouse::{SetFocus, VK_ESCAPE},
                WindowsAndMessaging::{
                    CS_HREDRAW, CS_VREDRAW, CreateWindowExW, DefWindowProcW, DestroyWindow,
                    DispatchMessageW, GetClientRect, GetMessageW, MSG, PostMessageW,
                    PostQuitMessage, RegisterClassW, SW_SHOW, SetForegroundWindow, ShowWindow,
                    TranslateMessage, WM_CLOSE, WM_DESTROY, WM_KEYDOWN, WM_PAINT, WNDCLASSW,
                    WS_EX_TOOLWINDOW, WS_EX_TOPMOST, WS_POPUP,
                },
            },
        },
        core::{PCWSTR, w},
    };

    use super::{BLOCKED_NOTICE, DismissHandle, Overlay, OverlayManager};
    use crate::{
        error::{Error, Result},
        topology::DisplaySurface,
    };

    const CLASS_NAME: PCWSTR = w!("MonitBlockOverlay");

    thread_local! {
        static ON_DISMISS: OnceCell<DismissHandle> = const { OnceCell::new() };
        static DISMISSED_LOCALLY: Cell<bool> = const { Cell::new(false) };
    }

    /// Overlay manager creating one Win32 popup window, with its own message
    /// loop thread, per overlay.
    #[derive(Debug, Default)]
    pub struct WindowsOverlays;

    impl WindowsOverlays {
        pub fn new() -> Self {
            Self
        }

        /// Win32 class name shared by every overlay window.
        pub const CLASS_NAME: &'static str = "MonitBlockOverlay";
    }

    impl OverlayManager for WindowsOverlays {
        fn mount(
            &self,
            surface: &DisplaySurface,
            on_dismiss: DismissHandle,
        ) -> Result<Box<dyn Overlay>> {
            register_class()?;

            let surface = *surface;
            let (result_tx, result_rx) = oneshot::channel::<io::Result<isize>>();

            let thread = thread::spawn(move || {
                ON_DISMISS.with(|d| {
                    let _ = d.set(on_dismiss);
                });

                let hwnd = match unsafe { create_window(&surface) } {
                    Ok(hwnd) => hwnd,
                    Err(e) => {
                        let _ = result_tx.send(Err(e));
                        return;
                    }
                };
                let _ = result_tx.send(Ok(hwnd.0 as isize));

                let mut msg = MSG::default();
                unsafe {
                    while GetMessageW(&mut msg, None, 0, 0).into() {
                        let _ = TranslateMessage(&msg);
                        DispatchMessageW(&msg);
                    }
                }

                if DISMISSED_LOCALLY.with(Cell::get) {
                    #[cfg(feature = "log")]
                    log::info!("overlay dismissed locally");
                    ON_DISMISS.with(|d| {
                        if let Some(handle) = d.get() {
                            handle.notify();
                        }
                    });
                }
            });

            match result_rx.recv() {
                Ok(Ok(hwnd)) => Ok(Box::new(WindowsOverlay {
                    surface,
                    hwnd,
                    thread: Some(thread),
                })),
                Ok(Err(e)) => {
                    let _ = thread.join();
                    Err(Error::OverlayMountFailed(e))
                }
                Err(_) => Err(Error::OverlayMountFailed(io::Error::other(
                    "overlay thread terminated before creating its window",
                ))),
            }
        }
    }

    struct WindowsOverlay {
        surface: DisplaySurface,
        hwnd: isize,
        thread: Option<thread::JoinHandle<()>>,
    }

    impl Overlay for WindowsOverlay {
        fn surface(&self) -> DisplaySurface {
            self.surface
        }

        fn is_mounted(&self) -> bool {
            self.thread.as_ref().is_some_and(|t| !t.is_finished())
        }

        fn dismiss(mut self: Box<Self>) {
            let Some(thread) = self.thread.take() else {
                return;
            };
            if !thread.is_finished() {
                let hwnd = HWND(self.hwnd as *mut _);
                if let Err(_e) = unsafe { PostMessageW(Some(hwnd), WM_CLOSE, WPARAM(0), LPARAM(0)) }
                {
                    #[cfg(feature = "log")]
                    log::warn!("failed to close overlay window: {}", _e);
                }
            }
            let _ = thread.join();
        }
    }

    fn register_class() -> Result<()> {
        static ATOM: OnceLock<u16> = OnceLock::new();

        let atom = *ATOM.get_or_init(|| unsafe {
            let Ok(module) = GetModuleHandleW(None) else {
                return 0;
            };
            let wc = WNDCLASSW {
                lpfnWndProc: Some(wnd_proc),
                hInstance: module.into(),
                lpszClassName: CLASS_NAME,
                style: CS_HREDRAW | CS_VREDRAW,
                hbrBackground: HBRUSH(GetStockObject(BLACK_BRUSH).0),
                ..Default::default()
            };
            RegisterClassW(&wc)
        });

        if atom == 0 {
            Err(Error::OverlayMountFailed(io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }

    unsafe fn create_window(surface: &DisplaySurface) -> io::Result<HWND> {
        let module = unsafe { GetModuleHandleW(None) }?;
        let hwnd = unsafe {
            CreateWindowExW(
                WS_EX_TOPMOST | WS_EX_TOOLWINDOW,
                CLASS_NAME,
                w!("Monit"),
                WS_POPUP,
                surface.x,
                surface.y,
                surface.width,
                surface.height,
                None,
                None,
                Some(module.into()),
                None,
            )
        }?;

        unsafe {
            let _ = ShowWindow(hwnd, SW_SHOW);
            // Focus is needed for the Escape gesture to reach the window.
            let _ = SetForegroundWindow(hwnd);
            let _ = SetFocus(Some(hwnd));
        }
        Ok(hwnd)
    }

    unsafe extern "system" fn wnd_proc(
        hwnd: HWND,
        msg: u32,
        w_param: WPARAM,
        l_param: LPARAM,
    ) -> LRESULT {
        match msg {
            WM_PAINT => {
                unsafe { paint(hwnd) };
                LRESULT(0)
            }
            WM_KEYDOWN if w_param.0 == VK_ESCAPE.0 as usize => {
                DISMISSED_LOCALLY.with(|d| d.set(true));
                let _ = unsafe { DestroyWindow(hwnd) };
                LRESULT(0)
            }
            WM_DESTROY => {
                unsafe { PostQuitMessage(0) };
                LRESULT(0)
            }
            _ => unsafe { DefWindowProcW(hwnd, msg, w_param, l_param) },
        }
    }

    unsafe fn paint(hwnd: HWND) {
        let mut ps = PAINTSTRUCT::default();
        let hdc = unsafe { BeginPaint(hwnd, &mut ps) };
        if hdc.is_invalid() {
            return;
        }

        let mut rect = RECT::default();
        let mut text: Vec<u16> = BLOCKED_NOTICE.encode_utf16().collect();
        unsafe {
            let _ = GetClientRect(hwnd, &mut rect);
            FillRect(hdc, &rect, HBRUSH(GetStockObject(BLACK_BRUSH).0));
            SetBkMode(hdc, TRANSPARENT);
            SetTextColor(hdc, COLORREF(0x00FF_FFFF));
            DrawTextW(
                hdc,
                &mut text,
                &mut rect,
                DT_CENTER | DT_VCENTER | DT_SINGLELINE,
            );
            let _ = EndPaint(hwnd, &ps);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn dismiss_handle_clones_share_the_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = {
            let count = count.clone();
            DismissHandle::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        handle.clone().notify();
        handle.notify();
        DismissHandle::noop().notify();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
