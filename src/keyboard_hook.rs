use std::sync::Arc;

use crate::{error::Result, event_handler::KeySink};

#[cfg(windows)]
pub use platform::{WindowsKeyHook, key_from_virtual_key};

/// A process-wide keyboard hook.
///
/// Once installed, every key event is reported to the sink, whose
/// [`HookAction`](crate::event_handler::HookAction) decides whether the event
/// propagates to other applications.
pub trait KeyHookProvider {
    fn install(&mut self, sink: Arc<dyn KeySink>) -> Result<()>;

    /// Removes the hook. Does nothing if it is not installed.
    fn uninstall(&mut self);
}

#[cfg(windows)]
mod platform {
    use std::{cell::OnceCell, sync::Arc, thread};

    use windows::{
        Win32::{
            Foundation::{LPARAM, LRESULT, WPARAM},
            System::{LibraryLoader::GetModuleHandleW, Threading::GetCurrentThreadId},
            UI::{
                Input::KeyboardAndMouse::{
                    VIRTUAL_KEY, VK_BACK, VK_CONTROL, VK_DELETE, VK_DOWN, VK_END, VK_ESCAPE,
                    VK_F1, VK_F24, VK_HOME, VK_INSERT, VK_LCONTROL, VK_LEFT, VK_LMENU,
                    VK_LSHIFT, VK_LWIN, VK_MENU, VK_NEXT, VK_PRIOR, VK_RCONTROL, VK_RETURN,
                    VK_RIGHT, VK_RMENU, VK_RSHIFT, VK_RWIN, VK_SHIFT, VK_SPACE, VK_TAB, VK_UP,
                },
                WindowsAndMessaging::{
                    CallNextHookEx, DispatchMessageW, GetMessageW, HC_ACTION, HHOOK, HOOKPROC,
                    KBDLLHOOKSTRUCT, MSG, PostThreadMessageW, SetWindowsHookExW,
                    TranslateMessage, WH_KEYBOARD_LL, WM_KEYDOWN, WM_KEYUP, WM_QUIT,
                    WM_SYSKEYDOWN, WM_SYSKEYUP,
                },
            },
        },
        core::Owned,
    };

    use super::KeyHookProvider;
    use crate::{
        error::{Error, Result},
        event_handler::{HookAction, KeyInput, KeySink, KeyState},
        hotkey::{Key, Modifier},
    };

    thread_local! {
        static GLOBAL_SINK: OnceCell<Arc<dyn KeySink>> = const { OnceCell::new() };
    }

    struct HookThread {
        thread_id: u32,
        join: thread::JoinHandle<()>,
    }

    /// `WH_KEYBOARD_LL` hook running on its own message-loop thread.
    #[derive(Default)]
    pub struct WindowsKeyHook {
        thread: Option<HookThread>,
    }

    impl WindowsKeyHook {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_installed(&self) -> bool {
            self.thread.as_ref().is_some_and(|t| !t.join.is_finished())
        }
    }

    impl KeyHookProvider for WindowsKeyHook {
        fn install(&mut self, sink: Arc<dyn KeySink>) -> Result<()> {
            if self.thread.is_some() {
                return Ok(());
            }

            let (result_tx, result_rx) = oneshot::channel::<Result<u32>>();

            let join = thread::spawn(move || {
                GLOBAL_SINK.with(|g| {
                    let _ = g.set(sink);
                });

                let hook_result = unsafe { register_keyboard_hook(Some(low_level_keyboard_proc)) };

                let _hook_handle = match hook_result {
                    Err(e) => {
                        #[cfg(feature = "log")]
                        log::error!("Failed to register keyboard hook: {}", e);
                        let _ = result_tx.send(Err(Error::HookRegistrationFailed(e)));
                        return;
                    }
                    Ok(handle) => {
                        let _ = result_tx.send(Ok(unsafe { GetCurrentThreadId() }));
                        handle
                    }
                };

                #[cfg(feature = "log")]
                log::info!("registered keyboard hook");

                let mut msg = MSG::default();
                unsafe {
                    while GetMessageW(&mut msg, None, 0, 0).into() {
                        let _ = TranslateMessage(&msg);
                        DispatchMessageW(&msg);
                    }
                }

                #[cfg(feature = "log")]
                log::info!("keyboard hook removed");
            });

            match result_rx.recv() {
                Ok(Ok(thread_id)) => {
                    self.thread = Some(HookThread { thread_id, join });
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::HookThreadCrashed),
            }
        }

        fn uninstall(&mut self) {
            let Some(hook) = self.thread.take() else {
                return;
            };
            if let Err(_e) =
                unsafe { PostThreadMessageW(hook.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) }
            {
                #[cfg(feature = "log")]
                log::warn!("failed to stop keyboard hook thread: {}", _e);
                return;
            }
            let _ = hook.join.join();
        }
    }

    impl Drop for WindowsKeyHook {
        fn drop(&mut self) {
            self.uninstall();
        }
    }

    unsafe extern "system" fn low_level_keyboard_proc(
        n_code: i32,
        w_param: WPARAM,
        l_param: LPARAM,
    ) -> LRESULT {
        if n_code == HC_ACTION as i32 {
            if let Some(input) = unsafe { key_input_from_params(l_param, w_param) } {
                let action = GLOBAL_SINK.with(|s| s.get().map(|sink| sink.on_key(&input)));
                if action == Some(HookAction::Suppress) {
                    return LRESULT(1);
                }
            }
        }

        unsafe { CallNextHookEx(None, n_code, w_param, l_param) }
    }

    /// # Safety
    /// `l_param` must be a valid pointer to a `KBDLLHOOKSTRUCT`.
    unsafe fn key_input_from_params(l_param: LPARAM, w_param: WPARAM) -> Option<KeyInput> {
        let kbd = unsafe { *(l_param.0 as *const KBDLLHOOKSTRUCT) };
        let state = match w_param.0 as u32 {
            WM_KEYDOWN | WM_SYSKEYDOWN => KeyState::Down,
            WM_KEYUP | WM_SYSKEYUP => KeyState::Up,
            _ => return None,
        };
        Some(KeyInput {
            key: key_from_virtual_key(VIRTUAL_KEY(kbd.vkCode as _)),
            state,
        })
    }

    /// Translates a virtual key code to the key name used in combos.
    pub fn key_from_virtual_key(vk: VIRTUAL_KEY) -> Key {
        let named = |s: &str| Key::Named(s.to_string());
        match vk {
            VK_CONTROL | VK_LCONTROL | VK_RCONTROL => Key::Modifier(Modifier::Ctrl),
            VK_MENU | VK_LMENU | VK_RMENU => Key::Modifier(Modifier::Alt),
            VK_SHIFT | VK_LSHIFT | VK_RSHIFT => Key::Modifier(Modifier::Shift),
            VK_LWIN | VK_RWIN => named("windows"),
            VK_ESCAPE => named("esc"),
            VK_RETURN => named("enter"),
            VK_SPACE => named("space"),
            VK_TAB => named("tab"),
            VK_BACK => named("backspace"),
            VK_DELETE => named("delete"),
            VK_INSERT => named("insert"),
            VK_HOME => named("home"),
            VK_END => named("end"),
            VK_PRIOR => named("page up"),
            VK_NEXT => named("page down"),
            VK_LEFT => named("left"),
            VK_UP => named("up"),
            VK_RIGHT => named("right"),
            VK_DOWN => named("down"),
            VIRTUAL_KEY(code @ (0x30..=0x39 | 0x41..=0x5A)) => {
                Key::Named(char::from(code as u8).to_ascii_lowercase().to_string())
            }
            VIRTUAL_KEY(code) if (VK_F1.0..=VK_F24.0).contains(&code) => {
                Key::Named(format!("f{}", code - VK_F1.0 + 1))
            }
            VIRTUAL_KEY(code) => Key::Named(format!("vk{code}")),
        }
    }

    unsafe fn register_keyboard_hook(f: HOOKPROC) -> std::io::Result<Owned<HHOOK>> {
        let keyboard_hook = unsafe {
            SetWindowsHookExW(
                WH_KEYBOARD_LL,
                f,
                Some(GetModuleHandleW(None)?.into()),
                0,
            )
        }?;

        Ok(unsafe { Owned::new(keyboard_hook) })
    }

    #[cfg(test)]
    mod tests {
        use windows::Win32::UI::Input::KeyboardAndMouse::{VK_B, VK_F12, VK_RSHIFT, VK_7};

        use super::*;

        #[test]
        fn virtual_keys_use_combo_names() {
            assert_eq!(key_from_virtual_key(VK_B), Key::from_name("b"));
            assert_eq!(key_from_virtual_key(VK_7), Key::from_name("7"));
            assert_eq!(key_from_virtual_key(VK_F12), Key::from_name("F12"));
            assert_eq!(key_from_virtual_key(VK_ESCAPE), Key::from_name("escape"));
            assert_eq!(key_from_virtual_key(VK_RSHIFT), Key::from_name("shift"));
            assert_eq!(key_from_virtual_key(VK_LWIN), Key::from_name("win"));
        }
    }
}
