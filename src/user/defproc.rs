//! DefWindowProc

use super::layout::{default_client_rect, default_hit_test};
use super::geometry::Point;
use super::message::*;
use super::window::WindowFlags;
use super::Hwnd;
use crate::kernel::{Kernel, KernelResult};

impl Kernel {
    /// Default processing for messages a procedure did not handle
    pub fn def_window_proc(
        &mut self,
        hwnd: Hwnd,
        message: u32,
        wparam: WParam,
        lparam: LParam,
    ) -> KernelResult<LResult> {
        if !self.is_window(hwnd) {
            return Ok(0);
        }
        match message {
            WM_NCCREATE => Ok(1),
            WM_NCCALCSIZE => {
                let metrics = self.config.metrics.clone();
                if let Some(w) = self.window_mut(hwnd) {
                    w.client_rect = default_client_rect(w.window_rect, w.style, &metrics);
                }
                Ok(0)
            }
            WM_NCHITTEST => {
                let pt = Point::new(get_x_lparam(lparam), get_y_lparam(lparam));
                Ok(self
                    .window(hwnd)
                    .map(|w| default_hit_test(w, pt, &self.config.metrics))
                    .unwrap_or(HTNOWHERE))
            }
            WM_NCACTIVATE => {
                if let Some(w) = self.window_mut(hwnd) {
                    w.flags.set(WindowFlags::NC_ACTIVE, wparam != 0);
                }
                Ok(1)
            }
            WM_SETTEXT => {
                if let Some(w) = self.window_mut(hwnd) {
                    if let Some(text) = w.pending_text.take() {
                        w.title = text;
                    }
                }
                Ok(1)
            }
            WM_CLOSE => {
                self.destroy_window(hwnd)?;
                Ok(0)
            }
            WM_SYSCOMMAND => {
                match wparam & 0xFFF0 {
                    SC_CLOSE => {
                        self.send_message(hwnd, WM_CLOSE, 0, 0)?;
                    }
                    SC_MINIMIZE => {
                        self.show_window(hwnd, SW_MINIMIZE)?;
                    }
                    SC_MAXIMIZE => {
                        self.show_window(hwnd, SW_MAXIMIZE)?;
                    }
                    SC_RESTORE => {
                        self.show_window(hwnd, SW_RESTORE)?;
                    }
                    other => log::trace!("{}: unhandled system command {:#x}", hwnd, other),
                }
                Ok(0)
            }
            WM_NCLBUTTONDOWN => {
                let command = match wparam as LResult {
                    HTCLOSE => Some(SC_CLOSE),
                    HTMINBUTTON => Some(SC_MINIMIZE),
                    HTMAXBUTTON => {
                        let maximized = self.window(hwnd).is_some_and(|w| w.is_maximized());
                        Some(if maximized { SC_RESTORE } else { SC_MAXIMIZE })
                    }
                    _ => None,
                };
                if let Some(command) = command {
                    self.send_message(hwnd, WM_SYSCOMMAND, command, lparam)?;
                }
                Ok(0)
            }
            WM_MOUSEACTIVATE => {
                let parent = self
                    .window(hwnd)
                    .filter(|w| w.is_child())
                    .map(|w| w.parent)
                    .unwrap_or_default();
                if !parent.is_null() {
                    let answer = self.send_message(parent, WM_MOUSEACTIVATE, wparam, lparam)?;
                    if answer != 0 {
                        return Ok(answer);
                    }
                }
                Ok(MA_ACTIVATE)
            }
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Pid, ProcessOptions};
    use crate::user::manager::CreateWindowParams;
    use crate::user::{WindowClass, WindowProc};

    fn setup() -> (Kernel, Pid) {
        let mut k = Kernel::default();
        let (pid, _endpoints) = k.create_process("app", &ProcessOptions::default()).unwrap();
        k.register_class(WindowClass::new("Frame", pid, WindowProc::Default))
            .unwrap();
        (k, pid)
    }

    #[test]
    fn test_nccreate_accepts() {
        let (mut k, pid) = setup();
        let hwnd = k
            .create_window(pid, &CreateWindowParams::new("Frame", "w", WS_OVERLAPPEDWINDOW))
            .unwrap();
        assert_eq!(k.def_window_proc(hwnd, WM_NCCREATE, 0, 0), Ok(1));
    }

    #[test]
    fn test_ncactivate_tracks_flag() {
        let (mut k, pid) = setup();
        let hwnd = k
            .create_window(pid, &CreateWindowParams::new("Frame", "w", WS_OVERLAPPEDWINDOW))
            .unwrap();
        k.def_window_proc(hwnd, WM_NCACTIVATE, 1, 0).unwrap();
        assert!(k.window(hwnd).unwrap().flags.contains(WindowFlags::NC_ACTIVE));
        k.def_window_proc(hwnd, WM_NCACTIVATE, 0, 0).unwrap();
        assert!(!k.window(hwnd).unwrap().flags.contains(WindowFlags::NC_ACTIVE));
    }

    #[test]
    fn test_close_button_destroys() {
        let (mut k, pid) = setup();
        let hwnd = k
            .create_window(pid, &CreateWindowParams::new("Frame", "w", WS_OVERLAPPEDWINDOW))
            .unwrap();
        k.def_window_proc(hwnd, WM_NCLBUTTONDOWN, HTCLOSE as WParam, 0).unwrap();
        assert!(!k.is_window(hwnd));
    }

    #[test]
    fn test_max_button_toggles() {
        let (mut k, pid) = setup();
        let hwnd = k
            .create_window(
                pid,
                &CreateWindowParams::new("Frame", "w", WS_OVERLAPPEDWINDOW | WS_VISIBLE),
            )
            .unwrap();
        k.def_window_proc(hwnd, WM_NCLBUTTONDOWN, HTMAXBUTTON as WParam, 0).unwrap();
        assert!(k.window(hwnd).unwrap().is_maximized());
        k.def_window_proc(hwnd, WM_NCLBUTTONDOWN, HTMAXBUTTON as WParam, 0).unwrap();
        assert!(!k.window(hwnd).unwrap().is_maximized());
    }
}
