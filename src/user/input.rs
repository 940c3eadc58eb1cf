//! Pointer and keyboard routing
//!
//! Raw input arrives per desktop. Pointer events go to the capture window of
//! the foreground process, or else to the window under the cursor as found
//! by hit-testing; keys go to the foreground process's focus window. Both
//! end up as posted messages in the target process's queue.

use super::geometry::Point;
use super::layout::default_hit_test;
use super::message::*;
use super::{DesktopId, Hwnd};
use crate::kernel::trace::TraceCategory;
use crate::kernel::{Kernel, KernelResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Button {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerAction {
    Move,
    Down(Button),
    Up(Button),
}

impl PointerAction {
    fn client_message(self) -> u32 {
        match self {
            PointerAction::Move => WM_MOUSEMOVE,
            PointerAction::Down(Button::Left) => WM_LBUTTONDOWN,
            PointerAction::Up(Button::Left) => WM_LBUTTONUP,
            PointerAction::Down(Button::Right) => WM_RBUTTONDOWN,
            PointerAction::Up(Button::Right) => WM_RBUTTONUP,
            PointerAction::Down(Button::Middle) => WM_MBUTTONDOWN,
            PointerAction::Up(Button::Middle) => WM_MBUTTONUP,
        }
    }

    fn nc_message(self) -> u32 {
        match self {
            PointerAction::Move => WM_NCMOUSEMOVE,
            PointerAction::Down(Button::Left) => WM_NCLBUTTONDOWN,
            PointerAction::Up(Button::Left) => WM_NCLBUTTONUP,
            PointerAction::Down(Button::Right) => WM_NCRBUTTONDOWN,
            PointerAction::Up(Button::Right) => WM_NCRBUTTONUP,
            PointerAction::Down(Button::Middle) => WM_NCMBUTTONDOWN,
            PointerAction::Up(Button::Middle) => WM_NCMBUTTONUP,
        }
    }
}

impl Kernel {
    /// Deepest visible, enabled window under `pt`
    pub fn window_from_point(&self, desktop: DesktopId, pt: Point) -> Hwnd {
        let mut candidates = Vec::new();
        self.hit_candidates(self.desktop_window(desktop), pt, &mut candidates);
        candidates.first().copied().unwrap_or_default()
    }

    /// Windows under `pt`, children before their parent, front to back
    fn hit_candidates(&self, parent: Hwnd, pt: Point, out: &mut Vec<Hwnd>) {
        for child in self.child_windows(parent) {
            let Some(w) = self.window(child) else {
                continue;
            };
            if !w.is_visible() || w.is_disabled() || !w.window_rect.contains(pt) {
                continue;
            }
            if w.client_rect.contains(pt) {
                self.hit_candidates(child, pt, out);
            }
            out.push(child);
        }
    }

    /// Window and hit code for a screen point
    ///
    /// Each candidate answers WM_NCHITTEST; HTTRANSPARENT passes the point
    /// on to the next one. A procedure that fails or times out gets the
    /// default answer.
    pub fn hit_test(&mut self, desktop: DesktopId, pt: Point) -> Option<(Hwnd, LResult)> {
        let mut candidates = Vec::new();
        self.hit_candidates(self.desktop_window(desktop), pt, &mut candidates);
        let timeout = self.config.hit_test_timeout_ms;
        let lparam = make_lparam(pt.x, pt.y);
        for hwnd in candidates {
            let code = match self.send_message_timeout(hwnd, WM_NCHITTEST, 0, lparam, timeout) {
                Ok(code) => code,
                Err(e) => {
                    log::debug!("hit test on {} fell back to default: {}", hwnd, e);
                    let metrics = &self.config.metrics;
                    match self.window(hwnd) {
                        Some(w) => default_hit_test(w, pt, metrics),
                        None => continue,
                    }
                }
            };
            if code == HTTRANSPARENT || code == HTNOWHERE || !self.is_window(hwnd) {
                continue;
            }
            return Some((hwnd, code));
        }
        None
    }

    /// Route one pointer event; returns the window that got a message
    pub fn route_pointer(
        &mut self,
        desktop: DesktopId,
        pt: Point,
        action: PointerAction,
    ) -> KernelResult<Option<Hwnd>> {
        self.user.cursor = pt;
        let capture = self
            .foreground_process(desktop)
            .map(|pid| self.get_capture(pid))
            .filter(|h| self.is_window(*h));

        let (hwnd, hit) = match capture {
            Some(hwnd) => (hwnd, HTCLIENT),
            None => match self.hit_test(desktop, pt) {
                Some(found) => found,
                None => return Ok(None),
            },
        };

        if capture.is_none() {
            if let PointerAction::Down(_) = action {
                if !self.click_activate(hwnd, hit, action)? {
                    return Ok(Some(hwnd));
                }
            }
        }
        if !self.is_window(hwnd) {
            return Ok(None);
        }

        if hit == HTCLIENT {
            let origin = self
                .window(hwnd)
                .map(|w| w.client_rect.top_left())
                .unwrap_or_default();
            let lparam = make_lparam(pt.x - origin.x, pt.y - origin.y);
            self.post_message(hwnd, action.client_message(), 0, lparam)?;
        } else {
            let lparam = make_lparam(pt.x, pt.y);
            self.post_message(hwnd, action.nc_message(), hit as WParam, lparam)?;
        }
        self.trace(TraceCategory::Input, "pointer", None, || {
            format!("{:?} at {},{} -> {} hit {}", action, pt.x, pt.y, hwnd, hit)
        });
        Ok(Some(hwnd))
    }

    /// Ask WM_MOUSEACTIVATE and activate the clicked top-level window
    ///
    /// Returns false when the click is eaten.
    fn click_activate(&mut self, hwnd: Hwnd, hit: LResult, action: PointerAction) -> KernelResult<bool> {
        let top = self.root_ancestor(hwnd);
        let lparam = make_lparam(hit as i32, action.client_message() as i32);
        let answer = self.send_message(hwnd, WM_MOUSEACTIVATE, top.0 as WParam, lparam)?;
        let activate = matches!(answer, MA_ACTIVATE | MA_ACTIVATEANDEAT);
        let eat = matches!(answer, MA_ACTIVATEANDEAT | MA_NOACTIVATEANDEAT);

        let eligible = self.window(top).is_some_and(|w| !w.is_no_activate());
        if activate && eligible {
            let desktop = self.window(top).map(|w| w.desktop).unwrap_or(DesktopId::DEFAULT);
            if self.get_foreground_window(desktop) != top {
                self.set_foreground_inner(super::Caller::System, top, WA_CLICKACTIVE)?;
            }
        }
        Ok(!eat)
    }

    /// Route one key event; returns the window that got a message
    pub fn route_key(&mut self, desktop: DesktopId, vk: u32, down: bool) -> KernelResult<Option<Hwnd>> {
        if vk == VK_SHIFT {
            self.user.shift_down = down;
        }
        let Some(pid) = self.foreground_process(desktop) else {
            return Ok(None);
        };
        let focus = self.get_focus(pid);
        let target = if self.is_window(focus) {
            focus
        } else {
            self.get_active_window(pid)
        };
        if !self.is_window(target) {
            return Ok(None);
        }
        let (message, lparam) = if down {
            (WM_KEYDOWN, 1)
        } else {
            (WM_KEYUP, 1 | (3 << 30))
        };
        self.post_message(target, message, vk as WParam, lparam)?;
        self.trace(TraceCategory::Input, "key", Some(pid), || {
            format!("vk {:#x} {} -> {}", vk, if down { "down" } else { "up" }, target)
        });
        Ok(Some(target))
    }
}
