//! Foreground, activation, focus and capture
//!
//! Each desktop has at most one foreground process. Each process has an
//! active top-level window, a focus window, a capture window and the window
//! that was active before. Only the foreground process receives activation
//! traffic; a background process just records its choices.
//!
//! Every step that sends a message checks afterwards that the state it
//! acted on still holds, and gives up if a procedure changed it.

use super::message::*;
use super::window::WindowFlags;
use super::zorder::InsertAfter;
use super::{DesktopId, Hwnd};
use crate::kernel::trace::TraceCategory;
use crate::kernel::{Kernel, KernelError, KernelResult, Pid};
use serde::{Deserialize, Serialize};

/// On whose behalf a focus operation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Caller {
    /// Input routing and the kernel itself; never refused
    System,
    Process(Pid),
}

// ========== QUERIES ==========

impl Kernel {
    pub fn foreground_process(&self, desktop: DesktopId) -> Option<Pid> {
        self.desktop(desktop).and_then(|d| d.foreground)
    }

    /// Active window of the foreground process
    pub fn get_foreground_window(&self, desktop: DesktopId) -> Hwnd {
        self.foreground_process(desktop)
            .map(|pid| self.get_active_window(pid))
            .unwrap_or_default()
    }

    pub fn get_active_window(&self, pid: Pid) -> Hwnd {
        self.process(pid).map(|p| p.input.active).unwrap_or_default()
    }

    pub fn get_focus(&self, pid: Pid) -> Hwnd {
        self.process(pid).map(|p| p.input.focus).unwrap_or_default()
    }

    pub fn get_capture(&self, pid: Pid) -> Hwnd {
        self.process(pid).map(|p| p.input.capture).unwrap_or_default()
    }

    fn is_foreground(&self, pid: Pid) -> bool {
        self.process(pid)
            .is_some_and(|p| self.foreground_process(p.desktop) == Some(pid))
    }

    /// Whether `caller` may hand the foreground to `target`
    fn may_set_foreground(&self, caller: Caller, target: Pid) -> bool {
        let Caller::Process(pid) = caller else {
            return true;
        };
        let Some(desktop) = self.process(pid).map(|p| p.desktop) else {
            return false;
        };
        match self.foreground_process(desktop) {
            None => true,
            Some(fg) if fg == pid || fg == target => true,
            _ => self.process(target).is_some_and(|p| p.input.allow_set_foreground),
        }
    }
}

// ========== ACTIVATION ==========

impl Kernel {
    /// Grant `target` one foreground change it could not make on its own
    pub fn allow_set_foreground(&mut self, caller: Caller, target: Pid) -> KernelResult<()> {
        if let Caller::Process(pid) = caller {
            if !self.may_set_foreground(caller, pid) {
                return Err(KernelError::AccessDenied);
            }
        }
        let process = self.process_mut(target).ok_or(KernelError::NotFound)?;
        process.input.allow_set_foreground = true;
        Ok(())
    }

    /// SetForegroundWindow; false when refused or overtaken
    pub fn set_foreground_window(&mut self, caller: Caller, hwnd: Hwnd) -> KernelResult<bool> {
        self.set_foreground_inner(caller, hwnd, WA_ACTIVE)
    }

    pub(crate) fn set_foreground_inner(
        &mut self,
        caller: Caller,
        hwnd: Hwnd,
        state: WParam,
    ) -> KernelResult<bool> {
        let top = self.root_ancestor(hwnd);
        let (pid, desktop) = self
            .window(top)
            .map(|w| (w.pid, w.desktop))
            .ok_or(KernelError::InvalidWindowHandle)?;
        if self.window(top).is_some_and(|w| w.is_no_activate()) && caller != Caller::System {
            return Ok(false);
        }
        if !self.may_set_foreground(caller, pid) {
            log::debug!("{:?} may not move the foreground to process {}", caller, pid);
            return Ok(false);
        }
        if let Some(p) = self.process_mut(pid) {
            p.input.allow_set_foreground = false;
        }

        let previous = self.foreground_process(desktop);
        if previous != Some(pid) {
            if let Some(old) = previous {
                let old_active = self.get_active_window(old);
                if self.shows_active(old_active) {
                    self.mark_caption(old_active, false);
                    self.notify(old_active, WM_NCACTIVATE, 0, 0);
                    self.notify(old_active, WM_ACTIVATE, WA_INACTIVE, top.0 as LParam);
                    if self.foreground_process(desktop) != previous {
                        return Ok(false);
                    }
                }
                let old_focus = self.get_focus(old);
                if self.is_window(old_focus) {
                    self.notify(old_focus, WM_KILLFOCUS, 0, 0);
                }
            }
            if let Some(d) = self.desktop_mut(desktop) {
                d.foreground = Some(pid);
            }
            self.trace(TraceCategory::Focus, "foreground", Some(pid), || top.to_string());
            // The window the process had active lost its caption when it fell back
            let kept = self.get_active_window(pid);
            if kept == top {
                self.mark_caption(top, true);
                self.notify(top, WM_NCACTIVATE, 1, 0);
                self.notify(top, WM_ACTIVATE, state, 0);
                if self.get_active_window(pid) != top {
                    return Ok(false);
                }
                let focus = self.get_focus(pid);
                if self.is_window(focus) && self.is_self_or_descendant(top, focus) {
                    self.notify(focus, WM_SETFOCUS, 0, 0);
                } else {
                    self.focus_into(pid, top)?;
                }
                return Ok(true);
            }
        }
        self.activate_in_process(pid, top, state, true)
    }

    /// SetActiveWindow; returns the previously active window
    pub fn set_active_window(&mut self, caller: Caller, hwnd: Hwnd) -> KernelResult<Hwnd> {
        let top = self.root_ancestor(hwnd);
        let (pid, desktop) = self
            .window(top)
            .map(|w| (w.pid, w.desktop))
            .ok_or(KernelError::InvalidWindowHandle)?;
        if let Caller::Process(c) = caller {
            if c != pid {
                return Err(KernelError::AccessDenied);
            }
        }
        let previous = self.get_active_window(pid);
        if self.foreground_process(desktop).is_none() {
            if let Some(d) = self.desktop_mut(desktop) {
                d.foreground = Some(pid);
            }
        }
        self.activate_in_process(pid, top, WA_ACTIVE, true)?;
        Ok(previous)
    }

    /// Make `hwnd` the process's active window
    ///
    /// Returns false when a procedure changed activation underneath.
    pub(crate) fn activate_in_process(
        &mut self,
        pid: Pid,
        hwnd: Hwnd,
        state: WParam,
        focus: bool,
    ) -> KernelResult<bool> {
        let previous = self.get_active_window(pid);
        if !self.is_foreground(pid) {
            if let Some(p) = self.process_mut(pid) {
                if p.input.active != hwnd {
                    p.input.prev_active = p.input.active;
                    p.input.active = hwnd;
                }
            }
            return Ok(true);
        }
        if previous == hwnd {
            if focus {
                self.focus_into(pid, hwnd)?;
            }
            return Ok(true);
        }
        let busy = self
            .window(hwnd)
            .map(|w| w.flags.contains(WindowFlags::BEING_ACTIVATED))
            .ok_or(KernelError::InvalidWindowHandle)?;
        if busy {
            return Ok(false);
        }
        if let Some(w) = self.window_mut(hwnd) {
            w.flags.insert(WindowFlags::BEING_ACTIVATED);
        }
        let result = self.run_activation(pid, previous, hwnd, state);
        if let Some(w) = self.window_mut(hwnd) {
            w.flags.remove(WindowFlags::BEING_ACTIVATED);
        }
        if !result? {
            return Ok(false);
        }
        if focus {
            self.focus_into(pid, hwnd)?;
        }
        Ok(true)
    }

    fn run_activation(&mut self, pid: Pid, previous: Hwnd, hwnd: Hwnd, state: WParam) -> KernelResult<bool> {
        // A window recorded while its process was in the background was
        // never activated, so it gets no deactivation either
        if self.shows_active(previous) {
            self.mark_caption(previous, false);
            self.send_message(previous, WM_NCACTIVATE, 0, 0)?;
            if self.get_active_window(pid) != previous {
                return Ok(false);
            }
            self.send_message(previous, WM_ACTIVATE, WA_INACTIVE, hwnd.0 as LParam)?;
            if self.get_active_window(pid) != previous {
                return Ok(false);
            }
        }
        if let Some(p) = self.process_mut(pid) {
            p.input.prev_active = previous;
            p.input.active = hwnd;
        }
        if self.window(hwnd).is_some_and(|w| w.flags.contains(WindowFlags::LINKED)) {
            self.relink_window(hwnd, InsertAfter::Top)?;
        }
        self.trace(TraceCategory::Focus, "activate", Some(pid), || {
            format!("{} -> {}", previous, hwnd)
        });

        self.mark_caption(hwnd, true);
        self.send_message(hwnd, WM_NCACTIVATE, 1, 0)?;
        if self.get_active_window(pid) != hwnd || !self.is_window(hwnd) {
            return Ok(false);
        }
        self.send_message(hwnd, WM_ACTIVATE, state, previous.0 as LParam)?;
        Ok(self.get_active_window(pid) == hwnd && self.is_window(hwnd))
    }

    /// Whether the window's caption was last drawn active
    fn shows_active(&self, hwnd: Hwnd) -> bool {
        self.window(hwnd)
            .is_some_and(|w| w.flags.contains(WindowFlags::NC_ACTIVE))
    }

    fn mark_caption(&mut self, hwnd: Hwnd, active: bool) {
        if let Some(w) = self.window_mut(hwnd) {
            w.flags.set(WindowFlags::NC_ACTIVE, active);
        }
    }

    /// Focus `hwnd` unless the focus already lies inside it
    fn focus_into(&mut self, pid: Pid, hwnd: Hwnd) -> KernelResult<()> {
        let focus = self.get_focus(pid);
        if focus.is_null() || !self.is_self_or_descendant(hwnd, focus) {
            self.set_focus_internal(pid, hwnd)?;
        }
        Ok(())
    }

    /// Hand activation to another window when `hwnd` stops being eligible
    ///
    /// Candidates, in order: siblings behind `hwnd`, its owner chain, then
    /// every top-level window front to back. Returns the new active window.
    pub fn activate_other_window(&mut self, hwnd: Hwnd) -> KernelResult<Hwnd> {
        let (pid, desktop, owner) = self
            .window(hwnd)
            .map(|w| (w.pid, w.desktop, w.owner))
            .ok_or(KernelError::InvalidWindowHandle)?;
        let foreground = self.is_foreground(pid);

        let mut candidates = Vec::new();
        let mut next = self.window(hwnd).map(|w| w.next).unwrap_or_default();
        while let Some(w) = self.window(next) {
            candidates.push(next);
            next = w.next;
            if candidates.len() > self.objects.len() {
                break;
            }
        }
        let mut current = owner;
        while let Some(w) = self.window(current) {
            candidates.push(current);
            current = w.owner;
            if candidates.len() > 2 * self.objects.len() {
                break;
            }
        }
        candidates.extend(self.top_level_windows(desktop));

        let choice = candidates.into_iter().find(|c| {
            *c != hwnd
                && self.window(*c).is_some_and(|w| {
                    w.is_visible()
                        && !w.is_minimized()
                        && !w.is_child()
                        && !w.is_no_activate()
                        && !w.is_disabled()
                        && !w.flags.contains(WindowFlags::IN_DESTROY)
                        && (foreground || w.pid == pid)
                })
        });

        match choice {
            Some(next) => {
                let next_pid = self.process_of(next).unwrap_or(pid);
                if next_pid == pid {
                    self.activate_in_process(pid, next, WA_ACTIVE, true)?;
                } else {
                    self.release_activation(pid);
                    self.set_foreground_inner(Caller::System, next, WA_ACTIVE)?;
                }
                Ok(self.get_active_window(next_pid))
            }
            None => {
                self.release_activation(pid);
                Ok(Hwnd::NULL)
            }
        }
    }

    /// Drop the active and focus windows of a process, telling them
    fn release_activation(&mut self, pid: Pid) {
        let active = self.get_active_window(pid);
        let foreground = self.is_foreground(pid);
        if let Some(p) = self.process_mut(pid) {
            p.input.prev_active = active;
            p.input.active = Hwnd::NULL;
        }
        if foreground && self.shows_active(active) {
            self.mark_caption(active, false);
            self.notify(active, WM_NCACTIVATE, 0, 0);
            self.notify(active, WM_ACTIVATE, WA_INACTIVE, 0);
        }
        if let Err(e) = self.set_focus_internal(pid, Hwnd::NULL) {
            log::debug!("process {}: dropping focus failed: {}", pid, e);
        }
    }

    /// Release capture, activation and focus, in that order
    pub(crate) fn deactivate_all(&mut self, pid: Pid) {
        if let Err(e) = self.release_capture(pid) {
            log::debug!("process {}: releasing capture failed: {}", pid, e);
        }
        self.release_activation(pid);
    }
}

// ========== FOCUS AND CAPTURE ==========

impl Kernel {
    /// SetFocus; returns the previous focus window
    pub fn set_focus(&mut self, caller: Caller, hwnd: Hwnd) -> KernelResult<Hwnd> {
        if hwnd.is_null() {
            let Caller::Process(pid) = caller else {
                return Err(KernelError::InvalidParameter("focus owner unknown".into()));
            };
            let previous = self.get_focus(pid);
            self.set_focus_internal(pid, Hwnd::NULL)?;
            return Ok(previous);
        }
        let (pid, desktop) = self
            .window(hwnd)
            .map(|w| (w.pid, w.desktop))
            .ok_or(KernelError::InvalidWindowHandle)?;
        if let Caller::Process(c) = caller {
            if c != pid {
                return Err(KernelError::AccessDenied);
            }
        }
        let previous = self.get_focus(pid);
        if previous == hwnd {
            return Ok(previous);
        }

        let top = self.root_ancestor(hwnd);
        if self.get_active_window(pid) != top {
            if self.foreground_process(desktop).is_none() {
                if let Some(d) = self.desktop_mut(desktop) {
                    d.foreground = Some(pid);
                }
            }
            let done = self.activate_in_process(pid, top, WA_ACTIVE, false)?;
            if !done || self.get_active_window(pid) != top {
                return Ok(Hwnd::NULL);
            }
        }
        self.set_focus_internal(pid, hwnd)?;
        Ok(previous)
    }

    /// Move the focus, sending KILLFOCUS and SETFOCUS in the foreground
    pub(crate) fn set_focus_internal(&mut self, pid: Pid, hwnd: Hwnd) -> KernelResult<bool> {
        let previous = self.get_focus(pid);
        if previous == hwnd {
            return Ok(true);
        }
        if let Some(p) = self.process_mut(pid) {
            p.input.focus = hwnd;
        }
        self.trace(TraceCategory::Focus, "focus", Some(pid), || {
            format!("{} -> {}", previous, hwnd)
        });
        if !self.is_foreground(pid) {
            return Ok(true);
        }
        if self.is_window(previous) {
            self.send_message(previous, WM_KILLFOCUS, hwnd.0 as WParam, 0)?;
            if self.get_focus(pid) != hwnd {
                return Ok(false);
            }
        }
        if self.is_window(hwnd) {
            self.send_message(hwnd, WM_SETFOCUS, previous.0 as WParam, 0)?;
        }
        Ok(self.get_focus(pid) == hwnd)
    }

    /// SetCapture; returns the previous capture window
    pub fn set_capture(&mut self, pid: Pid, hwnd: Hwnd) -> KernelResult<Hwnd> {
        let owner = self.process_of(hwnd).ok_or(KernelError::InvalidWindowHandle)?;
        if owner != pid {
            return Err(KernelError::AccessDenied);
        }
        let previous = self.get_capture(pid);
        if previous == hwnd {
            return Ok(previous);
        }
        if let Some(p) = self.process_mut(pid) {
            p.input.capture = hwnd;
        }
        if self.is_window(previous) {
            self.send_message(previous, WM_CAPTURECHANGED, 0, hwnd.0 as LParam)?;
        }
        Ok(previous)
    }

    /// ReleaseCapture; false when nothing was captured
    pub fn release_capture(&mut self, pid: Pid) -> KernelResult<bool> {
        let previous = self.get_capture(pid);
        if previous.is_null() {
            return Ok(false);
        }
        if let Some(p) = self.process_mut(pid) {
            p.input.capture = Hwnd::NULL;
        }
        if self.is_window(previous) {
            self.send_message(previous, WM_CAPTURECHANGED, 0, 0)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::kernel::ProcessOptions;
    use crate::user::class::WindowClass;
    use crate::user::manager::CreateWindowParams;
    use crate::user::window::WindowProc;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<(Hwnd, u32, WParam)>>>;

    const FOCUS_TRAFFIC: [u32; 4] = [WM_SETFOCUS, WM_KILLFOCUS, WM_ACTIVATE, WM_NCACTIVATE];

    fn process(k: &mut Kernel, name: &str, log: &Log) -> Pid {
        let (pid, _endpoints) = k.create_process(name, &ProcessOptions::default()).unwrap();
        let sink = log.clone();
        let proc = WindowProc::local(move |k, hwnd, msg, wp, lp| {
            if FOCUS_TRAFFIC.contains(&msg) {
                sink.borrow_mut().push((hwnd, msg, wp));
            }
            k.def_window_proc(hwnd, msg, wp, lp)
        });
        k.register_class(WindowClass::new("W", pid, proc)).unwrap();
        pid
    }

    fn top(k: &mut Kernel, pid: Pid) -> Hwnd {
        k.create_window(pid, &CreateWindowParams::new("W", "", WS_OVERLAPPEDWINDOW | WS_VISIBLE))
            .unwrap()
    }

    #[test]
    fn test_first_shown_window_takes_foreground() {
        let mut k = Kernel::new(KernelConfig::with_screen(800, 600));
        let log = Log::default();
        let a = process(&mut k, "a", &log);
        let w = top(&mut k, a);
        assert_eq!(k.foreground_process(DesktopId::DEFAULT), Some(a));
        assert_eq!(k.get_active_window(a), w);
        assert_eq!(k.get_focus(a), w);
        assert!(k.window(w).unwrap().flags.contains(WindowFlags::NC_ACTIVE));
    }

    #[test]
    fn test_set_focus_child_then_repeat_is_silent() {
        let mut k = Kernel::new(KernelConfig::with_screen(800, 600));
        let log = Log::default();
        let a = process(&mut k, "a", &log);
        let parent = top(&mut k, a);
        let child = k
            .create_window(a, &CreateWindowParams::new("W", "", WS_CHILD | WS_VISIBLE).parent(parent))
            .unwrap();
        log.borrow_mut().clear();

        assert_eq!(k.set_focus(Caller::Process(a), child), Ok(parent));
        assert_eq!(
            *log.borrow(),
            vec![(parent, WM_KILLFOCUS, child.0 as WParam), (child, WM_SETFOCUS, parent.0 as WParam)]
        );
        log.borrow_mut().clear();
        assert_eq!(k.set_focus(Caller::Process(a), child), Ok(child));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_background_process_cannot_steal_foreground() {
        let mut k = Kernel::new(KernelConfig::with_screen(800, 600));
        let log = Log::default();
        let a = process(&mut k, "a", &log);
        let b = process(&mut k, "b", &log);
        let wa = top(&mut k, a);
        let wb = top(&mut k, b);
        // b showed its window in the background
        assert_eq!(k.foreground_process(DesktopId::DEFAULT), Some(a));
        assert_eq!(k.get_active_window(b), wb);
        assert!(!k.window(wb).unwrap().flags.contains(WindowFlags::NC_ACTIVE));

        assert_eq!(k.set_foreground_window(Caller::Process(b), wb), Ok(false));
        k.allow_set_foreground(Caller::Process(a), b).unwrap();
        assert_eq!(k.set_foreground_window(Caller::Process(b), wb), Ok(true));
        assert_eq!(k.foreground_process(DesktopId::DEFAULT), Some(b));
        assert!(!k.window(wa).unwrap().flags.contains(WindowFlags::NC_ACTIVE));
        assert!(k.window(wb).unwrap().flags.contains(WindowFlags::NC_ACTIVE));
        // The grant is one-shot
        assert!(!k.process(b).unwrap().input().allow_set_foreground);
    }

    #[test]
    fn test_regaining_foreground_skips_window_never_activated() {
        let mut k = Kernel::new(KernelConfig::with_screen(800, 600));
        let log = Log::default();
        let a = process(&mut k, "a", &log);
        let b = process(&mut k, "b", &log);
        let b1 = top(&mut k, b);
        let wa = top(&mut k, a);
        assert_eq!(k.set_foreground_window(Caller::System, wa), Ok(true));
        // Shown while b is in the background: recorded, never activated
        let b2 = top(&mut k, b);
        assert_eq!(k.get_active_window(b), b2);
        assert!(!k.window(b2).unwrap().flags.contains(WindowFlags::NC_ACTIVE));

        log.borrow_mut().clear();
        assert_eq!(k.set_foreground_window(Caller::System, b1), Ok(true));
        assert!(log.borrow().iter().all(|(h, _, _)| *h != b2));
        assert_eq!(k.get_active_window(b), b1);
        assert!(k.window(b1).unwrap().flags.contains(WindowFlags::NC_ACTIVE));
        assert!(!k.window(wa).unwrap().flags.contains(WindowFlags::NC_ACTIVE));
    }

    #[test]
    fn test_deactivate_all_order() {
        let mut k = Kernel::new(KernelConfig::with_screen(800, 600));
        let log = Log::default();
        let a = process(&mut k, "a", &log);
        let w = top(&mut k, a);
        k.set_capture(a, w).unwrap();
        log.borrow_mut().clear();
        k.deactivate_all(a);
        let msgs: Vec<u32> = log.borrow().iter().map(|(_, m, _)| *m).collect();
        assert_eq!(msgs, vec![WM_NCACTIVATE, WM_ACTIVATE, WM_KILLFOCUS]);
        assert!(k.get_capture(a).is_null());
        assert!(k.get_active_window(a).is_null());
        assert!(k.get_focus(a).is_null());
    }

    #[test]
    fn test_hide_active_picks_next_sibling() {
        let mut k = Kernel::new(KernelConfig::with_screen(800, 600));
        let log = Log::default();
        let a = process(&mut k, "a", &log);
        let first = top(&mut k, a);
        let second = top(&mut k, a);
        let third = top(&mut k, a);
        assert_eq!(k.get_active_window(a), third);
        assert_eq!(k.top_level_windows(DesktopId::DEFAULT), vec![third, second, first]);

        k.show_window(second, SW_MINIMIZE).unwrap();
        k.show_window(third, SW_HIDE).unwrap();
        // second is minimized, so first is next
        assert_eq!(k.get_active_window(a), first);
        k.show_window(first, SW_HIDE).unwrap();
        assert!(k.get_active_window(a).is_null());
    }

    #[test]
    fn test_capture_changed_sent() {
        let mut k = Kernel::new(KernelConfig::with_screen(800, 600));
        let log = Log::default();
        let a = process(&mut k, "a", &log);
        let b = process(&mut k, "b", &log);
        let w1 = top(&mut k, a);
        let w2 = top(&mut k, a);
        let other = top(&mut k, b);
        assert_eq!(k.set_capture(a, other), Err(KernelError::AccessDenied));
        k.set_capture(a, w1).unwrap();
        assert_eq!(k.set_capture(a, w2), Ok(w1));
        assert!(k.release_capture(a).unwrap());
        assert!(!k.release_capture(a).unwrap());
    }
}
