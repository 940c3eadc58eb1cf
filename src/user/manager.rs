//! Window lifecycle and placement
//!
//! CreateWindowEx, DestroyWindow, ShowWindow and SetWindowPos, plus the
//! window-long slots, window text and menus.
//!
//! Creation runs in this order: validate parent/owner and class, place the
//! window, allocate its record, device context and visual root, link a
//! child window, NCCREATE, NCCALCSIZE, CREATE, link a top-level window,
//! then show it if it asked to be visible. A procedure refusing NCCREATE
//! or CREATE gets the partial window destroyed again.
//!
//! Destruction runs owned windows first, then PARENTNOTIFY, hide, children,
//! unlink, DESTROY, release of input state and resources, and NCDESTROY as
//! the very last message.

use super::focus::Caller;
use super::geometry::Rect;
use super::message::*;
use super::window::{Link, Window, WindowFlags, WindowProc};
use super::zorder::InsertAfter;
use super::{DesktopId, Hwnd};
use crate::kernel::object::{Handle, KernelObject, Menu};
use crate::kernel::trace::TraceCategory;
use crate::kernel::{Kernel, KernelError, KernelResult, ObjectType, Pid};
use serde::{Deserialize, Serialize};

/// Arguments of CreateWindowEx
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateWindowParams {
    pub ex_style: u32,
    pub class_name: String,
    pub title: String,
    pub style: u32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Parent of a child window, owner of anything else
    pub parent: Hwnd,
    /// Menu of a top-level window
    pub menu: Handle,
    /// Control id of a child window
    pub id: usize,
    pub create_param: isize,
}

impl Default for CreateWindowParams {
    fn default() -> Self {
        Self {
            ex_style: 0,
            class_name: String::new(),
            title: String::new(),
            style: 0,
            x: CW_USEDEFAULT,
            y: CW_USEDEFAULT,
            width: CW_USEDEFAULT,
            height: CW_USEDEFAULT,
            parent: Hwnd::NULL,
            menu: Handle::NULL,
            id: 0,
            create_param: 0,
        }
    }
}

impl CreateWindowParams {
    pub fn new(class_name: &str, title: &str, style: u32) -> Self {
        Self {
            class_name: class_name.to_string(),
            title: title.to_string(),
            style,
            ..Self::default()
        }
    }

    pub fn ex_style(mut self, ex_style: u32) -> Self {
        self.ex_style = ex_style;
        self
    }

    pub fn position(mut self, x: i32, y: i32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn size(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn parent(mut self, parent: Hwnd) -> Self {
        self.parent = parent;
        self
    }

    pub fn menu(mut self, menu: Handle) -> Self {
        self.menu = menu;
        self
    }

    pub fn id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    pub fn create_param(mut self, value: isize) -> Self {
        self.create_param = value;
        self
    }
}

fn is_child_style(style: u32) -> bool {
    style & (WS_CHILD | WS_POPUP) == WS_CHILD
}

// ========== CREATION ==========

impl Kernel {
    /// CreateWindowEx on behalf of `pid`
    pub fn create_window(&mut self, pid: Pid, params: &CreateWindowParams) -> KernelResult<Hwnd> {
        let (desktop, root) = match self.process(pid) {
            Some(p) if p.is_running() => (p.desktop, p.root),
            _ => return Err(KernelError::ProcessTerminated(pid.0)),
        };
        let child = is_child_style(params.style);

        // Parent and owner
        let (parent, owner) = if child {
            if params.parent.is_null() {
                return Err(KernelError::ChildWithoutParent);
            }
            let p = self.window(params.parent).ok_or(KernelError::InvalidWindowHandle)?;
            if p.desktop != desktop {
                return Err(KernelError::InvalidParameter("parent on another desktop".into()));
            }
            (params.parent, Hwnd::NULL)
        } else {
            let owner = if params.parent.is_null() {
                Hwnd::NULL
            } else {
                let o = self.window(params.parent).ok_or(KernelError::InvalidWindowHandle)?;
                if o.desktop != desktop {
                    return Err(KernelError::InvalidParameter("owner on another desktop".into()));
                }
                self.root_ancestor(params.parent)
            };
            (self.desktop_window(desktop), owner)
        };
        if parent.is_null() {
            return Err(KernelError::InvalidParameter(format!("no {}", desktop)));
        }
        if !child
            && !params.menu.is_null()
            && self.objects.object_type(params.menu) != Some(ObjectType::Menu)
        {
            return Err(KernelError::InvalidMenuHandle);
        }

        let class = self
            .find_class(pid, &params.class_name)
            .ok_or_else(|| KernelError::ClassNotFound(params.class_name.clone()))?;

        let window_rect = self.initial_rect(desktop, parent, child, params);

        let mut window = Window::new(pid, desktop, &class.name, &params.title);
        window.style = params.style & !WS_VISIBLE;
        window.ex_style = params.ex_style;
        if self.window(owner).is_some_and(|o| o.is_topmost()) {
            window.ex_style |= WS_EX_TOPMOST;
        }
        window.window_rect = window_rect;
        window.client_rect = window_rect;
        window.restore_rect = window_rect;
        window.proc = class.proc.clone();
        window.extra = vec![0; class.extra_slots];
        window.id = if child { params.id } else { 0 };
        window.create_param = params.create_param;
        window.flags = WindowFlags::IN_CREATE;
        if !child {
            window.flags |= WindowFlags::SEND_SIZE_MOVE;
        }

        let hwnd = self.objects.allocate(KernelObject::Window(Box::new(window)), root);
        if let Some(w) = self.objects.window_mut(hwnd) {
            w.hwnd = hwnd;
        }
        self.set_link(hwnd, Link::Parent, parent);
        self.set_link(hwnd, Link::Owner, owner);
        if !child && !params.menu.is_null() {
            self.objects.set_owner(params.menu, hwnd);
            if let Some(w) = self.objects.window_mut(hwnd) {
                w.menu = params.menu;
            }
        }
        self.attach_surface(hwnd, window_rect);

        self.tracer.stats.windows_created += 1;
        self.trace(TraceCategory::Window, "create", Some(pid), || {
            format!("{} class={} parent={}", hwnd, class.name, parent)
        });

        if child {
            self.link_window(hwnd, parent, InsertAfter::Top);
        }

        if let Err(e) = self.run_creation_messages(hwnd, params) {
            log::debug!("creation of {} aborted: {}", hwnd, e);
            if self.is_window(hwnd) {
                if let Err(destroy_err) = self.destroy_window(hwnd) {
                    log::warn!("disposing partial window {}: {}", hwnd, destroy_err);
                }
            }
            return Err(e);
        }

        if !child {
            let topmost = self.window(hwnd).is_some_and(|w| w.is_topmost());
            let after = if topmost { InsertAfter::Topmost } else { InsertAfter::Top };
            self.link_window(hwnd, parent, after);
        }
        if let Some(w) = self.window_mut(hwnd) {
            w.flags.remove(WindowFlags::IN_CREATE);
        }

        if child && params.ex_style & WS_EX_NOPARENTNOTIFY == 0 {
            self.notify(parent, WM_PARENTNOTIFY, WM_CREATE as WParam, hwnd.0 as LParam);
        }
        self.send_size_move(hwnd, true, true);

        if params.style & WS_VISIBLE != 0 {
            if let Err(e) = self.show_window(hwnd, SW_SHOW) {
                log::warn!("showing new window {}: {}", hwnd, e);
            }
        }
        Ok(hwnd)
    }

    fn run_creation_messages(&mut self, hwnd: Hwnd, params: &CreateWindowParams) -> KernelResult<()> {
        if self.send_message(hwnd, WM_NCCREATE, 0, params.create_param)? == 0 {
            return Err(KernelError::CreationAborted);
        }
        self.recalc_client_rect(hwnd)?;
        if self.send_message(hwnd, WM_CREATE, 0, params.create_param)? == -1 {
            return Err(KernelError::CreationAborted);
        }
        if !self.is_window(hwnd) {
            return Err(KernelError::CreationAborted);
        }
        Ok(())
    }

    /// Screen rectangle of a new window, defaults resolved
    fn initial_rect(
        &mut self,
        desktop: DesktopId,
        parent: Hwnd,
        child: bool,
        params: &CreateWindowParams,
    ) -> Rect {
        if child {
            let origin = self
                .window(parent)
                .map(|p| p.client_rect.top_left())
                .unwrap_or_default();
            let or_zero = |v: i32| if v == CW_USEDEFAULT { 0 } else { v };
            return Rect::from_origin_size(
                origin.x + or_zero(params.x),
                origin.y + or_zero(params.y),
                or_zero(params.width).max(0),
                or_zero(params.height).max(0),
            );
        }
        let (x, y) = if params.x == CW_USEDEFAULT {
            let pt = self.next_cascade_position(desktop);
            (pt.x, pt.y)
        } else {
            (params.x, params.y)
        };
        let (width, height) = if params.width == CW_USEDEFAULT {
            self.default_window_size(desktop)
        } else {
            (params.width.max(0), params.height.max(0))
        };
        Rect::from_origin_size(x, y, width, height)
    }

    fn attach_surface(&mut self, hwnd: Hwnd, rect: Rect) {
        let dc_id = self.user.surface.allocate_dc(hwnd, rect);
        let visual_id = self.user.surface.create_visual(hwnd);
        let dc = self.objects.allocate(KernelObject::DeviceContext(dc_id), hwnd);
        let visual = self.objects.allocate(KernelObject::Visual(visual_id), hwnd);
        if let Some(w) = self.objects.window_mut(hwnd) {
            w.dc = dc;
            w.dc_id = Some(dc_id);
            w.visual = visual;
            w.visual_id = Some(visual_id);
        }
    }

    /// Send a notification whose failure must not stop the caller
    pub(crate) fn notify(&mut self, hwnd: Hwnd, message: u32, wparam: WParam, lparam: LParam) {
        if let Err(e) = self.send_message(hwnd, message, wparam, lparam) {
            log::debug!("{} {:#x} failed: {}", hwnd, message, e);
        }
    }

    fn send_size_move(&mut self, hwnd: Hwnd, sized: bool, moved: bool) {
        let Some(w) = self.window(hwnd) else {
            return;
        };
        if !w.flags.contains(WindowFlags::SEND_SIZE_MOVE) {
            return;
        }
        let client = w.client_rect;
        let kind = if w.is_minimized() {
            SIZE_MINIMIZED
        } else if w.is_maximized() {
            SIZE_MAXIMIZED
        } else {
            SIZE_RESTORED
        };
        let origin = self.client_origin_in_parent(hwnd);
        if sized {
            self.notify(hwnd, WM_SIZE, kind, make_lparam(client.width(), client.height()));
        }
        if moved {
            self.notify(hwnd, WM_MOVE, 0, make_lparam(origin.0, origin.1));
        }
    }

    fn client_origin_in_parent(&self, hwnd: Hwnd) -> (i32, i32) {
        let Some(w) = self.window(hwnd) else {
            return (0, 0);
        };
        let base = if w.is_child() {
            self.window(w.parent)
                .map(|p| p.client_rect.top_left())
                .unwrap_or_default()
        } else {
            Default::default()
        };
        (w.client_rect.left - base.x, w.client_rect.top - base.y)
    }
}

// ========== DESTRUCTION ==========

impl Kernel {
    /// DestroyWindow
    pub fn destroy_window(&mut self, hwnd: Hwnd) -> KernelResult<()> {
        let (pid, desktop, child, ex_style, parent) = match self.window(hwnd) {
            Some(w) if w.flags.contains(WindowFlags::IN_DESTROY) => return Ok(()),
            Some(w) if w.parent.is_null() => {
                return Err(KernelError::AccessDenied);
            }
            Some(w) => (w.pid, w.desktop, w.is_child(), w.ex_style, w.parent),
            None => return Err(KernelError::InvalidWindowHandle),
        };
        if let Some(w) = self.window_mut(hwnd) {
            w.flags.insert(WindowFlags::IN_DESTROY);
        }

        // From here on the window goes away whatever its procedures answer
        let owned: Vec<Hwnd> = self
            .top_level_windows(desktop)
            .into_iter()
            .filter(|h| self.window(*h).is_some_and(|w| w.owner == hwnd))
            .collect();
        for w in owned {
            if let Err(e) = self.destroy_window(w) {
                log::warn!("destroying {} owned by {}: {}", w, hwnd, e);
            }
        }

        if child && ex_style & WS_EX_NOPARENTNOTIFY == 0 {
            self.notify(parent, WM_PARENTNOTIFY, WM_DESTROY as WParam, hwnd.0 as LParam);
        }

        if self.window(hwnd).is_some_and(|w| w.is_visible()) {
            let flags = SwpFlags::HIDEWINDOW
                | SwpFlags::NOMOVE
                | SwpFlags::NOSIZE
                | SwpFlags::NOZORDER
                | SwpFlags::NOACTIVATE;
            if let Err(e) = self.reposition(hwnd, InsertAfter::Top, None, flags) {
                log::warn!("hiding {} for destruction: {}", hwnd, e);
            }
        }

        for c in self.child_windows(hwnd) {
            if let Err(e) = self.destroy_window(c) {
                log::warn!("destroying child {} of {}: {}", c, hwnd, e);
            }
        }

        self.unlink_window(hwnd);
        self.notify(hwnd, WM_DESTROY, 0, 0);
        self.forget_input_references(hwnd);
        self.release_window_resources(hwnd);
        self.notify(hwnd, WM_NCDESTROY, 0, 0);

        if let Some(w) = self.objects.window_mut(hwnd) {
            w.flags.insert(WindowFlags::DESTROYED);
            w.flags.remove(WindowFlags::IN_DESTROY);
        }
        self.set_link(hwnd, Link::Parent, Hwnd::NULL);
        self.set_link(hwnd, Link::Owner, Hwnd::NULL);
        self.set_link(hwnd, Link::FirstChild, Hwnd::NULL);

        self.tracer.stats.windows_destroyed += 1;
        self.trace(TraceCategory::Window, "destroy", Some(pid), || hwnd.to_string());
        self.objects.close(hwnd);
        Ok(())
    }

    fn forget_input_references(&mut self, hwnd: Hwnd) {
        for process in self.processes.values_mut() {
            let input = &mut process.input;
            for slot in [
                &mut input.active,
                &mut input.focus,
                &mut input.capture,
                &mut input.prev_active,
            ] {
                if *slot == hwnd {
                    *slot = Hwnd::NULL;
                }
            }
        }
    }

    fn release_window_resources(&mut self, hwnd: Hwnd) {
        let Some(w) = self.objects.window_mut(hwnd) else {
            return;
        };
        let dc = std::mem::take(&mut w.dc);
        let visual = std::mem::take(&mut w.visual);
        let menu = std::mem::take(&mut w.menu);
        let dc_id = w.dc_id.take();
        let visual_id = w.visual_id.take();
        if let Some(id) = dc_id {
            self.user.surface.release_dc(id);
        }
        if let Some(id) = visual_id {
            self.user.surface.release_visual(id);
        }
        for handle in [dc, visual, menu] {
            if !handle.is_null() {
                self.objects.close(handle);
            }
        }
    }
}

// ========== PLACEMENT ==========

impl Kernel {
    /// ShowWindow; returns whether the window was visible before
    pub fn show_window(&mut self, hwnd: Hwnd, cmd: i32) -> KernelResult<bool> {
        let (was_visible, child, minimized, maximized, restore, window_rect) = self
            .window(hwnd)
            .map(|w| {
                (
                    w.is_visible(),
                    w.is_child(),
                    w.is_minimized(),
                    w.is_maximized(),
                    w.restore_rect,
                    w.window_rect,
                )
            })
            .ok_or(KernelError::InvalidWindowHandle)?;

        let mut flags = SwpFlags::NOZORDER | SwpFlags::NOACTIVATE;
        let mut target = None;
        let mut activate = false;
        let mut style_on = 0;
        let mut style_off = 0;
        match cmd {
            SW_HIDE => {
                if !was_visible {
                    return Ok(false);
                }
                flags |= SwpFlags::HIDEWINDOW;
            }
            SW_SHOW => {
                flags |= SwpFlags::SHOWWINDOW;
                activate = true;
            }
            SW_SHOWNA | SW_SHOWNOACTIVATE => {
                flags |= SwpFlags::SHOWWINDOW;
            }
            SW_SHOWNORMAL | SW_RESTORE => {
                flags |= SwpFlags::SHOWWINDOW;
                activate = true;
                if minimized || maximized {
                    target = Some(restore);
                    style_off = WS_MINIMIZE | WS_MAXIMIZE;
                }
            }
            SW_MINIMIZE | SW_SHOWMINIMIZED | SW_SHOWMINNOACTIVE => {
                flags |= SwpFlags::SHOWWINDOW;
                if !minimized {
                    let m = &self.config.metrics;
                    let height = m.caption_height + 2 * m.frame_width;
                    let base = if maximized { restore } else { window_rect };
                    target = Some(Rect::from_origin_size(base.left, base.top, 160, height));
                    style_on = WS_MINIMIZE;
                    style_off = WS_MAXIMIZE;
                }
            }
            SW_MAXIMIZE => {
                flags |= SwpFlags::SHOWWINDOW;
                activate = true;
                if !maximized {
                    target = Some(self.maximized_rect(hwnd, child));
                    style_on = WS_MAXIMIZE;
                    style_off = WS_MINIMIZE;
                }
            }
            other => {
                return Err(KernelError::InvalidParameter(format!("show command {}", other)));
            }
        }

        if let Some(w) = self.window_mut(hwnd) {
            if !w.is_minimized() && !w.is_maximized() && style_on != 0 {
                w.restore_rect = w.window_rect;
            }
            w.style = (w.style & !style_off) | style_on;
            if style_on & WS_MAXIMIZE != 0 {
                w.flags.insert(WindowFlags::MAXIMIZED_ONCE);
            }
        }
        if target.is_none() {
            flags |= SwpFlags::NOMOVE | SwpFlags::NOSIZE;
        }
        self.reposition(hwnd, InsertAfter::Top, target, flags)?;

        if style_on & WS_MINIMIZE != 0 {
            let active = self.process_of(hwnd).map(|pid| self.get_active_window(pid));
            if active == Some(hwnd) {
                self.activate_other_window(hwnd)?;
            }
        } else if activate && !child {
            self.activate_shown(hwnd)?;
        }
        Ok(was_visible)
    }

    fn maximized_rect(&self, hwnd: Hwnd, child: bool) -> Rect {
        if child {
            let parent = self.window(hwnd).map(|w| w.parent).unwrap_or_default();
            return self.window(parent).map(|p| p.client_rect).unwrap_or_default();
        }
        self.monitor_from_window(hwnd)
            .map(|m| m.work_area)
            .unwrap_or_default()
    }

    /// Activation that follows showing a top-level window
    fn activate_shown(&mut self, hwnd: Hwnd) -> KernelResult<()> {
        let Some(pid) = self.window(hwnd).filter(|w| !w.is_no_activate()).map(|w| w.pid) else {
            return Ok(());
        };
        if self.get_active_window(pid) != hwnd {
            self.set_active_window(Caller::Process(pid), hwnd)?;
        }
        Ok(())
    }

    pub(crate) fn process_of(&self, hwnd: Hwnd) -> Option<Pid> {
        self.window(hwnd).map(|w| w.pid)
    }

    /// SetWindowPos; `x`/`y` are relative to the parent's client area
    pub fn set_window_pos(
        &mut self,
        hwnd: Hwnd,
        after: InsertAfter,
        x: i32,
        y: i32,
        cx: i32,
        cy: i32,
        flags: SwpFlags,
    ) -> KernelResult<()> {
        let (rect, origin) = self
            .window(hwnd)
            .map(|w| {
                let origin = if w.is_child() {
                    self.window(w.parent)
                        .map(|p| p.client_rect.top_left())
                        .unwrap_or_default()
                } else {
                    Default::default()
                };
                (w.window_rect, origin)
            })
            .ok_or(KernelError::InvalidWindowHandle)?;

        let target = if flags.contains(SwpFlags::NOMOVE | SwpFlags::NOSIZE) {
            None
        } else {
            let (left, top) = if flags.contains(SwpFlags::NOMOVE) {
                (rect.left, rect.top)
            } else {
                (origin.x + x, origin.y + y)
            };
            let (width, height) = if flags.contains(SwpFlags::NOSIZE) {
                (rect.width(), rect.height())
            } else {
                (cx.max(0), cy.max(0))
            };
            Some(Rect::from_origin_size(left, top, width, height))
        };
        self.reposition(hwnd, after, target, flags)?;

        let show_activates = !flags.contains(SwpFlags::NOACTIVATE)
            && self.window(hwnd).is_some_and(|w| w.is_visible() && !w.is_child());
        if show_activates {
            self.activate_shown(hwnd)?;
        }
        Ok(())
    }

    /// Move, resize, restack, show or hide; `rect` is in screen coordinates
    pub(crate) fn reposition(
        &mut self,
        hwnd: Hwnd,
        after: InsertAfter,
        rect: Option<Rect>,
        flags: SwpFlags,
    ) -> KernelResult<()> {
        let (old, linked, is_root) = self
            .window(hwnd)
            .map(|w| (w.window_rect, w.flags.contains(WindowFlags::LINKED), w.parent.is_null()))
            .ok_or(KernelError::InvalidWindowHandle)?;
        if is_root {
            return Err(KernelError::AccessDenied);
        }

        let mut sized = false;
        let mut moved = false;
        if let Some(new) = rect.filter(|r| *r != old) {
            sized = new.width() != old.width() || new.height() != old.height();
            moved = new.left != old.left || new.top != old.top;
            if let Some(w) = self.window_mut(hwnd) {
                w.window_rect = new;
            }
            if moved {
                let (dx, dy) = (new.left - old.left, new.top - old.top);
                for c in self.child_windows(hwnd) {
                    self.offset_tree(c, dx, dy);
                }
            }
            self.recalc_client_rect(hwnd)?;
        } else if flags.contains(SwpFlags::FRAMECHANGED) {
            self.recalc_client_rect(hwnd)?;
        }

        if !flags.contains(SwpFlags::NOZORDER) && linked {
            self.relink_window(hwnd, after)?;
        }

        if flags.contains(SwpFlags::SHOWWINDOW) {
            self.set_visible(hwnd, true);
        } else if flags.contains(SwpFlags::HIDEWINDOW) {
            self.set_visible(hwnd, false);
            self.after_hide(hwnd)?;
        }

        if sized || moved || !flags.contains(SwpFlags::NOREDRAW) {
            if let Some(dc) = self.window(hwnd).and_then(|w| w.dc_id) {
                self.user.surface.invalidate(dc, None);
            }
        }

        if self.is_window(hwnd) {
            self.notify(hwnd, WM_WINDOWPOSCHANGED, 0, flags.bits() as LParam);
            if sized || moved {
                self.send_size_move(hwnd, sized, moved);
            }
        }
        Ok(())
    }

    fn offset_tree(&mut self, hwnd: Hwnd, dx: i32, dy: i32) {
        if let Some(w) = self.window_mut(hwnd) {
            w.window_rect = w.window_rect.offset(dx, dy);
            w.client_rect = w.client_rect.offset(dx, dy);
            w.restore_rect = w.restore_rect.offset(dx, dy);
        }
        for c in self.child_windows(hwnd) {
            self.offset_tree(c, dx, dy);
        }
    }

    fn set_visible(&mut self, hwnd: Hwnd, visible: bool) {
        let Some((was, child, desktop)) = self.window(hwnd).map(|w| (w.is_visible(), w.is_child(), w.desktop))
        else {
            return;
        };
        if was == visible {
            return;
        }
        self.notify(hwnd, WM_SHOWWINDOW, visible as WParam, 0);
        if let Some(w) = self.window_mut(hwnd) {
            if visible {
                w.style |= WS_VISIBLE;
            } else {
                w.style &= !WS_VISIBLE;
            }
        }
        if !child {
            if let Some(d) = self.desktop_mut(desktop) {
                if visible {
                    d.visible_windows += 1;
                } else {
                    d.visible_windows = d.visible_windows.saturating_sub(1);
                }
            }
        }
        self.trace(TraceCategory::Window, if visible { "show" } else { "hide" }, None, || {
            hwnd.to_string()
        });
    }

    /// A hidden window gives up activation and focus
    fn after_hide(&mut self, hwnd: Hwnd) -> KernelResult<()> {
        let Some(pid) = self.process_of(hwnd) else {
            return Ok(());
        };
        if self.get_active_window(pid) == hwnd {
            self.activate_other_window(hwnd)?;
        }
        let focus = self.get_focus(pid);
        if !focus.is_null() && self.is_self_or_descendant(hwnd, focus) {
            self.set_focus_internal(pid, Hwnd::NULL)?;
        }
        Ok(())
    }
}

// ========== WINDOW DATA ==========

impl Kernel {
    /// GetWindowLong
    pub fn get_window_long(&mut self, hwnd: Hwnd, index: i32) -> KernelResult<isize> {
        let w = self.window(hwnd).ok_or(KernelError::InvalidWindowHandle)?;
        let value = match index {
            GWL_STYLE => w.style as isize,
            GWL_EXSTYLE => w.ex_style as isize,
            GWL_ID => w.id as isize,
            GWL_USERDATA => w.user_data,
            GWL_HWNDPARENT => {
                let link = if w.is_child() { w.parent } else { w.owner };
                link.0 as isize
            }
            GWL_WNDPROC => {
                let (pid, proc) = (w.pid, w.proc.clone());
                return Ok(self.user.procs.token_for(pid, &proc));
            }
            i if i >= 0 => *w.extra.get(i as usize).ok_or(KernelError::InvalidIndex(i))?,
            i => return Err(KernelError::InvalidIndex(i)),
        };
        Ok(value)
    }

    /// SetWindowLong; returns the previous value
    ///
    /// Visibility and the topmost bit do not change through here; use
    /// ShowWindow and SetWindowPos.
    pub fn set_window_long(&mut self, hwnd: Hwnd, index: i32, value: isize) -> KernelResult<isize> {
        if index == GWL_WNDPROC {
            let proc = self
                .user
                .procs
                .lookup(value)
                .ok_or_else(|| KernelError::InvalidParameter(format!("unknown procedure token {:#x}", value)))?;
            return self.set_window_proc(hwnd, proc);
        }
        let w = self.window_mut(hwnd).ok_or(KernelError::InvalidWindowHandle)?;
        let old = match index {
            GWL_STYLE => {
                let old = w.style;
                w.style = (value as u32 & !WS_VISIBLE) | (old & WS_VISIBLE);
                old as isize
            }
            GWL_EXSTYLE => {
                let old = w.ex_style;
                w.ex_style = (value as u32 & !WS_EX_TOPMOST) | (old & WS_EX_TOPMOST);
                old as isize
            }
            GWL_ID => std::mem::replace(&mut w.id, value as usize) as isize,
            GWL_USERDATA => std::mem::replace(&mut w.user_data, value),
            i if i >= 0 => {
                let slot = w.extra.get_mut(i as usize).ok_or(KernelError::InvalidIndex(i))?;
                std::mem::replace(slot, value)
            }
            i => return Err(KernelError::InvalidIndex(i)),
        };
        if index == GWL_STYLE || index == GWL_EXSTYLE {
            self.send_message(hwnd, WM_STYLECHANGED, index as WParam, old)?;
            self.recalc_client_rect(hwnd)?;
        }
        Ok(old)
    }

    /// Replace the window procedure; returns the old one's token
    pub fn set_window_proc(&mut self, hwnd: Hwnd, proc: WindowProc) -> KernelResult<isize> {
        let w = self.window_mut(hwnd).ok_or(KernelError::InvalidWindowHandle)?;
        let pid = w.pid;
        let old = std::mem::replace(&mut w.proc, proc);
        Ok(self.user.procs.token_for(pid, &old))
    }

    /// SetWindowText through WM_SETTEXT
    pub fn set_window_text(&mut self, hwnd: Hwnd, text: &str) -> KernelResult<bool> {
        let w = self.window_mut(hwnd).ok_or(KernelError::InvalidWindowHandle)?;
        w.pending_text = Some(text.to_string());
        let result = self.send_message(hwnd, WM_SETTEXT, 0, 0);
        if let Some(w) = self.window_mut(hwnd) {
            w.pending_text = None;
        }
        Ok(result? != 0)
    }

    pub fn create_menu(&mut self, pid: Pid) -> KernelResult<Handle> {
        let root = self
            .process(pid)
            .filter(|p| p.is_running())
            .map(|p| p.root)
            .ok_or(KernelError::ProcessTerminated(pid.0))?;
        Ok(self.objects.allocate(KernelObject::Menu(Menu::default()), root))
    }

    pub fn destroy_menu(&mut self, menu: Handle) -> KernelResult<()> {
        if self.objects.object_type(menu) != Some(ObjectType::Menu) {
            return Err(KernelError::InvalidMenuHandle);
        }
        self.objects.close(menu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::kernel::ProcessOptions;
    use crate::user::class::WindowClass;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<(Hwnd, u32)>>>;

    fn setup() -> (Kernel, Pid, Log) {
        let mut k = Kernel::new(KernelConfig::with_screen(800, 600));
        let (pid, _endpoints) = k.create_process("app", &ProcessOptions::default()).unwrap();
        let log: Log = Rc::default();
        let sink = log.clone();
        let proc = WindowProc::local(move |k, hwnd, msg, wp, lp| {
            sink.borrow_mut().push((hwnd, msg));
            k.def_window_proc(hwnd, msg, wp, lp)
        });
        k.register_class(WindowClass::new("Logged", pid, proc)).unwrap();
        k.register_class(WindowClass::new("Plain", pid, WindowProc::Default))
            .unwrap();
        (k, pid, log)
    }

    fn messages_for(log: &Log, hwnd: Hwnd) -> Vec<u32> {
        log.borrow().iter().filter(|(h, _)| *h == hwnd).map(|(_, m)| *m).collect()
    }

    /// Procedure that fails WM_ACTIVATE for its window while `fail` is set
    fn failing_on_activate(k: &mut Kernel, pid: Pid, fail: Rc<std::cell::Cell<bool>>) {
        let proc = WindowProc::local(move |k, hwnd, msg, wp, lp| {
            if msg == WM_ACTIVATE && wp != 0 && fail.get() {
                return Err(KernelError::AccessDenied);
            }
            k.def_window_proc(hwnd, msg, wp, lp)
        });
        k.register_class(WindowClass::new("Touchy", pid, proc)).unwrap();
    }

    #[test]
    fn test_destroy_survives_failing_procedure() {
        let (mut k, pid, _) = setup();
        let fail = Rc::new(std::cell::Cell::new(false));
        failing_on_activate(&mut k, pid, fail.clone());
        let behind = k
            .create_window(pid, &CreateWindowParams::new("Touchy", "", WS_OVERLAPPEDWINDOW | WS_VISIBLE))
            .unwrap();
        let front = k
            .create_window(pid, &CreateWindowParams::new("Plain", "", WS_OVERLAPPEDWINDOW | WS_VISIBLE))
            .unwrap();
        assert_eq!(k.get_active_window(pid), front);

        // Hiding front activates behind, whose procedure fails
        fail.set(true);
        k.destroy_window(front).unwrap();
        assert!(!k.is_window(front));
        assert_eq!(k.top_level_windows(DesktopId::DEFAULT), vec![behind]);
        assert!(k.destroy_window(front).is_err());
    }

    #[test]
    fn test_failed_show_keeps_created_window() {
        let (mut k, pid, _) = setup();
        let fail = Rc::new(std::cell::Cell::new(true));
        failing_on_activate(&mut k, pid, fail);
        let hwnd = k
            .create_window(pid, &CreateWindowParams::new("Touchy", "", WS_OVERLAPPEDWINDOW | WS_VISIBLE))
            .unwrap();
        assert!(k.is_window(hwnd));
        assert!(k.window(hwnd).unwrap().is_visible());
    }

    #[test]
    fn test_proc_token_dies_with_process() {
        let (mut k, pid, _) = setup();
        let hwnd = k
            .create_window(pid, &CreateWindowParams::new("Logged", "", WS_OVERLAPPEDWINDOW))
            .unwrap();
        let token = k.get_window_long(hwnd, GWL_WNDPROC).unwrap();
        assert_ne!(token, crate::user::callback::DEFAULT_PROC_TOKEN);
        assert!(k.call_window_proc(token, hwnd, WM_USER, 0, 0).is_ok());

        let (other, _endpoints) = k.create_process("other", &ProcessOptions::default()).unwrap();
        k.register_class(WindowClass::new("Other", other, WindowProc::Default))
            .unwrap();
        let survivor = k
            .create_window(other, &CreateWindowParams::new("Other", "", WS_OVERLAPPEDWINDOW))
            .unwrap();
        k.terminate_process(pid, 0).unwrap();
        assert!(k.user.procs.lookup(token).is_none());
        assert!(k.call_window_proc(token, survivor, WM_USER, 0, 0).is_err());
        assert!(k.set_window_long(survivor, GWL_WNDPROC, token).is_err());
    }

    #[test]
    fn test_creation_message_order() {
        let (mut k, pid, log) = setup();
        let hwnd = k
            .create_window(pid, &CreateWindowParams::new("Logged", "w", WS_OVERLAPPEDWINDOW))
            .unwrap();
        let msgs = messages_for(&log, hwnd);
        assert_eq!(&msgs[..3], &[WM_NCCREATE, WM_NCCALCSIZE, WM_CREATE]);
        assert!(k.window(hwnd).unwrap().flags.contains(WindowFlags::LINKED));
        assert!(!k.window(hwnd).unwrap().flags.contains(WindowFlags::IN_CREATE));
    }

    #[test]
    fn test_child_without_parent_rejected() {
        let (mut k, pid, _) = setup();
        let err = k
            .create_window(pid, &CreateWindowParams::new("Plain", "", WS_CHILD))
            .unwrap_err();
        assert_eq!(err, KernelError::ChildWithoutParent);
        assert_eq!(err.last_error_code(), 1406);
    }

    #[test]
    fn test_unknown_class_rejected() {
        let (mut k, pid, _) = setup();
        let err = k
            .create_window(pid, &CreateWindowParams::new("Nope", "", 0))
            .unwrap_err();
        assert_eq!(err, KernelError::ClassNotFound("Nope".into()));
    }

    #[test]
    fn test_bad_menu_rejected() {
        let (mut k, pid, _) = setup();
        let bogus = k.create_window(pid, &CreateWindowParams::new("Plain", "", 0)).unwrap();
        let err = k
            .create_window(pid, &CreateWindowParams::new("Plain", "", 0).menu(bogus))
            .unwrap_err();
        assert_eq!(err, KernelError::InvalidMenuHandle);
    }

    #[test]
    fn test_create_refused_disposes_window() {
        let (mut k, pid, _) = setup();
        let proc = WindowProc::local(|k, hwnd, msg, wp, lp| {
            if msg == WM_CREATE {
                return Ok(-1);
            }
            k.def_window_proc(hwnd, msg, wp, lp)
        });
        k.register_class(WindowClass::new("Refuse", pid, proc)).unwrap();
        let before = k.windows_of(pid).len();
        let err = k
            .create_window(pid, &CreateWindowParams::new("Refuse", "", WS_OVERLAPPEDWINDOW))
            .unwrap_err();
        assert_eq!(err, KernelError::CreationAborted);
        assert_eq!(k.windows_of(pid).len(), before);
    }

    #[test]
    fn test_child_placed_in_parent_client() {
        let (mut k, pid, _) = setup();
        let parent = k
            .create_window(
                pid,
                &CreateWindowParams::new("Plain", "", WS_OVERLAPPEDWINDOW)
                    .position(100, 100)
                    .size(300, 200),
            )
            .unwrap();
        let child = k
            .create_window(
                pid,
                &CreateWindowParams::new("Plain", "", WS_CHILD)
                    .parent(parent)
                    .position(10, 5)
                    .size(50, 20),
            )
            .unwrap();
        assert_eq!(k.window(child).unwrap().parent, parent);
        assert_eq!(k.child_windows(parent), vec![child]);
        assert_eq!(k.get_window_rect(child), Some(Rect::new(114, 128, 164, 148)));
    }

    #[test]
    fn test_default_size_is_three_quarters() {
        let (mut k, pid, _) = setup();
        let hwnd = k.create_window(pid, &CreateWindowParams::new("Plain", "", 0)).unwrap();
        let rect = k.get_window_rect(hwnd).unwrap();
        assert_eq!((rect.width(), rect.height()), (600, 450));
    }

    #[test]
    fn test_destroy_children_first_and_ncdestroy_last() {
        let (mut k, pid, log) = setup();
        let parent = k
            .create_window(pid, &CreateWindowParams::new("Logged", "", WS_OVERLAPPEDWINDOW))
            .unwrap();
        let child = k
            .create_window(pid, &CreateWindowParams::new("Logged", "", WS_CHILD).parent(parent))
            .unwrap();
        log.borrow_mut().clear();
        k.destroy_window(parent).unwrap();

        let destroys: Vec<Hwnd> = log
            .borrow()
            .iter()
            .filter(|(_, m)| *m == WM_DESTROY)
            .map(|(h, _)| *h)
            .collect();
        assert_eq!(destroys, vec![child, parent]);
        assert_eq!(log.borrow().last(), Some(&(parent, WM_NCDESTROY)));
        assert!(!k.is_window(parent) && !k.is_window(child));
    }

    #[test]
    fn test_owned_windows_destroyed_first() {
        let (mut k, pid, log) = setup();
        let owner = k
            .create_window(pid, &CreateWindowParams::new("Logged", "", WS_OVERLAPPEDWINDOW))
            .unwrap();
        let owned = k
            .create_window(pid, &CreateWindowParams::new("Logged", "", WS_POPUP).parent(owner))
            .unwrap();
        assert_eq!(k.window(owned).unwrap().owner, owner);
        log.borrow_mut().clear();
        k.destroy_window(owner).unwrap();
        let order: Vec<Hwnd> = log
            .borrow()
            .iter()
            .filter(|(_, m)| *m == WM_NCDESTROY)
            .map(|(h, _)| *h)
            .collect();
        assert_eq!(order, vec![owned, owner]);
    }

    #[test]
    fn test_destroy_releases_surface() {
        let (mut k, pid, _) = setup();
        let before = k.drawing_surface().dc_count();
        let hwnd = k.create_window(pid, &CreateWindowParams::new("Plain", "", 0)).unwrap();
        assert_eq!(k.drawing_surface().dc_count(), before + 1);
        let dc = k.window(hwnd).unwrap().dc;
        k.destroy_window(hwnd).unwrap();
        assert_eq!(k.drawing_surface().dc_count(), before);
        assert!(!k.objects().contains(dc));
        assert!(!k.objects().contains(hwnd));
    }

    #[test]
    fn test_visible_counter() {
        let (mut k, pid, _) = setup();
        let hwnd = k
            .create_window(pid, &CreateWindowParams::new("Plain", "", WS_OVERLAPPEDWINDOW | WS_VISIBLE))
            .unwrap();
        assert_eq!(k.desktop(DesktopId::DEFAULT).unwrap().visible_windows(), 1);
        k.show_window(hwnd, SW_HIDE).unwrap();
        assert_eq!(k.desktop(DesktopId::DEFAULT).unwrap().visible_windows(), 0);
        k.show_window(hwnd, SW_SHOW).unwrap();
        k.destroy_window(hwnd).unwrap();
        assert_eq!(k.desktop(DesktopId::DEFAULT).unwrap().visible_windows(), 0);
    }

    #[test]
    fn test_maximize_and_restore() {
        let (mut k, pid, _) = setup();
        let hwnd = k
            .create_window(
                pid,
                &CreateWindowParams::new("Plain", "", WS_OVERLAPPEDWINDOW | WS_VISIBLE)
                    .position(10, 10)
                    .size(100, 100),
            )
            .unwrap();
        k.show_window(hwnd, SW_MAXIMIZE).unwrap();
        assert_eq!(k.get_window_rect(hwnd), Some(Rect::new(0, 0, 800, 600)));
        assert!(k.window(hwnd).unwrap().flags.contains(WindowFlags::MAXIMIZED_ONCE));
        k.show_window(hwnd, SW_RESTORE).unwrap();
        assert_eq!(k.get_window_rect(hwnd), Some(Rect::new(10, 10, 110, 110)));
    }

    #[test]
    fn test_move_carries_children() {
        let (mut k, pid, log) = setup();
        let parent = k
            .create_window(
                pid,
                &CreateWindowParams::new("Logged", "", WS_OVERLAPPEDWINDOW)
                    .position(0, 0)
                    .size(200, 200),
            )
            .unwrap();
        let child = k
            .create_window(
                pid,
                &CreateWindowParams::new("Plain", "", WS_CHILD)
                    .parent(parent)
                    .size(10, 10),
            )
            .unwrap();
        let before = k.get_window_rect(child).unwrap();
        log.borrow_mut().clear();
        k.set_window_pos(parent, InsertAfter::Top, 50, 40, 0, 0, SwpFlags::NOSIZE | SwpFlags::NOZORDER)
            .unwrap();
        assert_eq!(k.get_window_rect(child), Some(before.offset(50, 40)));
        let msgs = messages_for(&log, parent);
        assert!(msgs.contains(&WM_WINDOWPOSCHANGED));
        assert!(msgs.contains(&WM_MOVE));
        assert!(!msgs.contains(&WM_SIZE));
    }

    #[test]
    fn test_window_longs() {
        let (mut k, pid, _) = setup();
        let mut class = WindowClass::new("Slots", pid, WindowProc::Default);
        class.extra_slots = 2;
        k.register_class(class).unwrap();
        let hwnd = k.create_window(pid, &CreateWindowParams::new("Slots", "", 0)).unwrap();

        assert_eq!(k.set_window_long(hwnd, 1, 42), Ok(0));
        assert_eq!(k.get_window_long(hwnd, 1), Ok(42));
        assert_eq!(k.get_window_long(hwnd, 2), Err(KernelError::InvalidIndex(2)));
        assert_eq!(k.set_window_long(hwnd, GWL_USERDATA, 7), Ok(0));
        assert_eq!(k.get_window_long(hwnd, GWL_USERDATA), Ok(7));
    }

    #[test]
    fn test_subclass_through_proc_token() {
        let (mut k, pid, _) = setup();
        let hwnd = k.create_window(pid, &CreateWindowParams::new("Plain", "", 0)).unwrap();
        let old = k.get_window_long(hwnd, GWL_WNDPROC).unwrap();
        let sub = WindowProc::local(move |k, hwnd, msg, wp, lp| {
            if msg == WM_USER {
                return Ok(99);
            }
            k.call_window_proc(old, hwnd, msg, wp, lp)
        });
        k.set_window_proc(hwnd, sub).unwrap();
        assert_eq!(k.send_message(hwnd, WM_USER, 0, 0), Ok(99));
        assert_eq!(k.send_message(hwnd, WM_NCCREATE, 0, 0), Ok(1));
        let token = k.get_window_long(hwnd, GWL_WNDPROC).unwrap();
        assert_ne!(token, old);
        assert_eq!(k.set_window_long(hwnd, GWL_WNDPROC, old), Ok(token));
    }

    #[test]
    fn test_style_change_notifies() {
        let (mut k, pid, log) = setup();
        let hwnd = k.create_window(pid, &CreateWindowParams::new("Logged", "", 0)).unwrap();
        log.borrow_mut().clear();
        k.set_window_long(hwnd, GWL_STYLE, WS_OVERLAPPEDWINDOW as isize).unwrap();
        assert_eq!(messages_for(&log, hwnd), vec![WM_STYLECHANGED, WM_NCCALCSIZE]);
        let w = k.window(hwnd).unwrap();
        assert_ne!(w.client_rect, w.window_rect);
    }

    #[test]
    fn test_set_window_text() {
        let (mut k, pid, _) = setup();
        let hwnd = k.create_window(pid, &CreateWindowParams::new("Plain", "old", 0)).unwrap();
        assert_eq!(k.set_window_text(hwnd, "new"), Ok(true));
        assert_eq!(k.get_window_text(hwnd).as_deref(), Some("new"));
    }

    #[test]
    fn test_menu_released_with_window() {
        let (mut k, pid, _) = setup();
        let menu = k.create_menu(pid).unwrap();
        let hwnd = k
            .create_window(pid, &CreateWindowParams::new("Plain", "", 0).menu(menu))
            .unwrap();
        assert_eq!(k.window(hwnd).unwrap().menu, menu);
        k.destroy_window(hwnd).unwrap();
        assert!(!k.objects().contains(menu));
    }
}
