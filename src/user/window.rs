//! Window records
//!
//! A window lives in the object table as `KernelObject::Window`. Its tree
//! links (parent, owner, siblings, first child) are handles that hold a
//! reference: every link change duplicates the new target and closes the
//! old one, so the object table's refcount alone decides when a record may
//! be freed.

use super::gdi::{DcId, VisualId};
use super::geometry::Rect;
use super::message::*;
use super::{DesktopId, Hwnd};
use crate::kernel::object::Handle;
use crate::kernel::{Kernel, KernelResult, Pid};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

bitflags! {
    /// Window-server bookkeeping bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WindowFlags: u32 {
        /// In its parent's sibling list
        const LINKED = 1 << 0;
        /// Gone; only stale references remain
        const DESTROYED = 1 << 1;
        /// DestroyWindow is running for it
        const IN_DESTROY = 1 << 2;
        /// An activation of this window is in progress
        const BEING_ACTIVATED = 1 << 3;
        /// Receives SIZE and MOVE notifications
        const SEND_SIZE_MOVE = 1 << 4;
        /// Caption drawn active
        const NC_ACTIVE = 1 << 5;
        /// Has been maximized at least once
        const MAXIMIZED_ONCE = 1 << 6;
        /// CreateWindowEx has not finished yet
        const IN_CREATE = 1 << 7;
    }
}

/// Names a window procedure living in a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackToken {
    pub pid: Pid,
    pub id: u64,
}

pub type LocalProc = Rc<dyn Fn(&mut Kernel, Hwnd, u32, WParam, LParam) -> KernelResult<LResult>>;

/// Where a window's messages go
#[derive(Clone)]
pub enum WindowProc {
    /// DefWindowProc only
    Default,
    /// A closure running inside the kernel
    Local(LocalProc),
    /// A callback registered by a process
    Remote(CallbackToken),
}

impl WindowProc {
    pub fn local<F>(f: F) -> Self
    where
        F: Fn(&mut Kernel, Hwnd, u32, WParam, LParam) -> KernelResult<LResult> + 'static,
    {
        WindowProc::Local(Rc::new(f))
    }

    /// Same procedure, for token reuse
    pub fn same_as(&self, other: &WindowProc) -> bool {
        match (self, other) {
            (WindowProc::Default, WindowProc::Default) => true,
            (WindowProc::Local(a), WindowProc::Local(b)) => Rc::ptr_eq(a, b),
            (WindowProc::Remote(a), WindowProc::Remote(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for WindowProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowProc::Default => write!(f, "Default"),
            WindowProc::Local(_) => write!(f, "Local"),
            WindowProc::Remote(t) => write!(f, "Remote({}:{})", t.pid, t.id),
        }
    }
}

/// Which link field of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    Parent,
    Owner,
    Next,
    Prev,
    FirstChild,
}

/// A window
pub struct Window {
    pub hwnd: Hwnd,
    pub pid: Pid,
    pub desktop: DesktopId,
    pub class_name: String,
    pub title: String,
    pub style: u32,
    pub ex_style: u32,
    /// Screen coordinates
    pub window_rect: Rect,
    /// Screen coordinates
    pub client_rect: Rect,
    /// Where SW_RESTORE puts the window back
    pub restore_rect: Rect,
    pub parent: Hwnd,
    pub owner: Hwnd,
    pub next: Hwnd,
    pub prev: Hwnd,
    pub first_child: Hwnd,
    pub proc: WindowProc,
    /// Device-context object and the surface's id for it
    pub dc: Handle,
    pub dc_id: Option<DcId>,
    pub visual: Handle,
    pub visual_id: Option<VisualId>,
    /// Menu handle for top-level windows
    pub menu: Handle,
    /// Control id for child windows
    pub id: usize,
    pub props: HashMap<String, isize>,
    pub extra: Vec<isize>,
    pub user_data: isize,
    pub create_param: isize,
    pub flags: WindowFlags,
    /// Text waiting for DefWindowProc's WM_SETTEXT
    pub(crate) pending_text: Option<String>,
}

impl Window {
    pub fn new(pid: Pid, desktop: DesktopId, class_name: &str, title: &str) -> Self {
        Self {
            hwnd: Hwnd::NULL,
            pid,
            desktop,
            class_name: class_name.to_string(),
            title: title.to_string(),
            style: 0,
            ex_style: 0,
            window_rect: Rect::default(),
            client_rect: Rect::default(),
            restore_rect: Rect::default(),
            parent: Hwnd::NULL,
            owner: Hwnd::NULL,
            next: Hwnd::NULL,
            prev: Hwnd::NULL,
            first_child: Hwnd::NULL,
            proc: WindowProc::Default,
            dc: Handle::NULL,
            dc_id: None,
            visual: Handle::NULL,
            visual_id: None,
            menu: Handle::NULL,
            id: 0,
            props: HashMap::new(),
            extra: Vec::new(),
            user_data: 0,
            create_param: 0,
            flags: WindowFlags::empty(),
            pending_text: None,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.style & WS_VISIBLE != 0
    }

    pub fn is_child(&self) -> bool {
        self.style & (WS_CHILD | WS_POPUP) == WS_CHILD
    }

    pub fn is_disabled(&self) -> bool {
        self.style & WS_DISABLED != 0
    }

    pub fn is_minimized(&self) -> bool {
        self.style & WS_MINIMIZE != 0
    }

    pub fn is_maximized(&self) -> bool {
        self.style & WS_MAXIMIZE != 0
    }

    pub fn is_topmost(&self) -> bool {
        self.ex_style & WS_EX_TOPMOST != 0
    }

    pub fn is_no_activate(&self) -> bool {
        self.ex_style & WS_EX_NOACTIVATE != 0
    }

    pub(crate) fn link(&self, link: Link) -> Hwnd {
        match link {
            Link::Parent => self.parent,
            Link::Owner => self.owner,
            Link::Next => self.next,
            Link::Prev => self.prev,
            Link::FirstChild => self.first_child,
        }
    }

    fn link_mut(&mut self, link: Link) -> &mut Hwnd {
        match link {
            Link::Parent => &mut self.parent,
            Link::Owner => &mut self.owner,
            Link::Next => &mut self.next,
            Link::Prev => &mut self.prev,
            Link::FirstChild => &mut self.first_child,
        }
    }
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("hwnd", &self.hwnd)
            .field("pid", &self.pid)
            .field("class", &self.class_name)
            .field("title", &self.title)
            .field("style", &format_args!("{:#x}", self.style))
            .field("rect", &self.window_rect)
            .finish()
    }
}

impl Kernel {
    /// A live window record
    pub fn window(&self, hwnd: Hwnd) -> Option<&Window> {
        self.objects
            .window(hwnd)
            .filter(|w| !w.flags.contains(WindowFlags::DESTROYED))
    }

    pub(crate) fn window_mut(&mut self, hwnd: Hwnd) -> Option<&mut Window> {
        self.objects
            .window_mut(hwnd)
            .filter(|w| !w.flags.contains(WindowFlags::DESTROYED))
    }

    pub fn is_window(&self, hwnd: Hwnd) -> bool {
        self.window(hwnd).is_some()
    }

    /// Point a link at `target`, taking a reference on it and dropping the
    /// one the link held before
    pub(crate) fn set_link(&mut self, hwnd: Hwnd, link: Link, target: Hwnd) {
        let Some(window) = self.objects.window_mut(hwnd) else {
            return;
        };
        let old = window.link(link);
        if old == target {
            return;
        }
        *window.link_mut(link) = target;
        if !target.is_null() {
            self.objects.duplicate(target);
        }
        if !old.is_null() {
            self.objects.close(old);
        }
    }

    /// Children of `parent`, front to back
    pub fn child_windows(&self, parent: Hwnd) -> Vec<Hwnd> {
        let mut children = Vec::new();
        let mut current = self.window(parent).map(|w| w.first_child).unwrap_or_default();
        while let Some(window) = self.objects.window(current) {
            children.push(current);
            current = window.next;
            if children.len() > self.objects.len() {
                break;
            }
        }
        children
    }

    /// Every live window a process owns
    pub fn windows_of(&self, pid: Pid) -> Vec<Hwnd> {
        self.objects
            .enum_by_type(crate::kernel::ObjectType::Window)
            .filter(|h| self.window(*h).is_some_and(|w| w.pid == pid))
            .collect()
    }

    /// Top-level ancestor: the last window below the desktop root
    pub fn root_ancestor(&self, hwnd: Hwnd) -> Hwnd {
        let mut current = hwnd;
        while let Some(window) = self.window(current) {
            let parent = window.parent;
            match self.window(parent) {
                Some(p) if !p.parent.is_null() => current = parent,
                _ => return current,
            }
        }
        Hwnd::NULL
    }

    pub fn is_child(&self, parent: Hwnd, hwnd: Hwnd) -> bool {
        let mut current = hwnd;
        while let Some(window) = self.window(current) {
            if !window.is_child() {
                return false;
            }
            if window.parent == parent {
                return true;
            }
            current = window.parent;
        }
        false
    }

    /// Whether `hwnd` is `ancestor` or lies below it
    pub(crate) fn is_self_or_descendant(&self, ancestor: Hwnd, hwnd: Hwnd) -> bool {
        let mut current = hwnd;
        while let Some(window) = self.window(current) {
            if current == ancestor {
                return true;
            }
            current = window.parent;
        }
        false
    }

    /// Top-level windows of a desktop, front to back
    pub fn top_level_windows(&self, desktop: DesktopId) -> Vec<Hwnd> {
        match self.user.desktops.get(&desktop) {
            Some(d) => self.child_windows(d.root),
            None => Vec::new(),
        }
    }

    pub fn desktop_window(&self, desktop: DesktopId) -> Hwnd {
        self.user
            .desktops
            .get(&desktop)
            .map(|d| d.root)
            .unwrap_or_default()
    }

    pub fn get_window(&self, hwnd: Hwnd, cmd: u32) -> Hwnd {
        let Some(window) = self.window(hwnd) else {
            return Hwnd::NULL;
        };
        match cmd {
            GW_HWNDFIRST => self.child_windows(window.parent).first().copied().unwrap_or_default(),
            GW_HWNDLAST => self.child_windows(window.parent).last().copied().unwrap_or_default(),
            GW_HWNDNEXT => window.next,
            GW_HWNDPREV => window.prev,
            GW_OWNER => window.owner,
            GW_CHILD => window.first_child,
            _ => Hwnd::NULL,
        }
    }

    /// Parent of a child window, owner of anything else
    pub fn get_parent(&self, hwnd: Hwnd) -> Hwnd {
        match self.window(hwnd) {
            Some(w) if w.is_child() => w.parent,
            Some(w) => w.owner,
            None => Hwnd::NULL,
        }
    }

    pub fn get_ancestor(&self, hwnd: Hwnd, flags: u32) -> Hwnd {
        let Some(window) = self.window(hwnd) else {
            return Hwnd::NULL;
        };
        match flags {
            GA_PARENT => window.parent,
            GA_ROOT => self.root_ancestor(hwnd),
            GA_ROOTOWNER => {
                let mut current = self.root_ancestor(hwnd);
                while let Some(owner) = self.window(current).map(|w| w.owner) {
                    if owner.is_null() {
                        break;
                    }
                    current = owner;
                }
                current
            }
            _ => Hwnd::NULL,
        }
    }

    pub fn get_client_rect(&self, hwnd: Hwnd) -> Option<Rect> {
        self.window(hwnd)
            .map(|w| Rect::new(0, 0, w.client_rect.width(), w.client_rect.height()))
    }

    pub fn get_window_rect(&self, hwnd: Hwnd) -> Option<Rect> {
        self.window(hwnd).map(|w| w.window_rect)
    }

    pub fn get_window_text(&self, hwnd: Hwnd) -> Option<String> {
        self.window(hwnd).map(|w| w.title.clone())
    }

    // Property bag

    pub fn set_prop(&mut self, hwnd: Hwnd, name: &str, value: isize) -> bool {
        match self.window_mut(hwnd) {
            Some(w) => {
                w.props.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn get_prop(&self, hwnd: Hwnd, name: &str) -> isize {
        self.window(hwnd)
            .and_then(|w| w.props.get(name).copied())
            .unwrap_or(0)
    }

    pub fn remove_prop(&mut self, hwnd: Hwnd, name: &str) -> isize {
        self.window_mut(hwnd)
            .and_then(|w| w.props.remove(name))
            .unwrap_or(0)
    }

    /// First top-level window matching class and title, front to back
    pub fn find_window(&self, desktop: DesktopId, class: Option<&str>, title: Option<&str>) -> Hwnd {
        self.top_level_windows(desktop)
            .into_iter()
            .find(|h| {
                self.window(*h).is_some_and(|w| {
                    class.is_none_or(|c| w.class_name.eq_ignore_ascii_case(c))
                        && title.is_none_or(|t| w.title == t)
                })
            })
            .unwrap_or_default()
    }
}
