//! Window server
//!
//! Windows, their tree and Z-order, message queues, input routing and
//! focus/activation. All state hangs off the `Kernel`; the process-facing
//! surface is the `user32` subsystem in `api`.

pub mod api;
pub mod callback;
pub mod class;
pub mod defproc;
pub mod focus;
pub mod gdi;
pub mod geometry;
pub mod input;
pub mod layout;
pub mod manager;
pub mod message;
pub mod monitor;
pub mod queue;
pub mod window;
pub mod zorder;

pub use callback::{CallbackArgs, CallbackHost, CallbackTable, ProcReply};
pub use class::{ClassRegistry, MemoryClassRegistry, WindowClass};
pub use focus::Caller;
pub use gdi::{DrawingSurface, MemorySurface};
pub use geometry::{Point, Rect};
pub use manager::CreateWindowParams;
pub use queue::{Msg, MsgFilter, Retrieved};
pub use window::{CallbackToken, Window, WindowFlags, WindowProc};
pub use zorder::InsertAfter;

use crate::config::{KernelConfig, MonitorConfig};
use crate::kernel::object::{Handle, KernelObject};
use crate::kernel::subsystem::SharedRegion;
use crate::kernel::{Kernel, KernelError, KernelResult, Pid};
use callback::ProcRegistry;
use message::{WS_CLIPCHILDREN, WS_VISIBLE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use window::WindowFlags as Flags;

/// Window handles are object handles
pub type Hwnd = Handle;

/// Desktop identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesktopId(pub u32);

impl DesktopId {
    pub const DEFAULT: DesktopId = DesktopId(0);
}

impl fmt::Display for DesktopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "desktop{}", self.0)
    }
}

/// A desktop: a root window, its monitors and the foreground process
#[derive(Debug)]
pub struct Desktop {
    pub id: DesktopId,
    /// The desktop object
    pub handle: Handle,
    /// Root of the window tree
    pub root: Hwnd,
    pub foreground: Option<Pid>,
    pub monitors: Vec<MonitorConfig>,
    /// Offset of the next default-placed window
    pub(crate) cascade: i32,
    pub(crate) visible_windows: usize,
}

impl Desktop {
    pub fn visible_windows(&self) -> usize {
        self.visible_windows
    }

    /// Bounding box of every monitor
    pub fn bounds(&self) -> Rect {
        self.monitors
            .iter()
            .map(|m| m.rect)
            .reduce(|a, b| {
                Rect::new(
                    a.left.min(b.left),
                    a.top.min(b.top),
                    a.right.max(b.right),
                    a.bottom.max(b.bottom),
                )
            })
            .unwrap_or_default()
    }

    pub fn primary_work_area(&self) -> Rect {
        self.monitors
            .first()
            .map(|m| m.work_area())
            .unwrap_or_default()
    }
}

/// Window-server state inside the kernel
pub(crate) struct UserState {
    pub(crate) desktops: BTreeMap<DesktopId, Desktop>,
    next_desktop: u32,
    pub(crate) classes: Box<dyn ClassRegistry>,
    pub(crate) surface: Box<dyn DrawingSurface>,
    pub(crate) procs: ProcRegistry,
    pub(crate) dispatch_depth: usize,
    /// System metrics published to processes
    pub(crate) metrics: SharedRegion,
    pub(crate) cursor: Point,
    pub(crate) shift_down: bool,
}

impl UserState {
    pub(crate) fn new(config: &KernelConfig) -> Self {
        Self {
            desktops: BTreeMap::new(),
            next_desktop: 0,
            classes: Box::new(MemoryClassRegistry::with_system_classes()),
            surface: Box::new(MemorySurface::new()),
            procs: ProcRegistry::new(),
            dispatch_depth: 0,
            metrics: api::metrics_region(config),
            cursor: Point::origin(),
            shift_down: false,
        }
    }
}

impl Kernel {
    pub(crate) fn create_default_desktop(&mut self) {
        let monitors = self.config.monitors.clone();
        if let Err(e) = self.create_desktop(monitors) {
            log::error!("default desktop: {}", e);
        }
    }

    /// Create a desktop owned by the System process
    pub fn create_desktop(&mut self, monitors: Vec<MonitorConfig>) -> KernelResult<DesktopId> {
        if monitors.is_empty() {
            return Err(KernelError::InvalidParameter("desktop without monitors".into()));
        }
        let system_root = self
            .process(Pid::SYSTEM)
            .map(|p| p.root)
            .ok_or(KernelError::NotFound)?;

        let id = DesktopId(self.user.next_desktop);
        self.user.next_desktop += 1;
        let handle = self.objects.allocate(KernelObject::Desktop(id), system_root);

        let mut desktop = Desktop {
            id,
            handle,
            root: Hwnd::NULL,
            foreground: None,
            monitors,
            cascade: 0,
            visible_windows: 0,
        };

        let mut root = Window::new(Pid::SYSTEM, id, class::DESKTOP_CLASS, "");
        root.style = WS_VISIBLE | WS_CLIPCHILDREN;
        root.window_rect = desktop.bounds();
        root.client_rect = root.window_rect;
        root.restore_rect = root.window_rect;
        root.flags = Flags::LINKED;
        let hwnd = self.objects.allocate(KernelObject::Window(Box::new(root)), handle);
        if let Some(w) = self.objects.window_mut(hwnd) {
            w.hwnd = hwnd;
        }
        desktop.root = hwnd;

        self.user.desktops.insert(id, desktop);
        log::info!("created {} root {}", id, hwnd);
        Ok(id)
    }

    pub fn desktop(&self, id: DesktopId) -> Option<&Desktop> {
        self.user.desktops.get(&id)
    }

    pub(crate) fn desktop_mut(&mut self, id: DesktopId) -> Option<&mut Desktop> {
        self.user.desktops.get_mut(&id)
    }

    /// Swap in another drawing collaborator; only before windows exist
    pub fn set_drawing_surface(&mut self, surface: Box<dyn DrawingSurface>) {
        self.user.surface = surface;
    }

    pub fn drawing_surface(&self) -> &dyn DrawingSurface {
        self.user.surface.as_ref()
    }

    pub fn set_class_registry(&mut self, classes: Box<dyn ClassRegistry>) {
        self.user.classes = classes;
    }

    pub fn register_class(&mut self, class: WindowClass) -> KernelResult<()> {
        log::debug!("process {} registers class {}", class.owner, class.name);
        self.user.classes.register_class(class)
    }

    pub fn unregister_class(&mut self, pid: Pid, name: &str) -> KernelResult<()> {
        self.user.classes.unregister_class(pid, name)
    }

    pub fn find_class(&self, pid: Pid, name: &str) -> Option<WindowClass> {
        self.user.classes.find_class(pid, name)
    }

    /// Destroy every window of a process, top-level windows first
    pub(crate) fn destroy_process_windows(&mut self, pid: Pid) {
        let mut windows = self.windows_of(pid);
        windows.sort_by_key(|h| self.window(*h).map(|w| w.is_child()).unwrap_or(true));
        for hwnd in windows {
            if self.is_window(hwnd) {
                if let Err(e) = self.destroy_window(hwnd) {
                    log::debug!("process {}: destroying {} failed: {}", pid, hwnd, e);
                }
            }
        }
    }

    /// Window-server cleanup run for every exiting process before its root
    /// object goes away
    pub(crate) fn user_process_teardown(&mut self, pid: Pid) {
        self.deactivate_all(pid);
        self.destroy_process_windows(pid);
        let classes = self.user.classes.remove_owned_by(pid);
        self.user.procs.remove_process(pid);
        for desktop in self.user.desktops.values_mut() {
            if desktop.foreground == Some(pid) {
                desktop.foreground = None;
            }
        }
        log::debug!(
            "process {}: window server teardown, {} classes dropped, {} proc tokens left",
            pid,
            classes,
            self.user.procs.len()
        );
    }
}
