//! The `user32` subsystem
//!
//! Everything a process does with windows goes through here: classes,
//! window creation and layout, the message loop, properties, focus and
//! monitors. Handlers decode typed arguments, call into the window server
//! and serialize the result. System metrics are published in a shared
//! region instead, so `GetSystemMetrics` costs no round trip.

use super::class::WindowClass;
use super::focus::Caller;
use super::geometry::Rect;
use super::manager::CreateWindowParams;
use super::message::{LParam, LResult, SwpFlags, WParam, GWL_WNDPROC};
use super::monitor::MonitorInfo;
use super::queue::{Msg, MsgFilter, Retrieved};
use super::window::{CallbackToken, WindowProc};
use super::zorder::InsertAfter;
use super::{CallbackArgs, CallbackTable, DesktopId, Hwnd, ProcReply, UserState};
use crate::config::KernelConfig;
use crate::kernel::ntapi::owned_by_process;
use crate::kernel::object::Handle;
use crate::kernel::subsystem::{Request, Response, SharedRegion, SharedView, Subsystem};
use crate::kernel::syscall::Port;
use crate::kernel::{Kernel, KernelError, KernelResult, Pid};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const NAME: &str = "user32";

/// user32 operation numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum UserOp {
    RegisterClass = 1,
    UnregisterClass = 2,
    CreateWindowEx = 3,
    DestroyWindow = 4,
    ShowWindow = 5,
    SetWindowPos = 6,
    GetMessage = 7,
    PeekMessage = 8,
    TranslateMessage = 9,
    DispatchMessage = 10,
    PostMessage = 11,
    SendMessage = 12,
    PostQuitMessage = 13,
    GetWindowLong = 14,
    SetWindowLong = 15,
    GetProp = 16,
    SetProp = 17,
    RemoveProp = 18,
    FindWindow = 19,
    GetClientRect = 20,
    GetWindowRect = 21,
    EnumMonitors = 22,
    SetFocus = 23,
    GetFocus = 24,
    SetForegroundWindow = 25,
    GetForegroundWindow = 26,
    SetActiveWindow = 27,
    GetActiveWindow = 28,
    SetCapture = 29,
    ReleaseCapture = 30,
    AllowSetForegroundWindow = 31,
    CreateMenu = 32,
    DestroyMenu = 33,
    SetWindowText = 34,
    GetWindowText = 35,
}

impl UserOp {
    pub fn num(self) -> u32 {
        self as u32
    }
}

// ========== SYSTEM METRICS ==========

/// Metrics block at offset 0 of the user32 shared region
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SystemMetrics {
    pub screen_width: i32,
    pub screen_height: i32,
    pub caption_height: i32,
    pub border_width: i32,
    pub frame_width: i32,
    pub caption_button_width: i32,
    pub sizing_margin: i32,
    pub monitor_count: i32,
    pub work_left: i32,
    pub work_top: i32,
    pub work_right: i32,
    pub work_bottom: i32,
}

pub const SM_CXSCREEN: i32 = 0;
pub const SM_CYSCREEN: i32 = 1;
pub const SM_CYCAPTION: i32 = 4;
pub const SM_CXBORDER: i32 = 5;
pub const SM_CXSIZE: i32 = 30;
pub const SM_CXFRAME: i32 = 32;
pub const SM_CMONITORS: i32 = 80;

impl SystemMetrics {
    pub fn from_config(config: &KernelConfig) -> Self {
        let primary = config.monitors.first().map(|m| m.rect).unwrap_or_default();
        let work = config.primary_work_area();
        let m = &config.metrics;
        Self {
            screen_width: primary.width(),
            screen_height: primary.height(),
            caption_height: m.caption_height,
            border_width: m.border_width,
            frame_width: m.frame_width,
            caption_button_width: m.caption_button_width,
            sizing_margin: m.sizing_margin,
            monitor_count: config.monitors.len() as i32,
            work_left: work.left,
            work_top: work.top,
            work_right: work.right,
            work_bottom: work.bottom,
        }
    }

    /// GetSystemMetrics; unknown indices read as 0
    pub fn get(&self, index: i32) -> i32 {
        match index {
            SM_CXSCREEN => self.screen_width,
            SM_CYSCREEN => self.screen_height,
            SM_CYCAPTION => self.caption_height,
            SM_CXBORDER => self.border_width,
            SM_CXSIZE => self.caption_button_width,
            SM_CXFRAME => self.frame_width,
            SM_CMONITORS => self.monitor_count,
            _ => 0,
        }
    }
}

pub(crate) fn metrics_region(config: &KernelConfig) -> SharedRegion {
    let metrics = SystemMetrics::from_config(config);
    let region = SharedRegion::new(std::mem::size_of::<SystemMetrics>());
    if !region.write(0, &metrics) {
        log::error!("system metrics do not fit the shared region");
    }
    region
}

// ========== ARGUMENTS ==========

/// Per-process user32 state
#[derive(Debug)]
pub struct ClientInfo {
    pub desktop: DesktopId,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClassArgs {
    name: String,
    style: u32,
    /// Callback id in the caller's table; None means DefWindowProc
    callback: Option<u64>,
    extra_slots: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct NameArgs {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HwndArgs {
    hwnd: Hwnd,
}

#[derive(Debug, Serialize, Deserialize)]
struct ShowArgs {
    hwnd: Hwnd,
    cmd: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PosArgs {
    hwnd: Hwnd,
    after: InsertAfter,
    x: i32,
    y: i32,
    cx: i32,
    cy: i32,
    flags: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PeekArgs {
    filter: MsgFilter,
    remove: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageArgs {
    hwnd: Hwnd,
    msg: u32,
    wparam: WParam,
    lparam: LParam,
}

#[derive(Debug, Serialize, Deserialize)]
struct QuitArgs {
    code: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct LongArgs {
    hwnd: Hwnd,
    index: i32,
}

/// New value for SetWindowLong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LongValue {
    Int(isize),
    /// A procedure from the caller's callback table, for GWL_WNDPROC
    Callback(u64),
}

#[derive(Debug, Serialize, Deserialize)]
struct SetLongArgs {
    hwnd: Hwnd,
    index: i32,
    value: LongValue,
}

#[derive(Debug, Serialize, Deserialize)]
struct PropArgs {
    hwnd: Hwnd,
    name: String,
    value: isize,
}

#[derive(Debug, Serialize, Deserialize)]
struct FindArgs {
    class: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PidArgs {
    pid: Pid,
}

#[derive(Debug, Serialize, Deserialize)]
struct MenuArgs {
    menu: Handle,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextArgs {
    hwnd: Hwnd,
    text: String,
}

// ========== HANDLERS ==========

fn caller_desktop(kernel: &Kernel, pid: Pid) -> DesktopId {
    kernel
        .subsystem_state::<ClientInfo>(pid, NAME)
        .map(|c| c.desktop)
        .unwrap_or(DesktopId::DEFAULT)
}

/// The window, if the caller owns it
fn own_window(kernel: &Kernel, pid: Pid, hwnd: Hwnd) -> KernelResult<Hwnd> {
    match kernel.process_of(hwnd) {
        Some(owner) if owner == pid => Ok(hwnd),
        Some(_) => Err(KernelError::AccessDenied),
        None => Err(KernelError::InvalidWindowHandle),
    }
}

fn register_class(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let args: ClassArgs = req.args()?;
    let proc = match args.callback {
        Some(id) => WindowProc::Remote(CallbackToken { pid: req.pid, id }),
        None => WindowProc::Default,
    };
    let mut class = WindowClass::new(&args.name, req.pid, proc);
    class.style = args.style;
    class.extra_slots = args.extra_slots;
    kernel.register_class(class)?;
    Response::unit()
}

fn create_window_ex(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let params: CreateWindowParams = req.args()?;
    match kernel.create_window(req.pid, &params) {
        Ok(hwnd) => Response::of(&hwnd),
        Err(e) => {
            log::debug!("process {}: CreateWindowEx({}) failed: {}", req.pid, params.class_name, e);
            kernel.set_last_error(req.pid, e.last_error_code());
            Response::of(&Hwnd::NULL)
        }
    }
}

fn destroy_window(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let HwndArgs { hwnd } = req.args()?;
    let hwnd = own_window(kernel, req.pid, hwnd)?;
    kernel.destroy_window(hwnd)?;
    Response::unit()
}

fn set_window_pos(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let args: PosArgs = req.args()?;
    let flags = SwpFlags::from_bits_truncate(args.flags);
    kernel.set_window_pos(args.hwnd, args.after, args.x, args.y, args.cx, args.cy, flags)?;
    Response::unit()
}

/// GetMessage: answered now, or parked until a matching message arrives
fn get_message(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let filter: MsgFilter = req.args()?;
    let rc = req
        .reply_channel
        .ok_or_else(|| KernelError::InvalidParameter("GetMessage needs a reply".into()))?;
    if let Some(item) = kernel.peek_message(req.pid, &filter, true)? {
        return Response::of(&item);
    }
    let process = kernel
        .process_mut(req.pid)
        .ok_or(KernelError::ProcessTerminated(req.pid.0))?;
    process.queue.add_waiter(rc, filter);
    Ok(Response::Deferred)
}

fn post_message(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let MessageArgs {
        hwnd,
        msg,
        wparam,
        lparam,
    } = req.args()?;
    if hwnd.is_null() {
        kernel.post_thread_message(req.pid, msg, wparam, lparam)?;
    } else {
        kernel.post_message(hwnd, msg, wparam, lparam)?;
    }
    Response::unit()
}

fn set_window_long(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let SetLongArgs { hwnd, index, value } = req.args()?;
    if index == GWL_WNDPROC {
        // Subclassing another process's window would run our code in its name
        own_window(kernel, req.pid, hwnd)?;
    }
    let old = match value {
        LongValue::Int(v) => kernel.set_window_long(hwnd, index, v)?,
        LongValue::Callback(id) if index == GWL_WNDPROC => {
            let proc = WindowProc::Remote(CallbackToken { pid: req.pid, id });
            kernel.set_window_proc(hwnd, proc)?
        }
        LongValue::Callback(_) => {
            return Err(KernelError::InvalidParameter("callback outside GWL_WNDPROC".into()));
        }
    };
    Response::of(&old)
}

fn destroy_menu(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let MenuArgs { menu } = req.args()?;
    if !owned_by_process(kernel, req.pid, menu) {
        return Err(KernelError::InvalidMenuHandle);
    }
    kernel.destroy_menu(menu)?;
    Response::unit()
}

pub(crate) fn subsystem(user: &UserState) -> Subsystem {
    Subsystem::new(NAME)
        .shared_region(user.metrics.clone())
        .on_init(|kernel, pid| {
            let desktop = kernel
                .process(pid)
                .map(|p| p.desktop)
                .ok_or(KernelError::NotFound)?;
            Ok(Box::new(ClientInfo { desktop }))
        })
        .on_exit(|kernel, pid, _code| kernel.destroy_process_windows(pid))
        .handler(UserOp::RegisterClass.num(), register_class)
        .handler(UserOp::UnregisterClass.num(), |kernel, req| {
            let NameArgs { name } = req.args()?;
            kernel.unregister_class(req.pid, &name)?;
            Response::unit()
        })
        .handler(UserOp::CreateWindowEx.num(), create_window_ex)
        .handler(UserOp::DestroyWindow.num(), destroy_window)
        .handler(UserOp::ShowWindow.num(), |kernel, req| {
            let ShowArgs { hwnd, cmd } = req.args()?;
            Response::of(&kernel.show_window(hwnd, cmd)?)
        })
        .handler(UserOp::SetWindowPos.num(), set_window_pos)
        .handler(UserOp::GetMessage.num(), get_message)
        .handler(UserOp::PeekMessage.num(), |kernel, req| {
            let PeekArgs { filter, remove } = req.args()?;
            Response::of(&kernel.peek_message(req.pid, &filter, remove)?)
        })
        .handler(UserOp::TranslateMessage.num(), |kernel, req| {
            let msg: Msg = req.args()?;
            Response::of(&kernel.translate_message(&msg)?)
        })
        .handler(UserOp::DispatchMessage.num(), |kernel, req| {
            let msg: Msg = req.args()?;
            Response::of(&kernel.dispatch_message(req.pid, &msg)?)
        })
        .handler(UserOp::PostMessage.num(), post_message)
        .handler(UserOp::SendMessage.num(), |kernel, req| {
            let MessageArgs {
                hwnd,
                msg,
                wparam,
                lparam,
            } = req.args()?;
            Response::of(&kernel.send_message(hwnd, msg, wparam, lparam)?)
        })
        .handler(UserOp::PostQuitMessage.num(), |kernel, req| {
            let QuitArgs { code } = req.args()?;
            kernel.post_quit_message(req.pid, code)?;
            Response::unit()
        })
        .handler(UserOp::GetWindowLong.num(), |kernel, req| {
            let LongArgs { hwnd, index } = req.args()?;
            Response::of(&kernel.get_window_long(hwnd, index)?)
        })
        .handler(UserOp::SetWindowLong.num(), set_window_long)
        .handler(UserOp::GetProp.num(), |kernel, req| {
            let PropArgs { hwnd, name, .. } = req.args()?;
            Response::of(&kernel.get_prop(hwnd, &name))
        })
        .handler(UserOp::SetProp.num(), |kernel, req| {
            let PropArgs { hwnd, name, value } = req.args()?;
            Response::of(&kernel.set_prop(hwnd, &name, value))
        })
        .handler(UserOp::RemoveProp.num(), |kernel, req| {
            let PropArgs { hwnd, name, .. } = req.args()?;
            Response::of(&kernel.remove_prop(hwnd, &name))
        })
        .handler(UserOp::FindWindow.num(), |kernel, req| {
            let FindArgs { class, title } = req.args()?;
            let desktop = caller_desktop(kernel, req.pid);
            Response::of(&kernel.find_window(desktop, class.as_deref(), title.as_deref()))
        })
        .handler(UserOp::GetClientRect.num(), |kernel, req| {
            let HwndArgs { hwnd } = req.args()?;
            Response::of(&kernel.get_client_rect(hwnd))
        })
        .handler(UserOp::GetWindowRect.num(), |kernel, req| {
            let HwndArgs { hwnd } = req.args()?;
            Response::of(&kernel.get_window_rect(hwnd))
        })
        .handler(UserOp::EnumMonitors.num(), |kernel, req| {
            Response::of(&kernel.enum_monitors(caller_desktop(kernel, req.pid)))
        })
        .handler(UserOp::SetFocus.num(), |kernel, req| {
            let HwndArgs { hwnd } = req.args()?;
            Response::of(&kernel.set_focus(Caller::Process(req.pid), hwnd)?)
        })
        .handler(UserOp::GetFocus.num(), |kernel, req| {
            Response::of(&kernel.get_focus(req.pid))
        })
        .handler(UserOp::SetForegroundWindow.num(), |kernel, req| {
            let HwndArgs { hwnd } = req.args()?;
            Response::of(&kernel.set_foreground_window(Caller::Process(req.pid), hwnd)?)
        })
        .handler(UserOp::GetForegroundWindow.num(), |kernel, req| {
            Response::of(&kernel.get_foreground_window(caller_desktop(kernel, req.pid)))
        })
        .handler(UserOp::SetActiveWindow.num(), |kernel, req| {
            let HwndArgs { hwnd } = req.args()?;
            Response::of(&kernel.set_active_window(Caller::Process(req.pid), hwnd)?)
        })
        .handler(UserOp::GetActiveWindow.num(), |kernel, req| {
            Response::of(&kernel.get_active_window(req.pid))
        })
        .handler(UserOp::SetCapture.num(), |kernel, req| {
            let HwndArgs { hwnd } = req.args()?;
            Response::of(&kernel.set_capture(req.pid, hwnd)?)
        })
        .handler(UserOp::ReleaseCapture.num(), |kernel, req| {
            Response::of(&kernel.release_capture(req.pid)?)
        })
        .handler(UserOp::AllowSetForegroundWindow.num(), |kernel, req| {
            let PidArgs { pid } = req.args()?;
            kernel.allow_set_foreground(Caller::Process(req.pid), pid)?;
            Response::unit()
        })
        .handler(UserOp::CreateMenu.num(), |kernel, req| {
            Response::of(&kernel.create_menu(req.pid)?)
        })
        .handler(UserOp::DestroyMenu.num(), destroy_menu)
        .handler(UserOp::SetWindowText.num(), |kernel, req| {
            let TextArgs { hwnd, text } = req.args()?;
            Response::of(&kernel.set_window_text(hwnd, &text)?)
        })
        .handler(UserOp::GetWindowText.num(), |kernel, req| {
            let HwndArgs { hwnd } = req.args()?;
            Response::of(&kernel.get_window_text(hwnd))
        })
}

// ========== CLIENT ==========

/// Process-side stubs for `user32`
#[derive(Clone)]
pub struct User32 {
    port: Port,
    callbacks: Rc<CallbackTable>,
    metrics: Option<SharedView>,
}

impl User32 {
    pub fn new(port: Port, callbacks: Rc<CallbackTable>, metrics: Option<SharedView>) -> Self {
        Self {
            port,
            callbacks,
            metrics,
        }
    }

    async fn call<A: Serialize, R: serde::de::DeserializeOwned>(&self, op: UserOp, args: &A) -> KernelResult<R> {
        self.port.request(NAME, op.num(), args).await
    }

    /// Put a window procedure in this process's callback table
    pub fn register_proc<F>(&self, f: F) -> CallbackToken
    where
        F: Fn(&CallbackArgs) -> ProcReply + 'static,
    {
        self.callbacks.register(f)
    }

    /// Read from the shared metrics block; no kernel round trip
    pub fn get_system_metrics(&self, index: i32) -> i32 {
        self.metrics
            .as_ref()
            .and_then(|view| view.read::<SystemMetrics>(0))
            .map(|m| m.get(index))
            .unwrap_or(0)
    }

    pub async fn register_class(
        &self,
        name: &str,
        style: u32,
        proc: Option<CallbackToken>,
        extra_slots: usize,
    ) -> KernelResult<()> {
        let args = ClassArgs {
            name: name.to_string(),
            style,
            callback: proc.map(|t| t.id),
            extra_slots,
        };
        self.call(UserOp::RegisterClass, &args).await
    }

    pub async fn unregister_class(&self, name: &str) -> KernelResult<()> {
        self.call(UserOp::UnregisterClass, &NameArgs { name: name.to_string() })
            .await
    }

    /// NULL on failure; GetLastError says why
    pub async fn create_window(&self, params: &CreateWindowParams) -> KernelResult<Hwnd> {
        self.call(UserOp::CreateWindowEx, params).await
    }

    pub async fn destroy_window(&self, hwnd: Hwnd) -> KernelResult<()> {
        self.call(UserOp::DestroyWindow, &HwndArgs { hwnd }).await
    }

    pub async fn show_window(&self, hwnd: Hwnd, cmd: i32) -> KernelResult<bool> {
        self.call(UserOp::ShowWindow, &ShowArgs { hwnd, cmd }).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_window_pos(
        &self,
        hwnd: Hwnd,
        after: InsertAfter,
        x: i32,
        y: i32,
        cx: i32,
        cy: i32,
        flags: SwpFlags,
    ) -> KernelResult<()> {
        let args = PosArgs {
            hwnd,
            after,
            x,
            y,
            cx,
            cy,
            flags: flags.bits(),
        };
        self.call(UserOp::SetWindowPos, &args).await
    }

    /// Suspends until a matching message or the quit marker arrives
    pub async fn get_message(&self, filter: MsgFilter) -> KernelResult<Retrieved> {
        self.call(UserOp::GetMessage, &filter).await
    }

    pub async fn peek_message(&self, filter: MsgFilter, remove: bool) -> KernelResult<Option<Retrieved>> {
        self.call(UserOp::PeekMessage, &PeekArgs { filter, remove })
            .await
    }

    pub async fn translate_message(&self, msg: &Msg) -> KernelResult<bool> {
        self.call(UserOp::TranslateMessage, msg).await
    }

    pub async fn dispatch_message(&self, msg: &Msg) -> KernelResult<LResult> {
        self.call(UserOp::DispatchMessage, msg).await
    }

    /// PostMessage; a NULL window posts a thread message to this process
    pub async fn post_message(&self, hwnd: Hwnd, msg: u32, wparam: WParam, lparam: LParam) -> KernelResult<()> {
        let args = MessageArgs {
            hwnd,
            msg,
            wparam,
            lparam,
        };
        self.call(UserOp::PostMessage, &args).await
    }

    /// PostMessage without waiting for the kernel to accept it
    pub fn post_message_nowait(&self, hwnd: Hwnd, msg: u32, wparam: WParam, lparam: LParam) -> KernelResult<()> {
        let args = MessageArgs {
            hwnd,
            msg,
            wparam,
            lparam,
        };
        self.oneway(UserOp::PostMessage, serde_json::to_value(args)?)
    }

    pub async fn send_message(&self, hwnd: Hwnd, msg: u32, wparam: WParam, lparam: LParam) -> KernelResult<LResult> {
        let args = MessageArgs {
            hwnd,
            msg,
            wparam,
            lparam,
        };
        self.call(UserOp::SendMessage, &args).await
    }

    pub fn post_quit_message(&self, code: i32) -> KernelResult<()> {
        self.oneway(UserOp::PostQuitMessage, serde_json::to_value(QuitArgs { code })?)
    }

    fn oneway(&self, op: UserOp, payload: serde_json::Value) -> KernelResult<()> {
        let channel = self
            .port
            .channel_of(NAME)
            .ok_or_else(|| KernelError::InvalidParameter(format!("no subsystem {}", NAME)))?;
        self.port.send_oneway(channel, op.num(), payload)
    }

    pub async fn get_window_long(&self, hwnd: Hwnd, index: i32) -> KernelResult<isize> {
        self.call(UserOp::GetWindowLong, &LongArgs { hwnd, index })
            .await
    }

    pub async fn set_window_long(&self, hwnd: Hwnd, index: i32, value: LongValue) -> KernelResult<isize> {
        self.call(UserOp::SetWindowLong, &SetLongArgs { hwnd, index, value })
            .await
    }

    pub async fn get_prop(&self, hwnd: Hwnd, name: &str) -> KernelResult<isize> {
        let args = PropArgs {
            hwnd,
            name: name.to_string(),
            value: 0,
        };
        self.call(UserOp::GetProp, &args).await
    }

    pub async fn set_prop(&self, hwnd: Hwnd, name: &str, value: isize) -> KernelResult<bool> {
        let args = PropArgs {
            hwnd,
            name: name.to_string(),
            value,
        };
        self.call(UserOp::SetProp, &args).await
    }

    pub async fn remove_prop(&self, hwnd: Hwnd, name: &str) -> KernelResult<isize> {
        let args = PropArgs {
            hwnd,
            name: name.to_string(),
            value: 0,
        };
        self.call(UserOp::RemoveProp, &args).await
    }

    pub async fn find_window(&self, class: Option<&str>, title: Option<&str>) -> KernelResult<Hwnd> {
        let args = FindArgs {
            class: class.map(str::to_string),
            title: title.map(str::to_string),
        };
        self.call(UserOp::FindWindow, &args).await
    }

    pub async fn get_client_rect(&self, hwnd: Hwnd) -> KernelResult<Option<Rect>> {
        self.call(UserOp::GetClientRect, &HwndArgs { hwnd }).await
    }

    pub async fn get_window_rect(&self, hwnd: Hwnd) -> KernelResult<Option<Rect>> {
        self.call(UserOp::GetWindowRect, &HwndArgs { hwnd }).await
    }

    pub async fn enum_monitors(&self) -> KernelResult<Vec<MonitorInfo>> {
        self.call(UserOp::EnumMonitors, &()).await
    }

    pub async fn set_focus(&self, hwnd: Hwnd) -> KernelResult<Hwnd> {
        self.call(UserOp::SetFocus, &HwndArgs { hwnd }).await
    }

    pub async fn get_focus(&self) -> KernelResult<Hwnd> {
        self.call(UserOp::GetFocus, &()).await
    }

    pub async fn set_foreground_window(&self, hwnd: Hwnd) -> KernelResult<bool> {
        self.call(UserOp::SetForegroundWindow, &HwndArgs { hwnd })
            .await
    }

    pub async fn get_foreground_window(&self) -> KernelResult<Hwnd> {
        self.call(UserOp::GetForegroundWindow, &()).await
    }

    pub async fn set_active_window(&self, hwnd: Hwnd) -> KernelResult<Hwnd> {
        self.call(UserOp::SetActiveWindow, &HwndArgs { hwnd }).await
    }

    pub async fn get_active_window(&self) -> KernelResult<Hwnd> {
        self.call(UserOp::GetActiveWindow, &()).await
    }

    pub async fn set_capture(&self, hwnd: Hwnd) -> KernelResult<Hwnd> {
        self.call(UserOp::SetCapture, &HwndArgs { hwnd }).await
    }

    pub async fn release_capture(&self) -> KernelResult<bool> {
        self.call(UserOp::ReleaseCapture, &()).await
    }

    pub async fn allow_set_foreground_window(&self, pid: Pid) -> KernelResult<()> {
        self.call(UserOp::AllowSetForegroundWindow, &PidArgs { pid })
            .await
    }

    pub async fn create_menu(&self) -> KernelResult<Handle> {
        self.call(UserOp::CreateMenu, &()).await
    }

    pub async fn destroy_menu(&self, menu: Handle) -> KernelResult<()> {
        self.call(UserOp::DestroyMenu, &MenuArgs { menu }).await
    }

    pub async fn set_window_text(&self, hwnd: Hwnd, text: &str) -> KernelResult<bool> {
        let args = TextArgs {
            hwnd,
            text: text.to_string(),
        };
        self.call(UserOp::SetWindowText, &args).await
    }

    pub async fn get_window_text(&self, hwnd: Hwnd) -> KernelResult<Option<String>> {
        self.call(UserOp::GetWindowText, &HwndArgs { hwnd }).await
    }
}
