//! The `ntdll` subsystem
//!
//! Process and handle operations every process can reach: exiting,
//! terminating, closing and duplicating handles, and the last-error slot.
//! Handle operations are restricted to objects under the caller's own
//! process root.

use super::error::{KernelError, KernelResult};
use super::object::{Handle, ObjectType};
use super::process::Pid;
use super::subsystem::{Request, Response, Subsystem};
use super::syscall::Port;
use super::Kernel;
use serde::{Deserialize, Serialize};

pub const NAME: &str = "ntdll";

/// ntdll operation numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NtOp {
    ExitProcess = 1,
    TerminateProcess = 2,
    CloseHandle = 3,
    DuplicateHandle = 4,
    GetCurrentProcessId = 5,
    GetLastError = 6,
    SetLastError = 7,
}

impl NtOp {
    pub fn num(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ExitArgs {
    code: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct TerminateArgs {
    pid: Pid,
    code: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct HandleArgs {
    handle: Handle,
}

#[derive(Debug, Serialize, Deserialize)]
struct LastErrorArgs {
    code: u32,
}

/// Whether `handle` lives under `pid`'s root in the ownership tree
pub(crate) fn owned_by_process(kernel: &Kernel, pid: Pid, handle: Handle) -> bool {
    let Some(root) = kernel.process(pid).map(|p| p.root) else {
        return false;
    };
    let mut current = handle;
    // Ownership is acyclic, so the walk ends; the bound guards a corrupt table
    for _ in 0..=kernel.objects.len() {
        match kernel.objects.owner(current) {
            Some(owner) if owner == root => return true,
            Some(owner) if !owner.is_null() => current = owner,
            _ => return false,
        }
    }
    false
}

fn checked_handle(kernel: &Kernel, req: &Request) -> KernelResult<Handle> {
    let HandleArgs { handle } = req.args()?;
    if !kernel.objects.contains(handle) {
        return Err(KernelError::InvalidHandle);
    }
    if !owned_by_process(kernel, req.pid, handle) {
        return Err(KernelError::AccessDenied);
    }
    Ok(handle)
}

fn exit_process(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let ExitArgs { code } = req.args()?;
    kernel.quit_process(req.pid, code)?;
    Response::unit()
}

fn terminate_process(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let TerminateArgs { pid, code } = req.args()?;
    let target = kernel
        .process(pid)
        .ok_or_else(|| KernelError::InvalidParameter(format!("no process {}", pid)))?;
    if pid != req.pid && (target.critical || pid == Pid::SYSTEM) {
        return Err(KernelError::AccessDenied);
    }
    kernel.terminate_process(pid, code)?;
    Response::unit()
}

fn close_handle(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let handle = checked_handle(kernel, req)?;
    // Windows go through DestroyWindow
    if kernel.objects.object_type(handle) == Some(ObjectType::Window) {
        return Err(KernelError::InvalidHandle);
    }
    if !kernel.objects.close(handle) {
        return Err(KernelError::InvalidHandle);
    }
    Response::unit()
}

fn duplicate_handle(kernel: &mut Kernel, req: &Request) -> KernelResult<Response> {
    let handle = checked_handle(kernel, req)?;
    Response::of(&kernel.objects.duplicate(handle))
}

pub(crate) fn subsystem() -> Subsystem {
    Subsystem::new(NAME)
        .handler(NtOp::ExitProcess.num(), exit_process)
        .handler(NtOp::TerminateProcess.num(), terminate_process)
        .handler(NtOp::CloseHandle.num(), close_handle)
        .handler(NtOp::DuplicateHandle.num(), duplicate_handle)
        .handler(NtOp::GetCurrentProcessId.num(), |_, req| Response::of(&req.pid))
        .handler(NtOp::GetLastError.num(), |kernel, req| {
            Response::of(&kernel.last_error(req.pid))
        })
        .handler(NtOp::SetLastError.num(), |kernel, req| {
            let LastErrorArgs { code } = req.args()?;
            kernel.set_last_error(req.pid, code);
            Response::unit()
        })
}

// ========== CLIENT ==========

/// Process-side stubs for `ntdll`
#[derive(Clone)]
pub struct NtApi {
    port: Port,
}

impl NtApi {
    pub fn new(port: Port) -> Self {
        Self { port }
    }

    /// Ask the kernel to end this process gracefully; nothing comes back
    pub fn exit_process(&self, code: i32) -> KernelResult<()> {
        let channel = self
            .port
            .channel_of(NAME)
            .ok_or(KernelError::UnknownChannel(0))?;
        self.port
            .send_oneway(channel, NtOp::ExitProcess.num(), serde_json::to_value(ExitArgs { code })?)
    }

    pub async fn terminate_process(&self, pid: Pid, code: i32) -> KernelResult<()> {
        self.port
            .request(NAME, NtOp::TerminateProcess.num(), &TerminateArgs { pid, code })
            .await
    }

    pub async fn close_handle(&self, handle: Handle) -> KernelResult<()> {
        self.port
            .request(NAME, NtOp::CloseHandle.num(), &HandleArgs { handle })
            .await
    }

    pub async fn duplicate_handle(&self, handle: Handle) -> KernelResult<Handle> {
        self.port
            .request(NAME, NtOp::DuplicateHandle.num(), &HandleArgs { handle })
            .await
    }

    pub async fn get_current_process_id(&self) -> KernelResult<Pid> {
        self.port
            .request(NAME, NtOp::GetCurrentProcessId.num(), &())
            .await
    }

    pub async fn get_last_error(&self) -> KernelResult<u32> {
        self.port.request(NAME, NtOp::GetLastError.num(), &()).await
    }

    pub async fn set_last_error(&self, code: u32) -> KernelResult<()> {
        self.port
            .request(NAME, NtOp::SetLastError.num(), &LastErrorArgs { code })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::kernel::object::KernelObject;
    use crate::kernel::process::{ProcessOptions, ProcessState};
    use serde_json::{Value, json};

    fn request(pid: Pid, op: NtOp, payload: Value) -> Request {
        Request {
            pid,
            opcode: op.num(),
            reply_channel: Some(-1),
            payload,
        }
    }

    #[test]
    fn test_close_foreign_handle_denied() {
        let mut k = Kernel::new(KernelConfig::default());
        let (a, _ea) = k.create_process("a", &ProcessOptions::default()).unwrap();
        let (b, _eb) = k.create_process("b", &ProcessOptions::default()).unwrap();
        let root_a = k.process(a).unwrap().root;
        let obj = k.objects.allocate(KernelObject::Generic(Value::Null), root_a);

        let err = close_handle(&mut k, &request(b, NtOp::CloseHandle, json!({ "handle": obj })));
        assert_eq!(err, Err(KernelError::AccessDenied));
        assert!(close_handle(&mut k, &request(a, NtOp::CloseHandle, json!({ "handle": obj }))).is_ok());
        assert!(!k.objects.contains(obj));
    }

    #[test]
    fn test_duplicate_then_close_keeps_object() {
        let mut k = Kernel::new(KernelConfig::default());
        let (a, _ea) = k.create_process("a", &ProcessOptions::default()).unwrap();
        let root = k.process(a).unwrap().root;
        let obj = k.objects.allocate(KernelObject::Generic(Value::Null), root);

        duplicate_handle(&mut k, &request(a, NtOp::DuplicateHandle, json!({ "handle": obj }))).unwrap();
        close_handle(&mut k, &request(a, NtOp::CloseHandle, json!({ "handle": obj }))).unwrap();
        assert_eq!(k.objects.refcount(obj), Some(1));
    }

    #[test]
    fn test_terminate_critical_other_denied() {
        let mut k = Kernel::new(KernelConfig::default());
        let (a, _ea) = k.create_process("a", &ProcessOptions::default()).unwrap();
        let (c, _ec) = k.create_process("c", &ProcessOptions::critical()).unwrap();
        let err = terminate_process(
            &mut k,
            &request(a, NtOp::TerminateProcess, json!({ "pid": c, "code": 1 })),
        );
        assert_eq!(err, Err(KernelError::AccessDenied));
        assert_eq!(k.process_state(c), Some(ProcessState::Running));
    }

    #[test]
    fn test_owned_by_walks_owner_chain() {
        let mut k = Kernel::new(KernelConfig::default());
        let (a, _ea) = k.create_process("a", &ProcessOptions::default()).unwrap();
        let root = k.process(a).unwrap().root;
        let mid = k.objects.allocate(KernelObject::Generic(Value::Null), root);
        let leaf = k.objects.allocate(KernelObject::Generic(Value::Null), mid);
        assert!(owned_by_process(&k, a, leaf));
        assert!(!owned_by_process(&k, Pid::SYSTEM, leaf));
    }
}
