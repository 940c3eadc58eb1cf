//! ntwin - an NT-style object manager, subsystem kernel and window server
//!
//! Design principles:
//! - One authority: every piece of state lives in the `Kernel`, and
//!   processes reach it only through request/reply messages
//! - Handles, not pointers: windows, menus, desktops and processes are
//!   objects in one reference-counted table
//! - Single-threaded and deterministic: an async executor runs the
//!   processes, the kernel runs handlers to completion between ticks
//!
//! Layers:
//! - `kernel`: objects, processes, subsystems, IPC and the `System` driver
//! - `user`: windows, Z-order, message queues, input routing and focus
//! - `config`: screen layout, frame metrics and limits

pub mod config;
pub mod kernel;
pub mod user;

pub use config::KernelConfig;
pub use kernel::{Kernel, KernelError, KernelResult, Pid, ProcessContext, System};
pub use user::{Hwnd, Point, Rect};
