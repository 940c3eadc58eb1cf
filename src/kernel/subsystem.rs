//! Subsystems
//!
//! A subsystem is a named group of kernel operations addressed by numeric
//! opcode. Registering one gives it a channel id; processes send requests to
//! that channel. Optional hooks run once per process at creation and at
//! graceful exit, and an optional shared region lets the kernel publish
//! read-mostly data that processes read without a round trip.

use super::error::{KernelError, KernelResult};
use super::ipc::ChannelId;
use super::process::Pid;
use super::Kernel;
use bytemuck::Pod;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A decoded request as a handler sees it
#[derive(Debug, Clone)]
pub struct Request {
    pub pid: Pid,
    pub opcode: u32,
    pub reply_channel: Option<ChannelId>,
    pub payload: Value,
}

impl Request {
    /// Decode the payload into a typed argument struct
    pub fn args<T: DeserializeOwned>(&self) -> KernelResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// What a handler answers
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Value(Value),
    /// The handler will complete the reply later, exactly once
    Deferred,
}

impl Response {
    pub fn of<T: Serialize>(value: &T) -> KernelResult<Response> {
        Ok(Response::Value(serde_json::to_value(value)?))
    }

    pub fn unit() -> KernelResult<Response> {
        Ok(Response::Value(Value::Null))
    }
}

pub type Handler = Rc<dyn Fn(&mut Kernel, &Request) -> KernelResult<Response>>;
pub type InitHook = Rc<dyn Fn(&mut Kernel, Pid) -> KernelResult<Box<dyn Any>>>;
pub type ExitHook = Rc<dyn Fn(&mut Kernel, Pid, i32)>;

/// Subsystem descriptor
pub struct Subsystem {
    name: String,
    handlers: HashMap<u32, Handler>,
    init: Option<InitHook>,
    exit: Option<ExitHook>,
    shared: Option<SharedRegion>,
}

impl Subsystem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
            init: None,
            exit: None,
            shared: None,
        }
    }

    pub fn handler<F>(mut self, opcode: u32, handler: F) -> Self
    where
        F: Fn(&mut Kernel, &Request) -> KernelResult<Response> + 'static,
    {
        self.handlers.insert(opcode, Rc::new(handler));
        self
    }

    pub fn on_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Kernel, Pid) -> KernelResult<Box<dyn Any>> + 'static,
    {
        self.init = Some(Rc::new(hook));
        self
    }

    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Kernel, Pid, i32) + 'static,
    {
        self.exit = Some(Rc::new(hook));
        self
    }

    pub fn shared_region(mut self, region: SharedRegion) -> Self {
        self.shared = Some(region);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn opcodes(&self) -> impl Iterator<Item = u32> + '_ {
        self.handlers.keys().copied()
    }
}

/// Registered subsystems, in registration order
pub(crate) struct SubsystemRegistry {
    entries: Vec<(ChannelId, Subsystem)>,
    next_channel: ChannelId,
}

impl SubsystemRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_channel: 1,
        }
    }

    pub(crate) fn register(&mut self, subsystem: Subsystem) -> KernelResult<ChannelId> {
        if self.channel_of(&subsystem.name).is_some() {
            return Err(KernelError::InvalidParameter(format!(
                "subsystem {} already registered",
                subsystem.name
            )));
        }
        Ok(self.install(subsystem))
    }

    /// Register without the duplicate check; for boot-time subsystems
    pub(crate) fn install(&mut self, subsystem: Subsystem) -> ChannelId {
        let channel = self.next_channel;
        self.next_channel += 1;
        self.entries.push((channel, subsystem));
        channel
    }

    pub(crate) fn channel_of(&self, name: &str) -> Option<ChannelId> {
        self.entries
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(c, _)| *c)
    }

    pub(crate) fn channels(&self) -> HashMap<String, ChannelId> {
        self.entries
            .iter()
            .map(|(c, s)| (s.name.clone(), *c))
            .collect()
    }

    /// Resolve (channel, opcode); the subsystem name comes back either way
    pub(crate) fn resolve(
        &self,
        channel: ChannelId,
        opcode: u32,
    ) -> KernelResult<(String, Handler)> {
        let (_, subsystem) = self
            .entries
            .iter()
            .find(|(c, _)| *c == channel)
            .ok_or(KernelError::UnknownChannel(channel))?;
        match subsystem.handlers.get(&opcode) {
            Some(handler) => Ok((subsystem.name.clone(), handler.clone())),
            None => Err(KernelError::UnknownOpcode {
                subsystem: subsystem.name.clone(),
                opcode,
            }),
        }
    }

    pub(crate) fn init_hooks(&self) -> Vec<(String, Option<InitHook>)> {
        self.entries
            .iter()
            .map(|(_, s)| (s.name.clone(), s.init.clone()))
            .collect()
    }

    pub(crate) fn exit_hooks(&self) -> Vec<ExitHook> {
        self.entries
            .iter()
            .filter_map(|(_, s)| s.exit.clone())
            .collect()
    }

    pub(crate) fn shared_views(&self) -> HashMap<String, SharedView> {
        self.entries
            .iter()
            .filter_map(|(_, s)| s.shared.as_ref().map(|r| (s.name.clone(), r.view())))
            .collect()
    }
}

/// Kernel-writable bytes that processes may read directly
#[derive(Clone)]
pub struct SharedRegion {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl SharedRegion {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: Rc::new(RefCell::new(vec![0; size])),
        }
    }

    /// Write a plain-old-data value at `offset`; false if it does not fit
    pub fn write<T: Pod>(&self, offset: usize, value: &T) -> bool {
        let src = bytemuck::bytes_of(value);
        let Some(end) = offset.checked_add(src.len()) else {
            return false;
        };
        let mut bytes = self.bytes.borrow_mut();
        match bytes.get_mut(offset..end) {
            Some(dst) => {
                dst.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    pub fn view(&self) -> SharedView {
        SharedView {
            bytes: self.bytes.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.borrow().is_empty()
    }
}

/// Read-only window onto a shared region
#[derive(Clone)]
pub struct SharedView {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl SharedView {
    pub fn read<T: Pod>(&self, offset: usize) -> Option<T> {
        let bytes = self.bytes.borrow();
        let end = offset.checked_add(std::mem::size_of::<T>())?;
        let src = bytes.get(offset..end)?;
        Some(bytemuck::pod_read_unaligned(src))
    }
}

impl Kernel {
    /// Register a subsystem; processes created afterwards get an instance
    pub fn register_subsystem(&mut self, subsystem: Subsystem) -> KernelResult<ChannelId> {
        let name = subsystem.name.clone();
        let channel = self.subsystems.register(subsystem)?;
        log::info!("registered subsystem {} on channel {}", name, channel);
        Ok(channel)
    }

    pub fn subsystem_channel(&self, name: &str) -> Option<ChannelId> {
        self.subsystems.channel_of(name)
    }
}
