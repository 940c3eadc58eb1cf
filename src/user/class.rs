//! Window classes
//!
//! The window server only needs to find and register classes, so the
//! registry sits behind a trait. `MemoryClassRegistry` is the built-in one:
//! names compare case-insensitively, process classes shadow system classes,
//! and system classes (owned by the System process) are visible everywhere.

use super::window::WindowProc;
use crate::kernel::{KernelError, KernelResult, Pid};

/// Class of the desktop window
pub const DESKTOP_CLASS: &str = "#32769";

/// A registered class
#[derive(Debug, Clone)]
pub struct WindowClass {
    pub name: String,
    pub owner: Pid,
    pub style: u32,
    pub proc: WindowProc,
    pub background: u32,
    pub icon: u32,
    pub cursor: u32,
    /// GetWindowLong slots at index 0, 1, ...
    pub extra_slots: usize,
}

impl WindowClass {
    pub fn new(name: &str, owner: Pid, proc: WindowProc) -> Self {
        Self {
            name: name.to_string(),
            owner,
            style: 0,
            proc,
            background: 0,
            icon: 0,
            cursor: 0,
            extra_slots: 0,
        }
    }
}

/// Class lookup and registration
pub trait ClassRegistry {
    /// The class `pid` sees under `name`
    fn find_class(&self, pid: Pid, name: &str) -> Option<WindowClass>;
    fn register_class(&mut self, class: WindowClass) -> KernelResult<()>;
    fn unregister_class(&mut self, pid: Pid, name: &str) -> KernelResult<()>;
    /// Drop every class a process registered; returns how many
    fn remove_owned_by(&mut self, pid: Pid) -> usize;
}

/// In-memory class registry
#[derive(Debug, Default)]
pub struct MemoryClassRegistry {
    classes: Vec<WindowClass>,
}

impl MemoryClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the desktop class
    pub fn with_system_classes() -> Self {
        let mut registry = Self::new();
        registry
            .classes
            .push(WindowClass::new(DESKTOP_CLASS, Pid::SYSTEM, WindowProc::Default));
        registry
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassRegistry for MemoryClassRegistry {
    fn find_class(&self, pid: Pid, name: &str) -> Option<WindowClass> {
        let matching = |owner: Pid| {
            self.classes
                .iter()
                .find(|c| c.owner == owner && c.name.eq_ignore_ascii_case(name))
        };
        matching(pid).or_else(|| matching(Pid::SYSTEM)).cloned()
    }

    fn register_class(&mut self, class: WindowClass) -> KernelResult<()> {
        if class.name.is_empty() {
            return Err(KernelError::InvalidParameter("empty class name".into()));
        }
        let taken = self
            .classes
            .iter()
            .any(|c| c.owner == class.owner && c.name.eq_ignore_ascii_case(&class.name));
        if taken {
            return Err(KernelError::ClassAlreadyExists(class.name));
        }
        self.classes.push(class);
        Ok(())
    }

    fn unregister_class(&mut self, pid: Pid, name: &str) -> KernelResult<()> {
        let before = self.classes.len();
        self.classes
            .retain(|c| !(c.owner == pid && c.name.eq_ignore_ascii_case(name)));
        if self.classes.len() == before {
            return Err(KernelError::ClassNotFound(name.to_string()));
        }
        Ok(())
    }

    fn remove_owned_by(&mut self, pid: Pid) -> usize {
        let before = self.classes.len();
        self.classes.retain(|c| c.owner != pid);
        before - self.classes.len()
    }
}
