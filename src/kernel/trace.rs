//! Kernel tracing and statistics
//!
//! A bounded ring buffer of recent kernel events plus a few counters. Events
//! are stamped with the kernel tick, not wall time, so traces are
//! reproducible.

use std::collections::VecDeque;

/// Default number of events kept in the trace buffer
pub const TRACE_BUFFER_SIZE: usize = 1000;

/// Trace event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceCategory {
    /// Handle allocation and destruction
    Object,
    /// Process lifecycle
    Process,
    /// Requests, replies and dropped messages
    Ipc,
    /// Window creation, destruction and layout
    Window,
    /// Window message dispatch
    Message,
    /// Pointer and keyboard routing
    Input,
    /// Foreground, activation and focus changes
    Focus,
}

impl std::fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceCategory::Object => write!(f, "OBJECT"),
            TraceCategory::Process => write!(f, "PROCESS"),
            TraceCategory::Ipc => write!(f, "IPC"),
            TraceCategory::Window => write!(f, "WINDOW"),
            TraceCategory::Message => write!(f, "MSG"),
            TraceCategory::Input => write!(f, "INPUT"),
            TraceCategory::Focus => write!(f, "FOCUS"),
        }
    }
}

/// A single trace event
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    /// Kernel tick at which the event happened
    pub tick: u64,
    pub category: TraceCategory,
    pub name: String,
    pub detail: Option<String>,
    pub pid: Option<u32>,
}

impl TraceEvent {
    pub fn instant(tick: u64, category: TraceCategory, name: impl Into<String>) -> Self {
        Self {
            tick,
            category,
            name: name.into(),
            detail: None,
            pid: None,
        }
    }

    pub fn with_detail(
        tick: u64,
        category: TraceCategory,
        name: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            tick,
            category,
            name: name.into(),
            detail: Some(detail.into()),
            pid: None,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}

/// Kernel-wide counters
#[derive(Debug, Clone, Default)]
pub struct KernelStats {
    pub processes_spawned: u64,
    pub processes_exited: u64,
    pub requests_handled: u64,
    pub request_errors: u64,
    pub messages_dropped: u64,
    pub protocol_faults: u64,
    pub windows_created: u64,
    pub windows_destroyed: u64,
    pub messages_dispatched: u64,
}

/// The tracer
#[derive(Debug)]
pub struct Tracer {
    enabled: bool,
    /// Category filter (None = all)
    filter: Option<Vec<TraceCategory>>,
    events: VecDeque<TraceEvent>,
    capacity: usize,
    /// Counters are kept whether or not event tracing is on
    pub stats: KernelStats,
}

impl Tracer {
    pub fn new() -> Self {
        Self::with_capacity(TRACE_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            enabled: false,
            filter: None,
            events: VecDeque::with_capacity(capacity.min(TRACE_BUFFER_SIZE)),
            capacity: capacity.max(1),
            stats: KernelStats::default(),
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set category filter (None = trace all)
    pub fn set_filter(&mut self, categories: Option<Vec<TraceCategory>>) {
        self.filter = categories;
    }

    fn should_trace(&self, category: TraceCategory) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.filter {
            None => true,
            Some(cats) => cats.contains(&category),
        }
    }

    /// Record a trace event
    pub fn trace(&mut self, event: TraceEvent) {
        if !self.should_trace(event.category) {
            return;
        }
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Record an event for a process, with optional detail
    pub fn record(
        &mut self,
        tick: u64,
        category: TraceCategory,
        name: &str,
        pid: Option<u32>,
        detail: Option<String>,
    ) {
        if !self.should_trace(category) {
            return;
        }
        let mut event = TraceEvent::instant(tick, category, name);
        event.pid = pid;
        event.detail = detail;
        self.trace(event);
    }

    pub fn events(&self) -> &VecDeque<TraceEvent> {
        &self.events
    }

    pub fn events_by_category(&self, category: TraceCategory) -> Vec<&TraceEvent> {
        self.events
            .iter()
            .filter(|e| e.category == category)
            .collect()
    }

    pub fn events_by_pid(&self, pid: u32) -> Vec<&TraceEvent> {
        self.events
            .iter()
            .filter(|e| e.pid == Some(pid))
            .collect()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            enabled: self.enabled,
            event_count: self.events.len(),
            stats: self.stats.clone(),
        }
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of trace state
#[derive(Debug, Clone)]
pub struct TraceSummary {
    pub enabled: bool,
    pub event_count: usize,
    pub stats: KernelStats,
}

impl std::fmt::Display for TraceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Kernel Statistics ===")?;
        writeln!(f, "Tracing: {}", if self.enabled { "ON" } else { "OFF" })?;
        writeln!(f, "Events buffered: {}", self.event_count)?;
        writeln!(f)?;
        writeln!(f, "--- Processes ---")?;
        writeln!(f, "Spawned: {}", self.stats.processes_spawned)?;
        writeln!(f, "Exited: {}", self.stats.processes_exited)?;
        writeln!(f)?;
        writeln!(f, "--- Requests ---")?;
        writeln!(f, "Handled: {}", self.stats.requests_handled)?;
        writeln!(f, "Errors: {}", self.stats.request_errors)?;
        writeln!(f, "Dropped: {}", self.stats.messages_dropped)?;
        writeln!(f, "Protocol faults: {}", self.stats.protocol_faults)?;
        writeln!(f)?;
        writeln!(f, "--- Windows ---")?;
        writeln!(f, "Created: {}", self.stats.windows_created)?;
        writeln!(f, "Destroyed: {}", self.stats.windows_destroyed)?;
        writeln!(f, "Messages dispatched: {}", self.stats.messages_dispatched)?;
        Ok(())
    }
}
