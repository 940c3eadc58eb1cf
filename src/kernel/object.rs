//! Object manager
//!
//! Every kernel resource (process roots, desktops, windows, device contexts,
//! menus) lives in one table and is named by a `Handle`. The table keeps:
//! - a refcount per object; `close` at zero destroys it
//! - an ownership tree; destroying an owner destroys what it owns
//! - a generation per slot, so a handle to a freed slot never aliases its
//!   successor
//!
//! Lookups never fail loudly: an unknown handle is simply "not there".

use super::process::Pid;
use crate::user::gdi::{DcId, VisualId};
use crate::user::window::Window;
use crate::user::DesktopId;
use serde::{Deserialize, Serialize};
use slab::Slab;
use std::fmt;

/// Opaque name for a kernel object
///
/// Low 32 bits hold the slot index plus one, high 32 bits the slot generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u64);

impl Handle {
    /// The null handle, "no object"
    pub const NULL: Handle = Handle(0);

    /// Returned by `duplicate` for handles that name nothing
    pub const INVALID: Handle = Handle(u64::MAX);

    fn from_parts(slot: usize, generation: u32) -> Self {
        Handle(((generation as u64) << 32) | (slot as u64 + 1))
    }

    fn slot(&self) -> Option<usize> {
        let low = self.0 & 0xFFFF_FFFF;
        if low == 0 || *self == Handle::INVALID {
            None
        } else {
            Some(low as usize - 1)
        }
    }

    fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn is_null(&self) -> bool {
        *self == Handle::NULL
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Type tag of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Process,
    Desktop,
    Window,
    DeviceContext,
    Visual,
    Menu,
    Generic,
}

/// A menu, as far as the window server cares: it exists and has an id list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Menu {
    pub items: Vec<u32>,
}

/// A kernel object
pub enum KernelObject {
    Process(Pid),
    Desktop(DesktopId),
    Window(Box<Window>),
    DeviceContext(DcId),
    Visual(VisualId),
    Menu(Menu),
    Generic(serde_json::Value),
}

impl KernelObject {
    pub fn object_type(&self) -> ObjectType {
        match self {
            KernelObject::Process(_) => ObjectType::Process,
            KernelObject::Desktop(_) => ObjectType::Desktop,
            KernelObject::Window(_) => ObjectType::Window,
            KernelObject::DeviceContext(_) => ObjectType::DeviceContext,
            KernelObject::Visual(_) => ObjectType::Visual,
            KernelObject::Menu(_) => ObjectType::Menu,
            KernelObject::Generic(_) => ObjectType::Generic,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            KernelObject::Process(_) => "process",
            KernelObject::Desktop(_) => "desktop",
            KernelObject::Window(_) => "window",
            KernelObject::DeviceContext(_) => "dc",
            KernelObject::Visual(_) => "visual",
            KernelObject::Menu(_) => "menu",
            KernelObject::Generic(_) => "generic",
        }
    }
}

impl fmt::Debug for KernelObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelObject::Window(w) => write!(f, "Window({})", w.hwnd),
            KernelObject::Process(pid) => write!(f, "Process({})", pid),
            KernelObject::Generic(v) => write!(f, "Generic({})", v),
            other => write!(f, "{}", other.type_name()),
        }
    }
}

/// Runs once, after the object left the table
pub type Destructor = Box<dyn FnOnce(Handle, KernelObject)>;

struct ObjectEntry {
    object: KernelObject,
    object_type: ObjectType,
    owner: Handle,
    owned: Vec<Handle>,
    refcount: usize,
    generation: u32,
    destructor: Option<Destructor>,
}

/// The object table
pub struct ObjectManager {
    entries: Slab<ObjectEntry>,
    /// Generation to stamp on the next object placed in each slot
    generations: Vec<u32>,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self {
            entries: Slab::new(),
            generations: Vec::new(),
        }
    }

    /// Insert an object with refcount 1 under `owner`
    pub fn allocate(&mut self, object: KernelObject, owner: Handle) -> Handle {
        self.insert(object, owner, None)
    }

    /// Insert an object whose destructor runs when it is destroyed
    pub fn allocate_with_destructor(
        &mut self,
        object: KernelObject,
        owner: Handle,
        destructor: Destructor,
    ) -> Handle {
        self.insert(object, owner, Some(destructor))
    }

    fn insert(
        &mut self,
        object: KernelObject,
        owner: Handle,
        destructor: Option<Destructor>,
    ) -> Handle {
        let owner = if owner.is_null() || self.contains(owner) {
            owner
        } else {
            log::warn!("allocate: unknown owner {}, object left unowned", owner);
            Handle::NULL
        };

        let vacant = self.entries.vacant_entry();
        let slot = vacant.key();
        if self.generations.len() <= slot {
            self.generations.resize(slot + 1, 1);
        }
        let generation = self.generations[slot];
        let handle = Handle::from_parts(slot, generation);
        let object_type = object.object_type();
        vacant.insert(ObjectEntry {
            object,
            object_type,
            owner,
            owned: Vec::new(),
            refcount: 1,
            generation,
            destructor,
        });

        if let Some(parent) = self.entry_mut(owner) {
            parent.owned.push(handle);
        }
        handle
    }

    fn entry(&self, handle: Handle) -> Option<&ObjectEntry> {
        let slot = handle.slot()?;
        self.entries
            .get(slot)
            .filter(|e| e.generation == handle.generation())
    }

    fn entry_mut(&mut self, handle: Handle) -> Option<&mut ObjectEntry> {
        let slot = handle.slot()?;
        self.entries
            .get_mut(slot)
            .filter(|e| e.generation == handle.generation())
    }

    pub fn get(&self, handle: Handle) -> Option<&KernelObject> {
        self.entry(handle).map(|e| &e.object)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut KernelObject> {
        self.entry_mut(handle).map(|e| &mut e.object)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entry(handle).is_some()
    }

    pub fn object_type(&self, handle: Handle) -> Option<ObjectType> {
        self.entry(handle).map(|e| e.object_type)
    }

    pub fn refcount(&self, handle: Handle) -> Option<usize> {
        self.entry(handle).map(|e| e.refcount)
    }

    pub fn owner(&self, handle: Handle) -> Option<Handle> {
        self.entry(handle).map(|e| e.owner)
    }

    pub fn owned(&self, handle: Handle) -> &[Handle] {
        self.entry(handle).map(|e| e.owned.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take another reference; returns the same handle, or `Handle::INVALID`
    pub fn duplicate(&mut self, handle: Handle) -> Handle {
        match self.entry_mut(handle) {
            Some(entry) => {
                entry.refcount += 1;
                handle
            }
            None => Handle::INVALID,
        }
    }

    /// Drop a reference; the object is destroyed when none remain
    ///
    /// Returns false when the handle names nothing.
    pub fn close(&mut self, handle: Handle) -> bool {
        let Some(entry) = self.entry_mut(handle) else {
            return false;
        };
        entry.refcount -= 1;
        if entry.refcount == 0 {
            self.destroy_recursive(handle);
        }
        true
    }

    /// Move an object under a new owner
    ///
    /// Refuses unknown handles and moves that would make an object own itself.
    pub fn set_owner(&mut self, handle: Handle, new_owner: Handle) -> bool {
        if !self.contains(handle) || (!new_owner.is_null() && !self.contains(new_owner)) {
            return false;
        }
        let mut cursor = new_owner;
        while !cursor.is_null() {
            if cursor == handle {
                return false;
            }
            cursor = self.owner(cursor).unwrap_or(Handle::NULL);
        }

        let old_owner = self.owner(handle).unwrap_or(Handle::NULL);
        if old_owner == new_owner {
            return true;
        }
        if let Some(old) = self.entry_mut(old_owner) {
            old.owned.retain(|h| *h != handle);
        }
        if let Some(new) = self.entry_mut(new_owner) {
            new.owned.push(handle);
        }
        if let Some(entry) = self.entry_mut(handle) {
            entry.owner = new_owner;
        }
        true
    }

    /// Destroy everything `handle` owns, depth first, then `handle` itself
    ///
    /// Returns the number of objects destroyed.
    pub fn destroy_recursive(&mut self, handle: Handle) -> usize {
        let Some(entry) = self.entry_mut(handle) else {
            return 0;
        };
        let owned = std::mem::take(&mut entry.owned);
        let mut destroyed = 0;
        for child in owned {
            destroyed += self.destroy_recursive(child);
        }

        let Some(slot) = handle.slot() else {
            return destroyed;
        };
        let entry = self.entries.remove(slot);
        self.generations[slot] = self.generations[slot].wrapping_add(1).max(1);

        if let Some(owner) = self.entry_mut(entry.owner) {
            owner.owned.retain(|h| *h != handle);
        }
        log::trace!("destroyed {} {}", entry.object.type_name(), handle);

        if let Some(destructor) = entry.destructor {
            destructor(handle, entry.object);
        }
        destroyed + 1
    }

    /// Lazily iterate the live objects of one type
    pub fn enum_by_type(&self, object_type: ObjectType) -> impl Iterator<Item = Handle> + '_ {
        self.entries
            .iter()
            .filter(move |(_, e)| e.object_type == object_type)
            .map(|(slot, e)| Handle::from_parts(slot, e.generation))
    }

    /// A cursor over one type that survives table mutation between steps
    pub fn cursor(&self, object_type: ObjectType) -> ObjectCursor {
        ObjectCursor::new(object_type)
    }

    // Typed accessors used by the window server

    pub fn window(&self, hwnd: Handle) -> Option<&Window> {
        match self.get(hwnd)? {
            KernelObject::Window(w) => Some(w),
            _ => None,
        }
    }

    pub fn window_mut(&mut self, hwnd: Handle) -> Option<&mut Window> {
        match self.get_mut(hwnd)? {
            KernelObject::Window(w) => Some(w),
            _ => None,
        }
    }
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Restartable position in an `EnumByType` walk
///
/// The cursor remembers a slot index, not a borrow, so objects may be
/// created or destroyed between calls to `next`.
#[derive(Debug, Clone)]
pub struct ObjectCursor {
    object_type: ObjectType,
    next_slot: usize,
}

impl ObjectCursor {
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            next_slot: 0,
        }
    }

    pub fn next(&mut self, objects: &ObjectManager) -> Option<Handle> {
        let (slot, entry) = objects
            .entries
            .iter()
            .find(|(slot, e)| *slot >= self.next_slot && e.object_type == self.object_type)?;
        self.next_slot = slot + 1;
        Some(Handle::from_parts(slot, entry.generation))
    }

    pub fn restart(&mut self) {
        self.next_slot = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn generic(n: i64) -> KernelObject {
        KernelObject::Generic(serde_json::json!(n))
    }

    fn log_destructor(log: &Rc<RefCell<Vec<Handle>>>) -> Destructor {
        let log = log.clone();
        Box::new(move |h, _| log.borrow_mut().push(h))
    }

    #[test]
    fn test_allocate_and_get() {
        let mut om = ObjectManager::new();
        let h = om.allocate(generic(1), Handle::NULL);
        assert!(!h.is_null());
        assert!(matches!(om.get(h), Some(KernelObject::Generic(_))));
        assert_eq!(om.refcount(h), Some(1));
        assert_eq!(om.object_type(h), Some(ObjectType::Generic));
    }

    #[test]
    fn test_close_runs_destructor_once() {
        let mut om = ObjectManager::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let h = om.allocate_with_destructor(generic(1), Handle::NULL, log_destructor(&log));

        assert!(om.close(h));
        assert!(om.get(h).is_none());
        assert_eq!(log.borrow().len(), 1);

        assert!(!om.close(h));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_duplicate_keeps_object_alive() {
        let mut om = ObjectManager::new();
        let h = om.allocate(generic(1), Handle::NULL);
        assert_eq!(om.duplicate(h), h);
        assert_eq!(om.refcount(h), Some(2));

        om.close(h);
        assert!(om.contains(h));
        om.close(h);
        assert!(!om.contains(h));
    }

    #[test]
    fn test_duplicate_unknown_is_invalid() {
        let mut om = ObjectManager::new();
        assert_eq!(om.duplicate(Handle(0x1234)), Handle::INVALID);
        assert_eq!(om.duplicate(Handle::NULL), Handle::INVALID);
        assert_eq!(om.duplicate(Handle::INVALID), Handle::INVALID);
    }

    #[test]
    fn test_stale_handle_does_not_alias_new_object() {
        let mut om = ObjectManager::new();
        let old = om.allocate(generic(1), Handle::NULL);
        om.close(old);
        let new = om.allocate(generic(2), Handle::NULL);

        assert_ne!(old, new);
        assert!(om.get(old).is_none());
        assert!(om.get(new).is_some());
    }

    #[test]
    fn test_ownership_is_symmetric() {
        let mut om = ObjectManager::new();
        let root = om.allocate(generic(0), Handle::NULL);
        let a = om.allocate(generic(1), root);

        assert_eq!(om.owner(a), Some(root));
        assert_eq!(om.owned(root), &[a]);
    }

    #[test]
    fn test_unknown_owner_falls_back_to_none() {
        let mut om = ObjectManager::new();
        let h = om.allocate(generic(1), Handle(0xdead));
        assert_eq!(om.owner(h), Some(Handle::NULL));
    }

    #[test]
    fn test_set_owner_moves_between_lists() {
        let mut om = ObjectManager::new();
        let a = om.allocate(generic(0), Handle::NULL);
        let b = om.allocate(generic(0), Handle::NULL);
        let child = om.allocate(generic(1), a);

        assert!(om.set_owner(child, b));
        assert!(om.owned(a).is_empty());
        assert_eq!(om.owned(b), &[child]);
        assert_eq!(om.owner(child), Some(b));
    }

    #[test]
    fn test_set_owner_rejects_cycle() {
        let mut om = ObjectManager::new();
        let a = om.allocate(generic(0), Handle::NULL);
        let b = om.allocate(generic(1), a);
        assert!(!om.set_owner(a, b));
        assert!(!om.set_owner(a, a));
        assert_eq!(om.owner(a), Some(Handle::NULL));
    }

    #[test]
    fn test_destroy_recursive_depth_first() {
        let mut om = ObjectManager::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let root = om.allocate_with_destructor(generic(0), Handle::NULL, log_destructor(&log));
        let a = om.allocate_with_destructor(generic(1), root, log_destructor(&log));
        let a1 = om.allocate_with_destructor(generic(2), a, log_destructor(&log));
        let b = om.allocate_with_destructor(generic(3), root, log_destructor(&log));

        assert_eq!(om.destroy_recursive(root), 4);
        assert_eq!(log.borrow().as_slice(), &[a1, a, b, root]);
        assert!(om.is_empty());
    }

    #[test]
    fn test_destroy_recursive_unlinks_from_owner() {
        let mut om = ObjectManager::new();
        let root = om.allocate(generic(0), Handle::NULL);
        let a = om.allocate(generic(1), root);
        om.destroy_recursive(a);
        assert!(om.owned(root).is_empty());
        assert!(om.contains(root));
    }

    #[test]
    fn test_close_to_zero_takes_owned_objects() {
        let mut om = ObjectManager::new();
        let root = om.allocate(generic(0), Handle::NULL);
        let child = om.allocate(generic(1), root);
        om.close(root);
        assert!(!om.contains(child));
    }

    #[test]
    fn test_enum_by_type_filters() {
        let mut om = ObjectManager::new();
        om.allocate(generic(0), Handle::NULL);
        om.allocate(KernelObject::Menu(Menu::default()), Handle::NULL);
        om.allocate(generic(1), Handle::NULL);

        assert_eq!(om.enum_by_type(ObjectType::Generic).count(), 2);
        assert_eq!(om.enum_by_type(ObjectType::Menu).count(), 1);
        assert_eq!(om.enum_by_type(ObjectType::Window).count(), 0);
    }

    #[test]
    fn test_cursor_tolerates_mutation() {
        let mut om = ObjectManager::new();
        let a = om.allocate(generic(0), Handle::NULL);
        let b = om.allocate(generic(1), Handle::NULL);
        let c = om.allocate(generic(2), Handle::NULL);

        let mut cursor = om.cursor(ObjectType::Generic);
        assert_eq!(cursor.next(&om), Some(a));
        om.close(b);
        assert_eq!(cursor.next(&om), Some(c));
        assert_eq!(cursor.next(&om), None);

        cursor.restart();
        assert_eq!(cursor.next(&om), Some(a));
    }

    #[test]
    fn test_get_unknown_is_none() {
        let om = ObjectManager::new();
        assert!(om.get(Handle(42)).is_none());
        assert!(om.get(Handle::NULL).is_none());
        assert!(om.owned(Handle(42)).is_empty());
    }
}
