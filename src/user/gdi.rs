//! Drawing-surface collaborator
//!
//! The window server never renders. It allocates a device context and a
//! visual root per window, resizes the context when the window resizes,
//! marks regions invalid, and releases both on destroy. Whatever draws
//! implements `DrawingSurface`; `MemorySurface` just keeps the books.

use super::geometry::Rect;
use super::Hwnd;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DcId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VisualId(pub u64);

pub trait DrawingSurface {
    fn allocate_dc(&mut self, hwnd: Hwnd, rect: Rect) -> DcId;
    fn resize_dc(&mut self, dc: DcId, rect: Rect);
    fn release_dc(&mut self, dc: DcId);
    fn create_visual(&mut self, hwnd: Hwnd) -> VisualId;
    fn release_visual(&mut self, visual: VisualId);
    /// Mark part of a context, or all of it with `None`, as needing paint
    fn invalidate(&mut self, dc: DcId, rect: Option<Rect>);

    fn dc_count(&self) -> usize;
    fn dc_rect(&self, dc: DcId) -> Option<Rect>;
}

#[derive(Debug)]
struct DcState {
    hwnd: Hwnd,
    rect: Rect,
    invalid: Vec<Rect>,
}

/// Book-keeping surface without pixels
#[derive(Debug, Default)]
pub struct MemorySurface {
    dcs: HashMap<DcId, DcState>,
    visuals: HashSet<VisualId>,
    next_id: u64,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn visual_count(&self) -> usize {
        self.visuals.len()
    }

    pub fn invalid_regions(&self, dc: DcId) -> &[Rect] {
        self.dcs.get(&dc).map(|s| s.invalid.as_slice()).unwrap_or(&[])
    }

    pub fn owner_of(&self, dc: DcId) -> Option<Hwnd> {
        self.dcs.get(&dc).map(|s| s.hwnd)
    }
}

impl DrawingSurface for MemorySurface {
    fn allocate_dc(&mut self, hwnd: Hwnd, rect: Rect) -> DcId {
        let id = DcId(self.next());
        self.dcs.insert(
            id,
            DcState {
                hwnd,
                rect,
                invalid: vec![rect],
            },
        );
        id
    }

    fn resize_dc(&mut self, dc: DcId, rect: Rect) {
        if let Some(state) = self.dcs.get_mut(&dc) {
            state.rect = rect;
            state.invalid = vec![rect];
        }
    }

    fn release_dc(&mut self, dc: DcId) {
        self.dcs.remove(&dc);
    }

    fn create_visual(&mut self, _hwnd: Hwnd) -> VisualId {
        let id = VisualId(self.next());
        self.visuals.insert(id);
        id
    }

    fn release_visual(&mut self, visual: VisualId) {
        self.visuals.remove(&visual);
    }

    fn invalidate(&mut self, dc: DcId, rect: Option<Rect>) {
        if let Some(state) = self.dcs.get_mut(&dc) {
            let rect = rect.unwrap_or(state.rect);
            state.invalid.push(rect);
        }
    }

    fn dc_count(&self) -> usize {
        self.dcs.len()
    }

    fn dc_rect(&self, dc: DcId) -> Option<Rect> {
        self.dcs.get(&dc).map(|s| s.rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_lifecycle() {
        let mut surface = MemorySurface::new();
        let dc = surface.allocate_dc(Hwnd::NULL, Rect::new(0, 0, 10, 10));
        assert_eq!(surface.dc_count(), 1);
        surface.resize_dc(dc, Rect::new(0, 0, 20, 20));
        assert_eq!(surface.dc_rect(dc), Some(Rect::new(0, 0, 20, 20)));
        surface.invalidate(dc, None);
        assert_eq!(surface.invalid_regions(dc).len(), 2);
        surface.release_dc(dc);
        assert_eq!(surface.dc_count(), 0);
    }

    #[test]
    fn test_visuals_tracked() {
        let mut surface = MemorySurface::new();
        let v = surface.create_visual(Hwnd::NULL);
        assert_eq!(surface.visual_count(), 1);
        surface.release_visual(v);
        assert_eq!(surface.visual_count(), 0);
    }
}
