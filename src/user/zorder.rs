//! Sibling lists and Z-order
//!
//! Children of a window form a doubly linked list, front to back, starting
//! at the parent's `first_child`. Topmost windows form a band at the front
//! of the list; every insertion keeps the band contiguous.

use super::window::{Link, WindowFlags};
use super::message::WS_EX_TOPMOST;
use super::Hwnd;
use crate::kernel::{Kernel, KernelError, KernelResult, StopCode};
use serde::{Deserialize, Serialize};

/// Where a window goes in its sibling list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertAfter {
    /// Front of the window's own band
    Top,
    /// Back of the list; leaves the topmost band
    Bottom,
    /// Front of the list; joins the topmost band
    Topmost,
    /// Front of the normal band; leaves the topmost band
    NotTopmost,
    /// Right behind a sibling
    After(Hwnd),
}

impl Kernel {
    fn set_topmost(&mut self, hwnd: Hwnd, topmost: bool) {
        if let Some(w) = self.objects.window_mut(hwnd) {
            if topmost {
                w.ex_style |= WS_EX_TOPMOST;
            } else {
                w.ex_style &= !WS_EX_TOPMOST;
            }
        }
    }

    /// Last topmost window among `siblings`, skipping `hwnd`
    fn last_topmost(&self, siblings: &[Hwnd], hwnd: Hwnd) -> Hwnd {
        siblings
            .iter()
            .copied()
            .filter(|h| *h != hwnd)
            .take_while(|h| self.objects.window(*h).is_some_and(|w| w.is_topmost()))
            .last()
            .unwrap_or_default()
    }

    /// Sibling the window should follow; NULL means the front
    fn insertion_point(&mut self, hwnd: Hwnd, parent: Hwnd, after: InsertAfter) -> Hwnd {
        let siblings = self.child_windows(parent);
        let after = match after {
            InsertAfter::After(x) if x == hwnd || !siblings.contains(&x) => InsertAfter::Top,
            other => other,
        };
        match after {
            InsertAfter::Topmost => {
                self.set_topmost(hwnd, true);
                Hwnd::NULL
            }
            InsertAfter::NotTopmost => {
                self.set_topmost(hwnd, false);
                self.last_topmost(&siblings, hwnd)
            }
            InsertAfter::Bottom => {
                self.set_topmost(hwnd, false);
                siblings
                    .iter()
                    .copied()
                    .filter(|h| *h != hwnd)
                    .last()
                    .unwrap_or_default()
            }
            InsertAfter::Top => {
                let topmost = self.objects.window(hwnd).is_some_and(|w| w.is_topmost());
                if topmost {
                    Hwnd::NULL
                } else {
                    self.last_topmost(&siblings, hwnd)
                }
            }
            InsertAfter::After(x) => {
                let topmost = self.objects.window(hwnd).is_some_and(|w| w.is_topmost());
                let x_topmost = self.objects.window(x).is_some_and(|w| w.is_topmost());
                if topmost == x_topmost {
                    x
                } else {
                    // Clamp to the band boundary
                    self.last_topmost(&siblings, hwnd)
                }
            }
        }
    }

    /// Put an unlinked window into `parent`'s sibling list
    pub(crate) fn link_window(&mut self, hwnd: Hwnd, parent: Hwnd, after: InsertAfter) {
        if self
            .objects
            .window(hwnd)
            .is_none_or(|w| w.flags.contains(WindowFlags::LINKED))
        {
            return;
        }
        let prev = self.insertion_point(hwnd, parent, after);
        let next = if prev.is_null() {
            self.objects.window(parent).map(|w| w.first_child)
        } else {
            self.objects.window(prev).map(|w| w.next)
        }
        .unwrap_or_default();

        self.set_link(hwnd, Link::Parent, parent);
        self.set_link(hwnd, Link::Prev, prev);
        self.set_link(hwnd, Link::Next, next);
        if prev.is_null() {
            self.set_link(parent, Link::FirstChild, hwnd);
        } else {
            self.set_link(prev, Link::Next, hwnd);
        }
        if !next.is_null() {
            self.set_link(next, Link::Prev, hwnd);
        }
        if let Some(w) = self.objects.window_mut(hwnd) {
            w.flags.insert(WindowFlags::LINKED);
        }
        self.verify_siblings(parent);
    }

    /// Take a window out of its sibling list; the parent link stays
    pub(crate) fn unlink_window(&mut self, hwnd: Hwnd) {
        let Some((parent, prev, next)) = self
            .objects
            .window(hwnd)
            .filter(|w| w.flags.contains(WindowFlags::LINKED))
            .map(|w| (w.parent, w.prev, w.next))
        else {
            return;
        };
        if prev.is_null() {
            self.set_link(parent, Link::FirstChild, next);
        } else {
            self.set_link(prev, Link::Next, next);
        }
        if !next.is_null() {
            self.set_link(next, Link::Prev, prev);
        }
        self.set_link(hwnd, Link::Next, Hwnd::NULL);
        self.set_link(hwnd, Link::Prev, Hwnd::NULL);
        if let Some(w) = self.objects.window_mut(hwnd) {
            w.flags.remove(WindowFlags::LINKED);
        }
        self.verify_siblings(parent);
    }

    /// Move a linked window within its sibling list
    pub fn relink_window(&mut self, hwnd: Hwnd, after: InsertAfter) -> KernelResult<()> {
        let parent = self
            .window(hwnd)
            .filter(|w| w.flags.contains(WindowFlags::LINKED))
            .map(|w| w.parent)
            .ok_or(KernelError::InvalidWindowHandle)?;
        self.unlink_window(hwnd);
        self.link_window(hwnd, parent, after);
        Ok(())
    }

    /// Check link symmetry and the topmost band; a broken list stops the system
    pub(crate) fn verify_siblings(&mut self, parent: Hwnd) -> bool {
        let mut prev = Hwnd::NULL;
        let mut seen_normal = false;
        let mut current = self.objects.window(parent).map(|w| w.first_child).unwrap_or_default();
        let mut steps = 0;
        let fault = loop {
            let Some(w) = self.objects.window(current) else {
                break None;
            };
            if w.prev != prev {
                break Some(format!("{} has prev {} but follows {}", current, w.prev, prev));
            }
            if w.parent != parent {
                break Some(format!("{} listed under {} but parent is {}", current, parent, w.parent));
            }
            if w.is_topmost() && seen_normal {
                break Some(format!("topmost {} behind a normal sibling", current));
            }
            seen_normal |= !w.is_topmost();
            steps += 1;
            if steps > self.objects.len() {
                break Some(format!("sibling list of {} does not end", parent));
            }
            prev = current;
            current = w.next;
        };
        match fault {
            Some(detail) => {
                self.bugcheck(StopCode::KernelInvariantBroken, detail);
                false
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::object::KernelObject;
    use crate::kernel::Pid;
    use crate::user::window::Window;
    use crate::user::DesktopId;

    fn setup() -> (Kernel, Hwnd) {
        let mut k = Kernel::default();
        let root = k.process(Pid::SYSTEM).unwrap().root;
        let parent = k.objects.allocate(
            KernelObject::Window(Box::new(Window::new(Pid::SYSTEM, DesktopId::DEFAULT, "p", ""))),
            root,
        );
        (k, parent)
    }

    fn add(k: &mut Kernel, parent: Hwnd, topmost: bool, after: InsertAfter) -> Hwnd {
        let root = k.process(Pid::SYSTEM).unwrap().root;
        let mut w = Window::new(Pid::SYSTEM, DesktopId::DEFAULT, "c", "");
        if topmost {
            w.ex_style |= WS_EX_TOPMOST;
        }
        let hwnd = k.objects.allocate(KernelObject::Window(Box::new(w)), root);
        k.link_window(hwnd, parent, after);
        hwnd
    }

    #[test]
    fn test_top_insertion_respects_band() {
        let (mut k, p) = setup();
        let a = add(&mut k, p, false, InsertAfter::Top);
        let t = add(&mut k, p, true, InsertAfter::Top);
        let b = add(&mut k, p, false, InsertAfter::Top);
        assert_eq!(k.child_windows(p), vec![t, b, a]);
        assert!(!k.is_stopped());
    }

    #[test]
    fn test_bottom_clears_topmost() {
        let (mut k, p) = setup();
        let t = add(&mut k, p, true, InsertAfter::Top);
        let a = add(&mut k, p, false, InsertAfter::Top);
        k.relink_window(t, InsertAfter::Bottom).unwrap();
        assert_eq!(k.child_windows(p), vec![a, t]);
        assert!(!k.window(t).unwrap().is_topmost());
    }

    #[test]
    fn test_after_across_band_is_clamped() {
        let (mut k, p) = setup();
        let t1 = add(&mut k, p, true, InsertAfter::Top);
        let t2 = add(&mut k, p, true, InsertAfter::After(t1));
        let a = add(&mut k, p, false, InsertAfter::Top);
        let b = add(&mut k, p, false, InsertAfter::After(a));
        // A normal window asked to follow t1 lands after the band
        k.relink_window(b, InsertAfter::After(t1)).unwrap();
        assert_eq!(k.child_windows(p), vec![t1, t2, b, a]);
        // A topmost window asked to follow a normal one stays in the band
        k.relink_window(t1, InsertAfter::After(a)).unwrap();
        assert_eq!(k.child_windows(p), vec![t2, t1, b, a]);
    }

    #[test]
    fn test_degenerate_target_goes_to_top() {
        let (mut k, p) = setup();
        let a = add(&mut k, p, false, InsertAfter::Top);
        let b = add(&mut k, p, false, InsertAfter::Top);
        k.relink_window(a, InsertAfter::After(a)).unwrap();
        assert_eq!(k.child_windows(p), vec![a, b]);
        k.relink_window(b, InsertAfter::After(crate::kernel::Handle(0xdead))).unwrap();
        assert_eq!(k.child_windows(p), vec![b, a]);
    }

    #[test]
    fn test_unlink_restores_refcounts() {
        let (mut k, p) = setup();
        let a = add(&mut k, p, false, InsertAfter::Top);
        let b = add(&mut k, p, false, InsertAfter::Top);
        k.unlink_window(b);
        assert_eq!(k.child_windows(p), vec![a]);
        assert_eq!(k.window(a).unwrap().prev, Hwnd::NULL);
        // Own handle plus the parent's first-child link
        assert_eq!(k.objects.refcount(a), Some(2));
        // Own handle only; the parent link of b still holds p
        assert_eq!(k.objects.refcount(b), Some(1));
    }

    #[test]
    fn test_asymmetric_links_stop_system() {
        let (mut k, p) = setup();
        let a = add(&mut k, p, false, InsertAfter::Top);
        let _b = add(&mut k, p, false, InsertAfter::Top);
        k.objects.window_mut(a).unwrap().prev = Hwnd::NULL;
        assert!(!k.verify_siblings(p));
        assert_eq!(k.stop_reason().unwrap().code, StopCode::KernelInvariantBroken);
    }
}
