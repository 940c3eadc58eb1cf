//! Monitors
//!
//! A desktop spans one or more monitors taken from the configuration. The
//! first monitor is the primary one.

use super::geometry::{Point, Rect};
use super::{DesktopId, Hwnd};
use crate::kernel::Kernel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub index: usize,
    pub rect: Rect,
    pub work_area: Rect,
    pub primary: bool,
}

impl Kernel {
    pub fn enum_monitors(&self, desktop: DesktopId) -> Vec<MonitorInfo> {
        let Some(d) = self.desktop(desktop) else {
            return Vec::new();
        };
        d.monitors
            .iter()
            .enumerate()
            .map(|(index, m)| MonitorInfo {
                index,
                rect: m.rect,
                work_area: m.work_area(),
                primary: index == 0,
            })
            .collect()
    }

    pub fn monitor_from_point(&self, desktop: DesktopId, pt: Point) -> Option<MonitorInfo> {
        self.enum_monitors(desktop)
            .into_iter()
            .find(|m| m.rect.contains(pt))
    }

    /// Monitor with the largest overlap; None when nothing overlaps
    pub fn monitor_from_rect(&self, desktop: DesktopId, rect: &Rect) -> Option<MonitorInfo> {
        self.enum_monitors(desktop)
            .into_iter()
            .filter_map(|m| {
                let area = m.rect.intersection(rect)?;
                Some((area.width() as i64 * area.height() as i64, m))
            })
            .filter(|(area, _)| *area > 0)
            // Ties go to the earlier monitor
            .fold(None, |best: Option<(i64, MonitorInfo)>, (area, m)| match best {
                Some((b, _)) if b >= area => best,
                _ => Some((area, m)),
            })
            .map(|(_, m)| m)
    }

    /// Monitor a window is mostly on, else the primary one
    pub fn monitor_from_window(&self, hwnd: Hwnd) -> Option<MonitorInfo> {
        let w = self.window(hwnd)?;
        let desktop = w.desktop;
        self.monitor_from_rect(desktop, &w.window_rect)
            .or_else(|| self.enum_monitors(desktop).into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KernelConfig, MonitorConfig};

    fn dual() -> Kernel {
        let mut config = KernelConfig::with_screen(800, 600);
        let mut second = MonitorConfig::new(Rect::new(800, 0, 1824, 768));
        second.work_area = Some(Rect::new(800, 0, 1824, 740));
        config.monitors.push(second);
        Kernel::new(config)
    }

    #[test]
    fn test_enum_marks_primary() {
        let k = dual();
        let monitors = k.enum_monitors(DesktopId::DEFAULT);
        assert_eq!(monitors.len(), 2);
        assert!(monitors[0].primary);
        assert!(!monitors[1].primary);
        assert_eq!(monitors[1].work_area, Rect::new(800, 0, 1824, 740));
    }

    #[test]
    fn test_monitor_from_point() {
        let k = dual();
        let m = k.monitor_from_point(DesktopId::DEFAULT, Point::new(900, 10)).unwrap();
        assert_eq!(m.index, 1);
        assert!(k.monitor_from_point(DesktopId::DEFAULT, Point::new(-5, 10)).is_none());
    }

    #[test]
    fn test_monitor_from_rect_picks_largest_overlap() {
        let k = dual();
        let mostly_right = Rect::new(700, 0, 1000, 100);
        assert_eq!(k.monitor_from_rect(DesktopId::DEFAULT, &mostly_right).unwrap().index, 1);
        let mostly_left = Rect::new(500, 0, 850, 100);
        assert_eq!(k.monitor_from_rect(DesktopId::DEFAULT, &mostly_left).unwrap().index, 0);
        let off_screen = Rect::new(-500, -500, -400, -400);
        assert!(k.monitor_from_rect(DesktopId::DEFAULT, &off_screen).is_none());
    }
}
