//! Frame geometry
//!
//! Non-client metrics, the default client area, the default hit test, and
//! default placement of new windows.

use super::geometry::{Point, Rect};
use super::message::*;
use super::window::Window;
use super::{DesktopId, Hwnd};
use crate::config::MetricsConfig;
use crate::kernel::{Kernel, KernelResult};

/// Thickness of each frame edge, caption included in `top`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInsets {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

pub fn frame_insets(style: u32, metrics: &MetricsConfig) -> FrameInsets {
    let edge = if style & WS_THICKFRAME != 0 {
        metrics.frame_width
    } else if style & (WS_BORDER | WS_DLGFRAME) != 0 {
        metrics.border_width
    } else {
        0
    };
    let caption = if style & WS_CAPTION == WS_CAPTION {
        metrics.caption_height
    } else {
        0
    };
    FrameInsets {
        left: edge,
        top: edge + caption,
        right: edge,
        bottom: edge,
    }
}

/// Client area DefWindowProc computes for a window rectangle
pub fn default_client_rect(window_rect: Rect, style: u32, metrics: &MetricsConfig) -> Rect {
    let insets = frame_insets(style, metrics);
    let left = window_rect.left + insets.left;
    let top = window_rect.top + insets.top;
    Rect::new(
        left,
        top,
        (window_rect.right - insets.right).max(left),
        (window_rect.bottom - insets.bottom).max(top),
    )
}

/// Classify a screen point against a window's frame
pub fn default_hit_test(window: &Window, pt: Point, metrics: &MetricsConfig) -> LResult {
    let rect = window.window_rect;
    if !rect.contains(pt) {
        return HTNOWHERE;
    }
    if window.client_rect.contains(pt) {
        return HTCLIENT;
    }

    if window.style & WS_THICKFRAME != 0 && !window.is_maximized() {
        let m = metrics.sizing_margin;
        let left = pt.x < rect.left + m;
        let right = pt.x >= rect.right - m;
        let top = pt.y < rect.top + m;
        let bottom = pt.y >= rect.bottom - m;
        match (left, right, top, bottom) {
            (true, _, true, _) => return HTTOPLEFT,
            (_, true, true, _) => return HTTOPRIGHT,
            (true, _, _, true) => return HTBOTTOMLEFT,
            (_, true, _, true) => return HTBOTTOMRIGHT,
            (true, ..) => return HTLEFT,
            (_, true, ..) => return HTRIGHT,
            (_, _, true, _) => return HTTOP,
            (.., true) => return HTBOTTOM,
            _ => {}
        }
    }

    if window.style & WS_CAPTION == WS_CAPTION {
        let insets = frame_insets(window.style, metrics);
        let caption_top = insets.top - metrics.caption_height;
        let in_caption = pt.y >= rect.top + caption_top && pt.y < rect.top + insets.top;
        if in_caption {
            let button = metrics.caption_button_width;
            let right = rect.right - insets.right;
            let buttons = [
                (window.style & WS_SYSMENU != 0, HTCLOSE),
                (window.style & WS_MAXIMIZEBOX != 0, HTMAXBUTTON),
                (window.style & WS_MINIMIZEBOX != 0, HTMINBUTTON),
            ];
            let mut edge = right;
            for (present, code) in buttons {
                if !present {
                    continue;
                }
                if pt.x >= edge - button && pt.x < edge {
                    return code;
                }
                edge -= button;
            }
            if window.style & WS_SYSMENU != 0 && pt.x < rect.left + insets.left + button {
                return HTSYSMENU;
            }
            return HTCAPTION;
        }
    }
    HTBORDER
}

impl Kernel {
    /// Next cascade position on a desktop's primary work area
    pub(crate) fn next_cascade_position(&mut self, desktop: DesktopId) -> Point {
        let step = self.config.metrics.cascade_step();
        let Some(d) = self.desktop_mut(desktop) else {
            return Point::origin();
        };
        let area = d.primary_work_area();
        let mut offset = d.cascade;
        if offset > area.width() / 4 || offset > area.height() / 4 {
            offset = 0;
        }
        d.cascade = offset + step;
        area.top_left().offset(offset, offset)
    }

    /// Three quarters of the primary work area
    pub(crate) fn default_window_size(&self, desktop: DesktopId) -> (i32, i32) {
        let area = self
            .desktop(desktop)
            .map(|d| d.primary_work_area())
            .unwrap_or_default();
        (area.width() * 3 / 4, area.height() * 3 / 4)
    }

    /// Recompute the client area through WM_NCCALCSIZE
    pub(crate) fn recalc_client_rect(&mut self, hwnd: Hwnd) -> KernelResult<()> {
        let Some(w) = self.window_mut(hwnd) else {
            return Ok(());
        };
        let before = w.client_rect;
        w.client_rect = w.window_rect;
        self.send_message(hwnd, WM_NCCALCSIZE, 0, 0)?;

        let Some((after, dc)) = self.window(hwnd).map(|w| (w.client_rect, w.dc_id)) else {
            return Ok(());
        };
        if after.width() != before.width() || after.height() != before.height() {
            if let Some(dc) = dc {
                self.user.surface.resize_dc(dc, after);
            }
        }
        Ok(())
    }

    pub fn metrics(&self) -> &MetricsConfig {
        &self.config.metrics
    }
}
