//! Window message numbers, styles and parameter helpers

use bitflags::bitflags;

pub type WParam = usize;
pub type LParam = isize;
pub type LResult = isize;

// ========== WINDOW MESSAGES ==========

pub const WM_NULL: u32 = 0x0000;
pub const WM_CREATE: u32 = 0x0001;
pub const WM_DESTROY: u32 = 0x0002;
pub const WM_MOVE: u32 = 0x0003;
pub const WM_SIZE: u32 = 0x0005;
pub const WM_ACTIVATE: u32 = 0x0006;
pub const WM_SETFOCUS: u32 = 0x0007;
pub const WM_KILLFOCUS: u32 = 0x0008;
pub const WM_ENABLE: u32 = 0x000A;
pub const WM_SETTEXT: u32 = 0x000C;
pub const WM_CLOSE: u32 = 0x0010;
pub const WM_QUIT: u32 = 0x0012;
pub const WM_SHOWWINDOW: u32 = 0x0018;
pub const WM_MOUSEACTIVATE: u32 = 0x0021;
pub const WM_WINDOWPOSCHANGED: u32 = 0x0047;
pub const WM_STYLECHANGED: u32 = 0x007D;
pub const WM_NCCREATE: u32 = 0x0081;
pub const WM_NCDESTROY: u32 = 0x0082;
pub const WM_NCCALCSIZE: u32 = 0x0083;
pub const WM_NCHITTEST: u32 = 0x0084;
pub const WM_NCACTIVATE: u32 = 0x0086;
pub const WM_NCMOUSEMOVE: u32 = 0x00A0;
pub const WM_NCLBUTTONDOWN: u32 = 0x00A1;
pub const WM_NCLBUTTONUP: u32 = 0x00A2;
pub const WM_NCRBUTTONDOWN: u32 = 0x00A4;
pub const WM_NCRBUTTONUP: u32 = 0x00A5;
pub const WM_NCMBUTTONDOWN: u32 = 0x00A7;
pub const WM_NCMBUTTONUP: u32 = 0x00A8;
pub const WM_KEYDOWN: u32 = 0x0100;
pub const WM_KEYUP: u32 = 0x0101;
pub const WM_CHAR: u32 = 0x0102;
pub const WM_SYSCOMMAND: u32 = 0x0112;
pub const WM_MOUSEMOVE: u32 = 0x0200;
pub const WM_LBUTTONDOWN: u32 = 0x0201;
pub const WM_LBUTTONUP: u32 = 0x0202;
pub const WM_RBUTTONDOWN: u32 = 0x0204;
pub const WM_RBUTTONUP: u32 = 0x0205;
pub const WM_MBUTTONDOWN: u32 = 0x0207;
pub const WM_MBUTTONUP: u32 = 0x0208;
pub const WM_PARENTNOTIFY: u32 = 0x0210;
pub const WM_CAPTURECHANGED: u32 = 0x0215;
pub const WM_USER: u32 = 0x0400;

// ========== HIT-TEST CODES ==========

pub const HTERROR: LResult = -2;
pub const HTTRANSPARENT: LResult = -1;
pub const HTNOWHERE: LResult = 0;
pub const HTCLIENT: LResult = 1;
pub const HTCAPTION: LResult = 2;
pub const HTSYSMENU: LResult = 3;
pub const HTMENU: LResult = 5;
pub const HTMINBUTTON: LResult = 8;
pub const HTMAXBUTTON: LResult = 9;
pub const HTLEFT: LResult = 10;
pub const HTRIGHT: LResult = 11;
pub const HTTOP: LResult = 12;
pub const HTTOPLEFT: LResult = 13;
pub const HTTOPRIGHT: LResult = 14;
pub const HTBOTTOM: LResult = 15;
pub const HTBOTTOMLEFT: LResult = 16;
pub const HTBOTTOMRIGHT: LResult = 17;
pub const HTBORDER: LResult = 18;
pub const HTCLOSE: LResult = 20;

// ========== ACTIVATION / SHOW / SYSCOMMAND ==========

pub const WA_INACTIVE: WParam = 0;
pub const WA_ACTIVE: WParam = 1;
pub const WA_CLICKACTIVE: WParam = 2;

pub const MA_ACTIVATE: LResult = 1;
pub const MA_ACTIVATEANDEAT: LResult = 2;
pub const MA_NOACTIVATE: LResult = 3;
pub const MA_NOACTIVATEANDEAT: LResult = 4;

pub const SW_HIDE: i32 = 0;
pub const SW_SHOWNORMAL: i32 = 1;
pub const SW_SHOWMINIMIZED: i32 = 2;
pub const SW_MAXIMIZE: i32 = 3;
pub const SW_SHOWNOACTIVATE: i32 = 4;
pub const SW_SHOW: i32 = 5;
pub const SW_MINIMIZE: i32 = 6;
pub const SW_SHOWMINNOACTIVE: i32 = 7;
pub const SW_SHOWNA: i32 = 8;
pub const SW_RESTORE: i32 = 9;

pub const SC_MINIMIZE: WParam = 0xF020;
pub const SC_MAXIMIZE: WParam = 0xF030;
pub const SC_CLOSE: WParam = 0xF060;
pub const SC_RESTORE: WParam = 0xF120;

pub const SIZE_RESTORED: WParam = 0;
pub const SIZE_MINIMIZED: WParam = 1;
pub const SIZE_MAXIMIZED: WParam = 2;

// ========== WINDOW LONGS / TREE QUERIES ==========

pub const GWL_WNDPROC: i32 = -4;
pub const GWL_HWNDPARENT: i32 = -8;
pub const GWL_ID: i32 = -12;
pub const GWL_STYLE: i32 = -16;
pub const GWL_EXSTYLE: i32 = -20;
pub const GWL_USERDATA: i32 = -21;

pub const GW_HWNDFIRST: u32 = 0;
pub const GW_HWNDLAST: u32 = 1;
pub const GW_HWNDNEXT: u32 = 2;
pub const GW_HWNDPREV: u32 = 3;
pub const GW_OWNER: u32 = 4;
pub const GW_CHILD: u32 = 5;

pub const GA_PARENT: u32 = 1;
pub const GA_ROOT: u32 = 2;
pub const GA_ROOTOWNER: u32 = 3;

// ========== STYLES ==========

pub const WS_OVERLAPPED: u32 = 0x0000_0000;
pub const WS_POPUP: u32 = 0x8000_0000;
pub const WS_CHILD: u32 = 0x4000_0000;
pub const WS_MINIMIZE: u32 = 0x2000_0000;
pub const WS_VISIBLE: u32 = 0x1000_0000;
pub const WS_DISABLED: u32 = 0x0800_0000;
pub const WS_CLIPSIBLINGS: u32 = 0x0400_0000;
pub const WS_CLIPCHILDREN: u32 = 0x0200_0000;
pub const WS_MAXIMIZE: u32 = 0x0100_0000;
pub const WS_CAPTION: u32 = 0x00C0_0000;
pub const WS_BORDER: u32 = 0x0080_0000;
pub const WS_DLGFRAME: u32 = 0x0040_0000;
pub const WS_SYSMENU: u32 = 0x0008_0000;
pub const WS_THICKFRAME: u32 = 0x0004_0000;
pub const WS_MINIMIZEBOX: u32 = 0x0002_0000;
pub const WS_MAXIMIZEBOX: u32 = 0x0001_0000;
pub const WS_OVERLAPPEDWINDOW: u32 = WS_OVERLAPPED
    | WS_CAPTION
    | WS_SYSMENU
    | WS_THICKFRAME
    | WS_MINIMIZEBOX
    | WS_MAXIMIZEBOX;

pub const WS_EX_NOPARENTNOTIFY: u32 = 0x0000_0004;
pub const WS_EX_TOPMOST: u32 = 0x0000_0008;
pub const WS_EX_TOOLWINDOW: u32 = 0x0000_0080;
pub const WS_EX_NOACTIVATE: u32 = 0x0800_0000;

/// Position or size placeholder asking for the default
pub const CW_USEDEFAULT: i32 = i32::MIN;

bitflags! {
    /// SetWindowPos behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SwpFlags: u32 {
        const NOSIZE = 0x0001;
        const NOMOVE = 0x0002;
        const NOZORDER = 0x0004;
        const NOREDRAW = 0x0008;
        const NOACTIVATE = 0x0010;
        const FRAMECHANGED = 0x0020;
        const SHOWWINDOW = 0x0040;
        const HIDEWINDOW = 0x0080;
    }
}

// ========== VIRTUAL KEYS ==========

pub const VK_BACK: u32 = 0x08;
pub const VK_TAB: u32 = 0x09;
pub const VK_RETURN: u32 = 0x0D;
pub const VK_SHIFT: u32 = 0x10;
pub const VK_ESCAPE: u32 = 0x1B;
pub const VK_SPACE: u32 = 0x20;

/// Character a key-down produces, if any
pub fn vk_to_char(vk: u32, shift: bool) -> Option<char> {
    match vk {
        VK_BACK => Some('\u{8}'),
        VK_TAB => Some('\t'),
        VK_RETURN => Some('\r'),
        VK_ESCAPE => Some('\u{1b}'),
        VK_SPACE => Some(' '),
        0x30..=0x39 => char::from_u32(vk),
        0x41..=0x5A => {
            let c = char::from_u32(vk)?;
            Some(if shift { c } else { c.to_ascii_lowercase() })
        }
        _ => None,
    }
}

// ========== PARAMETER PACKING ==========

/// Pack two 16-bit coordinates the way pointer messages carry them
pub fn make_lparam(low: i32, high: i32) -> LParam {
    let packed = ((high as u16 as u32) << 16) | (low as u16 as u32);
    packed as i32 as LParam
}

pub fn get_x_lparam(lparam: LParam) -> i32 {
    (lparam as u32 & 0xFFFF) as u16 as i16 as i32
}

pub fn get_y_lparam(lparam: LParam) -> i32 {
    ((lparam as u32 >> 16) & 0xFFFF) as u16 as i16 as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lparam_packs_negative_coordinates() {
        let lp = make_lparam(-5, 300);
        assert_eq!(get_x_lparam(lp), -5);
        assert_eq!(get_y_lparam(lp), 300);
    }

    #[test]
    fn test_vk_to_char() {
        assert_eq!(vk_to_char(0x41, false), Some('a'));
        assert_eq!(vk_to_char(0x41, true), Some('A'));
        assert_eq!(vk_to_char(0x35, false), Some('5'));
        assert_eq!(vk_to_char(VK_SHIFT, false), None);
    }

    #[test]
    fn test_overlapped_window_has_caption_and_frame() {
        assert_eq!(WS_OVERLAPPEDWINDOW & WS_CAPTION, WS_CAPTION);
        assert_ne!(WS_OVERLAPPEDWINDOW & WS_THICKFRAME, 0);
    }
}
