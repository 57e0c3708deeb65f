//! Integer-to-token formatters shared by the instruction renderers.

use chrono::DateTime;

pub const REG_ROOTS: [&str; 8] = ["HKCR", "HKCU", "HKLM", "HKU", "HKPD", "HKCC", "HKDD", "SHCTX"];

pub const MB_IDS: [&str; 8] = ["", "IDOK", "IDCANCEL", "IDABORT", "IDRETRY", "IDIGNORE", "IDYES", "IDNO"];

const MB_BUTTONS: [&str; 6] = [
    "MB_OK",
    "MB_OKCANCEL",
    "MB_ABORTRETRYIGNORE",
    "MB_YESNOCANCEL",
    "MB_YESNO",
    "MB_RETRYCANCEL",
];
const MB_ICONS: [&str; 5] = [
    "",
    "MB_ICONSTOP",
    "MB_ICONQUESTION",
    "MB_ICONEXCLAMATION",
    "MB_ICONINFORMATION",
];
const MB_PLACEMENT: [&str; 3] = ["MB_SETFOREGROUND", "MB_DEFAULT_DESKTOP_ONLY", "MB_TOPMOST"];
const MB_USERICON: u32 = 0x80;

pub const OVERWRITE_MODES: [&str; 6] = ["on", "off", "try", "ifnewer", "ifdiff", "lastused"];

pub const FILE_ATTRIBUTES: [(u32, &str); 7] = [
    (0x0001, "READONLY"),
    (0x0002, "HIDDEN"),
    (0x0004, "SYSTEM"),
    (0x0020, "ARCHIVE"),
    (0x0080, "NORMAL"),
    (0x0100, "TEMPORARY"),
    (0x1000, "OFFLINE"),
];

/// Show commands accepted by `ExecShell`; `SW_SHOWNORMAL` is the default and renders empty.
pub const SHOW_COMMANDS: [&str; 11] = [
    "SW_HIDE",
    "",
    "SW_SHOWMINIMIZED",
    "SW_SHOWMAXIMIZED",
    "SW_SHOWNOACTIVATE",
    "SW_SHOW",
    "SW_MINIMIZE",
    "SW_SHOWMINNOACTIVE",
    "SW_SHOWNA",
    "SW_RESTORE",
    "SW_SHOWDEFAULT",
];

pub const WINDOW_MESSAGES: &[(i64, &str)] = &[
    (0x0000, "WM_NULL"),
    (0x0001, "WM_CREATE"),
    (0x0002, "WM_DESTROY"),
    (0x0005, "WM_SIZE"),
    (0x0006, "WM_ACTIVATE"),
    (0x0007, "WM_SETFOCUS"),
    (0x0008, "WM_KILLFOCUS"),
    (0x000A, "WM_ENABLE"),
    (0x000B, "WM_SETREDRAW"),
    (0x000C, "WM_SETTEXT"),
    (0x000D, "WM_GETTEXT"),
    (0x000E, "WM_GETTEXTLENGTH"),
    (0x000F, "WM_PAINT"),
    (0x0010, "WM_CLOSE"),
    (0x0012, "WM_QUIT"),
    (0x0018, "WM_SHOWWINDOW"),
    (0x001A, "WM_SETTINGCHANGE"),
    (0x0030, "WM_SETFONT"),
    (0x0031, "WM_GETFONT"),
    (0x0080, "WM_SETICON"),
    (0x0100, "WM_KEYDOWN"),
    (0x0101, "WM_KEYUP"),
    (0x0102, "WM_CHAR"),
    (0x0110, "WM_INITDIALOG"),
    (0x0111, "WM_COMMAND"),
    (0x0112, "WM_SYSCOMMAND"),
    (0x0113, "WM_TIMER"),
    (0x0128, "WM_UPDATEUISTATE"),
    (0x0133, "WM_CTLCOLOREDIT"),
    (0x0138, "WM_CTLCOLORSTATIC"),
    (0x0201, "WM_LBUTTONDOWN"),
    (0x0202, "WM_LBUTTONUP"),
    (0x0400, "WM_USER"),
];

/// Seconds between 1601-01-01 and 1970-01-01, in 100 ns ticks.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;
const FILETIME_TICKS_PER_SECOND: u64 = 10_000_000;

/// Element `index` of `names`, or `prefix` followed by the number when out of range.
pub fn enum_token(index: i64, names: &[&str], prefix: &str) -> String {
    usize::try_from(index)
        .ok()
        .and_then(|i| names.get(i))
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}{}", prefix, index))
}

/// Names of the set bits, bit `n` taking `names[n]`. Unnamed bits end up in one hex residue.
pub fn bit_names(flags: u32, names: &[&str], sep: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut residue = 0u32;
    for bit in 0..32 {
        let mask = 1u32 << bit;
        if flags & mask == 0 {
            continue;
        }
        match names.get(bit) {
            Some(n) if !n.is_empty() => parts.push(n.to_string()),
            _ => residue |= mask,
        }
    }
    if residue != 0 {
        parts.push(format!("0x{:X}", residue));
    }
    parts.join(sep)
}

/// Like [`bit_names`], for flag sets that are not contiguous.
pub fn bit_names_by_value(flags: u32, names: &[(u32, &str)], sep: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut rest = flags;
    for (value, name) in names {
        if flags & value != 0 {
            parts.push(name.to_string());
            rest &= !value;
        }
    }
    if rest != 0 {
        parts.push(format!("0x{:X}", rest));
    }
    parts.join(sep)
}

/// Message box style word as `MB_*` names joined by `|`.
pub fn mb_style(style: u32) -> String {
    let mut parts = vec![enum_token((style & 7) as i64, &MB_BUTTONS, "")];

    let icon = (style >> 4) & 7;
    if icon != 0 {
        parts.push(enum_token(icon as i64, &MB_ICONS, "MB_ICON_"));
    }
    if style & MB_USERICON != 0 {
        parts.push("MB_USERICON".to_string());
    }
    let placement = (style >> 16) & 7;
    if placement != 0 {
        parts.push(bit_names(placement, &MB_PLACEMENT, "|"));
    }
    let rest = style & !((7 << 16) | 0xF0 | 7);
    if rest != 0 {
        parts.push(format!("0x{:x}", rest));
    }
    parts.join("|")
}

pub fn root_key(value: i32) -> String {
    enum_token((value & 0xF) as i64, &REG_ROOTS, "")
}

/// Shortcut options packed into one operand.
///
/// ```text
///  bits 0..8   icon index
///  bits 8..11  show state
///  bits 16..24 hot key virtual-key code
///  bits 24..32 hot key modifiers
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortcutFlags {
    pub icon_index: u8,
    pub show_state: u8,
    pub hotkey_key: u8,
    pub hotkey_mods: u8,
}

pub const HOTKEYF_SHIFT: u8 = 1;
pub const HOTKEYF_CONTROL: u8 = 2;
pub const HOTKEYF_ALT: u8 = 4;
pub const HOTKEYF_EXT: u8 = 8;
const VK_F1: u8 = 0x70;

impl ShortcutFlags {
    pub fn from_packed(v: u32) -> Self {
        Self {
            icon_index: (v & 0xFF) as u8,
            show_state: ((v >> 8) & 7) as u8,
            hotkey_key: ((v >> 16) & 0xFF) as u8,
            hotkey_mods: (v >> 24) as u8,
        }
    }

    pub fn show_name(&self) -> &'static str {
        match self.show_state {
            1 => "SW_SHOWNORMAL",
            3 => "SW_SHOWMAXIMIZED",
            7 => "SW_SHOWMINIMIZED",
            _ => "",
        }
    }

    pub fn hotkey(&self) -> String {
        let mut out = String::new();
        for (bit, name) in [
            (HOTKEYF_ALT, "ALT|"),
            (HOTKEYF_CONTROL, "CONTROL|"),
            (HOTKEYF_SHIFT, "SHIFT|"),
            (HOTKEYF_EXT, "EXT|"),
        ] {
            if self.hotkey_mods & bit != 0 {
                out.push_str(name);
            }
        }
        let key = self.hotkey_key;
        if key >= VK_F1 {
            out.push_str(&format!("F{}", key - VK_F1 + 1));
        } else if (0x20..0x7F).contains(&key) {
            out.push(key as char);
        }
        out
    }
}

/// Combines the two halves of a FILETIME operand pair.
pub fn filetime(low: i32, high: i32) -> u64 {
    ((high as u32 as u64) << 32) | low as u32 as u64
}

/// UTC calendar time of a FILETIME, or `None` before the Unix epoch or out of range.
pub fn filetime_to_string(ft: u64) -> Option<String> {
    let ticks = ft.checked_sub(FILETIME_UNIX_EPOCH)?;
    let secs = i64::try_from(ticks / FILETIME_TICKS_PER_SECOND).ok()?;
    let dt = DateTime::from_timestamp(secs, 0)?;
    Some(dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Joins positional arguments: trailing empty ones are dropped, inner ones become `""`.
pub fn positional<S: AsRef<str>>(args: &[S]) -> String {
    let last = args.iter().rposition(|a| !a.as_ref().is_empty());
    let Some(last) = last else {
        return String::new();
    };
    args[..=last]
        .iter()
        .map(|a| if a.as_ref().is_empty() { "\"\"" } else { a.as_ref() })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Joins the non-empty parts with single spaces.
pub fn words<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|p| p.as_ref())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn window_message_name(msg: i64) -> Option<&'static str> {
    WINDOW_MESSAGES
        .binary_search_by_key(&msg, |(k, _)| *k)
        .ok()
        .map(|i| WINDOW_MESSAGES[i].1)
}

/// `RRGGBB` from a color stored as `0x00BBGGRR`.
pub fn flip_rgb(value: i32) -> u32 {
    (value as u32).swap_bytes() >> 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_token_falls_back_to_numeral() {
        assert_eq!(enum_token(2, &REG_ROOTS, ""), "HKLM");
        assert_eq!(enum_token(9, &REG_ROOTS, "HK"), "HK9");
        assert_eq!(enum_token(-1, &["a"], ""), "-1");
    }

    #[test]
    fn test_bit_names() {
        assert_eq!(bit_names(0b101, &["A", "B", "C"], "|"), "A|C");
        assert_eq!(bit_names(0b1001, &["A", "B", "C"], " "), "A 0x8");
        assert_eq!(bit_names(0, &["A"], " "), "");
        assert_eq!(bit_names_by_value(0x21, &FILE_ATTRIBUTES, "|"), "READONLY|ARCHIVE");
        assert_eq!(bit_names_by_value(0x8001, &FILE_ATTRIBUTES, "|"), "READONLY|0x8000");
    }

    #[test]
    fn test_mb_style() {
        assert_eq!(mb_style(0), "MB_OK");
        assert_eq!(mb_style(4 | 0x20), "MB_YESNO|MB_ICONQUESTION");
        assert_eq!(mb_style(1 | 0x80 | 0x40000), "MB_OKCANCEL|MB_USERICON|MB_TOPMOST");
        assert_eq!(mb_style(0x10000 | 0x1000), "MB_OK|MB_SETFOREGROUND|0x1000");
    }

    #[test]
    fn test_shortcut_flags() {
        let f = ShortcutFlags::from_packed(0x0671_0302);
        assert_eq!(f.icon_index, 2);
        assert_eq!(f.show_name(), "SW_SHOWMAXIMIZED");
        assert_eq!(f.hotkey(), "ALT|CONTROL|F2");

        let f = ShortcutFlags::from_packed(0x0141_0000);
        assert_eq!(f.hotkey(), "SHIFT|A");
        assert_eq!(ShortcutFlags::from_packed(0).hotkey(), "");
    }

    #[test]
    fn test_filetime() {
        // 2001-01-01 00:00:00 UTC
        let ft = FILETIME_UNIX_EPOCH + 978_307_200 * FILETIME_TICKS_PER_SECOND;
        let (low, high) = (ft as u32 as i32, (ft >> 32) as u32 as i32);
        assert_eq!(filetime(low, high), ft);
        assert_eq!(filetime_to_string(ft).as_deref(), Some("2001-01-01 00:00:00"));
        assert_eq!(filetime_to_string(0), None);
    }

    #[test]
    fn test_positional() {
        assert_eq!(positional(&["a", "", "c", "", ""]), "a \"\" c");
        assert_eq!(positional::<&str>(&["", ""]), "");
        assert_eq!(words(&["a", "", "b"]), "a b");
    }

    #[test]
    fn test_flip_rgb_and_messages() {
        assert_eq!(flip_rgb(0x00332211), 0x112233);
        assert_eq!(window_message_name(0x0C), Some("WM_SETTEXT"));
        assert_eq!(window_message_name(0x9999), None);
    }
}
