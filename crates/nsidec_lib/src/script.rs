//! Whole-script output: prologue, variable declarations and the instruction listing.

use serde::{Deserialize, Serialize};

use crate::decompiler::Decompiler;
use crate::layout::INDENT;
use crate::model::{
    BlockKind, Installer, CALLBACK_NAMES, CH_FLAGS_AUTO_CLOSE, CH_FLAGS_COMP_ONLY_ON_CUSTOM,
    CH_FLAGS_DETAILS_NEVERSHOW, CH_FLAGS_DETAILS_SHOWDETAILS, CH_FLAGS_NO_CUSTOM, CH_FLAGS_SILENT,
};
use crate::strings::quote_if_needed;
use crate::tokens::{flip_rgb, root_key, words};
use crate::{DecompileOptions, Generation, NsiError};

const BANNER: &str = "; --------------------";
const EMPTY_COLOR: u32 = 0xFF_FFFF;
const BRANDING_IMAGE: &str = "AddBrandingImage left 100";
const DEFAULT_CUSTOM_TYPE: &str = "Custom";
const PAGE_KINDS: [&str; 6] = ["custom", "license", "components", "directory", "instfiles", "uninstConfirm"];

/// A file the installer extracts, as far as the header block tells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFile {
    pub name: String,
    /// Output directory set by the last `SetOutPath` before the extraction.
    pub out_dir: String,
    /// Offset of the compressed data in the data block.
    pub data_offset: u32,
    pub modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decompilation {
    pub lines: Vec<String>,
    pub files: Vec<ExtractedFile>,
    /// Heap generation the strings were decoded with.
    pub generation: Generation,
}

impl Decompilation {
    pub fn to_script(&self) -> String {
        self.lines.join("\n")
    }
}

fn check_input(installer: &Installer) -> Result<(), NsiError> {
    if installer.strings.is_empty() {
        return Err(NsiError::MissingBlock(BlockKind::Strings));
    }
    if installer.entries.is_empty() {
        return Err(NsiError::MissingBlock(BlockKind::Entries));
    }
    Ok(())
}

fn banner(lines: &mut Vec<String>, title: &str) {
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(BANNER.to_string());
    lines.push(format!("; {}", title));
    lines.push(String::new());
}

/// Decompiles the whole installer into a script.
pub fn decompile(installer: &Installer, options: &DecompileOptions) -> Result<Decompilation, NsiError> {
    check_input(installer)?;
    let mut d = Decompiler::new(installer, options);
    let mut lines = Vec::new();

    banner(&mut lines, "HEADER");
    lines.extend(header_lines(&mut d, installer));
    register_callbacks(&mut d, installer);

    banner(&mut lines, "PAGES");
    lines.extend(page_lines(&mut d, installer));
    d.strings.take_diagnostics();

    banner(&mut lines, "SECTIONS");
    d.run();

    banner(&mut lines, "VARIABLES");
    lines.extend(d.strings.vars.declarations());

    banner(&mut lines, "ENTRIES");
    lines.extend(d.assemble());

    log::debug!(
        "decompiled {} instructions into {} lines ({:?}, {} user variables, {} files)",
        installer.entries.len(),
        lines.len(),
        d.generation(),
        d.strings.vars.declared_count(),
        d.files.len()
    );

    Ok(Decompilation {
        lines,
        generation: d.generation(),
        files: std::mem::take(&mut d.files),
    })
}

/// The instruction listing alone, with sections, functions and labels but without the prologue.
pub fn decompile_entries(installer: &Installer, options: &DecompileOptions) -> Result<Vec<String>, NsiError> {
    check_input(installer)?;
    let mut d = Decompiler::new(installer, options);
    register_callbacks(&mut d, installer);
    page_lines(&mut d, installer);
    d.strings.take_diagnostics();
    d.run();
    Ok(d.assemble())
}

fn header_lines(d: &mut Decompiler<'_>, installer: &Installer) -> Vec<String> {
    let h = &installer.header;
    let mut out = Vec::new();

    let name = d.strings.raw(h.install_directory_auto_append);
    if !name.is_empty() {
        out.push(format!("Name {}", quote_if_needed(&name)));
        out.push(format!("OutFile {}\t\t; generated value", quote_if_needed(&format!("{}.exe", name))));
    }

    let (c1, c2, text) = (flip_rgb(h.bg_color1), flip_rgb(h.bg_color2), flip_rgb(h.bg_textcolor));
    if !(c1 == EMPTY_COLOR && c2 == EMPTY_COLOR && text == EMPTY_COLOR) {
        out.push(format!("BGGradient {:06X} {:06X} {:06X}", c1, c2, text));
    }
    let (fg, bg) = (flip_rgb(h.lb_fg), flip_rgb(h.lb_bg));
    if !(fg == EMPTY_COLOR && bg == EMPTY_COLOR) {
        out.push(format!("InstallColors {:06X} {:06X}", fg, bg));
    }

    if h.install_directory_ptr != 0 {
        out.push(format!("InstallDir {}", d.strings.s(h.install_directory_ptr)));
    }
    let reg_key = d.strings.s(h.install_reg_key_ptr);
    if !reg_key.is_empty() {
        let value = d.strings.s(h.install_reg_value_ptr);
        out.push(words(&[
            "InstallDirRegKey".to_string(),
            root_key(h.install_reg_rootkey),
            reg_key,
            value,
        ]));
    }

    if h.flags & CH_FLAGS_DETAILS_SHOWDETAILS != 0 {
        out.push("ShowInstDetails show".to_string());
    } else if h.flags & CH_FLAGS_DETAILS_NEVERSHOW != 0 {
        out.push("ShowInstDetails nevershow".to_string());
    }
    if h.flags & CH_FLAGS_SILENT != 0 {
        out.push("SilentInstall silent".to_string());
    }
    if h.flags & CH_FLAGS_AUTO_CLOSE != 0 {
        out.push("AutoCloseWindow true".to_string());
    }

    out.push(BRANDING_IMAGE.to_string());
    if installer.unicode {
        out.push("Unicode true".to_string());
    }

    for item in install_types(d, installer) {
        out.push(format!("InstType {}", item));
    }
    out
}

fn install_types(d: &mut Decompiler<'_>, installer: &Installer) -> Vec<String> {
    let h = &installer.header;
    let mut items = Vec::new();
    if let Some((&custom, named)) = h.install_types.split_last() {
        for &ptr in named.iter().filter(|&&p| p != 0) {
            let name = d.strings.s(ptr);
            if !name.is_empty() {
                items.push(name);
            }
        }
        if custom != 0 {
            let name = d.strings.raw(custom);
            if !name.is_empty() && name != DEFAULT_CUSTOM_TYPE {
                items.push(quote_if_needed(&format!("/CUSTOMSTRING={}", name)));
            }
        }
    }
    if h.flags & CH_FLAGS_NO_CUSTOM != 0 {
        items.push("/NOCUSTOM".to_string());
    }
    if h.flags & CH_FLAGS_COMP_ONLY_ON_CUSTOM != 0 {
        items.push("/COMPONENTSONLYONCUSTOM".to_string());
    }
    items
}

fn register_callbacks(d: &mut Decompiler<'_>, installer: &Installer) {
    for (name, &pos) in CALLBACK_NAMES.iter().zip(installer.header.callbacks.iter()) {
        if pos >= 0 {
            d.state.function(pos as i64, format!(".{}", name));
        }
    }
}

/// Registers a page callback at its code position; a missing one renders as `""`.
fn page_func(d: &mut Decompiler<'_>, name: &str, pos: i32) -> String {
    if pos < 0 {
        return "\"\"".to_string();
    }
    d.state.function(pos as i64, format!("{}_{:X}", name, pos))
}

fn page_lines(d: &mut Decompiler<'_>, installer: &Installer) -> Vec<String> {
    let mut out = Vec::new();
    for page in &installer.pages {
        let id = page.wndproc_id;
        let kind = if (-1..=4).contains(&id) {
            PAGE_KINDS[(id + 1) as usize]
        } else {
            PAGE_KINDS[0]
        };

        let pre_name = if page.dlg_id != 0 {
            format!("pre_page{}", id)
        } else {
            format!("create_page{}", id)
        };
        let pre = page_func(d, &pre_name, page.prefunc);
        let show = page_func(d, &format!("show_page{}", id), page.showfunc);
        let leave = page_func(d, &format!("leave_page{}", id), page.leavefunc);
        let caption = d.strings.s(page.caption);

        if page.dlg_id < 0 {
            continue;
        }
        let show = if kind == PAGE_KINDS[0] { String::new() } else { show };
        let mut line = words(&[format!("Page {}", kind), pre, show, leave]);
        if !caption.is_empty() {
            line.push_str(&format!(" ; {}", caption));
        }
        out.push(line);
        for &param in page.params.iter().filter(|&&p| p != 0) {
            out.push(format!("{}{}", INDENT, d.strings.s(param)));
        }
        out.push(String::new());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entry, PageRecord};
    use crate::tables::Opcode;

    fn installer(heap: &[u8], entries: Vec<Entry>) -> Installer {
        Installer {
            entries,
            strings: heap.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_blocks_are_fatal() {
        let opts = DecompileOptions::default();
        let inst = installer(b"", vec![Entry::new(Opcode::RET as u32, [0; 6])]);
        assert!(matches!(
            decompile(&inst, &opts),
            Err(NsiError::MissingBlock(BlockKind::Strings))
        ));
        let inst = installer(b"\0", Vec::new());
        assert!(matches!(
            decompile_entries(&inst, &opts),
            Err(NsiError::MissingBlock(BlockKind::Entries))
        ));
    }

    #[test]
    fn test_header_prologue() {
        // 1: "My App", 8: "C:\App", 15: "Full"
        let heap = b"\0My App\0C:\\App\0Full\0";
        let mut inst = installer(heap, vec![Entry::new(Opcode::RET as u32, [0; 6])]);
        inst.header.install_directory_auto_append = 1;
        inst.header.install_directory_ptr = 8;
        inst.header.flags = CH_FLAGS_DETAILS_SHOWDETAILS | CH_FLAGS_NO_CUSTOM;
        inst.header.lb_fg = 0x0000_00FF;
        inst.header.install_types[0] = 15;
        inst.header.callbacks[0] = 0;

        let out = decompile(&inst, &DecompileOptions::default()).unwrap();
        let lines = &out.lines;
        assert_eq!(lines[0], BANNER);
        assert_eq!(lines[1], "; HEADER");
        assert!(lines.contains(&"Name 'My App'".to_string()));
        assert!(lines.contains(&"OutFile 'My App.exe'\t\t; generated value".to_string()));
        assert!(lines.contains(&"InstallColors FF0000 FFFFFF".to_string()));
        assert!(lines.contains(&"InstallDir C:\\App".to_string()));
        assert!(lines.contains(&"ShowInstDetails show".to_string()));
        assert!(lines.contains(&"InstType Full".to_string()));
        assert!(lines.contains(&"InstType /NOCUSTOM".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("BGGradient")));
        assert!(lines.contains(&"Function .onInit".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some(""));
    }

    #[test]
    fn test_pages_register_callbacks() {
        let heap = b"\0Welcome\0";
        let mut inst = installer(heap, vec![Entry::new(Opcode::RET as u32, [0; 6]); 3]);
        inst.pages = vec![
            PageRecord {
                dlg_id: 1,
                wndproc_id: 1,
                prefunc: -1,
                showfunc: 1,
                leavefunc: -1,
                caption: 1,
                ..Default::default()
            },
            PageRecord {
                dlg_id: 0,
                wndproc_id: -1,
                prefunc: 2,
                showfunc: -1,
                leavefunc: -1,
                ..Default::default()
            },
            PageRecord {
                dlg_id: -1,
                wndproc_id: 3,
                prefunc: -1,
                showfunc: -1,
                leavefunc: -1,
                ..Default::default()
            },
        ];

        let out = decompile(&inst, &DecompileOptions::default()).unwrap();
        let lines = &out.lines;
        assert!(lines.contains(&"Page components \"\" show_page1_1 \"\" ; Welcome".to_string()));
        assert!(lines.contains(&"Page custom create_page-1_2 \"\"".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("Page instfiles")));
        assert!(lines.contains(&"Function show_page1_1".to_string()));
        assert!(lines.contains(&"Function create_page-1_2".to_string()));
    }

    #[test]
    fn test_to_script_joins_lines() {
        let d = Decompilation {
            lines: vec!["a".to_string(), "b".to_string()],
            files: Vec::new(),
            generation: Generation::V2,
        };
        assert_eq!(d.to_script(), "a\nb");
    }
}
