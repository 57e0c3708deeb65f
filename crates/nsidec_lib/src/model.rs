//! Input model: the decompressed header block of an installer.
//!
//! Locating the header inside the executable and decompressing it is the job of the
//! container reader; this module only splits an already-decompressed block into the
//! records the decompiler works on.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::NsiError;

pub const BLOCK_COUNT: usize = 8;
pub const MAX_INST_TYPES: usize = 32;
pub const CALLBACK_COUNT: usize = 10;

pub const ENTRY_SIZE: usize = 28;
pub const PAGE_SIZE: usize = 64;
pub const SECTION_FIXED_SIZE: usize = 24;
pub const SECTION_NAME_UNITS: usize = 1024;

/// Names of the header callback slots, in header order.
pub const CALLBACK_NAMES: [&str; CALLBACK_COUNT] = [
    "onInit",
    "onInstSuccess",
    "onInstFailed",
    "onUserAbort",
    "onGUIInit",
    "onGUIEnd",
    "onMouseOverSection",
    "onVerifyInstDir",
    "onSelChange",
    "onRebootFailed",
];

pub const CH_FLAGS_DETAILS_SHOWDETAILS: i32 = 0x0001;
pub const CH_FLAGS_DETAILS_NEVERSHOW: i32 = 0x0002;
pub const CH_FLAGS_SILENT: i32 = 0x0008;
pub const CH_FLAGS_AUTO_CLOSE: i32 = 0x0020;
pub const CH_FLAGS_COMP_ONLY_ON_CUSTOM: i32 = 0x0100;
pub const CH_FLAGS_NO_CUSTOM: i32 = 0x0200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    Pages = 0,
    Sections = 1,
    Entries = 2,
    Strings = 3,
    LangTables = 4,
    CtlColors = 5,
    BgFont = 6,
    Data = 7,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub offset: u32,
    pub num: u32,
}

/// Character width of the string heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Width {
    Auto,
    Narrow,
    Wide,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub flags: i32,
    pub blocks: [BlockHeader; BLOCK_COUNT],
    pub install_reg_rootkey: i32,
    pub install_reg_key_ptr: i32,
    pub install_reg_value_ptr: i32,
    pub bg_color1: i32,
    pub bg_color2: i32,
    pub bg_textcolor: i32,
    pub lb_bg: i32,
    pub lb_fg: i32,
    pub langtable_size: i32,
    pub license_bg: i32,
    /// Code positions of the installer-wide callbacks, `-1` when unset.
    pub callbacks: [i32; CALLBACK_COUNT],
    /// Install type name refs; the last slot is the custom type's name.
    pub install_types: Vec<i32>,
    pub install_directory_ptr: i32,
    pub install_directory_auto_append: i32,
    pub str_uninstchild: i32,
    pub str_uninstcmd: i32,
    pub str_wininit: i32,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            flags: 0,
            blocks: [BlockHeader::default(); BLOCK_COUNT],
            install_reg_rootkey: 0,
            install_reg_key_ptr: 0,
            install_reg_value_ptr: 0,
            bg_color1: -1,
            bg_color2: -1,
            bg_textcolor: -1,
            lb_bg: -1,
            lb_fg: -1,
            langtable_size: 0,
            license_bg: -1,
            callbacks: [-1; CALLBACK_COUNT],
            install_types: vec![0; MAX_INST_TYPES + 1],
            install_directory_ptr: 0,
            install_directory_auto_append: 0,
            str_uninstchild: 0,
            str_uninstcmd: 0,
            str_wininit: 0,
        }
    }
}

impl Header {
    pub fn block(&self, kind: BlockKind) -> BlockHeader {
        self.blocks[kind as usize]
    }

    /// Byte range of a block inside the header block: from its offset up to the next
    /// block that starts after it, or to `total` for the last one.
    pub fn block_range(&self, kind: BlockKind, total: usize) -> Option<std::ops::Range<usize>> {
        let start = self.block(kind).offset as usize;
        if start == 0 || start > total {
            return None;
        }
        let end = self
            .blocks
            .iter()
            .map(|b| b.offset as usize)
            .filter(|&o| o > start)
            .min()
            .unwrap_or(total)
            .min(total);
        Some(start..end)
    }
}

/// One instruction: an opcode and six operands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub which: u32,
    pub offsets: [i32; 6],
}

impl Entry {
    pub fn new(which: u32, offsets: [i32; 6]) -> Self {
        Self { which, offsets }
    }
}

pub const SF_SELECTED: i32 = 0x0001;
pub const SF_SECGRP: i32 = 0x0002;
pub const SF_SECGRPEND: i32 = 0x0004;
pub const SF_BOLD: i32 = 0x0008;
pub const SF_RO: i32 = 0x0010;
pub const SF_EXPAND: i32 = 0x0020;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub name_ptr: i32,
    pub install_types: i32,
    pub flags: i32,
    /// Position of the first instruction of the section body.
    pub code: i32,
    /// Instructions in the body, not counting the trailing return.
    pub code_size: i32,
    pub size_kb: i32,
}

impl SectionRecord {
    pub fn is_group_start(&self) -> bool {
        self.flags & SF_SECGRP != 0
    }

    pub fn is_group_end(&self) -> bool {
        self.flags & SF_SECGRPEND != 0
    }

    pub fn is_group(&self) -> bool {
        self.flags & (SF_SECGRP | SF_SECGRPEND) != 0
    }

    pub fn code_end(&self) -> i32 {
        self.code.saturating_add(self.code_size)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub dlg_id: i32,
    pub wndproc_id: i32,
    pub prefunc: i32,
    pub showfunc: i32,
    pub leavefunc: i32,
    pub flags: i32,
    pub caption: i32,
    pub back: i32,
    pub next: i32,
    pub clicknext: i32,
    pub cancel: i32,
    pub params: [i32; 5],
}

/// Everything the decompiler reads. Built by [`Installer::parse`] or by hand.
#[derive(Debug, Clone, Default)]
pub struct Installer {
    pub header: Header,
    pub entries: Vec<Entry>,
    pub sections: Vec<SectionRecord>,
    pub pages: Vec<PageRecord>,
    pub strings: Vec<u8>,
    pub langtables: Vec<u8>,
    pub unicode: bool,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn get_u32(&mut self) -> Result<u32, NsiError> {
        if self.remaining() < 4 {
            return Err(NsiError::Eof);
        }
        let v = LittleEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    fn get_i32(&mut self) -> Result<i32, NsiError> {
        Ok(self.get_u32()? as i32)
    }

    fn get_i32_array<const N: usize>(&mut self) -> Result<[i32; N], NsiError> {
        let mut out = [0i32; N];
        for v in out.iter_mut() {
            *v = self.get_i32()?;
        }
        Ok(out)
    }
}

fn read_header(r: &mut Reader<'_>) -> Result<Header, NsiError> {
    let flags = r.get_i32()?;
    let mut blocks = [BlockHeader::default(); BLOCK_COUNT];
    for b in blocks.iter_mut() {
        b.offset = r.get_u32()?;
        b.num = r.get_u32()?;
    }
    let install_reg_rootkey = r.get_i32()?;
    let install_reg_key_ptr = r.get_i32()?;
    let install_reg_value_ptr = r.get_i32()?;
    let bg_color1 = r.get_i32()?;
    let bg_color2 = r.get_i32()?;
    let bg_textcolor = r.get_i32()?;
    let lb_bg = r.get_i32()?;
    let lb_fg = r.get_i32()?;
    let langtable_size = r.get_i32()?;
    let license_bg = r.get_i32()?;
    let callbacks = r.get_i32_array::<CALLBACK_COUNT>()?;
    let install_types = r.get_i32_array::<{ MAX_INST_TYPES + 1 }>()?.to_vec();
    let install_directory_ptr = r.get_i32()?;
    let install_directory_auto_append = r.get_i32()?;
    let str_uninstchild = r.get_i32()?;
    let str_uninstcmd = r.get_i32()?;
    let str_wininit = r.get_i32()?;

    Ok(Header {
        flags,
        blocks,
        install_reg_rootkey,
        install_reg_key_ptr,
        install_reg_value_ptr,
        bg_color1,
        bg_color2,
        bg_textcolor,
        lb_bg,
        lb_fg,
        langtable_size,
        license_bg,
        callbacks,
        install_types,
        install_directory_ptr,
        install_directory_auto_append,
        str_uninstchild,
        str_uninstcmd,
        str_wininit,
    })
}

/// Record counts come from the header; never reserve more than the buffer can hold.
fn capacity(buf: &[u8], start: usize, num: usize, stride: usize) -> usize {
    num.min(buf.len().saturating_sub(start) / stride.max(1))
}

fn check_count(kind: BlockKind, num: usize, stride: usize, len: usize) -> Result<(), NsiError> {
    if num.saturating_mul(stride) > len {
        return Err(NsiError::InvalidBlockTable(format!(
            "{} {:?} records of {} bytes do not fit in {} bytes",
            num, kind, stride, len
        )));
    }
    Ok(())
}

fn read_entries(buf: &[u8], start: usize, num: usize) -> Result<Vec<Entry>, NsiError> {
    let mut r = Reader::at(buf, start);
    let mut out = Vec::with_capacity(capacity(buf, start, num, ENTRY_SIZE));
    for _ in 0..num {
        let which = r.get_u32()?;
        let offsets = r.get_i32_array::<6>()?;
        out.push(Entry { which, offsets });
    }
    Ok(out)
}

fn read_sections(buf: &[u8], start: usize, num: usize, stride: usize) -> Result<Vec<SectionRecord>, NsiError> {
    let mut out = Vec::with_capacity(capacity(buf, start, num, stride));
    for i in 0..num {
        let mut r = Reader::at(buf, start + i * stride);
        let [name_ptr, install_types, flags, code, code_size, size_kb] = r.get_i32_array::<6>()?;
        out.push(SectionRecord {
            name_ptr,
            install_types,
            flags,
            code,
            code_size,
            size_kb,
        });
    }
    Ok(out)
}

fn read_pages(buf: &[u8], start: usize, num: usize) -> Result<Vec<PageRecord>, NsiError> {
    let mut r = Reader::at(buf, start);
    let mut out = Vec::with_capacity(capacity(buf, start, num, PAGE_SIZE));
    for _ in 0..num {
        let [dlg_id, wndproc_id, prefunc, showfunc, leavefunc, flags, caption, back, next, clicknext, cancel] =
            r.get_i32_array::<11>()?;
        let params = r.get_i32_array::<5>()?;
        out.push(PageRecord {
            dlg_id,
            wndproc_id,
            prefunc,
            showfunc,
            leavefunc,
            flags,
            caption,
            back,
            next,
            clicknext,
            cancel,
            params,
        });
    }
    Ok(out)
}

/// Section records carry a fixed-size name buffer whose width follows the string width,
/// so the record stride tells narrow and wide installers apart.
fn section_stride(header: &Header, total: usize) -> Option<usize> {
    let num = header.block(BlockKind::Sections).num as usize;
    let range = header.block_range(BlockKind::Sections, total)?;
    if num == 0 {
        return None;
    }
    Some(range.len() / num)
}

impl Installer {
    pub fn parse(block: &[u8], width: Width) -> Result<Installer, NsiError> {
        let mut r = Reader::new(block);
        let header = read_header(&mut r)?;
        let total = block.len();

        let strings_range = header
            .block_range(BlockKind::Strings, total)
            .ok_or(NsiError::MissingBlock(BlockKind::Strings))?;
        let entries_range = header
            .block_range(BlockKind::Entries, total)
            .ok_or(NsiError::MissingBlock(BlockKind::Entries))?;

        let unicode = match width {
            Width::Narrow => false,
            Width::Wide => true,
            Width::Auto => section_stride(&header, total) == Some(SECTION_FIXED_SIZE + 2 * SECTION_NAME_UNITS),
        };

        let entry_count = header.block(BlockKind::Entries).num as usize;
        check_count(BlockKind::Entries, entry_count, ENTRY_SIZE, entries_range.len())?;
        let entries = read_entries(block, entries_range.start, entry_count)?;

        let sections = match header.block_range(BlockKind::Sections, total) {
            Some(range) => {
                let num = header.block(BlockKind::Sections).num as usize;
                let unit = if unicode { 2 } else { 1 };
                let stride = section_stride(&header, total)
                    .filter(|&s| s >= SECTION_FIXED_SIZE)
                    .unwrap_or(SECTION_FIXED_SIZE + unit * SECTION_NAME_UNITS);
                check_count(BlockKind::Sections, num, stride, range.len())?;
                read_sections(block, range.start, num, stride)?
            }
            None => Vec::new(),
        };

        let pages = match header.block_range(BlockKind::Pages, total) {
            Some(range) => {
                let num = header.block(BlockKind::Pages).num as usize;
                check_count(BlockKind::Pages, num, PAGE_SIZE, range.len())?;
                read_pages(block, range.start, num)?
            }
            None => Vec::new(),
        };

        let langtables = header
            .block_range(BlockKind::LangTables, total)
            .map(|range| block[range].to_vec())
            .unwrap_or_default();

        log::debug!(
            "header block: {} entries, {} sections, {} pages, {} string bytes, unicode={}",
            entries.len(),
            sections.len(),
            pages.len(),
            strings_range.len(),
            unicode
        );

        Ok(Installer {
            header,
            entries,
            sections,
            pages,
            strings: block[strings_range].to_vec(),
            langtables,
            unicode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER_SIZE: usize = 300;

    fn put(buf: &mut Vec<u8>, v: i32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Lays out a header followed by pages, sections, entries, strings and langtables.
    fn build_block(unicode: bool) -> Vec<u8> {
        let unit = if unicode { 2 } else { 1 };
        let section_stride = SECTION_FIXED_SIZE + unit * SECTION_NAME_UNITS;
        let pages_off = HEADER_SIZE;
        let sections_off = pages_off + PAGE_SIZE;
        let entries_off = sections_off + section_stride;
        let strings_off = entries_off + 2 * ENTRY_SIZE;
        let strings: Vec<u8> = if unicode {
            "\0Demo\0".encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
        } else {
            b"\0Demo\0".to_vec()
        };
        let lang_off = strings_off + strings.len();
        let ctl_off = lang_off + 14;

        let mut b = Vec::new();
        put(&mut b, CH_FLAGS_SILENT);
        let blocks = [
            (pages_off, 1),
            (sections_off, 1),
            (entries_off, 2),
            (strings_off, 0),
            (lang_off, 0),
            (ctl_off, 0),
            (0, 0),
            (0, 0),
        ];
        for (off, num) in blocks {
            put(&mut b, off as i32);
            put(&mut b, num);
        }
        for _ in 0..(HEADER_SIZE - b.len()) / 4 {
            put(&mut b, -1);
        }
        assert_eq!(b.len(), HEADER_SIZE);

        // page
        for v in [105, 1, -1, -1, -1, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0] {
            put(&mut b, v);
        }
        // section
        for v in [1, 0, SF_SELECTED, 0, 1, 4] {
            put(&mut b, v);
        }
        b.resize(entries_off, 0);
        // entries
        for v in [25, 10, 1, 0, 0, 0, 0] {
            put(&mut b, v);
        }
        for v in [1, 0, 0, 0, 0, 0, 0] {
            put(&mut b, v);
        }
        b.extend_from_slice(&strings);
        b.extend_from_slice(&[0u8; 14]);
        b
    }

    #[test]
    fn parses_blocks_and_records() {
        let block = build_block(false);
        let inst = Installer::parse(&block, Width::Auto).unwrap();
        assert!(!inst.unicode);
        assert_eq!(inst.header.flags, CH_FLAGS_SILENT);
        assert_eq!(inst.entries.len(), 2);
        assert_eq!(inst.entries[0], Entry::new(25, [10, 1, 0, 0, 0, 0]));
        assert_eq!(inst.sections.len(), 1);
        assert_eq!(inst.sections[0].code_size, 1);
        assert_eq!(inst.pages.len(), 1);
        assert_eq!(inst.pages[0].dlg_id, 105);
        assert_eq!(inst.strings, b"\0Demo\0");
        assert_eq!(inst.langtables.len(), 14);
    }

    #[test]
    fn infers_wide_strings_from_section_stride() {
        let block = build_block(true);
        let inst = Installer::parse(&block, Width::Auto).unwrap();
        assert!(inst.unicode);
        assert_eq!(inst.sections[0].size_kb, 4);
    }

    #[test]
    fn missing_strings_block_is_fatal() {
        let mut block = build_block(false);
        // zero the STRINGS block offset
        let at = 4 + BlockKind::Strings as usize * 8;
        block[at..at + 4].copy_from_slice(&0i32.to_le_bytes());
        let err = Installer::parse(&block, Width::Narrow).unwrap_err();
        assert!(matches!(err, NsiError::MissingBlock(BlockKind::Strings)));
    }

    #[test]
    fn truncated_header_is_eof() {
        let err = Installer::parse(&[0u8; 40], Width::Narrow).unwrap_err();
        assert!(matches!(err, NsiError::Eof));
    }

    #[test]
    fn oversized_record_counts_are_rejected() {
        let mut block = build_block(false);
        let at = 4 + BlockKind::Sections as usize * 8 + 4;
        block[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = Installer::parse(&block, Width::Narrow).unwrap_err();
        assert!(matches!(err, NsiError::InvalidBlockTable(_)));

        let mut block = build_block(false);
        let at = 4 + BlockKind::Pages as usize * 8 + 4;
        block[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = Installer::parse(&block, Width::Narrow).unwrap_err();
        assert!(matches!(err, NsiError::InvalidBlockTable(_)));
    }

    #[test]
    fn record_readers_stop_at_the_buffer_end() {
        let err = read_sections(&[0u8; 24], 0, u32::MAX as usize, 24).unwrap_err();
        assert!(matches!(err, NsiError::Eof));
        let err = read_pages(&[0u8; 64], 0, u32::MAX as usize).unwrap_err();
        assert!(matches!(err, NsiError::Eof));
        let err = read_entries(&[0u8; 28], 0, u32::MAX as usize).unwrap_err();
        assert!(matches!(err, NsiError::Eof));
    }
}
