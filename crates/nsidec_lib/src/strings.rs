//! String heap decoding, variable naming and literal quoting.

use std::collections::HashSet;

use byteorder::{ByteOrder, LittleEndian};

use crate::tables::SHELL_FOLDERS;
use crate::{Generation, NsiError};

pub const MAX_STRING_DEPTH: usize = 64;

/// Built-in variable slots `0..31`.
pub const BUILTIN_VARS: [&str; 31] = [
    "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", //
    "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9", //
    "CMDLINE", "INSTDIR", "OUTDIR", "EXEDIR", "LANGUAGE", "TEMP", "PLUGINSDIR", "EXEPATH", "EXEFILE",
    "HWNDPARENT", "_CLICK",
];

/// Where the v3 layout keeps the `CommonFilesDir` registry value name.
const GENERATION_MARKER_OFFSET: usize = 0x11;
const GENERATION_MARKER: &str = "CommonFilesDir";

/// Offset of the first string slot inside a language table: language id (2), dialog offset (4)
/// and right-to-left flag (4).
const LANGTABLE_STRINGS_AT: i64 = 10;

const CURRENT_VERSION_ANNOTATION: &str = "!!<- HKLM\\Software\\Microsoft\\Windows\\CurrentVersion\\[This]!!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ControlCodes {
    generation: Generation,
    skip: u16,
    var: u16,
    shell: u16,
    lang: u16,
}

impl ControlCodes {
    fn for_generation(generation: Generation) -> Self {
        match generation {
            Generation::V3 => Self {
                generation,
                lang: 1,
                shell: 2,
                var: 3,
                skip: 4,
            },
            _ => Self {
                generation: Generation::V2,
                skip: 252,
                var: 253,
                shell: 254,
                lang: 255,
            },
        }
    }

    fn is_literal(&self, unit: u16) -> bool {
        match self.generation {
            Generation::V3 => unit > self.skip,
            _ => unit < self.skip,
        }
    }
}

/// Names of variable slots, declaring synthesized ones in order of first use.
#[derive(Debug, Clone, Default)]
pub struct UserVars {
    declared: Vec<u32>,
    seen: HashSet<u32>,
}

impl UserVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// `$`-prefixed name of a non-negative slot.
    pub fn name(&mut self, slot: u32) -> String {
        if let Some(b) = BUILTIN_VARS.get(slot as usize) {
            return format!("${}", b);
        }
        let n = slot - BUILTIN_VARS.len() as u32;
        if self.seen.insert(n) {
            self.declared.push(n);
        }
        format!("$_{}_", n)
    }

    /// `Var` lines for every synthesized name, in order of first use.
    pub fn declarations(&self) -> Vec<String> {
        self.declared.iter().map(|n| format!("Var _{}_", n)).collect()
    }

    pub fn declared_count(&self) -> usize {
        self.declared.len()
    }
}

/// Decodes references into the string heap.
#[derive(Debug, Clone)]
pub struct StringDecoder<'a> {
    heap: &'a [u8],
    langtable: &'a [u8],
    wide: bool,
    codes: ControlCodes,
}

impl<'a> StringDecoder<'a> {
    /// `Generation::Auto` is resolved against the heap contents.
    pub fn new(heap: &'a [u8], langtable: &'a [u8], wide: bool, generation: Generation) -> Self {
        let generation = match generation {
            Generation::Auto => detect_generation(heap, wide),
            g => g,
        };
        Self {
            heap,
            langtable,
            wide,
            codes: ControlCodes::for_generation(generation),
        }
    }

    pub fn generation(&self) -> Generation {
        self.codes.generation
    }

    fn unit_size(&self) -> usize {
        if self.wide { 2 } else { 1 }
    }

    fn unit(&self, index: usize) -> Option<u16> {
        let at = index.checked_mul(self.unit_size())?;
        if self.wide {
            let bytes = self.heap.get(at..at + 2)?;
            Some(LittleEndian::read_u16(bytes))
        } else {
            self.heap.get(at).map(|&b| b as u16)
        }
    }

    /// Heap offset stored in the language table for a negative reference.
    fn lang_offset(&self, reference: i32) -> Result<i32, NsiError> {
        let at = LANGTABLE_STRINGS_AT + 4 * (-(reference as i64) - 1);
        let start = usize::try_from(at).map_err(|_| NsiError::InvalidLangString(reference))?;
        let bytes = self
            .langtable
            .get(start..start + 4)
            .ok_or(NsiError::InvalidLangString(reference))?;
        Ok(LittleEndian::read_i32(bytes))
    }

    /// Printable, escaped text of a string reference.
    pub fn decode(&self, reference: i32, vars: &mut UserVars) -> Result<String, NsiError> {
        self.decode_at(reference, vars, 0)
    }

    fn decode_at(&self, reference: i32, vars: &mut UserVars, depth: usize) -> Result<String, NsiError> {
        if depth >= MAX_STRING_DEPTH {
            return Err(NsiError::StringRecursionLimit {
                reference,
                limit: MAX_STRING_DEPTH,
            });
        }
        let offset = if reference < 0 {
            let o = self.lang_offset(reference)?;
            if o < 0 {
                return Err(NsiError::InvalidLangString(reference));
            }
            o
        } else {
            reference
        } as usize;

        let corrupt = NsiError::CorruptString { offset };
        let mut out = String::new();
        let mut pending: Vec<u16> = Vec::new();
        let mut pos = offset;
        loop {
            let unit = self.unit(pos).ok_or(NsiError::CorruptString { offset })?;
            if unit == 0 {
                break;
            }
            if self.codes.is_literal(unit) {
                pending.push(unit);
                pos += 1;
                continue;
            }
            self.flush_literals(&mut pending, &mut out);

            // wide heaps pack both parameter bytes into one unit
            let (a, b, next) = if self.wide {
                let p = self.unit(pos + 1).ok_or(NsiError::CorruptString { offset })?;
                ((p & 0xFF) as u8, (p >> 8) as u8, pos + 2)
            } else {
                let a = self.unit(pos + 1).ok_or(NsiError::CorruptString { offset })?;
                let b = self.unit(pos + 2).ok_or(NsiError::CorruptString { offset })?;
                (a as u8, b as u8, pos + 3)
            };

            if unit == self.codes.skip {
                let lit = self.unit(pos + 1).ok_or(NsiError::CorruptString { offset })?;
                pending.push(lit);
                pos += 2;
                continue;
            }

            if unit == self.codes.var {
                out.push_str(&vars.name(packed_index(a, b)));
            } else if unit == self.codes.shell {
                out.push('$');
                out.push_str(&self.shell_folder(a, b, vars, depth)?);
            } else if unit == self.codes.lang {
                let n = packed_index(a, b) as i32;
                out.push_str(&self.decode_at(-n - 1, vars, depth + 1)?);
            } else {
                return Err(corrupt);
            }
            pos = next;
        }
        self.flush_literals(&mut pending, &mut out);
        Ok(out)
    }

    fn flush_literals(&self, pending: &mut Vec<u16>, out: &mut String) {
        if pending.is_empty() {
            return;
        }
        if self.wide {
            for c in char::decode_utf16(pending.iter().copied()).flatten() {
                push_escaped(c, out);
            }
        } else {
            for &u in pending.iter() {
                push_escaped(char::from(u as u8), out);
            }
        }
        pending.clear();
    }

    fn shell_folder(&self, cur: u8, all: u8, vars: &mut UserVars, depth: usize) -> Result<String, NsiError> {
        if cur & 0x80 != 0 {
            let value = self.decode_at((cur & 0x3F) as i32, vars, depth + 1)?;
            let mut name = match value.as_str() {
                "ProgramFilesDir" => "PROGRAMFILES".to_string(),
                "CommonFilesDir" => "COMMONFILES".to_string(),
                _ => format!("{}{}", value, CURRENT_VERSION_ANNOTATION),
            };
            if cur & 0x40 != 0 {
                name.push_str("64");
            }
            return Ok(name);
        }
        Ok(shell_folder_name(all)
            .or_else(|| shell_folder_name(cur))
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unknown_CSIDL_{:X}_or_{:X}", all, cur)))
    }

    /// Unprocessed text at a unit offset, control codes included.
    pub fn raw_text(&self, offset: usize) -> Option<String> {
        let mut units = Vec::new();
        let mut pos = offset;
        loop {
            let u = self.unit(pos)?;
            if u == 0 {
                break;
            }
            units.push(u);
            pos += 1;
        }
        Some(String::from_utf16_lossy(&units))
    }

    /// Hex dump of the heap bytes of a string, up to its terminator.
    pub fn raw_hex(&self, offset: i32) -> Result<String, NsiError> {
        let start = usize::try_from(offset).map_err(|_| NsiError::CorruptString { offset: 0 })?;
        let mut out = String::new();
        let mut pos = start;
        loop {
            let u = self.unit(pos).ok_or(NsiError::CorruptString { offset: start })?;
            if u == 0 {
                break;
            }
            if self.wide {
                out.push_str(&format!("{:02X}{:02X}", u & 0xFF, u >> 8));
            } else {
                out.push_str(&format!("{:02X}", u));
            }
            pos += 1;
        }
        Ok(out)
    }
}

fn packed_index(a: u8, b: u8) -> u32 {
    (((b & 0x7F) as u32) << 7) | (a & 0x7F) as u32
}

fn shell_folder_name(id: u8) -> Option<&'static str> {
    SHELL_FOLDERS
        .binary_search_by_key(&id, |(k, _)| *k)
        .ok()
        .map(|i| SHELL_FOLDERS[i].1)
}

/// v3 heaps keep `CommonFilesDir` at unit offset `0x11`.
pub fn detect_generation(heap: &[u8], wide: bool) -> Generation {
    let decoder = StringDecoder {
        heap,
        langtable: &[],
        wide,
        codes: ControlCodes::for_generation(Generation::V2),
    };
    match decoder.raw_text(GENERATION_MARKER_OFFSET) {
        Some(s) if s == GENERATION_MARKER => Generation::V3,
        _ => Generation::V2,
    }
}

fn push_escaped(c: char, out: &mut String) {
    match c {
        '$' => out.push_str("$$"),
        '\n' => out.push_str("$\\n"),
        '\r' => out.push_str("$\\r"),
        '\t' => out.push_str("$\\t"),
        c if c.is_control() => {}
        c => out.push(c),
    }
}

/// Wraps a literal in the quote style that conflicts least with its contents.
pub fn quote(s: &str) -> String {
    let single = s.contains('\'');
    let back = s.contains('`');
    let double = s.contains('"');
    if single && back && double {
        format!("\"{}\"", s.replace('"', "$\\\""))
    } else if single && double {
        format!("`{}`", s)
    } else if single {
        format!("\"{}\"", s)
    } else {
        format!("'{}'", s)
    }
}

pub fn quote_if_needed(s: &str) -> String {
    if s.contains(' ') || s.contains('#') || s.contains(';') || s.to_lowercase().contains("section") {
        quote(s)
    } else {
        s.to_string()
    }
}

/// Parses script integer text: decimal with optional sign, or `0x` hex.
pub fn parse_int(s: &str) -> Result<i64, NsiError> {
    let t = s.trim();
    let (neg, body) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let v = match body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => body.parse::<i64>(),
    }
    .map_err(|_| NsiError::InvalidInteger(s.to_string()))?;
    Ok(if neg { -v } else { v })
}

/// Decoder plus variable registry, with per-literal failures downgraded to empty text.
///
/// Every downgrade leaves a diagnostic that the caller attaches to the instruction's comment.
pub struct StringTable<'a> {
    decoder: StringDecoder<'a>,
    pub vars: UserVars,
    diagnostics: Vec<String>,
}

impl<'a> StringTable<'a> {
    pub fn new(decoder: StringDecoder<'a>) -> Self {
        Self {
            decoder,
            vars: UserVars::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.decoder.generation()
    }

    pub fn try_raw(&mut self, reference: i32) -> Result<String, NsiError> {
        self.decoder.decode(reference, &mut self.vars)
    }

    /// Unquoted text; empty if the literal cannot be decoded.
    pub fn raw(&mut self, reference: i32) -> String {
        match self.decoder.decode(reference, &mut self.vars) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("string {}: {}", reference, e);
                self.diagnostics.push(e.to_string());
                String::new()
            }
        }
    }

    /// Text quoted when the script syntax needs it.
    pub fn s(&mut self, reference: i32) -> String {
        quote_if_needed(&self.raw(reference))
    }

    /// Like [`StringTable::s`], but an empty literal renders as `""`.
    pub fn sq(&mut self, reference: i32) -> String {
        let s = self.s(reference);
        if s.is_empty() { "\"\"".to_string() } else { s }
    }

    /// Variable named by a slot operand; negative slots are strings.
    pub fn var(&mut self, slot: i32) -> String {
        if slot < 0 {
            self.raw(slot)
        } else {
            self.vars.name(slot as u32)
        }
    }

    /// Integer value of a literal. Reference `0` is the empty string and counts as zero.
    pub fn int(&mut self, reference: i32) -> Result<i64, NsiError> {
        let s = self.try_raw(reference)?;
        match parse_int(&s) {
            Ok(v) => Ok(v),
            Err(_) if reference == 0 || s.is_empty() => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn raw_hex(&mut self, reference: i32) -> String {
        match self.decoder.raw_hex(reference) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("binary value {}: {}", reference, e);
                self.diagnostics.push(e.to_string());
                String::new()
            }
        }
    }

    pub fn take_diagnostics(&mut self) -> Vec<String> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v2_var(slot: u32) -> [u8; 3] {
        [253, (slot & 0x7F) as u8 | 0x80, (slot >> 7) as u8 | 0x80]
    }

    fn narrow(heap: &[u8]) -> StringDecoder<'_> {
        StringDecoder::new(heap, &[], false, Generation::V2)
    }

    #[test]
    fn test_escapes_literals() {
        let heap = b"\0a$b\nc\td\re\x07f\0";
        let mut vars = UserVars::new();
        let s = narrow(heap).decode(1, &mut vars).unwrap();
        assert_eq!(s, "a$$b$\\nc$\\td$\\ref");
    }

    #[test]
    fn test_builtin_and_user_vars() {
        let mut heap = vec![0u8];
        heap.extend_from_slice(&v2_var(10));
        heap.push(0);
        heap.extend_from_slice(&v2_var(40));
        heap.push(0);
        let d = narrow(&heap);
        let mut vars = UserVars::new();
        assert_eq!(d.decode(1, &mut vars).unwrap(), "$R0");
        assert_eq!(d.decode(5, &mut vars).unwrap(), "$_9_");
        assert_eq!(d.decode(5, &mut vars).unwrap(), "$_9_");
        assert_eq!(vars.declarations(), vec!["Var _9_".to_string()]);
    }

    #[test]
    fn test_v3_codes_and_detection() {
        // v3 var code 3, slot 21 (INSTDIR)
        let mut heap = vec![0u8, b'x', 3, 21 | 0x80, 0x80, 0];
        heap.resize(GENERATION_MARKER_OFFSET, b'.');
        heap.extend_from_slice(GENERATION_MARKER.as_bytes());
        heap.push(0);
        assert_eq!(detect_generation(&heap, false), Generation::V3);
        let d = StringDecoder::new(&heap, &[], false, Generation::Auto);
        assert_eq!(d.generation(), Generation::V3);
        let mut vars = UserVars::new();
        assert_eq!(d.decode(1, &mut vars).unwrap(), "x$INSTDIR");
        assert_eq!(detect_generation(b"\0plain\0", false), Generation::V2);
    }

    #[test]
    fn test_skip_code_keeps_next_unit() {
        // 0xFC escapes a literal 0xFD
        let heap = [0u8, 252, 253, b'!', 0];
        let mut vars = UserVars::new();
        assert_eq!(narrow(&heap).decode(1, &mut vars).unwrap(), "\u{fd}!");
    }

    #[test]
    fn test_shell_folders() {
        let heap = [0u8, 254, 0x26, 0x26, b'\\', b'a', 0, 254, 0x99, 0x99, 0];
        let mut vars = UserVars::new();
        let d = narrow(&heap);
        assert_eq!(d.decode(1, &mut vars).unwrap(), "$PROGRAMFILES\\a");
        assert_eq!(d.decode(7, &mut vars).unwrap(), "$Unknown_CSIDL_99_or_99");
    }

    #[test]
    fn test_shell_registry_value() {
        // 0x80 | 3 points at "ProgramFilesDir"; 0x40 adds the 64-bit suffix
        let mut heap = vec![0u8, 0];
        heap.push(0);
        heap.extend_from_slice(b"ProgramFilesDir\0");
        let at = heap.len();
        heap.extend_from_slice(&[254, 0x80 | 0x40 | 3, 0, 0]);
        let mut vars = UserVars::new();
        assert_eq!(narrow(&heap).decode(at as i32, &mut vars).unwrap(), "$PROGRAMFILES64");
    }

    #[test]
    fn test_language_strings() {
        let heap = b"\0hello\0";
        let mut lang = vec![0u8; 10];
        lang.extend_from_slice(&1i32.to_le_bytes());
        let d = StringDecoder::new(heap, &lang, false, Generation::V2);
        let mut vars = UserVars::new();
        assert_eq!(d.decode(-1, &mut vars).unwrap(), "hello");
        assert!(matches!(d.decode(-2, &mut vars), Err(NsiError::InvalidLangString(-2))));
    }

    #[test]
    fn test_self_referencing_language_string_hits_limit() {
        let heap = [0u8, 255, 0x80, 0x80, 0];
        let mut lang = vec![0u8; 10];
        lang.extend_from_slice(&1i32.to_le_bytes());
        let d = StringDecoder::new(&heap, &lang, false, Generation::V2);
        let err = d.decode(1, &mut UserVars::new()).unwrap_err();
        assert!(matches!(err, NsiError::StringRecursionLimit { limit: MAX_STRING_DEPTH, .. }));
    }

    #[test]
    fn test_missing_terminator_is_corrupt() {
        let err = narrow(b"\0abc").decode(1, &mut UserVars::new()).unwrap_err();
        assert!(matches!(err, NsiError::CorruptString { offset: 1 }));
    }

    #[test]
    fn test_wide_units() {
        let text: Vec<u16> = "\0\u{e9}t\u{e9} \u{1F600}".encode_utf16().chain([0xFD, 0x0A | 0x80 | (0x80 << 8), 0]).collect();
        let heap: Vec<u8> = text.iter().flat_map(|u| u.to_le_bytes()).collect();
        let d = StringDecoder::new(&heap, &[], true, Generation::V2);
        let mut vars = UserVars::new();
        assert_eq!(d.decode(1, &mut vars).unwrap(), "\u{e9}t\u{e9} \u{1F600}$R0");
    }

    #[test]
    fn test_decoding_is_idempotent() {
        let mut heap = vec![0u8, b'$'];
        heap.extend_from_slice(&v2_var(33));
        heap.push(0);
        let d = narrow(&heap);
        let mut vars = UserVars::new();
        let first = d.decode(1, &mut vars).unwrap();
        let second = d.decode(1, &mut vars).unwrap();
        assert_eq!(first, second);
        assert_eq!(vars.declared_count(), 1);
    }

    #[test]
    fn test_quote_styles() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), "\"it's\"");
        assert_eq!(quote("it's \"x\""), "`it's \"x\"`");
        assert_eq!(quote("'`\""), "\"'`$\\\"\"");
        assert_eq!(quote_if_needed("plain"), "plain");
        assert_eq!(quote_if_needed("a#b"), "'a#b'");
        assert_eq!(quote_if_needed("MySection"), "'MySection'");
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42").unwrap(), 42);
        assert_eq!(parse_int("-7").unwrap(), -7);
        assert_eq!(parse_int("0x1F").unwrap(), 31);
        assert!(parse_int("abc").is_err());
    }

    #[test]
    fn test_table_downgrades_failures() {
        let mut t = StringTable::new(narrow(b"\0abc"));
        assert_eq!(t.s(1), "");
        assert_eq!(t.sq(1), "\"\"");
        assert_eq!(t.take_diagnostics().len(), 2);
        assert!(t.take_diagnostics().is_empty());
    }
}
