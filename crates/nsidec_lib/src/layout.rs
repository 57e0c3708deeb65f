//! Section boundaries, the per-position working state and the listing assembler.
//!
//! Positions are 0-based instruction slots; position `n` (one past the last instruction)
//! exists so that sections and functions ending with the stream can still be closed.

use crate::model::{SectionRecord, SF_BOLD, SF_EXPAND, SF_RO, SF_SELECTED};
use crate::strings::{quote_if_needed, StringTable};
use crate::tokens::bit_names;

pub const INDENT: &str = "  ";
pub const SUPPRESSED_MARK: &str = "; SUPPRESSED!!!  ";
pub const SKIPPED_MARK: &str = "; SKIPPED!!!  ";
const SECTION_END: &str = "SectionEnd";

const INSTALL_TYPE_NAMES: [&str; 32] = [
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17", "18", "19",
    "20", "21", "22", "23", "24", "25", "26", "27", "28", "29", "30", "31", "32",
];

/// Where each section record opens and closes.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    /// Record indices opening at each position, in record order.
    opens: Vec<Vec<usize>>,
    /// Closing keywords due at each position.
    closes: Vec<Vec<&'static str>>,
    /// Plain section owning each position.
    owner: Vec<Option<usize>>,
    /// Code position of each record.
    offsets: Vec<i32>,
    headers: Vec<String>,
    /// Whether each record is a group marker rather than a plain section.
    groups: Vec<bool>,
    membership: Vec<Option<String>>,
}

fn position(v: i64, len: usize) -> Option<usize> {
    usize::try_from(v).ok().filter(|&p| p <= len)
}

impl Layout {
    /// `len` is the number of instructions.
    pub fn build(sections: &[SectionRecord], strings: &mut StringTable<'_>, len: usize) -> Layout {
        let mut layout = Layout {
            opens: vec![Vec::new(); len + 1],
            closes: vec![Vec::new(); len + 1],
            owner: vec![None; len + 1],
            offsets: Vec::with_capacity(sections.len()),
            headers: Vec::with_capacity(sections.len()),
            groups: Vec::with_capacity(sections.len()),
            membership: Vec::with_capacity(sections.len()),
        };

        for (idx, sec) in sections.iter().enumerate() {
            layout.offsets.push(sec.code);

            let raw = strings.raw(sec.name_ptr);
            let name = if sec.flags & SF_BOLD != 0 {
                quote_if_needed(&format!("!{}", raw))
            } else {
                quote_if_needed(&raw)
            };
            let mut header = String::from("Section");
            if sec.is_group() {
                header.push_str("Group");
            }
            header.push(' ');
            if sec.flags & SF_EXPAND != 0 {
                header.push_str("/e ");
            }
            if sec.flags & SF_SELECTED == 0 {
                header.push_str("/o ");
            }
            header.push_str(&name);
            layout.headers.push(header.trim_end().to_string());
            layout.groups.push(sec.is_group());

            let plain = !sec.is_group();
            let membership = (plain && sec.install_types != 0 && !name.is_empty()).then(|| {
                let mut s = format!("SectionIn {}", bit_names(sec.install_types as u32, &INSTALL_TYPE_NAMES, " "));
                if sec.flags & SF_RO != 0 {
                    s.push_str(" RO");
                }
                s
            });
            layout.membership.push(membership);

            let Some(start) = position(sec.code as i64, len) else {
                log::warn!("section {} starts outside the code: {}", idx, sec.code);
                continue;
            };

            if sec.is_group_end() {
                layout.closes[start].push("SectionGroupEnd");
                continue;
            }
            layout.opens[start].push(idx);
            if sec.is_group_start() {
                continue;
            }

            // the trailing return sits one past the body
            let end = (sec.code_end() as i64 + 1).min(len as i64);
            if let Some(end) = position(end, len) {
                layout.closes[end].push(SECTION_END);
            }
            let last = (sec.code_end() as i64).min(len as i64);
            for p in start..=last.max(start as i64) as usize {
                match layout.owner[p] {
                    None => layout.owner[p] = Some(idx),
                    Some(other) => log::warn!("position {} claimed by sections {} and {}", p, other, idx),
                }
            }
        }
        layout
    }

    /// Plain section whose body contains position `p`.
    pub fn owner(&self, p: usize) -> Option<usize> {
        self.owner.get(p).copied().flatten()
    }

    /// Positions owned by record `idx`.
    #[cfg(test)]
    pub fn members(&self, idx: usize) -> Vec<usize> {
        (0..self.owner.len()).filter(|&p| self.owner(p) == Some(idx)).collect()
    }

    pub fn section_offset(&self, idx: usize) -> Option<i32> {
        self.offsets.get(idx).copied()
    }
}

/// Everything the decompile pass learns, one slot per position.
#[derive(Debug, Clone, Default)]
pub struct WorkingState {
    pub labels: Vec<Option<String>>,
    pub functions: Vec<Option<String>>,
    pub tokens: Vec<String>,
    pub decomps: Vec<String>,
    pub comments: Vec<String>,
    pub suppress: Vec<bool>,
    pub skipped: Vec<bool>,
    /// Symbolic id of each section record, once something refers to it.
    pub section_ids: Vec<Option<String>>,
    pub current_overwrite_mode: Option<u8>,
    pub inside_section: bool,
    pub inside_function: bool,
}

impl WorkingState {
    pub fn new(len: usize, sections: usize) -> Self {
        Self {
            labels: vec![None; len + 1],
            functions: vec![None; len + 1],
            tokens: vec![String::new(); len],
            decomps: vec![String::new(); len],
            comments: vec![String::new(); len],
            suppress: vec![false; len],
            skipped: vec![false; len],
            section_ids: vec![None; sections],
            current_overwrite_mode: None,
            inside_section: false,
            inside_function: false,
        }
    }

    /// Label for a jump target, registered at the position it points to.
    pub fn label(&mut self, target: i32) -> String {
        if target == 0 {
            return String::new();
        }
        let pos = target as i64 - 1;
        let name = format!("label_{}", pos);
        match usize::try_from(pos).ok().and_then(|p| self.labels.get_mut(p)) {
            Some(slot) => {
                if slot.is_none() {
                    *slot = Some(format!("{}:", name));
                }
            }
            None => log::warn!("jump target {} is outside the code", target),
        }
        name
    }

    /// Registers a function at `pos`; a name already there wins.
    pub fn function(&mut self, pos: i64, name: String) -> String {
        match usize::try_from(pos).ok().and_then(|p| self.functions.get_mut(p)) {
            Some(Some(existing)) => existing.clone(),
            Some(slot) => {
                *slot = Some(name.clone());
                name
            }
            None => {
                log::warn!("function {} at {} is outside the code", name, pos);
                name
            }
        }
    }

    /// Second sweep: interleaves boundaries with the decompiled statements.
    pub fn assemble(&mut self, layout: &Layout, raw_tokens: bool) -> Vec<String> {
        let len = self.tokens.len();
        let mut out = Vec::new();
        self.inside_section = false;
        self.inside_function = false;

        for p in 0..=len {
            if let Some(closes) = layout.closes.get(p) {
                for &close in closes {
                    if close == SECTION_END {
                        // already closed by the next section opening
                        if !self.inside_section {
                            continue;
                        }
                        self.inside_section = false;
                    }
                    out.push(close.to_string());
                    out.push(String::new());
                }
            }
            if let Some(opens) = layout.opens.get(p) {
                for &idx in opens {
                    if self.inside_function {
                        out.push("FunctionEnd".to_string());
                        out.push(String::new());
                        self.inside_function = false;
                    }
                    let plain = !layout.groups[idx];
                    if plain && self.inside_section {
                        log::warn!("section {} opens at {} before the previous one ends", idx, p);
                        out.push(SECTION_END.to_string());
                        out.push(String::new());
                    }
                    let mut header = layout.headers[idx].clone();
                    if let Some(id) = self.section_ids.get(idx).cloned().flatten() {
                        header.push(' ');
                        header.push_str(&id);
                    }
                    out.push(header);
                    if let Some(m) = &layout.membership[idx] {
                        out.push(m.clone());
                    }
                    if plain {
                        self.inside_section = true;
                    }
                }
            }
            if let Some(name) = self.functions[p].clone() {
                if self.inside_function {
                    out.push("FunctionEnd".to_string());
                    out.push(String::new());
                }
                out.push(format!("Function {}", name));
                self.inside_function = true;
            }
            if let Some(label) = &self.labels[p] {
                out.push(label.clone());
            }
            if p == len {
                break;
            }

            let marker = if self.skipped[p] {
                SKIPPED_MARK
            } else if self.suppress[p] {
                SUPPRESSED_MARK
            } else {
                ""
            };
            if raw_tokens && marker.is_empty() {
                out.push(format!("{}{}{}", INDENT, INDENT, self.tokens[p]));
            }
            out.extend(statement_lines(&self.decomps[p], &self.comments[p], marker));
        }

        if self.inside_function {
            out.push("FunctionEnd".to_string());
            out.push(String::new());
            self.inside_function = false;
        }
        if self.inside_section {
            out.push(SECTION_END.to_string());
            out.push(String::new());
            self.inside_section = false;
        }
        out
    }
}

/// Output lines of one statement; the comment trails the last line.
pub fn statement_lines(statement: &str, comment: &str, marker: &str) -> Vec<String> {
    let parts: Vec<&str> = statement.split('\n').collect();
    let last = parts.len() - 1;
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let part = part.trim();
            let content = if i == last && !comment.is_empty() {
                if part.is_empty() {
                    format!("; {}", comment)
                } else {
                    format!("{}\t\t; {}", part, comment)
                }
            } else {
                part.to_string()
            };
            format!("{}{}{}", INDENT, marker, content).trim_end().to_string()
        })
        .collect()
}
