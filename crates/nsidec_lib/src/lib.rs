//! Reconstructs an NSIS installer script from the compiled header block.
//!
//! The entry point is [`decompile`], which takes an [`Installer`] (the decompressed header
//! block already split into instructions, section/page records and the string heap) and
//! produces the script as a list of lines.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod decompiler;
mod layout;
pub mod model;
mod opcode;
mod script;
mod strings;
mod tokens;

mod tables {
    include!(concat!(env!("OUT_DIR"), "/nsis_tables.rs"));
}

pub use model::{BlockKind, BlockHeader, Entry, Header, Installer, PageRecord, SectionRecord, Width};
pub use script::{decompile, decompile_entries, Decompilation, ExtractedFile};
pub use strings::{quote, quote_if_needed, StringDecoder, UserVars};

/// Which of the two string-heap encodings the installer uses.
///
/// The generations differ in the byte values of the heap control codes: v2 uses
/// `0xFC..=0xFF`, v3 uses `0x01..=0x04`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Generation {
    Auto,
    V2,
    V3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    pub generation: Generation,
    /// Comment out instructions that are not inside any section.
    pub suppress_outside_sections: bool,
    /// Emit the raw opcode/operand dump above every statement.
    pub raw_tokens: bool,
    pub comment_out_uninstaller: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            generation: Generation::Auto,
            suppress_outside_sections: false,
            raw_tokens: true,
            comment_out_uninstaller: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum NsiError {
    #[error("unexpected end of input")]
    Eof,

    #[error("missing {0:?} block")]
    MissingBlock(BlockKind),

    #[error("invalid block table: {0}")]
    InvalidBlockTable(String),

    #[error("corrupt string at offset 0x{offset:x}: no terminator within the string block")]
    CorruptString { offset: usize },

    #[error("no section record with index {0}")]
    UnknownSection(i32),

    #[error("string reference {reference} nests deeper than {limit} levels")]
    StringRecursionLimit { reference: i32, limit: usize },

    #[error("unsupported opcode: 0x{0:x}")]
    UnsupportedOpcode(u32),

    #[error("invalid language string reference: {0}")]
    InvalidLangString(i32),

    #[error("expected an integer, found {0:?}")]
    InvalidInteger(String),
}
