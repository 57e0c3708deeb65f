use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn workspace_root(crate_dir: &Path) -> PathBuf {
    crate_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("crate directory should be <root>/crates/<name>")
        .to_path_buf()
}

fn take_until_paren_close<'a>(s: &'a str) -> Option<&'a str> {
    let s = s.trim();
    let j = s.find(')')?;
    Some(s[..j].trim())
}

fn parse_u8(s: &str) -> u8 {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).expect("hex shell folder id"),
        None => s.parse().expect("shell folder id"),
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let root = workspace_root(&manifest_dir);

    let opcode_path = root.join("nsis").join("opcodes.def");
    let folder_path = root.join("nsis").join("shfolders.def");

    println!("cargo:rerun-if-changed={}", opcode_path.display());
    println!("cargo:rerun-if-changed={}", folder_path.display());

    let opcode_src = fs::read_to_string(&opcode_path).expect("read opcodes.def");
    let folder_src = fs::read_to_string(&folder_path).expect("read shfolders.def");

    let mut ops: Vec<String> = Vec::new();
    for line in opcode_src.lines() {
        let l = line.trim();
        let rest = match l.strip_prefix("EW(") {
            Some(v) => v,
            None => continue,
        };
        let name = match take_until_paren_close(rest) {
            Some(v) => v,
            None => continue,
        };
        if !name.is_empty() {
            ops.push(name.to_string());
        }
    }
    assert!(ops.len() <= 0x100, "opcode table does not fit in a byte");

    let mut folders: Vec<(u8, String)> = Vec::new();
    for line in folder_src.lines() {
        let l = line.trim();
        let rest = match l.strip_prefix("CSIDL(") {
            Some(v) => v,
            None => continue,
        };
        let inner = match take_until_paren_close(rest) {
            Some(v) => v,
            None => continue,
        };
        let mut parts = inner.splitn(2, ',');
        let id = parse_u8(parts.next().unwrap());
        let name = parts.next().unwrap_or("").trim().to_string();
        if name.is_empty() {
            continue;
        }
        folders.push((id, name));
    }
    folders.sort_by_key(|(id, _)| *id);

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let out_path = out_dir.join("nsis_tables.rs");

    let mut out = String::new();

    out.push_str("#[allow(non_camel_case_types)]\n");
    out.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]\n");
    out.push_str("#[repr(u8)]\n");
    out.push_str("pub enum Opcode {\n");
    for (i, name) in ops.iter().enumerate() {
        out.push_str(&format!("    {} = {},\n", name, i));
    }
    out.push_str("}\n\n");

    out.push_str(&format!("pub const OPCODE_COUNT: usize = {};\n\n", ops.len()));

    out.push_str("pub const OPCODES: &[Opcode] = &[\n");
    for name in &ops {
        out.push_str(&format!("    Opcode::{},\n", name));
    }
    out.push_str("];\n\n");

    out.push_str("pub const OPCODE_NAMES: &[&str] = &[\n");
    for name in &ops {
        out.push_str(&format!("    \"EW_{}\",\n", name));
    }
    out.push_str("];\n\n");

    out.push_str("pub const SHELL_FOLDERS: &[(u8, &str)] = &[\n");
    for (id, name) in &folders {
        out.push_str(&format!("    (0x{:02X}, \"{}\"),\n", id, name));
    }
    out.push_str("];\n");

    fs::write(out_path, out).expect("write generated nsis tables");
}
