//! Typed view of an instruction: one variant per opcode, with its operands named.

use crate::model::Entry;
use crate::tables::{OPCODES, OPCODE_NAMES, Opcode};

/// String reference operand.
pub type Str = i32;
/// Variable slot operand; negative values are strings.
pub type Var = i32;
/// Jump target operand: instruction position plus one, `0` for none.
pub type Target = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Invalid { which: u32 },
    Return,
    Nop { target: Target },
    Abort { message: Str },
    Quit,
    Call { target: Target, is_label: bool },
    UpdateText { text: Str },
    Sleep { millis: Str },
    BringToFront,
    SetDetailsView { list_action: i32 },
    SetFileAttributes { file: Str, attributes: i32 },
    CreateDir { path: Str, set_out_path: bool },
    IfFileExists { file: Str, yes: Target, no: Target },
    SetFlag { flag: i32, value: Str, mode: i32 },
    IfFlag { yes: Target, no: Target, flag: i32 },
    GetFlag { output: Var, flag: i32 },
    Rename { from: Str, to: Str, reboot_ok: bool },
    GetFullPathName { output: Var, path: Str, long_name: bool },
    SearchPath { output: Var, file: Str },
    GetTempFileName { output: Var, base_dir: Str },
    ExtractFile { flags: i32, name: Str, data_offset: i32, time_low: i32, time_high: i32, message: Str },
    DeleteFile { file: Str, flags: i32 },
    MessageBox { style: i32, text: Str, button1: i32, jump1: Target, button2: i32, jump2: Target },
    RmDir { path: Str, flags: i32 },
    StrLen { output: Var, string: Str },
    AssignVar { output: Var, string: Str, max_len: Str, start: Str },
    StrCmp { a: Str, b: Str, equal: Target, not_equal: Target, case_sensitive: bool },
    ReadEnvStr { output: Var, name: Str, is_env_var: bool },
    IntCmp { a: Str, b: Str, equal: Target, less: Target, more: Target, unsigned: bool },
    IntOp { output: Var, a: Str, b: Str, op: i32 },
    IntFmt { output: Var, format: Str, value: Str },
    PushPop { value: Str, pop: bool, exch: i32 },
    FindWindow { output: Var, class: Str, title: Str, parent: Str, after: Str },
    SendMessage { output: Var, hwnd: Str, msg: Str, wparam: Str, lparam: Str, flags: i32 },
    IsWindow { hwnd: Str, yes: Target, no: Target },
    GetDlgItem { output: Var, dialog: Str, item: Str },
    SetCtlColors { hwnd: Str, colors: Str, extra: Str },
    SetBrandingImage { image: Str, control_id: i32, resize: bool },
    CreateFont { output: Var, face: Str, height: Str, weight: Str, flags: i32 },
    ShowWindow { hwnd: Str, state: Str, hide: bool, enable: bool },
    ExecShell { verb: Str, file: Str, params: Str, show: i32 },
    Exec { command: Str, output: Var, wait: bool },
    GetFileTime { high: Var, low: Var, file: Str },
    GetDllVersion { high: Var, low: Var, file: Str },
    RegisterDll { dll: Str, function: Str, lang_string: i32, no_unload: bool, plugin: i32 },
    CreateShortcut { link: Str, target: Str, params: Str, icon_file: Str, packed: i32, description: Str },
    CopyFiles { from: Str, to: Str, flags: i32 },
    Reboot { magic: i32 },
    WriteIni { section: Str, key: Str, value: Str, file: Str, write: bool },
    ReadIniStr { output: Var, section: Str, key: Str, file: Str },
    DeleteReg { root: i32, key: Str, value: Str, mode: i32 },
    WriteReg { root: i32, key: Str, name: Str, data: Str, kind: i32 },
    ReadReg { output: Var, root: i32, key: Str, name: Str, kind: i32 },
    RegEnum { output: Var, root: i32, key: Str, index: Str, keys: bool },
    FileClose { handle: Var },
    FileOpen { output: Var, access: i32, mode: i32, file: Str },
    FileWrite { handle: Var, data: Str, single: bool, wide: bool },
    FileRead { handle: Var, output: Var, max_len: Str, single: bool, wide: bool },
    FileSeek { handle: Var, output: Var, offset: Str, mode: i32 },
    FindClose { handle: Var },
    FindNext { output: Var, handle: Var },
    FindFirst { output: Var, handle: Var, pattern: Str },
    WriteUninstaller { name: Str, data_offset: i32, icon_offset: i32, extra: Str },
    SectionSet { section: Str, value: i32, field: i32, text: Str },
    InstTypeSet { index: Str, value: i32, set: i32, current: i32 },
    GetLabelAddress { output: Var, target: Target },
    GetFunctionAddress { output: Var, target: Target },
    LockWindow { off: i32 },
}

pub fn opcode_of(which: u32) -> Option<Opcode> {
    OPCODES.get(which as usize).copied()
}

impl Op {
    pub fn decode(entry: &Entry) -> Op {
        let [p0, p1, p2, p3, p4, p5] = entry.offsets;
        let Some(opcode) = opcode_of(entry.which) else {
            return Op::Invalid { which: entry.which };
        };
        match opcode {
            Opcode::INVALID_OPCODE => Op::Invalid { which: entry.which },
            Opcode::RET => Op::Return,
            Opcode::NOP => Op::Nop { target: p0 },
            Opcode::ABORT => Op::Abort { message: p0 },
            Opcode::QUIT => Op::Quit,
            Opcode::CALL => Op::Call {
                target: p0,
                is_label: p1 == 1,
            },
            Opcode::UPDATETEXT => Op::UpdateText { text: p0 },
            Opcode::SLEEP => Op::Sleep { millis: p0 },
            Opcode::BRINGTOFRONT => Op::BringToFront,
            Opcode::CHDETAILSVIEW => Op::SetDetailsView { list_action: p0 },
            Opcode::SETFILEATTRIBUTES => Op::SetFileAttributes {
                file: p0,
                attributes: p1,
            },
            Opcode::CREATEDIR => Op::CreateDir {
                path: p0,
                set_out_path: p1 == 1,
            },
            Opcode::IFFILEEXISTS => Op::IfFileExists {
                file: p0,
                yes: p1,
                no: p2,
            },
            Opcode::SETFLAG => Op::SetFlag {
                flag: p0,
                value: p1,
                mode: p2,
            },
            Opcode::IFFLAG => Op::IfFlag {
                yes: p0,
                no: p1,
                flag: p2,
            },
            Opcode::GETFLAG => Op::GetFlag { output: p0, flag: p1 },
            Opcode::RENAME => Op::Rename {
                from: p0,
                to: p1,
                reboot_ok: p2 != 0,
            },
            Opcode::GETFULLPATHNAME => Op::GetFullPathName {
                output: p0,
                path: p1,
                long_name: p2 != 0,
            },
            Opcode::SEARCHPATH => Op::SearchPath { output: p0, file: p1 },
            Opcode::GETTEMPFILENAME => Op::GetTempFileName {
                output: p0,
                base_dir: p1,
            },
            Opcode::EXTRACTFILE => Op::ExtractFile {
                flags: p0,
                name: p1,
                data_offset: p2,
                time_low: p3,
                time_high: p4,
                message: p5,
            },
            Opcode::DELETEFILE => Op::DeleteFile { file: p0, flags: p1 },
            Opcode::MESSAGEBOX => Op::MessageBox {
                style: p0,
                text: p1,
                button1: p2,
                jump1: p3,
                button2: p4,
                jump2: p5,
            },
            Opcode::RMDIR => Op::RmDir { path: p0, flags: p1 },
            Opcode::STRLEN => Op::StrLen { output: p0, string: p1 },
            Opcode::ASSIGNVAR => Op::AssignVar {
                output: p0,
                string: p1,
                max_len: p2,
                start: p3,
            },
            Opcode::STRCMP => Op::StrCmp {
                a: p0,
                b: p1,
                equal: p2,
                not_equal: p3,
                case_sensitive: p4 != 0,
            },
            Opcode::READENVSTR => Op::ReadEnvStr {
                output: p0,
                name: p1,
                is_env_var: p2 != 0,
            },
            Opcode::INTCMP => Op::IntCmp {
                a: p0,
                b: p1,
                equal: p2,
                less: p3,
                more: p4,
                unsigned: p5 != 0,
            },
            Opcode::INTOP => Op::IntOp {
                output: p0,
                a: p1,
                b: p2,
                op: p3,
            },
            Opcode::INTFMT => Op::IntFmt {
                output: p0,
                format: p1,
                value: p2,
            },
            Opcode::PUSHPOP => Op::PushPop {
                value: p0,
                pop: p1 != 0,
                exch: p2,
            },
            Opcode::FINDWINDOW => Op::FindWindow {
                output: p0,
                class: p1,
                title: p2,
                parent: p3,
                after: p4,
            },
            Opcode::SENDMESSAGE => Op::SendMessage {
                output: p0,
                hwnd: p1,
                msg: p2,
                wparam: p3,
                lparam: p4,
                flags: p5,
            },
            Opcode::ISWINDOW => Op::IsWindow {
                hwnd: p0,
                yes: p1,
                no: p2,
            },
            Opcode::GETDLGITEM => Op::GetDlgItem {
                output: p0,
                dialog: p1,
                item: p2,
            },
            Opcode::SETCTLCOLORS => Op::SetCtlColors {
                hwnd: p0,
                colors: p1,
                extra: p2,
            },
            Opcode::SETBRANDINGIMAGE => Op::SetBrandingImage {
                image: p0,
                control_id: p1,
                resize: p2 != 0,
            },
            Opcode::CREATEFONT => Op::CreateFont {
                output: p0,
                face: p1,
                height: p2,
                weight: p3,
                flags: p4,
            },
            Opcode::SHOWWINDOW => Op::ShowWindow {
                hwnd: p0,
                state: p1,
                hide: p2 == 1,
                enable: p3 == 1,
            },
            Opcode::SHELLEXEC => Op::ExecShell {
                verb: p0,
                file: p1,
                params: p2,
                show: p3,
            },
            Opcode::EXECUTE => Op::Exec {
                command: p0,
                output: p1,
                wait: p2 != 0,
            },
            Opcode::GETFILETIME => Op::GetFileTime {
                high: p0,
                low: p1,
                file: p2,
            },
            Opcode::GETDLLVERSION => Op::GetDllVersion {
                high: p0,
                low: p1,
                file: p2,
            },
            Opcode::REGISTERDLL => Op::RegisterDll {
                dll: p0,
                function: p1,
                lang_string: p2,
                no_unload: p3 == 1,
                plugin: p4,
            },
            Opcode::CREATESHORTCUT => Op::CreateShortcut {
                link: p0,
                target: p1,
                params: p2,
                icon_file: p3,
                packed: p4,
                description: p5,
            },
            Opcode::COPYFILES => Op::CopyFiles {
                from: p0,
                to: p1,
                flags: p2,
            },
            Opcode::REBOOT => Op::Reboot { magic: p0 },
            Opcode::WRITEINI => Op::WriteIni {
                section: p0,
                key: p1,
                value: p2,
                file: p3,
                write: p4 == 1,
            },
            Opcode::READINISTR => Op::ReadIniStr {
                output: p0,
                section: p1,
                key: p2,
                file: p3,
            },
            Opcode::DELREG => Op::DeleteReg {
                root: p1,
                key: p2,
                value: p3,
                mode: p4,
            },
            Opcode::WRITEREG => Op::WriteReg {
                root: p0,
                key: p1,
                name: p2,
                data: p3,
                kind: p5,
            },
            Opcode::READREGSTR => Op::ReadReg {
                output: p0,
                root: p1,
                key: p2,
                name: p3,
                kind: p4,
            },
            Opcode::REGENUM => Op::RegEnum {
                output: p0,
                root: p1,
                key: p2,
                index: p3,
                keys: p4 != 0,
            },
            Opcode::FCLOSE => Op::FileClose { handle: p0 },
            Opcode::FOPEN => Op::FileOpen {
                output: p0,
                access: p1,
                mode: p2,
                file: p3,
            },
            Opcode::FPUTS => Op::FileWrite {
                handle: p0,
                data: p1,
                single: p2 == 1,
                wide: false,
            },
            Opcode::FPUTWS => Op::FileWrite {
                handle: p0,
                data: p1,
                single: p2 == 1,
                wide: true,
            },
            Opcode::FGETS => Op::FileRead {
                handle: p0,
                output: p1,
                max_len: p2,
                single: p3 == 1,
                wide: false,
            },
            Opcode::FGETWS => Op::FileRead {
                handle: p0,
                output: p1,
                max_len: p2,
                single: p3 == 1,
                wide: true,
            },
            Opcode::FSEEK => Op::FileSeek {
                handle: p0,
                output: p1,
                offset: p2,
                mode: p3,
            },
            Opcode::FINDCLOSE => Op::FindClose { handle: p0 },
            Opcode::FINDNEXT => Op::FindNext { output: p0, handle: p1 },
            Opcode::FINDFIRST => Op::FindFirst {
                output: p0,
                handle: p1,
                pattern: p2,
            },
            Opcode::WRITEUNINSTALLER => Op::WriteUninstaller {
                name: p0,
                data_offset: p1,
                icon_offset: p2,
                extra: p3,
            },
            Opcode::SECTIONSET => Op::SectionSet {
                section: p0,
                value: p1,
                field: p2,
                text: p4,
            },
            Opcode::INSTTYPESET => Op::InstTypeSet {
                index: p0,
                value: p1,
                set: p2,
                current: p3,
            },
            Opcode::GETLABELADDR => Op::GetLabelAddress { output: p0, target: p1 },
            Opcode::GETFUNCTIONADDR => Op::GetFunctionAddress { output: p0, target: p1 },
            Opcode::LOCKWINDOW => Op::LockWindow { off: p0 },
        }
    }
}

/// One-line dump of an instruction: index, opcode and the non-zero operands in hex.
pub fn raw_token(index: usize, entry: &Entry) -> String {
    let name = OPCODE_NAMES
        .get(entry.which as usize)
        .copied()
        .unwrap_or("EW_???");
    let mut out = format!("#{:>4} {:02X}_{:>16}", format!("{:03X}", index), entry.which, name);
    if entry.offsets.iter().any(|&p| p != 0) {
        out.push_str(" :");
        for &p in &entry.offsets {
            if p == 0 {
                out.push_str("    -");
            } else {
                out.push_str(&format!(" {:>4X}", p as u32));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::OPCODE_COUNT;

    #[test]
    fn test_opcode_table_matches_format() {
        assert_eq!(OPCODE_COUNT, 70);
        assert_eq!(opcode_of(0x33), Some(Opcode::WRITEREG));
        assert_eq!(opcode_of(0x45), Some(Opcode::FGETWS));
        assert_eq!(opcode_of(70), None);
    }

    #[test]
    fn test_decode_names_operands() {
        let e = Entry::new(Opcode::WRITEREG as u32, [2, 10, 20, 30, 0, 1]);
        assert_eq!(
            Op::decode(&e),
            Op::WriteReg {
                root: 2,
                key: 10,
                name: 20,
                data: 30,
                kind: 1
            }
        );
        assert_eq!(Op::decode(&Entry::new(200, [0; 6])), Op::Invalid { which: 200 });
    }

    #[test]
    fn test_raw_token() {
        let e = Entry::new(Opcode::RET as u32, [0; 6]);
        assert_eq!(raw_token(1, &e), "# 001 01_          EW_RET");
        let e = Entry::new(Opcode::WRITEREG as u32, [2, 0x1A, 0, -1, 0, 1]);
        assert_eq!(
            raw_token(0x12, &e),
            "# 012 33_     EW_WRITEREG :    2   1A    - FFFFFFFF    -    1"
        );
    }
}
