//! First sweep: renders every instruction into a statement and a comment.

use crate::layout::{Layout, WorkingState};
use crate::model::{Entry, Installer};
use crate::opcode::{opcode_of, raw_token, Op, Str, Target, Var};
use crate::script::ExtractedFile;
use crate::strings::{parse_int, quote_if_needed, StringDecoder, StringTable};
use crate::tables::Opcode;
use crate::tokens::{
    bit_names, bit_names_by_value, enum_token, filetime, filetime_to_string, mb_style, positional, root_key,
    window_message_name, words, ShortcutFlags, FILE_ATTRIBUTES, MB_IDS, OVERWRITE_MODES, SHOW_COMMANDS,
};
use crate::{DecompileOptions, Generation, NsiError};

pub const NOT_IMPLEMENTED: &str = "Decompiling that command is not implemented yet!";

const EXEC_FLAG_AUTOCLOSE: i32 = 0;
const EXEC_FLAG_ALL_USER_VAR: i32 = 1;
const EXEC_FLAG_ERROR: i32 = 2;
const EXEC_FLAG_ABORT: i32 = 3;
const EXEC_FLAG_REBOOT: i32 = 4;
const EXEC_FLAG_SILENT: i32 = 8;
const EXEC_FLAG_INSTDIR_ERROR: i32 = 9;
const EXEC_FLAG_ERRLVL: i32 = 11;
const EXEC_FLAG_REG_VIEW: i32 = 12;
const EXEC_FLAG_STATUS_UPDATE: i32 = 13;

const KEY_WOW64_64KEY: i64 = 0x100;
const KEY_WOW64_32KEY: i64 = 0x200;

const REG_SZ: i32 = 1;
const REG_EXPAND_SZ: i32 = 2;
const REG_BINARY: i32 = 3;
const REG_DWORD: i32 = 4;

const DEL_RECURSE: i32 = 2;
const DEL_REBOOT: i32 = 4;

const FOF_SILENT: i32 = 0x4;
const FOF_FILESONLY: i32 = 0x80;

const REBOOT_MAGIC: i32 = 0x0BAD_F00D;

/// Bit of the extract-file message-box field that stands for `IDCANCEL`.
const EXTRACT_IDCANCEL: u32 = 2 << 21;
const MB_DEFAULT_SHIFT: u32 = 21;

const SHOW_STATE_SHOW: &str = "5";

const INT_OPS: [&str; 14] = ["+", "-", "*", "/", "|", "&", "^", "!", "||", "&&", "%", "<<", ">>", "~"];
const FONT_FLAGS: [&str; 3] = ["/ITALIC", "/UNDERLINE", "/STRIKE"];
const RMDIR_FLAGS: [&str; 3] = ["", "/r", "/REBOOTOK"];
const OPEN_MODES: [&str; 3] = ["w", "r", "a"];
const SEEK_MODES: [&str; 3] = ["", "CUR", "END"];
const DETAILS_PRINT: [&str; 4] = ["both", "textonly", "listonly", "none"];

/// Statement and trailing comment of one instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub statement: String,
    pub comment: String,
}

impl Rendered {
    fn comment(comment: impl Into<String>) -> Self {
        Self {
            statement: String::new(),
            comment: comment.into(),
        }
    }

    fn with_comment(statement: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            comment: comment.into(),
        }
    }
}

impl From<String> for Rendered {
    fn from(statement: String) -> Self {
        Self {
            statement,
            comment: String::new(),
        }
    }
}

impl From<&str> for Rendered {
    fn from(statement: &str) -> Self {
        statement.to_string().into()
    }
}

pub struct Decompiler<'a> {
    installer: &'a Installer,
    options: &'a DecompileOptions,
    pub strings: StringTable<'a>,
    pub state: WorkingState,
    pub layout: Layout,
    pub files: Vec<ExtractedFile>,
    out_dir: String,
    /// 1-based index of the instruction being rendered.
    index: usize,
}

impl<'a> Decompiler<'a> {
    pub fn new(installer: &'a Installer, options: &'a DecompileOptions) -> Self {
        let decoder = StringDecoder::new(
            &installer.strings,
            &installer.langtables,
            installer.unicode,
            options.generation,
        );
        let mut strings = StringTable::new(decoder);
        let len = installer.entries.len();
        let layout = Layout::build(&installer.sections, &mut strings, len);
        // section names failing to decode were already logged; they belong to no instruction
        strings.take_diagnostics();
        let state = WorkingState::new(len, installer.sections.len());
        Self {
            installer,
            options,
            strings,
            state,
            layout,
            files: Vec::new(),
            out_dir: String::new(),
            index: 0,
        }
    }

    pub fn generation(&self) -> Generation {
        self.strings.generation()
    }

    /// Renders every instruction into the working state.
    pub fn run(&mut self) {
        let installer = self.installer;
        for (pos, entry) in installer.entries.iter().enumerate() {
            self.index = pos + 1;
            let token = raw_token(self.index, entry);
            let mut rendered = match self.render(pos, entry) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("instruction {:#x}: {}", self.index, e);
                    Rendered::with_comment(NOT_IMPLEMENTED, format!("{}: {}", e, token))
                }
            };
            let diagnostics = self.strings.take_diagnostics();
            if !diagnostics.is_empty() {
                if !rendered.comment.is_empty() {
                    rendered.comment.push_str("; ");
                }
                rendered.comment.push_str(&diagnostics.join("; "));
            }

            self.state.suppress[pos] = self.options.suppress_outside_sections && self.layout.owner(pos).is_none();
            self.state.tokens[pos] = token;
            self.state.decomps[pos] = rendered.statement;
            self.state.comments[pos] = rendered.comment;
        }
    }

    pub fn assemble(&mut self) -> Vec<String> {
        self.state.assemble(&self.layout, self.options.raw_tokens)
    }

    fn s(&mut self, r: Str) -> String {
        self.strings.s(r)
    }

    fn sq(&mut self, r: Str) -> String {
        self.strings.sq(r)
    }

    fn v(&mut self, slot: Var) -> String {
        self.strings.var(slot)
    }

    fn label(&mut self, target: Target) -> String {
        self.state.label(target)
    }

    fn label_or_zero(&mut self, target: Target) -> String {
        if target == 0 {
            "0".to_string()
        } else {
            self.label(target)
        }
    }

    /// Two-way branch: `yes` alone, or `yes no` with a missing `yes` rendered as `0`.
    fn branch(&mut self, yes: Target, no: Target) -> String {
        if no != 0 {
            let yes = self.label_or_zero(yes);
            format!("{} {}", yes, self.label(no))
        } else {
            self.label(yes)
        }
    }

    /// Signed distance from the current instruction.
    fn jump(&self, target: Target) -> String {
        if target <= 0 {
            return String::new();
        }
        format!("{:+}", target as i64 - self.index as i64)
    }

    fn func(&mut self, target: Target) -> String {
        if target < 0 {
            return self.v(!target);
        }
        if target == 0 {
            return String::new();
        }
        let pos = target as i64 - 1;
        self.state.function(pos, format!("func_{}", pos))
    }

    /// `${Section_n}` for a numeric section operand, the literal otherwise.
    fn section_ref(&mut self, r: Str) -> Result<String, NsiError> {
        let text = self.strings.raw(r);
        let Ok(idx) = parse_int(&text) else {
            return Ok(quote_if_needed(&text));
        };
        let known = usize::try_from(idx)
            .ok()
            .filter(|&i| self.layout.section_offset(i).is_some());
        let Some(idx) = known else {
            return Err(NsiError::UnknownSection(idx as i32));
        };
        let id = format!("Section_{}", idx);
        self.state.section_ids[idx] = Some(id.clone());
        Ok(format!("${{{}}}", id))
    }

    fn render(&mut self, pos: usize, entry: &Entry) -> Result<Rendered, NsiError> {
        let op = Op::decode(entry);
        let r: Rendered = match op {
            Op::Invalid { which } => Rendered::comment(format!("INVALID_OPCODE:{:x} @ 0x{:X}", which, self.index)),
            Op::Return => Rendered::comment("Return"),
            Op::Nop { target } => {
                if target == 0 {
                    "Nop".into()
                } else {
                    format!("Goto {}", self.label(target)).into()
                }
            }
            Op::Abort { message } => words(&["Abort".to_string(), self.s(message)]).into(),
            Op::Quit => "Quit".into(),
            Op::Call { target, is_label } => {
                if is_label {
                    format!("Call :{}", self.label(target)).into()
                } else {
                    format!("Call {}", self.func(target)).into()
                }
            }
            Op::UpdateText { text } => format!("DetailPrint {}", self.sq(text)).into(),
            Op::Sleep { millis } => format!("Sleep {}", self.s(millis)).into(),
            Op::BringToFront => "BringToFront".into(),
            Op::SetDetailsView { list_action } => {
                if list_action == 0 {
                    "SetDetailsView hide".into()
                } else {
                    "SetDetailsView show".into()
                }
            }
            Op::SetFileAttributes { file, attributes } => {
                let attrs = bit_names_by_value(attributes as u32, &FILE_ATTRIBUTES, "|");
                words(&["SetFileAttributes".to_string(), self.s(file), attrs]).into()
            }
            Op::CreateDir { path, set_out_path } => {
                let dir = self.s(path);
                if set_out_path {
                    self.out_dir = self.strings.raw(path);
                    format!("SetOutPath {}", dir).into()
                } else {
                    format!("CreateDirectory {}", dir).into()
                }
            }
            Op::IfFileExists { file, yes, no } => {
                let file = self.s(file);
                format!("IfFileExists {} {}", file, self.branch(yes, no)).into()
            }
            Op::SetFlag { flag, value, mode } => return self.set_flag(entry, flag, value, mode),
            Op::IfFlag { yes, no, flag } => {
                let name = match flag {
                    EXEC_FLAG_ERROR => "IfErrors",
                    EXEC_FLAG_ABORT => "IfAbort",
                    EXEC_FLAG_REBOOT => "IfRebootFlag",
                    EXEC_FLAG_SILENT => "IfSilent",
                    _ => return Err(NsiError::UnsupportedOpcode(entry.which)),
                };
                format!("{} {}", name, self.branch(yes, no)).into()
            }
            Op::GetFlag { output, flag } => match flag {
                EXEC_FLAG_ERRLVL => format!("GetErrorLevel {}", self.v(output)).into(),
                EXEC_FLAG_INSTDIR_ERROR => format!("GetInstDirError {}", self.v(output)).into(),
                _ => return Err(NsiError::UnsupportedOpcode(entry.which)),
            },
            Op::Rename { from, to, reboot_ok } => {
                let flag = if reboot_ok { "/REBOOTOK" } else { "" };
                words(&["Rename".to_string(), flag.to_string(), self.s(from), self.s(to)]).into()
            }
            Op::GetFullPathName {
                output,
                path,
                long_name,
            } => {
                let flag = if long_name { "" } else { "/SHORT" };
                words(&["GetFullPathName".to_string(), flag.to_string(), self.v(output), self.s(path)]).into()
            }
            Op::SearchPath { output, file } => format!("SearchPath {} {}", self.v(output), self.s(file)).into(),
            Op::GetTempFileName { output, base_dir } => {
                let out = self.v(output);
                let mut base = self.s(base_dir);
                if base.eq_ignore_ascii_case("$TEMP") {
                    base.clear();
                }
                words(&["GetTempFileName".to_string(), out, base]).into()
            }
            Op::ExtractFile {
                flags,
                name,
                data_offset,
                time_low,
                time_high,
                message,
            } => self.extract_file(flags, name, data_offset, time_low, time_high, message),
            Op::DeleteFile { file, flags } => {
                let flag = if flags & DEL_REBOOT != 0 { "/REBOOTOK" } else { "" };
                words(&["Delete".to_string(), flag.to_string(), self.s(file)]).into()
            }
            Op::MessageBox {
                style,
                text,
                button1,
                jump1,
                button2,
                jump2,
            } => {
                let style = style as u32;
                let silent_default = (style >> MB_DEFAULT_SHIFT) & 7;
                let style = style & !(7 << MB_DEFAULT_SHIFT);
                let mut parts = vec!["MessageBox".to_string(), mb_style(style), self.sq(text)];
                if silent_default != 0 {
                    parts.push(format!("/SD {}", enum_token(silent_default as i64, &MB_IDS, "")));
                }
                parts.push(enum_token(button1 as i64, &MB_IDS, ""));
                parts.push(self.jump(jump1));
                parts.push(enum_token(button2 as i64, &MB_IDS, ""));
                parts.push(self.jump(jump2));
                words(&parts).into()
            }
            Op::RmDir { path, flags } => {
                let flags = bit_names((flags & (DEL_RECURSE | DEL_REBOOT)) as u32, &RMDIR_FLAGS, " ");
                words(&["RMDir".to_string(), flags, self.s(path)]).into()
            }
            Op::StrLen { output, string } => format!("StrLen {} {}", self.v(output), self.s(string)).into(),
            Op::AssignVar {
                output,
                string,
                max_len,
                start,
            } => {
                let out = self.v(output);
                if self.strings.int(string).ok() == Some(self.index as i64) {
                    return Ok(format!("GetCurrentAddress {}", out).into());
                }
                let args = [out.clone(), self.sq(string), self.s(max_len), self.s(start)];
                let statement = format!("StrCpy {}", positional(&args));
                if out == "$PLUGINSDIR" {
                    Rendered::with_comment(statement, "assigning $PLUGINSDIR does not compile; use InitPluginsDir")
                } else {
                    statement.into()
                }
            }
            Op::StrCmp {
                a,
                b,
                equal,
                not_equal,
                case_sensitive,
            } => {
                let name = if case_sensitive { "StrCmpS" } else { "StrCmp" };
                let (a, b) = (self.sq(a), self.sq(b));
                format!("{} {} {} {}", name, a, b, self.branch(equal, not_equal)).into()
            }
            Op::ReadEnvStr {
                output,
                name,
                is_env_var,
            } => {
                let cmd = if is_env_var { "ReadEnvStr" } else { "ExpandEnvStrings" };
                format!("{} {} {}", cmd, self.v(output), self.s(name)).into()
            }
            Op::IntCmp {
                a,
                b,
                equal,
                less,
                more,
                unsigned,
            } => {
                let name = if unsigned { "IntCmpU" } else { "IntCmp" };
                let (a, b) = (self.sq(a), self.sq(b));
                let mut jumps = vec![
                    self.label_or_zero(equal),
                    self.label_or_zero(less),
                    self.label_or_zero(more),
                ];
                while jumps.len() > 1 && jumps.last().is_some_and(|j| j == "0") {
                    jumps.pop();
                }
                format!("{} {} {} {}", name, a, b, jumps.join(" ")).into()
            }
            Op::IntOp { output, a, b, op } => {
                let out = self.v(output);
                let a = self.s(a);
                let mut b = self.s(b);
                let mut op = enum_token(op as i64, &INT_OPS, "");
                if op == "^" && b == "0xFFFFFFFF" {
                    op = "~".to_string();
                    b.clear();
                }
                words(&["IntOp".to_string(), out, a, op, b]).into()
            }
            Op::IntFmt { output, format, value } => {
                format!("IntFmt {} {} {}", self.v(output), self.sq(format), self.sq(value)).into()
            }
            Op::PushPop { value, pop, exch } => {
                if pop {
                    format!("Pop {}", self.v(value)).into()
                } else if exch != 0 {
                    format!("Exch {}", exch).into()
                } else {
                    format!("Push {}", self.sq(value)).into()
                }
            }
            Op::FindWindow {
                output,
                class,
                title,
                parent,
                after,
            } => {
                let args = [self.v(output), self.sq(class), self.s(title), self.s(parent), self.s(after)];
                format!("FindWindow {}", positional(&args)).into()
            }
            Op::SendMessage {
                output,
                hwnd,
                msg,
                wparam,
                lparam,
                flags,
            } => self.send_message(output, hwnd, msg, wparam, lparam, flags),
            Op::IsWindow { hwnd, yes, no } => {
                let hwnd = self.s(hwnd);
                format!("IsWindow {} {}", hwnd, self.branch(yes, no)).into()
            }
            Op::GetDlgItem { output, dialog, item } => {
                format!("GetDlgItem {} {} {}", self.v(output), self.s(dialog), self.s(item)).into()
            }
            Op::SetCtlColors { hwnd, colors, .. } => Rendered::with_comment(
                format!("SetCtlColors {}", self.s(hwnd)),
                format!("colors are kept in the control color block at 0x{:X}", colors),
            ),
            Op::SetBrandingImage {
                image,
                control_id,
                resize,
            } => {
                let resize = if resize { "/RESIZETOFIT" } else { "" };
                let statement = words(&[
                    "SetBrandingImage".to_string(),
                    format!("/IMGID={}", control_id),
                    resize.to_string(),
                    self.s(image),
                ]);
                Rendered::with_comment(statement, "needs AddBrandingImage in the header")
            }
            Op::CreateFont {
                output,
                face,
                height,
                weight,
                flags,
            } => {
                let args = [
                    self.v(output),
                    self.sq(face),
                    self.s(height),
                    self.s(weight),
                    bit_names(flags as u32, &FONT_FLAGS, " "),
                ];
                format!("CreateFont {}", positional(&args)).into()
            }
            Op::ShowWindow {
                hwnd,
                state,
                hide,
                enable,
            } => {
                if enable {
                    format!("EnableWindow {} {}", self.s(hwnd), self.s(state)).into()
                } else if hide {
                    "HideWindow".into()
                } else {
                    let hwnd = self.s(hwnd);
                    let state = self.s(state);
                    if state == SHOW_STATE_SHOW {
                        self.skip_bring_to_front(pos);
                    }
                    format!("ShowWindow {} {}", hwnd, state).into()
                }
            }
            Op::ExecShell {
                verb,
                file,
                params,
                show,
            } => {
                let args = [
                    self.s(verb),
                    self.s(file),
                    self.s(params),
                    enum_token(show as i64, &SHOW_COMMANDS, ""),
                ];
                format!("ExecShell {}", positional(&args)).into()
            }
            Op::Exec { command, output, wait } => {
                let command = self.s(command);
                if wait {
                    let out = if output >= 0 { self.v(output) } else { String::new() };
                    words(&["ExecWait".to_string(), command, out]).into()
                } else {
                    format!("Exec {}", command).into()
                }
            }
            Op::GetFileTime { high, low, file } => {
                format!("GetFileTime {} {} {}", self.s(file), self.v(high), self.v(low)).into()
            }
            Op::GetDllVersion { high, low, file } => {
                format!("GetDLLVersion {} {} {}", self.s(file), self.v(high), self.v(low)).into()
            }
            Op::RegisterDll {
                dll,
                function,
                no_unload,
                ..
            } => {
                let dll = self.s(dll);
                let function = self.strings.raw(function);
                match function.as_str() {
                    "DllUnregisterServer" => format!("UnRegDLL {}", dll).into(),
                    "DllRegisterServer" => format!("RegDLL {}", dll).into(),
                    _ => {
                        let flag = if no_unload { "/NOUNLOAD" } else { "" };
                        words(&["CallInstDLL".to_string(), dll, flag.to_string(), quote_if_needed(&function)]).into()
                    }
                }
            }
            Op::CreateShortcut {
                link,
                target,
                params,
                icon_file,
                packed,
                description,
            } => {
                let f = ShortcutFlags::from_packed(packed as u32);
                let mut args = vec![
                    self.s(link),
                    self.s(target),
                    self.s(params),
                    self.s(icon_file),
                    f.icon_index.to_string(),
                    f.show_name().to_string(),
                    f.hotkey(),
                    self.s(description),
                ];
                if f.icon_index == 0 && args[5..].iter().all(String::is_empty) {
                    args[4].clear();
                }
                format!("CreateShortCut {}", positional(&args)).into()
            }
            Op::CopyFiles { from, to, flags } => {
                let silent = if flags & FOF_SILENT != 0 { "/SILENT" } else { "" };
                let files_only = if flags & FOF_FILESONLY != 0 { "/FILESONLY" } else { "" };
                words(&[
                    "CopyFiles".to_string(),
                    silent.to_string(),
                    files_only.to_string(),
                    self.s(from),
                    self.s(to),
                ])
                .into()
            }
            Op::Reboot { magic } => {
                if magic == REBOOT_MAGIC {
                    "Reboot".into()
                } else {
                    Rendered::with_comment("Reboot", "Installation corrupted")
                }
            }
            Op::WriteIni {
                section,
                key,
                value,
                file,
                write,
            } => {
                let file = self.s(file);
                if write {
                    let (s, k, v) = (self.s(section), self.s(key), self.sq(value));
                    format!("WriteINIStr {} {} {} {}", file, s, k, v).into()
                } else if value == 0 && key != 0 {
                    format!("DeleteINIStr {} {} {}", file, self.s(section), self.s(key)).into()
                } else if key == 0 && section != 0 {
                    format!("DeleteINISec {} {}", file, self.s(section)).into()
                } else {
                    format!("FlushINI {}", file).into()
                }
            }
            Op::ReadIniStr {
                output,
                section,
                key,
                file,
            } => {
                let out = self.v(output);
                format!("ReadINIStr {} {} {} {}", out, self.s(file), self.s(section), self.s(key)).into()
            }
            Op::DeleteReg { root, key, value, mode } => {
                let root = root_key(root);
                let key = self.sq(key);
                if value == 0 {
                    let flag = if mode == 3 { "/ifempty" } else { "" };
                    words(&["DeleteRegKey".to_string(), flag.to_string(), root, key]).into()
                } else {
                    format!("DeleteRegValue {} {} {}", root, key, self.sq(value)).into()
                }
            }
            Op::WriteReg {
                root,
                key,
                name,
                data,
                kind,
            } => {
                let cmd = match kind {
                    REG_SZ => "Str",
                    REG_EXPAND_SZ => "ExpandStr",
                    REG_BINARY => "Bin",
                    REG_DWORD => "DWORD",
                    _ => return Err(NsiError::UnsupportedOpcode(entry.which)),
                };
                let root = root_key(root);
                let (key, name) = (self.sq(key), self.sq(name));
                let data = match (kind, self.generation()) {
                    (REG_BINARY, Generation::V3) => self.strings.raw_hex(data),
                    (REG_BINARY, _) => format!("{:X}", data as u32),
                    (REG_DWORD, _) => self.s(data),
                    _ => self.sq(data),
                };
                format!("WriteReg{} {} {} {} {}", cmd, root, key, name, data).into()
            }
            Op::ReadReg {
                output,
                root,
                key,
                name,
                kind,
            } => {
                let cmd = match kind {
                    0 => "Str",
                    1 => "DWORD",
                    _ => return Err(NsiError::UnsupportedOpcode(entry.which)),
                };
                let out = self.v(output);
                let root = root_key(root);
                format!("ReadReg{} {} {} {} {}", cmd, out, root, self.sq(key), self.sq(name)).into()
            }
            Op::RegEnum {
                output,
                root,
                key,
                index,
                keys,
            } => {
                let cmd = if keys { "EnumRegKey" } else { "EnumRegValue" };
                let out = self.v(output);
                let root = root_key(root);
                format!("{} {} {} {} {}", cmd, out, root, self.sq(key), self.sq(index)).into()
            }
            Op::FileClose { handle } => format!("FileClose {}", self.v(handle)).into(),
            Op::FileOpen { output, mode, file, .. } => {
                let out = self.v(output);
                let file = self.s(file);
                format!("FileOpen {} {} {}", out, file, enum_token(mode as i64 - 2, &OPEN_MODES, "")).into()
            }
            Op::FileWrite {
                handle,
                data,
                single,
                wide,
            } => {
                let cmd = match (wide, single) {
                    (false, false) => "FileWrite",
                    (false, true) => "FileWriteByte",
                    (true, false) => "FileWriteUTF16LE",
                    (true, true) => "FileWriteWord",
                };
                format!("{} {} {}", cmd, self.v(handle), self.sq(data)).into()
            }
            Op::FileRead {
                handle,
                output,
                max_len,
                single,
                wide,
            } => {
                let cmd = match (wide, single) {
                    (false, false) => "FileRead",
                    (false, true) => "FileReadByte",
                    (true, false) => "FileReadUTF16LE",
                    (true, true) => "FileReadWord",
                };
                let (h, out) = (self.v(handle), self.v(output));
                let len = if single { String::new() } else { self.s(max_len) };
                words(&[cmd.to_string(), h, out, len]).into()
            }
            Op::FileSeek {
                handle,
                output,
                offset,
                mode,
            } => {
                let h = self.v(handle);
                let offset = self.sq(offset);
                let mut mode = enum_token(mode as i64, &SEEK_MODES, "");
                let out = if output >= 0 { self.v(output) } else { String::new() };
                if mode.is_empty() && !out.is_empty() {
                    mode = "SET".to_string();
                }
                words(&["FileSeek".to_string(), h, offset, mode, out]).into()
            }
            Op::FindClose { handle } => format!("FindClose {}", self.v(handle)).into(),
            Op::FindNext { output, handle } => format!("FindNext {} {}", self.v(handle), self.v(output)).into(),
            Op::FindFirst {
                output,
                handle,
                pattern,
            } => {
                let (h, out) = (self.v(handle), self.v(output));
                format!("FindFirst {} {} {}", h, out, self.s(pattern)).into()
            }
            Op::WriteUninstaller {
                name,
                data_offset,
                icon_offset,
                ..
            } => {
                let mark = if self.options.comment_out_uninstaller { "; " } else { "" };
                Rendered::with_comment(
                    format!("{}WriteUninstaller {}", mark, self.s(name)),
                    format!("data offset: 0x{:X}  icon offset: 0x{:X}", data_offset, icon_offset),
                )
            }
            Op::SectionSet {
                section,
                value,
                field,
                text,
            } => {
                let what = match field {
                    0 | -1 => "Text",
                    1 | -2 => "InstTypes",
                    2 | -3 => "Flags",
                    5 | -6 => "Size",
                    _ => return Err(NsiError::UnsupportedOpcode(entry.which)),
                };
                let sec = self.section_ref(section)?;
                if field >= 0 {
                    format!("SectionGet{} {} {}", what, sec, self.v(value)).into()
                } else {
                    let arg = if what == "Text" { self.sq(text) } else { self.sq(value) };
                    format!("SectionSet{} {} {}", what, sec, arg).into()
                }
            }
            Op::InstTypeSet {
                index,
                value,
                set,
                current,
            } => match (current, set) {
                (0, 0) => format!("InstTypeGetText {} {}", self.s(index), self.v(value)).into(),
                (0, 1) => format!("InstTypeSetText {} {}", self.s(index), self.sq(value)).into(),
                (1, 1) => format!("SetCurInstType {}", self.s(index)).into(),
                (1, 0) => format!("GetCurInstType {}", self.v(value)).into(),
                _ => return Err(NsiError::UnsupportedOpcode(entry.which)),
            },
            Op::GetLabelAddress { output, target } => {
                let out = self.v(output);
                format!("GetLabelAddress {} {}", out, self.label(target)).into()
            }
            Op::GetFunctionAddress { output, target } => {
                let out = self.v(output);
                format!("GetFunctionAddress {} {}", out, self.func(target)).into()
            }
            Op::LockWindow { off } => format!("LockWindow {}", enum_token(off as i64, &["on", "off"], "")).into(),
        };
        Ok(r)
    }

    /// A flag operand as a name from `names`. Operands that are not numbers (`$0`) keep their text.
    fn flag_value(&mut self, value: Str, names: &[&str]) -> String {
        match self.strings.int(value) {
            Ok(v) => enum_token(v, names, ""),
            Err(_) => self.s(value),
        }
    }

    fn set_flag(&mut self, entry: &Entry, flag: i32, value: Str, mode: i32) -> Result<Rendered, NsiError> {
        let r: Rendered = match flag {
            EXEC_FLAG_ERROR => match self.strings.int(value) {
                Ok(0) => "ClearErrors".into(),
                Ok(_) => "SetErrors".into(),
                Err(_) => Rendered::with_comment("SetErrors", format!("error flag set from {}", self.s(value))),
            },
            EXEC_FLAG_ERRLVL => format!("SetErrorLevel {}", self.flag_value(value, &[])).into(),
            EXEC_FLAG_REBOOT => format!("SetRebootFlag {}", self.flag_value(value, &["false", "true"])).into(),
            EXEC_FLAG_SILENT => format!("SetSilent {}", self.flag_value(value, &["normal", "silent"])).into(),
            EXEC_FLAG_ALL_USER_VAR => {
                format!("SetShellVarContext {}", self.flag_value(value, &["current", "all"])).into()
            }
            EXEC_FLAG_AUTOCLOSE => format!("SetAutoClose {}", self.flag_value(value, &["false", "true"])).into(),
            EXEC_FLAG_REG_VIEW => {
                let view = if mode == 1 {
                    "lastused".to_string()
                } else {
                    match self.strings.int(value) {
                        Ok(KEY_WOW64_64KEY) => "64".to_string(),
                        Ok(KEY_WOW64_32KEY) => "32".to_string(),
                        Ok(0) => "default".to_string(),
                        Ok(v) => v.to_string(),
                        Err(_) => self.s(value),
                    }
                };
                format!("SetRegView {}", view).into()
            }
            EXEC_FLAG_STATUS_UPDATE => {
                let level = if mode == 1 {
                    "lastused".to_string()
                } else {
                    match self.strings.int(value) {
                        Ok(v) => enum_token(v >> 1, &DETAILS_PRINT, ""),
                        Err(_) => self.s(value),
                    }
                };
                format!("SetDetailsPrint {}", level).into()
            }
            _ => return Err(NsiError::UnsupportedOpcode(entry.which)),
        };
        Ok(r)
    }

    fn extract_file(
        &mut self,
        flags: i32,
        name: Str,
        data_offset: i32,
        time_low: i32,
        time_high: i32,
        message: Str,
    ) -> Rendered {
        let overwrite = (flags & 7) as u8;
        let mut mb = (flags as u32) >> 3;
        if mb & EXTRACT_IDCANCEL != 0 {
            mb &= !EXTRACT_IDCANCEL;
            mb |= 2;
        }
        let overwrite_text = enum_token(overwrite as i64, &OVERWRITE_MODES, "");

        let mut statement = String::new();
        if self.state.current_overwrite_mode != Some(overwrite) {
            statement.push_str(&format!("SetOverwrite {}\n", overwrite_text));
            self.state.current_overwrite_mode = Some(overwrite);
        }
        statement.push_str(&format!("File {}", self.sq(name)));

        let modified = filetime_to_string(filetime(time_low, time_high));
        let msg = self.s(message);
        let comment = format!(
            "data offset: 0x{:X}  SetOverwrite {}  MB: {:x} - {}  Time: {}  msg: {}",
            data_offset,
            overwrite_text,
            mb,
            mb_style(mb),
            modified.as_deref().unwrap_or(""),
            msg
        );

        let file = ExtractedFile {
            name: self.strings.raw(name),
            out_dir: self.out_dir.clone(),
            data_offset: data_offset as u32,
            modified,
        };
        self.files.push(file);
        Rendered::with_comment(statement, comment.trim_end())
    }

    fn send_message(&mut self, output: Var, hwnd: Str, msg: Str, wparam: Str, lparam: Str, flags: i32) -> Rendered {
        let hwnd = self.s(hwnd);
        let msg = self.s(msg);
        let msg_name = parse_int(&msg).ok().and_then(window_message_name);

        let string_params = flags & 3;
        let wparam = if string_params == 1 {
            quote_if_needed(&format!("STR:{}", self.strings.raw(wparam)))
        } else {
            self.sq(wparam)
        };
        let lparam = if string_params == 2 {
            quote_if_needed(&format!("STR:{}", self.strings.raw(lparam)))
        } else {
            self.sq(lparam)
        };
        let out = if output >= 0 { self.v(output) } else { String::new() };
        let timeout = flags >> 2;
        let timeout = if timeout != 0 { format!("/TIMEOUT={}", timeout) } else { String::new() };

        let statement = words(&["SendMessage".to_string(), hwnd, msg, wparam, lparam, out, timeout]);
        Rendered::with_comment(statement, msg_name.unwrap_or(""))
    }

    /// A `ShowWindow ... 5` is usually followed by a `BringToFront` emitted by the same
    /// script command; that follower is marked skipped. Best effort only.
    fn skip_bring_to_front(&mut self, pos: usize) {
        let next = self.installer.entries.get(pos + 1).map(|e| e.which);
        match next.and_then(opcode_of) {
            Some(Opcode::BRINGTOFRONT) => self.state.skipped[pos + 1] = true,
            _ => log::warn!(
                "instruction {:#x}: expected BringToFront after ShowWindow, found {:?}",
                self.index,
                next
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Heap(Vec<u8>);

    impl Heap {
        fn new() -> Self {
            Heap(vec![0])
        }

        fn add(&mut self, s: &[u8]) -> i32 {
            let at = self.0.len() as i32;
            self.0.extend_from_slice(s);
            self.0.push(0);
            at
        }

        fn var(&mut self, slot: u8) -> i32 {
            self.add(&[253, slot | 0x80, 0x80])
        }
    }

    fn render(heap: Heap, entries: Vec<Entry>) -> Vec<(String, String)> {
        let inst = Installer {
            entries,
            strings: heap.0,
            ..Default::default()
        };
        let opts = DecompileOptions {
            generation: Generation::V2,
            ..Default::default()
        };
        let mut d = Decompiler::new(&inst, &opts);
        d.run();
        d.state.decomps.iter().cloned().zip(d.state.comments.iter().cloned()).collect()
    }

    fn statements(heap: Heap, entries: Vec<Entry>) -> Vec<String> {
        render(heap, entries).into_iter().map(|(s, _)| s).collect()
    }

    fn e(op: Opcode, offsets: [i32; 6]) -> Entry {
        Entry::new(op as u32, offsets)
    }

    #[test]
    fn test_message_box() {
        let mut h = Heap::new();
        let text = h.add(b"Continue?");
        let style = 4 | 0x20 | (7 << 21);
        let out = statements(h, vec![e(Opcode::MESSAGEBOX, [style, text, 6, 3, 0, 0])]);
        assert_eq!(out, vec!["MessageBox MB_YESNO|MB_ICONQUESTION Continue? /SD IDNO IDYES +2"]);
    }

    #[test]
    fn test_comparisons_and_arithmetic() {
        let mut h = Heap::new();
        let r0 = h.var(0);
        let r1 = h.var(1);
        let five = h.add(b"5");
        let all_bits = h.add(b"0xFFFFFFFF");
        let out = statements(
            h,
            vec![
                e(Opcode::INTCMP, [r0, five, 3, 0, 0, 0]),
                e(Opcode::INTCMP, [r0, five, 0, 1, 0, 1]),
                e(Opcode::INTOP, [0, r1, all_bits, 6, 0, 0]),
                e(Opcode::INTOP, [0, r1, five, 0, 0, 0]),
            ],
        );
        assert_eq!(
            out,
            vec![
                "IntCmp $0 5 label_2",
                "IntCmpU $0 5 0 label_0",
                "IntOp $0 $1 ~",
                "IntOp $0 $1 + 5",
            ]
        );
    }

    #[test]
    fn test_set_flag_variants() {
        let mut h = Heap::new();
        let zero = h.add(b"0");
        let one = h.add(b"1");
        let view = h.add(b"256");
        let four = h.add(b"4");
        let out = statements(
            h,
            vec![
                e(Opcode::SETFLAG, [2, zero, 0, 0, 0, 0]),
                e(Opcode::SETFLAG, [2, one, 0, 0, 0, 0]),
                e(Opcode::SETFLAG, [12, view, 0, 0, 0, 0]),
                e(Opcode::SETFLAG, [12, 0, 1, 0, 0, 0]),
                e(Opcode::SETFLAG, [13, four, 0, 0, 0, 0]),
                e(Opcode::SETFLAG, [1, one, 0, 0, 0, 0]),
            ],
        );
        assert_eq!(
            out,
            vec![
                "ClearErrors",
                "SetErrors",
                "SetRegView 64",
                "SetRegView lastused",
                "SetDetailsPrint listonly",
                "SetShellVarContext all",
            ]
        );
    }

    #[test]
    fn test_registry_and_files() {
        let mut h = Heap::new();
        let key = h.add(b"Software\\X");
        let name = h.add(b"Data");
        let file = h.add(b"C:\\f.txt");
        let out = statements(
            h,
            vec![
                e(Opcode::WRITEREG, [1, key, name, 0x1234, 0, 3]),
                e(Opcode::FOPEN, [2, 0, 3, file, 0, 0]),
                e(Opcode::FSEEK, [2, 3, 0, 2, 0, 0]),
                e(Opcode::PUSHPOP, [0, 0, 2, 0, 0, 0]),
            ],
        );
        assert_eq!(
            out,
            vec![
                "WriteRegBin HKCU Software\\X Data 1234",
                "FileOpen $2 C:\\f.txt r",
                "FileSeek $2 \"\" END $3",
                "Exch 2",
            ]
        );
    }

    #[test]
    fn test_current_address() {
        let mut h = Heap::new();
        let here = h.add(b"1");
        let out = statements(h, vec![e(Opcode::ASSIGNVAR, [0, here, 0, 0, 0, 0])]);
        assert_eq!(out, vec!["GetCurrentAddress $0"]);
    }

    #[test]
    fn test_send_message() {
        let mut h = Heap::new();
        let hwnd = h.var(29);
        let msg = h.add(b"0x000C");
        let text = h.add(b"hi");
        let flags = 2 | (1000 << 2);
        let out = render(h, vec![e(Opcode::SENDMESSAGE, [-1, hwnd, msg, 0, text, flags])]);
        assert_eq!(
            out,
            vec![(
                "SendMessage $HWNDPARENT 0x000C \"\" STR:hi /TIMEOUT=1000".to_string(),
                "WM_SETTEXT".to_string()
            )]
        );
    }

    #[test]
    fn test_invalid_and_unsupported() {
        let out = render(
            Heap::new(),
            vec![Entry::new(200, [0; 6]), e(Opcode::WRITEREG, [2, 0, 0, 0, 0, 9])],
        );
        assert_eq!(out[0], (String::new(), "INVALID_OPCODE:c8 @ 0x1".to_string()));
        assert_eq!(out[1].0, NOT_IMPLEMENTED);
        assert!(out[1].1.starts_with("unsupported opcode: 0x33: "));
        assert!(out[1].1.contains("EW_WRITEREG"));
    }

    #[test]
    fn test_set_flag_from_variable() {
        let mut h = Heap::new();
        let r0 = h.var(0);
        let out = render(
            h,
            vec![
                e(Opcode::SETFLAG, [11, r0, 0, 0, 0, 0]),
                e(Opcode::SETFLAG, [1, r0, 0, 0, 0, 0]),
                e(Opcode::SETFLAG, [2, r0, 0, 0, 0, 0]),
            ],
        );
        assert_eq!(out[0], ("SetErrorLevel $0".to_string(), String::new()));
        assert_eq!(out[1], ("SetShellVarContext $0".to_string(), String::new()));
        assert_eq!(out[2], ("SetErrors".to_string(), "error flag set from $0".to_string()));
    }

    #[test]
    fn test_ini_commands() {
        let mut h = Heap::new();
        let section = h.add(b"Main");
        let key = h.add(b"Path");
        let value = h.add(b"C:\\App");
        let file = h.add(b"C:\\app.ini");
        let out = statements(
            h,
            vec![
                e(Opcode::WRITEINI, [section, key, value, file, 1, 0]),
                e(Opcode::WRITEINI, [section, key, 0, file, 0, 0]),
                e(Opcode::WRITEINI, [section, 0, 0, file, 0, 0]),
                e(Opcode::WRITEINI, [0, 0, 0, file, 0, 0]),
                e(Opcode::READINISTR, [1, section, key, file, 0, 0]),
            ],
        );
        assert_eq!(
            out,
            vec![
                "WriteINIStr C:\\app.ini Main Path C:\\App",
                "DeleteINIStr C:\\app.ini Main Path",
                "DeleteINISec C:\\app.ini Main",
                "FlushINI C:\\app.ini",
                "ReadINIStr $1 C:\\app.ini Main Path",
            ]
        );
    }

    #[test]
    fn test_create_shortcut() {
        let mut h = Heap::new();
        let link = h.add(b"C:\\App.lnk");
        let target = h.add(b"C:\\app.exe");
        let icon = h.add(b"C:\\app.ico");
        let packed = 5 | (3 << 8) | (0x71 << 16) | (4 << 24);
        let out = statements(
            h,
            vec![
                e(Opcode::CREATESHORTCUT, [link, target, 0, icon, packed, 0]),
                e(Opcode::CREATESHORTCUT, [link, target, 0, 0, 0, 0]),
            ],
        );
        assert_eq!(
            out,
            vec![
                "CreateShortCut C:\\App.lnk C:\\app.exe \"\" C:\\app.ico 5 SW_SHOWMAXIMIZED ALT|F2",
                "CreateShortCut C:\\App.lnk C:\\app.exe",
            ]
        );
    }

    #[test]
    fn test_file_read_and_write_variants() {
        let mut h = Heap::new();
        let len = h.add(b"10");
        let data = h.add(b"hi");
        let out = statements(
            h,
            vec![
                e(Opcode::FGETS, [0, 1, len, 0, 0, 0]),
                e(Opcode::FGETS, [0, 1, 0, 1, 0, 0]),
                e(Opcode::FGETWS, [0, 1, len, 0, 0, 0]),
                e(Opcode::FGETWS, [0, 1, 0, 1, 0, 0]),
                e(Opcode::FPUTS, [0, data, 0, 0, 0, 0]),
                e(Opcode::FPUTS, [0, data, 1, 0, 0, 0]),
                e(Opcode::FPUTWS, [0, data, 0, 0, 0, 0]),
                e(Opcode::FPUTWS, [0, data, 1, 0, 0, 0]),
            ],
        );
        assert_eq!(
            out,
            vec![
                "FileRead $0 $1 10",
                "FileReadByte $0 $1",
                "FileReadUTF16LE $0 $1 10",
                "FileReadWord $0 $1",
                "FileWrite $0 hi",
                "FileWriteByte $0 hi",
                "FileWriteUTF16LE $0 hi",
                "FileWriteWord $0 hi",
            ]
        );
    }

    #[test]
    fn test_extract_file_with_cancel_bit() {
        let mut h = Heap::new();
        let name = h.add(b"a.txt");
        let flags = 1 | ((EXTRACT_IDCANCEL as i32) << 3);
        let out = render(h, vec![e(Opcode::EXTRACTFILE, [flags, name, 0x10, 0, 0, 0])]);
        assert_eq!(out[0].0, "SetOverwrite off\nFile a.txt");
        assert_eq!(out[0].1, "data offset: 0x10  SetOverwrite off  MB: 2 - MB_ABORTRETRYIGNORE  Time:   msg:");
    }
}
