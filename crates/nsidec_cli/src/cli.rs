use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_name, crate_version};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GenerationCli {
    Auto,
    V2,
    V3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WidthCli {
    Auto,
    Narrow,
    Wide,
}

#[derive(Parser)]
#[command(name = crate_name!(),
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    /// Log debug details to stderr
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Decompiles an installer header block into a script
    Decompile {
        #[command(subcommand)]
        command: DecompileCommand,
    },
    /// Lists the files an installer extracts, as JSON
    Files {
        /// Path to the decompressed header block
        path: PathBuf,

        #[command(flatten)]
        input: InputArgs,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum DecompileCommand {
    /// Decompiles a decompressed header block
    File {
        /// Path to the decompressed header block
        path: PathBuf,

        /// Write the script here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        input: InputArgs,

        /// Comment out instructions that are not inside any section
        #[arg(long, default_value_t = false)]
        suppress_outside_sections: bool,

        /// Leave out the raw opcode dump above every statement
        #[arg(long, default_value_t = false)]
        no_raw_tokens: bool,

        /// Comment out WriteUninstaller statements
        #[arg(long, default_value_t = false)]
        comment_out_uninstaller: bool,
    },
}

#[derive(Args)]
pub struct InputArgs {
    /// Select string heap generation (default: auto-detect)
    #[arg(long, value_enum, default_value_t = GenerationCli::Auto)]
    pub generation: GenerationCli,

    /// Select string character width (default: infer from the section records)
    #[arg(long, value_enum, default_value_t = WidthCli::Auto)]
    pub width: WidthCli,
}
