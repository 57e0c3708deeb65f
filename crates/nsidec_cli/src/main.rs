use std::path::Path;

use clap::{CommandFactory, Parser};
use nsidec_lib::{DecompileOptions, Generation, Installer, Width};

use crate::cli::{Cli, DecompileCommand, GenerationCli, InputArgs, TopLevel, WidthCli};

mod cli;

fn load(path: &Path, input: &InputArgs) -> Installer {
    let width = match input.width {
        WidthCli::Auto => Width::Auto,
        WidthCli::Narrow => Width::Narrow,
        WidthCli::Wide => Width::Wide,
    };
    match std::fs::read(path) {
        Ok(bytes) => match Installer::parse(&bytes, width) {
            Ok(installer) => installer,
            Err(e) => {
                eprintln!("failed to parse {path:?}: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("failed to read {path:?}: {e}");
            std::process::exit(1);
        }
    }
}

fn generation(input: &InputArgs) -> Generation {
    match input.generation {
        GenerationCli::Auto => Generation::Auto,
        GenerationCli::V2 => Generation::V2,
        GenerationCli::V3 => Generation::V3,
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Some(TopLevel::Decompile { command }) => match command {
            DecompileCommand::File {
                path,
                output,
                input,
                suppress_outside_sections,
                no_raw_tokens,
                comment_out_uninstaller,
            } => {
                let installer = load(&path, &input);
                let options = DecompileOptions {
                    generation: generation(&input),
                    suppress_outside_sections,
                    raw_tokens: !no_raw_tokens,
                    comment_out_uninstaller,
                };
                match nsidec_lib::decompile(&installer, &options) {
                    Ok(out) => {
                        let mut script = out.to_script();
                        script.push('\n');
                        match output {
                            Some(out_path) => {
                                if let Err(e) = std::fs::write(&out_path, script) {
                                    eprintln!("failed to write {out_path:?}: {e}");
                                    std::process::exit(1);
                                }
                                log::info!("wrote {} lines to {:?}", out.lines.len(), out_path);
                            }
                            None => print!("{script}"),
                        }
                    }
                    Err(e) => {
                        eprintln!("decompile error: {e}");
                        std::process::exit(1);
                    }
                }
            }
        },
        Some(TopLevel::Files { path, input }) => {
            let installer = load(&path, &input);
            let options = DecompileOptions {
                generation: generation(&input),
                ..Default::default()
            };
            match nsidec_lib::decompile(&installer, &options) {
                Ok(out) => match serde_json::to_string_pretty(&out.files) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("failed to serialize file list: {e}");
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    eprintln!("decompile error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        None => {
            Cli::command().print_help().unwrap();
        }
    }
}
