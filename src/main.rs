use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use niflheim::codegen::{self, ir::ResolvedModule};

#[derive(Parser)]
#[command(name = "niflheim")]
#[command(about = "Niflheim compiler backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit x86-64 assembly for a resolved module (JSON from the front end)
    Emit {
        /// Resolved-module JSON file
        file: PathBuf,
        /// Output path; defaults to the input with a .s extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Emit { file, output } => {
            if let Err(e) = emit_file(&file, output) {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

fn emit_file(path: &PathBuf, output: Option<PathBuf>) -> Result<(), String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("error: could not read file '{}': {}", path.display(), e))?;

    let module: ResolvedModule = serde_json::from_str(&source)
        .map_err(|e| format!("error: invalid resolved module '{}': {}", path.display(), e))?;

    let asm = codegen::emit_module(&module)?;

    let output = output.unwrap_or_else(|| path.with_extension("s"));
    std::fs::write(&output, asm)
        .map_err(|e| format!("error: could not write '{}': {}", output.display(), e))?;

    Ok(())
}
