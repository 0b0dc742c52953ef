//! The `fls` launcher: run a script file, or read one line at a time in an
//! interactive session.
//!
//! Exit codes: 0 on success, 64 for usage errors, 65 for compile errors,
//! 70 for runtime or preflight errors, 74 for unreadable script files.

use std::path::{Path, PathBuf};
use std::process::exit;

use clap::Parser;
use clap::error::ErrorKind;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use fls::{Error, Vm};

/// Script files above this size are refused.
const MAX_SCRIPT_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "fls", version, about = "A small scripting language with a preflight profiler")]
struct Cli {
    /// Vet the script with the preflight profiler before running it.
    #[arg(long)]
    preflight: bool,

    /// Script to run. Omit to start an interactive session.
    path: Option<PathBuf>,
}

fn main() {
    let filter = EnvFilter::try_from_env("FLS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            exit(0);
        }
        Err(err) => {
            let _ = err.print();
            exit(64);
        }
    };

    let mut vm = Vm::new();
    vm.set_preflight(cli.preflight);

    match cli.path {
        Some(path) => run_file(&mut vm, &path),
        None => {
            if cli.preflight {
                eprintln!("Usage: fls [--preflight] [path]");
                exit(64);
            }
            repl(&mut vm);
        }
    }
}

fn run_file(vm: &mut Vm, path: &Path) {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > MAX_SCRIPT_BYTES => {
            eprintln!("Invalid file size for \"{}\".", path.display());
            exit(74);
        }
        Err(_) => {
            eprintln!("Could not open file \"{}\".", path.display());
            exit(74);
        }
        Ok(_) => {}
    }

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => {
            eprintln!("Could not read file \"{}\".", path.display());
            exit(74);
        }
    };
    let source = String::from_utf8_lossy(&bytes);

    match vm.interpret(&path.to_string_lossy(), &source) {
        Ok(()) => {}
        Err(Error::Compile) => exit(65),
        Err(Error::Runtime(_)) | Err(Error::Preflight(_)) => exit(70),
    }
}

/// One line at a time; interpreter errors are reported and the loop keeps
/// accepting input.
fn repl(vm: &mut Vm) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Could not start interactive session: {}", err);
            exit(74);
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                let _ = vm.interpret("<REPL>", &line);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{}", err);
                break;
            }
        }
    }
}
