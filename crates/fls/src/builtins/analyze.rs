//! `analyze(root, extensions, [logLevel], [excludedDirs])`: a multithreaded
//! directory analyzer.
//!
//! The calling thread walks the tree and feeds file paths into a bounded
//! queue; a pool of workers drains it, counting files, lines, and bytes per
//! thread. The pool is joined before the native returns, so from the
//! interpreter's perspective the call is synchronous. Returns
//! `[files, lines, chars]`.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;

use super::{NativeResult, list_arg, string_arg};
use crate::error::RuntimeFault;
use crate::value::Value;
use crate::vm::Vm;

const QUEUE_CAPACITY: usize = 4096;
const MAX_WORKERS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LogLevel {
    None,
    Minimal,
    Verbose,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    files: u64,
    lines: u64,
    chars: u64,
}

pub(crate) fn register(vm: &mut Vm) {
    vm.define_native("analyze", analyze);
}

fn analyze(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() < 2 || args.len() > 4 {
        return Err(RuntimeFault::new(
            "analyze() takes 2-4 arguments (root_dir, extensions, [log_level], [excluded_dirs]).",
        ));
    }
    let root = string_arg(args, 0, "First argument must be a string (root_dir).")?
        .as_str()
        .to_string();
    let extensions: Vec<String> = list_arg(args, 1, "Second argument must be a list (extensions_list).")?
        .items
        .borrow()
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.as_str().to_string()))
        .collect();

    let mut level = LogLevel::Minimal;
    if args.len() >= 3 {
        let name = string_arg(args, 2, "Third argument (log_level) must be a string.")?;
        level = match name.as_str() {
            "none" => LogLevel::None,
            "minimal" => LogLevel::Minimal,
            "verbose" => LogLevel::Verbose,
            _ => {
                return Err(RuntimeFault::new(
                    "Invalid log level. Use 'none', 'minimal', or 'verbose'.",
                ));
            }
        };
    }

    let mut excluded: Vec<String> = Vec::new();
    if args.len() == 4 {
        excluded = list_arg(args, 3, "Fourth argument (excluded_dirs) must be a list.")?
            .items
            .borrow()
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.as_str().to_string()))
            .collect();
    }

    // The preflight run keeps the analysis quiet.
    if vm.is_profiling() {
        level = LogLevel::None;
    }

    let total = run_pool(&root, &extensions, &excluded, level);

    let list = vm.new_list();
    vm.list_push(&list, Value::Number(total.files as f64));
    vm.list_push(&list, Value::Number(total.lines as f64));
    vm.list_push(&list, Value::Number(total.chars as f64));
    Ok(Value::List(list))
}

fn run_pool(root: &str, extensions: &[String], excluded: &[String], level: LogLevel) -> Tally {
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .min(MAX_WORKERS);

    let (tx, rx) = mpsc::sync_channel::<PathBuf>(QUEUE_CAPACITY);
    let rx = Arc::new(Mutex::new(rx));

    let mut total = Tally::default();
    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let rx = Arc::clone(&rx);
                scope.spawn(move || worker(&rx, level))
            })
            .collect();

        walk(Path::new(root), &tx, extensions, excluded, 0, level);
        drop(tx);

        for handle in handles {
            let tally = handle.join().unwrap_or_default();
            total.files += tally.files;
            total.lines += tally.lines;
            total.chars += tally.chars;
        }
    });
    total
}

fn worker(queue: &Mutex<Receiver<PathBuf>>, level: LogLevel) -> Tally {
    let mut tally = Tally::default();
    loop {
        let task = match queue.lock() {
            Ok(receiver) => receiver.recv(),
            Err(_) => break,
        };
        match task {
            Ok(path) => analyze_file(&path, &mut tally, level),
            Err(_) => break,
        }
    }
    tally
}

fn analyze_file(path: &Path, tally: &mut Tally, level: LogLevel) {
    if level == LogLevel::Verbose {
        println!("    -> Analyzing: {}", path.display());
    }

    let Ok(bytes) = std::fs::read(path) else {
        return;
    };

    let mut lines = if bytes.is_empty() { 0u64 } else { 1 };
    for &byte in &bytes {
        if byte == b'\n' {
            lines += 1;
        }
    }
    if bytes.last() == Some(&b'\n') {
        lines -= 1;
    }

    tally.files += 1;
    tally.lines += lines;
    tally.chars += bytes.len() as u64;
}

fn is_excluded(path: &Path, excluded: &[String]) -> bool {
    let text = path.to_string_lossy();
    excluded.iter().any(|prefix| {
        text.strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

fn has_valid_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return false,
    };
    let Some(dot) = name.rfind('.') else {
        return false;
    };
    let suffix = &name[dot..];
    extensions.iter().any(|ext| ext == suffix)
}

fn walk(
    dir: &Path,
    queue: &SyncSender<PathBuf>,
    extensions: &[String],
    excluded: &[String],
    depth: usize,
    level: LogLevel,
) {
    if is_excluded(dir, excluded) {
        if level >= LogLevel::Minimal {
            println!("   -> Skipping excluded directory: {}", dir.display());
        }
        return;
    }

    if level >= LogLevel::Minimal && depth < 3 {
        println!("{}-> Scanning {}...", "  ".repeat(depth), dir.display());
    }

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            walk(&path, queue, extensions, excluded, depth + 1, level);
        } else if has_valid_extension(&path, extensions) {
            // Backpressure: send blocks while the queue is full.
            if queue.send(path).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter() {
        let exts = vec![".rs".to_string(), ".fls".to_string()];
        assert!(has_valid_extension(Path::new("a/b/main.rs"), &exts));
        assert!(has_valid_extension(Path::new("mod.fls"), &exts));
        assert!(!has_valid_extension(Path::new("main.c"), &exts));
        assert!(!has_valid_extension(Path::new("Makefile"), &exts));
        // No filter accepts everything.
        assert!(has_valid_extension(Path::new("Makefile"), &[]));
    }

    #[test]
    fn exclusion_is_a_path_prefix_match() {
        let excluded = vec!["root/skip".to_string()];
        assert!(is_excluded(Path::new("root/skip"), &excluded));
        assert!(is_excluded(Path::new("root/skip/deep"), &excluded));
        assert!(!is_excluded(Path::new("root/skipped"), &excluded));
        assert!(!is_excluded(Path::new("root/keep"), &excluded));
    }

    #[test]
    fn counts_files_lines_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "three").unwrap();
        std::fs::write(dir.path().join("skip.bin"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), "four\nfive").unwrap();

        let tally = run_pool(
            &dir.path().to_string_lossy(),
            &[".txt".to_string()],
            &[],
            LogLevel::None,
        );
        assert_eq!(tally.files, 3);
        assert_eq!(tally.lines, 2 + 1 + 2);
        assert_eq!(tally.chars, 8 + 5 + 9);
    }
}
