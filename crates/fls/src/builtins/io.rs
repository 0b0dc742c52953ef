//! Console and filesystem natives.
//!
//! During a preflight run the side-effecting natives are elided: prints are
//! counted, `input` reads nothing and returns an empty string, and the
//! file-mutating operations report success without touching the disk.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, Write as _};
use std::process::Command;

use super::{NativeResult, expect_arity, string_arg};
use crate::error::RuntimeFault;
use crate::value::Value;
use crate::vm::Vm;

pub(crate) fn register(vm: &mut Vm) {
    vm.define_native("clock", clock);
    vm.define_native("input", input);
    vm.define_native("print", print);
    vm.define_native("println", println);
    vm.define_native("system", system);

    vm.define_native("readFile", read_file);
    vm.define_native("writeFile", write_file);
    vm.define_native("appendFile", append_file);
    vm.define_native("pathExists", path_exists);
    vm.define_native("deleteFile", delete_file);
    vm.define_native("rename", rename);
    vm.define_native("createDir", create_dir);
    vm.define_native("removeDir", remove_dir);
    vm.define_native("fileSize", file_size);
    vm.define_native("isDir", is_dir);
    vm.define_native("isFile", is_file);
    vm.define_native("listDir", list_dir);
}

fn clock(vm: &mut Vm, _args: &[Value]) -> NativeResult {
    Ok(Value::Number(vm.clock_seconds()))
}

fn print(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let mut text = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            text.push(' ');
        }
        text.push_str(&arg.to_string());
    }
    vm.print_text(&text);
    Ok(Value::Nil)
}

fn println(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let mut text = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            text.push(' ');
        }
        text.push_str(&arg.to_string());
    }
    text.push('\n');
    vm.print_text(&text);
    Ok(Value::Nil)
}

/// Read one line from standard input, with an optional prompt.
fn input(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() > 1 {
        return Err(RuntimeFault::new(format!(
            "input() takes at most 1 argument ({} given).",
            args.len()
        )));
    }

    if vm.is_profiling() {
        return Ok(vm.intern_value(""));
    }

    if let Some(prompt) = args.first() {
        match prompt {
            Value::Str(s) => {
                let text = s.as_str().to_string();
                vm.print_text(&text);
            }
            _ => return Err(RuntimeFault::new("input() argument must be a string.")),
        }
    }

    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => Ok(Value::Nil),
        Ok(_) => {
            let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
            Ok(vm.intern_value(&trimmed))
        }
    }
}

/// Run a shell command and capture its standard output.
fn system(vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("system", args, 1)?;
    let command = string_arg(args, 0, "system() argument must be a string command.")?
        .as_str()
        .to_string();

    if vm.is_profiling() {
        return Ok(vm.intern_value(""));
    }

    let output = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .output()
        .map_err(|_| RuntimeFault::new(format!("Failed to execute command: {}", command)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    Ok(vm.intern_value(&stdout))
}

/// Read a whole file; nil when it cannot be opened.
fn read_file(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 1 || !matches!(args[0], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "readFile() expects one string argument (path).",
        ));
    }
    let path = string_arg(args, 0, "readFile() expects one string argument (path).")?
        .as_str()
        .to_string();

    match fs::read(&path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            Ok(vm.intern_value(&text))
        }
        Err(_) => Ok(Value::Nil),
    }
}

fn write_file(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 2 || !matches!(args[0], Value::Str(_)) || !matches!(args[1], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "writeFile() takes two string arguments (path, content).",
        ));
    }
    if vm.is_profiling() {
        return Ok(Value::Bool(true));
    }
    let path = string_arg(args, 0, "")?.as_str();
    let content = string_arg(args, 1, "")?.as_str();
    Ok(Value::Bool(fs::write(path, content).is_ok()))
}

fn append_file(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 2 || !matches!(args[0], Value::Str(_)) || !matches!(args[1], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "appendFile() takes two string arguments (path, content).",
        ));
    }
    if vm.is_profiling() {
        return Ok(Value::Bool(true));
    }
    let path = string_arg(args, 0, "")?.as_str();
    let content = string_arg(args, 1, "")?.as_str();

    let appended = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .and_then(|mut file| file.write_all(content.as_bytes()))
        .is_ok();
    Ok(Value::Bool(appended))
}

fn path_exists(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 1 || !matches!(args[0], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "fileExists() takes one string argument (path).",
        ));
    }
    let path = string_arg(args, 0, "")?.as_str();
    Ok(Value::Bool(fs::metadata(path).is_ok()))
}

fn delete_file(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 1 || !matches!(args[0], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "deleteFile() takes one string argument (path).",
        ));
    }
    if vm.is_profiling() {
        return Ok(Value::Bool(true));
    }
    let path = string_arg(args, 0, "")?.as_str();
    Ok(Value::Bool(fs::remove_file(path).is_ok()))
}

fn rename(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 2 || !matches!(args[0], Value::Str(_)) || !matches!(args[1], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "rename() takes two string arguments (oldPath, newPath).",
        ));
    }
    if vm.is_profiling() {
        return Ok(Value::Bool(true));
    }
    let from = string_arg(args, 0, "")?.as_str();
    let to = string_arg(args, 1, "")?.as_str();
    Ok(Value::Bool(fs::rename(from, to).is_ok()))
}

fn create_dir(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 1 || !matches!(args[0], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "createDir() expects one string argument (path).",
        ));
    }
    if vm.is_profiling() {
        return Ok(Value::Bool(true));
    }
    let path = string_arg(args, 0, "")?.as_str();
    Ok(Value::Bool(fs::create_dir(path).is_ok()))
}

fn remove_dir(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 1 || !matches!(args[0], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "removeDir() takes one string argument (path).",
        ));
    }
    if vm.is_profiling() {
        return Ok(Value::Bool(true));
    }
    let path = string_arg(args, 0, "")?.as_str();
    Ok(Value::Bool(fs::remove_dir(path).is_ok()))
}

fn file_size(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 1 || !matches!(args[0], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "fileSize() takes one string argument (path).",
        ));
    }
    let path = string_arg(args, 0, "")?.as_str();
    match fs::metadata(path) {
        Ok(meta) => Ok(Value::Number(meta.len() as f64)),
        Err(_) => Ok(Value::Nil),
    }
}

fn is_dir(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 1 || !matches!(args[0], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "isDir() takes one string argument (path).",
        ));
    }
    let path = string_arg(args, 0, "")?.as_str();
    Ok(Value::Bool(
        fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false),
    ))
}

fn is_file(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 1 || !matches!(args[0], Value::Str(_)) {
        return Err(RuntimeFault::new("isFile() expects one string argument."));
    }
    let path = string_arg(args, 0, "")?.as_str();
    Ok(Value::Bool(
        fs::metadata(path).map(|m| m.is_file()).unwrap_or(false),
    ))
}

/// List the non-hidden regular files directly under a directory.
fn list_dir(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 1 || !matches!(args[0], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "listDir() expects one string argument (directory path).",
        ));
    }
    let path = string_arg(args, 0, "")?.as_str().to_string();

    let list = vm.new_list();
    if let Ok(entries) = fs::read_dir(&path) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let value = vm.intern_value(&name);
            vm.list_push(&list, value);
        }
    }
    Ok(Value::List(list))
}
