//! String utility natives. Lengths and offsets are byte-based; case mapping
//! is ASCII.

use super::{NativeResult, expect_arity, number_arg, string_arg};
use crate::error::RuntimeFault;
use crate::value::Value;
use crate::vm::Vm;

pub(crate) fn register(vm: &mut Vm) {
    vm.define_native("len", len);
    vm.define_native("isString", is_string);
    vm.define_native("toString", to_string);
    vm.define_native("toNum", to_num);
    vm.define_native("lines", lines);
    vm.define_native("endsWith", ends_with);
    vm.define_native("startsWith", starts_with);
    vm.define_native("substring", substring);
    vm.define_native("split", split);
    vm.define_native("trim", trim);
    vm.define_native("toUpperCase", to_upper_case);
    vm.define_native("toLowerCase", to_lower_case);
}

fn len(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("len", args, 1)?;
    let s = string_arg(args, 0, "len() argument must be a string.")?;
    Ok(Value::Number(s.as_str().len() as f64))
}

fn is_string(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("isString", args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Str(_))))
}

fn to_string(vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("toString", args, 1)?;
    match &args[0] {
        Value::Bool(b) => {
            let text = if *b { "true" } else { "false" };
            Ok(vm.intern_value(text))
        }
        Value::Nil => Ok(vm.intern_value("nil")),
        Value::Number(n) => {
            let text = crate::value::format_number(*n);
            Ok(vm.intern_value(&text))
        }
        Value::Str(_) => Ok(args[0].clone()),
        _ => Err(RuntimeFault::new(
            "toString() argument must be a number, bool, nil, or string.",
        )),
    }
}

/// Parse a number out of a string; nil when the whole string does not parse.
fn to_num(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("toNum", args, 1)?;
    let s = string_arg(args, 0, "toNum() argument must be a string.")?;
    match s.as_str().trim_start().parse::<f64>() {
        Ok(n) => Ok(Value::Number(n)),
        Err(_) => Ok(Value::Nil),
    }
}

/// Count lines; a trailing newline does not start an empty final line.
fn lines(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("lines", args, 1)?;
    let s = string_arg(args, 0, "lines() argument must be a string.")?.as_str();
    if s.is_empty() {
        return Ok(Value::Number(0.0));
    }

    let mut count = 1usize;
    for byte in s.bytes() {
        if byte == b'\n' {
            count += 1;
        }
    }
    if s.ends_with('\n') {
        count -= 1;
    }
    Ok(Value::Number(count as f64))
}

fn ends_with(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("endsWith", args, 2)?;
    let s = string_arg(args, 0, "endsWith() arguments must be strings.")?;
    let suffix = string_arg(args, 1, "endsWith() arguments must be strings.")?;
    Ok(Value::Bool(s.as_str().ends_with(suffix.as_str())))
}

fn starts_with(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 2
        || !matches!(args[0], Value::Str(_))
        || !matches!(args[1], Value::Str(_))
    {
        return Err(RuntimeFault::new(
            "startsWith() expects two string arguments.",
        ));
    }
    let s = string_arg(args, 0, "")?;
    let prefix = string_arg(args, 1, "")?;
    Ok(Value::Bool(s.as_str().starts_with(prefix.as_str())))
}

fn substring(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 3
        || !matches!(args[0], Value::Str(_))
        || !matches!(args[1], Value::Number(_))
        || !matches!(args[2], Value::Number(_))
    {
        return Err(RuntimeFault::new(
            "substring() expects a string and two numbers (start, end).",
        ));
    }
    let s = string_arg(args, 0, "")?.as_str().to_string();
    let start = number_arg(args, 1, "")?;
    let end = number_arg(args, 2, "")?;

    if start < 0.0 || end > s.len() as f64 || start > end {
        return Err(RuntimeFault::new("Substring bounds are out of range."));
    }
    let (start, end) = (start as usize, end as usize);
    let piece = String::from_utf8_lossy(&s.as_bytes()[start..end]).into_owned();
    Ok(vm.intern_value(&piece))
}

fn split(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 2
        || !matches!(args[0], Value::Str(_))
        || !matches!(args[1], Value::Str(_))
    {
        return Err(RuntimeFault::new(
            "split() expects two string arguments (string, delimiter).",
        ));
    }
    let s = string_arg(args, 0, "")?.as_str().to_string();
    let delimiter = string_arg(args, 1, "")?.as_str().to_string();

    let parts: Vec<String> = if delimiter.is_empty() {
        vec![s]
    } else {
        s.split(&delimiter).map(str::to_string).collect()
    };

    let list = vm.new_list();
    for part in parts {
        let value = vm.intern_value(&part);
        vm.list_push(&list, value);
    }
    Ok(Value::List(list))
}

fn trim(vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("trim", args, 1)?;
    let s = string_arg(args, 0, "trim() argument must be a string.")?;
    let trimmed = s.as_str().trim().to_string();
    Ok(vm.intern_value(&trimmed))
}

fn to_upper_case(vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("toUpperCase", args, 1)?;
    let s = string_arg(args, 0, "toUpperCase() argument must be a string.")?;
    let upper = s.as_str().to_ascii_uppercase();
    Ok(vm.intern_value(&upper))
}

fn to_lower_case(vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("toLowerCase", args, 1)?;
    let s = string_arg(args, 0, "toLowerCase() argument must be a string.")?;
    let lower = s.as_str().to_ascii_lowercase();
    Ok(vm.intern_value(&lower))
}
