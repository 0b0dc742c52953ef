//! The built-in native library.
//!
//! Every native shares one calling convention (see [`crate::value::NativeFn`]):
//! it receives the VM and the argument window, and returns a single value or
//! a runtime fault. Natives are registered name-to-function at VM init;
//! re-registration overwrites because the globals table has set semantics.

mod analyze;
mod collections;
mod io;
mod math;
mod random;
mod strings;

use std::rc::Rc;

use crate::error::RuntimeFault;
use crate::value::{LangStr, ListObj, MapObj, Value};
use crate::vm::Vm;

pub(crate) type NativeResult = Result<Value, RuntimeFault>;

/// Register the whole canonical library on a fresh VM.
pub(crate) fn register(vm: &mut Vm) {
    io::register(vm);
    strings::register(vm);
    collections::register(vm);
    math::register(vm);
    random::register(vm);
    analyze::register(vm);
}

// ---------------------------------------------------------------------------
// Shared argument helpers
// ---------------------------------------------------------------------------

pub(crate) fn expect_arity(name: &str, args: &[Value], want: usize) -> Result<(), RuntimeFault> {
    if args.len() != want {
        let noun = if want == 1 { "argument" } else { "arguments" };
        return Err(RuntimeFault::new(format!(
            "{}() takes exactly {} {} ({} given).",
            name,
            want,
            noun,
            args.len()
        )));
    }
    Ok(())
}

pub(crate) fn string_arg<'a>(
    args: &'a [Value],
    index: usize,
    message: &str,
) -> Result<&'a Rc<LangStr>, RuntimeFault> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s),
        _ => Err(RuntimeFault::new(message)),
    }
}

pub(crate) fn number_arg(args: &[Value], index: usize, message: &str) -> Result<f64, RuntimeFault> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        _ => Err(RuntimeFault::new(message)),
    }
}

pub(crate) fn list_arg<'a>(
    args: &'a [Value],
    index: usize,
    message: &str,
) -> Result<&'a Rc<ListObj>, RuntimeFault> {
    match args.get(index) {
        Some(Value::List(list)) => Ok(list),
        _ => Err(RuntimeFault::new(message)),
    }
}

pub(crate) fn map_arg<'a>(
    args: &'a [Value],
    index: usize,
    message: &str,
) -> Result<&'a Rc<MapObj>, RuntimeFault> {
    match args.get(index) {
        Some(Value::Map(map)) => Ok(map),
        _ => Err(RuntimeFault::new(message)),
    }
}
