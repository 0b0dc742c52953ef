//! List and map natives.
//!
//! Maps come in two flavors of the same object: the `dict*` family and the
//! `map*` family differ only in spelling and in what the mutators return.
//! List natives bound-check without negative indexing; that is the subscript
//! operator's behavior, not theirs.

use std::rc::Rc;

use super::{NativeResult, expect_arity, list_arg, map_arg, number_arg, string_arg};
use crate::error::RuntimeFault;
use crate::value::Value;
use crate::vm::Vm;

pub(crate) fn register(vm: &mut Vm) {
    vm.define_native("newDict", new_dict);
    vm.define_native("dictSet", dict_set);
    vm.define_native("dictGet", dict_get);
    vm.define_native("dictDelete", dict_delete);
    vm.define_native("dictExists", dict_exists);

    vm.define_native("map", map_new);
    vm.define_native("mapSet", map_set);
    vm.define_native("mapGet", map_get);
    vm.define_native("mapDelete", map_delete);

    vm.define_native("listLen", list_len);
    vm.define_native("listGet", list_get);
    vm.define_native("listSet", list_set);
    vm.define_native("listPush", list_push);
    vm.define_native("listPop", list_pop);
    vm.define_native("listShift", list_shift);
    vm.define_native("listClear", list_clear);
}

// ---------------------------------------------------------------------------
// dict family
// ---------------------------------------------------------------------------

fn new_dict(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if !args.is_empty() {
        return Err(RuntimeFault::new("newDict() takes no arguments."));
    }
    Ok(Value::Map(vm.new_map()))
}

fn dict_set(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 3 || !matches!(args[0], Value::Map(_)) || !matches!(args[1], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "dictSet() expects a dictionary, a string key, and a value.",
        ));
    }
    let map = map_arg(args, 0, "")?;
    let key = string_arg(args, 1, "")?;
    map.table.borrow_mut().set(Rc::clone(key), args[2].clone());
    Ok(Value::Nil)
}

fn dict_get(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 2 || !matches!(args[0], Value::Map(_)) || !matches!(args[1], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "dictGet() expects a dictionary and a string key.",
        ));
    }
    let map = map_arg(args, 0, "")?;
    let key = string_arg(args, 1, "")?;
    Ok(map.table.borrow().get(key).unwrap_or(Value::Nil))
}

fn dict_delete(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 2 || !matches!(args[0], Value::Map(_)) || !matches!(args[1], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "dictDelete() expects a dictionary and a string key.",
        ));
    }
    let map = map_arg(args, 0, "")?;
    let key = string_arg(args, 1, "")?;
    let deleted = map.table.borrow_mut().delete(key);
    Ok(Value::Bool(deleted))
}

fn dict_exists(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 2 || !matches!(args[0], Value::Map(_)) || !matches!(args[1], Value::Str(_)) {
        return Err(RuntimeFault::new(
            "dictExists() expects a dictionary and a string key.",
        ));
    }
    let map = map_arg(args, 0, "")?;
    let key = string_arg(args, 1, "")?;
    Ok(Value::Bool(map.table.borrow().get(key).is_some()))
}

// ---------------------------------------------------------------------------
// map family
// ---------------------------------------------------------------------------

fn map_new(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if !args.is_empty() {
        return Err(RuntimeFault::new(format!(
            "map() takes no arguments ({} given).",
            args.len()
        )));
    }
    Ok(Value::Map(vm.new_map()))
}

fn map_set(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 3 {
        return Err(RuntimeFault::new(format!(
            "mapSet() takes 3 arguments: map, key, value ({} given).",
            args.len()
        )));
    }
    let map = map_arg(args, 0, "First argument to mapSet() must be a map.")?;
    let key = string_arg(args, 1, "Second argument (key) to mapSet() must be a string.")?;
    map.table.borrow_mut().set(Rc::clone(key), args[2].clone());
    Ok(args[2].clone())
}

fn map_get(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 2 {
        return Err(RuntimeFault::new(format!(
            "mapGet() takes 2 arguments: map, key ({} given).",
            args.len()
        )));
    }
    let map = map_arg(args, 0, "First argument to mapGet() must be a map.")?;
    let key = string_arg(args, 1, "Second argument (key) to mapGet() must be a string.")?;
    Ok(map.table.borrow().get(key).unwrap_or(Value::Nil))
}

fn map_delete(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 2 {
        return Err(RuntimeFault::new(format!(
            "mapDelete() takes 2 arguments: map, key ({} given).",
            args.len()
        )));
    }
    let map = map_arg(args, 0, "First argument to mapDelete() must be a map.")?;
    let key = string_arg(args, 1, "Second argument (key) to mapDelete() must be a string.")?;
    let deleted = map.table.borrow_mut().delete(key);
    Ok(Value::Bool(deleted))
}

// ---------------------------------------------------------------------------
// list family
// ---------------------------------------------------------------------------

fn list_len(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("listLen", args, 1)?;
    let list = list_arg(args, 0, "listLen() argument must be a list.")?;
    let length = list.items.borrow().len();
    Ok(Value::Number(length as f64))
}

fn list_get(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("listGet", args, 2)?;
    let list = list_arg(args, 0, "listGet() first argument must be a list.")?;
    let index = number_arg(args, 1, "listGet() second argument must be a number (index).")?;

    let items = list.items.borrow();
    let at = index as i64;
    if at < 0 || at >= items.len() as i64 {
        return Err(RuntimeFault::new("listGet() index out of bounds."));
    }
    Ok(items[at as usize].clone())
}

fn list_set(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("listSet", args, 3)?;
    let list = list_arg(args, 0, "listSet() first argument must be a list.")?;
    let index = number_arg(args, 1, "listSet() second argument must be a number (index).")?;

    let mut items = list.items.borrow_mut();
    let at = index as i64;
    if at < 0 || at >= items.len() as i64 {
        return Err(RuntimeFault::new("listSet() index out of bounds."));
    }
    items[at as usize] = args[2].clone();
    Ok(args[2].clone())
}

fn list_push(vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("listPush", args, 2)?;
    let list = Rc::clone(list_arg(args, 0, "listPush() first argument must be a list.")?);
    vm.list_push(&list, args[1].clone());
    Ok(args[1].clone())
}

fn list_pop(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("listPop", args, 1)?;
    let list = list_arg(args, 0, "listPop() first argument must be a list.")?;
    let mut items = list.items.borrow_mut();
    match items.pop() {
        Some(value) => Ok(value),
        None => Err(RuntimeFault::new("listPop() called on an empty list.")),
    }
}

fn list_shift(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("listShift", args, 1)?;
    let list = list_arg(args, 0, "listShift() first argument must be a list.")?;
    let mut items = list.items.borrow_mut();
    if items.is_empty() {
        return Err(RuntimeFault::new("listShift() called on an empty list."));
    }
    Ok(items.remove(0))
}

fn list_clear(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    expect_arity("listClear", args, 1)?;
    let list = list_arg(args, 0, "listClear() first argument must be a list.")?;
    list.items.borrow_mut().clear();
    Ok(Value::Nil)
}
