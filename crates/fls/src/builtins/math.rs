//! Math natives and the `PI` constant.

use super::{NativeResult, expect_arity, number_arg};
use crate::value::Value;
use crate::vm::Vm;

pub(crate) fn register(vm: &mut Vm) {
    vm.define_native("sqrt", sqrt);
    vm.define_native("sin", sin);
    vm.define_native("cos", cos);
    vm.define_native("tan", tan);
    vm.define_native("abs", abs);
    vm.define_native("fabs", abs);
    vm.define_native("pow", pow);
    vm.define_native("log", log);
    vm.define_native("log10", log10);
    vm.define_native("exp", exp);
    vm.define_native("floor", floor);
    vm.define_native("ceil", ceil);
    vm.define_native("round", round);
    vm.define_native("fmod", fmod);

    vm.define_global("PI", Value::Number(std::f64::consts::PI));
}

fn unary(name: &str, args: &[Value], op: fn(f64) -> f64) -> NativeResult {
    expect_arity(name, args, 1)?;
    let x = number_arg(args, 0, &format!("{}() argument must be a number.", name))?;
    Ok(Value::Number(op(x)))
}

fn binary(name: &str, args: &[Value], op: fn(f64, f64) -> f64) -> NativeResult {
    expect_arity(name, args, 2)?;
    let message = format!("{}() arguments must be numbers.", name);
    let x = number_arg(args, 0, &message)?;
    let y = number_arg(args, 1, &message)?;
    Ok(Value::Number(op(x, y)))
}

fn sqrt(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary("sqrt", args, f64::sqrt)
}

fn sin(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary("sin", args, f64::sin)
}

fn cos(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary("cos", args, f64::cos)
}

fn tan(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary("tan", args, f64::tan)
}

fn abs(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary("fabs", args, f64::abs)
}

fn pow(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    binary("pow", args, f64::powf)
}

fn log(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary("log", args, f64::ln)
}

fn log10(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary("log10", args, f64::log10)
}

fn exp(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary("exp", args, f64::exp)
}

fn floor(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary("floor", args, f64::floor)
}

fn ceil(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary("ceil", args, f64::ceil)
}

fn round(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary("round", args, f64::round)
}

/// IEEE remainder with the dividend's sign, like the binary `%` operator but
/// without the zero-divisor fault.
fn fmod(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    binary("fmod", args, |x, y| x % y)
}
