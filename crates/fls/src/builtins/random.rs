//! Pseudo-random number natives, backed by the VM's entropy-seeded PRNG.

use rand::Rng;

use super::{NativeResult, number_arg};
use crate::error::RuntimeFault;
use crate::value::Value;
use crate::vm::Vm;

pub(crate) fn register(vm: &mut Vm) {
    vm.define_native("random", random);
    vm.define_native("randomInt", random_int);
}

/// A uniform float in `[0, 1)`.
fn random(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if !args.is_empty() {
        return Err(RuntimeFault::new("random() takes no arguments."));
    }
    Ok(Value::Number(vm.rng.gen_range(0.0..1.0)))
}

/// A uniform integer in `[min, max]`.
fn random_int(vm: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() != 2 {
        return Err(RuntimeFault::new("randomInt() takes 2 arguments (min, max)."));
    }
    let min = number_arg(args, 0, "Arguments must be numbers.")? as i64;
    let max = number_arg(args, 1, "Arguments must be numbers.")? as i64;

    if min > max {
        return Err(RuntimeFault::new("min cannot be greater than max."));
    }
    Ok(Value::Number(vm.rng.gen_range(min..=max) as f64))
}
