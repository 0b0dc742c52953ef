//! Stack-based bytecode virtual machine.
//!
//! Executes [`Function`] chunks produced by the compiler over a fixed-depth
//! call-frame stack and a shared operand stack. All runtime state lives
//! here: globals, the module cache, the string intern pool, the allocation
//! watermark, and the preflight profiler.
//!
//! Program output goes through a pluggable `Write` sink so embedders and
//! tests can capture it; the preflight run swaps writes for counting.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::debug;

use crate::builtins;
use crate::compiler;
use crate::diagnostic;
use crate::error::{Error, Result, RuntimeFault};
use crate::opcode::OpCode;
use crate::profiler::{INSTRUCTION_CHECK_INTERVAL, Profiler};
use crate::table::Table;
use crate::value::{
    Function, LangStr, ListObj, MapObj, Module, Native, NativeFn, Strings, Value,
};

/// Maximum call depth.
pub const FRAMES_MAX: usize = 64;
/// Operand stack capacity: 256 slots per possible frame.
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// One function activation: the running function, an instruction pointer
/// into its chunk, the base of its operand-stack window, and a loop counter
/// that only the preflight run advances.
struct CallFrame {
    function: Rc<Function>,
    ip: usize,
    slots: usize,
    loop_counter: u64,
}

/// Faults raised by the dispatch loop, routed to the reporter by
/// [`Vm::interpret`].
enum StepFault {
    /// Runtime fault with a message for the reporter.
    Runtime(String),
    /// The preflight profiler refused to continue.
    Preflight(String),
    /// A module failed to compile during import (already reported).
    Compile,
}

impl From<RuntimeFault> for StepFault {
    fn from(fault: RuntimeFault) -> StepFault {
        StepFault::Runtime(fault.message)
    }
}

type StepResult<T> = std::result::Result<T, StepFault>;

pub struct Vm {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table,
    modules: Table,
    strings: Strings,
    pub(crate) profiler: Profiler,
    enable_preflight: bool,
    instruction_count: u64,
    bytes_allocated: usize,
    next_gc: usize,
    alloc_tokens: u64,
    pub(crate) rng: SmallRng,
    started: Instant,
    out: Box<dyn Write>,
}

impl Default for Vm {
    fn default() -> Vm {
        Vm::new()
    }
}

impl Vm {
    /// A VM writing program output to stdout, with the full native library
    /// registered.
    pub fn new() -> Vm {
        Vm::with_output(Box::new(io::stdout()))
    }

    /// A VM writing program output to the given sink.
    pub fn with_output(out: Box<dyn Write>) -> Vm {
        let mut vm = Vm {
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: Vec::with_capacity(STACK_MAX),
            globals: Table::new(),
            modules: Table::new(),
            strings: Strings::new(),
            profiler: Profiler::new(),
            enable_preflight: false,
            instruction_count: 0,
            bytes_allocated: 0,
            next_gc: 1024 * 1024,
            alloc_tokens: 0,
            rng: SmallRng::from_entropy(),
            started: Instant::now(),
            out,
        };
        builtins::register(&mut vm);
        vm
    }

    /// Enable or disable the preflight safety run for subsequent
    /// [`Vm::interpret`] calls.
    pub fn set_preflight(&mut self, enabled: bool) {
        self.enable_preflight = enabled;
    }

    /// True when the operand stack is empty; holds after every normal
    /// termination.
    pub fn stack_is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Read a global by name (primarily for embedding and tests).
    pub fn get_global(&mut self, name: &str) -> Option<Value> {
        let key = self.strings.intern(name);
        self.globals.get(&key)
    }

    /// Compile and execute one source unit. `path` names the module: it is
    /// the key error diagnostics point at and the base identity for
    /// `export`.
    pub fn interpret(&mut self, path: &str, source: &str) -> Result<()> {
        let name = self.intern(path);
        let module = Rc::new(Module {
            name,
            exports: RefCell::new(Table::new()),
        });
        let function = Rc::new(compiler::compile(source, Rc::clone(&module), &mut self.strings)?);

        if self.enable_preflight {
            self.preflight(&function)?;
        }

        self.alloc_tokens = 0;
        self.instruction_count = 0;
        self.reset_stack();
        self.stack.push(Value::Function(Rc::clone(&function)));
        if let Err(fault) = self.call_function(function, 0) {
            return Err(self.report_fault(fault));
        }

        match self.run_to_depth(0) {
            Ok(()) => Ok(()),
            Err(fault) => Err(self.report_fault(fault)),
        }
    }

    // -----------------------------------------------------------------------
    // Preflight
    // -----------------------------------------------------------------------

    /// Execute the program once in profiling mode: output is counted, not
    /// written, and loops/recursion/allocations are watched. A clean pass
    /// raises the advisory allocation threshold and arms the memory plans;
    /// any abort refuses the real run.
    fn preflight(&mut self, function: &Rc<Function>) -> Result<()> {
        debug!("preflight starting");
        self.profiler.begin();
        self.alloc_tokens = 0;
        self.instruction_count = 0;
        self.reset_stack();

        self.stack.push(Value::Function(Rc::clone(function)));
        if let Err(fault) = self.call_function(Rc::clone(function), 0) {
            self.profiler.profiling_mode = false;
            return Err(self.report_fault(fault));
        }
        let outcome = self.run_to_depth(0);

        self.profiler.profiling_mode = false;
        self.profiler.log_summary();

        match outcome {
            Ok(()) => {
                self.reset_stack();
                self.profiler.preflight_complete = true;
                let floor = (self.profiler.total_bytes_requested as f64 * 1.01) as usize;
                if floor > self.next_gc {
                    self.next_gc = floor;
                }
                debug!(next_gc = self.next_gc, "preflight passed");
                Ok(())
            }
            Err(fault) => Err(self.report_fault(fault)),
        }
    }

    // -----------------------------------------------------------------------
    // The dispatch loop
    // -----------------------------------------------------------------------

    /// Execute instructions until the frame stack drops back to
    /// `stop_depth`. The top-level run uses depth 0; a fresh import runs the
    /// module body with the import site's depth.
    fn run_to_depth(&mut self, stop_depth: usize) -> StepResult<()> {
        while self.frames.len() > stop_depth {
            self.instruction_count += 1;
            if self.profiler.profiling_mode
                && self.instruction_count % INSTRUCTION_CHECK_INTERVAL == 0
            {
                if self.profiler.timed_out() {
                    let reason = if self.profiler.infinite_loop_detected {
                        "potential infinite loop"
                    } else {
                        "timeout exceeded"
                    };
                    return Err(StepFault::Preflight(reason.to_string()));
                }
                if !self.profiler.check_recursion_depth(self.frames.len()) {
                    return Err(StepFault::Preflight("excessive recursion depth".to_string()));
                }
            }

            self.step()?;
        }
        Ok(())
    }

    fn step(&mut self) -> StepResult<()> {
        let byte = self.read_byte();
        let op = OpCode::try_from(byte)
            .map_err(|_| StepFault::Runtime(format!("Unknown opcode 0x{:02x}.", byte)))?;

        match op {
            OpCode::Constant => {
                let value = self.read_constant();
                self.push(value)?;
            }
            OpCode::Nil => self.push(Value::Nil)?,
            OpCode::True => self.push(Value::Bool(true))?,
            OpCode::False => self.push(Value::Bool(false))?,
            OpCode::Pop => {
                self.pop();
            }

            OpCode::GetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frame().slots;
                let value = self.stack[base + slot].clone();
                self.push(value)?;
            }
            OpCode::SetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frame().slots;
                self.stack[base + slot] = self.peek(0);
            }

            OpCode::GetGlobal => {
                let name = self.read_string()?;
                match self.globals.get(&name) {
                    Some(value) => self.push(value)?,
                    None => {
                        return Err(StepFault::Runtime(format!(
                            "Undefined variable '{}'.",
                            name.as_str()
                        )));
                    }
                }
            }
            OpCode::SetGlobal => {
                let name = self.read_string()?;
                let value = self.peek(0);
                if self.globals.set(Rc::clone(&name), value) {
                    // Assignment must not create globals; undo the insert.
                    self.globals.delete(&name);
                    return Err(StepFault::Runtime(format!(
                        "Undefined variable '{}'.",
                        name.as_str()
                    )));
                }
            }
            OpCode::DefineGlobal => {
                let name = self.read_string()?;
                let value = self.peek(0);
                self.globals.set(name, value);
                self.pop();
            }

            OpCode::Equal => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(a == b))?;
            }
            OpCode::Greater => {
                let (a, b) = self.pop_numbers("Operands must be numbers.")?;
                self.push(Value::Bool(a > b))?;
            }
            OpCode::Less => {
                let (a, b) = self.pop_numbers("Operands must be numbers.")?;
                self.push(Value::Bool(a < b))?;
            }

            OpCode::Add => {
                let b = self.pop();
                let a = self.pop();
                match (&a, &b) {
                    (Value::Number(a), Value::Number(b)) => {
                        let sum = a + b;
                        self.push(Value::Number(sum))?;
                    }
                    (Value::Str(a), Value::Str(b)) => {
                        let combined = format!("{}{}", a.as_str(), b.as_str());
                        let interned = self.intern(&combined);
                        self.push(Value::Str(interned))?;
                    }
                    _ => {
                        return Err(StepFault::Runtime(
                            "Operands must be two numbers or two strings.".to_string(),
                        ));
                    }
                }
            }
            OpCode::Subtract => {
                let (a, b) = self.pop_numbers("Operands must be numbers.")?;
                self.push(Value::Number(a - b))?;
            }
            OpCode::Multiply => {
                let (a, b) = self.pop_numbers("Operands must be numbers.")?;
                self.push(Value::Number(a * b))?;
            }
            OpCode::Divide => {
                let (a, b) = self.pop_numbers("Operands must be numbers.")?;
                if b == 0.0 {
                    return Err(StepFault::Runtime("Division by zero.".to_string()));
                }
                self.push(Value::Number(a / b))?;
            }
            OpCode::Modulo => {
                let (a, b) = self.pop_numbers("Operands must be numbers.")?;
                if b == 0.0 {
                    return Err(StepFault::Runtime("Modulo by zero.".to_string()));
                }
                self.push(Value::Number(a % b))?;
            }

            OpCode::Not => {
                let value = self.pop();
                self.push(Value::Bool(value.is_falsey()))?;
            }
            OpCode::Negate => {
                let value = self.pop();
                match value {
                    Value::Number(n) => self.push(Value::Number(-n))?,
                    _ => return Err(StepFault::Runtime("Operand must be a number.".to_string())),
                }
            }

            OpCode::Print => {
                let value = self.pop();
                self.print_text(&format!("{}\n", value));
            }

            OpCode::Jump => {
                let offset = self.read_short() as usize;
                self.frame_mut().ip += offset;
            }
            OpCode::JumpIfFalse => {
                let offset = self.read_short() as usize;
                if self.peek(0).is_falsey() {
                    self.frame_mut().ip += offset;
                }
            }
            OpCode::Loop => {
                let offset = self.read_short() as usize;
                if self.profiler.profiling_mode {
                    let loop_id = {
                        let frame = self.frame_mut();
                        frame.loop_counter += 1;
                        // The LOOP opcode sits three bytes back from the
                        // already-advanced instruction pointer.
                        (frame.ip - 3) as u64
                    };
                    let depth = self.stack.len() as u64;
                    if !self.profiler.record_loop_iteration(loop_id, depth) {
                        debug!(
                            loop_id,
                            iterations = self.frame().loop_counter,
                            "loop made no progress"
                        );
                        return Err(StepFault::Preflight("potential infinite loop".to_string()));
                    }
                }
                self.frame_mut().ip -= offset;
            }

            OpCode::Call => {
                let arg_count = self.read_byte() as usize;
                let callee = self.peek(arg_count);
                self.call_value(callee, arg_count)?;
            }

            OpCode::NewList => {
                let list = self.new_list();
                self.push(Value::List(list))?;
            }
            OpCode::ListAppend => {
                let item = self.pop();
                match self.peek(0) {
                    Value::List(list) => self.list_push(&list, item),
                    _ => {
                        return Err(StepFault::Runtime(
                            "Can only append to lists.".to_string(),
                        ));
                    }
                }
            }

            OpCode::GetSubscript => {
                let index = self.pop();
                let target = self.pop();
                let value = self.subscript_get(&target, &index)?;
                self.push(value)?;
            }
            OpCode::SetSubscript => {
                let value = self.pop();
                let index = self.pop();
                let target = self.pop();
                self.subscript_set(&target, &index, value.clone())?;
                self.push(value)?;
            }

            OpCode::Import => {
                let path = self.pop();
                let Value::Str(path) = path else {
                    return Err(StepFault::Runtime("Invalid module name.".to_string()));
                };
                self.import_module(path)?;
            }
            OpCode::Export => {
                let name = self.read_string()?;
                // Prefer the defined global; fall back to the value still on
                // the stack for exports from local scopes.
                let value = match self.globals.get(&name) {
                    Some(value) => value,
                    None => self.peek(0),
                };
                let module = Rc::clone(&self.frame().function.module);
                module.exports.borrow_mut().set(name, value);
            }

            OpCode::Return => {
                let result = self.pop();
                let finished = self.frames.pop().expect("active frame");
                self.stack.truncate(finished.slots);
                if !self.frames.is_empty() {
                    self.push(result)?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    fn call_value(&mut self, callee: Value, arg_count: usize) -> StepResult<()> {
        match callee {
            Value::Function(function) => self.call_function(function, arg_count),
            Value::Native(native) => {
                let arg_start = self.stack.len() - arg_count;
                let args: Vec<Value> = self.stack[arg_start..].to_vec();
                let result = (native.function)(self, &args)?;
                // The result replaces the callee-and-arguments window.
                self.stack.truncate(arg_start - 1);
                self.push(result)
            }
            _ => Err(StepFault::Runtime(
                "Can only call functions and classes.".to_string(),
            )),
        }
    }

    fn call_function(&mut self, function: Rc<Function>, arg_count: usize) -> StepResult<()> {
        if arg_count != function.arity as usize {
            return Err(StepFault::Runtime(format!(
                "Expected {} arguments but got {}.",
                function.arity, arg_count
            )));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(StepFault::Runtime("Stack overflow.".to_string()));
        }

        let slots = self.stack.len() - arg_count - 1;
        self.frames.push(CallFrame {
            function,
            ip: 0,
            slots,
            loop_counter: 0,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Module import
    // -----------------------------------------------------------------------

    /// `IMPORT`: resolve a path against the module cache, or read, compile,
    /// and execute the file, then merge its exports into the globals. The
    /// module reference is left on the stack as the import's value.
    fn import_module(&mut self, path: Rc<LangStr>) -> StepResult<()> {
        if let Some(cached) = self.modules.get(&path) {
            debug!(module = path.as_str(), "import cache hit");
            return self.push(cached);
        }

        let Ok(bytes) = std::fs::read(path.as_str()) else {
            return Err(StepFault::Runtime(format!(
                "Could not open module '{}'.",
                path.as_str()
            )));
        };
        let source = String::from_utf8_lossy(&bytes).into_owned();

        let module = Rc::new(Module {
            name: Rc::clone(&path),
            exports: RefCell::new(Table::new()),
        });
        // Cache before compiling so circular imports see this module (a
        // reference to a partially-initialized module is observable).
        self.modules
            .set(Rc::clone(&path), Value::Module(Rc::clone(&module)));

        let function = match compiler::compile(&source, Rc::clone(&module), &mut self.strings) {
            Ok(function) => Rc::new(function),
            Err(_) => {
                self.modules.delete(&path);
                return Err(StepFault::Compile);
            }
        };

        let depth = self.frames.len();
        self.push(Value::Function(Rc::clone(&function)))?;
        self.call_function(function, 0)?;
        self.run_to_depth(depth)?;
        // Discard the module body's return value.
        self.pop();

        // Exported names become globally visible in the importer.
        let exports: Vec<(Rc<LangStr>, Value)> = module
            .exports
            .borrow()
            .iter()
            .map(|(key, value)| (Rc::clone(key), value.clone()))
            .collect();
        for (key, value) in exports {
            self.globals.set(key, value);
        }

        debug!(module = path.as_str(), "imported");
        self.push(Value::Module(module))
    }

    // -----------------------------------------------------------------------
    // Subscripts
    // -----------------------------------------------------------------------

    fn subscript_index(&self, target: &Rc<ListObj>, index: &Value) -> StepResult<usize> {
        let Value::Number(n) = index else {
            return Err(StepFault::Runtime("List index must be a number.".to_string()));
        };
        if n.fract() != 0.0 {
            return Err(StepFault::Runtime(
                "List index must be an integer.".to_string(),
            ));
        }
        let len = target.items.borrow().len() as i64;
        let mut at = *n as i64;
        if at < 0 {
            at += len;
        }
        if at < 0 || at >= len {
            return Err(StepFault::Runtime("List index out of bounds.".to_string()));
        }
        Ok(at as usize)
    }

    fn subscript_get(&self, target: &Value, index: &Value) -> StepResult<Value> {
        let Value::List(list) = target else {
            return Err(StepFault::Runtime("Can only subscript lists.".to_string()));
        };
        let at = self.subscript_index(list, index)?;
        let value = list.items.borrow()[at].clone();
        Ok(value)
    }

    fn subscript_set(&self, target: &Value, index: &Value, value: Value) -> StepResult<()> {
        let Value::List(list) = target else {
            return Err(StepFault::Runtime("Can only subscript lists.".to_string()));
        };
        let at = self.subscript_index(list, index)?;
        list.items.borrow_mut()[at] = value;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stack and chunk access
    // -----------------------------------------------------------------------

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("active frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("active frame")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("active frame");
        let byte = frame.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let frame = self.frames.last_mut().expect("active frame");
        let value = u16::from_be_bytes([
            frame.function.chunk.code[frame.ip],
            frame.function.chunk.code[frame.ip + 1],
        ]);
        frame.ip += 2;
        value
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.frame().function.chunk.constants[index].clone()
    }

    fn read_string(&mut self) -> StepResult<Rc<LangStr>> {
        match self.read_constant() {
            Value::Str(s) => Ok(s),
            _ => Err(StepFault::Runtime("Invalid name constant.".to_string())),
        }
    }

    fn push(&mut self, value: Value) -> StepResult<()> {
        if self.stack.len() >= STACK_MAX {
            return Err(StepFault::Runtime("Value stack overflow.".to_string()));
        }
        self.stack.push(value);
        self.profiler.note_stack_depth(self.stack.len());
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Nil)
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack
            .get(self.stack.len().wrapping_sub(1 + distance))
            .cloned()
            .unwrap_or(Value::Nil)
    }

    fn pop_numbers(&mut self, message: &str) -> StepResult<(f64, f64)> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok((a, b)),
            _ => Err(StepFault::Runtime(message.to_string())),
        }
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
    }

    // -----------------------------------------------------------------------
    // Allocation helpers (shared with the native library)
    // -----------------------------------------------------------------------

    fn next_token(&mut self) -> u64 {
        self.alloc_tokens += 1;
        self.alloc_tokens
    }

    fn note_allocated(&mut self, bytes: usize) {
        self.bytes_allocated += bytes;
        if self.next_gc > 0 && self.bytes_allocated > self.next_gc {
            debug!(
                bytes_allocated = self.bytes_allocated,
                next_gc = self.next_gc,
                "allocation watermark passed advisory threshold"
            );
            self.next_gc *= 2;
        }
    }

    /// Intern a string, recording the allocation when profiling.
    pub(crate) fn intern(&mut self, chars: &str) -> Rc<LangStr> {
        if self.profiler.profiling_mode {
            let token = self.next_token();
            self.profiler.record_allocation(token, chars.len() + 1);
        }
        self.note_allocated(chars.len() + 1);
        self.strings.intern(chars)
    }

    pub(crate) fn intern_value(&mut self, chars: &str) -> Value {
        Value::Str(self.intern(chars))
    }

    /// Allocate a list. During the real run after a clean preflight, the
    /// recorded plan for this allocation token pre-sizes the backing vector
    /// (rounded up by 1%).
    pub(crate) fn new_list(&mut self) -> Rc<ListObj> {
        let token = self.next_token();

        let mut items = Vec::new();
        if self.profiler.preflight_complete
            && !self.profiler.profiling_mode
            && let Some(plan) = self.profiler.find_plan(token)
        {
            let padded = plan.max_observed_size + plan.max_observed_size / 100;
            items.reserve(padded / std::mem::size_of::<Value>());
        }

        if self.profiler.profiling_mode {
            self.profiler
                .record_allocation(token, std::mem::size_of::<ListObj>());
        }
        self.note_allocated(std::mem::size_of::<ListObj>());

        Rc::new(ListObj {
            items: RefCell::new(items),
            token,
        })
    }

    pub(crate) fn new_map(&mut self) -> Rc<MapObj> {
        let token = self.next_token();
        if self.profiler.profiling_mode {
            self.profiler
                .record_allocation(token, std::mem::size_of::<MapObj>());
        }
        self.note_allocated(std::mem::size_of::<MapObj>());

        Rc::new(MapObj {
            table: RefCell::new(Table::new()),
            token,
        })
    }

    /// Append to a list, attributing backing-store growth to the list's
    /// allocation token.
    pub(crate) fn list_push(&mut self, list: &Rc<ListObj>, value: Value) {
        let grown = {
            let mut items = list.items.borrow_mut();
            let before = items.capacity();
            items.push(value);
            let after = items.capacity();
            (after != before).then(|| (after - before) * std::mem::size_of::<Value>())
        };
        if let Some(bytes) = grown {
            self.note_allocated(bytes);
            if self.profiler.profiling_mode {
                let total = list.items.borrow().capacity() * std::mem::size_of::<Value>();
                self.profiler.record_growth(list.token, total);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Output and environment (shared with the native library)
    // -----------------------------------------------------------------------

    /// Write program output, or count it when the preflight run is
    /// suppressing side effects.
    pub(crate) fn print_text(&mut self, text: &str) {
        if self.profiler.profiling_mode {
            self.profiler.note_output();
        } else {
            let _ = self.out.write_all(text.as_bytes());
            let _ = self.out.flush();
        }
    }

    pub(crate) fn is_profiling(&self) -> bool {
        self.profiler.profiling_mode
    }

    /// Seconds since the VM started; backs the `clock` native.
    pub(crate) fn clock_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Register a native under a global name. Re-registration overwrites.
    pub(crate) fn define_native(&mut self, name: &'static str, function: NativeFn) {
        let key = self.intern(name);
        self.globals.set(key, Value::Native(Native { name, function }));
    }

    /// Define a global constant.
    pub(crate) fn define_global(&mut self, name: &str, value: Value) {
        let key = self.intern(name);
        self.globals.set(key, value);
    }

    // -----------------------------------------------------------------------
    // Fault reporting
    // -----------------------------------------------------------------------

    /// Route a fault through the reporter: caret diagnostic for the faulting
    /// line (re-read from the module's source file when possible), then the
    /// call-frame trace, then reset the stack.
    fn report_fault(&mut self, fault: StepFault) -> Error {
        let error = match fault {
            StepFault::Compile => {
                self.reset_stack();
                return Error::Compile;
            }
            StepFault::Runtime(message) => {
                self.report_runtime_diagnostic(&message);
                Error::Runtime(message)
            }
            StepFault::Preflight(message) => {
                self.report_runtime_diagnostic(&message);
                Error::Preflight(message)
            }
        };
        self.reset_stack();
        error
    }

    fn report_runtime_diagnostic(&self, message: &str) {
        let Some(frame) = self.frames.last() else {
            eprintln!("Runtime Error: {}", message);
            return;
        };

        let line = frame.function.chunk.line(frame.ip.saturating_sub(1));
        let path = frame.function.module.name.as_str();
        match diagnostic::read_source_line(path, line) {
            Some(text) => diagnostic::report(false, path, line, &text, 0, 1, message),
            None => {
                let in_name = frame
                    .function
                    .name
                    .as_ref()
                    .map_or("script", |name| name.as_str());
                eprintln!("Runtime Error: {}", message);
                eprintln!("  --> {}:{} in {}", path, line, in_name);
            }
        }

        for frame in self.frames.iter().rev() {
            let line = frame.function.chunk.line(frame.ip.saturating_sub(1));
            match &frame.function.name {
                Some(name) => eprintln!("[line {}] in {}()", line, name.as_str()),
                None => eprintln!("[line {}] in script", line),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run(source: &str) -> (Result<()>, String) {
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(Box::new(buf.clone()));
        let result = vm.interpret("<test>", source);
        (result, buf.contents())
    }

    fn run_ok(source: &str) -> String {
        let (result, output) = run(source);
        assert_eq!(result, Ok(()));
        output
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run_ok("print 1 + 2 * 3;"), "7\n");
        assert_eq!(run_ok("print (1 + 2) * 3;"), "9\n");
        assert_eq!(run_ok("print 10 % 3;"), "1\n");
        assert_eq!(run_ok("print -4 + 1;"), "-3\n");
    }

    #[test]
    fn comparison_and_equality() {
        assert_eq!(run_ok("print 1 < 2;"), "true\n");
        assert_eq!(run_ok("print 2 <= 1;"), "false\n");
        assert_eq!(run_ok("print 3 >= 3;"), "true\n");
        assert_eq!(run_ok("print 1 == 1;"), "true\n");
        assert_eq!(run_ok("print 1 != 1;"), "false\n");
        assert_eq!(run_ok("print nil == false;"), "false\n");
        assert_eq!(run_ok("print \"a\" == \"a\";"), "true\n");
    }

    #[test]
    fn truthiness_in_conditions() {
        assert_eq!(run_ok("if (0) { print 1; } else { print 2; }"), "2\n");
        assert_eq!(run_ok("if (nil) { print 1; } else { print 2; }"), "2\n");
        assert_eq!(run_ok("if (\"\") { print 1; } else { print 2; }"), "1\n");
    }

    #[test]
    fn short_circuit_operators() {
        assert_eq!(run_ok("print true and 3;"), "3\n");
        assert_eq!(run_ok("print false and 3;"), "false\n");
        assert_eq!(run_ok("print false or 3;"), "3\n");
        assert_eq!(run_ok("print 2 or 3;"), "2\n");
    }

    #[test]
    fn globals_and_locals() {
        assert_eq!(run_ok("var a = 1; a = a + 2; print a;"), "3\n");
        assert_eq!(
            run_ok("var a = 1; { var a = 10; print a; } print a;"),
            "10\n1\n"
        );
    }

    #[test]
    fn while_and_for_agree() {
        let while_out = run_ok("var i = 0; while (i < 5) { print i; i = i + 1; }");
        let for_out = run_ok("for (var i = 0; i < 5; i = i + 1) { print i; }");
        assert_eq!(while_out, for_out);
        assert_eq!(for_out, "0\n1\n2\n3\n4\n");
    }

    #[test]
    fn functions_and_recursion() {
        assert_eq!(
            run_ok("fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);"),
            "55\n"
        );
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(run_ok("var s = \"hi\"; print s + \"!\";"), "hi!\n");
    }

    #[test]
    fn concatenated_strings_are_interned() {
        // "he" + "llo" must be the same reference as the literal "hello".
        assert_eq!(run_ok("print \"he\" + \"llo\" == \"hello\";"), "true\n");
    }

    #[test]
    fn list_literals_and_subscripts() {
        assert_eq!(run_ok("var a = [1, 2, 3]; print a[-1];"), "3\n");
        assert_eq!(run_ok("var a = [1, 2, 3]; a[0] = 9; print a[0];"), "9\n");
        assert_eq!(run_ok("print [1, [2, 3]];"), "[1, [2, 3]]\n");
    }

    #[test]
    fn subscript_faults() {
        let (result, _) = run("var a = [1]; print a[3];");
        assert_eq!(
            result,
            Err(Error::Runtime("List index out of bounds.".to_string()))
        );

        let (result, _) = run("var a = [1]; print a[0.5];");
        assert_eq!(
            result,
            Err(Error::Runtime("List index must be an integer.".to_string()))
        );

        let (result, _) = run("print 1[0];");
        assert_eq!(
            result,
            Err(Error::Runtime("Can only subscript lists.".to_string()))
        );
    }

    #[test]
    fn undefined_variable_faults() {
        let (result, _) = run("print missing;");
        assert_eq!(
            result,
            Err(Error::Runtime("Undefined variable 'missing'.".to_string()))
        );

        let (result, _) = run("missing = 1;");
        assert_eq!(
            result,
            Err(Error::Runtime("Undefined variable 'missing'.".to_string()))
        );
    }

    #[test]
    fn global_redefinition_overwrites() {
        assert_eq!(run_ok("var a = 1; var a = 2; print a;"), "2\n");
    }

    #[test]
    fn arity_mismatch_faults() {
        let (result, _) = run("fun f(a, b) { return a; } f(1);");
        assert_eq!(
            result,
            Err(Error::Runtime("Expected 2 arguments but got 1.".to_string()))
        );
    }

    #[test]
    fn calling_a_non_callable_faults() {
        let (result, _) = run("var x = 1; x();");
        assert_eq!(
            result,
            Err(Error::Runtime(
                "Can only call functions and classes.".to_string()
            ))
        );
    }

    #[test]
    fn deep_recursion_overflows_at_64_frames() {
        let (result, _) = run("fun f() { return f(); } f();");
        assert_eq!(result, Err(Error::Runtime("Stack overflow.".to_string())));
    }

    #[test]
    fn division_and_modulo_by_zero_fault() {
        let (result, _) = run("print 1 / 0;");
        assert_eq!(result, Err(Error::Runtime("Division by zero.".to_string())));
        let (result, _) = run("print 1 % 0;");
        assert_eq!(result, Err(Error::Runtime("Modulo by zero.".to_string())));
    }

    #[test]
    fn stack_is_empty_after_normal_termination() {
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(Box::new(buf.clone()));
        vm.interpret("<test>", "var a = 1; print a + 1; [1, 2]; \"s\";")
            .unwrap();
        assert!(vm.stack_is_empty());
    }

    #[test]
    fn repl_style_state_persists_across_interpret_calls() {
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(Box::new(buf.clone()));
        vm.interpret("<REPL>", "var a = 40;").unwrap();
        vm.interpret("<REPL>", "print a + 2;").unwrap();
        assert_eq!(buf.contents(), "42\n");
    }

    #[test]
    fn runtime_error_resets_the_stack_and_repl_continues() {
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(Box::new(buf.clone()));
        assert!(vm.interpret("<REPL>", "print 1 / 0;").is_err());
        assert!(vm.stack_is_empty());
        vm.interpret("<REPL>", "print 2;").unwrap();
        assert_eq!(buf.contents(), "2\n");
    }

    #[test]
    fn number_printing() {
        assert_eq!(run_ok("print 2.5;"), "2.5\n");
        assert_eq!(run_ok("print 100;"), "100\n");
        assert_eq!(run_ok("print 10 / 4;"), "2.5\n");
        assert_eq!(run_ok("print 7 / 7;"), "1\n");
    }

    #[test]
    fn preflight_refuses_an_unconditional_infinite_loop() {
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(Box::new(buf.clone()));
        vm.set_preflight(true);
        let result = vm.interpret("<test>", "while (true) {}");
        match result {
            Err(Error::Preflight(reason)) => {
                assert!(
                    reason.contains("infinite loop") || reason.contains("timeout"),
                    "unexpected preflight reason: {}",
                    reason
                );
            }
            other => panic!("expected preflight abort, got {:?}", other),
        }
        // Side effects were suppressed: nothing was printed.
        assert_eq!(buf.contents(), "");
    }

    #[test]
    fn preflight_passes_a_terminating_program_and_suppresses_its_output() {
        let buf = SharedBuf::default();
        let mut vm = Vm::with_output(Box::new(buf.clone()));
        vm.set_preflight(true);
        vm.interpret("<test>", "for (var i = 0; i < 3; i = i + 1) { print i; }")
            .unwrap();
        // The preflight pass counts prints; only the real run writes them.
        assert_eq!(buf.contents(), "0\n1\n2\n");
        assert!(vm.profiler.preflight_complete);
        assert_eq!(vm.profiler.output_operations, 3);
    }
}
