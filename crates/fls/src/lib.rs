//! fls: a small dynamically-typed scripting language.
//!
//! The crate pairs a single-pass compiler with a stack-based bytecode VM:
//! source text is scanned and translated straight to bytecode (no AST), then
//! executed over a call-frame interpreter with interned strings, a global
//! hash table, and a compile-on-demand module system. An optional
//! **preflight** pass runs the program once with side effects suppressed to
//! catch non-terminating loops and runaway recursion before the real run,
//! and to pre-size allocations from what it observed.
//!
//! # Quick start
//!
//! ```
//! use fls::Vm;
//!
//! let mut vm = Vm::new();
//! vm.interpret("<demo>", r#"
//!     fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
//!     print fib(10);
//! "#).unwrap();
//! ```
//!
//! # Language at a glance
//!
//! - Values: `nil`, booleans, 64-bit float numbers, interned strings,
//!   lists, maps, functions, modules
//! - Statements: `var`, `fun`, blocks, `if`/`else`, `while`, `for`,
//!   `print`, `return`, `import "path";`, `export var`/`export fun`
//! - Operators: `+ - * / %`, `! -`, comparisons, `and`/`or` with
//!   short-circuit evaluation, `[]` subscripts with negative indexing
//! - A native utility library: strings, lists, maps, math, PRNG,
//!   filesystem access, and a multithreaded directory analyzer
//!
//! Exports merge into the importer's global namespace when a module is
//! imported; the module object itself is the import expression's value.
//!
//! # Not supported
//!
//! - Classes and inheritance (`class`, `super`, `this` are reserved)
//! - Closures over enclosing locals; functions see their own locals and
//!   globals
//! - Garbage collection during execution: objects live until the VM drops

mod builtins;
mod chunk;
mod compiler;
mod diagnostic;
mod error;
mod lexer;
mod opcode;
mod profiler;
mod table;
mod value;
mod vm;

pub use error::{Error, Result};
pub use value::Value;
pub use vm::Vm;
