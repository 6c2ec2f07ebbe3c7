//! Hypl — a small dynamically-typed scripting language, executed by a
//! bytecode virtual machine.
//!
//! Source text goes through a single-pass Pratt compiler straight into
//! per-function bytecode; there is no AST and no separate compile step
//! visible to the embedder. A stack-based VM with call frames runs that
//! bytecode over a handle-based object heap with interned strings,
//! closed-over upvalues, classes with bound methods, lists, and a
//! tri-color mark-sweep garbage collector.
//!
//! # Quick start
//!
//! ```
//! use hypl::Interpreter;
//!
//! let mut interp = Interpreter::with_std();
//! interp.run(r#"
//! fun fib(n) {
//!     if (n < 2) return n;
//!     return fib(n - 1) + fib(n - 2);
//! }
//! print fib(10);
//! "#).unwrap();
//! assert_eq!(interp.take_output(), "55\n");
//! ```
//!
//! # Language sketch
//!
//! - Declarations: `let`, `fun` (or `def`), `class`, `import`,
//!   `import std`.
//! - Statements: `print` (and `print |` for no trailing newline), `if` /
//!   `else`, `while`, `for`, `return`, blocks, expression statements.
//! - Expressions: int and double literals, strings, lists `[...]`,
//!   `+ - * / % ^`, comparisons, `and` / `or`, `!`, unary `-`,
//!   assignment, calls, `.` property access, `[i]` indexing, `inc x` /
//!   `dec x`.
//! - Functions are first-class closures; classes have an `init`
//!   initializer and methods with `this`.
//!
//! Integers and doubles are distinct: `1 == 1.0` is `false`, arithmetic
//! on two ints stays integral, and any double operand promotes the
//! operation. `%` and `^` always work on integers.
//!
//! # Embedding
//!
//! Hosts register natives with [`Interpreter::register_native`]; the
//! standard modules in [`Interpreter::with_std`] are built the same way
//! and become visible to scripts through `import std math;` and friends,
//! under namespaced globals like `math:floor`.

mod chunk;
mod compiler;
mod error;
mod gc;
mod heap;
mod interpreter;
mod modules;
mod object;
mod scanner;
mod table;
mod value;
mod vm;

pub use error::{Error, Result};
pub use interpreter::Interpreter;
pub use object::{NativeFn, ObjRef};
pub use value::Value;
pub use vm::Vm;
