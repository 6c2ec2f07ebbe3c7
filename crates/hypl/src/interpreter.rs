//! The embeddable engine facade.
//!
//! [`Interpreter`] is the one type most hosts need: it owns a [`Vm`],
//! wires up the standard modules, and exposes source execution, native
//! registration, and the captured `print` output.

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::modules;
use crate::object::NativeFn;
use crate::value::Value;
use crate::vm::Vm;

/// A ready-to-run hypl engine.
///
/// Globals persist across [`run`](Interpreter::run) calls, so an
/// interactive host can feed lines one at a time. `print` output is
/// buffered and drained with [`take_output`](Interpreter::take_output).
///
/// # Example
///
/// ```
/// use hypl::Interpreter;
///
/// let mut interp = Interpreter::with_std();
/// interp.run("print 1 + 2 * 3;").unwrap();
/// assert_eq!(interp.take_output(), "7\n");
/// ```
pub struct Interpreter {
    vm: Vm,
}

impl Interpreter {
    /// Creates an engine with no standard modules registered;
    /// `import std ...;` will fail until the host registers installers.
    pub fn new() -> Self {
        Self { vm: Vm::new() }
    }

    /// Creates an engine with the standard module installers (math, list,
    /// string, type_conv, time, random, console) available to
    /// `import std NAME;`.
    pub fn with_std() -> Self {
        let mut interpreter = Self::new();
        modules::register_std(&mut interpreter.vm);
        interpreter
    }

    /// Compiles and executes a source string to completion.
    pub fn run(&mut self, source: &str) -> Result<()> {
        self.vm.interpret(source)
    }

    /// Drains everything `print` has written since the last call.
    pub fn take_output(&mut self) -> String {
        self.vm.take_output()
    }

    /// Registers a host function callable from scripts by `name`.
    ///
    /// # Example
    ///
    /// ```
    /// use hypl::{Interpreter, Value};
    ///
    /// let mut interp = Interpreter::new();
    /// interp.register_native("triple", |_, args| {
    ///     Ok(match args.first().copied() {
    ///         Some(Value::Int(i)) => Value::Int(i * 3),
    ///         _ => Value::Nil,
    ///     })
    /// });
    /// interp.run("print triple(14);").unwrap();
    /// assert_eq!(interp.take_output(), "42\n");
    /// ```
    pub fn register_native<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut Vm, &[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.vm.define_native(name, Arc::new(f) as NativeFn);
    }

    /// Sets the directory `import NAME;` resolves module files against.
    pub fn set_module_root(&mut self, root: impl AsRef<Path>) {
        self.vm.set_module_root(root);
    }

    /// Forces a full collection before every allocation; for flushing out
    /// rooting bugs, not for production use.
    pub fn set_gc_stress(&mut self, stress: bool) {
        self.vm.set_gc_stress(stress);
    }

    /// Emits a `tracing` event per executed instruction.
    pub fn set_trace_execution(&mut self, trace: bool) {
        self.vm.set_trace_execution(trace);
    }

    /// Direct access to the VM, for hosts that need more than the facade.
    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
