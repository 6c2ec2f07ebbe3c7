//! Stack-based bytecode virtual machine.
//!
//! This module executes the function objects produced by the compiler.
//! All runtime state lives in a single [`Vm`] value — the operand stack,
//! the call frames, the open-upvalue list, the globals table, and the
//! heap — so there is no process-global anything and the VM is the only
//! mutator of runtime state.
//!
//! One `Vm` is meant to be reused across `interpret` calls: globals and
//! interned strings persist, the stack is rebuilt per call and is empty
//! again whenever `interpret` returns successfully.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::chunk::OpCode;
use crate::compiler;
use crate::error::{Error, Result};
use crate::gc::Roots;
use crate::heap::Heap;
use crate::object::{
    NativeFn, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjList, ObjNative, ObjRef,
    ObjUpvalue, UpvalueState,
};
use crate::table::Table;
use crate::value::Value;

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// An active function activation: the closure being run, the index of the
/// next byte to execute in its chunk, and the stack slot its window
/// starts at (slot 0 of the frame holds the callee or the receiver).
pub struct CallFrame {
    pub closure: ObjRef,
    pub ip: usize,
    pub slots: usize,
}

/// Installer run by `import std NAME;` to define a module's natives.
pub type StdInstaller = fn(&mut Vm);

pub struct Vm {
    pub(crate) heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    /// Open upvalues, sorted by descending stack slot; at most one per
    /// slot.
    open_upvalues: Vec<ObjRef>,
    globals: Table,
    /// Canonical `"init"` string, looked up on every class call.
    init_string: ObjRef,
    std_modules: HashMap<&'static str, StdInstaller>,
    output: String,
    module_root: PathBuf,
    /// Origin for `time:clock`: elapsed time is measured from VM creation.
    start_time: Instant,
    trace: bool,
}

impl Vm {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init", &Roots::none());
        Self {
            heap,
            stack: Vec::new(),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            globals: Table::new(),
            init_string,
            std_modules: HashMap::new(),
            output: String::new(),
            module_root: PathBuf::from("."),
            start_time: Instant::now(),
            trace: false,
        }
    }

    // -----------------------------------------------------------------------
    // Host-facing configuration
    // -----------------------------------------------------------------------

    /// Registers a native function under `name` in the globals table.
    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_ref = self.intern(name);
        self.push(Value::Obj(name_ref));
        let native = self.alloc(Obj::Native(ObjNative { function }));
        self.push(Value::Obj(native));
        let hash = self.heap.string_hash(name_ref);
        self.globals.set(name_ref, hash, Value::Obj(native));
        self.pop();
        self.pop();
    }

    /// Makes `import std NAME;` run `installer`.
    pub fn register_std_module(&mut self, name: &'static str, installer: StdInstaller) {
        self.std_modules.insert(name, installer);
    }

    /// Base directory that `import NAME;` resolves module files against.
    pub fn set_module_root(&mut self, root: impl AsRef<Path>) {
        self.module_root = root.as_ref().to_path_buf();
    }

    pub fn set_gc_stress(&mut self, stress: bool) {
        self.heap.set_stress(stress);
    }

    /// Emits a `tracing` event per executed instruction.
    pub fn set_trace_execution(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// Drains everything `print` has produced since the last call.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    // -----------------------------------------------------------------------
    // Host-facing value construction and inspection
    // -----------------------------------------------------------------------

    /// Interns `chars` and returns it as a value.
    pub fn new_string(&mut self, chars: &str) -> Value {
        let interned = self.intern(chars);
        Value::Obj(interned)
    }

    /// Allocates a list holding `items`.
    pub fn new_list(&mut self, items: Vec<Value>) -> Value {
        let count = items.len();
        for &item in &items {
            self.heap.push_temp_root(item);
        }
        let list = self.alloc(Obj::List(ObjList { items: Vec::new() }));
        self.heap.list_mut(list).items = items;
        for _ in 0..count {
            self.heap.pop_temp_root();
        }
        Value::Obj(list)
    }

    /// The character contents of a string value, if it is one.
    pub fn string_chars(&self, value: Value) -> Option<&str> {
        match value.as_obj().map(|r| self.heap.obj(r)) {
            Some(Obj::String(s)) => Some(&s.chars),
            _ => None,
        }
    }

    /// Renders a value the way `print` would.
    pub fn show_value(&self, value: Value) -> String {
        self.heap.show_value(value)
    }

    /// Seconds elapsed since this VM was created; scripts use it through
    /// `time:clock` to measure durations.
    pub fn clock_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    // -----------------------------------------------------------------------
    // Heap access with the VM's roots
    // -----------------------------------------------------------------------

    fn alloc(&mut self, obj: Obj) -> ObjRef {
        let Vm {
            heap,
            stack,
            frames,
            open_upvalues,
            globals,
            init_string,
            ..
        } = self;
        let roots = Roots {
            stack: stack.as_slice(),
            frames: frames.as_slice(),
            open_upvalues: open_upvalues.as_slice(),
            globals: Some(&*globals),
            init_string: Some(*init_string),
            compiler_functions: &[],
        };
        heap.allocate(obj, &roots)
    }

    fn intern(&mut self, chars: &str) -> ObjRef {
        let Vm {
            heap,
            stack,
            frames,
            open_upvalues,
            globals,
            init_string,
            ..
        } = self;
        let roots = Roots {
            stack: stack.as_slice(),
            frames: frames.as_slice(),
            open_upvalues: open_upvalues.as_slice(),
            globals: Some(&*globals),
            init_string: Some(*init_string),
            compiler_functions: &[],
        };
        heap.intern(chars, &roots)
    }

    fn take_string(&mut self, chars: String) -> ObjRef {
        let Vm {
            heap,
            stack,
            frames,
            open_upvalues,
            globals,
            init_string,
            ..
        } = self;
        let roots = Roots {
            stack: stack.as_slice(),
            frames: frames.as_slice(),
            open_upvalues: open_upvalues.as_slice(),
            globals: Some(&*globals),
            init_string: Some(*init_string),
            compiler_functions: &[],
        };
        heap.take_string(chars, &roots)
    }

    // -----------------------------------------------------------------------
    // Stack primitives
    // -----------------------------------------------------------------------

    fn push(&mut self, value: Value) {
        debug_assert!(self.stack.len() < STACK_MAX);
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    /// Builds the runtime-error value with the stack trace (most recent
    /// frame first), then clears all execution state.
    fn runtime_error(&mut self, message: impl Into<String>) -> Error {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = self.heap.closure(frame.closure).function;
            let function = self.heap.function(function);
            let instruction = frame.ip.saturating_sub(1);
            let line = function.chunk.lines.get(instruction).copied().unwrap_or(0);
            match function.name {
                Some(name) => {
                    trace.push(format!("[line {line}] in {}()", self.heap.string(name).chars));
                }
                None => trace.push(format!("[line {line}] in script")),
            }
        }
        self.reset();
        Error::Runtime {
            message: message.into(),
            trace,
        }
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let closure = frame.closure;
        let ip = frame.ip;
        frame.ip += 1;
        let function = self.heap.closure(closure).function;
        self.heap.function(function).chunk.code[ip]
    }

    fn read_short(&mut self) -> u16 {
        let high = self.read_byte() as u16;
        let low = self.read_byte() as u16;
        (high << 8) | low
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().unwrap();
        let function = self.heap.closure(frame.closure).function;
        self.heap.function(function).chunk.constants[index]
    }

    fn read_string(&mut self) -> ObjRef {
        self.read_constant().as_obj().expect("string constant")
    }

    // -----------------------------------------------------------------------
    // Entry point
    // -----------------------------------------------------------------------

    /// Compiles and runs `source` to completion.
    pub fn interpret(&mut self, source: &str) -> Result<()> {
        let function = {
            let Vm {
                heap,
                globals,
                init_string,
                ..
            } = self;
            compiler::compile(source, heap, globals, *init_string)?
        };

        self.push(Value::Obj(function));
        let closure = self.alloc(Obj::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.pop();
        self.push(Value::Obj(closure));
        self.call(closure, 0)?;

        self.run()?;
        debug_assert!(self.stack.is_empty());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // The dispatch loop
    // -----------------------------------------------------------------------

    fn run(&mut self) -> Result<()> {
        loop {
            let byte = self.read_byte();
            let Ok(op) = OpCode::try_from(byte) else {
                return Err(self.runtime_error("Unknown opcode."));
            };
            if self.trace {
                tracing::trace!(
                    target: "hypl::vm",
                    ?op,
                    depth = self.frames.len(),
                    stack = ?self.stack,
                    "dispatch"
                );
            }

            match op {
                OpCode::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slots;
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slots;
                    self.stack[base + slot] = self.peek(0);
                }

                OpCode::GetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => {
                            let chars = self.heap.string(name).chars.clone();
                            return Err(
                                self.runtime_error(format!("Undefined variable '{chars}'."))
                            );
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    if self.globals.get(name, hash).is_none() {
                        let chars = self.heap.string(name).chars.clone();
                        return Err(self.runtime_error(format!("Undefined variable '{chars}'.")));
                    }
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                }

                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = self.heap.closure(closure).upvalues[slot];
                    let value = match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(index) => self.stack[index],
                        UpvalueState::Closed(value) => value,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = self.heap.closure(closure).upvalues[slot];
                    let value = self.peek(0);
                    match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(index) => self.stack[index] = value,
                        UpvalueState::Closed(_) => {
                            self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
                        }
                    }
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.comparison(op)?,
                OpCode::Less => self.comparison(op)?,

                OpCode::Add => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if self.string_chars(a).is_some() && self.string_chars(b).is_some() {
                        self.concatenate();
                    } else if a.is_number() && b.is_number() {
                        self.pop();
                        self.pop();
                        let result = numeric_add(a, b);
                        self.push(result);
                    } else {
                        return Err(
                            self.runtime_error("Operands must be two numbers or two strings.")
                        );
                    }
                }
                OpCode::Minus | OpCode::Multi | OpCode::Divide => self.arithmetic(op)?,
                OpCode::Module | OpCode::Power => self.integer_arithmetic(op)?,

                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    let value = self.peek(0);
                    let negated = match value {
                        Value::Int(i) => Value::Int(i.wrapping_neg()),
                        Value::Double(d) => Value::Double(-d),
                        _ => return Err(self.runtime_error("Operand must be a number.")),
                    };
                    self.pop();
                    self.push(negated);
                }

                OpCode::Print => {
                    let value = self.pop();
                    let text = self.heap.show_value(value);
                    self.output.push_str(&text);
                    self.output.push('\n');
                }
                OpCode::PrintToLine => {
                    let value = self.pop();
                    let text = self.heap.show_value(value);
                    self.output.push_str(&text);
                }

                OpCode::Jump => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().unwrap().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().unwrap().ip -= offset;
                }

                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    let callee = self.peek(arg_count);
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Invoke => {
                    let method = self.read_string();
                    let arg_count = self.read_byte() as usize;
                    self.invoke(method, arg_count)?;
                }
                OpCode::Closure => {
                    let function = self.read_constant().as_obj().expect("function constant");
                    let upvalue_count = self.heap.function(function).upvalue_count;
                    let closure = self.alloc(Obj::Closure(ObjClosure {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    self.push(Value::Obj(closure));
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let base = self.frames.last().unwrap().slots;
                            self.capture_upvalue(base + index)
                        } else {
                            let enclosing = self.frames.last().unwrap().closure;
                            self.heap.closure(enclosing).upvalues[index]
                        };
                        self.heap.closure_mut(closure).upvalues.push(upvalue);
                    }
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues(frame.slots);
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slots);
                    self.push(result);
                }

                OpCode::Class => {
                    let name = self.read_string();
                    let class = self.alloc(Obj::Class(ObjClass {
                        name,
                        methods: Table::new(),
                    }));
                    self.push(Value::Obj(class));
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    let method = self.peek(0);
                    let class = self.peek(1).as_obj().expect("class on stack");
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.pop();
                }
                OpCode::GetProperty => {
                    let target = self.peek(0);
                    let instance = match target.as_obj() {
                        Some(r) if matches!(self.heap.obj(r), Obj::Instance(_)) => r,
                        _ => {
                            return Err(self.runtime_error("Only instances have properties."));
                        }
                    };
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    if let Some(value) = self.heap.instance(instance).fields.get(name, hash) {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = self.heap.instance(instance).class;
                        self.bind_method(class, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let target = self.peek(1);
                    let instance = match target.as_obj() {
                        Some(r) if matches!(self.heap.obj(r), Obj::Instance(_)) => r,
                        _ => {
                            return Err(self.runtime_error("Only instances have fields."));
                        }
                    };
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    let value = self.peek(0);
                    self.heap.instance_mut(instance).fields.set(name, hash, value);
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }

                OpCode::BuildList => {
                    let count = self.read_byte() as usize;
                    let list = self.alloc(Obj::List(ObjList { items: Vec::new() }));
                    let start = self.stack.len() - count;
                    let items: Vec<Value> = self.stack.drain(start..).collect();
                    self.heap.list_mut(list).items = items;
                    self.push(Value::Obj(list));
                }
                OpCode::IndexSubscr => {
                    let index = self.pop();
                    let target = self.pop();
                    let list = match target.as_obj() {
                        Some(r) if matches!(self.heap.obj(r), Obj::List(_)) => r,
                        _ => return Err(self.runtime_error("Invalid type to index into.")),
                    };
                    let Value::Int(index) = index else {
                        return Err(self.runtime_error("List index is not a number."));
                    };
                    let items = &self.heap.list(list).items;
                    if index < 0 || index as usize >= items.len() {
                        return Err(self.runtime_error("List index out of range."));
                    }
                    let value = items[index as usize];
                    self.push(value);
                }
                OpCode::StoreSubscr => {
                    let item = self.pop();
                    let index = self.pop();
                    let target = self.pop();
                    let list = match target.as_obj() {
                        Some(r) if matches!(self.heap.obj(r), Obj::List(_)) => r,
                        _ => {
                            return Err(self.runtime_error("Cannot store value in a non-list."));
                        }
                    };
                    let Value::Int(index) = index else {
                        return Err(self.runtime_error("List index is not a number."));
                    };
                    let length = self.heap.list(list).items.len();
                    if index < 0 || index as usize >= length {
                        return Err(self.runtime_error("List index out of range."));
                    }
                    self.heap.list_mut(list).items[index as usize] = item;
                    self.push(item);
                }

                OpCode::ImportModule => {
                    let name = self.read_string();
                    self.import_module(name)?;
                }
                OpCode::ImportStd => {
                    let name = self.read_string();
                    let chars = self.heap.string(name).chars.clone();
                    match self.std_modules.get(chars.as_str()) {
                        Some(&installer) => installer(self),
                        None => {
                            return Err(self.runtime_error(format!(
                                "No standard module called '{chars}'."
                            )));
                        }
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Arithmetic helpers
    // -----------------------------------------------------------------------

    fn comparison(&mut self, op: OpCode) -> Result<()> {
        let b = self.peek(0);
        let a = self.peek(1);
        let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
            return Err(self.runtime_error("Operands must be numbers."));
        };
        self.pop();
        self.pop();
        let result = match op {
            OpCode::Greater => a > b,
            OpCode::Less => a < b,
            _ => unreachable!(),
        };
        self.push(Value::Bool(result));
        Ok(())
    }

    /// `- * /` with int/int staying integral and any double operand
    /// promoting the whole operation.
    fn arithmetic(&mut self, op: OpCode) -> Result<()> {
        let b = self.peek(0);
        let a = self.peek(1);
        if !a.is_number() || !b.is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        if let (Value::Int(a), Value::Int(b)) = (a, b) {
            let result = match op {
                OpCode::Minus => a.wrapping_sub(b),
                OpCode::Multi => a.wrapping_mul(b),
                OpCode::Divide => {
                    if b == 0 {
                        return Err(self.runtime_error("Division by zero."));
                    }
                    a.wrapping_div(b)
                }
                _ => unreachable!(),
            };
            self.pop();
            self.pop();
            self.push(Value::Int(result));
            return Ok(());
        }
        let (a, b) = (a.as_f64().unwrap(), b.as_f64().unwrap());
        let result = match op {
            OpCode::Minus => a - b,
            OpCode::Multi => a * b,
            OpCode::Divide => a / b,
            _ => unreachable!(),
        };
        self.pop();
        self.pop();
        self.push(Value::Double(result));
        Ok(())
    }

    /// `%` and `^` coerce both operands to integers and yield an integer.
    fn integer_arithmetic(&mut self, op: OpCode) -> Result<()> {
        let b = self.peek(0);
        let a = self.peek(1);
        if !a.is_number() || !b.is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let (a, b) = (a.as_i64().unwrap(), b.as_i64().unwrap());
        let result = match op {
            OpCode::Module => {
                if b == 0 {
                    return Err(self.runtime_error("Division by zero."));
                }
                a.wrapping_rem(b)
            }
            OpCode::Power => {
                if b < 0 {
                    return Err(self.runtime_error("Power exponent must be non-negative."));
                }
                let Ok(exponent) = u32::try_from(b) else {
                    return Err(self.runtime_error("Power exponent too large."));
                };
                a.wrapping_pow(exponent)
            }
            _ => unreachable!(),
        };
        self.pop();
        self.pop();
        self.push(Value::Int(result));
        Ok(())
    }

    /// Builds the concatenation of the two strings on top of the stack.
    /// The operands are peeked, not popped, so they stay rooted while the
    /// result is allocated.
    fn concatenate(&mut self) {
        let b = self.peek(0).as_obj().expect("string operand");
        let a = self.peek(1).as_obj().expect("string operand");
        let mut chars =
            String::with_capacity(self.heap.string(a).chars.len() + self.heap.string(b).chars.len());
        chars.push_str(&self.heap.string(a).chars);
        chars.push_str(&self.heap.string(b).chars);
        let result = self.take_string(chars);
        self.pop();
        self.pop();
        self.push(Value::Obj(result));
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<()> {
        let Some(r) = callee.as_obj() else {
            return Err(self.runtime_error("Can only call functions and classes."));
        };
        match self.heap.obj(r) {
            Obj::Closure(_) => self.call(r, arg_count),
            Obj::BoundMethod(bound) => {
                let receiver = bound.receiver;
                let method = bound.method;
                let index = self.stack.len() - arg_count - 1;
                self.stack[index] = receiver;
                self.call(method, arg_count)
            }
            Obj::Class(_) => {
                let instance = self.alloc(Obj::Instance(ObjInstance {
                    class: r,
                    fields: Table::new(),
                }));
                let index = self.stack.len() - arg_count - 1;
                self.stack[index] = Value::Obj(instance);
                let hash = self.heap.string_hash(self.init_string);
                match self.heap.class(r).methods.get(self.init_string, hash) {
                    Some(initializer) => {
                        let initializer = initializer.as_obj().expect("closure method");
                        self.call(initializer, arg_count)
                    }
                    None if arg_count != 0 => Err(self.runtime_error(format!(
                        "Expected 0 arguments but got {arg_count}."
                    ))),
                    None => Ok(()),
                }
            }
            Obj::Native(native) => {
                let function = Arc::clone(&native.function);
                let start = self.stack.len() - arg_count;
                let args: Vec<Value> = self.stack[start..].to_vec();
                let base = start - 1;
                match function(self, &args) {
                    Ok(result) => {
                        self.stack.truncate(base);
                        self.push(result);
                        Ok(())
                    }
                    Err(message) => Err(self.runtime_error(message)),
                }
            }
            _ => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn call(&mut self, closure: ObjRef, arg_count: usize) -> Result<()> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity;
        if arg_count != arity {
            return Err(self.runtime_error(format!(
                "Expected {arity} arguments but got {arg_count}."
            )));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots: self.stack.len() - arg_count - 1,
        });
        Ok(())
    }

    /// `receiver.name(args)` without materializing a bound method: fields
    /// shadow methods, and a method found on the class is called directly.
    fn invoke(&mut self, name: ObjRef, arg_count: usize) -> Result<()> {
        let receiver = self.peek(arg_count);
        let instance = match receiver.as_obj() {
            Some(r) if matches!(self.heap.obj(r), Obj::Instance(_)) => r,
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };

        let hash = self.heap.string_hash(name);
        if let Some(field) = self.heap.instance(instance).fields.get(name, hash) {
            let index = self.stack.len() - arg_count - 1;
            self.stack[index] = field;
            return self.call_value(field, arg_count);
        }

        let class = self.heap.instance(instance).class;
        match self.heap.class(class).methods.get(name, hash) {
            Some(method) => {
                let method = method.as_obj().expect("closure method");
                self.call(method, arg_count)
            }
            None => {
                let chars = self.heap.string(name).chars.clone();
                Err(self.runtime_error(format!("Undefined property '{chars}'.")))
            }
        }
    }

    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<()> {
        let hash = self.heap.string_hash(name);
        let Some(method) = self.heap.class(class).methods.get(name, hash) else {
            let chars = self.heap.string(name).chars.clone();
            return Err(self.runtime_error(format!("Undefined property '{chars}'.")));
        };
        let bound = self.alloc(Obj::BoundMethod(ObjBoundMethod {
            receiver: self.peek(0),
            method: method.as_obj().expect("closure method"),
        }));
        self.pop();
        self.push(Value::Obj(bound));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Upvalues
    // -----------------------------------------------------------------------

    /// Returns the open upvalue for `slot`, creating and splicing in a new
    /// one when no closure has captured that slot yet.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut index = 0;
        while index < self.open_upvalues.len() {
            let existing = self.open_upvalues[index];
            match self.heap.upvalue_slot(existing) {
                Some(s) if s > slot => index += 1,
                Some(s) if s == slot => return existing,
                _ => break,
            }
        }
        let created = self.alloc(Obj::Upvalue(ObjUpvalue {
            state: UpvalueState::Open(slot),
        }));
        self.open_upvalues.insert(index, created);
        created
    }

    /// Closes every open upvalue pointing at `last` or above: the stack
    /// value moves into the upvalue, which leaves the open list.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(&head) = self.open_upvalues.first() {
            let Some(slot) = self.heap.upvalue_slot(head) else {
                break;
            };
            if slot < last {
                break;
            }
            let value = self.stack[slot];
            self.heap.upvalue_mut(head).state = UpvalueState::Closed(value);
            self.open_upvalues.remove(0);
        }
    }

    // -----------------------------------------------------------------------
    // Imports
    // -----------------------------------------------------------------------

    /// `import NAME;`: reads `NAME.hypl` (with `@` as the path separator)
    /// under the module root, compiles it, and calls the resulting
    /// function from the current frame. Module-level declarations land in
    /// the shared globals table.
    fn import_module(&mut self, name: ObjRef) -> Result<()> {
        let raw = self.heap.string(name).chars.clone();
        let relative = raw.replace('@', "/");
        let path = self.module_root.join(format!("{relative}.hypl"));

        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(_) => {
                return Err(self.runtime_error(format!(
                    "Could not open module file '{}'.",
                    path.display()
                )));
            }
        };

        let compiled = {
            let Vm {
                heap,
                globals,
                init_string,
                ..
            } = self;
            compiler::compile(&source, heap, globals, *init_string)
        };
        let function = match compiled {
            Ok(function) => function,
            Err(Error::Compile { message }) => {
                return Err(self.runtime_error(format!(
                    "Could not compile module '{raw}'.\n{message}"
                )));
            }
            Err(other) => return Err(other),
        };

        self.push(Value::Obj(function));
        let closure = self.alloc(Obj::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.pop();
        self.push(Value::Obj(closure));
        self.call(closure, 0)
    }
}

fn numeric_add(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(b)),
        _ => Value::Double(a.as_f64().unwrap() + b.as_f64().unwrap()),
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
