//! Heap object model.
//!
//! Every heap-managed entity is one variant of the closed [`Obj`] sum:
//! the interpreter and the collector both rely on exhaustive matches over
//! it. Objects are owned by the [`crate::heap::Heap`] arena and referred
//! to everywhere else by [`ObjRef`] handles; the collector is the sole
//! deallocator.

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

/// A stable handle to a heap object (an index into the arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) u32);

/// Signature of a host-registered native function.
///
/// Natives run synchronously on the interpreter thread. They receive the
/// VM (for allocating result objects and reading argument payloads) and
/// the argument slice copied off the value stack. An `Err` surfaces as a
/// runtime error with the usual stack trace.
pub type NativeFn = Arc<dyn Fn(&mut Vm, &[Value]) -> std::result::Result<Value, String> + Send + Sync>;

/// An interned immutable string with its precomputed FNV-1a hash.
#[derive(Debug)]
pub struct ObjString {
    pub chars: String,
    pub hash: u32,
}

/// A compiled function: its code, arity, and upvalue shape.
///
/// Functions are created by the compiler and never mutated after
/// compilation finishes. `name` is `None` only for the top-level script.
#[derive(Debug)]
pub struct ObjFunction {
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: Option<ObjRef>,
}

pub struct ObjNative {
    pub function: NativeFn,
}

/// A function plus the upvalues it closed over.
///
/// `upvalues` is filled by the `Closure` opcode immediately after the
/// object is created; once that instruction completes its length equals
/// the function's `upvalue_count`.
#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// Where an upvalue's storage currently lives.
#[derive(Debug)]
pub enum UpvalueState {
    /// Aliases a live slot on the value stack.
    Open(usize),
    /// Owns the value; the enclosing frame has returned.
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjUpvalue {
    pub state: UpvalueState,
}

#[derive(Debug)]
pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
}

#[derive(Debug)]
pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

/// A method pre-bound to a receiver, so `obj.m` can be passed around and
/// called later with `this` intact.
#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

#[derive(Debug)]
pub struct ObjList {
    pub items: Vec<Value>,
}

/// The closed set of heap object shapes.
pub enum Obj {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
    List(ObjList),
}

impl Obj {
    /// Rough retained size, fed into the collector's allocation pressure
    /// accounting.
    pub fn size_estimate(&self) -> usize {
        let payload = match self {
            Obj::String(s) => s.chars.len(),
            Obj::Function(f) => f.chunk.code.len() + f.chunk.constants.len() * size_of::<Value>(),
            Obj::Closure(c) => c.upvalues.len() * size_of::<ObjRef>(),
            Obj::Class(c) => c.methods.capacity() * size_of::<Value>() * 2,
            Obj::Instance(i) => i.fields.capacity() * size_of::<Value>() * 2,
            Obj::List(l) => l.items.len() * size_of::<Value>(),
            Obj::Native(_) | Obj::Upvalue(_) | Obj::BoundMethod(_) => 0,
        };
        size_of::<Obj>() + payload
    }
}

/// Computes the FNV-1a hash used for string interning and table probing.
pub fn hash_string(chars: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in chars.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
