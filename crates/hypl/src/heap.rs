//! The object heap: an arena of [`Obj`]s addressed by [`ObjRef`] handles.
//!
//! The heap owns every live object. Allocation goes through
//! [`Heap::allocate`], which is also the collection trigger: when the
//! running byte estimate crosses the next-collection threshold (or always,
//! under stress mode) a full mark-sweep cycle runs first, marking from the
//! caller-supplied [`Roots`]. Anything not reachable from roots at that
//! moment is freed, so callers must keep every transiently-held object
//! reachable — on the VM stack, in a table, or via
//! [`Heap::push_temp_root`] — across any possible allocation.
//!
//! String interning lives here too: the `strings` table maps every live
//! string to a canonical handle, and the collector treats it as a weak
//! set, dropping entries whose strings died.

use crate::gc::Roots;
use crate::object::{
    hash_string, Obj, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjList, ObjRef, ObjString,
    ObjUpvalue, UpvalueState,
};
use crate::table::Table;
use crate::value::Value;

const FIRST_GC_THRESHOLD: usize = 1024 * 1024;

pub(crate) struct Slot {
    pub(crate) marked: bool,
    pub(crate) obj: Obj,
}

pub struct Heap {
    pub(crate) slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    /// Weak set of all live strings (value is always `Nil`).
    pub(crate) strings: Table,
    pub(crate) bytes_allocated: usize,
    pub(crate) next_gc: usize,
    pub(crate) gray: Vec<ObjRef>,
    /// Explicit roots for objects in flight between allocations.
    pub(crate) temp_roots: Vec<Value>,
    stress: bool,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
            gray: Vec::new(),
            temp_roots: Vec::new(),
            stress: false,
        }
    }

    /// When set, every allocation runs a full collection first. Slow, but
    /// surfaces any missing-root bug at the exact allocation that would
    /// have freed the object.
    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Moves `obj` into the arena and returns its handle, possibly
    /// collecting first.
    pub fn allocate(&mut self, obj: Obj, roots: &Roots) -> ObjRef {
        if self.stress || self.bytes_allocated > self.next_gc {
            self.collect(roots);
        }
        self.bytes_allocated += obj.size_estimate();
        let slot = Slot { marked: false, obj };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                ObjRef(index)
            }
            None => {
                self.slots.push(Some(slot));
                ObjRef((self.slots.len() - 1) as u32)
            }
        }
    }

    pub(crate) fn free_slot(&mut self, index: usize) {
        if let Some(slot) = self.slots[index].take() {
            self.bytes_allocated -= slot.obj.size_estimate().min(self.bytes_allocated);
            self.free.push(index as u32);
        }
    }

    /// Keeps a value alive across upcoming allocations; pair with
    /// [`Heap::pop_temp_root`].
    pub fn push_temp_root(&mut self, value: Value) {
        self.temp_roots.push(value);
    }

    pub fn pop_temp_root(&mut self) {
        self.temp_roots.pop();
    }

    // -----------------------------------------------------------------------
    // String interning
    // -----------------------------------------------------------------------

    /// Looks up an already-interned string by content.
    pub fn find_interned(&self, chars: &str, hash: u32) -> Option<ObjRef> {
        if self.strings.is_empty() {
            return None;
        }
        let capacity = self.strings.entries.len();
        let mut index = hash as usize % capacity;
        loop {
            let entry = &self.strings.entries[index];
            match entry.key {
                None => {
                    if matches!(entry.value, Value::Nil) {
                        return None;
                    }
                }
                Some(key) => {
                    let s = self.string(key);
                    if s.hash == hash && s.chars == chars {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    /// Interns a copy of `chars`, returning the canonical handle.
    pub fn intern(&mut self, chars: &str, roots: &Roots) -> ObjRef {
        let hash = hash_string(chars);
        if let Some(existing) = self.find_interned(chars, hash) {
            return existing;
        }
        self.intern_new(chars.to_string(), hash, roots)
    }

    /// Interns an owned string, dropping it when an equal string already
    /// exists.
    pub fn take_string(&mut self, chars: String, roots: &Roots) -> ObjRef {
        let hash = hash_string(&chars);
        if let Some(existing) = self.find_interned(&chars, hash) {
            return existing;
        }
        self.intern_new(chars, hash, roots)
    }

    fn intern_new(&mut self, chars: String, hash: u32, roots: &Roots) -> ObjRef {
        let handle = self.allocate(Obj::String(ObjString { chars, hash }), roots);
        // Root the fresh string while the intern table grows; table growth
        // itself cannot collect today, but the discipline keeps this safe
        // if an allocation ever sneaks into that path.
        self.push_temp_root(Value::Obj(handle));
        self.strings.set(handle, hash, Value::Nil);
        self.pop_temp_root();
        handle
    }

    // -----------------------------------------------------------------------
    // Typed accessors
    //
    // The compiler and interpreter only reach for these after the value's
    // tag has been checked, so a mismatch is a corrupt-bytecode bug, not a
    // user error.
    // -----------------------------------------------------------------------

    pub(crate) fn obj(&self, r: ObjRef) -> &Obj {
        &self.slots[r.0 as usize]
            .as_ref()
            .expect("use of freed object")
            .obj
    }

    pub(crate) fn obj_mut(&mut self, r: ObjRef) -> &mut Obj {
        &mut self.slots[r.0 as usize]
            .as_mut()
            .expect("use of freed object")
            .obj
    }

    pub fn string(&self, r: ObjRef) -> &ObjString {
        match self.obj(r) {
            Obj::String(s) => s,
            _ => unreachable!("expected string"),
        }
    }

    pub fn string_hash(&self, r: ObjRef) -> u32 {
        self.string(r).hash
    }

    pub fn function(&self, r: ObjRef) -> &ObjFunction {
        match self.obj(r) {
            Obj::Function(f) => f,
            _ => unreachable!("expected function"),
        }
    }

    pub(crate) fn function_mut(&mut self, r: ObjRef) -> &mut ObjFunction {
        match self.obj_mut(r) {
            Obj::Function(f) => f,
            _ => unreachable!("expected function"),
        }
    }

    pub fn closure(&self, r: ObjRef) -> &ObjClosure {
        match self.obj(r) {
            Obj::Closure(c) => c,
            _ => unreachable!("expected closure"),
        }
    }

    pub(crate) fn closure_mut(&mut self, r: ObjRef) -> &mut ObjClosure {
        match self.obj_mut(r) {
            Obj::Closure(c) => c,
            _ => unreachable!("expected closure"),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> &ObjUpvalue {
        match self.obj(r) {
            Obj::Upvalue(u) => u,
            _ => unreachable!("expected upvalue"),
        }
    }

    pub(crate) fn upvalue_mut(&mut self, r: ObjRef) -> &mut ObjUpvalue {
        match self.obj_mut(r) {
            Obj::Upvalue(u) => u,
            _ => unreachable!("expected upvalue"),
        }
    }

    pub fn class(&self, r: ObjRef) -> &ObjClass {
        match self.obj(r) {
            Obj::Class(c) => c,
            _ => unreachable!("expected class"),
        }
    }

    pub(crate) fn class_mut(&mut self, r: ObjRef) -> &mut ObjClass {
        match self.obj_mut(r) {
            Obj::Class(c) => c,
            _ => unreachable!("expected class"),
        }
    }

    pub fn instance(&self, r: ObjRef) -> &ObjInstance {
        match self.obj(r) {
            Obj::Instance(i) => i,
            _ => unreachable!("expected instance"),
        }
    }

    pub(crate) fn instance_mut(&mut self, r: ObjRef) -> &mut ObjInstance {
        match self.obj_mut(r) {
            Obj::Instance(i) => i,
            _ => unreachable!("expected instance"),
        }
    }

    pub fn list(&self, r: ObjRef) -> &ObjList {
        match self.obj(r) {
            Obj::List(l) => l,
            _ => unreachable!("expected list"),
        }
    }

    pub(crate) fn list_mut(&mut self, r: ObjRef) -> &mut ObjList {
        match self.obj_mut(r) {
            Obj::List(l) => l,
            _ => unreachable!("expected list"),
        }
    }

    // -----------------------------------------------------------------------
    // Display
    // -----------------------------------------------------------------------

    /// Renders a value the way `print` shows it.
    pub fn show_value(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Obj(r) => self.show_object(r),
        }
    }

    fn show_object(&self, r: ObjRef) -> String {
        match self.obj(r) {
            Obj::String(s) => s.chars.clone(),
            Obj::Function(f) => self.show_function(f),
            Obj::Native(_) => "<native fn>".to_string(),
            Obj::Closure(c) => self.show_function(self.function(c.function)),
            Obj::Upvalue(_) => "upvalue".to_string(),
            Obj::Class(c) => self.string(c.name).chars.clone(),
            Obj::Instance(i) => {
                format!("{} instance", self.string(self.class(i.class).name).chars)
            }
            Obj::BoundMethod(b) => {
                self.show_function(self.function(self.closure(b.method).function))
            }
            Obj::List(l) => {
                let items: Vec<String> = l.items.iter().map(|&v| self.show_value(v)).collect();
                format!("[{}]", items.join(", "))
            }
        }
    }

    fn show_function(&self, f: &ObjFunction) -> String {
        match f.name {
            Some(name) => format!("<fn {}>", self.string(name).chars),
            None => "<script>".to_string(),
        }
    }

    pub fn interned_count(&self) -> usize {
        self.strings.len()
    }

    /// Whether a handle still points at a live object. Test support for
    /// collector assertions; handles held across a collection are
    /// otherwise never dangling in correct code.
    pub fn is_live(&self, r: ObjRef) -> bool {
        self.slots
            .get(r.0 as usize)
            .is_some_and(|slot| slot.is_some())
    }

    pub(crate) fn upvalue_slot(&self, r: ObjRef) -> Option<usize> {
        match &self.upvalue(r).state {
            UpvalueState::Open(slot) => Some(*slot),
            UpvalueState::Closed(_) => None,
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
