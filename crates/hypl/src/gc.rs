//! Tri-color mark-and-sweep collection over the [`Heap`] arena.
//!
//! White objects are the unmarked ones, gray objects sit on the worklist,
//! and an object is black once its referents have been pushed. A cycle
//! marks the caller's [`Roots`], drains the worklist, prunes dead strings
//! out of the weak intern table, and finally frees every slot left
//! unmarked.

use crate::heap::Heap;
use crate::object::{Obj, ObjRef, UpvalueState};
use crate::table::Table;
use crate::value::Value;
use crate::vm::CallFrame;

/// Everything outside the heap that can keep an object alive.
///
/// The interpreter passes its full state; the compiler passes its chain of
/// in-progress functions (plus the globals that already exist when it
/// runs, so a mid-compile collection cannot eat them).
pub struct Roots<'a> {
    pub stack: &'a [Value],
    pub frames: &'a [CallFrame],
    pub open_upvalues: &'a [ObjRef],
    pub globals: Option<&'a Table>,
    pub init_string: Option<ObjRef>,
    pub compiler_functions: &'a [ObjRef],
}

impl Roots<'static> {
    /// No external roots; only the heap's own temp-root stack survives.
    pub fn none() -> Roots<'static> {
        Roots {
            stack: &[],
            frames: &[],
            open_upvalues: &[],
            globals: None,
            init_string: None,
            compiler_functions: &[],
        }
    }
}

impl Heap {
    /// Runs one full collection cycle.
    pub fn collect(&mut self, roots: &Roots) {
        let before = self.bytes_allocated;
        tracing::debug!(target: "hypl::gc", bytes = before, "gc start");

        self.mark_roots(roots);
        self.trace_references();
        self.remove_dead_strings();
        let freed = self.sweep();

        self.next_gc = self.bytes_allocated * 2;
        tracing::debug!(
            target: "hypl::gc",
            freed,
            reclaimed = before - self.bytes_allocated,
            live_bytes = self.bytes_allocated,
            next_gc = self.next_gc,
            "gc end"
        );
    }

    fn mark_roots(&mut self, roots: &Roots) {
        for value in self.temp_roots.clone() {
            self.mark_value(value);
        }
        for &value in roots.stack {
            self.mark_value(value);
        }
        for frame in roots.frames {
            self.mark_object(frame.closure);
        }
        for &upvalue in roots.open_upvalues {
            self.mark_object(upvalue);
        }
        if let Some(globals) = roots.globals {
            self.mark_table(globals);
        }
        if let Some(init) = roots.init_string {
            self.mark_object(init);
        }
        for &function in roots.compiler_functions {
            self.mark_object(function);
        }
    }

    fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key);
            self.mark_value(value);
        }
    }

    pub(crate) fn mark_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    pub(crate) fn mark_object(&mut self, r: ObjRef) {
        let slot = self.slots[r.0 as usize]
            .as_mut()
            .expect("marking freed object");
        if slot.marked {
            return;
        }
        slot.marked = true;
        self.gray.push(r);
    }

    fn trace_references(&mut self) {
        while let Some(r) = self.gray.pop() {
            self.blacken(r);
        }
    }

    /// Pushes everything `r` refers to onto the worklist.
    fn blacken(&mut self, r: ObjRef) {
        let mut refs: Vec<Value> = Vec::new();
        match self.obj(r) {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    refs.push(Value::Obj(name));
                }
                refs.extend_from_slice(&f.chunk.constants);
            }
            Obj::Closure(c) => {
                refs.push(Value::Obj(c.function));
                refs.extend(c.upvalues.iter().map(|&u| Value::Obj(u)));
            }
            Obj::Upvalue(u) => {
                if let UpvalueState::Closed(value) = u.state {
                    refs.push(value);
                }
            }
            Obj::Class(c) => {
                refs.push(Value::Obj(c.name));
                for (key, value) in c.methods.iter() {
                    refs.push(Value::Obj(key));
                    refs.push(value);
                }
            }
            Obj::Instance(i) => {
                refs.push(Value::Obj(i.class));
                for (key, value) in i.fields.iter() {
                    refs.push(Value::Obj(key));
                    refs.push(value);
                }
            }
            Obj::BoundMethod(b) => {
                refs.push(b.receiver);
                refs.push(Value::Obj(b.method));
            }
            Obj::List(l) => {
                refs.extend_from_slice(&l.items);
            }
        }
        for value in refs {
            self.mark_value(value);
        }
    }

    /// Drops intern-table entries whose string did not get marked. Runs
    /// before the sweep so the table never holds a freed handle.
    fn remove_dead_strings(&mut self) {
        let dead: Vec<(ObjRef, u32)> = self
            .strings
            .entries
            .iter()
            .filter_map(|entry| entry.key.map(|key| (key, entry.hash)))
            .filter(|&(key, _)| {
                !self.slots[key.0 as usize]
                    .as_ref()
                    .is_some_and(|slot| slot.marked)
            })
            .collect();
        for (key, hash) in dead {
            self.strings.delete(key, hash);
        }
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for index in 0..self.slots.len() {
            let dead = match &mut self.slots[index] {
                Some(slot) if slot.marked => {
                    slot.marked = false;
                    false
                }
                Some(_) => true,
                None => false,
            };
            if dead {
                self.free_slot(index);
                freed += 1;
            }
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjClosure, ObjFunction, ObjUpvalue};

    #[test]
    fn interning_returns_identical_handles() {
        let mut heap = Heap::new();
        let a = heap.intern("spoon", &Roots::none());
        let b = heap.intern("spoon", &Roots::none());
        assert_eq!(a, b);
        assert_eq!(heap.interned_count(), 1);
    }

    #[test]
    fn collect_frees_unreachable_strings_and_prunes_intern_table() {
        let mut heap = Heap::new();
        let transient = heap.intern("goes away", &Roots::none());
        assert!(heap.is_live(transient));

        heap.collect(&Roots::none());

        assert!(!heap.is_live(transient));
        assert_eq!(heap.interned_count(), 0);
        assert_eq!(heap.find_interned("goes away", crate::object::hash_string("goes away")), None);
    }

    #[test]
    fn stack_roots_survive_collection() {
        let mut heap = Heap::new();
        let kept = heap.intern("kept", &Roots::none());
        let stack = [Value::Obj(kept)];
        heap.collect(&Roots {
            stack: &stack,
            ..Roots::none()
        });
        assert!(heap.is_live(kept));
        assert_eq!(heap.interned_count(), 1);
    }

    #[test]
    fn temp_roots_survive_collection() {
        let mut heap = Heap::new();
        let kept = heap.intern("pinned", &Roots::none());
        heap.push_temp_root(Value::Obj(kept));
        heap.collect(&Roots::none());
        assert!(heap.is_live(kept));
        heap.pop_temp_root();
        heap.collect(&Roots::none());
        assert!(!heap.is_live(kept));
    }

    #[test]
    fn tracing_reaches_through_closures_and_upvalues() {
        let mut heap = Heap::new();
        let name = heap.intern("f", &Roots::none());
        let constant = heap.intern("a constant", &Roots::none());
        let mut function = ObjFunction {
            arity: 0,
            upvalue_count: 1,
            chunk: crate::chunk::Chunk::new(),
            name: Some(name),
        };
        function.chunk.add_constant(Value::Obj(constant));
        let payload = heap.intern("captured", &Roots::none());

        let stack = [
            Value::Obj(name),
            Value::Obj(constant),
            Value::Obj(payload),
        ];
        let keep_all = Roots {
            stack: &stack,
            ..Roots::none()
        };
        let function = heap.allocate(Obj::Function(function), &keep_all);
        let upvalue = heap.allocate(
            Obj::Upvalue(ObjUpvalue {
                state: UpvalueState::Closed(Value::Obj(payload)),
            }),
            &keep_all,
        );
        let closure = heap.allocate(
            Obj::Closure(ObjClosure {
                function,
                upvalues: vec![upvalue],
            }),
            &keep_all,
        );

        // Root only the closure; everything else must survive through it.
        let stack = [Value::Obj(closure)];
        heap.collect(&Roots {
            stack: &stack,
            ..Roots::none()
        });

        for r in [closure, function, upvalue, name, constant, payload] {
            assert!(heap.is_live(r));
        }

        heap.collect(&Roots::none());
        for r in [closure, function, upvalue, name, constant, payload] {
            assert!(!heap.is_live(r));
        }
    }

    #[test]
    fn gc_threshold_doubles_after_cycle() {
        let mut heap = Heap::new();
        let keep = heap.intern("x", &Roots::none());
        let stack = [Value::Obj(keep)];
        heap.collect(&Roots {
            stack: &stack,
            ..Roots::none()
        });
        assert_eq!(heap.next_gc, heap.bytes_allocated() * 2);
    }
}
