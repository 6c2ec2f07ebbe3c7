//! Standard-library native modules.
//!
//! Each module is an installer that `import std NAME;` runs once: it
//! registers a handful of natives into the globals table under namespaced
//! names (`math:floor`, `list:len`, ...). Natives are deliberately
//! lenient the way the rest of the runtime is strict: a call with the
//! wrong argument shape returns `nil` rather than raising.

use std::io::BufRead;
use std::sync::Arc;

use crate::object::{NativeFn, Obj, ObjRef};
use crate::value::Value;
use crate::vm::Vm;

/// Registers every built-in module installer on the VM. Nothing is
/// defined until a script actually imports the module.
pub fn register_std(vm: &mut Vm) {
    vm.register_std_module("math", math_module_init);
    vm.register_std_module("list", list_module_init);
    vm.register_std_module("string", string_module_init);
    vm.register_std_module("type_conv", type_conversion_module_init);
    vm.register_std_module("time", time_module_init);
    vm.register_std_module("random", random_module_init);
    vm.register_std_module("console", console_module_init);
}

fn define<F>(vm: &mut Vm, name: &str, f: F)
where
    F: Fn(&mut Vm, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
{
    vm.define_native(name, Arc::new(f) as NativeFn);
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).copied().unwrap_or(Value::Nil)
}

fn float_arg(args: &[Value], index: usize) -> Option<f64> {
    arg(args, index).as_f64()
}

fn int_arg(args: &[Value], index: usize) -> Option<i64> {
    match arg(args, index) {
        Value::Int(i) => Some(i),
        _ => None,
    }
}

fn list_arg(vm: &Vm, args: &[Value], index: usize) -> Option<ObjRef> {
    arg(args, index)
        .as_obj()
        .filter(|&r| matches!(vm.heap.obj(r), Obj::List(_)))
}

// ============================================================================
// math module
// ============================================================================

fn math_module_init(vm: &mut Vm) {
    define(vm, "math:pi", |_, _| Ok(Value::Double(std::f64::consts::PI)));
    define(vm, "math:abs", |_, args| {
        Ok(match arg(args, 0) {
            Value::Int(i) => Value::Int(i.wrapping_abs()),
            Value::Double(d) => Value::Double(d.abs()),
            _ => Value::Nil,
        })
    });
    define(vm, "math:fac", |_, args| {
        let Some(n) = int_arg(args, 0) else {
            return Ok(Value::Nil);
        };
        let mut result: i64 = 1;
        for i in 2..=n.max(1) {
            result = result.wrapping_mul(i);
        }
        Ok(Value::Int(result))
    });
    define(vm, "math:ceil", |_, args| {
        Ok(float_arg(args, 0).map_or(Value::Nil, |x| Value::Int(x.ceil() as i64)))
    });
    define(vm, "math:floor", |_, args| {
        Ok(float_arg(args, 0).map_or(Value::Nil, |x| Value::Int(x.floor() as i64)))
    });
    define(vm, "math:sin", |_, args| {
        Ok(float_arg(args, 0).map_or(Value::Nil, |x| Value::Double(x.sin())))
    });
    define(vm, "math:cos", |_, args| {
        Ok(float_arg(args, 0).map_or(Value::Nil, |x| Value::Double(x.cos())))
    });
    define(vm, "math:sqrt", |_, args| {
        Ok(float_arg(args, 0).map_or(Value::Nil, |x| Value::Double(x.sqrt())))
    });
    define(vm, "math:pow", |_, args| {
        match (float_arg(args, 0), float_arg(args, 1)) {
            (Some(base), Some(exponent)) => Ok(Value::Double(base.powf(exponent))),
            _ => Ok(Value::Nil),
        }
    });
}

// ============================================================================
// list module
// ============================================================================

fn list_module_init(vm: &mut Vm) {
    define(vm, "list:push_back", |vm, args| {
        let Some(list) = list_arg(vm, args, 0) else {
            return Ok(Value::Nil);
        };
        let item = arg(args, 1);
        vm.heap.list_mut(list).items.push(item);
        Ok(Value::Nil)
    });
    define(vm, "list:erase", |vm, args| {
        let (Some(list), Some(index)) = (list_arg(vm, args, 0), int_arg(args, 1)) else {
            return Ok(Value::Nil);
        };
        let length = vm.heap.list(list).items.len();
        if index >= 0 && (index as usize) < length {
            vm.heap.list_mut(list).items.remove(index as usize);
        }
        Ok(Value::Nil)
    });
    define(vm, "list:init", |vm, args| {
        let Some(count) = int_arg(args, 0) else {
            return Ok(Value::Nil);
        };
        let fill = arg(args, 1);
        let items = vec![fill; count.max(0) as usize];
        Ok(vm.new_list(items))
    });
    define(vm, "list:len", |vm, args| {
        Ok(list_arg(vm, args, 0)
            .map_or(Value::Nil, |list| Value::Int(vm.heap.list(list).items.len() as i64)))
    });
}

// ============================================================================
// string module
// ============================================================================

fn string_module_init(vm: &mut Vm) {
    define(vm, "string:len", |vm, args| {
        Ok(vm
            .string_chars(arg(args, 0))
            .map_or(Value::Nil, |s| Value::Int(s.len() as i64)))
    });
}

// ============================================================================
// type_conv module
// ============================================================================

fn type_conversion_module_init(vm: &mut Vm) {
    define(vm, "type_conv:to_string", |vm, args| {
        let rendered = vm.show_value(arg(args, 0));
        Ok(vm.new_string(&rendered))
    });
    define(vm, "type_conv:to_double", |_, args| {
        Ok(match arg(args, 0) {
            Value::Double(d) => Value::Double(d),
            Value::Int(i) => Value::Double(i as f64),
            _ => Value::Nil,
        })
    });
}

// ============================================================================
// time module
// ============================================================================

fn time_module_init(vm: &mut Vm) {
    // Elapsed seconds since the engine started, for timing script work.
    define(vm, "time:clock", |vm, _| Ok(Value::Double(vm.clock_seconds())));
}

// ============================================================================
// random module
// ============================================================================

fn random_module_init(vm: &mut Vm) {
    define(vm, "random:rand", |_, _| Ok(Value::Double(rand::random::<f64>())));
}

// ============================================================================
// console module
// ============================================================================

fn console_module_init(vm: &mut Vm) {
    define(vm, "console:get_line", |vm, _| {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => Ok(Value::Nil),
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                }
                Ok(vm.new_string(&line))
            }
        }
    });
}
