//! Tests for hookfunction and restorefunction.
//!
//! Every target/hook representation pair is exercised through the Rust API,
//! and the common scenarios once more through scripts.

extern crate hookvm;

use hookvm::runner::api::Runtime;
use hookvm::runner::closures::{classify, hookfunction, newcclosure, restorefunction, ClosureKind};
use hookvm::runner::ds::closure::FunctionRef;
use hookvm::runner::ds::error::RuntimeError;
use hookvm::runner::ds::value::Value;
use hookvm::runner::plugin::types::{NativeCall, NativeOutcome};

/// Native body that prints its first upvalue.
fn say(rt: &mut Runtime, call: &NativeCall, _args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let word = call.callee.upvalues().first().cloned().unwrap_or(Value::Nil);
    rt.write_output(word.to_string());
    Ok(NativeOutcome::Return(vec![]))
}

fn print_a(rt: &mut Runtime, _call: &NativeCall, _args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    rt.write_output("A".to_string());
    Ok(NativeOutcome::Return(vec![]))
}

type Maker = fn(&mut Runtime, &str) -> FunctionRef;

fn native(rt: &mut Runtime, word: &str) -> FunctionRef {
    rt.new_native_with_upvalues(say, "say", vec![Value::from(word)])
        .unwrap()
}

fn interpreted(rt: &mut Runtime, word: &str) -> FunctionRef {
    let values = rt
        .exec(&format!("return function() print(\"{}\") end", word))
        .unwrap();
    values[0].as_function().unwrap().clone()
}

fn wrapped(rt: &mut Runtime, word: &str) -> FunctionRef {
    let inner = interpreted(rt, word);
    newcclosure(rt, &inner, None).unwrap()
}

fn run(rt: &mut Runtime, f: &FunctionRef) -> Vec<String> {
    rt.call(f, vec![]).unwrap();
    rt.take_output()
}

fn global(rt: &Runtime, name: &str) -> FunctionRef {
    rt.tool_globals()
        .borrow()
        .get(name)
        .as_function()
        .cloned()
        .unwrap_or_else(|| panic!("{} should be a function", name))
}

fn assert_hook_cycle(target: Maker, hook: Maker) {
    let mut rt = Runtime::new();
    let t = target(&mut rt, "T");
    let h = hook(&mut rt, "H");
    let kind_before = classify(rt.closures(), &t);
    let id_before = t.id();

    let backup = hookfunction(&mut rt, &t, &h).unwrap();
    assert_eq!(t.id(), id_before);
    assert_eq!(t.representation(), backup.representation());
    assert_eq!(run(&mut rt, &t), vec!["H"]);
    assert_eq!(run(&mut rt, &backup), vec!["T"]);

    assert!(restorefunction(&mut rt, &t).unwrap());
    assert_eq!(run(&mut rt, &t), vec!["T"]);
    assert_eq!(classify(rt.closures(), &t), kind_before);
    assert_eq!(rt.closures().hook_count(), 0);
}

// ============================================================================
// Representation pairs
// ============================================================================

mod pairs {
    use super::*;

    #[test]
    fn test_native_hooked_with_native() {
        assert_hook_cycle(native, native);
    }

    #[test]
    fn test_native_hooked_with_interpreted() {
        assert_hook_cycle(native, interpreted);
    }

    #[test]
    fn test_native_hooked_with_wrapped() {
        assert_hook_cycle(native, wrapped);
    }

    #[test]
    fn test_interpreted_hooked_with_native() {
        assert_hook_cycle(interpreted, native);
    }

    #[test]
    fn test_interpreted_hooked_with_interpreted() {
        assert_hook_cycle(interpreted, interpreted);
    }

    #[test]
    fn test_interpreted_hooked_with_wrapped() {
        assert_hook_cycle(interpreted, wrapped);
    }

    #[test]
    fn test_wrapped_hooked_with_native() {
        assert_hook_cycle(wrapped, native);
    }

    #[test]
    fn test_wrapped_hooked_with_interpreted() {
        assert_hook_cycle(wrapped, interpreted);
    }

    #[test]
    fn test_wrapped_hooked_with_wrapped() {
        assert_hook_cycle(wrapped, wrapped);
    }

    #[test]
    fn test_native_target_becomes_wrapped_for_interpreted_hook() {
        let mut rt = Runtime::new();
        let t = native(&mut rt, "T");
        let h = interpreted(&mut rt, "H");
        hookfunction(&mut rt, &t, &h).unwrap();
        assert_eq!(classify(rt.closures(), &t), ClosureKind::Wrapped);
        assert!(t.is_native());
    }

    #[test]
    fn test_interpreted_target_stays_interpreted_for_native_hook() {
        let mut rt = Runtime::new();
        let t = interpreted(&mut rt, "T");
        let h = native(&mut rt, "H");
        hookfunction(&mut rt, &t, &h).unwrap();
        assert_eq!(classify(rt.closures(), &t), ClosureKind::Interpreted);
    }
}

// ============================================================================
// Backups and restoring
// ============================================================================

mod backups {
    use super::*;

    #[test]
    fn test_second_hook_reuses_backup() {
        let mut rt = Runtime::new();
        let t = native(&mut rt, "T");
        let h1 = interpreted(&mut rt, "H1");
        let h2 = interpreted(&mut rt, "H2");

        let first = hookfunction(&mut rt, &t, &h1).unwrap();
        let second = hookfunction(&mut rt, &t, &h2).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(run(&mut rt, &t), vec!["H2"]);

        assert!(restorefunction(&mut rt, &t).unwrap());
        assert_eq!(run(&mut rt, &t), vec!["T"]);
    }

    #[test]
    fn test_second_hook_across_representations() {
        let mut rt = Runtime::new();
        let t = interpreted(&mut rt, "T");
        let h1 = native(&mut rt, "H1");
        let h2 = interpreted(&mut rt, "H2");

        hookfunction(&mut rt, &t, &h1).unwrap();
        hookfunction(&mut rt, &t, &h2).unwrap();
        assert_eq!(run(&mut rt, &t), vec!["H2"]);
        restorefunction(&mut rt, &t).unwrap();
        assert_eq!(run(&mut rt, &t), vec!["T"]);
    }

    #[test]
    fn test_restore_brings_back_exact_contents() {
        let mut rt = Runtime::new();
        let values = rt
            .exec(r#"local word = "T" return function() print(word) end"#)
            .unwrap();
        let t = values[0].as_function().unwrap().clone();
        let proto = t.proto().unwrap();
        let upvalues = t.upvalues();
        let env = t.env();

        let values = rt
            .exec(r#"local word = "H" return function() print(word) end"#)
            .unwrap();
        let h = values[0].as_function().unwrap().clone();
        hookfunction(&mut rt, &t, &h).unwrap();
        assert!(!std::rc::Rc::ptr_eq(&t.proto().unwrap(), &proto));

        restorefunction(&mut rt, &t).unwrap();
        assert!(std::rc::Rc::ptr_eq(&t.proto().unwrap(), &proto));
        assert_eq!(t.upvalues(), upvalues);
        assert!(std::rc::Rc::ptr_eq(&t.env(), &env));
    }

    #[test]
    fn test_restore_unhooked_returns_false() {
        let mut rt = Runtime::new();
        let t = interpreted(&mut rt, "T");
        assert!(!restorefunction(&mut rt, &t).unwrap());
        assert_eq!(run(&mut rt, &t), vec!["T"]);
    }

    #[test]
    fn test_restore_twice() {
        let mut rt = Runtime::new();
        let t = native(&mut rt, "T");
        let h = native(&mut rt, "H");
        hookfunction(&mut rt, &t, &h).unwrap();
        assert!(restorefunction(&mut rt, &t).unwrap());
        assert!(!restorefunction(&mut rt, &t).unwrap());
    }

    #[test]
    fn test_hook_and_restore_release_all_anchors() {
        let mut rt = Runtime::new();
        let t = native(&mut rt, "T");
        let h = interpreted(&mut rt, "H");
        hookfunction(&mut rt, &t, &h).unwrap();
        assert!(rt.live_anchors() > 0);
        restorefunction(&mut rt, &t).unwrap();
        assert_eq!(rt.live_anchors(), 0);
        assert_eq!(rt.closures().anchors().len(), 0);
    }
}

// ============================================================================
// Upvalue capacity
// ============================================================================

mod capacity {
    use super::*;

    #[test]
    fn test_interpreted_hook_with_too_many_upvalues() {
        let mut rt = Runtime::new();
        let t = interpreted(&mut rt, "T");
        let values = rt
            .exec(r#"local word = "H" return function() print(word) end"#)
            .unwrap();
        let h = values[0].as_function().unwrap().clone();

        let err = hookfunction(&mut rt, &t, &h).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::UpvalueCapacity {
                function: "hookfunction".to_string(),
                needed: 1,
                available: 0,
            }
        );
        // Nothing was touched.
        assert_eq!(run(&mut rt, &t), vec!["T"]);
        assert_eq!(rt.closures().hook_count(), 0);
        assert_eq!(rt.live_anchors(), 0);
    }

    #[test]
    fn test_native_hook_with_too_many_upvalues() {
        let mut rt = Runtime::new();
        let t = rt.new_native(print_a, "print_a").unwrap();
        let h = native(&mut rt, "H");
        let err = hookfunction(&mut rt, &t, &h).unwrap_err();
        assert!(matches!(err, RuntimeError::UpvalueCapacity { needed: 1, available: 0, .. }));
        assert_eq!(run(&mut rt, &t), vec!["A"]);
    }

    #[test]
    fn test_hook_with_fewer_upvalues_fits() {
        let mut rt = Runtime::new();
        let values = rt
            .exec(r#"local word = "T" return function() print(word) end"#)
            .unwrap();
        let t = values[0].as_function().unwrap().clone();
        let h = interpreted(&mut rt, "H");
        hookfunction(&mut rt, &t, &h).unwrap();
        assert_eq!(run(&mut rt, &t), vec!["H"]);
        assert_eq!(t.capacity(), 1);
    }
}

// ============================================================================
// Scripts
// ============================================================================

mod scripts {
    use super::*;

    #[test]
    fn test_native_hooked_by_script_function() {
        let mut rt = Runtime::new();
        rt.register("A", print_a).unwrap();
        rt.exec(r#"B = function() print("B") end"#).unwrap();
        let a = global(&rt, "A");

        rt.exec(
            r#"
            assert_wrapped_before = isnewcclosure(A)
            backup = hookfunction(A, B)
            A()
            backup()
            "#,
        )
        .unwrap();
        assert_eq!(rt.take_output(), vec!["B", "A"]);
        assert_eq!(
            rt.tool_globals().borrow().get("assert_wrapped_before"),
            Value::Boolean(false)
        );
        // A native target hooked with a script function becomes a wrapper.
        assert_eq!(rt.exec("return isnewcclosure(A)").unwrap(), vec![Value::Boolean(true)]);
        assert_eq!(classify(rt.closures(), &a), ClosureKind::Wrapped);

        let restored = rt.exec("return restorefunction(A)").unwrap();
        assert_eq!(restored, vec![Value::Boolean(true)]);
        rt.exec("A()").unwrap();
        assert_eq!(rt.take_output(), vec!["A"]);
        assert_eq!(rt.exec("return isnewcclosure(A)").unwrap(), vec![Value::Boolean(false)]);
    }

    #[test]
    fn test_hook_aliases() {
        let mut rt = Runtime::new();
        rt.exec(
            r#"
            function f() print("f") end
            hookfunc(f, function() print("g") end)
            f()
            replaceclosure(f, function() print("h") end)
            f()
            "#,
        )
        .unwrap();
        assert_eq!(rt.take_output(), vec!["g", "h"]);
    }

    #[test]
    fn test_every_reference_sees_the_hook() {
        let mut rt = Runtime::new();
        rt.exec(
            r#"
            function f() print("old") end
            local saved = f
            local holder = function() saved() end
            hookfunction(f, function() print("new") end)
            holder()
            "#,
        )
        .unwrap();
        assert_eq!(rt.take_output(), vec!["new"]);
    }

    #[test]
    fn test_hook_arguments_and_results() {
        let mut rt = Runtime::new();
        let values = rt
            .exec(
                r#"
                function greet(name) return "hello " .. name end
                local old = hookfunction(greet, function(name) return "bye " .. name end)
                return greet("a"), old("b")
                "#,
            )
            .unwrap();
        assert_eq!(values, vec![Value::from("bye a"), Value::from("hello b")]);
    }

    #[test]
    fn test_hook_calling_target_reaches_backup() {
        let mut rt = Runtime::new();
        rt.register("A", print_a).unwrap();
        rt.exec(
            r#"
            hookfunction(A, function() print("hook") A() end)
            A()
            "#,
        )
        .unwrap();
        assert_eq!(rt.take_output(), vec!["hook", "A"]);
    }

    #[test]
    fn test_wrapper_of_hook_survives_restore() {
        let mut rt = Runtime::new();
        rt.register("A", print_a).unwrap();
        let values = rt
            .exec(
                r#"
                B = function() print("B") end
                hookfunction(A, B)
                w = newcclosure(B)
                restorefunction(A)
                w()
                A()
                return w == A, isnewcclosure(w)
                "#,
            )
            .unwrap();
        assert_eq!(rt.take_output(), vec!["B", "A"]);
        assert_eq!(values, vec![Value::Boolean(false), Value::Boolean(true)]);
    }

    #[test]
    fn test_hook_rejects_non_functions() {
        let mut rt = Runtime::new();
        let err = rt.exec("hookfunction(print, 1)").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid argument #2 to 'hookfunction' (function expected, got number)"
        );
    }
}

// ============================================================================
// Forwarding cycles
// ============================================================================

mod cycles {
    use super::*;

    const CYCLE_ERROR: &str = "invalid argument #2 to 'hookfunction' (hook forwards back to the target)";

    #[test]
    fn test_hook_with_wrapper_of_target_is_rejected() {
        let mut rt = Runtime::new();
        let w = wrapped(&mut rt, "W");
        let n = native(&mut rt, "N");
        hookfunction(&mut rt, &w, &n).unwrap();

        let err = hookfunction(&mut rt, &n, &w).unwrap_err();
        assert_eq!(err.to_string(), CYCLE_ERROR);
        assert_eq!(classify(rt.closures(), &n), ClosureKind::Native);
        assert!(!rt.closures().is_hooked(n.id()));
        assert_eq!(run(&mut rt, &n), vec!["N"]);
        assert_eq!(run(&mut rt, &w), vec!["N"]);
    }

    #[test]
    fn test_two_step_cycle_is_rejected() {
        let mut rt = Runtime::new();
        let (w1, w2) = (wrapped(&mut rt, "X"), wrapped(&mut rt, "Y"));
        let (n1, n2) = (native(&mut rt, "N1"), native(&mut rt, "N2"));
        hookfunction(&mut rt, &w1, &n2).unwrap();
        hookfunction(&mut rt, &w2, &n1).unwrap();
        hookfunction(&mut rt, &n1, &w1).unwrap();

        let err = hookfunction(&mut rt, &n2, &w2).unwrap_err();
        assert_eq!(err.to_string(), CYCLE_ERROR);
        assert_eq!(run(&mut rt, &n1), vec!["N2"]);
        assert_eq!(run(&mut rt, &n2), vec!["N2"]);
    }

    #[test]
    fn test_compare_after_rejected_cycle() {
        let mut rt = Runtime::new();
        rt.register("N", print_a).unwrap();
        rt.register("M", print_a).unwrap();
        rt.exec(
            r#"
            W = newcclosure(function() print("w") end)
            V = newcclosure(function() print("v") end)
            hookfunction(W, N)
            hookfunction(V, M)
            "#,
        )
        .unwrap();
        let err = rt.exec("hookfunction(N, W)").unwrap_err();
        assert_eq!(err.to_string(), CYCLE_ERROR);

        let values = rt
            .exec("return comparefunctions(W, V), comparefunctions(N, M), iscclosure(N)")
            .unwrap();
        assert_eq!(values, vec![Value::Boolean(true); 3]);
    }
}
