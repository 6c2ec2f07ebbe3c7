use hypl::{Error, Interpreter, Value};
use pretty_assertions::assert_eq;

fn run(source: &str) -> String {
    let mut interp = Interpreter::with_std();
    interp.run(source).unwrap();
    interp.take_output()
}

// ---------------------------------------------------------------------------
// Standard modules
// ---------------------------------------------------------------------------

#[test]
fn math_module() {
    let source = r#"
        import std math;
        print math:floor(2.7);
        print math:ceil(2.1);
        print math:abs(-5);
        print math:abs(-5.5);
        print math:fac(5);
        print math:sqrt(16.0);
        print math:pow(2.0, 10.0);
        print math:pow(9.0, 0.5);
        print math:pi() > 3.14 and math:pi() < 3.15;
    "#;
    assert_eq!(run(source), "2\n3\n5\n5.5\n120\n4\n1024\n3\ntrue\n");
}

#[test]
fn list_module() {
    let source = r#"
        import std list;
        let l = [1, 2, 3];
        list:push_back(l, 4);
        print l;
        print list:len(l);
        list:erase(l, 0);
        print l;
        print list:init(3, "x");
    "#;
    assert_eq!(run(source), "[1, 2, 3, 4]\n4\n[2, 3, 4]\n[x, x, x]\n");
}

#[test]
fn string_module() {
    let source = r#"
        import std string;
        print string:len("abcde");
        print string:len("");
        print string:len(42);
    "#;
    assert_eq!(run(source), "5\n0\nnil\n");
}

#[test]
fn type_conversion_module() {
    let source = r#"
        import std type_conv;
        print type_conv:to_string(42) + "!";
        print type_conv:to_string(true);
        print type_conv:to_double(3);
        print type_conv:to_double("nope");
    "#;
    assert_eq!(run(source), "42!\ntrue\n3\nnil\n");
}

#[test]
fn time_and_random_modules() {
    let source = r#"
        import std time;
        import std random;
        let before = time:clock();
        let after = time:clock();
        print before >= 0.0 and before < 60.0;
        print after >= before;
        let r = random:rand();
        print r >= 0.0 and r < 1.0;
    "#;
    // The clock measures elapsed time from engine start, so a fresh
    // engine reads near zero and the reading never goes backwards.
    assert_eq!(run(source), "true\ntrue\ntrue\n");
}

#[test]
fn std_natives_are_invisible_until_imported() {
    let mut interp = Interpreter::with_std();
    let err = interp.run("print math:floor(1.5);").unwrap_err();
    match err {
        Error::Runtime { message, .. } => {
            assert_eq!(message, "Undefined variable 'math:floor'.");
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Host natives
// ---------------------------------------------------------------------------

#[test]
fn host_registered_natives() {
    let mut interp = Interpreter::new();
    interp.register_native("add_pair", |_, args| {
        match (args.first().copied(), args.get(1).copied()) {
            (Some(Value::Int(a)), Some(Value::Int(b))) => Ok(Value::Int(a + b)),
            _ => Ok(Value::Nil),
        }
    });
    interp.run("print add_pair(20, 22);").unwrap();
    assert_eq!(interp.take_output(), "42\n");
}

#[test]
fn natives_can_allocate_values() {
    let mut interp = Interpreter::new();
    interp.register_native("shout", |vm, args| {
        let text = args
            .first()
            .and_then(|&v| vm.string_chars(v).map(str::to_uppercase));
        match text {
            Some(text) => Ok(vm.new_string(&text)),
            None => Ok(Value::Nil),
        }
    });
    interp.register_native("pair", |vm, args| {
        let items = args.to_vec();
        Ok(vm.new_list(items))
    });
    interp.run(r#"print shout("hey"); print pair(1, 2);"#).unwrap();
    assert_eq!(interp.take_output(), "HEY\n[1, 2]\n");
}

#[test]
fn native_errors_surface_as_runtime_errors() {
    let mut interp = Interpreter::new();
    interp.register_native("explode", |_, _| Err("the native exploded".to_string()));
    let err = interp.run("explode();").unwrap_err();
    match err {
        Error::Runtime { message, trace } => {
            assert_eq!(message, "the native exploded");
            assert_eq!(trace, vec!["[line 1] in script"]);
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// File imports
// ---------------------------------------------------------------------------

#[test]
fn import_runs_a_module_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("helpers.hypl"),
        "fun double(x) { return x * 2; }\nlet greeting = \"hey\";\n",
    )
    .unwrap();

    let mut interp = Interpreter::with_std();
    interp.set_module_root(dir.path());
    interp
        .run("import helpers; print double(21); print greeting;")
        .unwrap();
    assert_eq!(interp.take_output(), "42\nhey\n");
}

#[test]
fn import_path_separator_is_at_sign() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("util")).unwrap();
    std::fs::write(
        dir.path().join("util").join("answers.hypl"),
        "let answer = 42;\n",
    )
    .unwrap();

    let mut interp = Interpreter::with_std();
    interp.set_module_root(dir.path());
    interp.run("import util@answers; print answer;").unwrap();
    assert_eq!(interp.take_output(), "42\n");
}

#[test]
fn module_top_level_statements_run_at_import() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("noisy.hypl"), "print \"loading\";\n").unwrap();

    let mut interp = Interpreter::with_std();
    interp.set_module_root(dir.path());
    interp.run("import noisy; print \"done\";").unwrap();
    assert_eq!(interp.take_output(), "loading\ndone\n");
}

#[test]
fn missing_module_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut interp = Interpreter::with_std();
    interp.set_module_root(dir.path());
    let err = interp.run("import nope;").unwrap_err();
    match err {
        Error::Runtime { message, .. } => {
            assert!(message.starts_with("Could not open module file"), "{message}");
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn broken_module_reports_its_compile_errors() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad.hypl"), "let;\n").unwrap();

    let mut interp = Interpreter::with_std();
    interp.set_module_root(dir.path());
    let err = interp.run("import bad;").unwrap_err();
    match err {
        Error::Runtime { message, .. } => {
            assert!(message.contains("Could not compile module 'bad'."), "{message}");
            assert!(message.contains("Expect variable name."), "{message}");
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}
