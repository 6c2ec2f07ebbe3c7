use hypl::{Error, Interpreter};

fn compile_err(source: &str) -> String {
    let mut interp = Interpreter::with_std();
    match interp.run(source) {
        Err(Error::Compile { message }) => message,
        other => panic!("expected compile error, got {other:?}"),
    }
}

fn runtime_err(source: &str) -> (String, Vec<String>) {
    let mut interp = Interpreter::with_std();
    match interp.run(source) {
        Err(Error::Runtime { message, trace }) => (message, trace),
        other => panic!("expected runtime error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Compile errors
// ---------------------------------------------------------------------------

#[test]
fn compile_error_format_includes_line_and_lexeme() {
    let message = compile_err("let 1 = 2;");
    assert_eq!(message, "[ERROR | 1 line] at '1': Expect variable name.");
}

#[test]
fn compile_error_at_end_of_input() {
    let message = compile_err("print 1");
    assert_eq!(message, "[ERROR | 1 line] at end: Expect ';' after value.");
}

#[test]
fn unexpected_character() {
    let message = compile_err("let a = 1 ~ 2;");
    assert!(message.contains("Unexpected character."), "{message}");
}

#[test]
fn unterminated_string() {
    let message = compile_err("let s = \"oops;");
    assert!(message.contains("Unterminated string."), "{message}");
}

#[test]
fn invalid_assignment_target() {
    let message = compile_err("1 = 2;");
    assert!(message.contains("Invalid assignment target."), "{message}");
    let message = compile_err("let a = 1; let b = 2; a * b = 3;");
    assert!(message.contains("Invalid assignment target."), "{message}");
}

#[test]
fn return_at_top_level_is_rejected() {
    let message = compile_err("return 1;");
    assert!(message.contains("Can't return from top-level code."), "{message}");
}

#[test]
fn initializer_cannot_return_a_value() {
    let message = compile_err("class C { init() { return 1; } }");
    assert!(
        message.contains("Can't return a value from an initializer."),
        "{message}"
    );
}

#[test]
fn this_outside_a_class_is_rejected() {
    let message = compile_err("print this;");
    assert!(message.contains("Can't use 'this' outside of a class."), "{message}");
}

#[test]
fn reading_a_local_in_its_own_initializer() {
    let message = compile_err("{ let a = a; }");
    assert!(
        message.contains("Can't read local variable in its own initializer."),
        "{message}"
    );
}

#[test]
fn duplicate_local_declaration() {
    let message = compile_err("{ let a = 1; let a = 2; }");
    assert!(
        message.contains("Already a variable with this name in this scope."),
        "{message}"
    );
}

#[test]
fn panic_mode_recovers_at_statement_boundaries() {
    // Both statements are broken; both should be reported after the
    // parser resynchronizes on the ';'.
    let message = compile_err("let 1; let 2;");
    let lines: Vec<&str> = message.lines().collect();
    assert_eq!(lines.len(), 2, "{message}");
    assert!(lines[0].contains("Expect variable name."));
    assert!(lines[1].contains("Expect variable name."));
}

#[test]
fn missing_expression() {
    let message = compile_err("print ;");
    assert!(message.contains("Expect expression."), "{message}");
}

// ---------------------------------------------------------------------------
// Runtime errors
// ---------------------------------------------------------------------------

#[test]
fn undefined_variable_read() {
    let (message, trace) = runtime_err("print missing;");
    assert_eq!(message, "Undefined variable 'missing'.");
    assert_eq!(trace, vec!["[line 1] in script"]);
}

#[test]
fn undefined_variable_write_does_not_create() {
    let (message, _) = runtime_err("missing = 1;");
    assert_eq!(message, "Undefined variable 'missing'.");
    // A later read must still fail: the failed write left no binding.
    let (message, _) = runtime_err("fun poke() { ghost = 1; } poke();");
    assert_eq!(message, "Undefined variable 'ghost'.");
}

#[test]
fn stack_trace_lists_frames_most_recent_first() {
    let source = "\
fun inner() { return 1 + nil; }
fun outer() { return inner(); }
outer();";
    let (message, trace) = runtime_err(source);
    assert_eq!(message, "Operands must be two numbers or two strings.");
    assert_eq!(
        trace,
        vec![
            "[line 1] in inner()",
            "[line 2] in outer()",
            "[line 3] in script",
        ]
    );
}

#[test]
fn type_errors_in_arithmetic() {
    let (message, _) = runtime_err(r#"print 1 + "a";"#);
    assert_eq!(message, "Operands must be two numbers or two strings.");
    let (message, _) = runtime_err(r#"print "a" < "b";"#);
    assert_eq!(message, "Operands must be numbers.");
    let (message, _) = runtime_err("print -nil;");
    assert_eq!(message, "Operand must be a number.");
}

#[test]
fn division_by_zero() {
    let (message, _) = runtime_err("print 1 / 0;");
    assert_eq!(message, "Division by zero.");
    let (message, _) = runtime_err("print 1 % 0;");
    assert_eq!(message, "Division by zero.");
}

#[test]
fn negative_power_exponent() {
    let (message, _) = runtime_err("print 2 ^ -1;");
    assert_eq!(message, "Power exponent must be non-negative.");
}

#[test]
fn arity_mismatch() {
    let (message, _) = runtime_err("fun f(a) {} f();");
    assert_eq!(message, "Expected 1 arguments but got 0.");
    let (message, _) = runtime_err("fun f() {} f(1, 2);");
    assert_eq!(message, "Expected 0 arguments but got 2.");
}

#[test]
fn calling_a_non_callable() {
    let (message, _) = runtime_err("let x = 1; x();");
    assert_eq!(message, "Can only call functions and classes.");
    let (message, _) = runtime_err(r#""hello"();"#);
    assert_eq!(message, "Can only call functions and classes.");
}

#[test]
fn unbounded_recursion_overflows_the_frame_stack() {
    let (message, trace) = runtime_err("fun f() { f(); } f();");
    assert_eq!(message, "Stack overflow.");
    assert!(trace.len() > 10);
}

#[test]
fn list_index_errors() {
    let (message, _) = runtime_err("print [1, 2][5];");
    assert_eq!(message, "List index out of range.");
    let (message, _) = runtime_err("print [1, 2][-1];");
    assert_eq!(message, "List index out of range.");
    let (message, _) = runtime_err(r#"print [1, 2]["a"];"#);
    assert_eq!(message, "List index is not a number.");
    let (message, _) = runtime_err("print 1[0];");
    assert_eq!(message, "Invalid type to index into.");
    let (message, _) = runtime_err("let x = 5; x[0] = 1;");
    assert_eq!(message, "Cannot store value in a non-list.");
}

#[test]
fn property_access_on_non_instances() {
    let (message, _) = runtime_err("print nil.field;");
    assert_eq!(message, "Only instances have properties.");
    let (message, _) = runtime_err(r#""s".method();"#);
    assert_eq!(message, "Only instances have methods.");
}

#[test]
fn unknown_std_module() {
    let (message, _) = runtime_err("import std nonsense;");
    assert_eq!(message, "No standard module called 'nonsense'.");
}

#[test]
fn engine_stays_usable_after_a_runtime_error() {
    let mut interp = Interpreter::with_std();
    assert!(interp.run("print missing;").is_err());
    interp.run("print 1 + 1;").unwrap();
    assert_eq!(interp.take_output(), "2\n");
}
