use hypl::Interpreter;
use pretty_assertions::assert_eq;

fn run(source: &str) -> String {
    let mut interp = Interpreter::with_std();
    interp.run(source).unwrap();
    interp.take_output()
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(run("print 1 + 2 * 3;"), "7\n");
    assert_eq!(run("print (1 + 2) * 3;"), "9\n");
    assert_eq!(run("print 10 - 4 - 3;"), "3\n");
    assert_eq!(run("print -5 + 2;"), "-3\n");
}

#[test]
fn integer_and_double_semantics() {
    // Two ints stay integral, a double operand promotes.
    assert_eq!(run("print 10 / 4;"), "2\n");
    assert_eq!(run("print 10.0 / 4;"), "2.5\n");
    assert_eq!(run("print 1.5 + 1;"), "2.5\n");
    assert_eq!(run("print 2.0;"), "2\n");
    assert_eq!(run("print 0.5;"), "0.5\n");
    // Equality never crosses the int/double boundary.
    assert_eq!(run("print 1 == 1.0;"), "false\n");
    assert_eq!(run("print 1 < 1.5;"), "true\n");
}

#[test]
fn modulo_and_power_are_integral() {
    assert_eq!(run("print 10 % 3;"), "1\n");
    assert_eq!(run("print 2 ^ 10;"), "1024\n");
    assert_eq!(run("print 2.9 ^ 2;"), "4\n");
    assert_eq!(run("print 3 ^ 0;"), "1\n");
}

#[test]
fn string_concatenation() {
    assert_eq!(run(r#"let s = "hi"; print s + " there";"#), "hi there\n");
    assert_eq!(run(r#"print "a" + "b" + "c";"#), "abc\n");
}

#[test]
fn interned_strings_compare_equal_by_identity() {
    assert_eq!(run(r#"print "ab" == "ab";"#), "true\n");
    assert_eq!(run(r#"print "a" + "b" == "ab";"#), "true\n");
    assert_eq!(run(r#"print "ab" == "ba";"#), "false\n");
}

#[test]
fn truthiness_only_nil_and_false_are_falsey() {
    assert_eq!(run("print !nil;"), "true\n");
    assert_eq!(run("print !false;"), "true\n");
    assert_eq!(run("print !0;"), "false\n");
    assert_eq!(run(r#"print !"";"#), "false\n");
    assert_eq!(run(r#"if (0) print "t"; else print "f";"#), "t\n");
}

#[test]
fn comparison_operators() {
    assert_eq!(run("print 2 > 1;"), "true\n");
    assert_eq!(run("print 2 >= 2;"), "true\n");
    assert_eq!(run("print 1 <= 0;"), "false\n");
    assert_eq!(run("print 1 != 2;"), "true\n");
}

#[test]
fn and_or_short_circuit_to_operand_values() {
    assert_eq!(run("print true and 1;"), "1\n");
    assert_eq!(run("print false and 1;"), "false\n");
    assert_eq!(run(r#"print nil or "x";"#), "x\n");
    assert_eq!(run("print 1 or 2;"), "1\n");
}

#[test]
fn global_and_local_scoping() {
    assert_eq!(
        run(r#"let x = "outer"; { let x = "inner"; print x; } print x;"#),
        "inner\nouter\n"
    );
    assert_eq!(
        run("let a = 1; { let b = 2; { let c = 3; print a + b + c; } }"),
        "6\n"
    );
}

#[test]
fn assignment_is_an_expression() {
    assert_eq!(run("let x = 1; print x = 2;"), "2\n");
    assert_eq!(run("let a = 1; let b = 2; a = b = 3; print a + b;"), "6\n");
}

#[test]
fn if_else_statements() {
    assert_eq!(run(r#"if (1 < 2) print "yes"; else print "no";"#), "yes\n");
    assert_eq!(run(r#"if (1 > 2) print "yes"; else print "no";"#), "no\n");
    assert_eq!(run(r#"if (false) print "skipped";"#), "");
}

#[test]
fn while_loop() {
    assert_eq!(
        run("let sum = 0; let i = 1; while (i <= 4) { sum = sum + i; inc i; } print sum;"),
        "10\n"
    );
}

#[test]
fn for_loop_with_inc() {
    assert_eq!(run("for (let i = 0; i < 3; inc i) print i;"), "0\n1\n2\n");
}

#[test]
fn for_loop_clauses_are_optional() {
    assert_eq!(
        run("let i = 0; for (; i < 2;) { print i; inc i; }"),
        "0\n1\n"
    );
}

#[test]
fn inc_and_dec_statements() {
    assert_eq!(run("let x = 5; inc x; dec x; dec x; print x;"), "4\n");
    assert_eq!(run("let y = 1; decr y; print y;"), "0\n");
    assert_eq!(run("let z = 0; print inc z; print z;"), "1\n1\n");
}

#[test]
fn print_pipe_stays_on_line() {
    assert_eq!(run("print | 1; print | 2; print 3;"), "123\n");
}

#[test]
fn functions_and_recursion() {
    assert_eq!(
        run("fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);"),
        "55\n"
    );
    assert_eq!(
        run("fun add(a, b, c) { return a + b + c; } print add(1, 2, 3);"),
        "6\n"
    );
}

#[test]
fn function_without_return_yields_nil() {
    assert_eq!(run("fun noop() {} print noop();"), "nil\n");
}

#[test]
fn functions_print_with_their_names() {
    assert_eq!(run("fun greet() {} print greet;"), "<fn greet>\n");
}

#[test]
fn lists_build_index_and_store() {
    assert_eq!(run("let l = [1, 2, 3]; print l[0] + l[2];"), "4\n");
    assert_eq!(run("let l = [1, 2, 3]; l[1] = 42; print l;"), "[1, 42, 3]\n");
    assert_eq!(run(r#"print [1, "two", nil];"#), "[1, two, nil]\n");
    assert_eq!(run("print [];"), "[]\n");
    // Store leaves the stored value as the expression result.
    assert_eq!(run("let l = [0]; print l[0] = 9;"), "9\n");
}

#[test]
fn globals_persist_across_runs() {
    let mut interp = Interpreter::new();
    interp.run("let x = 41;").unwrap();
    interp.run("x = x + 1;").unwrap();
    interp.run("print x;").unwrap();
    assert_eq!(interp.take_output(), "42\n");
}

#[test]
fn nested_block_expression_statement_balance() {
    // The value stack must come back empty through arbitrary statement
    // nesting; a leak would surface as wrong output or a debug assert.
    assert_eq!(
        run("let n = 0; { 1 + 2; { n = n + 1; } 3 + 4; } print n;"),
        "1\n"
    );
}

#[test]
fn gc_stress_mode_runs_programs_to_completion() {
    let mut interp = Interpreter::with_std();
    interp.set_gc_stress(true);
    interp
        .run(
            r#"
            let s = "";
            for (let i = 0; i < 20; inc i) {
                s = s + "x";
            }
            print s;
            fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
            print fib(10);
            "#,
        )
        .unwrap();
    assert_eq!(
        interp.take_output(),
        "xxxxxxxxxxxxxxxxxxxx\n55\n"
    );
}
