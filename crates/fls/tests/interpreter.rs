//! End-to-end interpreter scenarios: whole programs in, captured output out.

mod common;

use common::{run, run_ok};
use fls::Error;
use pretty_assertions::assert_eq;

#[test]
fn arithmetic_with_precedence() {
    assert_eq!(run_ok("print 1+2*3;"), "7\n");
}

#[test]
fn list_subscripts_read_and_write() {
    assert_eq!(
        run_ok("var a=[1,2,3]; print a[-1]; a[0]=9; print a[0];"),
        "3\n9\n"
    );
}

#[test]
fn recursive_fibonacci() {
    assert_eq!(
        run_ok("fun fib(n){ if(n<2) return n; return fib(n-1)+fib(n-2); } print fib(10);"),
        "55\n"
    );
}

#[test]
fn string_concatenation() {
    assert_eq!(run_ok("var s=\"hi\"; print s+\"!\";"), "hi!\n");
}

#[test]
fn print_literals_round_trip() {
    assert_eq!(run_ok("print 42;"), "42\n");
    assert_eq!(run_ok("print 2.5;"), "2.5\n");
    assert_eq!(run_ok("print true;"), "true\n");
    assert_eq!(run_ok("print false;"), "false\n");
    assert_eq!(run_ok("print nil;"), "nil\n");
    assert_eq!(run_ok("print \"hello\";"), "hello\n");
}

#[test]
fn for_and_while_loops_agree() {
    for n in [0, 1, 7] {
        let for_source = format!("for (var i = 0; i < {n}; i = i + 1) print i * i;");
        let while_source =
            format!("var i = 0; while (i < {n}) {{ print i * i; i = i + 1; }}");
        assert_eq!(run_ok(&for_source), run_ok(&while_source), "N = {n}");
    }
}

#[test]
fn nested_scopes_and_shadowing() {
    assert_eq!(
        run_ok("var a = \"outer\"; { var a = \"inner\"; print a; } print a;"),
        "inner\nouter\n"
    );
}

#[test]
fn functions_are_first_class_values() {
    assert_eq!(
        run_ok("fun twice(x) { return x + x; } var f = twice; print f(21);"),
        "42\n"
    );
}

#[test]
fn string_natives() {
    assert_eq!(run_ok("print len(\"hello\");"), "5\n");
    assert_eq!(run_ok("print toUpperCase(\"abc\");"), "ABC\n");
    assert_eq!(run_ok("print toLowerCase(\"AbC\");"), "abc\n");
    assert_eq!(run_ok("print trim(\"  x  \");"), "x\n");
    assert_eq!(run_ok("print startsWith(\"hello\", \"he\");"), "true\n");
    assert_eq!(run_ok("print endsWith(\"hello\", \"lo\");"), "true\n");
    assert_eq!(run_ok("print substring(\"hello\", 1, 3);"), "el\n");
    assert_eq!(run_ok("print isString(\"x\");"), "true\n");
    assert_eq!(run_ok("print isString(1);"), "false\n");
    assert_eq!(run_ok("print toString(12) + \"!\";"), "12!\n");
    assert_eq!(run_ok("print toNum(\"2.5\") * 2;"), "5\n");
    assert_eq!(run_ok("print toNum(\"oops\");"), "nil\n");
    assert_eq!(run_ok("print lines(\"a\nb\nc\n\");"), "3\n");
    assert_eq!(run_ok("var p = split(\"a,b,c\", \",\"); print p[1];"), "b\n");
}

#[test]
fn list_natives() {
    assert_eq!(
        run_ok("var a = [1]; listPush(a, 2); print listLen(a); print listGet(a, 1);"),
        "2\n2\n"
    );
    assert_eq!(run_ok("var a = [1, 2]; print listPop(a); print listLen(a);"), "2\n1\n");
    assert_eq!(run_ok("var a = [1, 2]; print listShift(a); print a[0];"), "1\n2\n");
    assert_eq!(run_ok("var a = [1, 2]; listClear(a); print listLen(a);"), "0\n");
    assert_eq!(run_ok("var a = [1]; listSet(a, 0, 7); print a[0];"), "7\n");
}

#[test]
fn dict_and_map_natives() {
    assert_eq!(
        run_ok(
            "var d = newDict(); dictSet(d, \"k\", 42); print dictGet(d, \"k\"); \
             print dictExists(d, \"k\"); print dictDelete(d, \"k\"); print dictGet(d, \"k\");"
        ),
        "42\ntrue\ntrue\nnil\n"
    );
    assert_eq!(
        run_ok("var m = map(); print mapSet(m, \"a\", 1); print mapGet(m, \"a\"); print mapDelete(m, \"a\");"),
        "1\n1\ntrue\n"
    );
}

#[test]
fn math_natives() {
    assert_eq!(run_ok("print sqrt(16);"), "4\n");
    assert_eq!(run_ok("print pow(2, 10);"), "1024\n");
    assert_eq!(run_ok("print floor(2.7);"), "2\n");
    assert_eq!(run_ok("print ceil(2.1);"), "3\n");
    assert_eq!(run_ok("print round(2.5);"), "3\n");
    assert_eq!(run_ok("print abs(0 - 5);"), "5\n");
    assert_eq!(run_ok("print fabs(0 - 5);"), "5\n");
    assert_eq!(run_ok("print fmod(7, 4);"), "3\n");
    assert_eq!(run_ok("print PI > 3.14 and PI < 3.15;"), "true\n");
}

#[test]
fn random_natives_stay_in_range() {
    assert_eq!(
        run_ok("var x = random(); print x >= 0 and x < 1;"),
        "true\n"
    );
    assert_eq!(
        run_ok(
            "var ok = true; for (var i = 0; i < 100; i = i + 1) { \
             var n = randomInt(3, 7); if (n < 3 or n > 7) ok = false; } print ok;"
        ),
        "true\n"
    );
}

#[test]
fn clock_is_a_nonnegative_number() {
    assert_eq!(run_ok("print clock() >= 0;"), "true\n");
}

#[test]
fn modulo_uses_floating_point_remainder() {
    assert_eq!(run_ok("print 7.5 % 2;"), "1.5\n");
    assert_eq!(run_ok("print 0 - 7 % 3;"), "-1\n");
}

#[test]
fn native_faults_are_runtime_errors() {
    let (result, _) = run("print len(42);");
    assert_eq!(
        result,
        Err(Error::Runtime("len() argument must be a string.".to_string()))
    );

    let (result, _) = run("print sqrt(\"x\");");
    assert_eq!(
        result,
        Err(Error::Runtime("sqrt() argument must be a number.".to_string()))
    );

    let (result, _) = run("print listPop([]);");
    assert_eq!(
        result,
        Err(Error::Runtime("listPop() called on an empty list.".to_string()))
    );
}

#[test]
fn adding_mixed_operands_faults() {
    let (result, _) = run("print \"a\" + 1;");
    assert_eq!(
        result,
        Err(Error::Runtime(
            "Operands must be two numbers or two strings.".to_string()
        ))
    );
}

#[test]
fn output_interleaves_statement_and_native_prints() {
    assert_eq!(
        run_ok("print 1; println(2, \"three\"); print 4;"),
        "1\n2 three\n4\n"
    );
}
