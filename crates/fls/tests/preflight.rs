//! Preflight profiler scenarios: the safety pre-run must refuse dangerous
//! programs and stay invisible for well-behaved ones.

mod common;

use common::capture_vm;
use fls::Error;
use pretty_assertions::assert_eq;

#[test]
fn unconditional_infinite_loop_is_refused_with_no_output() {
    let (mut vm, buf) = capture_vm();
    vm.set_preflight(true);
    let result = vm.interpret("<test>", "while (true) {}");

    match result {
        Err(Error::Preflight(reason)) => {
            assert!(
                reason.contains("infinite loop") || reason.contains("timeout"),
                "unexpected reason: {reason}"
            );
        }
        other => panic!("expected a preflight abort, got {other:?}"),
    }
    assert_eq!(buf.contents(), "");
}

#[test]
fn infinite_loop_after_output_is_still_refused() {
    let (mut vm, buf) = capture_vm();
    vm.set_preflight(true);
    let result = vm.interpret("<test>", "print \"starting\"; while (true) {}");

    assert!(matches!(result, Err(Error::Preflight(_))));
    // Even the pre-loop print is suppressed: nothing ran for real.
    assert_eq!(buf.contents(), "");
}

#[test]
fn terminating_program_passes_and_runs_exactly_once() {
    let (mut vm, buf) = capture_vm();
    vm.set_preflight(true);
    vm.interpret(
        "<test>",
        "var total = 0; for (var i = 0; i < 100; i = i + 1) { total = total + i; } print total;",
    )
    .unwrap();
    assert_eq!(buf.contents(), "4950\n");
}

#[test]
fn runaway_recursion_is_refused_before_the_real_run() {
    let (mut vm, buf) = capture_vm();
    vm.set_preflight(true);
    let result = vm.interpret("<test>", "fun f() { print 1; return f(); } f();");

    // The frame cap trips during the preflight pass, so the real run never
    // starts and nothing is printed.
    assert_eq!(result, Err(Error::Runtime("Stack overflow.".to_string())));
    assert_eq!(buf.contents(), "");
}

#[test]
fn preflight_allows_programs_that_allocate_while_looping() {
    let (mut vm, buf) = capture_vm();
    vm.set_preflight(true);
    vm.interpret(
        "<test>",
        "var items = []; for (var i = 0; i < 50; i = i + 1) { listPush(items, i); } print listLen(items);",
    )
    .unwrap();
    assert_eq!(buf.contents(), "50\n");
}

#[test]
fn preflight_off_by_default() {
    let (mut vm, buf) = capture_vm();
    vm.interpret("<test>", "print \"immediate\";").unwrap();
    assert_eq!(buf.contents(), "immediate\n");
}
