//! Source-pointing diagnostics.
//!
//! Both compile and runtime errors render the same shape: a bold header, a
//! locator, the offending source line in a numbered gutter, and a caret
//! (with tildes covering the rest of the token) under the column.
//!
//! ```text
//! Compile Error: Expect ';' after expression.
//!   --> script.fls:3
//!    |
//!    3 | print 1 + 2
//!    |            ^ Here
//! ```

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const BLUE: &str = "\x1b[34m";
const RESET: &str = "\x1b[0m";

/// Print a caret diagnostic to stderr. `col` is the number of padding
/// columns before the caret; `length` is the token length the underline
/// covers.
pub fn report(
    is_compile: bool,
    module: &str,
    line: u32,
    line_text: &str,
    col: usize,
    length: usize,
    message: &str,
) {
    eprint!("{}", render(is_compile, module, line, line_text, col, length, message));
}

/// Render the diagnostic as a string (separated from [`report`] so tests can
/// assert on the exact shape).
pub fn render(
    is_compile: bool,
    module: &str,
    line: u32,
    line_text: &str,
    col: usize,
    length: usize,
    message: &str,
) -> String {
    let kind = if is_compile { "Compile" } else { "Runtime" };
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "{BOLD}{RED}{kind} Error:{RESET} {BOLD}{message}{RESET}");
    let _ = writeln!(out, "{BLUE}  --> {module}:{line}{RESET}");
    let _ = writeln!(out, "{BLUE}   |{RESET}");
    let _ = writeln!(out, "{BLUE}{line:4} |{RESET} {line_text}");

    let mut underline = String::new();
    for _ in 0..col {
        underline.push(' ');
    }
    underline.push('^');
    for _ in 1..length.max(1) {
        underline.push('~');
    }
    let _ = writeln!(out, "{BLUE}   |{RESET} {BOLD}{RED}{underline} Here{RESET}");
    out
}

/// Recover the line a byte offset sits on: the full line text and the
/// column (byte offset within the line) of the location.
pub fn line_at(source: &str, offset: usize) -> (&str, usize) {
    let offset = offset.min(source.len());
    let line_start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[offset..]
        .find('\n')
        .map_or(source.len(), |i| offset + i);
    (&source[line_start..line_end], offset - line_start)
}

/// Read the given (1-based) line from a source file on disk. Used by the
/// runtime reporter, which no longer has the source in memory.
pub fn read_source_line(path: &str, line: u32) -> Option<String> {
    if line == 0 {
        return None;
    }
    let file = File::open(Path::new(path)).ok()?;
    let reader = BufReader::new(file);
    let text = reader.lines().nth(line as usize - 1)?.ok()?;
    Some(text.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_at_finds_the_enclosing_line() {
        let source = "first\nsecond line\nthird";
        let offset = source.find("line").unwrap();
        let (text, col) = line_at(source, offset);
        assert_eq!(text, "second line");
        assert_eq!(col, 7);
    }

    #[test]
    fn line_at_start_and_end() {
        let source = "abc";
        assert_eq!(line_at(source, 0), ("abc", 0));
        assert_eq!(line_at(source, 3), ("abc", 3));
    }

    #[test]
    fn render_shape() {
        let out = render(true, "script.fls", 3, "print 1 + 2", 11, 1, "Expect ';' after expression.");
        assert!(out.contains("Compile Error:"));
        assert!(out.contains("--> script.fls:3"));
        assert!(out.contains("print 1 + 2"));
        assert!(out.contains("^ Here"));
    }

    #[test]
    fn render_underlines_token_length() {
        let out = render(false, "m.fls", 1, "foo + bar", 0, 3, "bad operand");
        assert!(out.contains("^~~ Here"));
        assert!(out.contains("Runtime Error:"));
    }
}
