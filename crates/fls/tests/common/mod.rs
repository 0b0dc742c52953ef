#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use fls::{Result, Vm};

/// A cloneable sink so a test can hand the VM an output buffer and read it
/// back afterwards.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn capture_vm() -> (Vm, SharedBuf) {
    let buf = SharedBuf::default();
    let vm = Vm::with_output(Box::new(buf.clone()));
    (vm, buf)
}

pub fn run(source: &str) -> (Result<()>, String) {
    let (mut vm, buf) = capture_vm();
    let result = vm.interpret("<test>", source);
    (result, buf.contents())
}

pub fn run_ok(source: &str) -> String {
    let (result, output) = run(source);
    assert_eq!(result, Ok(()), "program failed: {:?}", result);
    output
}
