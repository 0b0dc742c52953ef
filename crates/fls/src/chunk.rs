//! A chunk of compiled bytecode: the instruction bytes, a parallel source
//! line table (one entry per byte), and the embedded constant pool.

use std::fmt::Write as _;

use crate::opcode::OpCode;
use crate::value::Value;

/// The constant pool holds at most this many values; index operands are one
/// byte wide and the compiler reports an error rather than growing past it.
pub const MAX_CONSTANTS: usize = 255;

#[derive(Debug, Default, PartialEq)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub lines: Vec<u32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Chunk {
        Chunk::default()
    }

    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Add a constant and return its pool index, or `None` once the pool is
    /// full.
    pub fn add_constant(&mut self, value: Value) -> Option<u8> {
        if self.constants.len() >= MAX_CONSTANTS {
            return None;
        }
        let index = self.constants.len() as u8;
        self.constants.push(value);
        Some(index)
    }

    /// Source line for the instruction byte at `offset`.
    pub fn line(&self, offset: usize) -> u32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    /// Render the whole chunk as a listing, one instruction per line. Used
    /// from tests and trace logging.
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = format!("== {} ==\n", name);
        let mut offset = 0;
        while offset < self.code.len() {
            let (text, next) = self.disassemble_instruction(offset);
            let _ = writeln!(out, "{}", text);
            offset = next;
        }
        out
    }

    /// Render a single instruction; returns the listing line and the offset
    /// of the following instruction.
    pub fn disassemble_instruction(&self, offset: usize) -> (String, usize) {
        let mut text = format!("{:04} {:4} ", offset, self.line(offset));

        let Ok(op) = OpCode::try_from(self.code[offset]) else {
            let _ = write!(text, "??? 0x{:02x}", self.code[offset]);
            return (text, offset + 1);
        };

        match op {
            OpCode::Constant
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::DefineGlobal
            | OpCode::Export => {
                let index = self.code[offset + 1];
                let _ = write!(
                    text,
                    "{:<16} {:3} '{}'",
                    op.name(),
                    index,
                    self.constants[index as usize]
                );
                (text, offset + 2)
            }
            OpCode::GetLocal | OpCode::SetLocal | OpCode::Call => {
                let operand = self.code[offset + 1];
                let _ = write!(text, "{:<16} {:3}", op.name(), operand);
                (text, offset + 2)
            }
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
                let operand =
                    u16::from_be_bytes([self.code[offset + 1], self.code[offset + 2]]) as usize;
                let target = if op == OpCode::Loop {
                    offset + 3 - operand
                } else {
                    offset + 3 + operand
                };
                let _ = write!(text, "{:<16} {:04} -> {:04}", op.name(), offset, target);
                (text, offset + 3)
            }
            _ => {
                let _ = write!(text, "{}", op.name());
                (text, offset + 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_track_lines_per_byte() {
        let mut chunk = Chunk::new();
        chunk.write(OpCode::Nil.into(), 1);
        chunk.write(OpCode::Return.into(), 2);
        assert_eq!(chunk.line(0), 1);
        assert_eq!(chunk.line(1), 2);
        assert_eq!(chunk.code.len(), chunk.lines.len());
    }

    #[test]
    fn constant_pool_caps_at_255() {
        let mut chunk = Chunk::new();
        for i in 0..MAX_CONSTANTS {
            assert_eq!(chunk.add_constant(Value::Number(i as f64)), Some(i as u8));
        }
        assert_eq!(chunk.add_constant(Value::Number(999.0)), None);
    }

    #[test]
    fn disassembles_a_constant_and_return() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Number(1.5)).unwrap();
        chunk.write(OpCode::Constant.into(), 1);
        chunk.write(idx, 1);
        chunk.write(OpCode::Return.into(), 1);

        let listing = chunk.disassemble("test");
        assert!(listing.contains("CONSTANT"));
        assert!(listing.contains("1.5"));
        assert!(listing.contains("RETURN"));
    }
}
