//! Single-pass bytecode compiler.
//!
//! A Pratt-precedence parser that emits instructions directly into the
//! current function's chunk as it consumes tokens; there is no AST. Scope
//! resolution happens inline: locals are tracked on a compile-time stack and
//! addressed by slot, globals by name constant. Jumps are emitted with a
//! placeholder offset and patched once the target is known.
//!
//! Errors use panic-mode recovery: after the first error in a statement the
//! parser discards tokens until a statement boundary, so one mistake does
//! not cascade.

use std::rc::Rc;

use tracing::debug;

use crate::chunk::Chunk;
use crate::diagnostic;
use crate::error::Error;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::opcode::OpCode;
use crate::value::{Function, Module, Strings, Value};

/// Locals per function, including the reserved slot 0.
const MAX_LOCALS: usize = 256;

/// Expression precedence, lowest to highest. The discriminant order is what
/// `parse_precedence` compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! -
    Call,       // . () []
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'i> = fn(&mut Compiler<'src, 'i>, bool);

struct ParseRule<'src, 'i> {
    prefix: Option<ParseFn<'src, 'i>>,
    infix: Option<ParseFn<'src, 'i>>,
    precedence: Precedence,
}

/// A local variable. `depth == -1` marks the window between declaration and
/// the end of its initializer, where reading it is an error.
struct Local<'src> {
    name: &'src str,
    depth: i32,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum FunctionKind {
    Script,
    Function,
}

/// Per-function compile state. Function declarations nest, so these form a
/// stack; slot 0 of every frame is reserved for the callee.
struct FnState<'src> {
    function: Function,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
}

impl<'src> FnState<'src> {
    fn new(kind: FunctionKind, name: Option<Rc<crate::value::LangStr>>, module: Rc<Module>) -> FnState<'src> {
        FnState {
            function: Function {
                arity: 0,
                chunk: Chunk::new(),
                name,
                module,
            },
            kind,
            locals: vec![Local { name: "", depth: 0 }],
            scope_depth: 0,
        }
    }
}

pub(crate) struct Compiler<'src, 'i> {
    lexer: Lexer<'src>,
    source: &'src str,
    current: Token<'src>,
    previous: Token<'src>,
    module: Rc<Module>,
    strings: &'i mut Strings,
    states: Vec<FnState<'src>>,
    had_error: bool,
    panic_mode: bool,
}

/// Compile a source unit into its top-level function. Diagnostics are
/// reported as they occur; any error suppresses the result.
pub(crate) fn compile(
    source: &str,
    module: Rc<Module>,
    strings: &mut Strings,
) -> Result<Function, Error> {
    debug!(module = module.name.as_str(), "compiling");

    let script = FnState::new(FunctionKind::Script, None, Rc::clone(&module));
    let mut compiler = Compiler {
        lexer: Lexer::new(source),
        source,
        current: Token::synthetic(),
        previous: Token::synthetic(),
        module,
        strings,
        states: vec![script],
        had_error: false,
        panic_mode: false,
    };

    compiler.advance();
    while !compiler.matches(TokenKind::Eof) {
        compiler.declaration();
    }

    let function = compiler.end_state();
    if compiler.had_error {
        Err(Error::Compile)
    } else {
        debug!(bytes = function.chunk.code.len(), "compiled");
        Ok(function)
    }
}

impl<'src, 'i> Compiler<'src, 'i> {
    // -----------------------------------------------------------------------
    // Token plumbing
    // -----------------------------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // -----------------------------------------------------------------------
    // Error reporting
    // -----------------------------------------------------------------------

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let (line_text, column) = diagnostic::line_at(self.source, token.start);
        diagnostic::report(
            true,
            self.module.name.as_str(),
            token.line,
            line_text,
            column + 1,
            token.lexeme.len(),
            message,
        );
    }

    /// Skip forward to a likely statement boundary after an error.
    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // -----------------------------------------------------------------------
    // Emission helpers
    // -----------------------------------------------------------------------

    fn state(&self) -> &FnState<'src> {
        self.states.last().expect("compiler state")
    }

    fn state_mut(&mut self) -> &mut FnState<'src> {
        self.states.last_mut().expect("compiler state")
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.state_mut().function.chunk
    }

    fn chunk_len(&self) -> usize {
        self.state().function.chunk.code.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.into());
    }

    fn emit_op_byte(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_ops(&mut self, first: OpCode, second: OpCode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    fn emit_return(&mut self) {
        self.emit_ops(OpCode::Nil, OpCode::Return);
    }

    /// Emit a backward jump to `loop_start`.
    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);

        let offset = self.chunk_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte(offset as u8);
    }

    /// Emit a forward jump with a placeholder offset; returns the offset of
    /// the placeholder for [`Self::patch_jump`].
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // -2 accounts for the operand bytes themselves.
        let jump = self.chunk_len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let chunk = self.current_chunk();
        chunk.code[offset] = (jump >> 8) as u8;
        chunk.code[offset + 1] = jump as u8;
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.current_chunk().add_constant(value) {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, index);
    }

    /// Seal the current function: append the implicit return and pop its
    /// state, handing the finished function back.
    fn end_state(&mut self) -> Function {
        self.emit_return();
        self.states.pop().expect("compiler state").function
    }

    // -----------------------------------------------------------------------
    // Scopes and variables
    // -----------------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.state_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.state_mut().scope_depth -= 1;

        loop {
            let state = self.state();
            let drop_one = state
                .locals
                .last()
                .is_some_and(|local| local.depth > state.scope_depth);
            if !drop_one {
                break;
            }
            self.emit_op(OpCode::Pop);
            self.state_mut().locals.pop();
        }
    }

    /// Intern an identifier and stash it in the constant pool.
    fn identifier_constant(&mut self, name: &Token<'src>) -> u8 {
        let interned = self.strings.intern(name.lexeme);
        self.make_constant(Value::Str(interned))
    }

    /// Resolve a name against the current function's locals; `None` means
    /// global.
    fn resolve_local(&mut self, name: &Token<'src>) -> Option<u8> {
        let mut found = None;
        for (slot, local) in self.state().locals.iter().enumerate().rev() {
            if local.name == name.lexeme {
                found = Some((slot, local.depth == -1));
                break;
            }
        }

        let (slot, uninitialized) = found?;
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(slot as u8)
    }

    fn add_local(&mut self, name: &'src str) {
        if self.state().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.state_mut().locals.push(Local { name, depth: -1 });
    }

    /// Record a local declaration (no effect at global scope). Shadowing a
    /// same-depth local is an error.
    fn declare_variable(&mut self) {
        if self.state().scope_depth == 0 {
            return;
        }

        let name = self.previous;
        let mut duplicate = false;
        {
            let state = self.state();
            for local in state.locals.iter().rev() {
                if local.depth != -1 && local.depth < state.scope_depth {
                    break;
                }
                if local.name == name.lexeme {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(name.lexeme);
    }

    /// Parse a variable name; returns its name-constant index for globals,
    /// 0 for locals.
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);

        self.declare_variable();
        if self.state().scope_depth > 0 {
            return 0;
        }
        let name = self.previous;
        self.identifier_constant(&name)
    }

    fn mark_initialized(&mut self) {
        let state = self.state_mut();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        if let Some(local) = state.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.state().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    /// Compile a read or (under `can_assign`) a write of a named variable,
    /// choosing the local or global instruction at emission time.
    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve_local(&name) {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            None => {
                let index = self.identifier_constant(&name);
                (OpCode::GetGlobal, OpCode::SetGlobal, index)
            }
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }

    // -----------------------------------------------------------------------
    // Pratt machinery
    // -----------------------------------------------------------------------

    fn rule(kind: TokenKind) -> ParseRule<'src, 'i> {
        use TokenKind::*;

        let (prefix, infix, precedence): (
            Option<ParseFn<'src, 'i>>,
            Option<ParseFn<'src, 'i>>,
            Precedence,
        ) = match kind {
            LParen => (Some(Self::grouping), Some(Self::call), Precedence::Call),
            LBracket => (Some(Self::list), Some(Self::subscript), Precedence::Call),
            Minus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            Plus => (None, Some(Self::binary), Precedence::Term),
            Slash | Star | Percent => (None, Some(Self::binary), Precedence::Factor),
            Bang => (Some(Self::unary), None, Precedence::None),
            BangEqual | EqualEqual => (None, Some(Self::binary), Precedence::Equality),
            Greater | GreaterEqual | Less | LessEqual => {
                (None, Some(Self::binary), Precedence::Comparison)
            }
            Identifier => (Some(Self::variable), None, Precedence::None),
            Str => (Some(Self::string), None, Precedence::None),
            Number => (Some(Self::number), None, Precedence::None),
            And => (None, Some(Self::and_op), Precedence::And),
            Or => (None, Some(Self::or_op), Precedence::Or),
            False | Nil | True => (Some(Self::literal), None, Precedence::None),
            _ => (None, None, Precedence::None),
        };

        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }

    /// The heart of the parser: dispatch the previous token's prefix rule,
    /// then fold in infix rules while their precedence is at least `p`.
    /// Assignment may only be consumed by prefix rules invoked at assignment
    /// precedence or below.
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = Self::rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = Self::rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    // -----------------------------------------------------------------------
    // Expression parse rules
    // -----------------------------------------------------------------------

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let contents = &lexeme[1..lexeme.len() - 1];
        let interned = self.strings.intern(contents);
        self.emit_constant(Value::Str(interned));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => unreachable!("literal rule on non-literal token"),
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => unreachable!("unary rule on non-unary token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let precedence = Self::rule(operator).precedence;
        self.parse_precedence(precedence.next());

        match operator {
            TokenKind::BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulo),
            _ => unreachable!("binary rule on non-binary token"),
        }
    }

    /// Short-circuit `and`: skip the right operand when the left is falsey,
    /// leaving the left value as the result.
    fn and_op(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    /// Short-circuit `or`: keep the left value when it is truthy.
    fn or_op(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);

        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    count += 1;
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expect ')' after arguments.");
        count as u8
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op_byte(OpCode::Call, arg_count);
    }

    fn list(&mut self, _can_assign: bool) {
        self.emit_op(OpCode::NewList);
        if !self.check(TokenKind::RBracket) {
            loop {
                self.expression();
                self.emit_op(OpCode::ListAppend);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBracket, "Expect ']' after list literal.");
    }

    fn subscript(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RBracket, "Expect ']' after subscript.");

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetSubscript);
        } else {
            self.emit_op(OpCode::GetSubscript);
        }
    }

    // -----------------------------------------------------------------------
    // Declarations and statements
    // -----------------------------------------------------------------------

    fn declaration(&mut self) {
        let is_export = self.matches(TokenKind::Export);

        if self.matches(TokenKind::Fun) {
            self.fun_declaration(is_export);
        } else if self.matches(TokenKind::Var) {
            self.var_declaration(is_export);
        } else if self.matches(TokenKind::Import) {
            if is_export {
                self.error("Cannot export an import statement.");
            }
            self.import_statement();
        } else {
            if is_export {
                self.error("Can only export function and variable declarations.");
            }
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::LBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RBrace, "Expect '}' after block.");
    }

    /// Compile a function body in a fresh state nested inside the current
    /// one, then emit the finished function as a constant.
    fn function(&mut self, kind: FunctionKind) {
        let name = self.strings.intern(self.previous.lexeme);
        let module = Rc::clone(&self.module);
        self.states.push(FnState::new(kind, Some(name), module));
        self.begin_scope();

        self.consume(TokenKind::LParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RParen) {
            loop {
                if self.state().function.arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.state_mut().function.arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LBrace, "Expect '{' before function body.");
        self.block();

        let function = self.end_state();
        self.emit_constant(Value::Function(Rc::new(function)));
    }

    fn fun_declaration(&mut self, is_export: bool) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);

        if is_export {
            self.emit_op_byte(OpCode::Export, global);
        }
    }

    fn var_declaration(&mut self, is_export: bool) {
        let global = self.parse_variable("Expect variable name.");

        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");

        self.define_variable(global);

        if is_export {
            self.emit_op_byte(OpCode::Export, global);
        }
    }

    fn import_statement(&mut self) {
        self.consume(TokenKind::Str, "Expect module path string.");
        let lexeme = self.previous.lexeme;
        let path = self.strings.intern(&lexeme[1..lexeme.len() - 1]);
        self.emit_constant(Value::Str(path));
        self.emit_op(OpCode::Import);
        // The module reference is the import's value; as a statement it is
        // discarded so local slot accounting stays balanced.
        self.emit_op(OpCode::Pop);
        self.consume(TokenKind::Semicolon, "Expect ';' after import statement.");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk_len();
        self.consume(TokenKind::LParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    /// `for (init; cond; incr) body` desugared to jumps: the body runs, then
    /// the increment, then the condition. An absent condition loops forever.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LParen, "Expect '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // No initializer.
        } else if self.matches(TokenKind::Var) {
            self.var_declaration(false);
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk_len();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenKind::RParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.state().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }
}
