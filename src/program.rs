// Copyright 2025 Pavel Roskin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Compiling capability strings into instruction sequences
//!
//! The lexer's conditional markers are rewritten into relative jumps, so
//! a compiled [`Program`] is a flat instruction list that executes with a
//! plain program counter. Jump deltas are relative to the jump itself:
//! the machine computes `pc + delta + 1`.

use crate::format::FormatSpec;
use crate::lex::{self, Token};
use crate::vm::{self, Machine, Parameter, Terminal};

/// Errors reported when compiling a capability string
#[derive(thiserror::Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// A conditional is still open at the end of the string
    #[error("unexpected end of instructions")]
    UnexpectedEnd,
    /// `%t`, `%e` or `%;` with no conditional open
    #[error("%{0} with no open conditional")]
    DanglingConditional(char),
    /// A character constant that is not a single byte
    #[error("malformed character constant")]
    BadCharConstant,
    /// Integer constant too large
    #[error("integer constant overflow")]
    IntegerOverflow,
    /// Overflow in format width
    #[error("format width overflow")]
    WidthOverflow,
    /// Overflow in format precision
    #[error("format precision overflow")]
    PrecisionOverflow,
}

/// One virtual machine instruction
///
/// Each opcode carries only the fields it needs. Jump deltas are relative
/// to the jump instruction itself.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    /// Append literal bytes to the output
    Out(Vec<u8>),
    /// Pause output, subject to the terminal's delay policy
    Delay {
        millis: f64,
        proportional: bool,
        force: bool,
    },
    /// Pop one value, format it, append to the output
    Print(FormatSpec),
    /// Push parameter N (one-based)
    PushParam(u8),
    /// Push a dynamic (lowercase) or static (uppercase) register
    PushVar(char),
    /// Pop into a dynamic or static register
    SetVar(char),
    /// Push an integer constant
    Constant(i32),
    /// Pop a string, push its length
    StrLen,
    /// Increment the first two parameters, for one-based addressing
    ParamInc,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    CmpEqual,
    CmpGreater,
    CmpLess,
    CmpAnd,
    CmpOr,
    CmpNot,
    /// Pop; jump if zero or an empty string
    JumpZero(isize),
    Jump(isize),
}

/// A compiled capability string
///
/// Compiled once, executed many times. Execution state lives in a
/// [`Machine`], never in the program.
#[derive(Clone, Debug)]
pub struct Program {
    code: Vec<Instruction>,
    max_used_param: usize,
}

impl Program {
    /// Compile a capability string
    pub fn compile(source: &[u8]) -> Result<Self, Error> {
        let lexed = lex::lex(source)?;
        let code = lower(lexed.tokens)?;
        Ok(Self {
            code,
            max_used_param: lexed.max_used_param,
        })
    }

    /// The compiled instruction sequence
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Highest one-based parameter index the program references
    pub fn max_used_param(&self) -> usize {
        self.max_used_param
    }

    /// Run the program to completion and return the produced bytes
    pub fn exec(
        &self,
        terminal: &mut Terminal,
        affected_lines: u32,
        params: &[Parameter],
    ) -> Result<Vec<u8>, vm::Error> {
        let mut machine = self.begin(terminal, affected_lines, params)?;
        while !machine.done() {
            machine.step()?;
        }
        Ok(machine.finish())
    }

    /// Start a stepped execution
    pub fn begin<'a>(
        &'a self,
        terminal: &'a mut Terminal,
        affected_lines: u32,
        params: &[Parameter],
    ) -> Result<Machine<'a>, vm::Error> {
        Machine::new(self, terminal, affected_lines, params)
    }
}

/// Rewrite conditional markers into relative jumps
fn lower(tokens: Vec<Token>) -> Result<Vec<Instruction>, Error> {
    let mut code = Vec::with_capacity(tokens.len());
    let mut tokens = tokens.into_iter();
    while let Some(token) = tokens.next() {
        match token {
            Token::Instr(instruction) => code.push(instruction),
            Token::If => lower_conditional(&mut tokens, &mut code)?,
            Token::Then => return Err(Error::DanglingConditional('t')),
            Token::Else => return Err(Error::DanglingConditional('e')),
            Token::EndIf => return Err(Error::DanglingConditional(';')),
        }
    }
    Ok(code)
}

/// Compile one `%?...%;` construct, recursing into nested ones
///
/// `%t` emits a conditional jump to just past the branch; `%e` closes the
/// previous branch with a jump to the end of the whole construct. The
/// final branch falls through, so `%;` emits nothing of its own.
fn lower_conditional(
    tokens: &mut std::vec::IntoIter<Token>,
    code: &mut Vec<Instruction>,
) -> Result<(), Error> {
    let mut pending_branch = None;
    let mut end_jumps = Vec::new();
    loop {
        let Some(token) = tokens.next() else {
            return Err(Error::UnexpectedEnd);
        };
        match token {
            Token::Instr(instruction) => code.push(instruction),
            Token::If => lower_conditional(tokens, code)?,
            Token::Then => {
                pending_branch = Some(code.len());
                code.push(Instruction::JumpZero(0));
            }
            Token::Else => {
                let branch = pending_branch
                    .take()
                    .ok_or(Error::DanglingConditional('e'))?;
                end_jumps.push(code.len());
                code.push(Instruction::Jump(0));
                patch(code, branch);
            }
            Token::EndIf => {
                if let Some(branch) = pending_branch {
                    patch(code, branch);
                }
                for jump in end_jumps {
                    patch(code, jump);
                }
                return Ok(());
            }
        }
    }
}

/// Point the jump at `at` past the current end of `code`
fn patch(code: &mut [Instruction], at: usize) {
    let delta = (code.len() - at - 1) as isize;
    match &mut code[at] {
        Instruction::Jump(delta_slot) | Instruction::JumpZero(delta_slot) => *delta_slot = delta,
        _ => unreachable!("patch target is a jump"),
    }
}
