// Copyright 2025 Pavel Roskin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Stack machine executing compiled capability programs
//!
//! A [`Machine`] holds one execution: stack, program counter, dynamic
//! registers, parameter slots and the output buffer. Static registers
//! `A..Z` live on the [`Terminal`] and persist across executions, the way
//! ncurses shares them between capabilities of one terminal. The machine
//! borrows its terminal exclusively, so two executions against the same
//! terminal cannot overlap.

use std::{array::from_fn, thread, time::Duration};

use crate::format;
use crate::parse::Entry;
use crate::program::{self, Instruction, Program};

/// Types of parameters a capability can use
#[derive(Clone, Debug, PartialEq)]
pub enum Parameter {
    Number(i32),
    String(Vec<u8>),
}

impl From<i32> for Parameter {
    fn from(value: i32) -> Parameter {
        Parameter::Number(value)
    }
}

impl From<&[u8]> for Parameter {
    fn from(value: &[u8]) -> Parameter {
        Parameter::String(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Parameter {
    fn from(value: &[u8; N]) -> Parameter {
        Parameter::String(value.to_vec())
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Parameter {
        Parameter::String(value.as_bytes().to_vec())
    }
}

/// Errors reported when executing a program
#[derive(thiserror::Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// An instruction popped more values than the stack holds
    #[error("stack exhausted")]
    StackUnderflow,
    /// A number where a string was needed, or the other way around
    #[error("unexpected value type")]
    TypeMismatch,
    /// Fewer parameters than the program references
    #[error("program uses {needed} parameters, {passed} passed")]
    MissingParameters { needed: usize, passed: usize },
}

/// One terminal the programs run against
///
/// Holds the decoded entry, the static registers and the delay policy.
/// Delays only run when the terminal writes directly to a device; the
/// hook defaults to [`thread::sleep`] and can be replaced by callers that
/// schedule delays themselves.
#[derive(Debug)]
pub struct Terminal {
    entry: Option<Entry>,
    statics: [Parameter; 26],
    pub direct_output: bool,
    pub disable_delays: bool,
    delay_hook: fn(Duration),
}

impl Terminal {
    /// Terminal backed by a decoded database entry
    pub fn new(entry: Entry) -> Self {
        Self {
            entry: Some(entry),
            ..Self::detached()
        }
    }

    /// Terminal with no entry, for expanding standalone strings
    pub fn detached() -> Self {
        Self {
            entry: None,
            statics: from_fn(|_| Parameter::Number(0)),
            direct_output: false,
            disable_delays: false,
            delay_hook: thread::sleep,
        }
    }

    /// The decoded entry, if the terminal has one
    pub fn entry(&self) -> Option<&Entry> {
        self.entry.as_ref()
    }

    /// Compile the named string capability of this terminal
    ///
    /// Returns `None` when the terminal has no entry or the capability is
    /// absent.
    pub fn program(&self, name: &str) -> Option<Result<Program, program::Error>> {
        let source = self.entry.as_ref()?.strings.get(name)?;
        Some(Program::compile(source))
    }

    /// Replace the delay hook
    pub fn set_delay_hook(&mut self, hook: fn(Duration)) {
        self.delay_hook = hook;
    }
}

/// One execution of a compiled program
pub struct Machine<'a> {
    code: &'a [Instruction],
    terminal: &'a mut Terminal,
    stack: Vec<Parameter>,
    dynamics: [Parameter; 26],
    params: [Parameter; 9],
    output: Vec<u8>,
    affected_lines: u32,
    pc: usize,
}

impl<'a> Machine<'a> {
    pub(crate) fn new(
        program: &'a Program,
        terminal: &'a mut Terminal,
        affected_lines: u32,
        params: &[Parameter],
    ) -> Result<Self, Error> {
        if params.len() < program.max_used_param() {
            return Err(Error::MissingParameters {
                needed: program.max_used_param(),
                passed: params.len(),
            });
        }
        let mut slots: [Parameter; 9] = from_fn(|_| Parameter::Number(0));
        for (slot, value) in slots.iter_mut().zip(params) {
            *slot = value.clone();
        }
        Ok(Self {
            code: program.code(),
            terminal,
            stack: Vec::new(),
            dynamics: from_fn(|_| Parameter::Number(0)),
            params: slots,
            output: Vec::new(),
            affected_lines,
            pc: 0,
        })
    }

    /// Whether the program counter has reached the end
    pub fn done(&self) -> bool {
        self.pc >= self.code.len()
    }

    /// Bytes produced so far
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Consume the machine and return the produced bytes
    pub fn finish(self) -> Vec<u8> {
        self.output
    }

    /// Discard stack, program counter, output and dynamic registers
    ///
    /// Parameters set by `begin` are kept; static registers live on the
    /// terminal and are not touched.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.stack.clear();
        self.output.clear();
        self.dynamics = from_fn(|_| Parameter::Number(0));
    }

    /// Execute one instruction
    ///
    /// A no-op once the program is done.
    pub fn step(&mut self) -> Result<(), Error> {
        let code = self.code;
        let Some(instruction) = code.get(self.pc) else {
            return Ok(());
        };
        let mut jump = 0isize;
        match instruction {
            Instruction::Out(bytes) => self.output.extend_from_slice(bytes),
            Instruction::Delay {
                millis,
                proportional,
                force,
            } => {
                if self.terminal.direct_output && (!self.terminal.disable_delays || *force) {
                    let mut millis = *millis;
                    if *proportional {
                        millis *= f64::from(self.affected_lines);
                    }
                    (self.terminal.delay_hook)(Duration::from_secs_f64(millis / 1000.0));
                }
            }
            Instruction::Print(spec) => {
                let value = self.pop()?;
                let bytes = format::format(spec, value)?;
                self.output.extend_from_slice(&bytes);
            }
            Instruction::PushParam(index) => {
                self.stack.push(self.params[usize::from(index - 1)].clone());
            }
            Instruction::PushVar(name) => {
                let value = self.variable_mut(*name).clone();
                self.stack.push(value);
            }
            Instruction::SetVar(name) => {
                let value = self.pop()?;
                *self.variable_mut(*name) = value;
            }
            Instruction::Constant(value) => self.stack.push(Parameter::Number(*value)),
            Instruction::StrLen => {
                let bytes = self.pop_string()?;
                self.stack.push(Parameter::Number(bytes.len() as i32));
            }
            Instruction::ParamInc => match (&self.params[0], &self.params[1]) {
                (&Parameter::Number(first), &Parameter::Number(second)) => {
                    self.params[0] = Parameter::Number(first + 1);
                    self.params[1] = Parameter::Number(second + 1);
                }
                _ => return Err(Error::TypeMismatch),
            },
            Instruction::Add => {
                let (a, b) = self.pop_pair()?;
                self.push_number(a + b);
            }
            Instruction::Sub => {
                let (a, b) = self.pop_pair()?;
                self.push_number(a - b);
            }
            Instruction::Mul => {
                let (a, b) = self.pop_pair()?;
                self.push_number(a * b);
            }
            Instruction::Div => {
                let (a, b) = self.pop_pair()?;
                self.push_number(floor_div(a, b));
            }
            Instruction::Mod => {
                let (a, b) = self.pop_pair()?;
                self.push_number(if b == 0 { 0 } else { a % b });
            }
            Instruction::BitAnd => {
                let (a, b) = self.pop_pair()?;
                self.push_number(a & b);
            }
            Instruction::BitOr => {
                let (a, b) = self.pop_pair()?;
                self.push_number(a | b);
            }
            Instruction::BitXor => {
                let (a, b) = self.pop_pair()?;
                self.push_number(a ^ b);
            }
            Instruction::BitNot => {
                let value = self.pop_number()?;
                self.push_number(!value);
            }
            Instruction::CmpEqual => {
                let (a, b) = self.pop_pair()?;
                self.push_bool(a == b);
            }
            Instruction::CmpGreater => {
                let (a, b) = self.pop_pair()?;
                self.push_bool(a > b);
            }
            Instruction::CmpLess => {
                let (a, b) = self.pop_pair()?;
                self.push_bool(a < b);
            }
            Instruction::CmpAnd => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push_bool(truthy(&a) && truthy(&b));
            }
            Instruction::CmpOr => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push_bool(truthy(&a) || truthy(&b));
            }
            Instruction::CmpNot => {
                let value = self.pop()?;
                self.push_bool(!truthy(&value));
            }
            Instruction::JumpZero(delta) => {
                if !truthy(&self.pop()?) {
                    jump = *delta;
                }
            }
            Instruction::Jump(delta) => jump = *delta,
        }
        self.pc = (self.pc as isize + 1 + jump) as usize;
        Ok(())
    }

    fn variable_mut(&mut self, name: char) -> &mut Parameter {
        if name.is_ascii_lowercase() {
            &mut self.dynamics[name as usize - 'a' as usize]
        } else {
            &mut self.terminal.statics[name as usize - 'A' as usize]
        }
    }

    fn pop(&mut self) -> Result<Parameter, Error> {
        self.stack.pop().ok_or(Error::StackUnderflow)
    }

    fn pop_number(&mut self) -> Result<i32, Error> {
        match self.pop()? {
            Parameter::Number(value) => Ok(value),
            Parameter::String(_) => Err(Error::TypeMismatch),
        }
    }

    fn pop_string(&mut self) -> Result<Vec<u8>, Error> {
        match self.pop()? {
            Parameter::String(value) => Ok(value),
            Parameter::Number(_) => Err(Error::TypeMismatch),
        }
    }

    /// Pop two numbers; the top of the stack is the right operand
    fn pop_pair(&mut self) -> Result<(i32, i32), Error> {
        let b = self.pop_number()?;
        let a = self.pop_number()?;
        Ok((a, b))
    }

    fn push_number(&mut self, value: i32) {
        self.stack.push(Parameter::Number(value));
    }

    fn push_bool(&mut self, value: bool) {
        self.push_number(i32::from(value));
    }
}

fn truthy(value: &Parameter) -> bool {
    match value {
        Parameter::Number(value) => *value != 0,
        Parameter::String(value) => !value.is_empty(),
    }
}

/// Integer division rounding toward negative infinity, zero divisor
/// yields zero
fn floor_div(a: i32, b: i32) -> i32 {
    if b == 0 {
        return 0;
    }
    let quotient = a / b;
    if a % b != 0 && (a < 0) != (b < 0) {
        quotient - 1
    } else {
        quotient
    }
}
