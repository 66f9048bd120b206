// Copyright 2025 Pavel Roskin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Lexing parameterized capability strings
//!
//! A single byte-oriented pattern recognizes every `%` form and `$<...>`
//! delay in one pass. Anything the pattern does not claim is literal
//! output, run through the terminfo escape rules. Arithmetic operators
//! come before the printf arm in the alternation, so `%-` is subtraction
//! while `%:-5d` is a left-justified print; the `:` exists for exactly
//! that reason.

use std::sync::LazyLock;

use regex::bytes::{Captures, Regex};

use crate::format::{Flags, FormatSpec};
use crate::program::{Error, Instruction};

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?s-u)",
        r"\$<(?P<delay>[0-9]+(?:\.[0-9]*)?)(?P<dflags>(?:\*/?|/\*?)?)>",
        r"|%'(?P<chr>\^.|\\[0-7]{1,3}|\\.|[^'\\])'",
        r"|%\{(?P<int>[0-9]+)\}",
        r"|%p(?P<param>[1-9])",
        r"|%P(?P<setvar>[A-Za-z])",
        r"|%g(?P<getvar>[A-Za-z])",
        r"|%(?P<op>[%il+\-*/m&|^~=><AO!?te;])",
        r"|%(?P<flags>:[-+# ]*|[# ]*)(?P<width>[0-9]+)?(?:\.(?P<precision>[0-9]+))?(?P<fmt>[cdoxXs])",
    ))
    .expect("token pattern is valid")
});

/// One lexed token: a ready instruction or a conditional marker
#[derive(Debug, PartialEq)]
pub(crate) enum Token {
    Instr(Instruction),
    If,
    Then,
    Else,
    EndIf,
}

#[derive(Debug)]
pub(crate) struct Lexed {
    pub tokens: Vec<Token>,
    pub max_used_param: usize,
}

/// Scan a capability string into a token sequence
pub(crate) fn lex(source: &[u8]) -> Result<Lexed, Error> {
    let mut tokens = Vec::new();
    let mut max_used_param = 0;
    let mut literal_start = 0;
    for caps in TOKEN_PATTERN.captures_iter(source) {
        let whole = caps.get(0).expect("group 0 is the whole match");
        if whole.start() > literal_start {
            push_literal(&mut tokens, &source[literal_start..whole.start()]);
        }
        literal_start = whole.end();

        if let Some(m) = caps.name("delay") {
            let dflags = caps.name("dflags").map_or(&b""[..], |m| m.as_bytes());
            tokens.push(Token::Instr(Instruction::Delay {
                millis: parse_millis(m.as_bytes()),
                proportional: dflags.contains(&b'*'),
                force: dflags.contains(&b'/'),
            }));
        } else if let Some(m) = caps.name("chr") {
            let decoded = decode_escapes(m.as_bytes());
            let [byte] = decoded.as_slice() else {
                return Err(Error::BadCharConstant);
            };
            tokens.push(Token::Instr(Instruction::Constant(i32::from(*byte))));
        } else if let Some(m) = caps.name("int") {
            let value = parse_i32(m.as_bytes()).ok_or(Error::IntegerOverflow)?;
            tokens.push(Token::Instr(Instruction::Constant(value)));
        } else if let Some(m) = caps.name("param") {
            let index = m.as_bytes()[0] - b'0';
            max_used_param = max_used_param.max(usize::from(index));
            tokens.push(Token::Instr(Instruction::PushParam(index)));
        } else if let Some(m) = caps.name("setvar") {
            tokens.push(Token::Instr(Instruction::SetVar(char::from(
                m.as_bytes()[0],
            ))));
        } else if let Some(m) = caps.name("getvar") {
            tokens.push(Token::Instr(Instruction::PushVar(char::from(
                m.as_bytes()[0],
            ))));
        } else if let Some(m) = caps.name("op") {
            tokens.push(op_token(m.as_bytes()[0]));
        } else if let Some(m) = caps.name("fmt") {
            let spec = format_spec(&caps, char::from(m.as_bytes()[0]))?;
            tokens.push(Token::Instr(Instruction::Print(spec)));
        }
    }
    if literal_start < source.len() {
        push_literal(&mut tokens, &source[literal_start..]);
    }
    Ok(Lexed {
        tokens,
        max_used_param,
    })
}

fn push_literal(tokens: &mut Vec<Token>, raw: &[u8]) {
    let bytes = decode_escapes(raw);
    if !bytes.is_empty() {
        tokens.push(Token::Instr(Instruction::Out(bytes)));
    }
}

fn op_token(op: u8) -> Token {
    let instruction = match op {
        b'%' => Instruction::Out(vec![b'%']),
        b'i' => Instruction::ParamInc,
        b'l' => Instruction::StrLen,
        b'+' => Instruction::Add,
        b'-' => Instruction::Sub,
        b'*' => Instruction::Mul,
        b'/' => Instruction::Div,
        b'm' => Instruction::Mod,
        b'&' => Instruction::BitAnd,
        b'|' => Instruction::BitOr,
        b'^' => Instruction::BitXor,
        b'~' => Instruction::BitNot,
        b'=' => Instruction::CmpEqual,
        b'>' => Instruction::CmpGreater,
        b'<' => Instruction::CmpLess,
        b'A' => Instruction::CmpAnd,
        b'O' => Instruction::CmpOr,
        b'!' => Instruction::CmpNot,
        b'?' => return Token::If,
        b't' => return Token::Then,
        b'e' => return Token::Else,
        b';' => return Token::EndIf,
        _ => unreachable!("op class is closed"),
    };
    Token::Instr(instruction)
}

fn format_spec(caps: &Captures, format: char) -> Result<FormatSpec, Error> {
    let mut flags = Flags::default();
    if let Some(m) = caps.name("flags") {
        for &byte in m.as_bytes() {
            match byte {
                b':' => {}
                b'-' => flags.left = true,
                b'+' => flags.sign = true,
                b'#' => flags.alternate = true,
                b' ' => flags.space = true,
                _ => unreachable!("flag class is closed"),
            }
        }
    }
    let mut width = 0;
    if let Some(m) = caps.name("width") {
        let mut digits = m.as_bytes();
        if digits[0] == b'0' {
            flags.zero_pad = true;
            digits = &digits[1..];
        }
        width = parse_usize(digits).ok_or(Error::WidthOverflow)?;
    }
    let mut precision = None;
    if let Some(m) = caps.name("precision") {
        precision = Some(parse_usize(m.as_bytes()).ok_or(Error::PrecisionOverflow)?);
    }
    Ok(FormatSpec {
        format,
        flags,
        width,
        precision,
    })
}

/// Apply terminfo escape rules to literal text
///
/// `^X` is control-X with `^?` = DEL. `\NNN` takes one to three octal
/// digits; a NUL result is stored as 0200 since NUL cannot appear in a
/// capability. Unknown backslash escapes pass through unchanged.
pub(crate) fn decode_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let byte = raw[i];
        if byte == b'^' && i + 1 < raw.len() {
            let c = raw[i + 1];
            out.push(if c == b'?' { 0x7f } else { c & 0x1f });
            i += 2;
        } else if byte == b'\\' && i + 1 < raw.len() {
            let c = raw[i + 1];
            i += 2;
            match c {
                b'0'..=b'7' => {
                    let mut value = u32::from(c - b'0');
                    let mut digits = 1;
                    while digits < 3 && i < raw.len() && matches!(raw[i], b'0'..=b'7') {
                        value = value * 8 + u32::from(raw[i] - b'0');
                        i += 1;
                        digits += 1;
                    }
                    out.push(if value & 0xff == 0 { 0x80 } else { value as u8 });
                }
                b'E' | b'e' => out.push(0x1b),
                b'n' => out.extend_from_slice(b"\r\n"),
                b'l' => out.push(b'\n'),
                b'r' => out.push(b'\r'),
                b't' => out.push(b'\t'),
                b'b' => out.push(0x08),
                b'f' => out.push(0x0c),
                b's' => out.push(b' '),
                b'^' | b'\\' | b',' | b':' => out.push(c),
                _ => {
                    out.push(b'\\');
                    out.push(c);
                }
            }
        } else {
            out.push(byte);
            i += 1;
        }
    }
    out
}

fn parse_usize(digits: &[u8]) -> Option<usize> {
    let mut value: usize = 0;
    for &byte in digits {
        value = value
            .checked_mul(10)?
            .checked_add(usize::from(byte - b'0'))?;
    }
    Some(value)
}

fn parse_i32(digits: &[u8]) -> Option<i32> {
    let mut value: i32 = 0;
    for &byte in digits {
        value = value
            .checked_mul(10)?
            .checked_add(i32::from(byte - b'0'))?;
    }
    Some(value)
}

/// Parse a delay time in milliseconds, one optional fraction
fn parse_millis(digits: &[u8]) -> f64 {
    let mut whole = 0f64;
    let mut fraction = 0f64;
    let mut scale = 0.1;
    let mut in_fraction = false;
    for &byte in digits {
        if byte == b'.' {
            in_fraction = true;
        } else if in_fraction {
            fraction += f64::from(byte - b'0') * scale;
            scale /= 10.0;
        } else {
            whole = whole * 10.0 + f64::from(byte - b'0');
        }
    }
    whole + fraction
}

#[cfg(test)]
mod test {
    use super::*;

    fn instructions(source: &[u8]) -> Vec<Instruction> {
        lex(source)
            .unwrap()
            .tokens
            .into_iter()
            .map(|token| match token {
                Token::Instr(instruction) => instruction,
                other => panic!("unexpected marker {other:?}"),
            })
            .collect()
    }

    #[test]
    fn literal_escapes() {
        assert_eq!(
            instructions(b"\\E[H^M\\s\\101\\0"),
            vec![Instruction::Out(vec![0x1b, b'[', b'H', 0x0d, b' ', b'A', 0x80])]
        );
    }

    #[test]
    fn crlf_and_unknown_escapes() {
        assert_eq!(decode_escapes(b"\\n"), b"\r\n");
        assert_eq!(decode_escapes(b"\\l"), b"\n");
        assert_eq!(decode_escapes(b"\\q"), b"\\q");
        assert_eq!(decode_escapes(b"\\^\\\\\\,\\:"), b"^\\,:");
        assert_eq!(decode_escapes(b"^?"), [0x7f]);
    }

    #[test]
    fn unmatched_percent_is_literal() {
        assert_eq!(instructions(b"%q"), vec![Instruction::Out(b"%q".to_vec())]);
    }

    #[test]
    fn delay_flags() {
        assert_eq!(
            instructions(b"$<5>$<5.5*>$<130/>$<2*/>$<2/*>"),
            vec![
                Instruction::Delay { millis: 5.0, proportional: false, force: false },
                Instruction::Delay { millis: 5.5, proportional: true, force: false },
                Instruction::Delay { millis: 130.0, proportional: false, force: true },
                Instruction::Delay { millis: 2.0, proportional: true, force: true },
                Instruction::Delay { millis: 2.0, proportional: true, force: true },
            ]
        );
    }

    #[test]
    fn constants() {
        assert_eq!(
            instructions(b"%{456}%'A'%'^M'%'\\E'"),
            vec![
                Instruction::Constant(456),
                Instruction::Constant(65),
                Instruction::Constant(13),
                Instruction::Constant(0x1b),
            ]
        );
    }

    #[test]
    fn char_constant_must_be_one_byte() {
        // \n decodes to CRLF, two bytes
        assert_eq!(lex(b"%'\\n'").unwrap_err(), Error::BadCharConstant);
    }

    #[test]
    fn integer_constant_overflow() {
        assert_eq!(lex(b"%{2147483648}").unwrap_err(), Error::IntegerOverflow);
        assert_eq!(
            instructions(b"%{2147483647}"),
            vec![Instruction::Constant(i32::MAX)]
        );
    }

    #[test]
    fn parameters_and_variables() {
        let lexed = lex(b"%p1%p9%Pa%PZ%gz%gA").unwrap();
        assert_eq!(lexed.max_used_param, 9);
        assert_eq!(
            lexed.tokens,
            vec![
                Token::Instr(Instruction::PushParam(1)),
                Token::Instr(Instruction::PushParam(9)),
                Token::Instr(Instruction::SetVar('a')),
                Token::Instr(Instruction::SetVar('Z')),
                Token::Instr(Instruction::PushVar('z')),
                Token::Instr(Instruction::PushVar('A')),
            ]
        );
    }

    #[test]
    fn operators_win_over_printf_flags() {
        // %- is subtraction; the sign flag needs a leading colon
        assert_eq!(
            instructions(b"%-%:-5d"),
            vec![
                Instruction::Sub,
                Instruction::Print(FormatSpec {
                    format: 'd',
                    flags: Flags { left: true, ..Flags::default() },
                    width: 5,
                    precision: None,
                }),
            ]
        );
    }

    #[test]
    fn printf_patterns() {
        assert_eq!(
            instructions(b"%d% x%#.3o%05d"),
            vec![
                Instruction::Print(FormatSpec::new('d')),
                Instruction::Print(FormatSpec {
                    format: 'x',
                    flags: Flags { space: true, ..Flags::default() },
                    width: 0,
                    precision: None,
                }),
                Instruction::Print(FormatSpec {
                    format: 'o',
                    flags: Flags { alternate: true, ..Flags::default() },
                    width: 0,
                    precision: Some(3),
                }),
                Instruction::Print(FormatSpec {
                    format: 'd',
                    flags: Flags { zero_pad: true, ..Flags::default() },
                    width: 5,
                    precision: None,
                }),
            ]
        );
    }

    #[test]
    fn percent_escape() {
        assert_eq!(
            instructions(b"100%%"),
            vec![
                Instruction::Out(b"100".to_vec()),
                Instruction::Out(b"%".to_vec()),
            ]
        );
    }

    #[test]
    fn conditional_markers() {
        let lexed = lex(b"%?%p1%t-%e+%;").unwrap();
        assert_eq!(
            lexed.tokens,
            vec![
                Token::If,
                Token::Instr(Instruction::PushParam(1)),
                Token::Then,
                Token::Instr(Instruction::Out(b"-".to_vec())),
                Token::Else,
                Token::Instr(Instruction::Out(b"+".to_vec())),
                Token::EndIf,
            ]
        );
    }
}
