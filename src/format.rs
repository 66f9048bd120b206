// Copyright 2025 Pavel Roskin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Printf-style formatting for `%c %d %o %x %X %s`

use crate::vm::{Error, Parameter};

/// Format flags parsed from a `%` pattern
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub alternate: bool,
    pub left: bool,
    pub sign: bool,
    pub space: bool,
    pub zero_pad: bool,
}

/// One parsed `%[flags][width[.precision]]format` pattern
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatSpec {
    pub format: char,
    pub flags: Flags,
    pub width: usize,
    pub precision: Option<usize>,
}

impl FormatSpec {
    pub fn new(format: char) -> Self {
        Self {
            format,
            flags: Flags::default(),
            width: 0,
            precision: None,
        }
    }
}

/// Format one popped value
pub(crate) fn format(spec: &FormatSpec, value: Parameter) -> Result<Vec<u8>, Error> {
    match (spec.format, value) {
        ('d' | 'o' | 'x' | 'X', Parameter::Number(number)) => Ok(format_number(spec, number)),
        ('c', Parameter::Number(number)) => {
            // A zero argument emits 0200 for ncurses compatibility; other
            // values are cast and truncated, bounds unchecked.
            let byte = if number == 0 { 0x80 } else { number as u8 };
            Ok(pad_width(spec, vec![byte]))
        }
        ('s', Parameter::String(mut bytes)) => {
            if let Some(precision) = spec.precision
                && precision < bytes.len()
            {
                bytes.truncate(precision);
            }
            Ok(pad_width(spec, bytes))
        }
        _ => Err(Error::TypeMismatch),
    }
}

fn format_number(spec: &FormatSpec, number: i32) -> Vec<u8> {
    let magnitude = i64::from(number).unsigned_abs();
    let mut digits = match spec.format {
        'o' => format!("{magnitude:o}"),
        'x' => format!("{magnitude:x}"),
        'X' => format!("{magnitude:X}"),
        _ => format!("{magnitude}"),
    };

    if let Some(precision) = spec.precision {
        if precision == 0 && number == 0 {
            digits.clear();
        } else if precision > digits.len() {
            digits = "0".repeat(precision - digits.len()) + &digits;
        }
    }

    let mut prefix = String::new();
    if number < 0 {
        prefix.push('-');
    } else if spec.flags.sign {
        prefix.push('+');
    } else if spec.flags.space {
        prefix.push(' ');
    }
    match spec.format {
        // An octal prefix is one leading zero; when precision padding
        // already produced one, a second would change the value printed.
        'o' if spec.flags.alternate && !digits.starts_with('0') => prefix.push('0'),
        'x' if spec.flags.alternate && number != 0 => prefix.push_str("0x"),
        'X' if spec.flags.alternate && number != 0 => prefix.push_str("0X"),
        _ => {}
    }

    let present = prefix.len() + digits.len();
    let mut out = String::with_capacity(present.max(spec.width));
    if spec.width > present {
        let fill = spec.width - present;
        if spec.flags.left {
            out.push_str(&prefix);
            out.push_str(&digits);
            out.push_str(&" ".repeat(fill));
        } else if spec.flags.zero_pad {
            out.push_str(&prefix);
            out.push_str(&"0".repeat(fill));
            out.push_str(&digits);
        } else {
            out.push_str(&" ".repeat(fill));
            out.push_str(&prefix);
            out.push_str(&digits);
        }
    } else {
        out.push_str(&prefix);
        out.push_str(&digits);
    }
    out.into_bytes()
}

fn pad_width(spec: &FormatSpec, mut bytes: Vec<u8>) -> Vec<u8> {
    if spec.width > bytes.len() {
        let fill = spec.width - bytes.len();
        if spec.flags.left {
            bytes.extend(std::iter::repeat_n(b' ', fill));
        } else {
            let mut padded = Vec::with_capacity(spec.width);
            padded.extend(std::iter::repeat_n(b' ', fill));
            padded.append(&mut bytes);
            bytes = padded;
        }
    }
    bytes
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec(format: char) -> FormatSpec {
        FormatSpec::new(format)
    }

    fn render(spec: &FormatSpec, value: Parameter) -> String {
        String::from_utf8(format(spec, value).unwrap()).unwrap()
    }

    #[test]
    fn decimal() {
        let tests = [
            (42, Flags::default(), 0, None, "42"),
            (-42, Flags::default(), 0, None, "-42"),
            (42, Flags { sign: true, ..Flags::default() }, 0, None, "+42"),
            (-42, Flags { sign: true, ..Flags::default() }, 0, None, "-42"),
            (42, Flags { space: true, ..Flags::default() }, 0, None, " 42"),
            (-42, Flags { space: true, ..Flags::default() }, 0, None, "-42"),
            (42, Flags::default(), 0, Some(5), "00042"),
            (-42, Flags::default(), 0, Some(5), "-00042"),
            (42, Flags { sign: true, ..Flags::default() }, 0, Some(5), "+00042"),
            (0, Flags::default(), 0, Some(0), ""),
        ];
        for (number, flags, width, precision, expected) in tests {
            let spec = FormatSpec { format: 'd', flags, width, precision };
            assert_eq!(render(&spec, Parameter::from(number)), expected);
        }
    }

    #[test]
    fn decimal_width() {
        let tests = [
            (42, Flags::default(), 5, None, "   42"),
            (42, Flags { left: true, ..Flags::default() }, 5, None, "42   "),
            (42, Flags { zero_pad: true, ..Flags::default() }, 5, None, "00042"),
            (-42, Flags { zero_pad: true, ..Flags::default() }, 5, None, "-0042"),
            (42, Flags { sign: true, zero_pad: true, ..Flags::default() }, 5, None, "+0042"),
        ];
        for (number, flags, width, precision, expected) in tests {
            let spec = FormatSpec { format: 'd', flags, width, precision };
            assert_eq!(render(&spec, Parameter::from(number)), expected);
        }
    }

    #[test]
    fn octal() {
        let alt = Flags { alternate: true, ..Flags::default() };
        let tests = [
            (42, Flags::default(), 0, None, "52"),
            (42, alt, 0, None, "052"),
            (42, Flags::default(), 0, Some(5), "00052"),
            // Precision zeros supply the leading zero; the alternate-form
            // prefix must be cancelled, not doubled.
            (42, alt, 0, Some(5), "00052"),
            (8, alt, 0, None, "010"),
            (8, alt, 0, Some(3), "010"),
            (0, alt, 0, None, "0"),
            (0, alt, 0, Some(0), "0"),
        ];
        for (number, flags, width, precision, expected) in tests {
            let spec = FormatSpec { format: 'o', flags, width, precision };
            assert_eq!(render(&spec, Parameter::from(number)), expected);
        }
    }

    #[test]
    fn hexadecimal() {
        let alt = Flags { alternate: true, ..Flags::default() };
        let tests = [
            ('x', 42, Flags::default(), None, "2a"),
            ('x', 42, alt, None, "0x2a"),
            ('x', 0, alt, None, "0"),
            ('x', 42, Flags::default(), Some(5), "0002a"),
            ('x', 42, alt, Some(5), "0x0002a"),
            ('x', 0, alt, Some(5), "00000"),
            ('X', 42, Flags::default(), None, "2A"),
            ('X', 42, alt, None, "0X2A"),
            ('X', 42, alt, Some(5), "0X0002A"),
            ('X', 0, alt, None, "0"),
        ];
        for (format, number, flags, precision, expected) in tests {
            let spec = FormatSpec { format, flags, width: 0, precision };
            assert_eq!(render(&spec, Parameter::from(number)), expected);
        }
    }

    #[test]
    fn hexadecimal_width() {
        let spec = FormatSpec {
            format: 'x',
            flags: Flags { alternate: true, zero_pad: true, ..Flags::default() },
            width: 8,
            precision: None,
        };
        // Zeros land between the prefix and the digits.
        assert_eq!(render(&spec, Parameter::from(42)), "0x00002a");
    }

    #[test]
    fn string() {
        let tests = [
            ("One", Flags::default(), 0, None, "One"),
            ("One", Flags::default(), 5, None, "  One"),
            ("One", Flags::default(), 5, Some(2), "   On"),
            ("One", Flags { left: true, ..Flags::default() }, 5, Some(4), "One  "),
        ];
        for (value, flags, width, precision, expected) in tests {
            let spec = FormatSpec { format: 's', flags, width, precision };
            assert_eq!(render(&spec, Parameter::from(value)), expected);
        }
    }

    #[test]
    fn char_output() {
        assert_eq!(format(&spec('c'), Parameter::from(65)).unwrap(), b"A");
        // 0 maps to 0200, out-of-range values truncate.
        assert_eq!(format(&spec('c'), Parameter::from(0)).unwrap(), [0x80]);
        assert_eq!(format(&spec('c'), Parameter::from(257)).unwrap(), [1]);
    }

    #[test]
    fn type_mismatch() {
        assert_eq!(
            format(&spec('d'), Parameter::from("one")),
            Err(Error::TypeMismatch)
        );
        assert_eq!(
            format(&spec('s'), Parameter::from(1)),
            Err(Error::TypeMismatch)
        );
        assert_eq!(
            format(&spec('c'), Parameter::from("x")),
            Err(Error::TypeMismatch)
        );
    }
}
