// Copyright 2025 Pavel Roskin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Decoding compiled terminfo database files
//!
//! The decoder consumes one file front to back: header, terminal names,
//! booleans, numbers, strings, and the optional ncurses extended section
//! with user-defined capability names. It either returns a fully populated
//! [`Entry`] or fails; no partial state is ever exposed.

use std::{
    collections::{BTreeMap, BTreeSet},
    io::{Cursor, Read, Seek, SeekFrom},
    mem,
};

use tracing::debug;

use crate::caps;

/// Original format, 16-bit numbers
const MAGIC: u16 = 0x011a;
/// Extended-number format, 32-bit numbers
const MAGIC_32: u16 = 0x021e;

/// Errors reported when decoding a terminfo file
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The magic number is invalid or unsupported
    #[error("bad magic number {0:#06x}")]
    BadMagic(u16),
    /// A string is not terminated by the NUL byte
    #[error("string without final NUL")]
    UnterminatedString,
    /// Table sizes that no valid terminfo file can have
    #[error("unsupported terminfo format")]
    UnsupportedFormat,
    /// A block is shorter than its header promises
    #[error("short read")]
    ShortRead(#[from] std::io::Error),
    /// An extended capability name is not valid UTF-8
    #[error("invalid UTF-8 string")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Terminal names from the header blob
///
/// The blob is a `|`-separated list: short alias first, detailed
/// description last, synonyms in between. One- and two-element lists
/// degrade gracefully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermNames {
    pub brief: Option<String>,
    pub synonyms: Vec<String>,
    pub detailed: Option<String>,
}

impl TermNames {
    fn from_blob(blob: &str) -> Self {
        let mut tokens: Vec<&str> = if blob.is_empty() {
            Vec::new()
        } else {
            blob.split('|').collect()
        };
        let detailed = if tokens.len() > 1 { tokens.pop() } else { None };
        let mut names = Self {
            brief: None,
            synonyms: Vec::new(),
            detailed: detailed.map(str::to_owned),
        };
        if !tokens.is_empty() {
            names.brief = Some(tokens.remove(0).to_owned());
            names.synonyms = tokens.iter().map(|s| (*s).to_owned()).collect();
        }
        names
    }
}

/// Parsed terminfo entry
///
/// Standard and extended capabilities are merged into the same three
/// mappings. The entry owns all of its data and is immutable once built.
#[derive(Debug, Clone)]
pub struct Entry {
    pub booleans: BTreeSet<String>,
    pub numbers: BTreeMap<String, i32>,
    pub strings: BTreeMap<String, Vec<u8>>,
    names: TermNames,
    number_width: usize,
    extended: bool,
}

impl Entry {
    /// Decode a terminfo entry from the supplied buffer
    pub fn parse(buffer: &[u8]) -> Result<Self, Error> {
        let mut entry = Self {
            booleans: BTreeSet::default(),
            numbers: BTreeMap::default(),
            strings: BTreeMap::default(),
            names: TermNames::default(),
            number_width: 0,
            extended: false,
        };
        let mut reader = Cursor::new(buffer);
        entry.parse_base(&mut reader)?;
        // The pad byte after the string table exists only when the
        // extended section follows.
        align_cursor(&mut reader)?;
        if remaining(&reader) > 0 {
            entry.extended = true;
            entry.parse_extended(&mut reader)?;
        }
        debug!(
            brief = entry.names.brief.as_deref().unwrap_or(""),
            booleans = entry.booleans.len(),
            numbers = entry.numbers.len(),
            strings = entry.strings.len(),
            extended = entry.extended,
            "decoded terminfo entry"
        );
        Ok(entry)
    }

    /// Terminal names from the entry header
    pub fn names(&self) -> &TermNames {
        &self.names
    }

    /// Whether the file uses the 32-bit number format
    pub fn is_32bit(&self) -> bool {
        self.number_width == 4
    }

    /// Whether the file carries an extended capability section
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    fn read_number(&self, reader: &mut Cursor<&[u8]>) -> Result<Option<i32>, Error> {
        let value = if self.number_width == 4 {
            let mut buffer = [0u8; 4];
            reader.read_exact(&mut buffer)?;
            i32::from_le_bytes(buffer)
        } else {
            let mut buffer = [0u8; 2];
            reader.read_exact(&mut buffer)?;
            i32::from(i16::from_le_bytes(buffer))
        };
        // Negative means absent; zero is a present value.
        if value >= 0 { Ok(Some(value)) } else { Ok(None) }
    }

    /// Parse the header and the base capability blocks
    fn parse_base(&mut self, mut reader: &mut Cursor<&[u8]>) -> Result<(), Error> {
        let magic = read_le16(&mut reader)?;
        let name_size = read_count(&mut reader)?;
        let bool_count = read_count(&mut reader)?;
        let num_count = read_count(&mut reader)?;
        let str_count = read_count(&mut reader)?;
        let str_size = read_count(&mut reader)?;

        self.number_width = match magic {
            MAGIC => 2,
            MAGIC_32 => 4,
            _ => return Err(Error::BadMagic(magic)),
        };

        if bool_count > caps::BOOLEANS.len()
            || num_count > caps::NUMERICS.len()
            || str_count > caps::STRINGS.len()
        {
            return Err(Error::UnsupportedFormat);
        }

        let name_blob = read_slice(reader, name_size)?;
        let name_end = name_blob
            .iter()
            .position(|c| *c == b'\0')
            .unwrap_or(name_blob.len());
        self.names = TermNames::from_blob(str::from_utf8(&name_blob[..name_end])?);

        for name in caps::BOOLEANS.iter().take(bool_count) {
            if read_u8(&mut reader)? != 0 {
                self.booleans.insert((*name).to_owned());
            }
        }

        // Pad byte when name_size + bool_count is odd; the 12-byte header
        // keeps cursor parity equal to that sum's parity.
        align_cursor(reader)?;

        for name in caps::NUMERICS.iter().take(num_count) {
            if let Some(number) = self.read_number(reader)? {
                self.numbers.insert((*name).to_owned(), number);
            }
        }

        let str_offsets = read_slice(reader, mem::size_of::<i16>() * str_count)?;
        let mut str_offsets_reader = Cursor::new(str_offsets);

        let str_table = read_slice(reader, str_size)?;

        for name in caps::STRINGS.iter().take(str_count) {
            let Some(offset) = check_offset(read_le16(&mut str_offsets_reader)?) else {
                continue;
            };
            let value = get_string(str_table, offset)?;
            self.strings.insert((*name).to_owned(), value.to_vec());
        }

        Ok(())
    }

    /// Parse the extended capability blocks
    ///
    /// Layout: extended header, boolean values, align(2), number values,
    /// string value offsets, name offsets, string values, then the names
    /// for booleans, numbers and strings in that order. Name offsets are
    /// relative to the byte past the last value string's terminator.
    fn parse_extended(&mut self, mut reader: &mut Cursor<&[u8]>) -> Result<(), Error> {
        let bool_count = read_count(&mut reader)?;
        let num_count = read_count(&mut reader)?;
        let str_count = read_count(&mut reader)?;
        let present_count = read_count(&mut reader)?;
        let str_size = read_count(&mut reader)?;

        let bools = read_slice(reader, bool_count)?;
        align_cursor(reader)?;

        let mut numbers = Vec::with_capacity(num_count);
        for _ in 0..num_count {
            numbers.push(self.read_number(reader)?);
        }

        // The value-offsets array is sized by the header's present-string
        // count, but absent (negative) slots occupy an offset each without
        // being counted there. Keep reading until a pass over what we have
        // finds no uncounted absents.
        let mut value_offsets: Vec<i16> = Vec::with_capacity(present_count);
        for _ in 0..present_count {
            value_offsets.push(read_i16(&mut reader)?);
        }
        loop {
            let absent = value_offsets.iter().filter(|offset| **offset < 0).count();
            let expected = present_count + absent;
            if expected <= value_offsets.len() {
                break;
            }
            for _ in value_offsets.len()..expected {
                value_offsets.push(read_i16(&mut reader)?);
            }
        }

        let name_count = bool_count + num_count + str_count;
        let mut name_offsets = Vec::with_capacity(name_count);
        for _ in 0..name_count {
            name_offsets.push(read_i16(&mut reader)?);
        }

        let str_table = read_slice(reader, str_size)?;

        // Value strings occupy the first str_count slots; remember where
        // the last one's NUL lands so name offsets can be rebased past it.
        let mut values: Vec<Option<Vec<u8>>> = Vec::with_capacity(str_count);
        let mut names_base = 0;
        for slot in 0..str_count {
            match value_offsets.get(slot) {
                Some(&offset) if offset >= 0 => {
                    let value = get_string(str_table, offset as usize)?;
                    names_base = offset as usize + value.len() + 1;
                    values.push(Some(value.to_vec()));
                }
                _ => values.push(None),
            }
        }

        let mut offsets = name_offsets.into_iter();
        for index in 0..bool_count {
            let name = ext_name(str_table, names_base, &mut offsets)?;
            if bools[index] != 0
                && let Some(name) = name
            {
                self.booleans.insert(name);
            }
        }
        for value in numbers {
            let name = ext_name(str_table, names_base, &mut offsets)?;
            if let (Some(value), Some(name)) = (value, name) {
                self.numbers.insert(name, value);
            }
        }
        for value in values {
            let name = ext_name(str_table, names_base, &mut offsets)?;
            if let (Some(value), Some(name)) = (value, name) {
                self.strings.insert(name, value);
            }
        }

        Ok(())
    }
}

/// Decode one extended capability name, rebased into the string table
fn ext_name(
    str_table: &[u8],
    names_base: usize,
    offsets: &mut impl Iterator<Item = i16>,
) -> Result<Option<String>, Error> {
    let Some(offset) = offsets.next() else {
        return Err(Error::UnsupportedFormat);
    };
    if offset < 0 {
        return Ok(None);
    }
    let name = get_string(str_table, names_base + offset as usize)?;
    Ok(Some(str::from_utf8(name)?.to_owned()))
}

fn read_u8(reader: &mut impl Read) -> Result<u8, Error> {
    let mut buffer = [0u8; 1];
    reader.read_exact(&mut buffer)?;
    Ok(buffer[0])
}

fn read_le16(reader: &mut impl Read) -> Result<u16, Error> {
    let mut buffer = [0u8; 2];
    reader.read_exact(&mut buffer)?;
    Ok(u16::from_le_bytes(buffer))
}

fn read_i16(reader: &mut impl Read) -> Result<i16, Error> {
    let mut buffer = [0u8; 2];
    reader.read_exact(&mut buffer)?;
    Ok(i16::from_le_bytes(buffer))
}

/// Read a signed 16-bit count that must not be negative
fn read_count(reader: &mut impl Read) -> Result<usize, Error> {
    let value = read_i16(reader)?;
    usize::try_from(value).map_err(|_| Error::UnsupportedFormat)
}

fn read_slice<'a>(reader: &mut Cursor<&'a [u8]>, size: usize) -> Result<&'a [u8], Error> {
    let start = reader.position() as usize;
    let end = reader.seek(SeekFrom::Current(size as i64))? as usize;
    let buffer = &reader.get_ref();
    match buffer.get(start..end) {
        Some(slice) => Ok(slice),
        None => Err(Error::ShortRead(std::io::Error::from(
            std::io::ErrorKind::UnexpectedEof,
        ))),
    }
}

fn get_string(string_table: &[u8], offset: usize) -> Result<&[u8], Error> {
    let Some(string_slice) = string_table.get(offset..) else {
        return Err(Error::UnsupportedFormat);
    };
    if let Some(string_length) = string_slice.iter().position(|c| *c == b'\0') {
        Ok(&string_slice[..string_length])
    } else {
        Err(Error::UnterminatedString)
    }
}

/// Convert a negative (absent or canceled) offset to None
fn check_offset(size: u16) -> Option<usize> {
    if (size as i16) < 0 {
        None
    } else {
        Some(usize::from(size))
    }
}

fn remaining(reader: &Cursor<&[u8]>) -> usize {
    (reader.get_ref().len() as u64).saturating_sub(reader.position()) as usize
}

/// Skip a byte if needed to ensure 2-byte alignment
///
/// The pad byte is only present when more data follows it.
fn align_cursor(reader: &mut Cursor<&[u8]>) -> Result<(), Error> {
    if reader.position() & 1 == 1 && remaining(reader) > 0 {
        reader.seek_relative(1)?;
    }
    Ok(())
}
