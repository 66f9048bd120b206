// Copyright 2025 Pavel Roskin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Terminfo database index
//!
//! A [`Database`] walks a directory tree once and maps every leaf file
//! name to its path. Entries are decoded on demand; the index itself holds
//! no file handles.

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use tracing::{debug, trace};

use crate::parse::{self, Entry};

const TERMINFO_DIRS: &[&str] = &[
    "/etc/terminfo",
    "/lib/terminfo",
    "/usr/share/terminfo",
    "/usr/lib/terminfo",
    "/boot/system/data/terminfo", // haiku
];

/// Errors reported by the terminfo database index
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The database root is not a directory
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    /// The terminal name is not present in the index
    #[error("terminal {0:?} not found")]
    NotFound(String),
    /// `TERM` is unset and no fallback was given
    #[error("no default terminal")]
    NoDefaultTerminal,
    /// Input/output error while walking or reading the database
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    /// The entry file is malformed
    #[error(transparent)]
    Parse(#[from] parse::Error),
}

/// Index of terminfo entries under one or more directory roots
///
/// Only the leaf file name is indexed, which covers both the standard
/// `x/xterm` layout and the hexadecimal `78/xterm` layout used on
/// case-insensitive filesystems.
#[derive(Debug, Clone)]
pub struct Database {
    index: BTreeMap<String, PathBuf>,
}

impl Database {
    /// Index every terminfo file under the given directory root
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::NotADirectory(root.to_path_buf()));
        }
        let root = root.canonicalize()?;
        let mut index = BTreeMap::new();
        index_tree(&root, &mut index)?;
        debug!(root = %root.display(), entries = index.len(), "indexed terminfo root");
        Ok(Self { index })
    }

    /// Index every directory on the terminfo search path that exists
    ///
    /// Earlier directories take precedence over later ones, matching the
    /// lookup order used by ncurses.
    pub fn open_system() -> Result<Self, Error> {
        let mut index = BTreeMap::new();
        for dir in search_directories().iter().rev() {
            let Ok(root) = dir.canonicalize() else {
                continue;
            };
            if root.is_dir() {
                index_tree(&root, &mut index)?;
            }
        }
        debug!(entries = index.len(), "indexed system terminfo");
        Ok(Self { index })
    }

    /// Iterate over the indexed terminal names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Decode the entry for the given terminal name
    pub fn load(&self, name: &str) -> Result<Entry, Error> {
        let Some(path) = self.index.get(name) else {
            return Err(Error::NotFound(name.to_owned()));
        };
        let buffer = fs::read(path)?;
        Ok(Entry::parse(&buffer)?)
    }

    /// Decode the entry for the terminal named by `TERM`
    ///
    /// The fallback name is used when `TERM` is unset or empty.
    pub fn load_default(&self, fallback: Option<&str>) -> Result<Entry, Error> {
        match env::var("TERM") {
            Ok(name) if !name.is_empty() => self.load(&name),
            _ => match fallback {
                Some(name) => self.load(name),
                None => Err(Error::NoDefaultTerminal),
            },
        }
    }
}

fn index_tree(dir: &Path, index: &mut BTreeMap<String, PathBuf>) -> Result<(), Error> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            index_tree(&path, index)?;
        } else {
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if let Some(old) = index.insert(name.to_owned(), path.clone()) {
                trace!(name, old = %old.display(), new = %path.display(), "duplicate leaf name");
            }
        }
    }
    Ok(())
}

/// Returns all directories that are searched for terminfo files
///
/// This function does not attempt to verify if the directories to be
/// searched actually exist.
pub fn search_directories() -> Vec<PathBuf> {
    let mut search_dirs = vec![];

    // Lazily evaluated iterator, consumed at most once.
    let mut default_dirs = TERMINFO_DIRS.iter().map(PathBuf::from);

    // Search the directory from the `TERMINFO` environment variable.
    if let Ok(dir) = env::var("TERMINFO") {
        search_dirs.push(PathBuf::from(&dir));
    }

    // Search `.terminfo` in the home directory.
    if let Some(home_dir) = env::home_dir() {
        search_dirs.push(home_dir.join(".terminfo"));
    }

    // Search colon separated directories from the `TERMINFO_DIRS`
    // environment variable.
    if let Ok(dirs) = env::var("TERMINFO_DIRS") {
        for dir in dirs.split(':') {
            if dir.is_empty() {
                // Empty directory means search the default locations.
                search_dirs.extend(&mut default_dirs);
            } else {
                search_dirs.push(PathBuf::from(dir));
            }
        }
    }

    // Search default terminfo locations (nothing is added if used already).
    search_dirs.extend(&mut default_dirs);

    search_dirs
}
