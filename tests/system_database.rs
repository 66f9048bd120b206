//! Decode and compile everything the host system ships
//!
//! These tests walk the real terminfo directories when present and are
//! no-ops on systems without one.

use std::collections::BTreeSet;
use std::path::Path;

use termvm::{Database, Instruction, Program};

const ROOTS: &[&str] = &["/etc/terminfo", "/lib/terminfo", "/usr/share/terminfo"];

fn open_roots() -> Vec<Database> {
    ROOTS
        .iter()
        .filter(|root| Path::new(root).is_dir())
        .map(|root| Database::open(root).unwrap())
        .collect()
}

#[test]
fn decode_all_entries() {
    for db in open_roots() {
        for name in db.names() {
            let entry = db
                .load(name)
                .unwrap_or_else(|err| panic!("decoding {name}: {err}"));
            // every entry names itself
            let brief = entry.names().brief.as_deref().unwrap_or("");
            assert!(!brief.is_empty(), "{name} has no terminal name");
            // negative raw values never surface
            for (cap, value) in &entry.numbers {
                assert!(*value >= 0, "{name}: ghost numeric {cap}");
            }
        }
    }
}

#[test]
fn no_duplicate_leaf_names() {
    for root in ROOTS.iter().filter(|root| Path::new(root).is_dir()) {
        let db = Database::open(root).unwrap();
        let names: Vec<_> = db.names().collect();
        let unique: BTreeSet<_> = names.iter().copied().collect();
        assert_eq!(names.len(), unique.len(), "{root} has duplicate leaves");
    }
}

#[test]
fn compile_all_string_capabilities() {
    for db in open_roots() {
        for name in db.names() {
            let entry = db.load(name).unwrap();
            for (cap, source) in &entry.strings {
                let program = Program::compile(source)
                    .unwrap_or_else(|err| panic!("{name}/{cap}: {err}"));
                for (position, instruction) in program.code().iter().enumerate() {
                    if let Instruction::Jump(delta) | Instruction::JumpZero(delta) = instruction {
                        let target = position as isize + delta + 1;
                        assert!(
                            target >= 0 && target <= program.code().len() as isize,
                            "{name}/{cap}: jump at {position} lands at {target}"
                        );
                    }
                }
            }
        }
    }
}
