use std::{error::Error, io, io::Write};

use termvm::{Database, Parameter, Terminal};

fn main() -> Result<(), Box<dyn Error>> {
    let db = Database::open_system()?;
    let entry = db.load_default(Some("xterm"))?;
    println!(
        "terminal: {}",
        entry.names().brief.as_deref().unwrap_or("(unnamed)")
    );

    let mut terminal = Terminal::new(entry);
    let Some(cup) = terminal.program("cup") else {
        println!("Your terminal has no cursor addressing capability");
        return Ok(());
    };
    let cup = cup?;

    for (row, column) in [(0, 0), (5, 10), (23, 79)] {
        let bytes = cup.exec(
            &mut terminal,
            1,
            &[Parameter::from(row), Parameter::from(column)],
        )?;
        print!("cup({row}, {column}) = ");
        io::stdout().write_all(&bytes.escape_ascii().collect::<Vec<u8>>())?;
        println!();
    }

    Ok(())
}
