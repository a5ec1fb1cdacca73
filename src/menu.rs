//! Numbered interactive menu (the default when no command is given).

use crate::commands;
use crate::routines::{Routine, RoutineEnv};
use anyhow::Result;
use std::io::{BufRead, Write};
use strum::IntoEnumIterator;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Routine(Routine),
    CheckPassword,
    All,
    Quit,
}

/// Menu entries in display order (numbered from 1)
pub fn entries() -> Vec<MenuChoice> {
    let mut entries: Vec<MenuChoice> = Routine::iter().map(MenuChoice::Routine).collect();
    entries.push(MenuChoice::CheckPassword);
    entries
}

pub fn parse_choice(input: &str, entries: &[MenuChoice]) -> Option<MenuChoice> {
    match input.trim().to_ascii_lowercase().as_str() {
        "a" | "all" => Some(MenuChoice::All),
        "q" | "quit" | "exit" | "0" => Some(MenuChoice::Quit),
        other => {
            let n: usize = other.parse().ok()?;
            entries.get(n.checked_sub(1)?).copied()
        }
    }
}

fn render(entries: &[MenuChoice]) -> String {
    let mut out = String::from("\nhostharden\n");
    for (i, entry) in entries.iter().enumerate() {
        let label = match entry {
            MenuChoice::Routine(r) => r.description(),
            MenuChoice::CheckPassword => "Check a password against known breaches",
            MenuChoice::All | MenuChoice::Quit => continue,
        };
        out.push_str(&format!("{:>3}) {}\n", i + 1, label));
    }
    out.push_str("  a) Run all configuration routines\n  q) Quit\nChoice: ");
    out
}

fn read_choice(entries: &[MenuChoice]) -> Option<MenuChoice> {
    loop {
        print!("{}", render(entries));
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
        match parse_choice(&line, entries) {
            Some(choice) => return Some(choice),
            None => println!("Unknown choice {:?}", line.trim()),
        }
    }
}

/// Loop until quit or EOF; returns the exit code of the last action
pub fn run(env: &RoutineEnv<'_>) -> Result<i32> {
    let entries = entries();
    let mut last = 0;
    while let Some(choice) = read_choice(&entries) {
        let result = match choice {
            MenuChoice::Quit => break,
            MenuChoice::All => commands::run_all(env),
            MenuChoice::CheckPassword => commands::check_password(env.config, false),
            MenuChoice::Routine(routine) => commands::run_routine(routine, env),
        };
        last = match result {
            Ok(code) => code,
            Err(e) if commands::is_unrecoverable(&e) => return Err(e),
            Err(e) => {
                error!("{:#}", e);
                println!("Error: {:#}", e);
                1
            }
        };
    }
    Ok(last)
}
