use colored::Colorize;
use std::io::{self, Write};

/// Width of the separator printed between hosts
pub const RULE_WIDTH: usize = 80;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print the separator between hosts
pub fn rule() {
    println!("{}", "*".repeat(RULE_WIDTH).dimmed());
}

/// Start a progress line that [`finish_line`] completes
pub fn begin_line(msg: &str) {
    print!("  {msg}... ");
    let _ = io::stdout().flush();
}

/// Complete a line started by [`begin_line`]
pub fn finish_line(outcome: &str) {
    println!("{outcome}");
}
