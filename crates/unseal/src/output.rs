//! Status lines for humans, on stderr
//!
//! stdout is reserved for what a command produces (plaintext, object
//! names, JSON) so it can be piped.

use console::{style, StyledObject};

fn line(marker: StyledObject<&'static str>, msg: &str) {
    eprintln!("{} {}", marker, msg);
}

pub fn success(msg: &str) {
    line(style("✓").green().bold(), msg);
}

pub fn error(msg: &str) {
    line(style("✗").red().bold(), msg);
}

pub fn warning(msg: &str) {
    line(style("⚠").yellow().bold(), msg);
}

pub fn info(msg: &str) {
    line(style("ℹ").cyan(), msg);
}

pub fn header(msg: &str) {
    eprintln!("{}", style(msg).bold());
}

/// Indented `key: value` detail under a status line
pub fn kv(key: &str, value: &str) {
    eprintln!("    {} {}", style(format!("{}:", key)).dim(), value);
}
