use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Which operator variant executes a task.
///
/// - `ShellCommand`: run a command line through the platform shell.
/// - `SqlStatement`: run one statement against a named warehouse connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatorKind {
    ShellCommand,
    SqlStatement,
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorKind::ShellCommand => f.write_str("shell-command"),
            OperatorKind::SqlStatement => f.write_str("sql-statement"),
        }
    }
}

/// Classification of a failed operator attempt.
///
/// Only `Transient` failures are eligible for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
    /// The attempt was terminated because its run was aborted.
    Cancelled,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => f.write_str("transient"),
            ErrorClass::Permanent => f.write_str("permanent"),
            ErrorClass::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Parse a compact duration string like `"250ms"`, `"3s"`, `"5m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => scaled(s, value, 60),
        "h" => scaled(s, value, 60 * 60),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

fn scaled(s: &str, value: u64, secs_per_unit: u64) -> Result<Duration, String> {
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
