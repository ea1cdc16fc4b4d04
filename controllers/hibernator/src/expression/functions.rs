//! Helper functions available to expressions
//!
//! Resource quantities (`250m`, `64Mi`, `1e2G`) are converted to plain numbers
//! and times are parsed with Go-style reference layouts
//! (`2006-01-02T15:04:05Z`).

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

use super::ExpressionError;

const QUANTITY_PATTERN: &str = r"^([+-]?[0-9.]+(?:[eE][+-]?[0-9]+)?)(m|k|K|Ki|M|Mi|G|Gi|T|Ti|P|Pi|E|Ei)?$";

/// Parses Kubernetes resource quantities
#[derive(Debug, Clone)]
pub struct QuantityParser {
    pattern: Regex,
}

impl QuantityParser {
    pub fn new() -> Result<Self, ExpressionError> {
        Ok(Self {
            pattern: Regex::new(QUANTITY_PATTERN)?,
        })
    }

    fn factor(suffix: &str) -> f64 {
        const KIB: f64 = 1024.0;
        match suffix {
            "m" => 1e-3,
            "k" | "K" => 1e3,
            "Ki" => KIB,
            "M" => 1e6,
            "Mi" => KIB.powi(2),
            "G" => 1e9,
            "Gi" => KIB.powi(3),
            "T" => 1e12,
            "Ti" => KIB.powi(4),
            "P" => 1e15,
            "Pi" => KIB.powi(5),
            "E" => 1e18,
            "Ei" => KIB.powi(6),
            _ => 1.0,
        }
    }

    /// Convert a quantity such as `64Mi` or `250m` to a number
    pub fn parse(&self, quantity: &str) -> Result<f64, ExpressionError> {
        let invalid = || ExpressionError::InvalidQuantity(quantity.to_string());
        let captures = self.pattern.captures(quantity.trim()).ok_or_else(invalid)?;
        let number: f64 = captures[1].parse().map_err(|_| invalid())?;
        let suffix = captures.get(2).map_or("", |m| m.as_str());
        Ok(number * Self::factor(suffix))
    }
}

/// Memory quantity in bytes
pub fn memory_to_number(parser: &QuantityParser, memory: &str) -> Result<f64, ExpressionError> {
    parser.parse(memory)
}

/// CPU quantity in cores
pub fn cpu_to_number(parser: &QuantityParser, cpu: &str) -> Result<f64, ExpressionError> {
    parser.parse(cpu)
}

/// Shift `time` by a period such as `20d`, `-1d` or `1h30m`
pub fn add_time(time: DateTime<Utc>, period: &str) -> Result<DateTime<Utc>, ExpressionError> {
    let invalid = || ExpressionError::InvalidTime(format!("invalid period {period:?}"));
    let (negative, body) = match period.trim().strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, period.trim()),
    };
    if body.is_empty() {
        return Err(invalid());
    }

    let mut seconds: i64 = 0;
    let mut digits = String::new();
    for c in body.chars() {
        let unit = match c {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            '0'..='9' => {
                digits.push(c);
                continue;
            }
            _ => return Err(invalid()),
        };
        let amount: i64 = digits.parse().map_err(|_| invalid())?;
        seconds = amount
            .checked_mul(unit)
            .and_then(|value| seconds.checked_add(value))
            .ok_or_else(invalid)?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(invalid());
    }

    let delta = Duration::seconds(if negative { -seconds } else { seconds });
    time.checked_add_signed(delta).ok_or_else(invalid)
}

/// Translate a Go reference layout into a chrono format string
///
/// Layouts already containing `%` are taken as chrono formats.
pub fn go_layout_to_chrono(layout: &str) -> String {
    if layout.contains('%') {
        return layout.to_string();
    }

    const TOKENS: &[(&str, &str)] = &[
        ("January", "%B"),
        ("Monday", "%A"),
        (".000000000", "%.9f"),
        (".999999999", "%.f"),
        (".000000", "%.6f"),
        (".000", "%.3f"),
        ("Z07:00", "%:z"),
        ("-07:00", "%:z"),
        ("-0700", "%z"),
        ("2006", "%Y"),
        ("Jan", "%b"),
        ("Mon", "%a"),
        ("MST", "%Z"),
        ("15", "%H"),
        ("01", "%m"),
        ("02", "%d"),
        ("03", "%I"),
        ("04", "%M"),
        ("05", "%S"),
        ("06", "%y"),
        ("PM", "%p"),
    ];

    let mut format = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'outer: while let Some(c) = rest.chars().next() {
        for (token, replacement) in TOKENS {
            if let Some(remaining) = rest.strip_prefix(token) {
                format.push_str(replacement);
                rest = remaining;
                continue 'outer;
            }
        }
        format.push(c);
        rest = &rest[c.len_utf8()..];
    }
    format
}

/// Parse `value` with a Go-style layout
///
/// Layouts without a zone are interpreted as UTC; date-only layouts yield
/// midnight.
pub fn parse_time(value: &str, layout: &str) -> Result<DateTime<Utc>, ExpressionError> {
    let format = go_layout_to_chrono(layout);
    if let Ok(parsed) = DateTime::parse_from_str(value, &format) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, &format) {
        return Ok(parsed.and_utc());
    }
    NaiveDate::parse_from_str(value, &format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| ExpressionError::InvalidTime(format!("{value:?} does not match layout {layout:?}")))
}
