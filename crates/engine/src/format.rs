//! Numeric display formatting.
//!
//! The display layer hands over a raw value and a format tag and gets back a
//! locale-formatted string (en-US grouping). Anything that is not a finite
//! number, including `"N/A"`, passes through unchanged.

use serde::{Deserialize, Serialize};

use crate::value::FieldValue;

/// Placeholder shown for values that could not be computed.
pub const NOT_AVAILABLE: &str = "N/A";

/// Display format for a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FormatTag {
    /// Unformatted value, no grouping.
    #[default]
    Raw,
    /// Fixed number of decimals with thousands grouping.
    Fixed { decimals: u8 },
    /// Fraction rendered as a percentage (`0.25` -> `25.00%`).
    Percent { decimals: u8 },
    /// Dollar amount (`-1234.5` -> `-$1,234.50`).
    Currency { decimals: u8 },
    /// Rounded whole number with grouping.
    Integer,
}

impl FormatTag {
    /// Parse a short tag name as used in catalogs and on the command line:
    /// `raw`, `integer`, `number-2`, `percent-1`, `currency-2`.
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase();
        match tag.as_str() {
            "raw" => return Some(FormatTag::Raw),
            "integer" | "int" => return Some(FormatTag::Integer),
            _ => {}
        }
        let (kind, decimals) = match tag.split_once('-') {
            Some((kind, d)) => (kind, d.parse::<u8>().ok()?),
            None => (tag.as_str(), 2),
        };
        match kind {
            "number" | "fixed" => Some(FormatTag::Fixed { decimals }),
            "percent" => Some(FormatTag::Percent { decimals }),
            "currency" => Some(FormatTag::Currency { decimals }),
            _ => None,
        }
    }
}

/// Format a raw string value. Unparsable input is returned as-is.
pub fn format_value(raw: &str, tag: FormatTag) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => format_number(n, tag),
        _ => raw.to_string(),
    }
}

/// Format a field value for display.
pub fn format_field(value: &FieldValue, tag: FormatTag) -> String {
    match value {
        FieldValue::Number(n) if n.0.is_finite() => format_number(n.0, tag),
        FieldValue::Number(_) => NOT_AVAILABLE.to_string(),
        other => other.raw_display(),
    }
}

/// Format a number according to `tag`.
pub fn format_number(n: f64, tag: FormatTag) -> String {
    match tag {
        FormatTag::Raw => FieldValue::number(n).raw_display(),
        FormatTag::Fixed { decimals } => group_decimal(n, decimals as usize),
        FormatTag::Integer => group_decimal(n.round(), 0),
        FormatTag::Percent { decimals } => {
            format!("{}%", group_decimal(n * 100.0, decimals as usize))
        }
        FormatTag::Currency { decimals } => {
            let body = group_decimal(n.abs(), decimals as usize);
            if n < 0.0 && body.chars().any(|c| c.is_ascii_digit() && c != '0') {
                format!("-${body}")
            } else {
                format!("${body}")
            }
        }
    }
}

/// Parse a displayed number back, stripping `$`, `%`, `,` and whitespace.
///
/// Returns `default` when nothing numeric remains.
pub fn parse_number(input: &str, default: f64) -> f64 {
    let cleaned: String = input
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%') && !c.is_whitespace())
        .collect();
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => default,
    }
}

fn group_decimal(n: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, n);
    let (sign, unsigned) = match formatted.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", formatted.as_str()),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    // "-0.00" reads as noise; drop the sign when nothing non-zero is shown.
    let is_zero = !unsigned.chars().any(|c| c.is_ascii_digit() && c != '0');
    let sign = if is_zero { "" } else { sign };

    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}
