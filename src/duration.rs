/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/duration.rs
*
* Duration arithmetic for access windows. Templates and requests carry
* durations as human strings in the Go notation that `kubectl` users already
* know ("90s", "1h30m", "1.5h", "250ms"). This module parses and formats that
* notation and picks the effective access duration from the requested value,
* the template default and the template maximum.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::Error;
use std::fmt;
use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;
const NANOS_PER_MIN: u128 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MIN;
// Go durations are an i64 count of nanoseconds.
const MAX_NANOS: u128 = i64::MAX as u128;

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "\u{00b5}s" | "\u{03bc}s" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(NANOS_PER_MIN),
        "h" => Some(NANOS_PER_HOUR),
        _ => None,
    }
}

/// Parses a Go-style duration string such as `"1h30m"` or `"2.5s"`.
///
/// The bare string `"0"` is accepted as zero. Negative durations are rejected
/// because an access window cannot run backwards.
pub fn parse_duration(input: &str) -> Result<Duration, Error> {
    let invalid = |why: &str| Error::RequestDurationInvalid(format!("{input:?}: {why}"));

    let mut s = input.trim();
    let mut negative = false;
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        let int_len = s.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, rest) = s.split_at(int_len);
        let (frac_part, rest) = match rest.strip_prefix('.') {
            Some(after_dot) => {
                let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
                after_dot.split_at(frac_len)
            }
            None => ("", rest),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("expected a number"));
        }

        let unit_len = rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (unit, rest) = rest.split_at(unit_len);
        if unit.is_empty() {
            return Err(invalid("missing unit"));
        }
        let scale = unit_nanos(unit).ok_or_else(|| invalid(&format!("unknown unit {unit:?}")))?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid("number out of range"))?
        };
        let mut value = whole
            .checked_mul(scale)
            .filter(|v| *v <= MAX_NANOS)
            .ok_or_else(|| invalid("duration out of range"))?;

        if !frac_part.is_empty() {
            // Keep at most 18 digits of precision, more cannot change the result.
            let digits = &frac_part[..frac_part.len().min(18)];
            let numerator: u128 = digits.parse().map_err(|_| invalid("bad fraction"))?;
            let denominator = 10u128.pow(digits.len() as u32);
            value = value
                .checked_add(numerator * scale / denominator)
                .ok_or_else(|| invalid("duration out of range"))?;
        }

        total = total
            .checked_add(value)
            .filter(|t| *t <= MAX_NANOS)
            .ok_or_else(|| invalid("duration out of range"))?;
        s = rest;
    }

    if negative && total > 0 {
        return Err(invalid("negative durations are not allowed"));
    }

    Ok(Duration::from_nanos(total as u64))
}

/// Formats `value` with `precision` fractional digits, trimming trailing zeros.
fn push_fraction(out: &mut String, value: u128, precision: u32) {
    let divisor = 10u128.pow(precision);
    let whole = value / divisor;
    let frac = value % divisor;
    out.push_str(&whole.to_string());
    if frac != 0 {
        let digits = format!("{:0width$}", frac, width = precision as usize);
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
}

/// Renders a duration the way Go's `time.Duration.String()` does,
/// e.g. `24h0m0s`, `1m30s`, `1.5s`, `250ms`.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    let mut out = String::new();

    if nanos < NANOS_PER_SEC {
        if nanos == 0 {
            return "0s".to_string();
        } else if nanos < NANOS_PER_MICRO {
            out.push_str(&nanos.to_string());
            out.push_str("ns");
        } else if nanos < NANOS_PER_MILLI {
            push_fraction(&mut out, nanos, 3);
            out.push_str("\u{00b5}s");
        } else {
            push_fraction(&mut out, nanos, 6);
            out.push_str("ms");
        }
        return out;
    }

    let hours = nanos / NANOS_PER_HOUR;
    let minutes = (nanos % NANOS_PER_HOUR) / NANOS_PER_MIN;
    let seconds_nanos = nanos % NANOS_PER_MIN;

    if hours > 0 {
        out.push_str(&format!("{hours}h{minutes}m"));
    } else if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    push_fraction(&mut out, seconds_nanos, 9);
    out.push('s');
    out
}

/// How the effective duration was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionKind {
    /// The request did not specify a duration.
    Defaulted,
    /// The request's own duration was within the template maximum.
    Custom,
    /// The request asked for more than the template maximum.
    Clamped,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Defaulted => "Defaulted",
            DecisionKind::Custom => "Custom",
            DecisionKind::Clamped => "Clamped",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DurationDecision {
    pub duration: Duration,
    pub kind: DecisionKind,
    pub message: String,
}

/// Picks the effective duration from already-parsed inputs.
///
/// A zero `requested` means the request left the duration unspecified.
pub fn decide(requested: Duration, default: Duration, max: Duration) -> DurationDecision {
    if requested.is_zero() {
        DurationDecision {
            duration: default,
            kind: DecisionKind::Defaulted,
            message: format!(
                "Access duration defaulted to template default duration ({})",
                format_duration(default)
            ),
        }
    } else if requested <= max {
        DurationDecision {
            duration: requested,
            kind: DecisionKind::Custom,
            message: format!(
                "Access requested custom duration ({})",
                format_duration(requested)
            ),
        }
    } else {
        DurationDecision {
            duration: max,
            kind: DecisionKind::Clamped,
            message: format!(
                "Access requested duration ({}) larger than template maximum duration ({})",
                format_duration(requested),
                format_duration(max)
            ),
        }
    }
}

/// Parses the request and template durations and decides the effective one.
///
/// An absent or empty `requested` string is treated as unspecified.
pub fn effective_access_duration(
    requested: Option<&str>,
    template_default: &str,
    template_max: &str,
) -> Result<DurationDecision, Error> {
    let requested = match requested.map(str::trim) {
        None | Some("") => Duration::ZERO,
        Some(raw) => parse_duration(raw)?,
    };
    let default = parse_duration(template_default)?;
    let max = parse_duration(template_max)?;
    Ok(decide(requested, default, max))
}

/// Parses a template's duration pair and checks `default <= max`.
pub fn validate_template_durations(default: &str, max: &str) -> Result<(Duration, Duration), Error> {
    let default_d = parse_duration(default)?;
    let max_d = parse_duration(max)?;
    if default_d > max_d {
        return Err(Error::RequestDurationInvalid(format!(
            "defaultDuration ({}) is greater than maxDuration ({})",
            format_duration(default_d),
            format_duration(max_d)
        )));
    }
    Ok((default_d, max_d))
}

/// clap value parser for duration flags.
pub fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}
