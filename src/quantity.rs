/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/quantity.rs
*
* Minimal Kubernetes resource quantity parsing ("500m", "2", "1.5Gi", "1e3"),
* enough to compare a pod-copy resources override against the upper bounds a
* PodAccessTemplate declares.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::{Error, Result};

const SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parses a quantity into its value in base units (cores, bytes).
pub fn parse_quantity(raw: &str) -> Result<f64> {
    let invalid = || Error::InvalidMutation(format!("invalid resource quantity {raw:?}"));
    let s = raw.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((s, 1.0));

    // "1e3" style exponents parse directly; a trailing "E" was already taken as exa.
    let value: f64 = number.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok(value * multiplier)
}

/// Errors when `requested` is larger than `bound`.
pub fn check_within(resource: &str, requested: &str, bound: &str) -> Result<()> {
    let req = parse_quantity(requested)?;
    let max = parse_quantity(bound)?;
    if req > max {
        return Err(Error::InvalidMutation(format!(
            "{resource} {requested} exceeds the template maximum of {bound}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("2").unwrap(), 2.0);
        assert_eq!(parse_quantity("500m").unwrap(), 0.5);
        assert_eq!(parse_quantity("1Gi").unwrap(), 1073741824.0);
        assert_eq!(parse_quantity("1.5Mi").unwrap(), 1.5 * 1048576.0);
        assert_eq!(parse_quantity("1k").unwrap(), 1000.0);
        assert_eq!(parse_quantity("1e3").unwrap(), 1000.0);
        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("lots").is_err());
        assert!(parse_quantity("-1").is_err());
    }

    #[test]
    fn test_check_within() {
        assert!(check_within("cpu", "500m", "1").is_ok());
        assert!(check_within("cpu", "1", "1000m").is_ok());
        assert!(check_within("memory", "2Gi", "1Gi").is_err());
        assert!(check_within("memory", "512Mi", "1G").is_ok());
    }
}
