//! Kubernetes quantity syntax validation.
//!
//! Quantities like `10Gi`, `500m` or `1.5e3` are validated at the codec
//! boundary so malformed sizes never reach a cluster round-trip.
use crate::error::{Error, Result};

const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: [&str; 7] = ["m", "k", "M", "G", "T", "P", "E"];

/// Validate a string against the Kubernetes quantity grammar.
///
/// Accepted: optional sign, decimal number, then either a binary suffix
/// (`Ki`..`Ei`), a decimal SI suffix (`m`, `k`, `M`, `G`, `T`, `P`, `E`),
/// or a decimal exponent (`e3`, `E-2`). A bare number is also valid.
pub fn validate_quantity(input: &str) -> Result<()> {
    let fail = || Error::Validation(format!("invalid quantity {input:?}"));

    let s = input.strip_prefix(['+', '-']).unwrap_or(input);
    if s.is_empty() {
        return Err(fail());
    }

    // Longest match first so `Ei` is not read as exponent `E` + garbage.
    let (number, suffix) = match BINARY_SUFFIXES
        .iter()
        .chain(DECIMAL_SUFFIXES.iter())
        .find(|suf| s.ends_with(**suf))
    {
        Some(suf) => (&s[..s.len() - suf.len()], Some(*suf)),
        None => (s, None),
    };

    let number = if suffix.is_none() {
        match number.split_once(['e', 'E']) {
            Some((mantissa, exponent)) => {
                let exponent = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
                if exponent.is_empty() || !exponent.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(fail());
                }
                mantissa
            }
            None => number,
        }
    } else {
        number
    };

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (number, None),
    };
    if int_part.is_empty() && frac_part.is_none_or(str::is_empty) {
        return Err(fail());
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(fail());
    }
    if let Some(frac) = frac_part {
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fail());
        }
    }
    Ok(())
}
