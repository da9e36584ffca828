//! Semantic equality for values whose textual form is not canonical:
//! semantic versions, resource quantities and timestamps.

use std::cmp::Ordering;

use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use semver::Version;

/// Parse a semantic version, accepting an optional leading `v` and nothing else lenient.
pub fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    let trimmed = raw.trim();
    Version::parse(trimmed.strip_prefix('v').unwrap_or(trimmed))
}

/// Precedence order per semver: build metadata does not participate.
pub fn version_precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre))
}

pub fn versions_equal(a: &Version, b: &Version) -> bool {
    version_precedence(a, b) == Ordering::Equal
}

/// Optional variant; two absent versions are equal.
pub fn opt_versions_equal(a: Option<&Version>, b: Option<&Version>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => versions_equal(a, b),
        _ => false,
    }
}

/// Quantities compare by value: `128Mi` equals `134217728`, `500m` equals `0.5`.
/// Unparseable quantities fall back to string identity.
pub fn quantities_equal(a: &Quantity, b: &Quantity) -> bool {
    match (quantity_nanos(&a.0), quantity_nanos(&b.0)) {
        (Some(x), Some(y)) => x == y,
        _ => a.0 == b.0,
    }
}

pub fn times_equal<A: TimeZone, B: TimeZone>(a: &DateTime<A>, b: &DateTime<B>) -> bool {
    a.with_timezone(&Utc) == b.with_timezone(&Utc)
}

const NANO: i128 = 1_000_000_000;

/// Value of a Kubernetes quantity in billionths of a unit, rounded up.
pub fn quantity_nanos(raw: &str) -> Option<i128> {
    let s = raw.trim();
    let (negative, s) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let num_end = s.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(s.len());
    let (number, suffix) = s.split_at(num_end);
    if number.is_empty() || number == "." || number.matches('.').count() > 1 {
        return None;
    }
    let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
    let digits: i128 = format!("{int_part}{frac_part}").parse().ok()?;
    let frac_scale = 10i128.checked_pow(frac_part.len() as u32)?;

    let (mul, div) = suffix_scale(suffix)?;
    let numer = digits.checked_mul(NANO)?.checked_mul(mul)?;
    let denom = frac_scale.checked_mul(div)?;
    let mut v = numer / denom;
    if numer % denom != 0 {
        v += 1;
    }
    Some(if negative { -v } else { v })
}

fn suffix_scale(suffix: &str) -> Option<(i128, i128)> {
    let pow10 = |e: u32| 10i128.checked_pow(e);
    Some(match suffix {
        "" => (1, 1),
        "n" => (1, pow10(9)?),
        "u" => (1, pow10(6)?),
        "m" => (1, pow10(3)?),
        "k" => (pow10(3)?, 1),
        "M" => (pow10(6)?, 1),
        "G" => (pow10(9)?, 1),
        "T" => (pow10(12)?, 1),
        "P" => (pow10(15)?, 1),
        "E" => (pow10(18)?, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        exp if exp.starts_with(['e', 'E']) => {
            let e: i32 = exp[1..].parse().ok()?;
            if e >= 0 {
                (pow10(e as u32)?, 1)
            } else {
                (1, pow10(e.unsigned_abs())?)
            }
        }
        _ => return None,
    })
}
