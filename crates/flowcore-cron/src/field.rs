//! Single cron field parsing: lists, ranges, steps, names.

use crate::error::CronError;
use std::collections::BTreeSet;

/// A parsed field: the set of allowed values plus whether the *original*
/// token was `*`/`?` (needed for the day-of-month/day-of-week union rule,
/// which only applies when *neither* field was a wildcard).
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub values: BTreeSet<u32>,
    pub is_wildcard: bool,
}

/// Parse one cron field (already macro-expanded, whitespace-trimmed).
///
/// `names` maps case-insensitive three-letter (or full) names to values, for
/// month (`JAN`..`DEC`) and day-of-week (`SUN`..`SAT`) fields. `wildcard_ok`
/// additionally accepts `?` as a synonym for `*` (day-of-month/day-of-week
/// only).
pub fn parse_field(
    field: &str,
    expr: &str,
    min: u32,
    max: u32,
    names: &[(&str, u32)],
    allow_question_mark: bool,
) -> Result<FieldSpec, CronError> {
    if field == "*" || (allow_question_mark && field == "?") {
        return Ok(FieldSpec {
            values: (min..=max).collect(),
            is_wildcard: true,
        });
    }

    let mut values = BTreeSet::new();
    for part in field.split(',') {
        values.extend(parse_range_or_step(part, expr, min, max, names)?);
    }

    if values.is_empty() {
        return Err(parse_err(expr, format!("field '{field}' matches no values")));
    }
    for v in &values {
        if *v < min || *v > max {
            return Err(parse_err(
                expr,
                format!("value {v} out of range [{min}, {max}] in field '{field}'"),
            ));
        }
    }

    Ok(FieldSpec {
        values,
        is_wildcard: false,
    })
}

fn parse_range_or_step(
    part: &str,
    expr: &str,
    min: u32,
    max: u32,
    names: &[(&str, u32)],
) -> Result<Vec<u32>, CronError> {
    let (base, step) = match part.split_once('/') {
        Some((base, step_str)) => {
            let step: u32 = step_str
                .parse()
                .map_err(|_| parse_err(expr, format!("invalid step '{step_str}' in '{part}'")))?;
            if step == 0 {
                return Err(parse_err(expr, format!("step of zero in '{part}'")));
            }
            (base, Some(step))
        }
        None => (part, None),
    };

    let (lo, hi) = if base == "*" {
        (min, max)
    } else if let Some((lo_str, hi_str)) = base.split_once('-') {
        (resolve_token(lo_str, expr, names)?, resolve_token(hi_str, expr, names)?)
    } else {
        let v = resolve_token(base, expr, names)?;
        (v, v)
    };

    if lo > hi {
        return Err(parse_err(expr, format!("range start {lo} exceeds end {hi} in '{part}'")));
    }

    let step = step.unwrap_or(1);
    Ok((lo..=hi).step_by(step as usize).collect())
}

fn resolve_token(token: &str, expr: &str, names: &[(&str, u32)]) -> Result<u32, CronError> {
    if let Ok(n) = token.parse::<u32>() {
        return Ok(n);
    }
    let upper = token.to_ascii_uppercase();
    names
        .iter()
        .find(|(name, _)| *name == upper)
        .map(|(_, v)| *v)
        .ok_or_else(|| parse_err(expr, format!("unrecognized token '{token}'")))
}

fn parse_err(expr: &str, reason: String) -> CronError {
    CronError::Parse {
        expr: expr.to_string(),
        reason,
    }
}

pub const MONTH_NAMES: &[(&str, u32)] = &[
    ("JAN", 1),
    ("FEB", 2),
    ("MAR", 3),
    ("APR", 4),
    ("MAY", 5),
    ("JUN", 6),
    ("JUL", 7),
    ("AUG", 8),
    ("SEP", 9),
    ("OCT", 10),
    ("NOV", 11),
    ("DEC", 12),
];

/// `SUN`=0 .. `SAT`=6, the standard cron 0-6 day-of-week range.
pub const WEEKDAY_NAMES: &[(&str, u32)] = &[
    ("SUN", 0),
    ("MON", 1),
    ("TUE", 2),
    ("WED", 3),
    ("THU", 4),
    ("FRI", 5),
    ("SAT", 6),
];
