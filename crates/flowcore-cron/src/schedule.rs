//! `CronSchedule`: a parsed cron expression plus `next`/`prev` firing-time
//! iteration.

use crate::error::CronError;
use crate::field::{parse_field, FieldSpec, MONTH_NAMES, WEEKDAY_NAMES};
use crate::macros;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;
use std::collections::BTreeSet;

/// One lookahead year's worth of minutes, the bound `next`/`prev` must
/// terminate within.
const MAX_LOOKAHEAD_MINUTES: i64 = 366 * 24 * 60;

/// A parsed five- or six-field cron expression.
///
/// Stored as bitset-like [`FieldSpec`]s rather than the raw text so that
/// `matches`/`next`/`prev` never re-parse; `Workflow::on` carries the
/// original string (and timezone) and calls [`CronSchedule::parse`] once at
/// construction.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: FieldSpec,
    hour: FieldSpec,
    dom: FieldSpec,
    last_day_of_month: bool,
    month: FieldSpec,
    dow: FieldSpec,
    year: Option<FieldSpec>,
    source: String,
}

impl CronSchedule {
    /// Parse a cron expression: 5 or 6 whitespace-separated fields, or one of
    /// the `@macro` shorthands.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(parse_err(trimmed, "empty expression"));
        }

        let body = if let Some(rest) = trimmed.strip_prefix('@') {
            macros::expand(trimmed).ok_or_else(|| parse_err(trimmed, format!("unknown macro '@{rest}'")))?
        } else {
            trimmed
        };

        let fields: Vec<&str> = body.split_whitespace().collect();
        if fields.len() != 5 && fields.len() != 6 {
            return Err(parse_err(
                trimmed,
                format!("expected 5 or 6 fields, got {}", fields.len()),
            ));
        }

        let minute = parse_field(fields[0], trimmed, 0, 59, &[], false)?;
        let hour = parse_field(fields[1], trimmed, 0, 23, &[], false)?;

        let (dom, last_day_of_month) = if fields[2].eq_ignore_ascii_case("L") {
            (
                FieldSpec {
                    values: BTreeSet::new(),
                    is_wildcard: false,
                },
                true,
            )
        } else {
            (parse_field(fields[2], trimmed, 1, 31, &[], true)?, false)
        };

        let month = parse_field(fields[3], trimmed, 1, 12, MONTH_NAMES, false)?;
        let dow = normalize_dow(parse_field(fields[4], trimmed, 0, 7, WEEKDAY_NAMES, true)?);

        let year = match fields.get(5) {
            None | Some(&"*") => None,
            Some(token) => Some(parse_field(token, trimmed, 1970, 2399, &[], false)?),
        };

        Ok(Self {
            minute,
            hour,
            dom,
            last_day_of_month,
            month,
            dow,
            year,
            source: trimmed.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Smallest instant strictly greater than `from`, in `tz`'s civil-time
    /// rules.
    pub fn next(&self, tz: Tz, from: chrono::DateTime<Tz>) -> Result<chrono::DateTime<Tz>, CronError> {
        let mut candidate = truncate_to_minute(from.naive_local()) + Duration::minutes(1);
        for _ in 0..MAX_LOOKAHEAD_MINUTES {
            if self.matches_naive(candidate) {
                if let Some(dt) = localize_earliest(tz, candidate) {
                    return Ok(dt);
                }
            }
            candidate += Duration::minutes(1);
        }
        Err(CronError::NoMatch)
    }

    /// Largest instant strictly less than `from`, symmetric to [`Self::next`].
    pub fn prev(&self, tz: Tz, from: chrono::DateTime<Tz>) -> Result<chrono::DateTime<Tz>, CronError> {
        let mut candidate = truncate_to_minute(from.naive_local()) - Duration::minutes(1);
        for _ in 0..MAX_LOOKAHEAD_MINUTES {
            if self.matches_naive(candidate) {
                if let Some(dt) = localize_earliest(tz, candidate) {
                    return Ok(dt);
                }
            }
            candidate -= Duration::minutes(1);
        }
        Err(CronError::NoMatch)
    }

    /// An iterator of firing instants starting strictly after `from`.
    pub fn iter_from(&self, tz: Tz, from: chrono::DateTime<Tz>) -> CronIter<'_> {
        CronIter {
            schedule: self,
            tz,
            cursor: from,
            exhausted: false,
        }
    }

    fn matches_naive(&self, dt: NaiveDateTime) -> bool {
        self.minute.values.contains(&dt.minute())
            && self.hour.values.contains(&dt.hour())
            && self.month.values.contains(&dt.month())
            && self.year_matches(dt.year())
            && self.day_matches(dt.date())
    }

    fn year_matches(&self, year: i32) -> bool {
        match &self.year {
            Some(f) => year >= 0 && f.values.contains(&(year as u32)),
            None => true,
        }
    }

    /// The day-of-month/day-of-week union/intersection rule:
    /// when both fields are explicit (not `*`/`?`), a day fires if *either*
    /// matches; otherwise the single explicit field (or neither) governs.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom_ok = if self.last_day_of_month {
            date.day() == days_in_month(date.year(), date.month())
        } else {
            self.dom.values.contains(&date.day())
        };
        let dow_ok = self.dow.values.contains(&weekday_number(date));

        let dom_explicit = self.last_day_of_month || !self.dom.is_wildcard;
        let dow_explicit = !self.dow.is_wildcard;

        match (dom_explicit, dow_explicit) {
            (false, false) => true,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (true, true) => dom_ok || dow_ok,
        }
    }
}

/// Sunday = 0 .. Saturday = 6, the standard cron day-of-week range.
fn weekday_number(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday()
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid first-of-month")
        .pred_opt()
        .expect("valid predecessor date")
        .day()
}

fn normalize_dow(mut field: FieldSpec) -> FieldSpec {
    field.values = field.values.iter().map(|&v| if v == 7 { 0 } else { v }).collect();
    field
}

fn truncate_to_minute(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_second(0).and_then(|d| d.with_nanosecond(0)).unwrap_or(dt)
}

/// Localize a naive civil time, handling DST gaps (spring-forward: the civil
/// time doesn't exist, so the candidate is skipped) and overlaps
/// (fall-back: the civil time exists twice; take the earliest actual
/// instant so a schedule fires exactly once per civil-time value).
fn localize_earliest(tz: Tz, naive: NaiveDateTime) -> Option<chrono::DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt),
        chrono::LocalResult::Ambiguous(earliest, _latest) => Some(earliest),
        chrono::LocalResult::None => None,
    }
}

fn parse_err(expr: &str, reason: impl Into<String>) -> CronError {
    CronError::Parse {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

/// Iterator of firing instants, strictly increasing, yielded by repeated
/// calls to [`CronSchedule::next`]. Stops (returns `None`) once `next`
/// raises `CronNoMatch`.
pub struct CronIter<'a> {
    schedule: &'a CronSchedule,
    tz: Tz,
    cursor: chrono::DateTime<Tz>,
    exhausted: bool,
}

impl Iterator for CronIter<'_> {
    type Item = chrono::DateTime<Tz>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.schedule.next(self.tz, self.cursor) {
            Ok(dt) => {
                self.cursor = dt;
                Some(dt)
            }
            Err(CronError::NoMatch) => {
                self.exhausted = true;
                None
            }
            Err(_) => {
                self.exhausted = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;
    use chrono_tz::UTC;

    fn dt(tz: Tz, y: i32, m: u32, d: u32, h: u32, min: u32) -> chrono::DateTime<Tz> {
        tz.from_local_datetime(&NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap())
            .single()
            .unwrap()
    }

    #[test]
    fn parses_macros() {
        let s = CronSchedule::parse("@hourly").unwrap();
        assert!(s.minute.values.contains(&0));
        assert!(s.hour.is_wildcard);
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(CronSchedule::parse("not a cron").is_err());
    }

    #[test]
    fn every_fifteen_minutes() {
        let s = CronSchedule::parse("*/15 * * * *").unwrap();
        let start = dt(UTC, 2024, 1, 1, 0, 0);
        let next = s.next(UTC, start).unwrap();
        assert_eq!(next, dt(UTC, 2024, 1, 1, 0, 15));
    }

    #[test]
    fn next_then_prev_round_trips_on_a_matching_instant() {
        let s = CronSchedule::parse("30 2 * * *").unwrap();
        let t = dt(UTC, 2024, 6, 1, 2, 30);
        let n = s.next(UTC, t).unwrap();
        let p = s.prev(UTC, n).unwrap();
        assert_eq!(p, t);
    }

    /// Spring-forward skips the non-existent 02:30.
    #[test]
    fn dst_spring_forward_skips_nonexistent_hour() {
        let s = CronSchedule::parse("30 2 * * *").unwrap();
        let start = dt(New_York, 2024, 3, 9, 0, 0);
        let first = s.next(New_York, start).unwrap();
        assert_eq!(first, dt(New_York, 2024, 3, 9, 2, 30));

        let second = s.next(New_York, first).unwrap();
        assert_eq!(second, dt(New_York, 2024, 3, 11, 2, 30));
    }

    #[test]
    fn dom_dow_union_rule_fires_on_either_match() {
        // 1st of month OR Friday.
        let s = CronSchedule::parse("0 0 1 * FRI").unwrap();
        // 2024-02-02 is a Friday, not the 1st.
        let friday = NaiveDate::from_ymd_opt(2024, 2, 2).unwrap();
        assert!(s.day_matches(friday));
        // 2024-03-01 is the 1st, not a Friday.
        let first = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(s.day_matches(first));
        // 2024-03-02 is neither.
        let neither = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert!(!s.day_matches(neither));
    }

    #[test]
    fn last_day_of_month_token() {
        let s = CronSchedule::parse("0 0 L * *").unwrap();
        assert!(s.day_matches(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));
        assert!(!s.day_matches(NaiveDate::from_ymd_opt(2024, 2, 28).unwrap()));
        assert!(s.day_matches(NaiveDate::from_ymd_opt(2023, 2, 28).unwrap()));
    }

    #[test]
    fn impossible_expression_yields_no_match_within_bound() {
        // February never has 31 days.
        let s = CronSchedule::parse("0 0 31 2 *").unwrap();
        let start = dt(UTC, 2024, 1, 1, 0, 0);
        assert!(matches!(s.next(UTC, start), Err(CronError::NoMatch)));
    }

    #[test]
    fn iterator_yields_strictly_increasing_instants() {
        let s = CronSchedule::parse("0 * * * *").unwrap();
        let start = dt(UTC, 2024, 1, 1, 0, 0);
        let first_three: Vec<_> = s.iter_from(UTC, start).take(3).collect();
        assert_eq!(first_three.len(), 3);
        assert!(first_three[0] < first_three[1]);
        assert!(first_three[1] < first_three[2]);
    }
}
