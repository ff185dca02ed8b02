//! Lenient parsing of compact HL7 timestamps
//!
//! HL7 v2 writes temporal values without punctuation (`YYYYMMDDHHMMSS.ffff+ZZZZ`),
//! often truncated, and senders regularly mix in their own separators. The
//! parser here rewrites such tokens into the punctuated ISO 8601 form
//! (`YYYY-MM-DDTHH:MM:SS.ffff+ZZ:ZZ`) so that downstream consumers can use a
//! strict parser.
//!
//! # Algorithm
//!
//! A small automaton walks a fixed template of digit fields and separators.
//! While a digit field is open it collects digits; once it is full it expects
//! the template separator. The automaton is forgiving in a handful of
//! well-defined ways:
//!
//! - a missing separator is synthesized when a digit arrives in its place
//! - a separator that arrives before a field is full closes the field early
//!   (the field is zero padded, except for fractional seconds; a short year
//!   rejects the token)
//! - `.` may start fractional seconds as soon as the time part has begun, and
//!   the skipped minute and second fields are zero filled
//! - `+`/`-` may start the offset as soon as the time part has begun
//! - `Z` terminates the token with a zero offset
//!
//! Anything else, including leftover input after the template is exhausted,
//! rejects the token.
//!
//! # Example
//!
//! ```
//! use v2fhir_core::temporal::parse;
//!
//! assert_eq!(parse("20240115103000", true).as_deref(), Some("2024-01-15T10:30:00"));
//! assert_eq!(parse("1030", false).as_deref(), Some("10:30"));
//! assert_eq!(parse("2024011", true), None);
//! ```

use chrono::{NaiveDate, NaiveTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Digits(usize),
    Sep(char),
}

const TEMPLATE: [Slot; 17] = [
    Slot::Digits(4), // year
    Slot::Sep('-'),
    Slot::Digits(2), // month
    Slot::Sep('-'),
    Slot::Digits(2), // day
    Slot::Sep('T'),
    Slot::Digits(2), // hour
    Slot::Sep(':'),
    Slot::Digits(2), // minute
    Slot::Sep(':'),
    Slot::Digits(2), // second
    Slot::Sep('.'),
    Slot::Digits(6), // fraction
    Slot::Sep('+'),
    Slot::Digits(2), // offset hour
    Slot::Sep(':'),
    Slot::Digits(2), // offset minute
];

const HOUR: usize = 6;
const FRACTION: usize = 12;
const OFFSET_SIGN: usize = 13;
const OFFSET_MINUTE_SEP: usize = 15;

const PERMITTED: &str = "0123456789T:-+.Z";

/// Parse a lenient temporal token into its canonical punctuated form
///
/// `has_date_part` selects whether the token starts with a year (`date`,
/// `dateTime`, `instant`) or with an hour (`time`). Returns `None` when the
/// token is rejected.
pub fn parse(text: &str, has_date_part: bool) -> Option<String> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if !prevalidate(&compact, has_date_part) {
        return None;
    }

    let start = if has_date_part { 0 } else { HOUR };
    let mut automaton = Automaton::new(start);
    for c in compact.chars() {
        if automaton.done {
            return None;
        }
        automaton.step(c)?;
    }
    automaton.finish()
}

/// Cheap rejection of tokens the automaton could never accept
fn prevalidate(text: &str, has_date_part: bool) -> bool {
    let min_prefix = if has_date_part { 4 } else { 2 };
    let prefix = text.find('T').unwrap_or(text.len());
    if prefix < min_prefix {
        return false;
    }

    if !text.chars().all(|c| PERMITTED.contains(c)) {
        return false;
    }

    let count = |needle: char| text.chars().filter(|&c| c == needle).count();
    count('T') <= 1 && count('.') <= 1 && count('+') <= 1 && count('-') <= 3 && count(':') <= 3
}

fn separator_matches(expected: char, c: char) -> bool {
    expected == c || (expected == '+' && c == '-')
}

struct Automaton {
    out: String,
    pos: usize,
    remaining: usize,
    field_start: usize,
    done: bool,
}

impl Automaton {
    fn new(start: usize) -> Self {
        let mut automaton = Self {
            out: String::with_capacity(32),
            pos: start,
            remaining: 0,
            field_start: 0,
            done: false,
        };
        automaton.enter(start);
        automaton
    }

    fn enter(&mut self, pos: usize) {
        self.pos = pos;
        if let Some(Slot::Digits(width)) = TEMPLATE.get(pos) {
            self.remaining = *width;
            self.field_start = self.out.len();
        }
    }

    fn terminate(&mut self) -> Option<()> {
        self.out.push('Z');
        self.done = true;
        Some(())
    }

    fn step(&mut self, c: char) -> Option<()> {
        match *TEMPLATE.get(self.pos)? {
            Slot::Digits(width) => self.collect_digit(width, c),
            Slot::Sep(sep) => self.expect_separator(sep, c),
        }
    }

    fn collect_digit(&mut self, width: usize, c: char) -> Option<()> {
        if c.is_ascii_digit() {
            self.out.push(c);
            self.remaining -= 1;
            if self.remaining == 0 {
                self.pos += 1;
            }
            return Some(());
        }

        // A separator may only close a field that has at least one digit.
        if self.remaining == width {
            return None;
        }

        if c == 'Z' && self.pos == FRACTION {
            return self.terminate();
        }

        if self.pos == 0 {
            return None;
        }

        match TEMPLATE.get(self.pos + 1) {
            Some(Slot::Sep(next)) if separator_matches(*next, c) => {
                if self.pos != FRACTION {
                    let missing = self.remaining;
                    self.out.insert_str(self.field_start, &"0".repeat(missing));
                }
                self.out.push(c);
                self.enter(self.pos + 2);
                Some(())
            }
            _ => None,
        }
    }

    fn expect_separator(&mut self, sep: char, c: char) -> Option<()> {
        if separator_matches(sep, c) {
            self.out.push(c);
            self.enter(self.pos + 1);
            return Some(());
        }

        let in_time = self.pos > HOUR;
        match c {
            'Z' if in_time => self.terminate(),
            '.' if in_time && self.pos < FRACTION => {
                for slot in &TEMPLATE[self.pos..FRACTION - 1] {
                    match *slot {
                        Slot::Sep(sep) => self.out.push(sep),
                        Slot::Digits(width) => self.out.push_str(&"0".repeat(width)),
                    }
                }
                self.out.push('.');
                self.enter(FRACTION);
                Some(())
            }
            '+' | '-' if in_time && self.pos < OFFSET_SIGN => {
                self.out.push(c);
                self.enter(OFFSET_SIGN + 1);
                Some(())
            }
            d if d.is_ascii_digit() => {
                self.out.push(sep);
                self.enter(self.pos + 1);
                self.step(d)
            }
            _ => None,
        }
    }

    fn finish(self) -> Option<String> {
        if self.done {
            return Some(self.out);
        }

        let complete = match TEMPLATE.get(self.pos) {
            None => true,
            Some(Slot::Sep(_)) => self.pos != OFFSET_MINUTE_SEP,
            Some(Slot::Digits(width)) => self.pos == FRACTION && self.remaining < *width,
        };
        complete.then_some(self.out)
    }
}

/// Precision of a canonical temporal value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Fraction,
}

/// Report the precision of a canonical value produced by [`parse`]
pub fn precision(canonical: &str) -> Precision {
    let (date, time) = match canonical.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None if canonical.contains(':') || canonical.len() == 2 => ("", Some(canonical)),
        None => (canonical, None),
    };

    let Some(time) = time else {
        return match date.len() {
            0..=4 => Precision::Year,
            5..=7 => Precision::Month,
            _ => Precision::Day,
        };
    };

    let clock = strip_offset(time);
    if clock.contains('.') {
        return Precision::Fraction;
    }
    match clock.matches(':').count() {
        0 => Precision::Hour,
        1 => Precision::Minute,
        _ => Precision::Second,
    }
}

/// Strip a trailing `Z` or `±HH:MM` offset from a canonical time part
fn strip_offset(time: &str) -> &str {
    let end = time.find(['+', '-', 'Z']).unwrap_or(time.len());
    &time[..end]
}

/// Check that a canonical value names a real calendar date and clock time
///
/// The automaton only checks shape. `20240230` parses to `2024-02-30`, which
/// this rejects.
pub fn is_valid_calendar(canonical: &str, has_date_part: bool) -> bool {
    let (date, time) = if has_date_part {
        match canonical.split_once('T') {
            Some((date, time)) => (Some(date), Some(time)),
            None => (Some(canonical), None),
        }
    } else {
        (None, Some(canonical))
    };

    if let Some(date) = date {
        let padded = match date.len() {
            4 => format!("{date}-01-01"),
            7 => format!("{date}-01"),
            _ => date.to_string(),
        };
        if NaiveDate::parse_from_str(&padded, "%Y-%m-%d").is_err() {
            return false;
        }
    }

    let Some(time) = time else {
        return true;
    };

    let offset_start = time.find(['+', '-', 'Z']);
    let (clock, offset) = match offset_start {
        Some(idx) => (&time[..idx], &time[idx..]),
        None => (time, ""),
    };

    let clock_padded = match clock.len() {
        2 => format!("{clock}:00:00"),
        5 => format!("{clock}:00"),
        _ => clock.to_string(),
    };
    if NaiveTime::parse_from_str(&clock_padded, "%H:%M:%S%.f").is_err() {
        return false;
    }

    valid_offset(offset)
}

fn valid_offset(offset: &str) -> bool {
    if offset.is_empty() || offset == "Z" {
        return true;
    }
    let digits: String = offset[1..].chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 4 {
        return false;
    }
    let hours: u32 = digits[..2].parse().unwrap_or(99);
    let minutes: u32 = digits[2..].parse().unwrap_or(99);
    hours <= 14 && minutes < 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Datelike, Timelike};

    #[test]
    fn test_date_precisions() {
        assert_eq!(parse("2024", true).as_deref(), Some("2024"));
        assert_eq!(parse("202401", true).as_deref(), Some("2024-01"));
        assert_eq!(parse("20240115", true).as_deref(), Some("2024-01-15"));
    }

    #[test]
    fn test_compact_datetime() {
        assert_eq!(
            parse("20240115103000", true).as_deref(),
            Some("2024-01-15T10:30:00")
        );
        assert_eq!(parse("202401151030", true).as_deref(), Some("2024-01-15T10:30"));
        assert_eq!(parse("2024011510", true).as_deref(), Some("2024-01-15T10"));
    }

    #[test]
    fn test_odd_digit_count_rejected() {
        assert_eq!(parse("2024011", true), None);
        assert_eq!(parse("20240115103", true), None);
        assert_eq!(parse("202", true), None);
    }

    #[test]
    fn test_time_only() {
        assert_eq!(parse("1030", false).as_deref(), Some("10:30"));
        assert_eq!(parse("10", false).as_deref(), Some("10"));
        assert_eq!(parse("103015.25", false).as_deref(), Some("10:30:15.25"));
        assert_eq!(parse("", false), None);
        assert_eq!(parse("1", false), None);
    }

    #[test]
    fn test_offsets() {
        assert_eq!(
            parse("20240115103000+0500", true).as_deref(),
            Some("2024-01-15T10:30:00+05:00")
        );
        assert_eq!(
            parse("20240115103000-0330", true).as_deref(),
            Some("2024-01-15T10:30:00-03:30")
        );
        assert_eq!(
            parse("202401151030-0500", true).as_deref(),
            Some("2024-01-15T10:30-05:00")
        );
        // Hour-only offsets are incomplete
        assert_eq!(parse("20240115103000+05", true), None);
    }

    #[test]
    fn test_fraction_and_zulu() {
        assert_eq!(
            parse("20240115103000.1+0500", true).as_deref(),
            Some("2024-01-15T10:30:00.1+05:00")
        );
        assert_eq!(
            parse("20240115103000.123456", true).as_deref(),
            Some("2024-01-15T10:30:00.123456")
        );
        assert_eq!(
            parse("20240115103000Z", true).as_deref(),
            Some("2024-01-15T10:30:00Z")
        );
        assert_eq!(
            parse("20240115103000.5Z", true).as_deref(),
            Some("2024-01-15T10:30:00.5Z")
        );
        // Nothing may follow Z
        assert_eq!(parse("20240115103000Z1", true), None);
    }

    #[test]
    fn test_early_fraction_jumps_to_fraction_field() {
        assert_eq!(parse("1030.5", false).as_deref(), Some("10:30:00.5"));
        assert_eq!(parse("10.25", false).as_deref(), Some("10:00:00.25"));
        assert_eq!(
            parse("202401151030.5-0500", true).as_deref(),
            Some("2024-01-15T10:30:00.5-05:00")
        );
    }

    #[test]
    fn test_short_year_rejected() {
        assert_eq!(parse("24-01-15", true), None);
        assert_eq!(parse("1-01-15", true), None);
        assert_eq!(parse("024-01-15", true), None);
        assert_eq!(parse("2024-01-15", true).as_deref(), Some("2024-01-15"));
    }

    #[test]
    fn test_partially_punctuated_input() {
        assert_eq!(
            parse("2024-01-15T10:30:00", true).as_deref(),
            Some("2024-01-15T10:30:00")
        );
        assert_eq!(parse("2024-0115", true).as_deref(), Some("2024-01-15"));
        assert_eq!(parse("2024-1-05", true).as_deref(), Some("2024-01-05"));
        // A short field still has to be closed by a separator
        assert_eq!(parse("2024-1-5", true), None);
        assert_eq!(parse(" 2024 01 15 ", true).as_deref(), Some("2024-01-15"));
    }

    #[test]
    fn test_prevalidation_rejects() {
        assert_eq!(parse("2024/01/15", true), None);
        assert_eq!(parse("20240115TT", true), None);
        assert_eq!(parse("2024-01-15-01-01", true), None);
        assert_eq!(parse("abc", false), None);
        assert_eq!(parse("20240115103000..1", true), None);
    }

    #[test]
    fn test_trailing_input_rejected() {
        assert_eq!(parse("20240115103000.123456+050000", true), None);
        assert_eq!(parse("2024-", true), None);
    }

    #[test]
    fn test_canonical_output_reparses_strictly() {
        let canonical = parse("20240115103045.250+0130", true).unwrap();
        let parsed = DateTime::parse_from_rfc3339(&canonical).unwrap();
        assert_eq!(parsed.year(), 2024);
        assert_eq!(parsed.month(), 1);
        assert_eq!(parsed.day(), 15);
        assert_eq!(parsed.hour(), 10);
        assert_eq!(parsed.minute(), 30);
        assert_eq!(parsed.second(), 45);
        assert_eq!(parsed.nanosecond(), 250_000_000);
        assert_eq!(parsed.offset().local_minus_utc(), 90 * 60);
    }

    type DateFields = (i32, u32, u32);
    type TimeFields = (u32, u32, u32, u32);

    /// Reparse canonical output with chrono, filling fields past its precision
    /// with their minimum
    fn reparse(
        canonical: &str,
        has_date_part: bool,
    ) -> (Option<DateFields>, Option<TimeFields>, Option<i32>) {
        let (date, time) = if has_date_part {
            match canonical.split_once('T') {
                Some((date, time)) => (Some(date), Some(time)),
                None => (Some(canonical), None),
            }
        } else {
            (None, Some(canonical))
        };

        let date = date.map(|date| {
            let full = match precision(date) {
                Precision::Year => format!("{date}-01-01"),
                Precision::Month => format!("{date}-01"),
                _ => date.to_string(),
            };
            let parsed = NaiveDate::parse_from_str(&full, "%Y-%m-%d").unwrap();
            (parsed.year(), parsed.month(), parsed.day())
        });

        let Some(time) = time else {
            return (date, None, None);
        };
        let clock = strip_offset(time);
        let full = match precision(clock) {
            Precision::Hour => format!("{clock}:00:00"),
            Precision::Minute => format!("{clock}:00"),
            _ => clock.to_string(),
        };
        let parsed = NaiveTime::parse_from_str(&full, "%H:%M:%S%.f").unwrap();
        let offset = match &time[clock.len()..] {
            "" => None,
            "Z" => Some(0),
            offset => Some(
                DateTime::parse_from_rfc3339(&format!("2000-01-01T00:00:00{offset}"))
                    .unwrap()
                    .offset()
                    .local_minus_utc(),
            ),
        };
        let time = (parsed.hour(), parsed.minute(), parsed.second(), parsed.nanosecond());
        (date, Some(time), offset)
    }

    #[test]
    fn test_accepted_tokens_keep_their_field_values() {
        let cases: &[(&str, bool, Option<DateFields>, Option<TimeFields>, Option<i32>)] = &[
            ("2024", true, Some((2024, 1, 1)), None, None),
            ("202402", true, Some((2024, 2, 1)), None, None),
            ("20240115", true, Some((2024, 1, 15)), None, None),
            ("2024-1-05", true, Some((2024, 1, 5)), None, None),
            ("2024011510", true, Some((2024, 1, 15)), Some((10, 0, 0, 0)), None),
            ("202401151030", true, Some((2024, 1, 15)), Some((10, 30, 0, 0)), None),
            ("20240115103000", true, Some((2024, 1, 15)), Some((10, 30, 0, 0)), None),
            ("2024-01-15T10:30:59", true, Some((2024, 1, 15)), Some((10, 30, 59, 0)), None),
            (
                "20240115103045.250+0130",
                true,
                Some((2024, 1, 15)),
                Some((10, 30, 45, 250_000_000)),
                Some(90 * 60),
            ),
            (
                "20240115103000-0330",
                true,
                Some((2024, 1, 15)),
                Some((10, 30, 0, 0)),
                Some(-(3 * 3600 + 30 * 60)),
            ),
            ("202401151030-0500", true, Some((2024, 1, 15)), Some((10, 30, 0, 0)), Some(-5 * 3600)),
            ("20240115103000.5Z", true, Some((2024, 1, 15)), Some((10, 30, 0, 500_000_000)), Some(0)),
            (
                "202401151030.5-0500",
                true,
                Some((2024, 1, 15)),
                Some((10, 30, 0, 500_000_000)),
                Some(-5 * 3600),
            ),
            ("1030", false, None, Some((10, 30, 0, 0)), None),
            ("10", false, None, Some((10, 0, 0, 0)), None),
            ("103015.25", false, None, Some((10, 30, 15, 250_000_000)), None),
            ("1030.5", false, None, Some((10, 30, 0, 500_000_000)), None),
            ("10.25", false, None, Some((10, 0, 0, 250_000_000)), None),
            ("103000+0200", false, None, Some((10, 30, 0, 0)), Some(2 * 3600)),
        ];

        for (token, has_date_part, date, time, offset) in cases {
            let canonical = parse(token, *has_date_part)
                .unwrap_or_else(|| panic!("{token} should be accepted"));
            assert_eq!(
                reparse(&canonical, *has_date_part),
                (*date, *time, *offset),
                "{token} -> {canonical}"
            );
        }
    }

    #[test]
    fn test_precision() {
        assert_eq!(precision("2024"), Precision::Year);
        assert_eq!(precision("2024-01"), Precision::Month);
        assert_eq!(precision("2024-01-15"), Precision::Day);
        assert_eq!(precision("2024-01-15T10"), Precision::Hour);
        assert_eq!(precision("2024-01-15T10:30-05:00"), Precision::Minute);
        assert_eq!(precision("2024-01-15T10:30:00Z"), Precision::Second);
        assert_eq!(precision("10:30:00.5"), Precision::Fraction);
        assert_eq!(precision("10"), Precision::Hour);
    }

    #[test]
    fn test_calendar_validation() {
        assert!(is_valid_calendar("2024-02-29", true));
        assert!(!is_valid_calendar("2023-02-29", true));
        assert!(!is_valid_calendar("2024-13", true));
        assert!(is_valid_calendar("2024-01-15T23:59:59.5+05:30", true));
        assert!(!is_valid_calendar("2024-01-15T24:00", true));
        assert!(!is_valid_calendar("2024-01-15T10:00+15:00", true));
        assert!(is_valid_calendar("10:30", false));
        assert!(!is_valid_calendar("10:75", false));
    }
}
