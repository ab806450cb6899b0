//! Relative and absolute time windows for log queries.

use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1d")]
    Days1,
    #[serde(rename = "7d")]
    Days7,
    #[serde(rename = "30d")]
    #[default]
    Days30,
    #[serde(rename = "3m")]
    Months3,
    #[serde(rename = "6m")]
    Months6,
    #[serde(rename = "1y")]
    Years1,
    #[serde(rename = "3y")]
    Years3,
    #[serde(rename = "5y")]
    Years5,
}

impl TimeRange {
    pub const ALL: [TimeRange; 8] = [
        Self::Days1,
        Self::Days7,
        Self::Days30,
        Self::Months3,
        Self::Months6,
        Self::Years1,
        Self::Years3,
        Self::Years5,
    ];

    /// Unrecognized tokens resolve to the 30 day range.
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "1d" => Self::Days1,
            "7d" => Self::Days7,
            "30d" => Self::Days30,
            "3m" => Self::Months3,
            "6m" => Self::Months6,
            "1y" => Self::Years1,
            "3y" => Self::Years3,
            "5y" => Self::Years5,
            _ => Self::Days30,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::Days1 => "1d",
            Self::Days7 => "7d",
            Self::Days30 => "30d",
            Self::Months3 => "3m",
            Self::Months6 => "6m",
            Self::Years1 => "1y",
            Self::Years3 => "3y",
            Self::Years5 => "5y",
        }
    }

    pub fn lower_bound(self, now: OffsetDateTime) -> OffsetDateTime {
        match self {
            Self::Days1 => now - Duration::days(1),
            Self::Days7 => now - Duration::days(7),
            Self::Days30 => now - Duration::days(30),
            Self::Months3 => sub_months(now, 3),
            Self::Months6 => sub_months(now, 6),
            Self::Years1 => sub_months(now, 12),
            Self::Years3 => sub_months(now, 36),
            Self::Years5 => sub_months(now, 60),
        }
    }
}

/// Calendar month subtraction; the day is clamped to the target month's length.
fn sub_months(at: OffsetDateTime, months: i32) -> OffsetDateTime {
    let index = at.year() * 12 + i32::from(u8::from(at.month())) - 1 - months;
    let year = index.div_euclid(12);
    let month = Month::January.nth_next(index.rem_euclid(12) as u8);
    let day = at.day().min(time::util::days_in_year_month(year, month));
    let date = Date::from_calendar_date(year, month, day).unwrap_or(Date::MIN);
    at.replace_date(date)
}

/// Which time constraint a query applies. Exactly one is honored at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimeWindow {
    #[default]
    Any,
    Relative {
        range: TimeRange,
    },
    Absolute {
        #[serde(with = "time::serde::rfc3339")]
        start: OffsetDateTime,
        #[serde(with = "time::serde::rfc3339")]
        end: OffsetDateTime,
    },
}

impl TimeWindow {
    /// Picks the window the way the log view does: a relative token wins while
    /// absolute mode is off, otherwise both explicit ends are required.
    pub fn select(
        range: Option<TimeRange>,
        absolute_mode: bool,
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
    ) -> Self {
        match (absolute_mode, range, start, end) {
            (false, Some(range), _, _) => Self::Relative { range },
            (_, _, Some(start), Some(end)) => Self::Absolute { start, end },
            _ => Self::Any,
        }
    }

    pub fn relative(range: TimeRange) -> Self {
        Self::Relative { range }
    }

    /// Lower and upper bounds of the window, where it has them.
    pub fn bounds(&self, now: OffsetDateTime) -> (Option<OffsetDateTime>, Option<OffsetDateTime>) {
        match *self {
            Self::Any => (None, None),
            Self::Relative { range } => (Some(range.lower_bound(now)), None),
            Self::Absolute { start, end } => (Some(start), Some(end)),
        }
    }

    pub fn contains(&self, ts: OffsetDateTime, now: OffsetDateTime) -> bool {
        match *self {
            Self::Any => true,
            Self::Relative { range } => ts > range.lower_bound(now),
            Self::Absolute { start, end } => start <= ts && ts <= end,
        }
    }
}

/// Precomputed form of a window so filtering does not recompute the bound per record.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ResolvedWindow {
    Any,
    After(OffsetDateTime),
    Between(OffsetDateTime, OffsetDateTime),
}

impl ResolvedWindow {
    pub(crate) fn new(window: &TimeWindow, now: OffsetDateTime) -> Self {
        match *window {
            TimeWindow::Any => Self::Any,
            TimeWindow::Relative { range } => Self::After(range.lower_bound(now)),
            TimeWindow::Absolute { start, end } => Self::Between(start, end),
        }
    }

    pub(crate) fn contains(&self, ts: OffsetDateTime) -> bool {
        match *self {
            Self::Any => true,
            Self::After(lower) => ts > lower,
            Self::Between(start, end) => start <= ts && ts <= end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn seven_days_before_june_eighth() {
        let now = datetime!(2024-06-08 00:00:00 UTC);
        assert_eq!(TimeRange::Days7.lower_bound(now), datetime!(2024-06-01 00:00:00 UTC));

        let window = TimeWindow::relative(TimeRange::parse("7d"));
        assert!(window.contains(datetime!(2024-06-02 00:00:00 UTC), now));
        assert!(!window.contains(datetime!(2024-05-30 00:00:00 UTC), now));
    }

    #[test]
    fn unknown_token_is_thirty_days() {
        assert_eq!(TimeRange::parse("2w"), TimeRange::Days30);
        assert_eq!(TimeRange::parse(""), TimeRange::Days30);
        let now = datetime!(2024-03-31 12:00:00 UTC);
        assert_eq!(TimeRange::parse("bogus").lower_bound(now), datetime!(2024-03-01 12:00:00 UTC));
    }

    #[test]
    fn month_arithmetic_clamps_day() {
        let now = datetime!(2024-05-31 08:30:00 UTC);
        assert_eq!(TimeRange::Months3.lower_bound(now), datetime!(2024-02-29 08:30:00 UTC));
        assert_eq!(TimeRange::Months6.lower_bound(now), datetime!(2023-11-30 08:30:00 UTC));
        let leap = datetime!(2024-02-29 00:00:00 UTC);
        assert_eq!(TimeRange::Years1.lower_bound(leap), datetime!(2023-02-28 00:00:00 UTC));
        assert_eq!(TimeRange::Years5.lower_bound(leap), datetime!(2019-02-28 00:00:00 UTC));
    }

    #[test]
    fn tokens_round_trip() {
        for range in TimeRange::ALL {
            assert_eq!(TimeRange::parse(range.token()), range);
        }
    }

    #[test]
    fn relative_token_wins_unless_absolute_mode() {
        let start = datetime!(2024-01-01 00:00:00 UTC);
        let end = datetime!(2024-01-02 00:00:00 UTC);
        assert_eq!(
            TimeWindow::select(Some(TimeRange::Days1), false, Some(start), Some(end)),
            TimeWindow::Relative { range: TimeRange::Days1 }
        );
        assert_eq!(
            TimeWindow::select(Some(TimeRange::Days1), true, Some(start), Some(end)),
            TimeWindow::Absolute { start, end }
        );
        assert_eq!(TimeWindow::select(None, true, Some(start), None), TimeWindow::Any);
    }

    #[test]
    fn absolute_interval_is_inclusive() {
        let start = datetime!(2024-01-01 00:00:00 UTC);
        let end = datetime!(2024-01-02 00:00:00 UTC);
        let window = TimeWindow::Absolute { start, end };
        let now = datetime!(2030-01-01 00:00:00 UTC);
        assert!(window.contains(start, now));
        assert!(window.contains(end, now));
        assert!(!window.contains(end + Duration::seconds(1), now));
        let resolved = ResolvedWindow::new(&window, now);
        assert!(resolved.contains(start));
        assert!(!resolved.contains(start - Duration::nanoseconds(1)));
    }
}
