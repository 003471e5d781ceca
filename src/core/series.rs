//! Lookups over append-only, date-keyed time series.
//!
//! Series are kept sorted by date with equal dates in insertion order, so
//! every lookup picks the last inserted row among rows sharing a date.

use crate::core::model::{ExchangeRate, Price};
use chrono::NaiveDate;

pub trait Dated {
    fn date(&self) -> NaiveDate;
}

impl Dated for Price {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

impl Dated for ExchangeRate {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

/// Inserts `row` after every existing row dated on or before it.
pub fn insert_sorted<T: Dated>(series: &mut Vec<T>, row: T) {
    let date = row.date();
    let index = series.partition_point(|r| r.date() <= date);
    series.insert(index, row);
}

/// Most recent row with `date <= at`.
pub fn on_or_before<T: Dated>(series: &[T], at: NaiveDate) -> Option<&T> {
    let index = series.partition_point(|r| r.date() <= at);
    index.checked_sub(1).map(|i| &series[i])
}

/// Most recent row with `date < at`.
pub fn before<T: Dated>(series: &[T], at: NaiveDate) -> Option<&T> {
    let index = series.partition_point(|r| r.date() < at);
    index.checked_sub(1).map(|i| &series[i])
}

/// Row dated exactly `at`.
pub fn exact<T: Dated>(series: &[T], at: NaiveDate) -> Option<&T> {
    on_or_before(series, at).filter(|r| r.date() == at)
}

/// Collapses rows sharing a date so that only the last inserted one remains.
pub fn dedup_by_date<T: Dated + Clone>(series: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(series.len());
    for row in series {
        match out.last_mut() {
            Some(last) if last.date() == row.date() => *last = row.clone(),
            _ => out.push(row.clone()),
        }
    }
    out
}

/// Inclusive date window; an open bound is unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(date: &str, rate: f64) -> ExchangeRate {
        ExchangeRate {
            from: "USD".to_string(),
            to: "EUR".to_string(),
            date: date.parse().unwrap(),
            rate,
        }
    }

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn build(rows: Vec<ExchangeRate>) -> Vec<ExchangeRate> {
        let mut series = Vec::new();
        for row in rows {
            insert_sorted(&mut series, row);
        }
        series
    }

    #[test]
    fn test_on_or_before_picks_latest_not_after() {
        // Inserted out of date order on purpose
        let series = build(vec![rate("2026-01-29", 0.85), rate("2026-01-22", 0.852)]);

        assert_eq!(on_or_before(&series, d("2026-01-26")).unwrap().rate, 0.852);
        assert_eq!(on_or_before(&series, d("2026-01-29")).unwrap().rate, 0.85);
        assert_eq!(on_or_before(&series, d("2026-02-10")).unwrap().rate, 0.85);
        assert!(on_or_before(&series, d("2026-01-21")).is_none());
    }

    #[test]
    fn test_before_and_exact() {
        let series = build(vec![rate("2026-01-22", 0.852), rate("2026-01-29", 0.85)]);

        assert_eq!(before(&series, d("2026-01-29")).unwrap().rate, 0.852);
        assert!(before(&series, d("2026-01-22")).is_none());
        assert_eq!(exact(&series, d("2026-01-22")).unwrap().rate, 0.852);
        assert!(exact(&series, d("2026-01-23")).is_none());
    }

    #[test]
    fn test_duplicate_dates_last_inserted_wins() {
        let series = build(vec![
            rate("2026-01-22", 0.80),
            rate("2026-01-29", 0.85),
            rate("2026-01-22", 0.90),
        ]);

        assert_eq!(exact(&series, d("2026-01-22")).unwrap().rate, 0.90);
        assert_eq!(on_or_before(&series, d("2026-01-25")).unwrap().rate, 0.90);
        assert_eq!(before(&series, d("2026-01-29")).unwrap().rate, 0.90);

        let deduped = dedup_by_date(&series);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].rate, 0.90);
    }

    #[test]
    fn test_date_range_contains() {
        let range = DateRange::new(Some(d("2026-01-01")), Some(d("2026-01-31")));
        assert!(range.contains(d("2026-01-01")));
        assert!(range.contains(d("2026-01-31")));
        assert!(!range.contains(d("2026-02-01")));
        assert!(DateRange::all().contains(d("1999-12-31")));
    }
}
