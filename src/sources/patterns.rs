// src/sources/patterns.rs
//! "Latest item" URL guesses for buckets whose official pages follow a
//! recurring naming scheme (weekly traffic reports and the like).
//!
//! The guessed page may not exist yet; the content fetcher drops it on a
//! non-2xx response, so a wrong guess costs one request and nothing else.

use chrono::{Datelike, Duration, NaiveDate};

use crate::config::PatternSpec;

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

impl PatternSpec {
    /// Resolve the template for the period containing `today`.
    pub fn resolve(&self, today: NaiveDate) -> String {
        match self {
            PatternSpec::Weekly { template } => fill(template, week_start(today)),
            PatternSpec::Monthly { template } => {
                let first = today.with_day(1).unwrap_or(today);
                fill(template, first)
            }
        }
    }
}

/// Monday of the ISO week containing `d`.
pub fn week_start(d: NaiveDate) -> NaiveDate {
    d - Duration::days(i64::from(d.weekday().num_days_from_monday()))
}

fn fill(template: &str, d: NaiveDate) -> String {
    let month = MONTHS[d.month0() as usize];
    template
        .replace("{year}", &d.year().to_string())
        .replace("{month_num}", &format!("{:02}", d.month()))
        .replace("{month}", month)
        .replace("{day}", &d.day().to_string())
}
