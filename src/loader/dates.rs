use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Full-date layouts seen in EUCTR and ClinicalTrials.gov exports.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

/// Layouts without a day; anchored to the first of the month.
const MONTH_FORMATS: &[&str] = &["%Y-%m", "%Y/%m", "%B %Y"];

/// Permissive date parse. Blank or unrecognised input is `None`, never an error.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim().trim_matches('"').trim();
    if s.is_empty() {
        return None;
    }

    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
    {
        return Some(date);
    }

    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(dt.date());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    let with_day = format!("{} 1", s);
    if let Some(date) = MONTH_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&with_day, &format!("{} %d", fmt)).ok())
    {
        return Some(date);
    }

    // bare year
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::from_ymd_opt(s.parse().ok()?, 1, 1);
    }

    None
}
