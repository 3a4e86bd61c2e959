use chrono::{Days, NaiveDate};
use std::cmp::Ordering;

/// `numerator / denominator` as a whole percentage, rounded half up. Zero when
/// the denominator is zero.
pub fn round_percent(numerator: usize, denominator: usize) -> u8 {
    if denominator == 0 {
        return 0;
    }
    let pct = (numerator as f64 / denominator as f64) * 100.0;
    pct.round().clamp(0.0, 100.0) as u8
}

/// Rounded arithmetic mean of percentages; 0 for an empty slice.
pub fn mean_rounded(values: &[u8]) -> u8 {
    if values.is_empty() {
        return 0;
    }
    let sum: u32 = values.iter().map(|&v| u32::from(v)).sum();
    let mean = f64::from(sum) / values.len() as f64;
    mean.round().clamp(0.0, 100.0) as u8
}

/// Percentage of `part` in `whole`, guarding division by zero.
pub fn share_of(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

/// Change from `baseline` to `current` in percent. Reported as 0 when the
/// baseline is zero.
pub fn percent_change(baseline: f64, current: f64) -> f64 {
    if baseline == 0.0 {
        0.0
    } else {
        (current - baseline) / baseline * 100.0
    }
}

/// Every calendar day from `start` to `end`, inclusive. Empty when `end < start`.
pub fn days_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        match current.checked_add_days(Days::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }
    dates
}

/// Orders BOQ item numbers segment by segment, so "1.2" sorts before "1.10".
/// Segments that are not both numeric fall back to string order.
pub fn compare_item_numbers(a: &str, b: &str) -> Ordering {
    let mut left = a.split(['.', '-', '/']).map(str::trim);
    let mut right = b.split(['.', '-', '/']).map(str::trim);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                    _ => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Last path segment, used as a display name when none was stored.
pub fn file_name_from_path(path: &str) -> String {
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(path)
        .to_string()
}
