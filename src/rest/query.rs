//! PostgREST filter syntax.

use chrono::NaiveDate;

pub fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

pub fn gte(date: NaiveDate) -> String {
    format!("gte.{}", date.format("%Y-%m-%d"))
}

pub fn lte(date: NaiveDate) -> String {
    format!("lte.{}", date.format("%Y-%m-%d"))
}

/// `in.("a","b")`. Values are always quoted so ids holding commas or
/// parentheses survive.
pub fn in_list<S: AsRef<str>>(values: &[S]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.as_ref().replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

/// Deduplicated, sorted ids for an `in` filter.
pub fn distinct_ids<'a, I>(ids: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ids: Vec<&str> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}
