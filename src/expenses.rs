//! Dense daily expense series and the dashboard figures derived from it.

use crate::schema::{DateRange, ExpenseCategory, ExpenseCollections, ExpenseEntry, RatedExpense};
use crate::utils::{days_in_range, percent_change, share_of};
use chrono::NaiveDate;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Anything that lands in a single day's bucket.
pub trait DatedAmount {
    fn expense_date(&self) -> NaiveDate;
    fn amount(&self) -> f64;
}

impl DatedAmount for ExpenseEntry {
    fn expense_date(&self) -> NaiveDate {
        self.expense_date
    }

    fn amount(&self) -> f64 {
        self.amount
    }
}

impl DatedAmount for RatedExpense {
    fn expense_date(&self) -> NaiveDate {
        self.expense_date
    }

    fn amount(&self) -> f64 {
        self.amount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct CategoryAmounts {
    pub material: f64,
    pub manpower: f64,
    pub equipment: f64,
    pub other: f64,
}

impl CategoryAmounts {
    pub fn get(&self, category: ExpenseCategory) -> f64 {
        match category {
            ExpenseCategory::Material => self.material,
            ExpenseCategory::Manpower => self.manpower,
            ExpenseCategory::Equipment => self.equipment,
            ExpenseCategory::Other => self.other,
        }
    }

    pub fn add(&mut self, category: ExpenseCategory, amount: f64) {
        match category {
            ExpenseCategory::Material => self.material += amount,
            ExpenseCategory::Manpower => self.manpower += amount,
            ExpenseCategory::Equipment => self.equipment += amount,
            ExpenseCategory::Other => self.other += amount,
        }
    }

    pub fn total(&self) -> f64 {
        self.material + self.manpower + self.equipment + self.other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DailyExpenses {
    pub date: NaiveDate,
    pub amounts: CategoryAmounts,
    pub total: f64,
}

pub type ExpenseSeries = BTreeMap<NaiveDate, DailyExpenses>;

/// One zeroed bucket per calendar day of `range`, then every record dated
/// inside the range added to its day and category. Records outside the range
/// are dropped; the range is never extended.
pub fn build_daily_series(range: DateRange, collections: &ExpenseCollections) -> ExpenseSeries {
    let mut series: ExpenseSeries = days_in_range(range.start, range.end)
        .into_iter()
        .map(|date| {
            (
                date,
                DailyExpenses {
                    date,
                    amounts: CategoryAmounts::default(),
                    total: 0.0,
                },
            )
        })
        .collect();

    let mut dropped = 0usize;
    dropped += add_records(&mut series, ExpenseCategory::Material, &collections.material);
    dropped += add_records(&mut series, ExpenseCategory::Manpower, &collections.manpower);
    dropped += add_records(&mut series, ExpenseCategory::Equipment, &collections.equipment);
    dropped += add_records(&mut series, ExpenseCategory::Other, &collections.other);

    if dropped > 0 {
        debug!(
            "Dropped {} expense record(s) dated outside {}..={}",
            dropped, range.start, range.end
        );
    }

    for bucket in series.values_mut() {
        bucket.total = bucket.amounts.total();
    }

    series
}

fn add_records<T: DatedAmount>(
    series: &mut ExpenseSeries,
    category: ExpenseCategory,
    records: &[T],
) -> usize {
    let mut dropped = 0;
    for record in records {
        match series.get_mut(&record.expense_date()) {
            Some(bucket) => bucket.amounts.add(category, record.amount()),
            None => dropped += 1,
        }
    }
    dropped
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryShare {
    pub category: ExpenseCategory,
    pub amount: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RollingPoint {
    pub date: NaiveDate,
    /// Sum of the trailing window ending on `date`, clipped at the range start.
    pub window_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExpenseDashboard {
    pub range: DateRange,
    pub days: Vec<DailyExpenses>,
    pub totals: CategoryAmounts,
    pub grand_total: f64,
    pub daily_average: f64,
    pub shares: Vec<CategoryShare>,
    pub window_days: usize,
    pub rolling: Vec<RollingPoint>,
    /// Total of the last `window_days` days of the range.
    pub last_window_total: f64,
    /// Second half of the range against the first half, in percent. 0 when
    /// the first half is zero.
    pub trend_percent: f64,
}

pub struct ExpenseAnalyzer {
    window_days: usize,
}

impl ExpenseAnalyzer {
    pub fn new(window_days: usize) -> Self {
        Self {
            window_days: window_days.max(1),
        }
    }

    pub fn analyze(&self, range: DateRange, collections: &ExpenseCollections) -> ExpenseDashboard {
        let series = build_daily_series(range, collections);
        let days: Vec<DailyExpenses> = series.into_values().collect();

        let mut totals = CategoryAmounts::default();
        for day in &days {
            for category in ExpenseCategory::ALL {
                totals.add(category, day.amounts.get(category));
            }
        }
        let grand_total = totals.total();

        let daily_average = if days.is_empty() {
            0.0
        } else {
            grand_total / days.len() as f64
        };

        let shares = ExpenseCategory::ALL
            .iter()
            .map(|&category| CategoryShare {
                category,
                amount: totals.get(category),
                percent: share_of(totals.get(category), grand_total),
            })
            .collect();

        let rolling = self.rolling(&days);
        let last_window_total = rolling.last().map(|p| p.window_total).unwrap_or(0.0);

        ExpenseDashboard {
            range,
            trend_percent: trend_percent(&days),
            days,
            totals,
            grand_total,
            daily_average,
            shares,
            window_days: self.window_days,
            rolling,
            last_window_total,
        }
    }

    fn rolling(&self, days: &[DailyExpenses]) -> Vec<RollingPoint> {
        let mut points = Vec::with_capacity(days.len());
        let mut window_total = 0.0;
        for (i, day) in days.iter().enumerate() {
            window_total += day.total;
            if i >= self.window_days {
                window_total -= days[i - self.window_days].total;
            }
            points.push(RollingPoint {
                date: day.date,
                window_total,
            });
        }
        points
    }
}

impl Default for ExpenseAnalyzer {
    fn default() -> Self {
        Self::new(7)
    }
}

/// First half is the first `len / 2` days; the second half takes the rest.
pub fn trend_percent(days: &[DailyExpenses]) -> f64 {
    if days.len() < 2 {
        return 0.0;
    }
    let mid = days.len() / 2;
    let first: f64 = days[..mid].iter().map(|d| d.total).sum();
    let second: f64 = days[mid..].iter().map(|d| d.total).sum();
    percent_change(first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap()
    }

    fn entry(id: &str, day: u32, amount: f64) -> ExpenseEntry {
        ExpenseEntry {
            id: id.to_string(),
            site_id: "s1".to_string(),
            expense_date: date(day),
            amount,
            description: None,
        }
    }

    fn rated(id: &str, day: u32, hours: f64, rate: f64) -> RatedExpense {
        RatedExpense {
            id: id.to_string(),
            site_id: "s1".to_string(),
            expense_date: date(day),
            master_id: "m1".to_string(),
            hours,
            rate_snapshot: rate,
            amount: hours * rate,
            description: None,
        }
    }

    #[test]
    fn test_series_is_dense_and_drops_out_of_range() {
        let collections = ExpenseCollections {
            material: vec![entry("a", 2, 100.0), entry("b", 20, 999.0)],
            manpower: vec![rated("c", 2, 8.0, 50.0)],
            equipment: vec![],
            other: vec![entry("d", 4, 25.0)],
        };
        let series = build_daily_series(DateRange::new(date(1), date(5)), &collections);
        assert_eq!(series.len(), 5);
        let day2 = series.get(&date(2)).unwrap();
        assert!((day2.amounts.material - 100.0).abs() < 1e-9);
        assert!((day2.amounts.manpower - 400.0).abs() < 1e-9);
        assert!((day2.total - 500.0).abs() < 1e-9);
        assert_eq!(series.get(&date(1)).unwrap().total, 0.0);
        assert!(!series.contains_key(&date(20)));
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let collections = ExpenseCollections {
            material: vec![entry("a", 2, 100.0)],
            ..Default::default()
        };
        let dashboard = ExpenseAnalyzer::default().analyze(DateRange::new(date(5), date(1)), &collections);
        assert!(dashboard.days.is_empty());
        assert_eq!(dashboard.grand_total, 0.0);
        assert_eq!(dashboard.daily_average, 0.0);
        assert_eq!(dashboard.trend_percent, 0.0);
    }

    #[test]
    fn test_rolling_window_and_shares() {
        let collections = ExpenseCollections {
            material: (1..=10).map(|d| entry(&format!("m{}", d), d, 10.0)).collect(),
            other: vec![entry("o", 10, 30.0)],
            ..Default::default()
        };
        let dashboard = ExpenseAnalyzer::new(3).analyze(DateRange::new(date(1), date(10)), &collections);
        assert_eq!(dashboard.rolling.len(), 10);
        assert!((dashboard.rolling[0].window_total - 10.0).abs() < 1e-9);
        assert!((dashboard.rolling[4].window_total - 30.0).abs() < 1e-9);
        assert!((dashboard.last_window_total - 60.0).abs() < 1e-9);

        let other = dashboard
            .shares
            .iter()
            .find(|s| s.category == ExpenseCategory::Other)
            .unwrap();
        assert!((other.percent - 30.0 / 130.0 * 100.0).abs() < 1e-9);
        let share_sum: f64 = dashboard.shares.iter().map(|s| s.percent).sum();
        assert!((share_sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_first_half_against_second() {
        let collections = ExpenseCollections {
            other: vec![entry("a", 1, 100.0), entry("b", 3, 150.0)],
            ..Default::default()
        };
        let dashboard = ExpenseAnalyzer::default().analyze(DateRange::new(date(1), date(4)), &collections);
        assert!((dashboard.trend_percent - 50.0).abs() < 1e-9);

        let late_only = ExpenseCollections {
            other: vec![entry("a", 4, 100.0)],
            ..Default::default()
        };
        let dashboard = ExpenseAnalyzer::default().analyze(DateRange::new(date(1), date(4)), &late_only);
        assert_eq!(dashboard.trend_percent, 0.0);
    }
}
