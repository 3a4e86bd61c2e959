//! Fetch-then-aggregate cycles.
//!
//! Every user action starts a new request generation for the view it feeds.
//! Fetches for one cycle run concurrently and are joined before aggregation; a
//! cycle whose generation is no longer the latest for its view when its
//! fetches land is discarded, so a slow response for a previously selected
//! site never overwrites newer state. Views are tracked independently: loading
//! the expense dashboard never invalidates an in-flight site report.

use crate::config::RollupConfig;
use crate::error::{Result, RollupError};
use crate::expenses::{ExpenseAnalyzer, ExpenseDashboard};
use crate::report::SiteReport;
use crate::schema::{
    BoqRows, DateRange, ExpenseCollections, ExpenseEntry, GrnRows, RatedExpense, Site,
    SiteSnapshot, SupplierInvoicePayment,
};
use crate::SiteRollupProcessor;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[allow(async_fn_in_trait)]
pub trait SiteDataSource {
    async fn fetch_site(&self, site_id: &str) -> Result<Site>;

    async fn fetch_boq(&self, site_id: &str) -> Result<BoqRows>;

    async fn fetch_grn(&self, site_id: &str) -> Result<GrnRows>;

    async fn fetch_payments(&self, site_id: &str) -> Result<Vec<SupplierInvoicePayment>>;

    async fn fetch_material_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<ExpenseEntry>>;

    async fn fetch_manpower_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<RatedExpense>>;

    async fn fetch_equipment_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<RatedExpense>>;

    async fn fetch_other_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<ExpenseEntry>>;
}

/// Serves snapshots held in memory. Expense fetches filter by date the way a
/// store query would.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    snapshots: BTreeMap<String, SiteSnapshot>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, snapshot: SiteSnapshot) -> Self {
        self.insert(snapshot);
        self
    }

    pub fn insert(&mut self, snapshot: SiteSnapshot) {
        self.snapshots.insert(snapshot.site.id.clone(), snapshot);
    }

    fn snapshot(&self, site_id: &str) -> Result<&SiteSnapshot> {
        self.snapshots
            .get(site_id)
            .ok_or_else(|| RollupError::not_found("site", site_id))
    }
}

fn in_range<T: Clone>(records: &[T], range: DateRange, date: impl Fn(&T) -> chrono::NaiveDate) -> Vec<T> {
    records
        .iter()
        .filter(|r| range.contains(date(r)))
        .cloned()
        .collect()
}

impl SiteDataSource for InMemorySource {
    async fn fetch_site(&self, site_id: &str) -> Result<Site> {
        Ok(self.snapshot(site_id)?.site.clone())
    }

    async fn fetch_boq(&self, site_id: &str) -> Result<BoqRows> {
        Ok(self.snapshot(site_id)?.boq.clone())
    }

    async fn fetch_grn(&self, site_id: &str) -> Result<GrnRows> {
        Ok(self.snapshot(site_id)?.grn.clone())
    }

    async fn fetch_payments(&self, site_id: &str) -> Result<Vec<SupplierInvoicePayment>> {
        Ok(self.snapshot(site_id)?.payments.clone())
    }

    async fn fetch_material_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<ExpenseEntry>> {
        let expenses = &self.snapshot(site_id)?.expenses;
        Ok(in_range(&expenses.material, range, |e| e.expense_date))
    }

    async fn fetch_manpower_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<RatedExpense>> {
        let expenses = &self.snapshot(site_id)?.expenses;
        Ok(in_range(&expenses.manpower, range, |e| e.expense_date))
    }

    async fn fetch_equipment_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<RatedExpense>> {
        let expenses = &self.snapshot(site_id)?.expenses;
        Ok(in_range(&expenses.equipment, range, |e| e.expense_date))
    }

    async fn fetch_other_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<ExpenseEntry>> {
        let expenses = &self.snapshot(site_id)?.expenses;
        Ok(in_range(&expenses.other, range, |e| e.expense_date))
    }
}

/// The display state a load cycle writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum View {
    /// Site report, with or without the expense dashboard attached.
    SiteReport,
    ExpenseDashboard,
}

impl View {
    const COUNT: usize = 2;

    fn index(self) -> usize {
        match self {
            View::SiteReport => 0,
            View::ExpenseDashboard => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken {
    view: View,
    generation: u64,
}

impl RequestToken {
    pub fn view(&self) -> View {
        self.view
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of one fetch-then-aggregate cycle.
#[derive(Debug)]
pub enum Loaded<T> {
    Fresh(T),
    /// A newer cycle started while this one was in flight.
    Stale(RequestToken),
    /// The fetch failed. `fallback` is the zeroed view to show meanwhile.
    Failed { error: RollupError, fallback: T },
}

impl<T> Loaded<T> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Loaded::Fresh(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Loaded::Stale(_))
    }

    /// The value to display: the fresh result or the fallback. `None` when stale.
    pub fn into_view(self) -> Option<T> {
        match self {
            Loaded::Fresh(value) => Some(value),
            Loaded::Failed { fallback, .. } => Some(fallback),
            Loaded::Stale(_) => None,
        }
    }
}

pub struct RollupSession<S> {
    source: S,
    config: RollupConfig,
    generations: [AtomicU64; View::COUNT],
}

impl<S: SiteDataSource> RollupSession<S> {
    pub fn new(source: S, config: RollupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            generations: [AtomicU64::new(0), AtomicU64::new(0)],
        })
    }

    pub fn config(&self) -> &RollupConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Starts a new generation for `view`, making earlier tokens of that view stale.
    pub fn begin(&self, view: View) -> RequestToken {
        let generation = self.generations[view.index()].fetch_add(1, Ordering::SeqCst) + 1;
        RequestToken { view, generation }
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.generations[token.view.index()].load(Ordering::SeqCst) == token.generation
    }

    fn finish<T>(&self, token: RequestToken, outcome: Result<T>, fallback: impl FnOnce() -> T) -> Loaded<T> {
        if !self.is_current(token) {
            debug!(
                "Discarding result of stale {:?} request generation {}",
                token.view, token.generation
            );
            return Loaded::Stale(token);
        }
        match outcome {
            Ok(value) => Loaded::Fresh(value),
            Err(error) => {
                warn!(
                    "{:?} request generation {} failed: {}",
                    token.view, token.generation, error
                );
                Loaded::Failed {
                    error,
                    fallback: fallback(),
                }
            }
        }
    }

    async fn fetch_snapshot(&self, site_id: &str) -> Result<SiteSnapshot> {
        let (site, boq, grn, payments) = futures::try_join!(
            self.source.fetch_site(site_id),
            self.source.fetch_boq(site_id),
            self.source.fetch_grn(site_id),
            self.source.fetch_payments(site_id),
        )?;
        Ok(SiteSnapshot {
            site,
            boq,
            grn,
            payments,
            expenses: ExpenseCollections::default(),
        })
    }

    async fn fetch_expenses(&self, site_id: &str, range: DateRange) -> Result<ExpenseCollections> {
        let (material, manpower, equipment, other) = futures::try_join!(
            self.source.fetch_material_expenses(site_id, range),
            self.source.fetch_manpower_expenses(site_id, range),
            self.source.fetch_equipment_expenses(site_id, range),
            self.source.fetch_other_expenses(site_id, range),
        )?;
        Ok(ExpenseCollections {
            material,
            manpower,
            equipment,
            other,
        })
    }

    pub async fn load_site_report(&self, site_id: &str) -> Loaded<SiteReport> {
        let token = self.begin(View::SiteReport);
        info!("Loading site report for {} (generation {})", site_id, token.generation);

        let outcome = match self.fetch_snapshot(site_id).await {
            Ok(snapshot) => SiteRollupProcessor::process(&snapshot, &self.config),
            Err(e) => Err(e),
        };
        self.finish(token, outcome, || SiteReport::empty(site_id))
    }

    /// Site report with the expense dashboard for `range` attached.
    pub async fn load_site_report_with_expenses(&self, site_id: &str, range: DateRange) -> Loaded<SiteReport> {
        let token = self.begin(View::SiteReport);
        info!(
            "Loading site report for {} with expenses {}..={} (generation {})",
            site_id, range.start, range.end, token.generation
        );

        let outcome = if range.end < range.start {
            Err(invalid_range(range))
        } else {
            match futures::try_join!(self.fetch_snapshot(site_id), self.fetch_expenses(site_id, range)) {
                Ok((mut snapshot, expenses)) => {
                    snapshot.expenses = expenses;
                    SiteRollupProcessor::process_with_expenses(&snapshot, range, &self.config)
                }
                Err(e) => Err(e),
            }
        };
        self.finish(token, outcome, || SiteReport::empty(site_id))
    }

    pub async fn load_expense_dashboard(&self, site_id: &str, range: DateRange) -> Loaded<ExpenseDashboard> {
        let token = self.begin(View::ExpenseDashboard);
        let analyzer = ExpenseAnalyzer::new(self.config.rolling_window_days);

        let outcome = if range.end < range.start {
            Err(invalid_range(range))
        } else {
            self.fetch_expenses(site_id, range)
                .await
                .map(|collections| analyzer.analyze(range, &collections))
        };
        self.finish(token, outcome, || {
            analyzer.analyze(range, &ExpenseCollections::default())
        })
    }
}

fn invalid_range(range: DateRange) -> RollupError {
    RollupError::InvalidDateRange {
        start: range.start.to_string(),
        end: range.end.to_string(),
    }
}
