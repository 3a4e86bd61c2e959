use crate::config::RollupConfig;
use crate::readiness::{LineItemReadiness, LineItemReadinessAggregator};
use crate::schema::{BoqHeadline, ChecklistItemStatus, HeadlineChecklist, SiteSnapshot, WorkStatus};
use crate::utils::{compare_item_numbers, mean_rounded, round_percent};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessBadge {
    Ready,
    InProgress,
    #[default]
    Pending,
}

impl ReadinessBadge {
    pub fn from_progress(progress: u8, config: &RollupConfig) -> Self {
        if progress >= config.ready_threshold {
            ReadinessBadge::Ready
        } else if progress >= config.in_progress_threshold {
            ReadinessBadge::InProgress
        } else {
            ReadinessBadge::Pending
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReadinessBadge::Ready => "Ready",
            ReadinessBadge::InProgress => "In Progress",
            ReadinessBadge::Pending => "Pending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ChecklistCompletion {
    pub checklist_count: usize,
    pub total_items: usize,
    pub completed_items: usize,
    pub percent: u8,
}

impl ChecklistCompletion {
    pub fn from_checklists(checklists: &[&HeadlineChecklist]) -> Self {
        let total_items: usize = checklists.iter().map(|c| c.items.len()).sum();
        let completed_items = checklists
            .iter()
            .flat_map(|c| c.items.iter())
            .filter(|i| i.status == ChecklistItemStatus::Completed)
            .count();
        Self {
            checklist_count: checklists.len(),
            total_items,
            completed_items,
            percent: round_percent(completed_items, total_items),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HeadlineRollup {
    pub headline_id: String,
    pub serial_number: u32,
    pub name: String,
    pub status: WorkStatus,
    pub progress: u8,
    pub badge: ReadinessBadge,
    pub ready_line_items: usize,
    pub line_items: Vec<LineItemReadiness>,
    pub checklist: ChecklistCompletion,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SiteRollup {
    pub site_id: String,
    pub site_name: String,
    /// Unweighted mean of headline progress values.
    pub overall_progress: u8,
    pub badge: ReadinessBadge,
    pub total_line_items: usize,
    pub ready_for_billing: usize,
    pub headlines: Vec<HeadlineRollup>,
}

pub fn headline_progress(line_items: &[LineItemReadiness]) -> u8 {
    let values: Vec<u8> = line_items.iter().map(|l| l.progress).collect();
    mean_rounded(&values)
}

pub struct SiteRollupAggregator<'a> {
    snapshot: &'a SiteSnapshot,
    config: &'a RollupConfig,
}

impl<'a> SiteRollupAggregator<'a> {
    pub fn new(snapshot: &'a SiteSnapshot, config: &'a RollupConfig) -> Self {
        Self { snapshot, config }
    }

    pub fn rollup(&self) -> SiteRollup {
        let site = &self.snapshot.site;
        let boq = &self.snapshot.boq;

        let package_ids: HashSet<&str> = boq
            .packages
            .iter()
            .filter(|p| p.site_id == site.id)
            .map(|p| p.id.as_str())
            .collect();

        let mut headlines: Vec<&BoqHeadline> = boq
            .headlines
            .iter()
            .filter(|h| package_ids.contains(h.package_id.as_str()))
            .collect();
        headlines.sort_by(|a, b| {
            a.serial_number
                .cmp(&b.serial_number)
                .then_with(|| a.id.cmp(&b.id))
        });

        let aggregator = LineItemReadinessAggregator::new(boq);

        let mut items_by_headline: HashMap<&str, Vec<LineItemReadiness>> = HashMap::new();
        for item in &boq.line_items {
            items_by_headline
                .entry(item.headline_id.as_str())
                .or_default()
                .push(aggregator.evaluate(item));
        }

        let mut checklists_by_headline: HashMap<&str, Vec<&HeadlineChecklist>> = HashMap::new();
        for checklist in &boq.headline_checklists {
            checklists_by_headline
                .entry(checklist.headline_id.as_str())
                .or_default()
                .push(checklist);
        }

        let headline_rollups: Vec<HeadlineRollup> = headlines
            .into_iter()
            .map(|headline| {
                let mut line_items = items_by_headline
                    .remove(headline.id.as_str())
                    .unwrap_or_default();
                line_items.sort_by(|a, b| compare_item_numbers(&a.item_number, &b.item_number));

                let checklists = checklists_by_headline
                    .get(headline.id.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);

                self.rollup_headline(headline, line_items, checklists)
            })
            .collect();

        if !items_by_headline.is_empty() {
            debug!(
                "Skipped line items under {} headline(s) outside site {}",
                items_by_headline.len(),
                site.id
            );
        }

        let progress_values: Vec<u8> = headline_rollups.iter().map(|h| h.progress).collect();
        let overall_progress = mean_rounded(&progress_values);
        let total_line_items = headline_rollups.iter().map(|h| h.line_items.len()).sum();
        let ready_for_billing = headline_rollups.iter().map(|h| h.ready_line_items).sum();

        info!(
            "Site {} readiness: {} headline(s), {}/{} line items ready for billing, overall {}%",
            site.name,
            headline_rollups.len(),
            ready_for_billing,
            total_line_items,
            overall_progress
        );

        SiteRollup {
            site_id: site.id.clone(),
            site_name: site.name.clone(),
            overall_progress,
            badge: ReadinessBadge::from_progress(overall_progress, self.config),
            total_line_items,
            ready_for_billing,
            headlines: headline_rollups,
        }
    }

    fn rollup_headline(
        &self,
        headline: &BoqHeadline,
        line_items: Vec<LineItemReadiness>,
        checklists: &[&HeadlineChecklist],
    ) -> HeadlineRollup {
        let progress = headline_progress(&line_items);
        HeadlineRollup {
            headline_id: headline.id.clone(),
            serial_number: headline.serial_number,
            name: headline.name.clone(),
            status: headline.status,
            progress,
            badge: ReadinessBadge::from_progress(progress, self.config),
            ready_line_items: line_items.iter().filter(|l| l.ready_for_billing).count(),
            line_items,
            checklist: ChecklistCompletion::from_checklists(checklists),
        }
    }
}

pub fn rollup_site(snapshot: &SiteSnapshot, config: &RollupConfig) -> SiteRollup {
    SiteRollupAggregator::new(snapshot, config).rollup()
}
