//! Pipeline status tags and their transition table.
//!
//! Every enrichable record carries a `scraping_status` tag naming the last
//! stage it completed. The tags form one total order; each record kind walks a
//! sub-chain of it. A failed stage never touches the tag: it is recorded in
//! `error_stage` next to it, so the record keeps its place in the chain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    GotCompanyId,
    GotCompanyDetails,
    SearchedForWebsite,
    CleanedWebsite,
    GotCompanyDevices,
    GotCompanyDevicesDetails,
    GotCertificateId,
    GotCertificateDetails,
    GotEmplWebsite,
    EnrichedApollo,
    UpdatedRankingScore,
}

/// The full pipeline order.
pub const PIPELINE_ORDER: [Stage; 11] = [
    Stage::GotCompanyId,
    Stage::GotCompanyDetails,
    Stage::SearchedForWebsite,
    Stage::CleanedWebsite,
    Stage::GotCompanyDevices,
    Stage::GotCompanyDevicesDetails,
    Stage::GotCertificateId,
    Stage::GotCertificateDetails,
    Stage::GotEmplWebsite,
    Stage::EnrichedApollo,
    Stage::UpdatedRankingScore,
];

const COMPANY_CHAIN: &[Stage] = &[
    Stage::GotCompanyId,
    Stage::GotCompanyDetails,
    Stage::SearchedForWebsite,
    Stage::CleanedWebsite,
    Stage::GotCompanyDevices,
    Stage::GotCertificateId,
    Stage::GotEmplWebsite,
    Stage::EnrichedApollo,
    Stage::UpdatedRankingScore,
];

const PRODUCT_CHAIN: &[Stage] = &[Stage::GotCompanyDevices, Stage::GotCompanyDevicesDetails];

const CERTIFICATE_CHAIN: &[Stage] = &[Stage::GotCertificateId, Stage::GotCertificateDetails];

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::GotCompanyId => "GOT_COMPANY_ID",
            Stage::GotCompanyDetails => "GOT_COMPANY_DETAILS",
            Stage::SearchedForWebsite => "SEARCHED_FOR_WEBSITE",
            Stage::CleanedWebsite => "CLEANED_WEBSITE",
            Stage::GotCompanyDevices => "GOT_COMPANY_DEVICES",
            Stage::GotCompanyDevicesDetails => "GOT_COMPANY_DEVICES_DETAILS",
            Stage::GotCertificateId => "GOT_CERTIFICATE_ID",
            Stage::GotCertificateDetails => "GOT_CERTIFICATE_DETAILS",
            Stage::GotEmplWebsite => "GOT_EMPL_WEBSITE",
            Stage::EnrichedApollo => "ENRICHED_APOLLO",
            Stage::UpdatedRankingScore => "UPDATED_RANKING_SCORE",
        }
    }

    /// Position in the pipeline order.
    pub fn rank(&self) -> usize {
        *self as usize
    }

    /// Whether `self` comes strictly before `other` in the pipeline order.
    pub fn precedes(&self, other: Stage) -> bool {
        self.rank() < other.rank()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PIPELINE_ORDER
            .iter()
            .find(|stage| stage.as_str() == s)
            .copied()
            .ok_or_else(|| AppError::InternalError(format!("Unknown status tag: {}", s)))
    }
}

/// Which table a stage walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Company,
    Product,
    Certificate,
}

impl RecordKind {
    /// Status chain this kind of record moves through, in order.
    pub fn chain(&self) -> &'static [Stage] {
        match self {
            RecordKind::Company => COMPANY_CHAIN,
            RecordKind::Product => PRODUCT_CHAIN,
            RecordKind::Certificate => CERTIFICATE_CHAIN,
        }
    }

    /// Status tags of records that have not yet reached `target`.
    pub fn pending_states(&self, target: Stage) -> Vec<Stage> {
        self.chain()
            .iter()
            .take_while(|s| **s != target)
            .copied()
            .collect()
    }

    /// Transition table check: `to` must be later than `from` in this
    /// kind's chain.
    pub fn can_transition(&self, from: Stage, to: Stage) -> bool {
        let chain = self.chain();
        let Some(to_pos) = chain.iter().position(|s| *s == to) else {
            return false;
        };
        match chain.iter().position(|s| *s == from) {
            Some(from_pos) => from_pos < to_pos,
            None => false,
        }
    }
}
