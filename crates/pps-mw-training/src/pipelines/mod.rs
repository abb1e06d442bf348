//! Retrieval training pipelines
//!
//! `pr_nordic` and `cloud_base` train a UNet on gridded records,
//! `iwp_ici` trains a QRNN on a retrieval database. Every run splits the
//! data with the run seed, trains (or loads a persisted model when only
//! evaluating), evaluates the test split and writes its artifacts.

pub mod cloud_base;
mod grid;
pub mod iwp_ici;
pub mod pr_nordic;
pub mod settings;

use crate::evaluation::QuantityStats;
use crate::trainer::FitHistory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineType {
    PrNordic,
    CloudBase,
    IwpIci,
}

impl PipelineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineType::PrNordic => "pr_nordic",
            PipelineType::CloudBase => "cloud_base",
            PipelineType::IwpIci => "iwp_ici",
        }
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pipeline run
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub pipeline: PipelineType,
    pub output_dir: PathBuf,
    /// `None` when only evaluating
    pub history: Option<FitHistory>,
    pub stats: BTreeMap<String, QuantityStats>,
}
