//! Nordic precipitation pipeline
//!
//! Trains a UNet retrieving ground radar reflectivity from microwave sounder
//! grids. Records already hold normalized brightness temperatures; the
//! pipeline keeps the sounder channels listed in the settings and replaces
//! missing values by the fill value.

use super::settings::UNetPipelineSettings;
use super::{PipelineType, RunSummary, grid};
use crate::error::TrainingResult;

pub fn run(settings: &UNetPipelineSettings) -> TrainingResult<RunSummary> {
    grid::run(PipelineType::PrNordic, settings)
}
