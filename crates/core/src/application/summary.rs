// Detection summary
//
// Reads the observation and both evidence files of every grid point and
// converts the evidence difference into a detection significance.

use crate::application::significance::detection_sigma;
use crate::domain::{
    EvidenceFile, ExperimentSpec, FakeObservation, GasAbundance, GridPoint, Hypothesis, PointPaths,
};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Significance of one grid point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub point_index: usize,
    pub file_stem: String,
    pub snr: f64,
    pub surface_temperature: f64,
    pub distance_au: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixing_ratio: Option<GasAbundance>,
    pub log_z_all: f64,
    pub log_z_removed: f64,
    /// `log_z_all - log_z_removed`
    pub ln_bayes: f64,
    pub sigma: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<FakeObservation>,
}

/// Point left out of the summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedPoint {
    pub point_index: usize,
    pub file_stem: String,
    pub reason: String,
}

/// Summary of a whole experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub experiment: String,
    pub tested_gas: String,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<SummaryEntry>,
    pub skipped: Vec<SkippedPoint>,
}

impl ExperimentSummary {
    /// Default location: `<save_dir>/<name>_summary.json`
    pub fn default_path(spec: &ExperimentSpec) -> PathBuf {
        spec.save_dir.join(format!("{}_summary.json", spec.name))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::NotFound(format!("{}: {}", path.display(), e)))?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn log_evidence(path: &Path) -> Result<f64> {
    let file: EvidenceFile = read_json(path).await?;
    file.final_log_evidence().ok_or_else(|| {
        AppError::Validation(format!("{} holds no finite log evidence", path.display()))
    })
}

async fn summarize_point(
    spec: &ExperimentSpec,
    point: &GridPoint,
    include_observation: bool,
) -> Result<SummaryEntry> {
    let paths = PointPaths::for_point(spec, point);
    let observation: FakeObservation = read_json(&paths.data).await?;
    let log_z_all = log_evidence(paths.output(Hypothesis::AllGases)).await?;
    let log_z_removed = log_evidence(paths.output(Hypothesis::GasRemoved)).await?;
    let ln_bayes = log_z_all - log_z_removed;

    Ok(SummaryEntry {
        point_index: point.index,
        file_stem: point.file_stem(),
        snr: point.snr,
        surface_temperature: point.surface_temperature,
        distance_au: point.distance_au,
        mixing_ratio: point.mixing_ratio.clone(),
        log_z_all,
        log_z_removed,
        ln_bayes,
        sigma: detection_sigma(ln_bayes)?,
        observation: include_observation.then_some(observation),
    })
}

/// Build the summary of an experiment from the files on disk
///
/// Points with missing or unreadable files are reported in `skipped`.
pub async fn summarize(spec: &ExperimentSpec, include_observation: bool) -> Result<ExperimentSummary> {
    spec.validate()?;
    let points = GridPoint::expand(spec)?;
    let mut entries = Vec::with_capacity(points.len());
    let mut skipped = Vec::new();

    for point in &points {
        match summarize_point(spec, point, include_observation).await {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(
                    point = point.index,
                    stem = %point.file_stem(),
                    error = %e,
                    "Skipping point in summary"
                );
                skipped.push(SkippedPoint {
                    point_index: point.index,
                    file_stem: point.file_stem(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        experiment = %spec.name,
        entries = entries.len(),
        skipped = skipped.len(),
        "Summary built"
    );
    Ok(ExperimentSummary {
        experiment: spec.name.clone(),
        tested_gas: spec.tested_gas_key(),
        generated_at: Utc::now(),
        entries,
        skipped,
    })
}

/// Write the summary as pretty JSON
pub async fn write_summary(summary: &ExperimentSummary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_vec_pretty(summary)?).await?;
    info!(path = %path.display(), "Summary written");
    Ok(())
}
