// Atmosphere table extension
//
// rfast needs a column for every species it retrieves. Species the climate
// model does not track are appended at a negligible mixing ratio.

use crate::domain::species_key;
use crate::error::{AppError, Result};
use std::path::Path;

const LABEL_WIDTH: usize = 27;
const TRACE_MIXING_RATIO: &str = "1.0e-50";

/// rfast species absent from the climate model, in rfast order
pub fn missing_species(rfast_species: &[String], climate_species: &[String]) -> Vec<String> {
    rfast_species
        .iter()
        .filter(|sp| !climate_species.iter().any(|c| species_key(c) == species_key(sp)))
        .cloned()
        .collect()
}

/// Append trace columns to an atmosphere table
///
/// Returns the new table and its column labels.
pub fn extend_table(contents: &str, missing: &[String]) -> Result<(String, Vec<String>)> {
    let mut lines = contents.lines();
    let header = lines
        .next()
        .ok_or_else(|| AppError::Template("atmosphere file is empty".to_string()))?;

    let mut out = String::with_capacity(contents.len() + 64 * missing.len());
    out.push_str(header);
    for sp in missing {
        out.push_str(&format!("{:<width$}", sp, width = LABEL_WIDTH));
    }
    out.push('\n');
    let labels = out.split_whitespace().map(str::to_string).collect();

    for line in lines {
        out.push_str(line);
        out.push_str("   ");
        for _ in missing {
            out.push_str(&format!("{:<width$}", TRACE_MIXING_RATIO, width = LABEL_WIDTH));
        }
        out.push('\n');
    }
    Ok((out, labels))
}

/// Rewrite the atmosphere file in place and return its column labels
pub async fn extend_atmosphere_file(
    path: &Path,
    rfast_species: &[String],
    climate_species: &[String],
) -> Result<Vec<String>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let missing = missing_species(rfast_species, climate_species);
    let (table, labels) = extend_table(&contents, &missing)?;
    tokio::fs::write(path, table).await?;
    Ok(labels)
}
