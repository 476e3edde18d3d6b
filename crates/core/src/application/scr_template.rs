// rfast `.scr` template rewriting
//
// The template's atmosphere and temperature inputs are pointed at the
// climate model's atmosphere file; every other line is copied unchanged.

use crate::domain::{format_scientific, species_key};
use crate::error::{AppError, Result};

/// Keys that must start a line of the template (each followed by a space)
pub const REQUIRED_KEYS: [&str; 17] = [
    "pmax", "species_r", "rdgas", "fnatm", "skpatm", "colr", "colpr", "psclr", "imix", "t0",
    "rdtmp", "fntmp", "skptmp", "colt", "colpt", "psclt", "a",
];

/// Point-specific values written into the template
#[derive(Debug, Clone)]
pub struct ScrValues<'a> {
    /// Surface pressure of the climate profile (dyn/cm^2)
    pub surface_pressure: f64,
    /// K
    pub surface_temperature: f64,
    pub distance_au: f64,
    /// Atmosphere file as it should appear in `fnatm`/`fntmp`
    pub atmosphere_file: &'a str,
    /// Column labels of the atmosphere file
    pub atmosphere_labels: &'a [String],
}

fn line_has_key(line: &str, key: &str) -> bool {
    line.strip_prefix(key).is_some_and(|rest| rest.starts_with(' '))
}

/// Fail unless every required key starts some line
pub fn check_required_keys(template: &str) -> Result<()> {
    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !template.lines().any(|line| line_has_key(line, key)))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::Template(format!(
            "missing keys in scr template: {}",
            missing.join(", ")
        )))
    }
}

/// Species retrieved by rfast, read from the `species_r` line
///
/// Trailing `#` comments are ignored and names are upper-cased.
pub fn rfast_species(template: &str) -> Result<Vec<String>> {
    let line = template
        .lines()
        .find(|line| line_has_key(line, "species_r"))
        .ok_or_else(|| AppError::Template("species_r not found in scr template".to_string()))?;
    let value = line
        .split('#')
        .next()
        .and_then(|content| content.split_once('='))
        .map(|(_, value)| value.trim())
        .ok_or_else(|| AppError::Template(format!("malformed species_r line: {}", line.trim())))?;

    let species: Vec<String> = value
        .split(',')
        .map(species_key)
        .filter(|s| !s.is_empty())
        .collect();
    if species.is_empty() {
        return Err(AppError::Template("species_r lists no species".to_string()));
    }
    Ok(species)
}

/// Render the template for one grid point
pub fn render_scr(template: &str, values: &ScrValues<'_>) -> Result<String> {
    check_required_keys(template)?;

    let columns = rfast_species(template)?
        .iter()
        .map(|sp| {
            values
                .atmosphere_labels
                .iter()
                .position(|label| species_key(label) == *sp)
                .map(|i| (i + 1).to_string())
                .ok_or_else(|| {
                    AppError::Template(format!("species {} missing from atmosphere labels", sp))
                })
        })
        .collect::<Result<Vec<_>>>()?
        .join(",");

    let pmax = format_scientific(values.surface_pressure / 1.0e6 * 1.0e5, 5);
    let mut rendered = String::with_capacity(template.len());
    for line in template.split_inclusive('\n') {
        let replacement = if line_has_key(line, "pmax") {
            Some(format!("pmax = {}", pmax))
        } else if line_has_key(line, "rdgas") {
            Some("rdgas = True".to_string())
        } else if line_has_key(line, "fnatm") {
            Some(format!("fnatm = {}", values.atmosphere_file))
        } else if line_has_key(line, "skpatm") {
            Some("skpatm = 1".to_string())
        } else if line_has_key(line, "colr") {
            Some(format!("colr = {}", columns))
        } else if line_has_key(line, "colpr") {
            Some("colpr = 2".to_string())
        } else if line_has_key(line, "psclr") {
            Some("psclr = 1.0e5".to_string())
        } else if line_has_key(line, "imix") {
            Some("imix = 0".to_string())
        } else if line_has_key(line, "t0") {
            Some(format!("t0 = {:.1}", values.surface_temperature))
        } else if line_has_key(line, "rdtmp") {
            Some("rdtmp = True".to_string())
        } else if line_has_key(line, "fntmp") {
            Some(format!("fntmp = {}", values.atmosphere_file))
        } else if line_has_key(line, "skptmp") {
            Some("skptmp = 1".to_string())
        } else if line_has_key(line, "colt") {
            Some("colt = 4".to_string())
        } else if line_has_key(line, "colpt") {
            Some("colpt = 2".to_string())
        } else if line_has_key(line, "psclt") {
            Some("psclt = 1.0e5".to_string())
        } else if line_has_key(line, "a") {
            Some(format!("a = {:.6}", values.distance_au))
        } else {
            None
        };

        match replacement {
            Some(mut new_line) => {
                new_line.push('\n');
                rendered.push_str(&new_line);
            }
            None => rendered.push_str(line),
        }
    }
    Ok(rendered)
}
