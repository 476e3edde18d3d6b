// Spectra, Fake Observations and Evidence Files

use crate::domain::grid::GasAbundance;
use serde::{Deserialize, Serialize};

/// Noiseless planet/star contrast spectrum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Wavelength grid (um)
    pub lam: Vec<f64>,
    /// Bin widths (um)
    pub dlam: Vec<f64>,
    /// Planet/star flux ratio
    pub fpfs: Vec<f64>,
}

impl Spectrum {
    /// All three arrays share one length
    pub fn is_consistent(&self) -> bool {
        !self.lam.is_empty() && self.lam.len() == self.dlam.len() && self.lam.len() == self.fpfs.len()
    }
}

/// Noisy synthetic observation handed to the retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeObservation {
    pub lam: Vec<f64>,
    pub dlam: Vec<f64>,
    pub dat: Vec<f64>,
    pub err: Vec<f64>,
    pub snr: f64,
    pub surface_temperature: f64,
    pub distance_au: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixing_ratio: Option<GasAbundance>,
    /// Solved CO2 column (stable-climate experiments)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub co2_column: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tropopause_temperature: Option<f64>,
}

/// Output of a nested-sampling run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceFile {
    /// Running log-evidence estimates; the last one is final
    pub logz: Vec<f64>,
}

impl EvidenceFile {
    pub fn final_log_evidence(&self) -> Option<f64> {
        self.logz.last().copied().filter(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_log_evidence_takes_last() {
        let file: EvidenceFile =
            serde_json::from_str(r#"{"logz": [-900.0, -120.5, -101.25], "niter": 3}"#).unwrap();
        assert_eq!(file.final_log_evidence(), Some(-101.25));

        let empty = EvidenceFile { logz: vec![] };
        assert_eq!(empty.final_log_evidence(), None);
    }

    #[test]
    fn test_spectrum_consistency() {
        let ok = Spectrum {
            lam: vec![0.5, 0.6],
            dlam: vec![0.01, 0.01],
            fpfs: vec![1e-10, 2e-10],
        };
        assert!(ok.is_consistent());

        let bad = Spectrum {
            lam: vec![0.5, 0.6],
            dlam: vec![0.01],
            fpfs: vec![1e-10, 2e-10],
        };
        assert!(!bad.is_consistent());
    }
}
