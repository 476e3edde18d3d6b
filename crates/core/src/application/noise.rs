// Synthetic instrument noise

use crate::domain::Spectrum;
use crate::error::{AppError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Deterministic per-point seed derived from the experiment seed
pub fn point_seed(seed: u64, point_index: usize) -> u64 {
    seed ^ ((point_index as u64 + 1).wrapping_mul(0x9e37_79b1_85eb_ca87))
}

/// Generator for one grid point; entropy seeded when no experiment seed is set
pub fn point_rng(seed: Option<u64>, point_index: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(point_seed(seed, point_index)),
        None => StdRng::from_entropy(),
    }
}

/// Noisy data and per-bin uncertainty
#[derive(Debug, Clone, PartialEq)]
pub struct NoisyData {
    pub dat: Vec<f64>,
    pub err: Vec<f64>,
}

/// Add Gaussian noise at a fixed signal-to-noise ratio
///
/// Every bin gets `err = fpfs_err / snr`, so the noise level is set by the
/// reference contrast rather than by the local signal.
pub fn inject_noise(
    spectrum: &Spectrum,
    snr: f64,
    fpfs_err: f64,
    rng: &mut StdRng,
) -> Result<NoisyData> {
    if !spectrum.is_consistent() {
        return Err(AppError::Validation(format!(
            "spectrum arrays differ in length (lam {}, dlam {}, fpfs {})",
            spectrum.lam.len(),
            spectrum.dlam.len(),
            spectrum.fpfs.len()
        )));
    }
    if !(snr.is_finite() && snr > 0.0) {
        return Err(AppError::Validation(format!("SNR must be positive, got {}", snr)));
    }

    let sigma = fpfs_err / snr;
    let normal = Normal::new(0.0, sigma)
        .map_err(|e| AppError::Validation(format!("Noise distribution error: {e}")))?;

    let dat = spectrum
        .fpfs
        .iter()
        .map(|f| f + normal.sample(rng))
        .collect();
    Ok(NoisyData {
        dat,
        err: vec![sigma; spectrum.fpfs.len()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_spectrum(n: usize) -> Spectrum {
        Spectrum {
            lam: (0..n).map(|i| 0.4 + 0.01 * i as f64).collect(),
            dlam: vec![0.01; n],
            fpfs: vec![2.0e-10; n],
        }
    }

    #[test]
    fn test_same_seed_same_noise() {
        let spectrum = flat_spectrum(16);
        let a = inject_noise(&spectrum, 10.0, 3.55e-10, &mut point_rng(Some(7), 3)).unwrap();
        let b = inject_noise(&spectrum, 10.0, 3.55e-10, &mut point_rng(Some(7), 3)).unwrap();
        assert_eq!(a, b);

        let other = inject_noise(&spectrum, 10.0, 3.55e-10, &mut point_rng(Some(7), 4)).unwrap();
        assert_ne!(a.dat, other.dat);
    }

    #[test]
    fn test_error_bars_follow_snr() {
        let spectrum = flat_spectrum(4);
        let data = inject_noise(&spectrum, 20.0, 4.0e-10, &mut point_rng(Some(1), 0)).unwrap();
        assert!(data.err.iter().all(|e| (*e - 2.0e-11).abs() < 1e-24));
    }

    #[test]
    fn test_noise_scatter_matches_sigma() {
        let spectrum = flat_spectrum(20_000);
        let data = inject_noise(&spectrum, 5.0, 1.0, &mut point_rng(Some(42), 0)).unwrap();
        let n = data.dat.len() as f64;
        let residuals: Vec<f64> = data.dat.iter().zip(&spectrum.fpfs).map(|(d, f)| d - f).collect();
        let mean = residuals.iter().sum::<f64>() / n;
        let std = (residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
        assert!(mean.abs() < 0.01);
        assert!((std - 0.2).abs() < 0.01);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let mut rng = point_rng(Some(1), 0);
        assert!(inject_noise(&flat_spectrum(3), 0.0, 1.0, &mut rng).is_err());

        let mut broken = flat_spectrum(3);
        broken.dlam.pop();
        assert!(inject_noise(&broken, 5.0, 1.0, &mut rng).is_err());
    }
}
