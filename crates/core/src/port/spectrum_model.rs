// Spectrum Model Port

use crate::domain::Spectrum;
use crate::port::climate_model::ModelError;
use async_trait::async_trait;
use std::path::Path;

/// Forward model turning an rfast `.scr` configuration into a noiseless spectrum
#[async_trait]
pub trait SpectrumModel: Send + Sync {
    async fn generate(&self, scr_path: &Path) -> Result<Spectrum, ModelError>;
}

pub mod mocks {
    use super::*;

    /// Returns a fixed spectrum after checking the configuration exists
    pub struct MockSpectrumModel {
        pub spectrum: Spectrum,
    }

    impl MockSpectrumModel {
        pub fn new() -> Self {
            let lam: Vec<f64> = (0..8).map(|i| 0.5 + 0.1 * i as f64).collect();
            Self {
                spectrum: Spectrum {
                    dlam: vec![0.1; lam.len()],
                    fpfs: lam.iter().map(|l| 1.0e-10 * (1.0 + l)).collect(),
                    lam,
                },
            }
        }
    }

    impl Default for MockSpectrumModel {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl SpectrumModel for MockSpectrumModel {
        async fn generate(&self, scr_path: &Path) -> Result<Spectrum, ModelError> {
            if !scr_path.exists() {
                return Err(ModelError::Io(format!("{} not found", scr_path.display())));
            }
            Ok(self.spectrum.clone())
        }
    }
}
