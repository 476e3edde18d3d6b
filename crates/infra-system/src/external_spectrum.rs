// Spectrum model adapter: `{"scr": <path>}` in, spectrum JSON out

use crate::json_command::JsonCommand;
use async_trait::async_trait;
use retrieval_core::domain::Spectrum;
use retrieval_core::port::{ModelError, SpectrumModel};
use serde_json::json;
use std::path::Path;

/// Forward model reached through an external command
pub struct ExternalSpectrumModel {
    command: JsonCommand,
}

impl ExternalSpectrumModel {
    pub fn new(command: JsonCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl SpectrumModel for ExternalSpectrumModel {
    async fn generate(&self, scr_path: &Path) -> Result<Spectrum, ModelError> {
        let spectrum: Spectrum = self
            .command
            .call(&[], &json!({ "scr": scr_path }))
            .await?;
        if !spectrum.is_consistent() {
            return Err(ModelError::Protocol(format!(
                "spectrum arrays differ in length (lam {}, dlam {}, fpfs {})",
                spectrum.lam.len(),
                spectrum.dlam.len(),
                spectrum.fpfs.len()
            )));
        }
        Ok(spectrum)
    }
}
