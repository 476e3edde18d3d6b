// Climate model adapter
// `<cmd> toa-fluxes` and `<cmd> profile` speaking JSON over stdio

use crate::json_command::JsonCommand;
use async_trait::async_trait;
use retrieval_core::port::{
    ClimateModel, ClimateProfile, FluxRequest, ModelError, ProfileRequest, ToaFluxes,
};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

#[derive(Serialize)]
struct ProfileCall<'a> {
    #[serde(flatten)]
    request: &'a ProfileRequest,
    atmosphere_out: &'a Path,
}

/// Climate model reached through an external command
pub struct ExternalClimateModel {
    command: JsonCommand,
}

impl ExternalClimateModel {
    pub fn new(command: JsonCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ClimateModel for ExternalClimateModel {
    async fn toa_fluxes(&self, request: &FluxRequest) -> Result<ToaFluxes, ModelError> {
        let fluxes: ToaFluxes = self.command.call(&["toa-fluxes"], request).await?;
        debug!(
            surface_temperature = request.surface_temperature,
            isr = fluxes.isr,
            olr = fluxes.olr,
            "TOA fluxes evaluated"
        );
        Ok(fluxes)
    }

    async fn write_profile(
        &self,
        request: &ProfileRequest,
        atmosphere_out: &Path,
    ) -> Result<ClimateProfile, ModelError> {
        let call = ProfileCall {
            request,
            atmosphere_out,
        };
        let profile: ClimateProfile = self.command.call(&["profile"], &call).await?;

        if !atmosphere_out.exists() {
            return Err(ModelError::Protocol(format!(
                "profile command did not write {}",
                atmosphere_out.display()
            )));
        }
        Ok(profile)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use retrieval_core::port::{ClimateSettings, ProfileComposition};
    use std::collections::BTreeMap;

    // Answers `toa-fluxes` with constants and `profile` by writing a one-line table
    const BRIDGE: &str = r#"
req=$(cat)
case "$0" in
  toa-fluxes) echo '{"isr": 238.0, "olr": 240.5, "fup_top": 25.5, "fdn_top": 85.0}' ;;
  profile)
    out=$(printf '%s' "$req" | sed 's/.*"atmosphere_out":"\([^"]*\)".*/\1/')
    echo "alt press den temp H2O" > "$out"
    echo '{"species_names": ["H2O"], "surface_pressure": 1.0e6, "surface_temperature": 288.0}' ;;
  *) exit 2 ;;
esac
"#;

    fn settings() -> ClimateSettings {
        ClimateSettings {
            surface_albedo: 0.3,
            relative_humidity: 1.0,
            top_pressure: 1.0,
        }
    }

    fn model() -> ExternalClimateModel {
        let command = JsonCommand::new(vec!["sh".into(), "-c".into(), BRIDGE.into()])
            .unwrap()
            .with_env_allowlist(vec!["PATH".to_string()]);
        ExternalClimateModel::new(command)
    }

    #[tokio::test]
    async fn test_toa_fluxes() {
        let request = FluxRequest {
            settings: settings(),
            surface_temperature: 288.0,
            tropopause_temperature: 200.0,
            column_inventories: BTreeMap::from([("CO2".to_string(), 23.0)]),
        };
        let fluxes = model().toa_fluxes(&request).await.unwrap();
        assert_eq!(fluxes.isr, 238.0);
        assert_eq!(fluxes.olr, 240.5);
    }

    #[tokio::test]
    async fn test_profile_writes_atmosphere() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("atmosphere.txt");
        let request = ProfileRequest {
            settings: settings(),
            surface_temperature: 288.0,
            tropopause_temperature: None,
            composition: ProfileComposition::PartialPressures {
                partial_pressures: BTreeMap::from([("H2O".to_string(), 2.0e4)]),
                surface_pressure: 1.0e6,
                background_gas: "N2".to_string(),
            },
        };

        let profile = model().write_profile(&request, &out).await.unwrap();
        assert_eq!(profile.species_names, vec!["H2O"]);
        assert!(std::fs::read_to_string(&out).unwrap().starts_with("alt"));
    }
}
