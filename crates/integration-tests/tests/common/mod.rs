//! Shared fixtures: a fixed-profile experiment, a SQLite ledger and a
//! retrieval stand-in written in `sh`

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use retrieval_core::application::{
    DataSynthesizer, PlanOptions, PlannerService, PoolConfig, RetrievalPool, RetryPolicy, RunPlan,
};
use retrieval_core::domain::{
    AtmosphereSpec, AxisValues, Baseline, ClimateSpec, ExperimentSpec, GridSpec,
};
use retrieval_core::port::climate_model::mocks::MockClimateModel;
use retrieval_core::port::id_provider::UuidProvider;
use retrieval_core::port::spectrum_model::mocks::MockSpectrumModel;
use retrieval_core::port::time_provider::SystemTimeProvider;
use retrieval_core::port::{JobRepository, TaskExecutor, TimeProvider};
use retrieval_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};
use retrieval_infra_system::SubprocessExecutor;

pub const TEMPLATE: &str = "\
pmax = 1.e5
species_r = h2o,co2,o2,o3
rdgas = False
fnatm = x
skpatm = 0
colr = 1
colpr = 1
psclr = 1.
imix = 1
t0 = 250.
rdtmp = False
fntmp = x
skptmp = 0
colt = 2
colpt = 1
psclt = 1.
a = 1.0
";

/// Writes `{"logz": [..., -100]}` for the all-gases run and -110 when a gas is removed.
/// Arguments: $1 --data $2 <data> $3 --output $4 <output> $5 --distance-au $6 <au> [$7 --remove-gas $8 <gas>]
pub const EVIDENCE_SCRIPT: &str = r#"
if [ "$7" = "--remove-gas" ]; then z=-110.0; else z=-100.0; fi
printf '{"logz": [-500.0, %s]}' "$z" > "$4"
"#;

/// Temperature sweep: SNR [5, 10] x Ts [273, 276], water tested
pub fn temperature_experiment(root: &Path) -> ExperimentSpec {
    let template = root.join("inputs.scr");
    std::fs::write(&template, TEMPLATE).unwrap();

    let mixing_ratios = BTreeMap::from([
        ("H2O".to_string(), 1.0),
        ("CO2".to_string(), 400.0e-6),
        ("N2".to_string(), 1.0),
        ("O2".to_string(), 0.21),
        ("CH4".to_string(), 1.8e-6),
    ]);

    ExperimentSpec {
        name: "temperature".to_string(),
        save_dir: root.join("results"),
        template,
        tested_gas: "H2O".to_string(),
        fpfs_err: 3.55e-10,
        noise_seed: Some(42),
        baseline: Baseline::default(),
        climate: ClimateSpec {
            surface_albedo: 0.24,
            relative_humidity: 0.8,
            top_pressure: 1.0,
            tropopause_temperature: Some(215.0),
            atmosphere: AtmosphereSpec::FixedProfile {
                surface_pressure: 1.035e6,
                background_gas: "N2".to_string(),
                mixing_ratios,
                partial_pressure_overrides: BTreeMap::from([("H2O".to_string(), 200.0e6)]),
            },
        },
        grid: GridSpec {
            snr: AxisValues::List(vec![5.0, 10.0]),
            surface_temperature: Some(AxisValues::List(vec![273.0, 276.0])),
            distance_au: None,
            mixing_ratio: None,
        },
    }
}

pub async fn sqlite_ledger(root: &Path) -> Arc<SqliteJobRepository> {
    let db: PathBuf = root.join("state/ledger.db");
    let pool = create_pool(db.to_str().unwrap()).await.unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteJobRepository::new(pool))
}

/// Retrieval command running `script` under `sh -c`
pub fn sh_executor(script: &str) -> Arc<SubprocessExecutor> {
    Arc::new(
        SubprocessExecutor::new(
            vec!["sh".into(), "-c".into(), script.into(), "retrieve".into()],
            Arc::new(SystemTimeProvider),
            vec!["PATH".to_string()],
        )
        .unwrap(),
    )
}

pub fn time() -> Arc<dyn TimeProvider> {
    Arc::new(SystemTimeProvider)
}

pub async fn plan(
    ledger: Arc<dyn JobRepository>,
    spec: &ExperimentSpec,
    resume: bool,
) -> RunPlan {
    PlannerService::new(ledger, Arc::new(UuidProvider), time())
        .plan(
            spec,
            &PlanOptions {
                resume,
                ..PlanOptions::default()
            },
        )
        .await
        .unwrap()
}

pub fn retrieval_pool(
    ledger: Arc<dyn JobRepository>,
    executor: Arc<dyn TaskExecutor>,
    climate: Arc<MockClimateModel>,
) -> RetrievalPool {
    let synthesizer = Arc::new(DataSynthesizer::new(climate, Arc::new(MockSpectrumModel::new())));
    RetrievalPool::new(
        ledger,
        executor,
        synthesizer,
        Arc::new(RetryPolicy::new(time(), 0)),
        time(),
        PoolConfig {
            max_processes: 5,
            poll_interval: Duration::from_millis(20),
            job_timeout: None,
        },
    )
    .unwrap()
}
