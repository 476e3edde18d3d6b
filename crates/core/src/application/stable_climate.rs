// Stable climate root solve
//
// Finds the CO2 column and tropopause temperature that put a planet at a given
// distance in radiative balance for a fixed surface temperature.

use crate::application::guess::ClimateGuess;
use crate::application::physics::skin_temperature;
use crate::domain::species_key;
use crate::error::{AppError, Result};
use crate::port::{ClimateModel, ClimateSettings, FluxRequest};
use nalgebra::{Matrix2, Vector2};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Tropopause temperatures below this are treated as a failed solve (K)
pub const MIN_TROPOPAUSE_TEMPERATURE: f64 = 100.0;

/// Newton iteration tolerances
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Relative step size below which the iteration has converged
    pub xtol: f64,
    /// Scaled residual norm below which the iteration has converged
    pub ftol: f64,
    pub max_iterations: usize,
    /// Step halvings allowed per iteration before giving up
    pub max_halvings: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            xtol: 1.49012e-8,
            ftol: 1.0e-6,
            max_iterations: 100,
            max_halvings: 10,
        }
    }
}

/// Converged balance state
#[derive(Debug, Clone, PartialEq)]
pub struct StableClimate {
    /// mol/cm^2
    pub co2_column: f64,
    /// K
    pub tropopause_temperature: f64,
    pub iterations: usize,
    /// `[OLR - ISR, T_skin - T_trop]` at the solution
    pub residual: [f64; 2],
}

struct BalanceProblem<'a> {
    model: &'a dyn ClimateModel,
    settings: &'a ClimateSettings,
    columns: BTreeMap<String, f64>,
    distance_au: f64,
    surface_temperature: f64,
}

impl BalanceProblem<'_> {
    /// Residual at `x = (log10 N_CO2, log10 T_trop)`, raw and scaled
    async fn residual(&self, x: &Vector2<f64>) -> Result<(Vector2<f64>, Vector2<f64>)> {
        let co2_column = 10f64.powf(x[0]);
        let tropopause_temperature = 10f64.powf(x[1]);

        let mut column_inventories = self.columns.clone();
        column_inventories.insert("CO2".to_string(), co2_column);
        let request = FluxRequest {
            settings: self.settings.clone(),
            surface_temperature: self.surface_temperature,
            tropopause_temperature,
            column_inventories,
        };
        let fluxes = self.model.toa_fluxes(&request).await?;

        let solar_scaling = 1.0 / (self.distance_au * self.distance_au);
        let isr = fluxes.isr * solar_scaling;
        if fluxes.fdn_top <= 0.0 {
            return Err(AppError::Solver(format!(
                "non-positive downward flux {} at model top",
                fluxes.fdn_top
            )));
        }
        let bond_albedo = fluxes.fup_top / fluxes.fdn_top;
        let total_solar = solar_scaling * (4.0 * fluxes.fdn_top / 1.0e3);
        let t_skin = skin_temperature(total_solar, bond_albedo);

        let raw = Vector2::new(fluxes.olr - isr, t_skin - tropopause_temperature);
        let scaled = Vector2::new(raw[0] / isr.abs().max(1.0), raw[1] / tropopause_temperature);
        Ok((raw, scaled))
    }
}

/// Solve for the CO2 column and tropopause temperature in radiative balance
///
/// Damped Newton iteration in log10 space with a forward-difference Jacobian.
/// Every residual evaluation is one climate model call.
///
/// # Arguments
/// * `model` - Climate model evaluating TOA fluxes
/// * `settings` - Albedo, humidity and top pressure of the experiment
/// * `column_inventories` - Columns of every gas except CO2 (mol/cm^2)
/// * `distance_au` - Orbital distance scaling the stellar flux
/// * `surface_temperature` - Fixed surface temperature (K)
/// * `guess` - Starting CO2 column and tropopause temperature
///
/// # Errors
/// - AppError::Solver if the iteration does not converge or lands below
///   `MIN_TROPOPAUSE_TEMPERATURE`
/// - AppError::Model if a climate model call fails
pub async fn solve_stable_climate(
    model: &dyn ClimateModel,
    settings: &ClimateSettings,
    column_inventories: &BTreeMap<String, f64>,
    distance_au: f64,
    surface_temperature: f64,
    guess: ClimateGuess,
    options: &SolverOptions,
) -> Result<StableClimate> {
    if !(guess.co2_column > 0.0 && guess.tropopause_temperature > 0.0) {
        return Err(AppError::Solver(format!(
            "initial guess must be positive, got {:?}",
            guess
        )));
    }

    let problem = BalanceProblem {
        model,
        settings,
        columns: column_inventories
            .iter()
            .map(|(k, v)| (species_key(k), *v))
            .collect(),
        distance_au,
        surface_temperature,
    };

    let mut x = Vector2::new(guess.co2_column.log10(), guess.tropopause_temperature.log10());
    let (mut raw, mut scaled) = problem.residual(&x).await?;

    for iteration in 1..=options.max_iterations {
        if scaled.amax() < options.ftol {
            return finish(x, raw, iteration - 1, distance_au);
        }

        // Forward-difference Jacobian of the scaled residual
        let mut jacobian = Matrix2::zeros();
        for j in 0..2 {
            let h = f64::EPSILON.sqrt() * x[j].abs().max(1.0);
            let mut probe = x;
            probe[j] += h;
            let (_, shifted) = problem.residual(&probe).await?;
            jacobian.set_column(j, &((shifted - scaled) / h));
        }

        let step = jacobian
            .lu()
            .solve(&(-scaled))
            .ok_or_else(|| AppError::Solver("singular Jacobian".to_string()))?;

        let norm = scaled.norm();
        let mut lambda = 1.0;
        let mut accepted = None;
        for _ in 0..=options.max_halvings {
            let candidate = x + step * lambda;
            let (candidate_raw, candidate_scaled) = problem.residual(&candidate).await?;
            if candidate_scaled.norm() < norm {
                accepted = Some((candidate, candidate_raw, candidate_scaled, step * lambda));
                break;
            }
            lambda *= 0.5;
        }

        let Some((next, next_raw, next_scaled, taken)) = accepted else {
            return Err(AppError::Solver(format!(
                "no descent direction after {} iterations (residual {:.3e})",
                iteration, norm
            )));
        };

        debug!(
            iteration = iteration,
            log10_co2 = next[0],
            log10_t_trop = next[1],
            residual = next_scaled.norm(),
            damping = lambda,
            "Stable climate iteration"
        );

        x = next;
        raw = next_raw;
        scaled = next_scaled;

        if taken.norm() <= options.xtol * (x.norm() + options.xtol) || scaled.amax() < options.ftol {
            return finish(x, raw, iteration, distance_au);
        }
    }

    Err(AppError::Solver(format!(
        "not converged after {} iterations (residual {:.3e})",
        options.max_iterations,
        scaled.norm()
    )))
}

fn finish(
    x: Vector2<f64>,
    raw: Vector2<f64>,
    iterations: usize,
    distance_au: f64,
) -> Result<StableClimate> {
    let solution = StableClimate {
        co2_column: 10f64.powf(x[0]),
        tropopause_temperature: 10f64.powf(x[1]),
        iterations,
        residual: [raw[0], raw[1]],
    };
    if solution.tropopause_temperature < MIN_TROPOPAUSE_TEMPERATURE {
        return Err(AppError::Solver(format!(
            "tropopause temperature {:.2} K below {} K",
            solution.tropopause_temperature, MIN_TROPOPAUSE_TEMPERATURE
        )));
    }
    info!(
        distance_au = distance_au,
        co2_column = solution.co2_column,
        tropopause_temperature = solution.tropopause_temperature,
        iterations = iterations,
        "Stable climate found"
    );
    Ok(solution)
}
