// Radiative balance helpers

/// Stefan-Boltzmann constant (W m^-2 K^-4)
pub const STEFAN_BOLTZMANN: f64 = 5.670374419e-8;

/// Planetary equilibrium temperature (K)
///
/// # Arguments
/// * `stellar_radiation` - Total stellar flux at the planet (W/m^2)
/// * `bond_albedo` - Bond albedo in [0, 1]
pub fn equilibrium_temperature(stellar_radiation: f64, bond_albedo: f64) -> f64 {
    (stellar_radiation * (1.0 - bond_albedo) / (4.0 * STEFAN_BOLTZMANN)).powf(0.25)
}

/// Skin temperature of an optically thin upper atmosphere (K)
pub fn skin_temperature(stellar_radiation: f64, bond_albedo: f64) -> f64 {
    equilibrium_temperature(stellar_radiation, bond_albedo) * 0.5_f64.powf(0.25)
}
