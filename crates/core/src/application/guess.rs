// Initial guesses for the stable-climate solve
//
// Previously converged solutions for an Earth-like planet between 1.00 and
// 1.50 AU in 0.01 AU steps.

const FIRST_DISTANCE_AU: f64 = 1.0;
const DISTANCE_STEP_AU: f64 = 0.01;

/// CO2 column (mol/cm^2) per tabulated distance
const CO2_COLUMNS: [f64; 51] = [
    2.10129270e-02, 5.00923877e-02, 1.07593109e-01, 2.06253691e-01, 3.59126589e-01,
    5.78659830e-01, 8.74196621e-01, 1.25404809e+00, 1.72819834e+00, 2.30704292e+00,
    2.99769689e+00, 3.80252669e+00, 4.71498985e+00, 5.72299342e+00, 6.81169536e+00,
    7.96616404e+00, 9.17723097e+00, 1.04402096e+01, 1.17543465e+01, 1.31183000e+01,
    1.45361496e+01, 1.60205906e+01, 1.75797619e+01, 1.92202823e+01, 2.09507244e+01,
    2.27819371e+01, 2.47217606e+01, 2.67751216e+01, 2.89523441e+01, 3.12659538e+01,
    3.37193453e+01, 3.63303457e+01, 3.90990266e+01, 4.20306398e+01, 4.51147330e+01,
    4.83475434e+01, 5.17302989e+01, 5.52788994e+01, 5.90503190e+01, 6.30917726e+01,
    6.74772385e+01, 7.21709757e+01, 7.72089247e+01, 8.26470296e+01, 8.84927457e+01,
    9.48711202e+01, 1.01918242e+02, 1.09593176e+02, 1.18012480e+02, 1.27330771e+02,
    1.37822249e+02,
];

/// Tropopause temperature (K) per tabulated distance
const TROPOPAUSE_TEMPERATURES: [f64; 51] = [
    219.62574385, 218.57005786, 217.53007578, 216.50185542, 215.47779685,
    214.45104632, 213.41943804, 212.38332992, 211.34234676, 210.29508998,
    209.24081381, 208.18056032, 207.11638257, 206.05123347, 204.98844747,
    203.93157649, 202.88220304, 201.8416212, 200.81009418, 199.78825018,
    198.77533446, 197.76996023, 196.77078039, 195.77771469, 194.79027983,
    193.80737126, 192.82813614, 191.85321382, 190.88200758, 189.91355995,
    188.94814441, 187.98501996, 187.0247644, 186.0665982, 185.11292833,
    184.16479327, 183.2220666, 182.28417286, 181.34777824, 180.4103635,
    179.46812673, 178.52527112, 177.58068422, 176.63146804, 175.68017496,
    174.72156536, 173.75059281, 172.77308102, 171.78597458, 170.78568178,
    169.76471886,
];

/// Starting point for the CO2 / tropopause solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateGuess {
    pub co2_column: f64,
    pub tropopause_temperature: f64,
}

/// Guess from the nearest tabulated distance
///
/// Distances outside the table clamp to its first or last row.
pub fn nearest_guess(distance_au: f64) -> ClimateGuess {
    let distances = (0..CO2_COLUMNS.len()).map(|i| FIRST_DISTANCE_AU + i as f64 * DISTANCE_STEP_AU);
    let index = nearest_index(distances, distance_au);
    ClimateGuess {
        co2_column: CO2_COLUMNS[index],
        tropopause_temperature: TROPOPAUSE_TEMPERATURES[index],
    }
}

/// Index of the value closest to `target`; ties and NaN go to the lowest index
fn nearest_index(values: impl Iterator<Item = f64>, target: f64) -> usize {
    let mut best = (0, f64::INFINITY);
    for (i, value) in values.enumerate() {
        let gap = (value - target).abs();
        if gap < best.1 {
            best = (i, gap);
        }
    }
    best.0
}
