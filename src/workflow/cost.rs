//! Cost estimation. Pure arithmetic, no model call.

use super::state::{Complexity, CostEstimate};

/// Hourly base rate in whole currency units.
pub const BASE_RATE: f64 = 50.0;

/// Multiplier for a complexity band. Unknown labels price as medium.
pub fn multiplier(complexity: &Complexity) -> f64 {
    match complexity {
        Complexity::Simple => 1.0,
        Complexity::Medium => 1.5,
        Complexity::Complex => 2.0,
        Complexity::Other(_) => 1.5,
    }
}

/// Estimate a cost range from hours and complexity.
///
/// `base = floor(hours * 50 * multiplier)`, then the range is
/// `floor(base * 0.9) ..= floor(base * 1.1)`, all in `f64`.
pub fn calculate_cost(hours: u32, complexity: &Complexity) -> CostEstimate {
    let base = (f64::from(hours) * BASE_RATE * multiplier(complexity)).floor();
    CostEstimate {
        min: (base * 0.9).floor() as u64,
        max: (base * 1.1).floor() as u64,
        hours,
        complexity: complexity.clone(),
    }
}
