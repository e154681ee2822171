//! Placement decision engine.
//!
//! A pure function of the current counts and the target ratio. The
//! comparison runs on integer thousandths of the ratio because the
//! spot-preferring tie rule has to hold exactly; in f64, `0.8 - 0.7` and
//! `0.7 - 0.6` are not equal, and a tie decided by rounding noise would
//! break the deterministic ordering the counters depend on.

use crate::config::SpotPreference;

use super::models::{CapacityType, ExecutorCount};

/// Decide which capacity type the next executor lands on.
///
/// Returns `None` (unlabeled) in best-effort mode: the pod gets no
/// capacity selector and no state is kept for it.
pub fn decide(
    mode: SpotPreference,
    counts: &ExecutorCount,
    target_ratio: f64,
) -> Option<CapacityType> {
    match mode {
        SpotPreference::BestEffort => None,
        SpotPreference::Strict => Some(choose(counts, target_ratio)),
    }
}

fn choose(counts: &ExecutorCount, target_ratio: f64) -> CapacityType {
    let target = to_millis(target_ratio);

    // Boundary ratios pin the choice no matter what the counts say.
    if target >= 1000 {
        return CapacityType::Spot;
    }
    if target <= 0 {
        return CapacityType::OnDemand;
    }

    let total = counts.total() as i128;
    if total == 0 {
        // First executor: round toward the target, spot on the 0.5 tie.
        return if target >= 500 {
            CapacityType::Spot
        } else {
            CapacityType::OnDemand
        };
    }

    // Deviation from the target after admitting one more executor on each
    // side, scaled by 1000 * (total + 1) to stay in integers.
    let spot = counts.spot as i128;
    let scaled_target = i128::from(target) * (total + 1);
    let spot_deviation = (1000 * (spot + 1) - scaled_target).abs();
    let on_demand_deviation = (1000 * spot - scaled_target).abs();
    if spot_deviation <= on_demand_deviation {
        CapacityType::Spot
    } else {
        CapacityType::OnDemand
    }
}

/// Ratio in thousandths, the system-wide precision for stored ratios.
fn to_millis(ratio: f64) -> i64 {
    (ratio.clamp(0.0, 1.0) * 1000.0).round() as i64
}
