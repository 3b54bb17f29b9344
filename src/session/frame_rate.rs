//! Frame-rate inference from capture timestamps

use tracing::debug;

/// Rates a session's inferred frame rate is snapped to.
pub const CANDIDATE_FRAME_RATES: [u32; 3] = [30, 50, 60];

/// Infer a session's frame rate from its UTC frame timestamps.
///
/// Averages the consecutive differences, inverts the mean, and snaps to the
/// closest of [`CANDIDATE_FRAME_RATES`]. Returns `fallback` when the history
/// has fewer than two entries or the mean delta is not a positive number.
pub fn infer_frame_rate(utc: &[f64], fallback: u32) -> u32 {
    if utc.len() < 2 {
        return fallback;
    }

    let deltas = utc.windows(2).map(|pair| pair[1] - pair[0]);
    let mean = deltas.sum::<f64>() / (utc.len() - 1) as f64;
    if !mean.is_finite() || mean <= 0.0 {
        debug!("Mean frame delta {} unusable, reporting {}Hz", mean, fallback);
        return fallback;
    }

    let observed = 1.0 / mean;
    let rate = snap(observed);
    debug!("Observed {:.3}Hz, snapped to {}Hz", observed, rate);
    rate
}

fn snap(observed: f64) -> u32 {
    // Ties go to the lower candidate.
    CANDIDATE_FRAME_RATES
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = (f64::from(*a) - observed).abs();
            let db = (f64::from(*b) - observed).abs();
            da.total_cmp(&db)
        })
        .unwrap_or(CANDIDATE_FRAME_RATES[CANDIDATE_FRAME_RATES.len() - 1])
}
