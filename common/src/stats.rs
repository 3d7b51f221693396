//! Round-trip statistics.

use std::time::Duration;

/// Returns `(min, max, avg, stddev)` over the given round-trip times.
///
/// The standard deviation is the population one, computed against the
/// average. An empty input yields all zeros.
pub fn compute_rtt_stats(rtts: &[Duration]) -> (Duration, Duration, Duration, Duration) {
    let Some(first) = rtts.first() else {
        return (Duration::ZERO, Duration::ZERO, Duration::ZERO, Duration::ZERO);
    };

    let mut min = *first;
    let mut max = *first;
    let mut sum = Duration::ZERO;

    for rtt in rtts {
        min = min.min(*rtt);
        max = max.max(*rtt);
        sum += *rtt;
    }

    let count = rtts.len() as f64;
    let avg_nanos = sum.as_nanos() as f64 / count;

    let variance = rtts
        .iter()
        .map(|rtt| {
            let diff = rtt.as_nanos() as f64 - avg_nanos;
            diff * diff
        })
        .sum::<f64>()
        / count;

    let avg = Duration::from_nanos(avg_nanos as u64);
    let stddev = Duration::from_nanos(variance.sqrt() as u64);

    (min, max, avg, stddev)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
