//! Summary statistics over latency samples.
//!
//! All functions return `None` for an empty input instead of a sentinel value.

/// Arithmetic mean, summed in input order.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().sum();
    Some(sum / values.len() as f64)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Nearest-rank percentile over a sorted copy of `values`.
///
/// The rank is `percent / 100 * len`. An integral rank selects that element
/// (1-based); a fractional rank is rounded half away from zero. The rank is
/// clamped to `1..=len`, so small inputs never index out of bounds.
/// `percent` outside `(0, 100]` yields `None`.
pub fn percentile(values: &[f64], percent: f64) -> Option<f64> {
    if values.is_empty() || !(percent > 0.0 && percent <= 100.0) {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let len = sorted.len();

    if len == 1 || percent == 100.0 {
        return sorted.last().copied();
    }

    let index = (percent / 100.0) * len as f64;
    let rank = if index.fract() == 0.0 {
        index as usize
    } else {
        index.round() as usize
    };

    Some(sorted[rank.clamp(1, len) - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: [f64; 10] = [
        0.018, 0.013, 4.018, 3.018, 0.199, 0.011, 0.153, 0.132, 0.023, 0.019,
    ];

    #[test]
    fn empty_input_yields_none() {
        assert_eq!(mean(&[]), None);
        assert_eq!(min(&[]), None);
        assert_eq!(max(&[]), None);
        assert_eq!(percentile(&[], 90.0), None);
    }

    #[test]
    fn fixture_summary_values() {
        assert_eq!(mean(&FIXTURE), Some(0.7603999999999999));
        assert_eq!(min(&FIXTURE), Some(0.011));
        assert_eq!(max(&FIXTURE), Some(4.018));
    }

    #[test]
    fn fixture_percentiles() {
        assert_eq!(percentile(&FIXTURE, 90.0), Some(3.018));
        assert_eq!(percentile(&FIXTURE, 95.0), Some(4.018));
        assert_eq!(percentile(&FIXTURE, 99.0), Some(4.018));
    }

    #[test]
    fn percentile_does_not_reorder_input() {
        let values = FIXTURE;
        percentile(&values, 50.0);
        assert_eq!(values, FIXTURE);
    }

    #[test]
    fn percentile_two_values_rounds_up() {
        // rank 1.8 rounds to the second element
        assert_eq!(percentile(&[0.02, 0.01], 90.0), Some(0.02));
        assert_eq!(percentile(&[0.02, 0.01], 50.0), Some(0.01));
    }

    #[test]
    fn percentile_single_value() {
        assert_eq!(percentile(&[1.5], 99.0), Some(1.5));
        assert_eq!(percentile(&[1.5], 1.0), Some(1.5));
    }

    #[test]
    fn percentile_small_rank_clamps_to_first() {
        let values = [3.0, 1.0, 2.0];
        // rank 0.03 rounds to 0, clamped to the smallest element
        assert_eq!(percentile(&values, 1.0), Some(1.0));
    }

    #[test]
    fn percentile_hundred_is_max() {
        assert_eq!(percentile(&FIXTURE, 100.0), Some(4.018));
    }

    #[test]
    fn percentile_out_of_bounds() {
        assert_eq!(percentile(&FIXTURE, 0.0), None);
        assert_eq!(percentile(&FIXTURE, 100.5), None);
        assert_eq!(percentile(&FIXTURE, f64::NAN), None);
    }
}
