/// Divides `numerator` by `denominator`, returning `fallback` whenever the
/// division is undefined: zero or non-finite denominator, non-finite numerator,
/// or a non-finite quotient.
pub fn safe_ratio(numerator: f64, denominator: f64, fallback: f64) -> f64 {
    if !numerator.is_finite() || !denominator.is_finite() || denominator == 0.0 {
        return fallback;
    }

    let ratio = numerator / denominator;
    if ratio.is_finite() { ratio } else { fallback }
}

/// NaN and infinities collapse to zero.
pub fn safe_number(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

pub fn non_negative(value: f64) -> f64 {
    safe_number(value).max(0.0)
}

pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

pub fn mean(values: &[f64]) -> f64 {
    safe_ratio(values.iter().sum(), values.len() as f64, 0.0)
}

/// Percentage change from `baseline` to `stressed`; zero when the baseline is zero.
pub fn percent_change(baseline: f64, stressed: f64) -> f64 {
    safe_ratio(stressed - baseline, baseline.abs(), 0.0) * 100.0
}

pub fn derive_seed(base_seed: u64, stream: u64, index: u64) -> u64 {
    let mixed = base_seed ^ (stream << 32) ^ index;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{any, prop_assert, prop_assert_eq, prop_assume, proptest};

    proptest! {
        #[test]
        fn prop_safe_ratio_zero_denominator_returns_fallback(
            x in -1e12f64..1e12,
            fallback in -10.0f64..10.0
        ) {
            prop_assert_eq!(safe_ratio(x, 0.0, fallback), fallback);
        }

        #[test]
        fn prop_safe_ratio_is_finite_for_non_zero_denominator(
            x in -1e12f64..1e12,
            y in -1e12f64..1e12,
            fallback in -10.0f64..10.0
        ) {
            prop_assume!(y != 0.0);
            prop_assert!(safe_ratio(x, y, fallback).is_finite());
        }

        #[test]
        fn prop_safe_number_is_always_finite(value in any::<f64>()) {
            prop_assert!(safe_number(value).is_finite());
        }
    }

    #[test]
    fn safe_ratio_zero_over_zero_returns_fallback() {
        assert_eq!(safe_ratio(0.0, 0.0, 1.0), 1.0);
    }

    #[test]
    fn safe_ratio_rejects_non_finite_operands() {
        assert_eq!(safe_ratio(f64::NAN, 2.0, 0.5), 0.5);
        assert_eq!(safe_ratio(f64::INFINITY, 2.0, 0.5), 0.5);
        assert_eq!(safe_ratio(3.0, f64::INFINITY, 0.5), 0.5);
        assert_eq!(safe_ratio(3.0, f64::NAN, 0.5), 0.5);
        assert_eq!(safe_ratio(f64::MAX, f64::MIN_POSITIVE, 7.0), 7.0);
    }

    #[test]
    fn non_negative_clamps_and_sanitizes() {
        assert_eq!(non_negative(-5.0), 0.0);
        assert_eq!(non_negative(f64::NEG_INFINITY), 0.0);
        assert_eq!(non_negative(12.5), 12.5);
    }

    #[test]
    fn percentile_interpolates_between_points() {
        let mut values = vec![40.0, 10.0, 30.0, 20.0];
        assert_eq!(percentile(&mut values, 50.0), 25.0);
        assert_eq!(percentile(&mut values, 0.0), 10.0);
        assert_eq!(percentile(&mut values, 100.0), 40.0);
    }

    #[test]
    fn percent_change_guards_zero_baseline() {
        assert_eq!(percent_change(0.0, 100.0), 0.0);
        assert_eq!(percent_change(200.0, 150.0), -25.0);
    }

    #[test]
    fn derive_seed_changes_per_stream_and_index() {
        let a = derive_seed(42, 0, 0);
        let b = derive_seed(42, 0, 1);
        let c = derive_seed(42, 1, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, derive_seed(42, 0, 0));
    }
}
