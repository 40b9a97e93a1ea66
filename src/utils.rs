//! Helper functions for sampling from the shared simulation RNG

use rand::Rng;

/// Uniform sample from `(0.0, 1.0]`, safe to pass to `ln`.
#[inline]
pub fn open_unit<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    1.0 - rng.gen::<f64>()
}

/// Sample from the standard normal distribution (Box-Muller transform).
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = open_unit(rng);
    let u2 = rng.gen::<f64>();

    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Sample from an exponential distribution with the given mean, rounded to
/// whole milliseconds.
pub fn exponential_ms<R: Rng + ?Sized>(rng: &mut R, mean: u64) -> u64 {
    (-(mean as f64) * open_unit(rng).ln()).round() as u64
}

/// Number of draws needed until the first success of a Bernoulli trial with
/// success probability `p`, scaled down by `weight`. Returns `None` when `p`
/// is too small to be represented.
pub fn geometric_delay<R: Rng + ?Sized>(
    rng: &mut R,
    p: f64,
    weight: f64,
) -> Option<u64> {
    if !(p > f64::EPSILON / 2.0) || weight <= 0.0 {
        return None;
    }

    let u = open_unit(rng);
    Some((u.ln() / (-p).ln_1p() / weight) as u64)
}

/// Median of a list of floats; 0 for an empty list.
pub fn median_of_floats(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    match values.len() % 2 {
        0 => (values[mid - 1] + values[mid]) / 2.0,
        _ => values[mid],
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::{
        exponential_ms, geometric_delay, median_of_floats, standard_normal,
    };

    #[test]
    fn medians() {
        assert_eq!(median_of_floats(vec![]), 0.0);
        assert_eq!(median_of_floats(vec![3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median_of_floats(vec![4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn sample_means_are_close() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let n = 20_000;

        let normal: f64 =
            (0..n).map(|_| standard_normal(&mut rng)).sum::<f64>() / n as f64;
        assert!(normal.abs() < 0.05, "normal mean {normal}");

        let exp: f64 = (0..n)
            .map(|_| exponential_ms(&mut rng, 1_000) as f64)
            .sum::<f64>()
            / n as f64;
        assert!((exp - 1_000.0).abs() < 50.0, "exponential mean {exp}");

        // Expected delay of a geometric draw is 1 / (p * weight).
        let geo: f64 = (0..n)
            .map(|_| geometric_delay(&mut rng, 1e-4, 2.0).unwrap() as f64)
            .sum::<f64>()
            / n as f64;
        assert!((geo - 5_000.0).abs() < 250.0, "geometric mean {geo}");
    }

    #[test]
    fn degenerate_geometric_delay() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        assert_eq!(geometric_delay(&mut rng, 0.0, 1.0), None);
        assert_eq!(geometric_delay(&mut rng, 0.5, 0.0), None);
    }
}
