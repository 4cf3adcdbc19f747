//! Beta-distribution sampling for Thompson-sampling traffic allocation.

use rand::Rng;

/// Approximate Beta-distribution sample using the Irwin-Hall approach
/// (sum of 12 uniform samples to approximate a standard normal, then
/// shift/scale by the Beta mean and variance).
pub fn beta_sample(rng: &mut impl Rng, alpha: f64, beta: f64) -> f64 {
    let x: f64 = (0..12).map(|_| rng.gen::<f64>()).sum::<f64>() - 6.0;
    let mean = alpha / (alpha + beta);
    let variance = (alpha * beta) / ((alpha + beta).powi(2) * (alpha + beta + 1.0));
    (mean + x * variance.sqrt()).clamp(0.0, 1.0)
}

/// Thompson score for one arm: the sum of `draws` Beta samples.
pub fn thompson_score(rng: &mut impl Rng, alpha: f64, beta: f64, draws: u32) -> f64 {
    (0..draws).map(|_| beta_sample(rng, alpha, beta)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_stay_in_unit_interval() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let sample = beta_sample(&mut rng, 3.0, 2.0);
            assert!((0.0..=1.0).contains(&sample));
        }
    }

    #[test]
    fn test_high_alpha_scores_above_high_beta() {
        let mut rng = rand::thread_rng();
        let confident = thompson_score(&mut rng, 50.0, 2.0, 1000);
        let weak = thompson_score(&mut rng, 2.0, 50.0, 1000);
        assert!(confident > weak);
    }

    #[test]
    fn test_flat_prior_centers_near_half() {
        let mut rng = rand::thread_rng();
        let score = thompson_score(&mut rng, 1.0, 1.0, 1000);
        let mean = score / 1000.0;
        assert!((0.3..=0.7).contains(&mean), "mean {mean} far from 0.5");
    }
}
