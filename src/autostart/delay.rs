//! Randomized release delay.
//!
//! The delay is drawn in two stages: a point in the published
//! `[random_delay_min, random_delay_max]` range, plus an unpublished jitter in
//! `[0, random_variation]`. Knowing the configured bounds never pins down the
//! release instant.

use std::time::Duration;

use rand::Rng;

use crate::config::schema::AutoStartConfig;

/// Smallest and largest delay the configuration can produce (uncompressed).
#[must_use]
pub fn release_delay_bounds(config: &AutoStartConfig) -> (Duration, Duration) {
    let min = config.random_delay_min;
    let max = config.random_delay_max.max(min);
    (min, max + config.random_variation)
}

/// Draws a release delay (uncompressed).
pub fn compute_release_delay<R: Rng + ?Sized>(config: &AutoStartConfig, rng: &mut R) -> Duration {
    let min = micros(config.random_delay_min);
    let max = micros(config.random_delay_max).max(min);
    let base = rng.random_range(min..=max);
    let jitter = rng.random_range(0..=micros(config.random_variation));
    Duration::from_micros(base + jitter)
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX / 2)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_samples_stay_in_bounds_and_vary() {
        let config = AutoStartConfig::default();
        let (lo, hi) = release_delay_bounds(&config);
        let mut rng = rand::rng();

        let samples: Vec<Duration> = (0..200)
            .map(|_| compute_release_delay(&config, &mut rng))
            .collect();
        for d in &samples {
            assert!(*d >= lo && *d <= hi, "{d:?} outside [{lo:?}, {hi:?}]");
        }
        let distinct: HashSet<_> = samples.iter().collect();
        assert!(distinct.len() > 1, "release delay must not be constant");
    }

    #[test]
    fn test_degenerate_range_collapses_to_min() {
        let config = AutoStartConfig {
            random_delay_min: Duration::from_millis(800),
            random_delay_max: Duration::from_millis(100),
            random_variation: Duration::ZERO,
            ..AutoStartConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            compute_release_delay(&config, &mut rng),
            Duration::from_millis(800)
        );
        assert_eq!(
            release_delay_bounds(&config),
            (Duration::from_millis(800), Duration::from_millis(800))
        );
    }

    proptest! {
        #[test]
        fn prop_delay_within_configured_bounds(
            min_ms in 0u64..2_000,
            span_ms in 0u64..2_000,
            variation_ms in 0u64..1_000,
            seed in any::<u64>(),
        ) {
            let config = AutoStartConfig {
                random_delay_min: Duration::from_millis(min_ms),
                random_delay_max: Duration::from_millis(min_ms + span_ms),
                random_variation: Duration::from_millis(variation_ms),
                ..AutoStartConfig::default()
            };
            let (lo, hi) = release_delay_bounds(&config);
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..16 {
                let d = compute_release_delay(&config, &mut rng);
                prop_assert!(d >= lo && d <= hi);
            }
        }
    }
}
