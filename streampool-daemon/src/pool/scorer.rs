//! Reputation updates and composite endpoint scoring.

use streampool_protocol::{Codec, Reputation, Resolution};

/// Reputation step applied on a successful cycle.
pub const SUCCESS_STEP: f64 = 0.01;
/// Reputation step applied on a failed cycle.
pub const FAILURE_STEP: f64 = 0.05;

/// Latency at or above which the latency sub-score is zero, in seconds.
pub const MAX_LATENCY_SECS: f64 = 10.0;
/// Throughput at or above which the throughput sub-score saturates, in Mbps.
pub const MAX_THROUGHPUT_MBPS: f64 = 80.0;

pub const WEIGHT_LATENCY: f64 = 0.30;
pub const WEIGHT_THROUGHPUT: f64 = 0.30;
pub const WEIGHT_RESOLUTION: f64 = 0.08;
pub const WEIGHT_CODEC: f64 = 0.07;
pub const WEIGHT_STABILITY: f64 = 0.15;
pub const WEIGHT_SUCCESS_RATE: f64 = 0.10;

/// Endpoint reputation scorer.
pub struct ReputationScorer;

impl ReputationScorer {
    /// Step both reputation values after a cycle.
    ///
    /// Failures cost five times what a success earns. Results are clamped to
    /// `[0, 1]` and rounded to 4 decimals.
    pub fn update_reputation(previous: Reputation, success: bool) -> Reputation {
        let step = if success { SUCCESS_STEP } else { -FAILURE_STEP };
        Reputation {
            stability: round4((previous.stability + step).clamp(0.0, 1.0)),
            success_rate: round4((previous.success_rate + step).clamp(0.0, 1.0)),
        }
    }

    /// Compute the cumulative score after a successful cycle.
    ///
    /// The weighted increment is added to `previous_score` with no decay or
    /// upper bound, so long-lived healthy endpoints keep climbing.
    pub fn compute_score(
        resolution: Resolution,
        codec: &Codec,
        latency_secs: f64,
        throughput_mbps: f64,
        reputation: Reputation,
        previous_score: f64,
    ) -> f64 {
        let latency = (1.0 - latency_secs / MAX_LATENCY_SECS).max(0.0);
        let throughput = (throughput_mbps / MAX_THROUGHPUT_MBPS).min(1.0);

        let increment = WEIGHT_LATENCY * latency
            + WEIGHT_THROUGHPUT * throughput
            + WEIGHT_RESOLUTION * Self::resolution_score(resolution)
            + WEIGHT_CODEC * Self::codec_score(codec)
            + WEIGHT_STABILITY * reputation.stability
            + WEIGHT_SUCCESS_RATE * reputation.success_rate;

        round4(previous_score + increment)
    }

    /// Ordinal tier by exact pixel height. Unlisted heights rank lowest.
    pub fn resolution_score(resolution: Resolution) -> f64 {
        match resolution.height() {
            Some(576) => 1.0,
            Some(720) => 1.5,
            Some(1080) => 2.0,
            Some(1440) => 2.5,
            Some(2160) => 3.0,
            _ => 0.5,
        }
    }

    pub fn codec_score(codec: &Codec) -> f64 {
        match codec {
            Codec::Hevc => 1.2,
            Codec::H264 => 1.0,
            Codec::Avs2 => 0.8,
            Codec::Mpeg2Video => 0.7,
            Codec::Cavs => 0.5,
            Codec::Other(_) | Codec::Unknown => 0.1,
        }
    }
}

/// Convert KB/s to Mbps.
pub fn kbps_to_mbps(kbps: f64) -> f64 {
    kbps * 8.0 / 1024.0
}

/// Convert milliseconds to seconds.
pub fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        let sum = WEIGHT_LATENCY
            + WEIGHT_THROUGHPUT
            + WEIGHT_RESOLUTION
            + WEIGHT_CODEC
            + WEIGHT_STABILITY
            + WEIGHT_SUCCESS_RATE;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_reference_score() {
        let score = ReputationScorer::compute_score(
            Resolution::Height(1080),
            &Codec::Hevc,
            0.05,
            5.0,
            Reputation {
                stability: 0.9,
                success_rate: 0.95,
            },
            0.0,
        );
        assert_eq!(score, 0.7912);
    }

    #[test]
    fn test_score_accumulates() {
        let perfect = Reputation {
            stability: 1.0,
            success_rate: 1.0,
        };
        let fresh =
            ReputationScorer::compute_score(Resolution::Height(720), &Codec::H264, 0.2, 40.0, perfect, 0.0);
        let cumulative =
            ReputationScorer::compute_score(Resolution::Height(720), &Codec::H264, 0.2, 40.0, perfect, 1.5);
        assert_eq!(fresh, 0.884);
        assert_eq!(cumulative, 2.384);
    }

    #[test]
    fn test_score_of_unknown_media_and_slow_link() {
        let score = ReputationScorer::compute_score(
            Resolution::Unknown,
            &Codec::Unknown,
            25.0,
            0.0,
            Reputation {
                stability: 0.5,
                success_rate: 0.5,
            },
            0.0,
        );
        assert_eq!(score, 0.172);
    }

    #[test]
    fn test_score_is_deterministic() {
        let args = (Resolution::Height(576), Codec::Other("vp9".into()), 1.25, 12.5);
        let rep = Reputation::INITIAL;
        let a = ReputationScorer::compute_score(args.0, &args.1, args.2, args.3, rep, 3.1416);
        let b = ReputationScorer::compute_score(args.0, &args.1, args.2, args.3, rep, 3.1416);
        assert_eq!(a, b);
    }

    #[test]
    fn test_throughput_saturates() {
        let rep = Reputation::INITIAL;
        let at_cap = ReputationScorer::compute_score(Resolution::Unknown, &Codec::Unknown, 0.0, 80.0, rep, 0.0);
        let above = ReputationScorer::compute_score(Resolution::Unknown, &Codec::Unknown, 0.0, 500.0, rep, 0.0);
        assert_eq!(at_cap, above);
    }

    #[test]
    fn test_five_successes_from_initial() {
        let mut rep = Reputation::INITIAL;
        for _ in 0..5 {
            rep = ReputationScorer::update_reputation(rep, true);
        }
        assert_eq!(rep.stability, 0.95);
        assert_eq!(rep.success_rate, 1.0);
    }

    #[test]
    fn test_reputation_stays_in_bounds() {
        let mut rep = Reputation::INITIAL;
        for i in 0..200 {
            rep = ReputationScorer::update_reputation(rep, i % 7 == 0);
            assert!((0.0..=1.0).contains(&rep.stability));
            assert!((0.0..=1.0).contains(&rep.success_rate));
        }

        let mut rep = Reputation::INITIAL;
        for _ in 0..30 {
            rep = ReputationScorer::update_reputation(rep, false);
        }
        assert_eq!(rep.stability, 0.0);
        for _ in 0..30 {
            rep = ReputationScorer::update_reputation(rep, true);
        }
        assert_eq!(rep.success_rate, 0.3);
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(kbps_to_mbps(640.0), 5.0);
        assert_eq!(ms_to_secs(50), 0.05);
    }
}
