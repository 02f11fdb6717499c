//! Scoring functions for hybrid search re-ranking. Unlike lexical/vector
//! distances, every boost here is additive and expressed in the same
//! "higher is better" direction as the weighted-sum formula that combines
//! them.

/// Recency boost: decays linearly to zero over 60 days, capped at 0.2.
pub fn recency_boost(updated_at: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) -> f32 {
    let days_ago = (now - updated_at).num_seconds().max(0) as f64 / 86400.0;
    let fraction_remaining = (1.0 - days_ago / 60.0).clamp(0.0, 1.0);
    (0.2 * fraction_remaining) as f32
}

/// Access boost: log-scaled on access count, capped at 0.1.
/// `log2(access_count + 1) / log2(max_considered + 1) * 0.1`, where
/// `max_considered` caps the curve so one wildly popular document doesn't
/// dwarf the rest of the weighted sum.
pub fn access_boost(access_count: u64) -> f32 {
    const MAX_CONSIDERED: f64 = 1000.0;
    let numerator = ((access_count as f64) + 1.0).log2();
    let denominator = (MAX_CONSIDERED + 1.0).log2();
    (0.1 * (numerator / denominator).min(1.0)) as f32
}

/// Episodic decay score: starts at 1.0, halves every `half_life_days`
/// without access, bumped back toward 1.0 on each access.
pub fn episodic_decay(age_days: f64, half_life_days: f64, access_count: u64) -> f64 {
    let base = 0.5_f64.powf(age_days / half_life_days.max(1.0));
    let access_bump = 1.0 - 0.5_f64.powf(access_count as f64 / 5.0);
    (base + access_bump * (1.0 - base)).clamp(0.0, 1.0)
}

/// Combine lexical and vector component scores with the recency/access
/// boosts into the final weighted-sum re-rank score.
pub fn weighted_score(
    lexical: Option<f32>,
    vector: Option<f32>,
    weight_lexical: f32,
    weight_vector: f32,
    recency: f32,
    access: f32,
) -> f32 {
    lexical.unwrap_or(0.0) * weight_lexical
        + vector.unwrap_or(0.0) * weight_vector
        + recency
        + access
}

/// Quality correction: if the classifier expected lexical dominance but the
/// top lexical scores are poor while vector scores are strong (or the
/// symmetric case), shift weight toward the stronger signal. Returns
/// `(weight_lexical, weight_vector)` summing to 1.0.
pub fn adaptive_weights(
    expected_lexical_dominant: bool,
    top_lexical_scores: &[f32],
    top_vector_scores: &[f32],
) -> (f32, f32) {
    const POOR_THRESHOLD: f32 = 0.1;
    const DEFAULT_LEXICAL_WEIGHT: f32 = 0.5;

    let lexical_poor = !top_lexical_scores.is_empty()
        && top_lexical_scores.iter().all(|s| *s < POOR_THRESHOLD);
    let vector_good = top_vector_scores.iter().any(|s| *s >= POOR_THRESHOLD);

    let vector_poor = !top_vector_scores.is_empty()
        && top_vector_scores.iter().all(|s| *s < POOR_THRESHOLD);
    let lexical_good = top_lexical_scores.iter().any(|s| *s >= POOR_THRESHOLD);

    if expected_lexical_dominant && lexical_poor && vector_good {
        (0.2, 0.8)
    } else if !expected_lexical_dominant && vector_poor && lexical_good {
        (0.8, 0.2)
    } else {
        (DEFAULT_LEXICAL_WEIGHT, 1.0 - DEFAULT_LEXICAL_WEIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn recency_boost_is_maximal_for_just_updated() {
        let now = chrono::Utc::now();
        let boost = recency_boost(now, now);
        assert!((boost - 0.2).abs() < 0.001);
    }

    #[test]
    fn recency_boost_is_zero_past_60_days() {
        let now = chrono::Utc::now();
        let old = now - Duration::days(90);
        assert_eq!(recency_boost(old, now), 0.0);
    }

    #[test]
    fn recency_boost_halfway_is_about_half_max() {
        let now = chrono::Utc::now();
        let mid = now - Duration::days(30);
        let boost = recency_boost(mid, now);
        assert!(boost > 0.08 && boost < 0.12);
    }

    #[test]
    fn access_boost_is_zero_for_never_accessed() {
        assert_eq!(access_boost(0), 0.0);
    }

    #[test]
    fn access_boost_increases_with_access_count_but_caps_at_point_one() {
        let low = access_boost(1);
        let high = access_boost(1000);
        assert!(high > low);
        assert!(high <= 0.1001);
    }

    #[test]
    fn episodic_decay_starts_near_one_and_shrinks_with_age() {
        let fresh = episodic_decay(0.0, 14.0, 0);
        let old = episodic_decay(60.0, 14.0, 0);
        assert!(fresh > old);
        assert!(fresh > 0.99);
    }

    #[test]
    fn episodic_decay_is_bumped_by_access() {
        let no_access = episodic_decay(30.0, 14.0, 0);
        let with_access = episodic_decay(30.0, 14.0, 10);
        assert!(with_access > no_access);
    }

    #[test]
    fn adaptive_weights_shift_toward_vector_when_lexical_is_weak() {
        let (wl, wv) = adaptive_weights(true, &[0.01, 0.02], &[0.9, 0.8]);
        assert!(wv > wl);
    }

    #[test]
    fn adaptive_weights_shift_toward_lexical_when_vector_is_weak() {
        let (wl, wv) = adaptive_weights(false, &[0.9, 0.8], &[0.01, 0.02]);
        assert!(wl > wv);
    }

    #[test]
    fn adaptive_weights_default_to_even_split_otherwise() {
        let (wl, wv) = adaptive_weights(true, &[0.5], &[0.5]);
        assert!((wl - 0.5).abs() < 0.001);
        assert!((wv - 0.5).abs() < 0.001);
    }

    #[test]
    fn weighted_score_is_additive_across_components() {
        let score = weighted_score(Some(0.6), Some(0.4), 0.5, 0.5, 0.1, 0.05);
        assert!((score - (0.6 * 0.5 + 0.4 * 0.5 + 0.1 + 0.05)).abs() < 0.001);
    }
}
