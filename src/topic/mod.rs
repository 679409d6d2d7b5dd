// src/topic/mod.rs
// Adaptive topic-shift detection. Pure and I/O-free: callers
// persist samples and decisions through `crate::db::topic_state`.

use crate::config::file::TopicDetectionConfig;

/// Cosine distance between two embeddings, in `[0, 2]` (0 = identical
/// direction). A zero-length vector has no defined direction; rather than
/// propagate a `0/0` NaN, it is treated as distance 0 from anything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine_similarity = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    1.0 - cosine_similarity
}

/// Rolling EWMA state tracking the mean and variance of recent
/// observation-to-observation distances, from which an adaptive threshold
/// τ' = clip(μ' + kσ', [τ_min, τ_max]) is derived.
#[derive(Debug, Clone)]
pub struct EwmaState {
    pub mean: f64,
    pub variance: f64,
    alpha: f64,
    tau_min: f64,
    tau_max: f64,
    initialized: bool,
}

impl EwmaState {
    pub fn new(config: &TopicDetectionConfig) -> Self {
        Self {
            mean: config.tau0,
            variance: 0.0,
            alpha: config.ewma_alpha,
            tau_min: config.tau_min,
            tau_max: config.tau_max,
            initialized: false,
        }
    }

    /// Seed from the project's own recent history
    /// rather than starting every session from the global default.
    pub fn seed(mut self, mean: f64, variance: f64) -> Self {
        self.mean = mean;
        self.variance = variance;
        self.initialized = true;
        self
    }

    pub fn update(&mut self, distance: f64) {
        if !self.initialized {
            self.mean = distance;
            self.variance = 0.0;
            self.initialized = true;
            return;
        }
        let delta = distance - self.mean;
        self.mean += self.alpha * delta;
        let residual = distance - self.mean;
        self.variance = self.alpha * residual * residual + (1.0 - self.alpha) * self.variance;
    }

    pub fn threshold(&self, k: f64) -> f64 {
        let raw = self.mean + k * self.variance.sqrt();
        raw.clamp(self.tau_min, self.tau_max)
    }
}

#[derive(Debug, Clone)]
pub struct ShiftDecision {
    pub distance: f64,
    pub threshold: f64,
    pub shifted: bool,
    /// How far past the threshold the distance fell, normalized so 0.5 is
    /// right at the boundary and 1.0 is far beyond it.
    pub confidence: f64,
}

/// Stateful per-session detector. One instance lives for the lifetime of a
/// session; its final `EwmaState` is persisted as the next session's seed.
pub struct Detector {
    state: EwmaState,
    k: f64,
    manual_threshold: Option<f64>,
    enabled: bool,
}

impl Detector {
    pub fn new(config: &TopicDetectionConfig, seed: Option<(f64, f64)>) -> Self {
        let mut state = EwmaState::new(config);
        if let Some((mean, variance)) = seed {
            state = state.seed(mean, variance);
        }
        Self {
            state,
            k: config.k(),
            manual_threshold: config.manual_threshold,
            enabled: config.enabled,
        }
    }

    pub fn state(&self) -> &EwmaState {
        &self.state
    }

    /// Evaluate a new distance and update internal state. Returns `None`
    /// when detection is disabled outright.
    pub fn observe(&mut self, distance: f64) -> Option<ShiftDecision> {
        if !self.enabled {
            return None;
        }
        let threshold = self.manual_threshold.unwrap_or_else(|| self.state.threshold(self.k));
        let shifted = distance > threshold;
        let confidence = if threshold > 0.0 {
            ((distance - threshold) / threshold).clamp(0.0, 1.0)
        } else {
            0.5
        };
        self.state.update(distance);
        Some(ShiftDecision {
            distance,
            threshold,
            shifted,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TopicDetectionConfig {
        TopicDetectionConfig {
            enabled: true,
            sensitivity: crate::config::file::Sensitivity::Balanced,
            multiplier: None,
            manual_threshold: None,
            ewma_alpha: 0.3,
            tau_min: 0.15,
            tau_max: 0.6,
            tau0: 0.3,
        }
    }

    #[test]
    fn cosine_distance_is_zero_for_identical_vectors() {
        let v = vec![1.0, 0.0, 0.0];
        assert!(cosine_distance(&v, &v).abs() < 1e-9);
    }

    #[test]
    fn cosine_distance_handles_zero_vectors() {
        let zero = vec![0.0, 0.0];
        let v = vec![1.0, 0.0];
        assert_eq!(cosine_distance(&zero, &v), 0.0);
    }

    #[test]
    fn steady_state_does_not_trigger_shift() {
        let mut detector = Detector::new(&config(), None);
        let mut last_shifted = false;
        for _ in 0..10 {
            last_shifted = detector.observe(0.1).unwrap().shifted;
        }
        assert!(!last_shifted);
    }

    #[test]
    fn sudden_jump_triggers_shift() {
        let mut detector = Detector::new(&config(), None);
        for _ in 0..5 {
            detector.observe(0.1);
        }
        let decision = detector.observe(0.8).unwrap();
        assert!(decision.shifted);
    }

    #[test]
    fn manual_threshold_overrides_adaptive_one() {
        let mut cfg = config();
        cfg.manual_threshold = Some(0.05);
        let mut detector = Detector::new(&cfg, None);
        let decision = detector.observe(0.1).unwrap();
        assert!(decision.shifted);
        assert_eq!(decision.threshold, 0.05);
    }

    #[test]
    fn seeded_state_is_used_instead_of_tau0() {
        let detector = Detector::new(&config(), Some((0.4, 0.02)));
        assert_eq!(detector.state().mean, 0.4);
    }
}
