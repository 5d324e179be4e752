//! Training metrics for monitoring GAN progress
//!
//! Provides structures for tracking and logging training progress.

use std::path::Path;

/// Moving-average magnitude above which the losses are considered divergent
const DIVERGENCE_THRESHOLD: f64 = 1e3;

/// Metrics collected during training
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingMetrics {
    /// Generator losses per epoch
    pub gen_losses: Vec<f64>,
    /// Critic (discriminator) losses per epoch
    pub critic_losses: Vec<f64>,
    /// Estimated Wasserstein distance per epoch
    pub wasserstein_estimates: Vec<f64>,
    /// Total generator iterations at the end of each epoch
    pub gen_iterations: Vec<usize>,
}

impl TrainingMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record epoch metrics
    pub fn record_epoch(
        &mut self,
        gen_loss: f64,
        critic_loss: f64,
        wasserstein: f64,
        gen_iterations: usize,
    ) {
        self.gen_losses.push(gen_loss);
        self.critic_losses.push(critic_loss);
        self.wasserstein_estimates.push(wasserstein);
        self.gen_iterations.push(gen_iterations);
    }

    /// Get number of recorded epochs
    pub fn num_epochs(&self) -> usize {
        self.gen_losses.len()
    }

    /// Get latest generator loss
    pub fn latest_gen_loss(&self) -> Option<f64> {
        self.gen_losses.last().copied()
    }

    /// Get latest critic loss
    pub fn latest_critic_loss(&self) -> Option<f64> {
        self.critic_losses.last().copied()
    }

    /// Get latest Wasserstein estimate
    pub fn latest_wasserstein(&self) -> Option<f64> {
        self.wasserstein_estimates.last().copied()
    }

    /// Calculate moving average of generator loss
    pub fn gen_loss_ma(&self, window: usize) -> f64 {
        moving_average(&self.gen_losses, window)
    }

    /// Calculate moving average of critic loss
    pub fn critic_loss_ma(&self, window: usize) -> f64 {
        moving_average(&self.critic_losses, window)
    }

    /// Calculate moving average of the Wasserstein estimate
    pub fn wasserstein_ma(&self, window: usize) -> f64 {
        moving_average(&self.wasserstein_estimates, window)
    }

    /// Check if training appears to have diverged
    ///
    /// Divergence indicators over the last `window` epochs:
    /// - Any loss is NaN or infinite
    /// - Critic or generator loss magnitude has blown up
    pub fn check_divergence(&self, window: usize) -> bool {
        if window == 0 || self.num_epochs() < window {
            return false;
        }

        let recent_non_finite = self
            .gen_losses
            .iter()
            .chain(self.critic_losses.iter())
            .rev()
            .take(2 * window)
            .any(|v| !v.is_finite());
        if recent_non_finite {
            return true;
        }

        self.critic_loss_ma(window).abs() > DIVERGENCE_THRESHOLD
            || self.gen_loss_ma(window).abs() > DIVERGENCE_THRESHOLD
    }

    /// Save metrics to CSV file
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        writer.write_record(["epoch", "gen_loss", "critic_loss", "wasserstein", "gen_iterations"])?;

        for i in 0..self.num_epochs() {
            writer.write_record([
                (i + 1).to_string(),
                self.gen_losses[i].to_string(),
                self.critic_losses[i].to_string(),
                self.wasserstein_estimates[i].to_string(),
                self.gen_iterations[i].to_string(),
            ])?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Load metrics from CSV file
    pub fn load_csv<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut metrics = Self::new();

        for result in reader.records() {
            let record = result?;
            metrics.gen_losses.push(record[1].parse()?);
            metrics.critic_losses.push(record[2].parse()?);
            metrics.wasserstein_estimates.push(record[3].parse()?);
            metrics.gen_iterations.push(record[4].parse()?);
        }

        Ok(metrics)
    }
}

/// Exponential moving average tracker
#[derive(Debug)]
pub struct EMATracker {
    value: f64,
    alpha: f64,
    initialized: bool,
}

impl EMATracker {
    /// Create new EMA tracker
    ///
    /// # Arguments
    ///
    /// * `alpha` - Smoothing factor (0 < alpha <= 1). Higher = more weight on recent
    pub fn new(alpha: f64) -> Self {
        Self {
            value: 0.0,
            alpha: alpha.clamp(0.001, 1.0),
            initialized: false,
        }
    }

    /// Update with new value
    pub fn update(&mut self, new_value: f64) {
        if !self.initialized {
            self.value = new_value;
            self.initialized = true;
        } else {
            self.value = self.alpha * new_value + (1.0 - self.alpha) * self.value;
        }
    }

    /// Get current EMA value
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Reset tracker
    pub fn reset(&mut self) {
        self.value = 0.0;
        self.initialized = false;
    }
}

/// Calculate moving average of last `window` values
fn moving_average(values: &[f64], window: usize) -> f64 {
    if values.is_empty() || window == 0 {
        return 0.0;
    }

    let n = window.min(values.len());
    let sum: f64 = values.iter().rev().take(n).sum();
    sum / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_training_metrics() {
        let mut metrics = TrainingMetrics::new();

        metrics.record_epoch(-0.2, -0.8, 0.8, 10);
        metrics.record_epoch(-0.1, -0.6, 0.6, 20);

        assert_eq!(metrics.num_epochs(), 2);
        assert_eq!(metrics.latest_gen_loss(), Some(-0.1));
        assert_eq!(metrics.latest_critic_loss(), Some(-0.6));
        assert_eq!(metrics.latest_wasserstein(), Some(0.6));
        assert!((metrics.wasserstein_ma(2) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_divergence_detection() {
        let mut metrics = TrainingMetrics::new();
        for i in 0..5 {
            metrics.record_epoch(0.1, -0.5, 0.5, i);
        }
        assert!(!metrics.check_divergence(3));
        assert!(!metrics.check_divergence(10));

        metrics.record_epoch(f64::NAN, -0.5, 0.5, 6);
        assert!(metrics.check_divergence(3));

        let mut exploding = TrainingMetrics::new();
        for i in 0..3 {
            exploding.record_epoch(1.0, -5e3, 5e3, i);
        }
        assert!(exploding.check_divergence(3));
    }

    #[test]
    fn test_csv_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.csv");

        let mut metrics = TrainingMetrics::new();
        metrics.record_epoch(-0.25, -1.5, 1.5, 125);
        metrics.record_epoch(-0.125, -1.0, 1.0, 250);
        metrics.save_csv(&path).unwrap();

        assert_eq!(TrainingMetrics::load_csv(&path).unwrap(), metrics);
    }

    #[test]
    fn test_ema_tracker() {
        let mut ema = EMATracker::new(0.5);

        ema.update(10.0);
        assert_eq!(ema.value(), 10.0);

        ema.update(20.0);
        assert_eq!(ema.value(), 15.0); // 0.5 * 20 + 0.5 * 10

        ema.reset();
        ema.update(4.0);
        assert_eq!(ema.value(), 4.0);
    }
}
