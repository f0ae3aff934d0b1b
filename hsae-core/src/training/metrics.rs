//! Training metrics tracking.

use serde::{Deserialize, Serialize};

/// Per-epoch history of one training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs_completed: usize,
    pub loss_history: Vec<f64>,
    pub val_loss_history: Vec<f64>,
    pub learning_rates: Vec<f64>,
    pub best_epoch: Option<usize>,
    pub best_loss: Option<f64>,
    pub total_training_time_secs: f64,
}

impl TrainingMetrics {
    /// Record a finished epoch. The best epoch is judged on the validation
    /// loss when there is one.
    pub fn record_epoch(&mut self, loss: f64, val_loss: Option<f64>, learning_rate: f64) {
        self.loss_history.push(loss);
        if let Some(vl) = val_loss {
            self.val_loss_history.push(vl);
        }
        self.learning_rates.push(learning_rate);
        self.epochs_completed += 1;

        let check_loss = val_loss.unwrap_or(loss);
        if self.best_loss.is_none_or(|best| check_loss < best) {
            self.best_loss = Some(check_loss);
            self.best_epoch = Some(self.epochs_completed);
        }
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.loss_history.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_metrics() {
        let mut metrics = TrainingMetrics::default();
        metrics.record_epoch(0.5, Some(0.6), 1e-3);
        metrics.record_epoch(0.3, Some(0.4), 1e-3);
        metrics.record_epoch(0.2, Some(0.45), 5e-4);
        assert_eq!(metrics.epochs_completed, 3);
        assert_eq!(metrics.best_epoch, Some(2));
        assert_eq!(metrics.best_loss, Some(0.4));
        assert_eq!(metrics.last_loss(), Some(0.2));
        assert_eq!(metrics.learning_rates, vec![1e-3, 1e-3, 5e-4]);
    }

    #[test]
    fn test_best_uses_training_loss_without_validation() {
        let mut metrics = TrainingMetrics::default();
        metrics.record_epoch(0.5, None, 0.1);
        metrics.record_epoch(0.7, None, 0.1);
        assert_eq!(metrics.best_epoch, Some(1));
        assert!(metrics.val_loss_history.is_empty());
    }
}
