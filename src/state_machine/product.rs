use super::state::Action;
use crate::capture::CaptureLabel;

/// Watches the product tag for a rising zero crossing (cleaning cycle finished).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductDetector {
    last_value: Option<f64>,
    initialized: bool,
}

impl ProductDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a product-change capture when `value >= 0` follows a negative value.
    /// The first value after start or [`reset`](Self::reset) is only a baseline.
    pub fn on_product(&mut self, value: f64) -> Option<Action> {
        let previous = self.last_value.replace(value);
        if !self.initialized {
            self.initialized = true;
            tracing::debug!(value, "product baseline established");
            return None;
        }

        match previous {
            Some(prev) if prev < 0.0 && value >= 0.0 => {
                tracing::info!(prev, value, "product change detected");
                Some(Action::Capture(CaptureLabel::ProductChange))
            }
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(values: &[f64]) -> usize {
        let mut detector = ProductDetector::new();
        values
            .iter()
            .filter_map(|&v| detector.on_product(v))
            .count()
    }

    #[test]
    fn rising_zero_crossing_triggers_once() {
        assert_eq!(feed(&[-1.0, -1.0, 2.0]), 1);
    }

    #[test]
    fn staying_negative_never_triggers() {
        assert_eq!(feed(&[-1.0, -2.0, -1.0]), 0);
    }

    #[test]
    fn first_value_is_baseline_only() {
        assert_eq!(feed(&[2.0]), 0);
        assert_eq!(feed(&[0.0, 5.0]), 0);
        assert_eq!(feed(&[-1.0, 0.0]), 1);
    }

    #[test]
    fn falling_edge_does_not_trigger() {
        assert_eq!(feed(&[-1.0, 3.0, -4.0, -2.0]), 1);
    }

    #[test]
    fn trigger_uses_cip_label() {
        let mut detector = ProductDetector::new();
        detector.on_product(-1.0);
        assert_eq!(
            detector.on_product(1.0),
            Some(Action::Capture(CaptureLabel::ProductChange))
        );
    }

    #[test]
    fn reset_restores_baseline_rule() {
        let mut detector = ProductDetector::new();
        detector.on_product(-1.0);
        detector.reset();
        // Would be a crossing, but it is a new baseline.
        assert_eq!(detector.on_product(2.0), None);
        assert_eq!(detector.on_product(-1.0), None);
        assert!(detector.on_product(0.0).is_some());
    }
}
