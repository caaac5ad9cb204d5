//! Score history for trend detection

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use super::Trend;

/// Scores seen within the last `span`, capped at `capacity` entries
#[derive(Debug, Clone)]
pub struct ScoreWindow {
    scores: VecDeque<(Instant, f64)>,
    span: Duration,
    capacity: usize,
    /// Minimum move between oldest and newest score to count as a trend
    threshold: f64,
}

impl ScoreWindow {
    pub fn new(span: Duration, capacity: usize, threshold: f64) -> Self {
        Self {
            scores: VecDeque::new(),
            span,
            capacity: capacity.max(1),
            threshold,
        }
    }

    /// Record a score and return the trend across the window
    pub fn record(&mut self, score: f64) -> Trend {
        let now = Instant::now();
        self.scores.push_back((now, score));
        if let Some(cutoff) = now.checked_sub(self.span) {
            while self.scores.front().is_some_and(|(at, _)| *at < cutoff) {
                self.scores.pop_front();
            }
        }
        while self.scores.len() > self.capacity {
            self.scores.pop_front();
        }

        match (self.scores.front(), self.scores.back()) {
            (Some((_, oldest)), Some((_, newest))) => Trend::from_delta(newest - oldest, self.threshold),
            _ => Trend::Stable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rising_scores_improve() {
        let mut window = ScoreWindow::new(Duration::from_secs(60), 100, 0.05);
        assert_eq!(window.record(0.5), Trend::Stable);
        window.record(0.6);
        assert_eq!(window.record(0.8), Trend::Improving);
        assert_eq!(window.record(0.3), Trend::Degrading);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut window = ScoreWindow::new(Duration::from_secs(60), 3, 0.05);
        for score in [0.1, 0.2, 0.9, 0.9] {
            window.record(score);
        }
        assert_eq!(window.scores.len(), 3);
        // 0.1 and 0.2 are gone, so the window now runs 0.9 -> 0.1
        assert_eq!(window.record(0.1), Trend::Degrading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scores_outside_span_are_dropped() {
        let mut window = ScoreWindow::new(Duration::from_secs(10), 100, 0.05);
        window.record(0.9);
        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(window.record(0.3), Trend::Stable);
        assert_eq!(window.scores.len(), 1);
    }
}
