//! Adaptive sizing engine
//!
//! Samples pool load, predicts the near-term trend from moving averages,
//! and emits scale-up / scale-down / maintain decisions. Emergency
//! conditions (load spike, response anomaly, deep waiter backlog) bypass
//! the cooldown gate so the pool can react inside one sampling window.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const HISTORY_CAPACITY: usize = 300;
const THROUGHPUT_CAPACITY: usize = 60;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Kind of sizing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingDecision {
    ScaleUp,
    ScaleDown,
    Maintain,
    Emergency,
}

/// Load forecast produced from the score history
#[derive(Debug, Clone)]
pub struct LoadPrediction {
    /// Predicted load in [0, 100]
    pub predicted_load: f64,
    /// Prediction confidence in [0, 1]
    pub confidence: f64,
    /// Trend direction in [-1, 1]
    pub trend_direction: f64,
    /// Projected response time under the predicted load
    pub predicted_response_time_ms: f64,
    /// Connection count recommended for the predicted load
    pub recommended_capacity: usize,
}

/// Outcome of one sizing cycle
#[derive(Debug, Clone)]
pub struct SizingDecision {
    pub decision: ScalingDecision,
    pub target_size: usize,
    pub confidence: f64,
    /// Load score computed for this sample, in [0, 100]
    pub load_score: f64,
}

/// One observation of the pool, taken under the pool lock
#[derive(Debug, Clone, Copy)]
pub struct PoolSample {
    pub active: usize,
    pub idle: usize,
    pub waiting: usize,
    /// Success rate in percent
    pub success_rate: f64,
    /// Mean wait over the last few requests, in milliseconds
    pub recent_average_wait_ms: f64,
    pub total_served: u64,
}

/// Diagnostic view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub load_history_len: usize,
    pub response_history_len: usize,
    pub last_decision: ScalingDecision,
    pub consecutive_decisions: u32,
    pub seconds_since_last_scaling: u64,
}

pub struct AdaptiveEngine {
    min_connections: usize,
    max_connections: usize,
    cooldown: Duration,
    state: Mutex<EngineState>,
}

struct EngineState {
    load_history: VecDeque<f64>,
    response_history: VecDeque<f64>,
    connection_history: VecDeque<usize>,
    throughput_history: VecDeque<f64>,
    last_scaling_at: Instant,
    last_decision: ScalingDecision,
    consecutive_decisions: u32,
    last_total_served: u64,
    last_sample_at: Option<Instant>,
}

impl AdaptiveEngine {
    pub fn new(min_connections: usize, max_connections: usize) -> Self {
        Self::with_cooldown(min_connections, max_connections, DEFAULT_COOLDOWN)
    }

    pub fn with_cooldown(
        min_connections: usize,
        max_connections: usize,
        cooldown: Duration,
    ) -> Self {
        Self {
            min_connections,
            max_connections,
            cooldown,
            state: Mutex::new(EngineState {
                load_history: VecDeque::with_capacity(HISTORY_CAPACITY),
                response_history: VecDeque::with_capacity(HISTORY_CAPACITY),
                connection_history: VecDeque::with_capacity(HISTORY_CAPACITY),
                throughput_history: VecDeque::with_capacity(THROUGHPUT_CAPACITY),
                last_scaling_at: Instant::now(),
                last_decision: ScalingDecision::Maintain,
                consecutive_decisions: 0,
                last_total_served: 0,
                last_sample_at: None,
            }),
        }
    }

    /// Feed one sample and emit a decision. Updates every history under a
    /// single engine lock.
    pub fn analyze(&self, sample: &PoolSample) -> SizingDecision {
        let mut state = self.state.lock();

        let load_score = self.load_score(sample);
        push_bounded(&mut state.load_history, load_score, HISTORY_CAPACITY);
        push_bounded(
            &mut state.response_history,
            sample.recent_average_wait_ms,
            HISTORY_CAPACITY,
        );
        push_bounded(
            &mut state.connection_history,
            sample.active + sample.idle,
            HISTORY_CAPACITY,
        );
        self.update_throughput(&mut state, sample);

        let prediction = self.predict(&state);
        let performance_trend = performance_trend(&state.response_history);
        let anomaly = anomaly_score(&state.response_history);

        let decision = self.make_decision(&state, sample, &prediction, performance_trend, anomaly);

        if state.last_decision == decision.decision {
            state.consecutive_decisions += 1;
        } else {
            state.consecutive_decisions = 1;
        }
        state.last_decision = decision.decision;
        if decision.decision != ScalingDecision::Maintain {
            state.last_scaling_at = Instant::now();
        }

        tracing::debug!(
            decision = ?decision.decision,
            target = decision.target_size,
            confidence = decision.confidence,
            load_score,
            "sizing cycle complete"
        );

        decision
    }

    /// Current load forecast, without recording a sample
    pub fn prediction(&self) -> LoadPrediction {
        self.predict(&self.state.lock())
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.state.lock();
        EngineStatus {
            load_history_len: state.load_history.len(),
            response_history_len: state.response_history.len(),
            last_decision: state.last_decision,
            consecutive_decisions: state.consecutive_decisions,
            seconds_since_last_scaling: state.last_scaling_at.elapsed().as_secs(),
        }
    }

    /// Weighted load score in [0, 100]: active ratio 0.4, queue pressure
    /// 0.3, response time 0.2, error rate 0.1.
    fn load_score(&self, sample: &PoolSample) -> f64 {
        let total = (sample.active + sample.idle).max(1);
        let active_score = sample.active as f64 / total as f64 * 100.0;
        let queue_score = (sample.waiting as f64 * 20.0).min(100.0);
        let response_score = (sample.recent_average_wait_ms / 50.0 * 100.0).min(100.0);
        let error_score = ((100.0 - sample.success_rate) * 5.0).min(100.0);

        let score = active_score * 0.4 + queue_score * 0.3 + response_score * 0.2 + error_score * 0.1;
        score.clamp(0.0, 100.0)
    }

    fn predict(&self, state: &EngineState) -> LoadPrediction {
        if state.load_history.len() < 5 {
            return LoadPrediction {
                predicted_load: 50.0,
                confidence: 0.1,
                trend_direction: 0.0,
                predicted_response_time_ms: 0.0,
                recommended_capacity: self.min_connections,
            };
        }

        let recent: Vec<f64> = tail(&state.load_history, 30);
        let short_ma = mean(&recent[recent.len().saturating_sub(5)..]);
        let long_ma = mean(&recent[recent.len().saturating_sub(15)..]);

        let trend = if long_ma > 0.0 {
            ((short_ma - long_ma) / long_ma).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let predicted_load = (short_ma * (1.0 + trend * 0.2)).clamp(0.0, 100.0);

        let load_variance = variance(&recent);
        let confidence = (1.0 - load_variance / 1000.0).max(0.1);

        LoadPrediction {
            predicted_load,
            confidence,
            trend_direction: trend,
            predicted_response_time_ms: self.predict_response_time(state, predicted_load),
            recommended_capacity: self.optimal_capacity(predicted_load),
        }
    }

    /// Response time grows gently with load, then exponentially past 80%
    fn predict_response_time(&self, state: &EngineState, predicted_load: f64) -> f64 {
        if state.response_history.is_empty() {
            return 0.0;
        }

        let base = mean(&tail(&state.response_history, 10));
        let load_factor = predicted_load / 100.0;

        let multiplier = if load_factor > 0.8 {
            ((load_factor - 0.8) * 3.0).exp()
        } else {
            1.0 + load_factor * 0.5
        };

        base * multiplier
    }

    fn optimal_capacity(&self, predicted_load: f64) -> usize {
        let base = (predicted_load / 100.0 * self.max_connections as f64).ceil();

        let buffer_factor = if predicted_load > 70.0 {
            1.3
        } else if predicted_load > 50.0 {
            1.2
        } else {
            1.1
        };

        let capacity = (base * buffer_factor).ceil() as usize;
        capacity.clamp(self.min_connections, self.max_connections)
    }

    fn make_decision(
        &self,
        state: &EngineState,
        sample: &PoolSample,
        prediction: &LoadPrediction,
        performance_trend: f64,
        anomaly: f64,
    ) -> SizingDecision {
        let current = sample.active + sample.idle;
        let load_score = *state.load_history.back().unwrap_or(&0.0);

        // Emergency path bypasses the cooldown entirely.
        if prediction.predicted_load > 90.0 || anomaly >= 0.8 || sample.waiting > 5 {
            let surge = current + (current as f64 * 0.5).ceil() as usize;
            return SizingDecision {
                decision: ScalingDecision::Emergency,
                target_size: surge.clamp(self.min_connections, self.max_connections),
                confidence: 0.9,
                load_score,
            };
        }

        if state.last_scaling_at.elapsed() < self.cooldown {
            return SizingDecision {
                decision: ScalingDecision::Maintain,
                target_size: current,
                confidence: 0.5,
                load_score,
            };
        }

        let recommended = prediction.recommended_capacity;
        let relative_diff = if current > 0 {
            (recommended as f64 - current as f64) / current as f64
        } else {
            0.0
        };

        let decision_score = prediction.predicted_load / 100.0 * 0.4
            + (-performance_trend).max(0.0) * 0.3
            + anomaly * 0.2
            + relative_diff.max(0.0) * 0.1;

        if decision_score > 0.7 && recommended > current {
            SizingDecision {
                decision: ScalingDecision::ScaleUp,
                target_size: recommended.min(self.max_connections),
                confidence: prediction.confidence * 0.8,
                load_score,
            }
        } else if decision_score < 0.3 && recommended < current {
            SizingDecision {
                decision: ScalingDecision::ScaleDown,
                target_size: recommended.max(self.min_connections),
                confidence: prediction.confidence * 0.6,
                load_score,
            }
        } else {
            SizingDecision {
                decision: ScalingDecision::Maintain,
                target_size: current,
                confidence: 0.5,
                load_score,
            }
        }
    }

    /// Throughput is the delta of total-served over the wall-clock window
    /// between two samples, never a buffer length.
    fn update_throughput(&self, state: &mut EngineState, sample: &PoolSample) {
        let now = Instant::now();
        if let Some(last_at) = state.last_sample_at {
            let elapsed = now.duration_since(last_at).as_secs_f64();
            if elapsed > 0.0 {
                let delta = sample.total_served.saturating_sub(state.last_total_served);
                push_bounded(
                    &mut state.throughput_history,
                    delta as f64 / elapsed,
                    THROUGHPUT_CAPACITY,
                );
            }
        }
        state.last_total_served = sample.total_served;
        state.last_sample_at = Some(now);
    }
}

/// Performance trend in [-1, 1]; negative means response times are rising
fn performance_trend(response_history: &VecDeque<f64>) -> f64 {
    if response_history.len() < 10 {
        return 0.0;
    }

    let recent = tail(response_history, 10);
    let earlier: Vec<f64> = if response_history.len() >= 20 {
        let items: Vec<f64> = response_history.iter().copied().collect();
        items[items.len() - 20..items.len() - 10].to_vec()
    } else {
        recent.clone()
    };

    let recent_avg = mean(&recent);
    let earlier_avg = mean(&earlier);
    if earlier_avg == 0.0 {
        return 0.0;
    }

    ((earlier_avg - recent_avg) / earlier_avg).clamp(-1.0, 1.0)
}

/// |z-score| of the recent response-time mean against history, clamped to [0, 1]
fn anomaly_score(response_history: &VecDeque<f64>) -> f64 {
    if response_history.len() < 20 {
        return 0.0;
    }

    let items: Vec<f64> = response_history.iter().copied().collect();
    let (historical, recent) = items.split_at(items.len() - 10);

    let historical_mean = mean(historical);
    let historical_std = variance(historical).sqrt();
    if historical_std == 0.0 {
        return 0.0;
    }

    let z = ((mean(recent) - historical_mean) / historical_std).abs();
    z.clamp(0.0, 1.0)
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, value: T, capacity: usize) {
    if buffer.len() == capacity {
        buffer.pop_front();
    }
    buffer.push_back(value);
}

fn tail(buffer: &VecDeque<f64>, n: usize) -> Vec<f64> {
    buffer.iter().copied().skip(buffer.len().saturating_sub(n)).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance; zero for fewer than two values
fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(active: usize, idle: usize, waiting: usize, wait_ms: f64) -> PoolSample {
        PoolSample {
            active,
            idle,
            waiting,
            success_rate: 100.0,
            recent_average_wait_ms: wait_ms,
            total_served: 0,
        }
    }

    #[test]
    fn load_score_weights_components() {
        let engine = AdaptiveEngine::new(2, 20);

        // Fully active, no queue, no waits, no errors: 100 * 0.4.
        let score = engine.load_score(&sample(10, 0, 0, 0.0));
        assert!((score - 40.0).abs() < 1e-9);

        // Saturated on every axis clamps to 100.
        let score = engine.load_score(&PoolSample {
            active: 10,
            idle: 0,
            waiting: 10,
            success_rate: 0.0,
            recent_average_wait_ms: 1000.0,
            total_served: 0,
        });
        assert!((score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn short_history_gives_low_confidence_default() {
        let engine = AdaptiveEngine::new(2, 20);
        engine.analyze(&sample(1, 1, 0, 1.0));

        let prediction = engine.prediction();
        assert!((prediction.predicted_load - 50.0).abs() < 1e-9);
        assert!((prediction.confidence - 0.1).abs() < 1e-9);
        assert_eq!(prediction.recommended_capacity, 2);
    }

    #[test]
    fn stable_history_predicts_near_mean() {
        let engine = AdaptiveEngine::new(2, 20);
        for _ in 0..30 {
            engine.analyze(&sample(6, 4, 0, 10.0));
        }

        let prediction = engine.prediction();
        // Constant load: trend ~0, prediction near the score itself.
        assert!(prediction.trend_direction.abs() < 1e-6);
        assert!(prediction.confidence > 0.9);
        assert!((prediction.predicted_load - engine.load_score(&sample(6, 4, 0, 10.0))).abs() < 1.0);
    }

    #[test]
    fn deep_backlog_triggers_emergency() {
        let engine = AdaptiveEngine::new(2, 20);
        let decision = engine.analyze(&sample(10, 0, 8, 40.0));

        assert_eq!(decision.decision, ScalingDecision::Emergency);
        // current 10, surge +ceil(10 * 0.5) = 15
        assert_eq!(decision.target_size, 15);
        assert!((decision.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn emergency_target_respects_max() {
        let engine = AdaptiveEngine::new(2, 12);
        let decision = engine.analyze(&sample(10, 0, 8, 40.0));
        assert_eq!(decision.target_size, 12);
    }

    #[test]
    fn cooldown_gates_normal_decisions() {
        let engine = AdaptiveEngine::new(2, 20);
        // Warm the history without tripping the emergency path.
        for _ in 0..10 {
            let d = engine.analyze(&sample(2, 8, 0, 1.0));
            assert_ne!(d.decision, ScalingDecision::Emergency);
        }

        // Cooldown clock starts at engine construction, so within the first
        // 30 seconds everything non-emergency is Maintain.
        let decision = engine.analyze(&sample(9, 1, 2, 30.0));
        assert_eq!(decision.decision, ScalingDecision::Maintain);
    }

    #[test]
    fn quiet_pool_scales_down_after_cooldown() {
        let engine = AdaptiveEngine::with_cooldown(2, 20, Duration::ZERO);
        let mut last = None;
        for _ in 0..30 {
            last = Some(engine.analyze(&sample(0, 10, 0, 0.0)));
        }

        let decision = last.unwrap();
        assert_eq!(decision.decision, ScalingDecision::ScaleDown);
        assert!(decision.target_size < 10);
        assert!(decision.target_size >= 2);
    }

    #[test]
    fn degrading_pool_scales_up_after_cooldown() {
        let engine = AdaptiveEngine::with_cooldown(2, 20, Duration::ZERO);

        // Noisy baseline, then a sustained slowdown with the pool fully
        // active. The noise keeps the anomaly below the emergency bar while
        // the rising waits drive the performance trend negative.
        for i in 0..20 {
            let wait = if i % 2 == 0 { 0.0 } else { 60.0 };
            engine.analyze(&sample(4, 6, 0, wait));
        }

        let mut last = None;
        for _ in 0..10 {
            last = Some(engine.analyze(&PoolSample {
                active: 8,
                idle: 0,
                waiting: 3,
                success_rate: 95.0,
                recent_average_wait_ms: 45.0,
                total_served: 0,
            }));
        }

        let decision = last.unwrap();
        assert_eq!(decision.decision, ScalingDecision::ScaleUp);
        assert!(decision.target_size > 8);
        assert!(decision.target_size <= 20);
    }

    #[test]
    fn recommended_capacity_buffers_by_load() {
        let engine = AdaptiveEngine::new(2, 20);
        // load 80 -> base ceil(16), buffer 1.3 -> 21 -> clamp 20
        assert_eq!(engine.optimal_capacity(80.0), 20);
        // load 30 -> base 6, buffer 1.1 -> 7
        assert_eq!(engine.optimal_capacity(30.0), 7);
        // floor at min
        assert_eq!(engine.optimal_capacity(0.0), 2);
    }

    #[test]
    fn throughput_uses_served_delta() {
        let engine = AdaptiveEngine::new(2, 20);
        let mut s = sample(1, 1, 0, 1.0);
        engine.analyze(&s);

        std::thread::sleep(Duration::from_millis(20));
        s.total_served = 100;
        engine.analyze(&s);

        let state = engine.state.lock();
        let tput = *state.throughput_history.back().unwrap();
        assert!(tput > 0.0);
        assert_eq!(state.last_total_served, 100);
    }

    #[test]
    fn consecutive_decisions_are_counted() {
        let engine = AdaptiveEngine::new(2, 20);
        for _ in 0..3 {
            engine.analyze(&sample(1, 1, 0, 1.0));
        }

        let status = engine.status();
        assert_eq!(status.last_decision, ScalingDecision::Maintain);
        assert_eq!(status.consecutive_decisions, 3);
    }

    #[test]
    fn anomaly_detects_shifted_recent_mean() {
        let mut history = VecDeque::new();
        for _ in 0..20 {
            history.push_back(10.0);
        }
        // Flat history has zero stdev: no signal.
        assert_eq!(anomaly_score(&history), 0.0);

        let mut history = VecDeque::new();
        for i in 0..20 {
            history.push_back(if i % 2 == 0 { 9.0 } else { 11.0 });
        }
        for _ in 0..10 {
            history.push_back(100.0);
        }
        assert!((anomaly_score(&history) - 1.0).abs() < 1e-9);
    }
}
