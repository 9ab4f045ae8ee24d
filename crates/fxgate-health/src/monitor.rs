//! Rolling per-LP health state.

use chrono::Utc;
use dashmap::DashMap;
use fxgate_core::LpId;
use fxgate_telemetry::metrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

const LATENCY_WINDOW: usize = 256;

/// Health monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// EWMA half-life in seconds.
    #[serde(default = "default_half_life_secs")]
    pub half_life_secs: f64,
    /// Reports required before the score leaves its neutral 0.5.
    #[serde(default = "default_warmup_reports")]
    pub warmup_reports: u64,
    /// Scores below this mark the LP degraded.
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: f64,
    /// Slippage that zeroes the slippage component (pips).
    #[serde(default = "default_slippage_full_pips")]
    pub slippage_full_pips: f64,
    /// Latency that zeroes the latency component (ms).
    #[serde(default = "default_latency_full_ms")]
    pub latency_full_ms: f64,
}

fn default_half_life_secs() -> f64 {
    300.0
}

fn default_warmup_reports() -> u64 {
    20
}

fn default_degraded_threshold() -> f64 {
    0.25
}

fn default_slippage_full_pips() -> f64 {
    0.5
}

fn default_latency_full_ms() -> f64 {
    1_000.0
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            half_life_secs: default_half_life_secs(),
            warmup_reports: default_warmup_reports(),
            degraded_threshold: default_degraded_threshold(),
            slippage_full_pips: default_slippage_full_pips(),
            latency_full_ms: default_latency_full_ms(),
        }
    }
}

/// Outcome of one ExecutionReport, as the monitor sees it.
#[derive(Debug, Clone, Copy)]
pub enum ReportOutcome {
    /// Fill (full or partial): slippage vs the quoted price, round-trip
    /// latency.
    Fill {
        slippage_pips: f64,
        latency_ms: f64,
    },
    /// Order rejected by the LP.
    Reject { latency_ms: f64 },
    /// Cancel confirmation; affects latency only.
    Cancel { latency_ms: f64 },
}

/// Published health snapshot for one LP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LpHealth {
    pub lp_id: LpId,
    pub fill_rate: f64,
    pub avg_slippage_pips: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub reject_rate: f64,
    pub score: f64,
    pub degraded: bool,
    pub reports: u64,
    pub last_update_ms: i64,
}

/// Time-decayed EWMA: samples lose half their weight every half-life.
#[derive(Debug, Clone, Copy)]
struct Ewma {
    value: f64,
    last_ms: i64,
    initialized: bool,
}

impl Ewma {
    fn new() -> Self {
        Self {
            value: 0.0,
            last_ms: 0,
            initialized: false,
        }
    }

    fn update(&mut self, sample: f64, now_ms: i64, half_life_secs: f64) {
        if !self.initialized {
            self.value = sample;
            self.last_ms = now_ms;
            self.initialized = true;
            return;
        }
        // Irregular-interval EWMA; dt floored so bursts still move it.
        let dt_secs = ((now_ms - self.last_ms).max(100)) as f64 / 1_000.0;
        let decay = (-std::f64::consts::LN_2 * dt_secs / half_life_secs).exp();
        self.value = decay * self.value + (1.0 - decay) * sample;
        self.last_ms = now_ms;
    }

    fn get(&self) -> f64 {
        self.value
    }
}

struct LpState {
    fill_rate: Ewma,
    slippage_pips: Ewma,
    latency_ms: Ewma,
    reject_rate: Ewma,
    latency_window: VecDeque<f64>,
    reports: u64,
    last_update_ms: i64,
}

impl LpState {
    fn new() -> Self {
        Self {
            fill_rate: Ewma::new(),
            slippage_pips: Ewma::new(),
            latency_ms: Ewma::new(),
            reject_rate: Ewma::new(),
            latency_window: VecDeque::with_capacity(LATENCY_WINDOW),
            reports: 0,
            last_update_ms: 0,
        }
    }

    fn push_latency(&mut self, latency_ms: f64) {
        if self.latency_window.len() == LATENCY_WINDOW {
            self.latency_window.pop_front();
        }
        self.latency_window.push_back(latency_ms);
    }

    fn latency_quantile(&self, q: f64) -> f64 {
        if self.latency_window.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.latency_window.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn score(&self, config: &HealthConfig) -> f64 {
        if self.reports < config.warmup_reports {
            return 0.5;
        }
        let fill = self.fill_rate.get().clamp(0.0, 1.0);
        let slip = 1.0 - (self.slippage_pips.get() / config.slippage_full_pips).clamp(0.0, 1.0);
        let lat = 1.0 - (self.latency_ms.get() / config.latency_full_ms).clamp(0.0, 1.0);
        let rej = 1.0 - self.reject_rate.get().clamp(0.0, 1.0);
        0.40 * fill + 0.30 * slip + 0.20 * lat + 0.10 * rej
    }
}

/// Health monitor over all LPs.
pub struct HealthMonitor {
    config: HealthConfig,
    states: DashMap<LpId, RwLock<LpState>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    /// Feed one report outcome at the current wall clock.
    pub fn record(&self, lp_id: &LpId, outcome: ReportOutcome) {
        self.record_at(lp_id, outcome, Utc::now().timestamp_millis());
    }

    /// Feed one report outcome with an explicit clock (testable).
    pub fn record_at(&self, lp_id: &LpId, outcome: ReportOutcome, now_ms: i64) {
        let entry = self
            .states
            .entry(lp_id.clone())
            .or_insert_with(|| RwLock::new(LpState::new()));
        let mut state = entry.write();
        let hl = self.config.half_life_secs;

        match outcome {
            ReportOutcome::Fill {
                slippage_pips,
                latency_ms,
            } => {
                state.fill_rate.update(1.0, now_ms, hl);
                state.reject_rate.update(0.0, now_ms, hl);
                state.slippage_pips.update(slippage_pips.abs(), now_ms, hl);
                state.latency_ms.update(latency_ms, now_ms, hl);
                state.push_latency(latency_ms);
            }
            ReportOutcome::Reject { latency_ms } => {
                state.fill_rate.update(0.0, now_ms, hl);
                state.reject_rate.update(1.0, now_ms, hl);
                state.latency_ms.update(latency_ms, now_ms, hl);
                state.push_latency(latency_ms);
            }
            ReportOutcome::Cancel { latency_ms } => {
                state.latency_ms.update(latency_ms, now_ms, hl);
                state.push_latency(latency_ms);
            }
        }
        state.reports += 1;
        state.last_update_ms = now_ms;

        let score = state.score(&self.config);
        metrics::LP_HEALTH_SCORE
            .with_label_values(&[lp_id.as_str()])
            .set(score);
        if score < self.config.degraded_threshold {
            warn!(lp_id = %lp_id, score, "LP degraded");
        }
    }

    /// Reset an LP's window after reconnect: it restarts at the neutral
    /// 0.5 until enough reports land.
    pub fn on_reconnect(&self, lp_id: &LpId) {
        if let Some(entry) = self.states.get(lp_id) {
            let mut state = entry.write();
            *state = LpState::new();
            debug!(lp_id = %lp_id, "LP health reset after reconnect");
        }
    }

    /// Composite score; unknown LPs get the neutral 0.5.
    pub fn score(&self, lp_id: &LpId) -> f64 {
        self.states
            .get(lp_id)
            .map(|e| e.read().score(&self.config))
            .unwrap_or(0.5)
    }

    pub fn is_degraded(&self, lp_id: &LpId) -> bool {
        self.score(lp_id) < self.config.degraded_threshold
    }

    /// Median latency, for the SOR's final tie-break.
    pub fn p50_latency_ms(&self, lp_id: &LpId) -> f64 {
        self.states
            .get(lp_id)
            .map(|e| e.read().latency_quantile(0.50))
            .unwrap_or(0.0)
    }

    pub fn health(&self, lp_id: &LpId) -> Option<LpHealth> {
        self.states.get(lp_id).map(|e| {
            let state = e.read();
            LpHealth {
                lp_id: lp_id.clone(),
                fill_rate: state.fill_rate.get(),
                avg_slippage_pips: state.slippage_pips.get(),
                p50_latency_ms: state.latency_quantile(0.50),
                p95_latency_ms: state.latency_quantile(0.95),
                reject_rate: state.reject_rate.get(),
                score: state.score(&self.config),
                degraded: state.score(&self.config) < self.config.degraded_threshold,
                reports: state.reports,
                last_update_ms: state.last_update_ms,
            }
        })
    }

    pub fn all(&self) -> Vec<LpHealth> {
        self.states
            .iter()
            .filter_map(|e| self.health(e.key()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lp() -> LpId {
        LpId::from("LP_A")
    }

    fn fill(slip: f64, lat: f64) -> ReportOutcome {
        ReportOutcome::Fill {
            slippage_pips: slip,
            latency_ms: lat,
        }
    }

    #[test]
    fn test_warmup_holds_neutral_score() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        for i in 0..19 {
            monitor.record_at(&lp(), fill(0.0, 10.0), 1_000 + i);
            assert_eq!(monitor.score(&lp()), 0.5, "still warming up at {i}");
        }
        monitor.record_at(&lp(), fill(0.0, 10.0), 1_100);
        assert!(monitor.score(&lp()) > 0.9, "perfect LP scores high");
    }

    #[test]
    fn test_unknown_lp_neutral() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        assert_eq!(monitor.score(&lp()), 0.5);
        assert!(!monitor.is_degraded(&lp()));
    }

    #[test]
    fn test_bad_lp_degrades() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        // Mostly rejects; the rare fill arrives slow and wide. Samples are
        // spread over many half-lives so the window tracks the mix.
        let mut now = 1_000;
        for i in 0..40 {
            let outcome = if i % 10 == 0 {
                fill(0.6, 1_200.0)
            } else {
                ReportOutcome::Reject {
                    latency_ms: 1_200.0,
                }
            };
            monitor.record_at(&lp(), outcome, now);
            now += 60_000;
        }
        let score = monitor.score(&lp());
        assert!(score < 0.25, "bad LP must be degraded, got {score}");
        assert!(monitor.is_degraded(&lp()));
    }

    #[test]
    fn test_reconnect_resets_to_warmup() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        let mut now = 1_000;
        for _ in 0..30 {
            monitor.record_at(&lp(), fill(0.0, 10.0), now);
            now += 1_000;
        }
        assert!(monitor.score(&lp()) > 0.9);

        monitor.on_reconnect(&lp());
        assert_eq!(monitor.score(&lp()), 0.5);
    }

    #[test]
    fn test_latency_quantiles() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        let mut now = 1_000;
        for i in 1..=100 {
            monitor.record_at(&lp(), fill(0.0, f64::from(i)), now);
            now += 100;
        }
        let health = monitor.health(&lp()).unwrap();
        assert!((health.p50_latency_ms - 50.0).abs() <= 2.0);
        assert!(health.p95_latency_ms >= 94.0);
    }

    #[test]
    fn test_score_weights_sum() {
        // A mediocre-everything LP lands mid-scale, not at an extreme.
        let config = HealthConfig::default();
        let monitor = HealthMonitor::new(config);
        let mut now = 1_000;
        for i in 0..40 {
            let outcome = if i % 2 == 0 {
                fill(0.25, 500.0)
            } else {
                ReportOutcome::Reject { latency_ms: 500.0 }
            };
            monitor.record_at(&lp(), outcome, now);
            now += 1_000;
        }
        let score = monitor.score(&lp());
        assert!(score > 0.2 && score < 0.8, "got {score}");
    }
}
