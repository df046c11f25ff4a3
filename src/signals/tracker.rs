// Performance tracker for signal emissions
// Brackets every emission, aggregates per signal type and keeps a recent-activity ring

use crate::config::TrackerConfig;
use crate::storage::RingBuffer;
use crate::utility::current_timestamp_ms;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::TypeId;
use std::collections::HashMap;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Handle returned by `begin_emission`, consumed by `end_emission`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmissionToken(u64);

impl EmissionToken {
    /// Returned while tracking is disabled; `end_emission` ignores it
    pub const DISABLED: EmissionToken = EmissionToken(0);

    pub fn is_tracked(&self) -> bool {
        self.0 != 0
    }
}

/// Aggregate statistics for one signal type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalStats {
    pub signal_name: String,
    pub emission_count: u64,
    pub total_time_ms: f64,
    pub min_time_ms: f64,
    pub max_time_ms: f64,
    pub total_subscribers: u64,
    pub slow_emissions: u64,
}

impl SignalStats {
    fn new(signal_name: &str) -> Self {
        Self {
            signal_name: signal_name.to_string(),
            emission_count: 0,
            total_time_ms: 0.0,
            min_time_ms: f64::MAX,
            max_time_ms: 0.0,
            total_subscribers: 0,
            slow_emissions: 0,
        }
    }

    fn record(&mut self, elapsed_ms: f64, subscribers: usize, slow: bool) {
        self.emission_count += 1;
        self.total_time_ms += elapsed_ms;
        self.min_time_ms = self.min_time_ms.min(elapsed_ms);
        self.max_time_ms = self.max_time_ms.max(elapsed_ms);
        self.total_subscribers += subscribers as u64;
        if slow {
            self.slow_emissions += 1;
        }
    }

    pub fn average_time_ms(&self) -> f64 {
        if self.emission_count == 0 {
            0.0
        } else {
            self.total_time_ms / self.emission_count as f64
        }
    }

    pub fn average_subscribers(&self) -> f64 {
        if self.emission_count == 0 {
            0.0
        } else {
            self.total_subscribers as f64 / self.emission_count as f64
        }
    }
}

/// One completed emission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmissionRecord {
    pub id: u64,
    pub signal_name: String,
    pub elapsed_ms: f64,
    pub subscriber_count: usize,
    pub frame: u64,
    pub timestamp_ms: u64,
    /// `file:line` of the emit call, when origin capture is on
    pub call_origin: Option<String>,
    pub slow: bool,
}

/// In-flight emission
struct ActiveEmission {
    started: Instant,
    frame: u64,
    timestamp_ms: u64,
    call_origin: Option<String>,
}

struct TrackerState {
    stats: HashMap<TypeId, SignalStats>,
    active: HashMap<u64, ActiveEmission>,
    recent: RingBuffer<EmissionRecord>,
    next_token: u64,
    total_emitted: u64,
    slow_emitted: u64,
    frame: u64,
}

#[derive(Serialize)]
struct TrackerSnapshot<'a> {
    total_signals_emitted: u64,
    slow_signals: u64,
    frame: u64,
    stats: Vec<SignalStats>,
    recent: Vec<&'a EmissionRecord>,
}

/// Emission instrumentation shared by every channel of a bus
pub struct PerformanceTracker {
    enabled: AtomicBool,
    capture_call_origin: AtomicBool,
    config: TrackerConfig,
    state: Mutex<TrackerState>,
}

impl PerformanceTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let state = TrackerState {
            stats: HashMap::new(),
            active: HashMap::new(),
            recent: RingBuffer::new(config.max_recent_signals),
            next_token: 0,
            total_emitted: 0,
            slow_emitted: 0,
            frame: 0,
        };
        Self {
            enabled: AtomicBool::new(true),
            capture_call_origin: AtomicBool::new(config.capture_call_origin),
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_capture_call_origin(&self, capture: bool) {
        self.capture_call_origin.store(capture, Ordering::Relaxed);
    }

    /// Start timing an emission
    pub fn begin_emission(&self, origin: Option<&'static Location<'static>>) -> EmissionToken {
        if !self.is_enabled() {
            return EmissionToken::DISABLED;
        }

        let call_origin = if self.capture_call_origin.load(Ordering::Relaxed) {
            origin.map(|loc| format!("{}:{}", loc.file(), loc.line()))
        } else {
            None
        };

        let mut state = self.state.lock();
        state.next_token += 1;
        let id = state.next_token;
        let frame = state.frame;
        state.active.insert(
            id,
            ActiveEmission {
                started: Instant::now(),
                frame,
                timestamp_ms: current_timestamp_ms(),
                call_origin,
            },
        );
        EmissionToken(id)
    }

    /// Finish timing an emission and fold it into the aggregates
    pub fn end_emission(
        &self,
        token: EmissionToken,
        signal_type: TypeId,
        signal_name: &str,
        subscriber_count: usize,
    ) {
        if !token.is_tracked() {
            return;
        }

        let mut state = self.state.lock();
        // Missing after a reset() that raced the emission
        let Some(active) = state.active.remove(&token.0) else {
            return;
        };

        let elapsed_ms = active.started.elapsed().as_secs_f64() * 1000.0;
        let slow = elapsed_ms > self.config.slow_signal_threshold_ms;

        state
            .stats
            .entry(signal_type)
            .or_insert_with(|| SignalStats::new(signal_name))
            .record(elapsed_ms, subscriber_count, slow);
        state.total_emitted += 1;
        if slow {
            state.slow_emitted += 1;
        }

        let record = EmissionRecord {
            id: token.0,
            signal_name: signal_name.to_string(),
            elapsed_ms,
            subscriber_count,
            frame: active.frame,
            timestamp_ms: active.timestamp_ms,
            call_origin: active.call_origin,
            slow,
        };
        state.recent.push(record);
        drop(state);

        if slow {
            tracing::warn!(
                signal = signal_name,
                elapsed_ms,
                subscribers = subscriber_count,
                "slow signal emission ({:.3} ms > {:.3} ms)",
                elapsed_ms,
                self.config.slow_signal_threshold_ms
            );
        }
    }

    /// Bump the frame counter stamped onto new emissions
    pub fn advance_frame(&self) -> u64 {
        let mut state = self.state.lock();
        state.frame += 1;
        state.frame
    }

    pub fn frame(&self) -> u64 {
        self.state.lock().frame
    }

    /// Clear every aggregate, record and in-flight emission. The frame counter
    /// keeps running so frame stamps stay monotonic across resets.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.stats.clear();
        state.active.clear();
        state.recent.clear();
        state.total_emitted = 0;
        state.slow_emitted = 0;
        tracing::debug!("signal performance tracker reset");
    }

    pub fn total_signals_emitted(&self) -> u64 {
        self.state.lock().total_emitted
    }

    pub fn slow_signals(&self) -> u64 {
        self.state.lock().slow_emitted
    }

    pub fn stats_for<S: 'static>(&self) -> Option<SignalStats> {
        self.stats_for_type(TypeId::of::<S>())
    }

    pub fn stats_for_type(&self, signal_type: TypeId) -> Option<SignalStats> {
        self.state.lock().stats.get(&signal_type).cloned()
    }

    /// Per-type stats, most frequent first, then slowest average first
    pub fn all_stats(&self) -> Vec<SignalStats> {
        let state = self.state.lock();
        sorted_stats(&state.stats)
    }

    /// Recent emissions, oldest first
    pub fn recent(&self) -> Vec<EmissionRecord> {
        self.state.lock().recent.to_vec()
    }

    /// Human-readable summary. `detailed` appends the most recent emissions.
    pub fn generate_report(&self, detailed: bool) -> String {
        let state = self.state.lock();
        let stats = sorted_stats(&state.stats);

        let mut report = String::new();
        report.push_str("=== Signal Performance Report ===\n");
        report.push_str(&format!("Total signals emitted: {}\n", state.total_emitted));
        report.push_str(&format!("Unique signal types: {}\n", stats.len()));
        report.push_str(&format!(
            "Slow emissions (> {:.3} ms): {}\n",
            self.config.slow_signal_threshold_ms, state.slow_emitted
        ));

        if !stats.is_empty() {
            report.push_str("\n--- Per-signal statistics ---\n");
            for entry in &stats {
                report.push_str(&format!("• {}:\n", entry.signal_name));
                report.push_str(&format!("  - Emissions: {}\n", entry.emission_count));
                report.push_str(&format!(
                    "  - Avg time: {:.3} ms (min {:.3}, max {:.3})\n",
                    entry.average_time_ms(),
                    entry.min_time_ms,
                    entry.max_time_ms
                ));
                report.push_str(&format!(
                    "  - Subscribers per emission: {:.1}\n",
                    entry.average_subscribers()
                ));
                if entry.slow_emissions > 0 {
                    report.push_str(&format!("  - Slow emissions: {}\n", entry.slow_emissions));
                }
            }
        }

        let last = if detailed {
            state.recent.last_n(self.config.report_recent_count)
        } else {
            Vec::new()
        };
        if !last.is_empty() {
            report.push_str(&format!("\n--- Last {} signals ---\n", last.len()));
            for record in last.iter().rev() {
                report.push_str(&format!(
                    "• {}: {:.3} ms, {} subscribers [frame {}]",
                    record.signal_name, record.elapsed_ms, record.subscriber_count, record.frame
                ));
                if let Some(origin) = &record.call_origin {
                    report.push_str(&format!(" from {}", origin));
                }
                report.push('\n');
            }
        }

        report
    }

    /// JSON snapshot of totals, per-type stats and the recent ring
    pub fn export_json(&self) -> serde_json::Result<String> {
        let state = self.state.lock();
        let snapshot = TrackerSnapshot {
            total_signals_emitted: state.total_emitted,
            slow_signals: state.slow_emitted,
            frame: state.frame,
            stats: sorted_stats(&state.stats),
            recent: state.recent.iter().collect(),
        };
        serde_json::to_string_pretty(&snapshot)
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

fn sorted_stats(stats: &HashMap<TypeId, SignalStats>) -> Vec<SignalStats> {
    let mut sorted: Vec<SignalStats> = stats.values().cloned().collect();
    sorted.sort_by(|a, b| {
        b.emission_count
            .cmp(&a.emission_count)
            .then_with(|| b.average_time_ms().total_cmp(&a.average_time_ms()))
    });
    sorted
}
