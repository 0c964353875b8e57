//! Audio performance monitoring.

use tracing::{error, info, warn};

use crate::audio::device::DeviceState;
use crate::defaults;

/// Snapshot of the pipeline's devices and playback queue.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMetrics {
    pub input_sample_rate: Option<u32>,
    pub output_sample_rate: Option<u32>,
    pub input_latency: f64,
    pub output_latency: f64,
    pub input_state: Option<DeviceState>,
    pub output_state: Option<DeviceState>,
    pub pending_sources: usize,
    /// Rough estimate, 1 KB per pending source.
    pub estimated_memory_kb: usize,
    pub glitches: u32,
}

impl AudioMetrics {
    /// State of the first context present, input before output.
    pub fn context_state(&self) -> Option<DeviceState> {
        self.input_state.or(self.output_state)
    }

    /// Human-readable problems, empty when everything looks healthy.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.input_latency > defaults::LATENCY_WARN_SECS {
            warnings.push(format!(
                "High input latency: {:.1}ms",
                self.input_latency * 1000.0
            ));
        }
        if self.output_latency > defaults::LATENCY_WARN_SECS {
            warnings.push(format!(
                "High output latency: {:.1}ms",
                self.output_latency * 1000.0
            ));
        }
        if self.pending_sources > defaults::PENDING_SOURCES_WARN {
            warnings.push(format!(
                "High number of active sources: {}",
                self.pending_sources
            ));
        }
        if self.estimated_memory_kb > defaults::MEMORY_WARN_KB {
            warnings.push(format!(
                "High estimated memory usage: {}KB",
                self.estimated_memory_kb
            ));
        }
        match self.context_state() {
            Some(DeviceState::Running) => {}
            Some(state) => warnings.push(format!("Audio context not running: {state}")),
            None => warnings.push("Audio context not running: none".to_string()),
        }
        warnings
    }

    pub fn log_performance_warnings(&self) {
        for warning in self.warnings() {
            warn!("{}", warning);
        }
    }

    pub fn log_report(&self) {
        info!(
            input_latency_ms = self.input_latency * 1000.0,
            output_latency_ms = self.output_latency * 1000.0,
            input_rate = ?self.input_sample_rate,
            output_rate = ?self.output_sample_rate,
            state = ?self.context_state(),
            pending = self.pending_sources,
            memory_kb = self.estimated_memory_kb,
            glitches = self.glitches,
            "Audio performance report"
        );
    }
}

/// Counts gaps between consecutive audio chunks.
#[derive(Debug, Clone, Default)]
pub struct GlitchMonitor {
    glitch_count: u32,
    last_chunk_time: Option<f64>,
}

impl GlitchMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a chunk arriving at `now` (seconds). Returns true on a glitch.
    pub fn check(&mut self, now: f64) -> bool {
        let glitch = match self.last_chunk_time {
            Some(last) => {
                let gap = now - last;
                if gap > defaults::GLITCH_GAP_SECS {
                    self.glitch_count += 1;
                    warn!("Audio glitch detected: {:.0}ms gap", gap * 1000.0);
                    if self.glitch_count > defaults::GLITCH_ALERT_COUNT {
                        error!(
                            "Multiple audio glitches detected, consider increasing capture_buffer_size"
                        );
                    }
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        self.last_chunk_time = Some(now);
        glitch
    }

    pub fn glitch_count(&self) -> u32 {
        self.glitch_count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Capture buffer size suited to this machine.
pub fn optimal_buffer_size() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    buffer_size_for_cpus(cpus)
}

fn buffer_size_for_cpus(cpus: usize) -> usize {
    match cpus {
        0 | 1 => 1024,
        2 | 3 => 512,
        _ => 256,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> AudioMetrics {
        AudioMetrics {
            input_sample_rate: Some(16000),
            output_sample_rate: Some(24000),
            input_latency: 0.01,
            output_latency: 0.02,
            input_state: Some(DeviceState::Running),
            output_state: Some(DeviceState::Running),
            pending_sources: 2,
            estimated_memory_kb: 2048,
            glitches: 0,
        }
    }

    #[test]
    fn test_healthy_metrics_have_no_warnings() {
        assert!(healthy().warnings().is_empty());
    }

    #[test]
    fn test_each_threshold_warns() {
        let mut m = healthy();
        m.input_latency = 0.06;
        assert_eq!(m.warnings().len(), 1);

        let mut m = healthy();
        m.output_latency = 0.2;
        assert!(m.warnings()[0].contains("output latency"));

        let mut m = healthy();
        m.pending_sources = 11;
        assert!(m.warnings()[0].contains("active sources"));

        let mut m = healthy();
        m.estimated_memory_kb = 10241;
        assert!(m.warnings()[0].contains("memory"));

        let mut m = healthy();
        m.input_state = Some(DeviceState::Suspended);
        assert!(m.warnings()[0].contains("suspended"));
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let mut m = healthy();
        m.input_latency = 0.05;
        m.pending_sources = 10;
        m.estimated_memory_kb = 10240;
        assert!(m.warnings().is_empty());
    }

    #[test]
    fn test_context_state_prefers_input() {
        let mut m = healthy();
        m.input_state = None;
        m.output_state = Some(DeviceState::Closed);
        assert_eq!(m.context_state(), Some(DeviceState::Closed));
    }

    #[test]
    fn test_glitch_monitor_counts_gaps() {
        let mut monitor = GlitchMonitor::new();
        assert!(!monitor.check(1.0));
        assert!(!monitor.check(1.05));
        assert!(monitor.check(1.3));
        assert!(!monitor.check(1.35));
        assert_eq!(monitor.glitch_count(), 1);

        monitor.reset();
        assert_eq!(monitor.glitch_count(), 0);
        assert!(!monitor.check(10.0));
    }

    #[test]
    fn test_buffer_size_for_cpus() {
        assert_eq!(buffer_size_for_cpus(1), 1024);
        assert_eq!(buffer_size_for_cpus(2), 512);
        assert_eq!(buffer_size_for_cpus(8), 256);
        assert!([256, 512, 1024].contains(&optimal_buffer_size()));
    }
}
