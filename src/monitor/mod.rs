//! Host resource-pressure sampling.
//!
//! Purely observational: samples host memory and CPU after each sweep pass
//! and logs a warning when either crosses its threshold. Nothing in the
//! registry depends on the result.

use parking_lot::Mutex;
use sysinfo::System;

use crate::config::MonitorConfig;
use crate::metrics::HostMetrics;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceThresholds {
    pub memory_percent: f32,
    pub cpu_percent: f32,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            memory_percent: 80.0,
            cpu_percent: 80.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    Memory,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub memory_percent: f32,
    pub cpu_percent: f32,
}

impl ResourceSample {
    /// Resources strictly above their threshold
    pub fn pressures(&self, thresholds: &ResourceThresholds) -> Vec<Pressure> {
        let mut pressures = Vec::new();
        if self.memory_percent > thresholds.memory_percent {
            pressures.push(Pressure::Memory);
        }
        if self.cpu_percent > thresholds.cpu_percent {
            pressures.push(Pressure::Cpu);
        }
        pressures
    }
}

pub struct ResourceMonitor {
    system: Mutex<System>,
    thresholds: ResourceThresholds,
}

impl ResourceMonitor {
    pub fn new(thresholds: ResourceThresholds) -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; prime the first reading
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            thresholds,
        }
    }

    /// Build from settings; `None` when monitoring is disabled
    pub fn from_config(config: &MonitorConfig) -> Option<Self> {
        config.enabled.then(|| {
            Self::new(ResourceThresholds {
                memory_percent: config.memory_warn_percent,
                cpu_percent: config.cpu_warn_percent,
            })
        })
    }

    pub fn thresholds(&self) -> &ResourceThresholds {
        &self.thresholds
    }

    pub fn sample(&self) -> ResourceSample {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu_usage();

        let total = system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (system.used_memory() as f64 / total as f64 * 100.0) as f32
        };

        ResourceSample {
            memory_percent,
            cpu_percent: system.global_cpu_usage(),
        }
    }

    /// Sample, log, and warn on pressure.
    pub fn check(&self, connections: usize) -> ResourceSample {
        let sample = self.sample();
        HostMetrics::set(sample.memory_percent, sample.cpu_percent);

        tracing::info!(
            connections = connections,
            memory_percent = format_args!("{:.1}", sample.memory_percent),
            cpu_percent = format_args!("{:.1}", sample.cpu_percent),
            "Resource usage"
        );

        for pressure in sample.pressures(&self.thresholds) {
            match pressure {
                Pressure::Memory => tracing::warn!(
                    memory_percent = format_args!("{:.1}", sample.memory_percent),
                    threshold = self.thresholds.memory_percent,
                    "High memory usage"
                ),
                Pressure::Cpu => tracing::warn!(
                    cpu_percent = format_args!("{:.1}", sample.cpu_percent),
                    threshold = self.thresholds.cpu_percent,
                    "High CPU usage"
                ),
            }
        }

        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressures_above_threshold_only() {
        let thresholds = ResourceThresholds::default();
        let calm = ResourceSample {
            memory_percent: 80.0,
            cpu_percent: 12.5,
        };
        let hot = ResourceSample {
            memory_percent: 91.0,
            cpu_percent: 85.0,
        };

        assert!(calm.pressures(&thresholds).is_empty());
        assert_eq!(hot.pressures(&thresholds), vec![Pressure::Memory, Pressure::Cpu]);
    }

    #[test]
    fn test_disabled_config_yields_no_monitor() {
        let config = MonitorConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(ResourceMonitor::from_config(&config).is_none());
    }

    #[test]
    fn test_sample_is_a_percentage() {
        let monitor = ResourceMonitor::new(ResourceThresholds::default());
        let sample = monitor.check(0);

        assert!((0.0..=100.0).contains(&sample.memory_percent));
        assert!(sample.cpu_percent >= 0.0);
    }
}
