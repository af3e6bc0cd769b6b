// resources.rs — CPU and memory sampling.

use std::sync::Mutex;

use serde::Serialize;
use sysinfo::{Pid, System};

use crate::error::AlertConditionError;
use crate::health::{CheckMode, ComponentStatus, HealthStatus, Threshold};
use crate::probe::HealthProbe;

/// One resource measurement. The classified figures are for this process;
/// host-wide figures ride along for context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    /// CPU used by this process, percent of the whole machine.
    pub cpu_percent: f64,
    /// Resident memory of this process as a share of system memory, percent.
    pub memory_percent: f64,
    /// Resident memory of this process, bytes.
    pub process_memory_bytes: u64,
    pub system_cpu_percent: f64,
    pub system_memory_percent: f64,
}

/// Source of resource samples; swapped out in tests.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> Result<ResourceSample, AlertConditionError>;
}

/// Samples the hosting process through `sysinfo`.
///
/// CPU usage is computed between consecutive refreshes, so the first
/// sample after construction reads low.
pub struct SysinfoSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        let pid = sysinfo::get_current_pid().ok();
        if let Some(pid) = pid {
            system.refresh_process(pid);
        }
        Self {
            system: Mutex::new(system),
            pid,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> Result<ResourceSample, AlertConditionError> {
        let fail = |detail: &str| AlertConditionError::new("resources", detail);
        let pid = self.pid.ok_or_else(|| fail("current process id unavailable"))?;
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_cpu();
        system.refresh_memory();
        if !system.refresh_process(pid) {
            return Err(fail("hosting process not found"));
        }

        let total = system.total_memory();
        if total == 0 {
            return Err(fail("system reported zero total memory"));
        }
        let process = system
            .process(pid)
            .ok_or_else(|| fail("hosting process not found"))?;
        // Per-process usage is summed over cores.
        let cores = system.cpus().len().max(1) as f64;
        let cpu_percent = f64::from(process.cpu_usage()) / cores;
        let process_memory_bytes = process.memory();

        Ok(ResourceSample {
            cpu_percent,
            memory_percent: process_memory_bytes as f64 / total as f64 * 100.0,
            process_memory_bytes,
            system_cpu_percent: f64::from(system.global_cpu_info().cpu_usage()),
            system_memory_percent: system.used_memory() as f64 / total as f64 * 100.0,
        })
    }
}

/// Classifies CPU and memory against their thresholds.
pub struct ResourceProbe {
    sampler: Box<dyn ResourceSampler>,
    cpu: Threshold,
    memory: Threshold,
}

impl ResourceProbe {
    pub fn new(sampler: Box<dyn ResourceSampler>, cpu: Threshold, memory: Threshold) -> Self {
        Self {
            sampler,
            cpu,
            memory,
        }
    }
}

impl HealthProbe for ResourceProbe {
    fn name(&self) -> &str {
        "resources"
    }

    fn runs_in(&self, mode: CheckMode) -> bool {
        mode == CheckMode::Full
    }

    fn check(&self) -> Result<ComponentStatus, AlertConditionError> {
        let s = self.sampler.sample()?;
        let detail = format!(
            "process cpu {:.1}%, rss {} KiB ({:.1}% of memory); host cpu {:.1}%, memory {:.1}%",
            s.cpu_percent,
            s.process_memory_bytes / 1024,
            s.memory_percent,
            s.system_cpu_percent,
            s.system_memory_percent
        );

        let cpu = self.cpu.classify(s.cpu_percent);
        let memory = self.memory.classify(s.memory_percent);
        // Worse of the two; memory wins ties.
        let (status, signature) = if memory >= cpu {
            (memory, "memory_high")
        } else {
            (cpu, "cpu_high")
        };
        Ok(match status {
            HealthStatus::Healthy => ComponentStatus::healthy(detail),
            HealthStatus::Degraded => ComponentStatus::degraded(signature, detail),
            HealthStatus::Unhealthy => ComponentStatus::unhealthy(signature, detail),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<ResourceSample, AlertConditionError>);

    impl ResourceSampler for Fixed {
        fn sample(&self) -> Result<ResourceSample, AlertConditionError> {
            self.0.clone()
        }
    }

    fn probe(cpu: f64, memory: f64) -> ResourceProbe {
        ResourceProbe::new(
            Box::new(Fixed(Ok(ResourceSample {
                cpu_percent: cpu,
                memory_percent: memory,
                process_memory_bytes: 4096,
                system_cpu_percent: 99.0,
                system_memory_percent: 99.0,
            }))),
            Threshold::new(80.0, 95.0),
            Threshold::new(85.0, 95.0),
        )
    }

    #[test]
    fn quiet_host_is_healthy() {
        assert_eq!(probe(10.0, 40.0).check().unwrap().status, HealthStatus::Healthy);
    }

    #[test]
    fn cpu_breach_is_named() {
        let status = probe(97.0, 40.0).check().unwrap();
        assert_eq!(status.status, HealthStatus::Unhealthy);
        assert_eq!(status.signature.as_deref(), Some("cpu_high"));
    }

    #[test]
    fn memory_breach_is_named() {
        let status = probe(10.0, 90.0).check().unwrap();
        assert_eq!(status.status, HealthStatus::Degraded);
        assert_eq!(status.signature.as_deref(), Some("memory_high"));
    }

    #[test]
    fn sampler_failure_propagates() {
        let probe = ResourceProbe::new(
            Box::new(Fixed(Err(AlertConditionError::new("resources", "boom")))),
            Threshold::new(80.0, 95.0),
            Threshold::new(85.0, 95.0),
        );
        assert!(probe.check().is_err());
    }

    #[test]
    fn only_full_mode() {
        let p = probe(0.0, 0.0);
        assert!(p.runs_in(CheckMode::Full));
        assert!(!p.runs_in(CheckMode::Quick));
    }

    #[test]
    fn busy_host_does_not_breach_a_quiet_process() {
        assert_eq!(probe(5.0, 2.0).check().unwrap().status, HealthStatus::Healthy);
    }

    #[test]
    fn sysinfo_sampler_measures_this_process() {
        let sample = SysinfoSampler::new().sample().unwrap();
        assert!(sample.process_memory_bytes > 0);
        assert!(sample.memory_percent > 0.0 && sample.memory_percent < 100.0);
        assert!(sample.memory_percent <= sample.system_memory_percent);
        assert!(sample.cpu_percent >= 0.0 && sample.cpu_percent <= 100.0 + 1e-6);
    }
}
