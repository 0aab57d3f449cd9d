use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use meter_metrics::Record;

/// Samples host and process statistics as gauges.
///
/// Every sample contains `TotalMemory`, `FreeMemory` and `UsedMemory`, one
/// `CPUutilization<N>` gauge per logical CPU (numbered from 1), `ProcessResidentMemory` and
/// `ProcessVirtualMemory` of the agent itself and a `RandomValue` in `[0, 1)`.
#[derive(Debug)]
pub struct SystemSampler {
    system: System,
    pid: Option<Pid>,
}

impl SystemSampler {
    /// Creates a sampler for the current process.
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|error| meter_log::warn!("process metrics unavailable: {error}"))
            .ok();

        let mut system = System::new();
        // CPU usage is computed between two refreshes, prime the first one.
        system.refresh_cpu_usage();

        Self { system, pid }
    }

    /// Refreshes the statistics and returns the current gauges.
    pub fn sample(&mut self) -> Vec<Record> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut values = vec![
            ("TotalMemory".to_owned(), self.system.total_memory() as f64),
            ("FreeMemory".to_owned(), self.system.free_memory() as f64),
            ("UsedMemory".to_owned(), self.system.used_memory() as f64),
        ];

        for (index, cpu) in self.system.cpus().iter().enumerate() {
            values.push((
                format!("CPUutilization{}", index + 1),
                f64::from(cpu.cpu_usage()),
            ));
        }

        if let Some(pid) = self.pid {
            self.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_memory(),
            );

            if let Some(process) = self.system.process(pid) {
                values.push(("ProcessResidentMemory".to_owned(), process.memory() as f64));
                values.push((
                    "ProcessVirtualMemory".to_owned(),
                    process.virtual_memory() as f64,
                ));
            }
        }

        values.push(("RandomValue".to_owned(), rand::random::<f64>()));

        values
            .into_iter()
            .filter_map(|(name, value)| match Record::gauge(&name, value) {
                Ok(record) => Some(record),
                Err(error) => {
                    meter_log::debug!("skipping sample {name}: {error}");
                    None
                }
            })
            .collect()
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}
