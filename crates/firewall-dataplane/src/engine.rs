//! Run drivers
//!
//! Build the shared state, seed the rules, start the worker threads, let
//! them run for the configured wall-clock duration, then stop and account
//! for every packet.

use crate::config::FirewallConfig;
use crate::error::{FirewallError, FirewallResult};
use crate::firewall::Firewall;
use crate::packet::PacketSource;
use crate::pipeline::Topology;
use crate::serial::SerialWorker;
use crate::stats::{PipelineStats, StatsSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::info;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One thread, no queues
    Serial,
    /// Dispatcher, head workers and cache-miss workers
    Pipelined,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Serial => write!(f, "serial"),
            RunMode::Pipelined => write!(f, "pipelined"),
        }
    }
}

/// Outcome of one timed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub total_processed: u64,
    pub admitted: u64,
    pub dropped: u64,
    pub abandoned: u64,
    pub elapsed_ms: u64,
    pub histogram_total: u64,
    /// Full counter set (pipelined runs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<StatsSnapshot>,
}

impl RunReport {
    /// Completed packets per millisecond
    pub fn throughput_per_ms(&self) -> f64 {
        if self.elapsed_ms == 0 { return 0.0; }
        self.total_processed as f64 / self.elapsed_ms as f64
    }
}

fn spawn<T, F>(name: String, f: F) -> FirewallResult<JoinHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(f)
        .map_err(|e| FirewallError::SpawnFailed(e.to_string()))
}

fn join<T>(handle: JoinHandle<T>) -> FirewallResult<T> {
    let name = handle.thread().name().unwrap_or("worker").to_string();
    handle
        .join()
        .map_err(|_| FirewallError::WorkerPanicked(name))
}

/// Raise `done` and wait for every already started thread
fn abort<T>(done: &AtomicBool, handles: Vec<JoinHandle<T>>) {
    done.store(true, Ordering::Release);
    for handle in handles {
        let _ = handle.join();
    }
}

fn prepare<S: PacketSource>(config: &FirewallConfig, source: &mut S) -> FirewallResult<Arc<Firewall>> {
    config.validate()?;
    let firewall = Arc::new(Firewall::new(&config.tables));
    firewall.warm_up(source, config.traffic.warm_up_count());
    Ok(firewall)
}

/// Run the single-threaded baseline
pub fn run_serial<S>(config: &FirewallConfig, mut source: S) -> FirewallResult<RunReport>
where
    S: PacketSource + 'static,
{
    let firewall = prepare(config, &mut source)?;
    let done = Arc::new(AtomicBool::new(false));
    let duration = Duration::from_millis(config.pipeline.duration_ms);

    info!(duration_ms = config.pipeline.duration_ms, "serial run starting");

    let worker = SerialWorker::new(source, firewall.clone(), done.clone());
    let started = Instant::now();
    let handle = spawn("firewall-serial".into(), move || worker.run())?;

    thread::sleep(duration);
    done.store(true, Ordering::Release);
    let tally = join(handle)?;
    let elapsed = started.elapsed();

    let report = RunReport {
        mode: RunMode::Serial,
        total_processed: tally.processed,
        admitted: tally.admitted,
        dropped: 0,
        abandoned: 0,
        elapsed_ms: elapsed.as_millis() as u64,
        histogram_total: firewall.histogram().total(),
        pipeline: None,
    };
    info!(
        processed = report.total_processed,
        elapsed_ms = report.elapsed_ms,
        throughput = report.throughput_per_ms(),
        "serial run finished"
    );
    Ok(report)
}

/// Run the three-stage pipeline
pub fn run_pipelined<S>(config: &FirewallConfig, mut source: S) -> FirewallResult<RunReport>
where
    S: PacketSource + 'static,
{
    let firewall = prepare(config, &mut source)?;
    let stats = Arc::new(PipelineStats::new());
    let done = Arc::new(AtomicBool::new(false));
    let duration = Duration::from_millis(config.pipeline.duration_ms);

    let topology = Topology::build(
        &config.pipeline,
        source,
        firewall.clone(),
        stats.clone(),
        done.clone(),
    );

    info!(
        head_workers = config.pipeline.head_workers,
        cache_miss_workers = config.pipeline.cache_miss_workers,
        queue_capacity = config.pipeline.queue_capacity,
        in_flight_budget = config.pipeline.in_flight_budget,
        duration_ms = config.pipeline.duration_ms,
        "pipelined run starting"
    );

    // Downstream stages first so nothing backs up before its consumer exists
    let mut miss_handles = Vec::with_capacity(topology.misses.len());
    for (id, worker) in topology.misses.into_iter().enumerate() {
        match spawn(format!("firewall-miss-{}", id), move || worker.run()) {
            Ok(handle) => miss_handles.push(handle),
            Err(e) => {
                abort(&done, miss_handles);
                return Err(e);
            }
        }
    }

    let mut head_handles = Vec::with_capacity(topology.heads.len());
    for (id, worker) in topology.heads.into_iter().enumerate() {
        match spawn(format!("firewall-head-{}", id), move || worker.run()) {
            Ok(handle) => head_handles.push(handle),
            Err(e) => {
                abort(&done, head_handles);
                abort(&done, miss_handles);
                return Err(e);
            }
        }
    }

    let started = Instant::now();
    let dispatcher = topology.dispatcher;
    let dispatch_handle = match spawn("firewall-dispatch".into(), move || dispatcher.run()) {
        Ok(handle) => handle,
        Err(e) => {
            abort(&done, head_handles);
            abort(&done, miss_handles);
            return Err(e);
        }
    };

    thread::sleep(duration);
    done.store(true, Ordering::Release);

    join(dispatch_handle)?;
    let mut heads = Vec::with_capacity(head_handles.len());
    for handle in head_handles {
        heads.push(join(handle)?);
    }
    let mut misses = Vec::with_capacity(miss_handles.len());
    for handle in miss_handles {
        misses.push(join(handle)?);
    }
    let elapsed = started.elapsed();

    // Packets still sitting in rings never complete
    let residue: u64 = heads.iter_mut().map(|h| h.drain_residue()).sum::<u64>()
        + misses.iter_mut().map(|w| w.drain_residue()).sum::<u64>();

    let snapshot = stats.snapshot();
    debug_assert!(snapshot.is_balanced(), "unbalanced accounting: {:?}", snapshot);

    let report = RunReport {
        mode: RunMode::Pipelined,
        total_processed: snapshot.processed,
        admitted: snapshot.admitted,
        dropped: snapshot.dropped,
        abandoned: snapshot.abandoned,
        elapsed_ms: elapsed.as_millis() as u64,
        histogram_total: firewall.histogram().total(),
        pipeline: Some(snapshot),
    };
    info!(
        processed = report.total_processed,
        dispatched = snapshot.dispatched,
        residue,
        elapsed_ms = report.elapsed_ms,
        throughput = report.throughput_per_ms(),
        "pipelined run finished"
    );
    Ok(report)
}

/// Run in the given mode
pub fn run<S>(mode: RunMode, config: &FirewallConfig, source: S) -> FirewallResult<RunReport>
where
    S: PacketSource + 'static,
{
    match mode {
        RunMode::Serial => run_serial(config, source),
        RunMode::Pipelined => run_pipelined(config, source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, TrafficConfig};
    use crate::traffic::TrafficGenerator;

    fn quick_config() -> FirewallConfig {
        FirewallConfig {
            pipeline: PipelineConfig {
                head_workers: 3,
                cache_miss_workers: 2,
                queue_capacity: 8,
                in_flight_budget: 32,
                duration_ms: 100,
            },
            traffic: TrafficConfig {
                address_log: 5,
                trains_log: 3,
                mean_work: 50.0,
                seed: 7,
                ..TrafficConfig::default()
            },
            ..FirewallConfig::default()
        }
    }

    #[test]
    fn test_serial_run() {
        let config = quick_config();
        let report = run_serial(&config, TrafficGenerator::new(config.traffic.clone())).unwrap();

        assert_eq!(report.mode, RunMode::Serial);
        assert!(report.total_processed > 0);
        assert!(report.admitted <= report.total_processed);
        assert_eq!(report.histogram_total, report.admitted);
        assert!(report.elapsed_ms >= 100);
        assert!(report.pipeline.is_none());
    }

    #[test]
    fn test_pipelined_run_conserves_packets() {
        let config = quick_config();
        let report = run_pipelined(&config, TrafficGenerator::new(config.traffic.clone())).unwrap();

        let snap = report.pipeline.unwrap();
        assert!(report.total_processed > 0);
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.dispatched, snap.processed + snap.dropped + snap.abandoned);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.histogram_total, report.admitted);
        assert!(snap.cache_hits + snap.cache_misses > 0);
    }

    #[test]
    fn test_invalid_config_rejected_before_spawn() {
        let mut config = quick_config();
        config.pipeline.head_workers = 0;
        let err = run(RunMode::Pipelined, &config, TrafficGenerator::new(config.traffic.clone())).unwrap_err();
        assert!(matches!(err, FirewallError::Config(_)));
    }

    #[test]
    fn test_report_json_shape() {
        let report = RunReport {
            mode: RunMode::Serial,
            total_processed: 500,
            admitted: 400,
            dropped: 0,
            abandoned: 0,
            elapsed_ms: 250,
            histogram_total: 400,
            pipeline: None,
        };
        assert!((report.throughput_per_ms() - 2.0).abs() < 1e-9);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["mode"], "serial");
        assert!(json.get("pipeline").is_none());
    }
}
