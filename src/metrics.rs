use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use rcmgr::Limit;

use crate::error::Result;

const NAMESPACE: &str = "sp_executor";

/// Executor metrics, registered on a registry the host can expose.
pub struct ExecutorMetrics {
    registry: Registry,
    /// Finished tasks by kind and result (`success`, `failure`, `canceled`).
    pub task_counter: IntCounterVec,
    pub task_time: HistogramVec,
    /// Manager polls by result (`task`, `none`, `error`).
    pub ask_task_counter: IntCounterVec,
    pub report_task_counter: IntCounterVec,
    pub piece_read_time: Histogram,
    /// Inter-SP calls by phase (`upload`, `done`).
    pub replicate_piece_time: HistogramVec,
    pub replicate_piece_counter: IntCounterVec,
    /// Seal submissions and listens by result.
    pub seal_counter: IntCounterVec,
    pub seal_time: Histogram,
    pub gc_deleted_pieces: IntCounterVec,
    pub gc_deleted_integrity: IntCounterVec,
    pub gc_object_block_number: IntGauge,
    pub remaining_memory: IntGauge,
    pub remaining_tasks: IntGaugeVec,
    pub running_task_number: IntGauge,
    pub max_task_number: IntGauge,
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

fn histogram_opts(name: &str, help: &str) -> HistogramOpts {
    HistogramOpts::new(name, help).namespace(NAMESPACE)
}

impl ExecutorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let task_counter = IntCounterVec::new(opts("task_total", "Finished tasks"), &["kind", "result"])?;
        let task_time = HistogramVec::new(histogram_opts("task_seconds", "Task run time"), &["kind"])?;
        let ask_task_counter = IntCounterVec::new(opts("ask_task_total", "Manager task requests"), &["result"])?;
        let report_task_counter =
            IntCounterVec::new(opts("report_task_total", "Task reports sent to the manager"), &["result"])?;
        let piece_read_time = Histogram::with_opts(histogram_opts("piece_read_seconds", "Local segment reads"))?;
        let replicate_piece_time = HistogramVec::new(
            histogram_opts("replicate_piece_seconds", "Inter-SP replicate calls"),
            &["phase"],
        )?;
        let replicate_piece_counter =
            IntCounterVec::new(opts("replicate_piece_total", "Pieces sent to secondaries"), &["result"])?;
        let seal_counter = IntCounterVec::new(opts("seal_total", "Seal submissions and listens"), &["step", "result"])?;
        let seal_time = Histogram::with_opts(histogram_opts("seal_seconds", "Submit plus listen time"))?;
        let gc_deleted_pieces = IntCounterVec::new(opts("gc_deleted_pieces_total", "Pieces removed by GC"), &["kind"])?;
        let gc_deleted_integrity =
            IntCounterVec::new(opts("gc_deleted_integrity_total", "Integrity rows removed by GC"), &["kind"])?;
        let gc_object_block_number =
            IntGauge::with_opts(opts("gc_object_block_number", "Latest block processed by object GC"))?;
        let remaining_memory = IntGauge::with_opts(opts("remaining_memory_bytes", "Unreserved scope memory"))?;
        let remaining_tasks =
            IntGaugeVec::new(opts("remaining_tasks", "Unreserved task slots"), &["priority"])?;
        let running_task_number = IntGauge::with_opts(opts("running_task_number", "Workers in flight"))?;
        let max_task_number = IntGauge::with_opts(opts("max_task_number", "Worker cap"))?;

        registry.register(Box::new(task_counter.clone()))?;
        registry.register(Box::new(task_time.clone()))?;
        registry.register(Box::new(ask_task_counter.clone()))?;
        registry.register(Box::new(report_task_counter.clone()))?;
        registry.register(Box::new(piece_read_time.clone()))?;
        registry.register(Box::new(replicate_piece_time.clone()))?;
        registry.register(Box::new(replicate_piece_counter.clone()))?;
        registry.register(Box::new(seal_counter.clone()))?;
        registry.register(Box::new(seal_time.clone()))?;
        registry.register(Box::new(gc_deleted_pieces.clone()))?;
        registry.register(Box::new(gc_deleted_integrity.clone()))?;
        registry.register(Box::new(gc_object_block_number.clone()))?;
        registry.register(Box::new(remaining_memory.clone()))?;
        registry.register(Box::new(remaining_tasks.clone()))?;
        registry.register(Box::new(running_task_number.clone()))?;
        registry.register(Box::new(max_task_number.clone()))?;

        Ok(Self {
            registry,
            task_counter,
            task_time,
            ask_task_counter,
            report_task_counter,
            piece_read_time,
            replicate_piece_time,
            replicate_piece_counter,
            seal_counter,
            seal_time,
            gc_deleted_pieces,
            gc_deleted_integrity,
            gc_object_block_number,
            remaining_memory,
            remaining_tasks,
            running_task_number,
            max_task_number,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_remaining(&self, remaining: &Limit) {
        self.remaining_memory.set(remaining.memory);
        self.remaining_tasks.with_label_values(&["total"]).set(remaining.tasks_total);
        self.remaining_tasks.with_label_values(&["high"]).set(remaining.tasks_high);
        self.remaining_tasks.with_label_values(&["medium"]).set(remaining.tasks_medium);
        self.remaining_tasks.with_label_values(&["low"]).set(remaining.tasks_low);
    }
}
