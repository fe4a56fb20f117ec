use std::sync::Arc;

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    operator_rows_in: CounterVec,
    operator_rows_out: CounterVec,
    operator_batches_in: CounterVec,
    operator_batches_out: CounterVec,
    operator_time_seconds: HistogramVec,
    tasks_submitted: CounterVec,
    tasks_finished: CounterVec,
    fold_replans: CounterVec,
    scheduler_queued_tasks: GaugeVec,
    scheduler_running_tasks: GaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_operator(
        &self,
        query_id: &str,
        task_id: u64,
        operator: &str,
        rows_in: u64,
        rows_out: u64,
        batches_in: u64,
        batches_out: u64,
        secs: f64,
    ) {
        let labels = [query_id, &task_id.to_string(), operator];
        self.inner
            .operator_rows_in
            .with_label_values(&labels)
            .inc_by(rows_in as f64);
        self.inner
            .operator_rows_out
            .with_label_values(&labels)
            .inc_by(rows_out as f64);
        self.inner
            .operator_batches_in
            .with_label_values(&labels)
            .inc_by(batches_in as f64);
        self.inner
            .operator_batches_out
            .with_label_values(&labels)
            .inc_by(batches_out as f64);
        self.inner
            .operator_time_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    pub fn inc_tasks_submitted(&self, query_id: &str) {
        self.inner
            .tasks_submitted
            .with_label_values(&[query_id])
            .inc();
    }

    /// `outcome` is `ok` or `failed`.
    pub fn inc_tasks_finished(&self, query_id: &str, outcome: &str) {
        self.inner
            .tasks_finished
            .with_label_values(&[query_id, outcome])
            .inc();
    }

    pub fn inc_fold_replans(&self, query_id: &str) {
        self.inner.fold_replans.with_label_values(&[query_id]).inc();
    }

    pub fn add_scheduler_queued_tasks(&self, query_id: &str, delta: f64) {
        self.inner
            .scheduler_queued_tasks
            .with_label_values(&[query_id])
            .add(delta);
    }

    pub fn add_scheduler_running_tasks(&self, query_id: &str, delta: f64) {
        self.inner
            .scheduler_running_tasks
            .with_label_values(&[query_id])
            .add(delta);
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();
        let operator_labels = &["query_id", "task_id", "operator"];

        let operator_rows_in = counter_vec(
            &registry,
            "pfq_operator_rows_in_total",
            "Input rows processed per operator",
            operator_labels,
        );
        let operator_rows_out = counter_vec(
            &registry,
            "pfq_operator_rows_out_total",
            "Output rows produced per operator",
            operator_labels,
        );
        let operator_batches_in = counter_vec(
            &registry,
            "pfq_operator_batches_in_total",
            "Input batches processed per operator",
            operator_labels,
        );
        let operator_batches_out = counter_vec(
            &registry,
            "pfq_operator_batches_out_total",
            "Output batches produced per operator",
            operator_labels,
        );
        let operator_time_seconds = histogram_vec(
            &registry,
            "pfq_operator_time_seconds",
            "CPU time spent in each operator",
            operator_labels,
        );

        let tasks_submitted = counter_vec(
            &registry,
            "pfq_tasks_submitted_total",
            "Tasks handed to the scheduler",
            &["query_id"],
        );
        let tasks_finished = counter_vec(
            &registry,
            "pfq_tasks_finished_total",
            "Tasks that produced a result",
            &["query_id", "outcome"],
        );
        let fold_replans = counter_vec(
            &registry,
            "pfq_fold_replans_total",
            "Folded subtrees rebuilt and resubmitted at runtime",
            &["query_id"],
        );

        let scheduler_queued_tasks = gauge_vec(
            &registry,
            "pfq_scheduler_queued_tasks",
            "Tasks waiting for a scheduler slot",
            &["query_id"],
        );
        let scheduler_running_tasks = gauge_vec(
            &registry,
            "pfq_scheduler_running_tasks",
            "Tasks currently executing",
            &["query_id"],
        );

        Self {
            registry,
            operator_rows_in,
            operator_rows_out,
            operator_batches_in,
            operator_batches_out,
            operator_time_seconds,
            tasks_submitted,
            tasks_finished,
            fold_replans,
            scheduler_queued_tasks,
            scheduler_running_tasks,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("gauge vec");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}
