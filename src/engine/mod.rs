use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::Transport;
use crate::error::EngineError;
use crate::fetch::execute_plan;
use crate::signals::{Metric, MetricResult};

/// Signal whose zero-valued resolutions are swallowed entirely: no row, no
/// fold. Holdover from a deprecated block-status signal and scoped to this
/// exact name only.
const SUPPRESSED_ZERO_SIGNAL: &str = "Block status";

/// Consumer of a run's progress. Called from the engine's event loop, one
/// callback at a time, in completion order.
pub trait Presenter: Send {
    /// A signal resolved (or was suppressed). Receives the full ordered
    /// result sequence so the view can re-render from scratch.
    fn on_metric_resolved(&mut self, results: &[MetricResult], total: f64);
    /// A signal failed; no delta was folded for it.
    fn on_metric_failed(&mut self, name: &'static str, error: &EngineError);
    /// Every signal has resolved, successfully or not.
    fn on_run_complete(&mut self);
}

/// Read-only view of a run's progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub total: f64,
    /// Resolved results in completion order, not catalog order.
    pub results: Vec<MetricResult>,
}

/// State of the current run, guarded by its generation: events tagged with
/// an older generation must never touch it.
#[derive(Debug, Default)]
struct RunState {
    generation: u64,
    total: f64,
    results: Vec<MetricResult>,
    resolved: usize,
    complete: bool,
}

enum MetricEvent {
    Resolved(MetricResult),
    Failed {
        name: &'static str,
        error: EngineError,
    },
}

/// Orchestrates one scoring run: fans out every signal's fetch, folds
/// deltas in completion order, and notifies the presenter per arrival.
pub struct Engine {
    metrics: Vec<Arc<dyn Metric>>,
    transport: Arc<dyn Transport>,
    max_pages: u32,
    generation: AtomicU64,
    state: Mutex<RunState>,
}

impl Engine {
    pub fn new(metrics: Vec<Arc<dyn Metric>>, transport: Arc<dyn Transport>, max_pages: u32) -> Self {
        Self {
            metrics,
            transport,
            max_pages,
            generation: AtomicU64::new(0),
            state: Mutex::new(RunState::default()),
        }
    }

    /// Snapshot of the current run, safe to call at any time.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock_state();
        Snapshot {
            total: state.total,
            results: state.results.clone(),
        }
    }

    /// Score `identity`, driving `presenter` as signals resolve.
    ///
    /// Starting a new run supersedes any run still in flight: the old run's
    /// late arrivals are discarded by the generation check and never folded.
    /// Returns the snapshot as of this run's last accepted event.
    pub async fn evaluate(
        &self,
        identity: &str,
        presenter: &mut dyn Presenter,
    ) -> Result<Snapshot, EngineError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(EngineError::Validation("no identity specified".into()));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.lock_state();
            *state = RunState {
                generation,
                ..RunState::default()
            };
        }
        info!("Run {generation} started for {identity}");

        let (tx, mut rx) = mpsc::unbounded_channel::<(u64, MetricEvent)>();
        for metric in &self.metrics {
            let metric = Arc::clone(metric);
            let transport = Arc::clone(&self.transport);
            let tx = tx.clone();
            let spec = metric.plan(identity);
            let max_pages = self.max_pages;
            tokio::spawn(async move {
                let event = match execute_plan(transport.as_ref(), &spec, max_pages).await {
                    Ok(payload) => match metric.evaluate(payload) {
                        Ok(result) => MetricEvent::Resolved(result),
                        Err(error) => MetricEvent::Failed {
                            name: metric.name(),
                            error,
                        },
                    },
                    Err(error) => MetricEvent::Failed {
                        name: metric.name(),
                        error,
                    },
                };
                // The receiver is gone once the run is abandoned; nothing to do.
                let _ = tx.send((generation, event));
            });
        }
        drop(tx);

        let expected = self.metrics.len();
        let mut last_accepted = Snapshot::default();

        while let Some((event_generation, event)) = rx.recv().await {
            let mut state = self.lock_state();
            if state.generation != event_generation || state.complete {
                drop(state);
                debug!("Discarding event from superseded run {event_generation}");
                continue;
            }
            state.resolved += 1;
            let done = state.resolved == expected;
            if done {
                state.complete = true;
            }

            match event {
                MetricEvent::Resolved(result) => {
                    let suppressed =
                        result.name == SUPPRESSED_ZERO_SIGNAL && result.delta == 0.0;
                    if suppressed {
                        debug!("Suppressing zero-valued {}", result.name);
                    } else {
                        state.total += result.delta;
                        state.results.push(result);
                    }
                    let snapshot = Snapshot {
                        total: state.total,
                        results: state.results.clone(),
                    };
                    drop(state);
                    last_accepted = snapshot.clone();
                    presenter.on_metric_resolved(&snapshot.results, snapshot.total);
                }
                MetricEvent::Failed { name, error } => {
                    drop(state);
                    warn!("Signal {name} failed: {error}");
                    presenter.on_metric_failed(name, &error);
                }
            }

            if done {
                info!(
                    "Run {generation} complete: total {:.1} from {} signal(s)",
                    last_accepted.total,
                    last_accepted.results.len()
                );
                presenter.on_run_complete();
            }
        }

        Ok(last_accepted)
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Query;
    use crate::fetch::{FetchSpec, Payload};
    use crate::signals::MetricValue;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Fixed-delta signal keyed by a `metric` request parameter.
    struct FixedSignal {
        name: &'static str,
        delta: f64,
    }

    impl Metric for FixedSignal {
        fn name(&self) -> &'static str {
            self.name
        }

        fn plan(&self, _identity: &str) -> FetchSpec {
            FetchSpec::Single(vec![("metric".into(), self.name.into())])
        }

        fn evaluate(&self, _payload: Payload) -> Result<MetricResult, EngineError> {
            Ok(MetricResult {
                name: self.name,
                value: MetricValue::Count(0),
                delta: self.delta,
                formatted: format!("{:+}", self.delta),
            })
        }
    }

    /// Signal whose evaluation always fails.
    struct BrokenSignal;

    impl Metric for BrokenSignal {
        fn name(&self) -> &'static str {
            "Broken"
        }

        fn plan(&self, _identity: &str) -> FetchSpec {
            FetchSpec::Single(vec![("metric".into(), "Broken".into())])
        }

        fn evaluate(&self, _payload: Payload) -> Result<MetricResult, EngineError> {
            Err(EngineError::Reduce {
                metric: "Broken",
                detail: "always broken".into(),
            })
        }
    }

    /// Responds to every query, optionally after a per-signal delay, and can
    /// hold all responses until released.
    struct StagedTransport {
        delays: HashMap<&'static str, u64>,
        gate: Option<Arc<Notify>>,
    }

    impl StagedTransport {
        fn immediate() -> Self {
            Self {
                delays: HashMap::new(),
                gate: None,
            }
        }

        fn with_delays(delays: HashMap<&'static str, u64>) -> Self {
            Self {
                delays,
                gate: None,
            }
        }

        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                delays: HashMap::new(),
                gate: Some(gate),
            }
        }
    }

    #[async_trait]
    impl Transport for StagedTransport {
        async fn get_json(&self, query: &Query) -> Result<Value, EngineError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let name = query
                .iter()
                .find(|(k, _)| k == "metric")
                .map(|(_, v)| v.as_str())
                .unwrap_or("");
            if let Some(ms) = self.delays.get(name).copied() {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Ok(json!({"ok": true}))
        }
    }

    /// Records every callback for assertions.
    #[derive(Default)]
    struct RecordingPresenter {
        rows: Vec<(usize, f64)>,
        failures: Vec<&'static str>,
        completed: usize,
    }

    impl Presenter for RecordingPresenter {
        fn on_metric_resolved(&mut self, results: &[MetricResult], total: f64) {
            self.rows.push((results.len(), total));
        }

        fn on_metric_failed(&mut self, name: &'static str, _error: &EngineError) {
            self.failures.push(name);
        }

        fn on_run_complete(&mut self) {
            self.completed += 1;
        }
    }

    fn fixed(name: &'static str, delta: f64) -> Arc<dyn Metric> {
        Arc::new(FixedSignal { name, delta })
    }

    #[tokio::test]
    async fn empty_identity_rejected_before_any_fetch() {
        let engine = Engine::new(
            vec![fixed("A", 1.0)],
            Arc::new(StagedTransport::immediate()),
            1000,
        );
        let mut presenter = RecordingPresenter::default();
        let err = engine.evaluate("   ", &mut presenter).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(presenter.rows.is_empty());
        assert_eq!(presenter.completed, 0);
    }

    #[tokio::test]
    async fn total_is_sum_of_deltas_regardless_of_completion_order() {
        // Reversed delays force completion order opposite to catalog order.
        let delays = HashMap::from([("A", 30u64), ("B", 15u64), ("C", 1u64)]);
        let engine = Engine::new(
            vec![fixed("A", 10.0), fixed("B", -4.0), fixed("C", 2.5)],
            Arc::new(StagedTransport::with_delays(delays)),
            1000,
        );
        let mut presenter = RecordingPresenter::default();
        let snapshot = engine.evaluate("Example", &mut presenter).await.unwrap();

        assert!((snapshot.total - 8.5).abs() < 1e-9);
        let order: Vec<&str> = snapshot.results.iter().map(|r| r.name).collect();
        assert_eq!(order, vec!["C", "B", "A"]);
        assert_eq!(presenter.completed, 1);
        assert_eq!(presenter.rows.len(), 3);
        // Running totals were reported progressively.
        assert!((presenter.rows[0].1 - 2.5).abs() < 1e-9);
        assert!((presenter.rows[2].1 - 8.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_signal_folds_nothing_but_run_still_completes() {
        let engine = Engine::new(
            vec![fixed("A", 10.0), Arc::new(BrokenSignal), fixed("C", 5.0)],
            Arc::new(StagedTransport::immediate()),
            1000,
        );
        let mut presenter = RecordingPresenter::default();
        let snapshot = engine.evaluate("Example", &mut presenter).await.unwrap();

        assert!((snapshot.total - 15.0).abs() < 1e-9);
        assert_eq!(snapshot.results.len(), 2);
        assert_eq!(presenter.failures, vec!["Broken"]);
        assert_eq!(presenter.completed, 1);
    }

    #[tokio::test]
    async fn legacy_block_status_zero_is_suppressed() {
        let engine = Engine::new(
            vec![fixed("Block status", 0.0), fixed("A", 7.0)],
            Arc::new(StagedTransport::immediate()),
            1000,
        );
        let mut presenter = RecordingPresenter::default();
        let snapshot = engine.evaluate("Example", &mut presenter).await.unwrap();

        assert!((snapshot.total - 7.0).abs() < 1e-9);
        assert_eq!(snapshot.results.len(), 1);
        assert_eq!(snapshot.results[0].name, "A");
        // The presenter still saw both resolutions and the completion.
        assert_eq!(presenter.rows.len(), 2);
        assert_eq!(presenter.completed, 1);
    }

    #[tokio::test]
    async fn zero_delta_from_other_signals_still_emits_a_row() {
        let engine = Engine::new(
            vec![fixed("Blocks", 0.0)],
            Arc::new(StagedTransport::immediate()),
            1000,
        );
        let mut presenter = RecordingPresenter::default();
        let snapshot = engine.evaluate("Example", &mut presenter).await.unwrap();
        assert_eq!(snapshot.results.len(), 1);
        assert_eq!(snapshot.total, 0.0);
    }

    #[tokio::test]
    async fn superseded_run_cannot_touch_newer_total() {
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(Engine::new(
            vec![fixed("A", 100.0), fixed("B", 23.0)],
            Arc::new(StagedTransport::gated(Arc::clone(&gate))),
            1000,
        ));

        // Run A parks on the gate with every fetch in flight.
        let run_a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let mut presenter = RecordingPresenter::default();
                let snapshot = engine.evaluate("First", &mut presenter).await.unwrap();
                (snapshot, presenter.rows.len())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Run B supersedes it and resolves first.
        let run_b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let mut presenter = RecordingPresenter::default();
                engine.evaluate("Second", &mut presenter).await.unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Release everything; run A's fetches now resolve late.
        gate.notify_waiters();
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_waiters();

        let snapshot_b = run_b.await.unwrap();
        let (snapshot_a, rows_a) = run_a.await.unwrap();

        // Only run B's deltas are in the authoritative state.
        assert!((snapshot_b.total - 123.0).abs() < 1e-9);
        assert!((engine.snapshot().total - 123.0).abs() < 1e-9);
        // Run A folded nothing and never reached its presenter.
        assert_eq!(snapshot_a, Snapshot::default());
        assert_eq!(rows_a, 0);
    }

    #[tokio::test]
    async fn snapshot_is_readable_after_completion() {
        let engine = Engine::new(
            vec![fixed("A", 1.5)],
            Arc::new(StagedTransport::immediate()),
            1000,
        );
        let mut presenter = RecordingPresenter::default();
        engine.evaluate("Example", &mut presenter).await.unwrap();
        let snapshot = engine.snapshot();
        assert!((snapshot.total - 1.5).abs() < 1e-9);
        assert_eq!(snapshot.results.len(), 1);
    }
}
