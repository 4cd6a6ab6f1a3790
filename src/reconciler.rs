//! Reconciler driving whole runs.
//!
//! This module ties planning and execution to the state store: it holds
//! the run lock, replans and reruns when every failure was transient,
//! records run history and refreshes stack outputs. It also checks stored
//! records against live provider state for drift.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::planner::{ApplyReport, ExecutorOptions, NodeStatus, Plan, PlanExecutor, Planner, resolve_from_records};
use crate::provider::{ProviderContext, ProviderRegistry};
use crate::resource::{ResolvedResource, Value};
use crate::state::{Records, RunHistoryEntry, RunOperation, StateStore, generate_holder_id};

/// Default pause between attempts.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Runs plans against a state store under the run lock.
#[derive(Debug)]
pub struct Reconciler {
    /// Provider adapters by type tag.
    registry: ProviderRegistry,
    /// State store.
    store: Arc<dyn StateStore>,
    /// Executor tuning.
    options: ExecutorOptions,
    /// Maximum runs per invocation.
    max_attempts: u32,
    /// Pause between runs.
    retry_delay: Duration,
    /// Lock holder name.
    holder: String,
}

/// Result of a reconciliation run.
#[derive(Debug, Serialize)]
pub struct ReconciliationResult {
    /// Kind of run.
    pub operation: RunOperation,
    /// Plan of the last attempt.
    pub plan: Plan,
    /// Report of the last attempt.
    pub report: ApplyReport,
    /// Runs performed.
    pub attempts: u32,
    /// Stack outputs after a successful apply.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl ReconciliationResult {
    /// Returns true if every node applied or was unchanged.
    #[must_use]
    pub fn success(&self) -> bool {
        self.report.is_success()
    }
}

impl Reconciler {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(registry: ProviderRegistry, store: Arc<dyn StateStore>) -> Self {
        Self {
            registry,
            store,
            options: ExecutorOptions::default(),
            max_attempts: 1,
            retry_delay: DEFAULT_RETRY_DELAY,
            holder: generate_holder_id(),
        }
    }

    /// Sets the executor options.
    #[must_use]
    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the maximum runs per invocation.
    ///
    /// A run is repeated only when every failure in it was transient.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the pause between runs.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Plans `graph` against the stored records without changing anything.
    ///
    /// # Errors
    ///
    /// Returns state errors (including version mismatches) and planning
    /// errors.
    pub async fn plan(&self, graph: &DependencyGraph) -> Result<Plan> {
        let records = self.store.load().await?;
        Planner::new().plan(graph, &records)
    }

    /// Plans the deletion of every stored resource.
    ///
    /// # Errors
    ///
    /// Returns state errors.
    pub async fn plan_destroy(&self) -> Result<Plan> {
        let records = self.store.load().await?;
        Planner::new().plan_destroy(&records)
    }

    /// Reconciles the stored state with `graph`.
    ///
    /// Node failures do not make this return an error; inspect
    /// [`ReconciliationResult::success`].
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken, the state cannot be
    /// loaded, or planning fails.
    pub async fn apply(
        &self,
        graph: &DependencyGraph,
        outputs: &BTreeMap<String, Value>,
    ) -> Result<ReconciliationResult> {
        info!("Starting apply of {} resources", graph.len());
        self.locked(RunOperation::Apply, |records| Planner::new().plan(graph, records), Some(outputs))
            .await
    }

    /// Deletes every stored resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or the state cannot be
    /// loaded.
    pub async fn destroy(&self) -> Result<ReconciliationResult> {
        info!("Starting destroy");
        self.locked(RunOperation::Destroy, |records| Planner::new().plan_destroy(records), None)
            .await
    }

    async fn locked<P>(
        &self,
        operation: RunOperation,
        plan: P,
        outputs: Option<&BTreeMap<String, Value>>,
    ) -> Result<ReconciliationResult>
    where
        P: Fn(&Records) -> Result<Plan>,
    {
        let lock = self.store.acquire_lock(&self.holder).await?;
        debug!("Acquired state lock {}", lock.lock_id);

        let result = self.run(operation, plan, outputs).await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            error!("Failed to release state lock: {e}");
        }
        result
    }

    async fn run<P>(
        &self,
        operation: RunOperation,
        make_plan: P,
        outputs: Option<&BTreeMap<String, Value>>,
    ) -> Result<ReconciliationResult>
    where
        P: Fn(&Records) -> Result<Plan>,
    {
        let executor = PlanExecutor::with_options(
            self.registry.clone(),
            Arc::clone(&self.store),
            self.options.clone(),
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("{operation} attempt {attempt}/{}", self.max_attempts);

            let records = self.store.load().await?;
            let plan = make_plan(&records)?;
            info!(
                "Plan: {} to change, {} unchanged",
                plan.change_count(),
                plan.entries.len() - plan.change_count()
            );

            let report = executor.execute(&plan).await;

            let retry = report.is_retryable()
                && attempt < self.max_attempts
                && !self.options.cancel.is_cancelled();
            if retry {
                warn!(
                    "Run failed with transient errors only ({report}), retrying in {:?}",
                    self.retry_delay
                );
                tokio::select! {
                    () = tokio::time::sleep(self.retry_delay) => {}
                    () = self.options.cancel.cancelled() => {}
                }
                continue;
            }

            let stack_outputs = match outputs {
                Some(declared) if report.is_success() => self.refresh_outputs(declared).await?,
                _ => BTreeMap::new(),
            };

            self.record_history(operation, &report).await;
            if report.is_success() {
                info!("{operation} finished: {report}");
            } else {
                error!("{operation} finished with failures: {report}");
            }

            return Ok(ReconciliationResult {
                operation,
                plan,
                report,
                attempts: attempt,
                outputs: stack_outputs,
            });
        }
    }

    async fn refresh_outputs(
        &self,
        declared: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, serde_json::Value>> {
        let records = self.store.load().await?;
        let outputs = resolve_outputs(declared, &records);
        self.store.set_outputs(outputs.clone()).await?;
        Ok(outputs)
    }

    async fn record_history(&self, operation: RunOperation, report: &ApplyReport) {
        let entry = RunHistoryEntry {
            timestamp: Utc::now(),
            operation,
            applied: report.ids(NodeStatus::Applied),
            failed: report.ids(NodeStatus::Failed),
            blocked: report.ids(NodeStatus::Blocked),
            success: report.is_success(),
        };
        if let Err(e) = self.store.record_run(entry).await {
            warn!("Failed to record run history: {e}");
        }
    }

    /// Reads every stored resource back from its provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded. Provider failures
    /// are reported per resource.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        let records = self.store.load().await?;
        info!("Checking {} resources for drift", records.len());

        let ctx = ProviderContext::new(self.options.cancel.clone());
        let mut entries = Vec::with_capacity(records.len());

        for (id, record) in &records {
            let status = match self.registry.get(&record.resource_type) {
                Err(e) => DriftStatus::Error(e.message),
                Ok(provider) => {
                    let resource = ResolvedResource {
                        id: id.clone(),
                        resource_type: record.resource_type.clone(),
                        properties: record.inputs.clone(),
                    };
                    match provider.read(&resource, &record.outputs, &ctx).await {
                        Ok(None) => DriftStatus::Missing,
                        Ok(Some(live)) if live == record.outputs => DriftStatus::InSync,
                        Ok(Some(live)) => DriftStatus::Changed(changed_keys(&record.outputs, &live)),
                        Err(e) => DriftStatus::Error(e.message),
                    }
                }
            };

            if status != DriftStatus::InSync {
                warn!("{id}: {status}");
            }
            entries.push(DriftEntry {
                id: id.to_string(),
                resource_type: record.resource_type.clone(),
                status,
            });
        }

        Ok(DriftReport { entries })
    }

    /// Stack outputs cached by the last successful apply.
    ///
    /// # Errors
    ///
    /// Returns state errors.
    pub async fn outputs(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        Ok(self.store.snapshot().await?.outputs)
    }
}

/// Resolves stack outputs against stored records; unresolvable ones are skipped.
fn resolve_outputs(
    declared: &BTreeMap<String, Value>,
    records: &Records,
) -> BTreeMap<String, serde_json::Value> {
    declared
        .iter()
        .filter_map(|(name, value)| {
            let substituted = value.substitute(&|reference| resolve_from_records(reference, records));
            if let Some(missing) = substituted.deferred.first() {
                warn!("Output '{name}' skipped: {missing} is not available");
                None
            } else {
                Some((name.clone(), substituted.value))
            }
        })
        .collect()
}

fn changed_keys(stored: &crate::resource::Outputs, live: &crate::resource::Outputs) -> Vec<String> {
    let mut keys: Vec<String> = stored
        .iter()
        .filter(|(k, v)| live.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    keys.extend(live.keys().filter(|k| !stored.contains_key(*k)).cloned());
    keys
}

/// Live state of one stored resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum DriftStatus {
    /// Live outputs match the record.
    InSync,
    /// Live outputs differ in these keys.
    Changed(Vec<String>),
    /// The resource no longer exists.
    Missing,
    /// The provider could not be asked.
    Error(String),
}

/// Drift check result for one resource.
#[derive(Debug, Clone, Serialize)]
pub struct DriftEntry {
    /// Resource name.
    pub id: String,
    /// Type tag.
    pub resource_type: String,
    /// Live state.
    pub status: DriftStatus,
}

/// Report of drift detection.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    /// One entry per stored resource.
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    /// Returns true if any resource drifted or could not be checked.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.entries.iter().any(|e| e.status != DriftStatus::InSync)
    }

    /// Names of drifted resources.
    #[must_use]
    pub fn drifted(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.status != DriftStatus::InSync)
            .map(|e| e.id.as_str())
            .collect()
    }
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InSync => write!(f, "in sync"),
            Self::Changed(keys) => write!(f, "changed ({})", keys.join(", ")),
            Self::Missing => write!(f, "missing"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift() {
            writeln!(f, "Drift detected:")?;
            for entry in self.entries.iter().filter(|e| e.status != DriftStatus::InSync) {
                writeln!(f, "  - {}: {}", entry.id, entry.status)?;
            }
        } else {
            write!(f, "No drift detected - state is converged")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{KeelError, ProviderError, StateError};
    use crate::provider::{MemoryProvider, MockProvider};
    use mockall::Sequence;
    use crate::resource::{Reference, Resource};
    use crate::state::MemoryStateStore;
    use serde_json::json;

    struct Fixture {
        provider: Arc<MemoryProvider>,
        store: Arc<MemoryStateStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                provider: Arc::new(MemoryProvider::new()),
                store: Arc::new(MemoryStateStore::new()),
            }
        }

        fn reconciler(&self) -> Reconciler {
            let mut registry = ProviderRegistry::new();
            registry.register("null", self.provider.clone());
            Reconciler::new(registry, self.store.clone()).with_retry_delay(Duration::from_millis(1))
        }
    }

    fn graph() -> DependencyGraph {
        DependencyGraph::build(vec![
            Resource::new("net", "null").with_property("cidr", "10.0.0.0/16"),
            Resource::new("svc", "null").with_property("network", Reference::new("net", "id")),
        ])
        .unwrap()
    }

    fn stack_outputs() -> BTreeMap<String, Value> {
        BTreeMap::from([
            (String::from("network_id"), Value::Reference(Reference::new("net", "id"))),
            (String::from("region"), Value::from("eu")),
        ])
    }

    #[tokio::test]
    async fn test_apply_records_outputs_and_history() {
        let fx = Fixture::new();
        let result = fx.reconciler().apply(&graph(), &stack_outputs()).await.unwrap();

        assert!(result.success());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.outputs["region"], json!("eu"));

        let state = fx.store.snapshot().await.unwrap();
        assert_eq!(state.outputs["network_id"], state.resources["net"].outputs["id"]);
        assert_eq!(state.history.len(), 1);
        assert!(state.history[0].success);
        assert!(fx.store.lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mut flaky = MockProvider::new();
        let mut seq = Sequence::new();
        flaky
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ProviderError::transient("flaky", "throttled")));
        flaky
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|res, _| Ok(res.properties.clone()));

        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        registry.register("null", fx.provider.clone());
        registry.register("flaky", Arc::new(flaky));

        let graph = DependencyGraph::build(vec![
            Resource::new("net", "null"),
            Resource::new("svc", "flaky").with_property("network", Reference::new("net", "id")),
        ])
        .unwrap();

        let result = Reconciler::new(registry, fx.store.clone())
            .with_retry_delay(Duration::from_millis(1))
            .with_max_attempts(3)
            .apply(&graph, &BTreeMap::new())
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.attempts, 2);
        assert_eq!(result.report.outcome("net").unwrap().status, NodeStatus::Unchanged);
        assert_eq!(result.report.outcome("svc").unwrap().status, NodeStatus::Applied);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let fx = Fixture::new();
        fx.provider
            .fail_on("net", ProviderError::permanent("null", "quota exceeded"));

        let result = fx
            .reconciler()
            .with_max_attempts(3)
            .apply(&graph(), &BTreeMap::new())
            .await
            .unwrap();

        assert!(!result.success());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.report.count(NodeStatus::Blocked), 1);

        let state = fx.store.snapshot().await.unwrap();
        assert!(!state.history[0].success);
        assert_eq!(state.history[0].blocked, vec!["svc"]);
    }

    #[tokio::test]
    async fn test_locked_state_is_rejected() {
        let fx = Fixture::new();
        fx.store.acquire_lock("someone-else").await.unwrap();

        let err = fx.reconciler().apply(&graph(), &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, KeelError::State(StateError::LockedByOther { .. })));
        assert!(fx.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_empties_state() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler();
        reconciler.apply(&graph(), &stack_outputs()).await.unwrap();

        let result = reconciler.destroy().await.unwrap();

        assert!(result.success());
        assert_eq!(result.operation, RunOperation::Destroy);
        assert!(fx.store.load().await.unwrap().is_empty());
        assert!(fx.provider.live_ids().is_empty());
    }

    #[tokio::test]
    async fn test_drift_detection() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler();
        reconciler.apply(&graph(), &BTreeMap::new()).await.unwrap();
        assert!(!reconciler.check_drift().await.unwrap().has_drift());

        fx.provider.forget("svc");
        fx.provider.insert_live("net", crate::resource::Outputs::from([(String::from("id"), json!("other"))]));

        let report = reconciler.check_drift().await.unwrap();
        assert_eq!(report.drifted(), vec!["net", "svc"]);
        assert_eq!(report.entries[1].status, DriftStatus::Missing);
        assert!(matches!(&report.entries[0].status, DriftStatus::Changed(keys) if keys.contains(&String::from("id"))));
    }

    #[test]
    fn test_unresolved_outputs_are_skipped() {
        let outputs = resolve_outputs(&stack_outputs(), &Records::new());
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["region"], json!("eu"));
    }
}
