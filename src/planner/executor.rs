//! Plan executor.
//!
//! Every plan entry runs as its own task. A task first waits for the
//! completion signals of the nodes it depends on, then for a worker slot,
//! and only then calls its provider. Completion signals are `watch`
//! channels that settle exactly once and carry the node's outputs, which is
//! how deferred references get their values.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ProviderError, ProviderErrorKind};
use crate::provider::{ProviderContext, ProviderRegistry};
use crate::resource::{Outputs, Reference, ResolvedResource, ResourceId};
use crate::state::{AppliedRecord, StateStore};

use super::hash::InputHasher;
use super::plan::{Action, Plan, PlanEntry};
use super::report::{ApplyReport, NodeOutcome, NodeStatus};

/// Default number of provider calls in flight.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum provider calls in flight.
    pub concurrency: usize,
    /// Per-node provider call timeout.
    pub node_timeout: Option<Duration>,
    /// Run-wide cancellation signal.
    pub cancel: CancellationToken,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            node_timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl ExecutorOptions {
    /// Sets the concurrency limit (at least 1).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the per-node timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Uses `cancel` as the run's cancellation signal.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Settled state of a node, as seen by its dependents.
#[derive(Debug, Clone)]
enum Signal {
    Pending,
    Done(Arc<Outputs>),
    Failed,
    Cancelled,
}

/// Why a node did not apply.
#[derive(Debug)]
struct Failure {
    message: String,
    kind: Option<ProviderErrorKind>,
}

impl From<ProviderError> for Failure {
    fn from(err: ProviderError) -> Self {
        Self {
            message: err.to_string(),
            kind: Some(err.kind),
        }
    }
}

impl Failure {
    fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
        }
    }
}

/// Executes plans against providers, committing state per node.
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    registry: ProviderRegistry,
    store: Arc<dyn StateStore>,
    hasher: InputHasher,
    semaphore: Arc<Semaphore>,
    options: ExecutorOptions,
}

impl PlanExecutor {
    /// Creates an executor with default options.
    #[must_use]
    pub fn new(registry: ProviderRegistry, store: Arc<dyn StateStore>) -> Self {
        Self::with_options(registry, store, ExecutorOptions::default())
    }

    /// Creates an executor with explicit options.
    #[must_use]
    pub fn with_options(registry: ProviderRegistry, store: Arc<dyn StateStore>, options: ExecutorOptions) -> Self {
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        Self {
            shared: Arc::new(Shared {
                registry,
                store,
                hasher: InputHasher::new(),
                semaphore,
                options,
            }),
        }
    }

    /// Executes a plan.
    ///
    /// Node failures never abort the run; they are reported per node and
    /// block only the failed node's dependents.
    pub async fn execute(&self, plan: &Plan) -> ApplyReport {
        let started_at = Utc::now();
        info!("Executing plan with {} entries", plan.entries.len());

        let mut senders = HashMap::with_capacity(plan.entries.len());
        let mut receivers = HashMap::with_capacity(plan.entries.len());
        for entry in &plan.entries {
            let (tx, rx) = watch::channel(Signal::Pending);
            senders.insert(entry.id.clone(), tx);
            receivers.insert(entry.id.clone(), rx);
        }

        let mut tasks = JoinSet::new();
        for entry in &plan.entries {
            let Some(tx) = senders.remove(&entry.id) else {
                warn!("Duplicate plan entry for {}, skipping", entry.id);
                continue;
            };

            let waits: Vec<(ResourceId, watch::Receiver<Signal>)> = wait_set(plan, entry)
                .into_iter()
                .filter_map(|id| receivers.get(&id).map(|rx| (id, rx.clone())))
                .collect();

            let shared = Arc::clone(&self.shared);
            let entry = entry.clone();
            tasks.spawn(async move {
                let started = Instant::now();
                let (mut outcome, signal) = shared.drive(&entry, waits).await;
                tx.send_replace(signal);
                outcome.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                outcome
            });
        }
        drop(receivers);

        let mut outcomes: HashMap<ResourceId, NodeOutcome> = HashMap::with_capacity(plan.entries.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    outcomes.insert(outcome.id.clone(), outcome);
                }
                Err(e) => error!("Node task aborted: {e}"),
            }
        }

        let mut seen = HashSet::new();
        let outcomes = plan
            .entries
            .iter()
            .filter(|entry| seen.insert(entry.id.clone()))
            .map(|entry| {
                outcomes.remove(&entry.id).unwrap_or_else(|| {
                    outcome(entry, NodeStatus::Failed).with_failure(Failure::other("node task aborted"))
                })
            })
            .collect();

        let report = ApplyReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!("Execution finished: {report}");
        report
    }
}

/// Nodes `entry` must wait for.
///
/// Declared resources wait for their dependencies. A delete waits for every
/// entry whose record depended on it, whether that entry is being deleted or
/// is moving its references elsewhere.
fn wait_set(plan: &Plan, entry: &PlanEntry) -> Vec<ResourceId> {
    if entry.action == Action::Delete {
        plan.entries
            .iter()
            .filter(|other| other.id != entry.id)
            .filter(|other| {
                other
                    .prior
                    .as_ref()
                    .is_some_and(|record| record.dependencies.contains(&entry.id))
            })
            .map(|other| other.id.clone())
            .collect()
    } else {
        entry
            .dependencies
            .iter()
            .filter(|dep| {
                plan.entries
                    .iter()
                    .any(|other| &other.id == *dep && other.action != Action::Delete)
            })
            .cloned()
            .collect()
    }
}

async fn settled(rx: &mut watch::Receiver<Signal>) -> Signal {
    match rx.wait_for(|signal| !matches!(signal, Signal::Pending)).await {
        Ok(signal) => (*signal).clone(),
        Err(_) => Signal::Failed,
    }
}

fn outcome(entry: &PlanEntry, status: NodeStatus) -> NodeOutcome {
    NodeOutcome {
        id: entry.id.clone(),
        resource_type: entry.resource_type.clone(),
        action: entry.action,
        status,
        error: None,
        error_kind: None,
        blocked_by: None,
        duration_ms: 0,
    }
}

impl NodeOutcome {
    fn with_failure(mut self, failure: Failure) -> Self {
        self.error = Some(failure.message);
        self.error_kind = failure.kind;
        self
    }
}

impl Shared {
    /// Runs one node to a terminal status.
    async fn drive(&self, entry: &PlanEntry, waits: Vec<(ResourceId, watch::Receiver<Signal>)>) -> (NodeOutcome, Signal) {
        let cancel = &self.options.cancel;
        let mut upstream: HashMap<ResourceId, Arc<Outputs>> = HashMap::new();
        let mut blocked_by = None;
        let mut cancelled = false;

        for (id, mut rx) in waits {
            let signal = tokio::select! {
                signal = settled(&mut rx) => signal,
                () = cancel.cancelled() => Signal::Cancelled,
            };
            match signal {
                Signal::Done(outputs) => {
                    upstream.insert(id, outputs);
                }
                Signal::Failed => {
                    blocked_by.get_or_insert(id);
                }
                Signal::Cancelled | Signal::Pending => cancelled = true,
            }
        }

        if let Some(dependency) = blocked_by {
            warn!("{} blocked by failed dependency {dependency}", entry.id);
            let mut blocked = outcome(entry, NodeStatus::Blocked);
            blocked.blocked_by = Some(dependency);
            return (blocked, Signal::Failed);
        }

        let permit = tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
            () = cancel.cancelled() => None,
        };

        if cancelled || permit.is_none() || cancel.is_cancelled() {
            debug!("{} cancelled before start", entry.id);
            return (outcome(entry, NodeStatus::Cancelled), Signal::Cancelled);
        }

        debug!("Starting {} {}", entry.action, entry.id);
        let result = self.apply(entry, &upstream).await;
        drop(permit);

        match result {
            Ok((status, outputs)) => {
                info!("{} {}: {status}", entry.action, entry.id);
                (outcome(entry, status), Signal::Done(outputs))
            }
            Err(failure) => {
                error!("{} {} failed: {}", entry.action, entry.id, failure.message);
                (outcome(entry, NodeStatus::Failed).with_failure(failure), Signal::Failed)
            }
        }
    }

    async fn apply(
        &self,
        entry: &PlanEntry,
        upstream: &HashMap<ResourceId, Arc<Outputs>>,
    ) -> Result<(NodeStatus, Arc<Outputs>), Failure> {
        match entry.action {
            Action::NoOp => self.keep(entry).await,
            Action::Delete => self.delete(entry).await,
            Action::Create | Action::Update => self.create_or_update(entry, upstream).await,
        }
    }

    /// Publishes stored outputs, refreshing stored dependencies if they moved.
    async fn keep(&self, entry: &PlanEntry) -> Result<(NodeStatus, Arc<Outputs>), Failure> {
        let prior = entry
            .prior
            .as_ref()
            .ok_or_else(|| Failure::other("no stored record for unchanged resource"))?;

        if prior.dependencies != entry.dependencies {
            let mut record = prior.clone();
            record.dependencies.clone_from(&entry.dependencies);
            self.commit(&entry.id, record).await?;
        }

        Ok((NodeStatus::Unchanged, Arc::new(prior.outputs.clone())))
    }

    async fn create_or_update(
        &self,
        entry: &PlanEntry,
        upstream: &HashMap<ResourceId, Arc<Outputs>>,
    ) -> Result<(NodeStatus, Arc<Outputs>), Failure> {
        let resource = entry
            .resource
            .as_ref()
            .ok_or_else(|| Failure::other("plan entry has no declaration"))?;

        let lookup = |reference: &Reference| {
            upstream
                .get(reference.resource.as_str())
                .and_then(|outputs| reference.resolve(outputs))
        };
        let resolved = resource.resolve(&lookup).map_err(|missing| {
            Failure::from(ProviderError::permanent(
                &resource.resource_type,
                format!("reference {missing} did not resolve"),
            ))
        })?;

        let hash = self.hasher.hash(&resolved.resource_type, &resolved.properties);

        let same_inputs = entry
            .prior
            .as_ref()
            .is_some_and(|prior| InputHasher::hashes_match(&prior.inputs_hash, &hash));
        if same_inputs {
            debug!("{} resolved to its stored inputs, nothing to update", entry.id);
            return self.keep(entry).await;
        }

        let provider = self.registry.get(&resolved.resource_type)?;
        let ctx = ProviderContext::new(self.options.cancel.clone());

        let outputs = match &entry.prior {
            None => {
                self.timed(&resolved.resource_type, provider.create(&resolved, &ctx))
                    .await?
            }
            Some(prior) if prior.resource_type != resolved.resource_type => {
                info!(
                    "Replacing {} ({} -> {})",
                    entry.id, prior.resource_type, resolved.resource_type
                );
                let old = self.registry.get(&prior.resource_type)?;
                let previous = stored_resource(&entry.id, prior);
                self.timed(&prior.resource_type, old.delete(&previous, &prior.outputs, &ctx))
                    .await?;
                self.timed(&resolved.resource_type, provider.create(&resolved, &ctx))
                    .await?
            }
            Some(prior) => {
                self.timed(
                    &resolved.resource_type,
                    provider.update(&resolved, &prior.outputs, &ctx),
                )
                .await?
            }
        };

        let mut record = AppliedRecord::new(
            resolved.resource_type.clone(),
            hash,
            resolved.properties,
            outputs.clone(),
            entry.dependencies.clone(),
        );
        if let Some(prior) = &entry.prior {
            record = record.replacing(prior);
        }
        self.commit(&entry.id, record).await?;

        Ok((NodeStatus::Applied, Arc::new(outputs)))
    }

    async fn delete(&self, entry: &PlanEntry) -> Result<(NodeStatus, Arc<Outputs>), Failure> {
        let prior = entry
            .prior
            .as_ref()
            .ok_or_else(|| Failure::other("no stored record to delete"))?;

        let provider = self.registry.get(&prior.resource_type)?;
        let ctx = ProviderContext::new(self.options.cancel.clone());
        let resource = stored_resource(&entry.id, prior);

        self.timed(&prior.resource_type, provider.delete(&resource, &prior.outputs, &ctx))
            .await?;

        self.remove(&entry.id).await?;
        Ok((NodeStatus::Applied, Arc::new(Outputs::new())))
    }

    async fn commit(&self, id: &ResourceId, record: AppliedRecord) -> Result<(), Failure> {
        self.store
            .commit(id, record)
            .await
            .map_err(|e| Failure::other(format!("state commit failed: {e}")))
    }

    async fn remove(&self, id: &ResourceId) -> Result<(), Failure> {
        self.store
            .remove(id)
            .await
            .map_err(|e| Failure::other(format!("state removal failed: {e}")))
    }

    /// Applies the per-node timeout; expiry is a transient failure.
    async fn timed<T, F>(&self, resource_type: &str, call: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match self.options.node_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(ProviderError::transient(
                    resource_type,
                    format!("operation timed out after {limit:?}"),
                ))
            }),
            None => call.await,
        }
    }
}

/// The stored view of a resource, as handed to providers for deletes.
fn stored_resource(id: &ResourceId, record: &AppliedRecord) -> ResolvedResource {
    ResolvedResource {
        id: id.clone(),
        resource_type: record.resource_type.clone(),
        properties: record.inputs.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::planner::Planner;
    use crate::provider::{CallKind, MemoryProvider, MockProvider};
    use crate::resource::Resource;
    use crate::state::MemoryStateStore;

    struct Harness {
        provider: Arc<MemoryProvider>,
        store: Arc<MemoryStateStore>,
        options: ExecutorOptions,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_provider(MemoryProvider::new())
        }

        fn with_provider(provider: MemoryProvider) -> Self {
            Self {
                provider: Arc::new(provider),
                store: Arc::new(MemoryStateStore::new()),
                options: ExecutorOptions::default(),
            }
        }

        fn executor(&self) -> PlanExecutor {
            let mut registry = ProviderRegistry::new();
            registry.register("null", self.provider.clone());
            PlanExecutor::with_options(registry, self.store.clone(), self.options.clone())
        }

        async fn apply(&self, resources: Vec<Resource>) -> ApplyReport {
            let graph = DependencyGraph::build(resources).unwrap();
            let records = self.store.load().await.unwrap();
            let plan = Planner::new().plan(&graph, &records).unwrap();
            self.executor().execute(&plan).await
        }
    }

    fn net() -> Resource {
        Resource::new("net", "null").with_property("cidr", "10.0.0.0/16")
    }

    fn svc() -> Resource {
        Resource::new("svc", "null").with_property("network", Reference::new("net", "id"))
    }

    fn position(journal: &[crate::provider::Call], id: &str, finished: bool) -> usize {
        journal
            .iter()
            .position(|c| c.resource.as_str() == id && c.finished == finished)
            .unwrap()
    }

    #[tokio::test]
    async fn test_dependency_completes_before_dependent_starts() {
        let h = Harness::new();
        let report = h.apply(vec![svc(), net()]).await;

        assert!(report.is_success());
        assert_eq!(report.count(NodeStatus::Applied), 2);

        let journal = h.provider.journal();
        assert!(position(&journal, "net", true) < position(&journal, "svc", false));

        let records = h.store.load().await.unwrap();
        assert_eq!(records["svc"].inputs["network"], records["net"].outputs["id"]);
        assert_eq!(records["svc"].dependencies, vec![ResourceId::from("net")]);
    }

    #[tokio::test]
    async fn test_second_apply_is_noop() {
        let h = Harness::new();
        h.apply(vec![net(), svc()]).await;
        let calls_before = h.provider.calls().len();

        let report = h.apply(vec![net(), svc()]).await;

        assert_eq!(report.count(NodeStatus::Unchanged), 2);
        assert_eq!(h.provider.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_only() {
        let h = Harness::new();
        h.provider.fail_on("net", ProviderError::permanent("null", "quota exceeded"));

        let report = h
            .apply(vec![
                net(),
                svc(),
                Resource::new("dns", "null").with_property("target", Reference::new("svc", "id")),
                Resource::new("other", "null"),
            ])
            .await;

        assert_eq!(report.ids(NodeStatus::Failed), vec!["net"]);
        assert_eq!(report.ids(NodeStatus::Blocked), vec!["svc", "dns"]);
        assert_eq!(report.ids(NodeStatus::Applied), vec!["other"]);
        assert_eq!(
            report.outcome("dns").unwrap().blocked_by,
            Some(ResourceId::from("svc"))
        );

        let called: Vec<String> = h.provider.calls().into_iter().map(|(_, id)| id.to_string()).collect();
        assert!(!called.contains(&String::from("svc")));
        assert!(!called.contains(&String::from("dns")));
    }

    #[tokio::test]
    async fn test_rerun_after_transient_failure_converges() {
        let h = Harness::new();
        h.provider.fail_on("svc", ProviderError::transient("null", "throttled"));

        let first = h.apply(vec![net(), svc()]).await;
        assert!(first.is_retryable());
        assert_eq!(first.ids(NodeStatus::Applied), vec!["net"]);

        h.provider.clear_failure("svc");
        let second = h.apply(vec![net(), svc()]).await;

        assert!(second.is_success());
        assert_eq!(second.outcome("net").unwrap().status, NodeStatus::Unchanged);
        assert_eq!(second.outcome("svc").unwrap().status, NodeStatus::Applied);

        let net_creates = h
            .provider
            .calls()
            .into_iter()
            .filter(|(kind, id)| *kind == CallKind::Create && id.as_str() == "net")
            .count();
        assert_eq!(net_creates, 1);
    }

    #[tokio::test]
    async fn test_update_resolving_to_same_inputs_is_unchanged() {
        let h = Harness::new();
        h.apply(vec![net(), svc()]).await;

        let report = h
            .apply(vec![
                Resource::new("net", "null").with_property("cidr", "10.9.0.0/16"),
                svc(),
            ])
            .await;

        assert_eq!(report.outcome("net").unwrap().status, NodeStatus::Applied);
        assert_eq!(report.outcome("svc").unwrap().action, Action::Update);
        assert_eq!(report.outcome("svc").unwrap().status, NodeStatus::Unchanged);
        assert!(!h.provider.calls().contains(&(CallKind::Update, ResourceId::from("svc"))));
    }

    #[tokio::test]
    async fn test_deletes_run_dependents_first() {
        let h = Harness::new();
        h.apply(vec![
            net(),
            svc(),
            Resource::new("dns", "null").with_property("target", Reference::new("svc", "id")),
        ])
        .await;

        let records = h.store.load().await.unwrap();
        let plan = Planner::new().plan_destroy(&records).unwrap();
        let report = h.executor().execute(&plan).await;

        assert!(report.is_success());
        let deletes: Vec<String> = h
            .provider
            .calls()
            .into_iter()
            .filter(|(kind, _)| *kind == CallKind::Delete)
            .map(|(_, id)| id.to_string())
            .collect();
        assert_eq!(deletes, vec!["dns", "svc", "net"]);
        assert!(h.store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_waits_for_former_dependent_update() {
        let h = Harness::new();
        h.apply(vec![
            Resource::new("old", "null"),
            Resource::new("svc", "null").with_property("network", Reference::new("old", "id")),
        ])
        .await;
        let first_run = h.provider.journal().len();

        let report = h
            .apply(vec![
                Resource::new("new", "null"),
                Resource::new("svc", "null").with_property("network", Reference::new("new", "id")),
            ])
            .await;

        assert!(report.is_success());
        assert_eq!(report.outcome("old").unwrap().action, Action::Delete);
        assert_eq!(report.outcome("svc").unwrap().action, Action::Update);

        let journal = h.provider.journal();
        let second_run = &journal[first_run..];
        assert!(position(second_run, "svc", true) < position(second_run, "old", false));

        let records = h.store.load().await.unwrap();
        assert!(!records.contains_key("old"));
        assert_eq!(records["svc"].dependencies, vec![ResourceId::from("new")]);
    }

    #[tokio::test]
    async fn test_failed_update_blocks_former_dependency_delete() {
        let h = Harness::new();
        h.apply(vec![
            Resource::new("old", "null"),
            Resource::new("svc", "null").with_property("network", Reference::new("old", "id")),
        ])
        .await;
        h.provider.fail_on("svc", ProviderError::permanent("null", "rejected"));

        let report = h
            .apply(vec![
                Resource::new("new", "null"),
                Resource::new("svc", "null").with_property("network", Reference::new("new", "id")),
            ])
            .await;

        assert_eq!(report.ids(NodeStatus::Failed), vec!["svc"]);
        assert_eq!(report.ids(NodeStatus::Blocked), vec!["old"]);
        assert!(h.store.load().await.unwrap().contains_key("old"));
    }

    #[tokio::test]
    async fn test_failed_delete_blocks_dependency_delete() {
        let h = Harness::new();
        h.apply(vec![net(), svc()]).await;
        h.provider.fail_on("svc", ProviderError::permanent("null", "in use"));

        let records = h.store.load().await.unwrap();
        let plan = Planner::new().plan_destroy(&records).unwrap();
        let report = h.executor().execute(&plan).await;

        assert_eq!(report.ids(NodeStatus::Failed), vec!["svc"]);
        assert_eq!(report.ids(NodeStatus::Blocked), vec!["net"]);
        assert_eq!(h.store.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let mut h = Harness::with_provider(MemoryProvider::new().with_delay(Duration::from_millis(30)));
        h.options = ExecutorOptions::default().with_concurrency(2);

        let resources = (0..6).map(|i| Resource::new(format!("r{i}"), "null")).collect();
        let report = h.apply(resources).await;

        assert!(report.is_success());
        assert!(h.provider.peak_concurrency() <= 2);
        assert!(h.provider.peak_concurrency() >= 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut h = Harness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        h.options = ExecutorOptions::default().with_cancel(cancel);

        let report = h.apply(vec![net(), svc()]).await;

        assert_eq!(report.count(NodeStatus::Cancelled), 2);
        assert!(h.provider.calls().is_empty());
        assert!(!report.is_retryable());
    }

    #[tokio::test]
    async fn test_timeout_fails_node_and_blocks_dependents() {
        let mut h = Harness::with_provider(MemoryProvider::new().with_delay(Duration::from_secs(30)));
        h.options = ExecutorOptions::default().with_timeout(Some(Duration::from_millis(20)));

        let report = h.apply(vec![net(), svc()]).await;

        let net = report.outcome("net").unwrap();
        assert_eq!(net.status, NodeStatus::Failed);
        assert_eq!(net.error_kind, Some(ProviderErrorKind::Transient));
        assert_eq!(report.outcome("svc").unwrap().status, NodeStatus::Blocked);
    }

    #[tokio::test]
    async fn test_unknown_type_fails_permanently() {
        let h = Harness::new();
        let report = h.apply(vec![Resource::new("bucket", "s3")]).await;

        let bucket = report.outcome("bucket").unwrap();
        assert_eq!(bucket.status, NodeStatus::Failed);
        assert_eq!(bucket.error_kind, Some(ProviderErrorKind::Permanent));
    }

    #[tokio::test]
    async fn test_mock_provider_failure_skips_dependent_calls() {
        let mut network = MockProvider::new();
        network
            .expect_create()
            .times(1)
            .returning(|_, _| Err(ProviderError::permanent("network", "quota exceeded")));

        let mut service = MockProvider::new();
        service.expect_create().never();

        let mut registry = ProviderRegistry::new();
        registry.register("network", Arc::new(network));
        registry.register("service", Arc::new(service));

        let graph = DependencyGraph::build(vec![
            Resource::new("net", "network"),
            Resource::new("svc", "service").with_property("network", Reference::new("net", "id")),
        ])
        .unwrap();
        let plan = Planner::new().plan(&graph, &crate::state::Records::new()).unwrap();

        let store = Arc::new(MemoryStateStore::new());
        let report = PlanExecutor::new(registry, store).execute(&plan).await;

        assert_eq!(report.count(NodeStatus::Failed), 1);
        assert_eq!(report.count(NodeStatus::Blocked), 1);
        assert_eq!(report.count(NodeStatus::Applied), 0);
        assert!(!report.is_retryable());
    }
}
