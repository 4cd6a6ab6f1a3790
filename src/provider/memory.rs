//! The `null` provider.
//!
//! Keeps resources in process memory. Outputs mirror the resolved inputs
//! plus a generated `id`. Every call is journaled, failures can be
//! injected per resource, and an artificial delay can be configured, which
//! makes it the workhorse of the executor tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::resource::{Outputs, ResolvedResource, ResourceId};

use super::{Provider, ProviderContext};

/// Kind of provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `create`
    Create,
    /// `read`
    Read,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

/// A journaled call boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation.
    pub kind: CallKind,
    /// Target resource.
    pub resource: ResourceId,
    /// False when the call started, true when it returned.
    pub finished: bool,
}

/// In-memory provider registered as `null`.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    live: Mutex<BTreeMap<ResourceId, Outputs>>,
    journal: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<ResourceId, ProviderError>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call sleep for `delay` first.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails every call for `id` with `error`.
    pub fn fail_on(&self, id: impl Into<ResourceId>, error: ProviderError) {
        guard(&self.failures).insert(id.into(), error);
    }

    /// Stops failing calls for `id`.
    pub fn clear_failure(&self, id: &str) {
        guard(&self.failures).remove(id);
    }

    /// Seeds a live resource, as if created out of band.
    pub fn insert_live(&self, id: impl Into<ResourceId>, outputs: Outputs) {
        guard(&self.live).insert(id.into(), outputs);
    }

    /// Removes a live resource, as if deleted out of band.
    pub fn forget(&self, id: &str) {
        guard(&self.live).remove(id);
    }

    /// Every call start and finish, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<Call> {
        guard(&self.journal).clone()
    }

    /// Call starts only, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(CallKind, ResourceId)> {
        guard(&self.journal)
            .iter()
            .filter(|c| !c.finished)
            .map(|c| (c.kind, c.resource.clone()))
            .collect()
    }

    /// Ids of resources currently live.
    #[must_use]
    pub fn live_ids(&self) -> Vec<ResourceId> {
        guard(&self.live).keys().cloned().collect()
    }

    /// Highest number of calls that were in flight at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, kind: CallKind, resource: &ResolvedResource, finished: bool) {
        guard(&self.journal).push(Call {
            kind,
            resource: resource.id.clone(),
            finished,
        });
    }

    /// Journals the start, applies delay and injected failures, then runs `op`.
    async fn call<T, F>(
        &self,
        kind: CallKind,
        resource: &ResolvedResource,
        ctx: &ProviderContext,
        op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Result<T, ProviderError> + Send,
    {
        self.record(kind, resource, false);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let outcome = self.run(resource, ctx, op).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record(kind, resource, true);
        outcome
    }

    async fn run<T, F>(&self, resource: &ResolvedResource, ctx: &ProviderContext, op: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Result<T, ProviderError> + Send,
    {
        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancel.cancelled() => {
                    return Err(ProviderError::transient(&resource.resource_type, "call cancelled"));
                }
            }
        }

        let injected = guard(&self.failures).get(resource.id.as_str()).cloned();
        if let Some(error) = injected {
            return Err(error);
        }

        op()
    }

    fn mirror(resource: &ResolvedResource, id: serde_json::Value) -> Outputs {
        let mut outputs: Outputs = resource.properties.clone();
        outputs.insert(String::from("id"), id);
        outputs
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn create(&self, resource: &ResolvedResource, ctx: &ProviderContext) -> Result<Outputs, ProviderError> {
        self.call(CallKind::Create, resource, ctx, || {
            let uuid = Uuid::new_v4().to_string();
            let id = format!("{}-{}", resource.id, &uuid[..8]);
            let outputs = Self::mirror(resource, serde_json::Value::String(id));
            guard(&self.live).insert(resource.id.clone(), outputs.clone());
            Ok(outputs)
        })
        .await
    }

    async fn read(
        &self,
        resource: &ResolvedResource,
        _outputs: &Outputs,
        ctx: &ProviderContext,
    ) -> Result<Option<Outputs>, ProviderError> {
        self.call(CallKind::Read, resource, ctx, || {
            Ok(guard(&self.live).get(resource.id.as_str()).cloned())
        })
        .await
    }

    async fn update(
        &self,
        resource: &ResolvedResource,
        prior: &Outputs,
        ctx: &ProviderContext,
    ) -> Result<Outputs, ProviderError> {
        self.call(CallKind::Update, resource, ctx, || {
            let id = prior
                .get("id")
                .cloned()
                .unwrap_or_else(|| serde_json::Value::String(resource.id.to_string()));
            let outputs = Self::mirror(resource, id);
            guard(&self.live).insert(resource.id.clone(), outputs.clone());
            Ok(outputs)
        })
        .await
    }

    async fn delete(
        &self,
        resource: &ResolvedResource,
        _outputs: &Outputs,
        ctx: &ProviderContext,
    ) -> Result<(), ProviderError> {
        self.call(CallKind::Delete, resource, ctx, || {
            guard(&self.live).remove(resource.id.as_str());
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolved(id: &str) -> ResolvedResource {
        ResolvedResource {
            id: ResourceId::from(id),
            resource_type: String::from("null"),
            properties: BTreeMap::from([(String::from("size"), json!(3))]),
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let provider = MemoryProvider::new();
        let ctx = ProviderContext::default();
        let res = resolved("a");

        let outputs = provider.create(&res, &ctx).await.unwrap();
        assert_eq!(outputs["size"], json!(3));
        assert!(outputs["id"].as_str().unwrap().starts_with("a-"));

        let updated = provider.update(&res, &outputs, &ctx).await.unwrap();
        assert_eq!(updated["id"], outputs["id"]);

        provider.delete(&res, &updated, &ctx).await.unwrap();
        assert!(provider.read(&res, &updated, &ctx).await.unwrap().is_none());

        let kinds: Vec<CallKind> = provider.calls().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![CallKind::Create, CallKind::Update, CallKind::Delete, CallKind::Read]
        );
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let provider = MemoryProvider::new();
        provider.fail_on("a", ProviderError::permanent("null", "boom"));

        let err = provider
            .create(&resolved("a"), &ProviderContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.message, "boom");
        assert!(provider.live_ids().is_empty());

        provider.clear_failure("a");
        assert!(provider.create(&resolved("a"), &ProviderContext::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_delay_observes_cancellation() {
        let provider = MemoryProvider::new().with_delay(Duration::from_secs(30));
        let ctx = ProviderContext::default();
        ctx.cancel.cancel();

        let err = provider.create(&resolved("a"), &ctx).await.unwrap_err();
        assert!(err.is_transient());
    }
}
