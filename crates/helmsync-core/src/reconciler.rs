//! Reconciler: build -> fetch -> diff -> apply for one release at a time.
//!
//! Passes for the same release are serialized through a [`LockRegistry`];
//! distinct releases run concurrently. The optional pre-apply deadline covers
//! waiting for the lock and the fetch retry loop, never the apply itself.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use helmsync_state::{ReleaseBackend, ReleaseId, ReleaseRevision};
use tokio::time::Instant;
use tracing::Instrument;

use crate::applier::ReleaseApplier;
use crate::config::ReconcilerConfig;
use crate::diff::{self, DiffResult};
use crate::domain::descriptor::DEFAULT_NAMESPACE;
use crate::domain::{
    build, release_id, RawReleaseConfig, ReconcileAction, ReconcileError, ReconcileReport,
    Result,
};
use crate::lock::LockRegistry;
use crate::metrics::METRICS;
use crate::obs;
use crate::reader;
use crate::retry::retry_unreachable;

/// Drives releases towards their desired state against one backend.
pub struct Reconciler {
    backend: Arc<dyn ReleaseBackend>,
    locks: LockRegistry,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(backend: Arc<dyn ReleaseBackend>) -> Self {
        Self::with_config(backend, ReconcilerConfig::default())
    }

    pub fn with_config(backend: Arc<dyn ReleaseBackend>, config: ReconcilerConfig) -> Self {
        Self {
            backend,
            locks: LockRegistry::new(),
            config,
        }
    }

    /// Reconcile one release. Never panics on bad input; every failure is
    /// reported with an error kind and detail.
    pub async fn reconcile(&self, raw: RawReleaseConfig) -> ReconcileReport {
        let started = Instant::now();
        let mut report = ReconcileReport::new(raw.display_id());
        let span = obs::reconcile_span(&report.release);
        async {
            METRICS.inc_reconciles();
            obs::emit_reconcile_started(&report.release);
            if let Err(e) = self.drive(raw, &mut report).await {
                report.fail(&e);
            }
            report.duration_ms = started.elapsed().as_millis() as u64;
            obs::emit_reconcile_finished(&report);
        }
        .instrument(span)
        .await;
        report
    }

    /// Reconcile several releases concurrently. Reports keep input order.
    pub async fn reconcile_many(&self, raws: Vec<RawReleaseConfig>) -> Vec<ReconcileReport> {
        join_all(raws.into_iter().map(|raw| self.reconcile(raw))).await
    }

    /// Roll a release back to an earlier revision (default: the previous one).
    pub async fn rollback(
        &self,
        name: &str,
        namespace: Option<&str>,
        to: Option<u64>,
    ) -> ReconcileReport {
        let started = Instant::now();
        let mut report = ReconcileReport::new(format!(
            "{}/{}",
            namespace.unwrap_or(DEFAULT_NAMESPACE),
            name
        ));
        report.action = Some(ReconcileAction::Rollback);
        let span = obs::reconcile_span(&report.release);
        async {
            obs::emit_reconcile_started(&report.release);
            let outcome: Result<ReleaseRevision> = async {
                let id = release_id(name, namespace)?;
                let _guard = self
                    .before_apply(async { Ok::<_, ReconcileError>(self.locks.acquire(&id).await) })
                    .await?;
                ReleaseApplier::new(self.backend.as_ref())
                    .rollback(&id, to)
                    .await
            }
            .await;
            match outcome {
                Ok(revision) => {
                    report.revision = Some(revision.revision);
                    report.status = Some(revision.status);
                }
                Err(e) => report.fail(&e),
            }
            report.duration_ms = started.elapsed().as_millis() as u64;
            obs::emit_reconcile_finished(&report);
        }
        .instrument(span)
        .await;
        report
    }

    /// Compute what `reconcile` would do, without locking or applying.
    pub async fn plan(&self, raw: RawReleaseConfig) -> Result<DiffResult> {
        let spec = build(raw)?;
        let observed = self.fetch(&spec.id()).await?;
        Ok(diff::compute(&spec, observed.as_ref()))
    }

    /// Currently deployed revision, with retries.
    pub async fn status(&self, id: &ReleaseId) -> Result<Option<ReleaseRevision>> {
        release_id(&id.name, Some(&id.namespace))?;
        self.fetch(id).await
    }

    /// Full revision history, oldest first, with retries.
    pub async fn history(&self, id: &ReleaseId) -> Result<Vec<ReleaseRevision>> {
        release_id(&id.name, Some(&id.namespace))?;
        retry_unreachable(&self.config.retry, || {
            reader::history(self.backend.as_ref(), id)
        })
        .await
    }

    async fn drive(&self, raw: RawReleaseConfig, report: &mut ReconcileReport) -> Result<()> {
        let spec = build(raw)?;
        let id = spec.id();
        report.release = id.to_string();

        let (_guard, observed) = self
            .before_apply(async {
                let guard = self.locks.acquire(&id).await;
                let observed = self.fetch(&id).await?;
                Ok::<_, ReconcileError>((guard, observed))
            })
            .await?;

        let diff = diff::compute(&spec, observed.as_ref());
        report.action = Some(diff.action.into());
        report.changed_keys = diff.changed_keys.iter().cloned().collect();
        obs::emit_diff_decided(
            &report.release,
            &ReconcileAction::from(diff.action).to_string(),
            diff.changed_keys.len(),
            diff.chart_changed,
        );

        if diff.is_noop() {
            METRICS.inc_noops();
            if let Some(current) = observed {
                report.revision = Some(current.revision);
                report.status = Some(current.status);
            }
            return Ok(());
        }

        let revision = ReleaseApplier::new(self.backend.as_ref())
            .apply(&spec, diff.action)
            .await?;
        report.revision = Some(revision.revision);
        report.status = Some(revision.status);
        Ok(())
    }

    async fn fetch(&self, id: &ReleaseId) -> Result<Option<ReleaseRevision>> {
        retry_unreachable(&self.config.retry, || reader::fetch(self.backend.as_ref(), id)).await
    }

    /// Run the pre-apply phase under the configured deadline.
    async fn before_apply<T, F>(&self, phase: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        match self.config.pre_apply_timeout() {
            Some(limit) => match tokio::time::timeout(limit, phase).await {
                Ok(result) => result,
                Err(_) => Err(ReconcileError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }),
            },
            None => phase.await,
        }
    }
}
