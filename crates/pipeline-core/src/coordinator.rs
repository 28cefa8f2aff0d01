//! Optimistic reassignment: the local list changes first, the store
//! write follows, and a failed write puts the record back.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::opportunity::Opportunity;
use crate::reassign::{self, NoOpReason, Reassignment};
use crate::resolver::ResolvedView;
use crate::store::OpportunityStore;

#[derive(Debug, thiserror::Error)]
pub enum ReassignError {
    #[error("failed to save opportunity {id}: {source}")]
    WriteFailure {
        id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

impl ReassignError {
    /// Local state is already restored, so the same drop can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteFailure { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassignOutcome {
    /// The store accepted the change; carries the stored record.
    Applied(Opportunity),
    Skipped(NoOpReason),
    /// No local record with that id.
    Missing,
}

pub struct Coordinator<S> {
    store: Arc<S>,
    local: Arc<Mutex<Vec<Opportunity>>>,
    fiscal_year_start_month: u32,
    reconcile: Mutex<Option<JoinHandle<()>>>,
}

impl<S> Coordinator<S>
where
    S: OpportunityStore + 'static,
{
    pub fn new(store: Arc<S>, opportunities: Vec<Opportunity>, fiscal_year_start_month: u32) -> Self {
        Self {
            store,
            local: Arc::new(Mutex::new(opportunities)),
            fiscal_year_start_month,
            reconcile: Mutex::new(None),
        }
    }

    /// Builds a coordinator seeded from the store's current list.
    pub async fn load(store: Arc<S>, fiscal_year_start_month: u32) -> anyhow::Result<Self> {
        let opportunities = store.list().await?;
        debug!(count = opportunities.len(), "seeded local opportunities");
        Ok(Self::new(store, opportunities, fiscal_year_start_month))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn snapshot(&self) -> Vec<Opportunity> {
        self.local.lock().clone()
    }

    pub fn replace(&self, opportunities: Vec<Opportunity>) {
        *self.local.lock() = opportunities;
    }

    /// Replaces the local list with the store's.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let fresh = self.store.list().await?;
        self.replace(fresh);
        Ok(())
    }

    /// Waits for the latest background reconcile to land.
    pub async fn settle(&self) {
        let pending = self.reconcile.lock().take();
        if let Some(handle) = pending
            && let Err(err) = handle.await
        {
            warn!(error = %err, "reconcile task did not finish");
        }
    }

    pub fn reconcile_pending(&self) -> bool {
        self.reconcile.lock().is_some()
    }

    #[tracing::instrument(skip(self, view), fields(view = view.kind.key()))]
    pub async fn reassign(
        &self,
        opportunity_id: Uuid,
        view: &ResolvedView,
        source_column_id: &str,
        target_column_id: &str,
    ) -> Result<ReassignOutcome, ReassignError> {
        let (previous, mutation) = {
            let mut local = self.local.lock();
            let Some(opportunity) = local.iter_mut().find(|opp| opp.id == opportunity_id) else {
                debug!(%opportunity_id, "drop for unknown opportunity ignored");
                return Ok(ReassignOutcome::Missing);
            };

            let mutation = match reassign::translate(
                opportunity,
                view,
                source_column_id,
                target_column_id,
                self.fiscal_year_start_month,
            ) {
                Reassignment::Apply(mutation) => mutation,
                Reassignment::NoOp(reason) => return Ok(ReassignOutcome::Skipped(reason)),
            };

            let previous = opportunity.clone();
            mutation.apply(opportunity, self.fiscal_year_start_month);
            (previous, mutation)
        };

        match self.store.update(opportunity_id, mutation.to_patch()).await {
            Ok(saved) => {
                info!(%opportunity_id, ?mutation, "reassignment saved");
                self.put(saved.clone());
                self.spawn_reconcile();
                Ok(ReassignOutcome::Applied(saved))
            }
            Err(source) => {
                error!(%opportunity_id, error = %format!("{source:#}"), "reassignment failed; rolling back");
                self.put(previous);
                Err(ReassignError::WriteFailure {
                    id: opportunity_id,
                    source,
                })
            }
        }
    }

    fn put(&self, record: Opportunity) {
        let mut local = self.local.lock();
        if let Some(slot) = local.iter_mut().find(|opp| opp.id == record.id) {
            *slot = record;
        }
    }

    /// Starting a reconcile aborts any older one still in flight.
    fn spawn_reconcile(&self) {
        let store = Arc::clone(&self.store);
        let local = Arc::clone(&self.local);
        let handle = tokio::spawn(async move {
            match store.list().await {
                Ok(fresh) => {
                    debug!(count = fresh.len(), "reconciled local opportunities");
                    *local.lock() = fresh;
                }
                Err(err) => warn!(error = %format!("{err:#}"), "reconcile failed; keeping local list"),
            }
        });
        if let Some(superseded) = self.reconcile.lock().replace(handle) {
            superseded.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use uuid::Uuid;

    use super::{Coordinator, ReassignError, ReassignOutcome};
    use crate::grouping::GroupingParams;
    use crate::opportunity::{Opportunity, OpportunityPatch, Stage};
    use crate::reassign::NoOpReason;
    use crate::resolver::{ResolvedView, resolve};
    use crate::store::OpportunityStore;
    use crate::view::{BuiltInView, ViewSelection, catalog};

    #[derive(Default)]
    struct FlakyStore {
        records: Mutex<Vec<Opportunity>>,
        fail: AtomicBool,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl OpportunityStore for FlakyStore {
        async fn list(&self) -> anyhow::Result<Vec<Opportunity>> {
            Ok(self.records.lock().clone())
        }

        async fn update(&self, id: Uuid, patch: OpportunityPatch) -> anyhow::Result<Opportunity> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("connection reset"));
            }
            let mut records = self.records.lock();
            let record = records
                .iter_mut()
                .find(|opp| opp.id == id)
                .ok_or_else(|| anyhow!("missing"))?;
            record.apply_patch(&patch, 1);
            Ok(record.clone())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 10).expect("date")
    }

    fn built_in(kind: BuiltInView, opps: &[Opportunity]) -> ResolvedView {
        resolve(
            &catalog(vec![]),
            None,
            Some(kind),
            ViewSelection::BuiltIn(kind),
            opps,
            &GroupingParams::new(today()),
        )
    }

    fn quarterly(opps: &[Opportunity]) -> ResolvedView {
        built_in(BuiltInView::Quarterly, opps)
    }

    fn seeded() -> (Arc<FlakyStore>, Opportunity) {
        let mut opp = Opportunity::new("Initech", Stage::Proposal);
        opp.close_date = Some(today());
        opp.refresh_quarter(1);
        let store = Arc::new(FlakyStore::default());
        store.records.lock().push(opp.clone());
        (store, opp)
    }

    #[tokio::test]
    async fn successful_drop_is_saved_and_reconciled() {
        let (store, opp) = seeded();
        let coordinator = Coordinator::load(Arc::clone(&store), 1).await.expect("load");
        let view = quarterly(&coordinator.snapshot());

        let outcome = coordinator
            .reassign(opp.id, &view, "2025-Q1", "2025-Q2")
            .await
            .expect("reassign");
        let ReassignOutcome::Applied(saved) = outcome else {
            panic!("expected applied outcome");
        };
        assert_eq!(saved.close_date, NaiveDate::from_ymd_opt(2025, 4, 1));

        coordinator.settle().await;
        assert_eq!(coordinator.snapshot(), store.records.lock().clone());
    }

    #[tokio::test]
    async fn failed_write_restores_previous_record() {
        let (store, opp) = seeded();
        store.fail.store(true, Ordering::SeqCst);
        let coordinator = Coordinator::load(Arc::clone(&store), 1).await.expect("load");
        let before = coordinator.snapshot();
        let view = quarterly(&before);

        let err = coordinator
            .reassign(opp.id, &view, "2025-Q1", "2025-Q3")
            .await
            .expect_err("write should fail");
        assert!(err.is_retryable());
        assert!(matches!(err, ReassignError::WriteFailure { id, .. } if id == opp.id));
        assert_eq!(coordinator.snapshot(), before);
    }

    #[tokio::test]
    async fn no_op_drops_never_reach_the_store() {
        let (store, opp) = seeded();
        let coordinator = Coordinator::load(Arc::clone(&store), 1).await.expect("load");
        let view = quarterly(&coordinator.snapshot());

        let same = coordinator
            .reassign(opp.id, &view, "2025-Q1", "2025-Q1")
            .await
            .expect("reassign");
        assert_eq!(same, ReassignOutcome::Skipped(NoOpReason::Unchanged));

        let missing = coordinator
            .reassign(Uuid::new_v4(), &view, "2025-Q1", "2025-Q2")
            .await
            .expect("reassign");
        assert_eq!(missing, ReassignOutcome::Missing);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_drops_keep_only_the_latest_reconcile() {
        let (store, opp) = seeded();
        let coordinator = Coordinator::load(Arc::clone(&store), 1).await.expect("load");
        let view = built_in(BuiltInView::Stage, &coordinator.snapshot());

        let mut from = "proposal";
        for _ in 0..200 {
            let to = if from == "proposal" { "demo" } else { "proposal" };
            let outcome = coordinator
                .reassign(opp.id, &view, from, to)
                .await
                .expect("reassign");
            assert!(matches!(outcome, ReassignOutcome::Applied(_)));
            assert!(coordinator.reconcile_pending());
            from = to;
        }
        assert_eq!(store.writes.load(Ordering::SeqCst), 200);

        coordinator.settle().await;
        assert!(!coordinator.reconcile_pending());
        let local = coordinator.snapshot();
        assert_eq!(local, store.records.lock().clone());
        assert_eq!(local[0].stage, Stage::Proposal);
    }
}
