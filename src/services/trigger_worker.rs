//! One tokio task per enabled trigger rule.
//!
//! The task owns the rule's firing history and a view of its device's cache. It
//! sleeps on an unbounded inbox with a bounded wait, evaluates on every `Evaluate`
//! message and hands its history back to whoever sends `Cancel`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::db::models::TriggerRule;
use crate::error::{AppError, AppResult};
use crate::services::calendar::EventCache;
use crate::services::evaluator::{FiredTriggerHistory, TriggerEvaluator};
use crate::services::host::{DeviceStateStore, TriggerExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTask {
    Evaluate,
    Cancel,
}

/// Snapshot of a device's cache that is reloaded only after the device changed.
pub struct CacheView {
    device_id: i64,
    dirty: Arc<AtomicBool>,
    current: Arc<EventCache>,
}

impl CacheView {
    pub fn new(device_id: i64, dirty: Arc<AtomicBool>) -> Self {
        CacheView {
            device_id,
            dirty,
            current: Arc::new(EventCache::default()),
        }
    }

    pub async fn snapshot(&mut self, store: &dyn DeviceStateStore) -> AppResult<Arc<EventCache>> {
        if self.dirty.swap(false, Ordering::SeqCst) {
            match store.load_event_cache(self.device_id).await {
                Ok(cache) => self.current = Arc::new(cache),
                Err(e) => {
                    self.dirty.store(true, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
        Ok(self.current.clone())
    }
}

/// Collaborators shared by every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn DeviceStateStore>,
    pub executor: Arc<dyn TriggerExecutor>,
    pub evaluator: TriggerEvaluator,
    pub queue_wait: Duration,
}

/// Owner side of a running trigger worker.
pub struct TriggerHandle {
    rule: TriggerRule,
    tx: mpsc::UnboundedSender<TriggerTask>,
    dirty: Arc<AtomicBool>,
    join: JoinHandle<FiredTriggerHistory>,
}

impl TriggerHandle {
    pub fn spawn(rule: TriggerRule, history: FiredTriggerHistory, ctx: WorkerContext) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let dirty = Arc::new(AtomicBool::new(true));
        let view = CacheView::new(rule.device_id, dirty.clone());

        let join = tokio::spawn(run_worker(rule.clone(), history, view, rx, ctx));

        TriggerHandle {
            rule,
            tx,
            dirty,
            join,
        }
    }

    pub fn rule(&self) -> &TriggerRule {
        &self.rule
    }

    /// Force a reload of the cache before the next evaluation.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Returns `false` if the worker has already exited.
    pub fn queue_evaluation(&self) -> bool {
        self.tx.send(TriggerTask::Evaluate).is_ok()
    }

    /// Cancel the worker and wait for it to hand back its history.
    pub async fn stop(self) -> AppResult<FiredTriggerHistory> {
        // A closed inbox means the task is already on its way out.
        let _ = self.tx.send(TriggerTask::Cancel);
        self.join.await.map_err(|e| {
            AppError::Worker(format!(
                "Worker for trigger \"{}\" did not exit cleanly: {}",
                self.rule.name, e
            ))
        })
    }
}

async fn run_worker(
    rule: TriggerRule,
    mut history: FiredTriggerHistory,
    mut view: CacheView,
    mut rx: mpsc::UnboundedReceiver<TriggerTask>,
    ctx: WorkerContext,
) -> FiredTriggerHistory {
    info!("Trigger \"{}\" started", rule.name);

    loop {
        match tokio::time::timeout(ctx.queue_wait, rx.recv()).await {
            Err(_) => {
                trace!("Trigger \"{}\" idle", rule.name);
            }
            Ok(None) | Ok(Some(TriggerTask::Cancel)) => break,
            Ok(Some(TriggerTask::Evaluate)) => {
                let pass = AssertUnwindSafe(evaluate_once(&rule, &mut history, &mut view, &ctx))
                    .catch_unwind()
                    .await;

                match pass {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Trigger \"{}\" evaluation failed: {}", rule.name, e),
                    Err(_) => {
                        let e = AppError::Worker(format!("evaluation of \"{}\" panicked", rule.name));
                        error!("{}", e);
                    }
                }
            }
        }
    }

    info!("Trigger \"{}\" stopped", rule.name);
    history
}

async fn evaluate_once(
    rule: &TriggerRule,
    history: &mut FiredTriggerHistory,
    view: &mut CacheView,
    ctx: &WorkerContext,
) -> AppResult<()> {
    let snapshot = view.snapshot(ctx.store.as_ref()).await?;

    let summary = ctx
        .evaluator
        .evaluate(
            rule,
            &snapshot,
            history,
            ctx.executor.as_ref(),
            Utc::now(),
        )
        .await;

    if summary.history_changed() {
        if let Err(e) = ctx.store.save_fired_history(rule.id, history).await {
            warn!(
                "Failed to persist firing history of trigger \"{}\": {}",
                rule.name, e
            );
        } else {
            debug!(
                "Persisted firing history of trigger \"{}\" ({} entries)",
                rule.name,
                history.len()
            );
        }
    }

    Ok(())
}
