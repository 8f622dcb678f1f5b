//! Bounded concurrency primitives
//!
//! Fan-out helpers that run one async operation per input item and gather
//! every outcome. None of them cancel siblings on the first failure: every
//! dispatched operation is awaited and every error is folded into one
//! aggregated [`Error`].
//!
//! - [`for_each`] / [`map`] / [`filter`] run all items at once.
//! - [`for_each_with_limit`] / [`map_with_limit`] hold at most `limit`
//!   operations in flight through a counting semaphore. A limit of zero
//!   serializes. Items that have not started when the cancellation token
//!   fires are reported as [`Error::Cancelled`] instead of being dropped.
//! - [`Collector`] gathers heterogeneous spawned tasks and joins them once.
//!
//! Fan-out is cooperative (`join_all` on the caller's task) for the item
//! helpers, so operations may borrow from the caller. `Collector` spawns
//! onto the runtime, so its futures must be `'static`.

use std::future::Future;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::aggregate;
use crate::{Error, Result};

/// Operation name reported for items skipped because of cancellation
const CANCELLED_ITEM: &str = "bounded task";

/// Run `op` for every item concurrently, waiting for all of them.
pub async fn for_each<T, I, F, Fut>(items: I, op: F) -> Result<()>
where
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let outcomes = join_all(items.into_iter().map(&op)).await;
    collect_errors(outcomes)
}

/// Like [`for_each`], but never more than `limit` operations at a time.
pub async fn for_each_with_limit<T, I, F, Fut>(
    cancel: &CancellationToken,
    items: I,
    limit: usize,
    op: F,
) -> Result<()>
where
    I: IntoIterator<Item = T>,
    F: Fn(CancellationToken, T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let outcomes = run_bounded(cancel, items, limit, op).await;
    collect_errors(outcomes)
}

/// Transform every item concurrently.
///
/// `outputs[i]` is always the result for `input[i]`, whatever the completion
/// order. Failed items leave `None` in their slot and their errors are
/// combined into [`Mapped::error`].
pub async fn map<T, R, I, F, Fut>(items: I, op: F) -> Mapped<R>
where
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let outcomes = join_all(items.into_iter().map(&op)).await;
    collect_ordered(outcomes)
}

/// Like [`map`], but never more than `limit` operations at a time.
pub async fn map_with_limit<T, R, I, F, Fut>(
    cancel: &CancellationToken,
    items: I,
    limit: usize,
    op: F,
) -> Mapped<R>
where
    I: IntoIterator<Item = T>,
    F: Fn(CancellationToken, T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let outcomes = run_bounded(cancel, items, limit, op).await;
    collect_ordered(outcomes)
}

/// Evaluate `predicate` for every item concurrently and keep the items that
/// passed, in their original relative order.
pub async fn filter<T, F, Fut>(items: Vec<T>, predicate: F) -> Vec<T>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = bool>,
{
    let keep = join_all(items.iter().cloned().map(&predicate)).await;
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect()
}

async fn run_bounded<T, R, I, F, Fut>(
    cancel: &CancellationToken,
    items: I,
    limit: usize,
    op: F,
) -> Vec<Result<R>>
where
    I: IntoIterator<Item = T>,
    F: Fn(CancellationToken, T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let semaphore = Semaphore::new(limit.max(1));
    let semaphore = &semaphore;
    let op = &op;

    join_all(items.into_iter().map(|item| async move {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(CANCELLED_ITEM));
        }

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(CANCELLED_ITEM)),
            permit = semaphore.acquire() => permit.map_err(|e| {
                Error::internal_with_context("concurrency limit", e.to_string())
            })?,
        };

        // cancelled while queued for a permit
        if cancel.is_cancelled() {
            return Err(Error::cancelled(CANCELLED_ITEM));
        }

        op(cancel.clone(), item).await
    }))
    .await
}

fn collect_errors<R>(outcomes: Vec<Result<R>>) -> Result<()> {
    aggregate(outcomes.into_iter().filter_map(|o| o.err()).collect())
}

fn collect_ordered<R>(outcomes: Vec<Result<R>>) -> Mapped<R> {
    let mut outputs = Vec::with_capacity(outcomes.len());
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(value) => outputs.push(Some(value)),
            Err(e) => {
                outputs.push(None);
                errors.push(e);
            }
        }
    }
    Mapped {
        outputs,
        error: Error::join(errors),
    }
}

/// Index-aligned outputs of [`map`] and [`map_with_limit`]
#[derive(Debug)]
pub struct Mapped<R> {
    /// One slot per input item, `None` where the item failed or was skipped
    pub outputs: Vec<Option<R>>,
    /// Every failure combined, if any item failed
    pub error: Option<Error>,
}

impl<R> Mapped<R> {
    /// Positions of the items that produced no output
    pub fn failed_indices(&self) -> Vec<usize> {
        self.outputs
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.is_none().then_some(i))
            .collect()
    }

    /// Every output in input order if nothing failed, otherwise the combined error
    pub fn into_result(self) -> Result<Vec<R>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.outputs.into_iter().flatten().collect()),
        }
    }
}

/// Results gathered by [`Collector::wait`]
#[derive(Debug)]
pub struct Collected<T> {
    /// Outputs of the tasks that succeeded, in completion order
    pub results: Vec<T>,
    /// Every failure combined, if any task failed
    pub error: Option<Error>,
}

impl<T> Collected<T> {
    /// Successful outputs if nothing failed, otherwise the combined error
    pub fn into_result(self) -> Result<Vec<T>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.results),
        }
    }
}

/// Accumulates independent spawned tasks and joins them in one call.
///
/// Use it for concurrent work that does not fit a homogeneous list of items,
/// e.g. two different queries that should run side by side.
///
/// ```ignore
/// let mut collector = Collector::new();
/// collector.go(async move { labelled.list_volumes(&selector).await });
/// collector.go(async move { everything.list_volumes("").await });
/// let collected = collector.wait().await;
/// ```
pub struct Collector<T> {
    tasks: JoinSet<Result<T>>,
}

impl<T: Send + 'static> Collector<T> {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    /// Start `task` immediately on the runtime
    pub fn go<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Number of tasks submitted and not yet joined
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no tasks are pending
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every submitted task to finish
    pub async fn wait(mut self) -> Collected<T> {
        let mut results = Vec::new();
        let mut errors = Vec::new();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(Error::internal_with_context("collector", e.to_string())),
            }
        }

        Collected {
            results,
            error: Error::join(errors),
        }
    }
}

impl<T: Send + 'static> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}
