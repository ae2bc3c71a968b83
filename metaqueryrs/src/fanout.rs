//! Bounded-concurrency fan-out over independent async work items.
//!
//! Two policies:
//! - [`try_for_each_bounded`] aborts on the first error and drops the rest.
//! - [`for_each_best_effort`] runs everything and reports every failure.

use std::future::Future;

use futures::stream::{self, StreamExt, TryStreamExt};

use crate::error::{MetaqueryError, Result};

/// Runs `f` over `items` with at most `limit` in flight. Results keep input
/// order. The first error is returned and unscheduled items never start.
pub async fn try_for_each_bounded<I, T, F, Fut, R>(limit: usize, items: I, f: F) -> Result<Vec<R>>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    stream::iter(items)
        .map(f)
        .buffered(limit.max(1))
        .try_collect()
        .await
}

/// Outcome of a best-effort fan-out, indexed by input position.
#[derive(Debug)]
pub struct FanoutReport<R> {
    pub total: usize,
    pub successes: Vec<(usize, R)>,
    pub failures: Vec<(usize, MetaqueryError)>,
}

impl<R> FanoutReport<R> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// All results in input order, or a `Fanout` error listing every failure.
    pub fn into_result(self) -> Result<Vec<R>> {
        if self.failures.is_empty() {
            return Ok(self.successes.into_iter().map(|(_, r)| r).collect());
        }
        Err(MetaqueryError::Fanout {
            total: self.total,
            failures: self
                .failures
                .iter()
                .map(|(index, err)| format!("item {index}: {err}"))
                .collect(),
        })
    }
}

/// Runs `f` over every item with at most `limit` in flight. One item's
/// failure never stops the others; each failure is logged and reported.
pub async fn for_each_best_effort<I, T, F, Fut, R>(
    limit: usize,
    items: I,
    mut f: F,
) -> FanoutReport<R>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let mut outcomes: Vec<(usize, Result<R>)> = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let fut = f(item);
            async move { (index, fut.await) }
        })
        .buffer_unordered(limit.max(1))
        .collect()
        .await;
    outcomes.sort_by_key(|(index, _)| *index);

    let total = outcomes.len();
    let mut report = FanoutReport {
        total,
        successes: Vec::with_capacity(total),
        failures: Vec::new(),
    };
    for (index, outcome) in outcomes {
        match outcome {
            Ok(value) => report.successes.push((index, value)),
            Err(err) => {
                tracing::warn!(index, total, error = %err, "fan-out item failed");
                report.failures.push((index, err));
            }
        }
    }
    report
}
