//! Bounded fan-out of async work over a list of items.
//!
//! Every item runs to completion; one failure never cancels the rest.

use std::future::Future;

use anyhow::Result;
use futures_util::stream::{self, StreamExt};

/// What one item produced.
#[derive(Debug)]
pub struct Outcome<I, T> {
    pub item: I,
    pub result: Result<T>,
}

/// Run `work` for each item with at most `limit` in flight (0 = no limit).
/// Outcomes come back in input order.
pub async fn run_all<I, T, F, Fut>(items: Vec<I>, limit: usize, work: F) -> Vec<Outcome<I, T>>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let limit = match limit {
        0 => items.len().max(1),
        n => n,
    };
    stream::iter(items)
        .map(|item| {
            let pending = work(item.clone());
            async move {
                Outcome {
                    item,
                    result: pending.await,
                }
            }
        })
        .buffered(limit)
        .collect()
        .await
}

/// Split outcomes into successes and `(item, error)` failures.
pub fn partition<I, T>(outcomes: Vec<Outcome<I, T>>) -> (Vec<(I, T)>, Vec<(I, anyhow::Error)>) {
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for Outcome { item, result } in outcomes {
        match result {
            Ok(value) => ok.push((item, value)),
            Err(e) => failed.push((item, e)),
        }
    }
    (ok, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::bail;

    #[tokio::test]
    async fn keeps_input_order() {
        // Earlier items finish last.
        let outcomes = run_all(vec![30u64, 20, 10, 0], 0, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms * 2)
        })
        .await;
        let values: Vec<u64> = outcomes.into_iter().map(|o| o.result.unwrap()).collect();
        assert_eq!(values, [60, 40, 20, 0]);
    }

    #[tokio::test]
    async fn respects_the_limit() {
        let running = &AtomicUsize::new(0);
        let peak = &AtomicUsize::new(0);

        let outcomes = run_all((0..12).collect(), 3, move |_: u32| async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert_eq!(outcomes.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_rest() {
        let outcomes = run_all(vec!["a", "bad", "c"], 2, |item| async move {
            if item == "bad" {
                bail!("no statistics found");
            }
            Ok(item.len())
        })
        .await;

        let (ok, failed) = partition(outcomes);
        assert_eq!(ok, [("a", 1), ("c", 1)]);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "bad");
        assert_eq!(failed[0].1.to_string(), "no statistics found");
    }

    #[tokio::test]
    async fn empty_input() {
        let outcomes = run_all(Vec::<u8>::new(), 0, |_| async { Ok(()) }).await;
        assert!(outcomes.is_empty());
    }
}
