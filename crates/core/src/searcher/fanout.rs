//! Concurrent execution of search plans.

use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::torznab::{TorzResult, TorznabError};

use super::types::SearchPlan;

/// The result of one plan's execution.
pub(crate) struct PlanOutcome {
    pub plan_index: usize,
    pub result: Result<Vec<TorzResult>, TorznabError>,
}

/// Run every plan concurrently, one logical task per (indexer, query).
///
/// With a `deadline`, the collector returns whatever has arrived when it
/// expires; outstanding queries are cancelled and logged, never awaited.
/// Individual failures are collected into the outcome list and do not
/// abort siblings.
pub(crate) async fn execute_plans(
    plans: &[SearchPlan],
    deadline: Option<Duration>,
) -> Vec<PlanOutcome> {
    let mut in_flight: FuturesUnordered<_> = plans
        .iter()
        .enumerate()
        .map(|(plan_index, plan)| async move {
            let start = Instant::now();
            let result = plan.client.search(&plan.query).await;
            match &result {
                Ok(items) => debug!(
                    indexer = plan.client.id(),
                    query = %plan.query.encode(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    count = items.len(),
                    "indexer search completed"
                ),
                Err(err) => error!(
                    indexer = plan.client.id(),
                    query = %plan.query.encode(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    error = %err,
                    "indexer search failed"
                ),
            }
            PlanOutcome { plan_index, result }
        })
        .collect();

    let mut outcomes = Vec::with_capacity(plans.len());
    match deadline {
        Some(deadline) => {
            let expires_at = tokio::time::Instant::now() + deadline;
            loop {
                match tokio::time::timeout_at(expires_at, in_flight.next()).await {
                    Ok(Some(outcome)) => outcomes.push(outcome),
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            pending = in_flight.len(),
                            "indexer fan-out timed out, returning partial results"
                        );
                        break;
                    }
                }
            }
        }
        None => {
            while let Some(outcome) = in_flight.next().await {
                outcomes.push(outcome);
            }
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTorznabClient;
    use crate::torznab::{Function, Query};
    use std::sync::Arc;

    fn plan(client: Arc<MockTorznabClient>) -> SearchPlan {
        SearchPlan {
            client,
            query: Query::new(Function::Search),
            is_exact: false,
        }
    }

    #[tokio::test]
    async fn test_all_plans_complete_without_deadline() {
        let plans = vec![
            plan(Arc::new(
                MockTorznabClient::named("a").with_results(vec![TorzResult {
                    hash: "aa".to_string(),
                    ..TorzResult::default()
                }]),
            )),
            plan(Arc::new(
                MockTorznabClient::named("b").with_failure("boom"),
            )),
        ];

        let outcomes = execute_plans(&plans, None).await;
        assert_eq!(outcomes.len(), 2);
        let ok = outcomes.iter().filter(|o| o.result.is_ok()).count();
        let err = outcomes.iter().filter(|o| o.result.is_err()).count();
        assert_eq!((ok, err), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_partial_results() {
        let plans = vec![
            plan(Arc::new(
                MockTorznabClient::named("fast").with_results(vec![TorzResult {
                    hash: "aa".to_string(),
                    ..TorzResult::default()
                }]),
            )),
            plan(Arc::new(
                MockTorznabClient::named("slow")
                    .with_search_delay(Duration::from_secs(10))
                    .with_results(vec![TorzResult {
                        hash: "bb".to_string(),
                        ..TorzResult::default()
                    }]),
            )),
        ];

        let outcomes = execute_plans(&plans, Some(Duration::from_secs(1))).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].result.as_ref().unwrap()[0].hash, "aa");
    }
}
