//! Completion barrier for per-database search operations.
//!
//! Every sub-operation settles into a [`Settled`] value instead of failing, and
//! the barrier waits for all of them. Results are folded in dispatch order, so
//! the aggregate never depends on which database answered first.

use std::future::Future;

use futures::future::join_all;

use crate::types::{DatabaseFailure, Hit, QueryResult, QueryStatus};

pub(crate) const SUCCESS_MESSAGE: &str = "data retrieved";
pub(crate) const FAILURE_MESSAGE: &str = "data retrieval failed";

/// Final state of one per-database operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Found(Vec<Hit>),
    Failed(DatabaseFailure),
}

/// Drive every operation concurrently and return their outcomes in input order.
pub async fn settle_all<I, F>(operations: I) -> Vec<Settled>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Settled>,
{
    join_all(operations).await
}

/// Fold settled outcomes into one result.
///
/// `preview_limit` truncates the combined hits, not each database's share.
/// The result is a soft failure only when nothing succeeded and nothing was found.
pub fn aggregate(outcomes: Vec<Settled>, preview_limit: Option<usize>) -> QueryResult {
    let mut records = Vec::new();
    let mut failures = Vec::new();
    let mut succeeded = 0usize;

    for outcome in outcomes {
        match outcome {
            Settled::Found(hits) => {
                succeeded += 1;
                records.extend(hits);
            }
            Settled::Failed(failure) => failures.push(failure),
        }
    }

    if let Some(limit) = preview_limit {
        records.truncate(limit);
    }

    if succeeded == 0 && records.is_empty() {
        QueryResult {
            status: QueryStatus::SoftFailure,
            records,
            message: FAILURE_MESSAGE.to_string(),
            failures,
        }
    } else {
        QueryResult {
            status: QueryStatus::Success,
            records,
            message: SUCCESS_MESSAGE.to_string(),
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn hits(origin: &str, n: usize) -> Vec<Hit> {
        (0..n)
            .map(|i| Hit {
                origin: origin.to_string(),
                payload: json!({"i": i}),
            })
            .collect()
    }

    fn failed(database: &str) -> Settled {
        Settled::Failed(DatabaseFailure {
            database: database.to_string(),
            reason: "table missing".to_string(),
        })
    }

    #[test]
    fn preview_limit_applies_to_combined_hits() {
        let result = aggregate(
            vec![Settled::Found(hits("a", 20)), Settled::Found(hits("b", 20))],
            Some(25),
        );
        assert_eq!(result.records.len(), 25);
        assert!(result.records[..20].iter().all(|h| h.origin == "a"));
        assert!(result.records[20..].iter().all(|h| h.origin == "b"));
    }

    #[test]
    fn partial_failure_is_still_success() {
        let result = aggregate(vec![failed("a"), Settled::Found(hits("b", 1))], None);
        assert!(result.is_success());
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].database, "a");
    }

    #[test]
    fn success_with_no_hits_is_not_a_failure() {
        let result = aggregate(vec![failed("a"), Settled::Found(vec![])], None);
        assert!(result.is_success());
        assert!(result.records.is_empty());
    }

    #[test]
    fn total_failure_is_soft_failure() {
        let result = aggregate(vec![failed("a"), failed("b")], None);
        assert_eq!(result.status, QueryStatus::SoftFailure);
        assert_eq!(result.code(), 500);
        assert_eq!(result.message, FAILURE_MESSAGE);
        assert_eq!(result.failures.len(), 2);
    }

    #[test]
    fn no_operations_is_soft_failure() {
        let result = aggregate(vec![], None);
        assert_eq!(result.status, QueryStatus::SoftFailure);
    }

    #[tokio::test]
    async fn settle_all_keeps_dispatch_order() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Settled::Found(hits("first", 1))
        };
        let fast = async { Settled::Found(hits("second", 1)) };
        let outcomes = settle_all(vec![
            Box::pin(slow) as std::pin::Pin<Box<dyn Future<Output = Settled> + Send>>,
            Box::pin(fast),
        ])
        .await;
        let result = aggregate(outcomes, None);
        let origins: Vec<_> = result.records.iter().map(|h| h.origin.as_str()).collect();
        assert_eq!(origins, ["first", "second"]);
    }
}
