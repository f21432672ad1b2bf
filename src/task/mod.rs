//! Background task model and executor contract.
//!
//! Expensive backend work runs as long-lived asynchronous tasks owned by an
//! external task subsystem. This module defines the task identity and
//! metadata types, the [`TaskExecutor`] trait through which the rest of the
//! crate submits and awaits tasks, and a [`MockTaskExecutor`] with scripted
//! outcomes for wiring tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Opaque identifier for a unit of asynchronous backend work.
///
/// Allocated by the task subsystem on submission; monotonicity is an
/// implementation detail callers must not rely on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

/// Discriminates the backend operation a task performs.
///
/// Wire names match the backend's operation identifiers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "fetch_historic_price")]
    FetchHistoricPrice,
    #[serde(rename = "process_trade_history")]
    TradeHistory,
    #[serde(rename = "query_blockchain_balances_async")]
    QueryBlockchainBalances,
    #[serde(rename = "query_exchange_balances_async")]
    QueryExchangeBalances,
    #[serde(rename = "query_balances_async")]
    QueryBalances,
}

/// Metadata shown for a running task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMeta {
    pub title: String,
    pub description: String,
    /// When true the caller does not use the resolved value but still wants
    /// completion or failure observed.
    pub ignore_result: bool,
}

/// A submitted task: identity, operation discriminator, and metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub meta: TaskMeta,
}

impl Task {
    pub fn new(id: TaskId, task_type: TaskType, meta: TaskMeta) -> Self {
        Self {
            id,
            task_type,
            meta,
        }
    }
}

/// Operation-specific payload of a task submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum TaskRequest {
    /// Query historic exchange rates for a set of asset/timestamp pairs,
    /// denominated in `target_asset`.
    #[serde(rename_all = "camelCase")]
    QueryHistoricalRates {
        assets_timestamp: Vec<(String, i64)>,
        target_asset: String,
    },
}

/// Terminal outcome of a task that did not produce a result.
///
/// Cancellation is a first-class outcome, distinct from failure, so callers
/// can suppress user-visible errors for it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task was cancelled. Expected; callers treat affected keys as
    /// "no data available" and emit no notification.
    #[error("Task was cancelled")]
    Cancelled,

    /// The task failed in the backend or transport.
    #[error("Task failed: {0}")]
    Failed(String),
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// Contract of the external task subsystem.
///
/// Implementations must deliver the terminal outcome of a task (success,
/// cancellation, or failure) exactly once to exactly one awaiting call.
/// Timeouts, polling, and transport are entirely the implementor's concern;
/// callers must not assume an upper bound on `await_task`.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Submit a task request, returning its identifier.
    async fn submit(&self, request: TaskRequest) -> Result<TaskId, TaskError>;

    /// Suspend until the identified task completes.
    ///
    /// `ignore_cache_on_duplicate` asks the subsystem to run the task even
    /// if an identical one recently completed.
    async fn await_task(
        &self,
        id: TaskId,
        task_type: TaskType,
        meta: TaskMeta,
        ignore_cache_on_duplicate: bool,
    ) -> Result<Value, TaskError>;
}

/// One recorded `await_task` call on a [`MockTaskExecutor`].
#[derive(Clone, Debug, PartialEq)]
pub struct AwaitedTask {
    pub id: TaskId,
    pub task_type: TaskType,
    pub meta: TaskMeta,
    pub ignore_cache_on_duplicate: bool,
}

/// Mock executor for testing - records submissions and replays scripted
/// outcomes in order.
#[derive(Default)]
pub struct MockTaskExecutor {
    next_id: AtomicU64,
    outcomes: Mutex<VecDeque<Result<Value, TaskError>>>,
    requests: Mutex<Vec<TaskRequest>>,
    awaited: Mutex<Vec<AwaitedTask>>,
}

impl MockTaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of the next un-awaited task.
    pub fn push_outcome(&self, outcome: Result<Value, TaskError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Returns all submitted requests.
    pub fn requests(&self) -> Vec<TaskRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Returns all recorded `await_task` calls.
    pub fn awaited(&self) -> Vec<AwaitedTask> {
        self.awaited.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for MockTaskExecutor {
    async fn submit(&self, request: TaskRequest) -> Result<TaskId, TaskError> {
        self.requests.lock().unwrap().push(request);
        Ok(TaskId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn await_task(
        &self,
        id: TaskId,
        task_type: TaskType,
        meta: TaskMeta,
        ignore_cache_on_duplicate: bool,
    ) -> Result<Value, TaskError> {
        self.awaited.lock().unwrap().push(AwaitedTask {
            id,
            task_type,
            meta,
            ignore_cache_on_duplicate,
        });
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TaskError::Failed("no scripted outcome".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_type_wire_names() {
        assert_eq!(
            serde_json::to_value(TaskType::FetchHistoricPrice).unwrap(),
            json!("fetch_historic_price")
        );
        assert_eq!(
            serde_json::to_value(TaskType::TradeHistory).unwrap(),
            json!("process_trade_history")
        );
        assert_eq!(
            serde_json::to_value(TaskType::QueryBalances).unwrap(),
            json!("query_balances_async")
        );
    }

    #[test]
    fn test_request_serialization() {
        let request = TaskRequest::QueryHistoricalRates {
            assets_timestamp: vec![("BTC".to_string(), 1000)],
            target_asset: "USD".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "operation": "query_historical_rates",
                "assetsTimestamp": [["BTC", 1000]],
                "targetAsset": "USD"
            })
        );
    }

    #[test]
    fn test_task_wire_shape() {
        let task = Task::new(
            TaskId(7),
            TaskType::FetchHistoricPrice,
            TaskMeta {
                title: "Historic price query".to_string(),
                description: "Querying 2 historic prices in USD".to_string(),
                ignore_result: false,
            },
        );
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["id"], json!(7));
        assert_eq!(value["type"], json!("fetch_historic_price"));
        assert_eq!(value["meta"]["ignoreResult"], json!(false));
        assert_eq!(serde_json::from_value::<Task>(value).unwrap(), task);
    }

    #[test]
    fn test_cancelled_is_distinguishable() {
        assert!(TaskError::Cancelled.is_cancelled());
        assert!(!TaskError::Failed("boom".to_string()).is_cancelled());
    }

    #[tokio::test]
    async fn test_mock_executor_replays_outcomes_in_order() {
        let executor = MockTaskExecutor::new();
        executor.push_outcome(Ok(json!({"first": true})));
        executor.push_outcome(Err(TaskError::Cancelled));

        let request = TaskRequest::QueryHistoricalRates {
            assets_timestamp: vec![("ETH".to_string(), 2000)],
            target_asset: "EUR".to_string(),
        };
        let id = executor.submit(request.clone()).await.unwrap();
        assert_eq!(executor.requests(), vec![request]);

        let meta = TaskMeta {
            title: "t".to_string(),
            description: "d".to_string(),
            ignore_result: false,
        };
        let result = executor
            .await_task(id, TaskType::FetchHistoricPrice, meta.clone(), true)
            .await;
        assert_eq!(result.unwrap(), json!({"first": true}));

        let result = executor
            .await_task(id, TaskType::FetchHistoricPrice, meta.clone(), true)
            .await;
        assert_eq!(result.unwrap_err(), TaskError::Cancelled);

        // Exhausted scripts surface as failures, never hang.
        let result = executor
            .await_task(id, TaskType::FetchHistoricPrice, meta, true)
            .await;
        assert!(matches!(result, Err(TaskError::Failed(_))));

        let awaited = executor.awaited();
        assert_eq!(awaited.len(), 3);
        assert_eq!(awaited[0].id, id);
        assert!(awaited[0].ignore_cache_on_duplicate);
    }
}
