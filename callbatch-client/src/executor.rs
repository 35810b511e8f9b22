use callbatch_core::{
    Address, Batch, BatchId, BlockTag, CallQueue, DecodeError, EncodeError, ProtocolError,
};
use callbatch_transport::{AggregateRequest, Aggregator, CallReply, TransportError};
use futures::future::try_join_all;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Configuration for batch execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of calls in a single round trip
    pub max_batch_size: usize,
    /// Round trip timeout in milliseconds
    pub timeout_ms: u64,
    /// Fail the whole batch when any individual call fails
    pub require_success: bool,
    /// Block every round trip is evaluated against
    pub block: BlockTag,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            timeout_ms: 30000,
            require_success: true,
            block: BlockTag::Latest,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to encode call {index} ({method}): {source}")]
    Encode {
        index: usize,
        method: String,
        #[source]
        source: EncodeError,
    },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Round trip timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("Expected {expected} replies, got {found}")]
    ReplyCount { expected: usize, found: usize },
    #[error("Call {index} ({method}) failed: {reason}")]
    CallFailed {
        index: usize,
        method: String,
        reason: String,
    },
}

/// What happened to one call of an executed batch.
#[derive(Debug)]
pub enum CallStatus {
    /// The response was decoded into the call's destination.
    Resolved,
    /// The remote reported a failure; the destination is untouched.
    Failed(String),
    /// The response could not be decoded; the destination is untouched.
    Undecodable(DecodeError),
}

#[derive(Debug)]
pub struct CallResult {
    pub index: usize,
    pub target: Address,
    pub method: String,
    pub status: CallStatus,
}

impl CallResult {
    pub fn is_resolved(&self) -> bool {
        matches!(self.status, CallStatus::Resolved)
    }
}

/// Per-call outcome of [`BatchExecutor::execute`], in batch order.
#[derive(Debug)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub results: Vec<CallResult>,
}

impl BatchReport {
    pub fn all_resolved(&self) -> bool {
        self.results.iter().all(CallResult::is_resolved)
    }

    pub fn resolved(&self) -> usize {
        self.results.iter().filter(|r| r.is_resolved()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CallResult> {
        self.results.iter().filter(|r| !r.is_resolved())
    }
}

/// Drives a batch through encode, aggregated round trips and decode.
#[derive(Debug)]
pub struct BatchExecutor<A> {
    aggregator: A,
    config: ExecutorConfig,
}

impl<A: Aggregator> BatchExecutor<A> {
    pub fn new(aggregator: A) -> Self {
        Self::with_config(aggregator, ExecutorConfig::default())
    }

    pub fn with_config(aggregator: A, config: ExecutorConfig) -> Self {
        Self { aggregator, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &A {
        &self.aggregator
    }

    /// Seals `queue` and executes everything captured into it.
    pub async fn execute_queue(&self, queue: &CallQueue) -> Result<BatchReport, ExecutorError> {
        let batch = queue.take_batch()?;
        self.execute(&batch).await
    }

    /// Executes `batch`, resolving each call's destination from its response.
    ///
    /// Responses are matched to calls by position. With `require_success`
    /// set, any failed call fails the batch before a single destination is
    /// written. Decode failures never fail the batch; they are reported on
    /// the call they belong to.
    #[tracing::instrument(skip_all, fields(batch = %batch.id(), calls = batch.len()))]
    pub async fn execute(&self, batch: &Batch) -> Result<BatchReport, ExecutorError> {
        let requests = batch
            .iter()
            .enumerate()
            .map(|(index, call)| {
                call.encode()
                    .map(|payload| AggregateRequest {
                        target: *call.target(),
                        payload,
                    })
                    .map_err(|source| ExecutorError::Encode {
                        index,
                        method: call.method().to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let replies = self.round_trips(requests).await?;
        if replies.len() != batch.len() {
            return Err(ExecutorError::ReplyCount {
                expected: batch.len(),
                found: replies.len(),
            });
        }

        if self.config.require_success {
            if let Some((index, (call, reply))) = batch
                .iter()
                .zip(&replies)
                .enumerate()
                .find(|(_, (_, reply))| !reply.success)
            {
                return Err(ExecutorError::CallFailed {
                    index,
                    method: call.method().to_string(),
                    reason: failure_reason(reply),
                });
            }
        }

        let results = batch
            .iter()
            .zip(&replies)
            .enumerate()
            .map(|(index, (call, reply))| {
                let status = if !reply.success {
                    CallStatus::Failed(failure_reason(reply))
                } else {
                    match call.decode(&reply.data) {
                        Ok(()) => CallStatus::Resolved,
                        Err(e) => {
                            warn!(index, method = call.method(), error = %e, "failed to decode response");
                            CallStatus::Undecodable(e)
                        }
                    }
                };
                CallResult {
                    index,
                    target: *call.target(),
                    method: call.method().to_string(),
                    status,
                }
            })
            .collect::<Vec<_>>();

        let report = BatchReport {
            batch_id: batch.id(),
            results,
        };
        debug!(resolved = report.resolved(), "batch executed");
        Ok(report)
    }

    async fn round_trips(
        &self,
        requests: Vec<AggregateRequest>,
    ) -> Result<Vec<CallReply>, ExecutorError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_size = self.config.max_batch_size.max(1);
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let block = self.config.block;
        debug!(
            requests = requests.len(),
            chunks = requests.len().div_ceil(chunk_size),
            %block,
            "sending round trips"
        );

        let trips = requests
            .chunks(chunk_size)
            .map(|chunk| self.round_trip(chunk.to_vec(), block, timeout));
        Ok(try_join_all(trips).await?.into_iter().flatten().collect())
    }

    async fn round_trip(
        &self,
        requests: Vec<AggregateRequest>,
        block: BlockTag,
        timeout: Duration,
    ) -> Result<Vec<CallReply>, ExecutorError> {
        let expected = requests.len();
        let replies = tokio::time::timeout(timeout, self.aggregator.aggregate(requests, block))
            .await
            .map_err(|_| ExecutorError::Timeout {
                timeout_ms: self.config.timeout_ms,
            })??;
        if replies.len() != expected {
            return Err(ExecutorError::ReplyCount {
                expected,
                found: replies.len(),
            });
        }
        Ok(replies)
    }
}

fn failure_reason(reply: &CallReply) -> String {
    if reply.data.is_empty() {
        "call failed without reason".to_string()
    } else {
        String::from_utf8_lossy(&reply.data).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use callbatch_core::{Call, Destination, Slot};
    use std::sync::Mutex;

    /// Answers every request with its own payload, or a failure for `revert`.
    #[derive(Default)]
    struct Mirror {
        trips: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Aggregator for Mirror {
        async fn aggregate(
            &self,
            requests: Vec<AggregateRequest>,
            _block: BlockTag,
        ) -> Result<Vec<CallReply>, TransportError> {
            self.trips.lock().unwrap().push(requests.len());
            Ok(requests
                .into_iter()
                .map(|r| {
                    if r.payload.as_ref() == b"revert" {
                        CallReply::failure(&b"execution reverted"[..])
                    } else {
                        CallReply::success(r.payload)
                    }
                })
                .collect())
        }
    }

    fn echo_call<V>(slot: &Slot<V>, payload: &'static [u8]) -> Call
    where
        V: serde::de::DeserializeOwned + Send + Sync + 'static,
    {
        let destination = Destination::of(slot);
        let sink = destination.clone();
        Call::new(
            Address::new([3; 20]),
            "echo",
            destination,
            move || Ok(Bytes::from_static(payload)),
            move |raw| {
                let value = serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed {
                    method: "echo".into(),
                    reason: e.to_string(),
                })?;
                sink.store("echo", value)
            },
        )
    }

    #[tokio::test]
    async fn test_execute_resolves_in_order() {
        let x: Slot<u64> = Slot::new();
        let y: Slot<String> = Slot::new();
        let batch = Batch::new(vec![echo_call(&x, b"42"), echo_call(&y, b"\"bar\"")]);

        let executor = BatchExecutor::new(Mirror::default());
        let report = executor.execute(&batch).await.unwrap();

        assert!(report.all_resolved());
        assert_eq!(report.batch_id, batch.id());
        assert_eq!(x.get(), Some(42));
        assert_eq!(y.get(), Some("bar".to_string()));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_round_trip() {
        let executor = BatchExecutor::new(Mirror::default());
        let report = executor.execute(&Batch::new(Vec::new())).await.unwrap();
        assert!(report.results.is_empty());
        assert!(executor.aggregator().trips.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunks_by_max_batch_size() {
        let slots: Vec<Slot<u64>> = (0..5).map(|_| Slot::new()).collect();
        let batch = Batch::new(slots.iter().map(|s| echo_call(s, b"7")).collect());

        let config = ExecutorConfig {
            max_batch_size: 2,
            ..Default::default()
        };
        let executor = BatchExecutor::with_config(Mirror::default(), config);
        let report = executor.execute(&batch).await.unwrap();

        assert_eq!(report.resolved(), 5);
        let mut trips = executor.aggregator().trips.lock().unwrap().clone();
        trips.sort_unstable();
        assert_eq!(trips, vec![1, 2, 2]);
        assert!(slots.iter().all(|s| s.get() == Some(7)));
    }

    #[tokio::test]
    async fn test_require_success_fails_whole_batch() {
        let ok: Slot<u64> = Slot::new();
        let bad: Slot<u64> = Slot::new();
        let batch = Batch::new(vec![echo_call(&ok, b"1"), echo_call(&bad, b"revert")]);

        let executor = BatchExecutor::new(Mirror::default());
        let err = executor.execute(&batch).await.unwrap_err();
        assert!(matches!(err, ExecutorError::CallFailed { index: 1, .. }));
        assert!(!ok.is_resolved());
    }

    #[tokio::test]
    async fn test_failures_reported_per_call_when_allowed() {
        let ok: Slot<u64> = Slot::new();
        let bad: Slot<u64> = Slot::new();
        let batch = Batch::new(vec![echo_call(&ok, b"1"), echo_call(&bad, b"revert")]);

        let config = ExecutorConfig {
            require_success: false,
            ..Default::default()
        };
        let report = BatchExecutor::with_config(Mirror::default(), config)
            .execute(&batch)
            .await
            .unwrap();

        assert_eq!(ok.get(), Some(1));
        assert!(!bad.is_resolved());
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert!(matches!(&failed[0].status, CallStatus::Failed(r) if r == "execution reverted"));
    }

    #[tokio::test]
    async fn test_decode_error_is_scoped_to_call() {
        let a: Slot<u64> = Slot::new();
        let b: Slot<bool> = Slot::new();
        let c: Slot<u64> = Slot::new();
        let batch = Batch::new(vec![
            echo_call(&a, b"1"),
            echo_call(&b, b"\"not a bool\""),
            echo_call(&c, b"3"),
        ]);

        let report = BatchExecutor::new(Mirror::default()).execute(&batch).await.unwrap();
        assert_eq!(report.resolved(), 2);
        assert!(matches!(report.results[1].status, CallStatus::Undecodable(_)));
        assert_eq!(a.get(), Some(1));
        assert!(!b.is_resolved());
        assert_eq!(c.get(), Some(3));
    }

    #[tokio::test]
    async fn test_encode_error_names_call() {
        let slot: Slot<u64> = Slot::new();
        let call = Call::new(
            Address::new([3; 20]),
            "broken",
            Destination::of(&slot),
            || {
                Err(EncodeError::UnknownMethod {
                    interface: "Test".into(),
                    method: "broken".into(),
                })
            },
            |_| Ok(()),
        );
        let err = BatchExecutor::new(Mirror::default())
            .execute(&Batch::new(vec![call]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Encode { index: 0, ref method, .. } if method == "broken"));
    }

    struct Short;

    #[async_trait]
    impl Aggregator for Short {
        async fn aggregate(
            &self,
            _requests: Vec<AggregateRequest>,
            _block: BlockTag,
        ) -> Result<Vec<CallReply>, TransportError> {
            Ok(vec![CallReply::success(&b"1"[..])])
        }
    }

    #[tokio::test]
    async fn test_reply_count_mismatch() {
        let a: Slot<u64> = Slot::new();
        let b: Slot<u64> = Slot::new();
        let batch = Batch::new(vec![echo_call(&a, b"1"), echo_call(&b, b"2")]);
        let err = BatchExecutor::new(Short).execute(&batch).await.unwrap_err();
        assert!(matches!(err, ExecutorError::ReplyCount { expected: 2, found: 1 }));
        assert!(!a.is_resolved());
    }

    struct Stalled;

    #[async_trait]
    impl Aggregator for Stalled {
        async fn aggregate(
            &self,
            _requests: Vec<AggregateRequest>,
            _block: BlockTag,
        ) -> Result<Vec<CallReply>, TransportError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_timeout() {
        let slot: Slot<u64> = Slot::new();
        let config = ExecutorConfig {
            timeout_ms: 50,
            ..Default::default()
        };
        let err = BatchExecutor::with_config(Stalled, config)
            .execute(&Batch::new(vec![echo_call(&slot, b"1")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn test_execute_queue_seals() {
        let slot: Slot<u64> = Slot::new();
        let queue = CallQueue::new();
        queue.push(echo_call(&slot, b"9")).unwrap();

        let executor = BatchExecutor::new(Mirror::default());
        let report = executor.execute_queue(&queue).await.unwrap();
        assert!(report.all_resolved());
        assert!(queue.is_sealed());

        let err = executor.execute_queue(&queue).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Protocol(ProtocolError::QueueSealed)));
    }
}
