//! Chunked bulk operations with partial-failure tolerance.
//!
//! `run_batch` splits the items into fixed-size chunks and executes them
//! with bounded concurrency (default sequential). A failing chunk does not
//! abort the batch: its items are re-run one by one so a single bad record
//! ends up in `failed` while the rest of the chunk still goes through. Bulk
//! imports of generated robot sources must not be blocked by one malformed
//! row.

use futures::StreamExt;
use futures::stream;
use std::future::Future;
use tracing::debug;

use crate::config::BatchConfig;
use crate::error::ClientError;

#[derive(Debug)]
pub struct BatchFailure<T> {
    pub item: T,
    pub error: ClientError,
}

/// Result of a batch run. Partial failure is a normal outcome, not an
/// error.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<BatchFailure<T>>,
}

impl<T> BatchOutcome<T> {
    pub fn is_fully_successful(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run `operation` over `items` in chunks of `config.batch_size`, at most
/// `config.max_concurrency` chunks at a time. Chunk results are merged in
/// input order.
pub async fn run_batch<T, F, Fut>(
    items: Vec<T>,
    config: &BatchConfig,
    operation: F,
) -> BatchOutcome<T>
where
    T: Clone + Send,
    F: Fn(Vec<T>) -> Fut + Sync,
    Fut: Future<Output = Result<(), ClientError>>,
{
    let chunks: Vec<Vec<T>> = items
        .chunks(config.batch_size.max(1))
        .map(|c| c.to_vec())
        .collect();
    let total_chunks = chunks.len();

    let results: Vec<BatchOutcome<T>> = stream::iter(
        chunks
            .into_iter()
            .map(|chunk| process_chunk(chunk, &operation)),
    )
    // `buffered` (not unordered) keeps outcome order aligned with input
    .buffered(config.max_concurrency.max(1))
    .collect()
    .await;

    let mut outcome = BatchOutcome {
        succeeded: Vec::new(),
        failed: Vec::new(),
    };
    for partial in results {
        outcome.succeeded.extend(partial.succeeded);
        outcome.failed.extend(partial.failed);
    }
    debug!(
        "batch finished: {} chunks, {} ok, {} failed",
        total_chunks,
        outcome.succeeded.len(),
        outcome.failed.len()
    );
    outcome
}

/// Execute one chunk; on failure isolate the bad records by retrying each
/// item on its own.
async fn process_chunk<T, F, Fut>(chunk: Vec<T>, operation: &F) -> BatchOutcome<T>
where
    T: Clone + Send,
    F: Fn(Vec<T>) -> Fut + Sync,
    Fut: Future<Output = Result<(), ClientError>>,
{
    match operation(chunk.clone()).await {
        Ok(()) => BatchOutcome {
            succeeded: chunk,
            failed: Vec::new(),
        },
        Err(chunk_error) => {
            if chunk.len() == 1 {
                let item = chunk.into_iter().next().expect("chunk has one item");
                return BatchOutcome {
                    succeeded: Vec::new(),
                    failed: vec![BatchFailure {
                        item,
                        error: chunk_error,
                    }],
                };
            }
            debug!("chunk of {} failed, isolating per item", chunk.len());
            let mut outcome = BatchOutcome {
                succeeded: Vec::new(),
                failed: Vec::new(),
            };
            for item in chunk {
                match operation(vec![item.clone()]).await {
                    Ok(()) => outcome.succeeded.push(item),
                    Err(error) => outcome.failed.push(BatchFailure { item, error }),
                }
            }
            outcome
        }
    }
}
