// SPDX-License-Identifier: Apache-2.0

//! Streaming front-end over the executor
//!
//! Large-result consumers receive entities through a bounded channel
//! instead of one materialized vector. The join/filter/sort semantics are
//! identical to [`QueryExecutor::execute`]: set algebra needs the full
//! identifier universe per schema, so streaming starts only after the
//! merge and does not change what is computed.

use tokio::sync::mpsc;

use crate::entity::ResultEntity;
use crate::error::QueryEngineResult;
use crate::executor::QueryExecutor;
use crate::query::spec::QuerySpec;

/// Events emitted over a result stream
#[derive(Debug)]
pub enum StreamEvent {
    /// One merged result entity, in final (sorted, paginated) order
    Entity(Box<ResultEntity>),
    /// End of stream, with the total number of entities emitted
    Done(u64),
}

/// Sender half of a result stream
pub type StreamSender = mpsc::Sender<StreamEvent>;

/// Executes the query and streams the results through `sender`.
///
/// Emission stops early when the receiver is dropped (treated as
/// cancellation by the consumer, not an error). Returns the number of
/// entities produced by the execution.
pub async fn execute_stream(
    executor: &QueryExecutor,
    spec: &QuerySpec,
    sender: StreamSender,
) -> QueryEngineResult<u64> {
    let entities = executor.execute(spec).await?;
    let count = entities.len() as u64;

    for entity in entities {
        if sender.send(StreamEvent::Entity(Box::new(entity))).await.is_err() {
            break; // receiver dropped
        }
    }
    let _ = sender.send(StreamEvent::Done(count)).await;
    Ok(count)
}

/// Executes the query and invokes `consumer` once per result entity
pub async fn for_each(
    executor: &QueryExecutor,
    spec: &QuerySpec,
    mut consumer: impl FnMut(ResultEntity),
) -> QueryEngineResult<u64> {
    let entities = executor.execute(spec).await?;
    let count = entities.len() as u64;
    for entity in entities {
        consumer(entity);
    }
    Ok(count)
}
