// SPDX-License-Identifier: Apache-2.0

//! crossquery: cross-schema query federation engine
//!
//! Builds a declarative query over several independently stored record
//! schemas that share a common entity identifier, loads matching data
//! concurrently from each schema's backing store, resolves join algebra
//! over the identifier sets, merges per-schema payloads into unified
//! result entities, and applies sorting and pagination.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use crossquery::backend::BackendRegistry;
//! use crossquery::executor::QueryExecutor;
//! use crossquery::filter::Operator;
//! use crossquery::query::Query;
//! use crossquery::types::{FieldValue, SchemaRef};
//!
//! # async fn example(rank_store: Arc<dyn crossquery::backend::SchemaBackend>) {
//! let rank = SchemaRef::new("rank");
//! let guild = SchemaRef::new("guild");
//!
//! let mut registry = BackendRegistry::new();
//! registry.register(rank.clone(), rank_store.clone());
//! registry.register(guild.clone(), rank_store);
//! let executor = QueryExecutor::new(registry);
//!
//! let results = Query::from(rank)
//!     .where_op("rank", Operator::Eq, FieldValue::Text("ADMIN".into()))
//!     .join(guild)
//!     .and()
//!     .execute(&executor)
//!     .await;
//! # }
//! ```

pub mod algebra;
pub mod backend;
pub mod entity;
pub mod error;
pub mod executor;
pub mod filter;
pub mod metrics;
pub mod observability;
pub mod query;
pub mod stream;
pub mod types;

pub use algebra::{IdSet, SetAlgebra};
pub use backend::{BackendRegistry, SchemaBackend};
pub use entity::{ResultEntity, ENTITY_ID_FIELD};
pub use error::{QueryEngineResult, QueryError};
pub use executor::QueryExecutor;
pub use filter::{FilterCondition, Operator};
pub use query::{JoinType, Query, QuerySpec, SortDirection, SortKey};
pub use types::{FieldValue, Identifier, QueryId, Record, SchemaRef};
