// SPDX-License-Identifier: Apache-2.0

//! Schema backend contract
//!
//! Every schema is persisted by some external store behind this trait. The
//! executor receives backends through an explicit [`BackendRegistry`] rather
//! than any static lookup, so wiring is visible at construction time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::QueryEngineResult;
use crate::filter::FilterCondition;
use crate::types::{Identifier, Record, SchemaRef};

/// Storage adapter for one or more schemas.
///
/// Backends differ in filter-pushdown capability: a store that supports
/// native queries receives translatable filters (and, for join-free queries,
/// the result window) directly; any other store must be able to surface its
/// full record set through [`SchemaBackend::load_all`], which is mandatory.
#[async_trait]
pub trait SchemaBackend: Send + Sync {
    /// Unique identifier for this backend (e.g. "sql", "document", "kv")
    fn backend_id(&self) -> &'static str;

    /// Whether this backend can evaluate translatable filters natively
    fn supports_native_queries(&self) -> bool;

    /// Executes a filtered query natively.
    ///
    /// Only called when [`SchemaBackend::supports_native_queries`] is true.
    /// `limit`/`offset` are passed only when the engine can delegate the
    /// whole result window (join-free query on the root schema); otherwise
    /// they are `None` and pagination happens after the merge.
    async fn query(
        &self,
        schema: &SchemaRef,
        filters: &[FilterCondition],
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> QueryEngineResult<HashMap<Identifier, Record>>;

    /// Loads the schema's full record set for in-memory filtering
    async fn load_all(&self, schema: &SchemaRef) -> QueryEngineResult<HashMap<Identifier, Record>>;
}

/// Maps each schema to the backend that stores it.
///
/// A schema with no registered backend is not an error at this level: the
/// executor degrades it to an empty record set with a warning.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<SchemaRef, Arc<dyn SchemaBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Registers the backend that stores `schema`
    pub fn register(&mut self, schema: SchemaRef, backend: Arc<dyn SchemaBackend>) {
        self.backends.insert(schema, backend);
    }

    pub fn get(&self, schema: &SchemaRef) -> Option<Arc<dyn SchemaBackend>> {
        self.backends.get(schema).cloned()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
