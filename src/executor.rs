// SPDX-License-Identifier: Apache-2.0

//! Join execution orchestrator
//!
//! Runs one query end-to-end:
//! collect schemas → load each schema in parallel → resolve the join algebra
//! over the identifier sets → merge payloads into result entities → sort →
//! paginate.
//!
//! The await on the per-schema load tasks is the only synchronization
//! barrier in the pipeline; everything after it runs once, on the thread
//! that observes barrier completion. Concurrent executions are independent.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::algebra::{IdSet, SetAlgebra};
use crate::backend::{BackendRegistry, SchemaBackend};
use crate::entity::ResultEntity;
use crate::error::{QueryEngineResult, QueryError};
use crate::filter::{partition_translatable, FilterCondition};
use crate::metrics;
use crate::query::spec::{JoinType, NullOrdering, QuerySpec, SortDirection, SortKey};
use crate::types::{Identifier, QueryId, Record, SchemaRef};

/// Timeout per schema load task
pub const LOAD_TIMEOUT_MS: u64 = 30_000;

/// Default timeout for a whole execution when using
/// [`QueryExecutor::execute_with_timeout`]
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 60_000;

/// One schema's loaded data: the records plus the identifier set derived
/// from them. The identifier set is held behind one `Arc` for the whole
/// execution so repeated joins against the same schema hit the algebra
/// engine's identity-keyed cache.
struct LoadedSchema {
    records: HashMap<Identifier, Record>,
    ids: Arc<IdSet>,
}

/// Executes [`QuerySpec`]s against a set of registered backends.
///
/// Backends are injected at construction; there is no global lookup. The
/// executor holds no per-query state, so one instance serves any number of
/// concurrent executions.
pub struct QueryExecutor {
    registry: Arc<BackendRegistry>,
    algebra: Arc<SetAlgebra>,
}

impl QueryExecutor {
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            algebra: Arc::new(SetAlgebra::new()),
        }
    }

    /// Builds an executor sharing an existing algebra engine (and its
    /// intersection cache) with other executors.
    pub fn with_algebra(registry: Arc<BackendRegistry>, algebra: Arc<SetAlgebra>) -> Self {
        Self { registry, algebra }
    }

    pub fn algebra(&self) -> &Arc<SetAlgebra> {
        &self.algebra
    }

    /// Executes a query to completion.
    ///
    /// Any load failure fails the whole call; no partial results are
    /// returned. A schema with no registered backend is degraded to an
    /// empty record set with a warning, which then participates normally
    /// (and usually eliminates entries) in the join algebra.
    #[instrument(skip(self, spec), fields(root = %spec.root(), joins = spec.joins().len()))]
    pub async fn execute(&self, spec: &QuerySpec) -> QueryEngineResult<Vec<ResultEntity>> {
        self.execute_with_cancel(spec, CancellationToken::new())
            .await
    }

    /// Executes with an overall deadline on top of the per-load timeouts
    pub async fn execute_with_timeout(
        &self,
        spec: &QuerySpec,
        timeout_ms: u64,
    ) -> QueryEngineResult<Vec<ResultEntity>> {
        match timeout(Duration::from_millis(timeout_ms), self.execute(spec)).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_timeout();
                Err(QueryError::Timeout { timeout_ms })
            }
        }
    }

    /// Executes with an explicit cancellation token threaded through the
    /// load tasks and the barrier wait. A cancelled execution fails with
    /// [`QueryError::Cancelled`].
    #[instrument(skip(self, spec, cancel), fields(root = %spec.root()))]
    pub async fn execute_with_cancel(
        &self,
        spec: &QuerySpec,
        cancel: CancellationToken,
    ) -> QueryEngineResult<Vec<ResultEntity>> {
        let query_id = QueryId::new();
        let start = Instant::now();
        let result = self.execute_inner(spec, cancel).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::record_query(elapsed_ms, result.is_ok());
        if matches!(result, Err(QueryError::Cancelled)) {
            metrics::record_cancel();
        }
        debug!(
            query_id = %query_id.0,
            elapsed_ms,
            ok = result.is_ok(),
            "query execution finished"
        );
        result
    }

    async fn execute_inner(
        &self,
        spec: &QuerySpec,
        cancel: CancellationToken,
    ) -> QueryEngineResult<Vec<ResultEntity>> {
        // Phase 1: collect the distinct schemas this query touches. Each is
        // loaded at most once per execution, even when joined repeatedly.
        let schemas = spec.referenced_schemas();

        // The result window is delegated to the backend only for a join-free
        // query whose root filters are all translatable; in that case the
        // engine must not re-apply offset/limit after the load.
        let window_delegated = spec.joins().is_empty()
            && spec.root_filters().iter().all(|f| f.is_backend_translatable())
            && self
                .registry
                .get(spec.root())
                .map(|b| b.supports_native_queries())
                .unwrap_or(false);

        // Phase 2: one load task per schema, fanned out on the shared
        // worker pool. No ordering guarantee between loads.
        let mut handles = Vec::with_capacity(schemas.len());
        for schema in &schemas {
            let backend = self.registry.get(schema);
            let filters = spec.filters_for(schema);
            let (limit, offset) = if window_delegated && schema == spec.root() {
                (spec.limit(), spec.offset())
            } else {
                (None, None)
            };
            let schema = schema.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                load_schema(backend, schema, filters, limit, offset, cancel).await
            }));
        }

        // Phase 3: the barrier. All loads must finish before any join
        // algebra runs; the first failure fails the whole execution.
        let mut loaded: HashMap<SchemaRef, LoadedSchema> = HashMap::with_capacity(schemas.len());
        for (schema, handle) in schemas.iter().zip(handles) {
            let records = handle
                .await
                .map_err(|e| QueryError::internal(format!("schema load task panicked: {e}")))??;
            let ids: Arc<IdSet> = Arc::new(records.keys().copied().collect());
            loaded.insert(schema.clone(), LoadedSchema { records, ids });
        }

        // Phase 4: resolve the final identifier set
        let surviving = self.resolve_join(spec, &loaded);

        // Phase 5: merge payloads. Schemas are visited in first-reference
        // order (root first), which fixes each entity's field index order.
        let mut entities: Vec<ResultEntity> = surviving
            .iter()
            .map(|id| {
                let mut entity = ResultEntity::new(*id);
                for schema in &schemas {
                    if let Some(record) = loaded[schema].records.get(id) {
                        entity.add_payload(schema.clone(), record.clone());
                    }
                }
                entity
            })
            .collect();

        // Phase 6: sort
        if !spec.sort_keys().is_empty() {
            entities.sort_by(|a, b| compare_entities(a, b, spec.sort_keys()));
        }

        // Phase 7: paginate, unless the backend already applied the window
        if window_delegated {
            Ok(entities)
        } else {
            Ok(paginate(entities, spec.limit(), spec.offset()))
        }
    }

    /// Folds the joins over the root schema's identifier set, in
    /// declaration order.
    ///
    /// Right joins replace the running set entirely: a Right join placed
    /// after other joins discards their effect on the running set. That is
    /// the documented contract, not an accident to correct here.
    fn resolve_join(
        &self,
        spec: &QuerySpec,
        loaded: &HashMap<SchemaRef, LoadedSchema>,
    ) -> Arc<IdSet> {
        let mut running = Arc::clone(&loaded[spec.root()].ids);
        for join in spec.joins() {
            let target_ids = &loaded[join.target()].ids;
            running = match join.join_type() {
                JoinType::Inner => self.algebra.intersect(&running, target_ids),
                JoinType::Left => running,
                JoinType::Right => Arc::clone(target_ids),
                JoinType::Full => self.algebra.union(&running, target_ids),
            };
        }
        running
    }

    /// Executes the query without its result window and returns the number
    /// of matching entities.
    pub async fn count(&self, spec: &QuerySpec) -> QueryEngineResult<usize> {
        let mut unwindowed = spec.clone();
        unwindowed.limit = None;
        unwindowed.offset = None;
        Ok(self.execute(&unwindowed).await?.len())
    }

    /// Executes one page of the query (0-indexed), overriding any window on
    /// the spec.
    pub async fn page(
        &self,
        spec: &QuerySpec,
        page: usize,
        page_size: usize,
    ) -> QueryEngineResult<Vec<ResultEntity>> {
        if page_size == 0 {
            return Err(QueryError::validation("page size must be greater than zero"));
        }
        let mut windowed = spec.clone();
        windowed.limit = Some(page_size);
        windowed.offset = Some(page * page_size);
        self.execute(&windowed).await
    }
}

/// Loads one schema's records, applying that schema's filters.
///
/// A backend with native query support receives the translatable filters
/// (plus the window, when delegated); any remaining custom-test filters are
/// applied in memory on the way out. A backend without native support is
/// bulk-loaded and every filter runs in memory, AND-ed together.
async fn load_schema(
    backend: Option<Arc<dyn SchemaBackend>>,
    schema: SchemaRef,
    filters: Vec<FilterCondition>,
    limit: Option<usize>,
    offset: Option<usize>,
    cancel: CancellationToken,
) -> QueryEngineResult<HashMap<Identifier, Record>> {
    let Some(backend) = backend else {
        warn!(schema = %schema, "no backend registered for schema; treating as empty");
        return Ok(HashMap::new());
    };

    let load = async {
        if backend.supports_native_queries() {
            let (translatable, custom) = partition_translatable(&filters);
            let mut records = backend.query(&schema, &translatable, limit, offset).await?;
            if !custom.is_empty() {
                records.retain(|_, record| custom.iter().all(|c| c.matches(record)));
            }
            Ok(records)
        } else {
            let mut records = backend.load_all(&schema).await?;
            if !filters.is_empty() {
                records.retain(|_, record| filters.iter().all(|c| c.matches(record)));
            }
            Ok(records)
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QueryError::Cancelled),
        result = timeout(Duration::from_millis(LOAD_TIMEOUT_MS), load) => match result {
            Ok(inner) => inner.map_err(|e: QueryError| match e {
                e @ QueryError::LoadFailed { .. } => e,
                other => QueryError::load_failed(schema.key(), other.to_string()),
            }),
            Err(_) => Err(QueryError::Timeout {
                timeout_ms: LOAD_TIMEOUT_MS,
            }),
        },
    }
}

/// Chains one comparator per sort key; the first non-zero result wins.
fn compare_entities(a: &ResultEntity, b: &ResultEntity, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = compare_by_key(a, b, key);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_by_key(a: &ResultEntity, b: &ResultEntity, key: &SortKey) -> Ordering {
    let va = a.field_in(&key.schema, &key.field).filter(|v| !v.is_null());
    let vb = b.field_in(&key.schema, &key.field).filter(|v| !v.is_null());

    match (va, vb) {
        (None, None) => Ordering::Equal,
        // A null wins or loses per the key's null ordering, regardless of
        // direction
        (None, Some(_)) => match key.null_ordering {
            NullOrdering::First => Ordering::Less,
            NullOrdering::Last => Ordering::Greater,
        },
        (Some(_), None) => match key.null_ordering {
            NullOrdering::First => Ordering::Greater,
            NullOrdering::Last => Ordering::Less,
        },
        (Some(x), Some(y)) => {
            // Natural ordering where both sides support it, otherwise the
            // display-string representations decide
            let ordering = x
                .natural_cmp(&y)
                .unwrap_or_else(|| x.to_string().cmp(&y.to_string()));
            match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        }
    }
}

/// Applies the result window after the full set is materialized and sorted.
/// `start >= len` yields an empty sequence for any limit.
fn paginate(mut entities: Vec<ResultEntity>, limit: Option<usize>, offset: Option<usize>) -> Vec<ResultEntity> {
    let start = offset.unwrap_or(0);
    if start >= entities.len() {
        return Vec::new();
    }
    entities.drain(..start);
    if let Some(limit) = limit {
        entities.truncate(limit);
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Operator;
    use crate::query::builder::Query;
    use crate::types::FieldValue;
    use async_trait::async_trait;
    use uuid::Uuid;

    /// In-memory backend without native query support: every filter runs
    /// in the engine.
    struct MemoryBackend {
        data: HashMap<SchemaRef, HashMap<Identifier, Record>>,
    }

    impl MemoryBackend {
        fn new() -> Self {
            Self {
                data: HashMap::new(),
            }
        }

        fn with_schema(
            mut self,
            schema: &SchemaRef,
            rows: Vec<(Identifier, Record)>,
        ) -> Self {
            self.data.insert(schema.clone(), rows.into_iter().collect());
            self
        }
    }

    #[async_trait]
    impl SchemaBackend for MemoryBackend {
        fn backend_id(&self) -> &'static str {
            "memory"
        }

        fn supports_native_queries(&self) -> bool {
            false
        }

        async fn query(
            &self,
            schema: &SchemaRef,
            _filters: &[FilterCondition],
            _limit: Option<usize>,
            _offset: Option<usize>,
        ) -> QueryEngineResult<HashMap<Identifier, Record>> {
            Err(QueryError::unsupported(format!(
                "memory backend has no native queries for '{schema}'"
            )))
        }

        async fn load_all(
            &self,
            schema: &SchemaRef,
        ) -> QueryEngineResult<HashMap<Identifier, Record>> {
            Ok(self.data.get(schema).cloned().unwrap_or_default())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl SchemaBackend for FailingBackend {
        fn backend_id(&self) -> &'static str {
            "failing"
        }

        fn supports_native_queries(&self) -> bool {
            false
        }

        async fn query(
            &self,
            _schema: &SchemaRef,
            _filters: &[FilterCondition],
            _limit: Option<usize>,
            _offset: Option<usize>,
        ) -> QueryEngineResult<HashMap<Identifier, Record>> {
            unreachable!()
        }

        async fn load_all(
            &self,
            schema: &SchemaRef,
        ) -> QueryEngineResult<HashMap<Identifier, Record>> {
            Err(QueryError::load_failed(schema.key(), "store unavailable"))
        }
    }

    fn p(n: u128) -> Identifier {
        Uuid::from_u128(n)
    }

    fn rank_guild_executor() -> (QueryExecutor, SchemaRef, SchemaRef) {
        let rank = SchemaRef::new("rank");
        let guild = SchemaRef::new("guild");

        let backend = Arc::new(
            MemoryBackend::new()
                .with_schema(
                    &rank,
                    vec![(
                        p(1),
                        Record::new().with_field("rank", FieldValue::Text("ADMIN".into())),
                    )],
                )
                .with_schema(
                    &guild,
                    vec![
                        (
                            p(1),
                            Record::new().with_field("guild", FieldValue::Text("Titans".into())),
                        ),
                        (
                            p(2),
                            Record::new().with_field("guild", FieldValue::Text("Raiders".into())),
                        ),
                    ],
                ),
        );

        let mut registry = BackendRegistry::new();
        registry.register(rank.clone(), backend.clone());
        registry.register(guild.clone(), backend);
        (QueryExecutor::new(registry), rank, guild)
    }

    #[tokio::test]
    async fn inner_join_drops_unmatched_identifiers() {
        let (executor, rank, guild) = rank_guild_executor();

        let spec = Query::from(rank.clone())
            .where_op("rank", Operator::Eq, FieldValue::Text("ADMIN".into()))
            .join(guild.clone())
            .and()
            .build();

        let results = executor.execute(&spec).await.unwrap();
        assert_eq!(results.len(), 1);
        let entity = &results[0];
        assert_eq!(entity.id(), p(1));
        // Merged payload carries both schemas
        assert_eq!(
            entity.field_in(&rank, "rank"),
            Some(FieldValue::Text("ADMIN".into()))
        );
        assert_eq!(
            entity.field_in(&guild, "guild"),
            Some(FieldValue::Text("Titans".into()))
        );
    }

    #[tokio::test]
    async fn left_join_keeps_root_set() {
        let (executor, rank, guild) = rank_guild_executor();

        let spec = Query::from(rank.clone())
            .join(guild.clone())
            .join_type(JoinType::Left)
            .and()
            .build();

        let results = executor.execute(&spec).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id(), p(1));
        assert!(results[0].payload(&guild).is_some());
    }

    #[tokio::test]
    async fn right_join_replaces_running_set() {
        let (executor, rank, guild) = rank_guild_executor();

        let spec = Query::from(rank.clone())
            .join(guild.clone())
            .join_type(JoinType::Right)
            .and()
            .build();

        let results = executor.execute(&spec).await.unwrap();
        // Full replacement: both guild members survive, including P2 with
        // no rank payload
        assert_eq!(results.len(), 2);
        let p2 = results.iter().find(|e| e.id() == p(2)).unwrap();
        assert!(p2.payload(&rank).is_none());
        assert!(p2.payload(&guild).is_some());
    }

    #[tokio::test]
    async fn full_join_unions_identifier_sets() {
        let (executor, rank, guild) = rank_guild_executor();

        let spec = Query::from(rank)
            .join(guild)
            .join_type(JoinType::Full)
            .and()
            .build();

        let results = executor.execute(&spec).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn missing_backend_degrades_to_empty() {
        let rank = SchemaRef::new("rank");
        let ghost = SchemaRef::new("ghost");

        let backend = Arc::new(MemoryBackend::new().with_schema(
            &rank,
            vec![(p(1), Record::new())],
        ));
        let mut registry = BackendRegistry::new();
        registry.register(rank.clone(), backend);
        let executor = QueryExecutor::new(registry);

        // Inner join against the unregistered schema silently empties the
        // result, with no error raised
        let spec = Query::from(rank).join(ghost).and().build();
        let results = executor.execute(&spec).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn load_failure_fails_whole_query() {
        let rank = SchemaRef::new("rank");
        let broken = SchemaRef::new("broken");

        let mut registry = BackendRegistry::new();
        registry.register(
            rank.clone(),
            Arc::new(MemoryBackend::new().with_schema(&rank, vec![(p(1), Record::new())])),
        );
        registry.register(broken.clone(), Arc::new(FailingBackend));
        let executor = QueryExecutor::new(registry);

        let spec = Query::from(rank)
            .join(broken)
            .join_type(JoinType::Left)
            .and()
            .build();
        // Even a Left join load failure fails the execution: no partial
        // results
        let err = executor.execute(&spec).await.unwrap_err();
        assert!(matches!(err, QueryError::LoadFailed { .. }));
    }

    #[tokio::test]
    async fn cancellation_fails_with_cancelled() {
        let (executor, rank, _) = rank_guild_executor();
        let token = CancellationToken::new();
        token.cancel();

        let spec = Query::from(rank).build();
        let err = executor
            .execute_with_cancel(&spec, token)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
    }

    #[tokio::test]
    async fn pagination_windows_sorted_results() {
        let scores = SchemaRef::new("scores");
        let rows: Vec<(Identifier, Record)> = (0..5)
            .map(|n| {
                (
                    p(n as u128 + 1),
                    Record::new().with_field("score", FieldValue::Int(n)),
                )
            })
            .collect();

        let mut registry = BackendRegistry::new();
        registry.register(
            scores.clone(),
            Arc::new(MemoryBackend::new().with_schema(&scores, rows)),
        );
        let executor = QueryExecutor::new(registry);

        let spec = Query::from(scores.clone())
            .order_by("score")
            .limit(2)
            .unwrap()
            .offset(1)
            .build();

        let results = executor.execute(&spec).await.unwrap();
        let values: Vec<_> = results
            .iter()
            .map(|e| e.field_in(&scores, "score").unwrap())
            .collect();
        assert_eq!(values, vec![FieldValue::Int(1), FieldValue::Int(2)]);

        // Offset beyond the result set: empty page, whatever the limit
        let spec = Query::from(scores).limit(10).unwrap().offset(99).build();
        assert!(executor.execute(&spec).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn spec_is_re_executable() {
        let (executor, rank, guild) = rank_guild_executor();
        let spec = Query::from(rank).join(guild).and().build();

        let first = executor.execute(&spec).await.unwrap();
        let second = executor.execute(&spec).await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].id(), second[0].id());
    }

    #[tokio::test]
    async fn count_ignores_window() {
        let (executor, rank, guild) = rank_guild_executor();
        let spec = Query::from(rank)
            .join(guild)
            .join_type(JoinType::Full)
            .and()
            .limit(1)
            .unwrap()
            .build();

        assert_eq!(executor.execute(&spec).await.unwrap().len(), 1);
        assert_eq!(executor.count(&spec).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sort_respects_direction_and_null_ordering() {
        let s = SchemaRef::new("s");
        let rows = vec![
            (p(1), Record::new().with_field("v", FieldValue::Int(2))),
            (p(2), Record::new().with_field("v", FieldValue::Int(1))),
            (p(3), Record::new()), // no "v": sorts as null
        ];
        let mut registry = BackendRegistry::new();
        registry.register(
            s.clone(),
            Arc::new(MemoryBackend::new().with_schema(&s, rows)),
        );
        let executor = QueryExecutor::new(registry);

        let spec = Query::from(s.clone())
            .order_by_key(
                SortKey::new(s.clone(), "v")
                    .with_direction(SortDirection::Desc)
                    .with_null_ordering(NullOrdering::First),
            )
            .build();

        let results = executor.execute(&spec).await.unwrap();
        let ids: Vec<_> = results.iter().map(|e| e.id()).collect();
        // Null first regardless of Desc; then 2, 1
        assert_eq!(ids, vec![p(3), p(1), p(2)]);
    }
}
