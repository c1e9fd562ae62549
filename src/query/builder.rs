// SPDX-License-Identifier: Apache-2.0

//! Fluent query builder
//!
//! Builds an immutable [`QuerySpec`]. Misuse fails at the point of the
//! offending call (`limit(0)`, a filter scoped to the wrong schema), never
//! at execution time.

use crate::entity::ResultEntity;
use crate::error::{QueryEngineResult, QueryError};
use crate::executor::QueryExecutor;
use crate::filter::{FilterCondition, Operator};
use crate::query::spec::{JoinSpec, JoinType, QuerySpec, SortDirection, SortKey};
use crate::types::{FieldValue, Record, SchemaRef};

/// Builder for a [`QuerySpec`], starting from the root schema.
///
/// ```no_run
/// # use crossquery::query::builder::Query;
/// # use crossquery::filter::Operator;
/// # use crossquery::types::{FieldValue, SchemaRef};
/// let rank = SchemaRef::new("rank");
/// let guild = SchemaRef::new("guild");
/// let spec = Query::from(rank)
///     .where_op("rank", Operator::Eq, FieldValue::Text("ADMIN".into()))
///     .join(guild)
///     .and()
///     .build();
/// ```
#[derive(Debug)]
pub struct Query {
    root: SchemaRef,
    root_filters: Vec<FilterCondition>,
    joins: Vec<JoinSpec>,
    sort_keys: Vec<SortKey>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl Query {
    /// Starts a new query rooted at `schema`
    pub fn from(schema: SchemaRef) -> Self {
        Self {
            root: schema,
            root_filters: Vec::new(),
            joins: Vec::new(),
            sort_keys: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Appends a root-scoped structured filter
    pub fn where_op(mut self, field: impl Into<String>, op: Operator, operand: FieldValue) -> Self {
        self.root_filters.push(FilterCondition::with_operator(
            self.root.clone(),
            field,
            op,
            operand,
        ));
        self
    }

    /// Appends a root-scoped custom-test filter.
    ///
    /// Such a filter always runs in-process; it has no backend-translatable
    /// form.
    pub fn where_test(
        mut self,
        field: impl Into<String>,
        test: impl Fn(&Record) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.root_filters
            .push(FilterCondition::with_test(self.root.clone(), field, test));
        self
    }

    /// Appends a pre-built root-scoped filter; the condition's schema must
    /// be the root schema.
    pub fn where_cond(mut self, condition: FilterCondition) -> QueryEngineResult<Self> {
        if condition.schema() != &self.root {
            return Err(QueryError::validation(format!(
                "root filter on '{}' is scoped to schema '{}', expected root '{}'",
                condition.field(),
                condition.schema(),
                self.root
            )));
        }
        self.root_filters.push(condition);
        Ok(self)
    }

    /// Opens a join against `schema`; close it with [`JoinBuilder::and`]
    /// (or implicitly by ordering/windowing/building from the join builder)
    pub fn join(self, schema: SchemaRef) -> JoinBuilder {
        JoinBuilder {
            join: JoinSpec::new(schema),
            parent: self,
        }
    }

    /// Appends an ascending sort key on the root schema
    pub fn order_by(self, field: impl Into<String>) -> Self {
        let key = SortKey::new(self.root.clone(), field);
        self.order_by_key(key)
    }

    /// Appends a sort key on the root schema with an explicit direction
    pub fn order_by_dir(self, field: impl Into<String>, direction: SortDirection) -> Self {
        let key = SortKey::new(self.root.clone(), field).with_direction(direction);
        self.order_by_key(key)
    }

    /// Appends an arbitrary sort key (any participating schema)
    pub fn order_by_key(mut self, key: SortKey) -> Self {
        self.sort_keys.push(key);
        self
    }

    /// Bounds the result window; zero is rejected here, synchronously
    pub fn limit(mut self, n: usize) -> QueryEngineResult<Self> {
        if n == 0 {
            return Err(QueryError::validation("limit must be greater than zero"));
        }
        self.limit = Some(n);
        Ok(self)
    }

    /// Skips the first `n` results
    pub fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }

    /// Finalizes the immutable spec
    pub fn build(self) -> QuerySpec {
        QuerySpec {
            root: self.root,
            root_filters: self.root_filters,
            joins: self.joins,
            sort_keys: self.sort_keys,
            limit: self.limit,
            offset: self.offset,
        }
    }

    /// Builds and executes in one call
    pub async fn execute(self, executor: &QueryExecutor) -> QueryEngineResult<Vec<ResultEntity>> {
        executor.execute(&self.build()).await
    }

    /// Builds and counts matching entities, ignoring any window
    pub async fn count(self, executor: &QueryExecutor) -> QueryEngineResult<usize> {
        executor.count(&self.build()).await
    }

    /// Builds and fetches one page (0-indexed) of `page_size` entities
    pub async fn page(
        self,
        executor: &QueryExecutor,
        page: usize,
        page_size: usize,
    ) -> QueryEngineResult<Vec<ResultEntity>> {
        executor.page(&self.build(), page, page_size).await
    }
}

/// Builder for one join clause
#[derive(Debug)]
pub struct JoinBuilder {
    parent: Query,
    join: JoinSpec,
}

impl JoinBuilder {
    /// Appends a structured filter scoped to the join target
    pub fn on_op(mut self, field: impl Into<String>, op: Operator, operand: FieldValue) -> Self {
        let filter =
            FilterCondition::with_operator(self.join.target().clone(), field, op, operand);
        self.join = self.join.with_filter(filter);
        self
    }

    /// Appends a custom-test filter scoped to the join target
    pub fn on_test(
        mut self,
        field: impl Into<String>,
        test: impl Fn(&Record) -> bool + Send + Sync + 'static,
    ) -> Self {
        let filter = FilterCondition::with_test(self.join.target().clone(), field, test);
        self.join = self.join.with_filter(filter);
        self
    }

    /// Sets the join semantics (default: inner)
    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join = self.join.with_join_type(join_type);
        self
    }

    /// Closes the join clause and returns to the parent builder
    pub fn and(mut self) -> Query {
        self.parent.joins.push(self.join);
        self.parent
    }

    // The following close the join implicitly, matching the fluent surface

    pub fn join(self, schema: SchemaRef) -> JoinBuilder {
        self.and().join(schema)
    }

    pub fn order_by(self, field: impl Into<String>) -> Query {
        self.and().order_by(field)
    }

    pub fn order_by_dir(self, field: impl Into<String>, direction: SortDirection) -> Query {
        self.and().order_by_dir(field, direction)
    }

    pub fn limit(self, n: usize) -> QueryEngineResult<Query> {
        self.and().limit(n)
    }

    pub fn offset(self, n: usize) -> Query {
        self.and().offset(n)
    }

    pub fn build(self) -> QuerySpec {
        self.and().build()
    }

    pub async fn execute(self, executor: &QueryExecutor) -> QueryEngineResult<Vec<ResultEntity>> {
        self.and().execute(executor).await
    }
}
