// SPDX-License-Identifier: Apache-2.0

//! The fully-resolved, immutable query plan
//!
//! A [`QuerySpec`] is produced once by the builder and can be executed any
//! number of times; the executor never mutates it.

use serde::{Deserialize, Serialize};

use crate::filter::FilterCondition;
use crate::types::SchemaRef;

/// Join semantics for one joined schema.
///
/// The running identifier set starts as the root schema's identifiers and
/// each join transforms it in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    /// Intersect the running set with the target's identifier set
    #[default]
    Inner,
    /// Leave the running set unchanged; left-join semantics only show up at
    /// payload merge, where missing target payloads are simply absent
    Left,
    /// Replace the running set entirely with the target's identifier set.
    ///
    /// This is a full replacement, not a union or intersection against the
    /// accumulated set: a Right join placed after other joins discards all
    /// prior join effects on the running set. Order-sensitive by contract.
    Right,
    /// Union the running set with the target's identifier set
    Full,
}

/// One joined schema: the target, the filters scoped to it, and the join type
#[derive(Debug, Clone)]
pub struct JoinSpec {
    target: SchemaRef,
    filters: Vec<FilterCondition>,
    join_type: JoinType,
}

impl JoinSpec {
    pub fn new(target: SchemaRef) -> Self {
        Self {
            target,
            filters: Vec::new(),
            join_type: JoinType::default(),
        }
    }

    pub fn target(&self) -> &SchemaRef {
        &self.target
    }

    pub fn filters(&self) -> &[FilterCondition] {
        &self.filters
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    /// Derives a copy with one more filter. Never mutates in place.
    pub fn with_filter(&self, filter: FilterCondition) -> Self {
        let mut filters = self.filters.clone();
        filters.push(filter);
        Self {
            target: self.target.clone(),
            filters,
            join_type: self.join_type,
        }
    }

    /// Derives a copy with a different join type. Never mutates in place.
    pub fn with_join_type(&self, join_type: JoinType) -> Self {
        Self {
            target: self.target.clone(),
            filters: self.filters.clone(),
            join_type,
        }
    }
}

/// Sort direction for one sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Where null (or absent) field values sort relative to non-null ones.
///
/// Applies regardless of direction; direction inverts only the non-null
/// comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullOrdering {
    First,
    #[default]
    Last,
}

/// One key in the sort comparator chain
#[derive(Debug, Clone)]
pub struct SortKey {
    pub schema: SchemaRef,
    pub field: String,
    pub direction: SortDirection,
    pub null_ordering: NullOrdering,
}

impl SortKey {
    pub fn new(schema: SchemaRef, field: impl Into<String>) -> Self {
        Self {
            schema,
            field: field.into(),
            direction: SortDirection::default(),
            null_ordering: NullOrdering::default(),
        }
    }

    pub fn with_direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_null_ordering(mut self, null_ordering: NullOrdering) -> Self {
        self.null_ordering = null_ordering;
        self
    }
}

/// The immutable, fully-resolved query plan.
///
/// Re-executable: running the executor twice against the same spec yields a
/// fresh result set each time. When `sort_keys` is empty the result order is
/// undefined: the join algebra runs over hash-based identifier sets with no
/// canonical iteration order. That is a documented non-guarantee.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub(crate) root: SchemaRef,
    pub(crate) root_filters: Vec<FilterCondition>,
    pub(crate) joins: Vec<JoinSpec>,
    pub(crate) sort_keys: Vec<SortKey>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: Option<usize>,
}

impl QuerySpec {
    pub fn root(&self) -> &SchemaRef {
        &self.root
    }

    pub fn root_filters(&self) -> &[FilterCondition] {
        &self.root_filters
    }

    pub fn joins(&self) -> &[JoinSpec] {
        &self.joins
    }

    pub fn sort_keys(&self) -> &[SortKey] {
        &self.sort_keys
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// All distinct schemas this query touches: the root plus every join
    /// target, de-duplicated in first-reference order.
    pub fn referenced_schemas(&self) -> Vec<SchemaRef> {
        let mut schemas = vec![self.root.clone()];
        for join in &self.joins {
            if !schemas.contains(join.target()) {
                schemas.push(join.target().clone());
            }
        }
        schemas
    }

    /// The filters scoped to one schema: root filters for the root, each
    /// join's filters for its target.
    pub fn filters_for(&self, schema: &SchemaRef) -> Vec<FilterCondition> {
        let mut filters = Vec::new();
        if schema == &self.root {
            filters.extend(self.root_filters.iter().cloned());
        }
        for join in &self.joins {
            if join.target() == schema {
                filters.extend(join.filters().iter().cloned());
            }
        }
        filters
    }
}
