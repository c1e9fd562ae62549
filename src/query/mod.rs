// SPDX-License-Identifier: Apache-2.0

//! Query plan types and the fluent builder

pub mod builder;
pub mod spec;

pub use builder::{JoinBuilder, Query};
pub use spec::{JoinSpec, JoinType, NullOrdering, QuerySpec, SortDirection, SortKey};
