// SPDX-License-Identifier: Apache-2.0

//! Unified result entity
//!
//! One entity per surviving identifier after join resolution, holding one
//! payload per participating schema plus a lazily built field index for
//! lookup and flattening. Entities live for one execution and are never
//! persisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{FieldValue, Identifier, Record, SchemaRef};

/// Reserved key under which the entity identifier appears in
/// [`ResultEntity::flatten`] output
pub const ENTITY_ID_FIELD: &str = "__id";

type SchemaIndex = Arc<HashMap<String, FieldValue>>;

/// A merged result entity: one payload per schema that had a record for
/// this identifier.
#[derive(Debug)]
pub struct ResultEntity {
    id: Identifier,
    /// Schemas in the order their payloads were added; this is the "index
    /// order" that decides which schema wins unscoped field lookups
    schema_order: Vec<SchemaRef>,
    payloads: HashMap<SchemaRef, Record>,
    /// Per-schema field index, built on first access and dropped again when
    /// that schema's payload changes
    index: RwLock<HashMap<SchemaRef, SchemaIndex>>,
}

impl Clone for ResultEntity {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            schema_order: self.schema_order.clone(),
            payloads: self.payloads.clone(),
            index: RwLock::new(HashMap::new()),
        }
    }
}

impl ResultEntity {
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            schema_order: Vec::new(),
            payloads: HashMap::new(),
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    /// Stores a payload for one schema, invalidating any cached field index
    /// for that schema only.
    pub fn add_payload(&mut self, schema: SchemaRef, record: Record) {
        self.index.get_mut().remove(&schema);
        if !self.payloads.contains_key(&schema) {
            self.schema_order.push(schema.clone());
        }
        self.payloads.insert(schema, record);
    }

    pub fn payload(&self, schema: &SchemaRef) -> Option<&Record> {
        self.payloads.get(schema)
    }

    /// Schemas with a payload on this entity, in the order they were added
    pub fn schemas(&self) -> &[SchemaRef] {
        &self.schema_order
    }

    /// Unscoped field lookup across all schemas.
    ///
    /// When several schemas expose the same field name, the first schema in
    /// index order wins. That tie-break is intentional and shifts when the
    /// schema ordering of the query changes. Callers needing determinism
    /// use [`ResultEntity::field_in`].
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.schema_order
            .iter()
            .find_map(|schema| self.field_in(schema, name))
    }

    /// Schema-scoped field lookup; the schema's index is built on first
    /// access.
    pub fn field_in(&self, schema: &SchemaRef, name: &str) -> Option<FieldValue> {
        if let Some(index) = self.index.read().get(schema) {
            return index.get(name).cloned();
        }

        let record = self.payloads.get(schema)?;
        let built: SchemaIndex = Arc::new(record.fields.clone());
        let value = built.get(name).cloned();
        self.index.write().insert(schema.clone(), built);
        value
    }

    /// Flattens all fields across all schemas into a single map.
    ///
    /// A field name appearing in two or more schemas is re-keyed as
    /// `"<schemaKey>.<field>"` for every colliding occurrence. The entity
    /// identifier is always present under [`ENTITY_ID_FIELD`]; a payload
    /// field with that reserved name is re-keyed unconditionally.
    pub fn flatten(&self) -> BTreeMap<String, FieldValue> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for schema in &self.schema_order {
            if let Some(record) = self.payloads.get(schema) {
                for name in record.fields.keys() {
                    *counts.entry(name.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut flat = BTreeMap::new();
        flat.insert(
            ENTITY_ID_FIELD.to_string(),
            FieldValue::Text(self.id.to_string()),
        );
        for schema in &self.schema_order {
            if let Some(record) = self.payloads.get(schema) {
                for (name, value) in &record.fields {
                    let key = if name == ENTITY_ID_FIELD || counts[name.as_str()] > 1 {
                        format!("{}.{}", schema.key(), name)
                    } else {
                        name.clone()
                    };
                    flat.insert(key, value.clone());
                }
            }
        }
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entity() -> ResultEntity {
        let mut e = ResultEntity::new(Uuid::from_u128(7));
        e.add_payload(
            SchemaRef::new("rank"),
            Record::new()
                .with_field("rank", FieldValue::Text("ADMIN".into()))
                .with_field("name", FieldValue::Text("from_rank".into())),
        );
        e.add_payload(
            SchemaRef::new("guild"),
            Record::new()
                .with_field("guild", FieldValue::Text("Titans".into()))
                .with_field("name", FieldValue::Text("from_guild".into())),
        );
        e
    }

    #[test]
    fn unscoped_lookup_first_schema_wins() {
        let e = entity();
        // "name" exists in both payloads; rank was added first
        assert_eq!(e.field("name"), Some(FieldValue::Text("from_rank".into())));
        assert_eq!(e.field("guild"), Some(FieldValue::Text("Titans".into())));
        assert_eq!(e.field("missing"), None);
    }

    #[test]
    fn scoped_lookup_hits_only_that_schema() {
        let e = entity();
        let guild = SchemaRef::new("guild");
        assert_eq!(
            e.field_in(&guild, "name"),
            Some(FieldValue::Text("from_guild".into()))
        );
        assert_eq!(e.field_in(&guild, "rank"), None);
    }

    #[test]
    fn add_payload_invalidates_only_that_schema() {
        let mut e = entity();
        let rank = SchemaRef::new("rank");
        let guild = SchemaRef::new("guild");

        // Populate both schema indexes
        assert!(e.field_in(&rank, "rank").is_some());
        assert!(e.field_in(&guild, "guild").is_some());

        e.add_payload(
            rank.clone(),
            Record::new().with_field("rank", FieldValue::Text("MOD".into())),
        );
        // Rebuilt index sees the new payload
        assert_eq!(e.field_in(&rank, "rank"), Some(FieldValue::Text("MOD".into())));
        // Guild index was untouched
        assert_eq!(e.field_in(&guild, "guild"), Some(FieldValue::Text("Titans".into())));
    }

    #[test]
    fn flatten_rekeys_payload_field_named_like_reserved_key() {
        let mut e = ResultEntity::new(Uuid::from_u128(7));
        e.add_payload(
            SchemaRef::new("rank"),
            Record::new().with_field(ENTITY_ID_FIELD, FieldValue::Int(42)),
        );
        let flat = e.flatten();

        // The reserved key always carries the entity identifier; the payload
        // field is re-keyed even without a cross-schema collision
        assert_eq!(
            flat.get(ENTITY_ID_FIELD),
            Some(&FieldValue::Text(Uuid::from_u128(7).to_string()))
        );
        assert_eq!(flat.get("rank.__id"), Some(&FieldValue::Int(42)));
    }

    #[test]
    fn flatten_rekeys_collisions_and_carries_id() {
        let e = entity();
        let flat = e.flatten();

        assert_eq!(
            flat.get(ENTITY_ID_FIELD),
            Some(&FieldValue::Text(Uuid::from_u128(7).to_string()))
        );
        // Non-colliding fields keep their plain names
        assert_eq!(flat.get("rank"), Some(&FieldValue::Text("ADMIN".into())));
        assert_eq!(flat.get("guild"), Some(&FieldValue::Text("Titans".into())));
        // "name" collides: both occurrences re-keyed
        assert!(flat.get("name").is_none());
        assert_eq!(
            flat.get("rank.name"),
            Some(&FieldValue::Text("from_rank".into()))
        );
        assert_eq!(
            flat.get("guild.name"),
            Some(&FieldValue::Text("from_guild".into()))
        );
    }
}
