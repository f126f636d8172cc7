//! Index-aware search.
//!
//! A [`SearchQuery`] is a conjunction of field conditions. The planner ranks
//! the bag's indexes with [`KeyInfo::match_fields`](crate::key::KeyInfo::match_fields)
//! and scans the best one on its leading key field. Index scans only narrow
//! the candidates: every candidate is re-checked against all conditions, so
//! an index search and a full scan return the same entities.
//!
//! A condition never matches a missing or null field. A list field matches
//! when any of its elements does. Values of different types never compare.
//!
//! Sort parameters order the matches before the [`SearchLimit`] window is
//! cut. Entities missing a sort field come last in either direction; a list
//! sorts by its smallest element ascending and its largest descending.

use crate::entity::{decode_entity, Entity, EntityId, FieldValue, ID_FIELD};
use crate::error::CoreResult;
use crate::index::Index;
use crate::key::KeyValue;
use bagstore_storage::RecordStore;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::mem;
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

/// Comparison applied by a [`FieldCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFieldOperator {
    /// `field == value`
    Equals,
    /// `field != value`
    NotEquals,
    /// `field > value`
    LargerThan,
    /// `field >= value`
    LargerThanOrEquals,
    /// `field < value`
    SmallerThan,
    /// `field <= value`
    SmallerThanOrEquals,
}

impl QueryFieldOperator {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Equals => ordering == Ordering::Equal,
            Self::NotEquals => ordering != Ordering::Equal,
            Self::LargerThan => ordering == Ordering::Greater,
            Self::LargerThanOrEquals => ordering != Ordering::Less,
            Self::SmallerThan => ordering == Ordering::Less,
            Self::SmallerThanOrEquals => ordering != Ordering::Greater,
        }
    }

    /// Bounds on the leading key field covering every match, if a range
    /// scan can serve this operator.
    fn bounds(self, value: &KeyValue) -> Option<(Bound<&KeyValue>, Bound<&KeyValue>)> {
        match self {
            Self::Equals => Some((Bound::Included(value), Bound::Included(value))),
            Self::NotEquals => None,
            Self::LargerThan => Some((Bound::Excluded(value), Bound::Unbounded)),
            Self::LargerThanOrEquals => Some((Bound::Included(value), Bound::Unbounded)),
            Self::SmallerThan => Some((Bound::Unbounded, Bound::Excluded(value))),
            Self::SmallerThanOrEquals => Some((Bound::Unbounded, Bound::Included(value))),
        }
    }
}

/// One condition on one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCondition {
    /// Field name; `__ID` refers to the entity id.
    pub field: String,
    /// Comparison.
    pub operator: QueryFieldOperator,
    /// Right-hand side.
    pub value: KeyValue,
}

impl FieldCondition {
    /// Whether `entity` satisfies this condition.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        field_values(entity, &self.field).iter().any(|candidate| {
            mem::discriminant(candidate) == mem::discriminant(&self.value)
                && self.operator.accepts(candidate.cmp(&self.value))
        })
    }
}

fn scalar(value: &FieldValue) -> Option<KeyValue> {
    match value {
        FieldValue::Bool(v) => Some(KeyValue::Bool(*v)),
        FieldValue::Integer(v) => Some(KeyValue::Long(*v)),
        FieldValue::Text(v) => Some(KeyValue::Text(v.clone())),
        FieldValue::Null | FieldValue::List(_) => None,
    }
}

fn field_values(entity: &Entity, field: &str) -> Vec<KeyValue> {
    if field == ID_FIELD {
        return entity
            .id()
            .map(|id| KeyValue::Text(id.as_str().to_string()))
            .into_iter()
            .collect();
    }
    match entity.get(field) {
        Some(FieldValue::List(items)) => items.iter().filter_map(scalar).collect(),
        Some(value) => scalar(value).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Direction of a [`SortParameter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// One sort key of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortParameter {
    /// Field name; `__ID` sorts by entity id.
    pub field: String,
    /// Direction.
    pub order: SortOrder,
}

impl SortParameter {
    fn value_of(&self, entity: &Entity) -> Option<KeyValue> {
        let values = field_values(entity, &self.field).into_iter();
        match self.order {
            SortOrder::Ascending => values.min(),
            SortOrder::Descending => values.max(),
        }
    }

    fn compare(&self, a: &Option<KeyValue>, b: &Option<KeyValue>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => match self.order {
                SortOrder::Ascending => a.cmp(b),
                SortOrder::Descending => b.cmp(a),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Conjunction of field conditions, with optional sort keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    conditions: Vec<FieldCondition>,
    sort: Vec<SortParameter>,
}

impl SearchQuery {
    /// A query matching every entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition.
    #[must_use]
    pub fn and(
        mut self,
        field: impl Into<String>,
        operator: QueryFieldOperator,
        value: impl Into<KeyValue>,
    ) -> Self {
        self.conditions.push(FieldCondition {
            field: field.into(),
            operator,
            value: value.into(),
        });
        self
    }

    /// Adds a sort key. Earlier keys take precedence; ties keep scan order.
    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortParameter {
            field: field.into(),
            order,
        });
        self
    }

    /// Sort keys, most significant first.
    #[must_use]
    pub fn sort_parameters(&self) -> &[SortParameter] {
        &self.sort
    }

    /// Orders `entities` by the sort keys. Stable.
    fn sort(&self, entities: Vec<Entity>) -> Vec<Entity> {
        if self.sort.is_empty() {
            return entities;
        }
        let mut keyed: Vec<(Vec<Option<KeyValue>>, Entity)> = entities
            .into_iter()
            .map(|entity| {
                let keys = self.sort.iter().map(|p| p.value_of(&entity)).collect();
                (keys, entity)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            self.sort
                .iter()
                .zip(a.iter().zip(b))
                .map(|(param, (a, b))| param.compare(a, b))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        keyed.into_iter().map(|(_, entity)| entity).collect()
    }

    /// Conditions, in insertion order.
    #[must_use]
    pub fn conditions(&self) -> &[FieldCondition] {
        &self.conditions
    }

    /// Names of the fields the query constrains.
    #[must_use]
    pub fn fields(&self) -> HashSet<String> {
        self.conditions.iter().map(|c| c.field.clone()).collect()
    }

    /// Whether `entity` satisfies every condition.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        self.conditions.iter().all(|c| c.matches(entity))
    }
}

/// Window over the matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchLimit {
    /// Matches to skip.
    pub start: usize,
    /// Maximum number of matches returned; `None` for all.
    pub max: Option<usize>,
}

impl SearchLimit {
    /// The first `max` matches.
    #[must_use]
    pub const fn first(max: usize) -> Self {
        Self {
            start: 0,
            max: Some(max),
        }
    }

    fn window<T>(self, items: impl Iterator<Item = T>) -> Vec<T> {
        let items = items.skip(self.start);
        match self.max {
            Some(max) => items.take(max).collect(),
            None => items.collect(),
        }
    }
}

/// Entities found by a search.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Matches in sort order; without sort keys, in index order when an
    /// index was used and store order otherwise.
    pub entities: Vec<Entity>,
    /// Name of the index that narrowed the candidates.
    pub index_used: Option<String>,
}

/// Picks the index serving `query` best, along with the condition it scans.
///
/// Only indexes with a positive match score and a range-friendly condition
/// on their leading key field qualify. Ties go to the smaller name.
#[must_use]
pub fn select_index<'a>(
    indexes: &'a [Arc<Index>],
    query: &'a SearchQuery,
) -> Option<(&'a Arc<Index>, &'a FieldCondition)> {
    let fields = query.fields();
    indexes
        .iter()
        .filter(|index| !index.is_stale() && index.key_info().mapper().index_of(ID_FIELD).is_some())
        .filter_map(|index| {
            let score = index.key_info().match_fields(&fields);
            if score == 0 {
                return None;
            }
            let leading = index.key_info().key_fields().first()?.name();
            let condition = query
                .conditions()
                .iter()
                .find(|c| c.field == leading && c.operator.bounds(&c.value).is_some())?;
            Some((score, index, condition))
        })
        .max_by(|(a, ia, _), (b, ib, _)| a.cmp(b).then_with(|| ib.name().cmp(ia.name())))
        .map(|(_, index, condition)| (index, condition))
}

/// Runs `query` over a bag.
pub fn search(
    store: &dyn RecordStore,
    indexes: &[Arc<Index>],
    query: &SearchQuery,
    limit: SearchLimit,
) -> CoreResult<QueryResult> {
    if let Some((index, condition)) = select_index(indexes, query) {
        let Some((lower, upper)) = condition.operator.bounds(&condition.value) else {
            return full_scan(store, query, limit);
        };
        let ids: Vec<EntityId> = index.references(&index.range(lower, upper));
        debug!(
            index = index.name(),
            candidates = ids.len(),
            "searching through index"
        );

        let mut matches = Vec::new();
        for id in ids {
            if let Some(data) = store.read_record(id.as_str())? {
                let entity = decode_entity(&data)?;
                if query.matches(&entity) {
                    matches.push(entity);
                }
            }
        }
        return Ok(QueryResult {
            entities: limit.window(query.sort(matches).into_iter()),
            index_used: Some(index.name().to_string()),
        });
    }
    full_scan(store, query, limit)
}

fn full_scan(
    store: &dyn RecordStore,
    query: &SearchQuery,
    limit: SearchLimit,
) -> CoreResult<QueryResult> {
    let mut matches = Vec::new();
    for record in store.read_all_records()? {
        let entity = decode_entity(&record.data)?;
        if query.matches(&entity) {
            matches.push(entity);
        }
    }
    debug!(matches = matches.len(), "searched by full scan");
    Ok(QueryResult {
        entities: limit.window(query.sort(matches).into_iter()),
        index_used: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::encode_entity;
    use crate::key::{KeyField, KeyInfo};
    use bagstore_storage::{InMemoryBackend, LogRecordStore};
    use QueryFieldOperator::*;

    fn person(id: &str, age: i64, city: &str) -> Entity {
        Entity::with_id(EntityId::new(id).unwrap())
            .with("age", age)
            .with("city", city)
    }

    fn bag(with_index: bool) -> (LogRecordStore, Vec<Arc<Index>>) {
        let store = LogRecordStore::open(Box::new(InMemoryBackend::new())).unwrap();
        let people = [
            person("a", 25, "Delft"),
            person("b", 31, "Breda"),
            person("c", 31, "Delft"),
            person("d", 47, "Delft"),
            Entity::with_id(EntityId::new("e").unwrap()).with("city", "Delft"),
        ];
        for p in &people {
            store
                .insert_record(p.id().unwrap().as_str(), &encode_entity(p).unwrap())
                .unwrap();
        }
        let mut indexes = Vec::new();
        if with_index {
            let index = Index::new(
                "age",
                KeyInfo::new(&[KeyField::long("age")], &[]).unwrap(),
                false,
            );
            index
                .rebuild(people.iter().cloned().map(Ok), true)
                .unwrap();
            indexes.push(Arc::new(index));
        }
        (store, indexes)
    }

    fn ids(result: &QueryResult) -> Vec<String> {
        let mut ids: Vec<String> = result
            .entities
            .iter()
            .map(|e| e.id().unwrap().to_string())
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn index_and_scan_agree() {
        let (store, indexes) = bag(true);
        let queries = [
            SearchQuery::new().and("age", Equals, 31),
            SearchQuery::new().and("age", LargerThan, 31),
            SearchQuery::new().and("age", SmallerThanOrEquals, 31),
            SearchQuery::new().and("age", NotEquals, 31),
            SearchQuery::new()
                .and("age", LargerThanOrEquals, 30)
                .and("city", Equals, "Delft"),
        ];
        for query in &queries {
            let indexed = search(&store, &indexes, query, SearchLimit::default()).unwrap();
            let scanned = search(&store, &[], query, SearchLimit::default()).unwrap();
            assert_eq!(ids(&indexed), ids(&scanned), "{query:?}");
        }
    }

    #[test]
    fn planner_uses_leading_field_index() {
        let (store, indexes) = bag(true);
        let query = SearchQuery::new().and("age", Equals, 31);
        let result = search(&store, &indexes, &query, SearchLimit::default()).unwrap();
        assert_eq!(result.index_used.as_deref(), Some("age"));
        assert_eq!(ids(&result), ["b", "c"]);

        let by_city = SearchQuery::new().and("city", Equals, "Breda");
        let result = search(&store, &indexes, &by_city, SearchLimit::default()).unwrap();
        assert_eq!(result.index_used, None);
        assert_eq!(ids(&result), ["b"]);

        let not_equal = SearchQuery::new().and("age", NotEquals, 31);
        assert!(select_index(&indexes, &not_equal).is_none());
    }

    #[test]
    fn missing_fields_never_match() {
        let (store, _) = bag(false);
        let query = SearchQuery::new().and("age", NotEquals, 0);
        let result = search(&store, &[], &query, SearchLimit::default()).unwrap();
        assert_eq!(ids(&result), ["a", "b", "c", "d"]);
    }

    #[test]
    fn lists_match_any_element() {
        let entity = Entity::with_id(EntityId::new("x").unwrap()).with("tags", vec!["red", "blue"]);
        assert!(SearchQuery::new().and("tags", Equals, "blue").matches(&entity));
        assert!(!SearchQuery::new().and("tags", Equals, "green").matches(&entity));
        assert!(SearchQuery::new().and(ID_FIELD, Equals, "x").matches(&entity));
        assert!(!SearchQuery::new().and("tags", Equals, 1).matches(&entity));
    }

    fn ordered_ids(result: &QueryResult) -> Vec<String> {
        result
            .entities
            .iter()
            .map(|e| e.id().unwrap().to_string())
            .collect()
    }

    #[test]
    fn sort_keys_apply_before_window() {
        for (store, indexes) in [bag(true), bag(false)] {
            let query = SearchQuery::new()
                .and("city", Equals, "Delft")
                .sort_by("age", SortOrder::Descending)
                .sort_by(ID_FIELD, SortOrder::Ascending);
            let all = search(&store, &indexes, &query, SearchLimit::default()).unwrap();
            assert_eq!(ordered_ids(&all), ["d", "c", "a", "e"]);

            let page = SearchLimit {
                start: 1,
                max: Some(2),
            };
            let result = search(&store, &indexes, &query, page).unwrap();
            assert_eq!(ordered_ids(&result), ["c", "a"]);
        }
    }

    #[test]
    fn multi_key_sort_with_missing_values_last() {
        let (store, indexes) = bag(true);
        let query = SearchQuery::new()
            .sort_by("age", SortOrder::Ascending)
            .sort_by("city", SortOrder::Descending);
        let result = search(&store, &indexes, &query, SearchLimit::default()).unwrap();
        assert_eq!(ordered_ids(&result), ["a", "c", "b", "d", "e"]);

        let indexed = SearchQuery::new()
            .and("age", LargerThan, 0)
            .sort_by("city", SortOrder::Ascending)
            .sort_by("age", SortOrder::Descending);
        let result = search(&store, &indexes, &indexed, SearchLimit::first(3)).unwrap();
        assert_eq!(result.index_used.as_deref(), Some("age"));
        assert_eq!(ordered_ids(&result), ["b", "d", "c"]);
    }

    #[test]
    fn lists_sort_by_extreme_element() {
        let x = Entity::with_id(EntityId::new("x").unwrap()).with("n", vec![5, 1]);
        let y = Entity::with_id(EntityId::new("y").unwrap()).with("n", vec![3]);
        let up = SearchQuery::new().sort_by("n", SortOrder::Ascending);
        let down = SearchQuery::new().sort_by("n", SortOrder::Descending);
        let ids = |v: Vec<Entity>| -> Vec<String> {
            v.iter().map(|e| e.id().unwrap().to_string()).collect()
        };
        assert_eq!(ids(up.sort(vec![y.clone(), x.clone()])), ["x", "y"]);
        assert_eq!(ids(down.sort(vec![y, x])), ["x", "y"]);
    }

    #[test]
    fn limit_windows_matches() {
        let (store, indexes) = bag(true);
        let query = SearchQuery::new().and("age", LargerThan, 0);
        let limit = SearchLimit {
            start: 1,
            max: Some(2),
        };
        let result = search(&store, &indexes, &query, limit).unwrap();
        assert_eq!(ids(&result), ["b", "c"]);
        let result = search(&store, &indexes, &query, SearchLimit::first(1)).unwrap();
        assert_eq!(ids(&result), ["a"]);
    }
}
