//! Matching a resolved record against stored rows

use crate::error::StoreResult;
use crate::schema::{EntityDefinition, PersistenceKey};
use crate::store::{Filter, Store};
use crate::value::{ResolvedRecord, RowRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    NoMatch,
    OneMatch(RowRef),
    ManyMatches(Vec<RowRef>),
}

/// Conditions for the key fields that hold a non-null value
pub fn key_filter(record: &ResolvedRecord, key: &PersistenceKey) -> Filter {
    key.iter()
        .filter_map(|field| {
            record
                .get(field)
                .filter(|value| !value.is_null())
                .map(|value| (field.to_string(), value.clone()))
        })
        .collect()
}

/// Look for the stored rows `record` identifies under `key`.
///
/// An empty key, or a key none of whose fields carry a value, never
/// matches and does not touch the store.
pub async fn find_match<S: Store + ?Sized>(
    store: &mut S,
    entity: &EntityDefinition,
    record: &ResolvedRecord,
    key: &PersistenceKey,
) -> StoreResult<MatchOutcome> {
    let filter = key_filter(record, key);
    if filter.is_empty() {
        return Ok(MatchOutcome::NoMatch);
    }

    let mut rows = store.query(entity, &filter).await?;
    Ok(match rows.len() {
        0 => MatchOutcome::NoMatch,
        1 => MatchOutcome::OneMatch(rows.remove(0)),
        _ => MatchOutcome::ManyMatches(rows),
    })
}
