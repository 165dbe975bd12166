//! Routing records to workers by persistence-key hash
//!
//! Key values are coerced the same way the resolver coerces them before
//! hashing, so records that filter on equal values always land on the
//! same worker and two workers never race to create the same root row.

use sha2::{Digest, Sha256};

use crate::coerce::coerce_field;
use crate::schema::{EntityDefinition, PersistenceKey};
use crate::value::{RawRecord, RawValue, Value};

/// Where one record is processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Worker(usize),
    /// On its own, after everything before it and before everything after
    /// it. Used when the key is only partly filled (the record can match
    /// rows owned by any worker) or cannot be normalised without touching
    /// the store.
    Serial,
}

/// Records grouped into the order they must be executed in
#[derive(Debug)]
pub enum Stage<T> {
    /// One list per worker, input order kept inside each list
    Parallel(Vec<Vec<(u64, T)>>),
    Serial(Vec<(u64, T)>),
}

enum KeyDigest {
    Full([u8; 8]),
    Empty,
    Partial,
}

fn digest(record: &RawRecord, entity: &EntityDefinition, key: &PersistenceKey) -> KeyDigest {
    let mut hasher = Sha256::new();
    let mut present = 0;
    for name in key.iter() {
        let Some(raw) = record.get(name) else {
            continue;
        };
        let Some(field) = entity.field(name) else {
            return KeyDigest::Partial;
        };
        // Nested references only get a row id from the store
        if field.is_reference() && !matches!(raw, RawValue::Ref(_) | RawValue::Null) {
            return KeyDigest::Partial;
        }
        let value = match coerce_field(&entity.name, field, raw) {
            Ok(Some(value)) if !value.is_null() => value,
            Ok(_) => continue,
            Err(_) => return KeyDigest::Partial,
        };
        hasher.update(name.as_bytes());
        hasher.update([0x1f_u8]);
        hasher.update(canonical(&value).as_bytes());
        hasher.update([0x1e_u8]);
        present += 1;
    }

    if present == 0 {
        return KeyDigest::Empty;
    }
    if present < key.fields().len() {
        return KeyDigest::Partial;
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    KeyDigest::Full(prefix)
}

fn canonical(value: &Value) -> String {
    match value {
        // 0.0 and -0.0 compare equal
        Value::Float(x) if *x == 0.0 => "0".to_string(),
        other => other.to_string(),
    }
}

/// Route for one prepared record.
///
/// Records without any key value cannot match anything and are spread
/// round-robin by ordinal.
pub fn route(
    record: &RawRecord,
    entity: &EntityDefinition,
    key: &PersistenceKey,
    ordinal: u64,
    workers: usize,
) -> Route {
    let workers = workers.max(1) as u64;
    match digest(record, entity, key) {
        KeyDigest::Partial => Route::Serial,
        KeyDigest::Empty => Route::Worker((ordinal % workers) as usize),
        KeyDigest::Full(prefix) => Route::Worker((u64::from_be_bytes(prefix) % workers) as usize),
    }
}

/// Group routed items into stages. Every run of serial items splits the
/// parallel work around it, so a serial record sees exactly the writes of
/// the records before it.
pub fn stages<T, I>(items: I, workers: usize) -> Vec<Stage<T>>
where
    I: IntoIterator<Item = (u64, T, Route)>,
{
    let workers = workers.max(1);
    let mut stages = Vec::new();
    let mut parallel: Option<Vec<Vec<(u64, T)>>> = None;
    let mut serial: Option<Vec<(u64, T)>> = None;

    for (ordinal, item, route) in items {
        match route {
            Route::Worker(worker) => {
                if let Some(run) = serial.take() {
                    stages.push(Stage::Serial(run));
                }
                let parts = parallel.get_or_insert_with(|| (0..workers).map(|_| Vec::new()).collect());
                parts[worker.min(workers - 1)].push((ordinal, item));
            }
            Route::Serial => {
                if let Some(parts) = parallel.take() {
                    stages.push(Stage::Parallel(parts));
                }
                serial.get_or_insert_with(Vec::new).push((ordinal, item));
            }
        }
    }
    if let Some(parts) = parallel {
        stages.push(Stage::Parallel(parts));
    }
    if let Some(run) = serial {
        stages.push(Stage::Serial(run));
    }
    stages
}
