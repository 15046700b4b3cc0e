//! Unique constraint coordinator
//!
//! A unique field value is guarded by the storage key `<type>-<field>-<value>`.
//! Moving an object from one state to another reserves the keys it gains and,
//! once the write is durable, releases the keys it lost. Reservations for one
//! mutation run concurrently; if any of them loses, the ones that won are
//! released again before the conflict is reported.

use crate::core::error::{GraphError, Result};
use crate::core::types::Fields;
use crate::schema::TypeConfig;
use crate::storage::{GraphStorage, StorageError};
use crate::system::Metrics;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashSet;

/// One reserved value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueKey {
    /// Field holding the value
    pub field: String,
    /// Storage key
    pub key: String,
}

/// Keys held by an object state
pub fn unique_keys(config: &TypeConfig, fields: &Fields) -> Vec<UniqueKey> {
    config
        .unique_fields()
        .filter_map(|field| {
            let value = fields.get(field)?;
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some(UniqueKey {
                field: field.to_string(),
                key: format!("{}-{}-{}", config.name, field, rendered),
            })
        })
        .collect()
}

/// Keys to reserve and keys to release for a state transition
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UniqueTransition {
    /// Held by the new state only
    pub reserve: Vec<UniqueKey>,
    /// Held by the old state only
    pub release: Vec<UniqueKey>,
}

impl UniqueTransition {
    /// Difference between two states' keys
    pub fn between(current: &[UniqueKey], previous: &[UniqueKey]) -> Self {
        let cur: HashSet<&str> = current.iter().map(|k| k.key.as_str()).collect();
        let prev: HashSet<&str> = previous.iter().map(|k| k.key.as_str()).collect();
        Self {
            reserve: current.iter().filter(|k| !prev.contains(k.key.as_str())).cloned().collect(),
            release: previous.iter().filter(|k| !cur.contains(k.key.as_str())).cloned().collect(),
        }
    }

    /// Whether nothing changes
    pub fn is_empty(&self) -> bool {
        self.reserve.is_empty() && self.release.is_empty()
    }
}

/// Reserve all keys or none.
///
/// On a lost reservation the keys this call acquired are released and
/// [`GraphError::UniqueConstraintViolated`] names the first conflicting field.
pub async fn reserve(storage: &dyn GraphStorage, keys: &[UniqueKey]) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }

    let outcomes = join_all(keys.iter().map(|k| storage.add_unique(&k.key))).await;

    let mut acquired = Vec::new();
    let mut failure = None;
    for (key, outcome) in keys.iter().zip(outcomes) {
        match outcome {
            Ok(()) => acquired.push(key.clone()),
            Err(err) => {
                if failure.is_none() {
                    failure = Some((key, err));
                }
            }
        }
    }

    let Some((key, err)) = failure else {
        return Ok(());
    };

    rollback(storage, &acquired).await?;

    match err {
        StorageError::AlreadyReserved(_) => {
            Metrics::global().operations.unique_conflicts.inc();
            tracing::warn!(field = %key.field, key = %key.key, "Unique constraint violated");
            Err(GraphError::UniqueConstraintViolated {
                field: key.field.clone(),
            })
        }
        other => Err(other.into()),
    }
}

/// Release keys this mutation reserved; any failure leaves a key stranded.
pub async fn rollback(storage: &dyn GraphStorage, keys: &[UniqueKey]) -> Result<()> {
    let outcomes = join_all(keys.iter().map(|k| storage.remove_unique(&k.key))).await;
    for (key, outcome) in keys.iter().zip(outcomes) {
        if let Err(source) = outcome {
            tracing::error!(key = %key.key, error = %source, "Failed to release unique key during rollback");
            return Err(GraphError::CompensationFailed {
                key: key.key.clone(),
                source,
            });
        }
    }
    Ok(())
}

/// Release keys the committed state no longer holds.
///
/// The write is already durable, so failures are logged and not returned.
pub async fn release_stale(storage: &dyn GraphStorage, keys: &[UniqueKey]) {
    let outcomes = join_all(keys.iter().map(|k| storage.remove_unique(&k.key))).await;
    for (key, outcome) in keys.iter().zip(outcomes) {
        if let Err(err) = outcome {
            tracing::error!(key = %key.key, error = %err, "Failed to release stale unique key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::test_registry;
    use crate::storage::MemStore;
    use serde_json::json;

    fn user_keys(value: Value) -> Vec<UniqueKey> {
        let registry = test_registry();
        let config = registry.object_config("user").unwrap();
        unique_keys(config, value.as_object().unwrap())
    }

    #[test]
    fn test_keys_for_present_unique_fields() {
        let keys = user_keys(json!({"email": "a@example.com", "age": 3}));
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].field, "email");
        assert_eq!(keys[0].key, "user-email-a@example.com");
    }

    #[test]
    fn test_transition() {
        let old = user_keys(json!({"email": "a@example.com", "nickname": "ab"}));
        let new = user_keys(json!({"email": "b@example.com", "nickname": "ab"}));
        let transition = UniqueTransition::between(&new, &old);
        assert_eq!(transition.reserve[0].key, "user-email-b@example.com");
        assert_eq!(transition.release[0].key, "user-email-a@example.com");
        assert!(UniqueTransition::between(&new, &new).is_empty());
    }

    #[tokio::test]
    async fn test_conflict_rolls_back_own_reservations() {
        let store = MemStore::new();
        store.add_unique("user-nickname-ab").await.unwrap();

        let keys = user_keys(json!({"email": "a@example.com", "nickname": "ab"}));
        let err = reserve(&store, &keys).await.unwrap_err();
        assert!(matches!(err, GraphError::UniqueConstraintViolated { ref field } if field == "nickname"));

        // The email reservation made by the failed attempt is released again
        store.add_unique("user-email-a@example.com").await.unwrap();
    }

    #[tokio::test]
    async fn test_release_stale_is_idempotent() {
        let store = MemStore::new();
        let keys = user_keys(json!({"email": "a@example.com"}));
        reserve(&store, &keys).await.unwrap();
        release_stale(&store, &keys).await;
        release_stale(&store, &keys).await;
        reserve(&store, &keys).await.unwrap();
    }
}
