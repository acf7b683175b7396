use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::instrument;

use braid_core::context::{ContextIdentifier, StoredContext};
use braid_core::execution::{Execution, ExecutionStatus};
use braid_core::ids::{ContextId, ExecutionId, ItemId};
use braid_core::items::{Item, ItemContent, ItemStatus, ItemType, Part};

use crate::contract::ThreadStore;
use crate::database::Database;
use crate::error::StoreError;

/// SQLite-backed `ThreadStore`. Parts are stored as their wire encoding;
/// decoding back into typed parts happens here and nowhere else.
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn item_from_row(row: &Row<'_>) -> Result<Item, StoreError> {
        let type_str: String = row.get(1).map_err(StoreError::from)?;
        let status_str: String = row.get(3).map_err(StoreError::from)?;
        let parts_json: String = row.get(4).map_err(StoreError::from)?;
        let parts: Vec<Part> = serde_json::from_str(&parts_json)?;

        Ok(Item {
            id: ItemId::from_raw(row.get::<_, String>(0).map_err(StoreError::from)?),
            item_type: parse_item_type(&type_str)?,
            channel: row.get(2).map_err(StoreError::from)?,
            status: parse_item_status(&status_str)?,
            created_at: parse_ts(&row.get::<_, String>(5).map_err(StoreError::from)?)?,
            content: ItemContent { parts },
        })
    }

    fn select_context(
        conn: &Connection,
        identifier: &ContextIdentifier,
    ) -> Result<Option<StoredContext>, StoreError> {
        let (sql, param) = match identifier {
            ContextIdentifier::Id(id) => (
                "SELECT id, key, content, created_at, updated_at FROM contexts WHERE id = ?1",
                id.as_str().to_owned(),
            ),
            ContextIdentifier::Key(key) => (
                "SELECT id, key, content, created_at, updated_at FROM contexts WHERE key = ?1",
                key.clone(),
            ),
        };
        let row: Option<(String, Option<String>, String, String, String)> = conn
            .query_row(sql, [param], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })
            .optional()?;

        match row {
            None => Ok(None),
            Some((id, key, content, created_at, updated_at)) => Ok(Some(StoredContext {
                id: ContextId::from_raw(id),
                key,
                content: serde_json::from_str(&content)?,
                created_at: parse_ts(&created_at)?,
                updated_at: parse_ts(&updated_at)?,
            })),
        }
    }
}

// A row that stopped round-tripping is corruption, not a default.
fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {s:?}: {e}")))
}

fn parse_item_type(s: &str) -> Result<ItemType, StoreError> {
    match s {
        "input_text" => Ok(ItemType::InputText),
        "output_text" => Ok(ItemType::OutputText),
        "system_text" => Ok(ItemType::SystemText),
        "tool_result" => Ok(ItemType::ToolResult),
        other => Err(StoreError::Serialization(format!("unknown item type: {other}"))),
    }
}

fn parse_item_status(s: &str) -> Result<ItemStatus, StoreError> {
    match s {
        "pending" => Ok(ItemStatus::Pending),
        "completed" => Ok(ItemStatus::Completed),
        other => Err(StoreError::Serialization(format!("unknown item status: {other}"))),
    }
}

fn parse_execution_status(s: &str) -> Result<ExecutionStatus, StoreError> {
    match s {
        "executing" => Ok(ExecutionStatus::Executing),
        "completed" => Ok(ExecutionStatus::Completed),
        "failed" => Ok(ExecutionStatus::Failed),
        other => Err(StoreError::Serialization(format!("unknown execution status: {other}"))),
    }
}

impl ThreadStore for SqliteStore {
    #[instrument(skip(self))]
    fn get_context(&self, identifier: &ContextIdentifier) -> Result<Option<StoredContext>, StoreError> {
        self.db.with_conn(|conn| Self::select_context(conn, identifier))
    }

    #[instrument(skip(self, initial_content))]
    fn create_context(
        &self,
        identifier: Option<&ContextIdentifier>,
        initial_content: Value,
    ) -> Result<StoredContext, StoreError> {
        let (id, key) = match identifier {
            Some(ContextIdentifier::Id(id)) => (id.clone(), None),
            Some(ContextIdentifier::Key(key)) => (ContextId::new(), Some(key.clone())),
            None => (ContextId::new(), None),
        };
        let now = Utc::now();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO contexts (id, key, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_str(),
                    key.as_deref(),
                    serde_json::to_string(&initial_content)?,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!(
                        "context already exists for {}",
                        key.as_deref().unwrap_or(id.as_str())
                    ))
                }
                other => StoreError::from(other),
            })?;

            Ok(StoredContext {
                id: id.clone(),
                key: key.clone(),
                content: initial_content.clone(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self, patch), fields(context_id = %id))]
    fn patch_context_content(&self, id: &ContextId, patch: Value) -> Result<StoredContext, StoreError> {
        self.db.with_conn(|conn| {
            let existing = Self::select_context(conn, &ContextIdentifier::Id(id.clone()))?
                .ok_or_else(|| StoreError::NotFound(format!("context {id}")))?;

            let merged = merge_content(existing.content, patch.clone());
            let now = Utc::now();
            conn.execute(
                "UPDATE contexts SET content = ?1, updated_at = ?2 WHERE id = ?3",
                params![serde_json::to_string(&merged)?, now.to_rfc3339(), id.as_str()],
            )?;

            Ok(StoredContext {
                content: merged,
                updated_at: now,
                ..existing
            })
        })
    }

    #[instrument(skip(self, item), fields(context_id = %context_id, item_id = %item.id))]
    fn append_item(&self, context_id: &ContextId, item: &Item) -> Result<Item, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO items (id, context_id, type, channel, status, parts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    item.id.as_str(),
                    context_id.as_str(),
                    item.item_type.as_str(),
                    item.channel,
                    item.status.as_str(),
                    serde_json::to_string(&item.content.parts)?,
                    item.created_at.to_rfc3339(),
                ],
            )?;
            Ok(item.clone())
        })
    }

    #[instrument(skip(self, item), fields(item_id = %item_id))]
    fn update_item(&self, item_id: &ItemId, item: &Item) -> Result<Item, StoreError> {
        self.db.with_conn(|conn| {
            let created_at: String = conn
                .query_row(
                    "SELECT created_at FROM items WHERE id = ?1",
                    [item_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("item {item_id}")))?;

            conn.execute(
                "UPDATE items SET type = ?1, channel = ?2, status = ?3, parts = ?4 WHERE id = ?5",
                params![
                    item.item_type.as_str(),
                    item.channel,
                    item.status.as_str(),
                    serde_json::to_string(&item.content.parts)?,
                    item_id.as_str(),
                ],
            )?;

            Ok(Item {
                id: item_id.clone(),
                created_at: parse_ts(&created_at)?,
                ..item.clone()
            })
        })
    }

    #[instrument(skip(self))]
    fn get_item(&self, item_id: &ItemId) -> Result<Option<Item>, StoreError> {
        self.db.with_conn(|conn| {
            let row: Option<(String, String, String, String, String, String)> = conn
                .query_row(
                    "SELECT id, type, channel, status, parts, created_at FROM items WHERE id = ?1",
                    [item_id.as_str()],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    },
                )
                .optional()?;

            match row {
                None => Ok(None),
                Some((id, item_type, channel, status, parts, created_at)) => {
                    let parts: Vec<Part> = serde_json::from_str(&parts)?;
                    Ok(Some(Item {
                        id: ItemId::from_raw(id),
                        item_type: parse_item_type(&item_type)?,
                        channel,
                        status: parse_item_status(&status)?,
                        created_at: parse_ts(&created_at)?,
                        content: ItemContent { parts },
                    }))
                }
            }
        })
    }

    #[instrument(skip(self))]
    fn get_items(&self, identifier: &ContextIdentifier) -> Result<Vec<Item>, StoreError> {
        self.db.with_conn(|conn| {
            let context = Self::select_context(conn, identifier)?
                .ok_or_else(|| StoreError::NotFound(format!("context {identifier:?}")))?;

            let mut stmt = conn.prepare(
                "SELECT id, type, channel, status, parts, created_at
                 FROM items WHERE context_id = ?1 ORDER BY created_at, id",
            )?;
            let rows: Vec<Item> = stmt
                .query_and_then([context.id.as_str()], |row| Self::item_from_row(row))?
                .collect::<Result<_, StoreError>>()?;
            Ok(rows)
        })
    }

    #[instrument(skip(self), fields(context_id = %context_id))]
    fn create_execution(
        &self,
        context_id: &ContextId,
        trigger_item_id: &ItemId,
        reaction_item_id: &ItemId,
    ) -> Result<Execution, StoreError> {
        let execution = Execution {
            id: ExecutionId::new(),
            context_id: context_id.clone(),
            trigger_item_id: trigger_item_id.clone(),
            reaction_item_id: reaction_item_id.clone(),
            iteration: 0,
            status: ExecutionStatus::Executing,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO executions
                 (id, context_id, trigger_item_id, reaction_item_id, iteration, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    execution.id.as_str(),
                    context_id.as_str(),
                    trigger_item_id.as_str(),
                    reaction_item_id.as_str(),
                    execution.iteration,
                    execution.status.as_str(),
                    execution.created_at.to_rfc3339(),
                    execution.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(execution.clone())
        })
    }

    #[instrument(skip(self), fields(execution_id = %execution_id))]
    fn update_execution(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        iteration: u32,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE executions SET status = ?1, iteration = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    status.as_str(),
                    iteration,
                    Utc::now().to_rfc3339(),
                    execution_id.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("execution {execution_id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, StoreError> {
        self.db.with_conn(|conn| {
            let row: Option<(String, String, String, String, u32, String, String, String)> = conn
                .query_row(
                    "SELECT id, context_id, trigger_item_id, reaction_item_id, iteration, status, created_at, updated_at
                     FROM executions WHERE id = ?1",
                    [execution_id.as_str()],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                        ))
                    },
                )
                .optional()?;

            match row {
                None => Ok(None),
                Some((id, ctx, trig, reac, iteration, status, created, updated)) => Ok(Some(Execution {
                    id: ExecutionId::from_raw(id),
                    context_id: ContextId::from_raw(ctx),
                    trigger_item_id: ItemId::from_raw(trig),
                    reaction_item_id: ItemId::from_raw(reac),
                    iteration,
                    status: parse_execution_status(&status)?,
                    created_at: parse_ts(&created)?,
                    updated_at: parse_ts(&updated)?,
                })),
            }
        })
    }
}

/// Shallow object merge: patch keys win; a non-object patch replaces.
fn merge_content(existing: Value, patch: Value) -> Value {
    match (existing, patch) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (k, v) in patch {
                base.insert(k, v);
            }
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::ids::ToolCallId;

    fn store() -> SqliteStore {
        SqliteStore::new(Database::in_memory().unwrap())
    }

    #[test]
    fn create_and_get_by_key() {
        let store = store();
        let created = store
            .create_context(Some(&ContextIdentifier::key("support:1")), serde_json::json!({}))
            .unwrap();
        assert_eq!(created.key.as_deref(), Some("support:1"));

        let found = store
            .get_context(&ContextIdentifier::key("support:1"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);

        let by_id = store
            .get_context(&ContextIdentifier::Id(created.id.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(by_id.key, created.key);
    }

    #[test]
    fn duplicate_key_is_a_conflict() {
        let store = store();
        store
            .create_context(Some(&ContextIdentifier::key("k")), Value::Null)
            .unwrap();
        let err = store
            .create_context(Some(&ContextIdentifier::key("k")), Value::Null)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got: {err:?}");
    }

    #[test]
    fn missing_context_is_none() {
        let store = store();
        assert!(store.get_context(&ContextIdentifier::key("nope")).unwrap().is_none());
    }

    #[test]
    fn patch_merges_shallowly() {
        let store = store();
        let ctx = store
            .create_context(None, serde_json::json!({ "a": 1, "b": 1 }))
            .unwrap();
        let patched = store
            .patch_context_content(&ctx.id, serde_json::json!({ "b": 2, "c": 3 }))
            .unwrap();
        assert_eq!(patched.content, serde_json::json!({ "a": 1, "b": 2, "c": 3 }));
        assert!(patched.updated_at >= ctx.updated_at);
    }

    #[test]
    fn items_roundtrip_with_tool_parts() {
        let store = store();
        let ctx = store.create_context(None, Value::Null).unwrap();

        let mut item = Item::input_text("web", "go");
        item.content.parts.push(Part::tool_call(
            "search",
            ToolCallId::from_raw("c1"),
            serde_json::json!({ "q": "x" }),
        ));
        store.append_item(&ctx.id, &item).unwrap();

        let fetched = store.get_item(&item.id).unwrap().unwrap();
        assert_eq!(fetched.content.parts, item.content.parts);
    }

    #[test]
    fn items_are_ordered_by_creation() {
        let store = store();
        let ctx = store.create_context(None, Value::Null).unwrap();

        let a = Item::input_text("web", "a");
        let b = Item::input_text("web", "b");
        store.append_item(&ctx.id, &a).unwrap();
        store.append_item(&ctx.id, &b).unwrap();

        let items = store.get_items(&ContextIdentifier::Id(ctx.id)).unwrap();
        assert_eq!(items.iter().map(|i| i.id.clone()).collect::<Vec<_>>(), vec![a.id, b.id]);
    }

    #[test]
    fn update_item_preserves_identity_and_position() {
        let store = store();
        let ctx = store.create_context(None, Value::Null).unwrap();
        let item = Item::input_text("web", "orig");
        store.append_item(&ctx.id, &item).unwrap();

        let mut amended = item.clone();
        amended.status = ItemStatus::Completed;
        amended.created_at = Utc::now(); // must be ignored
        amended.content.parts.push(Part::text("more"));

        let updated = store.update_item(&item.id, &amended).unwrap();
        assert_eq!(updated.id, item.id);
        assert_eq!(updated.created_at, store.get_item(&item.id).unwrap().unwrap().created_at);
        assert_eq!(updated.content.parts.len(), 2);
    }

    #[test]
    fn update_missing_item_is_not_found() {
        let store = store();
        let item = Item::input_text("web", "x");
        let err = store.update_item(&ItemId::from_raw("item_missing"), &item).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn execution_lifecycle() {
        let store = store();
        let ctx = store.create_context(None, Value::Null).unwrap();
        let trigger = ItemId::new();
        let reaction = ItemId::new();

        let exec = store.create_execution(&ctx.id, &trigger, &reaction).unwrap();
        assert_eq!(exec.status, ExecutionStatus::Executing);
        assert_eq!(exec.iteration, 0);

        store
            .update_execution(&exec.id, ExecutionStatus::Completed, 2)
            .unwrap();
        let fetched = store.get_execution(&exec.id).unwrap().unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Completed);
        assert_eq!(fetched.iteration, 2);
        assert_eq!(fetched.trigger_item_id, trigger);
        assert_eq!(fetched.reaction_item_id, reaction);
    }

    #[test]
    fn update_missing_execution_is_not_found() {
        let store = store();
        let err = store
            .update_execution(&ExecutionId::from_raw("exec_missing"), ExecutionStatus::Failed, 0)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn corrupt_context_rows_surface_as_serialization_errors() {
        let store = store();
        let created = store
            .create_context(Some(&ContextIdentifier::key("c")), serde_json::json!({ "a": 1 }))
            .unwrap();

        store
            .database()
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE contexts SET content = 'not json' WHERE id = ?1",
                    [created.id.as_str()],
                )?;
                Ok(())
            })
            .unwrap();
        let err = store
            .get_context(&ContextIdentifier::Id(created.id.clone()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));

        store
            .database()
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE contexts SET content = '{}', created_at = 'yesterday' WHERE id = ?1",
                    [created.id.as_str()],
                )?;
                Ok(())
            })
            .unwrap();
        let err = store
            .get_context(&ContextIdentifier::Id(created.id))
            .unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn merge_content_replaces_non_objects() {
        assert_eq!(merge_content(Value::Null, serde_json::json!({ "a": 1 })), serde_json::json!({ "a": 1 }));
        assert_eq!(merge_content(serde_json::json!({ "a": 1 }), Value::Bool(true)), Value::Bool(true));
    }
}
