use crate::error::{Error, Result};
use crate::resource::ResourceType;
use crate::schema::ChangeRecord;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Equality on one top-level field of the stored JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    field: String,
    value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }

    fn path(&self) -> String {
        format!("$.{}", self.field)
    }

    fn sql_value(&self) -> SqlValue {
        match &self.value {
            Value::Null => SqlValue::Null,
            Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
            Value::Number(number) => match number.as_i64() {
                Some(int) => SqlValue::Integer(int),
                None => SqlValue::Real(number.as_f64().unwrap_or_default()),
            },
            Value::String(text) => SqlValue::Text(text.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

pub struct DocumentStore {
    conn: Mutex<Connection>,
}

impl DocumentStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::StorePoisoned)
    }

    pub fn find_one(&self, rtype: ResourceType, id: i64) -> Result<Option<Value>> {
        find_doc(&*self.lock()?, rtype, id)
    }

    pub fn find_record<T: DeserializeOwned>(
        &self,
        rtype: ResourceType,
        id: i64,
    ) -> Result<Option<T>> {
        self.find_one(rtype, id)?
            .map(|doc| serde_json::from_value(doc).map_err(Error::from))
            .transpose()
    }

    pub fn contains(&self, rtype: ResourceType, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                &format!("SELECT id FROM {} WHERE id = ?1", rtype.collection_name()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Lowest id whose record has `field == value`.
    pub fn find_id_by_field(
        &self,
        rtype: ResourceType,
        field: &str,
        value: &str,
    ) -> Result<Option<i64>> {
        let filter = Filter::eq(field, value);
        let conn = self.lock()?;
        let id = conn
            .query_row(
                &format!(
                    "SELECT id FROM {} WHERE json_extract(doc, ?1) IS ?2 ORDER BY id LIMIT 1",
                    rtype.collection_name()
                ),
                params![filter.path(), filter.sql_value()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Inserts under the given id, or lets the store assign one. Inserting
    /// over an existing id fails.
    pub fn insert_one(&self, rtype: ResourceType, id: Option<i64>, doc: &Value) -> Result<i64> {
        insert_doc(&*self.lock()?, rtype, id, doc)
    }

    pub fn delete_one(&self, rtype: ResourceType, id: i64) -> Result<bool> {
        delete_doc(&*self.lock()?, rtype, id)
    }

    pub fn delete_many(&self, rtype: ResourceType, filter: &Filter) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            &format!(
                "DELETE FROM {} WHERE json_extract(doc, ?1) IS ?2",
                rtype.collection_name()
            ),
            params![filter.path(), filter.sql_value()],
        )?;
        Ok(removed)
    }

    pub fn count(&self, rtype: ResourceType) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", rtype.collection_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn insert_change(&self, rtype: ResourceType, change: &ChangeRecord) -> Result<i64> {
        let table = rtype
            .changes_collection_name()
            .ok_or(Error::NotUpdateable(rtype))?;
        let text = serde_json::to_string(change)?;
        let conn = self.lock()?;
        conn.execute(&format!("INSERT INTO {table} (doc) VALUES (?1)"), params![text])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn changes(&self, rtype: ResourceType, resource: i64) -> Result<Vec<ChangeRecord>> {
        let table = rtype
            .changes_collection_name()
            .ok_or(Error::NotUpdateable(rtype))?;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT doc FROM {table} WHERE json_extract(doc, '$.resource') = ?1 ORDER BY id"
        ))?;
        let docs = stmt
            .query_map(params![resource], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        docs.iter()
            .map(|doc| serde_json::from_str(doc).map_err(Error::from))
            .collect()
    }

    /// Runs `writes` in one SQLite transaction holding the connection lock.
    /// Nothing it wrote survives an error.
    pub fn transaction<R>(&self, writes: impl FnOnce(&StoreTx<'_>) -> Result<R>) -> Result<R> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = writes(&StoreTx { conn: &*tx })?;
        tx.commit()?;
        Ok(out)
    }

    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().map_err(|_| Error::StorePoisoned)?;
        conn.close().map_err(|(_, err)| Error::Store(err))
    }
}

/// Store access inside [`DocumentStore::transaction`].
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    pub fn find_one(&self, rtype: ResourceType, id: i64) -> Result<Option<Value>> {
        find_doc(self.conn, rtype, id)
    }

    pub fn find_record<T: DeserializeOwned>(&self, rtype: ResourceType, id: i64) -> Result<Option<T>> {
        self.find_one(rtype, id)?
            .map(|doc| serde_json::from_value(doc).map_err(Error::from))
            .transpose()
    }

    pub fn insert_one(&self, rtype: ResourceType, id: Option<i64>, doc: &Value) -> Result<i64> {
        insert_doc(self.conn, rtype, id, doc)
    }

    pub fn delete_one(&self, rtype: ResourceType, id: i64) -> Result<bool> {
        delete_doc(self.conn, rtype, id)
    }
}

fn find_doc(conn: &Connection, rtype: ResourceType, id: i64) -> Result<Option<Value>> {
    let doc: Option<String> = conn
        .query_row(
            &format!("SELECT doc FROM {} WHERE id = ?1", rtype.collection_name()),
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    doc.map(|text| serde_json::from_str(&text).map_err(Error::from))
        .transpose()
}

fn insert_doc(conn: &Connection, rtype: ResourceType, id: Option<i64>, doc: &Value) -> Result<i64> {
    let text = serde_json::to_string(doc)?;
    let table = rtype.collection_name();
    match id {
        Some(id) => {
            conn.execute(
                &format!("INSERT INTO {table} (id, doc) VALUES (?1, ?2)"),
                params![id, text],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(&format!("INSERT INTO {table} (doc) VALUES (?1)"), params![text])?;
            Ok(conn.last_insert_rowid())
        }
    }
}

fn delete_doc(conn: &Connection, rtype: ResourceType, id: i64) -> Result<bool> {
    let removed = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", rtype.collection_name()),
        params![id],
    )?;
    Ok(removed > 0)
}

fn init(conn: &Connection) -> Result<()> {
    let mut ddl = String::new();
    for rtype in ResourceType::ALL {
        let tables = std::iter::once(rtype.collection_name()).chain(rtype.changes_collection_name());
        for table in tables {
            ddl.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, doc TEXT NOT NULL);\n"
            ));
        }
    }
    conn.execute_batch(&ddl)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn insert_with_and_without_id() {
        let store = DocumentStore::open_in_memory().unwrap();
        let id = store
            .insert_one(ResourceType::Body, Some(4749), &json!({"name": "Licenses"}))
            .unwrap();
        assert_eq!(id, 4749);

        let first = store
            .insert_one(ResourceType::Snippet, None, &json!({"text": "a"}))
            .unwrap();
        let second = store
            .insert_one(ResourceType::Snippet, None, &json!({"text": "b"}))
            .unwrap();
        assert!(second > first);
        assert_eq!(store.count(ResourceType::Snippet).unwrap(), 2);

        assert_eq!(
            store.find_one(ResourceType::Body, 4749).unwrap(),
            Some(json!({"name": "Licenses"}))
        );
        assert!(store.contains(ResourceType::Body, 4749).unwrap());
        assert!(!store.contains(ResourceType::Meeting, 4749).unwrap());
    }

    #[test]
    fn duplicate_id_is_a_store_error() {
        let store = DocumentStore::open_in_memory().unwrap();
        store
            .insert_one(ResourceType::Body, Some(1), &json!({"name": "a"}))
            .unwrap();
        let err = store
            .insert_one(ResourceType::Body, Some(1), &json!({"name": "b"}))
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn lookup_by_field_takes_lowest_id() {
        let store = DocumentStore::open_in_memory().unwrap();
        for (id, name) in [(9, "Licenses"), (3, "Licenses"), (5, "Zoning")] {
            store
                .insert_one(ResourceType::Body, Some(id), &json!({ "name": name }))
                .unwrap();
        }
        assert_eq!(
            store
                .find_id_by_field(ResourceType::Body, "name", "Licenses")
                .unwrap(),
            Some(3)
        );
        assert_eq!(
            store
                .find_id_by_field(ResourceType::Body, "name", "Parks")
                .unwrap(),
            None
        );
    }

    #[test]
    fn delete_many_matches_field_equality() {
        let store = DocumentStore::open_in_memory().unwrap();
        for (id, name) in [(1, ""), (2, "Zoning"), (3, "")] {
            store
                .insert_one(ResourceType::Body, Some(id), &json!({ "name": name }))
                .unwrap();
        }
        let removed = store
            .delete_many(ResourceType::Body, &Filter::eq("name", ""))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count(ResourceType::Body).unwrap(), 1);
        assert!(store.delete_one(ResourceType::Body, 2).unwrap());
        assert!(!store.delete_one(ResourceType::Body, 2).unwrap());
    }

    #[test]
    fn change_log_only_for_updateable_types() {
        let store = DocumentStore::open_in_memory().unwrap();
        let change = ChangeRecord {
            resource: 7,
            previous_stamp: 1,
            recorded_at: 2,
            changes: BTreeMap::new(),
        };
        store.insert_change(ResourceType::Meeting, &change).unwrap();
        assert_eq!(store.changes(ResourceType::Meeting, 7).unwrap(), vec![change.clone()]);
        assert!(matches!(
            store.insert_change(ResourceType::Snippet, &change),
            Err(Error::NotUpdateable(ResourceType::Snippet))
        ));
    }

    #[test]
    fn failed_transaction_leaves_no_writes() {
        let store = DocumentStore::open_in_memory().unwrap();
        store
            .insert_one(ResourceType::Body, Some(1), &json!({"name": "kept"}))
            .unwrap();

        let err = store
            .transaction(|tx| {
                tx.delete_one(ResourceType::Body, 1)?;
                tx.insert_one(ResourceType::Snippet, None, &json!({"text": "a"}))?;
                tx.insert_one(ResourceType::Body, Some(2), &json!({"name": "b"}))?;
                tx.insert_one(ResourceType::Body, Some(2), &json!({"name": "again"}))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));

        assert_eq!(store.find_one(ResourceType::Body, 1).unwrap(), Some(json!({"name": "kept"})));
        assert_eq!(store.count(ResourceType::Body).unwrap(), 1);
        assert_eq!(store.count(ResourceType::Snippet).unwrap(), 0);

        let id = store
            .transaction(|tx| tx.insert_one(ResourceType::Body, Some(3), &json!({"name": "c"})))
            .unwrap();
        assert_eq!(id, 3);
        assert!(store.contains(ResourceType::Body, 3).unwrap());
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("omp.sqlite3");
        let store = DocumentStore::open(&path).unwrap();
        store
            .insert_one(ResourceType::Snippet, Some(1), &json!({"text": "kept"}))
            .unwrap();
        store.close().unwrap();

        let reopened = DocumentStore::open(&path).unwrap();
        assert_eq!(
            reopened.find_one(ResourceType::Snippet, 1).unwrap(),
            Some(json!({"text": "kept"}))
        );
    }
}
