use crate::db::{DocumentStore, Filter, StoreTx};
use crate::error::Result;
use crate::extract::{TextExtractor, split_snippets};
use crate::fetch::{FetchedPage, Fetcher, Transport};
use crate::resource::ResourceType;
use crate::schema::{
    Body, BodyRecord, Document, DocumentRecord, FieldChange, Meeting, MeetingRecord, SnippetRecord,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A document whose file has been fetched and split, not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDocument {
    record: DocumentRecord,
    texts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMeeting {
    agendas: Vec<ResolvedDocument>,
    minutes: Vec<ResolvedDocument>,
}

pub struct Persister<'a, T, X> {
    store: &'a DocumentStore,
    fetcher: &'a Fetcher<T>,
    extractor: Option<&'a X>,
}

impl<'a, T: Transport, X: TextExtractor> Persister<'a, T, X> {
    pub fn new(store: &'a DocumentStore, fetcher: &'a Fetcher<T>, extractor: Option<&'a X>) -> Self {
        Self {
            store,
            fetcher,
            extractor,
        }
    }

    /// Checked before anything is fetched.
    pub fn is_duplicate(&self, rtype: ResourceType, id: i64) -> Result<bool> {
        self.store.contains(rtype, id)
    }

    /// Downloads and extracts the file when there is one and an extractor
    /// is configured. A failed download fails the document; a failed
    /// extraction only costs its snippets. Writes nothing.
    pub async fn resolve_document(&self, document: &Document) -> Result<ResolvedDocument> {
        let (stamp, texts) = match (&document.path, self.extractor) {
            (Some(path), Some(extractor)) => {
                let FetchedPage { body, stamp, .. } = self.fetcher.fetch_document(path).await?;
                let texts = match extractor.extract_text(body).await {
                    Ok(text) => split_snippets(&text),
                    Err(err) => {
                        tracing::warn!(path = %path, error = %err, "text extraction failed, storing document without snippets");
                        Vec::new()
                    }
                };
                (stamp, texts)
            }
            _ => (document.stamp, Vec::new()),
        };
        Ok(ResolvedDocument {
            record: DocumentRecord::from_document(document, stamp, Vec::new()),
            texts,
        })
    }

    async fn resolve_documents(&self, documents: &[Document]) -> Result<Vec<ResolvedDocument>> {
        let mut resolved = Vec::with_capacity(documents.len());
        for document in documents {
            resolved.push(self.resolve_document(document).await?);
        }
        Ok(resolved)
    }

    pub async fn resolve_meeting(&self, meeting: &Meeting) -> Result<ResolvedMeeting> {
        Ok(ResolvedMeeting {
            agendas: self.resolve_documents(&meeting.details.agendas).await?,
            minutes: self.resolve_documents(&meeting.details.minutes).await?,
        })
    }

    pub async fn store_meeting(&self, id: i64, meeting: &Meeting) -> Result<i64> {
        let resolved = self.resolve_meeting(meeting).await?;
        self.write_meeting(id, meeting, resolved, false)
    }

    pub async fn store_document(&self, document: &Document) -> Result<i64> {
        let resolved = self.resolve_document(document).await?;
        self.store.transaction(|tx| insert_document(tx, resolved))
    }

    /// Stores the meeting with its resolved documents. With `replace`, the
    /// stored meeting and everything it owns are deleted in the same
    /// transaction first.
    pub fn write_meeting(
        &self,
        id: i64,
        meeting: &Meeting,
        resolved: ResolvedMeeting,
        replace: bool,
    ) -> Result<i64> {
        self.store.transaction(|tx| {
            if replace {
                remove_in(tx, ResourceType::Meeting, id)?;
            }
            let agendas = insert_documents(tx, resolved.agendas)?;
            let minutes = insert_documents(tx, resolved.minutes)?;
            let record = MeetingRecord::from_meeting(meeting, agendas, minutes);
            insert(tx, ResourceType::Meeting, Some(id), &record)
        })
    }

    pub fn write_body(&self, id: i64, body: &Body, replace: bool) -> Result<i64> {
        self.store.transaction(|tx| {
            if replace {
                remove_in(tx, ResourceType::Body, id)?;
            }
            insert(tx, ResourceType::Body, Some(id), &BodyRecord::from_body(body))
        })
    }

    pub fn store_body(&self, id: i64, body: &Body) -> Result<i64> {
        self.write_body(id, body, false)
    }
}

fn insert_documents(tx: &StoreTx<'_>, documents: Vec<ResolvedDocument>) -> Result<Vec<i64>> {
    documents
        .into_iter()
        .map(|document| insert_document(tx, document))
        .collect()
}

fn insert_document(tx: &StoreTx<'_>, resolved: ResolvedDocument) -> Result<i64> {
    let ResolvedDocument { mut record, texts } = resolved;
    record.snippets = texts
        .into_iter()
        .map(|text| insert(tx, ResourceType::Snippet, None, &SnippetRecord { text }))
        .collect::<Result<Vec<_>>>()?;
    insert(tx, ResourceType::Document, None, &record)
}

fn insert<R: Serialize>(
    tx: &StoreTx<'_>,
    rtype: ResourceType,
    id: Option<i64>,
    record: &R,
) -> Result<i64> {
    let doc = serde_json::to_value(record)?;
    rtype.assert_shape(&doc)?;
    tx.insert_one(rtype, id, &doc)
}

/// Deletes a record together with the documents and snippets it owns.
/// Returns whether the record existed.
pub fn remove(store: &DocumentStore, rtype: ResourceType, id: i64) -> Result<bool> {
    store.transaction(|tx| remove_in(tx, rtype, id))
}

fn remove_in(tx: &StoreTx<'_>, rtype: ResourceType, id: i64) -> Result<bool> {
    match rtype {
        ResourceType::Meeting => {
            let Some(record) = tx.find_record::<MeetingRecord>(rtype, id)? else {
                return Ok(false);
            };
            for doc_id in record.agendas.iter().chain(&record.minutes) {
                remove_in(tx, ResourceType::Document, *doc_id)?;
            }
        }
        ResourceType::Document => {
            if let Some(record) = tx.find_record::<DocumentRecord>(rtype, id)? {
                for snippet in &record.snippets {
                    tx.delete_one(ResourceType::Snippet, *snippet)?;
                }
            }
        }
        ResourceType::Body | ResourceType::Person | ResourceType::Snippet => {}
    }
    tx.delete_one(rtype, id)
}

/// Drops bodies stored with an empty name.
pub fn clean_empty_bodies(store: &DocumentStore) -> Result<usize> {
    let removed = store.delete_many(ResourceType::Body, &Filter::eq("name", ""))?;
    tracing::info!(removed, "removed nameless bodies");
    Ok(removed)
}

/// Field-level differences between two persisted shapes. The capture
/// stamp always differs and is left out; absent and null compare equal.
pub fn diff_values(old: &Value, new: &Value) -> BTreeMap<String, FieldChange> {
    let empty = serde_json::Map::new();
    let old = old.as_object().unwrap_or(&empty);
    let new = new.as_object().unwrap_or(&empty);

    old.keys()
        .chain(new.keys())
        .filter(|key| key.as_str() != "stamp")
        .filter_map(|key| {
            let before = old.get(key).unwrap_or(&Value::Null);
            let after = new.get(key).unwrap_or(&Value::Null);
            (before != after).then(|| {
                (
                    key.clone(),
                    FieldChange {
                        old: before.clone(),
                        new: after.clone(),
                    },
                )
            })
        })
        .collect()
}

fn stored_paths(store: &DocumentStore, ids: &[i64]) -> Result<Value> {
    let mut paths = Vec::with_capacity(ids.len());
    for id in ids {
        let path = store
            .find_record::<DocumentRecord>(ResourceType::Document, *id)?
            .and_then(|doc| doc.path);
        paths.push(path.map_or(Value::Null, Value::String));
    }
    Ok(Value::Array(paths))
}

fn fresh_paths(documents: &[Document]) -> Value {
    Value::Array(
        documents
            .iter()
            .map(|doc| doc.path.clone().map_or(Value::Null, Value::String))
            .collect(),
    )
}

/// Compares a stored meeting with a freshly validated one. Document
/// lists are compared by file path since the fresh documents have no ids
/// yet.
pub fn meeting_changes(
    store: &DocumentStore,
    old: &MeetingRecord,
    new: &Meeting,
) -> Result<BTreeMap<String, FieldChange>> {
    let mut before = serde_json::to_value(old)?;
    let mut after = serde_json::to_value(MeetingRecord::from_meeting(new, Vec::new(), Vec::new()))?;
    before["agendas"] = stored_paths(store, &old.agendas)?;
    before["minutes"] = stored_paths(store, &old.minutes)?;
    after["agendas"] = fresh_paths(&new.details.agendas);
    after["minutes"] = fresh_paths(&new.details.minutes);
    Ok(diff_values(&before, &after))
}

pub fn body_changes(old: &BodyRecord, new: &Body) -> Result<BTreeMap<String, FieldChange>> {
    let before = serde_json::to_value(old)?;
    let after = serde_json::to_value(BodyRecord::from_body(new))?;
    Ok(diff_values(&before, &after))
}
