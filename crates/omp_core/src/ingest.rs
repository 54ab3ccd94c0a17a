use crate::config::Config;
use crate::db::DocumentStore;
use crate::error::{Error, ErrorKind, Result};
use crate::extract::{TextExtractor, TikaExtractor};
use crate::fetch::{Fetcher, HttpTransport, Portal, RetryPolicy, Transport};
use crate::parse::{parse_body, parse_meeting};
use crate::progress::Progress;
use crate::raw::RawMeeting;
use crate::resource::ResourceType;
use crate::schema::{BodyRecord, ChangeRecord, FieldChange, MeetingRecord};
use crate::store::{self, Persister};
use crate::validate::{meeting_id_from_form_action, validate_body, validate_meeting};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Fetching,
    Parsing,
    Validating,
    Storing,
    Done,
    Duplicate,
    Failed,
}

/// Serialized as its numeric code: 0 stored, 1 skipped, 2 error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum Outcome {
    Stored,
    Skipped,
    Error,
}

impl From<Outcome> for u8 {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Stored => 0,
            Outcome::Skipped => 1,
            Outcome::Error => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdResult {
    pub id: i64,
    pub outcome: Outcome,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl IdResult {
    fn stored(id: i64) -> Self {
        Self {
            id,
            outcome: Outcome::Stored,
            stage: Stage::Done,
            failed_at: None,
            reason: None,
            error: None,
            kind: None,
        }
    }

    fn skipped(id: i64, stage: Stage, reason: &str) -> Self {
        Self {
            outcome: Outcome::Skipped,
            stage,
            reason: Some(reason.to_string()),
            ..Self::stored(id)
        }
    }

    fn failed(id: i64, failed_at: Stage, error: String, kind: ErrorKind) -> Self {
        Self {
            outcome: Outcome::Error,
            stage: Stage::Failed,
            failed_at: Some(failed_at),
            error: Some(error),
            kind: Some(kind),
            ..Self::stored(id)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Stored => self.stored += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Error => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub resource: ResourceType,
    pub start: i64,
    pub count: usize,
    pub counts: OutcomeCounts,
    /// One entry per id, ordered by id.
    pub results: Vec<IdResult>,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub workers: usize,
    pub overwrite: bool,
    /// Limit on the whole batch. Work still running when it expires is
    /// abandoned, not cancelled.
    pub batch_timeout: Option<Duration>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            workers: 64,
            overwrite: false,
            batch_timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// Nothing was stored under the id before.
    Created,
    Unchanged,
    Changed { fields: Vec<String> },
    NotAResource,
}

enum Processed {
    Stored,
    Duplicate,
    NotAResource,
}

pub struct Pipeline<T, X> {
    store: DocumentStore,
    fetcher: Fetcher<T>,
    extractor: Option<X>,
}

impl Pipeline<HttpTransport, TikaExtractor> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.fetch.request_timeout();
        let fetcher = Fetcher::new(
            HttpTransport::new(timeout)?,
            Portal::new(&config.portal.base_url),
            RetryPolicy {
                max_tries: config.fetch.max_tries,
                wait: config.fetch.wait(),
            },
        );
        let extractor = config
            .extract
            .endpoint()
            .map(|endpoint| TikaExtractor::new(endpoint, timeout))
            .transpose()?;
        let store = DocumentStore::open(&config.store.path)?;
        Ok(Self::new(store, fetcher, extractor))
    }
}

impl<T: Transport, X: TextExtractor> Pipeline<T, X> {
    pub fn new(store: DocumentStore, fetcher: Fetcher<T>, extractor: Option<X>) -> Self {
        Self {
            store,
            fetcher,
            extractor,
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn portal(&self) -> &Portal {
        self.fetcher.portal()
    }

    fn persister(&self) -> Persister<'_, T, X> {
        Persister::new(&self.store, &self.fetcher, self.extractor.as_ref())
    }

    pub async fn ingest(
        self: &Arc<Self>,
        rtype: ResourceType,
        ids: Range<i64>,
        options: &IngestOptions,
        progress: &mut dyn Progress,
    ) -> Result<IngestReport> {
        if !matches!(rtype, ResourceType::Meeting | ResourceType::Body) {
            return Err(Error::Config(format!("{rtype} records are not ingested by id")));
        }
        let start = ids.start;
        let total = usize::try_from(ids.end.saturating_sub(ids.start)).unwrap_or_default();
        let workers = options.workers.max(1);
        let overwrite = options.overwrite;
        tracing::info!(%rtype, start, total, workers, overwrite, "ingest started");

        progress.begin(total);
        let mut counts = OutcomeCounts::default();
        let mut results = Vec::with_capacity(total);

        let completed = {
            let mut finished = stream::iter(ids)
                .map(move |id| {
                    let pipeline = Arc::clone(self);
                    let task =
                        tokio::spawn(async move { pipeline.process(rtype, id, overwrite).await });
                    async move { (id, task.await) }
                })
                .buffer_unordered(workers);

            let collect = async {
                while let Some((id, joined)) = finished.next().await {
                    let result = joined.unwrap_or_else(|err| {
                        tracing::error!(id, error = %err, "ingest task did not complete");
                        IdResult::failed(id, Stage::Pending, err.to_string(), ErrorKind::Invariant)
                    });
                    counts.add(result.outcome);
                    progress.item_done(id, result.outcome.into());
                    results.push(result);
                }
            };

            match options.batch_timeout {
                Some(limit) => tokio::time::timeout(limit, collect).await.is_ok(),
                None => {
                    collect.await;
                    true
                }
            }
        };
        progress.finish();

        if !completed {
            let after = options.batch_timeout.unwrap_or_default();
            tracing::error!(
                %rtype,
                completed = results.len(),
                total,
                stored = counts.stored,
                "batch timed out, abandoning unfinished ids"
            );
            return Err(Error::BatchTimeout {
                after,
                completed: results.len(),
            });
        }

        results.sort_by_key(|result| result.id);
        tracing::info!(
            %rtype,
            stored = counts.stored,
            skipped = counts.skipped,
            failed = counts.failed,
            "ingest finished"
        );
        Ok(IngestReport {
            resource: rtype,
            start,
            count: total,
            counts,
            results,
        })
    }

    async fn process(&self, rtype: ResourceType, id: i64, overwrite: bool) -> IdResult {
        let mut stage = Stage::Pending;
        match self.run_one(rtype, id, overwrite, &mut stage).await {
            Ok(Processed::Stored) => {
                tracing::debug!(%rtype, id, "stored");
                IdResult::stored(id)
            }
            Ok(Processed::Duplicate) => {
                tracing::trace!(%rtype, id, "already stored");
                IdResult::skipped(id, Stage::Duplicate, "duplicate")
            }
            Ok(Processed::NotAResource) => {
                tracing::debug!(%rtype, id, "no resource behind id");
                IdResult::skipped(id, Stage::Done, "not a resource")
            }
            Err(err) => {
                tracing::error!(%rtype, id, stage = ?stage, kind = ?err.kind(), error = %err, "ingest failed");
                IdResult::failed(id, stage, err.to_string(), err.kind())
            }
        }
    }

    async fn run_one(
        &self,
        rtype: ResourceType,
        id: i64,
        overwrite: bool,
        stage: &mut Stage,
    ) -> Result<Processed> {
        let persister = self.persister();
        if !overwrite && persister.is_duplicate(rtype, id)? {
            *stage = Stage::Duplicate;
            return Ok(Processed::Duplicate);
        }

        match rtype {
            ResourceType::Meeting => {
                *stage = Stage::Fetching;
                let page = self.fetcher.fetch_meeting(id).await?;
                *stage = Stage::Parsing;
                let raw = parse_meeting(&page.text(), page.stamp)?;
                *stage = Stage::Validating;
                let Some(meeting) = validate_meeting(&self.store, &raw)? else {
                    return Ok(Processed::NotAResource);
                };
                check_form_action(id, &raw);
                let resolved = persister.resolve_meeting(&meeting).await?;
                *stage = Stage::Storing;
                persister.write_meeting(id, &meeting, resolved, overwrite)?;
            }
            ResourceType::Body => {
                *stage = Stage::Fetching;
                let pages = self.fetcher.fetch_body(id).await?;
                *stage = Stage::Parsing;
                let raw = parse_body(&pages)?;
                *stage = Stage::Validating;
                let Some(body) = validate_body(&raw) else {
                    return Ok(Processed::NotAResource);
                };
                *stage = Stage::Storing;
                persister.write_body(id, &body, overwrite)?;
            }
            other => return Err(Error::Config(format!("{other} records are not ingested by id"))),
        }
        *stage = Stage::Done;
        Ok(Processed::Stored)
    }

    /// Re-fetches one record, logs any field changes against the stored
    /// copy into the change collection, then overwrites it.
    pub async fn update(&self, rtype: ResourceType, id: i64) -> Result<UpdateOutcome> {
        if !rtype.is_updateable() {
            return Err(Error::NotUpdateable(rtype));
        }
        let persister = self.persister();

        let (stamp, previous) = match rtype {
            ResourceType::Meeting => {
                let page = self.fetcher.fetch_meeting(id).await?;
                let raw = parse_meeting(&page.text(), page.stamp)?;
                let Some(meeting) = validate_meeting(&self.store, &raw)? else {
                    return Ok(UpdateOutcome::NotAResource);
                };
                check_form_action(id, &raw);
                let resolved = persister.resolve_meeting(&meeting).await?;
                let previous = match self.store.find_record::<MeetingRecord>(rtype, id)? {
                    Some(old) => Some((old.stamp, store::meeting_changes(&self.store, &old, &meeting)?)),
                    None => None,
                };
                persister.write_meeting(id, &meeting, resolved, true)?;
                (meeting.details.stamp, previous)
            }
            ResourceType::Body => {
                let pages = self.fetcher.fetch_body(id).await?;
                let Some(body) = validate_body(&parse_body(&pages)?) else {
                    return Ok(UpdateOutcome::NotAResource);
                };
                let previous = match self.store.find_record::<BodyRecord>(rtype, id)? {
                    Some(old) => Some((old.stamp, store::body_changes(&old, &body)?)),
                    None => None,
                };
                persister.write_body(id, &body, true)?;
                (body.stamp, previous)
            }
            other => return Err(Error::NotUpdateable(other)),
        };

        self.record_changes(rtype, id, stamp, previous)
    }

    fn record_changes(
        &self,
        rtype: ResourceType,
        id: i64,
        recorded_at: i64,
        previous: Option<(i64, BTreeMap<String, FieldChange>)>,
    ) -> Result<UpdateOutcome> {
        let Some((previous_stamp, changes)) = previous else {
            tracing::info!(%rtype, id, "update stored a new record");
            return Ok(UpdateOutcome::Created);
        };
        if changes.is_empty() {
            tracing::info!(%rtype, id, "update found no changes");
            return Ok(UpdateOutcome::Unchanged);
        }

        let fields: Vec<String> = changes.keys().cloned().collect();
        tracing::info!(%rtype, id, ?fields, "update recorded changes");
        self.store.insert_change(
            rtype,
            &ChangeRecord {
                resource: id,
                previous_stamp,
                recorded_at,
                changes,
            },
        )?;
        Ok(UpdateOutcome::Changed { fields })
    }

    /// Closes the store when no task holds the pipeline any more. Tasks
    /// abandoned by a batch timeout keep it alive; the connection is then
    /// left to process exit.
    pub fn shutdown(self: Arc<Self>) -> Result<()> {
        match Arc::try_unwrap(self) {
            Ok(pipeline) => pipeline.store.close(),
            Err(shared) => {
                tracing::warn!(
                    holders = Arc::strong_count(&shared),
                    "pipeline still in use by abandoned tasks, store connection left open"
                );
                Ok(())
            }
        }
    }
}

fn check_form_action(id: i64, raw: &RawMeeting) {
    match meeting_id_from_form_action(&raw.form_action) {
        Some(found) if found != id => {
            tracing::warn!(id, found, "meeting page form names a different meeting id");
        }
        None if !raw.form_action.is_empty() => {
            tracing::debug!(id, action = %raw.form_action, "meeting page form action without an id");
        }
        _ => {}
    }
}
