use anyhow::{Context, Result, anyhow};
use omp_core::db::DocumentStore;
use omp_core::fetch::Portal;
use omp_core::resource::ResourceType;
use omp_core::schema::{BodyRecord, DocumentRecord, MeetingRecord, SnippetRecord};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Range;

/// Flattened meeting for search and display. Unlike the stored record,
/// every field is present: missing text is `""`, missing lists are empty,
/// missing instants are 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingDisplay {
    pub id: String,
    pub body: String,
    pub meeting_dt: i64,
    pub address: String,
    pub filing_dt: i64,
    pub is_emergency: bool,
    pub is_annual_calendar: bool,
    pub is_public_notice: bool,
    pub is_cancelled: bool,
    pub cancelled_dt: i64,
    pub cancelled_reason: String,
    pub contact_person: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub latest_agenda: Vec<String>,
    pub latest_agenda_link: String,
    pub latest_minutes: Vec<String>,
    pub latest_minutes_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyDisplay {
    pub id: String,
    pub name: String,
    pub contact_person: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub facebook: String,
    pub twitter: String,
    pub instagram: String,
    pub linkedin: String,
    pub budget: String,
    pub personnel: String,
    pub description: String,
    pub responsibilities: String,
    pub max_members: u32,
    pub subcommittees: Vec<String>,
    pub board_members: Vec<[String; 5]>,
    pub contact_information: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportFailure {
    pub id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportBatch {
    pub records: Vec<Value>,
    /// Ids in the range with nothing stored.
    pub missing: Vec<i64>,
    pub failed: Vec<ExportFailure>,
}

pub struct Projector<'a> {
    store: &'a DocumentStore,
    portal: &'a Portal,
}

impl<'a> Projector<'a> {
    pub fn new(store: &'a DocumentStore, portal: &'a Portal) -> Self {
        Self { store, portal }
    }

    pub fn project_meeting(&self, id: i64) -> Result<MeetingDisplay> {
        let meeting: MeetingRecord = self
            .store
            .find_record(ResourceType::Meeting, id)?
            .ok_or_else(|| anyhow!("meeting {id} not found"))?;
        let body: BodyRecord = self
            .store
            .find_record(ResourceType::Body, meeting.body)?
            .ok_or_else(|| anyhow!("body {} of meeting {id} not found", meeting.body))?;

        let (latest_agenda, latest_agenda_link) = self
            .latest_document(&meeting.agendas)
            .with_context(|| format!("resolving agendas of meeting {id}"))?;
        let (latest_minutes, latest_minutes_link) = self
            .latest_document(&meeting.minutes)
            .with_context(|| format!("resolving minutes of meeting {id}"))?;

        let (cancelled_dt, cancelled_reason) = if meeting.is_cancelled {
            (
                meeting.cancelled_dt.unwrap_or_default(),
                meeting.cancelled_reason.clone().unwrap_or_default(),
            )
        } else {
            (0, String::new())
        };

        Ok(MeetingDisplay {
            id: id.to_string(),
            body: body.name,
            meeting_dt: meeting.meeting_dt,
            address: meeting.meeting_address.clone(),
            filing_dt: meeting.filing_dt,
            is_emergency: meeting.is_emergency,
            is_annual_calendar: meeting.is_annual_calendar,
            is_public_notice: meeting.is_public_notice,
            is_cancelled: meeting.is_cancelled,
            cancelled_dt,
            cancelled_reason,
            contact_person: meeting.contact_name.clone().unwrap_or_default(),
            contact_email: meeting.contact_email.clone().unwrap_or_default(),
            contact_phone: meeting
                .contact_phone()
                .map(|phone| phone.display())
                .unwrap_or_default(),
            latest_agenda,
            latest_agenda_link,
            latest_minutes,
            latest_minutes_link,
        })
    }

    pub fn project_body(&self, id: i64) -> Result<BodyDisplay> {
        let body: BodyRecord = self
            .store
            .find_record(ResourceType::Body, id)?
            .ok_or_else(|| anyhow!("body {id} not found"))?;

        let mut subcommittees = Vec::with_capacity(body.subcommittees.len());
        for sub_id in &body.subcommittees {
            match self.store.find_record::<BodyRecord>(ResourceType::Body, *sub_id)? {
                Some(sub) => subcommittees.push(sub.name),
                None => tracing::debug!(body = id, subcommittee = sub_id, "subcommittee not stored, skipped"),
            }
        }

        let contact_phone = body
            .contact_phone()
            .map(|phone| phone.display())
            .unwrap_or_default();
        Ok(BodyDisplay {
            id: id.to_string(),
            name: body.name,
            contact_person: body.contact_name.unwrap_or_default(),
            contact_email: body.contact_email.unwrap_or_default(),
            contact_phone,
            facebook: body.facebook.unwrap_or_default(),
            twitter: body.twitter.unwrap_or_default(),
            instagram: body.instagram.unwrap_or_default(),
            linkedin: body.linkedin.unwrap_or_default(),
            budget: body.budget.unwrap_or_default(),
            personnel: body.personnel.unwrap_or_default(),
            description: body.description.unwrap_or_default(),
            responsibilities: body.responsibilities.unwrap_or_default(),
            max_members: body.max_members.unwrap_or_default(),
            subcommittees,
            board_members: body.board_members,
            contact_information: body.contact_information,
        })
    }

    pub fn project(&self, rtype: ResourceType, id: i64) -> Result<Value> {
        let value = match rtype {
            ResourceType::Meeting => serde_json::to_value(self.project_meeting(id)?)?,
            ResourceType::Body => serde_json::to_value(self.project_body(id)?)?,
            other => return Err(anyhow!("{other} records have no display form")),
        };
        Ok(value)
    }

    /// Snippet texts and download link of the most recently filed document.
    fn latest_document(&self, ids: &[i64]) -> Result<(Vec<String>, String)> {
        let mut latest: Option<DocumentRecord> = None;
        for id in ids {
            let doc: DocumentRecord = self
                .store
                .find_record(ResourceType::Document, *id)?
                .ok_or_else(|| anyhow!("document {id} not found"))?;
            if latest.as_ref().is_none_or(|best| doc.filing_dt > best.filing_dt) {
                latest = Some(doc);
            }
        }
        let Some(doc) = latest else {
            return Ok((Vec::new(), String::new()));
        };

        let mut texts = Vec::with_capacity(doc.snippets.len());
        for snippet_id in &doc.snippets {
            let snippet: SnippetRecord = self
                .store
                .find_record(ResourceType::Snippet, *snippet_id)?
                .ok_or_else(|| anyhow!("snippet {snippet_id} not found"))?;
            texts.push(snippet.text);
        }
        let link = doc
            .path
            .as_deref()
            .map(|path| self.portal.document_url(path))
            .unwrap_or_default();
        Ok((texts, link))
    }

    /// Projects every stored id in the range. Ids with nothing stored are
    /// listed separately; a failing projection does not stop the rest.
    pub fn export_range(&self, rtype: ResourceType, ids: Range<i64>) -> Result<ExportBatch> {
        let mut batch = ExportBatch::default();
        for id in ids {
            if !self.store.contains(rtype, id)? {
                batch.missing.push(id);
                continue;
            }
            match self.project(rtype, id) {
                Ok(record) => batch.records.push(record),
                Err(err) => {
                    let error = format!("{err:#}");
                    tracing::error!(%rtype, id, %error, "export failed");
                    batch.failed.push(ExportFailure { id, error });
                }
            }
        }
        tracing::info!(
            %rtype,
            exported = batch.records.len(),
            missing = batch.missing.len(),
            failed = batch.failed.len(),
            "export finished"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn portal() -> Portal {
        Portal::new("https://opengov.sos.ri.gov")
    }

    fn seeded() -> DocumentStore {
        let store = DocumentStore::open_in_memory().unwrap();
        let insert = |rtype, id, doc: Value| {
            store.insert_one(rtype, Some(id), &doc).unwrap();
        };
        insert(
            ResourceType::Body,
            4749,
            json!({
                "stamp": 1, "name": "Providence Board of Licenses",
                "contact_name": "Stephany Lopes", "contact_phone": 4016805207u64,
                "contact_phone_ext": "12",
                "subcommittees": [4750, 9999], "contact_information": {"Address": "25 Dorrance St"},
                "people": {}, "max_members": 5,
                "board_members": [["Dylan Conley", "Chair", "Mayor", "2019", "2022"]]
            }),
        );
        insert(
            ResourceType::Body,
            4750,
            json!({
                "stamp": 1, "name": "Licensing Review Committee", "subcommittees": [],
                "contact_information": {}, "people": {}, "board_members": []
            }),
        );
        insert(ResourceType::Snippet, 1, json!({"text": "Call to order"}));
        insert(ResourceType::Snippet, 2, json!({"text": "Adjourn"}));
        insert(
            ResourceType::Document,
            10,
            json!({"stamp": 5, "doctype": "agenda", "filing_dt": 100,
                   "path": "/Notices/4749/2021/397007.pdf", "snippets": []}),
        );
        insert(
            ResourceType::Document,
            11,
            json!({"stamp": 5, "doctype": "agenda", "filing_dt": 200,
                   "path": "/Notices/4749/2021/397008.pdf", "snippets": [1, 2]}),
        );
        insert(
            ResourceType::Meeting,
            1009540,
            json!({
                "stamp": 5, "body": 4749, "meeting_dt": 1622660400,
                "meeting_address": "Virtual, Providence, RI, 02903", "filing_dt": 1622228280,
                "agendas": [10, 11], "minutes": [],
                "contact_name": "Stephany Lopes", "contact_phone": 4016805207u64,
                "contact_email": "slopes@providenceri.gov",
                "is_agenda_changed": true, "is_cancelled": true,
                "cancelled_dt": 1622653320, "cancelled_reason": "Moved to 6/9"
            }),
        );
        store
    }

    #[test]
    fn meeting_joins_body_and_latest_agenda() {
        let store = seeded();
        let portal = portal();
        let display = Projector::new(&store, &portal)
            .project_meeting(1009540)
            .unwrap();

        assert_eq!(display.id, "1009540");
        assert_eq!(display.body, "Providence Board of Licenses");
        assert_eq!(display.contact_phone, "(401) 680-5207");
        assert_eq!(display.latest_agenda, vec!["Call to order", "Adjourn"]);
        assert_eq!(
            display.latest_agenda_link,
            "https://opengov.sos.ri.gov/Common/DownloadMeetingFiles?FilePath=%2FNotices%2F4749%2F2021%2F397008.pdf"
        );
        assert!(display.latest_minutes.is_empty());
        assert_eq!(display.latest_minutes_link, "");
        assert!(!display.is_emergency);
        assert!(display.is_cancelled);
        assert_eq!(display.cancelled_dt, 1622653320);
        assert_eq!(display.cancelled_reason, "Moved to 6/9");
    }

    #[test]
    fn display_fields_are_camel_case_and_never_absent() {
        let store = seeded();
        let portal = portal();
        let value = Projector::new(&store, &portal)
            .project(ResourceType::Meeting, 1009540)
            .unwrap();
        let object = value.as_object().unwrap();
        for key in [
            "meetingDt",
            "filingDt",
            "isAnnualCalendar",
            "contactPerson",
            "latestMinutes",
            "latestMinutesLink",
        ] {
            assert!(object.contains_key(key), "{key}");
        }
        assert_eq!(object["isPublicNotice"], json!(false));
    }

    #[test]
    fn body_resolves_known_subcommittees_only() {
        let store = seeded();
        let portal = portal();
        let display = Projector::new(&store, &portal).project_body(4749).unwrap();
        assert_eq!(display.subcommittees, vec!["Licensing Review Committee"]);
        assert_eq!(display.contact_phone, "(401) 680-5207 x12");
        assert_eq!(display.max_members, 5);
        assert_eq!(display.twitter, "");
        assert_eq!(display.board_members.len(), 1);

        let bare = Projector::new(&store, &portal).project_body(4750).unwrap();
        assert_eq!(bare.max_members, 0);
        assert_eq!(bare.contact_person, "");
    }

    #[test]
    fn export_separates_missing_and_failed_ids() {
        let store = seeded();
        store
            .insert_one(
                ResourceType::Meeting,
                Some(1009541),
                &json!({"stamp": 5, "body": 1, "meeting_dt": 0, "meeting_address": "",
                        "filing_dt": 0, "agendas": [], "minutes": []}),
            )
            .unwrap();
        let portal = portal();
        let batch = Projector::new(&store, &portal)
            .export_range(ResourceType::Meeting, 1009539..1009542)
            .unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.missing, vec![1009539]);
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].id, 1009541);
        assert!(batch.failed[0].error.contains("body 1"));
    }
}
