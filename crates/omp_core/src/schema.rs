use crate::datetime::Epoch;
use crate::error::{Error, Result};
use crate::resource::DocType;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNumber {
    /// Ten digits, area code first.
    pub number: u64,
    pub extension: Option<String>,
}

impl PhoneNumber {
    /// `(401) 680-5207`, with ` x12` appended when there is an extension.
    pub fn display(&self) -> String {
        let digits = format!("{:010}", self.number);
        let mut out = format!("({}) {}-{}", &digits[0..3], &digits[3..6], &digits[6..10]);
        if let Some(ext) = &self.extension {
            out.push_str(&format!(" x{ext}"));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub name: Option<String>,
    pub phone: Option<PhoneNumber>,
    pub email: Option<String>,
}

/// "Changed since filing" markers shown on a meeting notice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    pub meeting_dt: bool,
    pub address: bool,
    pub annual_calendar: bool,
    pub emergency: bool,
    pub public_notice: bool,
    pub agenda: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub emergency: bool,
    pub annual_calendar: bool,
    pub public_notice: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    pub at: Epoch,
    pub reason: String,
}

/// A filed agenda or minutes document. Text snippets are resolved when the
/// document is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub stamp: Epoch,
    pub name: Option<String>,
    pub doctype: DocType,
    pub filed_at: Epoch,
    pub filer: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingDetails {
    pub stamp: Epoch,
    pub body: i64,
    pub meeting_at: Epoch,
    pub address: String,
    pub filed_at: Epoch,
    pub agendas: Vec<Document>,
    pub minutes: Vec<Document>,
    pub contact: Contact,
    pub changes: ChangeFlags,
    pub status: StatusFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meeting {
    pub details: MeetingDetails,
    cancellation: Option<Cancellation>,
}

impl Meeting {
    /// A cancellation record exists exactly when the meeting is cancelled.
    /// Anything else is a bug in whatever assembled the inputs.
    pub fn new(
        details: MeetingDetails,
        cancelled: bool,
        cancelled_at: Option<Epoch>,
        cancelled_reason: Option<String>,
    ) -> Result<Self> {
        let cancellation = match (cancelled, cancelled_at, cancelled_reason) {
            (true, Some(at), Some(reason)) => Some(Cancellation { at, reason }),
            (false, None, None) => None,
            (true, at, reason) => {
                return Err(Error::Invariant(format!(
                    "cancelled meeting needs both instant and reason (instant: {}, reason: {})",
                    at.is_some(),
                    reason.is_some()
                )));
            }
            (false, _, _) => {
                return Err(Error::Invariant(
                    "meeting that is not cancelled carries cancellation data".to_string(),
                ));
            }
        };
        Ok(Self {
            details,
            cancellation,
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_some()
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocialHandles {
    pub facebook: Option<String>,
    pub twitter: Option<String>,
    pub instagram: Option<String>,
    pub linkedin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Authority {
    pub title: String,
    pub link: String,
}

/// One board member row, cell texts as printed.
pub type BoardMember = [String; 5];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub stamp: Epoch,
    pub name: String,
    pub contact: Contact,
    pub subcommittees: Vec<i64>,
    pub contact_information: BTreeMap<String, String>,
    pub social: SocialHandles,
    pub budget: Option<String>,
    pub personnel: Option<String>,
    pub description: Option<String>,
    pub responsibilities: Option<String>,
    pub people: BTreeMap<String, Vec<String>>,
    pub max_members: Option<u32>,
    pub authority: Option<Authority>,
    pub board_members: Vec<BoardMember>,
}

// Unset optional fields and false flags are left out of the stored
// document. Readers treat a missing field the same as false / empty.

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MeetingRecord {
    pub stamp: Epoch,
    pub body: i64,
    pub meeting_dt: Epoch,
    pub meeting_address: String,
    pub filing_dt: Epoch,
    #[serde(default)]
    pub agendas: Vec<i64>,
    #[serde(default)]
    pub minutes: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone_ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_meeting_dt_changed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_address_changed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_annual_calendar_changed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_emergency_changed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_public_notice_changed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_agenda_changed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_emergency: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_annual_calendar: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_public_notice: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_dt: Option<Epoch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_reason: Option<String>,
}

impl MeetingRecord {
    pub fn from_meeting(meeting: &Meeting, agendas: Vec<i64>, minutes: Vec<i64>) -> Self {
        let details = &meeting.details;
        let (contact_phone, contact_phone_ext) = split_phone(&details.contact);
        let cancellation = meeting.cancellation();
        Self {
            stamp: details.stamp,
            body: details.body,
            meeting_dt: details.meeting_at,
            meeting_address: details.address.clone(),
            filing_dt: details.filed_at,
            agendas,
            minutes,
            contact_name: details.contact.name.clone(),
            contact_phone,
            contact_phone_ext,
            contact_email: details.contact.email.clone(),
            is_meeting_dt_changed: details.changes.meeting_dt,
            is_address_changed: details.changes.address,
            is_annual_calendar_changed: details.changes.annual_calendar,
            is_emergency_changed: details.changes.emergency,
            is_public_notice_changed: details.changes.public_notice,
            is_agenda_changed: details.changes.agenda,
            is_emergency: details.status.emergency,
            is_annual_calendar: details.status.annual_calendar,
            is_public_notice: details.status.public_notice,
            is_cancelled: meeting.is_cancelled(),
            cancelled_dt: cancellation.map(|c| c.at),
            cancelled_reason: cancellation.map(|c| c.reason.clone()),
        }
    }

    pub fn contact_phone(&self) -> Option<PhoneNumber> {
        self.contact_phone.map(|number| PhoneNumber {
            number,
            extension: self.contact_phone_ext.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BodyRecord {
    pub stamp: Epoch,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone_ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub subcommittees: Vec<i64>,
    #[serde(default)]
    pub contact_information: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instagram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personnel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsibilities: Option<String>,
    #[serde(default)]
    pub people: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_members: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<Authority>,
    #[serde(default)]
    pub board_members: Vec<BoardMember>,
}

impl BodyRecord {
    pub fn from_body(body: &Body) -> Self {
        let (contact_phone, contact_phone_ext) = split_phone(&body.contact);
        Self {
            stamp: body.stamp,
            name: body.name.clone(),
            contact_name: body.contact.name.clone(),
            contact_phone,
            contact_phone_ext,
            contact_email: body.contact.email.clone(),
            subcommittees: body.subcommittees.clone(),
            contact_information: body.contact_information.clone(),
            facebook: body.social.facebook.clone(),
            twitter: body.social.twitter.clone(),
            instagram: body.social.instagram.clone(),
            linkedin: body.social.linkedin.clone(),
            budget: body.budget.clone(),
            personnel: body.personnel.clone(),
            description: body.description.clone(),
            responsibilities: body.responsibilities.clone(),
            people: body.people.clone(),
            max_members: body.max_members,
            authority: body.authority.clone(),
            board_members: body.board_members.clone(),
        }
    }

    pub fn contact_phone(&self) -> Option<PhoneNumber> {
        self.contact_phone.map(|number| PhoneNumber {
            number,
            extension: self.contact_phone_ext.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentRecord {
    pub stamp: Epoch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub doctype: DocType,
    pub filing_dt: Epoch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub snippets: Vec<i64>,
}

impl DocumentRecord {
    pub fn from_document(document: &Document, stamp: Epoch, snippets: Vec<i64>) -> Self {
        Self {
            stamp,
            name: document.name.clone(),
            doctype: document.doctype,
            filing_dt: document.filed_at,
            filer: document.filer.clone(),
            path: document.path.clone(),
            snippets,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SnippetRecord {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// Written to `<collection>_changes` when a re-fetched record differs
/// from what was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChangeRecord {
    pub resource: i64,
    pub previous_stamp: Epoch,
    pub recorded_at: Epoch,
    pub changes: BTreeMap<String, FieldChange>,
}

fn split_phone(contact: &Contact) -> (Option<u64>, Option<String>) {
    match &contact.phone {
        Some(phone) => (Some(phone.number), phone.extension.clone()),
        None => (None, None),
    }
}
