use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Meeting,
    Body,
    Person,
    Document,
    Snippet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Unknown,
    Agenda,
    Minutes,
}

impl DocType {
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "agenda" => DocType::Agenda,
            "minutes" => DocType::Minutes,
            _ => DocType::Unknown,
        }
    }
}

/// JSON shape of a single persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Str,
    Bool,
    IntList,
    /// Object whose values are all strings.
    StrMap,
    /// Object whose values are all string arrays.
    ListMap,
    Object,
    /// Array of string arrays.
    Rows,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

#[derive(Debug)]
pub struct ResourceInfo {
    pub collection: &'static str,
    pub changes_collection: Option<&'static str>,
    pub updateable: bool,
    pub fields: &'static [FieldSpec],
}

const fn req(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

const fn opt(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

use FieldKind::*;

const MEETING_FIELDS: &[FieldSpec] = &[
    req("stamp", Int),
    req("body", Int),
    req("meeting_dt", Int),
    req("meeting_address", Str),
    req("filing_dt", Int),
    req("agendas", IntList),
    req("minutes", IntList),
    opt("contact_name", Str),
    opt("contact_phone", Int),
    opt("contact_phone_ext", Str),
    opt("contact_email", Str),
    opt("is_meeting_dt_changed", Bool),
    opt("is_address_changed", Bool),
    opt("is_annual_calendar_changed", Bool),
    opt("is_emergency_changed", Bool),
    opt("is_public_notice_changed", Bool),
    opt("is_agenda_changed", Bool),
    opt("is_emergency", Bool),
    opt("is_annual_calendar", Bool),
    opt("is_public_notice", Bool),
    opt("is_cancelled", Bool),
    opt("cancelled_dt", Int),
    opt("cancelled_reason", Str),
];

const BODY_FIELDS: &[FieldSpec] = &[
    req("stamp", Int),
    req("name", Str),
    opt("contact_name", Str),
    opt("contact_phone", Int),
    opt("contact_phone_ext", Str),
    opt("contact_email", Str),
    req("subcommittees", IntList),
    req("contact_information", StrMap),
    opt("facebook", Str),
    opt("twitter", Str),
    opt("instagram", Str),
    opt("linkedin", Str),
    opt("budget", Str),
    opt("personnel", Str),
    opt("description", Str),
    opt("responsibilities", Str),
    req("people", ListMap),
    opt("max_members", Int),
    opt("authority", Object),
    req("board_members", Rows),
];

const PERSON_FIELDS: &[FieldSpec] = &[
    req("name", Str),
    opt("title", Str),
    opt("phone", Int),
    opt("email", Str),
];

const DOCUMENT_FIELDS: &[FieldSpec] = &[
    req("stamp", Int),
    opt("name", Str),
    req("doctype", Str),
    req("filing_dt", Int),
    opt("filer", Str),
    opt("path", Str),
    req("snippets", IntList),
];

const SNIPPET_FIELDS: &[FieldSpec] = &[req("text", Str)];

static RESOURCES: [ResourceInfo; 5] = [
    ResourceInfo {
        collection: "meetings",
        changes_collection: Some("meetings_changes"),
        updateable: true,
        fields: MEETING_FIELDS,
    },
    ResourceInfo {
        collection: "bodies",
        changes_collection: Some("bodies_changes"),
        updateable: true,
        fields: BODY_FIELDS,
    },
    ResourceInfo {
        collection: "persons",
        changes_collection: None,
        updateable: false,
        fields: PERSON_FIELDS,
    },
    ResourceInfo {
        collection: "documents",
        changes_collection: None,
        updateable: false,
        fields: DOCUMENT_FIELDS,
    },
    ResourceInfo {
        collection: "snippets",
        changes_collection: None,
        updateable: false,
        fields: SNIPPET_FIELDS,
    },
];

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Meeting,
        ResourceType::Body,
        ResourceType::Person,
        ResourceType::Document,
        ResourceType::Snippet,
    ];

    pub fn info(self) -> &'static ResourceInfo {
        let index = match self {
            ResourceType::Meeting => 0,
            ResourceType::Body => 1,
            ResourceType::Person => 2,
            ResourceType::Document => 3,
            ResourceType::Snippet => 4,
        };
        &RESOURCES[index]
    }

    pub fn collection_name(self) -> &'static str {
        self.info().collection
    }

    pub fn changes_collection_name(self) -> Option<&'static str> {
        self.info().changes_collection
    }

    pub fn is_updateable(self) -> bool {
        self.info().updateable
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        self.info().fields
    }

    /// Checks a document about to be inserted against the field table:
    /// required fields present, no unknown fields, every value the right
    /// JSON shape. A failure here means the record builder and the table
    /// disagree, not that the portal sent bad data.
    pub fn assert_shape(self, doc: &Value) -> Result<()> {
        let collection = self.collection_name();
        let shape_error = |detail: String| Error::Shape { collection, detail };

        let object = doc
            .as_object()
            .ok_or_else(|| shape_error("record is not an object".to_string()))?;

        for spec in self.fields() {
            match object.get(spec.name) {
                None if spec.required => {
                    return Err(shape_error(format!("missing field `{}`", spec.name)));
                }
                None => {}
                Some(value) if !kind_matches(spec.kind, value) => {
                    return Err(shape_error(format!(
                        "field `{}` expected {:?}, got {value}",
                        spec.name, spec.kind
                    )));
                }
                Some(_) => {}
            }
        }

        if let Some(unknown) = object
            .keys()
            .find(|key| !self.fields().iter().any(|spec| spec.name == key.as_str()))
        {
            return Err(shape_error(format!("unknown field `{unknown}`")));
        }
        Ok(())
    }
}

fn kind_matches(kind: FieldKind, value: &Value) -> bool {
    let is_int = |v: &Value| v.is_i64() || v.is_u64();
    let is_str_list = |v: &Value| {
        v.as_array()
            .is_some_and(|items| items.iter().all(Value::is_string))
    };
    match kind {
        FieldKind::Int => is_int(value),
        FieldKind::Str => value.is_string(),
        FieldKind::Bool => value.is_boolean(),
        FieldKind::IntList => value
            .as_array()
            .is_some_and(|items| items.iter().all(is_int)),
        FieldKind::StrMap => value
            .as_object()
            .is_some_and(|map| map.values().all(Value::is_string)),
        FieldKind::ListMap => value
            .as_object()
            .is_some_and(|map| map.values().all(is_str_list)),
        FieldKind::Object => value.is_object(),
        FieldKind::Rows => value
            .as_array()
            .is_some_and(|rows| rows.iter().all(is_str_list)),
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ResourceType::Meeting => "meeting",
            ResourceType::Body => "body",
            ResourceType::Person => "person",
            ResourceType::Document => "document",
            ResourceType::Snippet => "snippet",
        };
        write!(f, "{value}")
    }
}

impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "meeting" => Ok(ResourceType::Meeting),
            "body" => Ok(ResourceType::Body),
            "person" => Ok(ResourceType::Person),
            "document" => Ok(ResourceType::Document),
            "snippet" => Ok(ResourceType::Snippet),
            _ => Err(Error::Config(format!("unknown resource type: {value}"))),
        }
    }
}
