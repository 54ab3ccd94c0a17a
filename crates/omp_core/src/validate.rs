use crate::datetime::{
    Epoch, SIMPLE_DATE, SIMPLE_TIME, parse_meeting_datetime, parse_portal_datetime_lenient,
};
use crate::db::DocumentStore;
use crate::error::{Error, Result};
use crate::raw::{RawBody, RawDocumentLink, RawLink, RawMeeting};
use crate::resource::{DocType, ResourceType};
use crate::schema::{
    Authority, Body, ChangeFlags, Contact, Document, Meeting, MeetingDetails, PhoneNumber,
    SocialHandles, StatusFlags,
};
use regex::Regex;
use std::sync::LazyLock;

static DOC_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?:(?P<name>.*), )?(?P<doctype>Agenda|Minutes) filed on (?P<filed>{SIMPLE_DATE}, {SIMPLE_TIME})(?: by (?P<filer>.+))?$"
    ))
    .expect("document text regex")
});
static DOC_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^DownloadMeetingFiles\('(?P<path>.*)'\)$").expect("document action regex")
});
static PATH_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\+").expect("path separator regex"));
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:(?:\d[-.]?\s?)?\(?(?P<area>\d{3})\)?[-.]?\s?)?",
        r"(?P<prefix>\d{3})[-.]?\s?(?P<line>\d{4})",
        r"(?:,?\s?(?:\(x?(?P<paren_ext>\d+)\)|VP|(?:ext|EXT|Ext|X|x| )[,.]?\s?(?P<ext>\d*)))?$",
    ))
    .expect("phone regex")
});
static EMAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+@\S+").expect("email regex"));
static MEETING_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"MeetingID=(\d+)").expect("meeting id regex"));
static ENTITY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.+EntityID=(\d+)(\D+.*)?$").expect("entity id regex"));

const DEFAULT_AREA_CODE: u64 = 401;

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Portal flags print as `0`/`1` or `No`/`Yes`.
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty()
        || value == "0"
        || value.eq_ignore_ascii_case("no")
        || value.eq_ignore_ascii_case("false"))
}

/// Accepts the phone spellings seen on the portal; a missing area code is
/// taken to be Rhode Island's.
pub fn parse_phone(value: &str) -> Option<PhoneNumber> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(caps) = PHONE.captures(value) {
        let area = caps
            .name("area")
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(DEFAULT_AREA_CODE);
        let prefix: u64 = caps["prefix"].parse().ok()?;
        let line: u64 = caps["line"].parse().ok()?;
        let extension = caps
            .name("paren_ext")
            .or_else(|| caps.name("ext"))
            .map(|m| m.as_str().to_string())
            .filter(|ext| !ext.is_empty());
        return Some(PhoneNumber {
            number: area * 10_000_000 + prefix * 10_000 + line,
            extension,
        });
    }

    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    let number = match digits.len() {
        10 => digits.parse().ok(),
        11 if digits.starts_with('1') => digits[1..].parse().ok(),
        7 => digits
            .parse::<u64>()
            .ok()
            .map(|local| DEFAULT_AREA_CODE * 10_000_000 + local),
        _ => None,
    };
    if number.is_none() {
        tracing::warn!(value, "unrecognized phone number dropped");
    }
    number.map(|number| PhoneNumber {
        number,
        extension: None,
    })
}

pub fn parse_email(value: &str) -> Option<String> {
    EMAIL.find(value).map(|m| m.as_str().to_lowercase())
}

/// Collapses runs of backslashes (escaped Windows separators) into `/`.
pub fn clean_path(path: &str) -> String {
    PATH_SEPARATORS.replace_all(path, "/").into_owned()
}

pub fn meeting_id_from_form_action(action: &str) -> Option<i64> {
    MEETING_ID
        .captures(action)
        .and_then(|caps| caps[1].parse().ok())
}

pub fn body_id_from_link(href: &str) -> Option<i64> {
    ENTITY_ID
        .captures(href)
        .and_then(|caps| caps[1].parse().ok())
}

/// Links whose action is not a download, or downloads nothing, are
/// dropped. A download whose text does not follow the usual
/// `[name, ]Agenda filed on <dt>[ by <filer>]` wording is kept untyped.
pub fn document_from_link(link: &RawDocumentLink, stamp: Epoch) -> Option<Document> {
    let path = DOC_ACTION
        .captures(link.action.trim())
        .map(|caps| clean_path(&caps["path"]))
        .filter(|path| !path.is_empty());
    let Some(path) = path else {
        tracing::warn!(text = %link.text, action = %link.action, "document link without a file, dropped");
        return None;
    };

    let document = match DOC_TEXT.captures(link.text.trim()) {
        Some(caps) => Document {
            stamp,
            name: caps.name("name").and_then(|m| non_empty(m.as_str())),
            doctype: DocType::from_label(&caps["doctype"]),
            filed_at: parse_portal_datetime_lenient(&caps["filed"]),
            filer: caps.name("filer").and_then(|m| non_empty(m.as_str())),
            path: Some(path),
        },
        None => {
            tracing::warn!(text = %link.text, "unrecognized document text, keeping file only");
            Document {
                stamp,
                name: None,
                doctype: DocType::Unknown,
                filed_at: 0,
                filer: None,
                path: Some(path),
            }
        }
    };
    Some(document)
}

/// `Ok(None)` for the placeholder page served for ids without a meeting.
pub fn validate_meeting(store: &DocumentStore, raw: &RawMeeting) -> Result<Option<Meeting>> {
    if raw.is_blank() {
        return Ok(None);
    }

    let body_name = raw.body.trim();
    if body_name.is_empty() {
        return Err(Error::Referential(
            "meeting page names no public body".to_string(),
        ));
    }
    let body = store
        .find_id_by_field(ResourceType::Body, "name", body_name)?
        .ok_or_else(|| Error::Referential(format!("no stored body named `{body_name}`")))?;

    let documents = |links: &[RawDocumentLink]| -> Vec<Document> {
        links
            .iter()
            .filter_map(|link| document_from_link(link, raw.stamp))
            .collect()
    };

    let flags = &raw.flags;
    let details = MeetingDetails {
        stamp: raw.stamp,
        body,
        meeting_at: parse_meeting_datetime(&raw.meeting_date, &raw.meeting_time),
        address: raw.meeting_address.trim().to_string(),
        filed_at: parse_portal_datetime_lenient(&raw.filing_dt),
        agendas: documents(&raw.agendas),
        minutes: documents(&raw.minutes),
        contact: Contact {
            name: non_empty(&raw.contact_name),
            phone: parse_phone(&raw.contact_phone),
            email: parse_email(&raw.contact_email),
        },
        changes: ChangeFlags {
            meeting_dt: parse_flag(&flags.meeting_date_changed)
                || parse_flag(&flags.meeting_time_changed),
            address: parse_flag(&flags.address_changed),
            annual_calendar: parse_flag(&flags.annual_calendar_changed),
            emergency: parse_flag(&flags.emergency_changed),
            public_notice: parse_flag(&flags.public_notice_changed),
            agenda: parse_flag(&flags.agenda_changed),
        },
        status: StatusFlags {
            emergency: parse_flag(&flags.emergency),
            annual_calendar: parse_flag(&flags.annual_calendar),
            public_notice: parse_flag(&flags.public_notice),
        },
    };

    let cancelled = parse_flag(&flags.cancelled);
    let (cancelled_at, cancelled_reason) = if cancelled {
        (
            Some(parse_portal_datetime_lenient(&flags.cancelled_dt)),
            Some(flags.cancelled_reason.trim().to_string()),
        )
    } else {
        if !flags.cancelled_dt.trim().is_empty() || !flags.cancelled_reason.trim().is_empty() {
            tracing::warn!(
                body = body_name,
                "cancellation details on a meeting not flagged cancelled, ignored"
            );
        }
        (None, None)
    };

    Meeting::new(details, cancelled, cancelled_at, cancelled_reason).map(Some)
}

fn authority(link: &RawLink) -> Option<Authority> {
    let title = link.text.trim();
    let href = link.href.trim();
    (!title.is_empty() || !href.is_empty()).then(|| Authority {
        title: title.to_string(),
        link: href.to_string(),
    })
}

/// `None` when the dashboard shows no name.
pub fn validate_body(raw: &RawBody) -> Option<Body> {
    let name = raw.dashboard.name.trim();
    if name.is_empty() {
        return None;
    }

    let subcommittees = raw
        .dashboard
        .subcommittees
        .iter()
        .filter_map(|link| {
            let id = body_id_from_link(&link.href);
            if id.is_none() {
                tracing::warn!(href = %link.href, text = %link.text, "subcommittee link without entity id, dropped");
            }
            id
        })
        .collect();

    let directory = &raw.directory;
    let contact_information = directory
        .contact_information
        .iter()
        .map(|(field, value)| (field.replace(':', "").trim().to_string(), value.clone()))
        .collect();

    let members = &raw.members;
    let max_members = members.max_members.as_deref().and_then(|text| {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let parsed = text.parse::<u32>().ok();
        if parsed.is_none() {
            tracing::warn!(value = text, "non-numeric member count dropped");
        }
        parsed
    });

    Some(Body {
        stamp: raw.stamp,
        name: name.to_string(),
        contact: Contact {
            name: non_empty(&raw.dashboard.contact_name),
            phone: parse_phone(&raw.dashboard.contact_phone),
            email: parse_email(&raw.dashboard.contact_email),
        },
        subcommittees,
        contact_information,
        social: SocialHandles {
            facebook: non_empty(&directory.facebook),
            twitter: non_empty(&directory.twitter),
            instagram: non_empty(&directory.instagram),
            linkedin: non_empty(&directory.linkedin),
        },
        budget: non_empty(&directory.budget),
        personnel: non_empty(&directory.personnel),
        description: non_empty(&directory.description),
        responsibilities: non_empty(&directory.responsibilities),
        people: directory.people.clone(),
        max_members,
        authority: members.authority.as_ref().and_then(authority),
        board_members: members.board_members.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::parse_portal_datetime;
    use crate::fetch::{BodyPages, FetchedPage};
    use crate::parse::{parse_body, parse_meeting};
    use crate::raw::RawMeetingFlags;
    use serde_json::json;

    const MEETING: &str = include_str!("../tests/fixtures/meeting_1009540.html");

    fn store_with_body() -> DocumentStore {
        let store = DocumentStore::open_in_memory().unwrap();
        store
            .insert_one(
                ResourceType::Body,
                Some(4749),
                &json!({"name": "Providence Board of Licenses"}),
            )
            .unwrap();
        store
    }

    fn page(markup: &str, stamp: Epoch) -> FetchedPage {
        FetchedPage {
            status: 200,
            body: markup.as_bytes().to_vec(),
            stamp,
        }
    }

    #[test]
    fn scenario_meeting_1009540() {
        let store = store_with_body();
        let raw = parse_meeting(MEETING, 7).unwrap();
        let meeting = validate_meeting(&store, &raw).unwrap().unwrap();
        let details = &meeting.details;

        assert_eq!(details.body, 4749);
        assert_eq!(details.meeting_at, 1_622_660_400);
        assert_eq!(details.filed_at, 1_622_228_280);
        assert_eq!(details.agendas.len(), 2);
        assert!(details.minutes.is_empty());
        for agenda in &details.agendas {
            assert_eq!(agenda.filer.as_deref(), Some("Stephany Lopes"));
            assert_eq!(agenda.doctype, DocType::Agenda);
            assert_eq!(agenda.name, None);
        }
        assert_eq!(
            details.agendas[0].path.as_deref(),
            Some("/Notices/4749/2021/397008.pdf")
        );
        assert_eq!(
            details.agendas[0].filed_at,
            parse_portal_datetime("May 28 2021, 03:01PM").unwrap()
        );

        assert_eq!(
            details.contact.phone,
            Some(PhoneNumber {
                number: 4_016_805_207,
                extension: None
            })
        );
        assert_eq!(details.contact.email.as_deref(), Some("slopes@providenceri.gov"));

        assert_eq!(
            details.changes,
            ChangeFlags {
                agenda: true,
                ..ChangeFlags::default()
            }
        );
        assert_eq!(details.status, StatusFlags::default());

        let cancellation = meeting.cancellation().unwrap();
        assert_eq!(cancellation.at, 1_622_653_320);
        assert!(cancellation.reason.starts_with("6/2/2021 Meeting has been cancelled"));
    }

    #[test]
    fn blank_meeting_validates_to_none() {
        let store = DocumentStore::open_in_memory().unwrap();
        let raw = RawMeeting {
            flags: RawMeetingFlags {
                meeting_date_changed: "0".into(),
                cancelled: "0".into(),
                ..RawMeetingFlags::default()
            },
            ..RawMeeting::default()
        };
        assert!(validate_meeting(&store, &raw).unwrap().is_none());
    }

    #[test]
    fn unknown_body_is_referential() {
        let store = DocumentStore::open_in_memory().unwrap();
        let raw = parse_meeting(MEETING, 7).unwrap();
        let err = validate_meeting(&store, &raw).unwrap_err();
        assert!(matches!(err, Error::Referential(_)));
    }

    #[test]
    fn unparsable_meeting_date_is_epoch_zero() {
        let store = store_with_body();
        let mut raw = parse_meeting(MEETING, 7).unwrap();
        raw.meeting_date = "TBD".into();
        let meeting = validate_meeting(&store, &raw).unwrap().unwrap();
        assert_eq!(meeting.details.meeting_at, 0);
    }

    #[test]
    fn uncancelled_meeting_ignores_stray_cancellation_text() {
        let store = store_with_body();
        let mut raw = parse_meeting(MEETING, 7).unwrap();
        raw.flags.cancelled = "0".into();
        let meeting = validate_meeting(&store, &raw).unwrap().unwrap();
        assert!(!meeting.is_cancelled());
    }

    #[test]
    fn document_links() {
        let named = RawDocumentLink {
            text: "approved, Minutes filed on Mar 29 2023, 05:17PM by Dianna Liss".into(),
            action: r"DownloadMeetingFiles('\\Minutes\\4832\\2023\\456234.pdf')".into(),
        };
        let doc = document_from_link(&named, 1).unwrap();
        assert_eq!(doc.name.as_deref(), Some("approved"));
        assert_eq!(doc.doctype, DocType::Minutes);
        assert_eq!(doc.filer.as_deref(), Some("Dianna Liss"));
        assert_eq!(doc.path.as_deref(), Some("/Minutes/4832/2023/456234.pdf"));

        let odd_text = RawDocumentLink {
            text: "Agenda (revised)".into(),
            action: r"DownloadMeetingFiles('\\Notices\\1\\a.pdf')".into(),
        };
        let doc = document_from_link(&odd_text, 1).unwrap();
        assert_eq!(doc.doctype, DocType::Unknown);
        assert_eq!((doc.name, doc.filer, doc.filed_at), (None, None, 0));

        let no_file = RawDocumentLink {
            text: "Agenda filed on May 28 2021, 03:01PM".into(),
            action: "DownloadMeetingFiles('')".into(),
        };
        assert!(document_from_link(&no_file, 1).is_none());
        let not_download = RawDocumentLink {
            text: "Agenda filed on May 28 2021, 03:01PM".into(),
            action: "window.print()".into(),
        };
        assert!(document_from_link(&not_download, 1).is_none());
    }

    #[test]
    fn phone_spellings() {
        let number = |value: &str| parse_phone(value).map(|p| (p.number, p.extension));
        assert_eq!(number("(401) 680-5207"), Some((4_016_805_207, None)));
        assert_eq!(number("680-5207"), Some((4_016_805_207, None)));
        assert_eq!(number("401.222.3333 x 45"), Some((4_012_223_333, Some("45".into()))));
        assert_eq!(number("401-222-3333 (x12)"), Some((4_012_223_333, Some("12".into()))));
        assert_eq!(number("1-401-222-3333"), Some((4_012_223_333, None)));
        assert_eq!(number("401 222 3333 ext."), Some((4_012_223_333, None)));
        assert_eq!(number("Main office: 401/222/3333"), Some((4_012_223_333, None)));
        assert_eq!(number("n/a"), None);
        assert_eq!(number(""), None);
    }

    #[test]
    fn flags_emails_and_ids() {
        for falsy in ["", "0", "No", "no", "False"] {
            assert!(!parse_flag(falsy), "{falsy}");
        }
        for truthy in ["1", "Yes", "true"] {
            assert!(parse_flag(truthy), "{truthy}");
        }
        assert_eq!(
            parse_email("Email: SLopes@ProvidenceRI.gov "),
            Some("slopes@providenceri.gov".into())
        );
        assert_eq!(parse_email("none"), None);
        assert_eq!(
            meeting_id_from_form_action(
                "/OpenMeetingsPublic/ViewMeetingDetailByID?id=0.86&MeetingID=1009540"
            ),
            Some(1_009_540)
        );
        assert_eq!(
            body_id_from_link("/OpenMeetingsPublic/OpenMeetingDashboard?subtopmenuId=201&EntityID=4750"),
            Some(4750)
        );
        assert_eq!(body_id_from_link("/OpenMeetingsPublic/Help"), None);
    }

    #[test]
    fn body_pages_validate_into_body() {
        let pages = BodyPages {
            dashboard: page(include_str!("../tests/fixtures/body_dashboard.html"), 11),
            directory: page(include_str!("../tests/fixtures/body_directory.html"), 12),
            members: page(include_str!("../tests/fixtures/body_members.html"), 13),
        };
        let body = validate_body(&parse_body(&pages).unwrap()).unwrap();

        assert_eq!(body.stamp, 11);
        assert_eq!(body.name, "Providence Board of Licenses");
        assert_eq!(body.subcommittees, vec![4750, 4751]);
        assert_eq!(
            body.contact.phone,
            Some(PhoneNumber {
                number: 4_016_805_207,
                extension: Some("12".into())
            })
        );
        assert_eq!(body.contact.email.as_deref(), Some("slopes@providenceri.gov"));
        assert_eq!(
            body.contact_information.get("Website").map(String::as_str),
            Some("https://www.providenceri.gov/licenses")
        );
        assert_eq!(body.social.twitter, None);
        assert_eq!(body.social.instagram.as_deref(), Some("providence_ri"));
        assert_eq!(body.max_members, Some(5));
        assert_eq!(
            body.authority.map(|a| a.link),
            Some("https://library.municode.com/ri/providence".into())
        );
        assert_eq!(body.board_members.len(), 2);
    }

    #[test]
    fn disabled_directory_gives_empty_contact_and_social() {
        let pages = BodyPages {
            dashboard: page(include_str!("../tests/fixtures/body_dashboard.html"), 11),
            directory: page(include_str!("../tests/fixtures/body_directory_disabled.html"), 12),
            members: page(include_str!("../tests/fixtures/body_members_disabled.html"), 13),
        };
        let body = validate_body(&parse_body(&pages).unwrap()).unwrap();
        assert!(body.contact_information.is_empty());
        assert_eq!(body.social, SocialHandles::default());
        assert_eq!(body.budget, None);
        assert_eq!(body.max_members, None);
        assert_eq!(body.authority, None);
        assert!(body.board_members.is_empty());
    }

    #[test]
    fn nameless_body_is_skipped() {
        assert!(validate_body(&RawBody::default()).is_none());
    }
}
