//! Markup to raw records.
//!
//! Every parser assumes the fixed page layout the portal serves. A missing
//! table, input or labelled row is a structural error for that id; values
//! are copied out as printed and left for the validator to interpret.

use crate::datetime::Epoch;
use crate::error::{Error, Result};
use crate::fetch::BodyPages;
use crate::raw::{
    RawBody, RawDashboard, RawDirectory, RawDocumentLink, RawLink, RawMeeting, RawMeetingFlags,
    RawMembers,
};
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

macro_rules! selector {
    ($name:ident, $css:literal) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect(concat!("selector ", $css)));
    };
}

selector!(FORM, "form");
selector!(MEETING_TABLE, "table.table.meeting");
selector!(HEADER_INPUT, "thead > tr > input");
selector!(TABLE_TITLE, "thead > tr label");
selector!(BODY_ROW, "tbody > tr");
selector!(CELL, "td");
selector!(DOC_LINK, "tbody > tr > td > a");
selector!(H1, "h1");
selector!(ROW_DIV, "div.row");
selector!(SUBTITLE, "h2.subTitle");
selector!(LINK, "a");
selector!(LABEL, "label");
selector!(TBODY, "tbody");
selector!(GOV_DATA_FLAG, "input#IsGovDataFlag");
selector!(BOARDS_FLAG, "input#IsBoardsFlag");
selector!(BOARD_TABLE, "#BoardMemberDetail");

const MEETING_TABLES: usize = 4;
const MEETING_INPUTS: usize = 13;
const CONTACT_TITLE: &str = "Contact Information";

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn nth<'a>(items: &[ElementRef<'a>], index: usize, what: &str) -> Result<ElementRef<'a>> {
    items
        .get(index)
        .copied()
        .ok_or_else(|| Error::structure(format!("missing {what} (wanted #{})", index + 1)))
}

/// Two-column table body as `first cell text -> second cell text`.
fn table_dict(table: ElementRef<'_>) -> Result<HashMap<String, String>> {
    let mut dict = HashMap::new();
    for row in table.select(&BODY_ROW) {
        let cells: Vec<_> = row.select(&CELL).collect();
        if cells.len() < 2 {
            return Err(Error::structure(format!(
                "expected 2 cells in table row, found {}",
                cells.len()
            )));
        }
        dict.insert(text_of(cells[0]), text_of(cells[1]));
    }
    Ok(dict)
}

/// Second cell of every table body row, in order.
fn table_values(table: ElementRef<'_>) -> Result<Vec<String>> {
    table
        .select(&BODY_ROW)
        .map(|row| {
            let cells: Vec<_> = row.select(&CELL).collect();
            cells
                .get(1)
                .map(|cell| text_of(*cell))
                .ok_or_else(|| Error::structure("expected 2 cells in table row"))
        })
        .collect()
}

fn take(dict: &mut HashMap<String, String>, key: &str, table: &str) -> Result<String> {
    dict.remove(key)
        .ok_or_else(|| Error::structure(format!("{table} table has no `{key}` row")))
}

fn doc_links(table: ElementRef<'_>) -> Vec<RawDocumentLink> {
    table
        .select(&DOC_LINK)
        .map(|link| RawDocumentLink {
            text: link.text().collect(),
            action: link.value().attr("onclick").unwrap_or_default().to_string(),
        })
        .collect()
}

fn flag_value(element: ElementRef<'_>) -> Option<String> {
    element.value().attr("value").map(str::to_string)
}

pub fn parse_meeting(markup: &str, stamp: Epoch) -> Result<RawMeeting> {
    let html = Html::parse_document(markup);

    let tables: Vec<_> = html.select(&MEETING_TABLE).collect();
    if tables.len() != MEETING_TABLES {
        return Err(Error::structure(format!(
            "expected {MEETING_TABLES} meeting tables, found {}",
            tables.len()
        )));
    }
    let (info, agenda_table, minutes_table, contact_table) =
        (tables[0], tables[1], tables[2], tables[3]);

    let inputs: Vec<_> = info.select(&HEADER_INPUT).collect();
    if inputs.len() != MEETING_INPUTS {
        return Err(Error::structure(format!(
            "expected {MEETING_INPUTS} hidden inputs, found {}",
            inputs.len()
        )));
    }
    let mut hidden: HashMap<String, String> = inputs
        .iter()
        .map(|input| {
            (
                input.value().id().unwrap_or_default().to_string(),
                input.value().attr("value").unwrap_or_default().to_string(),
            )
        })
        .collect();
    let mut input = |id: &str| take(&mut hidden, id, "meeting hidden input");
    let flags = RawMeetingFlags {
        meeting_date_changed: input("HdnMeetingDateChange")?,
        meeting_time_changed: input("HdnMeetingTimeChange")?,
        address_changed: input("HdnAddressChange")?,
        annual_calendar_changed: input("HdnIsAnnualCalendarChange")?,
        emergency_changed: input("HdnIsEmergencyChange")?,
        public_notice_changed: input("HdnIsPublicNoticeChange")?,
        agenda_changed: input("HdnIsAgendaChange")?,
        emergency: input("HdnEmergencyStr")?,
        annual_calendar: input("HdnAnualStr")?,
        public_notice: input("HdnIspublicAnnouncementnotice")?,
        cancelled: input("HdnCancelMeetingFlag")?,
        cancelled_dt: input("HdnCancelMeetingDateTime")?,
        cancelled_reason: input("HdnCancelledComments")?,
    };

    let mut info_rows = table_dict(info)?;
    let mut info_row = |key: &str| take(&mut info_rows, key, "meeting info");
    let body = info_row("Public Body Name:")?;
    let meeting_date = info_row("Date:")?;
    let meeting_time = info_row("Time:")?;
    let meeting_address = info_row("Address:")?;
    let filing_dt = info_row("Filed on:")?;

    let title = contact_table
        .select(&TABLE_TITLE)
        .next()
        .map(text_of)
        .ok_or_else(|| Error::structure("contact table has no title"))?;
    if title != CONTACT_TITLE {
        return Err(Error::structure(format!(
            "expected table title `{CONTACT_TITLE}`, found `{title}`"
        )));
    }
    let mut contact_rows = table_dict(contact_table)?;
    let mut contact_row = |key: &str| take(&mut contact_rows, key, "contact");
    let contact_name = contact_row("Contact Person:")?;
    let contact_phone = contact_row("Phone:")?;
    let contact_email = contact_row("Email:")?;

    let form_action = html
        .select(&FORM)
        .next()
        .and_then(|form| form.value().attr("action"))
        .unwrap_or_default()
        .to_string();

    Ok(RawMeeting {
        stamp,
        form_action,
        body,
        meeting_date,
        meeting_time,
        meeting_address,
        filing_dt,
        agendas: doc_links(agenda_table),
        minutes: doc_links(minutes_table),
        contact_name,
        contact_phone,
        contact_email,
        flags,
    })
}

pub fn parse_body(pages: &BodyPages) -> Result<RawBody> {
    Ok(RawBody {
        stamp: pages.dashboard.stamp,
        dashboard: parse_dashboard(&pages.dashboard.text())?,
        directory: parse_directory(&pages.directory.text())?,
        members: parse_members(&pages.members.text())?,
    })
}

pub fn parse_dashboard(markup: &str) -> Result<RawDashboard> {
    let html = Html::parse_document(markup);
    let forms: Vec<_> = html.select(&FORM).collect();

    let header = nth(&forms, 0, "dashboard header form")?;
    let name = header
        .select(&H1)
        .next()
        .map(text_of)
        .ok_or_else(|| Error::structure("dashboard header has no h1"))?;
    let values: Vec<String> = header
        .select(&ROW_DIV)
        .map(|row| {
            row.children()
                .filter_map(ElementRef::wrap)
                .filter(|child| child.value().name() == "div")
                .nth(1)
                .map(text_of)
                .ok_or_else(|| Error::structure("dashboard contact row has no value cell"))
        })
        .collect::<Result<_>>()?;
    if values.len() < 3 {
        return Err(Error::structure(format!(
            "expected 3 dashboard contact rows, found {}",
            values.len()
        )));
    }

    let listing = nth(&forms, 1, "dashboard listing form")?;
    let subtitle = listing
        .select(&SUBTITLE)
        .next()
        .ok_or_else(|| Error::structure("dashboard listing has no subtitle"))?;
    let subcommittees = match subtitle.next_siblings().find_map(ElementRef::wrap) {
        Some(block) if block.value().name() == "div" => block
            .select(&LINK)
            .map(|link| RawLink {
                href: link.value().attr("href").unwrap_or_default().to_string(),
                text: link.text().collect(),
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut values = values.into_iter();
    Ok(RawDashboard {
        name,
        contact_name: values.next().unwrap_or_default(),
        contact_phone: values.next().unwrap_or_default(),
        contact_email: values.next().unwrap_or_default(),
        subcommittees,
    })
}

/// Reads the feature switch input in the page's second form. `None` means
/// the feature is off and the sub-page carries nothing.
fn feature_form<'a>(
    html: &'a Html,
    flag: &Selector,
    page: &str,
) -> Result<Option<ElementRef<'a>>> {
    let forms: Vec<_> = html.select(&FORM).collect();
    let form = nth(&forms, 1, &format!("{page} form"))?;
    let value = form
        .select(flag)
        .next()
        .and_then(flag_value)
        .ok_or_else(|| Error::structure(format!("{page} page has no feature flag")))?;
    Ok((value.trim() != "0").then_some(form))
}

pub fn parse_directory(markup: &str) -> Result<RawDirectory> {
    let html = Html::parse_document(markup);
    let Some(form) = feature_form(&html, &GOV_DATA_FLAG, "directory")? else {
        return Ok(RawDirectory::default());
    };

    let tables: Vec<_> = form.select(&MEETING_TABLE).collect();
    let (contact_information, social, attributes) = match tables.as_slice() {
        [contact, social, attributes] => (
            table_dict(*contact)?.into_iter().collect::<BTreeMap<_, _>>(),
            *social,
            *attributes,
        ),
        [social, attributes] => (BTreeMap::new(), *social, *attributes),
        _ => {
            return Err(Error::structure(format!(
                "expected 2 or 3 directory tables, found {}",
                tables.len()
            )));
        }
    };

    let handles = table_values(social)?;
    if handles.len() < 4 {
        return Err(Error::structure(format!(
            "expected 4 social rows, found {}",
            handles.len()
        )));
    }
    let mut handles = handles.into_iter();

    let rows: Vec<Vec<String>> = match attributes.select(&TBODY).next() {
        Some(tbody) => tbody
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|row| row.value().name() == "tr")
            .map(|row| row.select(&CELL).map(text_of).collect())
            .collect(),
        None => Vec::new(),
    };
    let cell = |row: usize, col: usize| -> Result<String> {
        rows[row]
            .get(col)
            .cloned()
            .ok_or_else(|| Error::structure(format!("attribute row {row} has no cell {col}")))
    };
    let (budget, personnel, description, responsibilities) = if rows.len() == 5 {
        (cell(0, 1)?, cell(1, 1)?, cell(2, 0)?, cell(4, 0)?)
    } else {
        Default::default()
    };

    Ok(RawDirectory {
        contact_information,
        facebook: handles.next().unwrap_or_default(),
        twitter: handles.next().unwrap_or_default(),
        instagram: handles.next().unwrap_or_default(),
        linkedin: handles.next().unwrap_or_default(),
        budget,
        personnel,
        description,
        responsibilities,
        people: BTreeMap::new(),
    })
}

pub fn parse_members(markup: &str) -> Result<RawMembers> {
    let html = Html::parse_document(markup);
    let Some(form) = feature_form(&html, &BOARDS_FLAG, "members")? else {
        return Ok(RawMembers::default());
    };

    let max_members = form
        .select(&LABEL)
        .next()
        .and_then(|label| label.next_sibling())
        .and_then(|node| node.value().as_text().map(|text| text.trim().to_string()));

    let authority = form
        .children()
        .filter_map(ElementRef::wrap)
        .find(|child| child.value().name() == "a")
        .map(|link| RawLink {
            href: link.value().attr("href").unwrap_or_default().to_string(),
            text: text_of(link),
        });

    let table = form
        .select(&BOARD_TABLE)
        .next()
        .ok_or_else(|| Error::structure("members page has no board member table"))?;
    let board_members = table
        .select(&BODY_ROW)
        .map(|row| {
            let cells: Vec<String> = row.select(&CELL).map(text_of).collect();
            <[String; 5]>::try_from(cells).map_err(|cells| {
                Error::structure(format!(
                    "expected 5 cells in board member row, found {}",
                    cells.len()
                ))
            })
        })
        .collect::<Result<_>>()?;

    Ok(RawMembers {
        max_members,
        authority,
        board_members,
    })
}
