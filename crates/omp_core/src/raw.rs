use crate::datetime::Epoch;
use std::collections::BTreeMap;

/// A document link as listed on a meeting page: the link text and the
/// `onclick` action that downloads the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocumentLink {
    pub text: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLink {
    pub href: String,
    pub text: String,
}

/// Hidden inputs carried in the meeting info table header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMeetingFlags {
    pub meeting_date_changed: String,
    pub meeting_time_changed: String,
    pub address_changed: String,
    pub annual_calendar_changed: String,
    pub emergency_changed: String,
    pub public_notice_changed: String,
    pub agenda_changed: String,
    pub emergency: String,
    pub annual_calendar: String,
    pub public_notice: String,
    pub cancelled: String,
    pub cancelled_dt: String,
    pub cancelled_reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMeeting {
    pub stamp: Epoch,
    pub form_action: String,
    pub body: String,
    pub meeting_date: String,
    pub meeting_time: String,
    pub meeting_address: String,
    pub filing_dt: String,
    pub agendas: Vec<RawDocumentLink>,
    pub minutes: Vec<RawDocumentLink>,
    pub contact_name: String,
    pub contact_phone: String,
    pub contact_email: String,
    pub flags: RawMeetingFlags,
}

impl RawMeeting {
    /// True for the page the portal serves for ids with no meeting behind
    /// them: every observable field left at its empty value.
    pub fn is_blank(&self) -> bool {
        let flags = &self.flags;
        [
            &self.body,
            &self.meeting_date,
            &self.meeting_time,
            &self.meeting_address,
            &self.filing_dt,
            &self.contact_name,
            &self.contact_phone,
            &self.contact_email,
            &flags.emergency,
            &flags.annual_calendar,
            &flags.public_notice,
        ]
        .iter()
        .all(|value| value.trim().is_empty())
            && self.agendas.is_empty()
            && self.minutes.is_empty()
    }
}

/// The body dashboard ("open meetings") sub-page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDashboard {
    pub name: String,
    pub contact_name: String,
    pub contact_phone: String,
    pub contact_email: String,
    pub subcommittees: Vec<RawLink>,
}

/// The government directory sub-page. All fields empty when the body has
/// the directory feature switched off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDirectory {
    pub contact_information: BTreeMap<String, String>,
    pub facebook: String,
    pub twitter: String,
    pub instagram: String,
    pub linkedin: String,
    pub budget: String,
    pub personnel: String,
    pub description: String,
    pub responsibilities: String,
    pub people: BTreeMap<String, Vec<String>>,
}

/// The board members sub-page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMembers {
    pub max_members: Option<String>,
    pub authority: Option<RawLink>,
    pub board_members: Vec<[String; 5]>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBody {
    pub stamp: Epoch,
    pub dashboard: RawDashboard,
    pub directory: RawDirectory,
    pub members: RawMembers,
}
