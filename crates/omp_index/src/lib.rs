//! Read-side projections of stored meetings and bodies into flat,
//! display-ready records.

pub mod projector;

pub use projector::{BodyDisplay, ExportBatch, ExportFailure, MeetingDisplay, Projector};
