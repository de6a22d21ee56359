use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{DataType, IsolateName, OtuSchema};

pub const META_EVENT_ID: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    CreateRepo {
        query: RepoQuery,
        data: RepoMeta,
    },
    #[serde(rename = "CreateOTU")]
    CreateOtu {
        query: OtuQuery,
        data: CreateOtuData,
    },
    CreateIsolate {
        query: IsolateQuery,
        data: CreateIsolateData,
    },
    CreateSequence {
        query: SequenceQuery,
        data: CreateSequenceData,
    },
    ExcludeAccession {
        query: OtuQuery,
        data: ExcludeAccessionData,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::CreateRepo { .. } => EventKind::CreateRepo,
            EventPayload::CreateOtu { .. } => EventKind::CreateOtu,
            EventPayload::CreateIsolate { .. } => EventKind::CreateIsolate,
            EventPayload::CreateSequence { .. } => EventKind::CreateSequence,
            EventPayload::ExcludeAccession { .. } => EventKind::ExcludeAccession,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CreateRepo,
    CreateOtu,
    CreateIsolate,
    CreateSequence,
    ExcludeAccession,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::CreateRepo => write!(f, "CreateRepo"),
            EventKind::CreateOtu => write!(f, "CreateOTU"),
            EventKind::CreateIsolate => write!(f, "CreateIsolate"),
            EventKind::CreateSequence => write!(f, "CreateSequence"),
            EventKind::ExcludeAccession => write!(f, "ExcludeAccession"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoQuery {
    pub repository_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtuQuery {
    pub otu_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolateQuery {
    pub otu_id: Uuid,
    pub isolate_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceQuery {
    pub otu_id: Uuid,
    pub isolate_id: Uuid,
    pub sequence_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMeta {
    pub id: Uuid,
    pub data_type: DataType,
    pub name: String,
    pub organism: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOtuData {
    pub id: Uuid,
    pub acronym: String,
    pub legacy_id: Option<String>,
    pub name: String,
    pub rep_isolate: Option<Uuid>,
    pub schema: Option<OtuSchema>,
    pub taxid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIsolateData {
    pub id: Uuid,
    pub legacy_id: Option<String>,
    pub name: IsolateName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSequenceData {
    pub id: Uuid,
    pub accession: String,
    pub definition: String,
    pub legacy_id: Option<String>,
    pub segment: String,
    pub sequence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeAccessionData {
    pub accession: String,
}

pub fn event_file_name(id: u64) -> String {
    format!("{id:08}.json")
}

pub fn parse_event_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".json")?;
    if stem.len() < 8 || !stem.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    if stem.len() > 8 && stem.starts_with('0') {
        return None;
    }
    stem.parse().ok()
}
