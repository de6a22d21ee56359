use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RepoError;

static ACCESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Z]{2}_[A-Z]{0,4}\d{6,9}|[A-Z]{1,6}\d{5,9})(?:\.\d+)?$")
        .expect("accession regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Barcode,
    Genome,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Barcode => write!(f, "barcode"),
            DataType::Genome => write!(f, "genome"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strandedness {
    Single,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MolType {
    #[serde(rename = "DNA")]
    Dna,
    #[serde(rename = "RNA")]
    Rna,
    #[serde(rename = "tRNA")]
    Trna,
    #[serde(rename = "mRNA")]
    Mrna,
    #[serde(rename = "cRNA")]
    Crna,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    Linear,
    Circular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Molecule {
    pub strandedness: Strandedness,
    #[serde(rename = "type")]
    pub moltype: MolType,
    pub topology: Topology,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtuSchema {
    pub molecule: Molecule,
    pub segments: BTreeMap<String, bool>,
}

impl OtuSchema {
    pub fn new(molecule: Molecule, segments: BTreeMap<String, bool>) -> Result<Self, RepoError> {
        if segments.is_empty() {
            return Err(RepoError::InvalidSchema(
                "a schema needs at least one segment".to_string(),
            ));
        }
        if let Some(name) = segments.keys().find(|name| name.trim().is_empty()) {
            return Err(RepoError::InvalidSchema(format!(
                "blank segment name {name:?}"
            )));
        }
        Ok(Self { molecule, segments })
    }

    pub fn multipartite(&self) -> bool {
        self.segments.len() >= 2
    }

    pub fn required_segments(&self) -> impl Iterator<Item = &str> {
        self.segments
            .iter()
            .filter(|(_, required)| **required)
            .map(|(name, _)| name.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum IsolateNameType {
    Isolate,
    Strain,
    Clone,
    Refseq,
}

impl fmt::Display for IsolateNameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolateNameType::Isolate => write!(f, "isolate"),
            IsolateNameType::Strain => write!(f, "strain"),
            IsolateNameType::Clone => write!(f, "clone"),
            IsolateNameType::Refseq => write!(f, "refseq"),
        }
    }
}

impl FromStr for IsolateNameType {
    type Err = RepoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "isolate" => Ok(IsolateNameType::Isolate),
            "strain" => Ok(IsolateNameType::Strain),
            "clone" => Ok(IsolateNameType::Clone),
            "refseq" => Ok(IsolateNameType::Refseq),
            _ => Err(RepoError::InvalidIsolateType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IsolateName {
    #[serde(rename = "type")]
    pub kind: IsolateNameType,
    pub value: String,
}

impl IsolateName {
    pub fn new(kind: IsolateNameType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl fmt::Display for IsolateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_refseq(&self) -> bool {
        self.0.as_bytes().get(2) == Some(&b'_')
    }

    pub fn key(&self) -> &str {
        self.0.split_once('.').map(|(key, _)| key).unwrap_or(&self.0)
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = RepoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !ACCESSION_RE.is_match(&normalized) {
            return Err(RepoError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl From<Accession> for String {
    fn from(value: Accession) -> Self {
        value.0
    }
}
