use std::fs;
use std::io::Write;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use tempfile::Builder;
use tracing::info;
use uuid::Uuid;

use crate::aggregate::{Isolate, Otu, Sequence};
use crate::domain::{DataType, IsolateNameType, OtuSchema};
use crate::error::RepoError;
use crate::repo::Repo;

// Field order is alphabetical throughout so the file reads as if keys were sorted.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceJson {
    pub created_at: DateTime<Utc>,
    pub data_type: DataType,
    pub name: Option<String>,
    pub organism: String,
    pub otus: Vec<BuiltOtu>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuiltOtu {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub abbreviation: String,
    pub isolates: Vec<BuiltIsolate>,
    pub name: String,
    pub schema: Option<OtuSchema>,
    pub taxid: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuiltIsolate {
    pub default: bool,
    pub id: Uuid,
    pub sequences: Vec<BuiltSequence>,
    pub source_name: String,
    pub source_type: IsolateNameType,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuiltSequence {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub accession: String,
    pub definition: String,
    pub segment: String,
    pub sequence: String,
}

impl ReferenceJson {
    pub fn sequence_count(&self) -> usize {
        self.otus
            .iter()
            .flat_map(|otu| &otu.isolates)
            .map(|isolate| isolate.sequences.len())
            .sum()
    }
}

pub fn build_reference(repo: &Repo, version: Option<&str>) -> ReferenceJson {
    let meta = repo.meta();
    ReferenceJson {
        created_at: Utc::now(),
        data_type: meta.data_type,
        name: version.map(str::to_string),
        organism: meta.organism.clone(),
        otus: repo.iter_otus().map(built_otu).collect(),
    }
}

fn built_otu(otu: &Otu) -> BuiltOtu {
    // The representative isolate is the default; without one, the first isolate is.
    let default_id = otu
        .rep_isolate
        .or_else(|| otu.isolates.first().map(|isolate| isolate.id));
    BuiltOtu {
        id: otu.id,
        abbreviation: otu.acronym.clone(),
        isolates: otu
            .isolates
            .iter()
            .map(|isolate| built_isolate(isolate, default_id == Some(isolate.id)))
            .collect(),
        name: otu.name.clone(),
        schema: otu.schema.clone(),
        taxid: otu.taxid,
    }
}

fn built_isolate(isolate: &Isolate, default: bool) -> BuiltIsolate {
    BuiltIsolate {
        default,
        id: isolate.id,
        sequences: isolate.sequences.iter().map(built_sequence).collect(),
        source_name: isolate.name.value.clone(),
        source_type: isolate.name.kind,
    }
}

fn built_sequence(sequence: &Sequence) -> BuiltSequence {
    BuiltSequence {
        id: sequence.id,
        accession: sequence.accession.clone(),
        definition: sequence.definition.clone(),
        segment: sequence.segment.clone(),
        sequence: sequence.sequence.clone(),
    }
}

pub fn render_reference(reference: &ReferenceJson, indent: bool) -> Result<Vec<u8>, RepoError> {
    let mut content = Vec::new();
    let result = if indent {
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = Serializer::with_formatter(&mut content, formatter);
        reference.serialize(&mut serializer)
    } else {
        serde_json::to_writer(&mut content, reference)
    };
    result.map_err(|err| RepoError::Filesystem(err.to_string()))?;
    Ok(content)
}

pub fn write_reference(
    reference: &ReferenceJson,
    output: &Utf8Path,
    indent: bool,
) -> Result<(), RepoError> {
    let content = render_reference(reference, indent)?;
    let dir = match output.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(dir.as_std_path()).map_err(|err| RepoError::Filesystem(err.to_string()))?;

    let mut temp = Builder::new()
        .prefix(".reference-")
        .suffix(".tmp")
        .tempfile_in(dir.as_std_path())
        .map_err(|err| RepoError::Filesystem(err.to_string()))?;
    temp.write_all(&content)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|err| RepoError::Filesystem(format!("write {output}: {err}")))?;
    temp.persist(output.as_std_path())
        .map_err(|err| RepoError::Filesystem(format!("write {output}: {}", err.error)))?;

    info!(
        output = %output,
        otus = reference.otus.len(),
        sequences = reference.sequence_count(),
        "reference file built"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ReferenceJson {
        ReferenceJson {
            created_at: Utc::now(),
            data_type: DataType::Genome,
            name: None,
            organism: "virus".to_string(),
            otus: Vec::new(),
        }
    }

    #[test]
    fn keys_are_written_in_sorted_order() {
        let content = String::from_utf8(render_reference(&reference(), false).unwrap()).unwrap();
        let positions: Vec<usize> = ["created_at", "data_type", "name", "organism", "otus"]
            .iter()
            .map(|key| content.find(&format!("\"{key}\"")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(content.contains("\"name\":null"));
    }

    #[test]
    fn indent_uses_four_spaces() {
        let content = String::from_utf8(render_reference(&reference(), true).unwrap()).unwrap();
        assert!(content.starts_with("{\n    \"created_at\""));
    }
}
