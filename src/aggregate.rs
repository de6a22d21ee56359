use std::collections::BTreeSet;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::{IsolateName, OtuSchema};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sequence {
    pub id: Uuid,
    pub accession: String,
    pub definition: String,
    pub legacy_id: Option<String>,
    pub segment: String,
    pub sequence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Isolate {
    pub id: Uuid,
    pub legacy_id: Option<String>,
    pub name: IsolateName,
    pub sequences: Vec<Sequence>,
}

impl Isolate {
    pub fn accessions(&self) -> impl Iterator<Item = &str> {
        self.sequences.iter().map(|sequence| sequence.accession.as_str())
    }

    pub fn get_sequence(&self, id: Uuid) -> Option<&Sequence> {
        self.sequences.iter().find(|sequence| sequence.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Otu {
    pub id: Uuid,
    pub acronym: String,
    pub legacy_id: Option<String>,
    pub name: String,
    pub taxid: u32,
    pub schema: Option<OtuSchema>,
    pub rep_isolate: Option<Uuid>,
    pub excluded_accessions: BTreeSet<String>,
    pub isolates: Vec<Isolate>,
}

impl Otu {
    pub fn accessions(&self) -> BTreeSet<String> {
        self.isolates
            .iter()
            .flat_map(Isolate::accessions)
            .map(str::to_string)
            .collect()
    }

    pub fn blocked_accessions(&self) -> BTreeSet<String> {
        let mut blocked = self.accessions();
        blocked.extend(self.excluded_accessions.iter().cloned());
        blocked
    }

    pub fn get_isolate(&self, id: Uuid) -> Option<&Isolate> {
        self.isolates.iter().find(|isolate| isolate.id == id)
    }

    pub(crate) fn get_isolate_mut(&mut self, id: Uuid) -> Option<&mut Isolate> {
        self.isolates.iter_mut().find(|isolate| isolate.id == id)
    }

    pub fn get_isolate_id_by_name(&self, name: &IsolateName) -> Option<Uuid> {
        self.isolates
            .iter()
            .find(|isolate| &isolate.name == name)
            .map(|isolate| isolate.id)
    }

    pub fn sequence_count(&self) -> usize {
        self.isolates
            .iter()
            .map(|isolate| isolate.sequences.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IsolateNameType;

    fn sequence(accession: &str) -> Sequence {
        Sequence {
            id: Uuid::new_v4(),
            accession: accession.to_string(),
            definition: "TMV".to_string(),
            legacy_id: None,
            segment: "RNA".to_string(),
            sequence: "ACGT".to_string(),
        }
    }

    fn isolate(value: &str, accession: &str) -> Isolate {
        Isolate {
            id: Uuid::new_v4(),
            legacy_id: None,
            name: IsolateName::new(IsolateNameType::Isolate, value),
            sequences: vec![sequence(accession)],
        }
    }

    #[test]
    fn derived_accession_sets() {
        let otu = Otu {
            id: Uuid::new_v4(),
            acronym: "TMV".to_string(),
            legacy_id: None,
            name: "Tobacco mosaic virus".to_string(),
            taxid: 12242,
            schema: None,
            rep_isolate: None,
            excluded_accessions: BTreeSet::from(["GROK".to_string()]),
            isolates: vec![isolate("A", "TMVABC"), isolate("B", "TMVABCB")],
        };

        assert_eq!(
            otu.accessions(),
            BTreeSet::from(["TMVABC".to_string(), "TMVABCB".to_string()])
        );
        assert_eq!(
            otu.blocked_accessions(),
            BTreeSet::from([
                "GROK".to_string(),
                "TMVABC".to_string(),
                "TMVABCB".to_string()
            ])
        );
        assert_eq!(otu.sequence_count(), 2);

        let name = IsolateName::new(IsolateNameType::Isolate, "B");
        assert_eq!(otu.get_isolate_id_by_name(&name), Some(otu.isolates[1].id));
        let other = IsolateName::new(IsolateNameType::Strain, "B");
        assert_eq!(otu.get_isolate_id_by_name(&other), None);
    }
}
