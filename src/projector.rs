use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::aggregate::{Isolate, Otu, Sequence};
use crate::error::RepoError;
use crate::event::{Event, EventPayload, META_EVENT_ID, RepoMeta};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoState {
    meta: Option<RepoMeta>,
    otus: Vec<Otu>,
    by_id: BTreeMap<Uuid, usize>,
    by_taxid: BTreeMap<u32, Uuid>,
    by_legacy_id: BTreeMap<String, Uuid>,
    by_name: BTreeMap<String, Uuid>,
    last_event_id: u64,
}

impl RepoState {
    pub fn replay<'a, I>(events: I) -> Result<Self, RepoError>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        events
            .into_iter()
            .try_fold(Self::default(), |state, event| state.apply(event))
    }

    pub fn apply(mut self, event: &Event) -> Result<Self, RepoError> {
        self.apply_in_place(event)?;
        Ok(self)
    }

    pub(crate) fn apply_in_place(&mut self, event: &Event) -> Result<(), RepoError> {
        if self.meta.is_none() && !matches!(event.payload, EventPayload::CreateRepo { .. }) {
            return Err(RepoError::MisplacedMetadata(event.id));
        }

        match &event.payload {
            EventPayload::CreateRepo { data, .. } => {
                if event.id != META_EVENT_ID || self.meta.is_some() {
                    return Err(RepoError::MisplacedMetadata(event.id));
                }
                self.meta = Some(data.clone());
            }
            EventPayload::CreateOtu { query, data } => {
                if self.by_id.contains_key(&query.otu_id) {
                    return Err(RepoError::DuplicateEntity {
                        event_id: event.id,
                        entity: "OTU",
                        id: query.otu_id,
                    });
                }
                let otu = Otu {
                    id: query.otu_id,
                    acronym: data.acronym.clone(),
                    legacy_id: data.legacy_id.clone(),
                    name: data.name.clone(),
                    taxid: data.taxid,
                    schema: data.schema.clone(),
                    rep_isolate: data.rep_isolate,
                    excluded_accessions: BTreeSet::new(),
                    isolates: Vec::new(),
                };
                self.by_taxid.entry(otu.taxid).or_insert(otu.id);
                self.by_name.entry(otu.name.clone()).or_insert(otu.id);
                if let Some(legacy_id) = &otu.legacy_id {
                    self.by_legacy_id.entry(legacy_id.clone()).or_insert(otu.id);
                }
                self.by_id.insert(otu.id, self.otus.len());
                self.otus.push(otu);
            }
            EventPayload::CreateIsolate { query, data } => {
                let otu = self.otu_for_event(event.id, query.otu_id)?;
                if otu.get_isolate(query.isolate_id).is_some() {
                    return Err(RepoError::DuplicateEntity {
                        event_id: event.id,
                        entity: "isolate",
                        id: query.isolate_id,
                    });
                }
                otu.isolates.push(Isolate {
                    id: query.isolate_id,
                    legacy_id: data.legacy_id.clone(),
                    name: data.name.clone(),
                    sequences: Vec::new(),
                });
            }
            EventPayload::CreateSequence { query, data } => {
                let otu = self.otu_for_event(event.id, query.otu_id)?;
                let isolate =
                    otu.get_isolate_mut(query.isolate_id)
                        .ok_or(RepoError::DanglingReference {
                            event_id: event.id,
                            entity: "isolate",
                            id: query.isolate_id,
                        })?;
                if isolate.get_sequence(query.sequence_id).is_some() {
                    return Err(RepoError::DuplicateEntity {
                        event_id: event.id,
                        entity: "sequence",
                        id: query.sequence_id,
                    });
                }
                isolate.sequences.push(Sequence {
                    id: query.sequence_id,
                    accession: data.accession.clone(),
                    definition: data.definition.clone(),
                    legacy_id: data.legacy_id.clone(),
                    segment: data.segment.clone(),
                    sequence: data.sequence.clone(),
                });
            }
            EventPayload::ExcludeAccession { query, data } => {
                let otu = self.otu_for_event(event.id, query.otu_id)?;
                otu.excluded_accessions.insert(data.accession.clone());
            }
        }

        self.last_event_id = event.id;
        Ok(())
    }

    fn otu_for_event(&mut self, event_id: u64, otu_id: Uuid) -> Result<&mut Otu, RepoError> {
        let index = *self
            .by_id
            .get(&otu_id)
            .ok_or(RepoError::DanglingReference {
                event_id,
                entity: "OTU",
                id: otu_id,
            })?;
        Ok(&mut self.otus[index])
    }

    pub fn meta(&self) -> Option<&RepoMeta> {
        self.meta.as_ref()
    }

    pub fn last_event_id(&self) -> u64 {
        self.last_event_id
    }

    pub fn otus(&self) -> &[Otu] {
        &self.otus
    }

    pub fn len(&self) -> usize {
        self.otus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.otus.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Otu> {
        self.by_id.get(&id).map(|index| &self.otus[*index])
    }

    pub fn get_by_taxid(&self, taxid: u32) -> Option<&Otu> {
        self.by_taxid.get(&taxid).and_then(|id| self.get(*id))
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Otu> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    pub fn get_by_legacy_id(&self, legacy_id: &str) -> Option<&Otu> {
        self.by_legacy_id.get(legacy_id).and_then(|id| self.get(*id))
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn contains_legacy_id(&self, legacy_id: &str) -> bool {
        self.by_legacy_id.contains_key(legacy_id)
    }
}
