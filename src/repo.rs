use camino::Utf8Path;
use tracing::{Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::aggregate::{Isolate, Otu, Sequence};
use crate::domain::{DataType, IsolateName, IsolateNameType, OtuSchema};
use crate::error::RepoError;
use crate::event::{
    CreateIsolateData, CreateOtuData, CreateSequenceData, Event, EventPayload,
    ExcludeAccessionData, IsolateQuery, OtuQuery, RepoMeta, RepoQuery, SequenceQuery,
};
use crate::projector::RepoState;
use crate::store::{EventStore, RepoLayout};

#[derive(Debug)]
pub struct Repo {
    layout: RepoLayout,
    meta: RepoMeta,
    store: EventStore,
    state: RepoState,
    span: Span,
}

impl Repo {
    pub fn new(
        data_type: DataType,
        name: &str,
        path: &Utf8Path,
        organism: &str,
    ) -> Result<Self, RepoError> {
        let layout = RepoLayout::new(path);
        if layout.is_initialized() {
            return Err(RepoError::RepoExists(path.to_path_buf()));
        }

        let repository_id = Uuid::new_v4();
        let create = EventPayload::CreateRepo {
            query: RepoQuery { repository_id },
            data: RepoMeta {
                id: repository_id,
                data_type,
                name: name.to_string(),
                organism: organism.to_string(),
            },
        };
        let (store, event) = EventStore::initialize(&layout.src_dir(), create)?;
        let state = RepoState::default().apply(&event)?;
        let span = info_span!("repo", path = %path);
        span.in_scope(|| info!(%repository_id, repo_name = name, organism, "created repository"));

        Self::from_parts(layout, store, state, span)
    }

    pub fn open(path: &Utf8Path) -> Result<Self, RepoError> {
        let layout = RepoLayout::new(path);
        if !layout.is_initialized() {
            return Err(RepoError::NotARepository(path.to_path_buf()));
        }
        let store = EventStore::open(&layout.src_dir())?;
        let events = store.load()?;
        if events.is_empty() {
            return Err(RepoError::NotARepository(path.to_path_buf()));
        }
        let state = RepoState::replay(&events)?;
        let span = info_span!("repo", path = %path);
        span.in_scope(|| debug!(events = events.len(), otus = state.len(), "opened repository"));

        Self::from_parts(layout, store, state, span)
    }

    fn from_parts(
        layout: RepoLayout,
        store: EventStore,
        state: RepoState,
        span: Span,
    ) -> Result<Self, RepoError> {
        let meta = state
            .meta()
            .cloned()
            .ok_or(RepoError::MisplacedMetadata(1))?;
        Ok(Self {
            layout,
            meta,
            store,
            state,
            span,
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn path(&self) -> &Utf8Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    pub fn meta(&self) -> &RepoMeta {
        &self.meta
    }

    pub fn last_id(&self) -> u64 {
        self.store.last_id()
    }

    pub fn state(&self) -> &RepoState {
        &self.state
    }

    pub fn create_otu(
        &mut self,
        acronym: &str,
        legacy_id: Option<&str>,
        name: &str,
        schema: Option<OtuSchema>,
        taxid: u32,
    ) -> Result<Otu, RepoError> {
        let _enter = self.span.clone().entered();

        if self.state.contains_name(name) {
            warn!(otu_name = name, "rejected duplicate OTU name");
            return Err(RepoError::DuplicateName(name.to_string()));
        }
        if let Some(legacy_id) = legacy_id {
            if self.state.contains_legacy_id(legacy_id) {
                warn!(legacy_id, "rejected duplicate OTU legacy id");
                return Err(RepoError::DuplicateLegacyId(legacy_id.to_string()));
            }
        }

        let otu_id = Uuid::new_v4();
        self.commit(EventPayload::CreateOtu {
            query: OtuQuery { otu_id },
            data: CreateOtuData {
                id: otu_id,
                acronym: acronym.to_string(),
                legacy_id: legacy_id.map(str::to_string),
                name: name.to_string(),
                rep_isolate: None,
                schema,
                taxid,
            },
        })?;
        info!(%otu_id, taxid, otu_name = name, "created OTU");

        self.state
            .get(otu_id)
            .cloned()
            .ok_or(RepoError::OtuNotFound(otu_id))
    }

    pub fn create_isolate(
        &mut self,
        otu_id: Uuid,
        legacy_id: Option<&str>,
        source_name: &str,
        source_type: IsolateNameType,
    ) -> Result<Isolate, RepoError> {
        let _enter = self.span.clone().entered();

        if self.state.get(otu_id).is_none() {
            return Err(RepoError::OtuNotFound(otu_id));
        }

        let isolate_id = Uuid::new_v4();
        self.commit(EventPayload::CreateIsolate {
            query: IsolateQuery { otu_id, isolate_id },
            data: CreateIsolateData {
                id: isolate_id,
                legacy_id: legacy_id.map(str::to_string),
                name: IsolateName::new(source_type, source_name),
            },
        })?;
        debug!(%otu_id, %isolate_id, source_type = %source_type, source_name, "created isolate");

        self.state
            .get(otu_id)
            .and_then(|otu| otu.get_isolate(isolate_id))
            .cloned()
            .ok_or(RepoError::IsolateNotFound { otu_id, isolate_id })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_sequence(
        &mut self,
        otu_id: Uuid,
        isolate_id: Uuid,
        accession: &str,
        definition: &str,
        legacy_id: Option<&str>,
        segment: &str,
        sequence: &str,
    ) -> Result<Sequence, RepoError> {
        let _enter = self.span.clone().entered();

        let otu = self
            .state
            .get(otu_id)
            .ok_or(RepoError::OtuNotFound(otu_id))?;
        if otu.get_isolate(isolate_id).is_none() {
            return Err(RepoError::IsolateNotFound { otu_id, isolate_id });
        }

        let sequence_id = Uuid::new_v4();
        self.commit(EventPayload::CreateSequence {
            query: SequenceQuery {
                otu_id,
                isolate_id,
                sequence_id,
            },
            data: CreateSequenceData {
                id: sequence_id,
                accession: accession.to_string(),
                definition: definition.to_string(),
                legacy_id: legacy_id.map(str::to_string),
                segment: segment.to_string(),
                sequence: sequence.to_string(),
            },
        })?;
        debug!(%otu_id, %isolate_id, %sequence_id, accession, "created sequence");

        self.state
            .get(otu_id)
            .and_then(|otu| otu.get_isolate(isolate_id))
            .and_then(|isolate| isolate.get_sequence(sequence_id))
            .cloned()
            .ok_or(RepoError::IsolateNotFound { otu_id, isolate_id })
    }

    pub fn exclude_accession(&mut self, otu_id: Uuid, accession: &str) -> Result<(), RepoError> {
        let _enter = self.span.clone().entered();

        if self.state.get(otu_id).is_none() {
            return Err(RepoError::OtuNotFound(otu_id));
        }

        self.commit(EventPayload::ExcludeAccession {
            query: OtuQuery { otu_id },
            data: ExcludeAccessionData {
                accession: accession.to_string(),
            },
        })?;
        info!(%otu_id, accession, "excluded accession");
        Ok(())
    }

    fn commit(&mut self, payload: EventPayload) -> Result<Event, RepoError> {
        let event = self.store.append(payload)?;
        self.state.apply_in_place(&event)?;
        Ok(event)
    }

    pub fn get_otu(&self, id: Uuid) -> Option<&Otu> {
        self.state.get(id)
    }

    pub fn get_otu_by_taxid(&self, taxid: u32) -> Option<&Otu> {
        self.state.get_by_taxid(taxid)
    }

    pub fn get_otu_by_name(&self, name: &str) -> Option<&Otu> {
        self.state.get_by_name(name)
    }

    pub fn get_otu_by_legacy_id(&self, legacy_id: &str) -> Option<&Otu> {
        self.state.get_by_legacy_id(legacy_id)
    }

    pub fn get_all_otus(&self, ignore_cache: bool) -> Result<Vec<Otu>, RepoError> {
        if ignore_cache {
            let events = self.store.load()?;
            let state = RepoState::replay(&events)?;
            return Ok(state.otus().to_vec());
        }
        Ok(self.state.otus().to_vec())
    }

    pub fn iter_otus(&self) -> impl Iterator<Item = &Otu> + '_ {
        self.state.otus().iter()
    }

    pub fn get_isolate_id_by_name(&self, otu_id: Uuid, name: &IsolateName) -> Option<Uuid> {
        self.state
            .get(otu_id)
            .and_then(|otu| otu.get_isolate_id_by_name(name))
    }

    pub fn reload(&mut self) -> Result<(), RepoError> {
        let _enter = self.span.clone().entered();
        self.store.refresh()?;
        let events = self.store.load()?;
        self.state = RepoState::replay(&events)?;
        debug!(last_id = self.store.last_id(), "reloaded repository");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;
    use crate::domain::{Molecule, MolType, Strandedness, Topology};

    fn schema() -> OtuSchema {
        OtuSchema::new(
            Molecule {
                strandedness: Strandedness::Single,
                moltype: MolType::Rna,
                topology: Topology::Linear,
            },
            BTreeMap::from([("A".to_string(), true)]),
        )
        .unwrap()
    }

    fn empty_repo() -> (tempfile::TempDir, Repo) {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("test_repo")).unwrap();
        let repo = Repo::new(DataType::Genome, "Generic Viruses", &path, "virus").unwrap();
        (temp, repo)
    }

    #[test]
    fn new_writes_metadata_event() {
        let (_temp, repo) = empty_repo();
        assert_eq!(repo.last_id(), 1);
        assert_eq!(repo.meta().data_type, DataType::Genome);
        assert_eq!(repo.meta().name, "Generic Viruses");
        assert_eq!(repo.meta().organism, "virus");
        assert!(repo.layout().event_path(1).as_std_path().exists());
    }

    #[test]
    fn new_refuses_existing_repository() {
        let (_temp, repo) = empty_repo();
        let err = Repo::new(DataType::Genome, "Again", repo.path(), "virus").unwrap_err();
        assert_matches!(err, RepoError::RepoExists(_));
    }

    #[test]
    fn exclude_accession_is_idempotent_in_state() {
        let (_temp, mut repo) = empty_repo();
        let otu = repo
            .create_otu("TMV", None, "Tobacco mosaic virus", Some(schema()), 12242)
            .unwrap();

        repo.exclude_accession(otu.id, "TMVABC").unwrap();
        repo.exclude_accession(otu.id, "TMVABC").unwrap();

        let otu = repo.get_otu(otu.id).unwrap();
        assert_eq!(otu.excluded_accessions.len(), 1);
        assert_eq!(repo.last_id(), 4);
    }

    #[test]
    fn sequence_requires_existing_isolate() {
        let (_temp, mut repo) = empty_repo();
        let otu = repo
            .create_otu("TMV", None, "Tobacco mosaic virus", None, 12242)
            .unwrap();
        let missing = Uuid::new_v4();

        let err = repo
            .create_sequence(otu.id, missing, "TMVABC", "TMV", None, "RNA", "ACGT")
            .unwrap_err();
        assert_matches!(
            err,
            RepoError::IsolateNotFound { isolate_id, .. } if isolate_id == missing
        );
        assert_eq!(repo.last_id(), 2);
    }

    #[test]
    fn reload_picks_up_out_of_band_events() {
        let (_temp, mut repo) = empty_repo();
        let mut other = Repo::open(repo.path()).unwrap();
        other
            .create_otu("TMV", None, "Tobacco mosaic virus", None, 12242)
            .unwrap();

        assert!(repo.get_otu_by_taxid(12242).is_none());
        assert_eq!(repo.get_all_otus(true).unwrap().len(), 1);

        repo.reload().unwrap();
        assert_eq!(repo.last_id(), 2);
        assert!(repo.get_otu_by_taxid(12242).is_some());
    }

    #[test]
    fn stale_writer_cannot_clobber() {
        let (_temp, mut repo) = empty_repo();
        let mut other = Repo::open(repo.path()).unwrap();
        other
            .create_otu("TMV", None, "Tobacco mosaic virus", None, 12242)
            .unwrap();

        let err = repo
            .create_otu("ABTV", None, "Abaca bunchy top virus", None, 438782)
            .unwrap_err();
        assert_matches!(err, RepoError::EventExists(2));

        let reopened = Repo::open(repo.path()).unwrap();
        assert_eq!(reopened.get_all_otus(false).unwrap()[0].name, "Tobacco mosaic virus");
    }
}
