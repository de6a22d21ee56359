use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::aggregate::Otu;
use crate::domain::{Accession, IsolateName, IsolateNameType, Molecule, OtuSchema};
use crate::error::RepoError;
use crate::ncbi::{NcbiClient, NcbiGenbank, accession_key};
use crate::repo::Repo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolateAdditions {
    pub name: IsolateName,
    pub records: BTreeMap<String, NcbiGenbank>,
}

pub fn create_otu_from_taxid<C>(
    repo: &mut Repo,
    client: &C,
    taxid: u32,
) -> Result<Otu, RepoError>
where
    C: NcbiClient + ?Sized,
{
    let _enter = info_span!("otu", taxid).entered();

    if repo.get_otu_by_taxid(taxid).is_some() {
        return Err(RepoError::TaxidExists(taxid));
    }
    let taxonomy = client
        .fetch_taxonomy(taxid)?
        .ok_or(RepoError::TaxonomyNotFound(taxid))?;

    repo.create_otu("", None, &taxonomy.name, None, taxid)
}

pub fn create_otu_from_records<C>(
    repo: &mut Repo,
    client: &C,
    taxid: u32,
    accessions: &[Accession],
) -> Result<(Otu, Vec<String>), RepoError>
where
    C: NcbiClient + ?Sized,
{
    let _enter = info_span!("otu", taxid).entered();

    if repo.get_otu_by_taxid(taxid).is_some() {
        return Err(RepoError::TaxidExists(taxid));
    }
    let taxonomy = client
        .fetch_taxonomy(taxid)?
        .ok_or(RepoError::TaxonomyNotFound(taxid))?;

    let requested: BTreeSet<String> = accessions
        .iter()
        .map(|accession| accession.key().to_string())
        .collect();
    let request: Vec<String> = requested.iter().cloned().collect();
    let records = client.fetch_genbank(&request)?;
    let received: BTreeSet<&str> = records.iter().map(|record| record.accession.as_str()).collect();
    let missing: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|key| !received.contains(key))
        .collect();
    if !missing.is_empty() {
        return Err(RepoError::AccessionsNotFound(missing.join(", ")));
    }

    let schema = schema_from_records(&records)?;
    let otu = repo.create_otu("", None, &taxonomy.name, schema, taxid)?;
    let additions = plan_additions(&otu, records);
    let added = commit_additions(repo, otu.id, additions)?;

    let otu = repo
        .get_otu(otu.id)
        .cloned()
        .ok_or(RepoError::OtuNotFound(otu.id))?;
    Ok((otu, added))
}

pub fn update_otu<C>(repo: &mut Repo, client: &C, otu_id: Uuid) -> Result<Vec<String>, RepoError>
where
    C: NcbiClient + ?Sized,
{
    let taxid = repo
        .get_otu(otu_id)
        .map(|otu| otu.taxid)
        .ok_or(RepoError::OtuNotFound(otu_id))?;
    let linked = client.link_accessions(taxid)?;
    debug!(taxid, linked = linked.len(), "linked accessions");
    add_sequences(repo, client, otu_id, &linked)
}

pub fn add_sequences<C>(
    repo: &mut Repo,
    client: &C,
    otu_id: Uuid,
    accessions: &[String],
) -> Result<Vec<String>, RepoError>
where
    C: NcbiClient + ?Sized,
{
    let otu = repo.get_otu(otu_id).ok_or(RepoError::OtuNotFound(otu_id))?;
    let _enter = info_span!("otu", taxid = otu.taxid, %otu_id).entered();

    let fetch_list = unblocked_accessions(otu, accessions);
    if fetch_list.is_empty() {
        info!("OTU is up to date");
        return Ok(Vec::new());
    }
    info!(count = fetch_list.len(), "fetching accessions");

    let records = client.fetch_genbank(&fetch_list)?;
    let additions = plan_additions(otu, records);
    commit_additions(repo, otu_id, additions)
}

pub fn exclude_accessions(
    repo: &mut Repo,
    otu_id: Uuid,
    accessions: &[Accession],
) -> Result<(), RepoError> {
    for accession in accessions {
        repo.exclude_accession(otu_id, accession.key())?;
    }
    Ok(())
}

pub fn unblocked_accessions(otu: &Otu, accessions: &[String]) -> Vec<String> {
    let blocked: BTreeSet<String> = otu
        .blocked_accessions()
        .iter()
        .map(|accession| accession_key(accession).to_string())
        .collect();
    let mut seen = BTreeSet::new();
    accessions
        .iter()
        .map(|accession| accession_key(accession).to_string())
        .filter(|key| !blocked.contains(key) && seen.insert(key.clone()))
        .collect()
}

pub fn plan_additions(otu: &Otu, records: Vec<NcbiGenbank>) -> Vec<IsolateAdditions> {
    let blocked: BTreeSet<String> = otu
        .blocked_accessions()
        .iter()
        .map(|accession| accession_key(accession).to_string())
        .collect();
    let records = records
        .into_iter()
        .filter(|record| !blocked.contains(accession_key(&record.accession)));

    group_records_by_isolate(records)
        .into_iter()
        .map(|(name, records)| IsolateAdditions { name, records })
        .collect()
}

pub fn commit_additions(
    repo: &mut Repo,
    otu_id: Uuid,
    additions: Vec<IsolateAdditions>,
) -> Result<Vec<String>, RepoError> {
    let mut held: BTreeSet<String> = repo
        .get_otu(otu_id)
        .ok_or(RepoError::OtuNotFound(otu_id))?
        .accessions();
    let mut added = Vec::new();

    for addition in additions {
        let isolate_id = match repo.get_isolate_id_by_name(otu_id, &addition.name) {
            Some(id) => id,
            None => {
                debug!(isolate = %addition.name, "creating isolate");
                repo.create_isolate(otu_id, None, &addition.name.value, addition.name.kind)?
                    .id
            }
        };

        for (accession, record) in addition.records {
            if !held.insert(accession.clone()) {
                warn!(accession, "accession already exists in OTU");
                continue;
            }
            let sequence = repo.create_sequence(
                otu_id,
                isolate_id,
                &record.accession,
                &record.definition,
                None,
                record.source.segment.as_deref().unwrap_or_default(),
                &record.sequence,
            )?;
            added.push(sequence.accession);
        }
    }

    if added.is_empty() {
        info!(%otu_id, "no new sequences added to OTU");
    } else {
        info!(%otu_id, count = added.len(), "added sequences to OTU");
    }
    Ok(added)
}

pub fn group_records_by_isolate<I>(
    records: I,
) -> BTreeMap<IsolateName, BTreeMap<String, NcbiGenbank>>
where
    I: IntoIterator<Item = NcbiGenbank>,
{
    let mut isolates: BTreeMap<IsolateName, BTreeMap<String, NcbiGenbank>> = BTreeMap::new();
    for record in records {
        if let Some(name) = isolate_name_for_record(&record) {
            isolates
                .entry(name)
                .or_default()
                .insert(record.accession.clone(), record);
        }
    }
    isolates
}

pub fn isolate_name_for_record(record: &NcbiGenbank) -> Option<IsolateName> {
    let source = &record.source;
    let qualifiers = [
        (IsolateNameType::Isolate, &source.isolate),
        (IsolateNameType::Strain, &source.strain),
        (IsolateNameType::Clone, &source.clone),
    ];
    for (kind, value) in qualifiers {
        if let Some(value) = value.as_deref().filter(|value| !value.trim().is_empty()) {
            return Some(IsolateName::new(kind, value));
        }
    }

    if record.refseq {
        debug!(
            accession = %record.accession,
            "RefSeq record has no isolate data; keying by accession"
        );
        return Some(IsolateName::new(IsolateNameType::Refseq, &record.accession));
    }

    debug!(accession = %record.accession, "record has no isolate data; skipping");
    None
}

pub fn molecule_from_records(records: &[NcbiGenbank]) -> Option<Molecule> {
    let record = records
        .iter()
        .find(|record| record.refseq)
        .or_else(|| records.first())?;
    Some(Molecule {
        strandedness: record.strandedness,
        moltype: record.moltype,
        topology: record.topology,
    })
}

pub fn schema_from_records(records: &[NcbiGenbank]) -> Result<Option<OtuSchema>, RepoError> {
    let Some(molecule) = molecule_from_records(records) else {
        return Ok(None);
    };

    let isolates = group_records_by_isolate(records.iter().cloned());
    if isolates.len() > 1 {
        return Err(RepoError::InvalidSchema(format!(
            "records span {} isolates; cannot derive a schema",
            isolates.len()
        )));
    }

    let segments = if let [record] = records {
        let name = record
            .source
            .segment
            .clone()
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| record.source.organism.clone());
        BTreeMap::from([(name, true)])
    } else {
        records
            .iter()
            .map(|record| {
                record
                    .source
                    .segment
                    .clone()
                    .filter(|segment| !segment.is_empty())
                    .map(|segment| (segment, true))
                    .ok_or_else(|| {
                        RepoError::InvalidSchema(format!(
                            "{} has no segment name for a multipartite OTU",
                            record.accession
                        ))
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?
    };

    OtuSchema::new(molecule, segments).map(Some)
}
