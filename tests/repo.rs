use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use uuid::Uuid;

use viral_reference_manager::domain::{
    DataType, IsolateName, IsolateNameType, MolType, Molecule, OtuSchema, Strandedness, Topology,
};
use viral_reference_manager::error::{ErrorKind, RepoError};
use viral_reference_manager::repo::Repo;

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

fn tmv(repo: &mut Repo) -> Uuid {
    repo.create_otu(
        "TMV",
        Some("abcd1234"),
        "Tobacco mosaic virus",
        Some(schema()),
        12242,
    )
    .unwrap()
    .id
}

// OTU with isolate A holding TMVABC and isolate B holding TMVABCB.
fn populated_repo() -> (tempfile::TempDir, Repo, Uuid) {
    let (temp, mut repo) = empty_repo();
    let otu_id = tmv(&mut repo);
    for (name, accession) in [("A", "TMVABC"), ("B", "TMVABCB")] {
        let isolate = repo
            .create_isolate(otu_id, None, name, IsolateNameType::Isolate)
            .unwrap();
        repo.create_sequence(otu_id, isolate.id, accession, "TMV", None, "RNA", "ACGT")
            .unwrap();
    }
    (temp, repo, otu_id)
}

#[test]
fn minimal_creation_writes_create_otu_event() {
    let (_temp, mut repo) = empty_repo();
    let otu = repo
        .create_otu(
            "TMV",
            Some("abcd1234"),
            "Tobacco mosaic virus",
            Some(schema()),
            12242,
        )
        .unwrap();

    assert!(otu.isolates.is_empty());
    assert_eq!(repo.last_id(), 2);

    let path = repo.path().join("src").join("00000002.json");
    let event: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(path.as_std_path()).unwrap()).unwrap();
    assert_eq!(event["id"], 2);
    assert_eq!(event["type"], "CreateOTU");
    assert_eq!(event["query"]["otu_id"], otu.id.to_string());
    assert_eq!(event["data"]["taxid"], 12242);
    assert_eq!(event["data"]["legacy_id"], "abcd1234");
    assert_eq!(event["data"]["schema"]["molecule"]["type"], "RNA");
    assert!(event["data"]["rep_isolate"].is_null());
}

#[test]
fn metadata_is_event_one() {
    let (_temp, repo) = empty_repo();
    let path = repo.path().join("src").join("00000001.json");
    let event: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(path.as_std_path()).unwrap()).unwrap();
    assert_eq!(event["type"], "CreateRepo");
    assert_eq!(event["data"]["data_type"], "genome");
    assert_eq!(event["data"]["organism"], "virus");
    assert_eq!(event["query"]["repository_id"], event["data"]["id"]);
}

#[test]
fn nested_creation() {
    let (_temp, mut repo) = empty_repo();
    let otu_id = tmv(&mut repo);

    let isolate = repo
        .create_isolate(otu_id, None, "A", IsolateNameType::Isolate)
        .unwrap();
    let sequence = repo
        .create_sequence(otu_id, isolate.id, "TMVABC", "TMV", None, "RNA", "ACGT")
        .unwrap();

    let otu = repo.get_otu(otu_id).unwrap();
    assert_eq!(otu.isolates.len(), 1);
    let stored = &otu.isolates[0];
    assert_eq!(stored.id, isolate.id);
    assert_eq!(stored.name, IsolateName::new(IsolateNameType::Isolate, "A"));
    assert_eq!(stored.legacy_id, None);
    assert_eq!(stored.sequences.len(), 1);

    let stored = &stored.sequences[0];
    assert_eq!(stored, &sequence);
    assert_eq!(stored.accession, "TMVABC");
    assert_eq!(stored.definition, "TMV");
    assert_eq!(stored.legacy_id, None);
    assert_eq!(stored.segment, "RNA");
    assert_eq!(stored.sequence, "ACGT");
}

#[test]
fn duplicate_name_is_rejected() {
    let (_temp, mut repo) = empty_repo();
    tmv(&mut repo);

    let err = repo
        .create_otu("TMV", None, "Tobacco mosaic virus", None, 12243)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("Tobacco mosaic virus"));
    assert_eq!(repo.get_all_otus(false).unwrap().len(), 1);
    assert_eq!(repo.last_id(), 2);
}

#[test]
fn duplicate_legacy_id_is_rejected() {
    let (_temp, mut repo) = empty_repo();
    tmv(&mut repo);

    let err = repo
        .create_otu("ABTV", Some("abcd1234"), "Abaca bunchy top virus", None, 438782)
        .unwrap_err();
    assert_matches!(&err, RepoError::DuplicateLegacyId(id) if id == "abcd1234");
    assert!(err.to_string().contains("abcd1234"));
    assert_eq!(repo.last_id(), 2);
}

#[test]
fn accessions_are_derived_from_sequences() {
    let (_temp, repo, otu_id) = populated_repo();
    let otu = repo.get_otu(otu_id).unwrap();
    assert_eq!(
        otu.accessions(),
        BTreeSet::from(["TMVABC".to_string(), "TMVABCB".to_string()])
    );
}

#[test]
fn excluded_accessions_are_blocked() {
    let (_temp, mut repo, otu_id) = populated_repo();
    repo.exclude_accession(otu_id, "GROK").unwrap();
    repo.exclude_accession(otu_id, "TOK").unwrap();

    let otu = repo.get_otu(otu_id).unwrap();
    assert_eq!(
        otu.blocked_accessions(),
        BTreeSet::from([
            "TMVABC".to_string(),
            "TMVABCB".to_string(),
            "GROK".to_string(),
            "TOK".to_string(),
        ])
    );
}

#[test]
fn unknown_otu_is_not_found() {
    let (_temp, mut repo) = empty_repo();
    let missing = Uuid::new_v4();

    let err = repo
        .create_isolate(missing, None, "A", IsolateNameType::Isolate)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_matches!(err, RepoError::OtuNotFound(id) if id == missing);
    assert_eq!(repo.last_id(), 1);

    let err = repo.exclude_accession(missing, "GROK").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(repo.last_id(), 1);
}

#[test]
fn ids_grow_by_one_per_mutation() {
    let (_temp, mut repo) = empty_repo();
    let otu_id = tmv(&mut repo);
    let isolate = repo
        .create_isolate(otu_id, Some("legacy-a"), "A", IsolateNameType::Strain)
        .unwrap();
    repo.create_sequence(otu_id, isolate.id, "TMVABC", "TMV", None, "RNA", "ACGT")
        .unwrap();
    repo.exclude_accession(otu_id, "GROK").unwrap();
    assert_eq!(repo.last_id(), 5);

    repo.create_otu("X", None, "Tobacco mosaic virus", None, 1)
        .unwrap_err();
    repo.create_sequence(otu_id, Uuid::new_v4(), "TMVABD", "TMV", None, "RNA", "ACGT")
        .unwrap_err();
    assert_eq!(repo.last_id(), 5);
}

#[test]
fn replay_is_deterministic() {
    let (_temp, mut repo, otu_id) = populated_repo();
    repo.exclude_accession(otu_id, "GROK").unwrap();
    repo.create_otu("ABTV", None, "Abaca bunchy top virus", None, 438782)
        .unwrap();

    let first = repo.get_all_otus(true).unwrap();
    let second = repo.get_all_otus(true).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, repo.get_all_otus(false).unwrap());

    let reopened = Repo::open(repo.path()).unwrap();
    assert_eq!(reopened.state(), repo.state());
    assert_eq!(reopened.meta(), repo.meta());
}

#[test]
fn lookups_by_natural_keys() {
    let (_temp, repo, otu_id) = populated_repo();
    assert_eq!(repo.get_otu_by_taxid(12242).unwrap().id, otu_id);
    assert_eq!(repo.get_otu_by_name("Tobacco mosaic virus").unwrap().id, otu_id);
    assert_eq!(repo.get_otu_by_legacy_id("abcd1234").unwrap().id, otu_id);
    assert!(repo.get_otu_by_taxid(1).is_none());

    let name = IsolateName::new(IsolateNameType::Isolate, "B");
    let isolate_id = repo.get_isolate_id_by_name(otu_id, &name).unwrap();
    let otu = repo.get_otu(otu_id).unwrap();
    assert_eq!(otu.get_isolate(isolate_id).unwrap().sequences[0].accession, "TMVABCB");

    let names: Vec<_> = repo.iter_otus().map(|otu| otu.name.as_str()).collect();
    assert_eq!(names, vec!["Tobacco mosaic virus"]);
}

#[test]
fn open_rejects_missing_repository() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("nothing")).unwrap();
    let err = Repo::open(&path).unwrap_err();
    assert_matches!(err, RepoError::NotARepository(_));
}

#[test]
fn interrupted_init_leaves_recoverable_directory() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("test_repo")).unwrap();
    fs::create_dir_all(path.join("src").as_std_path()).unwrap();

    let err = Repo::open(&path).unwrap_err();
    assert_matches!(err, RepoError::NotARepository(_));

    let repo = Repo::new(DataType::Genome, "Generic Viruses", &path, "virus").unwrap();
    assert_eq!(repo.last_id(), 1);
    let reopened = Repo::open(&path).unwrap();
    assert_eq!(reopened.meta(), repo.meta());
}

#[test]
fn init_refuses_src_with_other_files() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("test_repo")).unwrap();
    let src = path.join("src");
    fs::create_dir_all(src.as_std_path()).unwrap();
    fs::write(src.join("README").as_std_path(), "mine").unwrap();

    let err = Repo::new(DataType::Genome, "Generic Viruses", &path, "virus").unwrap_err();
    assert_matches!(err, RepoError::RepoExists(_));
    assert_eq!(fs::read_to_string(src.join("README").as_std_path()).unwrap(), "mine");
}

#[test]
fn open_rejects_corrupt_event() {
    let (_temp, mut repo) = empty_repo();
    tmv(&mut repo);
    let path = repo.path().join("src").join("00000002.json");
    fs::write(path.as_std_path(), "{ not json").unwrap();

    let err = Repo::open(repo.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_matches!(err, RepoError::CorruptEvent { .. });
}
