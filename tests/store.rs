use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use uuid::Uuid;

use viral_reference_manager::error::{ErrorKind, RepoError};
use viral_reference_manager::event::{EventKind, EventPayload, ExcludeAccessionData, OtuQuery};
use viral_reference_manager::store::{EventStore, RepoLayout};

fn exclude(otu_id: Uuid, accession: &str) -> EventPayload {
    EventPayload::ExcludeAccession {
        query: OtuQuery { otu_id },
        data: ExcludeAccessionData {
            accession: accession.to_string(),
        },
    }
}

fn temp_layout() -> (tempfile::TempDir, RepoLayout) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("repo")).unwrap();
    (temp, RepoLayout::new(root))
}

#[test]
fn layout_paths() {
    let (_temp, layout) = temp_layout();
    assert!(!layout.is_initialized());
    assert!(layout.event_path(12).ends_with("src/00000012.json"));
    assert!(layout.config_path().ends_with("repo/vref.json"));
    assert!(layout.cache_dir().starts_with(layout.root()));

    let mut store = EventStore::create(&layout.src_dir()).unwrap();
    assert!(!layout.is_initialized());
    store.append(exclude(Uuid::new_v4(), "MH200607")).unwrap();
    assert!(layout.is_initialized());
}

#[test]
fn second_handle_sees_appends_after_refresh() {
    let (_temp, layout) = temp_layout();
    let otu_id = Uuid::new_v4();
    let mut first = EventStore::create(&layout.src_dir()).unwrap();
    let mut second = EventStore::open(&layout.src_dir()).unwrap();

    first.append(exclude(otu_id, "MH200607")).unwrap();
    let err = second.append(exclude(otu_id, "MH200608")).unwrap_err();
    assert_matches!(err, RepoError::EventExists(1));
    assert_eq!(err.kind(), ErrorKind::Io);

    assert_eq!(second.refresh().unwrap(), 1);
    let event = second.append(exclude(otu_id, "MH200608")).unwrap();
    assert_eq!(event.id, 2);

    let events = first.load().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| event.kind() == EventKind::ExcludeAccession));
}

#[test]
fn event_file_is_plain_json() {
    let (_temp, layout) = temp_layout();
    let otu_id = Uuid::new_v4();
    let mut store = EventStore::create(&layout.src_dir()).unwrap();
    store.append(exclude(otu_id, "MH200607")).unwrap();

    let content = fs::read_to_string(layout.event_path(1).as_std_path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(value["id"], 1);
    assert_eq!(value["type"], "ExcludeAccession");
    assert_eq!(value["query"]["otu_id"], otu_id.to_string());
    assert_eq!(value["data"]["accession"], "MH200607");
    assert!(value["timestamp"].is_string());
}

#[test]
fn create_refuses_populated_directory() {
    let (_temp, layout) = temp_layout();
    let mut store = EventStore::create(&layout.src_dir()).unwrap();
    store.append(exclude(Uuid::new_v4(), "MH200607")).unwrap();

    let err = EventStore::create(&layout.src_dir()).unwrap_err();
    assert_matches!(err, RepoError::RepoExists(_));
}

#[test]
fn open_requires_directory() {
    let (_temp, layout) = temp_layout();
    let err = EventStore::open(&layout.src_dir()).unwrap_err();
    assert_matches!(err, RepoError::NotARepository(_));
}
