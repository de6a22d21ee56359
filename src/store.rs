use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use tempfile::Builder;
use tracing::{debug, warn};

use crate::error::RepoError;
use crate::event::{Event, EventPayload, META_EVENT_ID, event_file_name, parse_event_file_name};

#[derive(Debug, Clone)]
pub struct RepoLayout {
    root: Utf8PathBuf,
}

impl RepoLayout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn src_dir(&self) -> Utf8PathBuf {
        self.root.join("src")
    }

    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.root.join(".cache").join("ncbi")
    }

    pub fn config_path(&self) -> Utf8PathBuf {
        self.root.join("vref.json")
    }

    pub fn event_path(&self, id: u64) -> Utf8PathBuf {
        self.src_dir().join(event_file_name(id))
    }

    pub fn is_initialized(&self) -> bool {
        self.event_path(META_EVENT_ID).as_std_path().is_file()
    }
}

#[derive(Debug)]
pub struct EventStore {
    dir: Utf8PathBuf,
    last_id: u64,
}

impl EventStore {
    pub fn create(dir: &Utf8Path) -> Result<Self, RepoError> {
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| RepoError::Filesystem(err.to_string()))?;
        let existing = list_event_files(dir)?;
        if !existing.is_empty() {
            return Err(RepoError::RepoExists(dir.to_path_buf()));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            last_id: 0,
        })
    }

    // The first event is written into a staging directory that is renamed onto
    // `dir`, so `dir` never exists without it.
    pub fn initialize(dir: &Utf8Path, first: EventPayload) -> Result<(Self, Event), RepoError> {
        let parent = dir
            .parent()
            .ok_or_else(|| RepoError::Filesystem(format!("invalid log path {dir}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| RepoError::Filesystem(err.to_string()))?;
        if dir.as_std_path().is_dir() && !list_event_files(dir)?.is_empty() {
            return Err(RepoError::RepoExists(dir.to_path_buf()));
        }

        let staging = Builder::new()
            .prefix(".src-")
            .tempdir_in(parent.as_std_path())
            .map_err(|err| RepoError::Filesystem(err.to_string()))?;
        let staging_dir = Utf8PathBuf::from_path_buf(staging.path().to_path_buf())
            .map_err(|path| RepoError::Filesystem(format!("non UTF-8 path {}", path.display())))?;
        let mut staged = Self {
            dir: staging_dir,
            last_id: 0,
        };
        let event = staged.append(first)?;

        remove_empty_dir(dir)?;
        fs::rename(staging.path(), dir.as_std_path())
            .map_err(|err| RepoError::Filesystem(format!("publish {dir}: {err}")))?;
        let _ = staging.keep();
        if let Err(err) = sync_dir(parent) {
            warn!(dir = %parent, error = %err, "log published but directory sync failed");
        }
        debug!(dir = %dir, "initialized event log");

        Ok((
            Self {
                dir: dir.to_path_buf(),
                last_id: event.id,
            },
            event,
        ))
    }

    pub fn open(dir: &Utf8Path) -> Result<Self, RepoError> {
        if !dir.as_std_path().is_dir() {
            return Err(RepoError::NotARepository(dir.to_path_buf()));
        }
        let mut store = Self {
            dir: dir.to_path_buf(),
            last_id: 0,
        };
        store.refresh()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    pub fn refresh(&mut self) -> Result<u64, RepoError> {
        let files = list_event_files(&self.dir)?;
        check_sequence(&files)?;
        self.last_id = files.last().map(|(id, _)| *id).unwrap_or(0);
        Ok(self.last_id)
    }

    pub fn append(&mut self, payload: EventPayload) -> Result<Event, RepoError> {
        let event = Event {
            id: self.last_id + 1,
            timestamp: Utc::now(),
            payload,
        };
        let content = serde_json::to_vec_pretty(&event)
            .map_err(|err| RepoError::Filesystem(err.to_string()))?;
        let path = self.dir.join(event_file_name(event.id));
        write_once(&self.dir, &path, &content, sync_dir).map_err(|err| {
            if err.kind() == io::ErrorKind::AlreadyExists {
                RepoError::EventExists(event.id)
            } else {
                RepoError::Filesystem(format!("write {path}: {err}"))
            }
        })?;
        self.last_id = event.id;
        debug!(event_id = event.id, kind = %event.kind(), "appended event");
        Ok(event)
    }

    pub fn load(&self) -> Result<Vec<Event>, RepoError> {
        let files = list_event_files(&self.dir)?;
        check_sequence(&files)?;
        files
            .into_iter()
            .map(|(id, path)| read_event(id, &path))
            .collect()
    }
}

fn read_event(id: u64, path: &Utf8Path) -> Result<Event, RepoError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| RepoError::Filesystem(format!("read {path}: {err}")))?;
    let event: Event = serde_json::from_str(&content).map_err(|err| RepoError::CorruptEvent {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    if event.id != id {
        return Err(RepoError::EventIdMismatch {
            id: event.id,
            path: path.to_path_buf(),
        });
    }
    Ok(event)
}

fn list_event_files(dir: &Utf8Path) -> Result<Vec<(u64, Utf8PathBuf)>, RepoError> {
    let entries =
        fs::read_dir(dir.as_std_path()).map_err(|err| RepoError::Filesystem(err.to_string()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| RepoError::Filesystem(err.to_string()))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        match parse_event_file_name(&name) {
            Some(id) => files.push((id, dir.join(&name))),
            None => debug!(file = %name, "skipping non-event file in log directory"),
        }
    }
    files.sort_by_key(|(id, _)| *id);
    Ok(files)
}

fn check_sequence(files: &[(u64, Utf8PathBuf)]) -> Result<(), RepoError> {
    for (index, (id, path)) in files.iter().enumerate() {
        let expected = index as u64 + 1;
        if *id != expected {
            return Err(RepoError::EventGap {
                expected,
                found: *id,
                path: path.clone(),
            });
        }
    }
    Ok(())
}

// Once the file is linked into place the event counts as written; a failed
// directory sync after that point is only logged.
fn write_once<S>(dir: &Utf8Path, path: &Utf8Path, content: &[u8], sync: S) -> io::Result<()>
where
    S: FnOnce(&Utf8Path) -> io::Result<()>,
{
    let mut temp = Builder::new()
        .prefix(".event-")
        .suffix(".tmp")
        .tempfile_in(dir.as_std_path())?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist_noclobber(path.as_std_path())
        .map_err(|err| err.error)?;
    if let Err(err) = sync(dir) {
        warn!(path = %path, error = %err, "event published but directory sync failed");
    }
    Ok(())
}

fn remove_empty_dir(dir: &Utf8Path) -> Result<(), RepoError> {
    match fs::remove_dir(dir.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::DirectoryNotEmpty => {
            Err(RepoError::RepoExists(dir.to_path_buf()))
        }
        Err(err) => Err(RepoError::Filesystem(format!("remove {dir}: {err}"))),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Utf8Path) -> io::Result<()> {
    fs::File::open(dir.as_std_path())?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Utf8Path) -> io::Result<()> {
    Ok(())
}
