use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::Builder;
use tracing::debug;

use crate::error::RepoError;
use crate::ncbi::{NcbiGenbank, NcbiTaxonomy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverwritePolicy {
    #[default]
    ReplaceIfExists,
    FailIfExists,
}

#[derive(Debug, Clone)]
pub struct RecordCache {
    root: Utf8PathBuf,
    policy: OverwritePolicy,
}

impl RecordCache {
    pub fn new(root: impl Into<Utf8PathBuf>, policy: OverwritePolicy) -> Result<Self, RepoError> {
        let cache = Self {
            root: root.into(),
            policy,
        };
        cache.ensure_dirs()?;
        Ok(cache)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn policy(&self) -> OverwritePolicy {
        self.policy
    }

    pub fn nuccore_dir(&self) -> Utf8PathBuf {
        self.root.join("nuccore")
    }

    pub fn taxonomy_dir(&self) -> Utf8PathBuf {
        self.root.join("taxonomy")
    }

    pub fn nuccore_path(&self, key: &str) -> Utf8PathBuf {
        self.nuccore_dir().join(format!("{key}.json"))
    }

    pub fn taxonomy_path(&self, taxid: u32) -> Utf8PathBuf {
        self.taxonomy_dir().join(format!("{taxid}.json"))
    }

    pub fn clear(&self) -> Result<(), RepoError> {
        if self.root.as_std_path().exists() {
            fs::remove_dir_all(self.root.as_std_path())
                .map_err(|err| RepoError::Filesystem(err.to_string()))?;
        }
        self.ensure_dirs()
    }

    pub fn cache_genbank(&self, accession: &str, record: &NcbiGenbank) -> Result<(), RepoError> {
        self.write(&self.nuccore_path(accession), record)
    }

    pub fn load_genbank(&self, accession: &str) -> Result<Option<NcbiGenbank>, RepoError> {
        read(&self.nuccore_path(accession))
    }

    pub fn cache_taxonomy(&self, taxid: u32, record: &NcbiTaxonomy) -> Result<(), RepoError> {
        self.write(&self.taxonomy_path(taxid), record)
    }

    pub fn load_taxonomy(&self, taxid: u32) -> Result<Option<NcbiTaxonomy>, RepoError> {
        read(&self.taxonomy_path(taxid))
    }

    fn ensure_dirs(&self) -> Result<(), RepoError> {
        for dir in [self.nuccore_dir(), self.taxonomy_dir()] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| RepoError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    fn write<T: Serialize>(&self, path: &Utf8Path, value: &T) -> Result<(), RepoError> {
        let content =
            serde_json::to_vec_pretty(value).map_err(|err| RepoError::Filesystem(err.to_string()))?;
        let parent = path
            .parent()
            .ok_or_else(|| RepoError::Filesystem(format!("invalid cache path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| RepoError::Filesystem(err.to_string()))?;

        let result = match self.policy {
            OverwritePolicy::ReplaceIfExists => write_atomic(parent, path, &content, true),
            OverwritePolicy::FailIfExists => write_atomic(parent, path, &content, false),
        };
        result.map_err(|err| {
            if err.kind() == io::ErrorKind::AlreadyExists {
                RepoError::CacheConflict(path.to_path_buf())
            } else {
                RepoError::Filesystem(format!("write {path}: {err}"))
            }
        })?;
        debug!(path = %path, "cached record");
        Ok(())
    }
}

fn read<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, RepoError> {
    let content = match fs::read_to_string(path.as_std_path()) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(RepoError::Filesystem(format!("read {path}: {err}"))),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|err| RepoError::Filesystem(format!("corrupt cache entry {path}: {err}")))
}

fn write_atomic(dir: &Utf8Path, path: &Utf8Path, content: &[u8], replace: bool) -> io::Result<()> {
    let mut temp = Builder::new()
        .prefix(".record-")
        .suffix(".tmp")
        .tempfile_in(dir.as_std_path())?;
    temp.write_all(content)?;
    if replace {
        temp.persist(path.as_std_path()).map_err(|err| err.error)?;
    } else {
        temp.persist_noclobber(path.as_std_path())
            .map_err(|err| err.error)?;
    }
    Ok(())
}
