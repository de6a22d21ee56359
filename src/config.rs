use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::OverwritePolicy;
use crate::domain::Accession;
use crate::error::RepoError;
use crate::ncbi::NcbiCredentials;

pub const CONFIG_FILE_NAME: &str = "vref.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub otus: Vec<OtuEntry>,
    #[serde(default)]
    pub ncbi: NcbiSettings,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OtuEntry {
    Shorthand(u32),
    Detailed(OtuEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OtuEntryObject {
    pub taxid: u32,
    #[serde(default)]
    pub accessions: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NcbiSettings {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cache_policy: OverwritePolicy,
}

impl NcbiSettings {
    pub fn credentials(&self) -> NcbiCredentials {
        NcbiCredentials {
            email: self.email.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtuRequest {
    pub taxid: u32,
    pub accessions: Vec<Accession>,
    pub exclude: Vec<Accession>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub source: Option<Utf8PathBuf>,
    pub otus: Vec<OtuRequest>,
    pub ncbi: NcbiSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn locate(explicit: Option<&Utf8Path>, repo_root: &Utf8Path) -> Option<Utf8PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let repo_config = repo_root.join(CONFIG_FILE_NAME);
        if repo_config.as_std_path().is_file() {
            return Some(repo_config);
        }
        user_config_path().filter(|path| path.as_std_path().is_file())
    }

    pub fn resolve(
        explicit: Option<&Utf8Path>,
        repo_root: &Utf8Path,
    ) -> Result<ResolvedConfig, RepoError> {
        let (config, source) = match Self::locate(explicit, repo_root) {
            Some(path) => {
                let content = fs::read_to_string(path.as_std_path())
                    .map_err(|_| RepoError::ConfigRead(path.clone()))?;
                let config: Config = serde_json::from_str(&content)
                    .map_err(|err| RepoError::ConfigParse(err.to_string()))?;
                debug!(path = %path, "loaded config");
                (config, Some(path))
            }
            None => (Config::default(), None),
        };

        let mut resolved = Self::resolve_config(config)?;
        resolved.source = source;
        resolved.ncbi = apply_env_overrides(resolved.ncbi, |key| std::env::var(key).ok());
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, RepoError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let otus = config
            .otus
            .into_iter()
            .map(|entry| match entry {
                OtuEntry::Shorthand(taxid) => Ok(OtuRequest {
                    taxid,
                    accessions: Vec::new(),
                    exclude: Vec::new(),
                }),
                OtuEntry::Detailed(obj) => Ok(OtuRequest {
                    taxid: obj.taxid,
                    accessions: parse_accessions(&obj.accessions)?,
                    exclude: parse_accessions(&obj.exclude)?,
                }),
            })
            .collect::<Result<Vec<_>, RepoError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            source: None,
            otus,
            ncbi: config.ncbi,
        })
    }
}

fn parse_accessions(values: &[String]) -> Result<Vec<Accession>, RepoError> {
    values.iter().map(|value| value.parse()).collect()
}

pub fn apply_env_overrides<F>(mut settings: NcbiSettings, lookup: F) -> NcbiSettings
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    if let Some(email) = non_empty("NCBI_EMAIL") {
        settings.email = Some(email);
    }
    if let Some(api_key) = non_empty("NCBI_API_KEY") {
        settings.api_key = Some(api_key);
    }
    settings
}

fn user_config_path() -> Option<Utf8PathBuf> {
    let dirs = BaseDirs::new()?;
    let dir = Utf8PathBuf::from_path_buf(dirs.config_dir().to_path_buf()).ok()?;
    Some(dir.join("vref").join(CONFIG_FILE_NAME))
}
