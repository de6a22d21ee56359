use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::Otu;
use crate::build;
use crate::cache::RecordCache;
use crate::config::ResolvedConfig;
use crate::domain::{Accession, DataType};
use crate::error::RepoError;
use crate::event::RepoMeta;
use crate::ncbi::NcbiClient;
use crate::otu;
use crate::pipeline::{Pipeline, PipelineJob, PipelineOptions, PipelineReport};
use crate::repo::Repo;
use crate::store::RepoLayout;

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub path: Utf8PathBuf,
    pub repository: RepoMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtuSummary {
    pub otu_id: Uuid,
    pub taxid: u32,
    pub name: String,
    pub acronym: String,
    pub isolates: usize,
    pub sequences: usize,
    pub excluded: usize,
}

impl From<&Otu> for OtuSummary {
    fn from(otu: &Otu) -> Self {
        Self {
            otu_id: otu.id,
            taxid: otu.taxid,
            name: otu.name.clone(),
            acronym: otu.acronym.clone(),
            isolates: otu.isolates.len(),
            sequences: otu.sequence_count(),
            excluded: otu.excluded_accessions.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateResult {
    pub otu: OtuSummary,
    pub added: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddResult {
    pub otu_id: Uuid,
    pub taxid: u32,
    pub added: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExcludeResult {
    pub otu_id: Uuid,
    pub taxid: u32,
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub otus: Vec<OtuSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub config: Option<Utf8PathBuf>,
    pub created: Vec<u32>,
    pub report: PipelineReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub output: Utf8PathBuf,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub otus: usize,
    pub sequences: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: bool,
    pub path: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn progress(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
        elapsed: None,
    });
}

pub fn init_repo(
    path: &Utf8Path,
    data_type: DataType,
    name: &str,
    organism: &str,
) -> Result<InitResult, RepoError> {
    let repo = Repo::new(data_type, name, path, organism)?;
    Ok(InitResult {
        path: repo.path().to_path_buf(),
        repository: repo.meta().clone(),
    })
}

pub fn build_reference(
    repo: &Repo,
    output: &Utf8Path,
    version: Option<&str>,
    indent: bool,
) -> Result<BuildResult, RepoError> {
    let reference = build::build_reference(repo, version);
    build::write_reference(&reference, output, indent)?;
    Ok(BuildResult {
        output: output.to_path_buf(),
        name: reference.name.clone(),
        created_at: reference.created_at,
        otus: reference.otus.len(),
        sequences: reference.sequence_count(),
    })
}

pub fn clear_cache(cache: &RecordCache) -> Result<ClearResult, RepoError> {
    cache.clear()?;
    Ok(ClearResult {
        cleared: true,
        path: cache.root().to_path_buf(),
    })
}

pub struct App<N: NcbiClient> {
    repo: Repo,
    ncbi: N,
}

impl<N: NcbiClient> App<N> {
    pub fn new(repo: Repo, ncbi: N) -> Self {
        Self { repo, ncbi }
    }

    pub fn open(path: &Utf8Path, ncbi: N) -> Result<Self, RepoError> {
        Ok(Self::new(Repo::open(path)?, ncbi))
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn layout(&self) -> &RepoLayout {
        self.repo.layout()
    }

    fn otu_by_taxid(&self, taxid: u32) -> Result<&Otu, RepoError> {
        self.repo
            .get_otu_by_taxid(taxid)
            .ok_or(RepoError::TaxidNotFound(taxid))
    }

    pub fn create_otu(
        &mut self,
        taxid: u32,
        accessions: &[Accession],
        sink: &dyn ProgressSink,
    ) -> Result<CreateResult, RepoError> {
        progress(sink, format!("phase=Resolve; taxonomy {taxid}"));
        let (otu, added) = if accessions.is_empty() {
            (otu::create_otu_from_taxid(&mut self.repo, &self.ncbi, taxid)?, Vec::new())
        } else {
            progress(sink, format!("phase=Fetch; {} accessions", accessions.len()));
            otu::create_otu_from_records(&mut self.repo, &self.ncbi, taxid, accessions)?
        };
        Ok(CreateResult {
            otu: OtuSummary::from(&otu),
            added,
        })
    }

    pub fn add_sequences(
        &mut self,
        taxid: u32,
        accessions: &[Accession],
        sink: &dyn ProgressSink,
    ) -> Result<AddResult, RepoError> {
        let otu_id = self.otu_by_taxid(taxid)?.id;
        let requested: Vec<String> = accessions
            .iter()
            .map(|accession| accession.as_str().to_string())
            .collect();
        progress(sink, format!("phase=Fetch; {} accessions", requested.len()));
        let added = otu::add_sequences(&mut self.repo, &self.ncbi, otu_id, &requested)?;
        Ok(AddResult {
            otu_id,
            taxid,
            added,
        })
    }

    pub fn update_otu(
        &mut self,
        taxid: u32,
        sink: &dyn ProgressSink,
    ) -> Result<AddResult, RepoError> {
        let otu_id = self.otu_by_taxid(taxid)?.id;
        progress(sink, format!("phase=Resolve; linked accessions for {taxid}"));
        let added = otu::update_otu(&mut self.repo, &self.ncbi, otu_id)?;
        Ok(AddResult {
            otu_id,
            taxid,
            added,
        })
    }

    pub fn exclude(
        &mut self,
        taxid: u32,
        accessions: &[Accession],
        sink: &dyn ProgressSink,
    ) -> Result<ExcludeResult, RepoError> {
        let otu_id = self.otu_by_taxid(taxid)?.id;
        progress(sink, format!("phase=Store; excluding {} accessions", accessions.len()));
        otu::exclude_accessions(&mut self.repo, otu_id, accessions)?;
        Ok(ExcludeResult {
            otu_id,
            taxid,
            excluded: accessions
                .iter()
                .map(|accession| accession.key().to_string())
                .collect(),
        })
    }

    pub fn list(&self) -> ListResult {
        ListResult {
            otus: self.repo.iter_otus().map(OtuSummary::from).collect(),
        }
    }

    pub fn show(&self, taxid: u32) -> Result<Otu, RepoError> {
        self.otu_by_taxid(taxid).cloned()
    }

    pub fn sync(
        &mut self,
        config: &ResolvedConfig,
        options: PipelineOptions,
        cancel: &AtomicBool,
        sink: &dyn ProgressSink,
    ) -> Result<SyncResult, RepoError> {
        let started = Instant::now();
        let mut created = Vec::new();
        let mut jobs = Vec::with_capacity(config.otus.len());

        for request in &config.otus {
            let otu_id = match self.repo.get_otu_by_taxid(request.taxid) {
                Some(otu) => otu.id,
                None => {
                    progress(sink, format!("phase=Resolve; creating OTU {}", request.taxid));
                    created.push(request.taxid);
                    otu::create_otu_from_taxid(&mut self.repo, &self.ncbi, request.taxid)?.id
                }
            };

            let excluded = self
                .repo
                .get_otu(otu_id)
                .map(|otu| otu.excluded_accessions.clone())
                .unwrap_or_default();
            let pending: Vec<Accession> = request
                .exclude
                .iter()
                .filter(|accession| !excluded.contains(accession.key()))
                .cloned()
                .collect();
            otu::exclude_accessions(&mut self.repo, otu_id, &pending)?;

            jobs.push(if request.accessions.is_empty() {
                PipelineJob::update(otu_id)
            } else {
                PipelineJob::with_accessions(
                    otu_id,
                    request
                        .accessions
                        .iter()
                        .map(|accession| accession.as_str().to_string())
                        .collect(),
                )
            });
        }

        progress(sink, format!("phase=Fetch; updating {} OTUs", jobs.len()));
        let report = Pipeline::new(options).run_jobs(&mut self.repo, &self.ncbi, jobs, cancel)?;
        sink.event(ProgressEvent {
            message: format!("phase=Done; added {} sequences", report.added()),
            elapsed: Some(started.elapsed()),
        });

        Ok(SyncResult {
            config: config.source.clone(),
            created,
            report,
        })
    }
}
