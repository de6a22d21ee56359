use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::thread;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::Otu;
use crate::error::RepoError;
use crate::ncbi::{NcbiClient, NcbiGenbank};
use crate::otu::{IsolateAdditions, commit_additions, plan_additions, unblocked_accessions};
use crate::repo::Repo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { capacity: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineJob {
    pub otu_id: Uuid,
    pub accessions: Option<Vec<String>>,
}

impl PipelineJob {
    pub fn update(otu_id: Uuid) -> Self {
        Self {
            otu_id,
            accessions: None,
        }
    }

    pub fn with_accessions(otu_id: Uuid, accessions: Vec<String>) -> Self {
        Self {
            otu_id,
            accessions: Some(accessions),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OtuOutcome {
    Updated { added: Vec<String> },
    FetchFailed { error: String },
    CommitFailed { error: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtuReport {
    pub otu_id: Uuid,
    pub taxid: u32,
    #[serde(flatten)]
    pub outcome: OtuOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub otus: Vec<OtuReport>,
    pub cancelled: bool,
}

impl PipelineReport {
    pub fn added(&self) -> usize {
        self.otus
            .iter()
            .map(|report| match &report.outcome {
                OtuOutcome::Updated { added } => added.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.otus
            .iter()
            .filter(|report| {
                matches!(
                    report.outcome,
                    OtuOutcome::FetchFailed { .. } | OtuOutcome::CommitFailed { .. }
                )
            })
            .count()
    }
}

struct Fetched {
    otu: Otu,
    records: Result<Vec<NcbiGenbank>, RepoError>,
}

struct Planned {
    otu_id: Uuid,
    taxid: u32,
    additions: Result<Vec<IsolateAdditions>, RepoError>,
}

pub struct Pipeline {
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    pub fn run<C>(
        &self,
        repo: &mut Repo,
        client: &C,
        otu_ids: &[Uuid],
        cancel: &AtomicBool,
    ) -> Result<PipelineReport, RepoError>
    where
        C: NcbiClient + ?Sized,
    {
        let jobs: Vec<PipelineJob> = otu_ids.iter().copied().map(PipelineJob::update).collect();
        self.run_jobs(repo, client, jobs, cancel)
    }

    pub fn run_jobs<C>(
        &self,
        repo: &mut Repo,
        client: &C,
        jobs: Vec<PipelineJob>,
        cancel: &AtomicBool,
    ) -> Result<PipelineReport, RepoError>
    where
        C: NcbiClient + ?Sized,
    {
        let snapshots = jobs
            .into_iter()
            .map(|job| {
                repo.get_otu(job.otu_id)
                    .cloned()
                    .map(|otu| (otu, job.accessions))
                    .ok_or(RepoError::OtuNotFound(job.otu_id))
            })
            .collect::<Result<Vec<_>, RepoError>>()?;
        let requested: Vec<(Uuid, u32)> = snapshots
            .iter()
            .map(|(otu, _)| (otu.id, otu.taxid))
            .collect();
        let capacity = self.options.capacity.max(1);
        info!(otus = requested.len(), capacity, "starting batch update");

        let mut report = PipelineReport::default();
        let mut writer_failed = false;
        let stop_flag = AtomicBool::new(false);
        let stop = &stop_flag;

        thread::scope(|scope| {
            let (fetched_tx, fetched_rx) = sync_channel::<Fetched>(capacity);
            let (planned_tx, planned_rx) = sync_channel::<Planned>(capacity);

            scope.spawn(move || {
                for (otu, accessions) in snapshots {
                    if cancel.load(Ordering::SeqCst) || stop.load(Ordering::SeqCst) {
                        debug!("cancelled; no more OTUs will be fetched");
                        break;
                    }
                    let records = fetch_for(client, &otu, accessions);
                    if fetched_tx.send(Fetched { otu, records }).is_err() {
                        break;
                    }
                }
            });

            scope.spawn(move || {
                for fetched in fetched_rx {
                    let Fetched { otu, records } = fetched;
                    let planned = Planned {
                        otu_id: otu.id,
                        taxid: otu.taxid,
                        additions: records.map(|records| plan_additions(&otu, records)),
                    };
                    if planned_tx.send(planned).is_err() {
                        break;
                    }
                }
            });

            for planned in planned_rx {
                let outcome = match planned.additions {
                    Err(err) => {
                        warn!(taxid = planned.taxid, error = %err, "fetch failed");
                        OtuOutcome::FetchFailed {
                            error: err.to_string(),
                        }
                    }
                    Ok(_) if writer_failed => OtuOutcome::Skipped,
                    Ok(additions) => match commit_additions(repo, planned.otu_id, additions) {
                        Ok(added) => OtuOutcome::Updated { added },
                        Err(err) => {
                            warn!(taxid = planned.taxid, error = %err, "commit failed; stopping");
                            writer_failed = true;
                            stop.store(true, Ordering::SeqCst);
                            OtuOutcome::CommitFailed {
                                error: err.to_string(),
                            }
                        }
                    },
                };
                report.otus.push(OtuReport {
                    otu_id: planned.otu_id,
                    taxid: planned.taxid,
                    outcome,
                });
            }
        });

        // Reports arrive in job order, so unreported jobs are exactly the tail.
        let unreported = requested.into_iter().skip(report.otus.len());
        for (otu_id, taxid) in unreported {
            report.otus.push(OtuReport {
                otu_id,
                taxid,
                outcome: OtuOutcome::Skipped,
            });
        }
        report.cancelled = cancel.load(Ordering::SeqCst);
        info!(
            added = report.added(),
            failures = report.failures(),
            cancelled = report.cancelled,
            "finished batch update"
        );
        Ok(report)
    }
}

fn fetch_for<C>(
    client: &C,
    otu: &Otu,
    accessions: Option<Vec<String>>,
) -> Result<Vec<NcbiGenbank>, RepoError>
where
    C: NcbiClient + ?Sized,
{
    let candidates = match accessions {
        Some(accessions) => accessions,
        None => client.link_accessions(otu.taxid)?,
    };
    let fetch_list = unblocked_accessions(otu, &candidates);
    if fetch_list.is_empty() {
        return Ok(Vec::new());
    }
    debug!(taxid = otu.taxid, count = fetch_list.len(), "fetching records");
    client.fetch_genbank(&fetch_list)
}
