use std::io::{self, Write};

use serde::Serialize;

use crate::aggregate::Otu;
use crate::app::{
    AddResult, BuildResult, ClearResult, CreateResult, ExcludeResult, InitResult, ListResult,
    ProgressEvent, ProgressSink, SyncResult,
};
use crate::pipeline::OtuOutcome;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_init(result: &InitResult) {
        println!(
            "Created {} repository '{}' ({}) at {}",
            result.repository.data_type,
            result.repository.name,
            result.repository.organism,
            result.path
        );
    }

    pub fn print_create(result: &CreateResult) {
        println!(
            "Created OTU {} (taxid {}, id {})",
            result.otu.name, result.otu.taxid, result.otu.otu_id
        );
        print_added(&result.added);
    }

    pub fn print_add(result: &AddResult) {
        println!("OTU taxid {}", result.taxid);
        print_added(&result.added);
    }

    pub fn print_exclude(result: &ExcludeResult) {
        println!(
            "Excluded {} accessions from taxid {}: {}",
            result.excluded.len(),
            result.taxid,
            result.excluded.join(", ")
        );
    }

    pub fn print_list(result: &ListResult) {
        if result.otus.is_empty() {
            println!("No OTUs");
            return;
        }
        for otu in &result.otus {
            println!(
                "{:>10}  {}  isolates={} sequences={} excluded={}",
                otu.taxid, otu.name, otu.isolates, otu.sequences, otu.excluded
            );
        }
    }

    pub fn print_otu(otu: &Otu) {
        println!("{} (taxid {}, id {})", otu.name, otu.taxid, otu.id);
        if let Some(schema) = &otu.schema {
            let segments: Vec<&str> = schema.segments.keys().map(String::as_str).collect();
            println!("  segments: {}", segments.join(", "));
        }
        for isolate in &otu.isolates {
            println!("  {}", isolate.name);
            for sequence in &isolate.sequences {
                println!(
                    "    {}  {}  {} bp",
                    sequence.accession,
                    sequence.segment,
                    sequence.sequence.len()
                );
            }
        }
        if !otu.excluded_accessions.is_empty() {
            let excluded: Vec<&str> = otu.excluded_accessions.iter().map(String::as_str).collect();
            println!("  excluded: {}", excluded.join(", "));
        }
    }

    pub fn print_sync(result: &SyncResult) {
        if let Some(path) = &result.config {
            println!("Config: {path}");
        }
        for taxid in &result.created {
            println!("Created OTU for taxid {taxid}");
        }
        for otu in &result.report.otus {
            match &otu.outcome {
                OtuOutcome::Updated { added } => {
                    println!("{:>10}  added {}", otu.taxid, added.len())
                }
                OtuOutcome::FetchFailed { error } => {
                    println!("{:>10}  fetch failed: {error}", otu.taxid)
                }
                OtuOutcome::CommitFailed { error } => {
                    println!("{:>10}  commit failed: {error}", otu.taxid)
                }
                OtuOutcome::Skipped => println!("{:>10}  skipped", otu.taxid),
            }
        }
        println!(
            "Added {} sequences, {} failures{}",
            result.report.added(),
            result.report.failures(),
            if result.report.cancelled { " (cancelled)" } else { "" }
        );
    }

    pub fn print_build(result: &BuildResult) {
        println!(
            "Built {} ({} OTUs, {} sequences) at {}",
            result.name.as_deref().unwrap_or("unversioned reference"),
            result.otus,
            result.sequences,
            result.output
        );
    }

    pub fn print_clear(result: &ClearResult) {
        println!("Cleared cache at {}", result.path);
    }
}

fn print_added(added: &[String]) {
    if added.is_empty() {
        println!("No new sequences added");
    } else {
        println!("Added {} sequences: {}", added.len(), added.join(", "));
    }
}
