use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::RecordCache;
use crate::domain::{MolType, Strandedness, Topology};
use crate::error::RepoError;
use crate::genbank;

const EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const DATASETS_URL: &str = "https://api.ncbi.nlm.nih.gov/datasets/v2";
const EFETCH_BATCH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NcbiSource {
    pub taxid: Option<u32>,
    pub organism: String,
    pub mol_type: String,
    pub isolate: Option<String>,
    pub strain: Option<String>,
    pub clone: Option<String>,
    pub segment: Option<String>,
    pub host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NcbiGenbank {
    pub accession: String,
    pub accession_version: String,
    pub definition: String,
    pub sequence: String,
    pub source: NcbiSource,
    pub refseq: bool,
    pub strandedness: Strandedness,
    pub moltype: MolType,
    pub topology: Topology,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NcbiLineage {
    pub id: u32,
    pub name: String,
    pub rank: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NcbiTaxonomy {
    pub id: u32,
    pub name: String,
    pub rank: String,
    pub lineage: Vec<NcbiLineage>,
}

impl NcbiTaxonomy {
    pub fn species(&self) -> Option<NcbiLineage> {
        if self.rank == "species" {
            return Some(NcbiLineage {
                id: self.id,
                name: self.name.clone(),
                rank: self.rank.clone(),
            });
        }
        self.lineage
            .iter()
            .find(|item| item.rank == "species")
            .cloned()
    }
}

pub trait NcbiClient: Send + Sync {
    fn fetch_genbank(&self, accessions: &[String]) -> Result<Vec<NcbiGenbank>, RepoError>;
    fn fetch_taxonomy(&self, taxid: u32) -> Result<Option<NcbiTaxonomy>, RepoError>;
    fn link_accessions(&self, taxid: u32) -> Result<Vec<String>, RepoError>;
}

#[derive(Debug, Clone, Default)]
pub struct NcbiCredentials {
    pub email: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct NcbiHttpClient {
    client: Client,
    eutils_url: String,
    datasets_url: String,
    credentials: NcbiCredentials,
}

impl NcbiHttpClient {
    pub fn new(credentials: NcbiCredentials) -> Result<Self, RepoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("vref/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RepoError::NcbiHttp(err.to_string()))?,
        );
        if let Some(api_key) = credentials.api_key.as_deref() {
            headers.insert(
                "api-key",
                HeaderValue::from_str(api_key)
                    .map_err(|err| RepoError::NcbiHttp(err.to_string()))?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| RepoError::NcbiHttp(err.to_string()))?;

        Ok(Self {
            client,
            eutils_url: EUTILS_URL.to_string(),
            datasets_url: DATASETS_URL.to_string(),
            credentials,
        })
    }

    pub fn with_base_urls(mut self, eutils_url: &str, datasets_url: &str) -> Self {
        self.eutils_url = eutils_url.trim_end_matches('/').to_string();
        self.datasets_url = datasets_url.trim_end_matches('/').to_string();
        self
    }

    fn eutils_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("tool", "vref".to_string())];
        if let Some(email) = &self.credentials.email {
            params.push(("email", email.clone()));
        }
        if let Some(api_key) = &self.credentials.api_key {
            params.push(("api_key", api_key.clone()));
        }
        params
    }

    fn read_text(&self, response: reqwest::blocking::Response) -> Result<String, RepoError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "NCBI request failed".to_string());
            return Err(RepoError::NcbiStatus { status, message });
        }
        response
            .text()
            .map_err(|err| RepoError::NcbiHttp(err.to_string()))
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, RepoError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        warn!(status, attempt, "retrying NCBI request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        warn!(error = %err, attempt, "retrying NCBI request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(RepoError::NcbiHttp(err.to_string()));
                }
            }
        }
    }
}

impl NcbiClient for NcbiHttpClient {
    fn fetch_genbank(&self, accessions: &[String]) -> Result<Vec<NcbiGenbank>, RepoError> {
        let url = format!("{}/efetch.fcgi", self.eutils_url);
        let mut records = Vec::with_capacity(accessions.len());
        for batch in accessions.chunks(EFETCH_BATCH) {
            let ids = batch.join(",");
            let response = self.send_with_retries(|| {
                self.client
                    .post(&url)
                    .query(&self.eutils_params())
                    .form(&[
                        ("db", "nuccore"),
                        ("id", ids.as_str()),
                        ("rettype", "gb"),
                        ("retmode", "text"),
                    ])
            })?;
            let text = self.read_text(response)?;
            let parsed = genbank::parse_flatfile(&text)?;
            debug!(requested = batch.len(), received = parsed.len(), "fetched GenBank records");
            records.extend(parsed);
        }
        Ok(records)
    }

    fn fetch_taxonomy(&self, taxid: u32) -> Result<Option<NcbiTaxonomy>, RepoError> {
        let url = format!("{}/taxonomy/taxon/{taxid}/dataset_report", self.datasets_url);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let text = self.read_text(response)?;
        parse_taxonomy_report(&text)
    }

    fn link_accessions(&self, taxid: u32) -> Result<Vec<String>, RepoError> {
        let url = format!("{}/elink.fcgi", self.eutils_url);
        let id = taxid.to_string();
        let response = self.send_with_retries(|| {
            self.client.get(&url).query(&self.eutils_params()).query(&[
                ("dbfrom", "taxonomy"),
                ("db", "nuccore"),
                ("id", id.as_str()),
                ("idtype", "acc"),
                ("retmode", "json"),
            ])
        })?;
        let text = self.read_text(response)?;
        parse_elink(&text)
    }
}

#[derive(Debug, Deserialize)]
struct ElinkResponse {
    #[serde(default)]
    linksets: Vec<ElinkSet>,
}

#[derive(Debug, Deserialize)]
struct ElinkSet {
    #[serde(default)]
    linksetdbs: Vec<ElinkSetDb>,
}

#[derive(Debug, Deserialize)]
struct ElinkSetDb {
    linkname: String,
    #[serde(default)]
    links: Vec<String>,
}

fn parse_elink(text: &str) -> Result<Vec<String>, RepoError> {
    let response: ElinkResponse =
        serde_json::from_str(text).map_err(|err| RepoError::NcbiParse(err.to_string()))?;
    Ok(response
        .linksets
        .into_iter()
        .flat_map(|set| set.linksetdbs)
        .filter(|db| db.linkname == "taxonomy_nuccore")
        .flat_map(|db| db.links)
        .collect())
}

#[derive(Debug, Deserialize)]
struct TaxonomyReportResponse {
    #[serde(default)]
    reports: Vec<TaxonomyReport>,
}

#[derive(Debug, Deserialize)]
struct TaxonomyReport {
    taxonomy: TaxonomyNode,
}

#[derive(Debug, Deserialize)]
struct TaxonomyNode {
    tax_id: u32,
    #[serde(default)]
    rank: Option<String>,
    current_scientific_name: ScientificName,
    #[serde(default)]
    classification: BTreeMap<String, ClassificationEntry>,
}

#[derive(Debug, Deserialize)]
struct ScientificName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ClassificationEntry {
    name: String,
    id: u32,
}

const RANK_ORDER: [&str; 12] = [
    "domain",
    "superkingdom",
    "realm",
    "kingdom",
    "phylum",
    "class",
    "order",
    "family",
    "subfamily",
    "genus",
    "species",
    "no rank",
];

fn rank_position(rank: &str) -> usize {
    RANK_ORDER
        .iter()
        .position(|known| *known == rank)
        .unwrap_or(RANK_ORDER.len())
}

fn parse_taxonomy_report(text: &str) -> Result<Option<NcbiTaxonomy>, RepoError> {
    let response: TaxonomyReportResponse =
        serde_json::from_str(text).map_err(|err| RepoError::NcbiParse(err.to_string()))?;
    let Some(report) = response.reports.into_iter().next() else {
        return Ok(None);
    };
    let node = report.taxonomy;
    let rank = node
        .rank
        .map(|rank| rank.to_ascii_lowercase().replace('_', " "))
        .unwrap_or_else(|| "no rank".to_string());

    let mut lineage: Vec<NcbiLineage> = node
        .classification
        .into_iter()
        .filter(|(_, entry)| entry.id != node.tax_id)
        .map(|(rank, entry)| NcbiLineage {
            id: entry.id,
            name: entry.name,
            rank,
        })
        .collect();
    lineage.sort_by_key(|item| rank_position(&item.rank));

    Ok(Some(NcbiTaxonomy {
        id: node.tax_id,
        name: node.current_scientific_name.name,
        rank,
        lineage,
    }))
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

pub struct CachedNcbiClient<C> {
    inner: C,
    cache: RecordCache,
    ignore_cache: bool,
}

impl<C: NcbiClient> CachedNcbiClient<C> {
    pub fn new(inner: C, cache: RecordCache, ignore_cache: bool) -> Self {
        Self {
            inner,
            cache,
            ignore_cache,
        }
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn store_genbank(&self, record: &NcbiGenbank) -> Result<(), RepoError> {
        match self.cache.cache_genbank(&record.accession, record) {
            Err(RepoError::CacheConflict(path)) => {
                warn!(path = %path, accession = %record.accession, "kept existing cached record");
                Ok(())
            }
            other => other,
        }
    }
}

impl<C: NcbiClient> NcbiClient for CachedNcbiClient<C> {
    fn fetch_genbank(&self, accessions: &[String]) -> Result<Vec<NcbiGenbank>, RepoError> {
        let mut records = Vec::with_capacity(accessions.len());
        let mut misses = Vec::new();
        for accession in accessions {
            let key = accession_key(accession);
            match (!self.ignore_cache)
                .then(|| self.cache.load_genbank(key))
                .transpose()?
                .flatten()
            {
                Some(record) => records.push(record),
                None => misses.push(accession.clone()),
            }
        }
        debug!(hits = records.len(), misses = misses.len(), "GenBank cache lookup");

        if !misses.is_empty() {
            for record in self.inner.fetch_genbank(&misses)? {
                self.store_genbank(&record)?;
                records.push(record);
            }
        }
        Ok(records)
    }

    fn fetch_taxonomy(&self, taxid: u32) -> Result<Option<NcbiTaxonomy>, RepoError> {
        if !self.ignore_cache {
            if let Some(record) = self.cache.load_taxonomy(taxid)? {
                return Ok(Some(record));
            }
        }
        let Some(record) = self.inner.fetch_taxonomy(taxid)? else {
            return Ok(None);
        };
        match self.cache.cache_taxonomy(taxid, &record) {
            Err(RepoError::CacheConflict(path)) => {
                warn!(path = %path, taxid, "kept existing cached taxonomy")
            }
            other => other?,
        }
        Ok(Some(record))
    }

    fn link_accessions(&self, taxid: u32) -> Result<Vec<String>, RepoError> {
        self.inner.link_accessions(taxid)
    }
}

pub fn accession_key(accession: &str) -> &str {
    let trimmed = accession.trim();
    trimmed.split_once('.').map_or(trimmed, |(key, _)| key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn species_from_rank_or_lineage() {
        let mut taxonomy = NcbiTaxonomy {
            id: 12242,
            name: "Tobacco mosaic virus".to_string(),
            rank: "species".to_string(),
            lineage: Vec::new(),
        };
        assert_eq!(taxonomy.species().unwrap().id, 12242);

        taxonomy.rank = "no rank".to_string();
        taxonomy.lineage.push(NcbiLineage {
            id: 3432424,
            name: "Tobamovirus tabaci".to_string(),
            rank: "species".to_string(),
        });
        assert_eq!(taxonomy.species().unwrap().name, "Tobamovirus tabaci");
    }

    #[test]
    fn parses_elink_json() {
        let text = r#"{
            "header": {"type": "elink", "version": "0.3"},
            "linksets": [{
                "dbfrom": "taxonomy",
                "ids": ["12242"],
                "linksetdbs": [
                    {
                        "dbto": "nuccore",
                        "linkname": "taxonomy_nuccore",
                        "links": ["NC_001367.1", "V01408.1"]
                    },
                    {"dbto": "nuccore", "linkname": "taxonomy_nuccore_other", "links": ["X"]}
                ]
            }]
        }"#;
        assert_eq!(parse_elink(text).unwrap(), vec!["NC_001367.1", "V01408.1"]);
        assert!(parse_elink(r#"{"linksets": [{"dbfrom": "taxonomy"}]}"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn parses_taxonomy_report() {
        let text = r#"{
            "reports": [{
                "taxonomy": {
                    "tax_id": 12242,
                    "rank": "SPECIES",
                    "current_scientific_name": {"name": "Tobacco mosaic virus"},
                    "classification": {
                        "species": {"name": "Tobacco mosaic virus", "id": 12242},
                        "genus": {"name": "Tobamovirus", "id": 12241},
                        "family": {"name": "Virgaviridae", "id": 675071}
                    }
                }
            }]
        }"#;
        let taxonomy = parse_taxonomy_report(text).unwrap().unwrap();
        assert_eq!(taxonomy.id, 12242);
        assert_eq!(taxonomy.rank, "species");
        let ranks: Vec<_> = taxonomy.lineage.iter().map(|item| item.rank.as_str()).collect();
        assert_eq!(ranks, vec!["family", "genus"]);

        assert!(parse_taxonomy_report(r#"{"reports": []}"#).unwrap().is_none());
    }

    #[test]
    fn accession_keys_drop_version() {
        assert_eq!(accession_key("NC_001367.1"), "NC_001367");
        assert_eq!(accession_key(" MH200607 "), "MH200607");
    }

    #[test]
    fn retry_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
    }
}
