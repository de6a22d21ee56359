use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{MolType, Strandedness, Topology};
use crate::error::RepoError;
use crate::ncbi::{NcbiGenbank, NcbiSource};

static QUALIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([A-Za-z_][A-Za-z0-9_]*)(?:=(.*))?$").expect("qualifier regex")
});

const FEATURE_KEY_COLUMNS: std::ops::Range<usize> = 5..21;
const QUALIFIER_COLUMN: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Definition,
    Features,
    Origin,
    Other,
}

pub fn parse_flatfile(text: &str) -> Result<Vec<NcbiGenbank>, RepoError> {
    let mut records = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.starts_with("//") {
            if !current.is_empty() {
                records.push(parse_record(&current)?);
                current.clear();
            }
            continue;
        }
        if current.is_empty() && line.trim().is_empty() {
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        return Err(RepoError::NcbiParse(
            "GenBank record is missing its // terminator".to_string(),
        ));
    }
    Ok(records)
}

#[derive(Debug, Default)]
struct Locus {
    strandedness: Option<Strandedness>,
    moltype: Option<MolType>,
    topology: Option<Topology>,
}

fn parse_record(lines: &[&str]) -> Result<NcbiGenbank, RepoError> {
    let mut section = Section::Header;
    let mut locus = Locus::default();
    let mut definition = String::new();
    let mut accession = None;
    let mut version = None;
    let mut sequence = String::new();
    let mut feature_key: Option<String> = None;
    let mut source_features_seen = 0usize;
    let mut qualifiers: Vec<(String, String)> = Vec::new();

    for line in lines {
        if !line.starts_with(' ') {
            let (keyword, rest) = split_keyword(line);
            section = match keyword {
                "LOCUS" => {
                    locus = parse_locus(rest);
                    Section::Header
                }
                "DEFINITION" => {
                    definition.push_str(rest.trim());
                    Section::Definition
                }
                "ACCESSION" => {
                    accession = rest.split_whitespace().next().map(str::to_string);
                    Section::Other
                }
                "VERSION" => {
                    version = rest.split_whitespace().next().map(str::to_string);
                    Section::Other
                }
                "FEATURES" => Section::Features,
                "ORIGIN" => Section::Origin,
                _ => Section::Other,
            };
            continue;
        }

        match section {
            Section::Definition => {
                definition.push(' ');
                definition.push_str(line.trim());
            }
            Section::Features => {
                let key = line.get(FEATURE_KEY_COLUMNS).map(str::trim).unwrap_or("");
                if !key.is_empty() {
                    if key == "source" {
                        source_features_seen += 1;
                    }
                    feature_key = Some(key.to_string());
                    continue;
                }
                if feature_key.as_deref() != Some("source") || source_features_seen != 1 {
                    continue;
                }
                let text = line.get(QUALIFIER_COLUMN..).unwrap_or("").trim_end();
                push_qualifier_line(&mut qualifiers, text);
            }
            Section::Origin => {
                sequence.extend(
                    line.chars()
                        .filter(|ch| ch.is_ascii_alphabetic())
                        .map(|ch| ch.to_ascii_uppercase()),
                );
            }
            Section::Header | Section::Other => {}
        }
    }

    let accession = accession.ok_or_else(|| {
        RepoError::NcbiParse("GenBank record has no ACCESSION line".to_string())
    })?;
    if source_features_seen == 0 {
        return Err(RepoError::NcbiParse(format!(
            "{accession}: feature table contains no source feature"
        )));
    }

    let moltype = locus.moltype.unwrap_or(MolType::Dna);
    let strandedness = locus.strandedness.unwrap_or(match moltype {
        MolType::Dna => Strandedness::Double,
        _ => Strandedness::Single,
    });

    Ok(NcbiGenbank {
        refseq: is_refseq_accession(&accession),
        accession_version: version.unwrap_or_else(|| accession.clone()),
        accession,
        definition: definition.trim().trim_end_matches('.').to_string(),
        sequence,
        source: build_source(&qualifiers),
        strandedness,
        moltype,
        topology: locus.topology.unwrap_or(Topology::Linear),
    })
}

fn split_keyword(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(index) => (&line[..index], &line[index..]),
        None => (line, ""),
    }
}

fn parse_locus(rest: &str) -> Locus {
    let mut locus = Locus::default();
    for token in rest.split_whitespace() {
        let lower = token.to_ascii_lowercase();
        match lower.as_str() {
            "linear" => locus.topology = Some(Topology::Linear),
            "circular" => locus.topology = Some(Topology::Circular),
            _ => {}
        }
        if locus.moltype.is_some() {
            continue;
        }
        let (strand, molecule) = match lower.split_once('-') {
            Some(("ss", molecule)) => (Some(Strandedness::Single), molecule),
            Some(("ds", molecule)) => (Some(Strandedness::Double), molecule),
            Some(("ms", molecule)) => (None, molecule),
            _ => (None, lower.as_str()),
        };
        let moltype = match molecule {
            "dna" => Some(MolType::Dna),
            "rna" => Some(MolType::Rna),
            "mrna" => Some(MolType::Mrna),
            "trna" => Some(MolType::Trna),
            "crna" => Some(MolType::Crna),
            other if other.ends_with("rna") => Some(MolType::Rna),
            _ => None,
        };
        if moltype.is_some() {
            locus.moltype = moltype;
            locus.strandedness = strand;
        }
    }
    locus
}

fn push_qualifier_line(qualifiers: &mut Vec<(String, String)>, text: &str) {
    if let Some((_, value)) = qualifiers.last_mut() {
        if value.starts_with('"') && (value.len() == 1 || !value.ends_with('"')) {
            value.push(' ');
            value.push_str(text);
            return;
        }
    }
    if let Some(caps) = QUALIFIER_RE.captures(text) {
        let name = caps[1].to_string();
        let value = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
        qualifiers.push((name, value));
    }
}

fn build_source(qualifiers: &[(String, String)]) -> NcbiSource {
    let get = |name: &str| {
        qualifiers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| unquote(value))
    };
    let taxid = qualifiers
        .iter()
        .filter(|(key, _)| key == "db_xref")
        .filter_map(|(_, value)| unquote(value).strip_prefix("taxon:")?.parse().ok())
        .next();

    NcbiSource {
        taxid,
        organism: get("organism").unwrap_or_default(),
        mol_type: get("mol_type").unwrap_or_default(),
        isolate: get("isolate"),
        strain: get("strain"),
        clone: get("clone"),
        segment: get("segment"),
        host: get("host"),
    }
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

pub fn is_refseq_accession(accession: &str) -> bool {
    let bytes = accession.as_bytes();
    bytes.len() > 3
        && bytes[0].is_ascii_uppercase()
        && bytes[1].is_ascii_uppercase()
        && bytes[2] == b'_'
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const TMV: &str = "\
LOCUS       NC_001367               6395 bp    RNA     linear   VRL 14-JAN-2015
DEFINITION  Tobacco mosaic virus, complete
            genome.
ACCESSION   NC_001367
VERSION     NC_001367.1
KEYWORDS    RefSeq.
SOURCE      Tobacco mosaic virus
  ORGANISM  Tobacco mosaic virus
            Viruses; Riboviria; Orthornavirae.
FEATURES             Location/Qualifiers
     source          1..6395
                     /organism=\"Tobacco mosaic virus\"
                     /mol_type=\"genomic RNA\"
                     /isolate=\"vulgare long
                     name\"
                     /db_xref=\"taxon:12242\"
     gene            69..4919
                     /isolate=\"not the source\"
ORIGIN
        1 gtatttttac aacaattacc aacaacaaca aacaacaaac
       41 aacattacaa
//
LOCUS       AB017504                3400 bp    ss-RNA     circular VRL 01-FEB-2000
DEFINITION  Segmented virus segment B.
ACCESSION   AB017504
VERSION     AB017504.2
FEATURES             Location/Qualifiers
     source          1..3400
                     /organism=\"Some virus\"
                     /strain=\"S1\"
                     /segment=\"B\"
ORIGIN
        1 acgt
//
";

    #[test]
    fn parses_refseq_record() {
        let records = parse_flatfile(TMV).unwrap();
        assert_eq!(records.len(), 2);

        let tmv = &records[0];
        assert_eq!(tmv.accession, "NC_001367");
        assert_eq!(tmv.accession_version, "NC_001367.1");
        assert_eq!(tmv.definition, "Tobacco mosaic virus, complete genome");
        assert!(tmv.refseq);
        assert_eq!(tmv.moltype, MolType::Rna);
        assert_eq!(tmv.strandedness, Strandedness::Single);
        assert_eq!(tmv.topology, Topology::Linear);
        assert_eq!(tmv.source.taxid, Some(12242));
        assert_eq!(tmv.source.isolate.as_deref(), Some("vulgare long name"));
        assert_eq!(tmv.source.mol_type, "genomic RNA");
        assert_eq!(tmv.sequence, "GTATTTTTACAACAATTACCAACAACAACAAACAACAAACAACATTACAA");
    }

    #[test]
    fn parses_segment_and_strandedness() {
        let records = parse_flatfile(TMV).unwrap();
        let record = &records[1];
        assert!(!record.refseq);
        assert_eq!(record.strandedness, Strandedness::Single);
        assert_eq!(record.topology, Topology::Circular);
        assert_eq!(record.source.strain.as_deref(), Some("S1"));
        assert_eq!(record.source.segment.as_deref(), Some("B"));
        assert_eq!(record.source.isolate, None);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let err = parse_flatfile("LOCUS       X\nACCESSION   X\n").unwrap_err();
        assert_matches!(err, RepoError::NcbiParse(_));
    }

    #[test]
    fn record_without_source_is_an_error() {
        let err = parse_flatfile("LOCUS       X\nACCESSION   AB000001\n//\n").unwrap_err();
        assert_matches!(err, RepoError::NcbiParse(message) if message.contains("AB000001"));
    }

    #[test]
    fn refseq_prefix() {
        assert!(is_refseq_accession("NC_003355"));
        assert!(!is_refseq_accession("MH200607"));
    }
}
