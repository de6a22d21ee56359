use assert_matches::assert_matches;

use viral_reference_manager::domain::{Accession, DataType, IsolateName, IsolateNameType};
use viral_reference_manager::error::RepoError;

#[test]
fn parse_genbank_and_refseq_accessions() {
    for value in ["MH200607", "MH200607.1", "AB017504.2", "NC_001367", "NC_001367.1"] {
        let acc: Accession = value.parse().unwrap();
        assert_eq!(acc.as_str(), value);
    }
    let acc: Accession = "NC_001367.1".parse().unwrap();
    assert!(acc.is_refseq());
    assert_eq!(acc.key(), "NC_001367");
}

#[test]
fn parse_accession_invalid() {
    for value in ["", "12345", "MH200607.", "NC-001367"] {
        let err = value.parse::<Accession>().unwrap_err();
        assert_matches!(err, RepoError::InvalidAccession(_));
    }
}

#[test]
fn isolate_name_wire_format() {
    let name = IsolateName::new(IsolateNameType::Refseq, "NC_001367");
    let json = serde_json::to_value(&name).unwrap();
    assert_eq!(json, serde_json::json!({"type": "refseq", "value": "NC_001367"}));
    let parsed: IsolateName = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, name);
    assert_eq!(name.to_string(), "refseq NC_001367");
}

#[test]
fn isolate_names_order_by_type_then_value() {
    let mut names = vec![
        IsolateName::new(IsolateNameType::Strain, "A"),
        IsolateName::new(IsolateNameType::Isolate, "B"),
        IsolateName::new(IsolateNameType::Isolate, "A"),
    ];
    names.sort();
    assert_eq!(
        names,
        vec![
            IsolateName::new(IsolateNameType::Isolate, "A"),
            IsolateName::new(IsolateNameType::Isolate, "B"),
            IsolateName::new(IsolateNameType::Strain, "A"),
        ]
    );
}

#[test]
fn parse_isolate_name_type_invalid() {
    let err = "variant".parse::<IsolateNameType>().unwrap_err();
    assert_matches!(err, RepoError::InvalidIsolateType(value) if value == "variant");
}

#[test]
fn data_type_wire_format() {
    assert_eq!(serde_json::to_value(DataType::Barcode).unwrap(), "barcode");
    assert_eq!(DataType::Genome.to_string(), "genome");
}
