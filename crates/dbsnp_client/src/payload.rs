//! dbSNP `refsnp` response types and conversion into [`RawVariantRecord`].
//!
//! Frequencies come from
//! `primary_snapshot_data.allele_annotations[*].frequency[*]`, one entry per
//! (study, allele) with `allele_count / total_count` as the frequency.
//! Locus and HGVS names come from `placements_with_allele`.

use common::{
    AlleleObservation, FetchError, PopulationAlleles, RawVariantRecord, VariantAnnotation,
    VariantIdentifier,
};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

// ── dbSNP response types ──────────────────────────────────────────────

/// Response from `/refsnp/{id}`.
#[derive(Debug, Deserialize)]
pub struct RefSnpResponse {
    #[serde(default)]
    pub refsnp_id: Option<String>,
    #[serde(default)]
    pub primary_snapshot_data: Option<PrimarySnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct PrimarySnapshot {
    #[serde(default)]
    pub variant_type: Option<String>,
    #[serde(default)]
    pub placements_with_allele: Vec<Placement>,
    #[serde(default)]
    pub allele_annotations: Vec<AlleleAnnotation>,
}

/// One placement of the variant on a reference sequence.
#[derive(Debug, Deserialize)]
pub struct Placement {
    /// Placement on the top-level assembly sequence.
    #[serde(default)]
    pub is_ptlp: bool,
    #[serde(default)]
    pub placement_annot: Option<PlacementAnnot>,
    #[serde(default)]
    pub alleles: Vec<PlacementAllele>,
}

#[derive(Debug, Deserialize)]
pub struct PlacementAnnot {
    #[serde(default)]
    pub seq_id_traits_by_assembly: Vec<AssemblyTraits>,
}

#[derive(Debug, Deserialize)]
pub struct AssemblyTraits {
    #[serde(default)]
    pub assembly_name: String,
}

#[derive(Debug, Deserialize)]
pub struct PlacementAllele {
    #[serde(default)]
    pub allele: Option<PlacedAllele>,
    #[serde(default)]
    pub hgvs: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlacedAllele {
    #[serde(default)]
    pub spdi: Option<Spdi>,
}

/// SPDI coordinates; `position` is 0-based.
#[derive(Debug, Deserialize)]
pub struct Spdi {
    #[serde(default)]
    pub seq_id: Option<String>,
    #[serde(default)]
    pub position: Option<u64>,
}

impl Placement {
    fn is_grch38(&self) -> bool {
        self.placement_annot.as_ref().is_some_and(|annot| {
            annot
                .seq_id_traits_by_assembly
                .iter()
                .any(|t| t.assembly_name.contains("GRCh38"))
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AlleleAnnotation {
    #[serde(default)]
    pub frequency: Vec<StudyFrequency>,
    #[serde(default)]
    pub assembly_annotation: Vec<AssemblyAnnotation>,
}

/// Allele count observed by one study. Entries without both counts are
/// skipped during conversion.
#[derive(Debug, Deserialize)]
pub struct StudyFrequency {
    pub study_name: String,
    #[serde(default)]
    pub allele_count: Option<u64>,
    #[serde(default)]
    pub total_count: Option<u64>,
    pub observation: Observation,
}

#[derive(Debug, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub deleted_sequence: String,
    #[serde(default)]
    pub inserted_sequence: String,
}

#[derive(Debug, Deserialize)]
pub struct AssemblyAnnotation {
    #[serde(default)]
    pub genes: Vec<Gene>,
}

#[derive(Debug, Deserialize)]
pub struct Gene {
    #[serde(default)]
    pub locus: Option<String>,
}

// ── Conversion ────────────────────────────────────────────────────────

/// Parse and validate a raw response body.
pub fn parse_refsnp(id: &VariantIdentifier, body: &str) -> Result<RawVariantRecord, FetchError> {
    let response: RefSnpResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::invalid_data(format!("{id}: malformed refsnp payload: {e}")))?;

    if let Some(refsnp_id) = response.refsnp_id.as_deref() {
        if refsnp_id != id.numeric() {
            return Err(FetchError::invalid_data(format!(
                "{id}: payload is for refsnp {refsnp_id}"
            )));
        }
    }

    let record = into_record(id, response);
    record
        .validate()
        .map_err(|e| FetchError::invalid_data(format!("{id}: {e}")))?;
    Ok(record)
}

/// Accumulated counts for one study while walking the annotations.
struct StudyCounts {
    label: String,
    reference: Option<String>,
    total: u64,
    alleles: Vec<(String, u64)>,
}

fn sequence_label(seq: &str) -> String {
    if seq.is_empty() {
        "-".to_string()
    } else {
        seq.to_string()
    }
}

/// Group per-allele study entries into populations.
///
/// A study that lists only alternate alleles gets its reference allele
/// filled in as `1 - Σ alt`. Studies with `total_count == 0` become
/// zero-mass populations.
pub fn into_record(id: &VariantIdentifier, response: RefSnpResponse) -> RawVariantRecord {
    let Some(primary) = response.primary_snapshot_data else {
        return RawVariantRecord {
            id: id.clone(),
            populations: Vec::new(),
            annotation: VariantAnnotation::default(),
        };
    };

    let mut studies: Vec<StudyCounts> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut genes: Vec<String> = Vec::new();

    for ann in &primary.allele_annotations {
        for freq in &ann.frequency {
            let (Some(allele_count), Some(total_count)) = (freq.allele_count, freq.total_count)
            else {
                debug!("{}: skipping {} entry without counts", id, freq.study_name);
                continue;
            };
            let slot = *index.entry(freq.study_name.clone()).or_insert_with(|| {
                studies.push(StudyCounts {
                    label: freq.study_name.clone(),
                    reference: None,
                    total: total_count,
                    alleles: Vec::new(),
                });
                studies.len() - 1
            });
            let study = &mut studies[slot];

            if study.reference.is_none() {
                study.reference = Some(sequence_label(&freq.observation.deleted_sequence));
            }
            let allele = sequence_label(&freq.observation.inserted_sequence);
            if !study.alleles.iter().any(|(a, _)| *a == allele) {
                study.alleles.push((allele, allele_count));
            }
        }

        for gene in ann.assembly_annotation.iter().flat_map(|a| &a.genes) {
            if let Some(locus) = gene.locus.as_deref() {
                if !locus.is_empty() && !genes.iter().any(|g| g == locus) {
                    genes.push(locus.to_string());
                }
            }
        }
    }

    let populations = studies.into_iter().map(study_population).collect();
    let locus = grch38_locus(&primary.placements_with_allele);
    let (hgvs_c, hgvs_p) = hgvs_names(&primary.placements_with_allele);

    RawVariantRecord {
        id: id.clone(),
        populations,
        annotation: VariantAnnotation {
            variant_type: primary.variant_type,
            genes,
            chrom: locus.as_ref().map(|(chrom, _)| chrom.clone()),
            position_grch38: locus.map(|(_, pos)| pos),
            hgvs_c,
            hgvs_p,
        },
    }
}

/// Chromosome and 1-based position from the first GRCh38 top-level placement.
fn grch38_locus(placements: &[Placement]) -> Option<(String, u64)> {
    placements
        .iter()
        .filter(|p| p.is_ptlp && p.is_grch38())
        .find_map(|p| {
            let spdi = p.alleles.first()?.allele.as_ref()?.spdi.as_ref()?;
            let seq_id = spdi.seq_id.as_deref()?;
            let position = spdi.position?;
            Some((chromosome_name(seq_id), position + 1))
        })
}

/// `NC_000019.10` -> `19`; anything that is not a RefSeq chromosome
/// accession is returned unchanged.
fn chromosome_name(seq_id: &str) -> String {
    let accession = seq_id.split('.').next().unwrap_or(seq_id);
    match accession.strip_prefix("NC_").and_then(|n| n.parse::<u32>().ok()) {
        Some(n @ 1..=22) => n.to_string(),
        Some(23) => "X".to_string(),
        Some(24) => "Y".to_string(),
        Some(12920) => "MT".to_string(),
        _ => seq_id.to_string(),
    }
}

/// First coding (`c.`) and protein (`p.`) HGVS names, skipping
/// reference-allele forms such as `NM_000041.4:c.388=`.
fn hgvs_names(placements: &[Placement]) -> (Option<String>, Option<String>) {
    let mut coding = None;
    let mut protein = None;
    let names = placements
        .iter()
        .flat_map(|p| &p.alleles)
        .filter_map(|a| a.hgvs.as_deref())
        .filter(|h| !h.ends_with('='));
    for name in names {
        if coding.is_none() && name.contains(":c.") {
            coding = Some(name.to_string());
        }
        if protein.is_none() && name.contains(":p.") {
            protein = Some(name.to_string());
        }
    }
    (coding, protein)
}

fn study_population(study: StudyCounts) -> PopulationAlleles {
    if study.total == 0 {
        return PopulationAlleles {
            label: study.label,
            alleles: study
                .alleles
                .into_iter()
                .map(|(allele, _)| AlleleObservation {
                    allele,
                    frequency: 0.0,
                })
                .collect(),
            allele_total: Some(0),
        };
    }

    let total = study.total as f64;
    let mut alleles: Vec<AlleleObservation> = study
        .alleles
        .iter()
        .map(|(allele, count)| AlleleObservation {
            allele: allele.clone(),
            frequency: *count as f64 / total,
        })
        .collect();

    if let Some(reference) = study.reference {
        if !alleles.iter().any(|a| a.allele == reference) {
            let observed: f64 = alleles.iter().map(|a| a.frequency).sum();
            if observed <= 1.0 {
                alleles.push(AlleleObservation {
                    allele: reference,
                    frequency: 1.0 - observed,
                });
            }
        }
    }

    PopulationAlleles {
        label: study.label,
        alleles,
        allele_total: Some(study.total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FetchErrorKind;

    fn rs429358() -> VariantIdentifier {
        VariantIdentifier::parse("rs429358").unwrap()
    }

    fn sample_response() -> &'static str {
        r#"{
            "refsnp_id": "429358",
            "primary_snapshot_data": {
                "variant_type": "snv",
                "placements_with_allele": [
                    {
                        "seq_id": "NC_000019.9",
                        "is_ptlp": false,
                        "placement_annot": {"seq_id_traits_by_assembly": [{"assembly_name": "GRCh37.p13"}]},
                        "alleles": [
                            {"allele": {"spdi": {"seq_id": "NC_000019.9", "position": 45411940}}, "hgvs": "NC_000019.9:g.45411941="}
                        ]
                    },
                    {
                        "seq_id": "NC_000019.10",
                        "is_ptlp": true,
                        "placement_annot": {"seq_id_traits_by_assembly": [{"assembly_name": "GRCh38.p14", "is_chromosome": true}]},
                        "alleles": [
                            {"allele": {"spdi": {"seq_id": "NC_000019.10", "position": 44908683, "deleted_sequence": "T", "inserted_sequence": "T"}}, "hgvs": "NC_000019.10:g.44908684="},
                            {"allele": {"spdi": {"seq_id": "NC_000019.10", "position": 44908683, "deleted_sequence": "T", "inserted_sequence": "C"}}, "hgvs": "NC_000019.10:g.44908684T>C"}
                        ]
                    },
                    {
                        "seq_id": "NM_000041.4",
                        "is_ptlp": false,
                        "placement_annot": {"seq_id_traits_by_assembly": []},
                        "alleles": [
                            {"allele": {"spdi": {"seq_id": "NM_000041.4", "position": 525}}, "hgvs": "NM_000041.4:c.388="},
                            {"allele": {"spdi": {"seq_id": "NM_000041.4", "position": 525}}, "hgvs": "NM_000041.4:c.388T>C"}
                        ]
                    },
                    {
                        "seq_id": "NP_000032.1",
                        "is_ptlp": false,
                        "alleles": [
                            {"allele": {"spdi": {"seq_id": "NP_000032.1", "position": 129}}, "hgvs": "NP_000032.1:p.Cys130="},
                            {"allele": {"spdi": {"seq_id": "NP_000032.1", "position": 129}}, "hgvs": "NP_000032.1:p.Cys130Arg"}
                        ]
                    }
                ],
                "allele_annotations": [
                    {
                        "frequency": [
                            {
                                "study_name": "1000Genomes",
                                "study_version": 1,
                                "observation": {"seq_id": "NC_000019.10", "position": 44908683, "deleted_sequence": "T", "inserted_sequence": "T"},
                                "allele_count": 4257,
                                "total_count": 5008
                            }
                        ],
                        "assembly_annotation": [
                            {"seq_id": "NC_000019.10", "genes": [{"locus": "APOE", "id": 348}]}
                        ]
                    },
                    {
                        "frequency": [
                            {
                                "study_name": "1000Genomes",
                                "observation": {"deleted_sequence": "T", "inserted_sequence": "C"},
                                "allele_count": 751,
                                "total_count": 5008
                            },
                            {
                                "study_name": "GnomAD",
                                "observation": {"deleted_sequence": "T", "inserted_sequence": "C"},
                                "allele_count": 300,
                                "total_count": 2000
                            },
                            {
                                "study_name": "Vietnamese",
                                "observation": {"deleted_sequence": "T", "inserted_sequence": "C"},
                                "allele_count": 0,
                                "total_count": 0
                            }
                        ],
                        "assembly_annotation": [
                            {"genes": [{"locus": "APOE"}, {"locus": "APOC1"}]}
                        ]
                    }
                ]
            }
        }"#
    }

    fn freq(pop: &PopulationAlleles, allele: &str) -> f64 {
        pop.alleles
            .iter()
            .find(|a| a.allele == allele)
            .unwrap_or_else(|| panic!("allele {allele} missing in {}", pop.label))
            .frequency
    }

    #[test]
    fn test_parse_groups_alleles_by_study() {
        let record = parse_refsnp(&rs429358(), sample_response()).expect("payload should parse");

        assert_eq!(record.populations.len(), 3);
        let kg = &record.populations[0];
        assert_eq!(kg.label, "1000Genomes");
        assert_eq!(kg.allele_total, Some(5008));
        assert!((freq(kg, "T") - 4257.0 / 5008.0).abs() < 1e-12);
        assert!((freq(kg, "C") - 751.0 / 5008.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_reference_is_filled_from_remainder() {
        let record = parse_refsnp(&rs429358(), sample_response()).unwrap();
        let gnomad = record.populations.iter().find(|p| p.label == "GnomAD").unwrap();

        assert!((freq(gnomad, "C") - 0.15).abs() < 1e-12);
        assert!((freq(gnomad, "T") - 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_zero_total_study_becomes_zero_mass() {
        let record = parse_refsnp(&rs429358(), sample_response()).unwrap();
        let viet = record.populations.iter().find(|p| p.label == "Vietnamese").unwrap();
        assert_eq!(viet.mass(), 0.0);
    }

    #[test]
    fn test_annotation_extracted() {
        let record = parse_refsnp(&rs429358(), sample_response()).unwrap();
        assert_eq!(record.annotation.variant_type.as_deref(), Some("snv"));
        assert_eq!(record.annotation.genes, vec!["APOE".to_string(), "APOC1".to_string()]);
    }

    #[test]
    fn test_locus_taken_from_grch38_top_level_placement() {
        let record = parse_refsnp(&rs429358(), sample_response()).unwrap();
        let ann = &record.annotation;
        assert_eq!(ann.chrom.as_deref(), Some("19"));
        assert_eq!(ann.position_grch38, Some(44908684));
        assert_eq!(ann.hgvs_c.as_deref(), Some("NM_000041.4:c.388T>C"));
        assert_eq!(ann.hgvs_p.as_deref(), Some("NP_000032.1:p.Cys130Arg"));
    }

    #[test]
    fn test_chromosome_names() {
        assert_eq!(chromosome_name("NC_000001.11"), "1");
        assert_eq!(chromosome_name("NC_000023.11"), "X");
        assert_eq!(chromosome_name("NC_000024.10"), "Y");
        assert_eq!(chromosome_name("NC_012920.1"), "MT");
        assert_eq!(chromosome_name("NT_187633.1"), "NT_187633.1");
    }

    #[test]
    fn test_no_grch38_placement_leaves_locus_empty() {
        let body = r#"{
            "primary_snapshot_data": {
                "placements_with_allele": [
                    {
                        "is_ptlp": true,
                        "placement_annot": {"seq_id_traits_by_assembly": [{"assembly_name": "GRCh37.p13"}]},
                        "alleles": [{"allele": {"spdi": {"seq_id": "NC_000019.9", "position": 45411940}}}]
                    }
                ],
                "allele_annotations": []
            }
        }"#;
        let record = parse_refsnp(&rs429358(), body).unwrap();
        assert_eq!(record.annotation.chrom, None);
        assert_eq!(record.annotation.position_grch38, None);
        assert_eq!(record.annotation.hgvs_c, None);
    }

    #[test]
    fn test_entries_without_counts_are_skipped() {
        let body = r#"{
            "primary_snapshot_data": {"allele_annotations": [
                {"frequency": [
                    {"study_name": "TOPMED", "observation": {"deleted_sequence": "C", "inserted_sequence": "T"}, "allele_count": 20, "total_count": 100},
                    {"study_name": "ALFA", "observation": {"deleted_sequence": "C", "inserted_sequence": "T"}, "total_count": 50},
                    {"study_name": "KOREAN", "observation": {"deleted_sequence": "C", "inserted_sequence": "T"}, "allele_count": null, "total_count": null}
                ]}
            ]}
        }"#;
        let record = parse_refsnp(&rs429358(), body).expect("incomplete rows should not fail the payload");

        assert_eq!(record.populations.len(), 1);
        let topmed = &record.populations[0];
        assert_eq!(topmed.label, "TOPMED");
        assert!((freq(topmed, "T") - 0.2).abs() < 1e-12);
        assert!((freq(topmed, "C") - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_malformed_json_is_invalid_data() {
        let err = parse_refsnp(&rs429358(), "{not json").unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::InvalidData);
    }

    #[test]
    fn test_shape_mismatch_is_invalid_data() {
        let body = r#"{"primary_snapshot_data": {"allele_annotations": [{"frequency": [{"study_name": "X", "allele_count": "many"}]}]}}"#;
        let err = parse_refsnp(&rs429358(), body).unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::InvalidData);
    }

    #[test]
    fn test_counts_exceeding_total_are_rejected() {
        let body = r#"{
            "primary_snapshot_data": {"allele_annotations": [
                {"frequency": [
                    {"study_name": "S", "observation": {"deleted_sequence": "A", "inserted_sequence": "A"}, "allele_count": 90, "total_count": 100},
                    {"study_name": "S", "observation": {"deleted_sequence": "A", "inserted_sequence": "G"}, "allele_count": 40, "total_count": 100}
                ]}
            ]}
        }"#;
        let err = parse_refsnp(&rs429358(), body).unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::InvalidData);
        assert!(err.message.contains("sum"));
    }

    #[test]
    fn test_mismatched_refsnp_id_is_rejected() {
        let body = r#"{"refsnp_id": "7412", "primary_snapshot_data": {"allele_annotations": []}}"#;
        let err = parse_refsnp(&rs429358(), body).unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::InvalidData);
    }

    #[test]
    fn test_missing_snapshot_yields_empty_record() {
        let record = parse_refsnp(&rs429358(), r#"{"refsnp_id": "429358"}"#).unwrap();
        assert!(record.populations.is_empty());
    }
}
