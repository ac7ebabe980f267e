//! Domain types shared across the resolver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{ValidationError, ValidationReason};

/// Allowed deviation of a population's allele frequency sum from 1.
pub const FREQUENCY_SUM_TOLERANCE: f64 = 1e-3;

// ── Identifiers ───────────────────────────────────────────────────────

/// Normalized rsID (`rs` + digits, lowercase prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantIdentifier(String);

impl VariantIdentifier {
    /// Validate and normalize a raw rsID.
    ///
    /// Accepts a case-insensitive `rs` prefix followed by digits, without
    /// leading zeros (a lone `0` is allowed). Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        let fail = |reason| ValidationError {
            reason,
            input: raw.to_string(),
        };

        if trimmed.is_empty() {
            return Err(fail(ValidationReason::Empty));
        }

        let digits = match trimmed.get(..2) {
            Some(prefix) if prefix.eq_ignore_ascii_case("rs") => &trimmed[2..],
            _ => return Err(fail(ValidationReason::Malformed)),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fail(ValidationReason::Malformed));
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(fail(ValidationReason::Malformed));
        }

        Ok(Self(format!("rs{digits}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric part, as used by the dbSNP `refsnp` endpoint.
    pub fn numeric(&self) -> &str {
        &self.0[2..]
    }
}

impl fmt::Display for VariantIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity of whoever issued a request (chat user id, CLI user, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(pub String);

impl RequesterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Upstream record ───────────────────────────────────────────────────

/// One allele's observed frequency within a population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlleleObservation {
    pub allele: String,
    pub frequency: f64,
}

/// Allele observations for one population (dbSNP study).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationAlleles {
    pub label: String,
    pub alleles: Vec<AlleleObservation>,
    /// Total alleles genotyped, when the upstream reports it.
    #[serde(default)]
    pub allele_total: Option<u64>,
}

impl PopulationAlleles {
    pub fn mass(&self) -> f64 {
        self.alleles.iter().map(|a| a.frequency).sum()
    }
}

/// Descriptive metadata carried alongside the frequencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantAnnotation {
    #[serde(default)]
    pub variant_type: Option<String>,
    #[serde(default)]
    pub genes: Vec<String>,
    /// `19`, `X`, `MT`, or the raw sequence id for non-chromosome placements.
    #[serde(default)]
    pub chrom: Option<String>,
    /// 1-based position on the GRCh38 top-level placement.
    #[serde(default)]
    pub position_grch38: Option<u64>,
    #[serde(default)]
    pub hgvs_c: Option<String>,
    #[serde(default)]
    pub hgvs_p: Option<String>,
}

/// Validated upstream data for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVariantRecord {
    pub id: VariantIdentifier,
    pub populations: Vec<PopulationAlleles>,
    #[serde(default)]
    pub annotation: VariantAnnotation,
}

impl RawVariantRecord {
    /// Build and validate a record from `population → {allele → frequency}`.
    pub fn from_population_map(
        id: VariantIdentifier,
        populations: BTreeMap<String, BTreeMap<String, f64>>,
    ) -> Result<Self, String> {
        let populations = populations
            .into_iter()
            .map(|(label, alleles)| PopulationAlleles {
                label,
                alleles: alleles
                    .into_iter()
                    .map(|(allele, frequency)| AlleleObservation { allele, frequency })
                    .collect(),
                allele_total: None,
            })
            .collect();

        let record = Self {
            id,
            populations,
            annotation: VariantAnnotation::default(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Check the frequency invariants. Returns a description of the first
    /// violation found.
    ///
    /// A population with zero total mass passes; the calculator reports it.
    pub fn validate(&self) -> Result<(), String> {
        for pop in &self.populations {
            if pop.label.trim().is_empty() {
                return Err("population with empty label".into());
            }

            let mut seen = HashSet::new();
            for obs in &pop.alleles {
                if obs.allele.is_empty() {
                    return Err(format!("{}: empty allele label", pop.label));
                }
                if !seen.insert(obs.allele.as_str()) {
                    return Err(format!("{}: duplicate allele {}", pop.label, obs.allele));
                }
                if !obs.frequency.is_finite() || !(0.0..=1.0).contains(&obs.frequency) {
                    return Err(format!(
                        "{}: frequency {} for allele {} outside [0,1]",
                        pop.label, obs.frequency, obs.allele
                    ));
                }
            }

            let mass = pop.mass();
            if mass != 0.0 && (mass - 1.0).abs() > FREQUENCY_SUM_TOLERANCE {
                return Err(format!(
                    "{}: allele frequencies sum to {:.6}, expected 1",
                    pop.label, mass
                ));
            }
        }
        Ok(())
    }
}

// ── Computed report ───────────────────────────────────────────────────

/// Hardy–Weinberg genotype class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenotypeClass {
    HomozygousMajor,
    Heterozygous,
    HomozygousMinor,
}

/// One expected genotype, e.g. `TC` with frequency `2pq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenotypeFrequency {
    pub genotype: String,
    pub class: GenotypeClass,
    pub frequency: f64,
}

/// Genotype frequencies summed per class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenotypeRollup {
    pub homozygous_major: f64,
    pub heterozygous: f64,
    pub homozygous_minor: f64,
}

/// Minor allele frequency bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MafCategory {
    UltraRare,
    Rare,
    LowFrequency,
    Common,
}

impl fmt::Display for MafCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MafCategory::UltraRare => "ultra-rare",
            MafCategory::Rare => "rare",
            MafCategory::LowFrequency => "low-frequency",
            MafCategory::Common => "common",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationFrequencies {
    pub label: String,
    /// Observed allele frequencies, major allele first.
    pub alleles: Vec<AlleleObservation>,
    pub genotypes: Vec<GenotypeFrequency>,
    pub rollup: GenotypeRollup,
    pub major_allele: String,
    pub major_allele_frequency: f64,
    pub minor_allele: Option<String>,
    pub minor_allele_frequency: f64,
    pub maf_category: MafCategory,
    /// Individuals sampled (`allele_total / 2`), when known.
    pub sample_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSummary {
    /// Unweighted mean of the included populations' major allele frequency.
    pub mean_major_allele_frequency: Option<f64>,
    pub populations_included: usize,
    pub populations_excluded: Vec<String>,
}

/// Computed frequencies for one identifier. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyReport {
    pub id: VariantIdentifier,
    pub populations: Vec<PopulationFrequencies>,
    pub summary: GlobalSummary,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub annotation: VariantAnnotation,
}

impl FrequencyReport {
    pub fn population(&self, label: &str) -> Option<&PopulationFrequencies> {
        self.populations.iter().find(|p| p.label == label)
    }
}

/// Outcome of resolving one identifier.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub report: Arc<FrequencyReport>,
    /// Served from a fresh cache entry without touching the upstream.
    pub cache_hit: bool,
    /// Refresh failed and a stale report was served instead.
    pub degraded: bool,
}

// ── History ───────────────────────────────────────────────────────────

/// Compact view of a resolution kept in the history journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub populations: usize,
    pub mean_major_allele_frequency: Option<f64>,
    pub cache_hit: bool,
    pub degraded: bool,
}

impl ResultSummary {
    pub fn from_report(report: &FrequencyReport, cache_hit: bool, degraded: bool) -> Self {
        Self {
            populations: report.populations.len(),
            mean_major_allele_frequency: report.summary.mean_major_allele_frequency,
            cache_hit,
            degraded,
        }
    }
}

/// One resolved request. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub requester: RequesterId,
    pub id: VariantIdentifier,
    pub summary: ResultSummary,
    pub recorded_at: DateTime<Utc>,
    /// Submission order; breaks ties between equal timestamps.
    pub seq: u64,
}
