//! Allele-to-genotype frequency calculation.
//!
//! Turns validated dbSNP allele frequencies into Hardy–Weinberg expected
//! genotype frequencies per population, plus a cross-population summary.
//! Pure and deterministic: no clock, no I/O.

use common::{
    AlleleObservation, ComputationError, FrequencyReport, GenotypeClass, GenotypeFrequency,
    GenotypeRollup, GlobalSummary, MafCategory, PopulationAlleles, PopulationFrequencies,
    RawVariantRecord,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Genotype frequencies of one population must sum to 1 within this bound.
pub const GENOTYPE_SUM_TOLERANCE: f64 = 1e-6;

// ── Main API ──────────────────────────────────────────────────────────

/// Compute the frequency report for a validated record.
///
/// Populations with zero total allele frequency are excluded and listed in
/// `warnings`. Fails only when a frequency is negative or not finite, or the
/// genotype self-check does not hold, both of which indicate a bug upstream
/// of this function.
pub fn compute(record: &RawVariantRecord) -> Result<FrequencyReport, ComputationError> {
    let mut populations = Vec::with_capacity(record.populations.len());
    let mut excluded = Vec::new();
    let mut warnings = Vec::new();

    for pop in &record.populations {
        check_frequencies(pop)?;

        let mass = pop.mass();
        if mass <= 0.0 {
            warnings.push(format!(
                "Population {} reports zero total allele frequency and was excluded.",
                pop.label
            ));
            excluded.push(pop.label.clone());
            continue;
        }

        populations.push(population_frequencies(pop, mass)?);
    }

    if let Some(warning) = minor_allele_flip(&populations) {
        warnings.push(warning);
    }

    let mean_major_allele_frequency = if populations.is_empty() {
        None
    } else {
        let total: f64 = populations.iter().map(|p| p.major_allele_frequency).sum();
        Some(total / populations.len() as f64)
    };

    debug!(
        "{}: {} populations included, {} excluded, mean major AF {:?}",
        record.id,
        populations.len(),
        excluded.len(),
        mean_major_allele_frequency
    );

    Ok(FrequencyReport {
        id: record.id.clone(),
        summary: GlobalSummary {
            mean_major_allele_frequency,
            populations_included: populations.len(),
            populations_excluded: excluded,
        },
        populations,
        warnings,
        annotation: record.annotation.clone(),
    })
}

/// Hardy–Weinberg genotype frequencies for the given allele frequencies.
///
/// Frequencies must already be normalized and ordered major allele first.
/// Homozygous `i` gets `p_i²`, heterozygous `(i, j)` gets `2·p_i·p_j`.
pub fn hardy_weinberg(alleles: &[AlleleObservation]) -> Vec<GenotypeFrequency> {
    let mut genotypes = Vec::with_capacity(alleles.len() * (alleles.len() + 1) / 2);

    for (i, a) in alleles.iter().enumerate() {
        for (j, b) in alleles.iter().enumerate().skip(i) {
            let (class, frequency) = if i == j {
                let class = if i == 0 {
                    GenotypeClass::HomozygousMajor
                } else {
                    GenotypeClass::HomozygousMinor
                };
                (class, a.frequency * a.frequency)
            } else {
                (GenotypeClass::Heterozygous, 2.0 * a.frequency * b.frequency)
            };

            genotypes.push(GenotypeFrequency {
                genotype: format!("{}{}", a.allele, b.allele),
                class,
                frequency,
            });
        }
    }

    genotypes
}

/// Bucket a minor allele frequency.
pub fn maf_category(maf: f64) -> MafCategory {
    if maf < 0.001 {
        MafCategory::UltraRare
    } else if maf < 0.01 {
        MafCategory::Rare
    } else if maf < 0.05 {
        MafCategory::LowFrequency
    } else {
        MafCategory::Common
    }
}

// ── Internal Helpers ──────────────────────────────────────────────────

fn check_frequencies(pop: &PopulationAlleles) -> Result<(), ComputationError> {
    for obs in &pop.alleles {
        if !obs.frequency.is_finite() || obs.frequency < 0.0 {
            return Err(ComputationError(format!(
                "population {} allele {} has frequency {}",
                pop.label, obs.allele, obs.frequency
            )));
        }
    }
    Ok(())
}

fn population_frequencies(
    pop: &PopulationAlleles,
    mass: f64,
) -> Result<PopulationFrequencies, ComputationError> {
    let mut observed = pop.alleles.clone();
    observed.sort_by(|a, b| {
        b.frequency
            .total_cmp(&a.frequency)
            .then_with(|| a.allele.cmp(&b.allele))
    });

    // Input sums are within the record tolerance of 1; genotypes use the
    // rescaled frequencies so the self-check can hold at 1e-6.
    let normalized: Vec<AlleleObservation> = observed
        .iter()
        .map(|a| AlleleObservation {
            allele: a.allele.clone(),
            frequency: a.frequency / mass,
        })
        .collect();

    let genotypes = hardy_weinberg(&normalized);

    let genotype_sum: f64 = genotypes.iter().map(|g| g.frequency).sum();
    if (genotype_sum - 1.0).abs() > GENOTYPE_SUM_TOLERANCE {
        return Err(ComputationError(format!(
            "population {} genotype frequencies sum to {:.9}",
            pop.label, genotype_sum
        )));
    }

    let mut rollup = GenotypeRollup::default();
    for g in &genotypes {
        match g.class {
            GenotypeClass::HomozygousMajor => rollup.homozygous_major += g.frequency,
            GenotypeClass::Heterozygous => rollup.heterozygous += g.frequency,
            GenotypeClass::HomozygousMinor => rollup.homozygous_minor += g.frequency,
        }
    }

    let major = &normalized[0];
    let minor = normalized.get(1);
    let minor_allele_frequency = minor.map(|m| m.frequency).unwrap_or(0.0);

    Ok(PopulationFrequencies {
        label: pop.label.clone(),
        alleles: observed,
        genotypes,
        rollup,
        major_allele: major.allele.clone(),
        major_allele_frequency: major.frequency,
        minor_allele: minor.map(|m| m.allele.clone()),
        minor_allele_frequency,
        maf_category: maf_category(minor_allele_frequency),
        sample_size: pop.allele_total.map(|n| n / 2),
    })
}

fn minor_allele_flip(populations: &[PopulationFrequencies]) -> Option<String> {
    let minors: BTreeSet<&str> = populations
        .iter()
        .filter_map(|p| p.minor_allele.as_deref())
        .collect();

    if minors.len() > 1 {
        Some(format!(
            "Minor allele differs between populations ({}); possible allele flip between cohorts.",
            minors.into_iter().collect::<Vec<_>>().join(", ")
        ))
    } else {
        None
    }
}
