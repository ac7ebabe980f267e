//! Plain-text rendering of reports and history for the terminal.

use common::{FrequencyReport, HistoryRecord, Resolution, ResolveError};
use std::fmt::Write;

pub fn resolution(res: &Resolution) -> String {
    let mut out = report(&res.report);
    if res.degraded {
        out.push_str("\n⚠️  dbSNP is unavailable; showing an older cached report.\n");
    } else if res.cache_hit {
        out.push_str("\n(from cache)\n");
    }
    out
}

pub fn report(report: &FrequencyReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "RESULTS FOR {}", report.id);

    let ann = &report.annotation;
    if ann.variant_type.is_some() || !ann.genes.is_empty() {
        let genes = if ann.genes.is_empty() {
            "-".to_string()
        } else {
            ann.genes.join(", ")
        };
        let _ = writeln!(out, "  Gene(s): {}", genes);
        let _ = writeln!(
            out,
            "  Variant type: {}",
            ann.variant_type.as_deref().unwrap_or("-")
        );
    }
    if let (Some(chrom), Some(pos)) = (&ann.chrom, ann.position_grch38) {
        let _ = writeln!(out, "  Locus (GRCh38): chr{}:{}", chrom, pos);
    }
    if let Some(c) = &ann.hgvs_c {
        let _ = writeln!(out, "  HGVS (c.): {}", c);
    }
    if let Some(p) = &ann.hgvs_p {
        let _ = writeln!(out, "  HGVS (p.): {}", p);
    }
    out.push('\n');

    if report.populations.is_empty() {
        let _ = writeln!(out, "No usable population frequencies for {}.", report.id);
    }

    for pop in &report.populations {
        let _ = writeln!(out, "Population: {}", pop.label);
        if let Some(n) = pop.sample_size {
            let _ = writeln!(out, "  Sample size: {}", n);
        }
        for allele in &pop.alleles {
            let _ = writeln!(out, "  Allele {}: {:.6}", allele.allele, allele.frequency);
        }
        let _ = writeln!(
            out,
            "  MAF: {:.6} ({})",
            pop.minor_allele_frequency, pop.maf_category
        );
        let _ = writeln!(out, "  Expected genotypes (Hardy–Weinberg):");
        for g in &pop.genotypes {
            let _ = writeln!(out, "    {}: {:.6}", g.genotype, g.frequency);
        }
        out.push('\n');
    }

    match report.summary.mean_major_allele_frequency {
        Some(mean) => {
            let _ = writeln!(
                out,
                "Mean major allele frequency over {} populations: {:.6}",
                report.summary.populations_included, mean
            );
        }
        None => {
            let _ = writeln!(out, "No population had usable frequencies.");
        }
    }
    if !report.summary.populations_excluded.is_empty() {
        let _ = writeln!(
            out,
            "Excluded: {}",
            report.summary.populations_excluded.join(", ")
        );
    }
    for warning in &report.warnings {
        let _ = writeln!(out, "⚠️  {}", warning);
    }
    out
}

pub fn failure(raw: &str, err: &ResolveError) -> String {
    use common::FailureCategory::*;
    match err.category() {
        InvalidInput => format!("{raw:?} is not a valid rsID (expected e.g. rs429358)"),
        NotFound => format!("{} was not found in dbSNP", raw.trim()),
        Unavailable => "dbSNP is unavailable right now; try again later".to_string(),
        RateLimited => err.to_string(),
        Internal => format!("Could not process {}: {}", raw.trim(), err),
    }
}

/// Output for one lookup. `ok` is false for failures, whose text goes to
/// stderr unless `json` output was requested.
pub struct Rendered {
    pub text: String,
    pub ok: bool,
}

impl Rendered {
    pub fn print(&self, json: bool) {
        if self.ok || json {
            println!("{}", self.text);
        } else {
            eprintln!("{}", self.text);
        }
    }
}

pub fn outcome(raw: &str, outcome: &Result<Resolution, ResolveError>, json: bool) -> Rendered {
    match outcome {
        Ok(res) if json => {
            let value = serde_json::json!({
                "report": &*res.report,
                "cache_hit": res.cache_hit,
                "degraded": res.degraded,
            });
            match serde_json::to_string_pretty(&value) {
                Ok(text) => Rendered { text, ok: true },
                Err(e) => Rendered {
                    text: serde_json::json!({ "input": raw, "error": e.to_string() }).to_string(),
                    ok: false,
                },
            }
        }
        Ok(res) => Rendered {
            text: resolution(res),
            ok: true,
        },
        Err(e) if json => Rendered {
            text: serde_json::json!({
                "input": raw,
                "error": e.to_string(),
                "category": e.category(),
            })
            .to_string(),
            ok: false,
        },
        Err(e) => Rendered {
            text: failure(raw, e),
            ok: false,
        },
    }
}

pub fn history(records: &[HistoryRecord]) -> String {
    if records.is_empty() {
        return "No requests yet.\n".to_string();
    }
    let mut out = String::new();
    for (i, r) in records.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} ({}){}",
            i + 1,
            r.id,
            r.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            if r.summary.degraded { " [stale]" } else { "" }
        );
    }
    out
}
