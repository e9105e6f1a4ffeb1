//! Results reporting: console tables, JSON summary and CSV summaries

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analysis::{Analysis, CategoryPerformance, LanguagePerformance};
use crate::corpus::Language;
use crate::pipeline::{ExclusionReason, ExclusionSummary, TranslationReport};

pub const SUMMARY_FILE: &str = "summary.json";
pub const OVERALL_CSV: &str = "summary_overall_performance.csv";
pub const DOMAIN_CSV: &str = "summary_domain_performance.csv";
pub const CATEGORY_CSV: &str = "summary_category_analysis.csv";

/// Reporting errors
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// JSON summary export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSummary {
    pub timestamp: String,
    pub scored_file: String,
    pub total_responses: usize,
    pub source_language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_in_source: Option<String>,
    pub greatest_drift: Vec<DriftLeader>,
    pub analysis: Analysis,
}

/// Model drifting furthest from the source language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftLeader {
    pub language: Language,
    pub model: String,
    pub drift_points: f64,
}

impl JsonSummary {
    pub fn from_analysis(analysis: &Analysis, scored_file: impl Into<String>) -> Self {
        let greatest_drift = analysis
            .languages
            .iter()
            .filter(|l| **l != analysis.source_language)
            .filter_map(|language| {
                let leader = analysis.greatest_drift(language)?;
                Some(DriftLeader {
                    language: language.clone(),
                    model: leader.model.clone(),
                    drift_points: leader.composite_drift?,
                })
            })
            .collect();

        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            scored_file: scored_file.into(),
            total_responses: analysis.total_responses,
            source_language: analysis.source_language.clone(),
            best_in_source: analysis.best_in_source().map(|p| p.model.clone()),
            greatest_drift,
            analysis: analysis.clone(),
        }
    }

    /// Write to JSON file
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn opt2(value: Option<f64>) -> Option<f64> {
    value.map(round2)
}

#[derive(Serialize)]
struct OverallRow<'a> {
    model: &'a str,
    language: &'a str,
    responses: usize,
    complete: usize,
    incomplete: usize,
    mean_composite: Option<f64>,
    composite_drift_pts: Option<f64>,
    rubric_pct: Option<f64>,
    rubric_drift_pts: Option<f64>,
    accuracy_pct: f64,
}

impl<'a> From<&'a LanguagePerformance> for OverallRow<'a> {
    fn from(p: &'a LanguagePerformance) -> Self {
        Self {
            model: &p.model,
            language: p.language.as_str(),
            responses: p.stats.responses,
            complete: p.stats.complete,
            incomplete: p.stats.incomplete,
            mean_composite: opt2(p.stats.mean_composite),
            composite_drift_pts: opt2(p.composite_drift),
            rubric_pct: opt2(p.stats.rubric_percent),
            rubric_drift_pts: opt2(p.rubric_drift),
            accuracy_pct: round2(p.stats.accuracy_percent),
        }
    }
}

#[derive(Serialize)]
struct DomainRow<'a> {
    model: &'a str,
    domain: &'static str,
    language: &'a str,
    responses: usize,
    mean_composite: Option<f64>,
    composite_drift_pts: Option<f64>,
    rubric_pct: Option<f64>,
    rubric_drift_pts: Option<f64>,
}

impl<'a> From<&'a CategoryPerformance> for DomainRow<'a> {
    fn from(c: &'a CategoryPerformance) -> Self {
        Self {
            model: &c.model,
            domain: c.category.as_str(),
            language: c.language.as_str(),
            responses: c.stats.responses,
            mean_composite: opt2(c.stats.mean_composite),
            composite_drift_pts: opt2(c.composite_drift),
            rubric_pct: opt2(c.stats.rubric_percent),
            rubric_drift_pts: opt2(c.rubric_drift),
        }
    }
}

#[derive(Serialize)]
struct CategoryRow<'a> {
    model: &'a str,
    language: &'a str,
    kind: &'static str,
    category: &'static str,
    percent: f64,
}

/// Write the three CSV summaries into `dir`
pub fn write_csv_summaries(analysis: &Analysis, dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
    let overall_path = dir.join(OVERALL_CSV);
    let mut writer = csv::Writer::from_path(&overall_path)?;
    for performance in &analysis.overall {
        writer.serialize(OverallRow::from(performance))?;
    }
    writer.flush()?;

    let domain_path = dir.join(DOMAIN_CSV);
    let mut writer = csv::Writer::from_path(&domain_path)?;
    for performance in &analysis.by_category {
        writer.serialize(DomainRow::from(performance))?;
    }
    writer.flush()?;

    let category_path = dir.join(CATEGORY_CSV);
    let mut writer = csv::Writer::from_path(&category_path)?;
    for fp in &analysis.fingerprints {
        for (label, percent) in &fp.labels {
            writer.serialize(CategoryRow {
                model: &fp.model,
                language: fp.language.as_str(),
                kind: "label",
                category: label.as_str(),
                percent: round2(*percent),
            })?;
        }
        for (category, percent) in &fp.rubric_categories {
            writer.serialize(CategoryRow {
                model: &fp.model,
                language: fp.language.as_str(),
                kind: "rubric",
                category: category.as_str(),
                percent: round2(*percent),
            })?;
        }
    }
    writer.flush()?;

    Ok(vec![overall_path, domain_path, category_path])
}

/// Write `summary.json` and the CSV summaries into a new directory
pub fn write_reports(
    analysis: &Analysis,
    scored_file: &Path,
    dir: &Path,
) -> Result<Vec<PathBuf>, ReportError> {
    std::fs::create_dir(dir)?;

    let summary_path = dir.join(SUMMARY_FILE);
    JsonSummary::from_analysis(analysis, scored_file.display().to_string())
        .write_to_file(&summary_path)?;

    let mut written = vec![summary_path];
    written.extend(write_csv_summaries(analysis, dir)?);
    Ok(written)
}

fn fmt_opt(value: Option<f64>, suffix: &str) -> String {
    value
        .map(|v| format!("{:.2}{}", v, suffix))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Generate a console report
pub fn print_console_report(analysis: &Analysis) {
    println!("\n=== Multilingual Evaluation Results ===\n");
    println!("Total responses analysed: {}\n", analysis.total_responses);

    println!("Performance by Model and Language:");
    println!("{:-<50}", "");
    for model in &analysis.models {
        println!("  {}:", model);
        for p in analysis.overall.iter().filter(|p| &p.model == model) {
            println!(
                "    {}: composite {}, rubric {}, drift {} ({} scored, {} incomplete)",
                p.language,
                fmt_opt(p.stats.mean_composite, ""),
                fmt_opt(p.stats.rubric_percent, "%"),
                fmt_opt(p.composite_drift, " pts"),
                p.stats.complete,
                p.stats.incomplete
            );
        }
    }

    if let Some(best) = analysis.best_in_source() {
        println!(
            "\nHighest score ({}): {} ({})",
            analysis.source_language,
            best.model,
            fmt_opt(best.stats.mean_composite, "")
        );
    }
    for language in analysis
        .languages
        .iter()
        .filter(|l| **l != analysis.source_language)
    {
        if let Some(drift) = analysis.greatest_drift(language) {
            println!(
                "Greatest drift ({}): {} ({})",
                language,
                drift.model,
                fmt_opt(drift.composite_drift, " pts")
            );
        }
    }

    if !analysis.fingerprints.is_empty() {
        println!("\nSafety Fingerprint:");
        println!("{:-<50}", "");
        for fp in &analysis.fingerprints {
            let labels: Vec<String> = fp
                .labels
                .iter()
                .map(|(label, pct)| format!("{} {:.1}%", label.as_str(), pct))
                .collect();
            println!("  {} [{}]: {}", fp.model, fp.language, labels.join(", "));
        }
    }

    println!("\n{:=<50}", "");
}

/// Print the per-language outcome of the translation stage
pub fn print_translation_report(reports: &[TranslationReport]) {
    println!("\nTranslation Quality Gate:");
    println!("{:-<50}", "");
    for report in reports {
        println!(
            "  {}: {} passed / {} failed (mean fidelity {})",
            report.language,
            report.passed,
            report.failed,
            fmt_opt(report.mean_fidelity, "")
        );
        for (kind, count) in &report.failures {
            println!("    {}: {}", kind, count);
        }
    }
}

/// Print what the scoring stage could not judge
pub fn print_exclusion_summary(summary: &ExclusionSummary) {
    println!("\nScoring Summary:");
    println!("{:-<50}", "");
    println!("  Records:    {}", summary.total_records);
    println!("  Scored:     {}", summary.scored);
    println!("  Incomplete: {}", summary.incomplete.len());
    for reason in [
        ExclusionReason::FailedQuery,
        ExclusionReason::MissingQuestion,
        ExclusionReason::UnvalidatedTranslation,
        ExclusionReason::ProvenanceMismatch,
    ] {
        let count = summary.count(reason);
        if count > 0 {
            println!("  Excluded ({:?}): {}", reason, count);
        }
    }
}
