//! CLI output formatting: run summary table, `available` listing and the
//! chapter progress bar.

use std::collections::BTreeSet;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use yomi_core::registry::CatalogEntry;
use yomi_core::{
    ChapterDescriptor, ChapterReport, ChapterStatus, RunObserver, RunSummary, SeriesTarget,
};

/// Listed first by `yomi available` when the feed has them.
pub const FEATURED_SERIES: [&str; 24] = [
    "one-piece",
    "bleach",
    "naruto",
    "dragon-ball",
    "hunter-x-hunter",
    "jujutsu-kaisen",
    "chainsaw-man",
    "demon-slayer-kimetsu-no-yaiba",
    "my-hero-academia",
    "berserk",
    "vagabond",
    "vinland-saga",
    "kingdom",
    "monster",
    "20th-century-boys",
    "oyasumi-punpun",
    "tokyo-ghoul",
    "gantz",
    "one-punch-man",
    "spy-x-family",
    "blue-lock",
    "dandadan",
    "sakamoto-days",
    "frieren-at-the-funeral",
];

/// Size of the default `available` listing.
pub const FEATURED_LIMIT: usize = 24;

/// Returns terminal width from COLUMNS, or 80 if unset/invalid.
pub fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|width| *width >= 20)
        .unwrap_or(80)
}

/// Truncates text to at most `width` chars, appending ellipsis if truncated.
pub fn truncate_to_width(text: &str, width: usize) -> String {
    let text_len = text.chars().count();
    if text_len <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    if width == 1 {
        return "…".to_string();
    }
    let mut output: String = text.chars().take(width - 1).collect();
    output.push('…');
    output
}

/// Featured entries first, topped up from the rest, sorted by key.
pub fn featured_entries(entries: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
    let featured: BTreeSet<&str> = FEATURED_SERIES.into_iter().collect();
    let (mut picked, rest): (Vec<CatalogEntry>, Vec<CatalogEntry>) = entries
        .into_iter()
        .partition(|entry| featured.contains(entry.key.as_str()));
    picked.truncate(FEATURED_LIMIT);
    let room = FEATURED_LIMIT - picked.len();
    picked.extend(rest.into_iter().take(room));
    picked.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.site_id.cmp(&b.site_id)));
    picked
}

/// Renders catalog entries as aligned `key  name  domain` rows.
pub fn catalog_lines(entries: &[CatalogEntry], width: usize) -> Vec<String> {
    let key_width = entries.iter().map(|e| e.key.chars().count()).max().unwrap_or(0);
    let name_width = entries
        .iter()
        .map(|e| e.name.chars().count())
        .max()
        .unwrap_or(0)
        .min(32);
    entries
        .iter()
        .map(|entry| {
            let name = truncate_to_width(&entry.name, name_width);
            let row = format!(
                "{:<key_width$}  {:<name_width$}  {}",
                entry.key, name, entry.domain
            );
            truncate_to_width(row.trim_end(), width)
        })
        .collect()
}

/// Prints the `available` listing.
pub fn print_catalog(title: &str, entries: &[CatalogEntry]) {
    println!("{title} ({})", entries.len());
    for line in catalog_lines(entries, terminal_width()) {
        println!("  {line}");
    }
}

fn status_label(report: &ChapterReport) -> String {
    match report.status {
        ChapterStatus::Complete | ChapterStatus::Failed | ChapterStatus::Skipped => {
            report.status.label().to_string()
        }
        ChapterStatus::Partial => format!(
            "{} ({}/{})",
            report.status.label(),
            report.pages_written,
            report.pages_total
        ),
    }
}

/// Formats the per-chapter summary table and the closing totals line.
pub fn summary_lines(summary: &RunSummary, width: usize) -> Vec<String> {
    let mut lines = vec![format!(
        "{} [{}] {} of {} chapters selected",
        summary.series,
        summary.site_id,
        summary.chapters.len(),
        summary.chapters_available
    )];
    if summary.chapters.is_empty() {
        lines.push("  No chapters in the requested range.".to_string());
        return lines;
    }

    let number_width = summary
        .chapters
        .iter()
        .map(|c| number_label(c.sequence).len())
        .max()
        .unwrap_or(1);
    for report in &summary.chapters {
        let mut row = format!(
            "  {:>number_width$}  {:<16}",
            number_label(report.sequence),
            status_label(report)
        );
        if let Some(path) = &report.path {
            row.push_str(&format!("  {}", path.display()));
        }
        if let Some(reason) = &report.reason
            && report.status != ChapterStatus::Complete
        {
            row.push_str(&format!("  {reason}"));
        }
        lines.push(truncate_to_width(row.trim_end(), width));
    }

    let mut totals = format!(
        "{} complete, {} partial, {} failed, {} skipped",
        summary.count(ChapterStatus::Complete),
        summary.count(ChapterStatus::Partial),
        summary.count(ChapterStatus::Failed),
        summary.count(ChapterStatus::Skipped),
    );
    if summary.stats.escalations > 0 {
        totals.push_str(&format!(" (switched to {} transport)", summary.transport.as_str()));
    }
    if summary.interrupted {
        totals.push_str(" (interrupted)");
    }
    lines.push(totals);
    lines
}

/// Prints the run summary to stdout.
pub fn print_summary(summary: &RunSummary) {
    for line in summary_lines(summary, terminal_width()) {
        println!("{line}");
    }
}

#[allow(clippy::cast_possible_truncation)]
fn number_label(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Chapter progress bar driven by pipeline callbacks.
#[derive(Debug)]
pub struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    /// Creates the bar; its length is set once chapters are selected.
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }

    /// Clears the bar before the summary is printed.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl RunObserver for ProgressObserver {
    fn series_resolved(&self, target: &SeriesTarget) {
        self.bar.set_message(format!("Listing chapters of {}", target.display_name));
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn chapters_selected(&self, count: usize) {
        self.bar.set_length(count as u64);
    }

    fn chapter_started(&self, chapter: &ChapterDescriptor) {
        self.bar.set_message(format!("Chapter {}", chapter.number_label()));
    }

    fn chapter_finished(&self, _report: &ChapterReport) {
        self.bar.inc(1);
    }
}
