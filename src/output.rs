//! CLI output formatting.
//!
//! Every command prints one header line per record followed by indented
//! context lines. The header leads with the record id and the attached file;
//! paths are shown relative to the library root.
//!
//! # Output Format
//!
//! ## Upload / regenerate
//!
//! ```text
//! #1 photo-scaled.jpg (lossy, compressed copy attached)
//!     File: photo-scaled.jpg 800x600
//!     Original: photo.jpg
//!     Clone: photo-scaled.jpg.webp
//!     thumbnail: photo-150x150.jpg 150x150
//!     medium: photo-300x225.jpg 300x225
//!     Not produced: large, medium_large
//! ```
//!
//! A failed pass prints the reason instead:
//!
//! ```text
//! #3 photo.jpg: pass aborted (snapshot references a missing file: media/gone.jpg)
//! ```
//!
//! ## Show
//!
//! ```text
//! #1 photo-scaled.jpg [image/jpeg]
//!     File: photo-scaled.jpg 800x600
//!     Original: photo.jpg
//!     thumbnail: photo-150x150.jpg 150x150
//!     Tracked: photo-150x150.jpg (kept), photo-scaled.jpg (kept), photo.jpg (kept)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout.

use crate::dispatch::DispatchAction;
use crate::library::{RecordUpdate, RecordView};
use crate::metadata::{Metadata, RecordId};
use crate::pipeline::PassOutcome;
use crate::registry::{FileStatus, PurgeReport};
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn describe_action(action: &DispatchAction) -> String {
    match action {
        DispatchAction::CloneOnly => "clone only".to_string(),
        DispatchAction::ResourceGuardSkip { width, height } => {
            format!("{width}x{height} above resource guard, clone only")
        }
        DispatchAction::AlreadyCompressed => "already compressed".to_string(),
        DispatchAction::CompressedInPlace => "recompressed in place".to_string(),
        DispatchAction::Compressed { replaced: true, .. } => {
            "compressed copy attached".to_string()
        }
        DispatchAction::Compressed {
            replaced: false, ..
        } => "compressed copy not smaller, original kept".to_string(),
    }
}

fn status_label(status: FileStatus) -> &'static str {
    match status {
        FileStatus::Pending => "pending",
        FileStatus::Kept => "kept",
        FileStatus::Deleted => "deleted",
    }
}

/// File, original and size lines shared by `show` and pass output.
fn metadata_lines(metadata: &Metadata, depth: usize) -> Vec<String> {
    let pad = indent(depth);
    let mut lines = vec![format!(
        "{pad}File: {} {}x{}",
        metadata.file, metadata.width, metadata.height
    )];
    if let Some(original) = &metadata.original_image {
        lines.push(format!("{pad}Original: {original}"));
    }
    for (name, size) in &metadata.sizes {
        lines.push(format!(
            "{pad}{name}: {} {}x{}",
            size.file, size.width, size.height
        ));
    }
    lines
}

// ============================================================================
// Upload / regenerate
// ============================================================================

/// Format the result of one pipeline pass.
pub fn format_update(update: &RecordUpdate, root: &Path) -> Vec<String> {
    let outcome = &update.outcome;
    let metadata = &outcome.metadata;
    let mut lines = Vec::new();

    match &outcome.outcome {
        PassOutcome::Completed(report) => {
            lines.push(format!(
                "#{} {} ({}, {})",
                update.id,
                metadata.basename(),
                report.state,
                describe_action(&report.action)
            ));
            lines.extend(metadata_lines(metadata, 1));
            if let Some(clone) = &report.clone {
                lines.push(format!("{}Clone: {}", indent(1), display_path(clone, root)));
            }
        }
        PassOutcome::Skipped => {
            lines.push(format!(
                "#{} {}: skipped, metadata update in progress",
                update.id,
                metadata.basename()
            ));
        }
        PassOutcome::Failed(e) => {
            lines.push(format!(
                "#{} {}: pass aborted ({e})",
                update.id,
                metadata.basename()
            ));
        }
    }

    if !outcome.sizes.is_empty() && !matches!(outcome.outcome, PassOutcome::Failed(_)) {
        let names: Vec<&str> = outcome.sizes.keys().map(String::as_str).collect();
        lines.push(format!("{}Not produced: {}", indent(1), names.join(", ")));
    }
    for path in &update.removed {
        lines.push(format!("{}Removed: {}", indent(1), display_path(path, root)));
    }
    lines
}

pub fn print_update(update: &RecordUpdate, root: &Path) {
    for line in format_update(update, root) {
        println!("{}", line);
    }
}

// ============================================================================
// Show
// ============================================================================

pub fn format_record(view: &RecordView) -> Vec<String> {
    let mut lines = vec![format!(
        "#{} {} [{}]",
        view.id,
        view.metadata.basename(),
        view.mime.as_deref().unwrap_or("unknown")
    )];
    lines.extend(metadata_lines(&view.metadata, 1));
    if !view.files.is_empty() {
        let tracked: Vec<String> = view
            .files
            .iter()
            .map(|(name, status)| format!("{name} ({})", status_label(*status)))
            .collect();
        lines.push(format!("{}Tracked: {}", indent(1), tracked.join(", ")));
    }
    lines
}

pub fn print_records(views: &[RecordView]) {
    if views.is_empty() {
        println!("No records");
    }
    for view in views {
        for line in format_record(view) {
            println!("{}", line);
        }
    }
}

// ============================================================================
// Delete / clone
// ============================================================================

pub fn format_purge(id: RecordId, report: &PurgeReport, root: &Path) -> Vec<String> {
    let count = report.removed.len();
    let mut lines = vec![format!(
        "Deleted #{id} ({count} file{})",
        if count == 1 { "" } else { "s" }
    )];
    lines.extend(
        report
            .removed
            .iter()
            .map(|path| format!("{}{}", indent(1), display_path(path, root))),
    );
    lines
}

pub fn print_purge(id: RecordId, report: &PurgeReport, root: &Path) {
    for line in format_purge(id, report, root) {
        println!("{}", line);
    }
}

pub fn format_clone(source: &Path, clone: Option<&Path>) -> String {
    match clone {
        Some(clone) => format!("{} → {}", source.display(), clone.display()),
        None => format!("{}: no clone", source.display()),
    }
}
