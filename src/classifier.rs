//! Per-line decision engine: every confirmed match ends up extracted,
//! mirrored or dropped, and a line with no match is dropped as a whole.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::binder::FieldBinder;
use crate::constants::{NO_FIELD_REASON, ROW_SEPARATOR, TRUNCATION_MARKER, UNIDENTIFIED_FIELD};
use crate::detector::{DetectorKind, DetectorRegistry, Match};
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Extracted,
    Mirrored,
    DroppedPathOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDisposition {
    Blank,
    /// no PII anywhere on the line
    DroppedNoMatch,
    /// PII only after the last `;`
    PathOnly,
    ContentOnly,
    ContentAndPath,
}

/// One routed match. `text` is the rendered output row for extracted and
/// mirrored matches and `None` for drop events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRow {
    pub outcome: Outcome,
    pub kind: DetectorKind,
    pub field: Option<String>,
    pub raw_value: String,
    pub source_path: Arc<str>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineVerdict {
    pub disposition: LineDisposition,
    pub rows: Vec<ClassifiedRow>,
    pub checksum_rejected: usize,
    pub partial_valid: bool,
    /// The trimmed line, kept only for path-only lines as an audit sample.
    pub path_only_sample: Option<String>,
}

impl LineVerdict {
    fn empty(disposition: LineDisposition, checksum_rejected: usize) -> Self {
        Self {
            disposition,
            rows: Vec::new(),
            checksum_rejected,
            partial_valid: false,
            path_only_sample: None,
        }
    }

    pub fn outcome_count(&self, outcome: Outcome) -> usize {
        self.rows.iter().filter(|row| row.outcome == outcome).count()
    }

    pub fn rendered(&self, outcome: Outcome) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter(move |row| row.outcome == outcome)
            .filter_map(|row| row.text.as_deref())
    }
}

pub struct Classifier {
    registry: Arc<DetectorRegistry>,
    binder: Arc<FieldBinder>,
    mirror_content_max_chars: usize,
}

impl Classifier {
    pub fn new(
        registry: Arc<DetectorRegistry>,
        binder: Arc<FieldBinder>,
        mirror_content_max_chars: usize,
    ) -> Self {
        Self {
            registry,
            binder,
            mirror_content_max_chars,
        }
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn classify(&self, line: &str, source_path: &Arc<str>) -> Result<LineVerdict> {
        let record = Record::split(line);
        if record.is_blank() {
            return Ok(LineVerdict::empty(LineDisposition::Blank, 0));
        }

        let detection = self.registry.detect(record.line);
        if detection.matches.is_empty() {
            return Ok(LineVerdict::empty(
                LineDisposition::DroppedNoMatch,
                detection.checksum_rejected,
            ));
        }

        let (content_matches, path_matches): (Vec<Match>, Vec<Match>) = detection
            .matches
            .into_iter()
            .partition(|m| record.in_content(m.start));

        let content = record.content.trim();
        let path = record.path_suffix.trim();
        let mut rows = Vec::with_capacity(content_matches.len() + path_matches.len());

        for m in content_matches.iter() {
            let binding = self
                .binder
                .bind(record.content, &m.raw_value)
                .with_context(|| format!("field binding failed for {} match", m.kind))?;
            let row = match binding {
                Some(binding) => ClassifiedRow {
                    outcome: Outcome::Extracted,
                    kind: m.kind,
                    text: Some(render_extracted(content, path, &binding.field, m)),
                    field: Some(binding.field),
                    raw_value: m.raw_value.clone(),
                    source_path: Arc::clone(source_path),
                },
                None => ClassifiedRow {
                    outcome: Outcome::Mirrored,
                    kind: m.kind,
                    text: Some(render_mirrored(
                        &truncate_chars(content, self.mirror_content_max_chars),
                        path,
                        m,
                    )),
                    field: None,
                    raw_value: m.raw_value.clone(),
                    source_path: Arc::clone(source_path),
                },
            };
            rows.push(row);
        }

        rows.extend(path_matches.into_iter().map(|m| ClassifiedRow {
            outcome: Outcome::DroppedPathOnly,
            kind: m.kind,
            field: None,
            raw_value: m.raw_value,
            source_path: Arc::clone(source_path),
            text: None,
        }));

        let extracted = rows.iter().any(|r| r.outcome == Outcome::Extracted);
        let mirrored = rows.iter().any(|r| r.outcome == Outcome::Mirrored);
        let has_path = rows.iter().any(|r| r.outcome == Outcome::DroppedPathOnly);

        let disposition = match (content_matches.is_empty(), has_path) {
            (true, _) => LineDisposition::PathOnly,
            (false, true) => LineDisposition::ContentAndPath,
            (false, false) => LineDisposition::ContentOnly,
        };
        let path_only_sample = if disposition == LineDisposition::PathOnly {
            Some(record.line.trim().to_string())
        } else {
            None
        };

        Ok(LineVerdict {
            disposition,
            rows,
            checksum_rejected: detection.checksum_rejected,
            partial_valid: extracted && mirrored,
            path_only_sample,
        })
    }
}

fn render_extracted(content: &str, path: &str, field: &str, m: &Match) -> String {
    [content, path, field, m.kind.label(), m.raw_value.as_str()].join(ROW_SEPARATOR)
}

fn render_mirrored(content: &str, path: &str, m: &Match) -> String {
    [
        content,
        path,
        UNIDENTIFIED_FIELD,
        m.kind.label(),
        m.raw_value.as_str(),
        NO_FIELD_REASON,
    ]
    .join(ROW_SEPARATOR)
}

/// Cap `text` at `max_chars` characters, appending a marker when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
