use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::classifier::{LineDisposition, LineVerdict, Outcome};

/// Classification counters for one file or for a whole run.
///
/// `combine` is associative and `Counters::default()` is its identity, so
/// per-file counters can be merged in any grouping as workers finish. Each
/// file keeps at most `sample_limit` path-only samples; the merged totals are
/// capped once with `cap_samples`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub lines_scanned: usize,
    pub lines_blank: usize,
    pub lines_dropped_entirely: usize,
    pub lines_path_only: usize,
    pub lines_content_and_path: usize,
    pub total_matches: usize,
    pub extracted: usize,
    pub mirrored: usize,
    pub dropped_path_only: usize,
    pub partial_valid: usize,
    pub checksum_rejected: usize,
    pub record_errors: usize,
    pub per_kind: BTreeMap<String, usize>,
    pub per_field: BTreeMap<String, usize>,
    /// First extracted row seen for each field.
    pub field_examples: BTreeMap<String, String>,
    pub path_only_samples: Vec<String>,
    #[serde(skip)]
    sample_limit: usize,
}

impl Counters {
    pub fn with_sample_limit(sample_limit: usize) -> Self {
        Self {
            sample_limit,
            ..Default::default()
        }
    }

    pub fn sample_limit(&self) -> usize {
        self.sample_limit
    }

    pub fn record(&mut self, verdict: &LineVerdict) {
        self.lines_scanned += 1;
        self.checksum_rejected += verdict.checksum_rejected;

        match verdict.disposition {
            LineDisposition::Blank => self.lines_blank += 1,
            LineDisposition::DroppedNoMatch => self.lines_dropped_entirely += 1,
            LineDisposition::PathOnly => {
                self.lines_path_only += 1;
                if let Some(sample) = &verdict.path_only_sample {
                    if self.path_only_samples.len() < self.sample_limit {
                        self.path_only_samples.push(sample.clone());
                    }
                }
            }
            LineDisposition::ContentAndPath => self.lines_content_and_path += 1,
            LineDisposition::ContentOnly => {}
        }

        if verdict.partial_valid {
            self.partial_valid += 1;
        }

        for row in &verdict.rows {
            self.total_matches += 1;
            *self.per_kind.entry(row.kind.label().to_string()).or_insert(0) += 1;
            match row.outcome {
                Outcome::Extracted => {
                    self.extracted += 1;
                    if let Some(field) = &row.field {
                        *self.per_field.entry(field.clone()).or_insert(0) += 1;
                        if let Some(text) = &row.text {
                            self.field_examples
                                .entry(field.clone())
                                .or_insert_with(|| text.clone());
                        }
                    }
                }
                Outcome::Mirrored => self.mirrored += 1,
                Outcome::DroppedPathOnly => self.dropped_path_only += 1,
            }
        }
    }

    pub fn record_error(&mut self) {
        self.lines_scanned += 1;
        self.record_errors += 1;
    }

    pub fn combine(mut self, other: Counters) -> Counters {
        self.lines_scanned += other.lines_scanned;
        self.lines_blank += other.lines_blank;
        self.lines_dropped_entirely += other.lines_dropped_entirely;
        self.lines_path_only += other.lines_path_only;
        self.lines_content_and_path += other.lines_content_and_path;
        self.total_matches += other.total_matches;
        self.extracted += other.extracted;
        self.mirrored += other.mirrored;
        self.dropped_path_only += other.dropped_path_only;
        self.partial_valid += other.partial_valid;
        self.checksum_rejected += other.checksum_rejected;
        self.record_errors += other.record_errors;

        for (kind, count) in other.per_kind {
            *self.per_kind.entry(kind).or_insert(0) += count;
        }
        for (field, count) in other.per_field {
            *self.per_field.entry(field).or_insert(0) += count;
        }
        for (field, example) in other.field_examples {
            self.field_examples.entry(field).or_insert(example);
        }

        self.sample_limit = self.sample_limit.max(other.sample_limit);
        self.path_only_samples.extend(other.path_only_samples);
        self
    }

    /// Trim the path-only samples to the sample limit. Call once on the final
    /// totals; `combine` keeps every sample so grouping cannot change them.
    pub fn cap_samples(&mut self) {
        self.path_only_samples.truncate(self.sample_limit);
    }

    /// Every match was routed to exactly one outcome.
    pub fn is_consistent(&self) -> bool {
        self.extracted + self.mirrored + self.dropped_path_only == self.total_matches
    }

    pub fn rows_emitted(&self) -> usize {
        self.extracted + self.mirrored
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub files_discovered: usize,
    pub files_skipped: usize,
    pub files_processed: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    /// `(file, message)` for every file-level failure.
    pub errors: Vec<(String, String)>,
    pub counters: Counters,
    pub extracted_rows_written: usize,
    pub mirrored_rows_written: usize,
    pub extracted_chunks_created: usize,
    pub mirrored_chunks_created: usize,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_consistent(&self) -> bool {
        self.counters.is_consistent()
    }

    pub fn has_failures(&self) -> bool {
        self.files_failed > 0
    }

    pub fn lines_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.counters.lines_scanned as f64 / secs
        } else {
            0.0
        }
    }
}
