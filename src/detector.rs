//! Typed PII detectors and the immutable registry that runs them over a line.
//!
//! Every detector is a core pattern plus optional boundary classes. The
//! `regex` crate has no look-around, so a boundary is matched as a consumed
//! character (or a line edge) and the value itself is taken from the `value`
//! capture group. Scanning resumes one character before the end of the
//! previous value so that character can serve as the next left boundary.

use anyhow::{Context, Result};
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::checksum::{aadhaar_valid, luhn_valid};

const NOT_ALNUM: &str = r"[^A-Za-z0-9]";
const NOT_DIGIT: &str = r"[^0-9]";
const NOT_HEX: &str = r"[^A-Fa-f0-9]";
const UPI_TERMINATOR: &str = r"[\s<>\[\]{}(),;_\-]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Mobile,
    Aadhaar,
    Pan,
    Gstin,
    DrivingLicence,
    VoterId,
    Card,
    Ip,
    Mac,
    Coordinates,
    Email,
    Upi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    Verhoeff,
    Luhn,
}

impl Checksum {
    pub fn validate(&self, candidate: &str) -> bool {
        match self {
            Checksum::Verhoeff => aadhaar_valid(candidate),
            Checksum::Luhn => luhn_valid(candidate),
        }
    }
}

impl DetectorKind {
    /// Registry priority order, highest first.
    pub const ALL: [DetectorKind; 12] = [
        DetectorKind::Mobile,
        DetectorKind::Aadhaar,
        DetectorKind::Pan,
        DetectorKind::Gstin,
        DetectorKind::DrivingLicence,
        DetectorKind::VoterId,
        DetectorKind::Card,
        DetectorKind::Ip,
        DetectorKind::Mac,
        DetectorKind::Coordinates,
        DetectorKind::Email,
        DetectorKind::Upi,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DetectorKind::Mobile => "mobile_regex",
            DetectorKind::Aadhaar => "aadhaar_regex",
            DetectorKind::Pan => "pan_regex",
            DetectorKind::Gstin => "gstin_regex",
            DetectorKind::DrivingLicence => "dl_regex",
            DetectorKind::VoterId => "voterid_regex",
            DetectorKind::Card => "card_regex",
            DetectorKind::Ip => "ip_regex",
            DetectorKind::Mac => "mac_regex",
            DetectorKind::Coordinates => "coord_regex",
            DetectorKind::Email => "email_regex",
            DetectorKind::Upi => "upi_regex",
        }
    }

    pub fn checksum(&self) -> Option<Checksum> {
        match self {
            DetectorKind::Aadhaar => Some(Checksum::Verhoeff),
            DetectorKind::Card => Some(Checksum::Luhn),
            _ => None,
        }
    }

    fn core_pattern(&self) -> &'static str {
        match self {
            DetectorKind::Mobile => r"(?:91)?[6-9][0-9]{9}",
            DetectorKind::Aadhaar => r"[0-9]{12}",
            DetectorKind::Pan => r"(?i:[A-Z]{5}[0-9]{4}[A-Z])",
            DetectorKind::Gstin => r"(?i:[0-9]{2}[A-Z]{5}[0-9]{4}[A-Z][1-9A-Z]Z[0-9A-Z])",
            DetectorKind::DrivingLicence => r"(?i:[A-Z]{2}[0-9]{13})",
            DetectorKind::VoterId => r"(?i:[A-Z]{3}[0-9]{7})",
            DetectorKind::Card => concat!(
                r"4[0-9]{12}(?:[0-9]{3})?",
                r"|5[1-5][0-9]{14}",
                r"|2(?:22[1-9][0-9]{12}|2[3-9][0-9]{13}|[3-6][0-9]{14}|7[01][0-9]{13}|720[0-9]{12})",
                r"|3[47][0-9]{13}",
                r"|60[0-9]{14}|65[0-9]{14}|81[0-9]{14}|508[0-9]{13}",
            ),
            DetectorKind::Ip => concat!(
                r"(?:(?:25[0-5]|2[0-4][0-9]|1?[0-9]?[0-9])\.){3}",
                r"(?:25[0-5]|2[0-4][0-9]|1?[0-9]?[0-9])",
            ),
            DetectorKind::Mac => r"(?:[0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}",
            DetectorKind::Coordinates => concat!(
                r"[+-]?(?:90\.(?:0+)?|[0-8]?[0-9]\.[0-9]+)",
                r"\s*,\s*",
                r"[+-]?(?:180\.(?:0+)?|1[0-7][0-9]\.[0-9]+|[0-9]?[0-9]\.[0-9]+)",
            ),
            DetectorKind::Email => r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            DetectorKind::Upi => r"[A-Za-z0-9._-]{2,256}@[A-Za-z]{2,64}",
        }
    }

    /// (left boundary, right boundary) character classes; `None` means unbounded.
    fn boundaries(&self) -> (Option<&'static str>, Option<&'static str>) {
        match self {
            DetectorKind::Mobile
            | DetectorKind::Aadhaar
            | DetectorKind::Pan
            | DetectorKind::Gstin
            | DetectorKind::DrivingLicence
            | DetectorKind::VoterId
            | DetectorKind::Card
            | DetectorKind::Coordinates => (Some(NOT_ALNUM), Some(NOT_ALNUM)),
            DetectorKind::Ip => (Some(NOT_DIGIT), Some(NOT_DIGIT)),
            DetectorKind::Mac => (Some(NOT_HEX), Some(NOT_HEX)),
            DetectorKind::Email => (None, None),
            DetectorKind::Upi => (None, Some(UPI_TERMINATOR)),
        }
    }

    fn pattern(&self) -> String {
        let (left, right) = self.boundaries();
        let mut pattern = String::new();
        if let Some(left) = left {
            pattern.push_str(&format!("(?:^|{})", left));
        }
        pattern.push_str(&format!("(?P<value>{})", self.core_pattern()));
        if let Some(right) = right {
            pattern.push_str(&format!("(?:{}|$)", right));
        }
        pattern
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One PII occurrence. Offsets are byte offsets into the scanned line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub kind: DetectorKind,
    pub raw_value: String,
    pub start: usize,
    pub end: usize,
    pub validated: bool,
}

impl Match {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &Match) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Confirmed, non-overlapping matches ordered by start offset.
    pub matches: Vec<Match>,
    /// Checksum-gated candidates that failed their checksum.
    pub checksum_rejected: usize,
}

#[derive(Debug)]
struct Detector {
    kind: DetectorKind,
    regex: Regex,
    left_bounded: bool,
}

impl Detector {
    fn new(kind: DetectorKind) -> Result<Self> {
        let regex = Regex::new(&kind.pattern())
            .with_context(|| format!("failed to compile detector pattern for {}", kind))?;
        Ok(Self {
            kind,
            regex,
            left_bounded: kind.boundaries().0.is_some(),
        })
    }

    fn scan(&self, line: &str, out: &mut Vec<Match>) {
        let mut pos = 0;
        while pos <= line.len() {
            let Some(value) = self
                .regex
                .captures_at(line, pos)
                .and_then(|caps| caps.name("value"))
            else {
                break;
            };

            let raw_value = value.as_str();
            let validated = match self.kind.checksum() {
                Some(checksum) => checksum.validate(raw_value),
                None => true,
            };
            out.push(Match {
                kind: self.kind,
                raw_value: raw_value.to_string(),
                start: value.start(),
                end: value.end(),
                validated,
            });

            let mut next = value.end();
            if self.left_bounded {
                if let Some(last) = line[..next].chars().next_back() {
                    next -= last.len_utf8();
                }
            }
            if next <= pos {
                next = match line[pos..].chars().next() {
                    Some(c) => pos + c.len_utf8(),
                    None => break,
                };
            }
            pos = next;
        }
    }
}

/// Immutable set of compiled detectors, built once and shared by every worker.
#[derive(Debug)]
pub struct DetectorRegistry {
    detectors: Vec<Detector>,
    prefilter: RegexSet,
}

impl DetectorRegistry {
    pub fn new(kinds: &[DetectorKind]) -> Result<Self> {
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();
        if kinds.is_empty() {
            anyhow::bail!("at least one detector kind must be enabled");
        }

        let detectors = kinds
            .iter()
            .map(|kind| Detector::new(*kind))
            .collect::<Result<Vec<_>>>()?;
        let prefilter = RegexSet::new(kinds.iter().map(|kind| kind.pattern()))
            .context("failed to compile detector prefilter")?;

        Ok(Self { detectors, prefilter })
    }

    pub fn with_all() -> Result<Self> {
        Self::new(&DetectorKind::ALL)
    }

    pub fn kinds(&self) -> impl Iterator<Item = DetectorKind> + '_ {
        self.detectors.iter().map(|d| d.kind)
    }

    /// Every candidate of every enabled detector, checksum failures included,
    /// ordered by start offset. Candidates of different kinds may overlap.
    pub fn scan_candidates(&self, line: &str) -> Vec<(usize, Match)> {
        let hits = self.prefilter.matches(line);
        let mut candidates = Vec::new();
        let mut scratch = Vec::new();
        for (priority, detector) in self.detectors.iter().enumerate() {
            if !hits.matched(priority) {
                continue;
            }
            scratch.clear();
            detector.scan(line, &mut scratch);
            candidates.extend(scratch.drain(..).map(|m| (priority, m)));
        }
        candidates.sort_by(|(pa, a), (pb, b)| {
            a.start
                .cmp(&b.start)
                .then(b.len().cmp(&a.len()))
                .then(pa.cmp(pb))
        });
        candidates
    }

    /// Confirmed matches with overlaps resolved: earliest start wins, then the
    /// longer value, then registry priority.
    pub fn detect(&self, line: &str) -> Detection {
        let mut detection = Detection::default();
        let mut accepted_end = 0;
        for (_, candidate) in self.scan_candidates(line) {
            if !candidate.validated {
                detection.checksum_rejected += 1;
                continue;
            }
            if !detection.matches.is_empty() && candidate.start < accepted_end {
                continue;
            }
            accepted_end = candidate.end;
            detection.matches.push(candidate);
        }
        detection
    }
}
