use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ShareError;

pub const DTI_NDIFFDIRS_MIN: f64 = 50.0;
pub const BOLD_NREPS_MIN: f64 = 100.0;
pub const MAX_SERIES_PER_PROCESS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
pub enum Modality {
    #[value(name = "T1")]
    T1,
    #[value(name = "T2")]
    T2,
    #[serde(rename = "dMRI")]
    #[value(name = "dMRI")]
    Dmri,
    #[serde(rename = "fMRI_MID_task")]
    #[value(name = "fMRI_MID_task")]
    FmriMid,
    #[serde(rename = "fMRI_SST_task")]
    #[value(name = "fMRI_SST_task")]
    FmriSst,
    #[serde(rename = "fMRI_nBack_task")]
    #[value(name = "fMRI_nBack_task")]
    FmriNback,
    #[serde(rename = "rsfMRI")]
    #[value(name = "rsfMRI")]
    RsFmri,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanType {
    #[serde(rename = "MPR")]
    Mpr,
    #[serde(rename = "XetaT2")]
    XetaT2,
    #[serde(rename = "DTI")]
    Dti,
    #[serde(rename = "BOLD")]
    Bold,
}

impl ScanType {
    pub const ALL: [ScanType; 4] = [ScanType::Mpr, ScanType::XetaT2, ScanType::Bold, ScanType::Dti];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Mpr => "MPR",
            ScanType::XetaT2 => "XetaT2",
            ScanType::Dti => "DTI",
            ScanType::Bold => "BOLD",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a modality's processing containers live under the configured roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingTree {
    Structural,
    Diffusion,
    Functional,
}

impl ProcessingTree {
    pub fn subdir(&self) -> &'static str {
        match self {
            ProcessingTree::Structural => "MRI",
            ProcessingTree::Diffusion => "DTI",
            ProcessingTree::Functional => "BOLD",
        }
    }
}

impl Modality {
    pub const ALL: [Modality; 7] = [
        Modality::T1,
        Modality::T2,
        Modality::Dmri,
        Modality::FmriMid,
        Modality::FmriSst,
        Modality::FmriNback,
        Modality::RsFmri,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::T1 => "T1",
            Modality::T2 => "T2",
            Modality::Dmri => "dMRI",
            Modality::FmriMid => "fMRI_MID_task",
            Modality::FmriSst => "fMRI_SST_task",
            Modality::FmriNback => "fMRI_nBack_task",
            Modality::RsFmri => "rsfMRI",
        }
    }

    pub fn scan_type(&self) -> ScanType {
        match self {
            Modality::T1 => ScanType::Mpr,
            Modality::T2 => ScanType::XetaT2,
            Modality::Dmri => ScanType::Dti,
            Modality::FmriMid | Modality::FmriSst | Modality::FmriNback | Modality::RsFmri => {
                ScanType::Bold
            }
        }
    }

    /// Behavioral task label, `None` for modalities without a task.
    pub fn task(&self) -> Option<&'static str> {
        match self {
            Modality::FmriMid => Some("MID"),
            Modality::FmriSst => Some("SST"),
            Modality::FmriNback => Some("nBack"),
            _ => None,
        }
    }

    /// Raw-data type tag used in fast-track file names.
    pub fn fast_track_type(&self) -> &'static str {
        match self {
            Modality::T1 => "T1",
            Modality::T2 => "T2",
            Modality::Dmri => "DTI",
            Modality::FmriMid => "MID-fMRI",
            Modality::FmriSst => "SST-fMRI",
            Modality::FmriNback => "nBack-fMRI",
            Modality::RsFmri => "rsfMRI",
        }
    }

    pub fn bids_task(&self) -> Option<&'static str> {
        match self {
            Modality::FmriMid => Some("mid"),
            Modality::FmriSst => Some("sst"),
            Modality::FmriNback => Some("nback"),
            Modality::RsFmri => Some("rest"),
            _ => None,
        }
    }

    pub fn nda_experiment_id(&self) -> Option<&'static str> {
        match self {
            Modality::FmriMid => Some("648"),
            Modality::RsFmri => Some("649"),
            Modality::FmriSst => Some("650"),
            Modality::FmriNback => Some("651"),
            _ => None,
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, Modality::T1 | Modality::T2)
    }

    pub fn tree(&self) -> ProcessingTree {
        match self.scan_type() {
            ScanType::Mpr | ScanType::XetaT2 => ProcessingTree::Structural,
            ScanType::Dti => ProcessingTree::Diffusion,
            ScanType::Bold => ProcessingTree::Functional,
        }
    }

    /// Whether an acquisition-log series type belongs to this modality.
    pub fn matches_log_series_type(&self, series_type: &str) -> bool {
        match self {
            Modality::T1 => matches!(series_type, "T1" | "T1_NORM"),
            Modality::T2 => matches!(series_type, "T2" | "T2_NORM"),
            _ => series_type == self.as_str(),
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ShareError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Modality::ALL
            .into_iter()
            .find(|modality| modality.as_str() == trimmed)
            .ok_or_else(|| ShareError::InvalidModality(value.to_string()))
    }
}

/// Subject identifier without the `NDAR` prefix, e.g. `INV0A1B2C3D`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `NDAR_<id>`, the key used by the NDA tables and the subjects file.
    pub fn pguid(&self) -> String {
        format!("NDAR_{}", self.0)
    }

    /// `NDAR<id>`, the prefix of fast-track file names.
    pub fn fast_track_prefix(&self) -> String {
        format!("NDAR{}", self.0)
    }

    /// Subject label used in BIDS paths.
    pub fn bids_label(&self) -> String {
        self.pguid().replace('_', "")
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectId {
    type Err = ShareError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let normalized = trimmed
            .strip_prefix("NDAR_")
            .or_else(|| trimmed.strip_prefix("NDAR"))
            .unwrap_or(trimmed);
        let is_valid =
            !normalized.is_empty() && normalized.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(ShareError::InvalidSubject(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Run key derived from a series' time-order rank, rendered `Run-NN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunLabel(u32);

impl RunLabel {
    pub fn new(rank: u32) -> Self {
        Self(rank)
    }

    pub fn rank(&self) -> u32 {
        self.0
    }

    pub fn bids(&self) -> String {
        format!("run-{:02}", self.0)
    }
}

impl fmt::Display for RunLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Run-{:02}", self.0)
    }
}

impl FromStr for RunLabel {
    type Err = ShareError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .strip_prefix("Run-")
            .and_then(|digits| digits.parse::<u32>().ok())
            .filter(|rank| *rank > 0)
            .map(RunLabel)
            .ok_or_else(|| ShareError::InvalidRunLabel(value.to_string()))
    }
}

impl Serialize for RunLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// `baseline_year_1_arm_1` becomes `baselineYear1Arm1`.
pub fn camel_case_visit(event: &str) -> String {
    let mut segments = event.split('_');
    let mut out = segments.next().unwrap_or_default().to_string();
    for segment in segments {
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(&chars.as_str().to_lowercase());
        }
    }
    out
}

pub fn guessed_fast_track_name(
    subject: &SubjectId,
    event: &str,
    modality: Modality,
    series_date: &str,
    series_time: &str,
) -> String {
    format!(
        "{}_{}_ABCD-{}_{}{}.tgz",
        subject.fast_track_prefix(),
        camel_case_visit(event),
        modality.fast_track_type(),
        series_date,
        series_time
    )
}

/// Part of a date or time value before the first `.`.
pub fn truncate_fraction(value: &str) -> &str {
    value.split('.').next().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn modality_round_trips_through_display() {
        for modality in Modality::ALL {
            let parsed: Modality = modality.to_string().parse().unwrap();
            assert_eq!(parsed, modality);
        }
    }

    #[test]
    fn unknown_modality_is_rejected() {
        assert_matches!(
            "fMRI".parse::<Modality>(),
            Err(ShareError::InvalidModality(_))
        );
    }

    #[test]
    fn truncate_fraction_drops_decimals() {
        assert_eq!(truncate_fraction("101112.500000"), "101112");
        assert_eq!(truncate_fraction("20170504"), "20170504");
    }
}
