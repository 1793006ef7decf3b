use serde::Serialize;
use serde::ser::SerializeMap;

use crate::domain::{Modality, ScanType};

pub const SHORT_NAME: &str = "fmriresults01";

const INPUTS: &str = "ABCD Fast-Track image data release for baseline assessments";
const PIPELINE: &str = "MMPS version 248";
const PIPELINE_SCRIPT: &str = "MMIL_Preproc";
const PIPELINE_TOOLS: &str = "MMPS";
const PIPELINE_VERSION: &str = "248";
const SESSION_PREFIX: &str = "ABCD-MPROC-";

const STRUCTURAL_HISTORY: &str = "gradient unwarp, B1 inhomogeneity correction, resampled to 1mm^3 isotropic in LIA rigid body registration to non-MNI atlas";
const FUNCTIONAL_HISTORY: &str = "motion correction, B0 inhomogeneity correction, gradient unwarp, between scan motion correction, and resampling to 2.4mm^3 (requires rigid registration to T1 - see included json for matrix values)";
const DIFFUSION_HISTORY: &str = "eddy-current correction, motion correction, B0 inhomogeneity correction, gradient unwarp, replacement of bad slice-frames, between scan motion correction, rigid body registration to atlas and resampling to 1.7mm^3 LPI (requires rigid registration to T1 - see included json for matrix values)";

/// Everything a `fmriresults01` row needs that varies per run.
#[derive(Debug, Clone)]
pub struct RecordInputs<'a> {
    pub modality: Modality,
    pub pguid: &'a str,
    pub dataset_id: &'a str,
    pub interview_date: &'a str,
    pub interview_age: &'a str,
    pub gender: &'a str,
    pub image03_id: &'a str,
    pub file_source: &'a str,
    pub derived_files: &'a str,
}

/// An ordered `fmriresults01` row; keys keep insertion order on the wire and
/// in the audit table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    fields: Vec<(String, String)>,
}

impl MetadataRecord {
    pub fn fmriresults01(inputs: &RecordInputs<'_>) -> Self {
        let modality = inputs.modality;
        let dataset_id = if inputs.dataset_id.trim().is_empty() {
            "0"
        } else {
            inputs.dataset_id
        };
        let experiment_id = match modality.scan_type() {
            ScanType::Bold => modality
                .nda_experiment_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            _ => String::new(),
        };

        let mut record = Self::default();
        record.push("subjectkey", inputs.pguid);
        record.push("src_subject_id", inputs.pguid);
        record.push("origin_dataset_id", dataset_id);
        record.push("interview_date", inputs.interview_date);
        record.push("interview_age", inputs.interview_age);
        record.push("gender", inputs.gender);
        record.push("experiment_id", experiment_id);
        record.push("inputs", INPUTS);
        record.push("img03_id", inputs.image03_id);
        record.push("file_source", inputs.file_source);
        record.push("job_name", "");
        record.push("proc_types", "");
        record.push("metric_files", "");
        record.push("pipeline", PIPELINE);
        record.push("pipeline_script", PIPELINE_SCRIPT);
        record.push("pipeline_tools", PIPELINE_TOOLS);
        record.push("pipeline_type", PIPELINE_TOOLS);
        record.push("pipeline_version", PIPELINE_VERSION);
        record.push("qc_fail_quest_reason", "");
        record.push("qc_outcome", "pass");
        record.push("derived_files", inputs.derived_files);
        record.push("scan_type", scan_type_label(modality.scan_type()));
        record.push("img03_id2", "");
        record.push("file_source2", "");
        record.push("session_det", session_det(modality));
        record.push("image_history", image_history(modality.scan_type()));
        record
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

impl Serialize for MetadataRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

fn scan_type_label(scan_type: ScanType) -> &'static str {
    match scan_type {
        ScanType::Mpr => "MR structural (T1)",
        ScanType::XetaT2 => "MR structural (T2)",
        ScanType::Bold => "fMRI",
        ScanType::Dti => "multishell DTI",
    }
}

fn session_det(modality: Modality) -> String {
    match modality.scan_type() {
        ScanType::Mpr => format!("{SESSION_PREFIX}T1"),
        ScanType::XetaT2 => format!("{SESSION_PREFIX}T2"),
        ScanType::Dti => format!("{SESSION_PREFIX}DTI"),
        ScanType::Bold => format!(
            "{SESSION_PREFIX}{}",
            modality.bids_task().unwrap_or_default().to_uppercase()
        ),
    }
}

fn image_history(scan_type: ScanType) -> &'static str {
    match scan_type {
        ScanType::Mpr | ScanType::XetaT2 => STRUCTURAL_HISTORY,
        ScanType::Bold => FUNCTIONAL_HISTORY,
        ScanType::Dti => DIFFUSION_HISTORY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(modality: Modality) -> RecordInputs<'static> {
        RecordInputs {
            modality,
            pguid: "NDAR_INVAAA",
            dataset_id: "",
            interview_date: "05/04/2017 00:00:00",
            interview_age: "120",
            gender: "F",
            image03_id: "",
            file_source: "s3://nda-abcd/x.tgz",
            derived_files: "s3://abcd-mproc-patch/y.tgz",
        }
    }

    #[test]
    fn functional_record_carries_experiment_and_task() {
        let record = MetadataRecord::fmriresults01(&inputs(Modality::FmriNback));
        assert_eq!(record.get("experiment_id"), Some("651"));
        assert_eq!(record.get("session_det"), Some("ABCD-MPROC-NBACK"));
        assert_eq!(record.get("scan_type"), Some("fMRI"));
        assert_eq!(record.get("origin_dataset_id"), Some("0"));
    }

    #[test]
    fn structural_record_has_no_experiment() {
        let record = MetadataRecord::fmriresults01(&inputs(Modality::T2));
        assert_eq!(record.get("experiment_id"), Some(""));
        assert_eq!(record.get("session_det"), Some("ABCD-MPROC-T2"));
        assert_eq!(record.keys().next(), Some("subjectkey"));
        assert_eq!(record.keys().last(), Some("image_history"));
    }

    #[test]
    fn serializes_in_insertion_order() {
        let mut record = MetadataRecord::default();
        record.push("z", "1");
        record.push("a", "2");
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"z":"1","a":"2"}"#);
    }
}
