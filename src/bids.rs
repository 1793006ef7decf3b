use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Map, Value, json};

use crate::container::{RegistrationMatrix, read_registration_matrix};
use crate::convert::ConversionParams;
use crate::domain::{Modality, RunLabel, ScanType, SubjectId, camel_case_visit};
use crate::error::ShareError;

pub const DATASET_DESCRIPTION_NAME: &str = "dataset_description.json";

const DEFAULT_DATASET_DESCRIPTION: &str = r#"{
    "Name": "ABCD minimally processed imaging data",
    "BIDSVersion": "1.0.2",
    "License": "NDA data use certification",
    "Authors": ["ABCD Data Analysis and Informatics Center"]
}
"#;

const MOTION_COLUMNS: [&str; 7] = [
    "t_indx", "rot_z", "rot_x", "rot_y", "trans_z", "trans_x", "trans_y",
];

/// Per-modality companions of the converted image.
#[derive(Debug, Clone)]
pub enum Companions {
    Structural,
    Functional {
        motion_file: PathBuf,
        regis_file: Option<PathBuf>,
        event_file: Option<PathBuf>,
    },
    Diffusion {
        registration_matrix: RegistrationMatrix,
        bval_file: PathBuf,
        bvec_file: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct ArchiveRequest<'a> {
    pub outdir: &'a Path,
    pub base_name: &'a str,
    pub image: &'a Path,
    pub subject: &'a SubjectId,
    pub event: &'a str,
    pub modality: Modality,
    pub run: RunLabel,
    pub params: ConversionParams,
    pub companions: Companions,
}

/// Entry names inside the archive for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct BidsNames {
    prefix: String,
    suffix: &'static str,
}

impl BidsNames {
    pub fn new(subject: &SubjectId, event: &str, modality: Modality, run: RunLabel) -> Self {
        let subject = subject.bids_label();
        let session = camel_case_visit(event);
        let (datatype, suffix) = match modality.scan_type() {
            ScanType::Mpr => ("anat", "T1w"),
            ScanType::XetaT2 => ("anat", "T2w"),
            ScanType::Bold => ("func", "bold"),
            ScanType::Dti => ("dwi", "dwi"),
        };
        let task = modality
            .bids_task()
            .map(|task| format!("task-{task}_"))
            .unwrap_or_default();
        Self {
            prefix: format!(
                "sub-{subject}/ses-{session}/{datatype}/sub-{subject}_ses-{session}_{task}{}",
                run.bids()
            ),
            suffix,
        }
    }

    pub fn entry(&self, suffix: &str, extension: &str) -> String {
        format!("{}_{suffix}.{extension}", self.prefix)
    }

    pub fn image(&self) -> String {
        self.entry(self.suffix, "nii")
    }

    pub fn sidecar(&self) -> String {
        self.entry(self.suffix, "json")
    }

    fn file_name(&self, suffix: &str, extension: &str) -> String {
        let entry = self.entry(suffix, extension);
        entry.rsplit('/').next().unwrap_or(entry.as_str()).to_string()
    }
}

pub fn archive_path(outdir: &Path, base_name: &str) -> PathBuf {
    outdir.join(format!("{base_name}.tgz"))
}

/// Writes `<outdir>/<base_name>.tgz`; an existing archive is never replaced.
pub fn assemble(request: &ArchiveRequest<'_>, description: Option<&Path>) -> Result<PathBuf, ShareError> {
    let path = archive_path(request.outdir, request.base_name);
    if path.exists() {
        return Err(ShareError::ArchiveExists(path));
    }

    let names = BidsNames::new(request.subject, request.event, request.modality, request.run);
    let description = match description {
        Some(path) => fs::read(path)
            .map_err(|err| ShareError::Archive(format!("read {}: {err}", path.display())))?,
        None => DEFAULT_DATASET_DESCRIPTION.as_bytes().to_vec(),
    };

    let file = File::create(&path)
        .map_err(|err| ShareError::Archive(format!("create {}: {err}", path.display())))?;
    let gz = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(gz);

    let result = (|| -> Result<(), ShareError> {
        tracing::info!(entry = %names.image(), archive = %path.display(), "adding image");
        tar.append_path_with_name(request.image, names.image())
            .map_err(archive_err)?;
        append_bytes(&mut tar, DATASET_DESCRIPTION_NAME, &description)?;

        let mut sidecar = acquisition_sidecar(&request.params);
        match &request.companions {
            Companions::Structural => {
                if request.modality.scan_type() == ScanType::Mpr {
                    sidecar.insert(
                        "InversionTime".to_string(),
                        seconds(request.params.ti),
                    );
                }
            }
            Companions::Functional {
                motion_file,
                regis_file,
                event_file,
            } => {
                if let Some(event_file) = event_file {
                    tar.append_path_with_name(event_file, names.entry("events", "tsv"))
                        .map_err(archive_err)?;
                }
                let motion = motion_table(motion_file)?;
                append_bytes(&mut tar, &names.entry("motion", "tsv"), motion.as_bytes())?;

                let matrix = match regis_file {
                    Some(regis_file) => read_matrix_or_empty(regis_file),
                    None => RegistrationMatrix::new(),
                };
                sidecar.insert(
                    "TaskName".to_string(),
                    json!(request.modality.bids_task().unwrap_or_default()),
                );
                sidecar.insert("registration_matrix_T1".to_string(), json!(matrix));
            }
            Companions::Diffusion {
                registration_matrix,
                bval_file,
                bvec_file,
            } => {
                tar.append_path_with_name(bval_file, names.entry("dwi", "bval"))
                    .map_err(archive_err)?;
                tar.append_path_with_name(bvec_file, names.entry("dwi", "bvec"))
                    .map_err(archive_err)?;
                sidecar.insert(
                    "registration_matrix_T1".to_string(),
                    json!(registration_matrix),
                );
                sidecar.insert(
                    "IntendedFor".to_string(),
                    json!(names.file_name("dwi", "nii")),
                );
            }
        }

        let sidecar = serde_json::to_vec(&Value::Object(sidecar))
            .map_err(|err| ShareError::Archive(err.to_string()))?;
        append_bytes(&mut tar, &names.sidecar(), &sidecar)?;
        tar.into_inner()
            .map_err(archive_err)?
            .finish()
            .map_err(archive_err)?;
        Ok(())
    })();

    if let Err(err) = result {
        let _ = fs::remove_file(&path);
        return Err(err);
    }
    Ok(path)
}

fn acquisition_sidecar(params: &ConversionParams) -> Map<String, Value> {
    let mut sidecar = Map::new();
    sidecar.insert("RepetitionTime".to_string(), seconds(params.tr));
    sidecar.insert("EchoTime".to_string(), seconds(params.te));
    sidecar.insert("FlipAngle".to_string(), json!(params.flip_angle));
    sidecar
}

fn seconds(milliseconds: Option<f64>) -> Value {
    json!(milliseconds.map(|value| value / 1000.0))
}

fn read_matrix_or_empty(path: &Path) -> RegistrationMatrix {
    match read_registration_matrix(path) {
        Ok(matrix) => matrix,
        Err(err) => {
            tracing::warn!(error = %err, "unable to read registration matrix");
            RegistrationMatrix::new()
        }
    }
}

/// Whitespace-separated motion estimates to a tab-separated table with a
/// header; columns past the six motion parameters are dropped.
pub fn motion_table(path: &Path) -> Result<String, ShareError> {
    let content = fs::read_to_string(path)
        .map_err(|err| ShareError::Archive(format!("read {}: {err}", path.display())))?;
    let mut out = MOTION_COLUMNS.join("\t");
    out.push('\n');
    for line in content.lines() {
        let fields = line.split_whitespace().collect::<Vec<_>>();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < MOTION_COLUMNS.len() {
            return Err(ShareError::Archive(format!(
                "{}: motion row has {} columns, expected {}",
                path.display(),
                fields.len(),
                MOTION_COLUMNS.len()
            )));
        }
        out.push_str(&fields[..MOTION_COLUMNS.len()].join("\t"));
        out.push('\n');
    }
    Ok(out)
}

fn append_bytes<W: std::io::Write>(
    tar: &mut tar::Builder<W>,
    name: &str,
    bytes: &[u8],
) -> Result<(), ShareError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();
    tar.append_data(&mut header, name, bytes).map_err(archive_err)
}

fn archive_err(err: std::io::Error) -> ShareError {
    ShareError::Archive(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functional_names_carry_task() {
        let subject: SubjectId = "INVAAA".parse().unwrap();
        let names = BidsNames::new(&subject, "baseline_year_1_arm_1", Modality::FmriSst, RunLabel::new(2));
        assert_eq!(
            names.image(),
            "sub-NDARINVAAA/ses-baselineYear1Arm1/func/sub-NDARINVAAA_ses-baselineYear1Arm1_task-sst_run-02_bold.nii"
        );
        assert_eq!(
            names.entry("motion", "tsv"),
            "sub-NDARINVAAA/ses-baselineYear1Arm1/func/sub-NDARINVAAA_ses-baselineYear1Arm1_task-sst_run-02_motion.tsv"
        );
    }

    #[test]
    fn diffusion_intended_for_is_bare_file_name() {
        let subject: SubjectId = "INVAAA".parse().unwrap();
        let names = BidsNames::new(&subject, "baseline_year_1_arm_1", Modality::Dmri, RunLabel::new(1));
        assert_eq!(
            names.file_name("dwi", "nii"),
            "sub-NDARINVAAA_ses-baselineYear1Arm1_run-01_dwi.nii"
        );
    }

    #[test]
    fn motion_table_drops_trailing_columns() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("motion.1D");
        fs::write(&path, "1 0.1 0.2 0.3 1.0 2.0 3.0 9 9\n2 0.0 0.0 0.0 0.5 0.5 0.5 9 9\n").unwrap();

        let table = motion_table(&path).unwrap();
        let lines = table.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "t_indx\trot_z\trot_x\trot_y\ttrans_z\ttrans_x\ttrans_y");
        assert_eq!(lines[1], "1\t0.1\t0.2\t0.3\t1.0\t2.0\t3.0");
        assert_eq!(lines.len(), 3);
    }
}
