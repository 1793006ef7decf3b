use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::acquisition_log::{AcquisitionLog, RankedSeries, merge_by_uid};
use crate::config::SourceLayout;
use crate::container::{CONTAINER_INFO_FILE, ContainerInfo, RegistrationMatrix, read_registration_matrix};
use crate::domain::{
    Modality, ProcessingTree, RunLabel, ScanType, SubjectId, guessed_fast_track_name,
    truncate_fraction,
};
use crate::error::ShareError;
use crate::fs_util::{self, glob};

pub type RunMap = BTreeMap<RunLabel, RunRecord>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    #[serde(rename = "MinProc_file")]
    pub min_proc_file: String,
    #[serde(flatten)]
    pub fast_track: FastTrackMatch,
    #[serde(rename = "TR")]
    pub tr: Option<f64>,
    #[serde(rename = "TE")]
    pub te: Option<f64>,
    #[serde(rename = "FlipAngle")]
    pub flip_angle: Option<f64>,
    #[serde(flatten)]
    pub detail: RunDetail,
}

/// The previously uploaded raw-data archive for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FastTrackMatch {
    #[serde(rename = "FasTrk_file")]
    pub path: String,
    #[serde(rename = "FasTrk_file_nopath")]
    pub file_name: String,
    #[serde(rename = "FasTrk_file_Guessed_Name")]
    pub guessed_name: String,
    pub series_date: String,
    pub series_time: String,
}

impl FastTrackMatch {
    /// Name to derive outputs from. A located file is only trusted when it
    /// equals the guessed name, so the guessed name always wins.
    pub fn effective_name(&self) -> &str {
        &self.guessed_name
    }

    pub fn agrees_with_guess(&self) -> bool {
        self.file_name == self.guessed_name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunDetail {
    Structural(StructuralDetail),
    Functional(FunctionalDetail),
    Diffusion(DiffusionDetail),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuralDetail {
    #[serde(rename = "TI", skip_serializing_if = "Option::is_none")]
    pub ti: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionalDetail {
    #[serde(rename = "Motion_file")]
    pub motion_file: String,
    #[serde(rename = "Regis_file")]
    pub regis_file: String,
    #[serde(rename = "Event_file", skip_serializing_if = "Option::is_none")]
    pub event_file: Option<String>,
    pub nreps: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffusionDetail {
    #[serde(rename = "RegMtx_file")]
    pub reg_mtx_file: String,
    #[serde(rename = "RegistrationMatrix")]
    pub registration_matrix: RegistrationMatrix,
    pub bval_file: String,
    pub bvec_file: String,
    pub ndiffdirs: Option<f64>,
    pub nreps: Option<f64>,
}

/// Associates a subject's acquired series with processed and raw files on disk.
#[derive(Debug, Clone)]
pub struct Correlator {
    layout: SourceLayout,
}

impl Correlator {
    pub fn new(layout: SourceLayout) -> Self {
        Self { layout }
    }

    pub fn correlate(&self, subject: &SubjectId, modality: Modality) -> Result<RunMap, ShareError> {
        let dir = self.container_dir(subject, modality)?;
        let container_path = dir.join(CONTAINER_INFO_FILE);
        let info = ContainerInfo::read(container_path.as_std_path())?;
        let scan_type = modality.scan_type();

        let filtered = info
            .flatten(modality, container_path.as_std_path())?
            .into_iter()
            .filter(|series| series.passes_filter(scan_type))
            .collect::<Vec<_>>();
        if filtered.is_empty() {
            tracing::info!(subject = %subject, modality = %modality, "no series pass the scan filter");
            return Ok(RunMap::new());
        }

        let log = AcquisitionLog::read(&self.layout.acquisition_log)?;
        let logged = log.select(subject, modality)?;
        let ranked = merge_by_uid(filtered, &logged)?;
        if ranked.is_empty() {
            tracing::info!(subject = %subject, modality = %modality, "no series confirmed by the acquisition log");
            return Ok(RunMap::new());
        }

        let runs = match modality.tree() {
            ProcessingTree::Structural => self.structural_runs(&dir, subject, modality, &ranked)?,
            ProcessingTree::Functional => self.functional_runs(&dir, subject, modality, &ranked)?,
            ProcessingTree::Diffusion => {
                self.diffusion_runs(&dir, subject, &info.manufacturer, &ranked)?
            }
        };
        tracing::info!(
            subject = %subject,
            modality = %modality,
            runs = runs.len(),
            "correlated series"
        );
        Ok(runs)
    }

    fn container_dir(&self, subject: &SubjectId, modality: Modality) -> Result<Utf8PathBuf, ShareError> {
        let tree = modality.tree();
        let root = match tree {
            ProcessingTree::Structural => &self.layout.proc_root,
            ProcessingTree::Diffusion => &self.layout.proc_dti_root,
            ProcessingTree::Functional => &self.layout.proc_bold_root,
        };
        let pattern = format!("{}/{}/PROC*_{}_*", root.display(), tree.subdir(), subject);
        let dirs = glob(&pattern)?
            .into_iter()
            .filter(|path| path.is_dir())
            .collect::<Vec<_>>();

        match dirs.as_slice() {
            [] => Err(ShareError::ContainerNotFound(pattern)),
            [dir] => Ok(dir.clone()),
            _ => Err(ShareError::ContainerAmbiguous {
                pattern,
                count: dirs.len(),
            }),
        }
    }

    fn structural_runs(
        &self,
        dir: &Utf8Path,
        subject: &SubjectId,
        modality: Modality,
        ranked: &[RankedSeries],
    ) -> Result<RunMap, ShareError> {
        let image_name = match modality.scan_type() {
            ScanType::XetaT2 => "T2w_res.mgz*",
            _ => "MPR_res.mgz*",
        };
        let pattern = format!("{dir}/{image_name}");
        let image = pick_one(glob(&pattern)?, "processed image", &pattern)?;

        let mut runs = RunMap::new();
        if let Some(first) = ranked.iter().min_by_key(|series| series.rank()) {
            let params = &first.series.params;
            let ti = match modality {
                Modality::T1 => params.inversion_time(),
                _ => None,
            };
            runs.insert(
                RunLabel::new(first.rank()),
                RunRecord {
                    min_proc_file: image.to_string(),
                    fast_track: self.fast_track(subject, modality, first)?,
                    tr: params.tr,
                    te: params.te,
                    flip_angle: params.flip_angle,
                    detail: RunDetail::Structural(StructuralDetail { ti }),
                },
            );
        }
        Ok(runs)
    }

    fn functional_runs(
        &self,
        dir: &Utf8Path,
        subject: &SubjectId,
        modality: Modality,
        ranked: &[RankedSeries],
    ) -> Result<RunMap, ShareError> {
        let regis_file = functional_registration(dir)?;

        let mut runs = RunMap::new();
        for series in ranked {
            let scan_pattern = format!("{dir}/BOLD{}_*", series.series.scan_index);
            let candidates = glob(&scan_pattern)?;
            let image = pick_by_infix(&candidates, "_for_corr_resBOLD.mgz", "processed image", &scan_pattern)?;
            let motion = pick_by_infix(
                &candidates,
                "_for_corr_resBOLD_motion.1D",
                "motion",
                &scan_pattern,
            )?;

            let label = RunLabel::new(series.rank());
            let event_file = match modality.task() {
                Some(task) => {
                    let pattern = format!("{dir}/stim*{task}/{task}*{}_events.tsv", series.rank());
                    match pick_optional(glob(&pattern)?, "events", &pattern)? {
                        Some(path) => Some(path.to_string()),
                        None => {
                            return Err(ShareError::MissingEvents {
                                run: label.to_string(),
                                pattern,
                            });
                        }
                    }
                }
                None => None,
            };

            let params = &series.series.params;
            runs.insert(
                label,
                RunRecord {
                    min_proc_file: path_or_empty(image),
                    fast_track: self.fast_track(subject, modality, series)?,
                    tr: params.tr,
                    te: params.te,
                    flip_angle: params.flip_angle,
                    detail: RunDetail::Functional(FunctionalDetail {
                        motion_file: path_or_empty(motion),
                        regis_file: regis_file.clone(),
                        event_file,
                        nreps: params.nreps,
                    }),
                },
            );
        }
        Ok(runs)
    }

    fn diffusion_runs(
        &self,
        dir: &Utf8Path,
        subject: &SubjectId,
        manufacturer: &str,
        ranked: &[RankedSeries],
    ) -> Result<RunMap, ShareError> {
        let max_images = max_diffusion_images(manufacturer)?;

        let reg_pattern = format!("{dir}/*_corr_regT1_regT1.mat");
        let reg_candidates = glob(&reg_pattern)?
            .into_iter()
            .filter(|path| !fs_util::file_name(path).contains("rev"))
            .collect::<Vec<_>>();
        let reg_file = match reg_candidates.as_slice() {
            [] => {
                return Err(ShareError::MissingFile {
                    role: "diffusion registration matrix".to_string(),
                    pattern: reg_pattern,
                });
            }
            [only] => only.clone(),
            [first, ..] => {
                tracing::warn!(
                    count = reg_candidates.len(),
                    using = %first,
                    "several diffusion registration matrices, taking the first"
                );
                first.clone()
            }
        };
        let registration_matrix = match read_registration_matrix(reg_file.as_std_path()) {
            Ok(matrix) => matrix,
            Err(err) => {
                tracing::warn!(error = %err, "unable to read registration matrix");
                RegistrationMatrix::new()
            }
        };

        let mut runs = RunMap::new();
        for series in ranked {
            let pattern = format!("{dir}/exportDTIforFSL/DTI{}/*", series.series.scan_index);
            let candidates = glob(&pattern)?;
            let image = diffusion_image(&candidates, manufacturer, max_images, &pattern)?;
            let bvals = pick_one(filter_infix(&candidates, "bvals"), "b-value", &pattern)?;
            let bvecs = pick_one(filter_infix(&candidates, "bvecs"), "b-vector", &pattern)?;

            let params = &series.series.params;
            runs.insert(
                RunLabel::new(series.rank()),
                RunRecord {
                    min_proc_file: image.to_string(),
                    fast_track: self.fast_track(subject, Modality::Dmri, series)?,
                    tr: params.tr,
                    te: params.te,
                    flip_angle: params.flip_angle,
                    detail: RunDetail::Diffusion(DiffusionDetail {
                        reg_mtx_file: reg_file.to_string(),
                        registration_matrix: registration_matrix.clone(),
                        bval_file: bvals.to_string(),
                        bvec_file: bvecs.to_string(),
                        ndiffdirs: params.ndiffdirs,
                        nreps: params.nreps,
                    }),
                },
            );
        }
        Ok(runs)
    }

    fn fast_track(
        &self,
        subject: &SubjectId,
        modality: Modality,
        series: &RankedSeries,
    ) -> Result<FastTrackMatch, ShareError> {
        let series_date = truncate_fraction(&series.series.date).to_string();
        let series_time = truncate_fraction(&series.series.time).to_string();
        let guessed_name = guessed_fast_track_name(
            subject,
            &series.logged.event,
            modality,
            &series_date,
            &series_time,
        );

        let pattern = format!(
            "{}/*/{}_*{}*",
            self.layout.fast_track_root.display(),
            subject.fast_track_prefix(),
            series_time
        );
        let mut candidates = glob(&pattern)?;
        if modality.is_structural() {
            let normalized = candidates
                .iter()
                .filter(|path| path.as_str().contains("NORM"))
                .cloned()
                .collect::<Vec<_>>();
            if !normalized.is_empty() {
                candidates = normalized;
            }
        }

        let located = match candidates.as_slice() {
            [] => {
                tracing::info!(pattern = %pattern, "no fast-track file found");
                None
            }
            [only] => Some(only.clone()),
            _ => {
                tracing::warn!(
                    pattern = %pattern,
                    count = candidates.len(),
                    "ambiguous fast-track match, leaving run without raw data"
                );
                None
            }
        };

        Ok(FastTrackMatch {
            path: located.as_ref().map(|path| path.to_string()).unwrap_or_default(),
            file_name: located
                .as_ref()
                .map(|path| fs_util::file_name(path).to_string())
                .unwrap_or_default(),
            guessed_name,
            series_date,
            series_time,
        })
    }
}

/// Shared functional registration file, `BOLD*_for_corr_...` first and
/// `BOLD*_for_f0_corr_...` when the first finds nothing.
fn functional_registration(dir: &Utf8Path) -> Result<String, ShareError> {
    for suffix in ["_for_corr_resBOLD_regT1.mat", "_for_f0_corr_resBOLD_regT1.mat"] {
        let pattern = format!("{dir}/BOLD*{suffix}");
        let candidates = glob(&pattern)?;
        if candidates.is_empty() {
            continue;
        }
        let found = pick_by_infix(&candidates, suffix, "registration", &pattern)?;
        return Ok(path_or_empty(found));
    }
    Ok(String::new())
}

/// The `.nii.gz` image of one exported series directory, where the scanner
/// manufacturer bounds how many images the directory may hold.
fn diffusion_image(
    candidates: &[Utf8PathBuf],
    manufacturer: &str,
    max_images: usize,
    pattern: &str,
) -> Result<Utf8PathBuf, ShareError> {
    let images = filter_infix(candidates, ".nii.gz");
    if images.len() > max_images {
        return Err(ShareError::TooManyProcessedFiles {
            manufacturer: manufacturer.to_string(),
            count: images.len(),
            max: max_images,
        });
    }
    if images.len() > 1 {
        tracing::warn!(count = images.len(), using = %images[0], "several diffusion images, taking the first");
    }
    images.into_iter().next().ok_or_else(|| ShareError::MissingFile {
        role: "diffusion image".to_string(),
        pattern: pattern.to_string(),
    })
}

fn max_diffusion_images(manufacturer: &str) -> Result<usize, ShareError> {
    let upper = manufacturer.to_uppercase();
    if upper.contains("GE") {
        Ok(1)
    } else if upper.contains("PH") {
        Ok(2)
    } else if upper.contains("SI") {
        Ok(1)
    } else {
        Err(ShareError::UnknownManufacturer(manufacturer.to_string()))
    }
}

fn filter_infix(candidates: &[Utf8PathBuf], infix: &str) -> Vec<Utf8PathBuf> {
    candidates
        .iter()
        .filter(|path| path.as_str().contains(infix))
        .cloned()
        .collect()
}

fn pick_by_infix(
    candidates: &[Utf8PathBuf],
    infix: &str,
    role: &str,
    pattern: &str,
) -> Result<Option<Utf8PathBuf>, ShareError> {
    pick_optional(filter_infix(candidates, infix), role, pattern)
}

fn pick_optional(
    candidates: Vec<Utf8PathBuf>,
    role: &str,
    pattern: &str,
) -> Result<Option<Utf8PathBuf>, ShareError> {
    if candidates.len() > 1 {
        return Err(ShareError::AmbiguousFile {
            role: role.to_string(),
            pattern: pattern.to_string(),
            count: candidates.len(),
        });
    }
    Ok(candidates.into_iter().next())
}

fn pick_one(candidates: Vec<Utf8PathBuf>, role: &str, pattern: &str) -> Result<Utf8PathBuf, ShareError> {
    pick_optional(candidates, role, pattern)?.ok_or_else(|| ShareError::MissingFile {
        role: role.to_string(),
        pattern: pattern.to_string(),
    })
}

fn path_or_empty(path: Option<Utf8PathBuf>) -> String {
    path.map(|path| path.to_string()).unwrap_or_default()
}
