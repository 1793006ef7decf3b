use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{Modality, ScanType};
use crate::error::ShareError;

pub const CONTAINER_INFO_FILE: &str = "ContainerInfo.json";

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerInfo {
    #[serde(rename = "Manufacturer", default)]
    pub manufacturer: String,
    #[serde(rename = "ContainerType", default)]
    pub container_type: Option<String>,
    #[serde(rename = "SeriesInfo", default)]
    pub series_info: Vec<SeriesInfo>,
    #[serde(rename = "ScanInfo", default)]
    pub scan_info: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesInfo {
    #[serde(rename = "SeriesNumber", default)]
    pub series_number: Option<Scalar>,
    #[serde(rename = "SeriesType", default)]
    pub series_type: String,
    #[serde(rename = "SeriesDescription", default)]
    pub series_description: String,
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,
    #[serde(rename = "SeriesDate", default)]
    pub series_date: Option<Scalar>,
    #[serde(rename = "SeriesTime", default)]
    pub series_time: Option<Scalar>,
    #[serde(rename = "Manufacturer", default)]
    pub manufacturer: String,
    #[serde(rename = "PatientID", default)]
    pub patient_id: String,
    #[serde(default)]
    pub info: Option<PrivateInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrivateInfo {
    #[serde(rename = "Private_2001_101b", default)]
    pub inversion_time: Option<f64>,
}

/// Date, time and number fields arrive either quoted or bare.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    pub fn as_string(&self) -> String {
        match self {
            Scalar::Text(text) => text.trim().to_string(),
            Scalar::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ScanEntry {
    #[serde(rename = "SeriesIndex")]
    series_index: usize,
    #[serde(default)]
    ndiffdirs: Option<f64>,
    #[serde(default)]
    nreps: Option<f64>,
    #[serde(rename = "TR", default)]
    tr: Option<f64>,
    #[serde(rename = "TE", default)]
    te: Option<f64>,
    #[serde(rename = "FlipAngle", default)]
    flip_angle: Option<f64>,
    #[serde(rename = "TI", default)]
    ti: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionParams {
    pub ndiffdirs: Option<f64>,
    pub nreps: Option<f64>,
    pub tr: Option<f64>,
    pub te: Option<f64>,
    pub flip_angle: Option<f64>,
    pub ti: Option<f64>,
    pub ti_private: Option<f64>,
}

impl AcquisitionParams {
    /// Inversion time, falling back to the private header field.
    pub fn inversion_time(&self) -> Option<f64> {
        self.ti
            .filter(|value| value.is_finite())
            .or(self.ti_private.filter(|value| value.is_finite()))
    }

    fn merge(&mut self, entry: &ScanEntry, with_ti: bool) {
        let pairs = [
            (&mut self.ndiffdirs, entry.ndiffdirs),
            (&mut self.nreps, entry.nreps),
            (&mut self.tr, entry.tr),
            (&mut self.te, entry.te),
            (&mut self.flip_angle, entry.flip_angle),
        ];
        for (slot, value) in pairs {
            if value.is_some() {
                *slot = value;
            }
        }
        if with_ti && entry.ti.is_some() {
            self.ti = entry.ti;
        }
    }
}

/// One row of the flattened per-series table.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSeries {
    /// 1-based position in the flattened table; names per-scan files on disk.
    pub scan_index: usize,
    pub series_number: String,
    pub series_type: String,
    pub description: String,
    pub uid: String,
    pub date: String,
    pub time: String,
    pub manufacturer: String,
    pub params: AcquisitionParams,
}

impl ContainerInfo {
    pub fn read(path: &Path) -> Result<Self, ShareError> {
        let content = fs::read_to_string(path).map_err(|err| ShareError::ContainerRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let info: ContainerInfo =
            serde_json::from_str(&content).map_err(|err| ShareError::ContainerRead {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;

        let patients = info
            .series_info
            .iter()
            .map(|series| series.patient_id.as_str())
            .collect::<BTreeSet<_>>();
        if patients.len() != 1 {
            tracing::warn!(
                path = %path.display(),
                patients = ?patients,
                "expected exactly one patient id in container"
            );
        }
        tracing::debug!(
            manufacturer = %info.manufacturer,
            container_type = info.container_type.as_deref().unwrap_or(""),
            series = info.series_info.len(),
            "read container description"
        );
        Ok(info)
    }

    /// Flattens the recognized scan families into per-series rows, family
    /// order MPR, XetaT2, BOLD, DTI.
    pub fn flatten(&self, modality: Modality, path: &Path) -> Result<Vec<ContainerSeries>, ShareError> {
        let with_ti = modality == Modality::T1;
        let mut base = self
            .series_info
            .iter()
            .map(|series| AcquisitionParams {
                ti_private: series.info.as_ref().and_then(|info| info.inversion_time),
                ..AcquisitionParams::default()
            })
            .collect::<Vec<_>>();

        let mut families = 0usize;
        let mut indices = Vec::new();
        for scan_type in ScanType::ALL {
            let Some(value) = self.scan_info.get(scan_type.as_str()) else {
                continue;
            };
            families += 1;
            if value.is_null() {
                continue;
            }
            let entries = serde_json::from_value::<OneOrMany<ScanEntry>>(value.clone())
                .map_err(|err| ShareError::ContainerRead {
                    path: path.to_path_buf(),
                    message: format!("ScanInfo.{scan_type}: {err}"),
                })?
                .into_vec();
            for entry in entries {
                let params = entry
                    .series_index
                    .checked_sub(1)
                    .and_then(|position| base.get_mut(position))
                    .ok_or_else(|| ShareError::ContainerRead {
                        path: path.to_path_buf(),
                        message: format!(
                            "ScanInfo.{scan_type} references series {} of {}",
                            entry.series_index,
                            self.series_info.len()
                        ),
                    })?;
                params.merge(&entry, with_ti);
                indices.push(entry.series_index);
            }
        }

        if families == 0 {
            return Err(ShareError::NoScanFamilies(path.to_path_buf()));
        }
        tracing::debug!(families, indices = ?indices, "flattened scan families");

        Ok(indices
            .into_iter()
            .enumerate()
            .map(|(position, series_index)| {
                let series = &self.series_info[series_index - 1];
                ContainerSeries {
                    scan_index: position + 1,
                    series_number: series
                        .series_number
                        .as_ref()
                        .map(Scalar::as_string)
                        .unwrap_or_default(),
                    series_type: series.series_type.clone(),
                    description: series.series_description.clone(),
                    uid: series.series_instance_uid.trim().to_string(),
                    date: series
                        .series_date
                        .as_ref()
                        .map(Scalar::as_string)
                        .unwrap_or_default(),
                    time: series
                        .series_time
                        .as_ref()
                        .map(Scalar::as_string)
                        .unwrap_or_default(),
                    manufacturer: series.manufacturer.clone(),
                    params: base[series_index - 1].clone(),
                }
            })
            .collect())
    }
}

impl ContainerSeries {
    pub fn passes_filter(&self, scan_type: ScanType) -> bool {
        match scan_type {
            ScanType::Mpr | ScanType::XetaT2 => self.series_type == scan_type.as_str(),
            ScanType::Dti => {
                self.series_type.contains(ScanType::Dti.as_str())
                    && self
                        .params
                        .ndiffdirs
                        .is_some_and(|count| count >= crate::domain::DTI_NDIFFDIRS_MIN)
            }
            ScanType::Bold => self
                .params
                .nreps
                .is_some_and(|count| count >= crate::domain::BOLD_NREPS_MIN),
        }
    }
}

pub type RegistrationMatrix = Vec<Vec<f64>>;

#[derive(Debug, Deserialize)]
struct RegistrationFile {
    #[serde(rename = "RegInfo")]
    reg_info: RegInfo,
}

#[derive(Debug, Deserialize)]
struct RegInfo {
    #[serde(rename = "M_T1_to_T2")]
    m_t1_to_t2: Vec<Vec<f64>>,
}

/// Reads the 4x4 T1 registration matrix from a registration container.
pub fn read_registration_matrix(path: &Path) -> Result<RegistrationMatrix, ShareError> {
    let content = fs::read_to_string(path).map_err(|err| ShareError::ContainerRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let file: RegistrationFile =
        serde_json::from_str(&content).map_err(|err| ShareError::ContainerRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    let matrix = file.reg_info.m_t1_to_t2;
    let is_square = matrix.len() == 4 && matrix.iter().all(|row| row.len() == 4);
    if !is_square {
        return Err(ShareError::ContainerRead {
            path: path.to_path_buf(),
            message: "RegInfo.M_T1_to_T2 is not 4x4".to_string(),
        });
    }
    Ok(matrix)
}
