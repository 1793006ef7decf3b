use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ShareError;

const RAW_TYPE_MARKER: &str = "ABCD-";
const PROCESSED_TYPE_MARKER: &str = "ABCD-MPROC-";

/// Acquisition parameters written into the converted image; TR, TE and TI
/// in milliseconds, flip angle in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConversionParams {
    pub tr: Option<f64>,
    pub te: Option<f64>,
    pub ti: Option<f64>,
    pub flip_angle: Option<f64>,
}

pub trait ImageConverter: Send + Sync {
    fn convert(&self, input: &Path, output: &Path, params: &ConversionParams) -> Result<(), ShareError>;
}

#[derive(Debug, Clone)]
pub struct SystemConverter {
    program: PathBuf,
}

impl SystemConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(input: &Path, output: &Path, params: &ConversionParams) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
        ];
        if let Some(tr) = params.tr {
            args.extend(["-tr".to_string(), format!("{tr:.6}")]);
        }
        if let Some(te) = params.te {
            args.extend(["-te".to_string(), format!("{te:.6}")]);
        }
        if let Some(ti) = params.ti.filter(|ti| *ti != 0.0) {
            args.extend(["-TI".to_string(), format!("{ti:.6}")]);
        }
        if let Some(flip) = params.flip_angle {
            args.extend(["-flip_angle".to_string(), format!("{:.6}", flip.to_radians())]);
        }
        args
    }
}

impl ImageConverter for SystemConverter {
    fn convert(&self, input: &Path, output: &Path, params: &ConversionParams) -> Result<(), ShareError> {
        let args = Self::args(input, output, params);
        tracing::info!(
            program = %self.program.display(),
            args = %args.join(" "),
            "converting image"
        );
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|err| ShareError::Conversion(format!("{}: {err}", self.program.display())))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {}", self.program.display())
        } else {
            stderr
        };
        Err(ShareError::Conversion(message))
    }
}

/// Output base name for a fast-track archive name: the raw type marker
/// becomes the processed one and a short trailing extension is dropped.
pub fn processed_base_name(fast_track_name: &str) -> Result<String, ShareError> {
    let parts = fast_track_name.split(RAW_TYPE_MARKER).collect::<Vec<_>>();
    let [head, tail] = parts.as_slice() else {
        return Err(ShareError::InvalidFileName(fast_track_name.to_string()));
    };
    let renamed = format!("{head}{PROCESSED_TYPE_MARKER}{tail}");

    match renamed.rfind('.') {
        Some(0) => Err(ShareError::InvalidFileName(fast_track_name.to_string())),
        Some(dot) if dot + 5 > renamed.len() => Ok(renamed[..dot].to_string()),
        _ => Ok(renamed),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn base_name_swaps_marker_and_drops_extension() {
        let name = "NDARINVAAA_baselineYear1Arm1_ABCD-DTI_20170504101112.tgz";
        assert_eq!(
            processed_base_name(name).unwrap(),
            "NDARINVAAA_baselineYear1Arm1_ABCD-MPROC-DTI_20170504101112"
        );
    }

    #[test]
    fn base_name_keeps_long_suffix() {
        assert_eq!(
            processed_base_name("x_ABCD-T1_2017.archive").unwrap(),
            "x_ABCD-MPROC-T1_2017.archive"
        );
    }

    #[test]
    fn base_name_requires_single_marker() {
        assert_matches!(
            processed_base_name("NDARINVAAA_T1.tgz"),
            Err(ShareError::InvalidFileName(_))
        );
        assert_matches!(
            processed_base_name("a_ABCD-b_ABCD-c.tgz"),
            Err(ShareError::InvalidFileName(_))
        );
    }

    #[test]
    fn converter_arguments_use_radians() {
        let params = ConversionParams {
            tr: Some(800.0),
            te: Some(30.0),
            ti: None,
            flip_angle: Some(90.0),
        };
        let args = SystemConverter::args(Path::new("in.mgz"), Path::new("out.nii"), &params);
        assert_eq!(
            args,
            vec![
                "-i", "in.mgz", "-o", "out.nii", "-tr", "800.000000", "-te", "30.000000",
                "-flip_angle", "1.570796"
            ]
        );
    }
}
