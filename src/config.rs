use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ShareError;

pub const CONFIG_FILE_NAME: &str = "mproc-share.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub proc_root: PathBuf,
    pub proc_dti_root: PathBuf,
    pub proc_bold_root: PathBuf,
    pub acquisition_log: PathBuf,
    #[serde(default)]
    pub fast_track_root: Option<PathBuf>,
    #[serde(default)]
    pub converter: Option<PathBuf>,
    #[serde(default)]
    pub aws: Option<PathBuf>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub mindar_url: Option<String>,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub credentials: Option<PathBuf>,
    #[serde(default)]
    pub dataset_description: Option<PathBuf>,
}

/// Locations of the processing trees and the acquisition log.
#[derive(Debug, Clone)]
pub struct SourceLayout {
    pub proc_root: PathBuf,
    pub proc_dti_root: PathBuf,
    pub proc_bold_root: PathBuf,
    pub acquisition_log: PathBuf,
    pub fast_track_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub mindar_url: String,
    pub schema_name: String,
    pub credentials: PathBuf,
    pub aws: PathBuf,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub layout: SourceLayout,
    pub converter: PathBuf,
    pub upload: UploadSettings,
    pub dataset_description: Option<PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ShareError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => Self::default_path().ok_or(ShareError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ShareError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ShareError::ConfigParse(err.to_string()))?;

        tracing::debug!(path = %config_path.display(), "loaded config");
        Ok(Self::resolve_config(config))
    }

    fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "mproc-share")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            layout: SourceLayout {
                proc_root: config.proc_root,
                proc_dti_root: config.proc_dti_root,
                proc_bold_root: config.proc_bold_root,
                acquisition_log: config.acquisition_log,
                fast_track_root: config
                    .fast_track_root
                    .unwrap_or_else(|| PathBuf::from("/fast-track")),
            },
            converter: config
                .converter
                .unwrap_or_else(|| PathBuf::from("mri_convert")),
            upload: UploadSettings {
                mindar_url: config
                    .mindar_url
                    .unwrap_or_else(|| "https://ndar.nih.gov/api/mindar/import".to_string()),
                schema_name: config
                    .schema_name
                    .unwrap_or_else(|| "abcd_upload_107927".to_string()),
                credentials: config
                    .credentials
                    .unwrap_or_else(|| PathBuf::from("login_credentials.json")),
                aws: config.aws.unwrap_or_else(|| PathBuf::from("aws")),
                bucket: config
                    .bucket
                    .unwrap_or_else(|| "s3://abcd-mproc-patch/".to_string()),
            },
            dataset_description: config.dataset_description,
        }
    }
}
