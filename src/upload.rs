use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::error::ShareError;
use crate::record::{MetadataRecord, SHORT_NAME};

/// Result of one upload attempt. Failures are reported here rather than as
/// errors so the audit log can record them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub ok: bool,
    pub message: String,
}

impl UploadOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

pub trait MetadataUploader: Send + Sync {
    fn upload(&self, record: &MetadataRecord) -> UploadOutcome;
}

pub trait ObjectStore: Send + Sync {
    fn put(&self, file: &Path) -> UploadOutcome;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPackage<'a> {
    pub schema_name: &'a str,
    pub data_structure_rows: Vec<DataStructureRow<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStructureRow<'a> {
    pub short_name: &'static str,
    pub data_element: Vec<DataElement<'a>>,
}

#[derive(Debug, Serialize)]
pub struct DataElement<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

pub fn build_package<'a>(schema_name: &'a str, record: &'a MetadataRecord) -> UploadPackage<'a> {
    let data_element = record
        .fields()
        .iter()
        .map(|(name, value)| DataElement { name, value })
        .collect();
    UploadPackage {
        schema_name,
        data_structure_rows: vec![DataStructureRow {
            short_name: SHORT_NAME,
            data_element,
        }],
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CredentialsFile {
    #[serde(rename = "miNDAR")]
    mindar: Credentials,
}

#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn read(path: &Path) -> Result<Self, ShareError> {
        let content = fs::read_to_string(path).map_err(|err| ShareError::Credentials {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let file: CredentialsFile =
            serde_json::from_str(&content).map_err(|err| ShareError::Credentials {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        Ok(file.mindar)
    }
}

#[derive(Clone)]
pub struct MindarHttpClient {
    client: Client,
    url: String,
    schema_name: String,
    credentials: Credentials,
}

impl MindarHttpClient {
    pub fn new(
        url: impl Into<String>,
        schema_name: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self, ShareError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mproc-share/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ShareError::UploadHttp(err.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| ShareError::UploadHttp(err.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            schema_name: schema_name.into(),
            credentials,
        })
    }
}

impl MetadataUploader for MindarHttpClient {
    fn upload(&self, record: &MetadataRecord) -> UploadOutcome {
        let package = build_package(&self.schema_name, record);
        tracing::info!(url = %self.url, schema = %self.schema_name, "uploading record");
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(&package)
            .send();
        let response = match response {
            Ok(response) => response,
            Err(err) => return UploadOutcome::failure(err.to_string()),
        };

        let status = response.status();
        let message = response.text().unwrap_or_default();
        if status.is_success() {
            UploadOutcome::success(message)
        } else {
            tracing::warn!(status = %status, "record upload rejected");
            UploadOutcome::failure(format!("{status}: {message}"))
        }
    }
}

#[derive(Debug, Clone)]
pub struct AwsCliStore {
    program: PathBuf,
    bucket: String,
}

impl AwsCliStore {
    pub fn new(program: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            bucket: bucket.into(),
        }
    }

    pub fn args(&self, file: &Path) -> Vec<String> {
        vec![
            "s3".to_string(),
            "cp".to_string(),
            file.to_string_lossy().to_string(),
            self.bucket.clone(),
        ]
    }
}

impl ObjectStore for AwsCliStore {
    fn put(&self, file: &Path) -> UploadOutcome {
        let args = self.args(file);
        tracing::info!(program = %self.program.display(), args = %args.join(" "), "copying archive");
        let output = match Command::new(&self.program).args(&args).output() {
            Ok(output) => output,
            Err(err) => return UploadOutcome::failure(format!("{}: {err}", self.program.display())),
        };
        if output.status.success() {
            return UploadOutcome::success(String::from_utf8_lossy(&output.stdout).trim());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            UploadOutcome::failure(format!("command failed: {}", self.program.display()))
        } else {
            UploadOutcome::failure(stderr)
        }
    }
}

/// Logs the package that would be posted.
#[derive(Debug, Clone)]
pub struct DryRunUploader {
    schema_name: String,
}

impl DryRunUploader {
    pub fn new(schema_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
        }
    }
}

impl MetadataUploader for DryRunUploader {
    fn upload(&self, record: &MetadataRecord) -> UploadOutcome {
        let package = build_package(&self.schema_name, record);
        let payload = serde_json::to_string(&package).unwrap_or_default();
        tracing::info!(%payload, "dry run, record not uploaded");
        UploadOutcome::success("Here I would upload record to miNDA")
    }
}

#[derive(Debug, Clone)]
pub struct DryRunStore {
    inner: AwsCliStore,
}

impl DryRunStore {
    pub fn new(program: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            inner: AwsCliStore::new(program, bucket),
        }
    }
}

impl ObjectStore for DryRunStore {
    fn put(&self, file: &Path) -> UploadOutcome {
        let command = format!(
            "{} {}",
            self.inner.program.display(),
            self.inner.args(file).join(" ")
        );
        tracing::info!(%command, "dry run, archive not copied");
        UploadOutcome::success(format!("would execute {command}"))
    }
}
