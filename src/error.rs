use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ShareError {
    #[error("invalid modality: {0}")]
    #[diagnostic(help(
        "expected one of T1, T2, dMRI, fMRI_MID_task, fMRI_SST_task, fMRI_nBack_task, rsfMRI"
    ))]
    InvalidModality(String),

    #[error("invalid subject id: {0}")]
    InvalidSubject(String),

    #[error("invalid run label: {0}")]
    #[diagnostic(help("run labels look like Run-01"))]
    InvalidRunLabel(String),

    #[error("invalid {field} {value}: {message}")]
    InvalidDate {
        field: String,
        value: String,
        message: String,
    },

    #[error("invalid file pattern: {0}")]
    InvalidPattern(String),

    #[error("no processing container matches {0}")]
    ContainerNotFound(String),

    #[error("{count} processing containers match {pattern}")]
    ContainerAmbiguous { pattern: String, count: usize },

    #[error("failed to read container description {path}: {message}")]
    ContainerRead { path: PathBuf, message: String },

    #[error("container description {0} has no recognized scan families")]
    NoScanFamilies(PathBuf),

    #[error("acquisition time mismatch for series {uid}: container {container}, log {log}")]
    AcquisitionTimeMismatch {
        uid: String,
        container: String,
        log: String,
    },

    #[error("{count} series matched for one process, at most {max} allowed")]
    TooManySeries { count: usize, max: usize },

    #[error("missing {role} file: {pattern}")]
    MissingFile { role: String, pattern: String },

    #[error("{count} candidate {role} files match {pattern}")]
    AmbiguousFile {
        role: String,
        pattern: String,
        count: usize,
    },

    #[error("task series {run} requires an events file, none matches {pattern}")]
    MissingEvents { run: String, pattern: String },

    #[error("{count} processed image files found, manufacturer {manufacturer} allows {max}")]
    TooManyProcessedFiles {
        manufacturer: String,
        count: usize,
        max: usize,
    },

    #[error("unknown scanner manufacturer: {0}")]
    UnknownManufacturer(String),

    #[error("failed to read table {path}: {message}")]
    TableRead { path: PathBuf, message: String },

    #[error("table {path} has no column {column}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("subject not found: {0}")]
    SubjectNotFound(String),

    #[error("missing config file mproc-share.json")]
    #[diagnostic(help("pass --config or create mproc-share.json in the current directory"))]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to read upload credentials {path}: {message}")]
    Credentials { path: PathBuf, message: String },

    #[error("image conversion failed: {0}")]
    Conversion(String),

    #[error("invalid fast-track file name: {0}")]
    InvalidFileName(String),

    #[error("archive already exists: {0}")]
    ArchiveExists(PathBuf),

    #[error("archive assembly failed: {0}")]
    Archive(String),

    #[error("metadata upload failed: {0}")]
    UploadHttp(String),

    #[error("audit log error: {0}")]
    Audit(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
