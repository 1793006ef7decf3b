use std::fs;
use std::path::PathBuf;

use assert_matches::assert_matches;

use mproc_share::config::ConfigLoader;
use mproc_share::error::ShareError;

#[test]
fn resolve_explicit_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("mproc-share.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "proc_root": "/space/proc",
            "proc_dti_root": "/space/proc_dti",
            "proc_bold_root": "/space/proc_bold",
            "acquisition_log": "/space/pcinfo.csv",
            "fast_track_root": "/space/fast-track",
            "bucket": "s3://test-bucket/",
            "dataset_description": "/space/dataset_description.json"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(resolved.layout.proc_dti_root, PathBuf::from("/space/proc_dti"));
    assert_eq!(resolved.layout.fast_track_root, PathBuf::from("/space/fast-track"));
    assert_eq!(resolved.upload.bucket, "s3://test-bucket/");
    assert_eq!(resolved.upload.aws, PathBuf::from("aws"));
    assert_eq!(
        resolved.upload.mindar_url,
        "https://ndar.nih.gov/api/mindar/import"
    );
    assert_eq!(
        resolved.dataset_description,
        Some(PathBuf::from("/space/dataset_description.json"))
    );
}

#[test]
fn resolve_reports_unreadable_and_invalid_files() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(Some(missing.to_str().unwrap())),
        Err(ShareError::ConfigRead(_))
    );

    let invalid = temp.path().join("invalid.json");
    fs::write(&invalid, r#"{"proc_root": "/space/proc"}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(invalid.to_str().unwrap())),
        Err(ShareError::ConfigParse(_))
    );
}
