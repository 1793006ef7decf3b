use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use flate2::read::GzDecoder;
use tempfile::TempDir;

use mproc_share::app::{
    ArchiveSettings, ShareApp, ShareOptions, ShareRequest, convert_reference,
};
use mproc_share::config::SourceLayout;
use mproc_share::convert::{ConversionParams, ImageConverter};
use mproc_share::correlator::Correlator;
use mproc_share::domain::Modality;
use mproc_share::error::ShareError;
use mproc_share::output::JsonOutput;
use mproc_share::record::MetadataRecord;
use mproc_share::upload::{DryRunStore, DryRunUploader, MetadataUploader, ObjectStore, UploadOutcome};

const BASE_NAME: &str = "NDARINVAAA_baselineYear1Arm1_ABCD-MPROC-T1_20170504101112";
const FAST_TRACK_NAME: &str = "NDARINVAAA_baselineYear1Arm1_ABCD-T1_20170504101112.tgz";
const IMAGE_ENTRY: &str =
    "sub-NDARINVAAA/ses-baselineYear1Arm1/anat/sub-NDARINVAAA_ses-baselineYear1Arm1_run-01_T1w";

#[derive(Clone, Default)]
struct MockConverter {
    calls: Arc<Mutex<Vec<ConversionParams>>>,
}

impl ImageConverter for MockConverter {
    fn convert(&self, _input: &Path, output: &Path, params: &ConversionParams) -> Result<(), ShareError> {
        self.calls.lock().unwrap().push(*params);
        fs::write(output, b"nifti").unwrap();
        Ok(())
    }
}

struct MockUploader {
    ok: bool,
}

impl MockUploader {
    fn new(ok: bool) -> Self {
        Self { ok }
    }
}

impl MetadataUploader for MockUploader {
    fn upload(&self, record: &MetadataRecord) -> UploadOutcome {
        assert_eq!(record.get("subjectkey"), Some("NDAR_INVAAA"));
        if self.ok {
            UploadOutcome::success("{\"status\":\"ok\"}")
        } else {
            UploadOutcome::failure("401 Unauthorized: 'bad credentials'")
        }
    }
}

struct MockStore {
    ok: bool,
}

impl MockStore {
    fn new(ok: bool) -> Self {
        Self { ok }
    }
}

impl ObjectStore for MockStore {
    fn put(&self, file: &Path) -> UploadOutcome {
        assert!(file.exists());
        if self.ok {
            UploadOutcome::success("upload: done")
        } else {
            UploadOutcome::failure("access denied")
        }
    }
}

struct Fixture {
    temp: TempDir,
    layout: SourceLayout,
    converter: MockConverter,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        let layout = SourceLayout {
            proc_root: root.join("proc"),
            proc_dti_root: root.join("proc_dti"),
            proc_bold_root: root.join("proc_bold"),
            acquisition_log: root.join("pcinfo.csv"),
            fast_track_root: root.join("fast-track"),
        };

        let dir = layout.proc_root.join("MRI/PROC_INVAAA_20170504.101112_1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("ContainerInfo.json"),
            r#"{"Manufacturer":"GE MEDICAL SYSTEMS",
                "SeriesInfo":[{"SeriesInstanceUID":"t1","SeriesType":"MPR","SeriesDate":"20170504","SeriesTime":"101112","PatientID":"NDAR_INVAAA"}],
                "ScanInfo":{"MPR":{"SeriesIndex":1,"TR":2500,"TE":2.9,"FlipAngle":8,"TI":1060}}}"#,
        )
        .unwrap();
        fs::write(dir.join("MPR_res.mgz"), b"mgz").unwrap();
        fs::write(
            &layout.acquisition_log,
            "pGUID,EventName,SiteName,Manufacturer,SeriesType,SeriesInstanceUID,StudyDate,SeriesTime\n\
NDAR_INVAAA,baseline_year_1_arm_1,S1,GE,T1,t1,20170504,101112\n",
        )
        .unwrap();

        fs::write(
            root.join("subjects.csv"),
            "pGUID,dob,gender,event_rc\nNDAR_INVAAA,2007-05-04,F,baseline_year_1_arm_1\n",
        )
        .unwrap();
        fs::write(
            root.join("image03.csv"),
            format!(
                "image03_id,dataset_id,subjectkey,interview_date,interview_age,image_file\n\
7,12,NDAR_INVAAA,05/04/2017,121,s3://nda-abcd/{FAST_TRACK_NAME}\n"
            ),
        )
        .unwrap();

        Self {
            temp,
            layout,
            converter: MockConverter::default(),
        }
    }

    fn request(&self) -> ShareRequest {
        let root = self.temp.path();
        ShareRequest {
            subject: "INVAAA".parse().unwrap(),
            modality: Modality::T1,
            demographics: root.join("subjects.csv"),
            nda_db: root.join("image03.csv"),
            outdir: root.join("out"),
        }
    }

    fn app<U: MetadataUploader, S: ObjectStore>(
        &self,
        uploader: U,
        store: S,
    ) -> ShareApp<MockConverter, U, S> {
        ShareApp::new(
            Correlator::new(self.layout.clone()),
            self.converter.clone(),
            uploader,
            store,
            ArchiveSettings {
                bucket: "s3://abcd-mproc-patch/".to_string(),
                dataset_description: None,
            },
        )
    }

    fn archive(&self) -> PathBuf {
        self.temp.path().join("out").join(format!("{BASE_NAME}.tgz"))
    }
}

fn archive_entries(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
    let mut entries = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        entries.insert(name, bytes);
    }
    entries
}

fn audit_rows(outdir: &Path) -> Vec<BTreeMap<String, String>> {
    let conn = rusqlite::Connection::open(outdir.join("metadata.sqlite")).unwrap();
    let mut stmt = conn.prepare("SELECT * FROM fmriresults01 ORDER BY id").unwrap();
    let names = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let rows = stmt
        .query_map([], |row| {
            let mut values = BTreeMap::new();
            for (index, name) in names.iter().enumerate().skip(1) {
                values.insert(name.clone(), row.get::<_, String>(index)?);
            }
            Ok(values)
        })
        .unwrap()
        .map(Result::unwrap)
        .collect();
    rows
}

#[test]
fn share_packages_uploads_and_audits() {
    let fixture = Fixture::new();
    let app = fixture.app(MockUploader::new(true), MockStore::new(true));
    let request = fixture.request();

    let result = app.share(&request, ShareOptions::default(), &JsonOutput).unwrap();
    assert_eq!(result.runs.len(), 1);
    let run = &result.runs[0];
    assert_eq!(run.fast_track_name, FAST_TRACK_NAME);
    assert!(run.archive_kept);
    assert_eq!(run.record.get("img03_id"), Some("7"));
    assert_eq!(run.record.get("origin_dataset_id"), Some("12"));
    assert_eq!(run.record.get("interview_date"), Some("05/04/2017 00:00:00"));
    assert_eq!(run.record.get("interview_age"), Some("121"));
    assert_eq!(
        run.record.get("derived_files"),
        Some(format!("s3://abcd-mproc-patch/{BASE_NAME}.tgz").as_str())
    );
    assert_eq!(run.record.get("scan_type"), Some("MR structural (T1)"));

    assert_eq!(
        fixture.converter.calls.lock().unwrap().as_slice(),
        &[ConversionParams {
            tr: Some(2500.0),
            te: Some(2.9),
            ti: Some(1060.0),
            flip_angle: Some(8.0),
        }]
    );

    let entries = archive_entries(&fixture.archive());
    assert_eq!(entries[&format!("{IMAGE_ENTRY}.nii")], b"nifti");
    assert!(entries.contains_key("dataset_description.json"));
    let sidecar: serde_json::Value =
        serde_json::from_slice(&entries[&format!("{IMAGE_ENTRY}.json")]).unwrap();
    assert_eq!(sidecar["RepetitionTime"], 2.5);
    assert_eq!(sidecar["InversionTime"], 1.06);
    assert_eq!(sidecar["FlipAngle"], 8.0);

    let leftovers = fs::read_dir(&request.outdir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with('.'))
        .count();
    assert_eq!(leftovers, 0);

    let rows = audit_rows(&request.outdir);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["subjectkey"], "NDAR_INVAAA");
    assert_eq!(rows[0]["miNDA_ok"], "True");
    assert_eq!(rows[0]["miNDA_msg"], "{status:ok}");
    assert_eq!(rows[0]["s3_ok"], "True");
}

#[test]
fn convert_names_output_after_reference() {
    let fixture = Fixture::new();
    let outdir = fixture.temp.path().join("converted");
    let result = convert_reference(
        &fixture.converter,
        &fixture.layout.proc_root.join("MRI/PROC_INVAAA_20170504.101112_1/MPR_res.mgz"),
        FAST_TRACK_NAME,
        &outdir,
        &JsonOutput,
    )
    .unwrap();

    assert!(result.output.ends_with(&format!("{BASE_NAME}.nii")));
    assert!(outdir.join(format!("{BASE_NAME}.nii")).exists());
    assert_eq!(
        fixture.converter.calls.lock().unwrap().as_slice(),
        &[ConversionParams::default()]
    );
}

#[test]
fn failed_record_upload_skips_store_and_removes_archive() {
    let fixture = Fixture::new();
    let app = fixture.app(MockUploader::new(false), MockStore::new(true));
    let request = fixture.request();

    let result = app.share(&request, ShareOptions::default(), &JsonOutput).unwrap();
    let run = &result.runs[0];
    assert!(!run.archive_kept);
    assert!(run.archive_upload.is_none());
    assert!(!fixture.archive().exists());

    let rows = audit_rows(&request.outdir);
    assert_eq!(rows[0]["miNDA_ok"], "False");
    assert_eq!(rows[0]["miNDA_msg"], "401 Unauthorized: bad credentials");
    assert_eq!(rows[0]["s3_ok"], "");
    assert_eq!(rows[0]["s3_msg"], "AWS-s3 not attempted because miNDA upload failed");
}

#[test]
fn failed_archive_copy_removes_archive() {
    let fixture = Fixture::new();
    let app = fixture.app(MockUploader::new(true), MockStore::new(false));
    let request = fixture.request();

    let result = app.share(&request, ShareOptions::default(), &JsonOutput).unwrap();
    assert_matches!(&result.runs[0].archive_upload, Some(outcome) if !outcome.ok);
    assert!(!fixture.archive().exists());
    assert_eq!(audit_rows(&request.outdir)[0]["s3_ok"], "False");
}

#[test]
fn dry_run_keeps_archive_and_skips_audit() {
    let fixture = Fixture::new();
    let app = fixture.app(
        DryRunUploader::new("abcd_upload_107927"),
        DryRunStore::new("aws", "s3://abcd-mproc-patch/"),
    );
    let request = fixture.request();

    let result = app
        .share(&request, ShareOptions { dry_run: true }, &JsonOutput)
        .unwrap();
    let run = &result.runs[0];
    assert!(run.archive_kept);
    assert_eq!(run.metadata_upload.message, "Here I would upload record to miNDA");
    assert!(fixture.archive().exists());
    assert!(!request.outdir.join("metadata.sqlite").exists());
}

#[test]
fn existing_archive_is_never_replaced() {
    let fixture = Fixture::new();
    let request = fixture.request();
    fs::create_dir_all(&request.outdir).unwrap();
    fs::write(fixture.archive(), b"previous").unwrap();

    let app = fixture.app(MockUploader::new(true), MockStore::new(true));
    assert_matches!(
        app.share(&request, ShareOptions::default(), &JsonOutput),
        Err(ShareError::ArchiveExists(_))
    );
    assert_eq!(fs::read(fixture.archive()).unwrap(), b"previous");
}

#[test]
fn missing_nda_record_falls_back_to_local_metadata() {
    let fixture = Fixture::new();
    let request = fixture.request();
    fs::write(
        &request.nda_db,
        "image03_id,dataset_id,subjectkey,interview_date,image_file\n\
1,12,NDAR_INVBBB,05/04/2017,s3://nda-abcd/other.tgz\n",
    )
    .unwrap();

    let app = fixture.app(MockUploader::new(true), MockStore::new(true));
    let result = app.share(&request, ShareOptions::default(), &JsonOutput).unwrap();
    let record = &result.runs[0].record;
    assert_eq!(record.get("interview_date"), Some("05/04/2017 00:00:00"));
    assert_eq!(record.get("interview_age"), Some("120"));
    assert_eq!(record.get("origin_dataset_id"), Some("0"));
    assert_eq!(record.get("img03_id"), Some(""));
    assert_eq!(
        record.get("file_source"),
        Some(format!("s3://nda-abcd/{FAST_TRACK_NAME}").as_str())
    );
}

#[test]
fn unknown_subject_is_reported() {
    let fixture = Fixture::new();
    let mut request = fixture.request();
    request.subject = "INVZZZ".parse().unwrap();

    let app = fixture.app(MockUploader::new(true), MockStore::new(true));
    assert_matches!(
        app.share(&request, ShareOptions::default(), &JsonOutput),
        Err(ShareError::SubjectNotFound(_))
    );
}
