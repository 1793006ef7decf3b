use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::audit::AuditLog;
use crate::bids::{self, ArchiveRequest, Companions};
use crate::convert::{ConversionParams, ImageConverter, processed_base_name};
use crate::correlator::{Correlator, RunDetail, RunMap, RunRecord};
use crate::domain::{Modality, RunLabel, SubjectId};
use crate::error::ShareError;
use crate::nda::{FastTrackLookup, Image03Record, Image03Table};
use crate::record::{MetadataRecord, RecordInputs};
use crate::subjects::{SubjectInfo, interview_date_from_series};
use crate::upload::{MetadataUploader, ObjectStore, UploadOutcome};

const FAST_TRACK_BUCKET: &str = "s3://nda-abcd/";

#[derive(Debug, Clone, Copy, Default)]
pub struct ShareOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ShareRequest {
    pub subject: SubjectId,
    pub modality: Modality,
    pub demographics: PathBuf,
    pub nda_db: PathBuf,
    pub outdir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShareResult {
    pub subject: String,
    pub modality: Modality,
    pub runs: Vec<SharedRun>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SharedRun {
    pub run: RunLabel,
    pub fast_track_name: String,
    pub archive: String,
    pub archive_kept: bool,
    pub record: MetadataRecord,
    pub metadata_upload: UploadOutcome,
    pub archive_upload: Option<UploadOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertResult {
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub bucket: String,
    pub dataset_description: Option<PathBuf>,
}

pub struct ShareApp<C: ImageConverter, U: MetadataUploader, S: ObjectStore> {
    correlator: Correlator,
    converter: C,
    uploader: U,
    store: S,
    settings: ArchiveSettings,
}

impl<C: ImageConverter, U: MetadataUploader, S: ObjectStore> ShareApp<C, U, S> {
    pub fn new(
        correlator: Correlator,
        converter: C,
        uploader: U,
        store: S,
        settings: ArchiveSettings,
    ) -> Self {
        Self {
            correlator,
            converter,
            uploader,
            store,
            settings,
        }
    }

    pub fn locate(
        &self,
        subject: &SubjectId,
        modality: Modality,
        sink: &dyn ProgressSink,
    ) -> Result<RunMap, ShareError> {
        let started = Instant::now();
        let runs = self.correlator.correlate(subject, modality)?;
        sink.event(ProgressEvent {
            message: format!("phase=Locate; {} run(s) for {subject} {modality}", runs.len()),
            elapsed: Some(started.elapsed()),
        });
        Ok(runs)
    }

    pub fn share(
        &self,
        request: &ShareRequest,
        options: ShareOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ShareResult, ShareError> {
        let subject_info = SubjectInfo::lookup(&request.demographics, &request.subject)?;
        if !request.outdir.exists() {
            fs::create_dir_all(&request.outdir)
                .map_err(|err| ShareError::Filesystem(err.to_string()))?;
        }

        let runs = self.locate(&request.subject, request.modality, sink)?;
        let mut result = ShareResult {
            subject: request.subject.pguid(),
            modality: request.modality,
            runs: Vec::new(),
        };
        if runs.is_empty() {
            tracing::info!(subject = %request.subject, modality = %request.modality, "nothing to share");
            return Ok(result);
        }

        let nda = Image03Table::read(&request.nda_db)?;
        let audit = AuditLog::open(&request.outdir, options.dry_run);

        for (label, run) in &runs {
            let started = Instant::now();
            let shared = self.share_run(request, &subject_info, &nda, &audit, *label, run)?;
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Share; {label} metadata_ok={} archive_kept={}",
                    shared.metadata_upload.ok, shared.archive_kept
                ),
                elapsed: Some(started.elapsed()),
            });
            result.runs.push(shared);
        }
        Ok(result)
    }

    fn share_run(
        &self,
        request: &ShareRequest,
        subject_info: &SubjectInfo,
        nda: &Image03Table,
        audit: &AuditLog,
        label: RunLabel,
        run: &RunRecord,
    ) -> Result<SharedRun, ShareError> {
        if run.min_proc_file.is_empty() {
            return Err(ShareError::MissingFile {
                role: "processed image".to_string(),
                pattern: label.to_string(),
            });
        }

        let fast_track = &run.fast_track;
        if !fast_track.file_name.is_empty() && !fast_track.agrees_with_guess() {
            tracing::warn!(
                located = %fast_track.file_name,
                guessed = %fast_track.guessed_name,
                "located fast-track file differs from the guessed name, using the guess"
            );
        }
        let fast_track_name = fast_track.effective_name().to_string();
        let base_name = processed_base_name(&fast_track_name)?;

        let nda_record = match nda.fast_track_record(&request.subject, &fast_track_name) {
            FastTrackLookup::Found { record, note } => {
                if let Some(note) = note {
                    tracing::warn!("{note}");
                }
                Some(record)
            }
            FastTrackLookup::SubjectMissing(message) | FastTrackLookup::FileMissing(message) => {
                tracing::warn!("{message}; falling back to local metadata");
                None
            }
        };

        let params = conversion_params(run);
        let scratch = tempfile::Builder::new()
            .prefix(".mproc-share")
            .tempdir_in(&request.outdir)
            .map_err(|err| ShareError::Filesystem(err.to_string()))?;
        let image = scratch.path().join(format!("{base_name}.nii"));
        self.converter
            .convert(Path::new(&run.min_proc_file), &image, &params)?;

        let archive = bids::assemble(
            &ArchiveRequest {
                outdir: &request.outdir,
                base_name: &base_name,
                image: &image,
                subject: &request.subject,
                event: &subject_info.event,
                modality: request.modality,
                run: label,
                params,
                companions: companions(&run.detail),
            },
            self.settings.dataset_description.as_deref(),
        )?;
        scratch
            .close()
            .map_err(|err| ShareError::Filesystem(err.to_string()))?;

        let record = self.build_record(
            request,
            subject_info,
            nda_record.as_ref(),
            &fast_track_name,
            &fast_track.series_date,
            &base_name,
        )?;

        let metadata_upload = self.uploader.upload(&record);
        let archive_upload = if metadata_upload.ok {
            Some(self.store.put(&archive))
        } else {
            tracing::warn!(message = %metadata_upload.message, "record upload failed, archive not copied");
            None
        };

        let archive_kept = metadata_upload.ok && archive_upload.as_ref().is_some_and(|outcome| outcome.ok);
        if !archive_kept {
            fs::remove_file(&archive).map_err(|err| ShareError::Filesystem(err.to_string()))?;
        }
        audit.append(&record, &metadata_upload, archive_upload.as_ref())?;

        Ok(SharedRun {
            run: label,
            fast_track_name,
            archive: archive.display().to_string(),
            archive_kept,
            record,
            metadata_upload,
            archive_upload,
        })
    }

    fn build_record(
        &self,
        request: &ShareRequest,
        subject_info: &SubjectInfo,
        nda_record: Option<&Image03Record>,
        fast_track_name: &str,
        series_date: &str,
        base_name: &str,
    ) -> Result<MetadataRecord, ShareError> {
        let derived_files = format!("{}{base_name}.tgz", self.settings.bucket);
        let (interview_date, interview_age, dataset_id, image03_id, file_source) = match nda_record {
            Some(record) => (
                record.interview_date.clone(),
                record.interview_age.clone(),
                record.dataset_id.clone(),
                record.image03_id.clone(),
                record.image_file.clone(),
            ),
            None => (
                interview_date_from_series(series_date)?,
                subject_info.interview_age(series_date)?.to_string(),
                String::new(),
                String::new(),
                format!("{FAST_TRACK_BUCKET}{fast_track_name}"),
            ),
        };

        Ok(MetadataRecord::fmriresults01(&RecordInputs {
            modality: request.modality,
            pguid: &subject_info.pguid,
            dataset_id: &dataset_id,
            interview_date: &interview_date,
            interview_age: &interview_age,
            gender: &subject_info.gender,
            image03_id: &image03_id,
            file_source: &file_source,
            derived_files: &derived_files,
        }))
    }
}

/// Converts a single processed image named after its fast-track archive
/// into `<outdir>/<base>.nii`, without acquisition parameters.
pub fn convert_reference(
    converter: &dyn ImageConverter,
    input: &Path,
    reference_name: &str,
    outdir: &Path,
    sink: &dyn ProgressSink,
) -> Result<ConvertResult, ShareError> {
    let started = Instant::now();
    let base_name = processed_base_name(reference_name)?;
    fs::create_dir_all(outdir).map_err(|err| ShareError::Filesystem(err.to_string()))?;
    let output = outdir.join(format!("{base_name}.nii"));
    converter.convert(input, &output, &ConversionParams::default())?;
    sink.event(ProgressEvent {
        message: format!("phase=Convert; wrote {}", output.display()),
        elapsed: Some(started.elapsed()),
    });
    Ok(ConvertResult {
        input: input.display().to_string(),
        output: output.display().to_string(),
    })
}

fn conversion_params(run: &RunRecord) -> ConversionParams {
    let ti = match &run.detail {
        RunDetail::Structural(detail) => detail.ti,
        _ => None,
    };
    ConversionParams {
        tr: run.tr,
        te: run.te,
        ti,
        flip_angle: run.flip_angle,
    }
}

fn companions(detail: &RunDetail) -> Companions {
    let non_empty = |path: &str| (!path.is_empty()).then(|| PathBuf::from(path));
    match detail {
        RunDetail::Structural(_) => Companions::Structural,
        RunDetail::Functional(detail) => Companions::Functional {
            motion_file: PathBuf::from(&detail.motion_file),
            regis_file: non_empty(&detail.regis_file),
            event_file: detail.event_file.as_deref().and_then(non_empty),
        },
        RunDetail::Diffusion(detail) => Companions::Diffusion {
            registration_matrix: detail.registration_matrix.clone(),
            bval_file: PathBuf::from(&detail.bval_file),
            bvec_file: PathBuf::from(&detail.bvec_file),
        },
    }
}
