use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::SubjectId;
use crate::error::ShareError;
use crate::table::Table;

/// One `image03` row, from the flat export or from a downloaded package.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Image03Record {
    pub image03_id: String,
    pub dataset_id: String,
    pub subjectkey: String,
    pub interview_date: String,
    pub interview_age: String,
    pub gender: String,
    pub image_file: String,
    pub image_description: String,
    pub experiment_id: String,
    pub visit: String,
}

impl Image03Record {
    pub fn file_name(&self) -> &str {
        self.image_file
            .rsplit('/')
            .next()
            .unwrap_or(self.image_file.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Image03Table {
    records: Vec<Image03Record>,
}

/// Result of matching a fast-track archive against the package.
#[derive(Debug, Clone, PartialEq)]
pub enum FastTrackLookup {
    Found {
        record: Image03Record,
        note: Option<String>,
    },
    SubjectMissing(String),
    FileMissing(String),
}

impl Image03Table {
    /// Reads a comma-separated flat export or a tab-separated NDA package;
    /// the package carries a description row under its header.
    pub fn read(path: &Path) -> Result<Self, ShareError> {
        let table = match Table::sniff_delimiter(path)? {
            '\t' => Table::read_tsv(path, 1)?,
            _ => Table::read_csv(path)?,
        };
        Self::from_table(&table)
    }

    pub fn from_table(table: &Table) -> Result<Self, ShareError> {
        let image03_id = table.column("image03_id")?;
        let dataset_id = table.column("dataset_id")?;
        let subjectkey = table.column("subjectkey")?;
        let interview_date = table.column("interview_date")?;
        let image_file = table.column("image_file")?;
        let interview_age = table.column("interview_age").ok();
        let gender = table.column("gender").ok();
        let image_description = table.column("image_description").ok();
        let experiment_id = table.column("experiment_id").ok();
        let visit = table.column("visit").ok();

        let cell = |row: &[String], index: Option<usize>| {
            index
                .map(|index| row[index].trim().to_string())
                .unwrap_or_default()
        };

        let records = table
            .rows()
            .iter()
            .map(|row| Image03Record {
                image03_id: cell(row, Some(image03_id)),
                dataset_id: cell(row, Some(dataset_id)),
                subjectkey: cell(row, Some(subjectkey)),
                interview_date: cell(row, Some(interview_date)),
                interview_age: cell(row, interview_age),
                gender: cell(row, gender),
                image_file: cell(row, Some(image_file)),
                image_description: cell(row, image_description),
                experiment_id: cell(row, experiment_id),
                visit: cell(row, visit),
            })
            .collect();

        Ok(Self { records })
    }

    pub fn records(&self, subjectkey: Option<&str>) -> Vec<&Image03Record> {
        self.records
            .iter()
            .filter(|record| subjectkey.is_none_or(|key| record.subjectkey == key))
            .collect()
    }

    pub fn list_files(&self, subjectkey: &str) -> Vec<String> {
        self.records(Some(subjectkey))
            .into_iter()
            .map(|record| record.file_name().to_string())
            .collect()
    }

    pub fn records_for_file(&self, file_name: &str) -> Vec<&Image03Record> {
        self.records
            .iter()
            .filter(|record| record.file_name() == file_name)
            .collect()
    }

    pub fn ids_for_file(&self, file_name: &str) -> Vec<String> {
        self.records_for_file(file_name)
            .into_iter()
            .map(|record| record.image03_id.clone())
            .collect()
    }

    /// Rows whose image file is shared with another row carrying a
    /// different `image03_id`, grouped by file.
    pub fn duplicates(&self) -> Vec<&Image03Record> {
        let mut by_file: Vec<&Image03Record> = self.records.iter().collect();
        by_file.sort_by(|a, b| a.image_file.cmp(&b.image_file));

        let mut out = Vec::new();
        for group in by_file.chunk_by(|a, b| a.image_file == b.image_file) {
            let distinct_ids = group
                .iter()
                .any(|record| record.image03_id != group[0].image03_id);
            if group.len() > 1 && distinct_ids {
                out.extend(group.iter().copied());
            }
        }
        out
    }

    /// Looks up the fast-track archive `file_name` of `subject`. The
    /// interview date comes back as `%m/%d/%Y %H:%M:%S`.
    pub fn fast_track_record(&self, subject: &SubjectId, file_name: &str) -> FastTrackLookup {
        let key = subject.pguid();
        let subject_rows = self.records(Some(&key));
        if subject_rows.is_empty() {
            return FastTrackLookup::SubjectMissing(format!(
                "subject {key} not found in NDA package"
            ));
        }

        let matches = subject_rows
            .into_iter()
            .filter(|record| record.file_name() == file_name)
            .collect::<Vec<_>>();
        let Some(last) = matches.last() else {
            return FastTrackLookup::FileMissing(format!(
                "fast-track file {file_name} not found in NDA package"
            ));
        };

        let note = (matches.len() > 1).then(|| {
            format!(
                "{} records match {file_name}, taking the last",
                matches.len()
            )
        });
        let mut record = (*last).clone();
        record.interview_date = nda_timestamp(&record.interview_date);
        FastTrackLookup::Found { record, note }
    }
}

/// `%m/%d/%Y` to `%m/%d/%Y 00:00:00`; values already carrying a time pass through.
fn nda_timestamp(value: &str) -> String {
    match NaiveDate::parse_from_str(value.trim(), "%m/%d/%Y") {
        Ok(date) => date.format("%m/%d/%Y 00:00:00").to_string(),
        Err(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export() -> Image03Table {
        let text = "IMAGE03_ID,DATASET_ID,SUBJECTKEY,INTERVIEW_DATE,IMAGE_FILE,VISIT\n\
1,10,NDAR_INVAAA,05/04/2017,s3://nda-abcd/NDARINVAAA_baselineYear1Arm1_ABCD-T1_20170504101112.tgz,baseline\n\
2,10,NDAR_INVAAA,05/04/2017,s3://nda-abcd/NDARINVAAA_baselineYear1Arm1_ABCD-T2_20170504102000.tgz,baseline\n\
3,11,NDAR_INVAAA,05/04/2017,s3://nda-abcd/NDARINVAAA_baselineYear1Arm1_ABCD-T1_20170504101112.tgz,baseline\n\
4,12,NDAR_INVBBB,06/01/2017,s3://nda-abcd/NDARINVBBB_baselineYear1Arm1_ABCD-T1_20170601090000.tgz,baseline\n";
        let table = Table::parse(Path::new("orac_miNDAR.csv"), text, ',', 0).unwrap();
        Image03Table::from_table(&table).unwrap()
    }

    #[test]
    fn duplicates_share_file_with_distinct_ids() {
        let table = export();
        let ids = table
            .duplicates()
            .into_iter()
            .map(|record| record.image03_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn fast_track_lookup_takes_last_match() {
        let subject: SubjectId = "INVAAA".parse().unwrap();
        let lookup = export().fast_track_record(
            &subject,
            "NDARINVAAA_baselineYear1Arm1_ABCD-T1_20170504101112.tgz",
        );
        match lookup {
            FastTrackLookup::Found { record, note } => {
                assert_eq!(record.image03_id, "3");
                assert_eq!(record.interview_date, "05/04/2017 00:00:00");
                assert!(note.is_some());
            }
            other => panic!("unexpected lookup result: {other:?}"),
        }
    }

    #[test]
    fn fast_track_lookup_reports_missing_subject() {
        let subject: SubjectId = "INVZZZ".parse().unwrap();
        let lookup = export().fast_track_record(&subject, "x.tgz");
        assert!(matches!(lookup, FastTrackLookup::SubjectMissing(_)));
    }

    #[test]
    fn list_files_strips_bucket_prefix() {
        let files = export().list_files("NDAR_INVBBB");
        assert_eq!(
            files,
            vec!["NDARINVBBB_baselineYear1Arm1_ABCD-T1_20170601090000.tgz"]
        );
    }
}
