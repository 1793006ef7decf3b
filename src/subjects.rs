use std::path::Path;

use chrono::NaiveDate;

use crate::domain::SubjectId;
use crate::error::ShareError;
use crate::table::Table;

/// Demographics and visit of one subject, from the subjects file.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectInfo {
    pub pguid: String,
    pub dob: String,
    pub gender: String,
    pub event: String,
}

impl SubjectInfo {
    pub fn lookup(path: &Path, subject: &SubjectId) -> Result<Self, ShareError> {
        let table = Table::read_csv(path)?;
        let pguid = table.column("pGUID")?;
        let dob = table.column("dob")?;
        let gender = table.column("gender")?;
        let event = table.column("event_rc")?;

        let key = subject.pguid();
        table
            .rows()
            .iter()
            .find(|row| row[pguid].trim() == key)
            .map(|row| SubjectInfo {
                pguid: key.clone(),
                dob: row[dob].trim().to_string(),
                gender: row[gender].trim().to_string(),
                event: row[event].trim().to_string(),
            })
            .ok_or_else(|| ShareError::SubjectNotFound(format!("{key} in {}", path.display())))
    }

    /// Age in whole months at `series_date` (`%Y%m%d`), from years rounded to
    /// one decimal.
    pub fn interview_age(&self, series_date: &str) -> Result<i64, ShareError> {
        let born = NaiveDate::parse_from_str(&self.dob, "%Y-%m-%d")
            .map_err(|err| invalid_date("dob", &self.dob, err))?;
        let scanned = NaiveDate::parse_from_str(series_date, "%Y%m%d")
            .map_err(|err| invalid_date("series date", series_date, err))?;
        let days = (scanned - born).num_days() as f64;
        let years = (days / 365.25 * 10.0).round() / 10.0;
        Ok((years * 12.0).round() as i64)
    }
}

/// `MM/DD/YYYY 00:00:00` from a `%Y%m%d` series date.
pub fn interview_date_from_series(series_date: &str) -> Result<String, ShareError> {
    NaiveDate::parse_from_str(series_date, "%Y%m%d")
        .map(|date| date.format("%m/%d/%Y 00:00:00").to_string())
        .map_err(|err| invalid_date("series date", series_date, err))
}

fn invalid_date(field: &str, value: &str, err: chrono::ParseError) -> ShareError {
    ShareError::InvalidDate {
        field: field.to_string(),
        value: value.to_string(),
        message: err.to_string(),
    }
}
