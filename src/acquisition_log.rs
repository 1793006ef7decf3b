use std::cmp::Ordering;
use std::path::Path;

use crate::container::ContainerSeries;
use crate::domain::{MAX_SERIES_PER_PROCESS, Modality, SubjectId};
use crate::error::ShareError;
use crate::table::Table;

/// Acquisition-log row for one series, with its time-order rank.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedSeries {
    pub pguid: String,
    pub event: String,
    pub site: String,
    pub manufacturer: String,
    pub series_type: String,
    pub uid: String,
    pub study_date: String,
    pub series_time: String,
    pub rank: u32,
}

/// A container series confirmed by the acquisition log.
#[derive(Debug, Clone)]
pub struct RankedSeries {
    pub series: ContainerSeries,
    pub logged: LoggedSeries,
}

impl RankedSeries {
    pub fn rank(&self) -> u32 {
        self.logged.rank
    }
}

pub struct AcquisitionLog {
    table: Table,
}

impl AcquisitionLog {
    pub fn read(path: &Path) -> Result<Self, ShareError> {
        Ok(Self {
            table: Table::read_csv(path)?,
        })
    }

    pub fn from_table(table: Table) -> Self {
        Self { table }
    }

    /// Rows of this subject and modality ranked 1..N by (date, time).
    pub fn select(
        &self,
        subject: &SubjectId,
        modality: Modality,
    ) -> Result<Vec<LoggedSeries>, ShareError> {
        let pguid = self.table.column("pGUID")?;
        let event = self.table.column("EventName")?;
        let site = self.table.column("SiteName")?;
        let manufacturer = self.table.column("Manufacturer")?;
        let series_type = self.table.column("SeriesType")?;
        let uid = self.table.column("SeriesInstanceUID")?;
        let study_date = self.table.column("StudyDate")?;
        let series_time = self.table.column("SeriesTime")?;

        let mut selected = self
            .table
            .rows()
            .iter()
            .filter(|row| row[pguid].contains(subject.as_str()))
            .filter(|row| modality.matches_log_series_type(row[series_type].trim()))
            .map(|row| LoggedSeries {
                pguid: row[pguid].trim().to_string(),
                event: row[event].trim().to_string(),
                site: row[site].trim().to_string(),
                manufacturer: row[manufacturer].trim().to_string(),
                series_type: row[series_type].trim().to_string(),
                uid: row[uid].trim().to_string(),
                study_date: row[study_date].trim().to_string(),
                series_time: row[series_time].trim().to_string(),
                rank: 0,
            })
            .collect::<Vec<_>>();

        selected.sort_by(|a, b| {
            compare_values(&a.study_date, &b.study_date)
                .then_with(|| compare_values(&a.series_time, &b.series_time))
        });
        for (position, series) in selected.iter_mut().enumerate() {
            series.rank = position as u32 + 1;
        }

        tracing::debug!(
            subject = %subject,
            modality = %modality,
            rows = selected.len(),
            "selected acquisition log rows"
        );
        Ok(selected)
    }
}

/// Numbers before text, numbers by value, ties and text by the raw string.
fn compare_values(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Inner join of filtered container series with logged series by UID,
/// keeping container order.
pub fn merge_by_uid(
    filtered: Vec<ContainerSeries>,
    logged: &[LoggedSeries],
) -> Result<Vec<RankedSeries>, ShareError> {
    let mut merged = Vec::new();
    for series in filtered {
        for entry in logged.iter().filter(|entry| entry.uid == series.uid) {
            if !same_time(&series.time, &entry.series_time) {
                return Err(ShareError::AcquisitionTimeMismatch {
                    uid: series.uid.clone(),
                    container: series.time.clone(),
                    log: entry.series_time.clone(),
                });
            }
            merged.push(RankedSeries {
                series: series.clone(),
                logged: entry.clone(),
            });
        }
    }

    if merged.len() != logged.len() {
        tracing::warn!(
            merged = merged.len(),
            logged = logged.len(),
            "container series and acquisition log disagree on series count"
        );
    }
    if merged.len() > MAX_SERIES_PER_PROCESS {
        return Err(ShareError::TooManySeries {
            count: merged.len(),
            max: MAX_SERIES_PER_PROCESS,
        });
    }
    Ok(merged)
}

fn same_time(container: &str, log: &str) -> bool {
    match (container.parse::<f64>(), log.parse::<f64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_table(text: &str) -> AcquisitionLog {
        AcquisitionLog::from_table(Table::parse(Path::new("log.csv"), text, ',', 0).unwrap())
    }

    const HEADER: &str =
        "pGUID,EventName,SiteName,Manufacturer,SeriesType,SeriesInstanceUID,StudyDate,SeriesTime\n";

    #[test]
    fn ranks_are_dense_by_date_then_time() {
        let text = format!(
            "{HEADER}\
NDAR_INVAAA,baseline_year_1_arm_1,S1,GE,T1,u3,20170505,90000.0\n\
NDAR_INVAAA,baseline_year_1_arm_1,S1,GE,T1_NORM,u1,20170504,120000.0\n\
NDAR_INVBBB,baseline_year_1_arm_1,S1,GE,T1,u9,20170501,80000.0\n\
NDAR_INVAAA,baseline_year_1_arm_1,S1,GE,T2,u4,20170504,80000.0\n\
NDAR_INVAAA,baseline_year_1_arm_1,S1,GE,T1,u2,20170504,110000.0\n"
        );
        let subject: SubjectId = "INVAAA".parse().unwrap();
        let selected = log_table(&text).select(&subject, Modality::T1).unwrap();

        let uids = selected.iter().map(|s| s.uid.as_str()).collect::<Vec<_>>();
        let ranks = selected.iter().map(|s| s.rank).collect::<Vec<_>>();
        assert_eq!(uids, vec!["u2", "u1", "u3"]);
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn series_time_compares_numerically() {
        let text = format!(
            "{HEADER}\
NDAR_INVAAA,e,S,GE,rsfMRI,a,20170504,95000.0\n\
NDAR_INVAAA,e,S,GE,rsfMRI,b,20170504,100000.0\n"
        );
        let subject: SubjectId = "INVAAA".parse().unwrap();
        let selected = log_table(&text).select(&subject, Modality::RsFmri).unwrap();
        assert_eq!(selected[0].uid, "a");
        assert_eq!(selected[1].uid, "b");
    }

    #[test]
    fn mixed_numeric_and_text_values_sort_consistently() {
        let mut values = vec!["1a", "10", "NaN", "9", "b", "09"];
        values.sort_by(|a, b| compare_values(a, b));
        assert_eq!(values, vec!["09", "9", "10", "NaN", "1a", "b"]);

        for a in &values {
            for b in &values {
                assert_eq!(compare_values(a, b), compare_values(b, a).reverse());
            }
        }
    }
}
