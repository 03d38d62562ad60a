//! DICOM日期时间重建
//!
//! 将提取器输出的`YYYYMMDD`日期与`HHMMSS`时间合并为一个UTC时间戳。
//! 格式不合法即报错，绝不静默回退到默认值。

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::{ArchiveError, Result};

/// 合并DICOM日期与时间字段
pub fn combine(date: &str, time: &str) -> Result<DateTime<Utc>> {
    if date.len() != 8 {
        return Err(ArchiveError::Validation(format!(
            "invalid DICOM date '{date}': expected YYYYMMDD"
        )));
    }
    if time.len() != 6 {
        return Err(ArchiveError::Validation(format!(
            "invalid DICOM time '{time}': expected HHMMSS"
        )));
    }

    let date = NaiveDate::parse_from_str(date, "%Y%m%d")
        .map_err(|e| ArchiveError::Validation(format!("invalid DICOM date '{date}': {e}")))?;
    let time = NaiveTime::parse_from_str(time, "%H%M%S")
        .map_err(|e| ArchiveError::Validation(format!("invalid DICOM time '{time}': {e}")))?;

    // DICOM时间戳不携带时区，统一按UTC存储
    Ok(DateTime::from_naive_utc_and_offset(date.and_time(time), Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_valid_fields() {
        let ts = combine("20240115", "093000").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-15T09:30:00+00:00");
    }

    #[test]
    fn test_combine_rejects_short_date() {
        assert!(combine("2024011", "093000").is_err());
    }

    #[test]
    fn test_combine_rejects_short_time() {
        assert!(combine("20240115", "9300").is_err());
    }

    #[test]
    fn test_combine_rejects_non_numeric_date() {
        assert!(combine("2024AB15", "093000").is_err());
    }

    #[test]
    fn test_combine_rejects_impossible_time() {
        assert!(combine("20240115", "256161").is_err());
    }

    #[test]
    fn test_combine_rejects_impossible_date() {
        assert!(combine("20240230", "093000").is_err());
    }
}
