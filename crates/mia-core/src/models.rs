//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dicom_time;
use crate::{ArchiveError, Result};

/// 设备类型
///
/// 由Series引用，不属于层级树本身。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modality {
    pub id: Uuid,
    pub name: String, // 设备类型名 (CT, MR, DR等)，自然键
}

/// 患者信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String, // 患者姓名，自然键
    pub created_at: DateTime<Utc>,
}

/// 检查信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub id: Uuid,
    pub study_name: String, // 在所属患者范围内构成自然键
    pub patient_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// 系列信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub id: Uuid,
    pub series_name: String, // 在所属检查范围内构成自然键
    pub study_id: Uuid,
    pub modality_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// 影像文件信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFile {
    pub id: Uuid,
    pub file_name: String, // 在所属系列范围内构成自然键
    pub file_path: String, // 内容存储中的落盘路径
    pub series_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// 文件的完整祖先链解析结果
///
/// 读模型用：File → Series → Study → Patient，外加Series引用的Modality。
#[derive(Debug, Clone, Serialize)]
pub struct FileAncestry {
    pub file: ImageFile,
    pub series: Series,
    pub modality: Modality,
    pub study: Study,
    pub patient: Patient,
}

/// 提取器输出的描述性元数据记录
///
/// 八个字段缺一不可，反序列化不提供默认值；字段名与外部工具的
/// 输出键保持一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DicomMetadata {
    #[serde(rename = "Modality")]
    pub modality: String,
    #[serde(rename = "PatientName")]
    pub patient_name: String,
    #[serde(rename = "StudyDescription")]
    pub study_description: String,
    #[serde(rename = "StudyDate")]
    pub study_date: String, // YYYYMMDD
    #[serde(rename = "StudyTime")]
    pub study_time: String, // HHMMSS
    #[serde(rename = "SeriesDescription")]
    pub series_description: String,
    #[serde(rename = "SeriesDate")]
    pub series_date: String,
    #[serde(rename = "SeriesTime")]
    pub series_time: String,
}

impl DicomMetadata {
    /// 校验所有字段均非空
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("Modality", &self.modality),
            ("PatientName", &self.patient_name),
            ("StudyDescription", &self.study_description),
            ("StudyDate", &self.study_date),
            ("StudyTime", &self.study_time),
            ("SeriesDescription", &self.series_description),
            ("SeriesDate", &self.series_date),
            ("SeriesTime", &self.series_time),
        ];

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ArchiveError::Validation(format!(
                    "extractor field '{name}' is empty"
                )));
            }
        }
        Ok(())
    }

    /// 检查时间戳：StudyDate + StudyTime
    pub fn study_timestamp(&self) -> Result<DateTime<Utc>> {
        dicom_time::combine(&self.study_date, &self.study_time)
    }

    /// 系列时间戳：SeriesDate + SeriesTime
    pub fn series_timestamp(&self) -> Result<DateTime<Utc>> {
        dicom_time::combine(&self.series_date, &self.series_time)
    }
}

/// 单次摄取写入层级结构所需的全部字段
#[derive(Debug, Clone)]
pub struct IngestRecord {
    pub modality_name: String,
    pub patient_name: String,
    pub study_name: String,
    pub study_created_at: DateTime<Utc>,
    pub series_name: String,
    pub series_created_at: DateTime<Utc>,
    pub file_name: String,
    pub file_path: String,
    /// Patient与File首次创建时使用的时间戳
    pub ingested_at: DateTime<Utc>,
}

/// 摄取事务提交后的层级标识
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub patient_id: Uuid,
    pub study_id: Uuid,
    pub series_id: Uuid,
    pub file_id: Uuid,
    /// File行是否为本次新建；false表示命中已有自然键，沿用首次写入
    pub file_created: bool,
}
