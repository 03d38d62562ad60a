//! 数据库行模型

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use mia_core::models::{FileAncestry, ImageFile, Modality, Patient, Series, Study};

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 设备类型表行
#[derive(Debug, FromRow)]
pub struct DbModality {
    pub id: Uuid,
    pub name: String,
}

impl From<DbModality> for Modality {
    fn from(row: DbModality) -> Self {
        Modality {
            id: row.id,
            name: row.name,
        }
    }
}

/// 患者表行
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<DbPatient> for Patient {
    fn from(row: DbPatient) -> Self {
        Patient {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

/// 检查表行
#[derive(Debug, FromRow)]
pub struct DbStudy {
    pub id: Uuid,
    pub study_name: String,
    pub patient_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<DbStudy> for Study {
    fn from(row: DbStudy) -> Self {
        Study {
            id: row.id,
            study_name: row.study_name,
            patient_id: row.patient_id,
            created_at: row.created_at,
        }
    }
}

/// 系列表行
#[derive(Debug, FromRow)]
pub struct DbSeries {
    pub id: Uuid,
    pub series_name: String,
    pub study_id: Uuid,
    pub modality_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<DbSeries> for Series {
    fn from(row: DbSeries) -> Self {
        Series {
            id: row.id,
            series_name: row.series_name,
            study_id: row.study_id,
            modality_id: row.modality_id,
            created_at: row.created_at,
        }
    }
}

/// 文件表行
#[derive(Debug, FromRow)]
pub struct DbFile {
    pub id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub series_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<DbFile> for ImageFile {
    fn from(row: DbFile) -> Self {
        ImageFile {
            id: row.id,
            file_name: row.file_name,
            file_path: row.file_path,
            series_id: row.series_id,
            created_at: row.created_at,
        }
    }
}

/// 文件及其完整祖先链的联查行
#[derive(Debug, FromRow)]
pub struct DbFileAncestry {
    pub file_id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub file_created_at: DateTime<Utc>,
    pub series_id: Uuid,
    pub series_name: String,
    pub series_created_at: DateTime<Utc>,
    pub modality_id: Uuid,
    pub modality_name: String,
    pub study_id: Uuid,
    pub study_name: String,
    pub study_created_at: DateTime<Utc>,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_created_at: DateTime<Utc>,
}

impl From<DbFileAncestry> for FileAncestry {
    fn from(row: DbFileAncestry) -> Self {
        FileAncestry {
            file: ImageFile {
                id: row.file_id,
                file_name: row.file_name,
                file_path: row.file_path,
                series_id: row.series_id,
                created_at: row.file_created_at,
            },
            series: Series {
                id: row.series_id,
                series_name: row.series_name,
                study_id: row.study_id,
                modality_id: row.modality_id,
                created_at: row.series_created_at,
            },
            modality: Modality {
                id: row.modality_id,
                name: row.modality_name,
            },
            study: Study {
                id: row.study_id,
                study_name: row.study_name,
                patient_id: row.patient_id,
                created_at: row.study_created_at,
            },
            patient: Patient {
                id: row.patient_id,
                name: row.patient_name,
                created_at: row.patient_created_at,
            },
        }
    }
}
