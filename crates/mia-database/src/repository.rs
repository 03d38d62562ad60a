//! 层级仓库
//!
//! Patient → Study → Series → File 四级结构加 Modality 引用的
//! find-or-create原语，以及摄取使用的单事务提交。
//!
//! 自然键唯一性由存储层的UNIQUE约束兜底：插入遇到冲突说明并发
//! 事务已写入同键行，按约定重查一次并沿用已存在的行，重查仍然
//! 落空才向上报错。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use mia_core::models::{
    FileAncestry, ImageFile, IngestOutcome, IngestRecord, Modality, Patient, Series, Study,
};
use mia_core::ports::HierarchyStore;
use mia_core::{ArchiveError, Result};

use crate::connection::DatabasePool;
use crate::models::{DbFile, DbFileAncestry, DbModality, DbPatient, DbSeries, DbStudy};

fn db_err(e: sqlx::Error) -> ArchiveError {
    ArchiveError::Database(e.to_string())
}

/// 层级仓库
#[derive(Debug, Clone)]
pub struct HierarchyRepository {
    pool: DatabasePool,
}

impl HierarchyRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn init_schema(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 设备类型表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS modalities (
                id UUID PRIMARY KEY,
                name VARCHAR(64) UNIQUE NOT NULL
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(db_err)?;

        // 患者表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS patients (
                id UUID PRIMARY KEY,
                name VARCHAR(255) UNIQUE NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(db_err)?;

        // 检查表；自然键在所属患者范围内唯一
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS studies (
                id UUID PRIMARY KEY,
                study_name VARCHAR(255) NOT NULL,
                patient_id UUID NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                UNIQUE (study_name, patient_id)
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(db_err)?;

        // 系列表；自然键在所属检查范围内唯一
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS series (
                id UUID PRIMARY KEY,
                series_name VARCHAR(255) NOT NULL,
                study_id UUID NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
                modality_id UUID NOT NULL REFERENCES modalities(id),
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                UNIQUE (series_name, study_id)
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(db_err)?;

        // 文件表；自然键在所属系列范围内唯一
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id UUID PRIMARY KEY,
                file_name VARCHAR(255) NOT NULL,
                file_path VARCHAR(512) NOT NULL,
                series_id UUID NOT NULL REFERENCES series(id) ON DELETE CASCADE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                UNIQUE (file_name, series_id)
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(db_err)?;

        self.create_indexes().await?;

        tracing::info!("database schema initialized");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(name)",
            "CREATE INDEX IF NOT EXISTS idx_studies_patient_id ON studies(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_series_study_id ON series(study_id)",
            "CREATE INDEX IF NOT EXISTS idx_series_modality_id ON series(modality_id)",
            "CREATE INDEX IF NOT EXISTS idx_files_series_id ON files(series_id)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await.map_err(db_err)?;
        }

        Ok(())
    }

    // ========== find-or-create原语 ==========
    //
    // 统一形态：SELECT命中即返回；未命中则INSERT .. ON CONFLICT DO
    // NOTHING RETURNING id；插入因冲突未返回行时重查一次。命中行
    // 沿用首次写入的created_at等描述性字段。

    /// 按自然键查找或创建设备类型
    async fn find_or_create_modality(
        tx: &mut Transaction<'_, Postgres>,
        name: &str,
    ) -> Result<Uuid> {
        if let Some(row) = sqlx::query("SELECT id FROM modalities WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
        {
            return Ok(row.get("id"));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO modalities (id, name)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            RETURNING id
        "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;

        if let Some(row) = inserted {
            return Ok(row.get("id"));
        }

        sqlx::query("SELECT id FROM modalities WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
            .map(|row| row.get("id"))
            .ok_or_else(|| {
                ArchiveError::Database(format!(
                    "modality '{name}' missing after conflicting insert"
                ))
            })
    }

    /// 按自然键查找或创建患者
    async fn find_or_create_patient(
        tx: &mut Transaction<'_, Postgres>,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        if let Some(row) = sqlx::query("SELECT id FROM patients WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
        {
            return Ok(row.get("id"));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO patients (id, name, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            RETURNING id
        "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(created_at)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;

        if let Some(row) = inserted {
            return Ok(row.get("id"));
        }

        sqlx::query("SELECT id FROM patients WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
            .map(|row| row.get("id"))
            .ok_or_else(|| {
                ArchiveError::Database(format!(
                    "patient '{name}' missing after conflicting insert"
                ))
            })
    }

    /// 在患者范围内按自然键查找或创建检查
    async fn find_or_create_study(
        tx: &mut Transaction<'_, Postgres>,
        patient_id: Uuid,
        study_name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        if let Some(row) =
            sqlx::query("SELECT id FROM studies WHERE study_name = $1 AND patient_id = $2")
                .bind(study_name)
                .bind(patient_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(db_err)?
        {
            return Ok(row.get("id"));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO studies (id, study_name, patient_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (study_name, patient_id) DO NOTHING
            RETURNING id
        "#,
        )
        .bind(Uuid::new_v4())
        .bind(study_name)
        .bind(patient_id)
        .bind(created_at)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;

        if let Some(row) = inserted {
            return Ok(row.get("id"));
        }

        sqlx::query("SELECT id FROM studies WHERE study_name = $1 AND patient_id = $2")
            .bind(study_name)
            .bind(patient_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
            .map(|row| row.get("id"))
            .ok_or_else(|| {
                ArchiveError::Database(format!(
                    "study '{study_name}' missing after conflicting insert"
                ))
            })
    }

    /// 在检查范围内按自然键查找或创建系列
    async fn find_or_create_series(
        tx: &mut Transaction<'_, Postgres>,
        study_id: Uuid,
        modality_id: Uuid,
        series_name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        if let Some(row) =
            sqlx::query("SELECT id FROM series WHERE series_name = $1 AND study_id = $2")
                .bind(series_name)
                .bind(study_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(db_err)?
        {
            return Ok(row.get("id"));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO series (id, series_name, study_id, modality_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (series_name, study_id) DO NOTHING
            RETURNING id
        "#,
        )
        .bind(Uuid::new_v4())
        .bind(series_name)
        .bind(study_id)
        .bind(modality_id)
        .bind(created_at)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;

        if let Some(row) = inserted {
            return Ok(row.get("id"));
        }

        sqlx::query("SELECT id FROM series WHERE series_name = $1 AND study_id = $2")
            .bind(series_name)
            .bind(study_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
            .map(|row| row.get("id"))
            .ok_or_else(|| {
                ArchiveError::Database(format!(
                    "series '{series_name}' missing after conflicting insert"
                ))
            })
    }

    /// 在系列范围内按自然键查找或创建文件
    ///
    /// 返回的bool表示行是否为本次新建；命中已有自然键时沿用首次
    /// 写入的file_path与created_at，新上传的路径参数被丢弃。
    async fn find_or_create_file(
        tx: &mut Transaction<'_, Postgres>,
        series_id: Uuid,
        file_name: &str,
        file_path: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(Uuid, bool)> {
        if let Some(row) =
            sqlx::query("SELECT id FROM files WHERE file_name = $1 AND series_id = $2")
                .bind(file_name)
                .bind(series_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(db_err)?
        {
            return Ok((row.get("id"), false));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO files (id, file_name, file_path, series_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (file_name, series_id) DO NOTHING
            RETURNING id
        "#,
        )
        .bind(Uuid::new_v4())
        .bind(file_name)
        .bind(file_path)
        .bind(series_id)
        .bind(created_at)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;

        if let Some(row) = inserted {
            return Ok((row.get("id"), true));
        }

        sqlx::query("SELECT id FROM files WHERE file_name = $1 AND series_id = $2")
            .bind(file_name)
            .bind(series_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
            .map(|row| (row.get("id"), false))
            .ok_or_else(|| {
                ArchiveError::Database(format!(
                    "file '{file_name}' missing after conflicting insert"
                ))
            })
    }

    /// 事务体：按 Modality → Patient → Study → Series → File 的顺序逐级解析
    async fn upsert_hierarchy(
        tx: &mut Transaction<'_, Postgres>,
        record: &IngestRecord,
    ) -> Result<IngestOutcome> {
        let modality_id = Self::find_or_create_modality(tx, &record.modality_name).await?;
        let patient_id =
            Self::find_or_create_patient(tx, &record.patient_name, record.ingested_at).await?;
        let study_id = Self::find_or_create_study(
            tx,
            patient_id,
            &record.study_name,
            record.study_created_at,
        )
        .await?;
        let series_id = Self::find_or_create_series(
            tx,
            study_id,
            modality_id,
            &record.series_name,
            record.series_created_at,
        )
        .await?;
        let (file_id, file_created) = Self::find_or_create_file(
            tx,
            series_id,
            &record.file_name,
            &record.file_path,
            record.ingested_at,
        )
        .await?;

        Ok(IngestOutcome {
            patient_id,
            study_id,
            series_id,
            file_id,
            file_created,
        })
    }

    // ========== 读模型查询 ==========

    /// 列出患者，可按姓名模糊过滤
    pub async fn list_patients(&self, name: Option<&str>, limit: i64) -> Result<Vec<Patient>> {
        let pool = self.pool.pool();

        let results = match name {
            Some(name) => {
                sqlx::query_as::<_, DbPatient>(
                    "SELECT * FROM patients WHERE name ILIKE $1 ORDER BY created_at DESC LIMIT $2",
                )
                .bind(format!("%{}%", name))
                .bind(limit)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, DbPatient>(
                    "SELECT * FROM patients ORDER BY created_at DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(pool)
                .await
            }
        }
        .map_err(db_err)?;

        Ok(results.into_iter().map(Patient::from).collect())
    }

    /// 根据ID查找患者
    pub async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        let result = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.map(Patient::from))
    }

    /// 根据患者ID获取所有检查
    pub async fn get_studies_by_patient(&self, patient_id: Uuid) -> Result<Vec<Study>> {
        let results = sqlx::query_as::<_, DbStudy>(
            "SELECT * FROM studies WHERE patient_id = $1 ORDER BY created_at DESC",
        )
        .bind(patient_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(results.into_iter().map(Study::from).collect())
    }

    /// 根据ID查找检查
    pub async fn get_study(&self, id: Uuid) -> Result<Option<Study>> {
        let result = sqlx::query_as::<_, DbStudy>("SELECT * FROM studies WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.map(Study::from))
    }

    /// 根据检查ID获取所有系列
    pub async fn get_series_by_study(&self, study_id: Uuid) -> Result<Vec<Series>> {
        let results = sqlx::query_as::<_, DbSeries>(
            "SELECT * FROM series WHERE study_id = $1 ORDER BY created_at",
        )
        .bind(study_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(results.into_iter().map(Series::from).collect())
    }

    /// 根据ID查找系列
    pub async fn get_series(&self, id: Uuid) -> Result<Option<Series>> {
        let result = sqlx::query_as::<_, DbSeries>("SELECT * FROM series WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.map(Series::from))
    }

    /// 根据ID查找设备类型
    pub async fn get_modality(&self, id: Uuid) -> Result<Option<Modality>> {
        let result = sqlx::query_as::<_, DbModality>("SELECT * FROM modalities WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.map(Modality::from))
    }

    /// 根据系列ID获取所有文件
    pub async fn get_files_by_series(&self, series_id: Uuid) -> Result<Vec<ImageFile>> {
        let results = sqlx::query_as::<_, DbFile>(
            "SELECT * FROM files WHERE series_id = $1 ORDER BY created_at",
        )
        .bind(series_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(results.into_iter().map(ImageFile::from).collect())
    }

    /// 根据ID查找文件
    pub async fn get_file(&self, id: Uuid) -> Result<Option<ImageFile>> {
        let result = sqlx::query_as::<_, DbFile>("SELECT * FROM files WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.map(ImageFile::from))
    }

    /// 将文件解析为完整的祖先链：File → Series → Study → Patient 加 Modality
    pub async fn resolve_file(&self, id: Uuid) -> Result<Option<FileAncestry>> {
        let result = sqlx::query_as::<_, DbFileAncestry>(
            r#"
            SELECT
                f.id AS file_id,
                f.file_name,
                f.file_path,
                f.created_at AS file_created_at,
                se.id AS series_id,
                se.series_name,
                se.created_at AS series_created_at,
                m.id AS modality_id,
                m.name AS modality_name,
                st.id AS study_id,
                st.study_name,
                st.created_at AS study_created_at,
                p.id AS patient_id,
                p.name AS patient_name,
                p.created_at AS patient_created_at
            FROM files f
            JOIN series se ON se.id = f.series_id
            JOIN modalities m ON m.id = se.modality_id
            JOIN studies st ON st.id = se.study_id
            JOIN patients p ON p.id = st.patient_id
            WHERE f.id = $1
        "#,
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.map(FileAncestry::from))
    }
}

#[async_trait]
impl HierarchyStore for HierarchyRepository {
    /// 在单个事务内完成整条层级的find-or-create并提交
    ///
    /// 任何一步失败都回滚整个事务，读者要么看到完整的新实体链，
    /// 要么什么都看不到。
    async fn commit_ingest(&self, record: &IngestRecord) -> Result<IngestOutcome> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let outcome = match Self::upsert_hierarchy(&mut tx, record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(error = %rollback, "rollback failed after ingest error");
                }
                return Err(e);
            }
        };

        tx.commit().await.map_err(db_err)?;

        tracing::info!(
            patient_id = %outcome.patient_id,
            study_id = %outcome.study_id,
            series_id = %outcome.series_id,
            file_id = %outcome.file_id,
            file_created = outcome.file_created,
            "hierarchy committed"
        );
        Ok(outcome)
    }
}
