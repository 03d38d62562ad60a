//! HTTP处理器

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use mia_core::ArchiveError;
use mia_ingest::IngestError;

use crate::server::AppState;

/// HTTP错误载体
#[derive(Debug)]
pub enum ApiError {
    Ingest(IngestError),
    Archive(ArchiveError),
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        ApiError::Ingest(e)
    }
}

impl From<ArchiveError> for ApiError {
    fn from(e: ArchiveError) -> Self {
        ApiError::Archive(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Ingest(e) => {
                let status = match e {
                    // 提取失败是可重新上传的客户端侧问题
                    IngestError::ExtractFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    IngestError::StoreFailed(_) | IngestError::CommitFailed(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.kind(), e.to_string())
            }
            ApiError::Archive(e) => {
                let status = match &e {
                    ArchiveError::NotFound(_) => StatusCode::NOT_FOUND,
                    ArchiveError::Validation(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, "archive_error", e.to_string())
            }
        };

        let body = Json(json!({
            "error": true,
            "kind": kind,
            "message": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "MIA Archive API",
        "version": "1.0.0",
        "status": "running",
        "endpoints": {
            "health": "/health",
            "api": "/api/v1"
        }
    }))
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": "1.0.0"
    }))
}

/// 上传处理器：层级结构唯一的写入路径
///
/// 取multipart中第一个携带文件名的字段交给摄取编排器。
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ArchiveError::Validation(format!("invalid multipart body: {e}")))?
    {
        let Some(file_name) = field.file_name().map(|name| name.to_string()) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ArchiveError::Validation(format!("unreadable upload stream: {e}")))?;

        info!(file_name, bytes = data.len(), "ingesting upload");
        let outcome = state.orchestrator.ingest(&file_name, &data).await?;

        return Ok((
            StatusCode::CREATED,
            Json(json!({
                "file_name": file_name,
                "patient_id": outcome.patient_id,
                "study_id": outcome.study_id,
                "series_id": outcome.series_id,
                "file_id": outcome.file_id,
                "duplicate": !outcome.file_created
            })),
        ));
    }

    Err(ArchiveError::Validation("multipart upload contains no file field".to_string()).into())
}

/// 患者列表查询参数
#[derive(Debug, Deserialize)]
pub struct PatientQueryParams {
    pub name: Option<String>,
    pub limit: Option<i64>,
}

/// 患者列表处理器
pub async fn list_patients(
    State(state): State<AppState>,
    Query(params): Query<PatientQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let patients = state
        .repository
        .list_patients(params.name.as_deref(), limit)
        .await?;
    let total = patients.len();

    Ok(Json(json!({
        "patients": patients,
        "total": total
    })))
}

/// 患者详情处理器：患者及其全部检查
pub async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let patient = state
        .repository
        .get_patient(id)
        .await?
        .ok_or_else(|| ArchiveError::NotFound(format!("patient {id}")))?;
    let studies = state.repository.get_studies_by_patient(id).await?;

    Ok(Json(json!({
        "patient": patient,
        "studies": studies
    })))
}

/// 检查详情处理器：检查及其全部系列
pub async fn get_study(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let study = state
        .repository
        .get_study(id)
        .await?
        .ok_or_else(|| ArchiveError::NotFound(format!("study {id}")))?;
    let series = state.repository.get_series_by_study(id).await?;

    Ok(Json(json!({
        "study": study,
        "series": series
    })))
}

/// 系列详情处理器：系列、其设备类型与全部文件
pub async fn get_series(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let series = state
        .repository
        .get_series(id)
        .await?
        .ok_or_else(|| ArchiveError::NotFound(format!("series {id}")))?;
    let modality = state.repository.get_modality(series.modality_id).await?;
    let files = state.repository.get_files_by_series(id).await?;

    Ok(Json(json!({
        "series": series,
        "modality": modality,
        "files": files
    })))
}

/// 文件详情处理器：文件及其完整祖先链
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let ancestry = state
        .repository
        .resolve_file(id)
        .await?
        .ok_or_else(|| ArchiveError::NotFound(format!("file {id}")))?;

    Ok(Json(ancestry))
}

/// 文件下载处理器：回传内容存储中的原始字节
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    use mia_core::ports::ContentStore;

    let file = state
        .repository
        .get_file(id)
        .await?
        .ok_or_else(|| ArchiveError::NotFound(format!("file {id}")))?;

    let data = state
        .store
        .get(std::path::Path::new(&file.file_path))
        .await?;

    let headers = [
        (header::CONTENT_TYPE, "application/dicom".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.file_name),
        ),
    ];

    Ok((headers, data))
}
