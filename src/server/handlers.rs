use actix_web::http::header;
use actix_web::{web, HttpResponse, Responder};
use async_stream::stream;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::task::{spawn_blocking, JoinError};

use super::AppState;
use crate::extractors::AudioFormat;
use crate::jobs::{DeleteOutcome, SubmitOutcome};
use crate::store::JobStatus;
use crate::JobError;

#[derive(Deserialize)]
pub struct PageQuery {
    // Parsed by hand so junk falls back to page 1.
    pub page: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitForm {
    pub youtube_url: Option<String>,
}

#[derive(Serialize)]
struct SubmitResponse {
    #[serde(flatten)]
    outcome: SubmitOutcome,
    message: String,
}

#[derive(Serialize)]
struct StatusMessage {
    status: JobStatus,
    message: String,
}

fn status_message(status: JobStatus, message: impl Into<String>) -> StatusMessage {
    StatusMessage {
        status,
        message: message.into(),
    }
}

fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(status_message(JobStatus::Failed, "File not found."))
}

fn store_failure(e: &JobError) -> HttpResponse {
    tracing::error!("{}", e);
    HttpResponse::InternalServerError().json(status_message(JobStatus::Failed, e.to_string()))
}

fn worker_failure(e: JoinError) -> HttpResponse {
    tracing::error!("Store task failed: {}", e);
    HttpResponse::InternalServerError()
        .json(status_message(JobStatus::Failed, "Internal server error."))
}

pub async fn index(query: web::Query<PageQuery>, state: web::Data<AppState>) -> impl Responder {
    let page = query
        .page
        .as_deref()
        .and_then(|p| p.trim().parse::<usize>().ok())
        .unwrap_or(1);

    let manager = state.manager.clone();
    match spawn_blocking(move || manager.list(page)).await {
        Ok(Ok(page)) => HttpResponse::Ok()
            .append_header((header::CACHE_CONTROL, "no-store"))
            .json(page),
        Ok(Err(e)) => store_failure(&e),
        Err(e) => worker_failure(e),
    }
}

pub async fn submit(form: web::Form<SubmitForm>, state: web::Data<AppState>) -> impl Responder {
    let url = form.youtube_url.clone().unwrap_or_default();
    tracing::info!("[SUBMIT] url={}", url);

    match state.manager.submit(&url).await {
        Ok(record) => HttpResponse::Ok().json(SubmitResponse {
            outcome: SubmitOutcome::from(&record),
            message: format!("Successfully converted: {}", record.title),
        }),
        Err(e) => {
            let body = SubmitResponse {
                outcome: SubmitOutcome::failed(),
                message: e.to_string(),
            };
            match e {
                JobError::InvalidInput => HttpResponse::BadRequest().json(body),
                JobError::ExtractionFailure => HttpResponse::BadGateway().json(body),
                JobError::Busy(_) => HttpResponse::TooManyRequests().json(body),
                _ => {
                    tracing::error!("{}", e);
                    HttpResponse::InternalServerError().json(body)
                }
            }
        }
    }
}

pub async fn download(path: web::Path<String>, state: web::Data<AppState>) -> impl Responder {
    let file = path.into_inner();

    let file_path = match state.manager.resolve_download(&file) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("{}", e);
            return not_found();
        }
    };

    let mut handle = match File::open(&file_path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("Failed to open {}: {}", file_path.display(), e);
            return not_found();
        }
    };
    let len = match handle.metadata().await {
        Ok(m) => m.len(),
        Err(e) => {
            return HttpResponse::InternalServerError()
                .json(status_message(JobStatus::Failed, e.to_string()));
        }
    };

    let content_type = file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(AudioFormat::from_extension)
        .map(|format| format.mime_type())
        .unwrap_or("application/octet-stream");

    let body = stream! {
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            match handle.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => yield Ok::<_, std::io::Error>(bytes::Bytes::copy_from_slice(&buffer[..n])),
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    };

    HttpResponse::Ok()
        .content_type(content_type)
        .append_header((header::CONTENT_LENGTH, len.to_string()))
        .append_header((header::CONTENT_DISPOSITION, attachment_header(&file)))
        .streaming(body)
}

pub async fn delete(path: web::Path<String>, state: web::Data<AppState>) -> impl Responder {
    let requested = path.into_inner();

    let manager = state.manager.clone();
    match spawn_blocking(move || manager.delete(&requested)).await {
        Ok(Ok(DeleteOutcome::Deleted { .. })) => HttpResponse::Ok()
            .json(status_message(JobStatus::Success, "File deleted successfully.")),
        Ok(Ok(DeleteOutcome::NotFound(_))) => not_found(),
        Ok(Err(e @ JobError::DeletionFailure { .. })) => HttpResponse::InternalServerError()
            .json(status_message(JobStatus::Failed, e.to_string())),
        Ok(Err(e)) => store_failure(&e),
        Err(e) => worker_failure(e),
    }
}

pub async fn health(state: web::Data<AppState>) -> impl Responder {
    let store = state.manager.store().clone();
    let records = spawn_blocking(move || store.len()).await.ok().and_then(Result::ok);
    HttpResponse::Ok().json(serde_json::json!({
        "service": "mp3tube",
        "version": env!("CARGO_PKG_VERSION"),
        "records": records,
        "free_slots": state.manager.available_slots(),
    }))
}

/// `Content-Disposition` with an ASCII fallback and the exact UTF-8 name.
fn attachment_header(file: &str) -> String {
    let fallback: String = file
        .chars()
        .map(|c| if c.is_ascii() && c != '"' && !c.is_ascii_control() { c } else { '_' })
        .collect();
    format!(
        r#"attachment; filename="{}"; filename*=UTF-8''{}"#,
        fallback,
        urlencoding::encode(file)
    )
}
