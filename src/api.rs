use std::collections::BTreeMap;
use std::sync::Arc;

use actix_web::{get, post, web, App, HttpResponse, HttpServer};
use log::{info, warn};
use serde_json::{json, Map, Value};

use crate::config::{Config, MAX_WAIT_MINUTES};
use crate::error::{ApiError, PipelineError};
use crate::prompts::{
    load_sheet_export, prompt_items, rows_for_reel, ExternalKey, LineNo, PromptItem,
};
use crate::queue::{Job, JobOutcome, JobQueue, JobRunner, LaneStatus};
use crate::utilities::now_iso;

/// Shared by every handler: configuration and the three job lanes.
pub struct AppState {
    pub config: Config,
    pub images: JobQueue,
    pub uploads: JobQueue,
    pub audio: JobQueue,
}

impl AppState {
    /// Starts the lanes on the current runtime.
    pub fn new(config: Config, runner: Arc<dyn JobRunner>) -> Self {
        AppState {
            config,
            images: JobQueue::spawn("images", runner.clone(), false),
            uploads: JobQueue::spawn("uploads", runner.clone(), true),
            audio: JobQueue::spawn("audio", runner, false),
        }
    }

    fn lanes(&self) -> [&JobQueue; 3] {
        [&self.images, &self.uploads, &self.audio]
    }

    /// Queues `job` on `lane` and waits for it up to the request timeout.
    /// A timed-out job keeps running; only the request gives up.
    async fn dispatch(&self, lane: &JobQueue, job: Job) -> Result<JobOutcome, ApiError> {
        let receiver = lane.submit(job).map_err(|err| match err {
            PipelineError::LaneBusy(_) => {
                let status = lane.status();
                ApiError::Busy {
                    queue_position: status.queue_size + usize::from(status.is_processing),
                }
            }
            other => ApiError::Internal(other.to_string()),
        })?;

        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => Ok(outcome?),
            Ok(Err(_)) => Err(ApiError::Internal(format!(
                "the {} lane dropped the job",
                lane.name()
            ))),
            Err(_) => {
                warn!(
                    "Request on the {} lane timed out after {:?}; the job keeps running",
                    lane.name(),
                    timeout
                );
                Err(ApiError::Timeout(timeout.as_secs()))
            }
        }
    }
}

fn outcome_response(outcome: JobOutcome) -> HttpResponse {
    if outcome.success() {
        HttpResponse::Ok().json(outcome)
    } else {
        HttpResponse::InternalServerError().json(outcome)
    }
}

/// String or number, trimmed; anything else is `None`.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn body_object(body: &Value) -> Result<&Map<String, Value>, ApiError> {
    body.as_object()
        .ok_or_else(|| ApiError::BadRequest("Request body must be a JSON object".to_string()))
}

fn reel_number(body: &Map<String, Value>) -> Result<String, ApiError> {
    body.get("reel_number")
        .and_then(scalar_text)
        .filter(|reel| !reel.is_empty())
        .ok_or_else(|| ApiError::BadRequest("reel_number is required".to_string()))
}

/// Optional generation ceiling in whole minutes, 1 to [`MAX_WAIT_MINUTES`].
fn wait_minutes(body: &Map<String, Value>) -> Result<Option<u64>, ApiError> {
    match body.get("wait_minutes") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .filter(|minutes| (1..=MAX_WAIT_MINUTES).contains(minutes))
            .map(Some)
            .ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "wait_minutes must be an integer between 1 and {}",
                    MAX_WAIT_MINUTES
                ))
            }),
    }
}

/// Validates the body of a single-image request into one prompt item.
fn single_prompt(body: &Map<String, Value>) -> Result<PromptItem, ApiError> {
    for field in ["reel_number", "snippet_number", "image_prompt"] {
        if !body.contains_key(field) {
            return Err(ApiError::BadRequest(format!("Missing required field: {}", field)));
        }
    }

    let key_field = |name: &str| {
        body.get(name)
            .and_then(scalar_text)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                ApiError::BadRequest(
                    "reel_number and snippet_number must be numbers or strings".to_string(),
                )
            })
    };
    let reel_no = key_field("reel_number")?;
    let line_no = LineNo::parse(&key_field("snippet_number")?);

    let prompt = body
        .get("image_prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .ok_or_else(|| {
            ApiError::BadRequest("image_prompt must be a non-empty string".to_string())
        })?;

    Ok(PromptItem::new(prompt.to_string(), 0, ExternalKey { line_no, reel_no }))
}

/// Validates explicit `rows` into prompt items, in request order.
fn rows_to_prompts(rows: &Value) -> Result<Vec<PromptItem>, ApiError> {
    let rows = rows
        .as_array()
        .filter(|rows| !rows.is_empty())
        .ok_or_else(|| ApiError::BadRequest("rows must be a non-empty list".to_string()))?;

    rows.iter()
        .enumerate()
        .map(|(index, row)| -> Result<PromptItem, ApiError> {
            let row = row.as_object().ok_or_else(|| {
                ApiError::BadRequest(format!("Row {} must be an object", index))
            })?;
            let field = |name: &str| {
                row.get(name)
                    .and_then(scalar_text)
                    .filter(|text| !text.is_empty())
                    .ok_or_else(|| {
                        ApiError::BadRequest(format!("Row {} missing field '{}'", index, name))
                    })
            };
            Ok(PromptItem::new(
                field("prompt")?,
                index,
                ExternalKey {
                    line_no: LineNo::parse(&field("line_no")?),
                    reel_no: field("reel_no")?,
                },
            ))
        })
        .collect()
}

/// Health and lane status
///
/// # Example
/// ```shell
/// curl http://localhost:5003/health
/// ```
///
/// # Returns
/// ```json
/// {
///     "status": "healthy",
///     "message": "Reel pipeline service is running",
///     "timestamp": "2026-01-01T00:00:00.000000+00:00",
///     "lanes": {"images": {"queue_size": 0, "is_processing": false}, ...},
///     "queue_size": 0,
///     "is_processing": false
/// }
/// ```
#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let lanes: BTreeMap<&str, LaneStatus> = state
        .lanes()
        .iter()
        .map(|lane| (lane.name(), lane.status()))
        .collect();
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "message": "Reel pipeline service is running",
        "timestamp": now_iso(),
        "queue_size": lanes.values().map(|s| s.queue_size).sum::<usize>(),
        "is_processing": lanes.values().any(|s| s.is_processing),
        "lanes": lanes,
    }))
}

/// Generate images for a batch of prompts
///
/// Either pass explicit rows or a reel number to read from the sheet export.
///
/// # Example
/// ```shell
/// curl -X POST http://localhost:5003/batch-generate-images \
///     -H 'Content-Type: application/json' \
///     -d '{"rows": [{"prompt": "a red fox", "line_no": "1", "reel_no": "7"}]}'
///
/// curl -X POST http://localhost:5003/batch-generate-images \
///     -H 'Content-Type: application/json' -d '{"reel_number": "7", "wait_minutes": 5}'
/// ```
///
/// # Returns
/// The batch summary; 200 when every image was downloaded, else 500.
#[post("/batch-generate-images")]
pub async fn batch_generate_images(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let body = body_object(&body)?;

    let wait_minutes = wait_minutes(body)?;

    let prompts = match (body.get("rows"), body.get("reel_number")) {
        (Some(rows), _) if !rows.is_null() => rows_to_prompts(rows)?,
        (_, Some(reel)) if !reel.is_null() => {
            let reel = reel_number(body)?;
            let rows = load_sheet_export(&state.config.paths.sheet_export).await?;
            let rows = rows_for_reel(rows, &reel);
            if rows.is_empty() {
                return Err(ApiError::NotFound(format!("No rows found for reel {}", reel)));
            }
            prompt_items(&rows)
        }
        _ => {
            return Err(ApiError::BadRequest(
                "Provide either 'rows' or 'reel_number'".to_string(),
            ))
        }
    };

    info!("Batch request for {} prompt(s)", prompts.len());
    let job = Job::GenerateImages {
        prompts,
        options: state.config.batch_options(wait_minutes),
    };
    let outcome = state.dispatch(&state.images, job).await?;
    Ok(outcome_response(outcome))
}

/// Generate the image for one snippet
///
/// # Example
/// ```shell
/// curl -X POST http://localhost:5003/generate-image \
///     -H 'Content-Type: application/json' \
///     -d '{"reel_number": 7, "snippet_number": 3, "image_prompt": "a red fox"}'
/// ```
///
/// # Returns
/// ```json
/// {
///     "success": true,
///     "message": "Image generated successfully",
///     "file_path": "output/7/images/003.png",
///     "reel_number": "7",
///     "snippet_number": "003"
/// }
/// ```
#[post("/generate-image")]
pub async fn generate_image(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let body = body_object(&body)?;
    let item = single_prompt(body)?;
    let options = state.config.batch_options(wait_minutes(body)?);

    info!(
        "Image request for snippet {} of reel {}",
        item.key.line_no, item.key.reel_no
    );
    let outcome = state
        .dispatch(&state.images, Job::GenerateImage { item, options })
        .await?;
    Ok(outcome_response(outcome))
}

/// Upload a reel's image/audio pairs to the video app
///
/// # Example
/// ```shell
/// curl -X POST http://localhost:5003/upload-reel \
///     -H 'Content-Type: application/json' -d '{"reel_number": "7"}'
/// ```
///
/// # Returns
/// The upload report; 429 while another upload is running.
#[post("/upload-reel")]
pub async fn upload_reel(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let reel = reel_number(body_object(&body)?)?;
    info!("Upload request for reel {}", reel);
    let outcome = state
        .dispatch(&state.uploads, Job::UploadReel { reel })
        .await?;
    Ok(outcome_response(outcome))
}

/// Upload lane status
///
/// # Example
/// ```shell
/// curl http://localhost:5003/upload-status
/// ```
#[get("/upload-status")]
pub async fn upload_status(state: web::Data<AppState>) -> HttpResponse {
    let status = state.uploads.status();
    HttpResponse::Ok().json(json!({
        "is_processing": status.is_processing,
        "queue_size": status.queue_size,
        "timestamp": now_iso(),
    }))
}

/// Download the audio files of a reel from their sheet links
///
/// # Example
/// ```shell
/// curl -X POST http://localhost:5003/download-reel-audio \
///     -H 'Content-Type: application/json' -d '{"reel_number": "7"}'
/// ```
#[post("/download-reel-audio")]
pub async fn download_reel_audio(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let reel = reel_number(body_object(&body)?)?;
    let rows = rows_for_reel(load_sheet_export(&state.config.paths.sheet_export).await?, &reel);
    if rows.is_empty() {
        return Err(ApiError::NotFound(format!("No rows found for reel {}", reel)));
    }

    info!("Audio request for reel {} ({} row(s))", reel, rows.len());
    let outcome = state
        .dispatch(&state.audio, Job::DownloadAudio { reel, rows })
        .await?;
    Ok(outcome_response(outcome))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(batch_generate_images)
        .service(generate_image)
        .service(upload_reel)
        .service(upload_status)
        .service(download_reel_audio);
}

/// Run the API server
pub async fn run_api_server(state: web::Data<AppState>) -> std::io::Result<()> {
    let bind = (state.config.server.host.clone(), state.config.server.port);
    info!("Listening on {}:{}", bind.0, bind.1);
    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind(bind)?
        .run()
        .await
}
