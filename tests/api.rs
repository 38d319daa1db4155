use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use reel_pipeline::api::{configure, AppState};
use reel_pipeline::audio::AudioReport;
use reel_pipeline::batch::BatchSummary;
use reel_pipeline::config::Config;
use reel_pipeline::queue::{Job, JobOutcome, JobRunner};
use reel_pipeline::single::SingleImageResult;
use reel_pipeline::upload::UploadReport;

/// Answers every job immediately unless told to hang.
#[derive(Default)]
struct FakeRunner {
    jobs: Mutex<Vec<Job>>,
    hang: bool,
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn run(&self, job: Job) -> Result<JobOutcome> {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(job.clone());
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(match job {
            Job::GenerateImages { prompts, .. } => JobOutcome::Batch(BatchSummary {
                success: true,
                message: format!("Downloaded {}/{} images", prompts.len(), prompts.len()),
                sent: prompts.len(),
                downloaded: prompts.len(),
                missing: 0,
                scrolls: 1,
                results: Vec::new(),
                errors: Vec::new(),
            }),
            Job::GenerateImage { item, .. } => JobOutcome::Single(SingleImageResult {
                success: !item.prompt.contains("forbidden"),
                message: "Image generated successfully".to_string(),
                file_path: Some(PathBuf::from("output/7/images/003.png")),
                reel_number: item.key.reel_no,
                snippet_number: item.key.line_no,
                error: None,
            }),
            Job::UploadReel { reel } => JobOutcome::Upload(UploadReport {
                success: true,
                reel_number: reel,
                total_pairs: 1,
                uploaded_pairs: 1,
                results: Vec::new(),
            }),
            Job::DownloadAudio { reel, rows } => JobOutcome::Audio(AudioReport {
                success: false,
                reel_number: reel,
                downloaded: 0,
                failed: rows.len(),
                total_bytes: 0,
                audio_directory: PathBuf::from("output"),
                results: Vec::new(),
            }),
        })
    }
}

fn write_sheet(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("sheet.json");
    let records = json!([
        {"Image Prompt": "a lighthouse", "Audio File": "https://example.com/1.mp3", "Reel #": 7},
        {"Image Prompt": "", "Audio File": "https://example.com/2.mp3", "Reel #": 7},
        {"Image Prompt": "a harbour", "Audio File": "https://example.com/3.mp3", "Reel #": "7"},
        {"Image Prompt": "a forest", "Audio File": "https://example.com/4.mp3", "Reel #": "8"},
    ]);
    std::fs::write(&path, serde_json::to_vec(&records)?)?;
    Ok(path)
}

fn state(runner: Arc<FakeRunner>, sheet: PathBuf) -> web::Data<AppState> {
    let mut config = Config::default();
    config.paths.sheet_export = sheet;
    web::Data::new(AppState::new(config, runner))
}

macro_rules! service {
    ($state:expr) => {
        test::init_service(App::new().app_data($state.clone()).configure(configure)).await
    };
}

#[actix_web::test]
async fn health_reports_every_lane() -> Result<()> {
    let state = state(Arc::new(FakeRunner::default()), PathBuf::from("missing.json"));
    let app = service!(state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queue_size"], 0);
    assert_eq!(body["is_processing"], false);
    for lane in ["images", "uploads", "audio"] {
        assert_eq!(body["lanes"][lane]["is_processing"], false);
    }
    Ok(())
}

#[actix_web::test]
async fn batch_request_validation() -> Result<()> {
    let state = state(Arc::new(FakeRunner::default()), PathBuf::from("missing.json"));
    let app = service!(state);

    let cases = [
        (json!({}), "Provide either 'rows' or 'reel_number'"),
        (json!({"rows": []}), "rows must be a non-empty list"),
        (json!({"rows": "nope"}), "rows must be a non-empty list"),
        (json!({"rows": [42]}), "Row 0 must be an object"),
        (
            json!({"rows": [
                {"prompt": "a", "line_no": "1", "reel_no": "7"},
                {"prompt": "b", "line_no": 2}
            ]}),
            "Row 1 missing field 'reel_no'",
        ),
        (
            json!({"reel_number": "7", "wait_minutes": "soon"}),
            "wait_minutes must be an integer between 1 and 1440",
        ),
        (
            json!({"reel_number": "7", "wait_minutes": u64::MAX}),
            "wait_minutes must be an integer between 1 and 1440",
        ),
        (
            json!({"reel_number": "7", "wait_minutes": 0}),
            "wait_minutes must be an integer between 1 and 1440",
        ),
    ];
    for (payload, message) in cases {
        let req = test::TestRequest::post()
            .uri("/batch-generate-images")
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", payload);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], message);
    }
    Ok(())
}

#[actix_web::test]
async fn batch_rows_are_queued_in_order() -> Result<()> {
    let runner = Arc::new(FakeRunner::default());
    let state = state(runner.clone(), PathBuf::from("missing.json"));
    let app = service!(state);

    let req = test::TestRequest::post()
        .uri("/batch-generate-images")
        .set_json(json!({
            "rows": [
                {"prompt": "a red fox", "line_no": "1", "reel_no": "7"},
                {"prompt": "a blue jay", "line_no": 12, "reel_no": 7}
            ],
            "wait_minutes": 2
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["sent"], 2);

    let jobs = runner.jobs.lock().unwrap();
    let Job::GenerateImages { prompts, options } = &jobs[0] else {
        panic!("expected an image batch, got {:?}", jobs[0]);
    };
    assert_eq!(prompts[0].key.line_no.as_str(), "001");
    assert_eq!(prompts[1].key.line_no.as_str(), "012");
    assert_eq!(prompts[1].key.reel_no, "7");
    assert_eq!(prompts[1].sequence_index, 1);
    assert_eq!(options.generation.timeout.as_secs(), 120);
    Ok(())
}

#[actix_web::test]
async fn batch_by_reel_reads_the_sheet_export() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let runner = Arc::new(FakeRunner::default());
    let state = state(runner.clone(), write_sheet(temp.path())?);
    let app = service!(state);

    let req = test::TestRequest::post()
        .uri("/batch-generate-images")
        .set_json(json!({"reel_number": 7}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::post()
        .uri("/batch-generate-images")
        .set_json(json!({"reel_number": "99"}))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );

    let jobs = runner.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    let Job::GenerateImages { prompts, .. } = &jobs[0] else {
        panic!("expected an image batch");
    };
    let lines: Vec<&str> = prompts.iter().map(|p| p.key.line_no.as_str()).collect();
    assert_eq!(lines, vec!["001", "003"]);
    Ok(())
}

#[actix_web::test]
async fn single_image_request_validation() -> Result<()> {
    let runner = Arc::new(FakeRunner::default());
    let state = state(runner.clone(), PathBuf::from("missing.json"));
    let app = service!(state);

    let cases = [
        (
            json!({"snippet_number": 1, "image_prompt": "a fox"}),
            "Missing required field: reel_number",
        ),
        (
            json!({"reel_number": 7, "image_prompt": "a fox"}),
            "Missing required field: snippet_number",
        ),
        (
            json!({"reel_number": 7, "snippet_number": 1}),
            "Missing required field: image_prompt",
        ),
        (
            json!({"reel_number": [7], "snippet_number": 1, "image_prompt": "a fox"}),
            "reel_number and snippet_number must be numbers or strings",
        ),
        (
            json!({"reel_number": 7, "snippet_number": {"n": 1}, "image_prompt": "a fox"}),
            "reel_number and snippet_number must be numbers or strings",
        ),
        (
            json!({"reel_number": 7, "snippet_number": 1, "image_prompt": "   "}),
            "image_prompt must be a non-empty string",
        ),
        (
            json!({"reel_number": 7, "snippet_number": 1, "image_prompt": 42}),
            "image_prompt must be a non-empty string",
        ),
        (
            json!({"reel_number": 7, "snippet_number": 1, "image_prompt": "a fox",
                   "wait_minutes": 100000}),
            "wait_minutes must be an integer between 1 and 1440",
        ),
    ];
    for (payload, message) in cases {
        let req = test::TestRequest::post()
            .uri("/generate-image")
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", payload);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], message);
    }
    assert!(runner.jobs.lock().unwrap().is_empty());
    Ok(())
}

#[actix_web::test]
async fn single_image_runs_on_the_images_lane() -> Result<()> {
    let runner = Arc::new(FakeRunner::default());
    let state = state(runner.clone(), PathBuf::from("missing.json"));
    let app = service!(state);

    let req = test::TestRequest::post()
        .uri("/generate-image")
        .set_json(json!({"reel_number": 7, "snippet_number": "3", "image_prompt": " a fox "}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Image generated successfully");
    assert_eq!(body["reel_number"], "7");
    assert_eq!(body["snippet_number"], "003");
    assert_eq!(body["file_path"], "output/7/images/003.png");

    let req = test::TestRequest::post()
        .uri("/generate-image")
        .set_json(json!({"reel_number": "7", "snippet_number": 4, "image_prompt": "forbidden"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let jobs = runner.jobs.lock().unwrap();
    let Job::GenerateImage { item, options } = &jobs[0] else {
        panic!("expected a single image job, got {:?}", jobs[0]);
    };
    assert_eq!(item.prompt, "a fox");
    assert_eq!(item.key.line_no.as_str(), "003");
    assert_eq!(options.generation.timeout.as_secs(), 600);
    Ok(())
}

#[actix_web::test]
async fn upload_requires_reel_and_refuses_while_busy() -> Result<()> {
    let runner = Arc::new(FakeRunner {
        hang: true,
        ..Default::default()
    });
    let state = state(runner, PathBuf::from("missing.json"));
    let app = service!(state);

    let req = test::TestRequest::post()
        .uri("/upload-reel")
        .set_json(json!({"reel_number": ["7"]}))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );

    let _running = state.uploads.submit(Job::UploadReel {
        reel: "6".to_string(),
    })?;
    let req = test::TestRequest::post()
        .uri("/upload-reel")
        .set_json(json!({"reel_number": "7"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["queue_position"], 1);

    let req = test::TestRequest::get().uri("/upload-status").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["queue_size"] == 1 || body["is_processing"] == true);
    Ok(())
}

#[actix_web::test]
async fn slow_job_times_out_the_request() -> Result<()> {
    let runner = Arc::new(FakeRunner {
        hang: true,
        ..Default::default()
    });
    let mut config = Config::default();
    config.server.request_timeout_secs = 0;
    let state = web::Data::new(AppState::new(config, runner));
    let app = service!(state);

    let req = test::TestRequest::post()
        .uri("/upload-reel")
        .set_json(json!({"reel_number": "7"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    Ok(())
}

#[actix_web::test]
async fn audio_with_nothing_downloaded_is_a_server_error() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let runner = Arc::new(FakeRunner::default());
    let state = state(runner.clone(), write_sheet(temp.path())?);
    let app = service!(state);

    let req = test::TestRequest::post()
        .uri("/download-reel-audio")
        .set_json(json!({"reel_number": "8"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["failed"], 1);
    assert_eq!(body["reel_number"], "8");

    let req = test::TestRequest::post()
        .uri("/download-reel-audio")
        .set_json(json!({"reel_number": "12"}))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );

    let req = test::TestRequest::post()
        .uri("/download-reel-audio")
        .set_json(json!({}))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );
    Ok(())
}
