mod helpers;

use helpers::StubHandler;
use inference_queue::models::job::{JobId, JobStatus, JobType, Outcome};
use inference_queue::services::worker::{ClaimMode, Worker, WorkerConfig};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DIFFUSION: [JobType; 2] = [JobType::GenerateImage, JobType::GenerateVideo];

#[tokio::test]
async fn test_successful_job_records_done() {
    let (_dir, store) = helpers::temp_store().await;
    let worker = Worker::new(
        store.clone(),
        StubHandler::new("diffusion", &DIFFUSION),
        helpers::worker_config(ClaimMode::Partitioned),
    );

    let id = store
        .enqueue(
            JobType::GenerateImage,
            json!({ "result": { "images": ["/out/a.png"] } }),
        )
        .await
        .unwrap();

    let processed = worker.run_once().await.unwrap().unwrap();
    assert_eq!(processed.id, id);
    assert_eq!(processed.outcome, Outcome::Done);

    let record = store.get_status(&id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.result, Some(json!({ "images": ["/out/a.png"] })));
}

#[tokio::test]
async fn test_idle_worker_returns_none() {
    let (_dir, store) = helpers::temp_store().await;
    let worker = Worker::new(
        store,
        StubHandler::new("diffusion", &DIFFUSION),
        helpers::worker_config(ClaimMode::Partitioned),
    );
    assert!(worker.run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn test_handler_failure_records_error() {
    let (_dir, store) = helpers::temp_store().await;
    let worker = Worker::new(
        store.clone(),
        StubHandler::new("diffusion", &DIFFUSION),
        helpers::worker_config(ClaimMode::Partitioned),
    );

    let id = store
        .enqueue(JobType::GenerateImage, json!({ "fail": "CUDA out of memory" }))
        .await
        .unwrap();

    let processed = worker.run_once().await.unwrap().unwrap();
    assert_eq!(processed.outcome, Outcome::Error);

    let record = store.get_status(&id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(record.result, Some(json!({ "error": "CUDA out of memory" })));
}

#[tokio::test]
async fn test_slow_handler_times_out() {
    let (_dir, store) = helpers::temp_store().await;
    let config = WorkerConfig {
        poll_interval: Duration::from_millis(50),
        handler_timeout: Duration::from_millis(100),
        claim_mode: ClaimMode::Partitioned,
    };
    let worker = Worker::new(store.clone(), StubHandler::new("diffusion", &DIFFUSION), config);

    let id = store
        .enqueue(JobType::GenerateVideo, json!({ "sleep_ms": 5_000 }))
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let processed = worker.run_once().await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(processed.outcome, Outcome::Error);

    let record = store.get_status(&id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Error);
    let message = record.result.unwrap()["error"].as_str().unwrap().to_string();
    assert!(message.starts_with("timeout after"), "got: {message}");
}

#[tokio::test]
async fn test_panicking_handler_is_contained() {
    let (_dir, store) = helpers::temp_store().await;
    let worker = Worker::new(
        store.clone(),
        StubHandler::new("diffusion", &DIFFUSION),
        helpers::worker_config(ClaimMode::Partitioned),
    );

    let bad = store
        .enqueue(JobType::GenerateImage, json!({ "panic": true }))
        .await
        .unwrap();
    let good = store.enqueue(JobType::GenerateImage, json!({})).await.unwrap();

    let first = worker.run_once().await.unwrap().unwrap();
    assert_eq!(first.id, bad);
    assert_eq!(first.outcome, Outcome::Error);
    assert_eq!(
        store.get_status(&bad).await.unwrap().unwrap().status,
        JobStatus::Error
    );

    let second = worker.run_once().await.unwrap().unwrap();
    assert_eq!(second.id, good);
    assert_eq!(second.outcome, Outcome::Done);
}

#[tokio::test]
async fn test_shared_mode_rejects_foreign_type() {
    let (_dir, store) = helpers::temp_store().await;
    let worker = Worker::new(
        store.clone(),
        StubHandler::new("text-heavy", &[JobType::GenerateTextHeavy]),
        helpers::worker_config(ClaimMode::Shared),
    );

    let video = store
        .enqueue(JobType::GenerateVideo, json!({ "prompt": "waves" }))
        .await
        .unwrap();
    let text = store
        .enqueue(JobType::GenerateTextHeavy, json!({ "result": { "text": "hi" } }))
        .await
        .unwrap();

    let first = worker.run_once().await.unwrap().unwrap();
    assert_eq!(first.id, video);
    assert_eq!(first.outcome, Outcome::Error);

    let record = store.get_status(&video).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Error);
    let message = record.result.unwrap()["error"].as_str().unwrap().to_string();
    assert!(message.contains("invalid_type"), "got: {message}");
    assert!(message.contains("generate_video"), "got: {message}");

    // The loop goes on to the job it does handle.
    let second = worker.run_once().await.unwrap().unwrap();
    assert_eq!(second.id, text);
    assert_eq!(
        store.get_status(&text).await.unwrap().unwrap().result,
        Some(json!({ "text": "hi" }))
    );
}

#[tokio::test]
async fn test_partitioned_mode_leaves_foreign_jobs_queued() {
    let (_dir, store) = helpers::temp_store().await;
    let worker = Worker::new(
        store.clone(),
        StubHandler::new("text-heavy", &[JobType::GenerateTextHeavy]),
        helpers::worker_config(ClaimMode::Partitioned),
    );

    let image = store.enqueue(JobType::GenerateImage, json!({})).await.unwrap();
    assert!(worker.run_once().await.unwrap().is_none());
    assert_eq!(
        store.get_status(&image).await.unwrap().unwrap().status,
        JobStatus::Queued
    );
}

#[tokio::test]
async fn test_cancelled_job_is_never_processed() {
    let (_dir, store) = helpers::temp_store().await;
    let worker = Worker::new(
        store.clone(),
        StubHandler::new("diffusion", &DIFFUSION),
        helpers::worker_config(ClaimMode::Partitioned),
    );

    let id = store.enqueue(JobType::GenerateImage, json!({})).await.unwrap();
    store.cancel(&id).await.unwrap();

    assert!(worker.run_once().await.unwrap().is_none());
    let record = store.get_status(&id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert_eq!(record.result, None);
}

#[tokio::test]
async fn test_run_loop_survives_failures_and_stops_on_shutdown() {
    let (_dir, store) = helpers::temp_store().await;
    let worker = Worker::new(
        store.clone(),
        StubHandler::new("diffusion", &DIFFUSION),
        helpers::worker_config(ClaimMode::Partitioned),
    );

    let ids = vec![
        store
            .enqueue(JobType::GenerateImage, json!({ "fail": "bad prompt" }))
            .await
            .unwrap(),
        store
            .enqueue(JobType::GenerateImage, json!({ "panic": true }))
            .await
            .unwrap(),
        store.enqueue(JobType::GenerateVideo, json!({})).await.unwrap(),
    ];

    let cancel = CancellationToken::new();
    let loop_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { worker.run_until(cancel).await }
    });

    // Wait until every job is terminal.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut all_terminal = true;
        for id in &ids {
            let record = store.get_status(id).await.unwrap().unwrap();
            all_terminal &= record.status.is_terminal();
        }
        if all_terminal {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let statuses: Vec<JobStatus> = {
        let mut out = Vec::new();
        for id in &ids {
            out.push(store.get_status(id).await.unwrap().unwrap().status);
        }
        out
    };
    assert_eq!(
        statuses,
        vec![JobStatus::Error, JobStatus::Error, JobStatus::Done]
    );

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), loop_handle)
        .await
        .expect("worker should stop after shutdown")
        .unwrap();
    tokio_test::assert_ok!(result);
}

#[tokio::test]
async fn test_enqueue_wakes_idle_worker() {
    let (_dir, store) = helpers::temp_store().await;
    let config = WorkerConfig {
        poll_interval: Duration::from_secs(60),
        handler_timeout: Duration::from_secs(5),
        claim_mode: ClaimMode::Partitioned,
    };
    let worker = Worker::new(store.clone(), StubHandler::new("diffusion", &DIFFUSION), config);

    let cancel = CancellationToken::new();
    let loop_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { worker.run_until(cancel).await }
    });

    // Let the worker go idle before enqueueing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let id = store.enqueue(JobType::GenerateImage, json!({})).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while store.get_status(&id).await.unwrap().unwrap().status != JobStatus::Done {
        assert!(
            tokio::time::Instant::now() < deadline,
            "worker was not woken by enqueue"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    cancel.cancel();
    loop_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_store_failure_stops_worker() {
    let (_dir, store) = helpers::temp_store().await;
    let worker = Worker::new(
        store.clone(),
        StubHandler::new("diffusion", &DIFFUSION),
        helpers::worker_config(ClaimMode::Partitioned),
    );

    store.pool().close().await;

    let result = tokio::time::timeout(Duration::from_secs(2), worker.run())
        .await
        .expect("worker should exit on store failure");
    tokio_test::assert_err!(result);
}

#[tokio::test]
async fn test_shared_mode_fails_unknown_type_and_continues() {
    let (_dir, store) = helpers::temp_store().await;
    let worker = Worker::new(
        store.clone(),
        StubHandler::new("diffusion", &DIFFUSION),
        helpers::worker_config(ClaimMode::Shared),
    );

    sqlx::query(
        "INSERT INTO jobs (id, type, payload, status, created, updated, cancelled) \
         VALUES ('audio-1', 'generate_audio', '{}', 'queued', ?1, ?1, 0)",
    )
    .bind(chrono::Utc::now())
    .execute(store.pool())
    .await
    .unwrap();
    let image = store.enqueue(JobType::GenerateImage, json!({})).await.unwrap();

    let processed = worker.run_once().await.unwrap().unwrap();
    assert_eq!(processed.id, image);
    assert_eq!(processed.outcome, Outcome::Done);

    let record = store
        .get_status(&JobId::from("audio-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, JobStatus::Error);
}

#[cfg(target_os = "linux")]
mod child_process {
    use super::*;
    use inference_queue::models::job::ClaimedJob;
    use inference_queue::services::process::{self, OfflineEnv};
    use inference_queue::services::worker::{HandlerError, JobHandler};
    use std::path::{Path, PathBuf};

    /// Starts a long-running child that records its pid, then waits on it.
    struct SleeperHandler {
        pid_file: PathBuf,
        env: OfflineEnv,
    }

    impl JobHandler for SleeperHandler {
        fn name(&self) -> &str {
            "sleeper"
        }

        fn job_types(&self) -> &[JobType] {
            &[JobType::GenerateVideo]
        }

        async fn handle(&self, _job: &ClaimedJob) -> Result<serde_json::Value, HandlerError> {
            let script = format!("echo $$ > {}; exec sleep 30", self.pid_file.display());
            process::run_with_timeout(
                Path::new("sh"),
                ["-c", script.as_str()],
                &self.env,
                None,
                Duration::from_secs(60),
            )
            .await?;
            Ok(json!({ "ok": true }))
        }
    }

    /// Gone, or a zombie waiting to be reaped.
    fn process_exited(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        }
    }

    #[tokio::test]
    async fn test_handler_timeout_kills_child_process() {
        let (dir, store) = helpers::temp_store().await;
        let pid_file = dir.path().join("child.pid");
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(50),
            handler_timeout: Duration::from_millis(500),
            claim_mode: ClaimMode::Partitioned,
        };
        let worker = Worker::new(
            store.clone(),
            SleeperHandler {
                pid_file: pid_file.clone(),
                env: OfflineEnv::new(&dir.path().join(".hf_home")),
            },
            config,
        );

        let id = store.enqueue(JobType::GenerateVideo, json!({})).await.unwrap();

        let started = std::time::Instant::now();
        let processed = worker.run_once().await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(processed.outcome, Outcome::Error);

        let record = store.get_status(&id).await.unwrap().unwrap();
        let message = record.result.unwrap()["error"].as_str().unwrap().to_string();
        assert!(message.starts_with("timeout after"), "got: {message}");

        let pid: u32 = std::fs::read_to_string(&pid_file)
            .expect("child should have written its pid")
            .trim()
            .parse()
            .unwrap();

        // Abort is delivered asynchronously; give the runtime a moment.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !process_exited(pid) {
            assert!(
                std::time::Instant::now() < deadline,
                "child {pid} still running after handler timeout"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
