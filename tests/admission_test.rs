//! Admission control, deadlines, and cancellation over HTTP.

mod common;

use std::time::Duration;

use common::{job, TestHarness, HANG, SLOW};
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn third_job_is_rejected_until_a_slot_frees() {
    let h = TestHarness::start_with(SLOW, |c| c.jobs.capacity = 2).await;

    let first: Value = h.submit(job("a.mkv")).await.json().await.unwrap();
    assert_eq!(h.submit(job("b.mkv")).await.status(), StatusCode::ACCEPTED);

    let resp = h.submit(job("c.mkv")).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["code"], "overloaded");

    let id = first["id"].as_str().unwrap();
    let done: Value = h
        .get(&format!("/api/jobs/{id}/wait?timeout=10"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(done["state"], "succeeded");

    assert_eq!(h.submit(job("d.mkv")).await.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn burst_rejects_exactly_the_excess() {
    let h = TestHarness::start_with(SLOW, |c| c.jobs.capacity = 3).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let client = h.client.clone();
        let url = h.url("/api/jobs");
        handles.push(tokio::spawn(async move {
            client
                .post(url)
                .json(&job(&format!("in-{i}.mkv")))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }

    let mut accepted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::ACCEPTED => accepted += 1,
            StatusCode::SERVICE_UNAVAILABLE => rejected += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(accepted, 3);
    assert_eq!(rejected, 5);

    let stats: Value = h.get("/api/status").await.json().await.unwrap();
    assert!(stats["jobs"]["slots"]["running"].as_u64().unwrap() <= 3);
}

#[tokio::test]
async fn queued_jobs_wait_for_a_slot() {
    let h = TestHarness::start_with(SLOW, |c| {
        c.jobs.capacity = 1;
        c.jobs.max_queue = 1;
    })
    .await;

    assert_eq!(h.submit(job("a.mkv")).await.status(), StatusCode::ACCEPTED);
    let queued: Value = h.submit(job("b.mkv")).await.json().await.unwrap();
    assert_eq!(queued["state"], "queued");
    assert_eq!(h.submit(job("c.mkv")).await.status(), StatusCode::SERVICE_UNAVAILABLE);

    let id = queued["id"].as_str().unwrap();
    let done: Value = h
        .get(&format!("/api/jobs/{id}/wait?timeout=10"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(done["state"], "succeeded");
}

#[cfg(unix)]
#[tokio::test]
async fn deadline_kills_the_transcoder() {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let h = TestHarness::start(HANG).await;
    let pidfile = tempfile::NamedTempFile::new().unwrap();

    let mut body = job(pidfile.path().to_str().unwrap());
    body["timeout_secs"] = Value::from(1);
    body["wait"] = Value::Bool(true);

    let resp = h.submit(body).await;
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    let view: Value = resp.json().await.unwrap();
    assert_eq!(view["state"], "timed_out");
    assert_eq!(view["failure"]["kind"], "timed_out");

    let pid: i32 = std::fs::read_to_string(pidfile.path())
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));

    // The slot is free again and the working directory is gone.
    assert_eq!(h.workspaces(), 0);
    let stats: Value = h.get("/api/status").await.json().await.unwrap();
    assert_eq!(stats["jobs"]["slots"]["running"], 0);
    assert_eq!(stats["jobs"]["timed_out"], 1);
}

#[tokio::test]
async fn delete_cancels_a_running_job() {
    let h = TestHarness::start(HANG).await;
    let pidfile = tempfile::NamedTempFile::new().unwrap();

    let created: Value = h
        .submit(job(pidfile.path().to_str().unwrap()))
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let resp = h
        .client
        .delete(h.url(&format!("/api/jobs/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let view: Value = h.get(&format!("/api/jobs/{id}")).await.json().await.unwrap();
    assert_eq!(view["state"], "failed");
    assert_eq!(view["failure"]["kind"], "cancelled");
    assert_eq!(h.workspaces(), 0);
}
