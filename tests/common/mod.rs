//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which writes a fake transcoder script, builds a
//! full [`AppContext`] around it, and runs the server lifecycle on a random
//! port. The fake answers `-version` like ffmpeg and otherwise runs the
//! shell snippet it was given with `$out` bound to the output path and `$5`
//! to the job input.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mr_core::config::Config;
use mr_core::Readiness;
use mr_server::context::AppContext;

/// Writes the input name into the output file.
pub const COPY: &str = r#"printf 'converted %s' "$5" > "$out""#;

/// Succeeds after one second.
pub const SLOW: &str = r#"sleep 1; printf ok > "$out""#;

/// Reports a failure on stderr.
pub const FAIL: &str = r#"echo "Invalid data found when processing input" >&2; exit 1"#;

/// Records its pid in the file named by the job input, then hangs.
pub const HANG: &str = r#"echo $$ > "$5"; exec sleep 30"#;

/// Write an executable fake transcoder into `dir`.
pub fn fake_tool(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-ffmpeg");
    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"-version\" ]; then echo \"ffmpeg version 6.1-fake\"; exit 0; fi\n\
         for a; do out=\"$a\"; done\n\
         {body}\n"
    );
    std::fs::write(&path, script).expect("failed to write fake tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod fake tool");
    path
}

/// Config for a test server using `tool`, with working directories in `work`.
pub fn test_config(tool: Option<PathBuf>, work: &Path) -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".into();
    config.server.port = 0;
    config.server.drain_grace_secs = 5;
    config.server.fatal_exit_delay_secs = 1;
    config.tools.transcoder = "fake-ffmpeg".into();
    config.tools.transcoder_path = tool;
    config.jobs.default_timeout_secs = 10;
    config.jobs.work_dir = Some(work.to_path_buf());
    config.health.heartbeat_interval_secs = 1;
    config.health.recheck_interval_secs = 0;
    config
}

/// A running server plus the handles needed to inspect and stop it.
pub struct TestHarness {
    pub ctx: AppContext,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub work: TempDir,
    shutdown: CancellationToken,
    server: Option<JoinHandle<mr_core::Result<()>>>,
    _bin: TempDir,
}

impl TestHarness {
    /// Start a server whose transcoder runs `body`.
    pub async fn start(body: &str) -> Self {
        Self::start_with(body, |_| {}).await
    }

    /// Start a server whose transcoder runs `body`, adjusting the config first.
    pub async fn start_with(body: &str, tweak: impl FnOnce(&mut Config)) -> Self {
        let bin = tempfile::tempdir().expect("failed to create bin dir");
        let tool = fake_tool(bin.path(), body);
        Self::launch(bin, Some(tool), tweak).await
    }

    /// Start a server whose transcoder cannot be found.
    pub async fn start_without_tool(tweak: impl FnOnce(&mut Config)) -> Self {
        let bin = tempfile::tempdir().expect("failed to create bin dir");
        Self::launch(bin, None, |config| {
            config.tools.transcoder = "nonexistent_tool_xyz_12345".into();
            tweak(config);
        })
        .await
    }

    async fn launch(bin: TempDir, tool: Option<PathBuf>, tweak: impl FnOnce(&mut Config)) -> Self {
        let work = tempfile::tempdir().expect("failed to create work dir");
        let mut config = test_config(tool, work.path());
        tweak(&mut config);

        let ctx = AppContext::build(config).expect("failed to build context");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        let shutdown = CancellationToken::new();
        let server = tokio::spawn(mr_server::run(ctx.clone(), listener, shutdown.clone()));

        let harness = Self {
            ctx,
            addr,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build client"),
            work,
            shutdown,
            server: Some(server),
            _bin: bin,
        };
        harness.wait_for_self_check().await;
        harness
    }

    async fn wait_for_self_check(&self) {
        for _ in 0..200 {
            if self.ctx.health.state() != Readiness::Starting {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("self-check did not finish");
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("request failed")
    }

    pub async fn submit(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/jobs"))
            .json(&body)
            .send()
            .await
            .expect("request failed")
    }

    /// Signal shutdown without waiting for it.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the server lifecycle to return.
    pub async fn join(&mut self) -> mr_core::Result<()> {
        let handle = self.server.take().expect("server already joined");
        tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }

    /// Shut down and wait for the drain to finish.
    pub async fn stop(mut self) -> mr_core::Result<()> {
        self.begin_shutdown();
        self.join().await
    }

    /// Number of per-job working directories currently on disk.
    pub fn workspaces(&self) -> usize {
        std::fs::read_dir(self.work.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Minimal job request body.
pub fn job(input: &str) -> serde_json::Value {
    serde_json::json!({
        "input": input,
        "args": ["-c", "copy"],
        "output_ext": "mp4",
    })
}
