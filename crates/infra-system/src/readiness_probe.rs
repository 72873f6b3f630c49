// Readiness probe implementation
// reason: tokio net/fs/process for local checks, reqwest for HTTP
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::trace;

use conductor_core::domain::{ReadinessCheck, ServiceName, ServiceSpec};
use conductor_core::port::{ProbeContext, ProbeOutcome, ReadinessProbe};

/// Per-request timeout for HTTP checks
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// How far a log-line check has read one launch's log
#[derive(Debug, Clone, Default)]
struct LogCursor {
    pid: Option<u32>,
    launch_offset: u64,
    position: u64,
    /// Bytes before `position` that could start a match split across reads
    tail: Vec<u8>,
}

impl LogCursor {
    fn for_launch(ctx: &ProbeContext) -> Self {
        Self {
            pid: ctx.pid,
            launch_offset: ctx.log_offset,
            position: ctx.log_offset,
            tail: Vec::new(),
        }
    }

    fn belongs_to(&self, ctx: &ProbeContext) -> bool {
        self.pid == ctx.pid && self.launch_offset == ctx.log_offset
    }
}

/// Evaluates a spec's ReadinessCheck against the local system
pub struct SystemReadinessProbe {
    http: reqwest::Client,
    log_cursors: Mutex<HashMap<ServiceName, LogCursor>>,
}

impl SystemReadinessProbe {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            log_cursors: Mutex::new(HashMap::new()),
        }
    }

    async fn check_tcp(&self, host: &str, port: u16) -> ProbeOutcome {
        match TcpStream::connect((host, port)).await {
            Ok(_) => ProbeOutcome::Ready,
            Err(e) => ProbeOutcome::NotReady(format!("connect {}:{}: {}", host, port, e)),
        }
    }

    async fn check_http(&self, url: &str, expect_status: Option<u16>) -> ProbeOutcome {
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => return ProbeOutcome::NotReady(format!("GET {}: {}", url, e)),
        };

        let status = response.status();
        let ok = match expect_status {
            Some(expected) => status.as_u16() == expected,
            None => status.is_success(),
        };
        if ok {
            ProbeOutcome::Ready
        } else {
            ProbeOutcome::NotReady(format!("GET {} returned {}", url, status))
        }
    }

    /// Only output written after the launch offset counts
    ///
    /// Each attempt reads just the bytes appended since the previous one for
    /// the same launch.
    async fn check_log_line(&self, spec: &ServiceSpec, pattern: &str, ctx: &ProbeContext) -> ProbeOutcome {
        let needle = pattern.as_bytes();
        if needle.is_empty() {
            return ProbeOutcome::Ready;
        }

        let mut cursor = {
            let cursors = self.log_cursors.lock().unwrap_or_else(PoisonError::into_inner);
            cursors
                .get(&spec.name)
                .filter(|c| c.belongs_to(ctx))
                .cloned()
                .unwrap_or_else(|| LogCursor::for_launch(ctx))
        };

        let path = &spec.log_path;
        let mut file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => return ProbeOutcome::NotReady(format!("{}: {}", path.display(), e)),
        };

        // Truncated behind our back: rescan from the launch offset
        if let Ok(metadata) = file.metadata().await {
            if metadata.len() < cursor.position {
                cursor = LogCursor::for_launch(ctx);
            }
        }

        let mut window = std::mem::take(&mut cursor.tail);
        let carried = window.len();
        let read = async {
            file.seek(SeekFrom::Start(cursor.position)).await?;
            file.read_to_end(&mut window).await
        };
        if let Err(e) = read.await {
            return ProbeOutcome::NotReady(format!("{}: {}", path.display(), e));
        }
        cursor.position += (window.len() - carried) as u64;

        let found = window.windows(needle.len()).any(|w| w == needle);
        let mut cursors = self.log_cursors.lock().unwrap_or_else(PoisonError::into_inner);
        if found {
            cursors.remove(&spec.name);
            return ProbeOutcome::Ready;
        }
        let keep = window.len().min(needle.len() - 1);
        cursor.tail = window.split_off(window.len() - keep);
        cursors.insert(spec.name.clone(), cursor);
        ProbeOutcome::NotReady(format!("'{}' not yet logged", pattern))
    }

    async fn check_command(&self, spec: &ServiceSpec, program: &str, args: &[String]) -> ProbeOutcome {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        match command.status().await {
            Ok(status) if status.success() => ProbeOutcome::Ready,
            Ok(status) => ProbeOutcome::NotReady(format!("{} exited with {}", program, status)),
            Err(e) => ProbeOutcome::NotReady(format!("{}: {}", program, e)),
        }
    }
}

impl Default for SystemReadinessProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadinessProbe for SystemReadinessProbe {
    async fn check(&self, spec: &ServiceSpec, ctx: &ProbeContext) -> ProbeOutcome {
        let outcome = match &spec.readiness {
            ReadinessCheck::Immediate => ProbeOutcome::Ready,
            ReadinessCheck::Tcp { host, port } => self.check_tcp(host, *port).await,
            ReadinessCheck::Http { url, expect_status } => {
                self.check_http(url, *expect_status).await
            }
            ReadinessCheck::LogLine { pattern } => {
                self.check_log_line(spec, pattern, ctx).await
            }
            ReadinessCheck::Command { program, args } => {
                self.check_command(spec, program, args).await
            }
        };

        trace!(
            service = %spec.name,
            check = %spec.readiness,
            ready = outcome.is_ready(),
            "Readiness probe evaluated"
        );
        outcome
    }
}
