// Process launcher implementation
// reason: tokio::process for owned child handles, nix for process-group signals
use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use conductor_core::domain::{LogMode, ServiceSpec};
use conductor_core::port::{ManagedProcess, ProcessError, ProcessExit, ProcessLauncher};

/// Launches each service as a child process in its own process group
///
/// stdout and stderr both go to the service's log file; stdin is closed.
/// Children are killed when their handle is dropped.
#[derive(Debug, Default)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

/// Open the log file for a launch and return it with its length at launch
fn open_log(spec: &ServiceSpec) -> Result<(File, u64), ProcessError> {
    let path = &spec.log_path;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                ProcessError::LogFile(format!("{}: {}", parent.display(), e))
            })?;
        }
    }

    let mut options = OpenOptions::new();
    options.create(true);
    match spec.log_mode {
        LogMode::Append => {
            options.append(true);
        }
        LogMode::Truncate => {
            options.write(true).truncate(true);
        }
    }

    let file = options
        .open(path)
        .map_err(|e| ProcessError::LogFile(format!("{}: {}", path.display(), e)))?;
    let offset = file
        .metadata()
        .map(|m| m.len())
        .map_err(|e| ProcessError::LogFile(format!("{}: {}", path.display(), e)))?;
    Ok((file, offset))
}

fn exit_from_status(status: ExitStatus) -> ProcessExit {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        ProcessExit {
            code: status.code(),
            signal: status.signal(),
        }
    }

    #[cfg(not(unix))]
    {
        ProcessExit {
            code: status.code(),
            signal: None,
        }
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(&self, spec: &ServiceSpec) -> Result<Box<dyn ManagedProcess>, ProcessError> {
        let (stdout, log_offset) = open_log(spec)?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| ProcessError::LogFile(e.to_string()))?;

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|var| (&var.name, &var.value)))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(format!("{}: {}", spec.command, e)))?;

        info!(
            service = %spec.name,
            pid = ?child.id(),
            log_offset = %log_offset,
            "Child process spawned"
        );

        Ok(Box::new(ChildProcess {
            name: spec.name.clone(),
            pid: child.id(),
            child,
            log_offset,
            exit: None,
        }))
    }
}

/// A spawned service process and its process group
pub struct ChildProcess {
    name: String,
    pid: Option<u32>,
    child: Child,
    log_offset: u64,
    exit: Option<ProcessExit>,
}

impl ChildProcess {
    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> Result<(), ProcessError> {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        match killpg(Pid::from_raw(pid as i32), signal) {
            // Group already gone
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProcessError::Signal(format!(
                "{} to process group {}: {}",
                signal, pid, e
            ))),
        }
    }

    /// SIGKILL whatever the reaped leader left behind in its group
    ///
    /// Later terminate/force_kill calls and Drop skip an exited leader, so
    /// this is the last chance to reach its descendants.
    fn sweep_group(&self) {
        #[cfg(unix)]
        {
            if let Err(e) = self.signal_group(nix::sys::signal::Signal::SIGKILL) {
                debug!(service = %self.name, pid = ?self.pid, error = %e, "Process group sweep failed");
            }
        }
    }
}

impl ManagedProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn log_offset(&self) -> u64 {
        self.log_offset
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>, ProcessError> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let exit = exit_from_status(status);
                debug!(service = %self.name, pid = ?self.pid, exit = %exit, "Child process reaped");
                self.exit = Some(exit);
                self.sweep_group();
                Ok(self.exit)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(ProcessError::IoError(e.to_string())),
        }
    }

    fn terminate(&mut self) -> Result<(), ProcessError> {
        if self.exit.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            self.signal_group(nix::sys::signal::Signal::SIGTERM)
        }

        #[cfg(not(unix))]
        {
            self.child
                .start_kill()
                .map_err(|e| ProcessError::Signal(e.to_string()))
        }
    }

    fn force_kill(&mut self) -> Result<(), ProcessError> {
        if self.exit.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL)?;

        if let Err(e) = self.child.start_kill() {
            debug!(service = %self.name, error = %e, "start_kill after SIGKILL");
        }
        Ok(())
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // kill_on_drop only reaches the group leader
        #[cfg(unix)]
        {
            if self.exit.is_none() {
                let _ = self.signal_group(nix::sys::signal::Signal::SIGKILL);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn shell(name: &str, dir: &TempDir, script: &str) -> ServiceSpec {
        ServiceSpec::new(name, "sh", dir.path().join("logs").join(format!("{}.log", name)))
            .with_args(["-c", script])
    }

    async fn wait_exit(process: &mut Box<dyn ManagedProcess>, within: Duration) -> Option<ProcessExit> {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if let Some(exit) = process.try_wait().unwrap() {
                return Some(exit);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }

    async fn wait_for_log(path: &std::path::Path, needle: &str) {
        for _ in 0..100 {
            if fs::read_to_string(path).unwrap_or_default().contains(needle) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("'{}' never appeared in {}", needle, path.display());
    }

    #[tokio::test]
    async fn test_output_goes_to_log_file() {
        let dir = TempDir::new().unwrap();
        let spec = shell("echo", &dir, "echo out; echo err >&2");

        let mut process = TokioProcessLauncher::new().launch(&spec).await.unwrap();
        let exit = wait_exit(&mut process, Duration::from_secs(5)).await;

        assert_eq!(exit, Some(ProcessExit::code(0)));
        let log = fs::read_to_string(&spec.log_path).unwrap();
        assert!(log.contains("out"));
        assert!(log.contains("err"));
    }

    #[tokio::test]
    async fn test_append_mode_keeps_previous_output() {
        let dir = TempDir::new().unwrap();
        let spec = shell("rasa", &dir, "echo new");
        fs::create_dir_all(spec.log_path.parent().unwrap()).unwrap();
        fs::write(&spec.log_path, "old\n").unwrap();

        let mut process = TokioProcessLauncher::new().launch(&spec).await.unwrap();
        assert_eq!(process.log_offset(), 4);
        wait_exit(&mut process, Duration::from_secs(5)).await;

        assert_eq!(fs::read_to_string(&spec.log_path).unwrap(), "old\nnew\n");
    }

    #[tokio::test]
    async fn test_truncate_mode_discards_previous_output() {
        let dir = TempDir::new().unwrap();
        let spec = shell("rasa", &dir, "echo new").with_log_mode(LogMode::Truncate);
        fs::create_dir_all(spec.log_path.parent().unwrap()).unwrap();
        fs::write(&spec.log_path, "old\n").unwrap();

        let mut process = TokioProcessLauncher::new().launch(&spec).await.unwrap();
        assert_eq!(process.log_offset(), 0);
        wait_exit(&mut process, Duration::from_secs(5)).await;

        assert_eq!(fs::read_to_string(&spec.log_path).unwrap(), "new\n");
    }

    #[tokio::test]
    async fn test_env_and_working_dir() {
        let dir = TempDir::new().unwrap();
        let spec = shell("webhook", &dir, "echo \"$GREETING $(pwd)\"")
            .with_env("GREETING", "hello")
            .with_working_dir(dir.path());

        let mut process = TokioProcessLauncher::new().launch(&spec).await.unwrap();
        wait_exit(&mut process, Duration::from_secs(5)).await;

        let log = fs::read_to_string(&spec.log_path).unwrap();
        let cwd = fs::canonicalize(dir.path()).unwrap();
        assert!(log.starts_with("hello "));
        assert!(log.contains(cwd.file_name().unwrap().to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let spec = ServiceSpec::new("ngrok", "/nonexistent/ngrok", dir.path().join("ngrok.log"));

        let result = TokioProcessLauncher::new().launch(&spec).await;

        assert!(matches!(result, Err(ProcessError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_terminate_stops_process() {
        let dir = TempDir::new().unwrap();
        let spec = shell("actions", &dir, "sleep 30");

        let mut process = TokioProcessLauncher::new().launch(&spec).await.unwrap();
        assert!(process.pid().is_some());
        assert_eq!(process.try_wait().unwrap(), None);

        process.terminate().unwrap();
        let exit = wait_exit(&mut process, Duration::from_secs(5)).await;

        assert_eq!(exit, Some(ProcessExit::signal(15)));
        // Signalling an exited process is a no-op
        tokio_test::assert_ok!(process.terminate());
    }

    fn pid_alive(pid: i32) -> bool {
        // A zombie awaiting its reaper counts as dead
        if let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid)) {
            let state = stat.rsplit(')').next().and_then(|rest| rest.trim_start().chars().next());
            if state == Some('Z') {
                return false;
            }
        }
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    }

    #[tokio::test]
    async fn test_reaping_leader_kills_its_background_children() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let spec = shell("actions", &dir, "sleep 300 & echo $! > \"$PID_FILE\"; exit 3")
            .with_env("PID_FILE", pid_file.to_string_lossy());

        let mut process = TokioProcessLauncher::new().launch(&spec).await.unwrap();
        let exit = wait_exit(&mut process, Duration::from_secs(5)).await;
        assert_eq!(exit, Some(ProcessExit::code(3)));

        let grandchild: i32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        let mut alive = true;
        for _ in 0..100 {
            alive = pid_alive(grandchild);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "background child {} survived its leader", grandchild);

        // Already reaped: signalling is a no-op
        tokio_test::assert_ok!(process.force_kill());
    }

    #[tokio::test]
    async fn test_force_kill_stops_process_ignoring_sigterm() {
        let dir = TempDir::new().unwrap();
        let spec = shell("stubborn", &dir, "trap '' TERM; echo armed; sleep 30");

        let mut process = TokioProcessLauncher::new().launch(&spec).await.unwrap();
        wait_for_log(&spec.log_path, "armed").await;

        process.terminate().unwrap();
        assert_eq!(wait_exit(&mut process, Duration::from_millis(300)).await, None);

        process.force_kill().unwrap();
        let exit = wait_exit(&mut process, Duration::from_secs(5)).await;

        assert_eq!(exit, Some(ProcessExit::signal(9)));
    }
}
