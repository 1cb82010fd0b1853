use crate::events::{AppEvent, ApiStatus};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Case-insensitive check for the line `api.exe` prints once it is serving.
pub fn is_online_marker(line: &str, marker: &str) -> bool {
    !marker.is_empty() && line.to_lowercase().contains(&marker.to_lowercase())
}

/// Runs the companion `api.exe` and streams its output as [`AppEvent::ApiLine`].
pub struct ApiSupervisor {
    exe: Option<PathBuf>,
    marker: String,
    events: UnboundedSender<AppEvent>,
    runtime: Handle,
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
}

impl ApiSupervisor {
    pub fn new(
        exe: Option<PathBuf>,
        marker: impl Into<String>,
        events: UnboundedSender<AppEvent>,
        runtime: Handle,
    ) -> Self {
        Self {
            exe,
            marker: marker.into(),
            events,
            runtime,
            child: None,
            readers: Vec::new(),
        }
    }

    fn send(&self, event: AppEvent) {
        let _ = self.events.send(event);
    }

    pub fn start(&mut self) -> bool {
        let Some(exe) = self.exe.clone().filter(|p| p.is_file()) else {
            tracing::error!("api.exe not found");
            self.send(AppEvent::ApiLine("Error: api.exe not found.".to_string()));
            self.send(AppEvent::ApiStatus(ApiStatus::Offline));
            return false;
        };

        let _guard = self.runtime.enter();
        let mut cmd = Command::new(&exe);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = exe.parent() {
            cmd.current_dir(dir);
        }
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to start {}: {}", exe.display(), e);
                self.send(AppEvent::ApiLine(format!("Failed to start api: {}", e)));
                self.send(AppEvent::ApiStatus(ApiStatus::Offline));
                return false;
            }
        };
        tracing::info!("Started {} (pid {:?})", exe.display(), child.id());

        let online = Arc::new(AtomicBool::new(false));
        if let Some(stdout) = child.stdout.take() {
            let reader = self.spawn_reader(stdout, online.clone(), true);
            self.readers.push(reader);
        }
        if let Some(stderr) = child.stderr.take() {
            let reader = self.spawn_reader(stderr, online, false);
            self.readers.push(reader);
        }
        self.child = Some(child);
        true
    }

    fn spawn_reader<R>(&self, stream: R, online: Arc<AtomicBool>, is_stdout: bool) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let events = self.events.clone();
        let marker = self.marker.clone();
        self.runtime.spawn(async move {
            let mut lines = BufReader::new(stream).split(b'\n');
            while let Ok(Some(raw)) = lines.next_segment().await {
                let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
                if is_online_marker(&line, &marker) && !online.swap(true, Ordering::SeqCst) {
                    let _ = events.send(AppEvent::ApiStatus(ApiStatus::Online));
                }
                if events.send(AppEvent::ApiLine(line)).is_err() {
                    return;
                }
            }
            if is_stdout {
                let _ = events.send(AppEvent::ApiStatus(ApiStatus::Offline));
            }
        })
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn stop(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::warn!("Failed to terminate api.exe: {}", e);
            }
            self.send(AppEvent::ApiStatus(ApiStatus::Offline));
        }
    }

    pub fn restart(&mut self) -> bool {
        self.stop();
        self.start()
    }
}

impl Drop for ApiSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_marker_is_case_insensitive() {
        assert!(is_online_marker("  ┌──── Fiber v2.52 ────┐", "fiber"));
        assert!(!is_online_marker("listening on :8000", "fiber"));
        assert!(!is_online_marker("anything", ""));
    }

    #[tokio::test]
    async fn test_missing_exe_goes_offline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut supervisor =
            ApiSupervisor::new(Some(PathBuf::from("/no/such/api.exe")), "fiber", tx, Handle::current());
        assert!(!supervisor.start());

        assert!(matches!(rx.recv().await, Some(AppEvent::ApiLine(l)) if l == "Error: api.exe not found."));
        assert!(matches!(rx.recv().await, Some(AppEvent::ApiStatus(ApiStatus::Offline))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_output_and_reports_status() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("api.sh");
        std::fs::write(&script, "#!/bin/sh\necho booting\necho 'Fiber v2 started'\necho oops >&2\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut supervisor = ApiSupervisor::new(Some(script), "fiber", tx, Handle::current());
        assert!(supervisor.start());

        let mut lines = Vec::new();
        let mut statuses = Vec::new();
        while statuses.last() != Some(&ApiStatus::Offline) || lines.len() < 3 {
            match tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv()).await {
                Ok(Some(AppEvent::ApiLine(line))) => lines.push(line),
                Ok(Some(AppEvent::ApiStatus(status))) => statuses.push(status),
                Ok(Some(_)) => {}
                _ => panic!("api output incomplete: {:?} {:?}", lines, statuses),
            }
        }

        assert!(lines.contains(&"booting".to_string()));
        assert!(lines.contains(&"oops".to_string()));
        assert_eq!(statuses.first(), Some(&ApiStatus::Online));
    }
}
