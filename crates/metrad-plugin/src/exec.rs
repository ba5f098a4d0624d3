use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use metrad_types::status_code::PluginCode;
use metrad_types::{make_error_msg, Result, Status};

use crate::arg::PluginArg;
use crate::meta::Response;

/// Default time a plugin has to print its handshake line.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// A plugin child process that completed its handshake.
#[derive(Debug)]
pub struct LaunchedPlugin {
    pub response: Response,
    child: Child,
}

impl LaunchedPlugin {
    /// The child's OS pid, if it is still running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Force-kill the child process and reap it.
    pub async fn reap(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "plugin child already gone");
        }
        let _ = self.child.wait().await;
    }

    /// Wait up to `timeout` for the child to exit on its own, then kill it.
    pub async fn reap_within(&mut self, timeout: Duration) {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("plugin did not exit in time, killing");
                self.reap().await;
            }
        }
    }
}

/// Launch a plugin artifact and run the stdout handshake.
///
/// The artifact is spawned with a single argument: the compact JSON form of
/// `arg`. The child must write exactly one JSON `Response` line to stdout
/// within `handshake_timeout`; anything else terminates the child and fails
/// with `HandshakeFailed`.
pub async fn launch(
    artifact: &Path,
    arg: &PluginArg,
    handshake_timeout: Duration,
) -> Result<LaunchedPlugin> {
    let arg_json = arg
        .to_json()
        .map_err(|e| Status::with_message(PluginCode::LAUNCH_FAILED, e.to_string()))?;

    let mut child = Command::new(artifact)
        .arg(&arg_json)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            Status::with_message(
                PluginCode::LAUNCH_FAILED,
                format!("spawn {}: {}", artifact.display(), e),
            )
        })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        Status::with_message(PluginCode::LAUNCH_FAILED, "plugin stdout not captured")
    })?;

    let mut line = String::new();
    let mut reader = BufReader::new(stdout);
    let read = tokio::time::timeout(handshake_timeout, reader.read_line(&mut line)).await;

    async fn terminate(child: &mut Child) {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }

    match read {
        Err(_) => {
            terminate(&mut child).await;
            make_error_msg(
                PluginCode::HANDSHAKE_FAILED,
                format!("no handshake within {:?}", handshake_timeout),
            )
        }
        Ok(Err(e)) => {
            terminate(&mut child).await;
            make_error_msg(PluginCode::HANDSHAKE_FAILED, format!("read stdout: {}", e))
        }
        Ok(Ok(0)) => {
            terminate(&mut child).await;
            make_error_msg(PluginCode::HANDSHAKE_FAILED, "plugin closed stdout")
        }
        Ok(Ok(_)) => {
            let response: Response = match serde_json::from_str(line.trim()) {
                Ok(r) => r,
                Err(e) => {
                    terminate(&mut child).await;
                    return make_error_msg(
                        PluginCode::HANDSHAKE_FAILED,
                        format!("bad handshake line: {}", e),
                    );
                }
            };
            if let Some(ref msg) = response.error {
                if !msg.is_empty() {
                    let msg = msg.clone();
                    terminate(&mut child).await;
                    return make_error_msg(PluginCode::HANDSHAKE_FAILED, msg);
                }
            }
            debug!(
                plugin = %response.meta.key(),
                address = %response.listen_address,
                "plugin handshake complete"
            );
            Ok(LaunchedPlugin { response, child })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn script_artifact(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        writeln!(f, "{}", body).unwrap();
        drop(f);
        let mut perm = std::fs::metadata(&path).unwrap().permissions();
        perm.set_mode(0o755);
        std::fs::set_permissions(&path, perm).unwrap();
        path
    }

    fn handshake_line() -> String {
        r#"{"Meta":{"Name":"dummy","Version":2,"Type":"collector","AcceptedContentTypes":[],"ReturnedContentTypes":["metrad.bin"]},"ListenAddress":"127.0.0.1:1","Token":"t","Type":"collector"}"#.to_string()
    }

    #[tokio::test]
    async fn test_launch_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = script_artifact(
            dir.path(),
            "good-plugin",
            &format!("echo '{}'\nsleep 5", handshake_line()),
        );

        let arg = PluginArg::new(Duration::from_secs(1), None);
        let mut launched = launch(&artifact, &arg, DEFAULT_HANDSHAKE_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(launched.response.meta.name, "dummy");
        assert!(launched.pid().is_some());
        launched.reap().await;
    }

    #[tokio::test]
    async fn test_launch_handshake_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = script_artifact(dir.path(), "silent-plugin", "sleep 10");

        let arg = PluginArg::new(Duration::from_secs(1), None);
        let err = launch(&artifact, &arg, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.code(), PluginCode::HANDSHAKE_FAILED);
    }

    #[tokio::test]
    async fn test_launch_bad_handshake_line() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = script_artifact(dir.path(), "garbage-plugin", "echo 'not json'");

        let arg = PluginArg::new(Duration::from_secs(1), None);
        let err = launch(&artifact, &arg, DEFAULT_HANDSHAKE_TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.code(), PluginCode::HANDSHAKE_FAILED);
    }

    #[tokio::test]
    async fn test_launch_error_in_response() {
        let dir = tempfile::tempdir().unwrap();
        let line = r#"{"Meta":{"Name":"bad","Version":1,"Type":"collector"},"ListenAddress":"","Type":"collector","ErrorMessage":"bind failed"}"#;
        let artifact =
            script_artifact(dir.path(), "error-plugin", &format!("echo '{}'", line));

        let arg = PluginArg::new(Duration::from_secs(1), None);
        let err = launch(&artifact, &arg, DEFAULT_HANDSHAKE_TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.code(), PluginCode::HANDSHAKE_FAILED);
        assert_eq!(err.message(), Some("bind failed"));
    }

    #[tokio::test]
    async fn test_launch_missing_artifact() {
        let arg = PluginArg::new(Duration::from_secs(1), None);
        let err = launch(
            Path::new("/nonexistent/plugin"),
            &arg,
            DEFAULT_HANDSHAKE_TIMEOUT,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), PluginCode::LAUNCH_FAILED);
    }
}
