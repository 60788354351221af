//! ffmpeg-backed encoder.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use meetrec_common::{EncoderConfig, MeetrecError, MeetrecResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use crate::args::{encode_args, mux_args, MuxJob, RawVideoSpec};
use crate::backend::{EncoderBackend, EncoderExit, EncoderInput};
use crate::profile::EncoderProfile;

const STDERR_TAIL_LINES: usize = 20;

/// Encoder driving the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    config: EncoderConfig,
}

impl FfmpegEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Whether the configured binary can be found.
    pub fn is_available(&self) -> bool {
        command_exists(&self.config.ffmpeg_path)
    }

    async fn spawn_encoder(
        &self,
        spec: &RawVideoSpec,
        profile: EncoderProfile,
        output: &Path,
    ) -> MeetrecResult<FfmpegInput> {
        let args = encode_args(spec, profile, &self.config, output);
        tracing::debug!(args = ?args, "Starting ffmpeg encoder");

        // Not killed on drop: a slow encoder is left to finish its output.
        let child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MeetrecError::encoder(format!("Failed to start ffmpeg: {e}")))?;
        let mut input = FfmpegInput::from_child(child)?;

        // A bad codec makes ffmpeg exit right away instead of failing the spawn.
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(status) = input.child.try_wait()? {
            let stderr = input.stderr_task.await.unwrap_or_default();
            return Err(MeetrecError::encoder(format!(
                "ffmpeg exited immediately (status {status}): {}",
                tail(&stderr)
            )));
        }

        tracing::info!(
            pid = input.child.id(),
            profile = %profile,
            size = %spec.size_arg(),
            fps = spec.fps,
            "ffmpeg encoder started"
        );

        Ok(input)
    }
}

#[async_trait::async_trait]
impl EncoderBackend for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe(&self) -> EncoderProfile {
        if !self.config.prefer_hardware {
            return EncoderProfile::Software;
        }
        let timeout = Duration::from_secs(self.config.probe_timeout_secs.max(1));
        let output = Command::new(&self.config.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let profile = match tokio::time::timeout(timeout, output).await {
            Ok(Ok(output)) if output.status.success() => {
                let listing = String::from_utf8_lossy(&output.stdout);
                EncoderProfile::from_encoder_list(&listing, true)
            }
            Ok(Ok(output)) => {
                tracing::warn!(status = %output.status, "Encoder probe failed, using software");
                EncoderProfile::Software
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Encoder probe could not run, using software");
                EncoderProfile::Software
            }
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Encoder probe timed out, using software");
                EncoderProfile::Software
            }
        };
        tracing::info!(profile = %profile, "Encoder profile selected");
        profile
    }

    async fn start(
        &self,
        spec: &RawVideoSpec,
        profile: EncoderProfile,
        output: &Path,
    ) -> MeetrecResult<Box<dyn EncoderInput>> {
        match self.spawn_encoder(spec, profile, output).await {
            Ok(input) => Ok(Box::new(input)),
            Err(e) if profile.is_hardware() => {
                tracing::warn!(error = %e, "Hardware encoder failed to start, retrying with software");
                let input = self
                    .spawn_encoder(spec, EncoderProfile::Software, output)
                    .await?;
                Ok(Box::new(input))
            }
            Err(e) => Err(e),
        }
    }

    async fn mux(&self, job: &MuxJob, profile: EncoderProfile) -> MeetrecResult<()> {
        let mut attempt = profile;
        loop {
            let args = mux_args(job, attempt, &self.config);
            tracing::debug!(args = ?args, "Running ffmpeg mux");
            let output = Command::new(&self.config.ffmpeg_path)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| MeetrecError::encoder(format!("Failed to start ffmpeg: {e}")))?;

            if output.status.success() {
                return Ok(());
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            if attempt.is_hardware() {
                tracing::warn!(stderr = %tail(&stderr), "Hardware mux failed, retrying with software");
                attempt = EncoderProfile::Software;
                continue;
            }
            return Err(MeetrecError::encoder(format!(
                "ffmpeg mux failed (status {}): {}",
                output.status,
                tail(&stderr)
            )));
        }
    }
}

/// Running ffmpeg encoder fed through stdin.
struct FfmpegInput {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: JoinHandle<String>,
}

impl FfmpegInput {
    fn from_child(mut child: Child) -> MeetrecResult<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MeetrecError::encoder("Failed to capture ffmpeg stdin"))?;
        let stderr_task = drain_stderr(&mut child)?;
        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr_task,
        })
    }

    /// Let an encoder that outlived its close timeout run to completion in
    /// the background.
    fn detach(self) {
        let FfmpegInput {
            mut child,
            stderr_task,
            ..
        } = self;
        let pid = child.id();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    tracing::info!(pid, "Detached ffmpeg finished");
                }
                Ok(status) => {
                    let stderr = stderr_task.await.unwrap_or_default();
                    tracing::warn!(pid, %status, stderr = %tail(&stderr), "Detached ffmpeg failed");
                }
                Err(e) => tracing::warn!(pid, error = %e, "Failed to wait on detached ffmpeg"),
            }
        });
    }
}

#[async_trait::async_trait]
impl EncoderInput for FfmpegInput {
    async fn feed(&mut self, frame: &[u8]) -> MeetrecResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MeetrecError::encoder("Encoder input already closed"))?;
        stdin
            .write_all(frame)
            .await
            .map_err(|e| MeetrecError::encoder(format!("Encoder pipe closed: {e}")))
    }

    async fn close(self: Box<Self>, timeout: Duration) -> MeetrecResult<EncoderExit> {
        let mut input = *self;
        if let Some(mut stdin) = input.stdin.take() {
            if let Err(e) = stdin.flush().await {
                tracing::debug!(error = %e, "Flushing encoder stdin failed");
            }
        }

        let waited = tokio::time::timeout(timeout, input.child.wait()).await;
        let success = match waited {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to wait on ffmpeg");
                false
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    pid = input.child.id(),
                    "ffmpeg did not exit in time, leaving it running"
                );
                input.detach();
                return Ok(EncoderExit {
                    success: false,
                    timed_out: true,
                    stderr_tail: String::new(),
                });
            }
        };

        let stderr = input.stderr_task.await.unwrap_or_default();
        let exit = EncoderExit {
            success,
            timed_out: false,
            stderr_tail: tail(&stderr),
        };
        if !exit.success {
            tracing::warn!(stderr = %exit.stderr_tail, "ffmpeg encoder exited with an error");
        }
        Ok(exit)
    }
}

/// Drain stderr concurrently so ffmpeg never blocks on a full pipe.
fn drain_stderr(child: &mut Child) -> MeetrecResult<JoinHandle<String>> {
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| MeetrecError::encoder("Failed to capture ffmpeg stderr"))?;
    Ok(tokio::spawn(async move {
        let mut output = String::new();
        match stderr.read_to_string(&mut output).await {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    }))
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Whether `binary` resolves on `PATH` (or is an existing path).
pub fn command_exists(binary: &str) -> bool {
    if binary.contains('/') {
        return Path::new(binary).is_file();
    }
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_last_lines() {
        let text = (0..30).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let tail = tail(&text);
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }

    #[test]
    fn test_missing_binary() {
        assert!(!command_exists("meetrec-definitely-not-a-binary"));
        assert!(!command_exists("/nonexistent/ffmpeg"));
    }

    #[tokio::test]
    async fn test_probe_without_binary_falls_back_to_software() {
        let encoder = FfmpegEncoder::new(EncoderConfig {
            ffmpeg_path: "/nonexistent/ffmpeg".into(),
            ..EncoderConfig::default()
        });
        assert_eq!(encoder.probe().await, EncoderProfile::Software);
    }

    #[tokio::test]
    async fn test_start_without_binary_fails() {
        let encoder = FfmpegEncoder::new(EncoderConfig {
            ffmpeg_path: "/nonexistent/ffmpeg".into(),
            ..EncoderConfig::default()
        });
        let spec = RawVideoSpec {
            width: 16,
            height: 16,
            fps: 24,
        };
        let dir = tempfile::tempdir().unwrap();
        let result = encoder
            .start(&spec, EncoderProfile::Hardware, &dir.path().join("out.avi"))
            .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_timeout_leaves_encoder_running() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let child = Command::new("sh")
            .arg("-c")
            .arg("cat >/dev/null; sleep 0.3; touch \"$0\"")
            .arg(&marker)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let mut input = Box::new(FfmpegInput::from_child(child).unwrap());
        input.feed(&[0u8; 64]).await.unwrap();

        let exit = input.close(Duration::from_millis(50)).await.unwrap();
        assert!(exit.timed_out);
        assert!(!exit.success);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !marker.exists() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(marker.exists(), "encoder was stopped before it finished");
    }
}
