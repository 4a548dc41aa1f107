//! Still-to-video encoding and audio muxing through an ffmpeg subprocess.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::errors::RenderError;

/// Upper bound on any single encoder invocation.
pub const ENCODER_TIMEOUT: Duration = Duration::from_secs(120);

/// Background music volume multiplier.
const MUSIC_VOLUME: &str = "0.3";

/// Finds `name` in a `PATH`-style list of directories.
#[must_use]
pub fn find_in_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Resolves the encoder binary: an existing explicit path, otherwise `PATH`.
#[must_use]
pub fn locate_encoder(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "Configured encoder not found, searching PATH");
    }
    std::env::var_os("PATH").and_then(|p| find_in_path("ffmpeg", &p))
}

/// Arguments that loop a single still into an H.264 MP4.
#[must_use]
pub fn encode_args(image: &Path, output: &Path, duration_secs: u32, fps: u32) -> Vec<OsString> {
    let fps = fps.to_string();
    let mut args: Vec<OsString> = ["-y", "-loop", "1", "-framerate", fps.as_str(), "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(image.as_os_str().to_os_string());
    args.extend(
        [
            "-t",
            duration_secs.to_string().as_str(),
            "-r",
            fps.as_str(),
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ]
        .iter()
        .map(OsString::from),
    );
    args.push(output.as_os_str().to_os_string());
    args
}

/// Arguments that mux a looped, trimmed, quietened audio bed into a video.
#[must_use]
pub fn mux_args(video: &Path, music: &Path, output: &Path, duration_secs: u32) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), video.as_os_str().to_os_string()];
    args.extend(["-stream_loop", "-1", "-i"].iter().map(OsString::from));
    args.push(music.as_os_str().to_os_string());
    args.extend(
        [
            "-t",
            duration_secs.to_string().as_str(),
            "-c:v",
            "copy",
            "-filter:a",
            format!("volume={MUSIC_VOLUME}").as_str(),
            "-c:a",
            "aac",
            "-shortest",
            "-y",
        ]
        .iter()
        .map(OsString::from),
    );
    args.push(output.as_os_str().to_os_string());
    args
}

/// Path of the muxed output next to the silent video.
#[must_use]
pub fn with_music_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video");
    video.with_file_name(format!("{stem}_with_music.mp4"))
}

/// Runs the encoder with a fixed duration and frame rate.
#[derive(Debug, Clone)]
pub struct VideoEncoder {
    binary: PathBuf,
    duration_secs: u32,
    fps: u32,
    timeout: Duration,
}

impl VideoEncoder {
    /// Creates an encoder around a resolved binary.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, duration_secs: u32, fps: u32) -> Self {
        Self {
            binary: binary.into(),
            duration_secs,
            fps,
            timeout: ENCODER_TIMEOUT,
        }
    }

    /// Sets the per-invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The encoder binary.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Encodes `image` into `output`.
    pub async fn encode(&self, image: &Path, output: &Path) -> Result<(), RenderError> {
        tracing::info!(
            image = %image.display(),
            duration_secs = self.duration_secs,
            fps = self.fps,
            "Encoding video"
        );
        self.run(encode_args(image, output, self.duration_secs, self.fps))
            .await
    }

    /// Muxes `music` into `video`, writing `output`.
    pub async fn mux(&self, video: &Path, music: &Path, output: &Path) -> Result<(), RenderError> {
        tracing::info!(music = %music.display(), "Adding background music");
        self.run(mux_args(video, music, output, self.duration_secs))
            .await
    }

    async fn run(&self, args: Vec<OsString>) -> Result<(), RenderError> {
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                RenderError::Encoder(format!("timed out after {}s", self.timeout.as_secs()))
            })??;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .chars()
            .rev()
            .take(500)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Err(RenderError::Encoder(format!(
            "exit status {}: {tail}",
            output.status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_encode_args() {
        let args = encode_args(Path::new("/tmp/a.jpg"), Path::new("/tmp/a.mp4"), 15, 30);
        assert_eq!(
            strings(&args),
            vec![
                "-y", "-loop", "1", "-framerate", "30", "-i", "/tmp/a.jpg", "-t", "15", "-r",
                "30", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-movflags", "+faststart",
                "/tmp/a.mp4",
            ]
        );
    }

    #[test]
    fn test_mux_args() {
        let args = mux_args(
            Path::new("/tmp/a.mp4"),
            Path::new("/var/task/background_music.mp3"),
            Path::new("/tmp/a_with_music.mp4"),
            15,
        );
        assert_eq!(
            strings(&args),
            vec![
                "-i",
                "/tmp/a.mp4",
                "-stream_loop",
                "-1",
                "-i",
                "/var/task/background_music.mp3",
                "-t",
                "15",
                "-c:v",
                "copy",
                "-filter:a",
                "volume=0.3",
                "-c:a",
                "aac",
                "-shortest",
                "-y",
                "/tmp/a_with_music.mp4",
            ]
        );
    }

    #[test]
    fn test_with_music_path() {
        assert_eq!(
            with_music_path(Path::new("/tmp/fact_video_1.mp4")),
            PathBuf::from("/tmp/fact_video_1_with_music.mp4")
        );
    }

    #[test]
    fn test_find_in_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("ffmpeg");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();

        let path_var = std::env::join_paths([Path::new("/nonexistent/bin"), dir.path()]).unwrap();
        assert_eq!(find_in_path("ffmpeg", &path_var), Some(bin));
        assert_eq!(find_in_path("ffplay", &path_var), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let encoder = VideoEncoder::new("/nonexistent/ffmpeg", 15, 30);
        let err = encoder
            .encode(Path::new("/tmp/a.jpg"), Path::new("/tmp/a.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Io(_)));
    }
}
