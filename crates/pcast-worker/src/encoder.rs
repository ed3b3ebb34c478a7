//! FFmpeg-backed narration encoder.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{WorkerError, WorkerResult};
use crate::narration::{AudioInput, EncodedAudio, MediaEncoder};

/// Joins segments with FFmpeg's concat demuxer.
pub struct FfmpegEncoder {
    http: reqwest::Client,
    work_dir: PathBuf,
    audio_bitrate: String,
}

impl FfmpegEncoder {
    pub fn new(http: reqwest::Client, work_dir: impl AsRef<Path>) -> Self {
        Self {
            http,
            work_dir: work_dir.as_ref().to_path_buf(),
            audio_bitrate: "192k".to_string(),
        }
    }

    pub fn with_audio_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.audio_bitrate = bitrate.into();
        self
    }

    async fn download(&self, url: &str, path: &Path) -> WorkerResult<()> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        tokio::fs::write(path, &bytes).await?;
        Ok(())
    }
}

/// Concat demuxer list file body.
pub fn concat_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("file '{}'\n", p.display().to_string().replace('\'', "'\\''")))
        .collect()
}

/// Arguments for joining the listed files into one MP3.
pub fn concat_args(list: &Path, output: &Path, bitrate: &str) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list.display().to_string(),
        "-c:a".to_string(),
        "libmp3lame".to_string(),
        "-b:a".to_string(),
        bitrate.to_string(),
        output.display().to_string(),
    ]
}

async fn run(program: &str, args: &[String]) -> WorkerResult<String> {
    debug!("Running {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(WorkerError::processing_failed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn probe_duration(path: &Path) -> WorkerResult<f64> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        path.display().to_string(),
    ];
    let stdout = run("ffprobe", &args).await?;
    stdout
        .trim()
        .parse()
        .map_err(|_| WorkerError::processing_failed(format!("unreadable duration: {}", stdout.trim())))
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    async fn concat_audio(&self, segments: &[AudioInput]) -> WorkerResult<EncodedAudio> {
        if segments.is_empty() {
            return Err(WorkerError::processing_failed("no segments to join"));
        }

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let dir = tempfile::Builder::new()
            .prefix("narration-")
            .tempdir_in(&self.work_dir)?;

        let mut paths = Vec::with_capacity(segments.len());
        for (i, segment) in segments.iter().enumerate() {
            let path = dir.path().join(format!("segment-{:03}.mp3", i));
            self.download(&segment.url, &path).await?;
            paths.push(path);
        }

        let list = dir.path().join("segments.txt");
        tokio::fs::write(&list, concat_list(&paths)).await?;

        let output = dir.path().join("narration.mp3");
        run("ffmpeg", &concat_args(&list, &output, &self.audio_bitrate)).await?;

        let reported: Option<f64> = segments.iter().map(|s| s.duration_secs).sum();
        let duration_secs = match reported {
            Some(total) => total,
            None => probe_duration(&output).await?,
        };

        let bytes = tokio::fs::read(&output).await?;
        info!(
            "Joined {} segments into {:.1}s narration ({} bytes)",
            segments.len(),
            duration_secs,
            bytes.len()
        );

        Ok(EncodedAudio {
            bytes,
            duration_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_list_quotes_paths() {
        let list = concat_list(&[
            PathBuf::from("/tmp/a/segment-000.mp3"),
            PathBuf::from("/tmp/it's/segment-001.mp3"),
        ]);
        assert_eq!(
            list,
            "file '/tmp/a/segment-000.mp3'\nfile '/tmp/it'\\''s/segment-001.mp3'\n"
        );
    }

    #[test]
    fn test_concat_args() {
        let args = concat_args(Path::new("/w/list.txt"), Path::new("/w/out.mp3"), "128k");
        assert_eq!(args[0], "-y");
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "concat"));
        assert!(args.windows(2).any(|w| w[0] == "-b:a" && w[1] == "128k"));
        assert_eq!(args.last().map(String::as_str), Some("/w/out.mp3"));
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let encoder = FfmpegEncoder::new(reqwest::Client::new(), std::env::temp_dir());
        assert!(encoder.concat_audio(&[]).await.is_err());
    }
}
