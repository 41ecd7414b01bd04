//! ffmpeg-based media assembly for run finalization.
//!
//! Artifact references are file paths in this implementation. Stitching
//! uses the concat demuxer with the voiceover laid under the video;
//! subtitle burning renders an SRT generated from the script.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use rf_core::ResultRef;

use crate::activity::ActivityError;
use crate::collab::MediaTransform;

/// Seconds of screen time allotted to each subtitle cue.
const SECS_PER_CUE: u64 = 3;
/// Words per subtitle cue.
const WORDS_PER_CUE: usize = 8;

pub struct FfmpegTransform {
    bin: PathBuf,
    work_dir: PathBuf,
}

impl FfmpegTransform {
    pub fn new(bin: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            work_dir: work_dir.into(),
        }
    }

    async fn run_ffmpeg(&self, args: &[String]) -> Result<(), ActivityError> {
        tracing::debug!(bin = %self.bin.display(), ?args, "Running ffmpeg");
        let output = Command::new(&self.bin)
            .args(args)
            .arg("-y")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                ActivityError::retryable(format!(
                    "failed to spawn {}: {e}",
                    self.bin.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ActivityError::fatal(format!(
                "ffmpeg exited with {}: {tail}",
                output.status
            )));
        }
        Ok(())
    }

    fn scratch_path(&self, name: &str) -> PathBuf {
        self.work_dir.join(format!("{}-{name}", Uuid::new_v4()))
    }
}

#[async_trait]
impl MediaTransform for FfmpegTransform {
    async fn stitch(
        &self,
        clips: &[ResultRef],
        voiceover: &ResultRef,
    ) -> Result<ResultRef, ActivityError> {
        if clips.is_empty() {
            return Err(ActivityError::fatal("no clips to stitch"));
        }

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| ActivityError::retryable(format!("create work dir: {e}")))?;

        // Concat demuxer needs its input list in a file.
        let list_path = self.scratch_path("concat.txt");
        let list = clips
            .iter()
            .map(|c| format!("file '{}'\n", c.as_str().replace('\'', "'\\''")))
            .collect::<String>();
        tokio::fs::write(&list_path, list)
            .await
            .map_err(|e| ActivityError::retryable(format!("write concat list: {e}")))?;

        let out_path = self.scratch_path("merged.mp4");
        let args = vec![
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_path.display().to_string(),
            "-i".into(),
            voiceover.as_str().to_string(),
            "-map".into(),
            "0:v".into(),
            "-map".into(),
            "1:a".into(),
            "-c:v".into(),
            "libx264".into(),
            "-c:a".into(),
            "aac".into(),
            "-shortest".into(),
            out_path.display().to_string(),
        ];
        self.run_ffmpeg(&args).await?;

        let _ = tokio::fs::remove_file(&list_path).await;
        Ok(ResultRef::new(out_path.display().to_string()))
    }

    async fn burn_subtitles(
        &self,
        merged: &ResultRef,
        script: &str,
        language: &str,
    ) -> Result<ResultRef, ActivityError> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| ActivityError::retryable(format!("create work dir: {e}")))?;

        let srt_path = self.scratch_path(&format!("subs-{language}.srt"));
        tokio::fs::write(&srt_path, script_to_srt(script))
            .await
            .map_err(|e| ActivityError::retryable(format!("write subtitles: {e}")))?;

        let out_path = self.scratch_path("final.mp4");
        let args = vec![
            "-i".into(),
            merged.as_str().to_string(),
            "-vf".into(),
            format!("subtitles={}", srt_path.display()),
            "-c:a".into(),
            "copy".into(),
            out_path.display().to_string(),
        ];
        self.run_ffmpeg(&args).await?;

        let _ = tokio::fs::remove_file(&srt_path).await;
        Ok(ResultRef::new(out_path.display().to_string()))
    }
}

/// Render a script as fixed-cadence SRT cues.
fn script_to_srt(script: &str) -> String {
    let words: Vec<&str> = script.split_whitespace().collect();
    let mut srt = String::new();

    for (cue, chunk) in words.chunks(WORDS_PER_CUE).enumerate() {
        let start = cue as u64 * SECS_PER_CUE;
        let end = start + SECS_PER_CUE;
        srt.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            cue + 1,
            format_srt_time(start),
            format_srt_time(end),
            chunk.join(" ")
        ));
    }
    srt
}

fn format_srt_time(secs: u64) -> String {
    format!("{:02}:{:02}:{:02},000", secs / 3600, (secs % 3600) / 60, secs % 60)
}
