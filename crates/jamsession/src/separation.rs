//! Hand a saved artifact to the stem separator and watch for its output.
//!
//! The separator is an external script run as
//! `<interpreter> <script> <input_wav> <output_dir>`. It writes
//! `<output_dir>/<model>/<input_stem>/{drums,bass,other,vocals}.mp3`.
//! Nothing waits on it: completion is detected by polling for those files.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Stems the separator produces, in its output order.
pub const STEMS: [&str; 4] = ["drums", "bass", "other", "vocals"];

/// How to launch the separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparationHandoff {
    pub interpreter: PathBuf,
    pub script: PathBuf,
    pub output_dir: PathBuf,
    pub model_name: String,
}

impl SeparationHandoff {
    pub fn from_config(config: &jamconf::JamConfig) -> Self {
        Self {
            interpreter: config.separation.interpreter.clone(),
            script: config.separation.script.clone(),
            output_dir: config.paths.separated_dir.clone(),
            model_name: config.separation.model.clone(),
        }
    }

    /// Resolve the interpreter as a path, then through `PATH`.
    fn resolve_interpreter(&self) -> Option<PathBuf> {
        if self.interpreter.exists() {
            return Some(self.interpreter.clone());
        }
        which::which(&self.interpreter).ok()
    }

    /// Start separating `input` in the background. Returns the child pid.
    ///
    /// Launch problems are logged and swallowed; the caller never fails
    /// because of the handoff.
    pub fn dispatch(&self, input: &Path) -> Option<u32> {
        if !input.is_file() {
            warn!(input = %input.display(), "separation skipped, input file missing");
            return None;
        }

        let Some(interpreter) = self.resolve_interpreter() else {
            warn!(
                interpreter = %self.interpreter.display(),
                "separation skipped, interpreter not found"
            );
            return None;
        };

        let mut cmd = Command::new(&interpreter);
        cmd.arg(&self.script)
            .arg(input)
            .arg(&self.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        match cmd.spawn() {
            Ok(child) => {
                let pid = child.id();
                info!(
                    pid = ?pid,
                    input = %input.display(),
                    output_dir = %self.output_dir.display(),
                    model = %self.model_name,
                    "stem separation started"
                );
                // Dropping the handle leaves the process running
                drop(child);
                pid
            }
            Err(e) => {
                warn!(error = %e, interpreter = %interpreter.display(), "failed to start stem separation");
                None
            }
        }
    }

    /// Where stems for `input` will appear.
    pub fn layout_for(&self, input: &Path) -> StemLayout {
        StemLayout::new(&self.output_dir, &self.model_name, input)
    }
}

/// Progress of a separation, judged from the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StemStatus {
    Pending,
    /// Some stems exist. Holds how many.
    Partial(usize),
    Complete,
}

/// Expected stem files for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemLayout {
    dir: PathBuf,
}

impl StemLayout {
    pub fn new(output_dir: &Path, model_name: &str, input: &Path) -> Self {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            dir: output_dir.join(model_name).join(stem),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stem_paths(&self) -> Vec<PathBuf> {
        STEMS
            .iter()
            .map(|name| self.dir.join(format!("{}.mp3", name)))
            .collect()
    }

    pub fn status(&self) -> StemStatus {
        let present = self.stem_paths().iter().filter(|p| p.is_file()).count();
        match present {
            0 => StemStatus::Pending,
            n if n == STEMS.len() => StemStatus::Complete,
            n => StemStatus::Partial(n),
        }
    }

    /// Poll until every stem exists or `timeout` passes. Returns the last status seen.
    pub async fn wait_for_stems(&self, poll: Duration, timeout: Duration) -> StemStatus {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.status();
            if status == StemStatus::Complete {
                return status;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                debug!(dir = %self.dir.display(), ?status, "gave up waiting for stems");
                return status;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}
