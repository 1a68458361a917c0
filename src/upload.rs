use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{DataKind, FileResult, RecordTotals, UploadFile, UploadResponse};

const SUPPORTED_EXTENSIONS: [&str; 3] = ["csv", "xlsx", "xls"];

pub fn is_supported_format(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Ingested {
        file_name: String,
        data_type: DataKind,
        records: usize,
    },
    Rejected {
        file_name: String,
        reason: String,
    },
}

impl FileOutcome {
    pub fn file_name(&self) -> &str {
        match self {
            FileOutcome::Ingested { file_name, .. }
            | FileOutcome::Rejected { file_name, .. } => file_name,
        }
    }

    pub fn is_ingested(&self) -> bool {
        matches!(self, FileOutcome::Ingested { .. })
    }
}

impl From<FileResult> for FileOutcome {
    fn from(result: FileResult) -> Self {
        match result {
            FileResult::Success {
                filename,
                data_type,
                records_count,
            } => FileOutcome::Ingested {
                file_name: filename,
                data_type,
                records: records_count,
            },
            FileResult::Error { filename, error } => FileOutcome::Rejected {
                file_name: filename,
                reason: error,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub outcomes: Vec<FileOutcome>,
    pub totals: Option<RecordTotals>,
}

impl UploadReport {
    pub fn ingested(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_ingested()).count()
    }

    pub fn rejected(&self) -> usize {
        self.outcomes.len() - self.ingested()
    }

    /// Local rejections come first, then the server's per-file results.
    /// A rejected file never undoes an ingested one.
    pub fn merge(local: Vec<FileOutcome>, response: Option<UploadResponse>) -> Self {
        let mut outcomes = local;
        let mut totals = None;
        if let Some(response) = response {
            outcomes.extend(response.results.into_iter().map(FileOutcome::from));
            totals = response.summary;
        }
        Self { outcomes, totals }
    }
}

#[derive(Debug, Default)]
pub struct PreparedUpload {
    pub files: Vec<UploadFile>,
    pub rejected: Vec<FileOutcome>,
}

/// Reads every supported file from disk. Unsupported or unreadable files are
/// rejected individually and the rest are still prepared.
pub async fn prepare(paths: &[PathBuf]) -> PreparedUpload {
    let mut prepared = PreparedUpload::default();

    for path in paths {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        if !is_supported_format(&file_name) {
            warn!(file = %file_name, "unsupported upload format");
            prepared.rejected.push(FileOutcome::Rejected {
                reason: format!(
                    "Unsupported file format: {file_name}. Only CSV and Excel files are supported."
                ),
                file_name,
            });
            continue;
        }

        match tokio::fs::read(path).await {
            Ok(bytes) => prepared.files.push(UploadFile { file_name, bytes }),
            Err(error) => {
                warn!(file = %file_name, %error, "could not read upload");
                prepared.rejected.push(FileOutcome::Rejected {
                    reason: format!("Could not read file: {error}"),
                    file_name,
                });
            }
        }
    }

    prepared
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStep {
    Advanced(u8),
    Completed,
    AlreadyComplete,
}

/// Simulated upload progress. Reaches 100 exactly once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    percent: u8,
}

impl Progress {
    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn advance(&mut self, step: u8) -> ProgressStep {
        if self.percent >= 100 {
            return ProgressStep::AlreadyComplete;
        }
        self.percent = self.percent.saturating_add(step.max(1)).min(100);
        if self.percent == 100 {
            ProgressStep::Completed
        } else {
            ProgressStep::Advanced(self.percent)
        }
    }

    /// Jumps straight to 100. Reports `AlreadyComplete` if it got there before.
    pub fn finish(&mut self) -> ProgressStep {
        if self.percent >= 100 {
            return ProgressStep::AlreadyComplete;
        }
        self.percent = 100;
        ProgressStep::Completed
    }
}

/// Handle on a running progress ticker.
pub struct ProgressTicker {
    receiver: watch::Receiver<u8>,
    finish: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl ProgressTicker {
    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.receiver.clone()
    }

    /// Fast-forwards to 100 unless the ticker already got there, waits for
    /// the task to end and returns the final percentage.
    pub async fn complete(mut self) -> u8 {
        if let Some(finish) = self.finish.take() {
            let _ = finish.send(());
        }
        if let Err(error) = (&mut self.handle).await {
            warn!(%error, "progress ticker ended abnormally");
        }
        let percent = *self.receiver.borrow();
        percent
    }
}

/// Drives a [`Progress`] from a tokio interval. The task ends once 100 has
/// been published, either by ticking there or through
/// [`ProgressTicker::complete`]; 100 is published exactly once.
pub fn spawn_progress(step: u8, period: Duration) -> ProgressTicker {
    let (sender, receiver) = watch::channel(0u8);
    let (finish, mut finished) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let mut progress = Progress::default();
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            let step = tokio::select! {
                _ = ticker.tick() => progress.advance(step),
                _ = &mut finished => progress.finish(),
            };
            match step {
                ProgressStep::Advanced(percent) => {
                    let _ = sender.send(percent);
                }
                ProgressStep::Completed => {
                    let _ = sender.send(100);
                    info!("upload progress complete");
                    break;
                }
                ProgressStep::AlreadyComplete => break,
            }
        }
    });

    ProgressTicker {
        receiver,
        finish: Some(finish),
        handle,
    }
}
