//! Upload batches.
//!
//! Files are first *staged* (validated against the configured limits) and
//! then run as a batch: every task is dispatched at once, each one walks its
//! own state machine, and the batch reports once all of them have settled.
//!
//! ```text
//! Queued → UploadingToServer → PendingOpenai → CompletedOpenai
//!    │             │                 │
//!    └─────────────┴─────────────────┴──────→ Failed
//! ```
//!
//! `CompletedOpenai` and `Failed` are terminal.

use anyhow::{anyhow, bail, Result};
use futures::future::join_all;
use serde::Serialize;
use std::path::Path;

use crate::config::UploadConfig;
use crate::index::DocumentIndex;
use crate::models::KnowledgeBaseEntry;
use crate::registry::KnowledgeBaseRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Queued,
    UploadingToServer,
    PendingOpenai,
    CompletedOpenai,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::CompletedOpenai | UploadStatus::Failed)
    }

    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, next) {
            (Queued, UploadingToServer) => true,
            (UploadingToServer, PendingOpenai) => true,
            (PendingOpenai, CompletedOpenai) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            UploadStatus::Queued => "queued",
            UploadStatus::UploadingToServer => "uploading",
            UploadStatus::PendingOpenai => "indexing",
            UploadStatus::CompletedOpenai => "completed",
            UploadStatus::Failed => "failed",
        }
    }
}

/// A file accepted into a batch.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub id: String,
    pub name: String,
    pub bytes: Vec<u8>,
}

impl StagedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct UploadTask {
    pub file: StagedFile,
    pub status: UploadStatus,
    pub error: Option<String>,
    /// Set once the file is indexed.
    pub entry: Option<KnowledgeBaseEntry>,
}

impl UploadTask {
    pub fn new(file: StagedFile) -> Self {
        Self {
            file,
            status: UploadStatus::Queued,
            error: None,
            entry: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.file.id
    }

    /// Moves to `next`, refusing transitions the state machine forbids.
    pub fn advance(&mut self, next: UploadStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            bail!(
                "upload {}: invalid transition {:?} -> {:?}",
                self.file.name,
                self.status,
                next
            );
        }
        self.status = next;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = UploadStatus::Failed;
        self.error = Some(error.into());
    }
}

/// Files accepted for upload plus the reasons others were turned away.
#[derive(Debug, Default)]
pub struct Staging {
    pub tasks: Vec<UploadTask>,
    pub errors: Vec<String>,
}

/// Validates `files` against `limits`.
///
/// Files past `max_files` are rejected as a group with one message; each
/// oversized or empty file is rejected with its own message.
pub fn stage(files: Vec<StagedFile>, limits: &UploadConfig) -> Staging {
    let mut staging = Staging::default();

    if files.len() > limits.max_files {
        staging.errors.push(format!(
            "You can only upload a maximum of {} files.",
            limits.max_files
        ));
    }

    for file in files.into_iter().take(limits.max_files) {
        if file.bytes.is_empty() {
            staging
                .errors
                .push(format!("File \"{}\" is empty.", file.name));
        } else if file.size() > limits.max_size_bytes {
            staging.errors.push(format!(
                "File \"{}\" exceeds the maximum size of {}.",
                file.name,
                format_bytes(limits.max_size_bytes)
            ));
        } else {
            staging.tasks.push(UploadTask::new(file));
        }
    }

    staging
}

/// Reads each path from disk into a [`StagedFile`] named after its file name.
pub fn read_files(paths: &[impl AsRef<Path>]) -> Result<Vec<StagedFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(StagedFile::new(name, bytes));
    }
    Ok(files)
}

/// Final state of every task in a batch, in the order they were staged.
#[derive(Debug)]
pub struct BatchReport {
    pub tasks: Vec<UploadTask>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == UploadStatus::Failed)
            .count()
    }

    pub fn completed(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == UploadStatus::CompletedOpenai)
            .count()
    }

    pub fn summary(&self) -> String {
        match self.failures() {
            0 => format!("Uploaded {} file(s).", self.completed()),
            n => format!(
                "Upload completed with {} failure{} ({} of {} uploaded).",
                n,
                if n == 1 { "" } else { "s" },
                self.completed(),
                self.tasks.len()
            ),
        }
    }
}

/// Uploads every task concurrently and records successes in `registry`.
///
/// A failing task only marks itself `Failed`; siblings keep going.
pub async fn run_batch(
    tasks: Vec<UploadTask>,
    index: &dyn DocumentIndex,
    registry: &KnowledgeBaseRegistry,
) -> BatchReport {
    let tasks = join_all(tasks.into_iter().map(|task| run_task(task, index, registry))).await;
    let report = BatchReport { tasks };
    if report.failures() > 0 {
        tracing::warn!(failures = report.failures(), "upload batch finished with failures");
    } else {
        tracing::info!(completed = report.completed(), "upload batch finished");
    }
    report
}

async fn run_task(
    mut task: UploadTask,
    index: &dyn DocumentIndex,
    registry: &KnowledgeBaseRegistry,
) -> UploadTask {
    if let Err(e) = drive_task(&mut task, index, registry).await {
        tracing::warn!(file = %task.file.name, error = %e, "upload failed");
        task.fail(e.to_string());
    }
    task
}

/// Walks one task through the state machine. Any error, including a
/// refused transition, leaves the task for the caller to mark failed.
async fn drive_task(
    task: &mut UploadTask,
    index: &dyn DocumentIndex,
    registry: &KnowledgeBaseRegistry,
) -> Result<()> {
    task.advance(UploadStatus::UploadingToServer)?;
    let bytes = std::mem::take(&mut task.file.bytes);
    task.advance(UploadStatus::PendingOpenai)?;

    let uploaded = index.upload_and_index(&task.file.name, bytes).await?;
    let entry = KnowledgeBaseEntry::from(uploaded);
    registry
        .add_entry(entry.clone())
        .map_err(|e| anyhow!("Indexed but not recorded locally: {}", e))?;

    task.advance(UploadStatus::CompletedOpenai)?;
    task.entry = Some(entry);
    Ok(())
}

/// Formats a byte count with binary units: `512 Bytes`, `1.5KB`, `5MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        return format!("{} Bytes", bytes);
    }
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}{}", rounded as u64, UNITS[unit])
    } else {
        format!("{}{}", rounded, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::events::{EventBus, RegistryEvent};
    use crate::models::UploadedFile;
    use crate::storage::MemoryBlobStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Names starting with "bad" fail; everything else gets `file-<name>`.
    /// `reuse` forces every upload to return the same file id.
    #[derive(Default)]
    struct FakeIndex {
        reuse: Option<&'static str>,
    }

    #[async_trait]
    impl DocumentIndex for FakeIndex {
        async fn upload_and_index(
            &self,
            file_name: &str,
            _bytes: Vec<u8>,
        ) -> Result<UploadedFile, IndexError> {
            if file_name.starts_with("bad") {
                return Err(IndexError::Api {
                    status: 500,
                    message: format!("Upload failed for {}", file_name),
                });
            }
            Ok(UploadedFile {
                file_name: file_name.to_string(),
                file_id: self
                    .reuse
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("file-{}", file_name)),
                collection_id: "c1".to_string(),
            })
        }

        async fn remove_entry(&self, _: &KnowledgeBaseEntry) -> Result<(), IndexError> {
            Ok(())
        }
    }

    fn registry() -> KnowledgeBaseRegistry {
        KnowledgeBaseRegistry::new(Arc::new(MemoryBlobStore::new()), EventBus::new())
    }

    fn limits() -> UploadConfig {
        UploadConfig {
            max_files: 3,
            max_size_bytes: 10,
        }
    }

    #[test]
    fn state_machine_follows_happy_path() {
        let mut task = UploadTask::new(StagedFile::new("a.txt", b"x".to_vec()));
        task.advance(UploadStatus::UploadingToServer).unwrap();
        task.advance(UploadStatus::PendingOpenai).unwrap();
        task.advance(UploadStatus::CompletedOpenai).unwrap();
        assert!(task.status.is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut task = UploadTask::new(StagedFile::new("a.txt", b"x".to_vec()));
        task.fail("nope");
        assert!(task.advance(UploadStatus::UploadingToServer).is_err());
        assert!(task.advance(UploadStatus::Failed).is_err());
        task.fail("again");
        assert_eq!(task.error.as_deref(), Some("nope"));

        assert!(!UploadStatus::CompletedOpenai.can_transition_to(UploadStatus::Failed));
        assert!(!UploadStatus::Queued.can_transition_to(UploadStatus::CompletedOpenai));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&UploadStatus::UploadingToServer).unwrap(),
            r#""uploading_to_server""#
        );
        assert_eq!(
            serde_json::to_string(&UploadStatus::CompletedOpenai).unwrap(),
            r#""completed_openai""#
        );
    }

    #[test]
    fn stage_enforces_limits() {
        let files = vec![
            StagedFile::new("ok.txt", b"hello".to_vec()),
            StagedFile::new("big.txt", vec![b'x'; 11]),
            StagedFile::new("empty.txt", Vec::new()),
            StagedFile::new("dropped.txt", b"x".to_vec()),
        ];
        let staging = stage(files, &limits());
        assert_eq!(staging.tasks.len(), 1);
        assert_eq!(staging.tasks[0].file.name, "ok.txt");
        assert_eq!(staging.errors.len(), 3);
        assert_eq!(staging.errors[0], "You can only upload a maximum of 3 files.");
        assert_eq!(
            staging.errors[1],
            "File \"big.txt\" exceeds the maximum size of 10 Bytes."
        );
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let reg = registry();
        let staging = stage(
            vec![
                StagedFile::new("a.txt", b"a".to_vec()),
                StagedFile::new("bad.txt", b"b".to_vec()),
                StagedFile::new("c.txt", b"c".to_vec()),
            ],
            &limits(),
        );

        let report = run_batch(staging.tasks, &FakeIndex::default(), &reg).await;
        let statuses: Vec<UploadStatus> = report.tasks.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![
                UploadStatus::CompletedOpenai,
                UploadStatus::Failed,
                UploadStatus::CompletedOpenai
            ]
        );
        assert_eq!(
            report.tasks[1].error.as_deref(),
            Some("Upload failed for bad.txt")
        );
        assert_eq!(report.failures(), 1);
        assert_eq!(
            report.summary(),
            "Upload completed with 1 failure (2 of 3 uploaded)."
        );
        assert_eq!(reg.load_all().len(), 2);
    }

    #[tokio::test]
    async fn task_in_wrong_state_fails_without_uploading() {
        let reg = registry();
        let mut task = UploadTask::new(StagedFile::new("a.txt", b"a".to_vec()));
        task.advance(UploadStatus::UploadingToServer).unwrap();

        let report = run_batch(vec![task], &FakeIndex::default(), &reg).await;
        let task = &report.tasks[0];
        assert_eq!(task.status, UploadStatus::Failed);
        assert!(task
            .error
            .as_deref()
            .unwrap()
            .contains("invalid transition"));
        assert!(task.entry.is_none());
        assert!(reg.load_all().is_empty());
    }

    #[tokio::test]
    async fn upload_registers_entry_and_broadcasts() {
        let reg = registry();
        let mut rx = reg.bus().subscribe();
        let staging = stage(vec![StagedFile::new("a.txt", b"a".to_vec())], &limits());

        let report = run_batch(
            staging.tasks,
            &FakeIndex { reuse: Some("f1") },
            &reg,
        )
        .await;
        let expected = KnowledgeBaseEntry::new("a.txt", "f1", "c1");
        assert_eq!(report.tasks[0].entry.as_ref(), Some(&expected));
        assert_eq!(reg.load_all(), vec![expected.clone()]);
        assert_eq!(rx.try_recv().unwrap(), RegistryEvent::Added(expected));
    }

    #[tokio::test]
    async fn reupload_with_same_file_id_keeps_one_entry() {
        let reg = registry();
        let index = FakeIndex { reuse: Some("f1") };
        for _ in 0..2 {
            let staging = stage(vec![StagedFile::new("a.txt", b"a".to_vec())], &limits());
            run_batch(staging.tasks, &index, &reg).await;
        }
        assert_eq!(reg.load_all().len(), 1);
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(1536), "1.5KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5MB");
    }

    #[test]
    fn read_files_uses_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# notes").unwrap();
        let files = read_files(&[&path]).unwrap();
        assert_eq!(files[0].name, "notes.md");
        assert_eq!(files[0].size(), 7);
        assert!(read_files(&[dir.path().join("missing.md")]).is_err());
    }
}
