use crate::error::{AppError, Result};
use crate::models::JobRecord;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const JOBS_FILE: &str = "jobs.jsonl";
pub const RESUME_FILE: &str = "resume.md";

/// Append-only newline-delimited JSON store of crawled jobs.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .map_err(|e| AppError::Storage(format!("Failed to create data directory: {}", e)))?;
        Ok(Self {
            path: data_dir.join(JOBS_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single line and flushes it before returning.
    pub fn append(&self, record: &JobRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AppError::Storage(format!("Failed to open {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .map_err(|e| AppError::Storage(format!("Failed to append job record: {}", e)))?;
        file.flush()
            .map_err(|e| AppError::Storage(format!("Failed to flush job record: {}", e)))?;
        Ok(())
    }

    /// Reads a snapshot of the store.
    ///
    /// Only newline-terminated lines are parsed, so a line still being written
    /// by a running crawl is left for the next read. Blank lines are skipped and
    /// malformed lines are logged and skipped.
    pub fn load_jobs(&self) -> Result<Vec<JobRecord>> {
        if !self.path.exists() {
            return Err(AppError::NotFound("jobs.jsonl not found. Run crawl first.".to_string()));
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| AppError::Storage(format!("Failed to read {}: {}", self.path.display(), e)))?;

        let complete = match content.rfind('\n') {
            Some(end) => &content[..end],
            None => "",
        };

        let mut jobs = Vec::new();
        for (number, line) in complete.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<JobRecord>(line) {
                Ok(record) => jobs.push(record),
                Err(e) => tracing::warn!("Skipping malformed line {} in {}: {}", number + 1, JOBS_FILE, e),
            }
        }
        Ok(jobs)
    }
}

/// Where a resume comes from when saving it.
#[derive(Debug, Clone)]
pub enum ResumeSource {
    File(PathBuf),
    Inline(String),
}

/// Single-document resume store, overwritten on every save.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    path: PathBuf,
}

impl ResumeStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .map_err(|e| AppError::Storage(format!("Failed to create data directory: {}", e)))?;
        Ok(Self {
            path: data_dir.join(RESUME_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, source: &ResumeSource) -> Result<PathBuf> {
        match source {
            ResumeSource::File(from) => {
                // Read fully first: `from` may be the stored resume itself.
                let content = fs::read(from).map_err(|e| {
                    AppError::Storage(format!("Failed to read resume from {}: {}", from.display(), e))
                })?;
                fs::write(&self.path, content)
                    .map_err(|e| AppError::Storage(format!("Failed to write resume: {}", e)))?;
            }
            ResumeSource::Inline(content) => {
                fs::write(&self.path, content)
                    .map_err(|e| AppError::Storage(format!("Failed to write resume: {}", e)))?;
            }
        }
        tracing::info!("Resume saved to {}", self.path.display());
        Ok(self.path.clone())
    }

    /// The persisted resume, or an empty string when none was saved yet.
    pub fn load(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&self.path)
            .map_err(|e| AppError::Storage(format!("Failed to read resume: {}", e)))
    }

    /// Explicit text wins over the persisted resume.
    pub fn resolve(&self, explicit: &str) -> Result<String> {
        if !explicit.trim().is_empty() {
            return Ok(explicit.to_string());
        }
        self.load()
    }
}
