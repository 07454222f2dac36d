use crate::core::error::{AppError, AppResult};
use crate::core::models::ExperimentRun;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// List entry for a persisted run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub timestamp: String,
    pub filename: String,
    pub num_responses: usize,
}

/// 磁盘上的实验结果存储。每个 run 一个 JSON 文件，
/// 文件名取 run_id 的前 8 位。
#[derive(Clone, Debug)]
pub struct ResultsStore {
    dir: PathBuf,
}

impl ResultsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_name(run_id: &str) -> String {
        let prefix: String = run_id.chars().take(8).collect();
        format!("experiment_{}.json", prefix)
    }

    pub fn save(&self, run: &ExperimentRun) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(&run.run_id));
        let json = serde_json::to_string_pretty(run)?;
        fs::write(&path, json)?;
        info!("结果已保存: {:?}", path);
        Ok(path)
    }

    pub fn load_path(path: &Path) -> AppResult<ExperimentRun> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Resolve a run id (full id or the 8-char file prefix) to its
    /// file: direct name first, then scan.
    pub fn find(&self, run_id: &str) -> AppResult<PathBuf> {
        let direct = self.dir.join(Self::file_name(run_id));
        if direct.exists() {
            return Ok(direct);
        }

        for path in self.run_files()? {
            match Self::load_path(&path) {
                Ok(run) if run.run_id == run_id => return Ok(path),
                Ok(_) => {}
                Err(e) => warn!("跳过无法解析的结果文件 {:?}: {}", path, e),
            }
        }

        Err(AppError::NotFound(format!("run {}", run_id)))
    }

    pub fn load(&self, run_id: &str) -> AppResult<ExperimentRun> {
        let path = self.find(run_id)?;
        Self::load_path(&path)
    }

    /// All persisted runs, newest first. Unparsable files are skipped.
    pub fn list(&self) -> AppResult<Vec<RunSummary>> {
        let mut entries: Vec<(SystemTime, RunSummary)> = Vec::new();

        for path in self.run_files()? {
            let run = match Self::load_path(&path) {
                Ok(run) => run,
                Err(e) => {
                    warn!("跳过无法解析的结果文件 {:?}: {}", path, e);
                    continue;
                }
            };
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            entries.push((
                modified,
                RunSummary {
                    run_id: run.run_id,
                    timestamp: run.timestamp,
                    filename,
                    num_responses: run.responses.len(),
                },
            ));
        }

        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, summary)| summary).collect())
    }

    fn run_files(&self) -> AppResult<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with("experiment_") && name.ends_with(".json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}
