//! 结果记录
//!
//! 日志目录下的 `result.log` 是一个 JSON 数组，每个测试用例一行。
//! 写入时持有文件锁，并通过临时文件重命名保证原子性。

use crate::context::NextLevelResult;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const RESULT_FILE_NAME: &str = "result.log";

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("结果文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("结果文件格式错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// 测试用例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestStatus {
    #[serde(rename = "Not Run")]
    NotRun,
    Blocked,
    #[serde(alias = "Passed")]
    Pass,
    #[serde(alias = "Failed")]
    Fail,
    Unknown,
    Error,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::NotRun => "Not Run",
            TestStatus::Blocked => "Blocked",
            TestStatus::Pass => "Pass",
            TestStatus::Fail => "Fail",
            TestStatus::Unknown => "Unknown",
            TestStatus::Error => "Error",
        }
    }

    /// 同一用例内保留更严重的结论
    ///
    /// 严重程度 Fail > Error > Unknown > Pass。较早的 Error 不会被后续 Pass
    /// 掩盖，未结束的状态总会被替换。
    pub fn merge(self, next: TestStatus) -> TestStatus {
        if next.severity() >= self.severity() {
            next
        } else {
            self
        }
    }

    fn severity(self) -> u8 {
        match self {
            TestStatus::NotRun | TestStatus::Blocked => 0,
            TestStatus::Pass => 1,
            TestStatus::Unknown => 2,
            TestStatus::Error => 3,
            TestStatus::Fail => 4,
        }
    }

    /// 用例尚未写入最终结论
    pub fn is_pending(self) -> bool {
        matches!(self, TestStatus::NotRun | TestStatus::Blocked)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub tc_id: usize,
    #[serde(rename = "TC")]
    pub name: String,
    pub status: TestStatus,
    pub message: String,
    /// 补充命令的判定，不参与主结论
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_level: Vec<NextLevelResult>,
}

#[derive(Debug, Clone)]
pub struct ResultRecord {
    path: PathBuf,
}

impl ResultRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(log_dir: &Path) -> Self {
        Self::new(log_dir.join(RESULT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 批量模式开始前预写所有用例：状态 Blocked，消息 "Not Run"
    pub fn initialize(&self, names: &[String]) -> Result<Vec<TestCaseResult>, RecordError> {
        let _lock = self.lock()?;
        let rows: Vec<TestCaseResult> = names
            .iter()
            .enumerate()
            .map(|(index, name)| TestCaseResult {
                tc_id: index + 1,
                name: name.clone(),
                status: TestStatus::Blocked,
                message: TestStatus::NotRun.as_str().to_string(),
                next_level: Vec::new(),
            })
            .collect();
        self.write(&rows)?;
        Ok(rows)
    }

    pub fn load(&self) -> Result<Vec<TestCaseResult>, RecordError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn get(&self, tc_id: usize) -> Result<Option<TestCaseResult>, RecordError> {
        Ok(self.load()?.into_iter().find(|row| row.tc_id == tc_id))
    }

    /// 原地更新一行；不存在则追加
    ///
    /// 合并后仍保留原状态时，原消息一并保留。
    pub fn update(
        &self,
        tc_id: usize,
        name: &str,
        status: TestStatus,
        message: &str,
    ) -> Result<TestCaseResult, RecordError> {
        let updated = self.modify(tc_id, name, |row| {
            let merged = row.status.merge(status);
            if merged == status {
                row.message = message.to_string();
            }
            row.status = merged;
        })?;
        tracing::debug!(
            "[REPORT] tc_id: {}, TC: {} -> {}",
            updated.tc_id,
            updated.name,
            updated.status
        );
        Ok(updated)
    }

    /// 追加一条补充命令判定，状态和消息保持不变
    pub fn append_next_level(
        &self,
        tc_id: usize,
        name: &str,
        result: NextLevelResult,
    ) -> Result<TestCaseResult, RecordError> {
        self.modify(tc_id, name, |row| row.next_level.push(result))
    }

    fn modify<F>(&self, tc_id: usize, name: &str, apply: F) -> Result<TestCaseResult, RecordError>
    where
        F: FnOnce(&mut TestCaseResult),
    {
        let _lock = self.lock()?;
        let mut rows = self.load()?;

        let index = match rows.iter().position(|row| row.tc_id == tc_id) {
            Some(index) => index,
            None => {
                rows.push(TestCaseResult {
                    tc_id,
                    name: name.to_string(),
                    status: TestStatus::Blocked,
                    message: TestStatus::NotRun.as_str().to_string(),
                    next_level: Vec::new(),
                });
                rows.len() - 1
            }
        };
        apply(&mut rows[index]);
        let updated = rows[index].clone();

        self.write(&rows)?;
        Ok(updated)
    }

    fn write(&self, rows: &[TestCaseResult]) -> Result<(), RecordError> {
        let tmp = self.path.with_extension("log.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(rows)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// 文件锁在返回值 drop 时释放
    fn lock(&self) -> Result<File, RecordError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path.with_extension("lock"))?;
        file.lock_exclusive()?;
        Ok(file)
    }
}
