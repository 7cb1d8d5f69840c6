//! 结果判定与记录
//!
//! 模式匹配、`result.log` 结果记录、JUnit 报告以及面向引擎的上报入口。

pub mod junit;
mod pattern;
mod record;
mod reporter;


pub use pattern::{match_pattern, PatternSpec, PatternVerdict, UNSPECIFIED_MESSAGE};
pub use record::{RecordError, ResultRecord, TestCaseResult, TestStatus, RESULT_FILE_NAME};
pub use reporter::{log_install_errors, OperationReport, ResultReporter};
