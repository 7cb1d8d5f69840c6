//! 结果上报
//!
//! 读取安装日志或原始输出，按上下文中的模式判定，并写入结果记录。

use super::pattern::{match_pattern, PatternVerdict};
use super::record::{ResultRecord, TestStatus};
use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::context::{NextLevelCommand, NextLevelResult, RunContext};
use crate::engine::{install_log_query, InstallError, OperationId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static INSTALL_LOG_ERROR: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?m)Error:\s{2,}(.*)$").ok());

/// 安装日志判定结果
#[derive(Debug, Clone)]
pub struct OperationReport {
    pub verdict: PatternVerdict,
    /// `show install log` 原始输出
    pub log: String,
    /// 日志表明操作中止或失败
    pub aborted: bool,
}

pub struct ResultReporter<'a> {
    config: &'a EngineConfig,
}

impl<'a> ResultReporter<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// 读取操作的安装日志并判定
    ///
    /// 日志显示中止或失败且未指定模式时，结论强制为失败。
    pub async fn report_operation(
        &self,
        conn: &mut dyn Connection,
        ctx: &mut RunContext,
        op_id: &OperationId,
    ) -> Result<OperationReport, InstallError> {
        let command = install_log_query(op_id, ctx.shell);
        let log = conn
            .send(&command, Duration::from_millis(self.config.install_log_timeout_ms))
            .await?;

        let aborted = log.contains(&format!("Install operation {op_id} aborted"))
            || log.contains(&format!("Install operation {op_id} failed"));
        if aborted {
            log_install_errors(ctx, &log);
        }

        let verdict = if aborted && ctx.pattern.is_unspecified() {
            PatternVerdict::fail(format!("Install operation {op_id} aborted"))
        } else {
            match_pattern(&ctx.pattern, &log)
        };

        self.persist(ctx, &verdict)?;
        Ok(OperationReport {
            verdict,
            log,
            aborted,
        })
    }

    /// 直接以命令输出作为证据判定
    pub fn report_output(
        &self,
        ctx: &mut RunContext,
        output: &str,
    ) -> Result<PatternVerdict, InstallError> {
        let verdict = match_pattern(&ctx.pattern, output);
        self.persist(ctx, &verdict)?;
        Ok(verdict)
    }

    /// 强制记录失败
    pub fn record_failure(&self, ctx: &mut RunContext, message: &str) -> Result<(), InstallError> {
        self.record_status(ctx, TestStatus::Fail, message)
    }

    pub fn record_status(
        &self,
        ctx: &mut RunContext,
        status: TestStatus,
        message: &str,
    ) -> Result<(), InstallError> {
        let tc_id = ctx.tc_id.unwrap_or(1);
        let name = ctx.tc_name.clone().unwrap_or_else(|| ctx.hostname.clone());
        let record = ResultRecord::in_dir(ctx.log_directory());
        let row = record.update(tc_id, &name, status, message)?;

        if status == TestStatus::Fail || status == TestStatus::Error {
            ctx.success = false;
        }
        ctx.post_status(format!(
            "tc_id: {}, TC: {} :: {}",
            row.tc_id, row.name, row.status
        ));
        Ok(())
    }

    fn persist(&self, ctx: &mut RunContext, verdict: &PatternVerdict) -> Result<(), InstallError> {
        let status = if verdict.passed {
            TestStatus::Pass
        } else {
            TestStatus::Fail
        };
        self.record_status(ctx, status, &verdict.message)
    }

    /// 补充命令的输出单独判定，不影响主结论
    pub fn classify_supplementary(
        &self,
        ctx: &mut RunContext,
        entry: &NextLevelCommand,
        output: &str,
    ) -> NextLevelResult {
        let verdict = match_pattern(&entry.pattern, output);
        if verdict.passed {
            ctx.info(format!("{} :: {}", entry.command, verdict.message));
        } else {
            ctx.warning(format!("{} :: {}", entry.command, verdict.message));
        }
        let result = NextLevelResult {
            command: entry.command.clone(),
            passed: verdict.passed,
            message: verdict.message,
        };
        self.record_next_level(ctx, result.clone());
        result
    }

    /// 补充命令判定写入当前用例的结果行
    ///
    /// 写入失败只记录日志，补充命令不能改变操作本身的结果。
    pub fn record_next_level(&self, ctx: &mut RunContext, result: NextLevelResult) {
        let tc_id = ctx.tc_id.unwrap_or(1);
        let name = ctx.tc_name.clone().unwrap_or_else(|| ctx.hostname.clone());
        if let Err(e) =
            ResultRecord::in_dir(ctx.log_directory()).append_next_level(tc_id, &name, result.clone())
        {
            tracing::error!("[REPORT] 写入补充命令结果失败: {}", e);
        }
        ctx.record_next_level(result);
    }
}

/// 把安装日志中的错误行写入插件日志
pub fn log_install_errors(ctx: &mut RunContext, log: &str) {
    let Some(re) = INSTALL_LOG_ERROR.as_ref() else {
        return;
    };
    let errors: Vec<String> = re
        .captures_iter(log)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .collect();
    for error in errors {
        ctx.error(error);
    }
}
