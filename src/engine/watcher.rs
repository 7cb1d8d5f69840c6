//! 异步安装操作监视
//!
//! 每轮先短暂等待成功信息，再查询安装请求状态；
//! 连接中断时按重连策略恢复，连续失败超过上限后抛出。

use super::error::InstallError;
use super::operation::{status_query, OperationId};
use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::context::RunContext;
use crate::resilience::{ReconnectBudget, ReconnectPolicy};
use regex::Regex;
use std::time::Duration;

pub const NO_OPERATION_IN_PROGRESS: &str = "No install operation in progress";

/// 监视模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Normal,
    /// 设备可能已经开始重启，首个命令超时视为监视结束
    ToleratingReload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSummary {
    pub op_id: OperationId,
    pub polls: u32,
    pub reconnects: u32,
    /// 捕获到 "finished successfully"
    pub saw_success: bool,
    /// 因设备重启提前结束
    pub interrupted: bool,
    pub last_output: String,
}

pub struct OperationWatcher<'a> {
    config: &'a EngineConfig,
    policy: ReconnectPolicy,
}

impl<'a> OperationWatcher<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            policy: ReconnectPolicy::from_engine(config),
        }
    }

    pub async fn watch(
        &self,
        conn: &mut dyn Connection,
        ctx: &mut RunContext,
        op_id: &OperationId,
    ) -> Result<WatchSummary, InstallError> {
        self.watch_with_mode(conn, ctx, op_id, WatchMode::Normal)
            .await
    }

    pub async fn watch_with_mode(
        &self,
        conn: &mut dyn Connection,
        ctx: &mut RunContext,
        op_id: &OperationId,
        mode: WatchMode,
    ) -> Result<WatchSummary, InstallError> {
        let escaped = regex::escape(&op_id.to_string());
        let success = Regex::new(&format!("Install operation {escaped} finished successfully"))
            .map_err(|e| InstallError::Configuration(e.to_string()))?;
        let progress = Regex::new(&format!(
            r"The install \w*?\s?operation {escaped} is (\d+)% complete"
        ))
        .map_err(|e| InstallError::Configuration(e.to_string()))?;
        let query = status_query(op_id, ctx.shell);

        ctx.info(format!("Watching the operation {op_id} to complete"));
        tracing::info!("[WATCH] {} 开始监视操作 {}", ctx.hostname, op_id);

        let mut budget = ReconnectBudget::default();
        let mut summary = WatchSummary {
            op_id: op_id.clone(),
            polls: 0,
            reconnects: 0,
            saw_success: false,
            interrupted: false,
            last_output: String::new(),
        };
        let mut last_progress: Option<String> = None;

        loop {
            match self.poll_once(conn, &success, &query).await {
                Ok((finished, output)) => {
                    budget.reset();
                    summary.polls += 1;
                    summary.saw_success |= finished;

                    if let Some(m) = progress.find(&output) {
                        let message = m.as_str().to_string();
                        if last_progress.as_deref() != Some(message.as_str()) {
                            ctx.post_status(message.clone());
                            last_progress = Some(message);
                        }
                    }

                    let idle = output.contains(NO_OPERATION_IN_PROGRESS);
                    summary.last_output = output;
                    if finished || idle {
                        break;
                    }
                }
                Err(error) if mode == WatchMode::ToleratingReload && error.is_timeout() => {
                    ctx.warning(format!(
                        "Operation {op_id}: device stopped responding, assuming reload started"
                    ));
                    summary.interrupted = true;
                    break;
                }
                Err(error) if error.is_transient() => {
                    if !self.policy.admit_failure(&mut budget) {
                        ctx.error(format!(
                            "Giving up watching operation {op_id} after {} reconnects: {error}",
                            budget.consecutive_failures()
                        ));
                        return Err(error);
                    }
                    ctx.warning(format!("Connection lost while watching {op_id}: {error}"));
                    if let Err(e) = self.policy.recover(conn, &mut budget).await {
                        tracing::warn!("[WATCH] 重连失败: {}", e);
                    }
                    summary.reconnects = budget.total_reconnects();
                }
                Err(error) => return Err(error),
            }
        }

        tracing::info!(
            "[WATCH] 操作 {} 监视结束: polls={}, reconnects={}",
            op_id,
            summary.polls,
            summary.reconnects
        );
        Ok(summary)
    }

    /// 返回 (是否捕获到成功信息, 状态查询输出)
    async fn poll_once(
        &self,
        conn: &mut dyn Connection,
        success: &Regex,
        query: &str,
    ) -> Result<(bool, String), InstallError> {
        let quick_catch = Duration::from_millis(self.config.quick_catch_ms);
        let finished = match conn.send_and_wait("", success, quick_catch).await {
            Ok(_) => true,
            Err(e) if e.is_timeout() => false,
            Err(e) => return Err(e.into()),
        };

        let output = conn
            .send(query, Duration::from_millis(self.config.status_query_timeout_ms))
            .await?;
        Ok((finished, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ScriptedConnection, ScriptedStep};
    use crate::context::ShellMode;

    fn ctx() -> RunContext {
        RunContext::in_memory("r1", "/tmp/installcast-watch")
            .with_shell(ShellMode::User)
            .with_config(EngineConfig::immediate())
    }

    #[tokio::test]
    async fn test_watch_until_finished() {
        let mut ctx = ctx();
        let config = ctx.config.clone();
        let mut conn = ScriptedConnection::new("r1").with_steps([
            ScriptedStep::any("..."),
            ScriptedStep::on("show install request", "The install operation 17 is 30% complete"),
            ScriptedStep::any("Install operation 17 finished successfully"),
            ScriptedStep::on("show install request", NO_OPERATION_IN_PROGRESS),
        ]);

        let summary = OperationWatcher::new(&config)
            .watch(&mut conn, &mut ctx, &OperationId::User(17))
            .await
            .unwrap();

        assert_eq!(summary.polls, 2);
        assert!(summary.saw_success);
        assert_eq!(summary.reconnects, 0);
        assert_eq!(conn.remaining_steps(), 0);
    }

    #[tokio::test]
    async fn test_watch_exits_when_idle() {
        let mut ctx = ctx();
        let config = ctx.config.clone();
        let mut conn = ScriptedConnection::new("r1").with_steps([
            ScriptedStep::any(""),
            ScriptedStep::any(NO_OPERATION_IN_PROGRESS),
        ]);

        let summary = OperationWatcher::new(&config)
            .watch(&mut conn, &mut ctx, &OperationId::User(3))
            .await
            .unwrap();
        assert!(!summary.saw_success);
        assert_eq!(summary.last_output, NO_OPERATION_IN_PROGRESS);
    }

    #[tokio::test]
    async fn test_watch_gives_up_after_reconnect_limit() {
        let mut ctx = ctx();
        let config = ctx.config.clone();
        let mut conn = ScriptedConnection::new("r1").with_steps(
            (0..4).map(|_| ScriptedStep::drop_connection()),
        );

        let error = OperationWatcher::new(&config)
            .watch(&mut conn, &mut ctx, &OperationId::User(5))
            .await
            .unwrap_err();

        assert!(matches!(error, InstallError::Connection(_)));
        assert_eq!(conn.reconnect_count(), 3);
    }

    #[tokio::test]
    async fn test_successful_poll_resets_budget() {
        let mut ctx = ctx();
        let config = ctx.config.clone();
        let mut steps = Vec::new();
        for _ in 0..3 {
            steps.push(ScriptedStep::drop_connection());
        }
        steps.push(ScriptedStep::any(""));
        steps.push(ScriptedStep::any("The install operation 5 is 50% complete"));
        for _ in 0..3 {
            steps.push(ScriptedStep::drop_connection());
        }
        steps.push(ScriptedStep::any(""));
        steps.push(ScriptedStep::any(NO_OPERATION_IN_PROGRESS));
        let mut conn = ScriptedConnection::new("r1").with_steps(steps);

        let summary = OperationWatcher::new(&config)
            .watch(&mut conn, &mut ctx, &OperationId::User(5))
            .await
            .unwrap();

        assert_eq!(conn.reconnect_count(), 6);
        assert_eq!(summary.reconnects, 6);
        assert_eq!(summary.polls, 2);
    }

    #[tokio::test]
    async fn test_tolerating_reload_stops_on_timeout() {
        let mut ctx = ctx();
        let config = ctx.config.clone();
        let mut conn = ScriptedConnection::new("r1").with_steps([
            ScriptedStep::any(""),
            ScriptedStep::timeout(),
        ]);

        let summary = OperationWatcher::new(&config)
            .watch_with_mode(&mut conn, &mut ctx, &OperationId::User(9), WatchMode::ToleratingReload)
            .await
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(conn.reconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_admin_operation_uses_admin_query() {
        let mut ctx = ctx();
        let config = ctx.config.clone();
        let mut conn = ScriptedConnection::new("r1").with_steps([
            ScriptedStep::any("Install operation 2.1.1 finished successfully"),
            ScriptedStep::on("admin show install request", NO_OPERATION_IN_PROGRESS),
        ]);

        let summary = OperationWatcher::new(&config)
            .watch(&mut conn, &mut ctx, &OperationId::Admin("2.1.1".into()))
            .await
            .unwrap();
        assert!(summary.saw_success);
    }
}
