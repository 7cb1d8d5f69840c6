//! 安装操作状态机
//!
//! 发出安装命令后按最早出现的输出事件分派到对应处理器，
//! 处理器结束后执行补充命令。所有错误在抛出前先写入结果记录。

use super::error::InstallError;
use super::events::InstallEvent;
use super::operation::{Operation, OperationId, OperationOutcome, OperationState, Plane};
use super::reload::ReloadWaiter;
use super::watcher::{OperationWatcher, WatchMode, WatchSummary, NO_OPERATION_IN_PROGRESS};
use crate::config::EngineConfig;
use crate::connection::{Connection, ExpectMatch};
use crate::context::{NextLevelResult, RunContext, ShellMode};
use crate::report::{log_install_errors, OperationReport, ResultReporter, TestStatus};
use regex::Regex;
use std::time::Duration;

const CONFIRM_ANSWER: &str = "yes";

pub struct InstallEngine<'a> {
    ctx: &'a mut RunContext,
    conn: &'a mut dyn Connection,
    config: EngineConfig,
    /// 已发送 `admin` 且尚未退出
    in_admin: bool,
}

impl<'a> InstallEngine<'a> {
    pub fn new(ctx: &'a mut RunContext, conn: &'a mut dyn Connection) -> Self {
        let config = ctx.config.clone();
        Self {
            ctx,
            conn,
            config,
            in_admin: false,
        }
    }

    pub fn ctx(&mut self) -> &mut RunContext {
        &mut *self.ctx
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---------------------------------------------------------------
    // 基础命令
    // ---------------------------------------------------------------

    pub async fn send(&mut self, command: &str) -> Result<String, InstallError> {
        self.send_with_timeout(command, self.config.command_timeout_ms)
            .await
    }

    pub async fn send_with_timeout(
        &mut self,
        command: &str,
        timeout_ms: u64,
    ) -> Result<String, InstallError> {
        let output = self
            .conn
            .send(command, Duration::from_millis(timeout_ms))
            .await?;
        Ok(output)
    }

    pub async fn send_expecting(
        &mut self,
        command: &str,
        wait_for: &Regex,
        timeout_ms: u64,
    ) -> Result<String, InstallError> {
        let output = self
            .conn
            .send_and_wait(command, wait_for, Duration::from_millis(timeout_ms))
            .await?;
        Ok(output)
    }

    /// shell 为 Admin 时进入 admin 模式
    pub async fn enter_admin_mode(&mut self) -> Result<(), InstallError> {
        if self.ctx.require_shell()? == ShellMode::Admin && !self.in_admin {
            self.send_with_timeout("admin", self.config.shell_timeout_ms)
                .await?;
            self.in_admin = true;
        }
        Ok(())
    }

    pub async fn exit_admin_mode(&mut self) -> Result<(), InstallError> {
        if self.in_admin {
            self.in_admin = false;
            self.send_with_timeout("exit", self.config.shell_timeout_ms)
                .await?;
        }
        Ok(())
    }

    /// 无论操作成败都退出 admin 模式，再返回操作结果
    ///
    /// 操作已失败时退出失败只记录警告，返回原错误。
    pub async fn leave_admin_mode<T>(
        &mut self,
        outcome: Result<T, InstallError>,
    ) -> Result<T, InstallError> {
        let exited = self.exit_admin_mode().await;
        match (outcome, exited) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(exit_error)) => {
                self.ctx
                    .warning(format!("Unable to leave admin mode: {exit_error}"));
                Err(e)
            }
        }
    }

    /// 当前所在的 shell
    pub fn active_shell(&self) -> ShellMode {
        if self.in_admin {
            ShellMode::Admin
        } else {
            ShellMode::User
        }
    }

    // ---------------------------------------------------------------
    // 安装命令
    // ---------------------------------------------------------------

    /// 执行一条安装命令并按输出事件分派
    pub async fn run_install_command(
        &mut self,
        command: &str,
    ) -> Result<OperationOutcome, InstallError> {
        self.ctx.require_shell()?;
        self.ctx.info(format!("Running install command: {command}"));

        let mut operation = Operation::new(command);
        let result = self.drive(&mut operation).await;
        self.finish(result).await
    }

    /// 执行不带确认提示的单次操作（commit / prepare clean）并跟踪到结束
    pub async fn run_tracked_operation(
        &mut self,
        command: &str,
    ) -> Result<OperationOutcome, InstallError> {
        self.ctx.require_shell()?;
        self.ctx.info(format!("Running install command: {command}"));

        let mut operation = Operation::new(command);
        let result = self.track(&mut operation).await;
        self.finish(result).await
    }

    /// 根据 add / remove 命令的回显跟踪操作
    pub async fn observe_add_remove(
        &mut self,
        command: &str,
        output: &str,
    ) -> Result<OperationOutcome, InstallError> {
        let mut operation = Operation::new(command);
        let result = self.observe(&mut operation, output).await;
        self.finish(result).await
    }

    async fn finish(
        &mut self,
        result: Result<OperationOutcome, InstallError>,
    ) -> Result<OperationOutcome, InstallError> {
        if let Err(error) = &result {
            self.record_error(error);
        }

        let connection_alive = match &result {
            Ok(_) => true,
            Err(error) => !error.is_transient(),
        };
        if connection_alive && !self.ctx.next_level.is_empty() {
            self.run_next_level().await;
        }
        result
    }

    async fn drive(&mut self, operation: &mut Operation) -> Result<OperationOutcome, InstallError> {
        let timeout = Duration::from_millis(self.config.command_timeout_ms);
        let matched = self
            .conn
            .expect_any(operation.command(), InstallEvent::patterns(), timeout)
            .await?;
        let event = InstallEvent::from_index(matched.index).ok_or_else(|| {
            InstallError::Configuration(format!("未知的事件下标 {}", matched.index))
        })?;

        tracing::info!(
            "[ENGINE] {} `{}` -> {}",
            self.ctx.hostname,
            operation.command(),
            event.name()
        );

        match event {
            InstallEvent::ContinueInBackground | InstallEvent::Prompt => {
                self.handle_background(operation, &matched).await
            }
            InstallEvent::ReloadPrompt => self.handle_reload_prompt(operation, &matched).await,
            InstallEvent::IssuPrompt => self.handle_issu_prompt(operation).await,
            InstallEvent::AdminReloadPrompt => self.handle_admin_reload(operation, &matched).await,
            InstallEvent::Aborted => self.handle_aborted(operation, &matched).await,
            InstallEvent::NoImpact => self.handle_no_impact(operation, &matched),
            InstallEvent::Busy => self.handle_busy(operation),
            InstallEvent::IncompleteUpdate => self.handle_incomplete_update(operation, &matched),
        }
    }

    async fn handle_background(
        &mut self,
        operation: &mut Operation,
        matched: &ExpectMatch,
    ) -> Result<OperationOutcome, InstallError> {
        let op_id = self.bind_from_output(operation, &matched.full_text())?;
        operation.transition(OperationState::Backgrounded);
        operation.transition(OperationState::Polling);
        self.watch(&op_id, WatchMode::Normal).await?;
        self.complete(operation, &op_id).await
    }

    async fn handle_reload_prompt(
        &mut self,
        operation: &mut Operation,
        matched: &ExpectMatch,
    ) -> Result<OperationOutcome, InstallError> {
        let confirmation = self.confirm().await?;
        let text = format!("{}{}", matched.full_text(), confirmation);
        let op_id = self.bind_from_output(operation, &text)?;

        operation.transition(OperationState::NeedsReload);
        self.watch(&op_id, WatchMode::ToleratingReload).await?;
        self.await_reload(operation).await?;
        self.complete(operation, &op_id).await
    }

    async fn handle_issu_prompt(
        &mut self,
        operation: &mut Operation,
    ) -> Result<OperationOutcome, InstallError> {
        self.confirm().await?;
        let discovered = self.discover_operation_id(Plane::User).await?;
        let op_id = self.bind(operation, discovered)?;

        operation.transition(OperationState::NeedsReload);
        self.watch(&op_id, WatchMode::ToleratingReload).await?;
        self.await_reload(operation).await?;
        self.complete(operation, &op_id).await
    }

    async fn handle_admin_reload(
        &mut self,
        operation: &mut Operation,
        matched: &ExpectMatch,
    ) -> Result<OperationOutcome, InstallError> {
        let confirmation = self.confirm().await?;
        let text = format!("{}{}", matched.full_text(), confirmation);
        let discovered = match OperationId::parse_in_plane(&text, Plane::Admin) {
            Some(id) => id,
            None => self.discover_operation_id(Plane::Admin).await?,
        };
        let op_id = self.bind(operation, discovered)?;

        operation.transition(OperationState::NeedsReload);
        self.watch(&op_id, WatchMode::ToleratingReload).await?;

        tokio::time::sleep(Duration::from_millis(self.config.admin_settle_ms)).await;
        let modules_ok = ReloadWaiter::new(&self.config)
            .verify_modules(&mut *self.conn, &mut *self.ctx)
            .await?;
        if !modules_ok {
            operation.transition(OperationState::CompletedWithFailure);
            return Err(InstallError::ReloadFailed(format!(
                "Not all nodes are up after admin plane reload of operation {op_id}"
            )));
        }
        self.complete(operation, &op_id).await
    }

    async fn handle_aborted(
        &mut self,
        operation: &mut Operation,
        matched: &ExpectMatch,
    ) -> Result<OperationOutcome, InstallError> {
        let text = matched.full_text();
        let op_id = match OperationId::parse(&text) {
            Some(id) => Some(self.bind(operation, id)?),
            None => None,
        };
        operation.transition(OperationState::Aborted);
        self.ctx.warning(format!("Install operation aborted: {}", text.trim()));

        let message = match &op_id {
            Some(id) => format!("Install operation {id} aborted"),
            None => "Install operation aborted".to_string(),
        };
        self.report_failure(op_id.as_ref(), &text, &message).await?;
        Ok(OperationOutcome::from_operation(operation, false))
    }

    fn handle_no_impact(
        &mut self,
        operation: &mut Operation,
        matched: &ExpectMatch,
    ) -> Result<OperationOutcome, InstallError> {
        let text = matched.full_text();
        if let Some(id) = OperationId::parse(&text) {
            self.bind(operation, id)?;
        }
        self.ctx
            .warning("This was a NO IMPACT OPERATION. Packages are already in the requested state.");

        let verdict = ResultReporter::new(&self.config).report_output(&mut *self.ctx, &text)?;
        operation.transition(OperationState::CompletedOk);
        Ok(OperationOutcome::from_operation(operation, verdict.passed))
    }

    fn handle_busy(&mut self, operation: &mut Operation) -> Result<OperationOutcome, InstallError> {
        operation.transition(OperationState::NotStarted);
        self.ctx.error(
            "Could not start this install operation because an install operation is still in progress",
        );
        Err(InstallError::OperationBusy {
            command: operation.command().to_string(),
        })
    }

    fn handle_incomplete_update(
        &mut self,
        operation: &mut Operation,
        matched: &ExpectMatch,
    ) -> Result<OperationOutcome, InstallError> {
        operation.transition(OperationState::PendingCommit);
        self.ctx.warning(
            "An SU/ISSU is pending; perform install commit before any other prepare/activate/deactivate operation",
        );
        ResultReporter::new(&self.config).report_output(&mut *self.ctx, &matched.full_text())?;
        Ok(OperationOutcome::from_operation(operation, false))
    }

    async fn track(&mut self, operation: &mut Operation) -> Result<OperationOutcome, InstallError> {
        let output = self.send(operation.command()).await?;

        let Some(found) = OperationId::parse(&output) else {
            let verdict =
                ResultReporter::new(&self.config).report_output(&mut *self.ctx, &output)?;
            operation.transition(if verdict.passed {
                OperationState::CompletedOk
            } else {
                OperationState::CompletedWithFailure
            });
            return Ok(OperationOutcome::from_operation(operation, verdict.passed));
        };

        let op_id = self.bind(operation, found)?;
        operation.transition(OperationState::Polling);
        self.watch(&op_id, WatchMode::Normal).await?;
        self.complete(operation, &op_id).await
    }

    async fn observe(
        &mut self,
        operation: &mut Operation,
        output: &str,
    ) -> Result<OperationOutcome, InstallError> {
        let Some(found) = OperationId::parse(output) else {
            log_install_errors(self.ctx, output);
            self.ctx.error(format!(
                "Operation ID not found in the output of `{}`",
                operation.command()
            ));
            return Err(InstallError::OperationIdMissing {
                command: operation.command().to_string(),
            });
        };
        let op_id = self.bind(operation, found)?;

        let backgrounded = InstallEvent::ContinueInBackground.is_present_in(output);
        let finished = output.contains(&format!("Install operation {op_id} finished successfully"));

        if backgrounded || finished {
            if backgrounded {
                operation.transition(OperationState::Backgrounded);
                operation.transition(OperationState::Polling);
                self.watch(&op_id, WatchMode::Normal).await?;
            }
            return self.complete(operation, &op_id).await;
        }

        operation.transition(OperationState::Aborted);
        let message = format!("Install operation {op_id} did not continue in the background");
        self.ctx.error(&message);
        self.report_failure(Some(&op_id), output, &message).await?;
        Ok(OperationOutcome::from_operation(operation, false))
    }

    // ---------------------------------------------------------------
    // 辅助流程
    // ---------------------------------------------------------------

    /// 等待设备上没有进行中的安装操作
    pub async fn wait_for_idle(&mut self) -> Result<(), InstallError> {
        let query = "show install request";
        for _ in 0..self.config.op_id_poll_attempts.max(1) {
            let output = self
                .send_with_timeout(query, self.config.status_query_timeout_ms)
                .await?;
            if output.contains(NO_OPERATION_IN_PROGRESS) {
                return Ok(());
            }
            self.ctx
                .post_status("Waiting for the install operation in progress to finish");
            tokio::time::sleep(Duration::from_millis(self.config.op_id_poll_interval_ms)).await;
        }
        Err(InstallError::OperationBusy {
            command: query.to_string(),
        })
    }

    /// 下发 reload 并等待所有节点就绪
    pub async fn reload_and_wait(&mut self, reload_timeout_ms: u64) -> Result<bool, InstallError> {
        let timeout = Duration::from_millis(reload_timeout_ms);
        self.ctx.post_status("Reloading device");
        self.in_admin = false;
        match self.conn.reload(timeout, false).await {
            Ok(()) => {}
            Err(e) if e.is_connection_loss() || e.is_timeout() => {
                self.ctx
                    .warning(format!("Session interrupted during reload: {e}"));
                self.conn.reconnect(true, Some(timeout)).await?;
            }
            Err(e) => return Err(e.into()),
        }
        self.wait_for_modules().await
    }

    pub async fn wait_for_modules(&mut self) -> Result<bool, InstallError> {
        ReloadWaiter::new(&self.config)
            .wait_for_modules(&mut *self.conn, &mut *self.ctx)
            .await
    }

    async fn confirm(&mut self) -> Result<String, InstallError> {
        match self
            .send_with_timeout(CONFIRM_ANSWER, self.config.confirm_timeout_ms)
            .await
        {
            Ok(output) => Ok(output),
            Err(error) if error.is_timeout() => Ok(String::new()),
            Err(error) => Err(error),
        }
    }

    async fn discover_operation_id(&mut self, plane: Plane) -> Result<OperationId, InstallError> {
        let query = match (plane, self.ctx.shell) {
            (Plane::Admin, shell) if shell != Some(ShellMode::Admin) => {
                "admin show install request"
            }
            _ => "show install request",
        };

        for _ in 0..self.config.op_id_poll_attempts.max(1) {
            let output = self
                .send_with_timeout(query, self.config.status_query_timeout_ms)
                .await?;
            if let Some(id) = OperationId::parse_in_plane(&output, plane) {
                return Ok(id);
            }
            tokio::time::sleep(Duration::from_millis(self.config.op_id_poll_interval_ms)).await;
        }

        self.ctx.error("Unable to determine the install operation ID");
        Err(InstallError::OperationIdMissing {
            command: query.to_string(),
        })
    }

    fn bind_from_output(
        &mut self,
        operation: &Operation,
        text: &str,
    ) -> Result<OperationId, InstallError> {
        let found = OperationId::parse(text).ok_or_else(|| {
            log_install_errors(self.ctx, text);
            InstallError::OperationIdMissing {
                command: operation.command().to_string(),
            }
        })?;
        self.bind(operation, found)
    }

    fn bind(&mut self, operation: &Operation, id: OperationId) -> Result<OperationId, InstallError> {
        let first_bind = operation.id().is_none();
        let id = operation.bind_id(id)?;
        if first_bind {
            self.ctx.record_operation_id(id.clone());
            self.ctx.info(format!("Install operation {id} started"));
        }
        Ok(id)
    }

    async fn watch(
        &mut self,
        op_id: &OperationId,
        mode: WatchMode,
    ) -> Result<WatchSummary, InstallError> {
        OperationWatcher::new(&self.config)
            .watch_with_mode(&mut *self.conn, &mut *self.ctx, op_id, mode)
            .await
    }

    async fn await_reload(&mut self, operation: &mut Operation) -> Result<(), InstallError> {
        // 重启后的新会话处于 exec 模式
        self.in_admin = false;
        let up = ReloadWaiter::new(&self.config)
            .wait(&mut *self.conn, &mut *self.ctx)
            .await?;
        if !up {
            operation.transition(OperationState::CompletedWithFailure);
            return Err(InstallError::ReloadFailed(
                "Reload or boot failure".to_string(),
            ));
        }
        Ok(())
    }

    /// 读取安装日志并得出最终状态
    async fn complete(
        &mut self,
        operation: &mut Operation,
        op_id: &OperationId,
    ) -> Result<OperationOutcome, InstallError> {
        let OperationReport {
            verdict,
            log,
            aborted,
        } = ResultReporter::new(&self.config)
            .report_operation(&mut *self.conn, &mut *self.ctx, op_id)
            .await?;

        if log.contains("completed with failure") {
            self.ctx.info(format!(
                "Install operation {op_id} completed with failure; the point of no return has passed"
            ));
        }

        let state = if aborted {
            OperationState::Aborted
        } else if verdict.passed {
            OperationState::CompletedOk
        } else {
            OperationState::CompletedWithFailure
        };
        operation.transition(state);
        Ok(OperationOutcome::from_operation(
            operation,
            verdict.passed && !aborted,
        ))
    }

    /// 失败的操作：未指定模式时直接记录失败，否则交给模式判定
    async fn report_failure(
        &mut self,
        op_id: Option<&OperationId>,
        evidence: &str,
        message: &str,
    ) -> Result<(), InstallError> {
        let reporter = ResultReporter::new(&self.config);
        if self.ctx.pattern.is_unspecified() {
            log_install_errors(self.ctx, evidence);
            return reporter.record_failure(&mut *self.ctx, message);
        }
        match op_id {
            Some(id) => {
                reporter
                    .report_operation(&mut *self.conn, &mut *self.ctx, id)
                    .await?;
            }
            None => {
                reporter.report_output(&mut *self.ctx, evidence)?;
            }
        }
        Ok(())
    }

    fn record_error(&mut self, error: &InstallError) {
        let status = if error.is_transient() {
            TestStatus::Error
        } else {
            TestStatus::Fail
        };
        let message = match self.ctx.last_status.as_deref() {
            Some(last) if !last.is_empty() => format!("{error} (last status: {last})"),
            _ => error.to_string(),
        };
        if let Err(e) =
            ResultReporter::new(&self.config).record_status(&mut *self.ctx, status, &message)
        {
            tracing::error!("[ENGINE] 写入结果记录失败: {}", e);
        }
    }

    /// 依次执行补充命令，需要时切换到指定 shell，结束后回到原 shell
    async fn run_next_level(&mut self) {
        let commands = self.ctx.next_level.clone();
        let current = self.active_shell();
        let target = self.ctx.next_level_shell.unwrap_or(current);

        if target != current {
            if let Err(e) = self.switch_shell(current, target).await {
                self.ctx.warning(format!(
                    "Unable to enter {target} shell for next level commands: {e}"
                ));
                return;
            }
        }

        for entry in &commands {
            match self.send(&entry.command).await {
                Ok(output) => {
                    ResultReporter::new(&self.config).classify_supplementary(
                        &mut *self.ctx,
                        entry,
                        &output,
                    );
                }
                Err(e) => {
                    self.ctx
                        .warning(format!("Next level command `{}` failed: {e}", entry.command));
                    ResultReporter::new(&self.config).record_next_level(
                        &mut *self.ctx,
                        NextLevelResult {
                            command: entry.command.clone(),
                            passed: false,
                            message: e.to_string(),
                        },
                    );
                }
            }
        }

        if target != current {
            if let Err(e) = self.switch_shell(target, current).await {
                self.ctx
                    .warning(format!("Unable to leave next level shell: {e}"));
            }
        }
    }

    async fn switch_shell(&mut self, from: ShellMode, to: ShellMode) -> Result<(), InstallError> {
        if let Some(exit) = from.exit_command() {
            self.send_with_timeout(exit, self.config.shell_timeout_ms)
                .await?;
        }
        if let Some(enter) = to.enter_command() {
            self.send_with_timeout(enter, self.config.shell_timeout_ms)
                .await?;
        }
        Ok(())
    }
}
