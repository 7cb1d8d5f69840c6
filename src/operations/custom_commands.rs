//! 自定义命令采集
//!
//! 按 shell 模式执行命令，逐条判定输出并保存到日志目录。

use super::{CUSTOM_COMMANDS_PLUGIN, CUSTOM_COMMAND_PLATFORMS};
use crate::connection::Connection;
use crate::context::{RunContext, ShellMode};
use crate::engine::{InstallEngine, InstallError};
use crate::plugin::{InstallPlugin, Phase, PluginDescriptor};
use crate::report::ResultReporter;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub struct CustomCommandsPlugin {
    descriptor: PluginDescriptor,
}

impl CustomCommandsPlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor::new(CUSTOM_COMMANDS_PLUGIN)
                .with_platforms(CUSTOM_COMMAND_PLATFORMS)
                .with_phases([
                    Phase::PreUpgrade,
                    Phase::PostUpgrade,
                    Phase::MigrationAudit,
                    Phase::PreMigrate,
                    Phase::Migrate,
                    Phase::PostMigrate,
                ])
                .with_description(
                    "Captures custom commands and stores the output in the log directory.",
                ),
        }
    }
}

impl Default for CustomCommandsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// 按 shell 模式包装后执行一条命令
pub async fn send_in_shell(
    engine: &mut InstallEngine<'_>,
    shell: ShellMode,
    command: &str,
) -> Result<String, InstallError> {
    let timeout = engine.config().custom_command_timeout_ms;
    let shell_timeout = engine.config().shell_timeout_ms;
    match shell {
        ShellMode::User => engine.send_with_timeout(command, timeout).await,
        ShellMode::Admin => {
            engine.send_with_timeout("admin", shell_timeout).await?;
            let output = engine.send_with_timeout(command, timeout).await;
            let exited = engine.send_with_timeout("exit", shell_timeout).await;
            let output = output?;
            exited?;
            Ok(output)
        }
        ShellMode::Bash => {
            let command = if command.starts_with("run ") {
                command.to_string()
            } else {
                format!("run {command}")
            };
            engine.send_with_timeout(&command, timeout).await
        }
    }
}

/// 执行命令并把输出保存到日志目录
pub async fn capture(
    engine: &mut InstallEngine<'_>,
    command: &str,
) -> Result<String, InstallError> {
    let timeout = engine.config().custom_command_timeout_ms;
    let output = engine.send_with_timeout(command, timeout).await?;
    let path = save_to_file(engine.ctx().log_directory(), command, &output)?;
    engine
        .ctx()
        .info(format!("Output of '{command}' saved to {}", path.display()));
    Ok(output)
}

/// 命令输出写入 `<log_dir>/<命令>.txt`
pub fn save_to_file(log_dir: &Path, command: &str, output: &str) -> Result<PathBuf, InstallError> {
    let mut name: String = command
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    name = name.trim_matches('_').to_string();
    if name.is_empty() {
        name = "command".to_string();
    }

    std::fs::create_dir_all(log_dir)
        .map_err(|e| InstallError::Record(format!("无法创建日志目录: {e}")))?;
    let path = log_dir.join(format!("{name}.txt"));
    std::fs::write(&path, output)
        .map_err(|e| InstallError::Record(format!("无法写入 {}: {e}", path.display())))?;
    Ok(path)
}

#[async_trait]
impl InstallPlugin for CustomCommandsPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Result<bool, InstallError> {
        if ctx.custom_commands.is_empty() {
            ctx.info("No custom commands provided.");
            return Ok(true);
        }
        let shell = ctx.require_shell()?;
        let commands = ctx.custom_commands.clone();
        let config = ctx.config.clone();

        let mut engine = InstallEngine::new(ctx, conn);
        let mut all_passed = true;
        for command in &commands {
            engine
                .ctx()
                .info(format!("Capturing output of '{command}' for shell {shell}"));
            let output = match send_in_shell(&mut engine, shell, command).await {
                Ok(output) => output,
                Err(InstallError::CommandSyntax(_)) => {
                    engine
                        .ctx()
                        .error(format!("Command Syntax Error: '{command}'"));
                    all_passed = false;
                    continue;
                }
                Err(error) => return Err(error),
            };

            let verdict = ResultReporter::new(&config).report_output(engine.ctx(), &output)?;
            all_passed &= verdict.passed;
            save_to_file(engine.ctx().log_directory(), command, &output)?;
        }
        Ok(all_passed)
    }
}
