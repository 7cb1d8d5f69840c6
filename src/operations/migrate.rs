//! 迁移到 64 位系统
//!
//! Migrate：执行设备上的迁移脚本，确认配置已备份，重启并等待全部节点就绪。
//! Post-Migrate：等待节点就绪，采集新配置，必要时升级 FPD 并重启。

use super::custom_commands::capture;
use super::{MIGRATE_PLUGIN, MIGRATION_PLATFORMS, POST_MIGRATE_PLUGIN};
use crate::connection::Connection;
use crate::context::RunContext;
use crate::engine::{InstallEngine, InstallError, PLATFORM_QUERY};
use crate::plugin::{InstallPlugin, Phase, PluginDescriptor};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

pub const MIGRATION_SCRIPT: &str = "ksh /pkg/bin/migrate_to_eXR -m eusb";

/// 迁移脚本备份的配置文件，新版本文件名在前
const XR_CONFIG_BACKUPS: [&str; 2] = ["harddiskb:/cXR_xr_plane.cfg", "harddiskb:/classic.cfg"];
const ADMIN_CONFIG_BACKUPS: [&str; 2] = ["harddiskb:/cXR_admin_plane.cfg", "harddiskb:/admin.cfg"];

const FPD_QUERY: &str = "show hw-module fpd";
const FPD_UPGRADE: &str = "upgrade hw-module location all fpd all";

static SHELL_PROMPT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new("#").ok());
static FPD_NEEDS_UPGRADE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\d+/\w+.+\d+.\d+\s+[-\w]+\s+(NEED UPGD)").ok());

fn compiled(re: &'static Lazy<Option<Regex>>) -> Result<&'static Regex, InstallError> {
    re.as_ref()
        .ok_or_else(|| InstallError::Configuration("invalid built-in pattern".to_string()))
}

/// 迁移脚本输出中的错误行
pub fn migration_script_errors(output: &str) -> Vec<String> {
    let mut errors = Vec::new();
    for line in output.lines() {
        if line.contains("No such file") {
            errors.push(format!("Found file missing when running migration script: {}", line.trim()));
        }
        if line.contains("Error:") {
            errors.push(format!("Migration script reported error: {}", line.trim()));
        }
    }
    errors
}

pub struct MigratePlugin {
    descriptor: PluginDescriptor,
}

impl MigratePlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor::new(MIGRATE_PLUGIN)
                .with_platforms(MIGRATION_PLATFORMS)
                .with_phases([Phase::Migrate])
                .with_description(
                    "Runs the migration script and reloads the device to boot the 64 bit image.",
                ),
        }
    }

    async fn run_migration_script(engine: &mut InstallEngine<'_>) -> Result<(), InstallError> {
        let prompt = compiled(&SHELL_PROMPT)?;
        let shell_timeout = engine.config().shell_timeout_ms;
        let script_timeout = engine.config().install_log_timeout_ms;

        engine.send_expecting("run", prompt, shell_timeout).await?;
        let output = engine
            .send_expecting(MIGRATION_SCRIPT, prompt, script_timeout)
            .await?;
        engine.send_with_timeout("exit", shell_timeout).await?;

        let errors = migration_script_errors(&output);
        if !errors.is_empty() {
            for error in &errors {
                engine.ctx().error(error);
            }
            return Err(InstallError::DeviceReported(errors.join("; ")));
        }

        for (files, kind) in [(XR_CONFIG_BACKUPS, "IOS-XR"), (ADMIN_CONFIG_BACKUPS, "admin")] {
            if !Self::config_backed_up(engine, &files, kind).await? {
                let message =
                    format!("Migration script failed to back up the {kind} running config");
                engine.ctx().error(&message);
                return Err(InstallError::DeviceReported(message));
            }
        }
        Ok(())
    }

    async fn config_backed_up(
        engine: &mut InstallEngine<'_>,
        files: &[&str],
        kind: &str,
    ) -> Result<bool, InstallError> {
        for file in files {
            let output = engine.send(&format!("dir {file}")).await?;
            if !output.contains("No such file") {
                engine
                    .ctx()
                    .post_status(format!("The {kind} configurations are backed up in {file}"));
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Default for MigratePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstallPlugin for MigratePlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Result<bool, InstallError> {
        ctx.post_status(
            "Run migration script to extract the image and boot files and set boot mode in device",
        );
        let mut engine = InstallEngine::new(ctx, conn);
        Self::run_migration_script(&mut engine).await?;

        engine
            .ctx()
            .post_status("Reload device to boot ASR9K-64 image.");
        let reload_timeout = engine.config().migration_reload_timeout_ms;
        if engine.reload_and_wait(reload_timeout).await? {
            engine.ctx().post_status("All nodes are in FINAL Band.");
        } else {
            engine
                .ctx()
                .warning("Not all nodes are in FINAL Band after the migration reload.");
        }

        capture(&mut engine, PLATFORM_QUERY).await?;
        Ok(true)
    }
}

pub struct PostMigratePlugin {
    descriptor: PluginDescriptor,
}

impl PostMigratePlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor::new(POST_MIGRATE_PLUGIN)
                .with_platforms(MIGRATION_PLATFORMS)
                .with_phases([Phase::PostMigrate])
                .with_description(
                    "Captures the migrated configurations and upgrades FPDs, reloading if required.",
                ),
        }
    }

    /// 检查 FPD，需要时升级全部 FPD
    async fn check_fpds(engine: &mut InstallEngine<'_>) -> Result<bool, InstallError> {
        let shell_timeout = engine.config().shell_timeout_ms;
        engine.send_with_timeout("admin", shell_timeout).await?;
        let table = engine.send(FPD_QUERY).await?;

        if compiled(&FPD_NEEDS_UPGRADE)?.is_match(&table) {
            let total = table.matches("NEED UPGD").count() + table.matches("CURRENT").count();
            if Self::upgrade_all_fpds(engine, total).await? {
                return Ok(true);
            }
            engine.send_with_timeout("exit", shell_timeout).await?;
            return Ok(false);
        }

        engine.send_with_timeout("exit", shell_timeout).await?;
        Ok(true)
    }

    /// 升级全部 FPD，直到 CURRENT 与 RLOAD REQ 的数量达到升级前的总数
    async fn upgrade_all_fpds(
        engine: &mut InstallEngine<'_>,
        total: usize,
    ) -> Result<bool, InstallError> {
        let config = engine.config().clone();
        engine.ctx().post_status("Upgrading all FPD's.");
        engine.send(FPD_UPGRADE).await?;

        tokio::time::sleep(Duration::from_millis(config.fpd_settle_ms)).await;
        let interval = Duration::from_millis(config.fpd_poll_interval_ms);
        let mut waited = 0u64;
        loop {
            waited += config.fpd_poll_interval_ms.max(1);
            if waited >= config.fpd_deadline_ms {
                break;
            }
            tokio::time::sleep(interval).await;

            let output = engine.send(FPD_QUERY).await?;
            let need_reload = output.matches("RLOAD REQ").count();
            if output.matches("CURRENT").count() + need_reload >= total {
                engine
                    .send_with_timeout("exit", config.shell_timeout_ms)
                    .await?;
                if need_reload > 0 {
                    engine.ctx().post_status(
                        "Finished upgrading FPD(s). Now reloading the device to complete the upgrade.",
                    );
                    if !engine
                        .reload_and_wait(config.migration_reload_timeout_ms)
                        .await?
                    {
                        engine
                            .ctx()
                            .warning("Not all nodes went to FINAL Band after the FPD reload.");
                    }
                }
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Default for PostMigratePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstallPlugin for PostMigratePlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Result<bool, InstallError> {
        let mut engine = InstallEngine::new(ctx, conn);
        if !engine.wait_for_modules().await? {
            engine
                .ctx()
                .warning("Not all nodes are in FINAL Band before post-migration.");
        }

        engine
            .ctx()
            .post_status("Capturing new IOS XR and Calvados configurations.");
        for command in ["show running-config", "admin show running-config"] {
            capture(&mut engine, command).await?;
        }

        if !Self::check_fpds(&mut engine).await? {
            let message = "FPD upgrade is not finished".to_string();
            engine.ctx().error(&message);
            return Err(InstallError::DeviceReported(message));
        }

        capture(&mut engine, PLATFORM_QUERY).await?;
        Ok(true)
    }
}
