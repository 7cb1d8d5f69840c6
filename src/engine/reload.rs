//! 重启等待
//!
//! 等待设备重启完成，然后轮询 `show platform` 直到所有节点就绪。

use super::error::InstallError;
use super::platform::{ModuleTable, PLATFORM_QUERY};
use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::context::RunContext;
use std::time::{Duration, Instant};

pub struct ReloadWaiter<'a> {
    config: &'a EngineConfig,
}

impl<'a> ReloadWaiter<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// 等待重启并确认模块就绪
    ///
    /// 返回 `Ok(false)` 表示超过期限仍有节点未就绪，由调用方决定是否中止。
    pub async fn wait(
        &self,
        conn: &mut dyn Connection,
        ctx: &mut RunContext,
    ) -> Result<bool, InstallError> {
        self.wait_with_timeout(
            conn,
            ctx,
            Duration::from_millis(self.config.reload_timeout_ms),
        )
        .await
    }

    pub async fn wait_with_timeout(
        &self,
        conn: &mut dyn Connection,
        ctx: &mut RunContext,
        reload_timeout: Duration,
    ) -> Result<bool, InstallError> {
        let begin = Instant::now();

        if !conn.is_console() {
            tracing::info!("[RELOAD] {} 非控制台连接，断开等待重启", ctx.hostname);
            if let Err(e) = conn.disconnect().await {
                tracing::debug!("[RELOAD] 断开连接失败: {}", e);
            }
            ctx.post_status("Waiting for device boot to reconnect");
            tokio::time::sleep(Duration::from_millis(self.config.reload_grace_ms)).await;
            conn.reconnect(true, Some(reload_timeout)).await?;
        } else {
            ctx.info("Keeping console connected");
            ctx.post_status("Boot process started");
            match conn.reload(reload_timeout, true).await {
                Ok(()) => {}
                Err(e) if e.is_connection_loss() || e.is_timeout() => {
                    ctx.warning(format!("Console session interrupted during boot: {e}"));
                    conn.reconnect(true, Some(reload_timeout)).await?;
                }
                Err(e) => return Err(e.into()),
            }
            ctx.info("Boot process finished");
        }

        ctx.info("Device connected successfully");
        let up = self.wait_for_modules(conn, ctx).await?;
        if up {
            ctx.info(format!(
                "Overall outage time: {}s",
                begin.elapsed().as_secs()
            ));
        }
        Ok(up)
    }

    /// 轮询模块状态直到全部就绪或超过期限
    pub async fn wait_for_modules(
        &self,
        conn: &mut dyn Connection,
        ctx: &mut RunContext,
    ) -> Result<bool, InstallError> {
        ctx.post_status("Waiting for all nodes to come up");
        tokio::time::sleep(Duration::from_millis(self.config.boot_settle_ms)).await;

        let interval = Duration::from_millis(self.config.module_poll_interval_ms);
        let step = self.config.module_poll_interval_ms.max(1);
        let mut waited = 0u64;
        let mut last_output = String::new();

        loop {
            waited += step;
            if waited >= self.config.module_deadline_ms {
                break;
            }
            tokio::time::sleep(interval).await;

            let output = self.query_platform(conn).await?;
            if ModuleTable::parse(&output).is_fully_booted() {
                ctx.info("All nodes in desired state");
                return Ok(true);
            }
            last_output = output;
        }

        ctx.error(format!(
            "Not all nodes have come up within {}s:\n{}",
            self.config.module_deadline_ms / 1000,
            last_output
        ));
        Ok(false)
    }

    /// 单次检查模块状态
    pub async fn verify_modules(
        &self,
        conn: &mut dyn Connection,
        ctx: &mut RunContext,
    ) -> Result<bool, InstallError> {
        let output = self.query_platform(conn).await?;
        let table = ModuleTable::parse(&output);
        if table.is_fully_booted() {
            ctx.info("All nodes in desired state");
            return Ok(true);
        }
        for row in table.invalid_compute_rows() {
            ctx.warning(format!("{} is in state {}", row.node, row.state));
        }
        Ok(false)
    }

    async fn query_platform(&self, conn: &mut dyn Connection) -> Result<String, InstallError> {
        let output = conn
            .send(
                PLATFORM_QUERY,
                Duration::from_millis(self.config.platform_query_timeout_ms),
            )
            .await?;
        Ok(output)
    }
}
