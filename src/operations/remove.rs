//! 删除软件包 / 删除全部非活动软件包

use super::{exr_descriptor, REMOVE_INACTIVE_PLUGIN, REMOVE_PLUGIN};
use crate::connection::Connection;
use crate::context::RunContext;
use crate::engine::{InstallEngine, InstallError, OperationOutcome};
use crate::plugin::{InstallPlugin, Phase, PluginDescriptor};
use async_trait::async_trait;

pub struct RemovePlugin {
    descriptor: PluginDescriptor,
    inactive_only: bool,
}

impl RemovePlugin {
    pub fn new() -> Self {
        Self {
            descriptor: exr_descriptor(
                REMOVE_PLUGIN,
                [Phase::Remove],
                "Removes inactive packages from the device.",
            ),
            inactive_only: false,
        }
    }

    pub fn inactive() -> Self {
        Self {
            descriptor: exr_descriptor(
                REMOVE_INACTIVE_PLUGIN,
                [Phase::RemoveAllInactive],
                "Removes all inactive packages from the device.",
            ),
            inactive_only: true,
        }
    }

    fn command(&self, ctx: &RunContext) -> Result<String, InstallError> {
        if self.inactive_only {
            return Ok("install remove inactive".to_string());
        }
        if !ctx.package_ids.is_empty() {
            return Ok(format!("install remove id {}", ctx.package_ids_joined()));
        }
        if !ctx.software_packages.is_empty() {
            return Ok(format!("install remove {}", ctx.packages_joined()));
        }
        Err(InstallError::Configuration(
            "No package list provided".to_string(),
        ))
    }

    async fn remove_and_observe(
        engine: &mut InstallEngine<'_>,
        command: &str,
    ) -> Result<OperationOutcome, InstallError> {
        let timeout = engine.config().install_log_timeout_ms;
        let output = engine.send_with_timeout(command, timeout).await?;
        engine.observe_add_remove(command, &output).await
    }
}

impl Default for RemovePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstallPlugin for RemovePlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Result<bool, InstallError> {
        let command = self.command(ctx)?;
        ctx.post_status("Remove Package(s) Pending");

        let mut engine = InstallEngine::new(ctx, conn);
        engine.enter_admin_mode().await?;
        let outcome = Self::remove_and_observe(&mut engine, &command).await;
        let outcome = engine.leave_admin_mode(outcome).await?;

        if outcome.success {
            engine.ctx().info("Package(s) Removed Successfully");
        }
        Ok(outcome.success)
    }
}
