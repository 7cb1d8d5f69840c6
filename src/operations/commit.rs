//! commit / prepare clean
//!
//! 两者都没有确认提示，直接解析操作 ID 并跟踪到结束。

use super::{exr_descriptor, COMMIT_PLUGIN, PREPARE_CLEAN_PLUGIN};
use crate::connection::Connection;
use crate::context::RunContext;
use crate::engine::{InstallEngine, InstallError};
use crate::plugin::{InstallPlugin, Phase, PluginDescriptor};
use async_trait::async_trait;

pub struct TrackedOperationPlugin {
    descriptor: PluginDescriptor,
    command: &'static str,
}

impl TrackedOperationPlugin {
    pub fn commit() -> Self {
        Self {
            descriptor: exr_descriptor(
                COMMIT_PLUGIN,
                [Phase::Commit],
                "Commits the active software set.",
            ),
            command: "install commit",
        }
    }

    pub fn prepare_clean() -> Self {
        Self {
            descriptor: exr_descriptor(
                PREPARE_CLEAN_PLUGIN,
                [Phase::Prepare],
                "Clears a previous install prepare.",
            ),
            command: "install prepare clean",
        }
    }

    pub fn command(&self) -> &str {
        self.command
    }
}

#[async_trait]
impl InstallPlugin for TrackedOperationPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Result<bool, InstallError> {
        ctx.post_status(format!("Executing {}", self.descriptor.name));
        let mut engine = InstallEngine::new(ctx, conn);
        engine.enter_admin_mode().await?;
        let outcome = engine.run_tracked_operation(self.command).await;
        let outcome = engine.leave_admin_mode(outcome).await?;
        Ok(outcome.success)
    }
}
