//! prepare / activate / deactivate / extract
//!
//! 四种操作只在命令动词上不同，统一交给安装引擎处理输出事件。

use super::{exr_descriptor, ACTIVATE_PLUGIN, DEACTIVATE_PLUGIN, EXTRACT_PLUGIN, PREPARE_PLUGIN};
use crate::connection::Connection;
use crate::context::RunContext;
use crate::engine::{InstallEngine, InstallError, OperationOutcome};
use crate::plugin::{InstallPlugin, Phase, PluginDescriptor};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallVerb {
    Prepare,
    Activate,
    Deactivate,
    Extract,
}

impl InstallVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallVerb::Prepare => "prepare",
            InstallVerb::Activate => "activate",
            InstallVerb::Deactivate => "deactivate",
            InstallVerb::Extract => "extract",
        }
    }

    /// 只有 prepare 和 activate 支持 ISSU
    pub fn supports_issu(self) -> bool {
        matches!(self, InstallVerb::Prepare | InstallVerb::Activate)
    }
}

/// 构造安装命令，有软件包 ID 时优先使用 ID
pub fn build_command(
    verb: InstallVerb,
    package_ids: &[String],
    packages: &[String],
    issu: bool,
) -> Result<String, InstallError> {
    let issu = if issu && verb.supports_issu() {
        "issu "
    } else {
        ""
    };
    let verb_str = verb.as_str();

    if !package_ids.is_empty() {
        return Ok(format!(
            "install {verb_str} {issu}id {}",
            package_ids.join(" ")
        ));
    }
    if !packages.is_empty() {
        return Ok(format!("install {verb_str} {issu}{}", packages.join(" ")));
    }
    Err(InstallError::Configuration(format!(
        "Unable to form the install {verb_str} command: no package list provided"
    )))
}

pub struct PackageInstallPlugin {
    descriptor: PluginDescriptor,
    verb: InstallVerb,
}

impl PackageInstallPlugin {
    pub fn new(verb: InstallVerb) -> Self {
        let descriptor = match verb {
            InstallVerb::Prepare => exr_descriptor(
                PREPARE_PLUGIN,
                [Phase::Prepare],
                "Prepares packages for activation.",
            ),
            InstallVerb::Activate => exr_descriptor(
                ACTIVATE_PLUGIN,
                [Phase::Activate],
                "Activates packages on the device.",
            ),
            InstallVerb::Deactivate => exr_descriptor(
                DEACTIVATE_PLUGIN,
                [Phase::Deactivate],
                "Deactivates packages on the device.",
            ),
            InstallVerb::Extract => exr_descriptor(
                EXTRACT_PLUGIN,
                [Phase::Prepare],
                "Extracts packages from an added archive.",
            ),
        };
        Self { descriptor, verb }
    }

    pub fn verb(&self) -> InstallVerb {
        self.verb
    }

    async fn install(
        &self,
        engine: &mut InstallEngine<'_>,
        command: &str,
    ) -> Result<OperationOutcome, InstallError> {
        if self.verb == InstallVerb::Prepare {
            engine.wait_for_idle().await?;
        }
        engine
            .ctx()
            .post_status(format!("{} package(s) pending", self.verb.as_str()));
        engine.run_install_command(command).await
    }
}

#[async_trait]
impl InstallPlugin for PackageInstallPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Result<bool, InstallError> {
        ctx.post_status(format!("Executing {}", self.descriptor.name));
        let command = build_command(
            self.verb,
            &ctx.package_ids,
            &ctx.software_packages,
            ctx.issu_mode,
        )?;

        let mut engine = InstallEngine::new(ctx, conn);
        engine.enter_admin_mode().await?;
        let outcome = self.install(&mut engine, &command).await;
        let outcome = engine.leave_admin_mode(outcome).await?;

        if outcome.success {
            engine
                .ctx()
                .info(format!("{} package(s) done", self.verb.as_str()));
        }
        Ok(outcome.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::connection::{ScriptedConnection, ScriptedStep};
    use crate::context::ShellMode;
    use crate::engine::NO_OPERATION_IN_PROGRESS;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_command_prefers_ids() {
        let command = build_command(
            InstallVerb::Activate,
            &strings(&["4", "5"]),
            &strings(&["ncs5500-mpls.pkg"]),
            false,
        )
        .unwrap();
        assert_eq!(command, "install activate id 4 5");
    }

    #[test]
    fn test_build_command_issu_only_for_prepare_and_activate() {
        let ids = strings(&["7"]);
        assert_eq!(
            build_command(InstallVerb::Prepare, &ids, &[], true).unwrap(),
            "install prepare issu id 7"
        );
        assert_eq!(
            build_command(InstallVerb::Deactivate, &ids, &[], true).unwrap(),
            "install deactivate id 7"
        );
        assert_eq!(
            build_command(InstallVerb::Extract, &[], &strings(&["a.tar"]), true).unwrap(),
            "install extract a.tar"
        );
    }

    #[test]
    fn test_build_command_requires_input() {
        let error = build_command(InstallVerb::Activate, &[], &[], false).unwrap_err();
        assert!(matches!(error, InstallError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_prepare_waits_for_idle_in_admin_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RunContext::in_memory("r1", dir.path())
            .with_shell(ShellMode::Admin)
            .with_config(EngineConfig::immediate());
        ctx.package_ids = strings(&["3"]);
        let mut conn = ScriptedConnection::new("r1").with_steps([
            ScriptedStep::on("admin", ""),
            ScriptedStep::on("show install request", NO_OPERATION_IN_PROGRESS),
            ScriptedStep::on(
                "install prepare id 3",
                "Install operation 2.1.4 started\nInstall operation 2.1.4: NO IMPACT OPERATION",
            ),
            ScriptedStep::on("exit", ""),
        ]);

        let ok = PackageInstallPlugin::new(InstallVerb::Prepare)
            .run(&mut ctx, &mut conn)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(conn.remaining_steps(), 0);
    }

    #[tokio::test]
    async fn test_activate_busy_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RunContext::in_memory("r1", dir.path())
            .with_shell(ShellMode::User)
            .with_config(EngineConfig::immediate());
        ctx.software_packages = strings(&["ncs5500-mpls.pkg"]);
        let mut conn = ScriptedConnection::new("r1").with_steps([ScriptedStep::on(
            "install activate ncs5500-mpls.pkg",
            "Could not start this install operation. Install operation 8 is still in progress",
        )]);

        let error = PackageInstallPlugin::new(InstallVerb::Activate)
            .run(&mut ctx, &mut conn)
            .await
            .unwrap_err();
        assert!(matches!(error, InstallError::OperationBusy { .. }));
    }

    #[tokio::test]
    async fn test_activate_busy_leaves_admin_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RunContext::in_memory("r1", dir.path())
            .with_shell(ShellMode::Admin)
            .with_config(EngineConfig::immediate());
        ctx.package_ids = strings(&["7"]);
        let mut conn = ScriptedConnection::new("r1").with_steps([
            ScriptedStep::on("admin", ""),
            ScriptedStep::on(
                "install activate id 7",
                "Could not start this install operation. Install operation 8 is still in progress",
            ),
            ScriptedStep::on("exit", ""),
        ]);

        let error = PackageInstallPlugin::new(InstallVerb::Activate)
            .run(&mut ctx, &mut conn)
            .await
            .unwrap_err();
        assert!(matches!(error, InstallError::OperationBusy { .. }));
        assert_eq!(
            conn.sent_commands(),
            vec!["admin", "install activate id 7", "exit"]
        );
        assert_eq!(conn.remaining_steps(), 0);
    }
}
