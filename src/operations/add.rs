//! 添加软件包

use super::repository::RepositoryUrl;
use super::{exr_descriptor, ADD_PLUGIN};
use crate::connection::Connection;
use crate::context::RunContext;
use crate::engine::{InstallEngine, InstallError, OperationOutcome};
use crate::plugin::{InstallPlugin, Phase, PluginDescriptor};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

static PASSWORD_PROMPT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new("[Pp]assword:").ok());

pub struct AddPlugin {
    descriptor: PluginDescriptor,
}

impl AddPlugin {
    pub fn new() -> Self {
        Self {
            descriptor: exr_descriptor(
                ADD_PLUGIN,
                [Phase::Add],
                "Adds packages from a repository to the device.",
            ),
        }
    }

    /// 发出 add 命令，返回 (不含密码的命令, 设备回显)
    async fn install_add(
        engine: &mut InstallEngine<'_>,
        repository: &RepositoryUrl,
        packages: &str,
    ) -> Result<(String, String), InstallError> {
        let timeout = engine.config().command_timeout_ms;
        let command = format!("install add source {} {}", repository.source(), packages);

        match repository {
            RepositoryUrl::Plain(_) => {
                let output = engine.send_with_timeout(&command, timeout).await?;
                Ok((command, output))
            }
            RepositoryUrl::Authenticated { password, .. } => {
                let prompt = password_prompt()?;
                let echo = engine.send_expecting(&command, prompt, timeout).await?;
                let rest = engine.send_with_timeout(password, timeout).await?;
                Ok((command, format!("{echo}{rest}")))
            }
            RepositoryUrl::Scp { password, .. } => {
                let prompt = password_prompt()?;
                for package in packages.split_whitespace() {
                    let Some(copy) = repository.scp_command(package) else {
                        continue;
                    };
                    engine.ctx().info(format!("Copying {package}"));
                    engine.send_expecting(&copy, prompt, timeout).await?;
                    engine.send_with_timeout(password, timeout).await?;
                }
                let output = engine.send_with_timeout(&command, timeout).await?;
                Ok((command, output))
            }
        }
    }

    async fn add_and_observe(
        engine: &mut InstallEngine<'_>,
        repository: &RepositoryUrl,
        packages: &str,
    ) -> Result<OperationOutcome, InstallError> {
        let (command, output) = Self::install_add(engine, repository, packages).await?;
        engine.observe_add_remove(&command, &output).await
    }
}

impl Default for AddPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn password_prompt() -> Result<&'static Regex, InstallError> {
    PASSWORD_PROMPT
        .as_ref()
        .ok_or_else(|| InstallError::Configuration("invalid password prompt pattern".to_string()))
}

#[async_trait]
impl InstallPlugin for AddPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Result<bool, InstallError> {
        ctx.post_status("Install Add Plugin");
        let raw_url = ctx
            .server_repository_url
            .clone()
            .ok_or_else(|| InstallError::Configuration("No repository provided".to_string()))?;
        let repository = RepositoryUrl::parse(&raw_url)?;
        if ctx.software_packages.is_empty() {
            return Err(InstallError::Configuration(
                "No package list provided".to_string(),
            ));
        }
        let packages = ctx.packages_joined();
        ctx.post_status(format!("Packages to be added: {packages}"));

        let mut engine = InstallEngine::new(ctx, conn);
        engine.enter_admin_mode().await?;
        engine.ctx().post_status("Add Package(s) Pending");

        let outcome = Self::add_and_observe(&mut engine, &repository, &packages).await;
        let outcome = engine.leave_admin_mode(outcome).await?;
        if outcome.success {
            engine.ctx().info("Package(s) Added Successfully");
        }
        Ok(outcome.success)
    }
}
