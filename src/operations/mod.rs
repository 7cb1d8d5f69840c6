//! 内置安装插件
//!
//! add / prepare / activate / deactivate / commit / remove / extract 等 eXR 安装操作，
//! ASR9K 迁移，以及自定义命令采集。

mod add;
mod commit;
mod custom_commands;
mod install;
mod migrate;
mod remove;
mod repository;

pub use add::AddPlugin;
pub use commit::TrackedOperationPlugin;
pub use custom_commands::{capture, save_to_file, send_in_shell, CustomCommandsPlugin};
pub use install::{build_command, InstallVerb, PackageInstallPlugin};
pub use migrate::{migration_script_errors, MigratePlugin, PostMigratePlugin, MIGRATION_SCRIPT};
pub use remove::RemovePlugin;
pub use repository::RepositoryUrl;

use crate::plugin::{Phase, PluginDescriptor, PluginError, PluginRegistry};
use std::sync::Arc;

pub const ADD_PLUGIN: &str = "Install Add Plugin";
pub const PREPARE_PLUGIN: &str = "Install Prepare Plugin";
pub const PREPARE_CLEAN_PLUGIN: &str = "Install Prepare Clean Plugin";
pub const EXTRACT_PLUGIN: &str = "Install Extract Plugin";
pub const ACTIVATE_PLUGIN: &str = "Install Activate Plugin";
pub const DEACTIVATE_PLUGIN: &str = "Install Deactivate Plugin";
pub const COMMIT_PLUGIN: &str = "Install Commit Plugin";
pub const REMOVE_PLUGIN: &str = "Install Remove Plugin";
pub const REMOVE_INACTIVE_PLUGIN: &str = "Install Remove Inactive Plugin";
pub const MIGRATE_PLUGIN: &str = "Migrate Plugin";
pub const POST_MIGRATE_PLUGIN: &str = "Post-Migrate Plugin";
pub const CUSTOM_COMMANDS_PLUGIN: &str = "Custom Commands Capture Plugin";

/// eXR 安装插件支持的平台
pub const EXR_PLATFORMS: [&str; 7] = [
    "ASR9K", "NCS1K", "NCS4K", "NCS5K", "NCS5500", "NCS6K", "IOS-XRv",
];
pub const EXR_OS: &str = "eXR";

pub const MIGRATION_PLATFORMS: [&str; 1] = ["ASR9K"];

pub const CUSTOM_COMMAND_PLATFORMS: [&str; 10] = [
    "ASR9K", "CRS", "NCS1K", "NCS4K", "NCS5K", "NCS5500", "NCS6K", "ASR900", "N6K", "IOS-XRv",
];

pub(crate) fn exr_descriptor<I>(name: &str, phases: I, description: &str) -> PluginDescriptor
where
    I: IntoIterator<Item = Phase>,
{
    PluginDescriptor::new(name)
        .with_platforms(EXR_PLATFORMS)
        .with_phases(phases)
        .with_os([EXR_OS])
        .with_description(description)
}

/// 注册全部内置插件
pub fn register_builtin(registry: &mut PluginRegistry) -> Result<(), PluginError> {
    registry.register(Arc::new(AddPlugin::new()))?;
    registry.register(Arc::new(PackageInstallPlugin::new(InstallVerb::Prepare)))?;
    registry.register(Arc::new(TrackedOperationPlugin::prepare_clean()))?;
    registry.register(Arc::new(PackageInstallPlugin::new(InstallVerb::Extract)))?;
    registry.register(Arc::new(PackageInstallPlugin::new(InstallVerb::Activate)))?;
    registry.register(Arc::new(PackageInstallPlugin::new(InstallVerb::Deactivate)))?;
    registry.register(Arc::new(TrackedOperationPlugin::commit()))?;
    registry.register(Arc::new(RemovePlugin::new()))?;
    registry.register(Arc::new(RemovePlugin::inactive()))?;
    registry.register(Arc::new(MigratePlugin::new()))?;
    registry.register(Arc::new(PostMigratePlugin::new()))?;
    registry.register(Arc::new(CustomCommandsPlugin::new()))?;
    Ok(())
}

/// 测试用例中的操作名对应的插件名
pub fn plugin_for_operation(operation: &str) -> Option<&'static str> {
    let name = match operation.trim() {
        "Add" => ADD_PLUGIN,
        "Remove" => REMOVE_PLUGIN,
        "Remove Inactive" => REMOVE_INACTIVE_PLUGIN,
        "Activate" => ACTIVATE_PLUGIN,
        "Deactivate" => DEACTIVATE_PLUGIN,
        "Commit" => COMMIT_PLUGIN,
        "Extract" => EXTRACT_PLUGIN,
        "Command" => CUSTOM_COMMANDS_PLUGIN,
        "Prepare" => PREPARE_PLUGIN,
        "Prepare Clean" => PREPARE_CLEAN_PLUGIN,
        "Migrate" => MIGRATE_PLUGIN,
        "Post-Migrate" => POST_MIGRATE_PLUGIN,
        _ => return None,
    };
    Some(name)
}
