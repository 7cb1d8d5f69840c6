//! 插件注册表
//!
//! 按能力描述选择插件，按标准阶段顺序排序后依次执行。
//! 单个插件失败只记录结果，不影响后续插件。

use super::types::{InstallPlugin, Phase, PluginDescriptor, PluginError, PluginFilter, PluginRunResult};
use crate::connection::Connection;
use crate::context::RunContext;
use futures::FutureExt;
use indexmap::IndexMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
pub struct PluginRegistry {
    plugins: IndexMap<String, Arc<dyn InstallPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置插件
    pub fn with_builtin() -> Result<Self, PluginError> {
        let mut registry = Self::new();
        crate::operations::register_builtin(&mut registry)?;
        Ok(registry)
    }

    pub fn register(&mut self, plugin: Arc<dyn InstallPlugin>) -> Result<(), PluginError> {
        let descriptor = plugin.descriptor();
        descriptor.validate()?;
        if self.plugins.contains_key(&descriptor.name) {
            return Err(PluginError::AlreadyRegistered(descriptor.name.clone()));
        }
        tracing::debug!("[DISPATCH] 注册插件: {}", descriptor.name);
        self.plugins.insert(descriptor.name.clone(), plugin);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InstallPlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    /// 选出满足条件的插件
    ///
    /// 按最早支持的阶段排序，不限阶段的插件排在最后；同阶段保持注册顺序。
    pub fn select(&self, filter: &PluginFilter) -> Vec<Arc<dyn InstallPlugin>> {
        let mut selected: Vec<Arc<dyn InstallPlugin>> = self
            .plugins
            .values()
            .filter(|plugin| filter.matches(plugin.descriptor()))
            .cloned()
            .collect();
        selected.sort_by_key(|plugin| match plugin.descriptor().earliest_phase() {
            Some(phase) => (0, Some(phase)),
            None => (1, None),
        });
        selected
    }

    /// 插件列表文本
    pub fn describe(&self, filter: &PluginFilter, brief: bool) -> String {
        let mut out = String::new();
        for plugin in self.select(filter) {
            let descriptor = plugin.descriptor();
            let platforms = join_or_any(descriptor.platforms.iter().map(String::as_str));
            let phases = join_or_any(descriptor.phases.iter().map(|p| p.as_str()));
            let os = join_or_any(descriptor.os.iter().map(String::as_str));
            if brief {
                out.push_str(&format!(
                    "[{platforms}] [{phases}] [{os}] {}\n",
                    descriptor.name
                ));
            } else {
                out.push_str(&format!(
                    "Name: {}\nPlatforms: {platforms}\nPhases: {phases}\nOS: {os}\nDescription: {}\n\n",
                    descriptor.name, descriptor.description
                ));
            }
        }
        out
    }

    /// 执行某一阶段的全部适用插件
    pub async fn dispatch(
        &self,
        phase: Phase,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Vec<PluginRunResult> {
        ctx.requested_phase = Some(phase);
        let filter = PluginFilter::for_context(ctx);
        self.dispatch_filtered(&filter, ctx, conn).await
    }

    /// 按顺序执行多个阶段
    ///
    /// 某阶段的插件失败不会阻止后续阶段执行
    pub async fn dispatch_phases(
        &self,
        phases: &[Phase],
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Vec<PluginRunResult> {
        let mut ordered = phases.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut results = Vec::new();
        for phase in ordered {
            results.extend(self.dispatch(phase, ctx, conn).await);
        }
        results
    }

    pub async fn dispatch_filtered(
        &self,
        filter: &PluginFilter,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Vec<PluginRunResult> {
        let selected = self.select(filter);
        if selected.is_empty() {
            tracing::warn!("[DISPATCH] {} 没有匹配的插件: {:?}", ctx.hostname, filter);
        }

        let mut results = Vec::with_capacity(selected.len());
        for plugin in selected {
            let result = self.run_plugin(plugin.as_ref(), filter.phase, ctx, conn).await;
            if !result.success {
                ctx.success = false;
            }
            results.push(result);
        }
        results
    }

    /// 按名称执行单个插件，不检查平台与阶段
    pub async fn run_named(
        &self,
        name: &str,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Result<PluginRunResult, PluginError> {
        let plugin = self
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        let result = self.run_plugin(plugin.as_ref(), None, ctx, conn).await;
        if !result.success {
            ctx.success = false;
        }
        Ok(result)
    }

    async fn run_plugin(
        &self,
        plugin: &dyn InstallPlugin,
        phase: Option<Phase>,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> PluginRunResult {
        let name = plugin.name().to_string();
        let start = Instant::now();
        ctx.info(format!("Dispatching: '{name}'"));
        tracing::info!("[DISPATCH] {} 执行插件 {}", ctx.hostname, name);

        let outcome = AssertUnwindSafe(plugin.run(ctx, conn)).catch_unwind().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(true)) => {
                ctx.info(format!("Finished: '{name}'"));
                PluginRunResult::success(name, phase, duration_ms)
            }
            Ok(Ok(false)) => {
                ctx.warning(format!("Plugin '{name}' reported failure"));
                PluginRunResult::failure(name, phase, "插件返回失败".to_string(), duration_ms)
            }
            Ok(Err(error)) => {
                error.log_with_context(&ctx.hostname, &name);
                ctx.error(format!("Plugin '{name}' failed: {error}"));
                PluginRunResult::failure(name, phase, error.to_string(), duration_ms)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("[DISPATCH] 插件 {} panic: {}", name, message);
                ctx.error(format!("Plugin '{name}' panicked: {message}"));
                PluginRunResult::failure(name, phase, message, duration_ms)
            }
        }
    }
}

fn join_or_any<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let joined: Vec<&str> = items.collect();
    if joined.is_empty() {
        "Any".to_string()
    } else {
        joined.join(", ")
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

/// 测试用插件：记录调用并返回预设结果
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::engine::InstallError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    pub enum Behavior {
        Pass,
        Fail,
        Raise,
        Panic,
    }

    pub struct RecordingPlugin {
        pub descriptor: PluginDescriptor,
        pub behavior: Behavior,
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingPlugin {
        pub fn new(
            descriptor: PluginDescriptor,
            behavior: Behavior,
            calls: Arc<Mutex<Vec<String>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                descriptor,
                behavior,
                calls,
            })
        }
    }

    #[async_trait]
    impl InstallPlugin for RecordingPlugin {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.descriptor
        }

        async fn run(
            &self,
            _ctx: &mut RunContext,
            _conn: &mut dyn Connection,
        ) -> Result<bool, InstallError> {
            self.calls
                .lock()
                .unwrap()
                .push(self.descriptor.name.clone());
            match self.behavior {
                Behavior::Pass => Ok(true),
                Behavior::Fail => Ok(false),
                Behavior::Raise => Err(InstallError::OperationBusy {
                    command: "install activate".into(),
                }),
                Behavior::Panic => panic!("plugin exploded"),
            }
        }
    }
}
