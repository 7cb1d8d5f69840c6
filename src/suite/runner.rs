//! 批量运行测试套件
//!
//! 每个套件使用独立的日志子目录、运行上下文和连接；
//! 套件之间可以并发，套件内的用例按顺序执行。

use super::types::{
    discover_suites, load_test_cases, SuiteError, TestCaseSpec, JUNIT_FILE_NAME, TC_FILE_NAME,
};
use crate::config::{ConfigError, RunnerConfig};
use crate::connection::{Connection, TransportError};
use crate::context::RunContext;
use crate::plugin::{PluginRegistry, PluginRunResult};
use crate::report::{junit, ResultRecord, TestCaseResult, TestStatus};
use async_trait::async_trait;
use chrono::Local;
use futures::stream::{self, StreamExt};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 为每个测试用例建立设备连接
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn open(
        &self,
        hostname: &str,
        hops: &[String],
    ) -> Result<Box<dyn Connection>, TransportError>;
}

/// 一个套件的运行结果
#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub name: String,
    pub log_dir: PathBuf,
    pub results: Vec<TestCaseResult>,
}

impl SuiteReport {
    pub fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.status == TestStatus::Pass)
    }
}

enum CaseFlow {
    Continue,
    StopSuite,
}

pub struct BatchRunner {
    config: RunnerConfig,
    registry: Arc<PluginRegistry>,
    factory: Arc<dyn ConnectionFactory>,
}

impl BatchRunner {
    pub fn new(
        config: RunnerConfig,
        registry: Arc<PluginRegistry>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            config,
            registry,
            factory,
        }
    }

    /// 运行 `tc_loc` 下的所有套件
    ///
    /// 单个套件失败只记录日志，不影响其他套件。
    pub async fn run(&self) -> Result<Vec<SuiteReport>, SuiteError> {
        let hops = self.config.connection_hops()?;
        let hostname = self.config.hostname()?;
        let tc_loc = self
            .config
            .tc_loc
            .clone()
            .ok_or_else(|| ConfigError::MissingArgument("tc_loc".to_string()))?;
        let suites = discover_suites(&tc_loc)?;

        let parent = self
            .config
            .log_dir
            .join(Local::now().format("installcast-%Y%m%d%H%M%S").to_string());
        tracing::info!(
            "[SUITE] 共 {} 个套件，日志目录 {}",
            suites.len(),
            parent.display()
        );

        let outcomes: Vec<(PathBuf, Result<SuiteReport, SuiteError>)> = stream::iter(suites)
            .map(|path| {
                let parent = &parent;
                let hostname = &hostname;
                let hops = &hops;
                async move {
                    let result = self.run_suite(&path, parent, hostname, hops).await;
                    (path, result)
                }
            })
            .buffer_unordered(self.config.max_parallel_suites.max(1))
            .collect()
            .await;

        let mut reports = Vec::with_capacity(outcomes.len());
        for (path, outcome) in outcomes {
            match outcome {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!("[SUITE] 套件 {} 执行失败: {}", path.display(), e),
            }
        }
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(reports)
    }

    /// 运行单个套件文件
    pub async fn run_suite(
        &self,
        source: &Path,
        parent: &Path,
        hostname: &str,
        hops: &[String],
    ) -> Result<SuiteReport, SuiteError> {
        let name = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "suite".to_string());
        let log_dir = parent.join(&name);
        fs::create_dir_all(&log_dir)?;

        let tc_file = log_dir.join(TC_FILE_NAME);
        fs::copy(source, &tc_file)?;
        let cases = load_test_cases(&tc_file)?;
        if cases.is_empty() {
            return Err(SuiteError::NoTestCases(source.to_path_buf()));
        }

        let record = ResultRecord::in_dir(&log_dir);
        let names: Vec<String> = cases.iter().map(|case| case.name.clone()).collect();
        record.initialize(&names)?;
        tracing::info!("[SUITE] {}: {} 个测试用例", name, cases.len());

        for index in 0..cases.len() {
            let tc_id = index + 1;
            // save_data 可能已改写后续用例
            let cases = load_test_cases(&tc_file)?;
            let Some(case) = cases.get(index) else {
                break;
            };

            tracing::info!("[SUITE] {} 执行用例 {}: {}", name, tc_id, case.name);
            match self
                .run_case(case, tc_id, &log_dir, &record, hostname, hops)
                .await?
            {
                CaseFlow::Continue => {}
                CaseFlow::StopSuite => break,
            }
        }

        let results = record.load()?;
        junit::write_report(&log_dir.join(JUNIT_FILE_NAME), &name, &results)?;
        Ok(SuiteReport {
            name,
            log_dir,
            results,
        })
    }

    async fn run_case(
        &self,
        case: &TestCaseSpec,
        tc_id: usize,
        log_dir: &Path,
        record: &ResultRecord,
        hostname: &str,
        hops: &[String],
    ) -> Result<CaseFlow, SuiteError> {
        if case.shell.is_none() {
            let message = format!("Please specify shell as part of TC {}", case.name);
            tracing::warn!("[SUITE] {}", message);
            record.update(tc_id, &case.name, TestStatus::Error, &message)?;
            return Ok(CaseFlow::StopSuite);
        }

        let plugin_name = match case.plugin_name() {
            Ok(plugin_name) => plugin_name,
            Err(e) => {
                tracing::warn!("[SUITE] 用例 {} 没有对应的插件: {}", case.name, e);
                record.update(tc_id, &case.name, TestStatus::Error, &e.to_string())?;
                return Ok(CaseFlow::Continue);
            }
        };

        let mut ctx = case.build_context(tc_id, hostname, hops, log_dir, &self.config.engine);
        let mut conn = match self.factory.open(hostname, hops).await {
            Ok(conn) => conn,
            Err(e) => {
                let message = format!("Unable to connect to {hostname}: {e}");
                ctx.error(&message);
                record.update(tc_id, &case.name, TestStatus::Error, &message)?;
                return Ok(CaseFlow::Continue);
            }
        };

        let outcome = self
            .registry
            .run_named(plugin_name, &mut ctx, &mut *conn)
            .await;
        if let Err(e) = conn.disconnect().await {
            tracing::debug!("[SUITE] 断开连接失败: {}", e);
        }
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("[SUITE] 用例 {}: {}", case.name, e);
                record.update(tc_id, &case.name, TestStatus::Error, &e.to_string())?;
                return Ok(CaseFlow::Continue);
            }
        };

        Self::finalize_row(record, case, tc_id, &ctx, &result)?;
        Self::apply_save_data(case, &ctx, &log_dir.join(TC_FILE_NAME))?;
        Ok(CaseFlow::Continue)
    }

    /// 插件结束后结果行仍为 Blocked 时补写结论
    fn finalize_row(
        record: &ResultRecord,
        case: &TestCaseSpec,
        tc_id: usize,
        ctx: &RunContext,
        result: &PluginRunResult,
    ) -> Result<(), SuiteError> {
        let pending = record
            .get(tc_id)?
            .map_or(true, |row| row.status.is_pending());
        if !pending {
            return Ok(());
        }

        let (status, message) = if ctx.success && result.success {
            (
                TestStatus::Unknown,
                "Plugin finished without reporting a result".to_string(),
            )
        } else {
            let message = result
                .error
                .clone()
                .unwrap_or_else(|| "Plugin execution failed".to_string());
            (TestStatus::Error, message)
        };
        record.update(tc_id, &case.name, status, &message)?;
        Ok(())
    }

    /// 把本用例观察到的值替换进 tc.json 中的占位文本
    fn apply_save_data(
        case: &TestCaseSpec,
        ctx: &RunContext,
        tc_file: &Path,
    ) -> Result<(), SuiteError> {
        if case.save_data.is_empty() {
            return Ok(());
        }

        let mut content = fs::read_to_string(tc_file)?;
        for (field, placeholder) in &case.save_data {
            match ctx.saved_value(field) {
                Some(value) => {
                    tracing::info!("[SUITE] 替换 {} 为 {} ({})", placeholder, value, field);
                    content = content.replace(placeholder.as_str(), &value);
                }
                None => tracing::warn!("[SUITE] 上下文中没有可保存的字段 {}", field),
            }
        }
        fs::write(tc_file, content)?;
        Ok(())
    }
}
