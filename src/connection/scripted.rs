//! 脚本化连接
//!
//! 按顺序回放预先录制的设备响应，并记录所有交互。
//! 用于离线演练和测试安装流程。

use super::{Connection, ExpectMatch, TransportError};
use async_trait::async_trait;
use regex::Regex;
use std::collections::VecDeque;
use std::time::Duration;

/// 一次命令的预设回应
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Output(String),
    Timeout,
    Drop,
}

/// 脚本中的一步
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedStep {
    /// 期望收到的命令，`None` 表示不检查
    pub command: Option<String>,
    pub reply: ScriptedReply,
}

impl ScriptedStep {
    pub fn any(output: impl Into<String>) -> Self {
        Self {
            command: None,
            reply: ScriptedReply::Output(output.into()),
        }
    }

    pub fn on(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            reply: ScriptedReply::Output(output.into()),
        }
    }

    pub fn timeout() -> Self {
        Self {
            command: None,
            reply: ScriptedReply::Timeout,
        }
    }

    pub fn drop_connection() -> Self {
        Self {
            command: None,
            reply: ScriptedReply::Drop,
        }
    }
}

/// 记录下来的连接事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Sent(String),
    Disconnected,
    Reconnected { force_discovery: bool },
    Reloaded { no_reload_cmd: bool },
}

#[derive(Debug)]
pub struct ScriptedConnection {
    hostname: String,
    console: bool,
    steps: VecDeque<ScriptedStep>,
    reconnect_results: VecDeque<Result<(), TransportError>>,
    reload_results: VecDeque<Result<(), TransportError>>,
    events: Vec<TransportEvent>,
}

impl ScriptedConnection {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            console: false,
            steps: VecDeque::new(),
            reconnect_results: VecDeque::new(),
            reload_results: VecDeque::new(),
            events: Vec::new(),
        }
    }

    pub fn console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn with_steps<I>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = ScriptedStep>,
    {
        self.steps.extend(steps);
        self
    }

    pub fn push(&mut self, step: ScriptedStep) {
        self.steps.push_back(step);
    }

    /// 让下一次重连失败
    pub fn fail_next_reconnect(&mut self, error: TransportError) {
        self.reconnect_results.push_back(Err(error));
    }

    /// 让下一次 reload 等待失败
    pub fn fail_next_reload(&mut self, error: TransportError) {
        self.reload_results.push_back(Err(error));
    }

    pub fn events(&self) -> &[TransportEvent] {
        &self.events
    }

    pub fn sent_commands(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TransportEvent::Sent(command) => Some(command.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn reconnect_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, TransportEvent::Reconnected { .. }))
            .count()
    }

    pub fn disconnect_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, TransportEvent::Disconnected))
            .count()
    }

    pub fn remaining_steps(&self) -> usize {
        self.steps.len()
    }

    fn next_reply(&mut self, command: &str, timeout: Duration) -> Result<String, TransportError> {
        self.events.push(TransportEvent::Sent(command.to_string()));

        let Some(step) = self.steps.pop_front() else {
            return Err(TransportError::Closed);
        };

        if let Some(expected) = &step.command {
            if expected != command {
                return Err(TransportError::CommandSyntax(format!(
                    "期望命令 `{expected}`，实际收到 `{command}`"
                )));
            }
        }

        match step.reply {
            ScriptedReply::Output(text) => Ok(text),
            ScriptedReply::Timeout => Err(TransportError::timeout(command, timeout)),
            ScriptedReply::Drop => Err(TransportError::Connection(format!(
                "{} 连接被对端关闭",
                self.hostname
            ))),
        }
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn is_console(&self) -> bool {
        self.console
    }

    async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, TransportError> {
        self.next_reply(command, timeout)
    }

    async fn send_and_wait(
        &mut self,
        command: &str,
        wait_for: &Regex,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let text = self.next_reply(command, timeout)?;
        if wait_for.is_match(&text) {
            Ok(text)
        } else {
            Err(TransportError::timeout(command, timeout))
        }
    }

    async fn expect_any(
        &mut self,
        command: &str,
        patterns: &[Regex],
        timeout: Duration,
    ) -> Result<ExpectMatch, TransportError> {
        let text = self.next_reply(command, timeout)?;
        ExpectMatch::from_text(&text, patterns).ok_or_else(|| TransportError::timeout(command, timeout))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.events.push(TransportEvent::Disconnected);
        Ok(())
    }

    async fn reconnect(
        &mut self,
        force_discovery: bool,
        _max_timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        self.events.push(TransportEvent::Reconnected { force_discovery });
        self.reconnect_results.pop_front().unwrap_or(Ok(()))
    }

    async fn reload(
        &mut self,
        _reload_timeout: Duration,
        no_reload_cmd: bool,
    ) -> Result<(), TransportError> {
        self.events.push(TransportEvent::Reloaded { no_reload_cmd });
        self.reload_results.pop_front().unwrap_or(Ok(()))
    }
}
