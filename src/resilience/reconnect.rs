//! 重连机制实现
//!
//! 固定退避后强制重连，连续失败次数有上限

use crate::config::EngineConfig;
use crate::connection::{Connection, TransportError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 重连配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    /// 允许的连续重连次数
    pub max_reconnects: u32,
    /// 重连前等待（毫秒）
    pub backoff_ms: u64,
    /// 重连时是否重新探测设备
    pub force_discovery: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_reconnects: 3,
            backoff_ms: 60_000,
            force_discovery: true,
        }
    }
}

impl ReconnectConfig {
    pub fn new(max_reconnects: u32, backoff_ms: u64) -> Self {
        Self {
            max_reconnects,
            backoff_ms,
            force_discovery: true,
        }
    }

    pub fn from_engine(config: &EngineConfig) -> Self {
        Self::new(config.max_reconnects, config.reconnect_backoff_ms)
    }
}

/// 连续失败计数；成功的一轮轮询会清零
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectBudget {
    consecutive_failures: u32,
    total_reconnects: u32,
}

impl ReconnectBudget {
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_reconnects(&self) -> u32 {
        self.total_reconnects
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

/// 重连器
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// 使用默认配置创建重连器
    pub fn with_defaults() -> Self {
        Self::new(ReconnectConfig::default())
    }

    pub fn from_engine(config: &EngineConfig) -> Self {
        Self::new(ReconnectConfig::from_engine(config))
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn backoff_delay(&self) -> Duration {
        Duration::from_millis(self.config.backoff_ms)
    }

    /// 记录一次失败，返回是否还允许重连
    pub fn admit_failure(&self, budget: &mut ReconnectBudget) -> bool {
        if budget.consecutive_failures >= self.config.max_reconnects {
            return false;
        }
        budget.consecutive_failures += 1;
        true
    }

    /// 断开、等待退避，然后强制重连
    pub async fn recover(
        &self,
        conn: &mut dyn Connection,
        budget: &mut ReconnectBudget,
    ) -> Result<(), TransportError> {
        tracing::warn!(
            "[RECONNECT] {} 第 {}/{} 次重连",
            conn.hostname(),
            budget.consecutive_failures,
            self.config.max_reconnects
        );

        if let Err(e) = conn.disconnect().await {
            tracing::debug!("[RECONNECT] 断开连接失败: {}", e);
        }
        tokio::time::sleep(self.backoff_delay()).await;

        budget.total_reconnects += 1;
        conn.reconnect(self.config.force_discovery, None).await
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::connection::{ScriptedConnection, TransportEvent};

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_reconnects, 3);
        assert_eq!(config.backoff_ms, 60_000);
        assert!(config.force_discovery);
    }

    #[test]
    fn test_from_engine_config() {
        let config = ReconnectConfig::from_engine(&EngineConfig::immediate());
        assert_eq!(config.max_reconnects, 3);
        assert_eq!(config.backoff_ms, 0);
    }

    #[test]
    fn test_admit_failure_stops_at_limit() {
        let policy = ReconnectPolicy::new(ReconnectConfig::new(2, 0));
        let mut budget = ReconnectBudget::default();

        assert!(policy.admit_failure(&mut budget));
        assert!(policy.admit_failure(&mut budget));
        assert!(!policy.admit_failure(&mut budget));

        budget.reset();
        assert!(policy.admit_failure(&mut budget));
    }

    #[tokio::test]
    async fn test_recover_disconnects_then_reconnects() {
        let policy = ReconnectPolicy::new(ReconnectConfig::new(3, 0));
        let mut budget = ReconnectBudget::default();
        let mut conn = ScriptedConnection::new("r1");

        assert!(policy.admit_failure(&mut budget));
        policy.recover(&mut conn, &mut budget).await.unwrap();

        assert_eq!(
            conn.events(),
            &[
                TransportEvent::Disconnected,
                TransportEvent::Reconnected {
                    force_discovery: true
                }
            ]
        );
        assert_eq!(budget.total_reconnects(), 1);
    }
}
