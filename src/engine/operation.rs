//! 安装操作与操作 ID

use super::error::InstallError;
use crate::context::ShellMode;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static OPERATION_ID: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"[Ii]nstall (?:\w+ )?operation (\d+(?:\.\d+)*)").ok());

/// 操作 ID 所属平面
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plane {
    User,
    Admin,
}

/// 设备分配的操作 ID：XR 平面为整数，admin 平面为 `a.b.c` 形式
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationId {
    User(u32),
    Admin(String),
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationId::User(id) => write!(f, "{id}"),
            OperationId::Admin(id) => write!(f, "{id}"),
        }
    }
}

impl OperationId {
    pub fn plane(&self) -> Plane {
        match self {
            OperationId::User(_) => Plane::User,
            OperationId::Admin(_) => Plane::Admin,
        }
    }

    /// 单个 ID 文本，含点号的为 admin 平面 ID
    pub fn from_token(token: &str) -> Option<Self> {
        if token.contains('.') {
            let parts: Vec<&str> = token.split('.').collect();
            if parts.len() == 3 && parts.iter().all(|p| !p.is_empty()) {
                return Some(OperationId::Admin(token.to_string()));
            }
            return None;
        }
        token.parse().ok().map(OperationId::User)
    }

    /// 输出中第一个操作 ID
    pub fn parse(text: &str) -> Option<Self> {
        let re = OPERATION_ID.as_ref()?;
        re.captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .find_map(|m| Self::from_token(m.as_str()))
    }

    /// 输出中第一个属于指定平面的操作 ID
    pub fn parse_in_plane(text: &str, plane: Plane) -> Option<Self> {
        let re = OPERATION_ID.as_ref()?;
        re.captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| Self::from_token(m.as_str()))
            .find(|id| id.plane() == plane)
    }
}

fn admin_prefix(id: &OperationId, shell: Option<ShellMode>) -> &'static str {
    if id.plane() == Plane::Admin && shell != Some(ShellMode::Admin) {
        "admin "
    } else {
        ""
    }
}

/// 查询安装进度的命令
pub fn status_query(id: &OperationId, shell: Option<ShellMode>) -> String {
    format!("{}show install request", admin_prefix(id, shell))
}

/// 读取安装日志的命令
pub fn install_log_query(id: &OperationId, shell: Option<ShellMode>) -> String {
    format!("{}show install log {} detail", admin_prefix(id, shell), id)
}

/// 操作状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    Started,
    Backgrounded,
    Polling,
    NeedsReload,
    Aborted,
    CompletedOk,
    CompletedWithFailure,
    /// 设备忙，未启动
    NotStarted,
    /// 上一次 SU / ISSU 需要先 commit
    PendingCommit,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Aborted
                | OperationState::CompletedOk
                | OperationState::CompletedWithFailure
                | OperationState::NotStarted
                | OperationState::PendingCommit
        )
    }
}

/// 一次安装命令的生命周期
#[derive(Debug)]
pub struct Operation {
    command: String,
    id: OnceCell<OperationId>,
    state: OperationState,
}

impl Operation {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            id: OnceCell::new(),
            state: OperationState::Started,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn id(&self) -> Option<&OperationId> {
        self.id.get()
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    /// 绑定操作 ID；已绑定时只接受相同的 ID
    pub fn bind_id(&self, id: OperationId) -> Result<OperationId, InstallError> {
        let bound = self.id.get_or_init(|| id.clone());
        if *bound != id {
            return Err(InstallError::OperationIdReassigned {
                bound: bound.to_string(),
                observed: id.to_string(),
            });
        }
        Ok(bound.clone())
    }

    pub fn transition(&mut self, state: OperationState) {
        tracing::debug!(
            "[ENGINE] `{}` {:?} -> {:?}",
            self.command,
            self.state,
            state
        );
        self.state = state;
    }
}

/// 一次安装命令的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub op_id: Option<OperationId>,
    pub state: OperationState,
    pub success: bool,
}

impl OperationOutcome {
    pub fn from_operation(operation: &Operation, success: bool) -> Self {
        Self {
            op_id: operation.id().cloned(),
            state: operation.state(),
            success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_id() {
        let text = "Install operation 12 '(admin) install add' started by user 'root'";
        assert_eq!(OperationId::parse(text), Some(OperationId::User(12)));
        assert_eq!(
            OperationId::parse("The install operation 17 is 30% complete"),
            Some(OperationId::User(17))
        );
        assert_eq!(
            OperationId::parse("The install prepare operation 21 is 10% complete"),
            Some(OperationId::User(21))
        );
        assert_eq!(OperationId::parse("Install operation will continue"), None);
    }

    #[test]
    fn test_parse_admin_id() {
        let text = "Install operation 4.1.2 started by root";
        let id = OperationId::parse(text).unwrap();
        assert_eq!(id, OperationId::Admin("4.1.2".to_string()));
        assert_eq!(id.plane(), Plane::Admin);
        assert_eq!(
            OperationId::parse_in_plane("Install operation 3 ... Install operation 4.1.2", Plane::Admin),
            Some(id)
        );
        assert_eq!(
            OperationId::parse_in_plane("Install operation 4.1.2", Plane::User),
            None
        );
    }

    #[test]
    fn test_queries_prefix_admin() {
        let admin = OperationId::Admin("1.1.1".into());
        assert_eq!(
            status_query(&admin, Some(ShellMode::User)),
            "admin show install request"
        );
        assert_eq!(
            status_query(&admin, Some(ShellMode::Admin)),
            "show install request"
        );
        assert_eq!(
            install_log_query(&OperationId::User(8), Some(ShellMode::User)),
            "show install log 8 detail"
        );
    }

    #[test]
    fn test_bind_id_once() {
        let operation = Operation::new("install commit");
        assert!(operation.id().is_none());
        assert_eq!(
            operation.bind_id(OperationId::User(3)).unwrap(),
            OperationId::User(3)
        );
        assert!(operation.bind_id(OperationId::User(3)).is_ok());
        assert!(matches!(
            operation.bind_id(OperationId::User(4)),
            Err(InstallError::OperationIdReassigned { .. })
        ));
        assert_eq!(operation.id(), Some(&OperationId::User(3)));
    }

    #[test]
    fn test_state_transitions() {
        let mut operation = Operation::new("install activate id 2");
        assert_eq!(operation.state(), OperationState::Started);
        operation.transition(OperationState::Polling);
        assert!(!operation.state().is_terminal());
        operation.transition(OperationState::CompletedOk);
        assert!(operation.state().is_terminal());

        let outcome = OperationOutcome::from_operation(&operation, true);
        assert_eq!(outcome.state, OperationState::CompletedOk);
    }
}
