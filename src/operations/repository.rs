//! 软件仓库地址解析
//!
//! - sftp / ftp 带密码：命令中去掉密码，等设备提示后单独发送
//! - `scp user:pass@server:/dir destination`：逐个拷贝后从目标位置添加
//! - 其余（tftp、http、设备本地路径）原样使用

use crate::engine::InstallError;
use std::fmt;
use url::Url;

#[derive(Clone, PartialEq, Eq)]
pub enum RepositoryUrl {
    Plain(String),
    Authenticated {
        url: String,
        password: String,
    },
    Scp {
        username: String,
        password: String,
        /// `server:/directory`
        server_directory: String,
        destination: String,
    },
}

impl RepositoryUrl {
    pub fn parse(raw: &str) -> Result<Self, InstallError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(InstallError::Configuration(
                "No repository provided".to_string(),
            ));
        }

        if raw.starts_with("sftp://") || raw.starts_with("ftp://") {
            return Self::parse_authenticated(raw);
        }
        if let Some(rest) = raw.strip_prefix("scp") {
            return Self::parse_scp(rest.trim_start());
        }
        Ok(RepositoryUrl::Plain(raw.to_string()))
    }

    fn parse_authenticated(raw: &str) -> Result<Self, InstallError> {
        let mut url = Url::parse(raw).map_err(|e| {
            InstallError::Configuration(format!("Invalid repository URL: {e}"))
        })?;
        let Some(password) = url.password().map(str::to_string) else {
            return Ok(RepositoryUrl::Plain(raw.to_string()));
        };
        url.set_password(None).map_err(|_| {
            InstallError::Configuration("Unable to strip password from repository URL".to_string())
        })?;
        Ok(RepositoryUrl::Authenticated {
            url: url.to_string(),
            password,
        })
    }

    fn parse_scp(rest: &str) -> Result<Self, InstallError> {
        let invalid = || {
            InstallError::Configuration(
                "Check if the SCP server repository is configured correctly".to_string(),
            )
        };

        let (credentials, location) = rest.split_once('@').ok_or_else(invalid)?;
        let (username, password) = credentials.split_once(':').ok_or_else(invalid)?;
        let (server_directory, destination) = location.split_once(' ').ok_or_else(invalid)?;
        let destination = destination.trim();

        if username.is_empty()
            || password.is_empty()
            || server_directory.is_empty()
            || destination.is_empty()
        {
            return Err(invalid());
        }

        Ok(RepositoryUrl::Scp {
            username: username.to_string(),
            password: password.to_string(),
            server_directory: server_directory.trim_end_matches('/').to_string(),
            destination: destination.to_string(),
        })
    }

    /// `install add source` 使用的来源
    pub fn source(&self) -> &str {
        match self {
            RepositoryUrl::Plain(url) => url,
            RepositoryUrl::Authenticated { url, .. } => url,
            RepositoryUrl::Scp { destination, .. } => destination,
        }
    }

    /// 单个软件包的 scp 拷贝命令
    pub fn scp_command(&self, package: &str) -> Option<String> {
        match self {
            RepositoryUrl::Scp {
                username,
                server_directory,
                destination,
                ..
            } => Some(format!(
                "scp {username}@{server_directory}/{package} {destination}"
            )),
            _ => None,
        }
    }
}

impl fmt::Debug for RepositoryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryUrl::Plain(url) => f.debug_tuple("Plain").field(url).finish(),
            RepositoryUrl::Authenticated { url, .. } => f
                .debug_struct("Authenticated")
                .field("url", url)
                .field("password", &"***")
                .finish(),
            RepositoryUrl::Scp {
                username,
                server_directory,
                destination,
                ..
            } => f
                .debug_struct("Scp")
                .field("username", username)
                .field("password", &"***")
                .field("server_directory", server_directory)
                .field("destination", destination)
                .finish(),
        }
    }
}
