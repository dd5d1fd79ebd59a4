// error.rs
// 定义启动器通用的错误类型（IO、配置、启动、模板、JSON等）和Result类型。
use std::fmt;
use std::io;

/// 启动器通用错误类型
#[derive(Debug)]
pub enum Error {
    /// IO错误
    Io(io::Error),
    /// JSON 解析/序列化错误
    Json(serde_json::Error),
    /// 配置错误（配置文件缺失、字段非法等）
    ConfigError(String),
    /// 外部进程启动失败
    LaunchError(String),
    /// 对话模板错误
    TemplateError(String),
    /// 其他类型错误
    Other(String),
}

/// 通用结果类型
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO错误: {}", e),
            Error::Json(e) => write!(f, "JSON错误: {}", e),
            Error::ConfigError(msg) => write!(f, "配置错误: {}", msg),
            Error::LaunchError(msg) => write!(f, "启动错误: {}", msg),
            Error::TemplateError(msg) => write!(f, "模板错误: {}", msg),
            Error::Other(msg) => write!(f, "其他错误: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}
