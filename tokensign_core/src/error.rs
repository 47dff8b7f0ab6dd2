//! 错误类型定义

use std::path::PathBuf;
use thiserror::Error;

/// 错误类型
///
/// 每个变体的 `Display` 就是写往 stderr 的诊断信息，宿主会原样展示给用户。
#[derive(Debug, Error)]
pub enum Error {
    /// 命令行用法错误
    #[error("{0}")]
    Usage(String),

    /// 配置错误（模块路径、时间戳地址缺失或无效）
    #[error("{0}")]
    Configuration(String),

    /// 与令牌设备通信失败
    #[error("Communication with device failed.")]
    DeviceCommunication(String),

    /// 用户取消（提示无应答或输入流提前结束）
    #[error("{0}")]
    UserCancelled(String),

    /// 无法确定签名用的证书
    #[error("Certificate was not chosen.")]
    KeySelection,

    /// 签名结果保存失败
    #[error("There was an error saving the signed document.")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 信任根密钥库无法读取
    #[error("Unable to load EU LOTL Certificate.\nThis is probably due to corrupted installation.")]
    TrustAnchorCorrupted(String),

    /// 摘要、签名或嵌入失败
    #[error("Using of the PKCS #11 library failed.")]
    Signature(String),

    /// 网络错误
    #[error("Network error: {0}")]
    Network(String),

    /// 验证库失败
    #[error("Validation of the document failed: {0}")]
    Validation(String),

    /// 帧载荷格式错误
    #[error("Malformed protocol payload: {0}")]
    Protocol(String),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// 附带的内部细节，只写入日志
    pub fn detail(&self) -> Option<String> {
        match self {
            Error::DeviceCommunication(d)
            | Error::TrustAnchorCorrupted(d)
            | Error::Signature(d) => Some(d.clone()),
            Error::Persistence { path, source } => Some(format!("{}: {}", path.display(), source)),
            _ => None,
        }
    }
}

/// 结果类型
pub type Result<T> = std::result::Result<T, Error>;
