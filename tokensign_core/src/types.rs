//! 数据类型定义

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use time::OffsetDateTime;

/// X.509 证书（已解码的必要字段）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// DER 编码
    pub der: Vec<u8>,
    /// 主题 DN，RFC 2253 字符串形式
    pub subject: String,
    /// 序列号（大端字节）
    pub serial: Vec<u8>,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Certificate {
    /// 证书标识：`C-` 加 DER 的 SHA-256 十六进制（大写）
    pub fn identity(&self) -> String {
        format!("C-{}", hex::encode_upper(Sha256::digest(&self.der)))
    }

    /// 十六进制序列号，去掉前导零
    pub fn serial_hex(&self) -> String {
        let encoded = hex::encode(&self.serial);
        let trimmed = encoded.trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

/// 令牌中的一个私钥条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    /// 宿主选择时使用的不透明标识
    pub opaque_id: String,
    pub certificate: Certificate,
    /// 证书链，从签名证书开始
    pub certificate_chain: Vec<Certificate>,
}

impl KeyEntry {
    pub fn new(certificate: Certificate, certificate_chain: Vec<Certificate>) -> Self {
        Self {
            opaque_id: certificate.identity(),
            certificate,
            certificate_chain,
        }
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.certificate.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.certificate.not_after
    }
}

/// 摘要算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => f.write_str("SHA256"),
        }
    }
}

/// 参与验证的国家代码集合（ISO 3166 两位大写）
pub type TrustCountrySet = BTreeSet<String>;

/// 文档整体验证状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Unsigned,
    Signed,
    Invalid,
    Unknown,
}

impl ValidationStatus {
    /// 由签名总数与有效签名数决定
    pub fn classify(signature_count: usize, valid_signature_count: usize) -> Self {
        if signature_count == 0 {
            ValidationStatus::Unsigned
        } else if signature_count == valid_signature_count {
            ValidationStatus::Signed
        } else if valid_signature_count < signature_count {
            ValidationStatus::Invalid
        } else {
            ValidationStatus::Unknown
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            ValidationStatus::Unsigned => "UNSIGNED",
            ValidationStatus::Signed => "SIGNED",
            ValidationStatus::Invalid => "INVALID",
            ValidationStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// 验证库给出的四类结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indication {
    TotalPassed,
    Passed,
    TotalFailed,
    Failed,
    Indeterminate,
    NoSignatureFound,
}

/// 展示给用户的有效性标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidityLabel {
    Valid,
    Invalid,
    Indeterminate,
    Unknown,
}

impl From<Indication> for ValidityLabel {
    fn from(indication: Indication) -> Self {
        match indication {
            Indication::TotalPassed | Indication::Passed => ValidityLabel::Valid,
            Indication::TotalFailed | Indication::Failed => ValidityLabel::Invalid,
            Indication::Indeterminate => ValidityLabel::Indeterminate,
            _ => ValidityLabel::Unknown,
        }
    }
}

impl fmt::Display for ValidityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValidityLabel::Valid => "Valid",
            ValidityLabel::Invalid => "Invalid",
            ValidityLabel::Indeterminate => "Indeterminate",
            ValidityLabel::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// 单个签名的验证摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureSummary {
    pub signer_name: String,
    pub validity: ValidityLabel,
    pub signing_time: Option<OffsetDateTime>,
    pub qualification: String,
    pub chain_names: Vec<String>,
    pub problems: Vec<String>,
}

/// 验证报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub status: ValidationStatus,
    pub per_signature: Vec<SignatureSummary>,
}

impl ValidationReport {
    /// 不经验证直接得出状态的报告
    pub fn bare(status: ValidationStatus) -> Self {
        Self {
            status,
            per_signature: Vec::new(),
        }
    }
}
