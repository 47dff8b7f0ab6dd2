//! 签名库与验证库的协作接口
//!
//! 容器的二进制嵌入（PDF/XML/ASiC）、文档验证和信任列表的 XML 解析都由外部库完成，
//! 这里只定义调用边界。

use crate::signer::SignatureFormat;
use crate::trust::TrustStore;
use crate::types::{Certificate, DigestAlgorithm, Indication};
use std::path::Path;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

/// 协作库错误
#[derive(Debug, Error)]
pub enum EngineError {
    /// 库内部失败
    #[error("{0}")]
    Failed(String),

    /// 构建中未链接对应的库
    #[error("No {0} engine is linked into this build")]
    Unavailable(&'static str),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 协作库结果类型
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// 构造协作库时传入的设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// 库自身的日志级别
    pub log_level: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
        }
    }
}

/// 签名级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureLevel {
    PadesBaselineT,
    XadesBaselineT,
    CadesBaselineT,
}

/// 签名封装方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePackaging {
    Enveloped,
    Detached,
}

/// 容器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    AsicE,
}

/// 吊销检查方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationMode {
    /// 不获取任何 OCSP/CRL
    Ignore,
    /// 在线 OCSP 与 CRL
    Online,
}

/// 证书校验器配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    pub revocation: RevocationMode,
    /// 是否通过 AIA 下载签发者证书
    pub fetch_issuers: bool,
    /// 信任锚
    pub trusted: TrustStore,
}

impl VerifierConfig {
    /// 什么都不检查，只用于枚举签名中的证书或产生签名
    pub fn ignore_all() -> Self {
        Self {
            revocation: RevocationMode::Ignore,
            fetch_issuers: false,
            trusted: TrustStore::default(),
        }
    }

    /// 在线吊销检查并使用给定信任锚
    pub fn online(trusted: TrustStore) -> Self {
        Self {
            revocation: RevocationMode::Online,
            fetch_issuers: true,
            trusted,
        }
    }
}

/// 验证深度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationDepth {
    Basic,
    /// 要求时间戳存在且可信，但不要求长期验证材料
    Timestamps,
    LongTermData,
    ArchivalData,
}

/// 签名参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParameters {
    pub format: SignatureFormat,
    pub level: SignatureLevel,
    pub packaging: Option<SignaturePackaging>,
    pub container: Option<ContainerType>,
    pub digest: DigestAlgorithm,
    pub signing_certificate: Certificate,
    pub certificate_chain: Vec<Certificate>,
    pub verifier: VerifierConfig,
    /// 时间戳服务地址
    pub tsp_url: String,
}

/// 签名库
#[cfg_attr(test, mockall::automock)]
pub trait SignatureEngine {
    /// 计算待签数据
    fn data_to_sign(&self, document: &Path, parameters: &SignatureParameters) -> EngineResult<Vec<u8>>;

    /// 把签名值嵌入文档，返回签名后的文档
    fn sign_document(
        &self,
        document: &Path,
        parameters: &SignatureParameters,
        signature: &[u8],
    ) -> EngineResult<Vec<u8>>;
}

/// 文档中的一个签名及其引用的证书
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDescriptor {
    pub id: String,
    /// 签名及其时间戳中出现的所有证书的规范化主题
    pub certificate_subjects: Vec<String>,
}

/// 单个签名的验证结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOutcome {
    pub id: String,
    pub signed_by: String,
    pub indication: Indication,
    pub signing_time: Option<OffsetDateTime>,
    pub qualification: String,
    /// 证书链中各证书的名称，从签名证书开始
    pub chain: Vec<String>,
    pub errors: Vec<String>,
}

/// 文档验证结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub signature_count: usize,
    pub valid_signature_count: usize,
    pub signatures: Vec<SignatureOutcome>,
}

/// 验证库
#[cfg_attr(test, mockall::automock)]
pub trait DocumentValidator {
    fn signatures(&self, document: &Path, config: &VerifierConfig) -> EngineResult<Vec<SignatureDescriptor>>;

    fn validate(
        &self,
        document: &Path,
        config: &VerifierConfig,
        depth: ValidationDepth,
    ) -> EngineResult<ValidationOutcome>;
}

/// LOTL 中指向某国信任列表的指针
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedListPointer {
    pub country: String,
    pub url: String,
    /// 该国信任列表的合法签名者
    pub signers: Vec<Certificate>,
}

/// 解析后的 LOTL
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListOfTrustedLists {
    /// 签名在给定信任锚下是否有效
    pub signature_valid: bool,
    /// 公布签名证书的地址
    pub announcement_url: Option<String>,
    /// 该 LOTL 公布的后续签名证书
    pub announced_signers: Vec<Certificate>,
    /// 历史 LOTL 地址，从新到旧
    pub pivots: Vec<String>,
    pub pointers: Vec<TrustedListPointer>,
}

/// 信任列表中的一个服务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedService {
    pub name: String,
    pub certificate: Certificate,
}

/// 解析后的国家信任列表
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrustedList {
    pub signature_valid: bool,
    pub services: Vec<TrustedService>,
}

/// 信任列表解析库
#[cfg_attr(test, mockall::automock)]
pub trait TrustListEngine {
    /// 读取固定信任根密钥库
    fn open_keystore(&self, path: &Path, password: &str) -> EngineResult<Vec<Certificate>>;

    fn parse_list_of_lists(&self, document: &[u8], anchors: &[Certificate]) -> EngineResult<ListOfTrustedLists>;

    fn parse_trusted_list(&self, document: &[u8], signers: &[Certificate]) -> EngineResult<TrustedList>;
}

/// 未链接任何外部库时使用，所有调用都失败
#[derive(Debug, Clone, Default)]
pub struct UnlinkedEngine {
    settings: EngineSettings,
}

impl UnlinkedEngine {
    pub fn new(settings: EngineSettings) -> Self {
        debug!(log_level = %settings.log_level, "Using unlinked engine");
        Self { settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

impl SignatureEngine for UnlinkedEngine {
    fn data_to_sign(&self, _document: &Path, _parameters: &SignatureParameters) -> EngineResult<Vec<u8>> {
        Err(EngineError::Unavailable("signature"))
    }

    fn sign_document(
        &self,
        _document: &Path,
        _parameters: &SignatureParameters,
        _signature: &[u8],
    ) -> EngineResult<Vec<u8>> {
        Err(EngineError::Unavailable("signature"))
    }
}

impl DocumentValidator for UnlinkedEngine {
    fn signatures(&self, _document: &Path, _config: &VerifierConfig) -> EngineResult<Vec<SignatureDescriptor>> {
        Err(EngineError::Unavailable("validation"))
    }

    fn validate(
        &self,
        _document: &Path,
        _config: &VerifierConfig,
        _depth: ValidationDepth,
    ) -> EngineResult<ValidationOutcome> {
        Err(EngineError::Unavailable("validation"))
    }
}

impl TrustListEngine for UnlinkedEngine {
    fn open_keystore(&self, _path: &Path, _password: &str) -> EngineResult<Vec<Certificate>> {
        Err(EngineError::Unavailable("keystore"))
    }

    fn parse_list_of_lists(&self, _document: &[u8], _anchors: &[Certificate]) -> EngineResult<ListOfTrustedLists> {
        Err(EngineError::Unavailable("trusted list"))
    }

    fn parse_trusted_list(&self, _document: &[u8], _signers: &[Certificate]) -> EngineResult<TrustedList> {
        Err(EngineError::Unavailable("trusted list"))
    }
}
