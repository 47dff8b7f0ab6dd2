//! 文档签名
//!
//! 流程：查询宿主配置 → 打开令牌会话 → 选择私钥 → 计算待签数据 → 令牌签名 →
//! 嵌入签名 → 询问保存位置 → 写文件 → 输出 RESULT。

use crate::engine::{
    ContainerType, EngineError, SignatureEngine, SignatureLevel, SignaturePackaging,
    SignatureParameters, VerifierConfig,
};
use crate::error::{Error, Result};
use crate::protocol::{Channel, PromptKind, PromptRequest};
use crate::selector::select_key;
use crate::token::{open_session, SigningOptions, TokenProvider};
use crate::types::{DigestAlgorithm, KeyEntry};
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SAVE_QUESTION: &str = "Save signed file as";

/// 签名容器类型，按输入文件后缀选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFormat {
    /// PAdES，签名嵌入 PDF
    PdfEmbedded,
    /// XAdES，enveloped
    XmlEnveloped,
    /// CAdES 分离签名放入 ASiC-E 容器
    GenericArchiveContainer,
}

impl SignatureFormat {
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.ends_with(".pdf") {
            SignatureFormat::PdfEmbedded
        } else if name.ends_with(".xml") {
            SignatureFormat::XmlEnveloped
        } else {
            SignatureFormat::GenericArchiveContainer
        }
    }

    /// 构造签名参数：baseline-T、SHA-256、不做吊销检查
    pub fn parameters(&self, key: &KeyEntry, tsp_url: &str) -> SignatureParameters {
        let (level, packaging, container) = match self {
            SignatureFormat::PdfEmbedded => (SignatureLevel::PadesBaselineT, None, None),
            SignatureFormat::XmlEnveloped => (
                SignatureLevel::XadesBaselineT,
                Some(SignaturePackaging::Enveloped),
                None,
            ),
            SignatureFormat::GenericArchiveContainer => (
                SignatureLevel::CadesBaselineT,
                Some(SignaturePackaging::Detached),
                Some(ContainerType::AsicE),
            ),
        };

        SignatureParameters {
            format: *self,
            level,
            packaging,
            container,
            digest: DigestAlgorithm::Sha256,
            signing_certificate: key.certificate.clone(),
            certificate_chain: key.certificate_chain.clone(),
            verifier: VerifierConfig::ignore_all(),
            tsp_url: tsp_url.to_string(),
        }
    }

    /// 让保存路径的后缀与格式一致
    pub fn normalize_save_path(&self, path: &str) -> String {
        let already = match self {
            SignatureFormat::PdfEmbedded => path.ends_with(".pdf"),
            SignatureFormat::XmlEnveloped => path.ends_with(".xml"),
            SignatureFormat::GenericArchiveContainer => {
                path.ends_with(".sce") || path.ends_with(".asice")
            }
        };
        if already {
            return path.to_string();
        }

        let extension = match self {
            SignatureFormat::PdfEmbedded => ".pdf",
            SignatureFormat::XmlEnveloped => ".xml",
            SignatureFormat::GenericArchiveContainer => ".sce",
        };
        format!("{}{}", path, extension)
    }
}

fn signature_failure(e: EngineError) -> Error {
    Error::Signature(e.to_string())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// 对文档签名，成功时返回保存路径（RESULT 帧已写出）
pub fn sign_document<R: BufRead, W: Write>(
    channel: &mut Channel<R, W>,
    provider: &dyn TokenProvider,
    engine: &dyn SignatureEngine,
    document: &Path,
) -> Result<PathBuf> {
    let options = SigningOptions::query(channel)?;
    let format = SignatureFormat::from_path(document);
    info!(?format, "Signing {}", document.display());

    let (parameters, signed) = {
        let mut session = open_session(provider, &options.module_path, channel)?;
        let key = select_key(channel, session.list_keys()?)?;
        debug!("Signing with key {}", key.opaque_id);

        let parameters = format.parameters(&key, &options.tsp_url);
        let to_sign = engine
            .data_to_sign(document, &parameters)
            .map_err(signature_failure)?;
        let signature = session.sign(&to_sign, parameters.digest, &key)?;
        let signed = engine
            .sign_document(document, &parameters, &signature)
            .map_err(signature_failure)?;
        (parameters, signed)
    };

    let default = absolute(document)?;
    let request = PromptRequest::new(
        PromptKind::Save,
        SAVE_QUESTION,
        default.to_string_lossy(),
    );
    let chosen = channel.prompt(&request)?.ok_or_else(|| {
        Error::UserCancelled("Signed file path was not chosen.".to_string())
    })?;

    let path = PathBuf::from(parameters.format.normalize_save_path(&chosen));
    fs::write(&path, signed).map_err(|source| Error::Persistence {
        path: path.clone(),
        source,
    })?;

    info!("Signed document saved to {}", path.display());
    channel.result(&path.to_string_lossy())?;
    Ok(path)
}
