//! 令牌签名后端核心库
//!
//! 通过行协议与宿主应用交互，提供：
//! - 使用 PKCS#11 令牌签名 PDF/XML/ASiC-E 文档
//! - 按国家范围加载欧盟信任列表并验证文档

pub mod certificate;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod pkcs11;
pub mod platform;
pub mod protocol;
pub mod selector;
pub mod signer;
pub mod token;
pub mod trust;
pub mod types;
pub mod verifier;

pub use config::BackendConfig;
pub use dispatcher::{Cli, Collaborators, Command, Dispatcher, EXIT_FAILURE, EXIT_OK};
pub use engine::{
    DocumentValidator, EngineError, EngineSettings, SignatureEngine, TrustListEngine, UnlinkedEngine,
};
pub use error::{Error, Result};
pub use fetch::{Fetcher, FetcherFactory, HttpFetcher, ProxiedFetcher};
pub use pkcs11::CryptokiProvider;
pub use protocol::{Channel, PromptKind, PromptOption, PromptRequest, Tag};
pub use signer::SignatureFormat;
pub use token::{TokenProvider, TokenSession};
pub use trust::{TrustStore, TwoTierLoader};
pub use types::*;
