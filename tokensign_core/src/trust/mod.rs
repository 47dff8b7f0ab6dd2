//! 按国家范围加载的信任存储
//!
//! 只获取待验证文档中证书所属国家的信任列表。

pub mod cache;
pub mod loader;

pub use cache::{CacheCleaner, CachedHttpFetchers, FileCache, FileCacheLoader, IgnoreFetcher, TwoTierLoader};
pub use loader::{TrustLoader, TrustSource};

use crate::engine::SignatureDescriptor;
use crate::types::{Certificate, TrustCountrySet};
use std::collections::{BTreeMap, BTreeSet};

/// 一个受信任的证书
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    pub certificate: Certificate,
    pub country: String,
    pub service_name: String,
    /// 来源信任列表地址
    pub source_url: String,
}

/// 证书标识到信任锚的映射
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustStore {
    anchors: BTreeMap<String, TrustAnchor>,
}

impl TrustStore {
    pub fn insert(&mut self, anchor: TrustAnchor) {
        self.anchors.insert(anchor.certificate.identity(), anchor);
    }

    pub fn is_trusted(&self, certificate: &Certificate) -> bool {
        self.anchors.contains_key(&certificate.identity())
    }

    pub fn get(&self, identity: &str) -> Option<&TrustAnchor> {
        self.anchors.get(identity)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn anchors(&self) -> impl Iterator<Item = &TrustAnchor> {
        self.anchors.values()
    }

    /// 已加载的国家
    pub fn countries(&self) -> TrustCountrySet {
        self.anchors.values().map(|a| a.country.clone()).collect()
    }

    /// 只保留来源仍被引用的条目
    pub fn retain_sources(&mut self, referenced: &BTreeSet<String>) {
        self.anchors.retain(|_, anchor| referenced.contains(&anchor.source_url));
    }
}

/// 从规范化主题中取出 `c=XX` 国家代码（大写）
pub fn country_of(canonicalized_subject: &str) -> Option<String> {
    dn_components(canonicalized_subject)
        .into_iter()
        .filter_map(|component| component.split_once('='))
        .find(|(kind, _)| kind.trim().eq_ignore_ascii_case("c"))
        .map(|(_, value)| value.trim())
        .filter(|value| value.len() == 2 && value.chars().all(|c| c.is_ascii_alphabetic()))
        .map(|value| value.to_ascii_uppercase())
}

/// 按未转义、未加引号的 `,` 和 `+` 切分 DN
fn dn_components(dn: &str) -> Vec<&str> {
    let mut components = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut quoted = false;
    for (i, c) in dn.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            ',' | '+' if !quoted => {
                components.push(&dn[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    components.push(&dn[start..]);
    components
}

/// 文档中所有签名及其时间戳涉及的国家
pub fn document_countries(signatures: &[SignatureDescriptor]) -> TrustCountrySet {
    signatures
        .iter()
        .flat_map(|signature| signature.certificate_subjects.iter())
        .filter_map(|subject| country_of(subject))
        .collect()
}
