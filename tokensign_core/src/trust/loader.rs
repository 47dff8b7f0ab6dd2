//! 信任列表加载

use crate::config::BackendConfig;
use crate::engine::{ListOfTrustedLists, TrustListEngine};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::trust::cache::{CacheCleaner, FileCache};
use crate::trust::{TrustAnchor, TrustStore};
use crate::types::{Certificate, TrustCountrySet};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// 根列表（LOTL）来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustSource {
    pub url: String,
    /// 固定信任根密钥库
    pub keystore_path: PathBuf,
    pub keystore_password: String,
    /// 只接受在此地址公布的签名证书
    pub announcement_url: String,
    /// 是否沿历史 LOTL 轮换签名证书
    pub pivot_support: bool,
}

impl TrustSource {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            url: config.lotl_url.clone(),
            keystore_path: config.keystore_path.clone(),
            keystore_password: config.keystore_password.clone(),
            announcement_url: config.oj_url.clone(),
            pivot_support: true,
        }
    }
}

/// 按国家范围物化信任存储
pub struct TrustLoader<'a> {
    source: TrustSource,
    engine: &'a dyn TrustListEngine,
    loader: &'a dyn Fetcher,
    cleaner: Option<(CacheCleaner, FileCache)>,
}

impl<'a> TrustLoader<'a> {
    pub fn new(source: TrustSource, engine: &'a dyn TrustListEngine, loader: &'a dyn Fetcher) -> Self {
        Self {
            source,
            engine,
            loader,
            cleaner: None,
        }
    }

    /// 刷新后用 `cleaner` 清理 `cache`
    pub fn with_cleaner(mut self, cleaner: CacheCleaner, cache: FileCache) -> Self {
        self.cleaner = Some((cleaner, cache));
        self
    }

    /// 只加载 `countries` 中国家的信任列表
    ///
    /// 密钥库无法读取是致命错误；其余下载或解析失败只记录警告，对应国家不被信任。
    pub fn load(&self, countries: &TrustCountrySet) -> Result<TrustStore> {
        let anchors = self
            .engine
            .open_keystore(&self.source.keystore_path, &self.source.keystore_password)
            .map_err(|e| Error::TrustAnchorCorrupted(e.to_string()))?;
        debug!("Loaded {} pinned LOTL signing certificates", anchors.len());

        let mut store = TrustStore::default();

        let Some(lotl) = self.refresh_lotl(anchors) else {
            return Ok(store);
        };

        for pointer in lotl
            .pointers
            .iter()
            .filter(|p| countries.contains(&p.country.to_ascii_uppercase()))
        {
            let content = match self.loader.get(&pointer.url) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Unable to fetch trusted list of {}: {}", pointer.country, e);
                    continue;
                }
            };

            let list = match self.engine.parse_trusted_list(&content, &pointer.signers) {
                Ok(list) if list.signature_valid => list,
                Ok(_) => {
                    warn!("Trusted list of {} has an invalid signature", pointer.country);
                    continue;
                }
                Err(e) => {
                    warn!("Unable to parse trusted list of {}: {}", pointer.country, e);
                    continue;
                }
            };

            debug!("{} trusted services for {}", list.services.len(), pointer.country);
            for service in list.services {
                store.insert(TrustAnchor {
                    certificate: service.certificate,
                    country: pointer.country.to_ascii_uppercase(),
                    service_name: service.name,
                    source_url: pointer.url.clone(),
                });
            }
        }

        if let Some((cleaner, cache)) = &self.cleaner {
            let mut referenced: BTreeSet<String> = BTreeSet::new();
            referenced.insert(self.source.url.clone());
            referenced.extend(lotl.pivots.iter().cloned());
            referenced.extend(lotl.pointers.iter().map(|p| p.url.clone()));
            cleaner.clean(cache, &mut store, &referenced);
        }

        info!(
            "Trust store ready: {} anchors for {:?}",
            store.len(),
            store.countries()
        );
        Ok(store)
    }

    /// 获取并校验 LOTL，签名无效、公告地址不符或无法获取时返回 `None`
    fn refresh_lotl(&self, pinned: Vec<Certificate>) -> Option<ListOfTrustedLists> {
        let content = match self.loader.get(&self.source.url) {
            Ok(content) => content,
            Err(e) => {
                warn!("Unable to fetch LOTL: {}", e);
                return None;
            }
        };

        let mut lotl = match self.engine.parse_list_of_lists(&content, &pinned) {
            Ok(lotl) => lotl,
            Err(e) => {
                warn!("Unable to parse LOTL: {}", e);
                return None;
            }
        };

        if self.source.pivot_support && !lotl.pivots.is_empty() {
            let anchors = self.follow_pivots(pinned, &lotl.pivots);
            lotl = match self.engine.parse_list_of_lists(&content, &anchors) {
                Ok(lotl) => lotl,
                Err(e) => {
                    warn!("Unable to parse LOTL: {}", e);
                    return None;
                }
            };
        }

        if !lotl.signature_valid {
            warn!("LOTL signature is not valid under the announced signing certificates");
            return None;
        }
        if lotl.announcement_url.as_deref() != Some(self.source.announcement_url.as_str()) {
            warn!(
                announced = ?lotl.announcement_url,
                "LOTL does not point to the pinned Official Journal announcement"
            );
            return None;
        }
        Some(lotl)
    }

    /// 从最旧的 pivot 开始依次轮换签名证书
    fn follow_pivots(&self, mut anchors: Vec<Certificate>, pivots: &[String]) -> Vec<Certificate> {
        for url in pivots.iter().rev() {
            let pivot = match self
                .loader
                .get(url)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    self.engine
                        .parse_list_of_lists(&content, &anchors)
                        .map_err(|e| e.to_string())
                }) {
                Ok(pivot) => pivot,
                Err(e) => {
                    warn!("Skipping pivot {}: {}", url, e);
                    continue;
                }
            };

            let announced = pivot.announcement_url.as_deref() == Some(self.source.announcement_url.as_str());
            if pivot.signature_valid && announced && !pivot.announced_signers.is_empty() {
                debug!("Pivot {} rotates LOTL signers", url);
                anchors = pivot.announced_signers;
            } else {
                warn!("Pivot {} not accepted", url);
            }
        }
        anchors
    }
}
