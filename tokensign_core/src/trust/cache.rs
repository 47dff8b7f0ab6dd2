//! 信任列表的两级文件缓存
//!
//! - 离线级：缓存永不过期，从不访问网络，作为种子和回退。
//! - 在线级：缓存立即过期，每次都重新下载并写回缓存目录。
//!
//! 缓存目录在进程之间共享且没有加锁，并发运行可能交错写入同一文件。

use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, FetcherFactory, HttpFetcher, ProxiedFetcher};
use crate::trust::TrustStore;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// 缓存文件名：非字母数字字符替换为 `_`，再接上地址 SHA-256 的前 16 位十六进制
pub fn cache_file_name(url: &str) -> String {
    let readable: String = url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("{}_{}", readable, &digest[..16])
}

/// 缓存目录
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// 打开缓存目录，不存在时创建
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(cache_file_name(url))
    }

    pub fn read(&self, url: &str) -> Option<Vec<u8>> {
        fs::read(self.path_for(url)).ok()
    }

    pub fn write(&self, url: &str, content: &[u8]) -> Result<()> {
        fs::write(self.path_for(url), content)?;
        Ok(())
    }

    /// 缓存文件的年龄，文件不存在时返回 `None`
    pub fn age(&self, url: &str) -> Option<Duration> {
        let modified = fs::metadata(self.path_for(url)).ok()?.modified().ok()?;
        Some(SystemTime::now().duration_since(modified).unwrap_or_default())
    }
}

/// 从不访问网络的获取器
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreFetcher;

impl Fetcher for IgnoreFetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        Err(Error::Network(format!("Offline, not fetching {}", url)))
    }
}

/// 带文件缓存的获取器
pub struct FileCacheLoader<F> {
    cache: FileCache,
    /// `None` 表示缓存永不过期
    expiration: Option<Duration>,
    fetcher: F,
}

impl FileCacheLoader<IgnoreFetcher> {
    /// 离线级：只读缓存
    pub fn offline(cache: FileCache) -> Self {
        Self {
            cache,
            expiration: None,
            fetcher: IgnoreFetcher,
        }
    }
}

impl<F: Fetcher> FileCacheLoader<F> {
    /// 在线级：每次都重新下载
    pub fn online(cache: FileCache, fetcher: F) -> Self {
        Self {
            cache,
            expiration: Some(Duration::ZERO),
            fetcher,
        }
    }

    fn is_fresh(&self, url: &str) -> bool {
        match (self.cache.age(url), self.expiration) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(age), Some(limit)) => age < limit,
        }
    }
}

impl<F: Fetcher> Fetcher for FileCacheLoader<F> {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        if self.is_fresh(url) {
            if let Some(content) = self.cache.read(url) {
                debug!("Cache hit for {}", url);
                return Ok(content);
            }
        }

        let content = self.fetcher.get(url)?;
        if let Err(e) = self.cache.write(url, &content) {
            warn!("Unable to cache {}: {}", url, e);
        }
        Ok(content)
    }
}

/// 先在线，失败时回退到离线缓存
pub struct TwoTierLoader<On, Off> {
    online: On,
    offline: Off,
}

impl<On: Fetcher, Off: Fetcher> TwoTierLoader<On, Off> {
    pub fn new(online: On, offline: Off) -> Self {
        Self { online, offline }
    }
}

impl<On: Fetcher, Off: Fetcher> Fetcher for TwoTierLoader<On, Off> {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        match self.online.get(url) {
            Ok(content) => Ok(content),
            Err(e) => {
                warn!("Online refresh of {} failed ({}), using offline cache", url, e);
                self.offline.get(url)
            }
        }
    }
}

/// 按配置构造两级缓存的 HTTP 获取器
///
/// 缓存目录和 HTTP 客户端在 `build` 时才创建，失败只影响需要信任列表的操作。
#[derive(Debug, Clone)]
pub struct CachedHttpFetchers {
    cache_dir: PathBuf,
    proxy_url: String,
    http_timeout: u64,
}

impl CachedHttpFetchers {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            proxy_url: config.proxy_url.clone(),
            http_timeout: config.http_timeout,
        }
    }
}

impl FetcherFactory for CachedHttpFetchers {
    fn build(&self) -> Result<Box<dyn Fetcher + '_>> {
        let cache = FileCache::new(&self.cache_dir).map_err(|e| {
            Error::Configuration(format!(
                "Unable to create cache directory {}: {}",
                self.cache_dir.display(),
                e
            ))
        })?;
        let http = HttpFetcher::new(self.http_timeout)?;
        debug!("Trusted list cache at {}", cache.dir().display());

        Ok(Box::new(TwoTierLoader::new(
            FileCacheLoader::online(cache.clone(), ProxiedFetcher::new(http, self.proxy_url.clone())),
            FileCacheLoader::offline(cache),
        )))
    }
}

/// 清理不再被引用的缓存条目
#[derive(Debug, Clone, Copy)]
pub struct CacheCleaner {
    pub clean_memory: bool,
    pub clean_file_system: bool,
}

impl Default for CacheCleaner {
    fn default() -> Self {
        Self {
            clean_memory: true,
            clean_file_system: true,
        }
    }
}

impl CacheCleaner {
    /// 删除 `referenced` 之外的缓存文件和内存条目，返回删除的文件数
    pub fn clean(&self, cache: &FileCache, store: &mut TrustStore, referenced: &BTreeSet<String>) -> usize {
        if self.clean_memory {
            store.retain_sources(referenced);
        }
        if !self.clean_file_system {
            return 0;
        }

        let keep: BTreeSet<String> = referenced.iter().map(|url| cache_file_name(url)).collect();
        let entries = match fs::read_dir(cache.dir()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Unable to list cache directory: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if keep.contains(&name) || !entry.path().is_file() {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Unable to remove stale cache file {}: {}", name, e),
            }
        }
        if removed > 0 {
            info!("Removed {} stale trusted list cache files", removed);
        }
        removed
    }
}
