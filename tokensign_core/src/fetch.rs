//! 网络获取

use crate::error::{Error, Result};
use reqwest::Client;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// 同步 GET
#[cfg_attr(test, mockall::automock)]
pub trait Fetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        (**self).get(url)
    }
}

/// 按需构造获取器，只有真正需要网络或缓存的操作才会调用
pub trait FetcherFactory {
    fn build(&self) -> Result<Box<dyn Fetcher + '_>>;
}

impl<F: Fetcher> FetcherFactory for F {
    fn build(&self) -> Result<Box<dyn Fetcher + '_>> {
        Ok(Box::new(self))
    }
}

/// 基于 reqwest 的 HTTP(S) 获取，由单线程运行时驱动
pub struct HttpFetcher {
    http_client: Client,
    runtime: Runtime,
}

impl HttpFetcher {
    /// 创建实例，`timeout` 为秒数
    pub fn new(timeout: u64) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| Error::Network(format!("HTTP client: {}", e)))?;
        let runtime = Builder::new_current_thread().enable_all().build()?;

        Ok(Self {
            http_client,
            runtime,
        })
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        self.runtime.block_on(async {
            let response = self
                .http_client
                .get(url)
                .send()
                .await
                .map_err(|e| Error::Network(format!("Failed to connect to {}: {}", url, e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::Network(format!("HTTP {} from {}", status, url)));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| Error::Network(format!("Failed to read body from {}: {}", url, e)))?;
            Ok(body.to_vec())
        })
    }
}

/// 把请求改写为经过代理：`<proxy>fetch?url=<原地址>`
pub struct ProxiedFetcher<F> {
    inner: F,
    proxy_url: String,
}

impl<F: Fetcher> ProxiedFetcher<F> {
    pub fn new(inner: F, proxy_url: impl Into<String>) -> Self {
        Self {
            inner,
            proxy_url: proxy_url.into(),
        }
    }

    pub fn proxied(&self, url: &str) -> String {
        format!("{}fetch?url={}", self.proxy_url, url)
    }
}

impl<F: Fetcher> Fetcher for ProxiedFetcher<F> {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.inner.get(&self.proxied(url))
    }
}
