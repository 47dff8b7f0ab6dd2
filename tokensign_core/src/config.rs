//! 后端配置

use std::env;
use std::path::PathBuf;
use tracing::warn;

/// 欧盟信任列表的列表（LOTL）地址
pub const LOTL_URL: &str = "https://ec.europa.eu/tools/lotl/eu-lotl.xml";

/// 公布 LOTL 签名证书的官方公报地址
pub const OJ_URL: &str =
    "https://eur-lex.europa.eu/legal-content/EN/TXT/?uri=uriserv:OJ.C_.2019.276.01.0001.01.ENG";

/// 在线获取信任列表时使用的代理
pub const PROXY_URL: &str = "https://lotl-proxy.octosign.com/";

/// 默认时间戳服务地址
pub const DEFAULT_TSP_URL: &str = "http://timestamp.digicert.com";

/// 后端配置
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub lotl_url: String,
    pub oj_url: String,
    pub proxy_url: String,
    /// 固定信任根密钥库
    pub keystore_path: PathBuf,
    pub keystore_password: String,
    /// 信任列表文件缓存目录
    pub cache_dir: PathBuf,
    pub default_tsp_url: String,
    /// HTTP 请求超时（秒）
    pub http_timeout: u64,
    /// 传给验证库的日志级别
    pub engine_log_level: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            lotl_url: LOTL_URL.to_string(),
            oj_url: OJ_URL.to_string(),
            proxy_url: PROXY_URL.to_string(),
            keystore_path: PathBuf::from("keystore.p12"),
            keystore_password: "dss-password".to_string(),
            cache_dir: env::temp_dir().join("tokensign-tsl-cache"),
            default_tsp_url: DEFAULT_TSP_URL.to_string(),
            http_timeout: 30,
            engine_log_level: "warn".to_string(),
        }
    }
}

impl BackendConfig {
    /// 默认配置叠加环境变量
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(path) = env::var_os("TOKENSIGN_KEYSTORE") {
            config.keystore_path = PathBuf::from(path);
        }
        if let Some(dir) = env::var_os("TOKENSIGN_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(proxy) = env::var("TOKENSIGN_PROXY_URL") {
            config.proxy_url = proxy;
        }
        if let Ok(timeout) = env::var("TOKENSIGN_HTTP_TIMEOUT") {
            match timeout.parse() {
                Ok(secs) => config.http_timeout = secs,
                Err(_) => warn!("Ignoring invalid TOKENSIGN_HTTP_TIMEOUT: {}", timeout),
            }
        }
        if let Ok(level) = env::var("TOKENSIGN_ENGINE_LOG") {
            config.engine_log_level = level;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_config_default() {
        let config = BackendConfig::default();
        assert_eq!(config.lotl_url, LOTL_URL);
        assert_eq!(config.keystore_password, "dss-password");
        assert_eq!(config.default_tsp_url, "http://timestamp.digicert.com");
        assert!(config.cache_dir.ends_with("tokensign-tsl-cache"));
        assert_eq!(config.http_timeout, 30);
    }
}
