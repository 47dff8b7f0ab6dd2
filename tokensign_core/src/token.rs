//! 令牌会话管理
//!
//! 每个进程只针对宿主配置的 PKCS#11 模块打开一次会话（第一个可用槽位），
//! 会话在任何退出路径上都会被释放。

use crate::error::{Error, Result};
use crate::protocol::Channel;
use crate::types::{DigestAlgorithm, KeyEntry};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 宿主配置项：模块路径
pub const OPTION_MODULE_PATH: &str = "pkcsPath";
/// 宿主配置项：模块路径（旧名称）
pub const OPTION_MODULE_PATH_LEGACY: &str = "dllPath";
/// 宿主配置项：时间戳服务地址
pub const OPTION_TSP_URL: &str = "tspUrl";

const PASSWORD_QUESTION: &str = "Please provide the key password.";

/// 令牌需要 PIN 时的回调
pub trait SecretCallback {
    fn secret(&mut self) -> Result<String>;
}

/// 通过宿主 `password` 提示获取 PIN
pub struct PasswordPrompt<'a, R, W> {
    channel: &'a mut Channel<R, W>,
}

impl<'a, R, W> PasswordPrompt<'a, R, W> {
    pub fn new(channel: &'a mut Channel<R, W>) -> Self {
        Self { channel }
    }
}

impl<R: BufRead, W: Write> SecretCallback for PasswordPrompt<'_, R, W> {
    fn secret(&mut self) -> Result<String> {
        self.channel.prompt_password(PASSWORD_QUESTION)
    }
}

/// 加密模块（外部协作方）
pub trait TokenProvider {
    /// 打开会话，失败时返回 `Error::DeviceCommunication`
    fn open(
        &self,
        module: &Path,
        secrets: &mut dyn SecretCallback,
        slot_index: usize,
    ) -> Result<Box<dyn TokenSession>>;
}

/// 已打开的令牌会话
pub trait TokenSession {
    fn list_keys(&mut self) -> Result<Vec<KeyEntry>>;

    /// 用 `key` 对 `data` 按 `digest` 签名，返回原始签名值
    fn sign(&mut self, data: &[u8], digest: DigestAlgorithm, key: &KeyEntry) -> Result<Vec<u8>>;

    fn close(&mut self);
}

/// 会话守卫，离开作用域时关闭会话
pub struct SessionGuard {
    session: Box<dyn TokenSession>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn TokenSession>) -> Self {
        Self { session }
    }

    /// 枚举私钥，失败统一视为设备通信错误
    pub fn list_keys(&mut self) -> Result<Vec<KeyEntry>> {
        self.session.list_keys().map_err(|e| match e {
            Error::UserCancelled(_) | Error::DeviceCommunication(_) => e,
            other => Error::DeviceCommunication(other.to_string()),
        })
    }

    pub fn sign(&mut self, data: &[u8], digest: DigestAlgorithm, key: &KeyEntry) -> Result<Vec<u8>> {
        self.session.sign(data, digest, key)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        debug!("Releasing token session");
        self.session.close();
    }
}

/// 宿主为签名提供的配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningOptions {
    pub module_path: PathBuf,
    pub tsp_url: String,
}

impl SigningOptions {
    /// 通过 GETOPTION 查询并校验，任何一项缺失都在打开会话之前中止
    pub fn query<R: BufRead, W: Write>(channel: &mut Channel<R, W>) -> Result<Self> {
        let module_path = match channel.option(OPTION_MODULE_PATH)? {
            Some(path) => Some(path),
            None => channel.option(OPTION_MODULE_PATH_LEGACY)?,
        };
        let tsp_url = channel.option(OPTION_TSP_URL)?;

        let module_path = module_path.map(PathBuf::from).ok_or_else(|| {
            Error::Configuration(
                "PKCS #11 library path is not configured. Please check Settings and Help.".to_string(),
            )
        })?;

        if !module_path.exists() {
            return Err(Error::Configuration(
                "PKCS #11 library doesn't exist. Please check Settings and Help.".to_string(),
            ));
        }

        let tsp_url = tsp_url.ok_or_else(|| {
            Error::Configuration("Timestamping server URL is not configured.".to_string())
        })?;

        Ok(Self {
            module_path,
            tsp_url,
        })
    }
}

/// 打开第一个可用槽位上的会话，PIN 通过宿主提示获取
pub fn open_session<R: BufRead, W: Write>(
    provider: &dyn TokenProvider,
    module: &Path,
    channel: &mut Channel<R, W>,
) -> Result<SessionGuard> {
    info!("Opening token session with module {}", module.display());
    let mut secrets = PasswordPrompt::new(channel);
    let session = provider.open(module, &mut secrets, 0)?;
    Ok(SessionGuard::new(session))
}


#[cfg(test)]
mod tests {
    use super::testing::FakeProvider;
    use super::*;
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    fn channel(input: String) -> Channel<Cursor<Vec<u8>>, Vec<u8>> {
        Channel::new(Cursor::new(input.into_bytes()), Vec::new())
    }

    fn option_answer(value: &str) -> String {
        format!("--GETOPTION--\n{}\n--GETOPTION--\n", value)
    }

    #[test]
    fn test_query_signing_options() {
        let module = NamedTempFile::new().unwrap();
        let input = option_answer(&module.path().display().to_string())
            + &option_answer("http://tsa.example");
        let options = SigningOptions::query(&mut channel(input)).unwrap();
        assert_eq!(options.module_path, module.path());
        assert_eq!(options.tsp_url, "http://tsa.example");
    }

    #[test]
    fn test_query_falls_back_to_legacy_key() {
        let module = NamedTempFile::new().unwrap();
        let input = option_answer("")
            + &option_answer(&module.path().display().to_string())
            + &option_answer("http://tsa.example");
        let mut ch = channel(input);
        let options = SigningOptions::query(&mut ch).unwrap();
        assert_eq!(options.module_path, module.path());

        let written = String::from_utf8(ch.into_inner().1).unwrap();
        assert!(written.contains("--GETOPTION--\npkcsPath\n--GETOPTION--"));
        assert!(written.contains("--GETOPTION--\ndllPath\n--GETOPTION--"));
    }

    #[test]
    fn test_missing_module_path_is_configuration_error() {
        let input = option_answer("") + &option_answer("") + &option_answer("http://tsa.example");
        let err = SigningOptions::query(&mut channel(input)).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("not configured")));
    }

    #[test]
    fn test_nonexistent_module_path_is_configuration_error() {
        let input = option_answer("/definitely/not/here/p11.so") + &option_answer("http://tsa.example");
        let err = SigningOptions::query(&mut channel(input)).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("doesn't exist")));
    }

    #[test]
    fn test_missing_tsp_url_is_configuration_error() {
        let module = NamedTempFile::new().unwrap();
        let input = option_answer(&module.path().display().to_string()) + &option_answer("");
        let err = SigningOptions::query(&mut channel(input)).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("Timestamping")));
    }

    #[test]
    fn test_open_session_forwards_password_prompt() {
        let provider = FakeProvider::new(Vec::new());
        let mut ch = channel("--PROMPT--\n1234\n--PROMPT--\n".to_string());
        {
            let _guard = open_session(&provider, Path::new("/p11.so"), &mut ch).unwrap();
            assert_eq!(provider.log.borrow().opened, 1);
            assert_eq!(provider.log.borrow().closed, 0);
        }
        assert_eq!(provider.log.borrow().closed, 1);
        assert_eq!(provider.log.borrow().secrets, vec!["1234".to_string()]);
    }

    #[test]
    fn test_empty_password_is_passed_through() {
        let provider = FakeProvider::new(Vec::new());
        let mut ch = channel("--PROMPT--\n\n--PROMPT--\n".to_string());
        open_session(&provider, Path::new("/p11.so"), &mut ch).unwrap();
        assert_eq!(provider.log.borrow().secrets, vec![String::new()]);
    }

    #[test]
    fn test_listing_failure_is_device_communication_error() {
        let mut provider = FakeProvider::new(Vec::new());
        provider.fail_listing = true;
        let mut ch = channel("--PROMPT--\n1234\n--PROMPT--\n".to_string());
        let mut guard = open_session(&provider, Path::new("/p11.so"), &mut ch).unwrap();
        assert!(matches!(guard.list_keys(), Err(Error::DeviceCommunication(_))));
    }
}
