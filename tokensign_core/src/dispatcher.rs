//! 操作分发
//!
//! 每个进程只执行一个操作：`meta`、`sign` 或 `verify`，由分发器决定退出码。

use crate::config::BackendConfig;
use crate::engine::{DocumentValidator, SignatureEngine, TrustListEngine};
use crate::error::{Error, Result};
use crate::fetch::FetcherFactory;
use crate::platform::detect_module_path;
use crate::protocol::Channel;
use crate::signer::sign_document;
use crate::token::{TokenProvider, OPTION_MODULE_PATH, OPTION_TSP_URL};
use crate::trust::{CacheCleaner, FileCache, TrustLoader, TrustSource};
use crate::verifier::verify_document;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// 成功退出码
pub const EXIT_OK: i32 = 0;
/// 任何已处理失败的退出码
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Parser)]
#[command(name = "tokensign")]
#[command(about = "Headless document signing and verification backend", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// 报告模块路径探测结果与支持的配置项
    Meta,
    /// 使用令牌对文档签名
    Sign {
        /// 待签名文档
        path: PathBuf,
    },
    /// 验证文档中的签名
    Verify {
        /// 待验证文档
        path: PathBuf,
    },
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Meta => "meta",
            Command::Sign { .. } => "sign",
            Command::Verify { .. } => "verify",
        }
    }
}

/// meta 的 RESULT 载荷
pub fn meta_payload(detected: Option<&str>, default_tsp_url: &str) -> String {
    format!(
        "{}\nOPTIONS:{}\"PKCS #11/#12 Path\"(\"{}\") {}\"Timestamping Server URL\"(\"{}\")",
        if detected.is_some() { "OK" } else { "UNDETECTED" },
        OPTION_MODULE_PATH,
        detected.unwrap_or_default(),
        OPTION_TSP_URL,
        default_tsp_url
    )
}

/// 操作所需的外部协作者
pub struct Collaborators<'a> {
    pub provider: &'a dyn TokenProvider,
    pub signer: &'a dyn SignatureEngine,
    pub validator: &'a dyn DocumentValidator,
    pub trust_engine: &'a dyn TrustListEngine,
    /// 信任列表获取器的工厂，只在验证时构造
    pub fetcher: &'a dyn FetcherFactory,
}

/// 操作分发器
pub struct Dispatcher<'a> {
    config: BackendConfig,
    collaborators: Collaborators<'a>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(config: BackendConfig, collaborators: Collaborators<'a>) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// 解析参数并执行一个操作，返回进程退出码
    pub fn run<I, T, R, W>(&self, args: I, channel: &mut Channel<R, W>) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
        R: BufRead,
        W: Write,
    {
        let cli = match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(e) if e.use_stderr() => {
                let usage = Error::Usage(e.render().to_string());
                warn!("Invalid arguments");
                eprint!("{}", usage);
                return EXIT_FAILURE;
            }
            Err(e) => {
                // stdout 只留给协议帧
                eprint!("{}", e.render());
                return EXIT_OK;
            }
        };

        let verb = cli.command.verb();
        info!(verb, "Dispatching operation");
        match self.execute(&cli.command, channel) {
            Ok(()) => EXIT_OK,
            Err(e) => {
                error!(verb, detail = ?e.detail(), "Operation failed: {}", e);
                eprintln!("{}", e);
                EXIT_FAILURE
            }
        }
    }

    /// 执行已解析的操作
    pub fn execute<R: BufRead, W: Write>(&self, command: &Command, channel: &mut Channel<R, W>) -> Result<()> {
        match command {
            Command::Meta => self.meta(channel),
            Command::Sign { path } => {
                sign_document(channel, self.collaborators.provider, self.collaborators.signer, path)?;
                Ok(())
            }
            Command::Verify { path } => self.verify(channel, path),
        }
    }

    fn meta<R: BufRead, W: Write>(&self, channel: &mut Channel<R, W>) -> Result<()> {
        let payload = meta_payload(detect_module_path(), &self.config.default_tsp_url);
        channel.result(&payload)
    }

    fn verify<R: BufRead, W: Write>(&self, channel: &mut Channel<R, W>, path: &Path) -> Result<()> {
        let fetcher = self.collaborators.fetcher.build()?;
        let mut loader = TrustLoader::new(
            TrustSource::from_config(&self.config),
            self.collaborators.trust_engine,
            &*fetcher,
        );
        match FileCache::new(&self.config.cache_dir) {
            Ok(cache) => loader = loader.with_cleaner(CacheCleaner::default(), cache),
            Err(e) => warn!("Trusted list cache cleanup disabled: {}", e),
        }

        verify_document(channel, self.collaborators.validator, &loader, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineSettings, UnlinkedEngine};
    use crate::fetch::{Fetcher, MockFetcher};
    use crate::token::testing::FakeProvider;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn channel(input: &str) -> Channel<Cursor<Vec<u8>>, Vec<u8>> {
        Channel::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn output(channel: Channel<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8(channel.into_inner().1).unwrap()
    }

    fn config(cache: &TempDir) -> BackendConfig {
        BackendConfig {
            cache_dir: cache.path().to_path_buf(),
            ..BackendConfig::default()
        }
    }

    struct Fixture {
        provider: FakeProvider,
        engine: UnlinkedEngine,
        fetcher: MockFetcher,
        cache: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let mut fetcher = MockFetcher::new();
            fetcher.expect_get().never();
            Self {
                provider: FakeProvider::new(Vec::new()),
                engine: UnlinkedEngine::new(EngineSettings::default()),
                fetcher,
                cache: TempDir::new().unwrap(),
            }
        }

        fn dispatcher(&self) -> Dispatcher<'_> {
            Dispatcher::new(
                config(&self.cache),
                Collaborators {
                    provider: &self.provider,
                    signer: &self.engine,
                    validator: &self.engine,
                    trust_engine: &self.engine,
                    fetcher: &self.fetcher,
                },
            )
        }
    }

    #[test]
    fn test_meta_payload() {
        assert_eq!(
            meta_payload(Some("/usr/lib/eac_mw_klient/libpkcs11_x64.so"), "http://timestamp.digicert.com"),
            "OK\nOPTIONS:pkcsPath\"PKCS #11/#12 Path\"(\"/usr/lib/eac_mw_klient/libpkcs11_x64.so\") \
             tspUrl\"Timestamping Server URL\"(\"http://timestamp.digicert.com\")"
        );
        assert!(meta_payload(None, "http://tsa.test").starts_with("UNDETECTED\nOPTIONS:pkcsPath\"PKCS #11/#12 Path\"(\"\")"));
    }

    #[test]
    fn test_meta_always_succeeds() {
        let fixture = Fixture::new();
        let mut channel = channel("");
        assert_eq!(fixture.dispatcher().run(["tokensign", "meta"], &mut channel), EXIT_OK);

        let out = output(channel);
        assert!(out.starts_with("--RESULT--\n"));
        assert!(out.contains("OPTIONS:pkcsPath"));
        assert!(out.ends_with("--RESULT--\n"));
    }

    #[test]
    fn test_usage_errors_exit_with_failure() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher();

        let mut channel = channel("");
        assert_eq!(dispatcher.run(["tokensign"], &mut channel), EXIT_FAILURE);
        assert_eq!(dispatcher.run(["tokensign", "stamp", "a.pdf"], &mut channel), EXIT_FAILURE);
        assert_eq!(dispatcher.run(["tokensign", "sign"], &mut channel), EXIT_FAILURE);
        assert!(output(channel).is_empty());
    }

    #[test]
    fn test_verify_unsupported_document_is_unknown() {
        let fixture = Fixture::new();
        let mut channel = channel("");
        assert_eq!(
            fixture.dispatcher().run(["tokensign", "verify", "report.docx"], &mut channel),
            EXIT_OK
        );
        assert_eq!(output(channel), "--RESULT--\nUNKNOWN\n--RESULT--\n");
    }

    #[test]
    fn test_verify_without_validation_engine_fails() {
        let fixture = Fixture::new();
        let mut channel = channel("");
        assert_eq!(
            fixture.dispatcher().run(["tokensign", "verify", "signed.pdf"], &mut channel),
            EXIT_FAILURE
        );
        assert!(output(channel).is_empty());
    }

    #[test]
    fn test_sign_cancelled_when_host_closes_stream() {
        let fixture = Fixture::new();
        let mut channel = channel("");
        assert_eq!(
            fixture.dispatcher().run(["tokensign", "sign", "contract.pdf"], &mut channel),
            EXIT_FAILURE
        );
        assert_eq!(output(channel), "--GETOPTION--\npkcsPath\n--GETOPTION--\n");
        assert_eq!(fixture.provider.log.borrow().opened, 0);
    }

    /// 构造时总是失败的获取器工厂
    struct BrokenFactory;

    impl FetcherFactory for BrokenFactory {
        fn build(&self) -> Result<Box<dyn Fetcher + '_>> {
            Err(Error::Configuration("Unable to create cache directory".to_string()))
        }
    }

    #[test]
    fn test_only_verify_needs_the_fetcher() {
        let fixture = Fixture::new();
        let dispatcher = Dispatcher::new(
            config(&fixture.cache),
            Collaborators {
                provider: &fixture.provider,
                signer: &fixture.engine,
                validator: &fixture.engine,
                trust_engine: &fixture.engine,
                fetcher: &BrokenFactory,
            },
        );

        let mut meta = channel("");
        assert_eq!(dispatcher.run(["tokensign", "meta"], &mut meta), EXIT_OK);
        assert!(output(meta).starts_with("--RESULT--\n"));

        let mut verify = channel("");
        assert_eq!(dispatcher.run(["tokensign", "verify", "signed.pdf"], &mut verify), EXIT_FAILURE);
        assert!(output(verify).is_empty());
    }

    #[test]
    fn test_help_keeps_protocol_channel_clean() {
        let fixture = Fixture::new();
        let mut channel = channel("");
        assert_eq!(fixture.dispatcher().run(["tokensign", "--help"], &mut channel), EXIT_OK);
        assert_eq!(fixture.dispatcher().run(["tokensign", "--version"], &mut channel), EXIT_OK);
        assert!(output(channel).is_empty());
    }

    #[test]
    fn test_command_verbs() {
        assert_eq!(Command::Meta.verb(), "meta");
        assert_eq!(Command::Sign { path: PathBuf::from("a") }.verb(), "sign");
        assert_eq!(Command::Verify { path: PathBuf::from("a") }.verb(), "verify");
    }
}
