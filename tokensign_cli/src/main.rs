//! 令牌签名后端命令行入口
//!
//! stdout 只承载协议帧，日志写入 stderr。

use std::io;
use tokensign_core::trust::CachedHttpFetchers;
use tokensign_core::{
    BackendConfig, Channel, Collaborators, CryptokiProvider, Dispatcher, EngineSettings, UnlinkedEngine,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TOKENSIGN_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let config = BackendConfig::from_env();
    let fetchers = CachedHttpFetchers::from_config(&config);
    let provider = CryptokiProvider::new();
    let engine = UnlinkedEngine::new(EngineSettings {
        log_level: config.engine_log_level.clone(),
    });

    let dispatcher = Dispatcher::new(
        config,
        Collaborators {
            provider: &provider,
            signer: &engine,
            validator: &engine,
            trust_engine: &engine,
            fetcher: &fetchers,
        },
    );

    let stdin = io::stdin();
    let mut channel = Channel::new(stdin.lock(), io::stdout());
    let code = dispatcher.run(std::env::args_os(), &mut channel);
    std::process::exit(code);
}
