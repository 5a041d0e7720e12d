//! Rule Engine CLI
//!
//! 规则引擎的命令行入口点。

use clap::Parser;
use rule_engine::cli::{Cli, CommandRunner};
use rule_shared::config::AppConfig;
use rule_shared::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 配置文件缺失或格式错误时退回默认配置，离线调试不依赖配置目录
    let loaded = match &cli.config_dir {
        Some(dir) => AppConfig::load_from("rule-engine", dir),
        None => AppConfig::load("rule-engine"),
    };
    let (mut config, load_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    if config.service_name.is_empty() {
        config.service_name = "rule-engine".to_string();
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    observability::init(&config.service_name, &config.observability)?;
    if let Some(e) = load_error {
        tracing::warn!(error = %e, "配置加载失败，使用默认配置");
    }

    CommandRunner::new(config).dispatch(cli.command).await
}
