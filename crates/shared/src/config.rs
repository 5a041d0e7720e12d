//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 脚本运行时配置
///
/// 控制解释器池大小、单次执行超时以及每个解释器实例的资源上限。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// 池中保留的空闲解释器实例上限
    pub max_idle: usize,
    /// 单个脚本的执行超时（毫秒）
    pub timeout_ms: u64,
    /// 单次执行允许的最大操作数，0 表示不限制
    pub max_operations: u64,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            max_idle: 16,
            timeout_ms: 3_000,
            max_operations: 1_000_000,
            max_string_size: 1024 * 1024,
            max_array_size: 10_000,
            max_map_size: 10_000,
            max_call_levels: 32,
            max_expr_depth: 64,
        }
    }
}

/// 规则链执行配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// 没有任何规则匹配时返回的默认动作
    pub default_action: String,
    /// 是否回写规则执行计数
    pub record_executions: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            default_action: "allow".to_string(),
            record_executions: true,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 是否输出 JSON 格式日志
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub script: ScriptConfig,
    pub chain: ChainConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（RULE_ENGINE_ 前缀，双下划线分隔层级，
    ///    如 RULE_ENGINE_SCRIPT__TIMEOUT_MS -> script.timeout_ms）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::load_from(service_name, &config_dir)
    }

    /// 从指定目录加载配置
    pub fn load_from(service_name: &str, config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("RULE_ENGINE_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("RULE_ENGINE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.script.timeout_ms, 3_000);
        assert_eq!(config.script.max_idle, 16);
        assert_eq!(config.chain.default_action, "allow");
        assert!(config.chain.record_executions);
        assert!(!config.observability.json_logs);
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let config = AppConfig::load_from("rule-engine", "/nonexistent-config-dir").unwrap();
        assert_eq!(config.service_name, "rule-engine");
        assert_eq!(config.script.max_operations, 1_000_000);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_is_production() {
        let config = AppConfig {
            environment: "production".to_string(),
            ..Default::default()
        };
        assert!(config.is_production());
        assert!(!AppConfig::default().is_production());
    }
}
