//! 命令执行器
//!
//! 将子命令映射到引擎的实际操作。规则加载到内存仓储，
//! 运行时池与链配置来自 [`AppConfig`]。

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::chain::RuleChainExecutor;
use crate::models::{Rule, RuleContext, RuleResult};
use crate::repository::MemoryRuleRepository;
use crate::script::{RuntimePool, compile_template};
use crate::service::ContentValidator;
use rule_shared::config::AppConfig;

/// 单条规则的校验结论
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub code: String,
    pub error: Option<String>,
}

/// 命令执行器
pub struct CommandRunner {
    config: AppConfig,
}

impl CommandRunner {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// 执行 run 命令，返回链执行结果
    pub async fn run_chain(&self, rules_path: &Path, context_path: &Path) -> Result<RuleResult> {
        let rules = load_rules(rules_path)?;
        let ctx: RuleContext = read_json(context_path)?;

        let run_id = Uuid::now_v7();
        let span = info_span!("chain_run", %run_id, scope = %ctx.scope, trigger = ctx.trigger.as_str());

        async {
            info!(rule_count = rules.len(), "加载规则");
            let repository = MemoryRuleRepository::with_rules(rules).await?;
            let pool = RuntimePool::builder(self.config.script.clone()).build()?;
            let executor =
                RuleChainExecutor::new(Arc::new(repository), Arc::new(pool), self.config.chain.clone());

            let result = executor.execute(&ctx).await?;
            info!(
                status = result.status.as_str(),
                valid = result.valid,
                steps = result.execution_chain.len(),
                "规则链执行完成"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// 执行 validate 命令，逐条校验规则内容
    pub fn run_validate(&self, rules_path: &Path) -> Result<Vec<ValidationReport>> {
        let rules = load_rules(rules_path)?;
        let pool = RuntimePool::builder(self.config.script.clone()).build()?;
        let validator = ContentValidator::new(Arc::new(pool));

        let reports = rules
            .iter()
            .map(|rule| {
                let error = validator.validate_rule(rule).err().map(|e| e.to_string());
                if let Some(error) = &error {
                    warn!(rule_code = %rule.code, %error, "规则校验失败");
                }
                ValidationReport {
                    code: rule.code.clone(),
                    error,
                }
            })
            .collect();
        Ok(reports)
    }

    /// 执行 render 命令
    pub fn run_render(&self, template: &str, params: &str) -> Result<String> {
        let params: Map<String, Value> =
            serde_json::from_str(params).context("参数必须是 JSON 对象")?;
        Ok(compile_template(template, &params))
    }

    /// 分派子命令并输出结果
    pub async fn dispatch(&self, command: super::Commands) -> Result<()> {
        use super::Commands;

        match command {
            Commands::Run { rules, context } => {
                let result = self.run_chain(&rules, &context).await?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Commands::Validate { rules } => {
                let reports = self.run_validate(&rules)?;
                let mut failed = 0;
                for report in &reports {
                    match &report.error {
                        None => println!("ok      {}", report.code),
                        Some(error) => {
                            failed += 1;
                            println!("invalid {}: {}", report.code, error);
                        }
                    }
                }
                if failed > 0 {
                    bail!("{failed}/{} 条规则校验失败", reports.len());
                }
            }
            Commands::Render { template, params } => {
                println!("{}", self.run_render(&template, &params)?);
            }
        }
        Ok(())
    }
}

fn load_rules(path: &Path) -> Result<Vec<Rule>> {
    read_json(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("读取文件失败: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("解析 JSON 失败: {}", path.display()))
}
