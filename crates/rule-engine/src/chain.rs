//! 规则链执行器
//!
//! 解析匹配规则，按优先级降序依次执行，前一条规则修改后的上下文作为下一条的输入。
//! 任一规则不通过即停止：业务失败或结构性错误记为 Failed，超时、崩溃等记为 Aborted。

use chrono::Utc;
use rule_shared::config::ChainConfig;
use rule_shared::observability::metrics as rule_metrics;
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, RuleError};
use crate::evaluator::{ConditionEvaluator, FormulaValue, FormulaEvaluator};
use crate::matcher::RuleMatcher;
use crate::models::{ChainStatus, Rule, RuleContext, RuleExecutionStep, RuleResult, RuleType};
use crate::repository::RuleRepository;
use crate::script::RuntimePool;

/// 规则失败且未给出动作时使用的动作
pub const DENY_ACTION: &str = "deny";

/// 条件不成立时的原因码
pub const CONDITION_NOT_MET: &str = "CONDITION_NOT_MET";

/// 单条规则的内容执行结果
#[derive(Debug, Default)]
struct StrategyOutcome {
    valid: bool,
    action: String,
    error: String,
    error_reason: String,
    variables: Map<String, Value>,
    /// 规则执行后的上下文
    output: Map<String, Value>,
}

/// 规则链执行器
pub struct RuleChainExecutor {
    matcher: RuleMatcher,
    repository: Arc<dyn RuleRepository>,
    pool: Arc<RuntimePool>,
    config: ChainConfig,
}

impl RuleChainExecutor {
    pub fn new(repository: Arc<dyn RuleRepository>, pool: Arc<RuntimePool>, config: ChainConfig) -> Self {
        Self {
            matcher: RuleMatcher::new(repository.clone()),
            repository,
            pool,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<RuntimePool> {
        &self.pool
    }

    /// 为上下文解析并执行规则链
    ///
    /// 没有匹配的规则不是错误：返回成功、默认动作和空链。
    #[instrument(skip(self, ctx), fields(scope = %ctx.scope, trigger = %ctx.trigger, timing = %ctx.execution_timing))]
    pub async fn execute(&self, ctx: &RuleContext) -> Result<RuleResult> {
        let rules = self.matcher.find_matching(ctx).await?;
        if rules.is_empty() {
            debug!("没有匹配的规则");
            rule_metrics::record_chain_execution(ChainStatus::Succeeded.as_str(), 0);
            return Ok(RuleResult::start(ctx, &self.config.default_action));
        }
        self.execute_rules(&rules, ctx).await
    }

    /// 执行已解析好的规则列表
    pub async fn execute_rules(&self, rules: &[Rule], ctx: &RuleContext) -> Result<RuleResult> {
        let mut ordered: Vec<&Rule> = rules.iter().collect();
        ordered.sort_by_key(|r| Reverse(r.priority));

        let mut result = RuleResult::start(ctx, &self.config.default_action);
        let mut current = ctx.data.clone();

        for rule in ordered {
            let Step { record, aborted } = self.run_step(rule, &current).await;
            result.execution_time_ms += record.execute_time_ms;

            if self.config.record_executions {
                self.record_counter(rule, record.valid).await;
            }

            if !record.valid {
                result.valid = false;
                result.action = record.action.clone();
                result.error = record.error.clone();
                result.error_reason = record.error_reason.clone();
                result.status = if aborted {
                    ChainStatus::Aborted
                } else {
                    ChainStatus::Failed
                };
                info!(
                    rule_id = rule.id,
                    rule_code = %rule.code,
                    reason = %record.error_reason,
                    status = result.status.as_str(),
                    "规则未通过，规则链终止"
                );
                result.execution_chain.push(record);
                break;
            }

            for (key, value) in &record.output {
                current.insert(key.clone(), value.clone());
            }
            result.action = record.action.clone();
            result.execution_chain.push(record);
        }

        result.context = current;
        rule_metrics::record_chain_execution(result.status.as_str(), result.execution_chain.len());
        Ok(result)
    }

    /// 单独执行一条规则，不回写执行计数
    #[instrument(skip(self, rule, data), fields(rule_id = rule.id, rule_code = %rule.code))]
    pub async fn execute_rule(&self, rule: &Rule, data: &Map<String, Value>) -> Result<RuleExecutionStep> {
        if rule.is_deleted() {
            return Err(RuleError::RuleDeleted(rule.code.clone()));
        }
        Ok(self.run_step(rule, data).await.record)
    }

    async fn run_step(&self, rule: &Rule, input: &Map<String, Value>) -> Step {
        let mut record = RuleExecutionStep::begin(rule, input.clone());
        let started = Instant::now();
        let outcome = self.run_strategy(rule, input).await;
        let elapsed = started.elapsed();
        record.execute_time_ms = elapsed.as_millis() as u64;

        let mut aborted = false;
        match outcome {
            Ok(o) => {
                record.valid = o.valid;
                record.action = o.action;
                record.error = o.error;
                record.error_reason = o.error_reason;
                record.variables = o.variables;
                record.output = o.output;
            }
            Err(err) => {
                aborted = err.is_hard_failure();
                warn!(rule_id = rule.id, rule_code = %rule.code, error = %err, "规则执行出错");
                record.fail_with(&err);
                record.output = input.clone();
            }
        }

        if record.action.is_empty() {
            record.action = if record.valid {
                self.default_pass_action(rule)
            } else {
                DENY_ACTION.to_string()
            };
        }

        rule_metrics::record_rule_execution(rule.rule_type.as_str(), record.valid, elapsed.as_secs_f64());

        Step { record, aborted }
    }

    fn default_pass_action(&self, rule: &Rule) -> String {
        if rule.action.is_empty() {
            self.config.default_action.clone()
        } else {
            rule.action.clone()
        }
    }

    async fn run_strategy(&self, rule: &Rule, data: &Map<String, Value>) -> Result<StrategyOutcome> {
        match rule.rule_type {
            RuleType::Condition => Ok(Self::run_conditions(rule, data)),
            RuleType::Formula => Self::run_formula(rule, data),
            RuleType::Script => {
                let outcome = self.pool.execute(&rule.content.script_body, data).await?;
                Ok(StrategyOutcome {
                    valid: outcome.valid,
                    action: outcome.action,
                    error: outcome.error,
                    error_reason: outcome.error_reason,
                    variables: outcome.variables,
                    output: outcome.context,
                })
            }
        }
    }

    fn run_conditions(rule: &Rule, data: &Map<String, Value>) -> StrategyOutcome {
        let outcome = ConditionEvaluator::evaluate_all(&rule.content.conditions, data);
        let mut result = StrategyOutcome {
            valid: outcome.passed,
            output: data.clone(),
            ..Default::default()
        };
        if let Some(field) = outcome.failed_field {
            result.error = format!("条件不满足: {}", field);
            result.error_reason = CONDITION_NOT_MET.to_string();
            result.variables.insert("failed_field".into(), Value::String(field));
        } else if !outcome.passed {
            result.error = "没有可评估的条件".to_string();
            result.error_reason = CONDITION_NOT_MET.to_string();
        }
        result
    }

    fn run_formula(rule: &Rule, data: &Map<String, Value>) -> Result<StrategyOutcome> {
        let value = FormulaEvaluator::evaluate(&rule.content.formula, data, &rule.content.formula_vars)?;
        let mut result = StrategyOutcome {
            output: data.clone(),
            ..Default::default()
        };
        match value {
            FormulaValue::Bool(passed) => result.valid = passed,
            other => {
                result.valid = true;
                let json = other.to_json();
                result.variables.insert("result".into(), json.clone());
                result.output.insert("result".into(), json);
            }
        }
        if !result.valid {
            result.error = format!("公式不成立: {}", rule.content.formula);
        }
        Ok(result)
    }

    async fn record_counter(&self, rule: &Rule, success: bool) {
        if let Err(e) = self
            .repository
            .record_execution(rule.id, success, Utc::now())
            .await
        {
            warn!(rule_id = rule.id, error = %e, "回写执行计数失败");
        }
    }
}

/// 单步记录及其是否中止规则链
struct Step {
    record: RuleExecutionStep,
    aborted: bool,
}
