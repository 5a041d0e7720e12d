//! 规则领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RuleError};
use crate::evaluator::{ConditionEvaluator, FormulaEvaluator};
use crate::models::context::RuleContext;
use crate::operators::Operator;

/// 全局作用域，匹配任何上下文作用域
pub const GLOBAL_SCOPE: &str = "global";

/// 规则内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Condition,
    Script,
    Formula,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Condition => "condition",
            Self::Script => "script",
            Self::Formula => "formula",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "condition" => Ok(Self::Condition),
            "script" => Ok(Self::Script),
            "formula" => Ok(Self::Formula),
            other => Err(RuleError::Validation(format!("未知的规则类型: {}", other))),
        }
    }
}

/// 触发事件
///
/// 触发事件来自固定词表，未知名称在反序列化阶段即被拒绝。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Create,
    Update,
    Delete,
    Query,
    Submit,
    Approve,
    Reject,
    Cancel,
    Import,
    Export,
}

impl Trigger {
    pub const ALL: [Trigger; 10] = [
        Self::Create,
        Self::Update,
        Self::Delete,
        Self::Query,
        Self::Submit,
        Self::Approve,
        Self::Reject,
        Self::Cancel,
        Self::Import,
        Self::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Query => "query",
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
            Self::Import => "import",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RuleError::Validation(format!("未知的触发事件: {}", s)))
    }
}

/// 执行时机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTiming {
    Before,
    After,
    Both,
}

impl ExecutionTiming {
    /// 规则的执行时机是否覆盖给定时机
    pub fn covers(&self, timing: ExecutionTiming) -> bool {
        *self == Self::Both || *self == timing
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for ExecutionTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 启用状态（规则、分类、模板共用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Enabled,
    Disabled,
}

/// 条件节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// 规则内容
///
/// 三种内容策略的字段集合，只有与规则类型对应的字段参与执行。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleContent {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub script_body: String,
    #[serde(default)]
    pub formula: String,
    /// 公式占位符的默认值，上下文中同名字段优先
    #[serde(default)]
    pub formula_vars: Map<String, Value>,
}

impl RuleContent {
    /// 校验与规则类型对应的内容字段
    ///
    /// 脚本只检查非空，语法检查需要解释器，由服务层完成。
    pub fn validate_shape(&self, rule_type: RuleType) -> Result<()> {
        match rule_type {
            RuleType::Condition => {
                if self.conditions.is_empty() {
                    return Err(RuleError::Validation("条件规则的条件列表不能为空".into()));
                }
                for (i, cond) in self.conditions.iter().enumerate() {
                    ConditionEvaluator::validate(cond, &format!("conditions[{}]", i))?;
                }
                Ok(())
            }
            RuleType::Script => {
                if self.script_body.trim().is_empty() {
                    return Err(RuleError::Validation("脚本规则的脚本内容不能为空".into()));
                }
                Ok(())
            }
            RuleType::Formula => {
                if self.formula.trim().is_empty() {
                    return Err(RuleError::Validation("公式规则的公式不能为空".into()));
                }
                FormulaEvaluator::validate(&self.formula)
            }
        }
    }
}

/// 规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: i64,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: i64,
    #[serde(default)]
    pub template_id: Option<i64>,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default = "default_scope")]
    pub scope: String,
    /// 作用目标列表，为空时对作用域内所有目标生效
    #[serde(default)]
    pub scope_ids: Vec<String>,
    #[serde(default = "default_timing")]
    pub execution_timing: ExecutionTiming,
    #[serde(flatten)]
    pub content: RuleContent,
    #[serde(default)]
    pub action: String,
    /// 优先级，数值越大越先执行
    #[serde(default)]
    pub priority: i32,
    /// 同优先级下的发现顺序
    #[serde(default)]
    pub sorting: i32,
    #[serde(default = "default_status")]
    pub status: RuleStatus,
    #[serde(default)]
    pub execute_count: i64,
    #[serde(default)]
    pub success_count: i64,
    #[serde(default)]
    pub last_execute_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

fn default_scope() -> String {
    GLOBAL_SCOPE.to_string()
}

fn default_timing() -> ExecutionTiming {
    ExecutionTiming::Before
}

fn default_status() -> RuleStatus {
    RuleStatus::Enabled
}

impl Rule {
    /// 创建一条空内容的规则，默认全局作用域、前置执行、启用
    pub fn new(id: i64, code: impl Into<String>, name: impl Into<String>, rule_type: RuleType) -> Self {
        let now = Utc::now();
        Self {
            id,
            code: code.into(),
            name: name.into(),
            description: None,
            category_id: 0,
            template_id: None,
            rule_type,
            triggers: Vec::new(),
            scope: default_scope(),
            scope_ids: Vec::new(),
            execution_timing: default_timing(),
            content: RuleContent::default(),
            action: String::new(),
            priority: 0,
            sorting: 0,
            status: default_status(),
            execute_count: 0,
            success_count: 0,
            last_execute_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_category(mut self, category_id: i64) -> Self {
        self.category_id = category_id;
        self
    }

    pub fn with_triggers(mut self, triggers: impl IntoIterator<Item = Trigger>) -> Self {
        self.set_triggers(triggers);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>, scope_ids: Vec<String>) -> Self {
        self.set_scope(scope, scope_ids);
        self
    }

    pub fn with_timing(mut self, timing: ExecutionTiming) -> Self {
        self.execution_timing = timing;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_sorting(mut self, sorting: i32) -> Self {
        self.sorting = sorting;
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.set_conditions(conditions);
        self
    }

    pub fn with_script(mut self, body: impl Into<String>) -> Self {
        self.set_script(body);
        self
    }

    pub fn with_formula(mut self, formula: impl Into<String>, vars: Map<String, Value>) -> Self {
        self.set_formula(formula, vars);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.status = RuleStatus::Disabled;
        self
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn set_conditions(&mut self, conditions: Vec<Condition>) {
        self.rule_type = RuleType::Condition;
        self.content.conditions = conditions;
        self.touch();
    }

    pub fn set_script(&mut self, body: impl Into<String>) {
        self.rule_type = RuleType::Script;
        self.content.script_body = body.into();
        self.touch();
    }

    pub fn set_formula(&mut self, formula: impl Into<String>, vars: Map<String, Value>) {
        self.rule_type = RuleType::Formula;
        self.content.formula = formula.into();
        self.content.formula_vars = vars;
        self.touch();
    }

    /// 替换规则内容，类型随之改变
    pub fn set_content(&mut self, rule_type: RuleType, content: RuleContent) {
        self.rule_type = rule_type;
        self.content = content;
        self.touch();
    }

    /// 设置触发事件，重复项只保留第一次出现
    pub fn set_triggers(&mut self, triggers: impl IntoIterator<Item = Trigger>) {
        let mut unique = Vec::new();
        for trigger in triggers {
            if !unique.contains(&trigger) {
                unique.push(trigger);
            }
        }
        self.triggers = unique;
        self.touch();
    }

    pub fn set_scope(&mut self, scope: impl Into<String>, scope_ids: Vec<String>) {
        self.scope = scope.into();
        self.scope_ids = scope_ids;
        self.touch();
    }

    pub fn set_timing(&mut self, timing: ExecutionTiming) {
        self.execution_timing = timing;
        self.touch();
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
        self.touch();
    }

    pub fn set_sorting(&mut self, sorting: i32) {
        self.sorting = sorting;
        self.touch();
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = action.into();
        self.touch();
    }

    pub fn rename(&mut self, name: impl Into<String>, description: Option<String>) {
        self.name = name.into();
        self.description = description;
        self.touch();
    }

    pub fn enable(&mut self) {
        self.status = RuleStatus::Enabled;
        self.touch();
    }

    pub fn disable(&mut self) {
        self.status = RuleStatus::Disabled;
        self.touch();
    }

    /// 标记删除
    ///
    /// 删除是终态且幂等：已删除的规则再次删除返回 false，不改变任何字段。
    pub fn mark_deleted(&mut self) -> bool {
        if self.deleted_at.is_some() {
            return false;
        }
        let now = Utc::now();
        self.status = RuleStatus::Disabled;
        self.deleted_at = Some(now);
        self.updated_at = now;
        true
    }

    /// 累加执行计数
    pub fn record_execution(&mut self, success: bool, at: DateTime<Utc>) {
        self.execute_count += 1;
        if success {
            self.success_count += 1;
        }
        self.last_execute_at = Some(at);
    }

    pub fn is_enabled(&self) -> bool {
        self.status == RuleStatus::Enabled && self.deleted_at.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_global(&self) -> bool {
        self.scope == GLOBAL_SCOPE
    }

    /// 规则是否适用于给定上下文
    ///
    /// 作用域本身的筛选在查询阶段完成，这里检查目标列表、执行时机和触发事件。
    pub fn matches(&self, ctx: &RuleContext) -> bool {
        self.is_enabled()
            && (self.scope_ids.is_empty() || self.scope_ids.iter().any(|id| id == &ctx.scope_id))
            && self.execution_timing.covers(ctx.execution_timing)
            && self.triggers.contains(&ctx.trigger)
    }

    /// 校验规则定义（不含脚本语法）
    pub fn validate_shape(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(RuleError::Validation("规则编码不能为空".into()));
        }
        if self.name.trim().is_empty() {
            return Err(RuleError::Validation("规则名称不能为空".into()));
        }
        if self.scope.trim().is_empty() {
            return Err(RuleError::Validation("规则作用域不能为空".into()));
        }
        if self.triggers.is_empty() {
            return Err(RuleError::Validation(format!(
                "规则 '{}' 至少需要一个触发事件",
                self.code
            )));
        }
        self.content.validate_shape(self.rule_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(scope_id: &str, trigger: Trigger, timing: ExecutionTiming) -> RuleContext {
        RuleContext::new("order", trigger, timing).with_scope_id(scope_id)
    }

    fn sample_rule() -> Rule {
        Rule::new(1, "age_check", "年龄校验", RuleType::Condition)
            .with_triggers([Trigger::Create, Trigger::Update])
            .with_conditions(vec![Condition::new("user.age", Operator::Gte, 18)])
    }

    #[test]
    fn test_rule_deserialization() {
        let json = r#"
        {
            "id": 7,
            "code": "balance_check",
            "name": "余额校验",
            "type": "script",
            "triggers": ["create", "approve"],
            "scope": "order",
            "scopeIds": ["shop-1"],
            "executionTiming": "both",
            "scriptBody": "valid = true;",
            "priority": 10
        }
        "#;

        let rule: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.rule_type, RuleType::Script);
        assert_eq!(rule.triggers, vec![Trigger::Create, Trigger::Approve]);
        assert_eq!(rule.content.script_body, "valid = true;");
        assert_eq!(rule.status, RuleStatus::Enabled);
        assert_eq!(rule.execution_timing, ExecutionTiming::Both);
    }

    #[test]
    fn test_unknown_trigger_rejected() {
        let json = r#"{"id": 1, "code": "c", "name": "n", "type": "script", "triggers": ["explode"]}"#;
        assert!(serde_json::from_str::<Rule>(json).is_err());
        assert_eq!("explode".parse::<Trigger>().unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_matches_scope_ids_timing_trigger() {
        let rule = sample_rule().with_scope("order", vec!["shop-1".into()]);

        assert!(rule.matches(&ctx("shop-1", Trigger::Create, ExecutionTiming::Before)));
        assert!(!rule.matches(&ctx("shop-2", Trigger::Create, ExecutionTiming::Before)));
        assert!(!rule.matches(&ctx("shop-1", Trigger::Create, ExecutionTiming::After)));
        assert!(!rule.matches(&ctx("shop-1", Trigger::Delete, ExecutionTiming::Before)));

        let both = rule.clone().with_timing(ExecutionTiming::Both);
        assert!(both.matches(&ctx("shop-1", Trigger::Update, ExecutionTiming::After)));
    }

    #[test]
    fn test_disabled_rule_never_matches() {
        let rule = sample_rule().disabled();
        assert!(!rule.matches(&ctx("any", Trigger::Create, ExecutionTiming::Before)));
    }

    #[test]
    fn test_setters_touch_updated_at() {
        let mut rule = sample_rule();
        let before = rule.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        rule.set_priority(5);
        assert!(rule.updated_at > before);
        assert_eq!(rule.priority, 5);
    }

    #[test]
    fn test_set_triggers_deduplicates() {
        let mut rule = sample_rule();
        rule.set_triggers([Trigger::Submit, Trigger::Submit, Trigger::Cancel]);
        assert_eq!(rule.triggers, vec![Trigger::Submit, Trigger::Cancel]);
    }

    #[test]
    fn test_content_setter_switches_type() {
        let mut rule = sample_rule();
        rule.set_formula("${amount} > 100", Map::new());
        assert_eq!(rule.rule_type, RuleType::Formula);
        assert!(rule.validate_shape().is_ok());
    }

    #[test]
    fn test_mark_deleted_is_idempotent() {
        let mut rule = sample_rule();
        assert!(rule.mark_deleted());
        let deleted_at = rule.deleted_at;
        assert!(!rule.mark_deleted());
        assert_eq!(rule.deleted_at, deleted_at);
        assert!(!rule.is_enabled());
    }

    #[test]
    fn test_validate_shape() {
        assert!(sample_rule().validate_shape().is_ok());

        let empty_conditions = Rule::new(1, "c", "n", RuleType::Condition).with_triggers([Trigger::Create]);
        assert!(empty_conditions.validate_shape().is_err());

        let no_triggers = Rule::new(1, "c", "n", RuleType::Script).with_script("valid = true;");
        assert!(no_triggers.validate_shape().is_err());

        let bad_formula = Rule::new(1, "c", "n", RuleType::Formula)
            .with_triggers([Trigger::Create])
            .with_formula("(1 + 2", Map::new());
        assert!(bad_formula.validate_shape().is_err());

        let bad_between = Rule::new(1, "c", "n", RuleType::Condition)
            .with_triggers([Trigger::Create])
            .with_conditions(vec![Condition::new("x", Operator::Between, json!("1"))]);
        assert!(bad_between.validate_shape().is_err());
    }

    #[test]
    fn test_record_execution() {
        let mut rule = sample_rule();
        let now = Utc::now();
        rule.record_execution(true, now);
        rule.record_execution(false, now);
        assert_eq!(rule.execute_count, 2);
        assert_eq!(rule.success_count, 1);
        assert_eq!(rule.last_execute_at, Some(now));
    }
}
