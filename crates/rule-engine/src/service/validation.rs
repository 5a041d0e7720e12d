//! 规则内容校验
//!
//! 规则和模板共用：条件结构、公式语法、脚本语法（借用解释器池编译）。

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, RuleError};
use crate::models::{Rule, RuleContent, RuleType};
use crate::script::RuntimePool;
use crate::template::{ParameterDef, ParameterType, RuleTemplate, TemplateCompiler};

/// 内容校验器
#[derive(Clone)]
pub struct ContentValidator {
    pool: Arc<RuntimePool>,
}

impl ContentValidator {
    pub fn new(pool: Arc<RuntimePool>) -> Self {
        Self { pool }
    }

    /// 校验与规则类型对应的内容
    pub fn validate(&self, rule_type: RuleType, content: &RuleContent) -> Result<()> {
        content.validate_shape(rule_type)?;
        if rule_type == RuleType::Script {
            self.pool.check_syntax(&content.script_body)?;
        }
        Ok(())
    }

    /// 校验完整的规则定义
    pub fn validate_rule(&self, rule: &Rule) -> Result<()> {
        rule.validate_shape()?;
        if rule.rule_type == RuleType::Script {
            self.pool.check_syntax(&rule.content.script_body)?;
        }
        Ok(())
    }

    /// 校验模板
    ///
    /// 模板内容含占位符，先用默认值或示例值试编译，再校验编译结果。
    pub fn validate_template(&self, template: &RuleTemplate) -> Result<()> {
        for def in &template.parameters {
            if def.name.trim().is_empty() {
                return Err(RuleError::Validation("模板参数名不能为空".into()));
            }
            if def.param_type == ParameterType::Enum
                && def.options.as_ref().is_none_or(|o| o.is_empty())
            {
                return Err(RuleError::Validation(format!(
                    "枚举参数 {} 必须提供可选项",
                    def.name
                )));
            }
        }

        let samples: HashMap<String, Value> = template
            .parameters
            .iter()
            .map(|def| (def.name.clone(), sample_value(def)))
            .collect();
        let compiled = TemplateCompiler::new().instantiate(template, &samples)?;
        self.validate(compiled.rule_type, &compiled.content)
    }
}

/// 参数的试编译取值：默认值优先，其次按类型构造
fn sample_value(def: &ParameterDef) -> Value {
    if let Some(default) = &def.default {
        return default.clone();
    }
    match def.param_type {
        ParameterType::Number => Value::from(def.min.or(def.max).unwrap_or(0.0)),
        ParameterType::Boolean => Value::Bool(false),
        ParameterType::Array => Value::Array(vec![Value::String("sample".into())]),
        ParameterType::Enum => def
            .options
            .as_ref()
            .and_then(|o| o.first())
            .map(|o| o.value.clone())
            .unwrap_or(Value::Null),
        ParameterType::String | ParameterType::Date => Value::String("sample".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Condition, Trigger};
    use crate::operators::Operator;
    use serde_json::json;

    fn validator() -> ContentValidator {
        ContentValidator::new(Arc::new(RuntimePool::with_defaults().unwrap()))
    }

    #[test]
    fn test_script_syntax_checked() {
        let v = validator();
        let ok = RuleContent {
            script_body: "valid = true;".into(),
            ..Default::default()
        };
        assert!(v.validate(RuleType::Script, &ok).is_ok());

        let broken = RuleContent {
            script_body: "valid = (".into(),
            ..Default::default()
        };
        assert_eq!(
            v.validate(RuleType::Script, &broken).unwrap_err().code(),
            "SCRIPT_SYNTAX_ERROR"
        );
    }

    #[test]
    fn test_validate_rule() {
        let v = validator();
        let rule = Rule::new(1, "r", "r", RuleType::Condition)
            .with_triggers([Trigger::Create])
            .with_conditions(vec![Condition::new("age", Operator::Between, "18")]);
        assert_eq!(v.validate_rule(&rule).unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_template_with_placeholders() {
        let v = validator();
        let template = RuleTemplate::new(1, "min_amount", "最低金额", RuleType::Condition)
            .with_content(RuleContent {
                conditions: vec![Condition::new("amount", Operator::Between, json!(["${min}", "${max}"]))],
                ..Default::default()
            })
            .with_parameters(vec![
                ParameterDef::new("min", ParameterType::Number, "下限").required(),
                ParameterDef::new("max", ParameterType::Number, "上限").with_default(json!(1000)),
            ]);
        assert!(v.validate_template(&template).is_ok());
    }

    #[test]
    fn test_template_script_checked_after_substitution() {
        let v = validator();
        let template = RuleTemplate::new(1, "t", "t", RuleType::Script)
            .with_content(RuleContent {
                script_body: "valid = context.level == \"${level}\" && (;".into(),
                ..Default::default()
            })
            .with_parameters(vec![ParameterDef::new("level", ParameterType::String, "等级")]);
        assert_eq!(
            v.validate_template(&template).unwrap_err().code(),
            "SCRIPT_SYNTAX_ERROR"
        );
    }

    #[test]
    fn test_enum_parameter_needs_options() {
        let v = validator();
        let template = RuleTemplate::new(1, "t", "t", RuleType::Script)
            .with_content(RuleContent {
                script_body: "valid = true;".into(),
                ..Default::default()
            })
            .with_parameters(vec![ParameterDef::new("mode", ParameterType::Enum, "模式")]);
        assert!(v.validate_template(&template).is_err());
    }
}
