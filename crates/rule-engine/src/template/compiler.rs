//! 模板编译器
//!
//! 将规则模板与参数值结合，生成可直接写入规则的内容。
//! 核心功能是替换内容中的 `${param}` 占位符，同时保留参数的原始类型。

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

use super::models::{ParameterDef, ParameterType, RuleTemplate};
use crate::error::RuleError;
use crate::models::{RuleContent, RuleType};

/// 匹配 ${paramName} 格式的占位符
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}").expect("placeholder pattern is a valid regex")
});

/// 模板编译错误
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("缺少必填参数: {0}")]
    MissingParameter(String),

    #[error("参数 {name} 超出范围: 期望 [{min:?}, {max:?}]")]
    ParamOutOfRange {
        name: String,
        min: Option<f64>,
        max: Option<f64>,
    },

    #[error("参数类型错误: {name} 期望 {expected}, 实际 {actual}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("参数 {0} 的值不在可选项中")]
    NotAnOption(String),

    #[error("无效的模板: {0}")]
    InvalidTemplate(String),
}

impl From<CompileError> for RuleError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::InvalidTemplate(msg) => RuleError::Template(msg),
            other => RuleError::Validation(other.to_string()),
        }
    }
}

/// 模板实例化后的规则内容
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledContent {
    pub rule_type: RuleType,
    pub content: RuleContent,
    pub action: String,
}

/// 对普通字符串做占位符替换
///
/// 不做参数校验；未提供的占位符原样保留。字符串参数按原文插入，其他值按 JSON 文本插入。
pub fn render(template: &str, params: &Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            params
                .get(&caps[1])
                .map(value_to_text)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn value_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        _ => v.to_string(),
    }
}

/// 模板编译器
///
/// 负责参数校验、默认值合并，以及内容中占位符的递归替换
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateCompiler;

impl TemplateCompiler {
    pub fn new() -> Self {
        Self
    }

    /// 从模板和参数生成规则内容
    ///
    /// 编译过程：
    /// 1. 验证参数是否满足定义
    /// 2. 合并用户参数与默认值
    /// 3. 递归替换内容中的占位符
    pub fn instantiate(
        &self,
        template: &RuleTemplate,
        params: &HashMap<String, Value>,
    ) -> Result<CompiledContent, CompileError> {
        self.validate_params(&template.parameters, params)?;
        let merged = self.merge_with_defaults(&template.parameters, params);

        let raw = serde_json::to_value(&template.content)
            .map_err(|e| CompileError::InvalidTemplate(e.to_string()))?;
        let compiled = self.replace_placeholders(&raw, &merged);
        let content: RuleContent = serde_json::from_value(compiled)
            .map_err(|e| CompileError::InvalidTemplate(format!("替换后的内容无法解析: {}", e)))?;

        let action = match self.replace_placeholders(&Value::String(template.action.clone()), &merged) {
            Value::String(s) => s,
            other => value_to_text(&other),
        };

        Ok(CompiledContent {
            rule_type: template.rule_type,
            content,
            action,
        })
    }

    /// 验证所有参数是否满足定义的约束
    pub fn validate_params(
        &self,
        definitions: &[ParameterDef],
        params: &HashMap<String, Value>,
    ) -> Result<(), CompileError> {
        for def in definitions {
            // 必填参数必须提供值或有默认值
            if def.required && !params.contains_key(&def.name) && def.default.is_none() {
                return Err(CompileError::MissingParameter(def.name.clone()));
            }
            if let Some(value) = params.get(&def.name) {
                self.validate_param_value(def, value)?;
            }
        }
        Ok(())
    }

    /// 验证单个参数值是否符合定义的类型和范围约束
    fn validate_param_value(&self, def: &ParameterDef, value: &Value) -> Result<(), CompileError> {
        let type_ok = match def.param_type {
            ParameterType::String | ParameterType::Date => value.is_string(),
            ParameterType::Number => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Enum => {
                if let Some(options) = &def.options
                    && !options.iter().any(|o| &o.value == value)
                {
                    return Err(CompileError::NotAnOption(def.name.clone()));
                }
                true
            }
        };

        if !type_ok {
            return Err(CompileError::TypeMismatch {
                name: def.name.clone(),
                expected: format!("{:?}", def.param_type).to_lowercase(),
                actual: value_type_name(value).to_string(),
            });
        }

        if let Some(v) = value.as_f64() {
            let below = def.min.is_some_and(|min| v < min);
            let above = def.max.is_some_and(|max| v > max);
            if below || above {
                return Err(CompileError::ParamOutOfRange {
                    name: def.name.clone(),
                    min: def.min,
                    max: def.max,
                });
            }
        }

        Ok(())
    }

    /// 将用户提供的参数与模板默认值合并
    fn merge_with_defaults(
        &self,
        definitions: &[ParameterDef],
        params: &HashMap<String, Value>,
    ) -> Map<String, Value> {
        let mut merged: Map<String, Value> =
            params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for def in definitions {
            if !merged.contains_key(&def.name)
                && let Some(default) = &def.default
            {
                merged.insert(def.name.clone(), default.clone());
            }
        }
        merged
    }

    /// 递归替换占位符
    ///
    /// 纯占位符字符串（如 "${amount}"）直接替换为参数值以保留原始类型；
    /// 混合字符串（如 "total: ${amount}"）做文本替换。
    fn replace_placeholders(&self, template: &Value, params: &Map<String, Value>) -> Value {
        match template {
            Value::String(s) => {
                if let Some(caps) = PLACEHOLDER.captures(s)
                    && caps.get(0).map(|m| m.as_str()) == Some(s.as_str())
                    && let Some(value) = params.get(&caps[1])
                {
                    return value.clone();
                }
                Value::String(render(s, params))
            }
            Value::Array(arr) => Value::Array(
                arr.iter()
                    .map(|v| self.replace_placeholders(v, params))
                    .collect(),
            ),
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), self.replace_placeholders(v, params)))
                    .collect(),
            ),
            _ => template.clone(),
        }
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
