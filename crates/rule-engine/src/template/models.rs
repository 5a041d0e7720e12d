//! 规则模板数据模型
//!
//! 模板与规则的内容结构相同，但不包含作用域和触发事件；
//! 内容中的 `${param}` 占位符在实例化时由参数替换。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{RuleContent, RuleStatus, RuleType};

/// 模板参数定义
///
/// 描述规则模板中可配置的参数，包括类型约束、默认值和验证规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDef {
    /// 参数名称，用于在模板内容中引用
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    /// 用户可见的参数标签
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 参数默认值，当用户未提供时使用
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    /// 数值类型参数的最小值约束
    #[serde(default)]
    pub min: Option<f64>,
    /// 数值类型参数的最大值约束
    #[serde(default)]
    pub max: Option<f64>,
    /// 枚举类型参数的可选值列表
    #[serde(default)]
    pub options: Option<Vec<ParameterOption>>,
}

impl ParameterDef {
    pub fn new(name: impl Into<String>, param_type: ParameterType, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            label: label.into(),
            description: None,
            default: None,
            required: false,
            min: None,
            max: None,
            options: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }
}

/// 参数类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    /// 数值类型，支持整数和浮点数
    Number,
    Boolean,
    /// 日期时间，以字符串传递
    Date,
    Array,
    /// 枚举类型，必须配合 options 字段使用
    Enum,
}

/// 枚举参数的选项定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterOption {
    pub value: Value,
    pub label: String,
}

/// 规则模板
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTemplate {
    pub id: i64,
    /// 模板编码，全局唯一
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// 含占位符的规则内容
    #[serde(flatten)]
    pub content: RuleContent,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    #[serde(default = "default_version")]
    pub version: String,
    /// 系统内置模板不可删除
    #[serde(default)]
    pub is_system: bool,
    #[serde(default = "default_status")]
    pub status: RuleStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_status() -> RuleStatus {
    RuleStatus::Enabled
}

impl RuleTemplate {
    pub fn new(id: i64, code: impl Into<String>, name: impl Into<String>, rule_type: RuleType) -> Self {
        let now = Utc::now();
        Self {
            id,
            code: code.into(),
            name: name.into(),
            description: None,
            category_id: None,
            rule_type,
            content: RuleContent::default(),
            action: String::new(),
            parameters: Vec::new(),
            version: default_version(),
            is_system: false,
            status: default_status(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_content(mut self, content: RuleContent) -> Self {
        self.content = content;
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<ParameterDef>) -> Self {
        self.parameters = parameters;
        self
    }

    /// 检查模板是否可用于实例化：启用且编码非空
    pub fn is_valid(&self) -> bool {
        self.status == RuleStatus::Enabled && !self.code.is_empty()
    }

    pub fn find_parameter(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameter_def_serialization() {
        let param = ParameterDef::new("amount", ParameterType::Number, "金额")
            .required()
            .with_default(json!(100))
            .with_range(Some(0.0), Some(10000.0));

        let json = serde_json::to_string(&param).unwrap();
        assert!(json.contains("\"type\":\"number\""));
        assert!(json.contains("\"required\":true"));
    }

    #[test]
    fn test_parameter_def_deserialization() {
        let json_str = r#"{
            "name": "threshold",
            "type": "number",
            "label": "阈值",
            "required": true,
            "min": 0,
            "max": 100
        }"#;

        let param: ParameterDef = serde_json::from_str(json_str).unwrap();
        assert_eq!(param.name, "threshold");
        assert_eq!(param.param_type, ParameterType::Number);
        assert!(param.required);
        assert_eq!(param.min, Some(0.0));
        assert_eq!(param.max, Some(100.0));
    }

    #[test]
    fn test_template_deserialization_with_content() {
        let json_str = r#"{
            "id": 3,
            "code": "min_amount",
            "name": "最低金额",
            "type": "formula",
            "formula": "${amount} >= ${threshold}",
            "parameters": [{"name": "threshold", "type": "number", "label": "阈值"}]
        }"#;

        let template: RuleTemplate = serde_json::from_str(json_str).unwrap();
        assert_eq!(template.rule_type, RuleType::Formula);
        assert_eq!(template.content.formula, "${amount} >= ${threshold}");
        assert_eq!(template.version, "1.0.0");
        assert!(template.find_parameter("threshold").is_some());
        assert!(template.is_valid());
    }

    #[test]
    fn test_rule_template_is_valid() {
        let template = RuleTemplate::new(1, "test_template", "测试模板", RuleType::Script);
        assert!(template.is_valid());

        let disabled = RuleTemplate {
            status: RuleStatus::Disabled,
            ..template.clone()
        };
        assert!(!disabled.is_valid());

        let empty_code = RuleTemplate {
            code: "".into(),
            ..template
        };
        assert!(!empty_code.is_valid());
    }

    #[test]
    fn test_parameter_with_enum_options() {
        let mut param = ParameterDef::new("status", ParameterType::Enum, "状态");
        param.options = Some(vec![
            ParameterOption {
                value: json!("active"),
                label: "活跃".into(),
            },
            ParameterOption {
                value: json!("inactive"),
                label: "非活跃".into(),
            },
        ]);

        let json = serde_json::to_string(&param).unwrap();
        assert!(json.contains("\"type\":\"enum\""));
        assert!(json.contains("\"options\""));
    }
}
