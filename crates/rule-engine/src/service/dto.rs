//! 管理服务请求 DTO 定义

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use validator::Validate;

use crate::models::{ExecutionTiming, RuleContent, RuleStatus, RuleType, Trigger};
use crate::template::ParameterDef;

/// 创建规则请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleRequest {
    #[validate(length(min = 1, max = 64, message = "规则编码长度必须在1-64个字符之间"))]
    pub code: String,
    #[validate(length(min = 1, max = 100, message = "规则名称长度必须在1-100个字符之间"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: i64,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[validate(length(min = 1, message = "至少需要一个触发事件"))]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub scope_ids: Vec<String>,
    #[serde(default)]
    pub execution_timing: Option<ExecutionTiming>,
    #[serde(flatten)]
    pub content: RuleContent,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub sorting: i32,
}

/// 从模板创建规则请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleFromTemplateRequest {
    pub template_id: i64,
    #[validate(length(min = 1, max = 64, message = "规则编码长度必须在1-64个字符之间"))]
    pub code: String,
    #[validate(length(min = 1, max = 100, message = "规则名称长度必须在1-100个字符之间"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: i64,
    #[validate(length(min = 1, message = "至少需要一个触发事件"))]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub scope_ids: Vec<String>,
    #[serde(default)]
    pub execution_timing: Option<ExecutionTiming>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

/// 更新规则请求，未提供的字段保持不变
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRuleRequest {
    #[validate(length(min = 1, max = 100, message = "规则名称长度必须在1-100个字符之间"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    #[validate(length(min = 1, message = "至少需要一个触发事件"))]
    pub triggers: Option<Vec<Trigger>>,
    pub scope: Option<String>,
    pub scope_ids: Option<Vec<String>>,
    pub execution_timing: Option<ExecutionTiming>,
    /// 与 `content` 一起提供时替换规则内容
    #[serde(rename = "type")]
    pub rule_type: Option<RuleType>,
    pub content: Option<RuleContent>,
    pub action: Option<String>,
    pub priority: Option<i32>,
    pub sorting: Option<i32>,
}

/// 创建分类请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryRequest {
    /// 0 表示根分类
    #[serde(default)]
    pub parent_id: i64,
    #[validate(length(min = 1, max = 64, message = "分类编码长度必须在1-64个字符之间"))]
    pub code: String,
    #[validate(length(min = 1, max = 50, message = "分类名称长度必须在1-50个字符之间"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sorting: i32,
}

/// 更新分类请求
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCategoryRequest {
    #[validate(length(min = 1, max = 50, message = "分类名称长度必须在1-50个字符之间"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub sorting: Option<i32>,
    pub status: Option<RuleStatus>,
}

/// 创建模板请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 64, message = "模板编码长度必须在1-64个字符之间"))]
    pub code: String,
    #[validate(length(min = 1, max = 100, message = "模板名称长度必须在1-100个字符之间"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(flatten)]
    pub content: RuleContent,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub is_system: bool,
}

/// 更新模板请求
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateRequest {
    #[validate(length(min = 1, max = 100, message = "模板名称长度必须在1-100个字符之间"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    #[serde(rename = "type")]
    pub rule_type: Option<RuleType>,
    pub content: Option<RuleContent>,
    pub action: Option<String>,
    pub parameters: Option<Vec<ParameterDef>>,
    pub version: Option<String>,
    pub status: Option<RuleStatus>,
}
