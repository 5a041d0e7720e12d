//! 仓储 Trait 定义
//!
//! 定义规则、分类、模板的存储接口，服务层和执行器依赖抽象而非具体实现，支持 mock 测试。
//! 查询结果统一按 `sorting` 升序、`id` 升序排列。

mod memory;

pub use memory::{MemoryCategoryRepository, MemoryRuleRepository, MemoryTemplateRepository};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Rule, RuleCategory, RuleStatus, RuleType};
use crate::template::RuleTemplate;

/// 规则查询条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleQuery {
    pub scope: Option<String>,
    pub status: Option<RuleStatus>,
    pub category_id: Option<i64>,
    pub template_id: Option<i64>,
    pub rule_type: Option<RuleType>,
    /// 按编码或名称模糊匹配
    pub keyword: Option<String>,
    pub include_deleted: bool,
    pub offset: usize,
    /// 0 表示不分页
    pub limit: usize,
}

impl RuleQuery {
    /// 某个作用域下已启用的规则
    pub fn enabled_in_scope(scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            status: Some(RuleStatus::Enabled),
            ..Default::default()
        }
    }

    pub fn in_category(category_id: i64) -> Self {
        Self {
            category_id: Some(category_id),
            ..Default::default()
        }
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// 判断规则是否满足过滤条件（不含分页）
    pub fn accepts(&self, rule: &Rule) -> bool {
        if !self.include_deleted && rule.is_deleted() {
            return false;
        }
        if self.scope.as_ref().is_some_and(|s| s != &rule.scope) {
            return false;
        }
        if self.status.is_some_and(|s| s != rule.status) {
            return false;
        }
        if self.category_id.is_some_and(|c| c != rule.category_id) {
            return false;
        }
        if self.template_id.is_some() && self.template_id != rule.template_id {
            return false;
        }
        if self.rule_type.is_some_and(|t| t != rule.rule_type) {
            return false;
        }
        match &self.keyword {
            Some(k) => rule.code.contains(k.as_str()) || rule.name.contains(k.as_str()),
            None => true,
        }
    }
}

/// 分类查询条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryQuery {
    pub parent_id: Option<i64>,
    pub status: Option<RuleStatus>,
}

impl CategoryQuery {
    pub fn children_of(parent_id: i64) -> Self {
        Self {
            parent_id: Some(parent_id),
            status: None,
        }
    }

    pub fn accepts(&self, category: &RuleCategory) -> bool {
        self.parent_id.is_none_or(|p| p == category.parent_id)
            && self.status.is_none_or(|s| s == category.status)
    }
}

/// 模板查询条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateQuery {
    pub category_id: Option<i64>,
    pub rule_type: Option<RuleType>,
    pub status: Option<RuleStatus>,
    pub keyword: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

impl TemplateQuery {
    pub fn accepts(&self, template: &RuleTemplate) -> bool {
        if self.category_id.is_some() && self.category_id != template.category_id {
            return false;
        }
        if self.rule_type.is_some_and(|t| t != template.rule_type) {
            return false;
        }
        if self.status.is_some_and(|s| s != template.status) {
            return false;
        }
        match &self.keyword {
            Some(k) => template.code.contains(k.as_str()) || template.name.contains(k.as_str()),
            None => true,
        }
    }
}

/// 规则仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn create(&self, rule: &Rule) -> Result<()>;
    async fn update(&self, rule: &Rule) -> Result<()>;
    /// 软删除，已删除时返回 false
    async fn delete(&self, id: i64) -> Result<bool>;
    async fn find_by_id(&self, id: i64) -> Result<Option<Rule>>;
    /// 只查找未删除的规则
    async fn find_by_code(&self, code: &str) -> Result<Option<Rule>>;
    async fn find(&self, query: &RuleQuery) -> Result<Vec<Rule>>;
    async fn count(&self, query: &RuleQuery) -> Result<u64>;
    /// 累加执行计数
    async fn record_execution(&self, id: i64, success: bool, at: DateTime<Utc>) -> Result<()>;
}

/// 规则分类仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn create(&self, category: &RuleCategory) -> Result<()>;
    async fn update(&self, category: &RuleCategory) -> Result<()>;
    async fn delete(&self, id: i64) -> Result<bool>;
    async fn find_by_id(&self, id: i64) -> Result<Option<RuleCategory>>;
    async fn find_by_code(&self, code: &str) -> Result<Option<RuleCategory>>;
    async fn find(&self, query: &CategoryQuery) -> Result<Vec<RuleCategory>>;
    async fn count(&self, query: &CategoryQuery) -> Result<u64>;
}

/// 规则模板仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn create(&self, template: &RuleTemplate) -> Result<()>;
    async fn update(&self, template: &RuleTemplate) -> Result<()>;
    async fn delete(&self, id: i64) -> Result<bool>;
    async fn find_by_id(&self, id: i64) -> Result<Option<RuleTemplate>>;
    async fn find_by_code(&self, code: &str) -> Result<Option<RuleTemplate>>;
    async fn find(&self, query: &TemplateQuery) -> Result<Vec<RuleTemplate>>;
    async fn count(&self, query: &TemplateQuery) -> Result<u64>;
}
