//! 内存仓储实现
//!
//! 使用 DashMap 提供线程安全的存储，供测试、命令行工具和嵌入式场景使用。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::{CategoryQuery, CategoryRepository, RuleQuery, RuleRepository, TemplateQuery, TemplateRepository};
use crate::error::{Result, RuleError};
use crate::models::{Rule, RuleCategory};
use crate::template::RuleTemplate;

fn paginate<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    let iter = items.into_iter().skip(offset);
    if limit == 0 {
        iter.collect()
    } else {
        iter.take(limit).collect()
    }
}

/// 内存规则仓储
#[derive(Clone, Default)]
pub struct MemoryRuleRepository {
    rules: Arc<DashMap<i64, Rule>>,
}

impl MemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用一批规则初始化，编码或 ID 冲突时返回错误
    pub async fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Result<Self> {
        let repo = Self::new();
        for rule in rules {
            repo.create(&rule).await?;
        }
        Ok(repo)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn sorted(&self, query: &RuleQuery) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| query.accepts(r.value()))
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by_key(|r| (r.sorting, r.id));
        rules
    }

    fn code_taken(&self, code: &str, except_id: i64) -> bool {
        self.rules
            .iter()
            .any(|r| r.id != except_id && !r.is_deleted() && r.code == code)
    }
}

#[async_trait]
impl RuleRepository for MemoryRuleRepository {
    #[instrument(skip(self, rule), fields(rule_id = rule.id, rule_code = %rule.code))]
    async fn create(&self, rule: &Rule) -> Result<()> {
        if self.rules.contains_key(&rule.id) {
            return Err(RuleError::already_exists("Rule", "id", rule.id));
        }
        if self.code_taken(&rule.code, rule.id) {
            return Err(RuleError::already_exists("Rule", "code", &rule.code));
        }
        self.rules.insert(rule.id, rule.clone());
        debug!("规则已保存");
        Ok(())
    }

    async fn update(&self, rule: &Rule) -> Result<()> {
        if self.code_taken(&rule.code, rule.id) {
            return Err(RuleError::already_exists("Rule", "code", &rule.code));
        }
        match self.rules.get_mut(&rule.id) {
            Some(mut entry) => {
                *entry = rule.clone();
                Ok(())
            }
            None => Err(RuleError::not_found("Rule", rule.id)),
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        match self.rules.get_mut(&id) {
            Some(mut entry) => Ok(entry.mark_deleted()),
            None => Err(RuleError::not_found("Rule", id)),
        }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Rule>> {
        Ok(self.rules.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Rule>> {
        Ok(self
            .rules
            .iter()
            .find(|r| !r.is_deleted() && r.code == code)
            .map(|r| r.value().clone()))
    }

    async fn find(&self, query: &RuleQuery) -> Result<Vec<Rule>> {
        Ok(paginate(self.sorted(query), query.offset, query.limit))
    }

    async fn count(&self, query: &RuleQuery) -> Result<u64> {
        Ok(self.rules.iter().filter(|r| query.accepts(r.value())).count() as u64)
    }

    async fn record_execution(&self, id: i64, success: bool, at: DateTime<Utc>) -> Result<()> {
        match self.rules.get_mut(&id) {
            Some(mut entry) => {
                entry.record_execution(success, at);
                Ok(())
            }
            None => Err(RuleError::not_found("Rule", id)),
        }
    }
}

/// 内存分类仓储
#[derive(Clone, Default)]
pub struct MemoryCategoryRepository {
    categories: Arc<DashMap<i64, RuleCategory>>,
}

impl MemoryCategoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CategoryRepository for MemoryCategoryRepository {
    async fn create(&self, category: &RuleCategory) -> Result<()> {
        if self.categories.contains_key(&category.id) {
            return Err(RuleError::already_exists("RuleCategory", "id", category.id));
        }
        if self.categories.iter().any(|c| c.code == category.code) {
            return Err(RuleError::already_exists("RuleCategory", "code", &category.code));
        }
        self.categories.insert(category.id, category.clone());
        Ok(())
    }

    async fn update(&self, category: &RuleCategory) -> Result<()> {
        match self.categories.get_mut(&category.id) {
            Some(mut entry) => {
                *entry = category.clone();
                Ok(())
            }
            None => Err(RuleError::not_found("RuleCategory", category.id)),
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.categories.remove(&id).is_some())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<RuleCategory>> {
        Ok(self.categories.get(&id).map(|c| c.value().clone()))
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<RuleCategory>> {
        Ok(self
            .categories
            .iter()
            .find(|c| c.code == code)
            .map(|c| c.value().clone()))
    }

    async fn find(&self, query: &CategoryQuery) -> Result<Vec<RuleCategory>> {
        let mut categories: Vec<RuleCategory> = self
            .categories
            .iter()
            .filter(|c| query.accepts(c.value()))
            .map(|c| c.value().clone())
            .collect();
        categories.sort_by_key(|c| (c.sorting, c.id));
        Ok(categories)
    }

    async fn count(&self, query: &CategoryQuery) -> Result<u64> {
        Ok(self.categories.iter().filter(|c| query.accepts(c.value())).count() as u64)
    }
}

/// 内存模板仓储
#[derive(Clone, Default)]
pub struct MemoryTemplateRepository {
    templates: Arc<DashMap<i64, RuleTemplate>>,
}

impl MemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplateRepository {
    async fn create(&self, template: &RuleTemplate) -> Result<()> {
        if self.templates.contains_key(&template.id) {
            return Err(RuleError::already_exists("RuleTemplate", "id", template.id));
        }
        if self.templates.iter().any(|t| t.code == template.code) {
            return Err(RuleError::already_exists("RuleTemplate", "code", &template.code));
        }
        self.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn update(&self, template: &RuleTemplate) -> Result<()> {
        match self.templates.get_mut(&template.id) {
            Some(mut entry) => {
                *entry = template.clone();
                Ok(())
            }
            None => Err(RuleError::not_found("RuleTemplate", template.id)),
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.templates.remove(&id).is_some())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<RuleTemplate>> {
        Ok(self.templates.get(&id).map(|t| t.value().clone()))
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<RuleTemplate>> {
        Ok(self
            .templates
            .iter()
            .find(|t| t.code == code)
            .map(|t| t.value().clone()))
    }

    async fn find(&self, query: &TemplateQuery) -> Result<Vec<RuleTemplate>> {
        let mut templates: Vec<RuleTemplate> = self
            .templates
            .iter()
            .filter(|t| query.accepts(t.value()))
            .map(|t| t.value().clone())
            .collect();
        templates.sort_by_key(|t| t.id);
        Ok(paginate(templates, query.offset, query.limit))
    }

    async fn count(&self, query: &TemplateQuery) -> Result<u64> {
        Ok(self.templates.iter().filter(|t| query.accepts(t.value())).count() as u64)
    }
}
