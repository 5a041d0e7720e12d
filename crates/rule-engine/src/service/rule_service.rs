//! 规则管理服务
//!
//! 规则的创建（直接创建或从模板实例化）、更新、启停和软删除。
//! 所有写操作在落库前完成校验：编码唯一、分类与模板存在、内容合法。

use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use super::dto::{CreateRuleFromTemplateRequest, CreateRuleRequest, UpdateRuleRequest};
use super::validation::ContentValidator;
use crate::error::{Result, RuleError};
use crate::id::IdGenerator;
use crate::models::{GLOBAL_SCOPE, Rule};
use crate::repository::{CategoryRepository, RuleQuery, RuleRepository, TemplateRepository};
use crate::template::TemplateCompiler;

/// 规则管理服务
pub struct RuleService {
    rules: Arc<dyn RuleRepository>,
    categories: Arc<dyn CategoryRepository>,
    templates: Arc<dyn TemplateRepository>,
    ids: Arc<dyn IdGenerator>,
    validator: ContentValidator,
}

impl RuleService {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        categories: Arc<dyn CategoryRepository>,
        templates: Arc<dyn TemplateRepository>,
        ids: Arc<dyn IdGenerator>,
        validator: ContentValidator,
    ) -> Self {
        Self {
            rules,
            categories,
            templates,
            ids,
            validator,
        }
    }

    /// 创建规则
    #[instrument(skip(self, req), fields(rule_code = %req.code))]
    pub async fn create(&self, req: CreateRuleRequest) -> Result<Rule> {
        req.validate()?;
        self.ensure_code_free(&req.code).await?;
        self.ensure_category(req.category_id).await?;

        let mut rule = Rule::new(self.ids.next_id(), req.code, req.name, req.rule_type)
            .with_category(req.category_id)
            .with_triggers(req.triggers)
            .with_scope(req.scope.unwrap_or_else(|| GLOBAL_SCOPE.to_string()), req.scope_ids)
            .with_action(req.action)
            .with_priority(req.priority)
            .with_sorting(req.sorting);
        rule.description = req.description;
        rule.content = req.content;
        if let Some(timing) = req.execution_timing {
            rule.execution_timing = timing;
        }

        self.validator.validate_rule(&rule)?;
        self.rules.create(&rule).await?;

        info!(rule_id = rule.id, "规则创建成功");
        Ok(rule)
    }

    /// 从模板创建规则，模板内容按参数实例化
    #[instrument(skip(self, req), fields(rule_code = %req.code, template_id = req.template_id))]
    pub async fn create_from_template(&self, req: CreateRuleFromTemplateRequest) -> Result<Rule> {
        req.validate()?;
        let template = self
            .templates
            .find_by_id(req.template_id)
            .await?
            .ok_or_else(|| RuleError::not_found("RuleTemplate", req.template_id))?;
        if !template.is_valid() {
            return Err(RuleError::Validation(format!("模板 {} 未启用", template.code)));
        }
        self.ensure_code_free(&req.code).await?;
        self.ensure_category(req.category_id).await?;

        let compiled = TemplateCompiler::new().instantiate(&template, &req.params)?;

        let mut rule = Rule::new(self.ids.next_id(), req.code, req.name, compiled.rule_type)
            .with_category(req.category_id)
            .with_triggers(req.triggers)
            .with_scope(req.scope.unwrap_or_else(|| GLOBAL_SCOPE.to_string()), req.scope_ids)
            .with_action(compiled.action)
            .with_priority(req.priority);
        rule.description = req.description.or(template.description);
        rule.template_id = Some(template.id);
        rule.content = compiled.content;
        if let Some(timing) = req.execution_timing {
            rule.execution_timing = timing;
        }

        self.validator.validate_rule(&rule)?;
        self.rules.create(&rule).await?;

        info!(rule_id = rule.id, "从模板创建规则成功");
        Ok(rule)
    }

    /// 更新规则，只修改请求中提供的字段
    #[instrument(skip(self, req))]
    pub async fn update(&self, id: i64, req: UpdateRuleRequest) -> Result<Rule> {
        req.validate()?;
        let mut rule = self.get_live(id).await?;

        if let Some(name) = req.name {
            let description = req.description.or_else(|| rule.description.clone());
            rule.rename(name, description);
        } else if let Some(description) = req.description {
            let name = rule.name.clone();
            rule.rename(name, Some(description));
        }
        if let Some(category_id) = req.category_id {
            self.ensure_category(category_id).await?;
            rule.category_id = category_id;
        }
        if let Some(triggers) = req.triggers {
            rule.set_triggers(triggers);
        }
        if req.scope.is_some() || req.scope_ids.is_some() {
            let scope = req.scope.unwrap_or_else(|| rule.scope.clone());
            let scope_ids = req.scope_ids.unwrap_or_else(|| rule.scope_ids.clone());
            rule.set_scope(scope, scope_ids);
        }
        if let Some(timing) = req.execution_timing {
            rule.set_timing(timing);
        }
        match (req.rule_type, req.content) {
            (Some(rule_type), Some(content)) => rule.set_content(rule_type, content),
            (None, Some(content)) => {
                let rule_type = rule.rule_type;
                rule.set_content(rule_type, content);
            }
            (Some(_), None) => {
                return Err(RuleError::Validation("修改规则类型时必须同时提供内容".into()));
            }
            (None, None) => {}
        }
        if let Some(action) = req.action {
            rule.set_action(action);
        }
        if let Some(priority) = req.priority {
            rule.set_priority(priority);
        }
        if let Some(sorting) = req.sorting {
            rule.set_sorting(sorting);
        }

        self.validator.validate_rule(&rule)?;
        self.rules.update(&rule).await?;

        info!(rule_id = id, "规则更新成功");
        Ok(rule)
    }

    #[instrument(skip(self))]
    pub async fn enable(&self, id: i64) -> Result<Rule> {
        let mut rule = self.get_live(id).await?;
        rule.enable();
        self.rules.update(&rule).await?;
        Ok(rule)
    }

    #[instrument(skip(self))]
    pub async fn disable(&self, id: i64) -> Result<Rule> {
        let mut rule = self.get_live(id).await?;
        rule.disable();
        self.rules.update(&rule).await?;
        Ok(rule)
    }

    /// 软删除，重复删除不报错
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<()> {
        let deleted = self.rules.delete(id).await?;
        if deleted {
            info!(rule_id = id, "规则已删除");
        }
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Rule> {
        self.rules
            .find_by_id(id)
            .await?
            .ok_or_else(|| RuleError::not_found("Rule", id))
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Rule> {
        self.rules
            .find_by_code(code)
            .await?
            .ok_or_else(|| RuleError::not_found("Rule", code))
    }

    pub async fn list(&self, query: &RuleQuery) -> Result<Vec<Rule>> {
        self.rules.find(query).await
    }

    pub async fn count(&self, query: &RuleQuery) -> Result<u64> {
        self.rules.count(query).await
    }

    /// 读取未删除的规则，已删除的规则不可再修改
    async fn get_live(&self, id: i64) -> Result<Rule> {
        let rule = self.get(id).await?;
        if rule.is_deleted() {
            return Err(RuleError::RuleDeleted(rule.code));
        }
        Ok(rule)
    }

    async fn ensure_code_free(&self, code: &str) -> Result<()> {
        if self.rules.find_by_code(code).await?.is_some() {
            return Err(RuleError::already_exists("Rule", "code", code));
        }
        Ok(())
    }

    /// 0 表示未分类
    async fn ensure_category(&self, category_id: i64) -> Result<()> {
        if category_id != 0 && self.categories.find_by_id(category_id).await?.is_none() {
            return Err(RuleError::not_found("RuleCategory", category_id));
        }
        Ok(())
    }
}
