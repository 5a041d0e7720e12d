//! 规则模板管理服务
//!
//! 模板允许运营人员通过参数化配置快速创建规则。系统内置模板不可删除。

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use super::dto::{CreateTemplateRequest, UpdateTemplateRequest};
use super::validation::ContentValidator;
use crate::error::{Result, RuleError};
use crate::id::IdGenerator;
use crate::repository::{CategoryRepository, TemplateQuery, TemplateRepository};
use crate::template::{CompiledContent, RuleTemplate, TemplateCompiler};

/// 规则模板服务
pub struct TemplateService {
    templates: Arc<dyn TemplateRepository>,
    categories: Arc<dyn CategoryRepository>,
    ids: Arc<dyn IdGenerator>,
    validator: ContentValidator,
    compiler: TemplateCompiler,
}

impl TemplateService {
    pub fn new(
        templates: Arc<dyn TemplateRepository>,
        categories: Arc<dyn CategoryRepository>,
        ids: Arc<dyn IdGenerator>,
        validator: ContentValidator,
    ) -> Self {
        Self {
            templates,
            categories,
            ids,
            validator,
            compiler: TemplateCompiler::new(),
        }
    }

    #[instrument(skip(self, req), fields(code = %req.code))]
    pub async fn create(&self, req: CreateTemplateRequest) -> Result<RuleTemplate> {
        req.validate()?;
        if self.templates.find_by_code(&req.code).await?.is_some() {
            return Err(RuleError::already_exists("RuleTemplate", "code", &req.code));
        }
        if let Some(category_id) = req.category_id {
            self.ensure_category(category_id).await?;
        }

        let mut template = RuleTemplate::new(self.ids.next_id(), req.code, req.name, req.rule_type)
            .with_content(req.content)
            .with_parameters(req.parameters);
        template.description = req.description;
        template.category_id = req.category_id;
        template.action = req.action;
        template.is_system = req.is_system;
        if let Some(version) = req.version {
            template.version = version;
        }

        self.validator.validate_template(&template)?;
        self.templates.create(&template).await?;

        info!(template_id = template.id, "模板创建成功");
        Ok(template)
    }

    #[instrument(skip(self, req))]
    pub async fn update(&self, id: i64, req: UpdateTemplateRequest) -> Result<RuleTemplate> {
        req.validate()?;
        let mut template = self.get(id).await?;

        if let Some(name) = req.name {
            template.name = name;
        }
        if req.description.is_some() {
            template.description = req.description;
        }
        if let Some(category_id) = req.category_id {
            self.ensure_category(category_id).await?;
            template.category_id = Some(category_id);
        }
        match (req.rule_type, req.content) {
            (rule_type, Some(content)) => {
                template.rule_type = rule_type.unwrap_or(template.rule_type);
                template.content = content;
            }
            (Some(_), None) => {
                return Err(RuleError::Validation("修改模板类型时必须同时提供内容".into()));
            }
            (None, None) => {}
        }
        if let Some(action) = req.action {
            template.action = action;
        }
        if let Some(parameters) = req.parameters {
            template.parameters = parameters;
        }
        if let Some(version) = req.version {
            template.version = version;
        }
        if let Some(status) = req.status {
            template.status = status;
        }
        template.touch();

        self.validator.validate_template(&template)?;
        self.templates.update(&template).await?;
        Ok(template)
    }

    /// 删除模板，系统内置模板受保护
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<()> {
        let template = self.get(id).await?;
        if template.is_system {
            return Err(RuleError::Validation(format!(
                "系统模板 {} 不能删除",
                template.code
            )));
        }
        self.templates.delete(id).await?;
        info!(template_id = id, "模板已删除");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<RuleTemplate> {
        self.templates
            .find_by_id(id)
            .await?
            .ok_or_else(|| RuleError::not_found("RuleTemplate", id))
    }

    pub async fn list(&self, query: &TemplateQuery) -> Result<Vec<RuleTemplate>> {
        self.templates.find(query).await
    }

    /// 按参数实例化模板内容
    #[instrument(skip(self, params))]
    pub async fn instantiate(&self, id: i64, params: &HashMap<String, Value>) -> Result<CompiledContent> {
        let template = self.get(id).await?;
        if !template.is_valid() {
            return Err(RuleError::Validation(format!("模板 {} 未启用", template.code)));
        }
        let compiled = self.compiler.instantiate(&template, params)?;
        self.validator.validate(compiled.rule_type, &compiled.content)?;
        Ok(compiled)
    }

    async fn ensure_category(&self, category_id: i64) -> Result<()> {
        if self.categories.find_by_id(category_id).await?.is_none() {
            return Err(RuleError::not_found("RuleCategory", category_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SnowflakeIdGenerator;
    use crate::models::{RuleStatus, RuleType};
    use crate::repository::{MemoryCategoryRepository, MemoryTemplateRepository};
    use crate::script::RuntimePool;
    use serde_json::json;

    fn service() -> TemplateService {
        TemplateService::new(
            Arc::new(MemoryTemplateRepository::new()),
            Arc::new(MemoryCategoryRepository::new()),
            Arc::new(SnowflakeIdGenerator::default()),
            ContentValidator::new(Arc::new(RuntimePool::with_defaults().unwrap())),
        )
    }

    fn formula_request(code: &str, is_system: bool) -> CreateTemplateRequest {
        serde_json::from_value(json!({
            "code": code,
            "name": "积分公式",
            "type": "formula",
            "formula": "${amount} * ${rate}",
            "parameters": [
                {"name": "rate", "type": "number", "label": "倍率", "required": true, "min": 0, "max": 10}
            ],
            "isSystem": is_system
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_instantiate() {
        let service = service();
        let template = service.create(formula_request("points", false)).await.unwrap();
        assert_eq!(template.version, "1.0.0");

        let params = HashMap::from([("rate".to_string(), json!(2))]);
        let compiled = service.instantiate(template.id, &params).await.unwrap();
        assert_eq!(compiled.rule_type, RuleType::Formula);
        assert_eq!(compiled.content.formula, "${amount} * 2");

        let out_of_range = HashMap::from([("rate".to_string(), json!(50))]);
        let err = service.instantiate(template.id, &out_of_range).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_system_template_protected() {
        let service = service();
        let system = service.create(formula_request("sys", true)).await.unwrap();
        assert!(service.delete(system.id).await.is_err());

        let custom = service.create(formula_request("custom", false)).await.unwrap();
        service.delete(custom.id).await.unwrap();
        assert_eq!(service.get(custom.id).await.unwrap_err().code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_invalid_template_rejected() {
        let service = service();
        let req: CreateTemplateRequest = serde_json::from_value(json!({
            "code": "broken",
            "name": "坏公式",
            "type": "formula",
            "formula": "(${amount} * 2"
        }))
        .unwrap();
        assert!(service.create(req).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_template_cannot_instantiate() {
        let service = service();
        let template = service.create(formula_request("points", false)).await.unwrap();
        service
            .update(
                template.id,
                UpdateTemplateRequest {
                    status: Some(RuleStatus::Disabled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let params = HashMap::from([("rate".to_string(), json!(2))]);
        assert!(service.instantiate(template.id, &params).await.is_err());
    }
}
