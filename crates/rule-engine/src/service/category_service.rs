//! 规则分类管理服务
//!
//! 维护分类树：层级与路径由父分类推导，`is_leaf` 随子分类增删同步。

use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use super::dto::{CreateCategoryRequest, UpdateCategoryRequest};
use crate::error::{Result, RuleError};
use crate::id::IdGenerator;
use crate::models::RuleCategory;
use crate::repository::{CategoryQuery, CategoryRepository, RuleQuery, RuleRepository};

/// 规则分类服务
pub struct CategoryService {
    categories: Arc<dyn CategoryRepository>,
    rules: Arc<dyn RuleRepository>,
    ids: Arc<dyn IdGenerator>,
}

impl CategoryService {
    pub fn new(
        categories: Arc<dyn CategoryRepository>,
        rules: Arc<dyn RuleRepository>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            categories,
            rules,
            ids,
        }
    }

    /// 创建分类，父分类随之变为非叶子节点
    #[instrument(skip(self, req), fields(code = %req.code, parent_id = req.parent_id))]
    pub async fn create(&self, req: CreateCategoryRequest) -> Result<RuleCategory> {
        req.validate()?;
        if self.categories.find_by_code(&req.code).await?.is_some() {
            return Err(RuleError::already_exists("RuleCategory", "code", &req.code));
        }

        let id = self.ids.next_id();
        let mut category = if req.parent_id == 0 {
            RuleCategory::root(id, req.code, req.name)
        } else {
            let mut parent = self.get(req.parent_id).await?;
            let child = RuleCategory::child_of(&parent, id, req.code, req.name);
            if parent.is_leaf {
                parent.set_leaf(false);
                self.categories.update(&parent).await?;
            }
            child
        };
        category.description = req.description;
        category.sorting = req.sorting;

        self.categories.create(&category).await?;
        info!(category_id = category.id, path = %category.path, "分类创建成功");
        Ok(category)
    }

    #[instrument(skip(self, req))]
    pub async fn update(&self, id: i64, req: UpdateCategoryRequest) -> Result<RuleCategory> {
        req.validate()?;
        let mut category = self.get(id).await?;

        if req.name.is_some() || req.description.is_some() {
            let name = req.name.unwrap_or_else(|| category.name.clone());
            let description = req.description.or_else(|| category.description.clone());
            category.rename(name, description);
        }
        if let Some(sorting) = req.sorting {
            category.set_sorting(sorting);
        }
        if let Some(status) = req.status {
            category.set_status(status);
        }

        self.categories.update(&category).await?;
        Ok(category)
    }

    /// 删除分类
    ///
    /// 仍有子分类或规则的分类不能删除；父分类失去最后一个子分类后恢复为叶子节点。
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<()> {
        let category = self.get(id).await?;

        if self.categories.count(&CategoryQuery::children_of(id)).await? > 0 {
            return Err(RuleError::Validation(format!(
                "分类 {} 下仍有子分类，不能删除",
                category.code
            )));
        }
        if self.rules.count(&RuleQuery::in_category(id)).await? > 0 {
            return Err(RuleError::Validation(format!(
                "分类 {} 下仍有规则，不能删除",
                category.code
            )));
        }

        self.categories.delete(id).await?;

        if !category.is_root()
            && self
                .categories
                .count(&CategoryQuery::children_of(category.parent_id))
                .await?
                == 0
            && let Some(mut parent) = self.categories.find_by_id(category.parent_id).await?
        {
            parent.set_leaf(true);
            self.categories.update(&parent).await?;
        }

        info!(category_id = id, "分类已删除");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<RuleCategory> {
        self.categories
            .find_by_id(id)
            .await?
            .ok_or_else(|| RuleError::not_found("RuleCategory", id))
    }

    /// 直接子分类，0 表示所有根分类
    pub async fn children(&self, parent_id: i64) -> Result<Vec<RuleCategory>> {
        self.categories.find(&CategoryQuery::children_of(parent_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SnowflakeIdGenerator;
    use crate::models::{Rule, RuleStatus, RuleType, Trigger};
    use crate::repository::{MemoryCategoryRepository, MemoryRuleRepository};

    fn service() -> (CategoryService, MemoryRuleRepository) {
        let rules = MemoryRuleRepository::new();
        let service = CategoryService::new(
            Arc::new(MemoryCategoryRepository::new()),
            Arc::new(rules.clone()),
            Arc::new(SnowflakeIdGenerator::default()),
        );
        (service, rules)
    }

    fn request(parent_id: i64, code: &str) -> CreateCategoryRequest {
        CreateCategoryRequest {
            parent_id,
            code: code.to_string(),
            name: code.to_uppercase(),
            description: None,
            sorting: 0,
        }
    }

    #[tokio::test]
    async fn test_tree_maintenance() {
        let (service, _) = service();
        let root = service.create(request(0, "root")).await.unwrap();
        assert_eq!(root.level, 1);
        assert!(root.is_leaf);

        let child = service.create(request(root.id, "child")).await.unwrap();
        assert_eq!(child.level, 2);
        assert_eq!(child.path, format!("/{}/{}/", root.id, child.id));
        assert!(!service.get(root.id).await.unwrap().is_leaf);
        assert_eq!(service.children(root.id).await.unwrap().len(), 1);

        let err = service.delete(root.id).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        service.delete(child.id).await.unwrap();
        assert!(service.get(root.id).await.unwrap().is_leaf);
        service.delete(root.id).await.unwrap();
        assert_eq!(service.get(root.id).await.unwrap_err().code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_delete_rejected_when_rules_attached() {
        let (service, rules) = service();
        let category = service.create(request(0, "risk")).await.unwrap();
        let rule = Rule::new(1, "r", "r", RuleType::Script)
            .with_script("valid = true;")
            .with_triggers([Trigger::Create])
            .with_category(category.id);
        rules.create(&rule).await.unwrap();

        assert!(service.delete(category.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_duplicate_code() {
        let (service, _) = service();
        let category = service.create(request(0, "risk")).await.unwrap();
        assert!(service.create(request(0, "risk")).await.is_err());

        let updated = service
            .update(
                category.id,
                UpdateCategoryRequest {
                    name: Some("风控".into()),
                    status: Some(RuleStatus::Disabled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "风控");
        assert_eq!(updated.status, RuleStatus::Disabled);
    }

    #[tokio::test]
    async fn test_missing_parent() {
        let (service, _) = service();
        let err = service.create(request(42, "orphan")).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
