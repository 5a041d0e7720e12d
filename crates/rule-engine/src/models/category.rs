//! 规则分类
//!
//! 分类只用于管理和分组，不参与规则匹配。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::rule::RuleStatus;

/// 规则分类（树形结构）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCategory {
    pub id: i64,
    /// 父分类 ID，0 表示根分类
    #[serde(default)]
    pub parent_id: i64,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 层级，根分类为 1
    pub level: i32,
    /// 物化路径，如 "/1/7/"
    pub path: String,
    pub is_leaf: bool,
    #[serde(default)]
    pub sorting: i32,
    pub status: RuleStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl RuleCategory {
    /// 创建根分类
    pub fn root(id: i64, code: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            parent_id: 0,
            code: code.into(),
            name: name.into(),
            description: None,
            level: 1,
            path: format!("/{}/", id),
            is_leaf: true,
            sorting: 0,
            status: RuleStatus::Enabled,
            created_at: now,
            updated_at: now,
        }
    }

    /// 在父分类下创建子分类，层级和路径由父分类推导
    pub fn child_of(
        parent: &RuleCategory,
        id: i64,
        code: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut category = Self::root(id, code, name);
        category.parent_id = parent.id;
        category.level = parent.level + 1;
        category.path = format!("{}{}/", parent.path, id);
        category
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == 0
    }

    /// 路径上的所有祖先 ID（不含自身），从根开始
    pub fn ancestor_ids(&self) -> Vec<i64> {
        self.path
            .split('/')
            .filter_map(|s| s.parse::<i64>().ok())
            .filter(|id| *id != self.id)
            .collect()
    }

    pub fn set_leaf(&mut self, is_leaf: bool) {
        self.is_leaf = is_leaf;
        self.updated_at = Utc::now();
    }

    pub fn rename(&mut self, name: impl Into<String>, description: Option<String>) {
        self.name = name.into();
        self.description = description;
        self.updated_at = Utc::now();
    }

    pub fn set_sorting(&mut self, sorting: i32) {
        self.sorting = sorting;
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: RuleStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_derives_level_and_path() {
        let root = RuleCategory::root(1, "finance", "财务");
        let child = RuleCategory::child_of(&root, 7, "payment", "付款");
        let grandchild = RuleCategory::child_of(&child, 12, "refund", "退款");

        assert!(root.is_root());
        assert_eq!(root.path, "/1/");
        assert_eq!(child.level, 2);
        assert_eq!(child.path, "/1/7/");
        assert_eq!(grandchild.level, 3);
        assert_eq!(grandchild.path, "/1/7/12/");
        assert_eq!(grandchild.parent_id, 7);
        assert_eq!(grandchild.ancestor_ids(), vec![1, 7]);
    }

    #[test]
    fn test_new_category_is_leaf() {
        let mut root = RuleCategory::root(1, "c", "分类");
        assert!(root.is_leaf);
        root.set_leaf(false);
        assert!(!root.is_leaf);
    }
}
