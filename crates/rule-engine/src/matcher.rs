//! 规则匹配
//!
//! 先取全局作用域的已启用规则，再取上下文作用域的已启用规则，
//! 按目标列表、执行时机和触发事件过滤后按 ID 去重。

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::models::{GLOBAL_SCOPE, Rule, RuleContext};
use crate::repository::{RuleQuery, RuleRepository};

/// 规则匹配器
#[derive(Clone)]
pub struct RuleMatcher {
    repository: Arc<dyn RuleRepository>,
}

impl RuleMatcher {
    pub fn new(repository: Arc<dyn RuleRepository>) -> Self {
        Self { repository }
    }

    /// 查找适用于上下文的规则，保持发现顺序（全局规则在前）
    #[instrument(skip(self, ctx), fields(scope = %ctx.scope, trigger = %ctx.trigger))]
    pub async fn find_matching(&self, ctx: &RuleContext) -> Result<Vec<Rule>> {
        let mut candidates = self
            .repository
            .find(&RuleQuery::enabled_in_scope(GLOBAL_SCOPE))
            .await?;

        if !ctx.is_global() {
            candidates.extend(
                self.repository
                    .find(&RuleQuery::enabled_in_scope(ctx.scope.clone()))
                    .await?,
            );
        }

        let mut seen = HashSet::new();
        let matched: Vec<Rule> = candidates
            .into_iter()
            .filter(|rule| rule.matches(ctx))
            .filter(|rule| seen.insert(rule.id))
            .collect();

        debug!(matched = matched.len(), "规则匹配完成");
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionTiming, RuleType, Trigger};
    use crate::repository::{MemoryRuleRepository, MockRuleRepository};

    fn rule(id: i64, scope: &str) -> Rule {
        Rule::new(id, format!("r{id}"), format!("rule {id}"), RuleType::Script)
            .with_script("valid = true;")
            .with_triggers([Trigger::Submit])
            .with_scope(scope, vec![])
    }

    fn ctx(scope: &str) -> RuleContext {
        RuleContext::new(scope, Trigger::Submit, ExecutionTiming::Before).with_scope_id("42")
    }

    async fn matcher(rules: Vec<Rule>) -> RuleMatcher {
        let repo = MemoryRuleRepository::with_rules(rules).await.unwrap();
        RuleMatcher::new(Arc::new(repo))
    }

    fn ids(rules: &[Rule]) -> Vec<i64> {
        rules.iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn test_global_rules_first() {
        let m = matcher(vec![
            rule(1, "order").with_sorting(0),
            rule(2, GLOBAL_SCOPE).with_sorting(5),
            rule(3, "user"),
        ])
        .await;

        let matched = m.find_matching(&ctx("order")).await.unwrap();
        assert_eq!(ids(&matched), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_global_context_only_global_rules() {
        let m = matcher(vec![rule(1, "order"), rule(2, GLOBAL_SCOPE)]).await;
        let matched = m.find_matching(&ctx(GLOBAL_SCOPE)).await.unwrap();
        assert_eq!(ids(&matched), vec![2]);
    }

    #[tokio::test]
    async fn test_filters() {
        let m = matcher(vec![
            rule(1, "order").with_scope("order", vec!["42".into()]),
            rule(2, "order").with_scope("order", vec!["7".into()]),
            rule(3, "order").with_timing(ExecutionTiming::After),
            rule(4, "order").with_timing(ExecutionTiming::Both),
            rule(5, "order").with_triggers([Trigger::Cancel]),
            rule(6, "order").disabled(),
        ])
        .await;

        let matched = m.find_matching(&ctx("order")).await.unwrap();
        assert_eq!(ids(&matched), vec![1, 4]);
    }

    #[tokio::test]
    async fn test_duplicates_removed() {
        let mut repo = MockRuleRepository::new();
        repo.expect_find()
            .times(2)
            .returning(|_| Ok(vec![rule(1, GLOBAL_SCOPE), rule(2, "order")]));

        let m = RuleMatcher::new(Arc::new(repo));
        let matched = m.find_matching(&ctx("order")).await.unwrap();
        assert_eq!(ids(&matched), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_repository_error_propagates() {
        let mut repo = MockRuleRepository::new();
        repo.expect_find()
            .returning(|_| Err(crate::error::RuleError::Repository("down".into())));

        let m = RuleMatcher::new(Arc::new(repo));
        let err = m.find_matching(&ctx("order")).await.unwrap_err();
        assert_eq!(err.code(), "REPOSITORY_ERROR");
    }
}
