//! 规则引擎领域模型

pub mod category;
pub mod context;
pub mod rule;

pub use category::RuleCategory;
pub use context::{ChainStatus, RuleContext, RuleExecutionStep, RuleResult, lookup_path};
pub use rule::{
    Condition, ExecutionTiming, GLOBAL_SCOPE, Rule, RuleContent, RuleStatus, RuleType, Trigger,
};
