//! 规则脚本与链式执行引擎
//!
//! 提供可在运行时编辑的业务规则能力，支持：
//! - 条件、脚本、公式三种规则内容
//! - 嵌入式脚本解释器池，带资源限制、超时与崩溃隔离
//! - 按作用域、触发事件、执行时机匹配规则，按优先级链式执行
//! - 规则模板参数化实例化
//! - 规则、分类、模板的管理服务

pub mod chain;
pub mod cli;
pub mod error;
pub mod evaluator;
pub mod id;
pub mod marshal;
pub mod matcher;
pub mod models;
pub mod operators;
pub mod repository;
pub mod script;
pub mod service;
pub mod template;

pub use chain::RuleChainExecutor;
pub use error::{Result, RuleError};
pub use evaluator::{ConditionEvaluator, FormulaEvaluator, FormulaValue};
pub use id::{IdGenerator, SnowflakeIdGenerator};
pub use marshal::ScriptValue;
pub use matcher::RuleMatcher;
pub use models::{
    ChainStatus, Condition, ExecutionTiming, Rule, RuleCategory, RuleContent, RuleContext,
    RuleExecutionStep, RuleResult, RuleStatus, RuleType, Trigger,
};
pub use operators::Operator;
pub use script::{PersistenceBridge, RuntimePool, ScriptHelper, ScriptOutcome};
pub use template::{RuleTemplate, TemplateCompiler};
