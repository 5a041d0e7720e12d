//! 表达式评估器
//!
//! 条件评估器和公式评估器都是纯函数，不依赖脚本运行时。

pub mod condition;
pub mod formula;

pub use condition::{ConditionEvaluator, ConditionOutcome};
pub use formula::{FormulaEvaluator, FormulaValue};
