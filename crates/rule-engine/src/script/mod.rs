//! 脚本运行时
//!
//! 基于 rhai 的嵌入式解释器：实例池、内置辅助函数、持久化桥接与结果提取。
//!
//! 脚本约定：
//! - 输入数据以变量 `context` 注入
//! - 通过 `valid = true/false` 或 `success(...)` / `error(...)` 给出结论
//! - 可选设置 `action`、`error`、`error_reason`

pub mod db;
pub mod helpers;
pub mod outcome;
pub mod pool;
pub mod query_builder;
pub mod runtime;

pub use db::{BridgeError, BridgeResult, DbOperations, DbTransaction, PersistenceBridge, Row};
pub use helpers::{MAX_HELPER_ARITY, SCRIPT_LOG_TARGET, ScriptHelper};
pub use outcome::ScriptOutcome;
pub use pool::{PoolStats, RuntimePool, RuntimePoolBuilder};
pub use query_builder::{BuiltQuery, QuerySpec};
pub use runtime::ScriptRuntime;

use serde_json::{Map, Value};

/// 用参数替换脚本模板中的 `${name}` 占位符
///
/// 未提供的占位符原样保留。
pub fn compile_template(template: &str, params: &Map<String, Value>) -> String {
    crate::template::render(template, params)
}
