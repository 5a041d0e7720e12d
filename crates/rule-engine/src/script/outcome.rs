//! 单次脚本执行的结果累积器

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// `success` / `error` / `set_context_value` 写入的调用状态
///
/// 每个解释器实例持有一份，辅助函数闭包通过共享指针写入，释放实例时清空。
#[derive(Debug, Default, Clone)]
pub struct CallState {
    /// 由 `success`/`error` 设置，优先于脚本变量 `valid`
    pub valid: Option<bool>,
    pub action: Option<String>,
    pub error: Option<String>,
    pub error_reason: Option<String>,
    pub variables: Map<String, Value>,
    pub context_writes: Map<String, Value>,
}

impl CallState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record_success(&mut self, action: String, variables: Map<String, Value>) {
        self.valid = Some(true);
        self.action = Some(action);
        self.variables.extend(variables);
    }

    pub fn record_error(&mut self, message: String, reason: Option<String>) {
        self.valid = Some(false);
        self.error = Some(message);
        if reason.is_some() {
            self.error_reason = reason;
        }
    }
}

pub(crate) type SharedState = Arc<Mutex<CallState>>;

/// 脚本执行结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOutcome {
    pub valid: bool,
    pub action: String,
    pub error: String,
    pub error_reason: String,
    pub variables: Map<String, Value>,
    /// 合并后的输出上下文
    pub context: Map<String, Value>,
}
