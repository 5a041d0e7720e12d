//! 执行上下文与执行结果

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RuleError;
use crate::models::rule::{ExecutionTiming, GLOBAL_SCOPE, Rule, RuleType, Trigger};

/// 规则执行上下文
///
/// 每个事件构建一次，不持久化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleContext {
    pub scope: String,
    #[serde(default)]
    pub scope_id: String,
    pub trigger: Trigger,
    #[serde(default = "default_timing")]
    pub execution_timing: ExecutionTiming,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

fn default_timing() -> ExecutionTiming {
    ExecutionTiming::Before
}

impl RuleContext {
    pub fn new(scope: impl Into<String>, trigger: Trigger, timing: ExecutionTiming) -> Self {
        Self {
            scope: scope.into(),
            scope_id: String::new(),
            trigger,
            execution_timing: timing,
            data: Map::new(),
            tenant_id: None,
        }
    }

    pub fn with_scope_id(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = scope_id.into();
        self
    }

    /// 设置上下文数据；非对象值被忽略
    pub fn with_data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = map;
        }
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn is_global(&self) -> bool {
        self.scope == GLOBAL_SCOPE
    }

    /// 按点号路径读取上下文数据
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.data, path)
    }

    /// 将另一份数据按键合并进来，同名键被覆盖
    pub fn merge_data(&mut self, other: Map<String, Value>) {
        for (k, v) in other {
            self.data.insert(k, v);
        }
    }
}

/// 按点号路径读取嵌套字段
///
/// 支持数组下标：`items.0.price`。
pub fn lookup_path<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = data.get(first)?;

    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                arr.get(index)?
            }
            _ => return None,
        };
    }

    Some(current)
}

/// 规则链终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Succeeded,
    /// 业务失败或结构性错误
    Failed,
    /// 超时、崩溃、资源超限等硬性失败
    Aborted,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

/// 单条规则的执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleExecutionStep {
    pub rule_id: i64,
    pub rule_code: String,
    pub rule_name: String,
    pub rule_type: RuleType,
    pub priority: i32,
    pub input: Map<String, Value>,
    pub output: Map<String, Value>,
    pub variables: Map<String, Value>,
    pub valid: bool,
    pub action: String,
    pub error: String,
    pub error_reason: String,
    pub execute_time_ms: u64,
}

impl RuleExecutionStep {
    /// 以规则和输入快照开始一条记录
    pub fn begin(rule: &Rule, input: Map<String, Value>) -> Self {
        Self {
            rule_id: rule.id,
            rule_code: rule.code.clone(),
            rule_name: rule.name.clone(),
            rule_type: rule.rule_type,
            priority: rule.priority,
            input,
            output: Map::new(),
            variables: Map::new(),
            valid: false,
            action: String::new(),
            error: String::new(),
            error_reason: String::new(),
            execute_time_ms: 0,
        }
    }

    /// 以错误结束记录，错误原因码取自错误本身
    pub fn fail_with(&mut self, err: &RuleError) {
        self.valid = false;
        self.error = err.to_string();
        self.error_reason = err.code().to_string();
    }
}

/// 规则链执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub valid: bool,
    pub action: String,
    pub error: String,
    pub error_reason: String,
    pub status: ChainStatus,
    pub execution_timing: ExecutionTiming,
    pub execution_time_ms: u64,
    pub execution_chain: Vec<RuleExecutionStep>,
    pub context: Map<String, Value>,
}

impl RuleResult {
    /// 初始结果：成功、默认动作、空链
    pub fn start(ctx: &RuleContext, default_action: &str) -> Self {
        Self {
            valid: true,
            action: default_action.to_string(),
            error: String::new(),
            error_reason: String::new(),
            status: ChainStatus::Succeeded,
            execution_timing: ctx.execution_timing,
            execution_time_ms: 0,
            execution_chain: Vec::new(),
            context: ctx.data.clone(),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == ChainStatus::Succeeded
    }
}
