//! 解释器实例
//!
//! 每个实例持有一个 rhai 引擎、调用状态、取消标志和事务槽。
//! 实例由池独占借出，脚本在阻塞线程上同步执行。

use parking_lot::Mutex;
use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Scope};
use rule_shared::config::ScriptConfig;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::db::{self, PersistenceBridge, TxSlot};
use super::helpers::{self, SCRIPT_LOG_TARGET, ScriptHelper};
use super::outcome::{CallState, ScriptOutcome, SharedState};
use crate::error::{Result, RuleError};
use crate::marshal::{dynamic_to_json, json_map_to_dynamic};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// 脚本可见的结果变量，执行前预先声明为 ()
const RESULT_VARIABLES: [&str; 4] = ["valid", "action", "error", "error_reason"];

/// 单个解释器实例
pub struct ScriptRuntime {
    id: u64,
    engine: Engine,
    state: SharedState,
    cancel: Arc<AtomicBool>,
    tx: TxSlot,
    timeout_ms: u64,
}

impl ScriptRuntime {
    /// 创建实例并注册全部辅助函数
    pub fn new(
        config: &ScriptConfig,
        custom_helpers: &[Arc<dyn ScriptHelper>],
        bridge: Option<Arc<dyn PersistenceBridge>>,
    ) -> Result<Self> {
        let state: SharedState = Arc::new(Mutex::new(CallState::default()));
        let cancel = Arc::new(AtomicBool::new(false));
        let tx: TxSlot = Arc::new(Mutex::new(None));
        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);

        let mut engine = Engine::new();
        apply_limits(&mut engine, config);

        let flag = cancel.clone();
        engine.on_progress(move |_ops| {
            if flag.load(Ordering::Relaxed) {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });
        engine.on_print(|text| tracing::info!(target: SCRIPT_LOG_TARGET, "{}", text));
        engine.on_debug(|text, _source, pos| {
            tracing::debug!(target: SCRIPT_LOG_TARGET, position = %pos, "{}", text)
        });

        helpers::register_builtins(&mut engine, state.clone());
        for helper in custom_helpers {
            helpers::register_custom(&mut engine, helper.clone())?;
        }
        if let Some(bridge) = bridge {
            db::register(&mut engine, bridge, tx.clone());
        }

        tracing::debug!(runtime_id = id, "创建解释器实例");

        Ok(Self {
            id,
            engine,
            state,
            cancel,
            tx,
            timeout_ms: config.timeout_ms,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// 取消标志，置位后脚本在下一次进度回调时终止
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// 只编译不执行
    pub fn check_syntax(&self, script: &str) -> Result<()> {
        self.engine
            .compile(script)
            .map(|_| ())
            .map_err(|e| RuleError::ScriptSyntax(e.to_string()))
    }

    /// 执行脚本并提取结果
    ///
    /// 上下文数据以变量 `context` 注入。`valid` 优先取 `success`/`error` 的调用结果，
    /// 否则取脚本变量 `valid`；两者都不是布尔值时返回结构性错误。
    pub fn run(&self, script: &str, data: &Map<String, Value>) -> Result<ScriptOutcome> {
        self.state.lock().reset();

        let ast = self
            .engine
            .compile(script)
            .map_err(|e| RuleError::ScriptSyntax(e.to_string()))?;

        let mut scope = Scope::new();
        scope.push_dynamic("context", json_map_to_dynamic(data));
        for name in RESULT_VARIABLES {
            scope.push_dynamic(name, Dynamic::UNIT);
        }

        let run_result = self.engine.run_ast_with_scope(&mut scope, &ast);
        db::abandon_transaction(&self.tx);
        run_result.map_err(|e| self.classify(*e))?;

        let state = self.state.lock().clone();

        let valid = state
            .valid
            .or_else(|| scope.get_value::<bool>("valid"))
            .ok_or(RuleError::InvalidResult)?;

        let mut context = data.clone();
        if let Some(Value::Object(script_context)) =
            scope.get_value::<Dynamic>("context").map(|d| dynamic_to_json(&d))
        {
            context.extend(script_context);
        }
        context.extend(state.context_writes);
        context.extend(state.variables.clone());

        Ok(ScriptOutcome {
            valid,
            action: state
                .action
                .unwrap_or_else(|| read_string(&scope, "action")),
            error: state.error.unwrap_or_else(|| read_string(&scope, "error")),
            error_reason: state
                .error_reason
                .unwrap_or_else(|| read_string(&scope, "error_reason")),
            variables: state.variables,
            context,
        })
    }

    /// 归还前重置：清空调用状态、回滚遗留事务、清除取消标志
    pub fn reset(&mut self, config: &ScriptConfig) {
        self.state.lock().reset();
        db::abandon_transaction(&self.tx);
        self.cancel.store(false, Ordering::Relaxed);
        apply_limits(&mut self.engine, config);
        self.timeout_ms = config.timeout_ms;
    }

    fn classify(&self, err: EvalAltResult) -> RuleError {
        match err {
            EvalAltResult::ErrorTerminated(..) => RuleError::ScriptTimeout {
                timeout_ms: self.timeout_ms,
            },
            EvalAltResult::ErrorTooManyOperations(..)
            | EvalAltResult::ErrorDataTooLarge(..)
            | EvalAltResult::ErrorStackOverflow(..)
            | EvalAltResult::ErrorTooManyVariables(..)
            | EvalAltResult::ErrorTooManyModules(..) => RuleError::ResourceLimit(err.to_string()),
            EvalAltResult::ErrorParsing(..) => RuleError::ScriptSyntax(err.to_string()),
            other => RuleError::ScriptRuntime(other.to_string()),
        }
    }
}

/// 读取字符串型结果变量，缺失或类型不符时为空串
fn read_string(scope: &Scope, name: &str) -> String {
    scope
        .get_value::<ImmutableString>(name)
        .map(|s| s.to_string())
        .unwrap_or_default()
}

fn apply_limits(engine: &mut Engine, config: &ScriptConfig) {
    engine.set_max_operations(config.max_operations);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);
    engine.set_max_call_levels(config.max_call_levels);
    engine.set_max_expr_depths(config.max_expr_depth, config.max_expr_depth);
}
