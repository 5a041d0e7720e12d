//! 解释器实例池
//!
//! 每次执行独占借出一个实例，执行完毕重置后归还。
//! 超时或崩溃的实例直接丢弃，不会回到池中。

use parking_lot::Mutex;
use rule_shared::config::ScriptConfig;
use rule_shared::observability::metrics as rule_metrics;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::db::PersistenceBridge;
use super::helpers::ScriptHelper;
use super::outcome::ScriptOutcome;
use super::runtime::ScriptRuntime;
use crate::error::{Result, RuleError};

/// 池统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
    pub idle: usize,
}

/// 池构建器
pub struct RuntimePoolBuilder {
    config: ScriptConfig,
    helpers: Vec<Arc<dyn ScriptHelper>>,
    bridge: Option<Arc<dyn PersistenceBridge>>,
}

impl RuntimePoolBuilder {
    pub fn new(config: ScriptConfig) -> Self {
        Self {
            config,
            helpers: Vec::new(),
            bridge: None,
        }
    }

    /// 注册自定义辅助函数
    pub fn helper(mut self, helper: Arc<dyn ScriptHelper>) -> Self {
        self.helpers.push(helper);
        self
    }

    /// 注入持久化桥接，脚本中的 `db_*` 函数随之可用
    pub fn bridge(mut self, bridge: Arc<dyn PersistenceBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// 构建池并预热一个实例，辅助函数注册错误在此处暴露
    pub fn build(self) -> Result<RuntimePool> {
        let pool = RuntimePool {
            config: self.config,
            helpers: self.helpers,
            bridge: self.bridge,
            idle: Mutex::new(Vec::new()),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        };
        let warm = pool.create()?;
        pool.idle.lock().push(warm);
        Ok(pool)
    }
}

/// 解释器实例池
pub struct RuntimePool {
    config: ScriptConfig,
    helpers: Vec<Arc<dyn ScriptHelper>>,
    bridge: Option<Arc<dyn PersistenceBridge>>,
    idle: Mutex<Vec<ScriptRuntime>>,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl RuntimePool {
    pub fn builder(config: ScriptConfig) -> RuntimePoolBuilder {
        RuntimePoolBuilder::new(config)
    }

    /// 使用默认配置且不带桥接的池
    pub fn with_defaults() -> Result<Self> {
        Self::builder(ScriptConfig::default()).build()
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    fn create(&self) -> Result<ScriptRuntime> {
        let runtime = ScriptRuntime::new(&self.config, &self.helpers, self.bridge.clone())?;
        self.created.fetch_add(1, Ordering::Relaxed);
        rule_metrics::record_runtime_event("created");
        Ok(runtime)
    }

    /// 借出一个实例，池空时新建
    pub fn acquire(&self) -> Result<ScriptRuntime> {
        if let Some(runtime) = self.idle.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            rule_metrics::record_runtime_event("reused");
            return Ok(runtime);
        }
        self.create()
    }

    /// 重置后归还，超过空闲上限的实例直接释放
    pub fn release(&self, mut runtime: ScriptRuntime) {
        runtime.reset(&self.config);
        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_idle {
            idle.push(runtime);
        }
    }

    fn discard(&self, runtime_id: u64, reason: &str) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        rule_metrics::record_runtime_event("discarded");
        warn!(runtime_id, reason, "丢弃解释器实例");
    }

    /// 在阻塞线程上执行脚本，超时后终止并丢弃实例
    pub async fn execute(&self, script: &str, data: &Map<String, Value>) -> Result<ScriptOutcome> {
        let runtime = self.acquire()?;
        let runtime_id = runtime.id();
        let cancel = runtime.cancel_flag();
        let script = script.to_string();
        let data = data.clone();

        let task = tokio::task::spawn_blocking(move || {
            let result = runtime.run(&script, &data);
            (runtime, result)
        });

        let joined = if self.config.timeout_ms == 0 {
            task.await
        } else {
            match tokio::time::timeout(Duration::from_millis(self.config.timeout_ms), task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.store(true, Ordering::Relaxed);
                    self.discard(runtime_id, "timeout");
                    return Err(RuleError::ScriptTimeout {
                        timeout_ms: self.config.timeout_ms,
                    });
                }
            }
        };

        match joined {
            Ok((runtime, result)) => {
                match &result {
                    // 被取消标志终止的实例状态不可信
                    Err(RuleError::ScriptTimeout { .. }) => self.discard(runtime_id, "terminated"),
                    _ => self.release(runtime),
                }
                result
            }
            Err(join_err) => {
                self.discard(runtime_id, "panic");
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    join_err.to_string()
                };
                Err(RuleError::ScriptPanic(message))
            }
        }
    }

    /// 语法检查，不占用执行超时
    pub fn check_syntax(&self, script: &str) -> Result<()> {
        let runtime = self.acquire()?;
        let result = runtime.check_syntax(script);
        self.release(runtime);
        debug!(ok = result.is_ok(), "脚本语法检查");
        result
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: self.idle_count(),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::ScriptValue;
    use crate::script::db::fake::RecordingBridge;
    use serde_json::json;

    struct Exploding;

    impl ScriptHelper for Exploding {
        fn name(&self) -> &str {
            "explode"
        }

        fn arity(&self) -> usize {
            0
        }

        fn call(&self, _args: Vec<ScriptValue>) -> std::result::Result<ScriptValue, String> {
            panic!("helper exploded");
        }
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_execute_success() {
        let pool = RuntimePool::with_defaults().unwrap();
        let outcome = pool
            .execute(
                r#"
                let level = if context.amount >= 1000 { "gold" } else { "silver" };
                success("grant", #{ level: level });
                "#,
                &data(json!({"amount": 1500})),
            )
            .await
            .unwrap();

        assert!(outcome.valid);
        assert_eq!(outcome.action, "grant");
        assert_eq!(outcome.context["level"], json!("gold"));
        assert_eq!(outcome.context["amount"], json!(1500));
    }

    #[tokio::test]
    async fn test_missing_valid() {
        let pool = RuntimePool::with_defaults().unwrap();
        let err = pool.execute("let a = 1;", &Map::new()).await.unwrap_err();
        assert!(matches!(err, RuleError::InvalidResult));
        assert_eq!(pool.stats().discarded, 0);
    }

    #[tokio::test]
    async fn test_timeout_discards_runtime() {
        let config = ScriptConfig {
            timeout_ms: 50,
            max_operations: 0,
            ..Default::default()
        };
        let pool = RuntimePool::builder(config).build().unwrap();

        let err = pool.execute("loop { }", &Map::new()).await.unwrap_err();
        assert_eq!(err.code(), "SCRIPT_TIMEOUT");
        assert_eq!(pool.stats().discarded, 1);

        // 池仍然可用
        let outcome = pool.execute("valid = true;", &Map::new()).await.unwrap();
        assert!(outcome.valid);
    }

    #[tokio::test]
    async fn test_panic_is_recovered() {
        let pool = RuntimePool::builder(ScriptConfig::default())
            .helper(Arc::new(Exploding))
            .build()
            .unwrap();

        let err = pool.execute("explode(); valid = true;", &Map::new()).await.unwrap_err();
        match err {
            RuleError::ScriptPanic(msg) => assert!(msg.contains("helper exploded")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(pool.stats().discarded, 1);

        let outcome = pool.execute("valid = false;", &Map::new()).await.unwrap();
        assert!(!outcome.valid);
    }

    #[tokio::test]
    async fn test_runtime_reuse() {
        let pool = RuntimePool::with_defaults().unwrap();
        for _ in 0..3 {
            pool.execute("valid = true;", &Map::new()).await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 3);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn test_state_does_not_leak_between_runs() {
        let pool = RuntimePool::with_defaults().unwrap();
        pool.execute(r#"error("first", "R1");"#, &Map::new()).await.unwrap();

        let outcome = pool.execute("valid = true;", &Map::new()).await.unwrap();
        assert!(outcome.valid);
        assert_eq!(outcome.error, "");
        assert_eq!(outcome.error_reason, "");
    }

    #[tokio::test]
    async fn test_max_idle_respected() {
        let config = ScriptConfig {
            max_idle: 1,
            ..Default::default()
        };
        let pool = RuntimePool::builder(config).build().unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_bridge_transaction_through_pool() {
        let bridge = RecordingBridge::default();
        let journal = bridge.journal.clone();
        let pool = RuntimePool::builder(ScriptConfig::default())
            .bridge(Arc::new(bridge))
            .build()
            .unwrap();

        let outcome = pool
            .execute(
                r#"
                let r = db_transaction(|| {
                    db_insert("ledger", #{ user_id: context.user_id, delta: -10 });
                    true
                });
                valid = r[0] == true;
                "#,
                &data(json!({"user_id": 7})),
            )
            .await
            .unwrap();

        assert!(outcome.valid);
        assert_eq!(journal.lock().committed, 1);
    }

    #[test]
    fn test_check_syntax() {
        let pool = RuntimePool::with_defaults().unwrap();
        assert!(pool.check_syntax("valid = true;").is_ok());
        assert_eq!(
            pool.check_syntax("valid = ").unwrap_err().code(),
            "SCRIPT_SYNTAX_ERROR"
        );
    }
}
