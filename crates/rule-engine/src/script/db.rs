//! 脚本数据库桥接
//!
//! 脚本在阻塞线程上同步执行，因此桥接接口是同步的。
//! 所有 `db_*` 辅助函数都返回二元数组 `[result, error_message]`，
//! 成功时 `error_message` 为 `()`，桥接错误不会中断脚本。

use parking_lot::Mutex;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, NativeCallContext};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::query_builder::QuerySpec;
use crate::marshal::{dynamic_to_json, json_map_to_dynamic, json_to_dynamic};

/// 一行记录
pub type Row = Map<String, Value>;

/// 桥接错误，原样展示给脚本
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct BridgeError(pub String);

impl BridgeError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// 数据库基础操作
pub trait DbOperations: Send + Sync {
    /// 插入一行，返回新记录 ID
    fn insert(&self, table: &str, data: &Row) -> BridgeResult<i64>;
    /// 按条件语句更新，返回影响行数
    fn update(&self, table: &str, data: &Row, where_clause: &str, args: &[Value]) -> BridgeResult<u64>;
    /// 按字段等值匹配更新
    fn update_by_match(&self, table: &str, data: &Row, matcher: &Row) -> BridgeResult<u64>;
    fn delete(&self, table: &str, where_clause: &str, args: &[Value]) -> BridgeResult<u64>;
    fn delete_by_match(&self, table: &str, matcher: &Row) -> BridgeResult<u64>;
    fn query(&self, sql: &str, args: &[Value]) -> BridgeResult<Vec<Row>>;
    fn query_one(&self, sql: &str, args: &[Value]) -> BridgeResult<Option<Row>>;
    fn execute(&self, sql: &str, args: &[Value]) -> BridgeResult<u64>;
}

/// 进行中的事务
pub trait DbTransaction: DbOperations {
    fn commit(self: Box<Self>) -> BridgeResult<()>;
    fn rollback(self: Box<Self>) -> BridgeResult<()>;
}

/// 注入给脚本运行时的持久化能力
pub trait PersistenceBridge: DbOperations {
    fn begin(&self) -> BridgeResult<Box<dyn DbTransaction>>;
}

/// 每个解释器实例独占的事务槽
pub(crate) type TxSlot = Arc<Mutex<Option<Box<dyn DbTransaction>>>>;

/// 在当前事务（若有）或桥接本身上执行操作
macro_rules! with_ops {
    ($handle:expr, |$ops:ident| $body:expr) => {{
        let guard = $handle.tx.lock();
        match guard.as_deref() {
            Some($ops) => $body,
            None => {
                let $ops = $handle.bridge.as_ref();
                $body
            }
        }
    }};
}

#[derive(Clone)]
struct DbHandle {
    bridge: Arc<dyn PersistenceBridge>,
    tx: TxSlot,
}

fn pair(result: BridgeResult<Dynamic>) -> Array {
    match result {
        Ok(value) => vec![value, Dynamic::UNIT],
        Err(err) => vec![Dynamic::UNIT, Dynamic::from(err.0)],
    }
}

fn to_row(map: &rhai::Map) -> Row {
    map.iter()
        .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
        .collect()
}

fn to_args(args: &Array) -> Vec<Value> {
    args.iter().map(dynamic_to_json).collect()
}

fn rows_to_dynamic(rows: Vec<Row>) -> Dynamic {
    Dynamic::from_array(rows.iter().map(json_map_to_dynamic).collect())
}

fn count_to_dynamic(n: u64) -> Dynamic {
    Dynamic::from_int(n as rhai::INT)
}

/// 回滚失败只记录日志，原始错误优先返回
fn rollback_quietly(tx: Box<dyn DbTransaction>) {
    if let Err(e) = tx.rollback() {
        tracing::warn!(target: "rule_script", error = %e, "事务回滚失败");
    }
}

/// 释放实例前清理遗留事务
pub(crate) fn abandon_transaction(slot: &TxSlot) {
    if let Some(tx) = slot.lock().take() {
        tracing::warn!(target: "rule_script", "脚本结束时存在未完成的事务，已回滚");
        rollback_quietly(tx);
    }
}

/// 注册数据库辅助函数
pub(crate) fn register(engine: &mut Engine, bridge: Arc<dyn PersistenceBridge>, tx: TxSlot) {
    let handle = DbHandle { bridge, tx };

    let h = handle.clone();
    engine.register_fn("db_insert", move |table: ImmutableString, data: rhai::Map| {
        pair(with_ops!(h, |ops| ops.insert(&table, &to_row(&data)).map(Dynamic::from_int)))
    });

    let h = handle.clone();
    engine.register_fn(
        "db_update",
        move |table: ImmutableString, data: rhai::Map, where_clause: ImmutableString, args: Array| {
            pair(with_ops!(h, |ops| ops
                .update(&table, &to_row(&data), &where_clause, &to_args(&args))
                .map(count_to_dynamic)))
        },
    );
    let h = handle.clone();
    engine.register_fn(
        "db_update",
        move |table: ImmutableString, data: rhai::Map, where_clause: ImmutableString| {
            pair(with_ops!(h, |ops| ops
                .update(&table, &to_row(&data), &where_clause, &[])
                .map(count_to_dynamic)))
        },
    );

    let h = handle.clone();
    engine.register_fn(
        "db_update_by_match",
        move |table: ImmutableString, data: rhai::Map, matcher: rhai::Map| {
            pair(with_ops!(h, |ops| ops
                .update_by_match(&table, &to_row(&data), &to_row(&matcher))
                .map(count_to_dynamic)))
        },
    );

    let h = handle.clone();
    engine.register_fn(
        "db_delete",
        move |table: ImmutableString, where_clause: ImmutableString, args: Array| {
            pair(with_ops!(h, |ops| ops
                .delete(&table, &where_clause, &to_args(&args))
                .map(count_to_dynamic)))
        },
    );
    let h = handle.clone();
    engine.register_fn("db_delete", move |table: ImmutableString, where_clause: ImmutableString| {
        pair(with_ops!(h, |ops| ops.delete(&table, &where_clause, &[]).map(count_to_dynamic)))
    });

    let h = handle.clone();
    engine.register_fn("db_delete_by_match", move |table: ImmutableString, matcher: rhai::Map| {
        pair(with_ops!(h, |ops| ops
            .delete_by_match(&table, &to_row(&matcher))
            .map(count_to_dynamic)))
    });

    let h = handle.clone();
    engine.register_fn("db_query", move |sql: ImmutableString, args: Array| {
        pair(with_ops!(h, |ops| ops.query(&sql, &to_args(&args)).map(rows_to_dynamic)))
    });
    let h = handle.clone();
    engine.register_fn("db_query", move |sql: ImmutableString| {
        pair(with_ops!(h, |ops| ops.query(&sql, &[]).map(rows_to_dynamic)))
    });

    let h = handle.clone();
    engine.register_fn("db_query_one", move |sql: ImmutableString, args: Array| {
        pair(with_ops!(h, |ops| ops
            .query_one(&sql, &to_args(&args))
            .map(|row| row.map(|r| json_map_to_dynamic(&r)).unwrap_or(Dynamic::UNIT))))
    });
    let h = handle.clone();
    engine.register_fn("db_query_one", move |sql: ImmutableString| {
        pair(with_ops!(h, |ops| ops
            .query_one(&sql, &[])
            .map(|row| row.map(|r| json_map_to_dynamic(&r)).unwrap_or(Dynamic::UNIT))))
    });

    let h = handle.clone();
    engine.register_fn("db_execute", move |sql: ImmutableString, args: Array| {
        pair(with_ops!(h, |ops| ops.execute(&sql, &to_args(&args)).map(count_to_dynamic)))
    });
    let h = handle.clone();
    engine.register_fn("db_execute", move |sql: ImmutableString| {
        pair(with_ops!(h, |ops| ops.execute(&sql, &[]).map(count_to_dynamic)))
    });

    let h = handle.clone();
    engine.register_fn("db_select", move |spec: rhai::Map| {
        pair(QuerySpec::from_json(&to_row(&spec)).and_then(|q| q.build_select()).and_then(|q| {
            with_ops!(h, |ops| ops.query(&q.sql, &q.args).map(rows_to_dynamic))
        }))
    });

    let h = handle.clone();
    engine.register_fn("db_count", move |spec: rhai::Map| {
        pair(QuerySpec::from_json(&to_row(&spec)).and_then(|q| q.build_count()).and_then(|q| {
            with_ops!(h, |ops| ops.query_one(&q.sql, &q.args)).map(|row| {
                let count = row
                    .and_then(|r| r.get("count").and_then(Value::as_i64))
                    .unwrap_or(0);
                Dynamic::from_int(count)
            })
        }))
    });

    engine.register_fn("db_build_sql", |spec: rhai::Map| {
        pair(QuerySpec::from_json(&to_row(&spec)).and_then(|q| q.build_select()).map(|q| {
            let mut out = rhai::Map::new();
            out.insert("sql".into(), Dynamic::from(q.sql));
            out.insert(
                "args".into(),
                Dynamic::from_array(q.args.iter().map(json_to_dynamic).collect()),
            );
            Dynamic::from_map(out)
        }))
    });

    let h = handle;
    engine.register_fn(
        "db_transaction",
        move |ctx: NativeCallContext, callback: FnPtr| -> Result<Array, Box<EvalAltResult>> {
            run_transaction(&h, &ctx, &callback)
        },
    );
}

/// 在单个事务内执行回调
///
/// 回调正常返回则提交；回调出错或显式返回 `false` 则回滚。
/// 超时终止与资源超限在回滚后继续向上传播。
fn run_transaction(
    handle: &DbHandle,
    ctx: &NativeCallContext,
    callback: &FnPtr,
) -> Result<Array, Box<EvalAltResult>> {
    {
        let mut slot = handle.tx.lock();
        if slot.is_some() {
            return Ok(pair(Err(BridgeError::new("不支持嵌套事务"))));
        }
        match handle.bridge.begin() {
            Ok(tx) => *slot = Some(tx),
            Err(e) => return Ok(pair(Err(e))),
        }
    }

    let outcome: Result<Dynamic, Box<EvalAltResult>> = callback.call_within_context(ctx, ());
    let Some(tx) = handle.tx.lock().take() else {
        return Ok(pair(Err(BridgeError::new("事务已丢失"))));
    };

    match outcome {
        Ok(value) if value.as_bool() == Ok(false) => {
            tracing::debug!(target: "rule_script", "事务回调返回 false，回滚");
            match tx.rollback() {
                Ok(()) => Ok(pair(Ok(value))),
                Err(e) => Ok(pair(Err(e))),
            }
        }
        Ok(value) => match tx.commit() {
            Ok(()) => Ok(pair(Ok(value))),
            Err(e) => Ok(pair(Err(e))),
        },
        Err(err) => {
            rollback_quietly(tx);
            if is_fatal(&err) {
                return Err(err);
            }
            Ok(pair(Err(BridgeError::new(err.to_string()))))
        }
    }
}

fn is_fatal(err: &EvalAltResult) -> bool {
    matches!(
        err,
        EvalAltResult::ErrorTerminated(..)
            | EvalAltResult::ErrorTooManyOperations(..)
            | EvalAltResult::ErrorDataTooLarge(..)
            | EvalAltResult::ErrorStackOverflow(..)
    )
}

/// 测试用的内存桥接，记录每次调用
#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    #[derive(Default)]
    pub(crate) struct Journal {
        pub calls: Vec<String>,
        pub committed: usize,
        pub rolled_back: usize,
    }

    #[derive(Clone, Default)]
    pub(crate) struct RecordingBridge {
        pub journal: Arc<Mutex<Journal>>,
        pub rows: Vec<Row>,
        pub fail_with: Option<String>,
    }

    impl RecordingBridge {
        fn log(&self, call: String) -> BridgeResult<()> {
            self.journal.lock().calls.push(call);
            match &self.fail_with {
                Some(msg) => Err(BridgeError::new(msg.clone())),
                None => Ok(()),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.journal.lock().calls.clone()
        }
    }

    impl DbOperations for RecordingBridge {
        fn insert(&self, table: &str, data: &Row) -> BridgeResult<i64> {
            self.log(format!("insert {} {}", table, Value::Object(data.clone())))?;
            Ok(42)
        }

        fn update(&self, table: &str, _data: &Row, where_clause: &str, args: &[Value]) -> BridgeResult<u64> {
            self.log(format!("update {} where {} {:?}", table, where_clause, args))?;
            Ok(1)
        }

        fn update_by_match(&self, table: &str, _data: &Row, matcher: &Row) -> BridgeResult<u64> {
            self.log(format!("update_by_match {} {}", table, Value::Object(matcher.clone())))?;
            Ok(2)
        }

        fn delete(&self, table: &str, where_clause: &str, _args: &[Value]) -> BridgeResult<u64> {
            self.log(format!("delete {} where {}", table, where_clause))?;
            Ok(1)
        }

        fn delete_by_match(&self, table: &str, _matcher: &Row) -> BridgeResult<u64> {
            self.log(format!("delete_by_match {}", table))?;
            Ok(3)
        }

        fn query(&self, sql: &str, _args: &[Value]) -> BridgeResult<Vec<Row>> {
            self.log(format!("query {}", sql))?;
            Ok(self.rows.clone())
        }

        fn query_one(&self, sql: &str, _args: &[Value]) -> BridgeResult<Option<Row>> {
            self.log(format!("query_one {}", sql))?;
            if sql.contains("COUNT(*)") {
                let mut row = Row::new();
                row.insert("count".into(), Value::from(self.rows.len()));
                return Ok(Some(row));
            }
            Ok(self.rows.first().cloned())
        }

        fn execute(&self, sql: &str, _args: &[Value]) -> BridgeResult<u64> {
            self.log(format!("execute {}", sql))?;
            Ok(5)
        }
    }

    impl DbTransaction for RecordingBridge {
        fn commit(self: Box<Self>) -> BridgeResult<()> {
            self.journal.lock().committed += 1;
            Ok(())
        }

        fn rollback(self: Box<Self>) -> BridgeResult<()> {
            self.journal.lock().rolled_back += 1;
            Ok(())
        }
    }

    impl PersistenceBridge for RecordingBridge {
        fn begin(&self) -> BridgeResult<Box<dyn DbTransaction>> {
            self.journal.lock().calls.push("begin".into());
            Ok(Box::new(self.clone()))
        }
    }
}
