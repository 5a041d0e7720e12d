//! 脚本内置辅助函数
//!
//! 每个解释器实例创建时注册一次。结果类函数（`success`、`error`、
//! `set_context_value`）写入实例持有的调用状态，不使用任何全局变量。

use chrono::{DateTime, Utc};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, INT};
use serde_json::Map;
use std::fmt::Write;
use std::sync::Arc;

use super::outcome::SharedState;
use crate::error::{Result, RuleError};
use crate::marshal::{ScriptValue, dynamic_to_json, json_to_dynamic};

/// 日志辅助函数使用的 tracing target
pub const SCRIPT_LOG_TARGET: &str = "rule_script";

/// 注册自定义辅助函数时允许的最大参数个数
pub const MAX_HELPER_ARITY: usize = 4;

/// 调用方提供的自定义辅助函数
///
/// 参数与返回值经过 [`ScriptValue`] 转换；返回 `Err` 时脚本以运行时错误终止。
pub trait ScriptHelper: Send + Sync {
    fn name(&self) -> &str;
    fn arity(&self) -> usize;
    fn call(&self, args: Vec<ScriptValue>) -> std::result::Result<ScriptValue, String>;
}

/// 注册全部内置辅助函数
pub(crate) fn register_builtins(engine: &mut Engine, state: SharedState) {
    register_time(engine);
    register_strings(engine);
    register_coercion(engine);
    register_json(engine);
    register_tables(engine);
    register_logging(engine);
    register_results(engine, state.clone());
    register_context(engine, state);
}

/// 注册自定义辅助函数
pub(crate) fn register_custom(engine: &mut Engine, helper: Arc<dyn ScriptHelper>) -> Result<()> {
    type CallResult = std::result::Result<Dynamic, Box<EvalAltResult>>;

    fn invoke(helper: &Arc<dyn ScriptHelper>, args: Vec<Dynamic>) -> CallResult {
        let args = args.iter().map(ScriptValue::from_dynamic).collect();
        helper
            .call(args)
            .map(ScriptValue::into_dynamic)
            .map_err(|e| format!("{}: {}", helper.name(), e).into())
    }

    let name = helper.name().to_string();
    let h = helper.clone();
    match helper.arity() {
        0 => {
            engine.register_fn(name, move || -> CallResult { invoke(&h, vec![]) });
        }
        1 => {
            engine.register_fn(name, move |a: Dynamic| -> CallResult { invoke(&h, vec![a]) });
        }
        2 => {
            engine.register_fn(name, move |a: Dynamic, b: Dynamic| -> CallResult {
                invoke(&h, vec![a, b])
            });
        }
        3 => {
            engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic| -> CallResult {
                invoke(&h, vec![a, b, c])
            });
        }
        4 => {
            engine.register_fn(
                name,
                move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic| -> CallResult {
                    invoke(&h, vec![a, b, c, d])
                },
            );
        }
        n => {
            return Err(RuleError::Config(format!(
                "辅助函数 {} 的参数个数 {} 超过上限 {}",
                helper.name(),
                n,
                MAX_HELPER_ARITY
            )));
        }
    }
    Ok(())
}

fn register_time(engine: &mut Engine) {
    engine.register_fn("now", || -> INT { Utc::now().timestamp() });
    engine.register_fn("now_ms", || -> INT { Utc::now().timestamp_millis() });
    engine.register_fn("today", || Utc::now().format("%Y-%m-%d").to_string());
    // 无效的格式串返回空字符串
    engine.register_fn("format_time", |ts: INT, fmt: ImmutableString| -> String {
        let Some(dt) = DateTime::<Utc>::from_timestamp(ts, 0) else {
            return String::new();
        };
        let mut out = String::new();
        match write!(out, "{}", dt.format(fmt.as_str())) {
            Ok(()) => out,
            Err(_) => String::new(),
        }
    });
}

fn register_strings(engine: &mut Engine) {
    engine.register_fn("str_contains", |s: ImmutableString, sub: ImmutableString| {
        s.as_str().contains(sub.as_str())
    });
    engine.register_fn("str_starts_with", |s: ImmutableString, prefix: ImmutableString| {
        s.as_str().starts_with(prefix.as_str())
    });
    engine.register_fn("str_ends_with", |s: ImmutableString, suffix: ImmutableString| {
        s.as_str().ends_with(suffix.as_str())
    });
    engine.register_fn("str_is_empty", |s: ImmutableString| s.as_str().trim().is_empty());
    engine.register_fn("str_is_empty", |_: ()| true);
    engine.register_fn("str_trim", |s: ImmutableString| s.as_str().trim().to_string());
    engine.register_fn("str_upper", |s: ImmutableString| s.as_str().to_uppercase());
    engine.register_fn("str_lower", |s: ImmutableString| s.as_str().to_lowercase());
    engine.register_fn("str_split", |s: ImmutableString, sep: ImmutableString| -> Array {
        s.as_str()
            .split(sep.as_str())
            .map(|part| Dynamic::from(part.to_string()))
            .collect()
    });
}

/// 转换为数值：整数值返回整型，其余返回浮点，无法转换返回 ()
fn to_number(value: Dynamic) -> Dynamic {
    match ScriptValue::from_dynamic(&value) {
        ScriptValue::Number(n) => ScriptValue::Number(n).into_dynamic(),
        ScriptValue::Bool(b) => Dynamic::from_int(INT::from(b)),
        ScriptValue::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|n| ScriptValue::Number(n).into_dynamic())
            .unwrap_or(Dynamic::UNIT),
        _ => Dynamic::UNIT,
    }
}

fn to_bool(value: Dynamic) -> bool {
    match ScriptValue::from_dynamic(&value) {
        ScriptValue::Nil => false,
        ScriptValue::Bool(b) => b,
        ScriptValue::Number(n) => n != 0.0,
        ScriptValue::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "y" | "on"
        ),
        ScriptValue::Array(items) => !items.is_empty(),
        ScriptValue::Table(table) => !table.is_empty(),
    }
}

fn to_str(value: Dynamic) -> String {
    match ScriptValue::from_dynamic(&value) {
        ScriptValue::Nil => String::new(),
        ScriptValue::String(s) => s,
        ScriptValue::Bool(b) => b.to_string(),
        other => {
            let json = other.to_json();
            match json {
                serde_json::Value::Number(n) => n.to_string(),
                _ => json.to_string(),
            }
        }
    }
}

fn register_coercion(engine: &mut Engine) {
    engine.register_fn("to_number", to_number);
    engine.register_fn("to_bool", to_bool);
    engine.register_fn("to_str", to_str);
}

fn register_json(engine: &mut Engine) {
    engine.register_fn("json_encode", |value: Dynamic| dynamic_to_json(&value).to_string());
    engine.register_fn("json_decode", |text: ImmutableString| {
        match serde_json::from_str::<serde_json::Value>(text.as_str()) {
            Ok(value) => json_to_dynamic(&value),
            Err(e) => {
                tracing::debug!(target: SCRIPT_LOG_TARGET, error = %e, "json_decode 解析失败");
                Dynamic::UNIT
            }
        }
    });
}

fn register_tables(engine: &mut Engine) {
    engine.register_fn("table_length", |value: Dynamic| -> INT {
        match ScriptValue::from_dynamic(&value) {
            ScriptValue::Array(items) => items.len() as INT,
            ScriptValue::Table(table) => table.len() as INT,
            ScriptValue::String(s) => s.chars().count() as INT,
            _ => 0,
        }
    });
    engine.register_fn("table_keys", |map: rhai::Map| -> Array {
        map.keys().map(|k| Dynamic::from(k.to_string())).collect()
    });
    engine.register_fn("table_merge", |base: rhai::Map, overlay: rhai::Map| -> rhai::Map {
        let mut merged = base;
        merged.extend(overlay);
        merged
    });
}

fn register_logging(engine: &mut Engine) {
    engine.register_fn("log_debug", |msg: Dynamic| {
        tracing::debug!(target: SCRIPT_LOG_TARGET, "{}", to_str(msg));
    });
    engine.register_fn("log_info", |msg: Dynamic| {
        tracing::info!(target: SCRIPT_LOG_TARGET, "{}", to_str(msg));
    });
    engine.register_fn("log_warn", |msg: Dynamic| {
        tracing::warn!(target: SCRIPT_LOG_TARGET, "{}", to_str(msg));
    });
    engine.register_fn("log_error", |msg: Dynamic| {
        tracing::error!(target: SCRIPT_LOG_TARGET, "{}", to_str(msg));
    });
}

fn register_results(engine: &mut Engine, state: SharedState) {
    let s = state.clone();
    engine.register_fn("success", move |action: ImmutableString| {
        s.lock().record_success(action.to_string(), Map::new());
    });

    let s = state.clone();
    engine.register_fn("success", move |action: ImmutableString, variables: rhai::Map| {
        let variables = variables
            .iter()
            .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
            .collect();
        s.lock().record_success(action.to_string(), variables);
    });

    let s = state.clone();
    engine.register_fn("error", move |message: ImmutableString| {
        s.lock().record_error(message.to_string(), None);
    });

    let s = state;
    engine.register_fn("error", move |message: ImmutableString, reason: ImmutableString| {
        s.lock().record_error(message.to_string(), Some(reason.to_string()));
    });
}

fn register_context(engine: &mut Engine, state: SharedState) {
    engine.register_fn("set_context_value", move |key: ImmutableString, value: Dynamic| {
        state
            .lock()
            .context_writes
            .insert(key.to_string(), dynamic_to_json(&value));
    });

    engine.register_fn("get_object_property", |obj: Dynamic, key: ImmutableString| {
        obj.read_lock::<rhai::Map>()
            .and_then(|map| map.get(key.as_str()).cloned())
            .unwrap_or(Dynamic::UNIT)
    });

    engine.register_fn(
        "set_object_property",
        |obj: &mut rhai::Map, key: ImmutableString, value: Dynamic| -> rhai::Map {
            obj.insert(key.as_str().into(), value);
            obj.clone()
        },
    );

    engine.register_fn(
        "set_nested_property",
        |obj: &mut rhai::Map, path: ImmutableString, value: Dynamic| -> rhai::Map {
            set_nested(obj, path.as_str(), value);
            obj.clone()
        },
    );
}

/// 按点号路径写入，中间层不存在或不是对象时创建新对象
fn set_nested(map: &mut rhai::Map, path: &str, value: Dynamic) {
    match path.split_once('.') {
        None => {
            map.insert(path.into(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.into())
                .or_insert_with(|| Dynamic::from_map(rhai::Map::new()));
            if !entry.is_map() {
                *entry = Dynamic::from_map(rhai::Map::new());
            }
            if let Some(mut child) = entry.write_lock::<rhai::Map>() {
                set_nested(&mut child, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::outcome::CallState;
    use parking_lot::Mutex;

    fn engine() -> (Engine, SharedState) {
        let state: SharedState = Arc::new(Mutex::new(CallState::default()));
        let mut engine = Engine::new();
        register_builtins(&mut engine, state.clone());
        (engine, state)
    }

    fn eval<T: Clone + Send + Sync + 'static>(script: &str) -> T {
        let (engine, _) = engine();
        engine.eval::<T>(script).unwrap()
    }

    struct Doubler;

    impl ScriptHelper for Doubler {
        fn name(&self) -> &str {
            "double"
        }

        fn arity(&self) -> usize {
            1
        }

        fn call(&self, args: Vec<ScriptValue>) -> std::result::Result<ScriptValue, String> {
            args[0]
                .as_f64()
                .map(|n| ScriptValue::Number(n * 2.0))
                .ok_or_else(|| "需要数值参数".to_string())
        }
    }

    struct TooMany;

    impl ScriptHelper for TooMany {
        fn name(&self) -> &str {
            "too_many"
        }

        fn arity(&self) -> usize {
            5
        }

        fn call(&self, _args: Vec<ScriptValue>) -> std::result::Result<ScriptValue, String> {
            Ok(ScriptValue::Nil)
        }
    }

    #[test]
    fn test_string_helpers() {
        assert!(eval::<bool>(r#"str_contains("hello world", "lo w")"#));
        assert!(eval::<bool>(r#"str_starts_with("hello", "he")"#));
        assert!(eval::<bool>(r#"str_ends_with("hello", "lo")"#));
        assert!(eval::<bool>(r#"str_is_empty("   ")"#));
        assert!(eval::<bool>("str_is_empty(())"));
        assert_eq!(eval::<String>(r#"str_trim("  x ")"#), "x");
        assert_eq!(eval::<String>(r#"str_upper("ab")"#), "AB");
        assert_eq!(eval::<String>(r#"str_lower("AB")"#), "ab");
        assert_eq!(eval::<INT>(r#"str_split("a,b,c", ",").len()"#), 3);
    }

    #[test]
    fn test_coercion_helpers() {
        assert_eq!(eval::<INT>(r#"to_number("42")"#), 42);
        assert_eq!(eval::<f64>(r#"to_number("2.5")"#), 2.5);
        assert_eq!(eval::<String>(r#"type_of(to_number("abc"))"#), "()");
        assert!(eval::<bool>(r#"to_bool("yes")"#));
        assert!(!eval::<bool>("to_bool(0)"));
        assert_eq!(eval::<String>("to_str(12)"), "12");
        assert_eq!(eval::<String>("to_str(())"), "");
    }

    #[test]
    fn test_json_helpers() {
        assert_eq!(eval::<String>(r#"json_encode(#{a: 1})"#), r#"{"a":1}"#);
        assert_eq!(eval::<INT>(r#"json_decode("{\"a\": [1, 2]}").a[1]"#), 2);
        assert_eq!(eval::<String>(r#"type_of(json_decode("not json"))"#), "()");
    }

    #[test]
    fn test_table_helpers() {
        assert_eq!(eval::<INT>("table_length([1, 2, 3])"), 3);
        assert_eq!(eval::<INT>("table_length(#{a: 1})"), 1);
        assert_eq!(eval::<INT>("table_length(())"), 0);
        assert_eq!(eval::<INT>("table_keys(#{b: 1, a: 2}).len()"), 2);
        assert_eq!(eval::<INT>("table_merge(#{a: 1, b: 1}, #{b: 2}).b"), 2);
    }

    #[test]
    fn test_time_helpers() {
        assert!(eval::<INT>("now()") > 1_600_000_000);
        assert!(eval::<INT>("now_ms()") > 1_600_000_000_000);
        assert_eq!(eval::<String>("today()").len(), 10);
        assert_eq!(eval::<String>(r#"format_time(0, "%Y-%m-%d")"#), "1970-01-01");
        assert_eq!(eval::<String>(r#"format_time(0, "%Q")"#), "");
    }

    #[test]
    fn test_object_helpers() {
        assert_eq!(eval::<INT>(r#"get_object_property(#{a: 5}, "a")"#), 5);
        assert_eq!(eval::<String>(r#"type_of(get_object_property(#{a: 5}, "b"))"#), "()");
        assert_eq!(eval::<String>(r#"type_of(get_object_property(3, "b"))"#), "()");
        assert_eq!(
            eval::<INT>(r#"let o = #{}; o = set_object_property(o, "x", 7); o.x"#),
            7
        );
        assert_eq!(
            eval::<INT>(r#"let o = #{}; o.set_object_property("x", 8); o.x"#),
            8
        );
        assert_eq!(
            eval::<INT>(r#"let o = #{a: 1}; o = set_nested_property(o, "b.c.d", 9); o.b.c.d"#),
            9
        );
        assert_eq!(
            eval::<INT>(r#"let o = #{a: 1}; o = set_nested_property(o, "a.b", 2); o.a.b"#),
            2
        );
    }

    #[test]
    fn test_result_helpers_write_state() {
        let (engine, state) = engine();
        engine
            .run(r#"success("approve", #{score: 90}); set_context_value("flag", true);"#)
            .unwrap();
        {
            let s = state.lock();
            assert_eq!(s.valid, Some(true));
            assert_eq!(s.action.as_deref(), Some("approve"));
            assert_eq!(s.variables["score"], serde_json::json!(90));
            assert_eq!(s.context_writes["flag"], serde_json::json!(true));
        }

        engine.run(r#"error("余额不足", "INSUFFICIENT_BALANCE");"#).unwrap();
        let s = state.lock();
        assert_eq!(s.valid, Some(false));
        assert_eq!(s.error.as_deref(), Some("余额不足"));
        assert_eq!(s.error_reason.as_deref(), Some("INSUFFICIENT_BALANCE"));
    }

    #[test]
    fn test_custom_helper() {
        let (mut engine, _) = engine();
        register_custom(&mut engine, Arc::new(Doubler)).unwrap();
        assert_eq!(engine.eval::<INT>("double(21)").unwrap(), 42);
        assert!(engine.eval::<Dynamic>(r#"double("x")"#).is_err());
    }

    #[test]
    fn test_custom_helper_arity_limit() {
        let (mut engine, _) = engine();
        let err = register_custom(&mut engine, Arc::new(TooMany)).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
