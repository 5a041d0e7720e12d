//! 值转换层
//!
//! 在宿主值（Rust 原生类型、`serde_json::Value`、任意 `Serialize` 结构）与
//! 脚本运行时值（`rhai::Dynamic`）之间双向转换。
//!
//! 转换是全函数：不支持的类型一律转换为 [`ScriptValue::Nil`]，不会返回错误。
//! 宿主侧只有一种数值类型（`f64`），整数值进入脚本时表现为整型，其他为浮点。
//! JSON 与脚本之间的直接转换不经过 `f64`，64 位整数原样往返。
//! 映射类值的往返转换不保证键顺序。

use rhai::{Array, Dynamic};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashMap};

/// 能被 f64 精确表示的最大整数（2^53）
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// 脚本值
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScriptValue {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    /// 有序序列
    Array(Vec<ScriptValue>),
    /// 字符串键的关联表
    Table(BTreeMap<String, ScriptValue>),
}

impl ScriptValue {
    /// 从任意可序列化的宿主值转换
    ///
    /// 字段名遵循 `#[serde(rename)]`，被 `#[serde(skip)]` 的字段不会出现；
    /// 无法序列化的值（例如非字符串键的映射）转换为 Nil。
    pub fn from_host<T: Serialize + ?Sized>(value: &T) -> Self {
        serde_json::to_value(value)
            .map(|v| Self::from_json(&v))
            .unwrap_or(Self::Nil)
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Nil,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Nil),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(arr) => Self::Array(arr.iter().map(Self::from_json).collect()),
            Value::Object(obj) => Self::from_json_map(obj),
        }
    }

    pub fn from_json_map(map: &Map<String, Value>) -> Self {
        Self::Table(
            map.iter()
                .map(|(k, v)| (k.clone(), Self::from_json(v)))
                .collect(),
        )
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Nil => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Table(table) => Value::Object(
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// 转换为 JSON 对象；非表类型返回空对象
    pub fn to_json_map(&self) -> Map<String, Value> {
        match self.to_json() {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    pub fn from_dynamic(value: &Dynamic) -> Self {
        let value = value.flatten_clone();

        if value.is_unit() {
            return Self::Nil;
        }
        if let Ok(b) = value.as_bool() {
            return Self::Bool(b);
        }
        if let Ok(i) = value.as_int() {
            return Self::Number(i as f64);
        }
        if let Ok(f) = value.as_float() {
            return Self::Number(f);
        }
        if let Ok(c) = value.as_char() {
            return Self::String(c.to_string());
        }
        if value.is_string() {
            return value
                .into_string()
                .map(Self::String)
                .unwrap_or(Self::Nil);
        }
        if value.is_array() {
            return value
                .into_array()
                .map(|arr| Self::Array(arr.iter().map(Self::from_dynamic).collect()))
                .unwrap_or(Self::Nil);
        }
        if value.is_map() {
            return value
                .try_cast::<rhai::Map>()
                .map(|map| {
                    Self::Table(
                        map.iter()
                            .map(|(k, v)| (k.to_string(), Self::from_dynamic(v)))
                            .collect(),
                    )
                })
                .unwrap_or(Self::Nil);
        }

        Self::Nil
    }

    pub fn into_dynamic(self) -> Dynamic {
        match self {
            Self::Nil => Dynamic::UNIT,
            Self::Bool(b) => Dynamic::from_bool(b),
            Self::Number(n) => {
                if is_integral(n) {
                    Dynamic::from_int(n as rhai::INT)
                } else {
                    Dynamic::from_float(n)
                }
            }
            Self::String(s) => Dynamic::from(s),
            Self::Array(items) => Dynamic::from_array(
                items
                    .into_iter()
                    .map(Self::into_dynamic)
                    .collect::<Array>(),
            ),
            Self::Table(table) => {
                let mut map = rhai::Map::new();
                for (k, v) in table {
                    map.insert(k.into(), v.into_dynamic());
                }
                Dynamic::from_map(map)
            }
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Table(_) => "table",
        }
    }
}

/// 将脚本值直接转换为 JSON
///
/// 脚本整数输出为 JSON 整数，不经过 `f64`。
pub fn dynamic_to_json(value: &Dynamic) -> Value {
    let value = value.flatten_clone();

    if let Ok(i) = value.as_int() {
        return Value::Number(Number::from(i));
    }
    if let Ok(f) = value.as_float() {
        return number_to_json(f);
    }
    if value.is_array() {
        return value
            .into_array()
            .map(|arr| Value::Array(arr.iter().map(dynamic_to_json).collect()))
            .unwrap_or(Value::Null);
    }
    if value.is_map() {
        return value
            .try_cast::<rhai::Map>()
            .map(|map| {
                Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                        .collect(),
                )
            })
            .unwrap_or(Value::Null);
    }
    ScriptValue::from_dynamic(&value).to_json()
}

/// 将 JSON 直接转换为脚本值
///
/// 可用 i64 表示的整数直接成为脚本整数；超出 i64 的无符号整数退化为浮点。
pub fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Dynamic::from_int(i),
            None => n
                .as_f64()
                .map(|f| ScriptValue::Number(f).into_dynamic())
                .unwrap_or(Dynamic::UNIT),
        },
        Value::Array(items) => Dynamic::from_array(items.iter().map(json_to_dynamic).collect()),
        Value::Object(map) => json_map_to_dynamic(map),
        other => ScriptValue::from_json(other).into_dynamic(),
    }
}

/// 将 JSON 对象转换为脚本关联表
pub fn json_map_to_dynamic(map: &Map<String, Value>) -> Dynamic {
    let mut table = rhai::Map::new();
    for (k, v) in map {
        table.insert(k.as_str().into(), json_to_dynamic(v));
    }
    Dynamic::from_map(table)
}

fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER
}

/// 整数值输出为 JSON 整数，其余输出为浮点；NaN/无穷转换为 null
fn number_to_json(n: f64) -> Value {
    if is_integral(n) {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for ScriptValue {
                fn from(v: $t) -> Self {
                    Self::Number(v as f64)
                }
            }
        )*
    };
}

impl_from_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl From<bool> for ScriptValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for ScriptValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for ScriptValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<ScriptValue>> From<Option<T>> for ScriptValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Nil)
    }
}

impl<T: Into<ScriptValue>> From<Box<T>> for ScriptValue {
    fn from(v: Box<T>) -> Self {
        (*v).into()
    }
}

impl<T: Into<ScriptValue>> From<Vec<T>> for ScriptValue {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ScriptValue>> From<HashMap<String, T>> for ScriptValue {
    fn from(v: HashMap<String, T>) -> Self {
        Self::Table(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<ScriptValue>> From<BTreeMap<String, T>> for ScriptValue {
    fn from(v: BTreeMap<String, T>) -> Self {
        Self::Table(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<Value> for ScriptValue {
    fn from(v: Value) -> Self {
        Self::from_json(&v)
    }
}

impl From<&Value> for ScriptValue {
    fn from(v: &Value) -> Self {
        Self::from_json(v)
    }
}
