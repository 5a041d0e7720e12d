//! 查询构造器
//!
//! 把脚本传入的查询描述转换为带 `?` 占位符的 SQL 与参数列表：
//!
//! ```text
//! #{
//!     table: "orders",
//!     fields: ["id", "amount"],
//!     where: #{ status: "paid", level: ["gold", "silver"], deleted_at: () },
//!     order_by: "created_at desc, id",
//!     limit: 20,
//!     offset: 40
//! }
//! ```
//!
//! 表名、字段名与排序列只允许标识符字符，值一律走参数绑定。

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use super::db::BridgeError;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("identifier pattern is a valid regex")
});

/// 构造完成的查询
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub args: Vec<Value>,
}

/// 查询描述
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub table: String,
    pub fields: Vec<String>,
    pub filters: Map<String, Value>,
    pub order_by: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QuerySpec {
    /// 从脚本传入的描述对象解析
    pub fn from_json(spec: &Map<String, Value>) -> Result<Self, BridgeError> {
        let table = spec
            .get("table")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::new("查询描述缺少 table"))?
            .to_string();

        let fields = match spec.get("fields") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| BridgeError::new("fields 只能包含字符串"))
                })
                .collect::<Result<_, _>>()?,
            Some(Value::String(s)) => s.split(',').map(|f| f.trim().to_string()).collect(),
            Some(_) => return Err(BridgeError::new("fields 必须是数组或逗号分隔的字符串")),
        };

        let filters = match spec.get("where") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(BridgeError::new("where 必须是对象")),
        };

        let order_by = spec
            .get("order_by")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);

        Ok(Self {
            table,
            fields,
            filters,
            order_by,
            limit: read_u64(spec, "limit")?,
            offset: read_u64(spec, "offset")?,
        })
    }

    /// 构造 SELECT 语句
    pub fn build_select(&self) -> Result<BuiltQuery, BridgeError> {
        check_identifier(&self.table)?;
        let columns = if self.fields.is_empty() {
            "*".to_string()
        } else {
            for field in &self.fields {
                check_identifier(field)?;
            }
            self.fields.join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", columns, self.table);
        let mut args = Vec::new();
        self.push_where(&mut sql, &mut args)?;

        if let Some(order_by) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(&build_order_by(order_by)?);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        Ok(BuiltQuery { sql, args })
    }

    /// 构造 COUNT 语句，忽略字段、排序与分页
    pub fn build_count(&self) -> Result<BuiltQuery, BridgeError> {
        check_identifier(&self.table)?;
        let mut sql = format!("SELECT COUNT(*) AS count FROM {}", self.table);
        let mut args = Vec::new();
        self.push_where(&mut sql, &mut args)?;
        Ok(BuiltQuery { sql, args })
    }

    fn push_where(&self, sql: &mut String, args: &mut Vec<Value>) -> Result<(), BridgeError> {
        if self.filters.is_empty() {
            return Ok(());
        }

        // 列按名称排序，保证生成的 SQL 稳定
        let mut columns: Vec<(&String, &Value)> = self.filters.iter().collect();
        columns.sort_by(|a, b| a.0.cmp(b.0));

        let mut clauses = Vec::with_capacity(columns.len());
        for (column, value) in columns {
            check_identifier(column)?;
            match value {
                Value::Null => clauses.push(format!("{} IS NULL", column)),
                Value::Array(items) if items.is_empty() => clauses.push("1 = 0".to_string()),
                Value::Array(items) => {
                    let marks = vec!["?"; items.len()].join(", ");
                    clauses.push(format!("{} IN ({})", column, marks));
                    args.extend(items.iter().cloned());
                }
                other => {
                    clauses.push(format!("{} = ?", column));
                    args.push(other.clone());
                }
            }
        }

        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
        Ok(())
    }
}

fn read_u64(spec: &Map<String, Value>, key: &str) -> Result<Option<u64>, BridgeError> {
    match spec.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| BridgeError::new(format!("{} 必须是非负整数", key))),
    }
}

fn build_order_by(order_by: &str) -> Result<String, BridgeError> {
    let mut parts = Vec::new();
    for item in order_by.split(',') {
        let mut words = item.split_whitespace();
        let column = words
            .next()
            .ok_or_else(|| BridgeError::new("order_by 包含空的排序项"))?;
        check_identifier(column)?;
        let direction = match words.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => "ASC",
            Some("desc") => "DESC",
            Some(other) => return Err(BridgeError::new(format!("无效的排序方向: {}", other))),
        };
        if words.next().is_some() {
            return Err(BridgeError::new(format!("无效的排序项: {}", item.trim())));
        }
        parts.push(format!("{} {}", column, direction));
    }
    Ok(parts.join(", "))
}

fn check_identifier(name: &str) -> Result<(), BridgeError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(BridgeError::new(format!("非法的标识符: {}", name)))
    }
}
