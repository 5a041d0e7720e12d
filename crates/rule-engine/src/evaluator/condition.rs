//! 条件评估器
//!
//! 实现各种操作符的评估逻辑，支持多种数据类型的比较。
//! 评估是全函数：类型不匹配时条件不成立，不返回错误。

use dashmap::DashMap;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::error::{Result, RuleError};
use crate::models::{Condition, lookup_path};
use crate::operators::Operator;

/// 已编译正则的缓存上限，超过后整体清空
const REGEX_CACHE_LIMIT: usize = 1024;

static REGEX_CACHE: LazyLock<DashMap<String, Regex>> = LazyLock::new(DashMap::new);

/// 条件列表的评估结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionOutcome {
    pub passed: bool,
    /// 第一个不成立的条件字段
    pub failed_field: Option<String>,
}

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件列表，所有条件都成立才通过
    ///
    /// 空列表视为不通过。遇到第一个不成立的条件立即返回。
    pub fn evaluate_all(conditions: &[Condition], data: &Map<String, Value>) -> ConditionOutcome {
        if conditions.is_empty() {
            return ConditionOutcome {
                passed: false,
                failed_field: None,
            };
        }

        for cond in conditions {
            let field_value = lookup_path(data, &cond.field);
            if !Self::evaluate(field_value, cond.operator, &cond.value) {
                return ConditionOutcome {
                    passed: false,
                    failed_field: Some(cond.field.clone()),
                };
            }
        }

        ConditionOutcome {
            passed: true,
            failed_field: None,
        }
    }

    /// 评估单个条件
    ///
    /// # Arguments
    /// * `field_value` - 从上下文中获取的字段值
    /// * `operator` - 操作符
    /// * `expected_value` - 规则中定义的期望值
    pub fn evaluate(field_value: Option<&Value>, operator: Operator, expected_value: &Value) -> bool {
        match (operator, field_value) {
            (Operator::IsEmpty, v) => Self::is_empty(v),
            (Operator::IsNotEmpty, v) => !Self::is_empty(v),
            (op, None) => op.holds_on_missing(),
            (Operator::Eq, Some(v)) => Self::eq(v, expected_value),
            (Operator::Neq, Some(v)) => !Self::eq(v, expected_value),
            (Operator::Gt, Some(v)) => Self::compare(v, expected_value, |a, b| a > b),
            (Operator::Gte, Some(v)) => Self::compare(v, expected_value, |a, b| a >= b),
            (Operator::Lt, Some(v)) => Self::compare(v, expected_value, |a, b| a < b),
            (Operator::Lte, Some(v)) => Self::compare(v, expected_value, |a, b| a <= b),
            (Operator::Between, Some(v)) => Self::between(v, expected_value),
            (Operator::In, Some(v)) => Self::in_list(v, expected_value),
            (Operator::NotIn, Some(v)) => !Self::in_list(v, expected_value),
            (Operator::Contains, Some(v)) => Self::contains(v, expected_value),
            (Operator::NotContains, Some(v)) => !Self::contains(v, expected_value),
            (Operator::StartsWith, Some(v)) => Self::string_test(v, expected_value, |s, p| s.starts_with(p)),
            (Operator::EndsWith, Some(v)) => Self::string_test(v, expected_value, |s, p| s.ends_with(p)),
            (Operator::Regex, Some(v)) => Self::regex_match(v, expected_value),
        }
    }

    /// 校验条件定义
    ///
    /// `path` 用于错误信息定位，如 `conditions[2]`。
    pub fn validate(cond: &Condition, path: &str) -> Result<()> {
        if cond.field.trim().is_empty() {
            return Err(RuleError::Validation(format!("{}: 字段不能为空", path)));
        }

        match cond.operator {
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                if Self::as_f64(&cond.value).is_none() {
                    return Err(RuleError::Validation(format!(
                        "{}: 操作符 {} 需要数值",
                        path, cond.operator
                    )));
                }
            }
            Operator::Between => {
                if Self::bounds(&cond.value).is_none() {
                    return Err(RuleError::Validation(format!(
                        "{}: between 需要两个数值边界，如 [min, max] 或 \"min,max\"",
                        path
                    )));
                }
            }
            Operator::In | Operator::NotIn => {
                if !cond.value.is_array() && !cond.value.is_string() {
                    return Err(RuleError::Validation(format!(
                        "{}: 操作符 {} 需要数组或逗号分隔的字符串",
                        path, cond.operator
                    )));
                }
            }
            Operator::Regex => {
                let pattern = cond.value.as_str().ok_or_else(|| {
                    RuleError::Validation(format!("{}: regex 需要字符串模式", path))
                })?;
                Regex::new(pattern).map_err(|e| {
                    RuleError::Validation(format!("{}: 无效的正则表达式 '{}': {}", path, pattern, e))
                })?;
            }
            _ => {}
        }

        Ok(())
    }

    /// 判断值是否为空
    fn is_empty(value: Option<&Value>) -> bool {
        match value {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(arr)) => arr.is_empty(),
            Some(Value::Object(obj)) => obj.is_empty(),
            _ => false,
        }
    }

    /// 相等比较
    fn eq(field: &Value, expected: &Value) -> bool {
        // 数值统一转为浮点数比较，避免 100 与 100.0 不相等
        if let (Some(f1), Some(f2)) = (Self::as_f64(field), Self::as_f64(expected)) {
            return (f1 - f2).abs() < f64::EPSILON;
        }
        field == expected
    }

    fn compare<F>(field: &Value, expected: &Value, cmp: F) -> bool
    where
        F: Fn(f64, f64) -> bool,
    {
        match (Self::as_f64(field), Self::as_f64(expected)) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => false,
        }
    }

    /// 闭区间范围比较
    fn between(field: &Value, expected: &Value) -> bool {
        match (Self::as_f64(field), Self::bounds(expected)) {
            (Some(v), Some((min, max))) => v >= min && v <= max,
            _ => false,
        }
    }

    /// 解析 between 的边界：`[min, max]` 或 `"min,max"`
    fn bounds(expected: &Value) -> Option<(f64, f64)> {
        let items = Self::list_items(expected)?;
        if items.len() != 2 {
            return None;
        }
        Some((Self::as_f64(&items[0])?, Self::as_f64(&items[1])?))
    }

    /// 列表展开：数组原样，字符串按逗号拆分并去除空白
    fn list_items(expected: &Value) -> Option<Vec<Value>> {
        match expected {
            Value::Array(arr) => Some(arr.clone()),
            Value::String(s) => Some(
                s.split(',')
                    .map(|item| Value::String(item.trim().to_string()))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn in_list(field: &Value, expected: &Value) -> bool {
        Self::list_items(expected)
            .map(|items| items.iter().any(|item| Self::eq(field, item)))
            .unwrap_or(false)
    }

    /// 字符串子串检查，数组字段检查元素
    fn contains(field: &Value, expected: &Value) -> bool {
        match field {
            Value::String(s) => Self::as_text(expected).is_some_and(|sub| s.contains(sub.as_str())),
            Value::Array(arr) => arr.iter().any(|item| Self::eq(item, expected)),
            _ => false,
        }
    }

    fn string_test<F>(field: &Value, expected: &Value, test: F) -> bool
    where
        F: Fn(&str, &str) -> bool,
    {
        match (field.as_str(), Self::as_text(expected)) {
            (Some(s), Some(p)) => test(s, &p),
            _ => false,
        }
    }

    /// 正则匹配，编译结果缓存复用
    fn regex_match(field: &Value, expected: &Value) -> bool {
        let (Some(s), Some(pattern)) = (Self::as_text(field), expected.as_str()) else {
            return false;
        };

        if let Some(regex) = REGEX_CACHE.get(pattern) {
            return regex.is_match(&s);
        }

        match Regex::new(pattern) {
            Ok(regex) => {
                let matched = regex.is_match(&s);
                if REGEX_CACHE.len() >= REGEX_CACHE_LIMIT {
                    REGEX_CACHE.clear();
                }
                REGEX_CACHE.insert(pattern.to_string(), regex);
                matched
            }
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "无效的正则表达式，条件视为不成立");
                false
            }
        }
    }

    /// 尝试将 Value 转换为 f64
    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// 字符串与数值转为文本，其他类型不参与字符串操作
    fn as_text(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(field: Option<Value>, op: Operator, expected: Value) -> bool {
        ConditionEvaluator::evaluate(field.as_ref(), op, &expected)
    }

    #[test]
    fn test_eq_numbers() {
        assert!(eval(Some(json!(100)), Operator::Eq, json!(100)));
        assert!(eval(Some(json!(100.0)), Operator::Eq, json!(100)));
        assert!(eval(Some(json!("100")), Operator::Eq, json!(100)));
    }

    #[test]
    fn test_eq_strings() {
        assert!(eval(Some(json!("hello")), Operator::Eq, json!("hello")));
        assert!(!eval(Some(json!("hello")), Operator::Eq, json!("world")));
        assert!(eval(Some(json!("hello")), Operator::Neq, json!("world")));
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(eval(Some(json!(100)), Operator::Gt, json!(50)));
        assert!(eval(Some(json!(100)), Operator::Gte, json!(100)));
        assert!(eval(Some(json!(50)), Operator::Lt, json!(100)));
        assert!(eval(Some(json!(100)), Operator::Lte, json!(100)));
        assert!(!eval(Some(json!("abc")), Operator::Gt, json!(1)));
        assert!(!eval(Some(json!(true)), Operator::Lt, json!(1)));
    }

    #[test]
    fn test_between_array_and_string() {
        assert!(eval(Some(json!(50)), Operator::Between, json!([0, 100])));
        assert!(eval(Some(json!(100)), Operator::Between, json!([0, 100])));
        assert!(!eval(Some(json!(150)), Operator::Between, json!([0, 100])));
        assert!(eval(Some(json!(18)), Operator::Between, json!("18, 60")));
        assert!(!eval(Some(json!(18)), Operator::Between, json!("18")));
    }

    #[test]
    fn test_in_list() {
        assert!(eval(Some(json!("a")), Operator::In, json!(["a", "b", "c"])));
        assert!(!eval(Some(json!("d")), Operator::In, json!(["a", "b", "c"])));
        assert!(eval(Some(json!("b")), Operator::In, json!("a, b ,c")));
        assert!(eval(Some(json!(2)), Operator::In, json!("1,2,3")));
        assert!(eval(Some(json!("d")), Operator::NotIn, json!("a,b")));
    }

    #[test]
    fn test_contains() {
        assert!(eval(Some(json!("hello world")), Operator::Contains, json!("world")));
        assert!(eval(Some(json!(["a", "b", "c"])), Operator::Contains, json!("b")));
        assert!(!eval(Some(json!(["a", "b"])), Operator::Contains, json!("z")));
        assert!(eval(Some(json!("hello")), Operator::NotContains, json!("xyz")));
        assert!(!eval(Some(json!(42)), Operator::Contains, json!("4")));
    }

    #[test]
    fn test_starts_and_ends_with() {
        assert!(eval(Some(json!("hello world")), Operator::StartsWith, json!("hello")));
        assert!(eval(Some(json!("hello world")), Operator::EndsWith, json!("world")));
        assert!(!eval(Some(json!(12)), Operator::StartsWith, json!("1")));
    }

    #[test]
    fn test_regex() {
        let pattern = json!(r"^[\w.-]+@[\w.-]+\.\w+$");
        assert!(eval(Some(json!("user@example.com")), Operator::Regex, pattern.clone()));
        // 第二次命中缓存
        assert!(!eval(Some(json!("not-an-email")), Operator::Regex, pattern));
        assert!(!eval(Some(json!("x")), Operator::Regex, json!("(unclosed")));
    }

    #[test]
    fn test_is_empty() {
        assert!(eval(None, Operator::IsEmpty, json!(null)));
        assert!(eval(Some(json!(null)), Operator::IsEmpty, json!(null)));
        assert!(eval(Some(json!("")), Operator::IsEmpty, json!(null)));
        assert!(eval(Some(json!([])), Operator::IsEmpty, json!(null)));
        assert!(!eval(Some(json!("hello")), Operator::IsEmpty, json!(null)));
        assert!(eval(Some(json!(0)), Operator::IsNotEmpty, json!(null)));
    }

    #[test]
    fn test_missing_field() {
        assert!(!eval(None, Operator::Eq, json!("test")));
        assert!(!eval(None, Operator::Gt, json!(1)));
        assert!(!eval(None, Operator::In, json!("a,b")));
        assert!(eval(None, Operator::Neq, json!("test")));
        assert!(eval(None, Operator::NotIn, json!("a,b")));
        assert!(eval(None, Operator::NotContains, json!("a")));
    }

    #[test]
    fn test_every_operator_is_total() {
        for op in Operator::ALL {
            assert_eq!(eval(None, op, json!("x")), op.holds_on_missing(), "{op}");
            // 存在的字段对任何运算符都给出确定结论
            let _ = eval(Some(json!("x")), op, json!("x"));
        }
        assert!(eval(Some(json!("x")), Operator::IsNotEmpty, json!(null)));
        assert!(!eval(Some(json!("x")), Operator::IsEmpty, json!(null)));
    }

    #[test]
    fn test_evaluate_all_reports_first_failing_field() {
        let data = json!({"user": {"age": 16, "country": "CN"}});
        let data = data.as_object().unwrap();
        let conditions = vec![
            Condition::new("user.country", Operator::Eq, "CN"),
            Condition::new("user.age", Operator::Gte, 18),
            Condition::new("user.name", Operator::IsNotEmpty, Value::Null),
        ];

        let outcome = ConditionEvaluator::evaluate_all(&conditions, data);
        assert!(!outcome.passed);
        assert_eq!(outcome.failed_field.as_deref(), Some("user.age"));

        let outcome = ConditionEvaluator::evaluate_all(&conditions[..1], data);
        assert!(outcome.passed);
        assert!(outcome.failed_field.is_none());
    }

    #[test]
    fn test_empty_condition_list_fails() {
        let outcome = ConditionEvaluator::evaluate_all(&[], &Map::new());
        assert!(!outcome.passed);
    }

    #[test]
    fn test_validate() {
        let ok = Condition::new("amount", Operator::Between, json!([1, 10]));
        assert!(ConditionEvaluator::validate(&ok, "conditions[0]").is_ok());

        let empty_field = Condition::new(" ", Operator::Eq, 1);
        assert!(ConditionEvaluator::validate(&empty_field, "c").is_err());

        let bad_between = Condition::new("amount", Operator::Between, json!([1]));
        assert!(ConditionEvaluator::validate(&bad_between, "c").is_err());

        let bad_regex = Condition::new("name", Operator::Regex, "(");
        let err = ConditionEvaluator::validate(&bad_regex, "conditions[3]").unwrap_err();
        assert!(err.to_string().contains("conditions[3]"));

        let bad_in = Condition::new("name", Operator::In, 3);
        assert!(ConditionEvaluator::validate(&bad_in, "c").is_err());

        let bad_gt = Condition::new("amount", Operator::Gt, "many");
        assert!(ConditionEvaluator::validate(&bad_gt, "c").is_err());
    }
}
