//! 规则引擎错误类型
//!
//! 所有错误都带有稳定的原因码（`code()`），对外只暴露原因码和可读信息。

use thiserror::Error;

/// 解释器返回结果缺少布尔型 valid 时的固定提示
pub const MISSING_VALID_MESSAGE: &str = "rule must return a boolean valid variable";

#[derive(Debug, Error)]
pub enum RuleError {
    // ==================== 校验错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    #[error("记录已存在: {entity} {field}={value}")]
    AlreadyExists {
        entity: String,
        field: String,
        value: String,
    },

    #[error("无效的操作符: {0}")]
    InvalidOperator(String),

    #[error("规则已删除: {0}")]
    RuleDeleted(String),

    // ==================== 脚本错误 ====================
    #[error("脚本语法错误: {0}")]
    ScriptSyntax(String),

    #[error("{}", MISSING_VALID_MESSAGE)]
    InvalidResult,

    #[error("脚本执行超时: {timeout_ms}ms")]
    ScriptTimeout { timeout_ms: u64 },

    #[error("脚本执行崩溃: {0}")]
    ScriptPanic(String),

    #[error("脚本执行失败: {0}")]
    ScriptRuntime(String),

    #[error("脚本超出资源限制: {0}")]
    ResourceLimit(String),

    // ==================== 表达式错误 ====================
    #[error("公式错误: {0}")]
    Formula(String),

    #[error("模板编译失败: {0}")]
    Template(String),

    // ==================== 外部协作者错误 ====================
    #[error("仓储错误: {0}")]
    Repository(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;

impl RuleError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::InvalidOperator(_) => "INVALID_OPERATOR",
            Self::RuleDeleted(_) => "RULE_DELETED",
            Self::ScriptSyntax(_) => "SCRIPT_SYNTAX_ERROR",
            Self::InvalidResult => "INVALID_RESULT",
            Self::ScriptTimeout { .. } => "SCRIPT_TIMEOUT",
            Self::ScriptPanic(_) => "SCRIPT_PANIC",
            Self::ScriptRuntime(_) => "SCRIPT_RUNTIME_ERROR",
            Self::ResourceLimit(_) => "RESOURCE_LIMIT_EXCEEDED",
            Self::Formula(_) => "FORMULA_ERROR",
            Self::Template(_) => "TEMPLATE_ERROR",
            Self::Repository(_) => "REPOSITORY_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::JsonError(_) => "JSON_ERROR",
        }
    }

    /// 是否为使规则链中止（而非失败）的硬性错误
    ///
    /// 硬性错误意味着规则在执行途中被打断，没能给出业务结论。
    /// 语法错误、缺少 valid、公式错误等属于结构性失败，不在此列。
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            Self::ScriptTimeout { .. }
                | Self::ScriptPanic(_)
                | Self::ScriptRuntime(_)
                | Self::ResourceLimit(_)
        )
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn already_exists(entity: &str, field: &str, value: impl ToString) -> Self {
        Self::AlreadyExists {
            entity: entity.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for RuleError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = RuleError::not_found("Rule", 123);
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.to_string(), "记录未找到: Rule id=123");
    }

    #[test]
    fn test_invalid_result_message() {
        let err = RuleError::InvalidResult;
        assert_eq!(err.code(), "INVALID_RESULT");
        assert_eq!(err.to_string(), MISSING_VALID_MESSAGE);
    }

    #[test]
    fn test_hard_failure_classification() {
        assert!(RuleError::ScriptTimeout { timeout_ms: 10 }.is_hard_failure());
        assert!(RuleError::ScriptPanic("boom".into()).is_hard_failure());
        assert!(!RuleError::InvalidResult.is_hard_failure());
        assert!(!RuleError::ScriptSyntax("x".into()).is_hard_failure());
        assert!(!RuleError::Formula("x".into()).is_hard_failure());
        assert!(!RuleError::Validation("x".into()).is_hard_failure());
    }
}
