//! 规则模板模块
//!
//! 提供规则模板的参数化支持，包括模板定义、参数验证和内容实例化
//!
//! # 主要功能
//!
//! - `ParameterDef`: 模板参数定义，支持多种类型和验证规则
//! - `RuleTemplate`: 规则模板，内容中包含 `${param}` 占位符
//! - `TemplateCompiler`: 参数校验与占位符替换

pub mod compiler;
pub mod models;

pub use compiler::{CompiledContent, TemplateCompiler, render};
pub use models::*;
