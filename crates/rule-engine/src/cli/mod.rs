//! 命令行接口
//!
//! 提供本地执行规则链、校验规则内容、渲染脚本模板的子命令，
//! 便于在接入业务系统之前离线调试规则。

mod commands;
mod runner;

pub use commands::{Cli, Commands};
pub use runner::{CommandRunner, ValidationReport};
