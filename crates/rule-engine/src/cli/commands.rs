//! CLI 命令定义
//!
//! 使用 clap derive 宏定义命令行接口结构。

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 规则引擎命令行工具
#[derive(Parser, Debug)]
#[command(name = "rule-engine")]
#[command(version, about = "规则脚本与链式执行引擎")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置文件中的设置
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// 配置目录，默认读取 CONFIG_DIR 环境变量或 ./config
    #[arg(long)]
    pub config_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// 子命令枚举
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 对一个事件上下文执行规则链
    ///
    /// 规则文件为规则定义的 JSON 数组，上下文文件为单个执行上下文对象。
    /// 执行结果以 JSON 输出到标准输出。
    Run {
        /// 规则定义文件
        #[arg(short, long)]
        rules: PathBuf,

        /// 执行上下文文件
        #[arg(short, long)]
        context: PathBuf,
    },

    /// 校验规则文件中每条规则的内容
    Validate {
        /// 规则定义文件
        #[arg(short, long)]
        rules: PathBuf,
    },

    /// 用参数渲染 `${name}` 脚本模板
    Render {
        /// 模板文本
        #[arg(short, long)]
        template: String,

        /// JSON 对象形式的参数
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
}
