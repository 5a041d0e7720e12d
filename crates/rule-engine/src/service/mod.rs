//! 领域服务
//!
//! 规则、分类、模板的管理操作，写入前统一完成请求校验与内容校验。

pub mod category_service;
pub mod dto;
pub mod rule_service;
pub mod template_service;
pub mod validation;

pub use category_service::CategoryService;
pub use dto::*;
pub use rule_service::RuleService;
pub use template_service::TemplateService;
pub use validation::ContentValidator;
