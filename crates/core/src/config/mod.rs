//! 配置管理
//!
//! 配置加载顺序: 默认值 -> TOML配置文件 -> `SCHEDULER__` 前缀的环境变量。
//! 每个组件只接收自己那一节配置，由装配代码显式传入。

pub mod models;

pub use models::*;
