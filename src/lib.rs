//! 可执行的层次 Petri 网：构建带颜色令牌的网，按名称层次包含子网，
//! 扁平化后由种子化的运行器逐轮发生迁移，外部迁移交由注册的处理器完成。
#![warn(non_snake_case)]

pub mod config;
pub mod hierarchy;
pub mod net;
pub mod options;
pub mod runner;
