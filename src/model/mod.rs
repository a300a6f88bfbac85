//! 数据模型模块

// 基础模型
pub mod identity;
pub mod message;

// 协议事件（入站 / 出站）
pub mod event;

// 重新导出常用类型
pub use event::*;
pub use identity::*;
pub use message::*;
