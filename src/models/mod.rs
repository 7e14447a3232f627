//! 数据模型模块

pub mod auth;
pub mod token;
pub mod user;
