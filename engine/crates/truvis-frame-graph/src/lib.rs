//! Truvis 帧图
//!
//! 声明式的多线程帧调度：节点声明资源的使用方式，帧图自动推导 barrier 和依赖，
//! 按依赖并行录制命令，并通过资源池为只有描述的虚拟资源分配和复用显存。
//!
//! - [`frame_graph`]: 资源表、节点构建、虚拟资源和执行器
//! - [`config`]: 运行时配置（TOML）
//! - [`headless`]: 不依赖 GPU 的设备实现，用于测试和演示

pub mod config;
pub mod frame_graph;
pub mod headless;

pub use config::{FrameGraphConfig, PoolConfig};
