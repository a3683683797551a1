//! 帧图配置
//!
//! 通过 TOML 文件加载，所有字段都有默认值，缺省的字段不需要写出来。
//!
//! ```toml
//! worker_threads = 4
//! parallel_chunk_size = 256
//! log_execution_plan = false
//!
//! [pool]
//! budget_bytes = 536870912
//! grow_on_exhaustion = true
//! allow_aliasing = true
//! ```

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::frame_graph::PoolFlags;

/// 帧图的运行时配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameGraphConfig {
    /// 工作线程数量，0 表示使用逻辑核心数
    pub worker_threads: usize,

    /// 数据并行节点每个工作单元包含的 item 数量
    pub parallel_chunk_size: usize,

    /// 编译完成后是否打印执行计划
    pub log_execution_plan: bool,

    pub pool: PoolConfig,
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            parallel_chunk_size: 256,
            log_execution_plan: false,
            pool: PoolConfig::default(),
        }
    }
}

/// 资源池配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 显存预算（字节）
    pub budget_bytes: u64,

    /// 预算不足时是否扩容；为 false 时分配失败，相关节点只执行 barrier
    pub grow_on_exhaustion: bool,

    /// 是否允许新资源复用空闲资源的内存
    pub allow_aliasing: bool,

    /// 支持的资源类别
    pub render_target: bool,
    pub uav_buffer: bool,
    pub uav_texture: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 512 * 1024 * 1024,
            grow_on_exhaustion: true,
            allow_aliasing: true,
            render_target: true,
            uav_buffer: true,
            uav_texture: true,
        }
    }
}

impl PoolConfig {
    pub fn flags(&self) -> PoolFlags {
        let mut flags = PoolFlags::empty();
        flags.set(PoolFlags::RENDER_TARGET, self.render_target);
        flags.set(PoolFlags::UAV_BUFFER, self.uav_buffer);
        flags.set(PoolFlags::UAV_TEXTURE, self.uav_texture);
        flags
    }
}

impl FrameGraphConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: FrameGraphConfig = toml::from_str(content).context("解析帧图配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).with_context(|| format!("读取配置文件失败: {:?}", path.as_ref()))?;

        Self::from_toml_str(&content).with_context(|| format!("加载配置文件失败: {:?}", path.as_ref()))
    }

    /// 检查配置是否可用，运行时创建时也会调用
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.parallel_chunk_size > 0, "parallel_chunk_size 必须大于 0");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = FrameGraphConfig::from_toml_str("").unwrap();
        assert_eq!(config, FrameGraphConfig::default());
    }

    #[test]
    fn test_partial_pool_section() {
        let config = FrameGraphConfig::from_toml_str(
            r#"
            worker_threads = 2

            [pool]
            budget_bytes = 1024
            uav_texture = false
            "#,
        )
        .unwrap();

        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.parallel_chunk_size, 256);
        assert_eq!(config.pool.budget_bytes, 1024);
        assert!(config.pool.grow_on_exhaustion);
        assert_eq!(config.pool.flags(), PoolFlags::RENDER_TARGET | PoolFlags::UAV_BUFFER);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(FrameGraphConfig::from_toml_str("parallel_chunk_size = 0").is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(FrameGraphConfig::from_file("does/not/exist.toml").is_err());
    }
}
