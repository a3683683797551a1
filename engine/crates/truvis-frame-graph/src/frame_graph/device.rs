//! 设备层接口
//!
//! 帧图不直接持有 GPU 对象，所有物理资源的查询、创建、录制和提交都通过这里的 trait 完成。

use ash::vk;

use super::barrier::ResolvedBarrier;
use super::frame_object::Dimension;
use super::handle::ResourceHandle;
use super::state::ResourceState;
use super::virtual_resource::VirtualResourceDesc;

/// 设备层错误
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("unknown resource {0:?}")]
    UnknownResource(ResourceHandle),

    #[error("failed to create resource `{name}`: {reason}")]
    CreationFailed { name: String, reason: String },

    #[error("failed to begin command context `{0}`")]
    ContextUnavailable(String),

    #[error("submission failed: {0}")]
    SubmitFailed(String),
}

/// 清除值
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
    /// 缓冲区按 u32 填充
    Uint(u32),
}

/// 设备报告的物理资源信息
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceResourceInfo {
    pub dimension: Dimension,
    /// 设备跟踪的当前状态
    pub state: ResourceState,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: vk::Format,
}

/// 只读的资源查询
///
/// 节点声明阶段和节点回调中只需要这部分能力，因此单独拆出来以便做成 trait object。
pub trait ResourceQuery: Sync {
    /// 查询物理资源的维度与当前状态，未知资源返回 None
    fn resource_info(&self, resource: ResourceHandle) -> Option<DeviceResourceInfo>;
}

/// 帧图依赖的设备能力
pub trait DeviceResources: ResourceQuery + Send + Sync {
    /// 命令录制上下文，每个节点（或并行节点的每个分块）各持有一个
    type Context: CommandContext;

    /// 帧图执行结束后，把导入资源的最终状态写回设备层
    fn update_resource_state(&self, resource: ResourceHandle, state: ResourceState);

    /// 按描述创建物理资源（由资源池调用）
    fn create_resource(&self, desc: &VirtualResourceDesc) -> Result<ResourceHandle, DeviceError>;

    /// 销毁物理资源（由资源池调用）
    fn destroy_resource(&self, resource: ResourceHandle);

    /// 开始一个新的命令录制上下文
    fn begin_context(&self, label: &str) -> Result<Self::Context, DeviceError>;

    /// 按顺序提交所有上下文
    fn submit(&self, contexts: Vec<Self::Context>) -> Result<(), DeviceError>;
}

/// 命令录制上下文
pub trait CommandContext: Send {
    fn record_barriers(&mut self, barriers: &[ResolvedBarrier]);

    /// 两个资源共享同一块内存时，切换使用者之前需要的 aliasing barrier
    fn record_aliasing_barrier(&mut self, before: ResourceHandle, after: ResourceHandle);

    fn copy_resource(&mut self, src: ResourceHandle, dst: ResourceHandle);

    fn clear_resource(&mut self, resource: ResourceHandle, value: ClearValue);
}
