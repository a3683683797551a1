//! FrameGraph - 多线程帧图调度
//!
//! 节点在声明时就完成资源状态跟踪、barrier 计算和依赖推导，执行时按依赖并行录制命令，
//! 按声明顺序提交。
//!
//! # 核心概念
//!
//! - **ResourceTable**: 帧图资源表，物理资源只登记一次，节点通过 [`FrameResourceHandle`] 引用
//! - **ResourceState**: 资源状态描述，包含 stage、access、layout
//! - **NodeBuilder**: 节点的 setup 回调中声明资源使用，同时推导 barrier 和前驱
//! - **ResourceHandler**: 节点的 draw 回调中解析物理资源，节点内部的 transition 只影响本地状态
//! - **虚拟资源**: 只有描述的资源，执行到获取它的节点时才从 [`ResourcePool`] 分配，
//!   所有使用者完成后归还，生命周期不重叠的资源可以共享内存
//!
//! # 使用示例
//!
//! ```ignore
//! use truvis_frame_graph::frame_graph::*;
//!
//! let runtime = FrameGraphRuntime::new(FrameGraphConfig::default())?;
//! let mut graph = FrameGraph::new(&device, &runtime);
//!
//! let back_buffer = graph.import(swapchain_image);
//!
//! // 1. 写入
//! let gbuffer = graph.add_node(
//!     "gbuffer",
//!     FrameResourceHandle::default(),
//!     |builder, target| {
//!         *target = builder.acquire_virtual_resource(
//!             "gbuffer",
//!             VirtualResourceDesc::render_target_2d(1920, 1080, vk::Format::R8G8B8A8_UNORM),
//!             ResourceState::RENDER_TARGET,
//!             VirtualResourceScope::Frame,
//!         );
//!     },
//!     |target, handler, ctx, _| {
//!         let image = handler.get_resource(target);
//!         // draw...
//!     },
//! );
//!
//! // 2. 读取，自动插入 RENDER_TARGET -> PIXEL_SHADER_RESOURCE 的 barrier
//! graph.add_node(
//!     "lighting",
//!     (),
//!     |builder, _| {
//!         builder.pixel_shader_resource(gbuffer_handle);
//!         builder.render_target(back_buffer);
//!         builder.release_virtual_resource(gbuffer_handle);
//!     },
//!     |_, handler, ctx, _| { /* ... */ },
//! );
//!
//! // 3. 编译 & 执行
//! let report = graph.compile().execute(&mut pool)?;
//! ```
//!
//! # 模块结构
//!
//! - `handle`: 资源句柄和节点句柄
//! - `state`: 资源状态（stage/access/layout）封装
//! - `frame_object`: 资源表条目和虚拟资源的生命周期
//! - `resource_table`: 资源表，负责登记和依赖跟踪
//! - `barrier`: 自动 barrier 计算
//! - `node`: 节点和节点构建器
//! - `handler`: 节点执行时的本地资源视图
//! - `virtual_resource`: 虚拟资源描述和资源池
//! - `graph`: 依赖图和分层
//! - `frame_graph`: 帧图构建
//! - `executor`: 运行时、编译结果和并行执行
//! - `plan`: 执行计划打印

mod barrier;
mod deferred_task;
mod device;
mod executor;
#[allow(clippy::module_inception)]
mod frame_graph;
mod frame_object;
mod graph;
mod handle;
mod handler;
mod node;
mod plan;
mod resource_table;
mod scratch;
mod state;
mod virtual_resource;

// Re-exports
pub use barrier::{Barrier, BarrierKind, BarrierPlanner, ResolvedBarrier, SubresourceRange};
pub use deferred_task::DeferredTask;
pub use device::{ClearValue, CommandContext, DeviceError, DeviceResourceInfo, DeviceResources, ResourceQuery};
pub use executor::{CompiledFrameGraph, ExecutionReport, FrameGraphError, FrameGraphRuntime};
pub use frame_graph::{FrameGraph, FramePass};
pub use frame_object::{Dimension, FrameObject, FrameObjectKind, VirtualResource, VirtualState};
pub use graph::DependencyGraph;
pub use handle::{FrameResourceHandle, NodeHandle, ResourceHandle};
pub use handler::ResourceHandler;
pub use node::{FrameGraphNode, NodeBuilder, ResourceUse};
pub use plan::{format_access_flags, format_pipeline_stage};
pub use resource_table::ResourceTable;
pub use scratch::{ScratchAllocator, ScratchSlice};
pub use state::{ResourceState, check_compatible_access_state};
pub use virtual_resource::{
    DevicePool, PoolAllocation, PoolError, PoolFlags, ResourcePool, VirtualResourceDesc, VirtualResourceScope,
    VirtualUsage,
};
