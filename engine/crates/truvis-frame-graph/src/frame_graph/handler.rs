//! 节点执行时的资源视图
//!
//! 每个节点拿到的是自己的一份本地状态拷贝，节点内部的 transition 只修改这份拷贝，
//! 因此并行录制的节点之间不会互相影响。节点结束时由执行器把状态恢复到声明的 final state。

use slotmap::SecondaryMap;

use super::barrier::{Barrier, BarrierPlanner, ResolvedBarrier, SubresourceRange};
use super::device::{CommandContext, ResourceQuery};
use super::frame_object::Dimension;
use super::handle::{FrameResourceHandle, NodeHandle, ResourceHandle};
use super::state::ResourceState;

/// 节点可见的单个资源
#[derive(Clone, Copy, Debug)]
pub(crate) struct LocalResource {
    pub resource: ResourceHandle,
    pub dimension: Dimension,
    pub range: SubresourceRange,
    pub state: ResourceState,
    pub final_state: ResourceState,
    /// 虚拟资源的尺寸来自描述
    pub extent: Option<(u32, u32)>,
}

/// 节点回调中使用的资源句柄解析器
#[derive(Clone)]
pub struct ResourceHandler<'n> {
    node: NodeHandle,
    node_name: &'n str,
    resources: SecondaryMap<FrameResourceHandle, LocalResource>,
    device: &'n dyn ResourceQuery,
    /// 并行节点的工作单元只能读取，不能 transition
    read_only: bool,
}

// new & init
impl<'n> ResourceHandler<'n> {
    pub(crate) fn new(
        node: NodeHandle,
        node_name: &'n str,
        device: &'n dyn ResourceQuery,
        resources: SecondaryMap<FrameResourceHandle, LocalResource>,
    ) -> Self {
        Self {
            node,
            node_name,
            resources,
            device,
            read_only: false,
        }
    }

    /// 给并行节点的工作单元使用的只读副本
    pub(crate) fn read_only_view(&self) -> Self {
        Self {
            read_only: true,
            ..self.clone()
        }
    }
}

// getters
impl ResourceHandler<'_> {
    #[inline]
    pub fn node(&self) -> NodeHandle {
        self.node
    }

    /// 物理资源句柄；未在本节点声明的资源返回 `ResourceHandle::INVALID`
    pub fn get_resource(&self, handle: FrameResourceHandle) -> ResourceHandle {
        self.resources.get(handle).map(|r| r.resource).unwrap_or(ResourceHandle::INVALID)
    }

    /// 资源在节点内的当前状态
    pub fn get_resource_state(&self, handle: FrameResourceHandle) -> Option<ResourceState> {
        self.resources.get(handle).map(|r| r.state)
    }

    pub fn get_texture_wh(&self, handle: FrameResourceHandle) -> Option<(u32, u32)> {
        let local = self.resources.get(handle)?;
        if local.extent.is_some() {
            return local.extent;
        }
        let info = self.device.resource_info(local.resource)?;
        Some((info.width, info.height))
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

// 节点内部的 transition
impl ResourceHandler<'_> {
    /// 把资源切换到 `state`，需要时录制一个 barrier
    ///
    /// # 返回
    /// 资源未声明或处于只读视图时返回 false
    pub fn transition<C: CommandContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        handle: FrameResourceHandle,
        state: ResourceState,
    ) -> bool {
        if self.read_only {
            log::warn!("[{}] transition inside a parallel work item is not allowed", self.node_name);
            return false;
        }
        let Some(local) = self.resources.get_mut(handle) else {
            log::warn!("[{}] transition of an undeclared resource {:?}", self.node_name, handle);
            return false;
        };

        let state = if local.dimension.is_buffer() { state.for_buffer() } else { state };
        if BarrierPlanner::needs_transition(local.dimension, local.state, state) {
            let barrier = Barrier::transition(handle, local.dimension, local.range, local.state, state);
            ctx.record_barriers(&[ResolvedBarrier {
                resource: local.resource,
                barrier,
            }]);
        }
        local.state = state;
        true
    }

    #[inline]
    pub fn render_target<C: CommandContext + ?Sized>(&mut self, ctx: &mut C, handle: FrameResourceHandle) -> bool {
        self.transition(ctx, handle, ResourceState::RENDER_TARGET)
    }

    #[inline]
    pub fn pixel_shader_resource<C: CommandContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        handle: FrameResourceHandle,
    ) -> bool {
        self.transition(ctx, handle, ResourceState::PIXEL_SHADER_RESOURCE)
    }

    #[inline]
    pub fn non_pixel_shader_resource<C: CommandContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        handle: FrameResourceHandle,
    ) -> bool {
        self.transition(ctx, handle, ResourceState::NON_PIXEL_SHADER_RESOURCE)
    }

    #[inline]
    pub fn unordered_access<C: CommandContext + ?Sized>(&mut self, ctx: &mut C, handle: FrameResourceHandle) -> bool {
        self.transition(ctx, handle, ResourceState::UNORDERED_ACCESS)
    }

    #[inline]
    pub fn copy_source<C: CommandContext + ?Sized>(&mut self, ctx: &mut C, handle: FrameResourceHandle) -> bool {
        self.transition(ctx, handle, ResourceState::COPY_SOURCE)
    }

    #[inline]
    pub fn copy_dest<C: CommandContext + ?Sized>(&mut self, ctx: &mut C, handle: FrameResourceHandle) -> bool {
        self.transition(ctx, handle, ResourceState::COPY_DEST)
    }

    #[inline]
    pub fn depth_target<C: CommandContext + ?Sized>(&mut self, ctx: &mut C, handle: FrameResourceHandle) -> bool {
        self.transition(ctx, handle, ResourceState::DEPTH_WRITE)
    }
}

// 执行器使用
impl ResourceHandler<'_> {
    /// 把所有资源恢复到 final state
    ///
    /// # 返回
    /// 录制的 barrier 数量
    pub(crate) fn restore<C: CommandContext + ?Sized>(&mut self, ctx: &mut C) -> usize {
        let barriers: Vec<ResolvedBarrier> = self
            .resources
            .iter_mut()
            .filter(|(_, local)| local.state != local.final_state)
            .map(|(handle, local)| {
                let barrier = Barrier::transition(handle, local.dimension, local.range, local.state, local.final_state);
                local.state = local.final_state;
                ResolvedBarrier {
                    resource: local.resource,
                    barrier,
                }
            })
            .collect();

        if !barriers.is_empty() {
            ctx.record_barriers(&barriers);
        }
        barriers.len()
    }

    /// 节点结束后每个资源的状态
    pub(crate) fn final_states(&self) -> Vec<(FrameResourceHandle, ResourceState)> {
        self.resources.iter().map(|(handle, local)| (handle, local.final_state)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessContext, HeadlessDevice};
    use slotmap::SlotMap;

    fn handler_with(device: &HeadlessDevice, state: ResourceState, final_state: ResourceState) -> (ResourceHandler<'_>, FrameResourceHandle) {
        let mut keys: SlotMap<FrameResourceHandle, ()> = SlotMap::with_key();
        let handle = keys.insert(());
        let resource = device.create_texture_2d("rt", 32, 16, state);

        let mut resources = SecondaryMap::new();
        resources.insert(
            handle,
            LocalResource {
                resource,
                dimension: Dimension::Texture2D,
                range: SubresourceRange::full(1, 1),
                state,
                final_state,
                extent: None,
            },
        );
        (ResourceHandler::new(NodeHandle::new(0), "test", device, resources), handle)
    }

    #[test]
    fn test_transition_records_barrier_and_restore() {
        let device = HeadlessDevice::new();
        let (mut handler, handle) = handler_with(&device, ResourceState::RENDER_TARGET, ResourceState::RENDER_TARGET);
        let mut ctx = HeadlessContext::new("test");

        assert!(handler.pixel_shader_resource(&mut ctx, handle));
        assert_eq!(handler.get_resource_state(handle), Some(ResourceState::PIXEL_SHADER_RESOURCE));
        assert_eq!(ctx.barrier_count(), 1);

        assert_eq!(handler.restore(&mut ctx), 1);
        assert_eq!(handler.get_resource_state(handle), Some(ResourceState::RENDER_TARGET));
        assert_eq!(ctx.barrier_count(), 2);
    }

    #[test]
    fn test_read_only_view_rejects_transition() {
        let device = HeadlessDevice::new();
        let (handler, handle) =
            handler_with(&device, ResourceState::PIXEL_SHADER_RESOURCE, ResourceState::PIXEL_SHADER_RESOURCE);
        let mut view = handler.read_only_view();
        let mut ctx = HeadlessContext::new("item");

        assert!(!view.render_target(&mut ctx, handle));
        assert_eq!(ctx.barrier_count(), 0);
        assert_eq!(view.get_resource(handle), handler.get_resource(handle));
    }

    #[test]
    fn test_texture_wh_from_device() {
        let device = HeadlessDevice::new();
        let (handler, handle) = handler_with(&device, ResourceState::COMMON, ResourceState::COMMON);

        assert_eq!(handler.get_texture_wh(handle), Some((32, 16)));
        assert_eq!(handler.get_texture_wh(FrameResourceHandle::default()), None);
        assert_eq!(handler.get_resource(FrameResourceHandle::default()), ResourceHandle::INVALID);
    }
}
