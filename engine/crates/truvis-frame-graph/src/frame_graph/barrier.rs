//! Barrier 自动计算
//!
//! 比较资源当前的状态和节点请求的状态，决定是否需要 transition，
//! 并区分 buffer / texture / global 三类 barrier。

use ash::vk;

use super::frame_object::{Dimension, FrameObject};
use super::handle::{FrameResourceHandle, ResourceHandle};
use super::state::{ResourceState, check_compatible_access_state};

/// 纹理的 subresource 范围
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    /// 覆盖整个资源
    #[inline]
    pub fn full(mip_levels: u32, array_layers: u32) -> Self {
        Self {
            base_mip: 0,
            mip_count: mip_levels,
            base_layer: 0,
            layer_count: array_layers,
        }
    }
}

/// Barrier 的种类
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierKind {
    /// 缓冲区只有 access 的变化
    Buffer,
    /// 纹理同时有 access 和 layout 的变化
    Texture {
        layout_before: vk::ImageLayout,
        layout_after: vk::ImageLayout,
        range: SubresourceRange,
    },
    /// 不针对具体资源的全局内存 barrier
    Global,
}

/// 状态转换记录
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Barrier {
    /// 全局 barrier 的资源为 null
    pub resource: FrameResourceHandle,
    pub kind: BarrierKind,
    pub access_before: vk::AccessFlags2,
    pub access_after: vk::AccessFlags2,
    pub sync_before: vk::PipelineStageFlags2,
    pub sync_after: vk::PipelineStageFlags2,
}

impl Barrier {
    /// 根据资源维度生成 buffer 或 texture barrier
    pub fn transition(
        resource: FrameResourceHandle,
        dimension: Dimension,
        range: SubresourceRange,
        before: ResourceState,
        after: ResourceState,
    ) -> Self {
        let kind = if dimension.is_buffer() {
            BarrierKind::Buffer
        } else {
            BarrierKind::Texture {
                layout_before: before.layout,
                layout_after: after.layout,
                range,
            }
        };

        Self {
            resource,
            kind,
            access_before: before.access,
            access_after: after.access,
            sync_before: before.stage,
            sync_after: after.stage,
        }
    }

    /// 全局内存 barrier
    pub fn global(before: ResourceState, after: ResourceState) -> Self {
        Self {
            resource: FrameResourceHandle::default(),
            kind: BarrierKind::Global,
            access_before: before.access,
            access_after: after.access,
            sync_before: before.stage,
            sync_after: after.stage,
        }
    }

    #[inline]
    pub fn is_global(&self) -> bool {
        matches!(self.kind, BarrierKind::Global)
    }

    #[inline]
    pub fn layout_before(&self) -> Option<vk::ImageLayout> {
        match self.kind {
            BarrierKind::Texture { layout_before, .. } => Some(layout_before),
            _ => None,
        }
    }

    #[inline]
    pub fn layout_after(&self) -> Option<vk::ImageLayout> {
        match self.kind {
            BarrierKind::Texture { layout_after, .. } => Some(layout_after),
            _ => None,
        }
    }

    /// 用于 barrier src 的 access（只读访问不需要 make available）
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access_before
            & !(vk::AccessFlags2::SHADER_READ
                | vk::AccessFlags2::SHADER_SAMPLED_READ
                | vk::AccessFlags2::SHADER_STORAGE_READ
                | vk::AccessFlags2::UNIFORM_READ
                | vk::AccessFlags2::TRANSFER_READ
                | vk::AccessFlags2::MEMORY_READ)
    }

    /// 后续的兼容读取者加入时，扩大 barrier 的目标同步范围
    #[inline]
    pub(crate) fn widen(&mut self, reader: ResourceState) {
        self.sync_after |= reader.stage;
        self.access_after |= reader.access;
    }
}

/// 录制阶段使用的 barrier：已经解析出物理资源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedBarrier {
    /// 全局 barrier 为 `ResourceHandle::INVALID`
    pub resource: ResourceHandle,
    pub barrier: Barrier,
}

/// Barrier 计算器
///
/// 纯函数，只读 `FrameObject`，不修改任何跟踪信息。
pub struct BarrierPlanner;

impl BarrierPlanner {
    /// 判断从 `current` 到 `requested` 是否需要 transition
    ///
    /// - layout 不同一定需要
    /// - 当前 layout 下不能进行请求的 access 也需要
    /// - 任意一方是写操作需要（RAW / WAR / WAW）
    /// - 缓冲区没有 layout，只读到只读永远不需要
    pub fn needs_transition(dimension: Dimension, current: ResourceState, requested: ResourceState) -> bool {
        if current.is_write() || requested.is_write() {
            return true;
        }

        if dimension.is_buffer() {
            return false;
        }

        let layout_mismatch = current.layout != requested.layout;
        let access_incompatible = !check_compatible_access_state(current.layout, requested.access);

        layout_mismatch || access_incompatible
    }

    /// 计算单个资源的 barrier
    ///
    /// # 返回
    /// 如果需要 barrier，返回 `Some(Barrier)`
    pub fn compute_barrier(
        handle: FrameResourceHandle,
        object: &FrameObject,
        requested: ResourceState,
    ) -> Option<Barrier> {
        let requested = if object.dimension.is_buffer() { requested.for_buffer() } else { requested };
        if !Self::needs_transition(object.dimension, object.state, requested) {
            return None;
        }

        Some(Barrier::transition(
            handle,
            object.dimension,
            SubresourceRange::full(object.mip_levels, object.array_layers),
            object.state,
            requested,
        ))
    }

    /// 推断纹理的 aspect flags
    pub fn infer_image_aspect(format: vk::Format) -> vk::ImageAspectFlags {
        match format {
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }

            vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,

            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }

            _ => vk::ImageAspectFlags::COLOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_graph::frame_object::FrameObjectKind;

    fn texture(state: ResourceState) -> FrameObject {
        FrameObject::new("tex", FrameObjectKind::RenderTarget, Dimension::Texture2D, state)
    }

    #[test]
    fn test_barrier_layout_change() {
        let object = texture(ResourceState::RENDER_TARGET);
        let barrier = BarrierPlanner::compute_barrier(
            FrameResourceHandle::default(),
            &object,
            ResourceState::PIXEL_SHADER_RESOURCE,
        )
        .unwrap();

        assert_eq!(barrier.layout_before(), Some(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        assert_eq!(barrier.layout_after(), Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
        assert_eq!(barrier.sync_after, vk::PipelineStageFlags2::FRAGMENT_SHADER);
    }

    #[test]
    fn test_barrier_read_to_read() {
        let object = texture(ResourceState::PIXEL_SHADER_RESOURCE);

        // 同 layout 的只读到只读可以跳过
        assert!(
            BarrierPlanner::compute_barrier(
                FrameResourceHandle::default(),
                &object,
                ResourceState::NON_PIXEL_SHADER_RESOURCE
            )
            .is_none()
        );
    }

    #[test]
    fn test_barrier_write_to_write_same_state() {
        let object = texture(ResourceState::UNORDERED_ACCESS);
        assert!(
            BarrierPlanner::compute_barrier(FrameResourceHandle::default(), &object, ResourceState::UNORDERED_ACCESS)
                .is_some()
        );
    }

    #[test]
    fn test_buffer_barrier_has_no_layout() {
        let object =
            FrameObject::new("buf", FrameObjectKind::StructuredBuffer, Dimension::Buffer, ResourceState::UNDEFINED);
        let barrier = BarrierPlanner::compute_barrier(
            FrameResourceHandle::default(),
            &object,
            ResourceState::UNORDERED_ACCESS,
        )
        .unwrap();

        assert_eq!(barrier.kind, BarrierKind::Buffer);
        assert_eq!(barrier.layout_after(), None);
    }

    #[test]
    fn test_buffer_reads_never_transition() {
        assert!(!BarrierPlanner::needs_transition(
            Dimension::Buffer,
            ResourceState::CONSTANT_BUFFER.for_buffer(),
            ResourceState::NON_PIXEL_SHADER_RESOURCE.for_buffer(),
        ));
    }

    #[test]
    fn test_src_access_strips_reads() {
        let barrier = Barrier::global(ResourceState::UNORDERED_ACCESS, ResourceState::PIXEL_SHADER_RESOURCE);
        assert!(barrier.is_global());
        assert_eq!(barrier.src_access(), vk::AccessFlags2::SHADER_STORAGE_WRITE);
    }
}
