//! 帧图资源表
//!
//! 物理资源在帧图中只登记一次，之后所有节点都通过同一个 [`FrameResourceHandle`] 引用它。

use std::collections::HashMap;

use ash::vk;
use slotmap::SlotMap;

use super::barrier::{Barrier, BarrierPlanner, SubresourceRange};
use super::device::ResourceQuery;
use super::frame_object::{Dimension, FrameObject, FrameObjectKind};
use super::handle::{FrameResourceHandle, NodeHandle, ResourceHandle};
use super::state::ResourceState;

/// 节点声明一次资源使用的结果
#[derive(Debug)]
pub(crate) struct UseRecord {
    pub barrier: Option<Barrier>,
    /// 新增的前驱节点
    pub predecessors: Vec<NodeHandle>,
    /// 需要扩大同步范围的已有 barrier：(节点, 下标)
    pub widen: Option<(NodeHandle, usize)>,
}

/// 帧图资源表
#[derive(Default)]
pub struct ResourceTable {
    objects: SlotMap<FrameResourceHandle, FrameObject>,
    /// 物理资源 -> 帧图资源
    lookup: HashMap<ResourceHandle, FrameResourceHandle>,
}

// new & init
impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }
}

// 注册
impl ResourceTable {
    /// 通过设备查询登记物理资源
    ///
    /// 已经登记过的资源直接返回原来的句柄；设备不认识的资源返回 null 句柄。
    pub fn add_resource(&mut self, device: &dyn ResourceQuery, resource: ResourceHandle) -> FrameResourceHandle {
        if let Some(handle) = self.find_frame_resource(resource) {
            return handle;
        }
        if !resource.is_valid() {
            log::warn!("cannot register an invalid resource");
            return FrameResourceHandle::default();
        }

        let Some(info) = device.resource_info(resource) else {
            log::warn!("device does not know {:?}", resource);
            return FrameResourceHandle::default();
        };

        let object = FrameObject::new(format!("{:?}", resource), FrameObjectKind::Imported, info.dimension, info.state)
            .with_resource(resource)
            .with_subresources(info.mip_levels, info.array_layers)
            .with_format(info.format);
        self.insert_imported(resource, object)
    }

    /// 常量缓冲区，初始状态为 uniform 读取
    pub fn add_constant_buffer(&mut self, resource: ResourceHandle) -> FrameResourceHandle {
        self.add_typed(resource, FrameObjectKind::ConstantBuffer, Dimension::Buffer, ResourceState::CONSTANT_BUFFER)
    }

    /// 回读缓冲区，初始状态为传输目标
    pub fn add_read_back_buffer(&mut self, resource: ResourceHandle) -> FrameResourceHandle {
        self.add_typed(resource, FrameObjectKind::ReadBackBuffer, Dimension::Buffer, ResourceState::COPY_DEST)
    }

    pub fn add_depth_buffer(&mut self, resource: ResourceHandle, format: vk::Format) -> FrameResourceHandle {
        let handle =
            self.add_typed(resource, FrameObjectKind::DepthBuffer, Dimension::Texture2D, ResourceState::DEPTH_WRITE);
        if let Some(object) = self.objects.get_mut(handle) {
            object.format = format;
        }
        handle
    }

    pub fn add_render_target(&mut self, resource: ResourceHandle, format: vk::Format) -> FrameResourceHandle {
        let handle =
            self.add_typed(resource, FrameObjectKind::RenderTarget, Dimension::Texture2D, ResourceState::RENDER_TARGET);
        if let Some(object) = self.objects.get_mut(handle) {
            object.format = format;
        }
        handle
    }

    fn add_typed(
        &mut self,
        resource: ResourceHandle,
        kind: FrameObjectKind,
        dimension: Dimension,
        state: ResourceState,
    ) -> FrameResourceHandle {
        if let Some(handle) = self.find_frame_resource(resource) {
            return handle;
        }
        if !resource.is_valid() {
            log::warn!("cannot register an invalid {:?}", kind);
            return FrameResourceHandle::default();
        }

        let object = FrameObject::new(format!("{:?}#{}", kind, resource.raw()), kind, dimension, state)
            .with_resource(resource);
        self.insert_imported(resource, object)
    }

    fn insert_imported(&mut self, resource: ResourceHandle, object: FrameObject) -> FrameResourceHandle {
        let handle = self.objects.insert(object);
        self.lookup.insert(resource, handle);
        handle
    }

    /// 虚拟资源没有物理身份，不进入查找表
    pub(crate) fn insert_virtual(&mut self, object: FrameObject) -> FrameResourceHandle {
        debug_assert!(object.is_virtual());
        self.objects.insert(object)
    }
}

// getters
impl ResourceTable {
    /// 物理资源句柄；无效句柄、尚未分配或已经释放的虚拟资源返回 `ResourceHandle::INVALID`
    pub fn get_resource(&self, handle: FrameResourceHandle) -> ResourceHandle {
        self.objects
            .get(handle)
            .filter(|object| !object.is_defunct())
            .and_then(|object| object.resource)
            .unwrap_or(ResourceHandle::INVALID)
    }

    pub fn get_resource_access(&self, handle: FrameResourceHandle) -> Option<vk::AccessFlags2> {
        self.objects.get(handle).map(|object| object.state.access)
    }

    pub fn get_resource_layout(&self, handle: FrameResourceHandle) -> Option<vk::ImageLayout> {
        self.objects.get(handle).map(|object| object.state.layout)
    }

    pub fn get_resource_state(&self, handle: FrameResourceHandle) -> Option<ResourceState> {
        self.objects.get(handle).map(|object| object.state)
    }

    pub fn find_frame_resource(&self, resource: ResourceHandle) -> Option<FrameResourceHandle> {
        self.lookup.get(&resource).copied()
    }

    #[inline]
    pub fn get(&self, handle: FrameResourceHandle) -> Option<&FrameObject> {
        self.objects.get(handle)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, handle: FrameResourceHandle) -> Option<&mut FrameObject> {
        self.objects.get_mut(handle)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FrameResourceHandle, &FrameObject)> {
        self.objects.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (FrameResourceHandle, &mut FrameObject)> {
        self.objects.iter_mut()
    }
}

// 依赖跟踪
impl ResourceTable {
    /// 记录节点对资源的一次使用，返回需要插入的 barrier 和新增的依赖
    ///
    /// 兼容的只读使用不产生 barrier，沿用建立当前状态的节点的前驱；
    /// 其余情况产生 transition，之前的写者和所有读者都成为前驱。
    pub(crate) fn record_use(
        &mut self,
        handle: FrameResourceHandle,
        node: NodeHandle,
        requested: ResourceState,
        barrier_index: usize,
    ) -> Option<UseRecord> {
        let object = self.objects.get_mut(handle)?;
        let requested = if object.dimension.is_buffer() { requested.for_buffer() } else { requested };
        let current = object.state;
        let usage = &mut object.usage;

        // 由 final state 建立的状态没有可扩大的 barrier，只有同步点已经覆盖时才能直接加入
        let covered = current.stage.contains(requested.stage) && current.access.contains(requested.access);
        let can_join = !BarrierPlanner::needs_transition(object.dimension, current, requested)
            && (usage.writer.is_none() || usage.last_transition.is_some() || covered);

        if can_join {
            let predecessors = usage.writer_predecessors.iter().filter(|&pred| pred != node).collect();
            usage.readers.push_unique(node);
            let widen = if covered { None } else { usage.last_transition };
            object.state = current.merge_read(requested);

            return Some(UseRecord {
                barrier: None,
                predecessors,
                widen,
            });
        }

        let barrier = Barrier::transition(
            handle,
            object.dimension,
            SubresourceRange::full(object.mip_levels, object.array_layers),
            current,
            requested,
        );
        let predecessors: Vec<NodeHandle> =
            usage.writer.into_iter().chain(usage.readers.iter()).filter(|&pred| pred != node).collect();

        usage.writer = Some(node);
        usage.readers.clear();
        usage.writer_predecessors = predecessors.iter().copied().collect();
        usage.last_transition = Some((node, barrier_index));
        object.state = requested;

        Some(UseRecord {
            barrier: Some(barrier),
            predecessors,
            widen: None,
        })
    }

    /// 节点结束时把资源恢复到 `final_state`，之后的使用者都依赖这个节点
    pub(crate) fn record_final_state(&mut self, handle: FrameResourceHandle, node: NodeHandle, final_state: ResourceState) {
        let Some(object) = self.objects.get_mut(handle) else {
            return;
        };
        let final_state = if object.dimension.is_buffer() { final_state.for_buffer() } else { final_state };
        if object.state == final_state {
            return;
        }

        object.state = final_state;
        object.usage.writer = Some(node);
        object.usage.readers.clear();
        object.usage.writer_predecessors = std::iter::once(node).collect();
        object.usage.last_transition = None;
    }

    /// 执行阶段直接覆盖跟踪状态
    pub(crate) fn set_state(&mut self, handle: FrameResourceHandle, state: ResourceState) {
        if let Some(object) = self.objects.get_mut(handle) {
            object.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn test_add_resource_is_idempotent() {
        let device = HeadlessDevice::new();
        let texture = device.create_texture_2d("albedo", 64, 64, ResourceState::PIXEL_SHADER_RESOURCE);

        let mut table = ResourceTable::new();
        let first = table.add_resource(&device, texture);
        let second = table.add_resource(&device, texture);

        assert!(first.is_valid());
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get_resource(first), texture);
        assert_eq!(table.get_resource_layout(first), Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    }

    #[test]
    fn test_unknown_resource_yields_null_handle() {
        let device = HeadlessDevice::new();
        let mut table = ResourceTable::new();

        assert!(!table.add_resource(&device, ResourceHandle::new(42)).is_valid());
        assert!(!table.add_resource(&device, ResourceHandle::INVALID).is_valid());
        assert!(table.is_empty());
    }

    #[test]
    fn test_typed_registration_states() {
        let mut table = ResourceTable::new();
        let cb = table.add_constant_buffer(ResourceHandle::new(1));
        let rb = table.add_read_back_buffer(ResourceHandle::new(2));
        let depth = table.add_depth_buffer(ResourceHandle::new(3), vk::Format::D32_SFLOAT);

        assert_eq!(table.get_resource_access(cb), Some(vk::AccessFlags2::UNIFORM_READ));
        assert_eq!(table.get_resource_layout(cb), Some(vk::ImageLayout::UNDEFINED));
        assert_eq!(table.get_resource_access(rb), Some(vk::AccessFlags2::TRANSFER_WRITE));
        assert_eq!(table.get_resource_layout(depth), Some(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
        assert_eq!(table.add_constant_buffer(ResourceHandle::new(1)), cb);
    }

    #[test]
    fn test_lookups_on_null_handle() {
        let table = ResourceTable::new();
        let null = FrameResourceHandle::default();

        assert_eq!(table.get_resource(null), ResourceHandle::INVALID);
        assert_eq!(table.get_resource_access(null), None);
        assert_eq!(table.get_resource_layout(null), None);
        assert_eq!(table.find_frame_resource(ResourceHandle::new(7)), None);
    }

    #[test]
    fn test_record_use_tracks_readers_and_writer() {
        let mut table = ResourceTable::new();
        let rt = table.add_render_target(ResourceHandle::new(1), vk::Format::R8G8B8A8_UNORM);
        let (a, b, c, d) = (NodeHandle::new(0), NodeHandle::new(1), NodeHandle::new(2), NodeHandle::new(3));

        // A 写入
        let write = table.record_use(rt, a, ResourceState::RENDER_TARGET, 0).unwrap();
        assert!(write.barrier.is_some());
        assert!(write.predecessors.is_empty());

        // B 转为只读，依赖 A
        let first_read = table.record_use(rt, b, ResourceState::PIXEL_SHADER_RESOURCE, 0).unwrap();
        assert!(first_read.barrier.is_some());
        assert_eq!(first_read.predecessors, vec![a]);

        // C 以兼容的方式读取：没有 barrier，同样依赖 A，并扩大 B 的 barrier
        let join = table.record_use(rt, c, ResourceState::NON_PIXEL_SHADER_RESOURCE, 0).unwrap();
        assert!(join.barrier.is_none());
        assert_eq!(join.predecessors, vec![a]);
        assert_eq!(join.widen, Some((b, 0)));

        // D 写入，依赖所有读者
        let war = table.record_use(rt, d, ResourceState::RENDER_TARGET, 0).unwrap();
        assert!(war.barrier.is_some());
        assert_eq!(war.predecessors, vec![b, c]);
    }

    #[test]
    fn test_final_state_makes_node_the_writer() {
        let mut table = ResourceTable::new();
        let depth = table.add_depth_buffer(ResourceHandle::new(1), vk::Format::D32_SFLOAT);
        let (a, b) = (NodeHandle::new(0), NodeHandle::new(1));

        table.record_use(depth, a, ResourceState::DEPTH_WRITE, 0);
        table.record_final_state(depth, a, ResourceState::DEPTH_READ);
        assert_eq!(table.get_resource_state(depth), Some(ResourceState::DEPTH_READ));

        let read = table.record_use(depth, b, ResourceState::DEPTH_READ, 0).unwrap();
        assert!(read.barrier.is_none());
        assert_eq!(read.predecessors, vec![a]);
    }
}
