//! 节点定义和构建器
//!
//! 节点在 setup 阶段通过 [`NodeBuilder`] 声明资源的使用方式，
//! 声明的同时就完成了 barrier 计算和依赖推导。

use ash::vk;

use super::barrier::Barrier;
use super::device::ResourceQuery;
use super::frame_object::{FrameObject, VirtualState};
use super::handle::{FrameResourceHandle, NodeHandle, ResourceHandle};
use super::resource_table::ResourceTable;
use super::state::ResourceState;
use super::virtual_resource::{VirtualResourceDesc, VirtualResourceScope};

/// 节点对资源的一次使用
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceUse {
    pub resource: FrameResourceHandle,
    pub state: ResourceState,
}

/// 节点涉及的每个资源：声明的最后状态和节点结束时需要恢复到的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct NodeResource {
    pub handle: FrameResourceHandle,
    pub state: ResourceState,
    pub final_state: ResourceState,
}

/// 帧图节点（声明阶段的结果）
#[derive(Debug, Default)]
pub struct FrameGraphNode {
    pub name: String,

    /// 只读使用
    pub inputs: Vec<ResourceUse>,
    /// 写入使用
    pub outputs: Vec<ResourceUse>,

    /// 节点开始前需要执行的 barrier（声明顺序）
    pub barriers: Vec<Barrier>,

    /// 必须在本节点之前完成的节点，升序且都小于本节点
    pub predecessors: Vec<NodeHandle>,

    pub(crate) resources: Vec<NodeResource>,
    /// 本节点负责分配的虚拟资源
    pub(crate) acquires: Vec<FrameResourceHandle>,
    /// 本节点声明释放的虚拟资源
    pub(crate) releases: Vec<FrameResourceHandle>,
    /// 本节点用到的所有虚拟资源
    pub(crate) virtual_uses: Vec<FrameResourceHandle>,
}

// getters
impl FrameGraphNode {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn barriers(&self) -> &[Barrier] {
        &self.barriers
    }

    #[inline]
    pub fn predecessors(&self) -> &[NodeHandle] {
        &self.predecessors
    }

    /// 节点结束时需要恢复的状态
    pub fn final_state(&self, handle: FrameResourceHandle) -> Option<ResourceState> {
        self.resources.iter().find(|r| r.handle == handle).map(|r| r.final_state)
    }

    #[inline]
    pub fn acquires(&self) -> &[FrameResourceHandle] {
        &self.acquires
    }

    #[inline]
    pub fn releases(&self) -> &[FrameResourceHandle] {
        &self.releases
    }
}

/// 节点构建器
///
/// 在 setup 回调中使用。每个声明方法都返回资源句柄，失败时返回 null 句柄并输出警告。
pub struct NodeBuilder<'g> {
    handle: NodeHandle,
    node: FrameGraphNode,

    /// 之前声明的节点，兼容读取者加入时需要扩大它们的 barrier
    declared: &'g mut [FrameGraphNode],
    table: &'g mut ResourceTable,
    device: &'g dyn ResourceQuery,
}

// new & init
impl<'g> NodeBuilder<'g> {
    pub(crate) fn new(
        name: String,
        declared: &'g mut [FrameGraphNode],
        table: &'g mut ResourceTable,
        device: &'g dyn ResourceQuery,
    ) -> Self {
        Self {
            handle: NodeHandle::new(declared.len()),
            node: FrameGraphNode {
                name,
                ..Default::default()
            },
            declared,
            table,
            device,
        }
    }

    /// 应用 final state，整理前驱列表
    pub(crate) fn finish(mut self) -> FrameGraphNode {
        for resource in &self.node.resources {
            if resource.final_state != resource.state {
                self.table.record_final_state(resource.handle, self.handle, resource.final_state);
            }
        }

        self.node.predecessors.sort_unstable();
        self.node
    }
}

// getters
impl NodeBuilder<'_> {
    /// 正在构建的节点
    #[inline]
    pub fn node(&self) -> NodeHandle {
        self.handle
    }

    /// 登记（或查找）物理资源
    pub fn resource(&mut self, resource: ResourceHandle) -> FrameResourceHandle {
        self.table.add_resource(self.device, resource)
    }

    #[inline]
    pub fn table(&self) -> &ResourceTable {
        self.table
    }

    /// 纹理的宽高，虚拟资源使用描述中的尺寸
    pub fn get_texture_wh(&self, handle: FrameResourceHandle) -> Option<(u32, u32)> {
        let object = self.table.get(handle)?;
        if let Some(virtual_resource) = &object.virtual_resource {
            return Some((virtual_resource.desc.width, virtual_resource.desc.height));
        }
        let info = self.device.resource_info(object.resource?)?;
        Some((info.width, info.height))
    }
}

// 资源声明
impl NodeBuilder<'_> {
    #[inline]
    pub fn render_target(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.write_transition(handle, ResourceState::RENDER_TARGET)
    }

    /// 深度附件写入，节点结束后恢复到 `final_state`
    pub fn depth_target(&mut self, handle: FrameResourceHandle, final_state: ResourceState) -> FrameResourceHandle {
        let handle = self.write_transition(handle, ResourceState::DEPTH_WRITE);
        self.set_final_state(handle, final_state);
        handle
    }

    #[inline]
    pub fn depth_read(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.read_transition(handle, ResourceState::DEPTH_READ)
    }

    #[inline]
    pub fn pixel_shader_resource(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.read_transition(handle, ResourceState::PIXEL_SHADER_RESOURCE)
    }

    #[inline]
    pub fn non_pixel_shader_resource(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.read_transition(handle, ResourceState::NON_PIXEL_SHADER_RESOURCE)
    }

    #[inline]
    pub fn unordered_access(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.write_transition(handle, ResourceState::UNORDERED_ACCESS)
    }

    #[inline]
    pub fn copy_source(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.read_transition(handle, ResourceState::COPY_SOURCE)
    }

    #[inline]
    pub fn copy_dest(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.write_transition(handle, ResourceState::COPY_DEST)
    }

    #[inline]
    pub fn present(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.read_transition(handle, ResourceState::PRESENT)
    }

    #[inline]
    pub fn constant_buffer(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.read_transition(handle, ResourceState::CONSTANT_BUFFER)
    }

    #[inline]
    pub fn indirect_argument(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.read_transition(handle, ResourceState::INDIRECT_ARGUMENT)
    }

    #[inline]
    pub fn vertex_buffer(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.read_transition(handle, ResourceState::VERTEX_BUFFER)
    }

    #[inline]
    pub fn index_buffer(&mut self, handle: FrameResourceHandle) -> FrameResourceHandle {
        self.read_transition(handle, ResourceState::INDEX_BUFFER)
    }

    /// 以任意只读状态使用资源
    ///
    /// 读写的归类只看 `state` 的 access，带写入 access 的状态仍然记为输出。
    #[inline]
    pub fn read_transition(&mut self, handle: FrameResourceHandle, state: ResourceState) -> FrameResourceHandle {
        self.declare(handle, state)
    }

    /// 以任意写入状态使用资源
    #[inline]
    pub fn write_transition(&mut self, handle: FrameResourceHandle, state: ResourceState) -> FrameResourceHandle {
        self.declare(handle, state)
    }

    /// 节点结束时把资源恢复到 `final_state`
    ///
    /// 资源必须已经在本节点中声明过。
    pub fn set_final_state(&mut self, handle: FrameResourceHandle, final_state: ResourceState) {
        let is_buffer = self.table.get(handle).is_some_and(|object| object.dimension.is_buffer());
        let final_state = if is_buffer { final_state.for_buffer() } else { final_state };

        let Some(resource) = self.node.resources.iter_mut().find(|r| r.handle == handle) else {
            log::warn!("[{}] final state for an undeclared resource {:?}", self.node.name, handle);
            return;
        };

        resource.final_state = final_state;
    }

    fn declare(&mut self, handle: FrameResourceHandle, state: ResourceState) -> FrameResourceHandle {
        let Some(object) = self.table.get(handle) else {
            log::warn!("[{}] uses an invalid resource handle {:?}", self.node.name, handle);
            return FrameResourceHandle::default();
        };
        if object.is_defunct() {
            log::warn!("[{}] uses released resource `{}`", self.node.name, object.name);
            return FrameResourceHandle::default();
        }
        if object.is_release_requested() {
            log::warn!("[{}] uses `{}` after its release was declared", self.node.name, object.name);
            return FrameResourceHandle::default();
        }

        let state = if object.dimension.is_buffer() { state.for_buffer() } else { state };
        let is_virtual = object.is_virtual();

        let Some(record) = self.table.record_use(handle, self.handle, state, self.node.barriers.len()) else {
            return FrameResourceHandle::default();
        };

        if let Some(barrier) = record.barrier {
            self.node.barriers.push(barrier);
        }
        for predecessor in record.predecessors {
            self.push_predecessor(predecessor);
        }
        if let Some((node, index)) = record.widen {
            let barrier = if node == self.handle {
                &mut self.node.barriers[index]
            } else {
                &mut self.declared[node.index()].barriers[index]
            };
            barrier.widen(state);
        }

        let resource_use = ResourceUse { resource: handle, state };
        if state.is_write() {
            self.node.outputs.push(resource_use);
        } else {
            self.node.inputs.push(resource_use);
        }

        match self.node.resources.iter_mut().find(|r| r.handle == handle) {
            Some(resource) => {
                resource.state = state;
                resource.final_state = state;
            }
            None => self.node.resources.push(NodeResource {
                handle,
                state,
                final_state: state,
            }),
        }

        if is_virtual {
            self.track_virtual_user(handle);
        }

        handle
    }

    fn track_virtual_user(&mut self, handle: FrameResourceHandle) {
        if let Some(virtual_resource) = self.table.get_mut(handle).and_then(|o| o.virtual_resource.as_mut()) {
            if !virtual_resource.users.contains(&self.handle) {
                virtual_resource.users.push(self.handle);
            }
        }
        if !self.node.virtual_uses.contains(&handle) {
            self.node.virtual_uses.push(handle);
        }
    }

    fn push_predecessor(&mut self, predecessor: NodeHandle) {
        debug_assert!(predecessor < self.handle);
        if !self.node.predecessors.contains(&predecessor) {
            self.node.predecessors.push(predecessor);
        }
    }
}

// 虚拟资源
impl NodeBuilder<'_> {
    /// 声明一个虚拟资源，本节点执行时从资源池分配，并以 `initial_state` 使用
    pub fn acquire_virtual_resource(
        &mut self,
        name: impl Into<String>,
        desc: VirtualResourceDesc,
        initial_state: ResourceState,
        scope: VirtualResourceScope,
    ) -> FrameResourceHandle {
        let object = FrameObject::new_virtual(name, desc, scope, self.handle);
        let handle = self.table.insert_virtual(object);
        self.node.acquires.push(handle);

        self.write_transition(handle, initial_state)
    }

    /// 声明释放虚拟资源
    ///
    /// 本节点和之前的所有使用者执行完毕后，资源归还给池；之后的节点不能再使用它。
    pub fn release_virtual_resource(&mut self, handle: FrameResourceHandle) {
        let node_name = &self.node.name;
        let Some(virtual_resource) = self.table.get_mut(handle).and_then(|o| o.virtual_resource.as_mut()) else {
            log::warn!("[{}] releases a non-virtual resource {:?}", node_name, handle);
            return;
        };

        if virtual_resource.scope == VirtualResourceScope::LongLived {
            log::warn!("[{}] long lived resources are released when the graph retires", node_name);
            return;
        }
        if virtual_resource.release_requested_by.is_some() || virtual_resource.state != VirtualState::Null {
            log::warn!("[{}] releases {:?} twice", node_name, handle);
            return;
        }

        virtual_resource.release_requested_by = Some(self.handle);
        if !virtual_resource.users.contains(&self.handle) {
            virtual_resource.users.push(self.handle);
        }
        self.node.releases.push(handle);
        if !self.node.virtual_uses.contains(&handle) {
            self.node.virtual_uses.push(handle);
        }
    }
}

// 依赖与同步
impl NodeBuilder<'_> {
    /// 显式依赖另一个节点（例如等待 CPU 侧的数据）
    pub fn add_dependency(&mut self, node: NodeHandle) {
        if node >= self.handle {
            log::warn!("[{}] can only depend on previously declared nodes, got {:?}", self.node.name, node);
            return;
        }
        self.push_predecessor(node);
    }

    /// 全局内存 barrier，不针对具体资源
    pub fn memory_barrier(&mut self, before: ResourceState, after: ResourceState) {
        self.node.barriers.push(Barrier::global(before, after));
    }

    /// 用于 compute 写后读的全局 barrier
    pub fn compute_memory_barrier(&mut self) {
        self.memory_barrier(
            ResourceState::new(
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_WRITE,
                vk::ImageLayout::UNDEFINED,
            ),
            ResourceState::new(
                vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_READ,
                vk::ImageLayout::UNDEFINED,
            ),
        );
    }
}
