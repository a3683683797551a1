//! 帧图资源条目
//!
//! 每个 [`FrameResourceHandle`](super::FrameResourceHandle) 对应一个 [`FrameObject`]，
//! 记录资源的种类、当前状态、维度、最近的使用者，以及虚拟资源的生命周期。

use ash::vk;
use user_list::UserList;

use super::handle::{NodeHandle, ResourceHandle};
use super::state::ResourceState;
use super::virtual_resource::{VirtualResourceDesc, VirtualResourceScope};

/// 资源维度
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dimension {
    Buffer,
    Texture1D,
    Texture2D,
    Texture2DArray,
    Texture3D,
    TextureCube,
}

impl Dimension {
    /// 缓冲区没有 layout，只跟踪 access
    #[inline]
    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer)
    }

    #[inline]
    pub fn is_texture(&self) -> bool {
        !self.is_buffer()
    }
}

/// 资源种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameObjectKind {
    /// 通过设备查询注册的资源
    Imported,
    RenderTarget,
    DepthBuffer,
    ConstantBuffer,
    StructuredBuffer,
    ReadBackBuffer,
    /// 延迟分配的虚拟资源
    Virtual,
}

/// 虚拟资源的生命周期
///
/// `Null -> Created -> (Released | LongLived)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VirtualState {
    /// 已声明，尚未分配物理资源
    Null,
    /// 已从池中分配
    Created,
    /// 已归还到池中
    Released,
    /// 生命周期跨越整个帧图执行，执行结束后延迟归还
    LongLived,
}

/// 虚拟资源的附加信息
#[derive(Clone, Debug)]
pub struct VirtualResource {
    pub desc: VirtualResourceDesc,
    pub scope: VirtualResourceScope,
    pub state: VirtualState,
    /// 声明获取该资源的节点（执行时由它触发物理分配）
    pub acquired_by: NodeHandle,
    /// 声明释放该资源的节点
    pub release_requested_by: Option<NodeHandle>,
    /// 所有声明过使用该资源的节点（声明顺序）
    pub users: Vec<NodeHandle>,
    /// 分配时池返回的重叠资源（别名复用）
    pub overlap: Option<ResourceHandle>,
}

impl VirtualResource {
    /// 声明顺序中最后一个使用者
    #[inline]
    pub fn last_user(&self) -> NodeHandle {
        self.users.last().copied().unwrap_or(self.acquired_by)
    }
}

/// 资源的依赖跟踪信息
///
/// `writer` 是最近一次建立当前状态的节点（发生过 transition 或写入），
/// `readers` 是之后没有发生 transition 就加入的只读使用者。
#[derive(Clone, Debug, Default)]
pub(crate) struct UsageTracker {
    pub writer: Option<NodeHandle>,
    pub readers: UserList,
    /// `writer` 在建立当前状态时所依赖的前驱，兼容读取者沿用这些前驱
    pub writer_predecessors: UserList,
    /// 建立当前状态的 barrier：(节点, 该节点 barrier 列表中的下标)
    pub last_transition: Option<(NodeHandle, usize)>,
}

/// 帧图资源条目
#[derive(Clone, Debug)]
pub struct FrameObject {
    /// 调试名称
    pub name: String,
    pub kind: FrameObjectKind,
    pub dimension: Dimension,
    /// 当前跟踪的状态（access + layout + 同步点）
    pub state: ResourceState,
    /// 物理资源；虚拟资源在分配前为 None
    pub resource: Option<ResourceHandle>,
    /// 纹理的 mip / array 层数（用于 barrier 的 subresource range）
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: vk::Format,
    pub(crate) usage: UsageTracker,
    pub virtual_resource: Option<VirtualResource>,
}

// new & init
impl FrameObject {
    pub fn new(name: impl Into<String>, kind: FrameObjectKind, dimension: Dimension, state: ResourceState) -> Self {
        let state = if dimension.is_buffer() { state.for_buffer() } else { state };
        Self {
            name: name.into(),
            kind,
            dimension,
            state,
            resource: None,
            mip_levels: 1,
            array_layers: 1,
            format: vk::Format::UNDEFINED,
            usage: UsageTracker::default(),
            virtual_resource: None,
        }
    }

    #[inline]
    pub fn with_resource(mut self, resource: ResourceHandle) -> Self {
        self.resource = Some(resource);
        self
    }

    #[inline]
    pub fn with_subresources(mut self, mip_levels: u32, array_layers: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self.array_layers = array_layers.max(1);
        self
    }

    #[inline]
    pub fn with_format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    /// 创建一个尚未分配的虚拟资源条目
    pub fn new_virtual(
        name: impl Into<String>,
        desc: VirtualResourceDesc,
        scope: VirtualResourceScope,
        acquired_by: NodeHandle,
    ) -> Self {
        let mut object = Self::new(name, FrameObjectKind::Virtual, desc.dimension, ResourceState::UNDEFINED)
            .with_subresources(desc.mip_levels, desc.array_layers)
            .with_format(desc.format);
        object.virtual_resource = Some(VirtualResource {
            desc,
            scope,
            state: VirtualState::Null,
            acquired_by,
            release_requested_by: None,
            users: Vec::new(),
            overlap: None,
        });
        object
    }
}

// getters
impl FrameObject {
    #[inline]
    pub fn is_virtual(&self) -> bool {
        self.virtual_resource.is_some()
    }

    #[inline]
    pub fn virtual_state(&self) -> Option<VirtualState> {
        self.virtual_resource.as_ref().map(|v| v.state)
    }

    /// 虚拟资源声明了释放之后，不允许再被新的节点使用
    #[inline]
    pub fn is_release_requested(&self) -> bool {
        self.virtual_resource.as_ref().is_some_and(|v| v.release_requested_by.is_some())
    }

    /// 已释放的资源不再可用
    #[inline]
    pub fn is_defunct(&self) -> bool {
        matches!(self.virtual_state(), Some(VirtualState::Released))
    }

    #[inline]
    pub fn last_writer(&self) -> Option<NodeHandle> {
        self.usage.writer
    }

    #[inline]
    pub fn readers(&self) -> &[NodeHandle] {
        self.usage.readers.as_slice()
    }
}

mod user_list {
    use super::NodeHandle;

    /// 去重的节点列表，保持插入顺序
    #[derive(Clone, Debug, Default)]
    pub(crate) struct UserList(Vec<NodeHandle>);

    impl UserList {
        pub fn push_unique(&mut self, node: NodeHandle) {
            if !self.0.contains(&node) {
                self.0.push(node);
            }
        }

        pub fn clear(&mut self) {
            self.0.clear();
        }

        pub fn as_slice(&self) -> &[NodeHandle] {
            &self.0
        }

        pub fn iter(&self) -> impl Iterator<Item = NodeHandle> + '_ {
            self.0.iter().copied()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    }

    impl FromIterator<NodeHandle> for UserList {
        fn from_iter<T: IntoIterator<Item = NodeHandle>>(iter: T) -> Self {
            let mut list = Self::default();
            for node in iter {
                list.push_unique(node);
            }
            list
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_state_drops_layout() {
        let object = FrameObject::new("cb", FrameObjectKind::ConstantBuffer, Dimension::Buffer, ResourceState::COMMON);
        assert_eq!(object.state.layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_user_list_dedup() {
        let mut list = UserList::default();
        list.push_unique(NodeHandle::new(1));
        list.push_unique(NodeHandle::new(1));
        list.push_unique(NodeHandle::new(0));
        assert_eq!(list.as_slice(), &[NodeHandle::new(1), NodeHandle::new(0)]);
    }
}
