//! FrameGraph 句柄定义
//!
//! - [`ResourceHandle`]：设备层拥有的物理资源标识，生命周期独立于帧图
//! - [`FrameResourceHandle`]：一次帧图执行内部的资源标识（带代际计数的 slotmap key）
//! - [`NodeHandle`]：节点在声明顺序中的位置

use std::fmt;

use slotmap::{Key, new_key_type};

new_key_type! {
    /// 帧图内部的资源句柄
    ///
    /// 由 `ResourceTable` 分配，index + generation 的组合避免了句柄被复用后的误访问。
    /// 默认值（`FrameResourceHandle::null()`）即为无效句柄。
    pub struct FrameResourceHandle;
}

impl FrameResourceHandle {
    /// 是否为有效句柄（不代表资源仍然存活，只说明不是 null）
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.is_null()
    }
}

/// 设备层的物理资源句柄
///
/// 帧图不拥有物理资源，只通过这个不透明的 id 与设备交互。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(u64);

impl ResourceHandle {
    /// 无效句柄
    pub const INVALID: Self = Self(u64::MAX);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != u64::MAX
    }
}

impl Default for ResourceHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() { write!(f, "Resource({})", self.0) } else { write!(f, "Resource(INVALID)") }
    }
}

/// 帧图节点句柄
///
/// 节点一旦声明就不会被移除，句柄就是节点在声明列表中的下标。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub(crate) u32);

impl NodeHandle {
    #[inline]
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// 节点在声明顺序中的下标
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_frame_handle_is_invalid() {
        assert!(!FrameResourceHandle::null().is_valid());
        assert!(!FrameResourceHandle::default().is_valid());
    }

    #[test]
    fn test_resource_handle_sentinel() {
        assert!(!ResourceHandle::default().is_valid());
        assert!(ResourceHandle::new(0).is_valid());
        assert_eq!(format!("{:?}", ResourceHandle::INVALID), "Resource(INVALID)");
    }
}
