//! 资源状态定义
//!
//! 封装 Vulkan 的 pipeline stage（同步点）、access mask 和 image layout，
//! 提供节点声明时使用的规范状态，以及 layout -> access 的兼容性表。

use ash::vk;

/// 资源状态
///
/// 描述资源在某个节点中的使用方式，用于自动计算 barrier。
/// 缓冲区没有 layout 的概念，其 `layout` 恒为 `UNDEFINED`，见 [`ResourceState::for_buffer`]。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceState {
    /// 同步点（pipeline stage）
    pub stage: vk::PipelineStageFlags2,
    /// Access mask
    pub access: vk::AccessFlags2,
    /// Image layout
    pub layout: vk::ImageLayout,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl ResourceState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    // ============ 规范状态常量 ============

    /// 未定义状态（初始状态或不关心内容）
    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    /// 通用状态，可用于任何操作，但性能可能不是最优
    pub const COMMON: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::from_raw(vk::AccessFlags2::MEMORY_READ.as_raw() | vk::AccessFlags2::MEMORY_WRITE.as_raw()),
        vk::ImageLayout::GENERAL,
    );

    /// 颜色附件读写
    pub const RENDER_TARGET: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw() | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    /// 深度附件读写
    pub const DEPTH_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    );

    /// 只读深度（深度测试 + 采样）
    pub const DEPTH_READ: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw()
                | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw() | vk::AccessFlags2::SHADER_READ.as_raw(),
        ),
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    );

    /// 片段着色器只读
    pub const PIXEL_SHADER_RESOURCE: Self = Self::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// 非片段着色器只读（顶点 / 计算）
    pub const NON_PIXEL_SHADER_RESOURCE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::VERTEX_SHADER.as_raw() | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw(),
        ),
        vk::AccessFlags2::SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// 存储资源读写（UAV）
    pub const UNORDERED_ACCESS: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw() | vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    /// 传输源
    pub const COPY_SOURCE: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    /// 传输目标
    pub const COPY_DEST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    /// 呈现（swapchain image）
    pub const PRESENT: Self =
        Self::new(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR);

    /// 常量缓冲区读取
    pub const CONSTANT_BUFFER: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::VERTEX_SHADER.as_raw()
                | vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw()
                | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw(),
        ),
        vk::AccessFlags2::UNIFORM_READ,
        vk::ImageLayout::UNDEFINED,
    );

    /// 间接参数缓冲区
    pub const INDIRECT_ARGUMENT: Self = Self::new(
        vk::PipelineStageFlags2::DRAW_INDIRECT,
        vk::AccessFlags2::INDIRECT_COMMAND_READ,
        vk::ImageLayout::UNDEFINED,
    );

    /// 顶点缓冲区
    pub const VERTEX_BUFFER: Self = Self::new(
        vk::PipelineStageFlags2::VERTEX_INPUT,
        vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
        vk::ImageLayout::UNDEFINED,
    );

    /// 索引缓冲区
    pub const INDEX_BUFFER: Self =
        Self::new(vk::PipelineStageFlags2::INDEX_INPUT, vk::AccessFlags2::INDEX_READ, vk::ImageLayout::UNDEFINED);

    /// 写操作的 access flags
    const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_WRITE.as_raw()
            | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
            | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
            | vk::AccessFlags2::HOST_WRITE.as_raw()
            | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
    );
}

// 辅助方法
impl ResourceState {
    /// 检查是否为写操作
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(Self::WRITE_ACCESS)
    }

    /// 检查是否为只读操作
    #[inline]
    pub fn is_read_only(&self) -> bool {
        !self.is_write()
    }

    /// 缓冲区没有 layout，统一为 `UNDEFINED`
    #[inline]
    pub fn for_buffer(self) -> Self {
        Self { layout: vk::ImageLayout::UNDEFINED, ..self }
    }

    /// 多个只读使用者共享同一个状态时，合并它们的同步点与 access
    #[inline]
    pub fn merge_read(self, other: Self) -> Self {
        debug_assert_eq!(self.layout, other.layout);
        Self {
            stage: self.stage | other.stage,
            access: self.access | other.access,
            layout: self.layout,
        }
    }
}

/// 检查 `access` 能否在 `layout` 下合法进行
///
/// 依据 Vulkan 的 layout 使用规则：`GENERAL` 接受任何访问，`UNDEFINED` 只接受 `NONE`，
/// 其余 layout 只接受与其用途一致的 access。resolve 不单独处理，走传输 layout 的规则。
pub fn check_compatible_access_state(layout: vk::ImageLayout, access: vk::AccessFlags2) -> bool {
    let allowed = match layout {
        vk::ImageLayout::GENERAL => return true,
        vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED => vk::AccessFlags2::NONE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => {
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::SHADER_READ
                | vk::AccessFlags2::SHADER_SAMPLED_READ
                | vk::AccessFlags2::INPUT_ATTACHMENT_READ
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            vk::AccessFlags2::SHADER_READ
                | vk::AccessFlags2::SHADER_SAMPLED_READ
                | vk::AccessFlags2::INPUT_ATTACHMENT_READ
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::PRESENT_SRC_KHR => vk::AccessFlags2::MEMORY_READ,
        _ => return false,
    };

    allowed.contains(access)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ResourceState::RENDER_TARGET, true)]
    #[case(ResourceState::DEPTH_WRITE, true)]
    #[case(ResourceState::UNORDERED_ACCESS, true)]
    #[case(ResourceState::COPY_DEST, true)]
    #[case(ResourceState::COMMON, true)]
    #[case(ResourceState::PIXEL_SHADER_RESOURCE, false)]
    #[case(ResourceState::NON_PIXEL_SHADER_RESOURCE, false)]
    #[case(ResourceState::DEPTH_READ, false)]
    #[case(ResourceState::COPY_SOURCE, false)]
    #[case(ResourceState::PRESENT, false)]
    #[case(ResourceState::CONSTANT_BUFFER, false)]
    fn test_write_classification(#[case] state: ResourceState, #[case] is_write: bool) {
        assert_eq!(state.is_write(), is_write);
    }

    #[test]
    fn test_canonical_states_are_self_consistent() {
        for state in [
            ResourceState::UNDEFINED,
            ResourceState::COMMON,
            ResourceState::RENDER_TARGET,
            ResourceState::DEPTH_WRITE,
            ResourceState::DEPTH_READ,
            ResourceState::PIXEL_SHADER_RESOURCE,
            ResourceState::NON_PIXEL_SHADER_RESOURCE,
            ResourceState::UNORDERED_ACCESS,
            ResourceState::COPY_SOURCE,
            ResourceState::COPY_DEST,
            ResourceState::PRESENT,
        ] {
            assert!(check_compatible_access_state(state.layout, state.access), "{state:?}");
        }
    }

    #[test]
    fn test_render_target_layout_rejects_shader_read() {
        assert!(!check_compatible_access_state(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags2::SHADER_READ
        ));
        assert!(!check_compatible_access_state(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
        ));
    }

    #[test]
    fn test_undefined_layout_only_accepts_none() {
        assert!(check_compatible_access_state(vk::ImageLayout::UNDEFINED, vk::AccessFlags2::NONE));
        assert!(!check_compatible_access_state(vk::ImageLayout::UNDEFINED, vk::AccessFlags2::SHADER_READ));
    }

    #[test]
    fn test_merge_read_widens_stage() {
        let merged = ResourceState::PIXEL_SHADER_RESOURCE.merge_read(ResourceState::NON_PIXEL_SHADER_RESOURCE);
        assert!(merged.stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
        assert!(merged.stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
        assert_eq!(merged.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}
