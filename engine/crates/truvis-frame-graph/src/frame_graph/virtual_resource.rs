//! 虚拟资源与资源池
//!
//! 虚拟资源在声明时只有描述，直到获取它的节点真正开始执行时才从 [`ResourcePool`] 中分配物理资源，
//! 所有使用者执行完毕后归还给池，供之后的节点复用或别名。

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;

use super::device::{ClearValue, DeviceError, DeviceResources};
use super::frame_object::Dimension;
use super::handle::ResourceHandle;
use crate::config::PoolConfig;

/// 帧数 in flight，延迟销毁需要等待这么多帧
const FIF: u64 = 3;

bitflags::bitflags! {
    /// 资源池能够提供的资源类别
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PoolFlags: u32 {
        const RENDER_TARGET = 1 << 0;
        const UAV_BUFFER = 1 << 1;
        const UAV_TEXTURE = 1 << 2;
    }
}

/// 虚拟资源的用途
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VirtualUsage {
    RenderTarget,
    DepthTarget,
    UavTexture,
    UavBuffer,
}

impl VirtualUsage {
    /// 对应的池类别，深度附件和颜色附件共用 render target 类别
    #[inline]
    pub fn category(&self) -> PoolFlags {
        match self {
            Self::RenderTarget | Self::DepthTarget => PoolFlags::RENDER_TARGET,
            Self::UavTexture => PoolFlags::UAV_TEXTURE,
            Self::UavBuffer => PoolFlags::UAV_BUFFER,
        }
    }
}

/// 虚拟资源的作用域
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VirtualResourceScope {
    /// 最后一个使用者执行完毕后即可归还
    #[default]
    Frame,
    /// 跨越整个帧图执行，执行结束后以不可复用的方式归还
    LongLived,
}

/// 虚拟资源描述
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualResourceDesc {
    pub usage: VirtualUsage,
    pub dimension: Dimension,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: vk::Format,
    /// 缓冲区的字节数，纹理为 0
    pub size: u64,
    /// 分配后是否需要清除
    pub clear: Option<ClearValue>,
}

// new & init
impl VirtualResourceDesc {
    fn texture(usage: VirtualUsage, dimension: Dimension, width: u32, height: u32, depth: u32, format: vk::Format) -> Self {
        Self {
            usage,
            dimension,
            width: width.max(1),
            height: height.max(1),
            depth: depth.max(1),
            mip_levels: 1,
            array_layers: 1,
            format,
            size: 0,
            clear: None,
        }
    }

    pub fn render_target_2d(width: u32, height: u32, format: vk::Format) -> Self {
        Self::texture(VirtualUsage::RenderTarget, Dimension::Texture2D, width, height, 1, format)
    }

    pub fn depth_target_2d(width: u32, height: u32, format: vk::Format) -> Self {
        Self::texture(VirtualUsage::DepthTarget, Dimension::Texture2D, width, height, 1, format)
    }

    pub fn uav_texture_2d(width: u32, height: u32, format: vk::Format) -> Self {
        Self::texture(VirtualUsage::UavTexture, Dimension::Texture2D, width, height, 1, format)
    }

    pub fn uav_texture_3d(width: u32, height: u32, depth: u32, format: vk::Format) -> Self {
        Self::texture(VirtualUsage::UavTexture, Dimension::Texture3D, width, height, depth, format)
    }

    pub fn uav_buffer(size: u64) -> Self {
        Self {
            usage: VirtualUsage::UavBuffer,
            dimension: Dimension::Buffer,
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            format: vk::Format::UNDEFINED,
            size,
            clear: None,
        }
    }

    #[inline]
    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    /// 2D 纹理设置多层后变为 2D array
    #[inline]
    pub fn with_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers.max(1);
        if self.dimension == Dimension::Texture2D && self.array_layers > 1 {
            self.dimension = Dimension::Texture2DArray;
        }
        self
    }

    #[inline]
    pub fn with_clear(mut self, clear: ClearValue) -> Self {
        self.clear = Some(clear);
        self
    }
}

// getters
impl VirtualResourceDesc {
    #[inline]
    pub fn category(&self) -> PoolFlags {
        self.usage.category()
    }

    /// 估算的显存占用，用于资源池预算
    pub fn byte_size(&self) -> u64 {
        if self.dimension.is_buffer() {
            return self.size;
        }

        let texel = bytes_per_texel(self.format);
        let texels: u64 = (0..self.mip_levels)
            .map(|mip| {
                let w = (self.width >> mip).max(1) as u64;
                let h = (self.height >> mip).max(1) as u64;
                let d = (self.depth >> mip).max(1) as u64;
                w * h * d
            })
            .sum();
        texels * texel * self.array_layers as u64
    }

    /// 两个描述能否共用同一个物理资源（忽略清除值）
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.usage == other.usage
            && self.dimension == other.dimension
            && self.width == other.width
            && self.height == other.height
            && self.depth == other.depth
            && self.mip_levels == other.mip_levels
            && self.array_layers == other.array_layers
            && self.format == other.format
            && self.size == other.size
    }
}

fn bytes_per_texel(format: vk::Format) -> u64 {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_UINT | vk::Format::S8_UINT => 1,
        vk::Format::R8G8_UNORM | vk::Format::R16_SFLOAT | vk::Format::R16_UINT | vk::Format::D16_UNORM => 2,
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT | vk::Format::R32G32_UINT => 8,
        vk::Format::R32G32B32A32_SFLOAT | vk::Format::R32G32B32A32_UINT => 16,
        _ => 4,
    }
}

/// 资源池错误
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool exhausted: requested {requested_bytes} bytes with a budget of {budget_bytes} bytes")]
    Exhausted { requested_bytes: u64, budget_bytes: u64 },

    #[error("pool does not provide {0:?} resources")]
    UnsupportedCategory(PoolFlags),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// 一次成功的分配
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolAllocation {
    pub resource: ResourceHandle,
    /// 之前占用同一块内存的资源（直接复用时就是资源本身），使用前需要 aliasing barrier
    pub overlap: Option<ResourceHandle>,
}

/// 虚拟资源的物理分配器
pub trait ResourcePool {
    fn acquire(&mut self, desc: &VirtualResourceDesc) -> Result<PoolAllocation, PoolError>;

    /// 归还资源
    ///
    /// - `immediate`：GPU 已经不会再访问该资源，可以立即回收
    /// - `allow_reuse`：之后的分配可以直接复用该资源
    fn release(&mut self, resource: ResourceHandle, immediate: bool, allow_reuse: bool);

    fn flags(&self) -> PoolFlags;

    /// 一帧的帧图执行结束
    fn end_frame(&mut self) {}
}

struct PooledResource {
    desc: VirtualResourceDesc,
    bytes: u64,
    in_use: bool,
}

/// 基于设备接口的默认资源池
///
/// - 匹配描述的空闲资源直接复用，overlap 为资源本身
/// - 允许别名时，足够大的空闲资源会把内存让给新资源，并返回 overlap
/// - 不可复用的资源延迟 [`FIF`] 帧销毁
pub struct DevicePool<D: DeviceResources> {
    device: Arc<D>,
    config: PoolConfig,
    budget_bytes: u64,
    allocated_bytes: u64,

    /// BTreeMap 保证空闲资源的查找顺序稳定
    resources: BTreeMap<ResourceHandle, PooledResource>,

    /// (handle, bytes, frame_id)
    pending_destroy: Vec<(ResourceHandle, u64, u64)>,
    frame_id: u64,
}

// new & init
impl<D: DeviceResources> DevicePool<D> {
    pub fn new(device: Arc<D>, config: PoolConfig) -> Self {
        Self {
            device,
            budget_bytes: config.budget_bytes,
            config,
            allocated_bytes: 0,
            resources: BTreeMap::new(),
            pending_destroy: Vec::new(),
            frame_id: 0,
        }
    }
}

// getters
impl<D: DeviceResources> DevicePool<D> {
    #[inline]
    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    #[inline]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// 池中持有的资源数量（包含空闲资源）
    #[inline]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    pub fn pending_destroy_count(&self) -> usize {
        self.pending_destroy.len()
    }
}

// tools
impl<D: DeviceResources> DevicePool<D> {
    fn find_free(&self, predicate: impl Fn(&PooledResource) -> bool) -> Option<ResourceHandle> {
        self.resources.iter().find(|(_, pooled)| !pooled.in_use && predicate(pooled)).map(|(handle, _)| *handle)
    }

    fn find_free_except(&self, keep: Option<ResourceHandle>) -> Option<ResourceHandle> {
        self.resources
            .iter()
            .find(|(handle, pooled)| !pooled.in_use && Some(**handle) != keep)
            .map(|(handle, _)| *handle)
    }

    fn schedule_destroy(&mut self, resource: ResourceHandle, bytes: u64) {
        self.pending_destroy.push((resource, bytes, self.frame_id));
    }

    /// 销毁那些已经不再被 GPU 使用的资源
    fn cleanup(&mut self) {
        let current_frame_id = self.frame_id;
        let mut to_destroy = Vec::new();
        self.pending_destroy.retain(|(resource, bytes, frame_id)| {
            if *frame_id + FIF <= current_frame_id {
                to_destroy.push((*resource, *bytes));
                false
            } else {
                true
            }
        });

        for (resource, bytes) in to_destroy {
            self.device.destroy_resource(resource);
            self.allocated_bytes -= bytes;
        }
    }

    /// 把空闲资源移入销毁队列，直到销毁后能放下 `needed` 字节
    ///
    /// 资源真正销毁前仍然计入 `allocated_bytes`，`keep` 不会被移出。
    fn evict_free(&mut self, needed: u64, keep: Option<ResourceHandle>) {
        let mut reclaimed = 0;
        while self.allocated_bytes + needed > self.budget_bytes + reclaimed {
            let Some(resource) = self.find_free_except(keep) else {
                break;
            };
            if let Some(pooled) = self.resources.remove(&resource) {
                log::debug!("pool evicts {:?} ({} bytes)", resource, pooled.bytes);
                reclaimed += pooled.bytes;
                self.schedule_destroy(resource, pooled.bytes);
            }
        }
    }

    fn create(&mut self, desc: &VirtualResourceDesc, bytes: u64) -> Result<ResourceHandle, PoolError> {
        let resource = self.device.create_resource(desc)?;
        self.allocated_bytes += bytes;
        self.resources.insert(
            resource,
            PooledResource {
                desc: desc.clone(),
                bytes,
                in_use: true,
            },
        );
        Ok(resource)
    }
}

impl<D: DeviceResources> ResourcePool for DevicePool<D> {
    fn acquire(&mut self, desc: &VirtualResourceDesc) -> Result<PoolAllocation, PoolError> {
        let category = desc.category();
        if !self.config.flags().contains(category) {
            return Err(PoolError::UnsupportedCategory(category));
        }

        // 1. 描述完全匹配的空闲资源
        if let Some(resource) = self.find_free(|pooled| pooled.desc.is_compatible(desc)) {
            if let Some(pooled) = self.resources.get_mut(&resource) {
                pooled.in_use = true;
            }
            log::trace!("pool reuses {:?}", resource);
            return Ok(PoolAllocation {
                resource,
                overlap: Some(resource),
            });
        }

        let bytes = desc.byte_size();

        // 2. 足够大的空闲资源，把内存让给新资源
        let alias_candidate = if self.config.allow_aliasing {
            self.find_free(|pooled| pooled.bytes >= bytes)
        } else {
            None
        };

        // 3. 预算检查：被让出的资源要等 GPU 用完才销毁，在此之前仍然占用预算
        self.evict_free(bytes, alias_candidate);
        if self.allocated_bytes + bytes > self.budget_bytes {
            if !self.config.grow_on_exhaustion {
                return Err(PoolError::Exhausted {
                    requested_bytes: bytes,
                    budget_bytes: self.budget_bytes,
                });
            }

            let grown = (self.budget_bytes.saturating_mul(2)).max(self.allocated_bytes + bytes);
            log::warn!("pool budget grows from {} to {} bytes", self.budget_bytes, grown);
            self.budget_bytes = grown;
        }

        let overlap = alias_candidate.and_then(|previous| {
            let old = self.resources.remove(&previous)?;
            self.schedule_destroy(previous, old.bytes);
            Some(previous)
        });
        let resource = self.create(desc, bytes)?;
        if let Some(previous) = overlap {
            log::trace!("pool aliases {:?} onto {:?}", resource, previous);
        }

        Ok(PoolAllocation { resource, overlap })
    }

    fn release(&mut self, resource: ResourceHandle, immediate: bool, allow_reuse: bool) {
        if allow_reuse {
            match self.resources.get_mut(&resource) {
                Some(pooled) => pooled.in_use = false,
                None => log::warn!("pool release of unknown resource {:?}", resource),
            }
            return;
        }

        let Some(pooled) = self.resources.remove(&resource) else {
            log::warn!("pool release of unknown resource {:?}", resource);
            return;
        };

        if immediate {
            self.device.destroy_resource(resource);
            self.allocated_bytes -= pooled.bytes;
        } else {
            self.schedule_destroy(resource, pooled.bytes);
        }
    }

    fn flags(&self) -> PoolFlags {
        self.config.flags()
    }

    fn end_frame(&mut self) {
        self.frame_id += 1;
        self.cleanup();
    }
}

impl<D: DeviceResources> Drop for DevicePool<D> {
    fn drop(&mut self) {
        for (resource, _, _) in self.pending_destroy.drain(..) {
            self.device.destroy_resource(resource);
        }
        for (resource, _) in std::mem::take(&mut self.resources) {
            self.device.destroy_resource(resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_graph::ResourceQuery;
    use crate::headless::HeadlessDevice;

    fn pool(config: PoolConfig) -> (Arc<HeadlessDevice>, DevicePool<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::new());
        (device.clone(), DevicePool::new(device, config))
    }

    #[test]
    fn test_byte_size() {
        let rt = VirtualResourceDesc::render_target_2d(4, 4, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(rt.byte_size(), 64);

        let mips = VirtualResourceDesc::uav_texture_2d(4, 4, vk::Format::R32G32B32A32_SFLOAT).with_mips(3);
        assert_eq!(mips.byte_size(), (16 + 4 + 1) * 16);

        assert_eq!(VirtualResourceDesc::uav_buffer(1024).byte_size(), 1024);
    }

    #[test]
    fn test_with_layers_becomes_array() {
        let desc = VirtualResourceDesc::render_target_2d(8, 8, vk::Format::R8G8B8A8_UNORM).with_layers(6);
        assert_eq!(desc.dimension, Dimension::Texture2DArray);
    }

    #[test]
    fn test_reuse_matching_desc() {
        let (_, mut pool) = pool(PoolConfig::default());
        let desc = VirtualResourceDesc::render_target_2d(64, 64, vk::Format::R8G8B8A8_UNORM);

        let first = pool.acquire(&desc).unwrap();
        pool.release(first.resource, false, true);
        let second = pool.acquire(&desc.clone().with_clear(ClearValue::Color([0.0; 4]))).unwrap();

        assert_eq!(first.resource, second.resource);
        assert_eq!(second.overlap, Some(first.resource));
        assert_eq!(pool.resource_count(), 1);
    }

    #[test]
    fn test_alias_larger_free_resource() {
        let (_, mut pool) = pool(PoolConfig::default());
        let big = pool.acquire(&VirtualResourceDesc::uav_buffer(4096)).unwrap();
        pool.release(big.resource, false, true);

        let small = pool.acquire(&VirtualResourceDesc::uav_buffer(1024)).unwrap();
        assert_ne!(small.resource, big.resource);
        assert_eq!(small.overlap, Some(big.resource));
        assert_eq!(pool.allocated_bytes(), 4096 + 1024);

        for _ in 0..FIF {
            pool.end_frame();
        }
        assert_eq!(pool.allocated_bytes(), 1024);
    }

    #[test]
    fn test_budget_counts_resources_waiting_for_destroy() {
        let (device, mut pool) = pool(PoolConfig {
            budget_bytes: 4096,
            grow_on_exhaustion: false,
            ..Default::default()
        });
        let live_bytes = |device: &HeadlessDevice, handles: &[ResourceHandle]| -> u64 {
            handles.iter().filter_map(|&h| device.resource_info(h)).map(|info| info.width as u64).sum()
        };

        let big = pool.acquire(&VirtualResourceDesc::uav_buffer(4096)).unwrap();
        pool.release(big.resource, false, true);

        let err = pool.acquire(&VirtualResourceDesc::uav_buffer(1024)).unwrap_err();
        assert!(matches!(
            err,
            PoolError::Exhausted {
                requested_bytes: 1024,
                budget_bytes: 4096
            }
        ));
        assert_eq!(device.live_count(), 1);
        assert_eq!(pool.allocated_bytes(), 4096);

        // 空闲资源没有被让出，仍然可以按原描述复用
        let again = pool.acquire(&VirtualResourceDesc::uav_buffer(4096)).unwrap();
        assert_eq!(again.resource, big.resource);
        assert!(live_bytes(device.as_ref(), &[big.resource]) <= pool.budget_bytes());
    }

    #[test]
    fn test_evicted_bytes_count_until_destroyed() {
        let (device, mut pool) = pool(PoolConfig {
            budget_bytes: 4096,
            grow_on_exhaustion: false,
            allow_aliasing: false,
            ..Default::default()
        });

        let first = pool.acquire(&VirtualResourceDesc::uav_buffer(4096)).unwrap();
        pool.release(first.resource, false, true);

        assert!(pool.acquire(&VirtualResourceDesc::uav_buffer(2048)).is_err());
        assert_eq!(pool.pending_destroy_count(), 1);
        assert_eq!(pool.allocated_bytes(), 4096);
        assert!(device.is_alive(first.resource));

        for _ in 0..FIF {
            pool.end_frame();
        }
        assert!(!device.is_alive(first.resource));
        assert_eq!(pool.allocated_bytes(), 0);

        pool.acquire(&VirtualResourceDesc::uav_buffer(2048)).unwrap();
        assert_eq!(device.live_count(), 1);
    }

    #[test]
    fn test_exhausted_without_growth() {
        let (_, mut pool) = pool(PoolConfig {
            budget_bytes: 1000,
            grow_on_exhaustion: false,
            ..Default::default()
        });

        let err = pool.acquire(&VirtualResourceDesc::uav_buffer(2000)).unwrap_err();
        assert!(matches!(
            err,
            PoolError::Exhausted {
                requested_bytes: 2000,
                budget_bytes: 1000
            }
        ));
    }

    #[test]
    fn test_growth_on_exhaustion() {
        let (_, mut pool) = pool(PoolConfig {
            budget_bytes: 1000,
            ..Default::default()
        });

        pool.acquire(&VirtualResourceDesc::uav_buffer(3000)).unwrap();
        assert!(pool.budget_bytes() >= 3000);
    }

    #[test]
    fn test_unsupported_category() {
        let (_, mut pool) = pool(PoolConfig {
            uav_texture: false,
            ..Default::default()
        });

        let err = pool
            .acquire(&VirtualResourceDesc::uav_texture_2d(16, 16, vk::Format::R32_SFLOAT))
            .unwrap_err();
        assert!(matches!(err, PoolError::UnsupportedCategory(PoolFlags::UAV_TEXTURE)));
    }

    #[test]
    fn test_deferred_destroy_waits_for_frames_in_flight() {
        let (device, mut pool) = pool(PoolConfig::default());
        let allocation = pool.acquire(&VirtualResourceDesc::uav_buffer(256)).unwrap();
        pool.release(allocation.resource, false, false);
        assert_eq!(pool.pending_destroy_count(), 1);

        for _ in 0..FIF - 1 {
            pool.end_frame();
        }
        assert!(device.is_alive(allocation.resource));

        pool.end_frame();
        assert!(!device.is_alive(allocation.resource));
        assert_eq!(pool.allocated_bytes(), 0);
    }
}
