//! 无 GPU 的设备实现
//!
//! 不执行任何 GPU 操作，只记录资源的创建/销毁和录制的命令，
//! 用于测试和没有显卡的环境下演示帧图的调度结果。

use std::collections::HashMap;

use ash::vk;
use parking_lot::Mutex;

use crate::frame_graph::{
    ClearValue, CommandContext, DeviceError, DeviceResourceInfo, DeviceResources, Dimension, ResolvedBarrier,
    ResourceHandle, ResourceQuery, ResourceState, VirtualResourceDesc,
};

/// 录制的一条命令
#[derive(Clone, Debug, PartialEq)]
pub enum HeadlessCommand {
    Barriers(Vec<ResolvedBarrier>),
    Aliasing { before: ResourceHandle, after: ResourceHandle },
    Copy { src: ResourceHandle, dst: ResourceHandle },
    Clear { resource: ResourceHandle, value: ClearValue },
}

/// 命令录制上下文
#[derive(Clone, Debug)]
pub struct HeadlessContext {
    label: String,
    commands: Vec<HeadlessCommand>,
}

impl HeadlessContext {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn commands(&self) -> &[HeadlessCommand] {
        &self.commands
    }

    /// 录制的所有 barrier（按录制顺序）
    pub fn barriers(&self) -> impl Iterator<Item = &ResolvedBarrier> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                HeadlessCommand::Barriers(barriers) => Some(barriers.iter()),
                _ => None,
            })
            .flatten()
    }

    pub fn barrier_count(&self) -> usize {
        self.barriers().count()
    }

    pub fn aliasing_count(&self) -> usize {
        self.commands.iter().filter(|command| matches!(command, HeadlessCommand::Aliasing { .. })).count()
    }
}

impl CommandContext for HeadlessContext {
    fn record_barriers(&mut self, barriers: &[ResolvedBarrier]) {
        self.commands.push(HeadlessCommand::Barriers(barriers.to_vec()));
    }

    fn record_aliasing_barrier(&mut self, before: ResourceHandle, after: ResourceHandle) {
        self.commands.push(HeadlessCommand::Aliasing { before, after });
    }

    fn copy_resource(&mut self, src: ResourceHandle, dst: ResourceHandle) {
        self.commands.push(HeadlessCommand::Copy { src, dst });
    }

    fn clear_resource(&mut self, resource: ResourceHandle, value: ClearValue) {
        self.commands.push(HeadlessCommand::Clear { resource, value });
    }
}

struct HeadlessResource {
    name: String,
    info: DeviceResourceInfo,
    alive: bool,
}

#[derive(Default)]
struct HeadlessState {
    next_id: u64,
    resources: HashMap<ResourceHandle, HeadlessResource>,
    created: usize,
    destroyed: usize,
    submissions: Vec<Vec<HeadlessContext>>,
    /// 这些 label 的上下文创建会失败
    failing_contexts: Vec<String>,
}

/// 记录所有设备调用的设备
#[derive(Default)]
pub struct HeadlessDevice {
    state: Mutex<HeadlessState>,
}

// new & init
impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: impl Into<String>, info: DeviceResourceInfo) -> ResourceHandle {
        let mut state = self.state.lock();
        let handle = ResourceHandle::new(state.next_id);
        state.next_id += 1;
        state.created += 1;
        state.resources.insert(
            handle,
            HeadlessResource {
                name: name.into(),
                info,
                alive: true,
            },
        );
        handle
    }

    /// 创建外部（非帧图管理的）2D 纹理
    pub fn create_texture_2d(&self, name: impl Into<String>, width: u32, height: u32, state: ResourceState) -> ResourceHandle {
        self.insert(
            name,
            DeviceResourceInfo {
                dimension: Dimension::Texture2D,
                state,
                width,
                height,
                depth: 1,
                mip_levels: 1,
                array_layers: 1,
                format: vk::Format::R8G8B8A8_UNORM,
            },
        )
    }

    /// 创建外部缓冲区，`size` 以字节为单位，记录在 width 中
    pub fn create_buffer(&self, name: impl Into<String>, size: u32, state: ResourceState) -> ResourceHandle {
        self.insert(
            name,
            DeviceResourceInfo {
                dimension: Dimension::Buffer,
                state: state.for_buffer(),
                width: size,
                height: 1,
                depth: 1,
                mip_levels: 1,
                array_layers: 1,
                format: vk::Format::UNDEFINED,
            },
        )
    }

    /// 之后以 `label` 开始的上下文都会失败
    pub fn fail_context(&self, label: impl Into<String>) {
        self.state.lock().failing_contexts.push(label.into());
    }
}

// getters
impl HeadlessDevice {
    pub fn is_alive(&self, resource: ResourceHandle) -> bool {
        self.state.lock().resources.get(&resource).is_some_and(|r| r.alive)
    }

    pub fn resource_name(&self, resource: ResourceHandle) -> Option<String> {
        self.state.lock().resources.get(&resource).map(|r| r.name.clone())
    }

    /// 设备记录的资源状态
    pub fn resource_state(&self, resource: ResourceHandle) -> Option<ResourceState> {
        self.state.lock().resources.get(&resource).map(|r| r.info.state)
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().created
    }

    pub fn destroyed_count(&self) -> usize {
        self.state.lock().destroyed
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().resources.values().filter(|r| r.alive).count()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    /// 取出所有已提交的上下文（每次 submit 一组）
    pub fn take_submissions(&self) -> Vec<Vec<HeadlessContext>> {
        std::mem::take(&mut self.state.lock().submissions)
    }
}

impl ResourceQuery for HeadlessDevice {
    fn resource_info(&self, resource: ResourceHandle) -> Option<DeviceResourceInfo> {
        let state = self.state.lock();
        state.resources.get(&resource).filter(|r| r.alive).map(|r| r.info)
    }
}

impl DeviceResources for HeadlessDevice {
    type Context = HeadlessContext;

    fn update_resource_state(&self, resource: ResourceHandle, new_state: ResourceState) {
        if let Some(r) = self.state.lock().resources.get_mut(&resource) {
            r.info.state = new_state;
        }
    }

    fn create_resource(&self, desc: &VirtualResourceDesc) -> Result<ResourceHandle, DeviceError> {
        let width = if desc.dimension.is_buffer() { desc.size.min(u32::MAX as u64) as u32 } else { desc.width };
        let handle = self.insert(
            format!("{:?}", desc.usage),
            DeviceResourceInfo {
                dimension: desc.dimension,
                state: ResourceState::UNDEFINED,
                width,
                height: desc.height,
                depth: desc.depth,
                mip_levels: desc.mip_levels,
                array_layers: desc.array_layers,
                format: desc.format,
            },
        );
        log::trace!("HeadlessDevice: created {:?} for {:?}", handle, desc.usage);
        Ok(handle)
    }

    fn destroy_resource(&self, resource: ResourceHandle) {
        let mut state = self.state.lock();
        let destroyed = match state.resources.get_mut(&resource) {
            Some(r) if r.alive => {
                r.alive = false;
                true
            }
            _ => false,
        };
        if destroyed {
            state.destroyed += 1;
        } else {
            log::warn!("HeadlessDevice: destroying unknown {:?}", resource);
        }
    }

    fn begin_context(&self, label: &str) -> Result<HeadlessContext, DeviceError> {
        let state = self.state.lock();
        if state.failing_contexts.iter().any(|failing| label.starts_with(failing.as_str())) {
            return Err(DeviceError::ContextUnavailable(label.to_string()));
        }
        Ok(HeadlessContext::new(label))
    }

    fn submit(&self, contexts: Vec<HeadlessContext>) -> Result<(), DeviceError> {
        log::trace!("HeadlessDevice: submit {} contexts", contexts.len());
        self.state.lock().submissions.push(contexts);
        Ok(())
    }
}
