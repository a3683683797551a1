//! 帧图执行
//!
//! 节点按声明顺序提交，但录制是并行的：协调线程按声明顺序遍历节点，只等待节点的前驱完成，
//! 然后把节点派发到工作线程池。工作线程通过 channel 汇报完成，
//! 资源表在执行期间只由协调线程修改（状态恢复、虚拟资源的分配与归还）。

use std::collections::HashMap;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::{Receiver, Sender};
use slotmap::SecondaryMap;

use super::barrier::{ResolvedBarrier, SubresourceRange};
use super::device::{ClearValue, CommandContext, DeviceError, DeviceResources};
use super::frame_graph::{NodeExecutor, NodeKind, ParallelNode};
use super::frame_object::VirtualState;
use super::graph::DependencyGraph;
use super::handle::{FrameResourceHandle, NodeHandle, ResourceHandle};
use super::handler::{LocalResource, ResourceHandler};
use super::node::FrameGraphNode;
use super::resource_table::ResourceTable;
use super::scratch::ScratchAllocator;
use super::state::ResourceState;
use super::virtual_resource::{ResourcePool, VirtualResourceScope};
use crate::config::FrameGraphConfig;

/// 帧图执行错误
#[derive(Debug, thiserror::Error)]
pub enum FrameGraphError {
    #[error("failed to build the worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("invalid frame graph config: {0}")]
    InvalidConfig(String),

    #[error("node `{node}` failed: {source}")]
    Node { node: String, source: DeviceError },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// 帧图运行时：工作线程池和配置，跨帧复用
pub struct FrameGraphRuntime {
    thread_pool: rayon::ThreadPool,
    config: FrameGraphConfig,
}

// new & init
impl FrameGraphRuntime {
    pub fn new(config: FrameGraphConfig) -> Result<Self, FrameGraphError> {
        config.validate().map_err(|error| FrameGraphError::InvalidConfig(error.to_string()))?;

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|index| format!("FrameGraph-Worker-{}", index))
            .build()?;
        log::info!("frame graph runtime started with {} worker threads", thread_pool.current_num_threads());

        Ok(Self { thread_pool, config })
    }
}

// getters
impl FrameGraphRuntime {
    #[inline]
    pub fn config(&self) -> &FrameGraphConfig {
        &self.config
    }

    #[inline]
    pub fn thread_pool(&self) -> &rayon::ThreadPool {
        &self.thread_pool
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.thread_pool.current_num_threads()
    }
}

/// 一帧执行的结果
pub struct ExecutionReport {
    /// 实际运行了回调的节点数量
    pub executed_nodes: usize,
    /// 因为虚拟资源分配失败而只执行了 barrier 的节点
    pub skipped_nodes: Vec<NodeHandle>,
    /// 录制的 barrier 总数（包含 aliasing barrier 和状态恢复）
    pub barrier_count: usize,
    pub submitted_contexts: usize,
    /// 执行结束后的资源表
    pub resources: ResourceTable,
}

/// 编译后的帧图
pub struct CompiledFrameGraph<'a, D: DeviceResources> {
    device: &'a D,
    runtime: &'a FrameGraphRuntime,
    pub(crate) resources: ResourceTable,
    pub(crate) nodes: Vec<FrameGraphNode>,
    kinds: Vec<NodeKind<'a, D>>,
    pub(crate) graph: DependencyGraph,
}

// new & init
impl<'a, D: DeviceResources> CompiledFrameGraph<'a, D> {
    pub(crate) fn new(
        device: &'a D,
        runtime: &'a FrameGraphRuntime,
        resources: ResourceTable,
        nodes: Vec<FrameGraphNode>,
        kinds: Vec<NodeKind<'a, D>>,
        graph: DependencyGraph,
    ) -> Self {
        Self {
            device,
            runtime,
            resources,
            nodes,
            kinds,
            graph,
        }
    }
}

// getters
impl<D: DeviceResources> CompiledFrameGraph<'_, D> {
    #[inline]
    pub fn nodes(&self) -> &[FrameGraphNode] {
        &self.nodes
    }

    #[inline]
    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    #[inline]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// 按依赖深度分层，同一层内的节点可以并行录制
    pub fn waves(&self) -> Vec<Vec<NodeHandle>> {
        self.graph.waves().into_iter().map(|wave| wave.into_iter().map(NodeHandle::new).collect()).collect()
    }
}

impl<D: DeviceResources> CompiledFrameGraph<'_, D> {
    /// 执行帧图
    ///
    /// 录制所有节点并按声明顺序提交，之后归还虚拟资源，并把导入资源的最终状态写回设备。
    /// 设备错误会中止剩余节点的派发，已经分配的虚拟资源仍然会归还给资源池。
    pub fn execute(self, pool: &mut dyn ResourcePool) -> Result<ExecutionReport, FrameGraphError> {
        let _span = tracy_client::span!("FrameGraph::execute");

        let Self {
            device,
            runtime,
            mut resources,
            nodes,
            kinds,
            ..
        } = self;

        let node_count = nodes.len();
        let mut singles = Vec::with_capacity(node_count);
        let mut parallels = Vec::with_capacity(node_count);
        for kind in kinds {
            match kind {
                NodeKind::Single(executor) => {
                    singles.push(Some(executor));
                    parallels.push(None);
                }
                NodeKind::Parallel(parallel) => {
                    singles.push(None);
                    parallels.push(Some(parallel));
                }
                NodeKind::BarrierOnly => {
                    singles.push(None);
                    parallels.push(None);
                }
            }
        }

        let remaining_users = resources
            .iter()
            .filter_map(|(handle, object)| object.virtual_resource.as_ref().map(|v| (handle, v.users.len())))
            .collect();

        let (sender, receiver) = crossbeam_channel::unbounded();
        let coordinator = Coordinator {
            device,
            nodes: &nodes,
            table: &mut resources,
            pool: &mut *pool,
            parallels: &parallels,
            singles,
            sender,
            receiver,
            completed: vec![false; node_count],
            in_flight: 0,
            contexts: (0..node_count).map(|_| Vec::new()).collect(),
            pending_chunks: vec![0; node_count],
            parallel_handlers: (0..node_count).map(|_| None).collect(),
            restored_by: HashMap::new(),
            remaining_users,
            pending_releases: Vec::new(),
            executed: 0,
            skipped: Vec::new(),
            barrier_count: 0,
            error: None,
            panicked: false,
        };
        let outcome = runtime.thread_pool().in_place_scope(|scope| coordinator.run(scope));

        if let Some(error) = outcome.error {
            retire(device, &mut resources, pool, false);
            return Err(error);
        }

        let contexts: Vec<D::Context> = outcome.contexts.into_iter().flatten().flatten().collect();
        let submitted_contexts = contexts.len();
        let submitted = device.submit(contexts);
        retire(device, &mut resources, pool, submitted.is_ok());
        submitted?;

        log::debug!(
            "frame graph executed {} nodes ({} skipped), {} barriers, {} contexts",
            outcome.executed,
            outcome.skipped.len(),
            outcome.barrier_count,
            submitted_contexts
        );

        Ok(ExecutionReport {
            executed_nodes: outcome.executed,
            skipped_nodes: outcome.skipped,
            barrier_count: outcome.barrier_count,
            submitted_contexts,
            resources,
        })
    }
}

/// 帧图退役：归还虚拟资源，写回导入资源的状态
fn retire<D: DeviceResources>(device: &D, table: &mut ResourceTable, pool: &mut dyn ResourcePool, write_back: bool) {
    for (_, object) in table.iter_mut() {
        let Some(resource) = object.resource else {
            continue;
        };

        match object.virtual_resource.as_mut() {
            Some(virtual_resource) if virtual_resource.state == VirtualState::Created => {
                match virtual_resource.scope {
                    VirtualResourceScope::Frame => {
                        pool.release(resource, false, true);
                        virtual_resource.state = VirtualState::Released;
                    }
                    VirtualResourceScope::LongLived => {
                        pool.release(resource, false, false);
                        virtual_resource.state = VirtualState::LongLived;
                    }
                }
                log::trace!("retire releases `{}`", object.name);
            }
            Some(_) => {}
            None if write_back => device.update_resource_state(resource, object.state),
            None => {}
        }
    }

    pool.end_frame();
}

/// 节点开始前录制的命令
#[derive(Default)]
struct NodePrologue {
    /// (之前占用内存的资源, 新资源)
    aliasing: Vec<(ResourceHandle, ResourceHandle)>,
    barriers: Vec<ResolvedBarrier>,
    clears: Vec<(ResourceHandle, ClearValue)>,
}

impl NodePrologue {
    /// # 返回
    /// 录制的 barrier 数量
    fn record<C: CommandContext>(&self, ctx: &mut C) -> usize {
        for &(before, after) in &self.aliasing {
            ctx.record_aliasing_barrier(before, after);
        }
        if !self.barriers.is_empty() {
            ctx.record_barriers(&self.barriers);
        }
        for &(resource, value) in &self.clears {
            ctx.clear_resource(resource, value);
        }

        self.aliasing.len() + self.barriers.len()
    }
}

struct NodeOutput<C> {
    context: C,
    final_states: Vec<(FrameResourceHandle, ResourceState)>,
    barrier_count: usize,
}

enum WorkDone<C> {
    Node {
        index: usize,
        result: Result<NodeOutput<C>, DeviceError>,
    },
    Chunk {
        index: usize,
        slot: usize,
        result: Result<C, DeviceError>,
    },
    Panicked {
        index: usize,
    },
}

/// 运行工作单元并汇报结果；工作单元 panic 时先通知协调线程，避免它一直等待
fn report<C>(sender: &Sender<WorkDone<C>>, index: usize, work: impl FnOnce() -> WorkDone<C>) {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(done) => {
            let _ = sender.send(done);
        }
        Err(payload) => {
            let _ = sender.send(WorkDone::Panicked { index });
            panic::resume_unwind(payload);
        }
    }
}

fn run_node<D: DeviceResources>(
    device: &D,
    name: &str,
    prologue: NodePrologue,
    mut handler: ResourceHandler<'_>,
    executor: Option<Box<dyn NodeExecutor<D> + Send + '_>>,
) -> Result<NodeOutput<D::Context>, DeviceError> {
    let _span = tracy_client::span!("FrameGraph::run_node");

    let mut ctx = device.begin_context(name)?;
    let mut barrier_count = prologue.record(&mut ctx);

    if let Some(executor) = executor {
        let mut scratch = ScratchAllocator::default();
        executor.execute(&mut handler, &mut ctx, &mut scratch);
    }

    barrier_count += handler.restore(&mut ctx);
    Ok(NodeOutput {
        context: ctx,
        final_states: handler.final_states(),
        barrier_count,
    })
}

fn run_chunk<D: DeviceResources>(
    device: &D,
    name: &str,
    parallel: &ParallelNode<'_, D>,
    range: Range<usize>,
    mut handler: ResourceHandler<'_>,
) -> Result<D::Context, DeviceError> {
    let _span = tracy_client::span!("FrameGraph::run_chunk");

    let mut ctx = device.begin_context(&format!("{} [{}..{}]", name, range.start, range.end))?;
    let mut scratch = ScratchAllocator::default();
    parallel.executor.execute_range(range, &mut handler, &mut ctx, &mut scratch);
    Ok(ctx)
}

struct Outcome<C> {
    /// 每个节点的上下文（提交顺序），并行节点为 [prologue, chunks.., epilogue]
    contexts: Vec<Vec<Option<C>>>,
    executed: usize,
    skipped: Vec<NodeHandle>,
    barrier_count: usize,
    error: Option<FrameGraphError>,
}

/// 执行期间资源表的唯一写入者
struct Coordinator<'c, D: DeviceResources> {
    device: &'c D,
    nodes: &'c [FrameGraphNode],
    table: &'c mut ResourceTable,
    pool: &'c mut dyn ResourcePool,
    parallels: &'c [Option<ParallelNode<'c, D>>],
    singles: Vec<Option<Box<dyn NodeExecutor<D> + Send + 'c>>>,

    sender: Sender<WorkDone<D::Context>>,
    receiver: Receiver<WorkDone<D::Context>>,

    completed: Vec<bool>,
    in_flight: usize,
    contexts: Vec<Vec<Option<D::Context>>>,
    pending_chunks: Vec<usize>,
    /// 并行节点的资源视图，所有分块完成后用来恢复状态
    parallel_handlers: Vec<Option<ResourceHandler<'c>>>,

    /// 最近一次恢复资源状态的节点，保证结果与完成顺序无关
    restored_by: HashMap<FrameResourceHandle, usize>,
    /// 虚拟资源尚未完成的使用者数量
    remaining_users: HashMap<FrameResourceHandle, usize>,
    /// 已经声明释放、等待使用者完成的虚拟资源
    pending_releases: Vec<FrameResourceHandle>,

    executed: usize,
    skipped: Vec<NodeHandle>,
    barrier_count: usize,
    error: Option<FrameGraphError>,
    panicked: bool,
}

impl<'c, D: DeviceResources> Coordinator<'c, D> {
    fn run<'s>(mut self, scope: &rayon::Scope<'s>) -> Outcome<D::Context>
    where
        'c: 's,
    {
        let nodes = self.nodes;
        for index in 0..nodes.len() {
            while !self.is_aborted() && nodes[index].predecessors.iter().any(|p| !self.completed[p.index()]) {
                self.receive();
            }
            if self.is_aborted() {
                break;
            }

            // 释放的内存只在之后的分配之前交还资源池，保证复用的结果与完成顺序无关
            self.flush_releases();
            if !nodes[index].acquires.is_empty() {
                while !self.pending_releases.is_empty() && self.in_flight > 0 {
                    self.receive();
                    self.flush_releases();
                }
            }

            self.dispatch(scope, index);
        }

        while self.in_flight > 0 {
            self.receive();
        }
        if !self.is_aborted() {
            self.flush_releases();
        }

        Outcome {
            contexts: self.contexts,
            executed: self.executed,
            skipped: self.skipped,
            barrier_count: self.barrier_count,
            error: self.error,
        }
    }

    #[inline]
    fn is_aborted(&self) -> bool {
        self.error.is_some() || self.panicked
    }

    fn dispatch<'s>(&mut self, scope: &rayon::Scope<'s>, index: usize)
    where
        'c: 's,
    {
        let nodes = self.nodes;
        let node = &nodes[index];
        let mut prologue = NodePrologue::default();

        let acquired = self.acquire(index, &mut prologue);
        let backed = node.virtual_uses.iter().all(|&handle| self.table.get_resource(handle).is_valid());
        let skipped = !acquired || !backed;
        if skipped {
            log::warn!("[{}] virtual resources are unavailable, only barriers are recorded", node.name);
            self.skipped.push(NodeHandle::new(index));
        }

        prologue.barriers = self.resolve_barriers(node);
        let handler = self.make_handler(index);
        self.pending_releases.extend(node.releases.iter().copied());

        let parallels = self.parallels;
        if let Some(parallel) = &parallels[index] {
            self.dispatch_parallel(scope, index, parallel, prologue, handler, skipped);
            return;
        }

        let executor = self.singles[index].take().filter(|_| !skipped);
        let device = self.device;
        let name = node.name.as_str();
        let sender = self.sender.clone();

        log::trace!("dispatch {:?} `{}`", NodeHandle::new(index), name);
        self.in_flight += 1;
        scope.spawn(move |_| {
            report(&sender, index, || WorkDone::Node {
                index,
                result: run_node(device, name, prologue, handler, executor),
            });
        });
    }

    fn dispatch_parallel<'s>(
        &mut self,
        scope: &rayon::Scope<'s>,
        index: usize,
        parallel: &'c ParallelNode<'c, D>,
        prologue: NodePrologue,
        handler: ResourceHandler<'c>,
        skipped: bool,
    ) where
        'c: 's,
    {
        let nodes = self.nodes;
        let name = nodes[index].name.as_str();
        let mut prologue_ctx = match self.device.begin_context(name) {
            Ok(ctx) => ctx,
            Err(error) => {
                self.fail(index, error);
                return;
            }
        };
        self.barrier_count += prologue.record(&mut prologue_ctx);

        let chunks: Vec<Range<usize>> = if skipped { Vec::new() } else { parallel.chunks().collect() };
        let mut slots = Vec::with_capacity(chunks.len() + 2);
        slots.push(Some(prologue_ctx));
        slots.resize_with(chunks.len() + 2, || None);
        self.contexts[index] = slots;
        self.pending_chunks[index] = chunks.len();

        log::trace!("dispatch {:?} `{}` as {} work items", NodeHandle::new(index), name, chunks.len());
        for (chunk, range) in chunks.into_iter().enumerate() {
            let view = handler.read_only_view();
            let device = self.device;
            let sender = self.sender.clone();

            self.in_flight += 1;
            scope.spawn(move |_| {
                report(&sender, index, || WorkDone::Chunk {
                    index,
                    slot: chunk + 1,
                    result: run_chunk(device, name, parallel, range, view),
                });
            });
        }

        self.parallel_handlers[index] = Some(handler);
        if self.pending_chunks[index] == 0 {
            self.finish_parallel(index);
        }
    }

    /// 并行节点的所有分块完成后，在单独的上下文中恢复状态
    fn finish_parallel(&mut self, index: usize) {
        let Some(mut handler) = self.parallel_handlers[index].take() else {
            return;
        };

        let mut ctx = match self.device.begin_context(&self.nodes[index].name) {
            Ok(ctx) => ctx,
            Err(error) => {
                self.fail(index, error);
                return;
            }
        };
        self.barrier_count += handler.restore(&mut ctx);
        if let Some(slot) = self.contexts[index].last_mut() {
            *slot = Some(ctx);
        }

        self.complete(index, handler.final_states());
    }

    fn receive(&mut self) {
        if self.in_flight == 0 {
            return;
        }
        let Ok(done) = self.receiver.recv() else {
            self.in_flight = 0;
            return;
        };
        self.in_flight -= 1;

        match done {
            WorkDone::Node { index, result } => match result {
                Ok(output) => {
                    self.barrier_count += output.barrier_count;
                    self.contexts[index] = vec![Some(output.context)];
                    self.complete(index, output.final_states);
                }
                Err(error) => self.fail(index, error),
            },
            WorkDone::Chunk { index, slot, result } => match result {
                Ok(ctx) => {
                    self.contexts[index][slot] = Some(ctx);
                    self.pending_chunks[index] -= 1;
                    if self.pending_chunks[index] == 0 && !self.is_aborted() {
                        self.finish_parallel(index);
                    }
                }
                Err(error) => self.fail(index, error),
            },
            WorkDone::Panicked { index } => {
                log::error!("[{}] panicked while recording", self.nodes[index].name);
                self.panicked = true;
            }
        }
    }

    fn fail(&mut self, index: usize, error: DeviceError) {
        let node = self.nodes[index].name.clone();
        log::error!("[{}] {}", node, error);
        if self.error.is_none() {
            self.error = Some(FrameGraphError::Node { node, source: error });
        }
    }

    /// 节点完成：把资源恢复到 final state，更新虚拟资源的使用者计数
    fn complete(&mut self, index: usize, final_states: Vec<(FrameResourceHandle, ResourceState)>) {
        let nodes = self.nodes;
        self.completed[index] = true;
        if !self.skipped.contains(&NodeHandle::new(index)) {
            self.executed += 1;
        }

        for (handle, state) in final_states {
            let Some(current) = self.table.get_resource_state(handle) else {
                continue;
            };
            // 没有依赖关系的读取者可能以任意顺序完成，它们的状态合并
            let joins = current.is_read_only() && state.is_read_only() && current.layout == state.layout;

            match self.restored_by.get(&handle).copied() {
                Some(by) if joins => {
                    self.table.set_state(handle, current.merge_read(state));
                    self.restored_by.insert(handle, by.max(index));
                }
                Some(by) if by > index => {}
                _ => {
                    self.table.set_state(handle, state);
                    self.restored_by.insert(handle, index);
                }
            }
        }

        for handle in &nodes[index].virtual_uses {
            if let Some(remaining) = self.remaining_users.get_mut(handle) {
                *remaining = remaining.saturating_sub(1);
            }
        }
    }
}

// 虚拟资源
impl<D: DeviceResources> Coordinator<'_, D> {
    /// 分配节点负责的虚拟资源
    ///
    /// # 返回
    /// 所有分配都成功时返回 true
    fn acquire(&mut self, index: usize, prologue: &mut NodePrologue) -> bool {
        let nodes = self.nodes;
        let node = &nodes[index];
        let mut acquired = true;

        for &handle in &node.acquires {
            let Some(object) = self.table.get_mut(handle) else {
                continue;
            };
            let Some(virtual_resource) = object.virtual_resource.as_mut() else {
                continue;
            };

            match self.pool.acquire(&virtual_resource.desc) {
                Ok(allocation) => {
                    object.resource = Some(allocation.resource);
                    virtual_resource.state = VirtualState::Created;
                    virtual_resource.overlap = allocation.overlap;

                    if let Some(previous) = allocation.overlap {
                        prologue.aliasing.push((previous, allocation.resource));
                    }
                    if let Some(clear) = virtual_resource.desc.clear {
                        prologue.clears.push((allocation.resource, clear));
                    }
                    log::debug!("[{}] acquired `{}` as {:?}", node.name, object.name, allocation.resource);
                }
                Err(error) => {
                    log::warn!("[{}] cannot acquire `{}`: {}", node.name, object.name, error);
                    acquired = false;
                }
            }
        }

        acquired
    }

    /// 归还所有使用者都已完成的虚拟资源
    fn flush_releases(&mut self) {
        let mut index = 0;
        while index < self.pending_releases.len() {
            let handle = self.pending_releases[index];
            if self.remaining_users.get(&handle).copied().unwrap_or(0) > 0 {
                index += 1;
                continue;
            }
            self.pending_releases.swap_remove(index);

            let Some(object) = self.table.get_mut(handle) else {
                continue;
            };
            let Some(virtual_resource) = object.virtual_resource.as_mut() else {
                continue;
            };
            if let Some(resource) = object.resource {
                self.pool.release(resource, false, true);
            }
            virtual_resource.state = VirtualState::Released;
            log::debug!("released `{}`", object.name);
        }
    }
}

// 资源解析
impl<'c, D: DeviceResources> Coordinator<'c, D> {
    fn resolve_barriers(&self, node: &FrameGraphNode) -> Vec<ResolvedBarrier> {
        node.barriers
            .iter()
            .filter_map(|barrier| {
                if barrier.is_global() {
                    return Some(ResolvedBarrier {
                        resource: ResourceHandle::INVALID,
                        barrier: *barrier,
                    });
                }
                let resource = self.table.get_resource(barrier.resource);
                resource.is_valid().then_some(ResolvedBarrier {
                    resource,
                    barrier: *barrier,
                })
            })
            .collect()
    }

    /// 节点的本地资源视图，起始状态是声明阶段最后请求的状态
    fn make_handler(&self, index: usize) -> ResourceHandler<'c> {
        let nodes = self.nodes;
        let node = &nodes[index];
        let mut resources = SecondaryMap::new();

        for declared in &node.resources {
            let Some(object) = self.table.get(declared.handle) else {
                continue;
            };
            let Some(resource) = object.resource else {
                continue;
            };

            resources.insert(
                declared.handle,
                LocalResource {
                    resource,
                    dimension: object.dimension,
                    range: SubresourceRange::full(object.mip_levels, object.array_layers),
                    state: declared.state,
                    final_state: declared.final_state,
                    extent: object.virtual_resource.as_ref().map(|v| (v.desc.width, v.desc.height)),
                },
            );
        }

        ResourceHandler::new(NodeHandle::new(index), &node.name, self.device, resources)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::PoolConfig;
    use crate::frame_graph::{DevicePool, FrameGraph};
    use crate::headless::HeadlessDevice;

    fn runtime(worker_threads: usize) -> FrameGraphRuntime {
        FrameGraphRuntime::new(FrameGraphConfig {
            worker_threads,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_runtime_workers_are_named() {
        let runtime = runtime(3);
        assert_eq!(runtime.worker_count(), 3);

        let name = runtime.thread_pool().install(|| std::thread::current().name().map(str::to_owned));
        assert!(name.is_some_and(|name| name.starts_with("FrameGraph-Worker-")));
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let config = FrameGraphConfig {
            worker_threads: 1,
            parallel_chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(FrameGraphRuntime::new(config), Err(FrameGraphError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_graph() {
        let runtime = runtime(1);
        let device = Arc::new(HeadlessDevice::new());
        let mut pool = DevicePool::new(device.clone(), PoolConfig::default());

        let report = FrameGraph::new(device.as_ref(), &runtime).compile().execute(&mut pool).unwrap();
        assert_eq!(report.executed_nodes, 0);
        assert_eq!(report.submitted_contexts, 0);
        assert_eq!(device.submission_count(), 1);
    }

    #[test]
    #[should_panic(expected = "broken node")]
    fn test_node_panic_is_propagated() {
        let runtime = runtime(2);
        let device = Arc::new(HeadlessDevice::new());
        let mut pool = DevicePool::new(device.clone(), PoolConfig::default());

        let mut graph = FrameGraph::new(device.as_ref(), &runtime);
        graph.add_node("broken", (), |_, _| {}, |_, _, _, _| panic!("broken node"));
        graph.add_node("after", (), |_, _| {}, |_, _, _, _| {});

        let _ = graph.compile().execute(&mut pool);
    }
}
