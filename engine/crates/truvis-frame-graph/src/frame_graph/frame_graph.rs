//! 帧图构建
//!
//! 节点按声明顺序添加，setup 回调立即执行并完成 barrier 和依赖的推导；
//! draw 回调被类型擦除后保存，直到 [`CompiledFrameGraph::execute`] 时才在工作线程上运行。

use std::ops::Range;

use super::deferred_task::DeferredTask;
use super::device::{CommandContext, DeviceResources};
use super::executor::{CompiledFrameGraph, FrameGraphRuntime};
use super::graph::DependencyGraph;
use super::handle::{FrameResourceHandle, NodeHandle, ResourceHandle};
use super::handler::ResourceHandler;
use super::node::{FrameGraphNode, NodeBuilder};
use super::resource_table::ResourceTable;
use super::scratch::ScratchAllocator;

/// 类型擦除的单线程节点执行器
pub(crate) trait NodeExecutor<D: DeviceResources> {
    fn execute(
        self: Box<Self>,
        handler: &mut ResourceHandler<'_>,
        ctx: &mut D::Context,
        scratch: &mut ScratchAllocator,
    );
}

/// 类型擦除的数据并行节点执行器，多个工作单元共享同一份数据
pub(crate) trait ParallelNodeExecutor<D: DeviceResources> {
    fn execute_range(
        &self,
        range: Range<usize>,
        handler: &mut ResourceHandler<'_>,
        ctx: &mut D::Context,
        scratch: &mut ScratchAllocator,
    );
}

struct ClosureNode<T, F> {
    data: T,
    draw: F,
}

impl<D, T, F> NodeExecutor<D> for ClosureNode<T, F>
where
    D: DeviceResources,
    F: FnOnce(T, &mut ResourceHandler<'_>, &mut D::Context, &mut ScratchAllocator),
{
    fn execute(
        self: Box<Self>,
        handler: &mut ResourceHandler<'_>,
        ctx: &mut D::Context,
        scratch: &mut ScratchAllocator,
    ) {
        let Self { data, draw } = *self;
        draw(data, handler, ctx, scratch);
    }
}

struct PassNode<P>(P);

impl<D: DeviceResources, P: FramePass<D>> NodeExecutor<D> for PassNode<P> {
    fn execute(
        self: Box<Self>,
        handler: &mut ResourceHandler<'_>,
        ctx: &mut D::Context,
        scratch: &mut ScratchAllocator,
    ) {
        let mut pass = self.0;
        pass.execute(handler, ctx, scratch);
    }
}

struct ClosureParallelNode<T, F> {
    data: T,
    draw: F,
}

impl<D, T, F> ParallelNodeExecutor<D> for ClosureParallelNode<T, F>
where
    D: DeviceResources,
    F: Fn(&T, Range<usize>, &mut ResourceHandler<'_>, &mut D::Context, &mut ScratchAllocator),
{
    fn execute_range(
        &self,
        range: Range<usize>,
        handler: &mut ResourceHandler<'_>,
        ctx: &mut D::Context,
        scratch: &mut ScratchAllocator,
    ) {
        (self.draw)(&self.data, range, handler, ctx, scratch);
    }
}

/// 数据并行节点：`item_count` 个 item 按 `chunk_size` 切分成工作单元
pub(crate) struct ParallelNode<'a, D: DeviceResources> {
    pub item_count: usize,
    pub chunk_size: usize,
    pub executor: Box<dyn ParallelNodeExecutor<D> + Send + Sync + 'a>,
}

impl<D: DeviceResources> ParallelNode<'_, D> {
    pub fn chunks(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.item_count).step_by(self.chunk_size).map(|start| start..(start + self.chunk_size).min(self.item_count))
    }
}

/// 节点的执行方式
pub(crate) enum NodeKind<'a, D: DeviceResources> {
    Single(Box<dyn NodeExecutor<D> + Send + 'a>),
    Parallel(ParallelNode<'a, D>),
    /// 只执行 barrier
    BarrierOnly,
}

/// FramePass trait
///
/// 以结构体的形式定义节点，适合需要保存 pipeline 等状态的 pass。
///
/// ```ignore
/// struct BlurPass {
///     input: FrameResourceHandle,
///     output: FrameResourceHandle,
/// }
///
/// impl<D: DeviceResources> FramePass<D> for BlurPass {
///     fn setup(&mut self, builder: &mut NodeBuilder<'_>) {
///         self.input = builder.non_pixel_shader_resource(self.input);
///         self.output = builder.unordered_access(self.output);
///     }
///
///     fn execute(&mut self, handler: &mut ResourceHandler<'_>, ctx: &mut D::Context, _: &mut ScratchAllocator) {
///         let input = handler.get_resource(self.input);
///         // dispatch...
///     }
/// }
/// ```
pub trait FramePass<D: DeviceResources>: Send {
    /// 声明节点的资源使用
    fn setup(&mut self, builder: &mut NodeBuilder<'_>);

    /// 录制命令，运行在工作线程上
    fn execute(&mut self, handler: &mut ResourceHandler<'_>, ctx: &mut D::Context, scratch: &mut ScratchAllocator);
}

/// 帧图构建器
///
/// # 使用流程
///
/// 1. 创建：`FrameGraph::new(&device, &runtime)`
/// 2. 登记外部资源：`graph.import(...)` / `graph.resources_mut().add_render_target(...)`
/// 3. 添加节点：`graph.add_node(...)`、`graph.add_parallel_node(...)`、`graph.add_pass(...)`
/// 4. 编译：`graph.compile()`
/// 5. 执行：`compiled.execute(&mut pool)`
///
/// # 生命周期
///
/// `'a` 是节点回调可以借用的外部数据的生命周期，回调不需要是 `'static`。
pub struct FrameGraph<'a, D: DeviceResources> {
    device: &'a D,
    runtime: &'a FrameGraphRuntime,

    resources: ResourceTable,

    /// 节点（声明顺序）
    nodes: Vec<FrameGraphNode>,
    /// 与 `nodes` 一一对应
    kinds: Vec<NodeKind<'a, D>>,
}

// new & init
impl<'a, D: DeviceResources> FrameGraph<'a, D> {
    pub fn new(device: &'a D, runtime: &'a FrameGraphRuntime) -> Self {
        Self {
            device,
            runtime,
            resources: ResourceTable::new(),
            nodes: Vec::new(),
            kinds: Vec::new(),
        }
    }
}

// getters
impl<D: DeviceResources> FrameGraph<'_, D> {
    #[inline]
    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    /// 用于按类型登记资源
    #[inline]
    pub fn resources_mut(&mut self) -> &mut ResourceTable {
        &mut self.resources
    }

    #[inline]
    pub fn node(&self, handle: NodeHandle) -> Option<&FrameGraphNode> {
        self.nodes.get(handle.index())
    }

    #[inline]
    pub fn nodes(&self) -> &[FrameGraphNode] {
        &self.nodes
    }
}

// 节点声明
impl<'a, D: DeviceResources> FrameGraph<'a, D> {
    /// 登记（或查找）物理资源
    pub fn import(&mut self, resource: ResourceHandle) -> FrameResourceHandle {
        self.resources.add_resource(self.device, resource)
    }

    fn declare<S>(&mut self, name: String, kind: NodeKind<'a, D>, setup: S) -> NodeHandle
    where
        S: FnOnce(&mut NodeBuilder<'_>),
    {
        let _span = tracy_client::span!("FrameGraph::declare");

        let mut builder = NodeBuilder::new(name, &mut self.nodes, &mut self.resources, self.device);
        let handle = builder.node();
        setup(&mut builder);
        let node = builder.finish();

        log::trace!("declared {:?} `{}` after {:?}", handle, node.name, node.predecessors);
        self.nodes.push(node);
        self.kinds.push(kind);
        handle
    }

    /// 添加节点
    ///
    /// - `setup` 立即执行，用来声明资源并填充 `data`
    /// - `draw` 在执行阶段运行在工作线程上，拿到 `data` 的所有权
    pub fn add_node<T, S, F>(&mut self, name: impl Into<String>, data: T, setup: S, draw: F) -> NodeHandle
    where
        T: Send + 'a,
        S: FnOnce(&mut NodeBuilder<'_>, &mut T),
        F: FnOnce(T, &mut ResourceHandler<'_>, &mut D::Context, &mut ScratchAllocator) + Send + 'a,
    {
        let mut data = data;
        let handle = self.declare(name.into(), NodeKind::BarrierOnly, |builder| setup(builder, &mut data));
        self.kinds[handle.index()] = NodeKind::Single(Box::new(ClosureNode { data, draw }));
        handle
    }

    /// 添加以 [`FramePass`] 定义的节点
    pub fn add_pass<P: FramePass<D> + 'a>(&mut self, name: impl Into<String>, mut pass: P) -> NodeHandle {
        let handle = self.declare(name.into(), NodeKind::BarrierOnly, |builder| pass.setup(builder));
        self.kinds[handle.index()] = NodeKind::Single(Box::new(PassNode(pass)));
        handle
    }

    /// 添加数据并行节点
    ///
    /// `item_count` 个 item 按配置的 `parallel_chunk_size` 切分，每个工作单元拥有独立的命令上下文。
    /// 工作单元之间共享 `data`，资源视图是只读的，不能在工作单元内部 transition。
    pub fn add_parallel_node<T, S, F>(
        &mut self,
        name: impl Into<String>,
        data: T,
        item_count: usize,
        setup: S,
        draw: F,
    ) -> NodeHandle
    where
        T: Send + Sync + 'a,
        S: FnOnce(&mut NodeBuilder<'_>, &mut T),
        F: Fn(&T, Range<usize>, &mut ResourceHandler<'_>, &mut D::Context, &mut ScratchAllocator) + Send + Sync + 'a,
    {
        let mut data = data;
        let handle = self.declare(name.into(), NodeKind::BarrierOnly, |builder| setup(builder, &mut data));
        self.kinds[handle.index()] = NodeKind::Parallel(ParallelNode {
            item_count,
            chunk_size: self.runtime.config().parallel_chunk_size,
            executor: Box::new(ClosureParallelNode { data, draw }),
        });
        handle
    }

    /// 只有 barrier 的节点，例如在帧末把 swapchain image 切换到 present
    pub fn add_barrier_node<S>(&mut self, name: impl Into<String>, setup: S) -> NodeHandle
    where
        S: FnOnce(&mut NodeBuilder<'_>),
    {
        self.declare(name.into(), NodeKind::BarrierOnly, setup)
    }

    /// 整个资源的拷贝
    pub fn add_copy_node(
        &mut self,
        name: impl Into<String>,
        src: FrameResourceHandle,
        dst: FrameResourceHandle,
    ) -> NodeHandle {
        self.add_node(
            name,
            (),
            |builder, _| {
                builder.copy_source(src);
                builder.copy_dest(dst);
            },
            move |_, handler, ctx, _| {
                let (src, dst) = (handler.get_resource(src), handler.get_resource(dst));
                if src.is_valid() && dst.is_valid() {
                    ctx.copy_resource(src, dst);
                }
            },
        )
    }

    /// 在工作线程池上运行 CPU 任务，节点回调中通过 [`DeferredTask::wait`] 获取结果
    pub fn spawn_task<T, F>(&self, name: impl Into<String>, task: F) -> DeferredTask<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        DeferredTask::spawn(self.runtime.thread_pool(), name, task)
    }
}

// compile
impl<'a, D: DeviceResources> FrameGraph<'a, D> {
    /// 编译帧图
    ///
    /// 依赖在声明阶段已经推导完成，这里只构建依赖图用于校验和打印执行计划。
    /// 编译会消耗构建器，之后不能再声明新的节点。
    pub fn compile(self) -> CompiledFrameGraph<'a, D> {
        let _span = tracy_client::span!("FrameGraph::compile");

        let graph = DependencyGraph::from_predecessors(self.nodes.iter().map(|node| node.predecessors.as_slice()));
        debug_assert!(graph.topological_sort().is_ok(), "edges always point to earlier nodes");

        let compiled = CompiledFrameGraph::new(self.device, self.runtime, self.resources, self.nodes, self.kinds, graph);
        if self.runtime.config().log_execution_plan {
            compiled.print_execution_plan();
        }
        compiled
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ash::vk;
    use parking_lot::Mutex;

    use super::*;
    use crate::config::{FrameGraphConfig, PoolConfig};
    use crate::frame_graph::{DevicePool, ResourceState, VirtualResourceDesc, VirtualResourceScope};
    use crate::headless::{HeadlessContext, HeadlessDevice};

    fn runtime() -> FrameGraphRuntime {
        let config = FrameGraphConfig {
            worker_threads: 2,
            ..Default::default()
        };
        FrameGraphRuntime::new(config).unwrap()
    }

    struct BlurPass {
        input: FrameResourceHandle,
        output: FrameResourceHandle,
        resolved: Arc<Mutex<Vec<ResourceHandle>>>,
    }

    impl FramePass<HeadlessDevice> for BlurPass {
        fn setup(&mut self, builder: &mut NodeBuilder<'_>) {
            self.input = builder.non_pixel_shader_resource(self.input);
            self.output = builder.unordered_access(self.output);
        }

        fn execute(&mut self, handler: &mut ResourceHandler<'_>, _ctx: &mut HeadlessContext, _: &mut ScratchAllocator) {
            let mut resolved = self.resolved.lock();
            resolved.push(handler.get_resource(self.input));
            resolved.push(handler.get_resource(self.output));
        }
    }

    #[test]
    fn test_add_pass() {
        let runtime = runtime();
        let device = Arc::new(HeadlessDevice::new());
        let mut pool = DevicePool::new(device.clone(), PoolConfig::default());

        let input = device.create_texture_2d("input", 64, 64, ResourceState::PIXEL_SHADER_RESOURCE);
        let output = device.create_texture_2d("output", 64, 64, ResourceState::UNORDERED_ACCESS);
        let resolved = Arc::new(Mutex::new(Vec::new()));

        let mut graph = FrameGraph::new(device.as_ref(), &runtime);
        let pass = BlurPass {
            input: graph.import(input),
            output: graph.import(output),
            resolved: resolved.clone(),
        };
        let blur = graph.add_pass("blur", pass);

        let node = graph.node(blur).unwrap();
        assert_eq!(node.name(), "blur");
        assert_eq!(node.inputs.len(), 1);
        assert_eq!(node.outputs.len(), 1);

        let report = graph.compile().execute(&mut pool).unwrap();
        assert_eq!(report.executed_nodes, 1);
        assert_eq!(*resolved.lock(), vec![input, output]);
    }

    #[test]
    fn test_add_dependency() {
        let runtime = runtime();
        let device = HeadlessDevice::new();
        let mut graph = FrameGraph::new(&device, &runtime);

        let upload = graph.add_barrier_node("upload", |_| {});
        let consume = graph.add_barrier_node("consume", |builder| {
            builder.add_dependency(upload);
            builder.add_dependency(upload);

            let this = builder.node();
            builder.add_dependency(this);
            builder.add_dependency(NodeHandle::new(this.index() + 1));
        });

        assert!(graph.node(upload).unwrap().predecessors().is_empty());
        assert_eq!(graph.node(consume).unwrap().predecessors(), &[upload]);

        let compiled = graph.compile();
        assert_eq!(compiled.waves(), vec![vec![upload], vec![consume]]);
    }

    #[test]
    fn test_use_lists_follow_state_access() {
        let runtime = runtime();
        let device = HeadlessDevice::new();
        let texture = device.create_texture_2d("target", 16, 16, ResourceState::UNORDERED_ACCESS);

        let mut graph = FrameGraph::new(&device, &runtime);
        let target = graph.import(texture);
        let writer = graph.add_barrier_node("writer", |builder| {
            builder.read_transition(target, ResourceState::UNORDERED_ACCESS);
        });
        let reader = graph.add_barrier_node("reader", |builder| {
            builder.write_transition(target, ResourceState::NON_PIXEL_SHADER_RESOURCE);
        });

        let writer_node = graph.node(writer).unwrap();
        assert!(writer_node.inputs.is_empty());
        assert_eq!(writer_node.outputs.len(), 1);

        let reader_node = graph.node(reader).unwrap();
        assert_eq!(reader_node.inputs.len(), 1);
        assert!(reader_node.outputs.is_empty());
        assert_eq!(reader_node.predecessors(), &[writer]);
    }

    #[test]
    fn test_compute_memory_barrier() {
        let runtime = runtime();
        let device = Arc::new(HeadlessDevice::new());
        let mut pool = DevicePool::new(device.clone(), PoolConfig::default());

        let mut graph = FrameGraph::new(device.as_ref(), &runtime);
        let sync = graph.add_barrier_node("compute sync", |builder| builder.compute_memory_barrier());

        let barriers = graph.node(sync).unwrap().barriers();
        assert_eq!(barriers.len(), 1);
        assert!(barriers[0].is_global());
        assert!(!barriers[0].resource.is_valid());
        assert_eq!(barriers[0].access_before, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(barriers[0].access_after, vk::AccessFlags2::SHADER_STORAGE_READ);

        graph.compile().execute(&mut pool).unwrap();

        let recorded: Vec<_> =
            device.take_submissions().into_iter().flatten().flat_map(|ctx| ctx.barriers().copied().collect::<Vec<_>>()).collect();
        assert!(recorded.iter().any(|barrier| barrier.barrier.is_global() && barrier.resource == ResourceHandle::INVALID));
    }

    #[test]
    fn test_use_after_release_is_rejected() {
        let runtime = runtime();
        let device = HeadlessDevice::new();
        let mut graph = FrameGraph::new(&device, &runtime);

        let mut target = FrameResourceHandle::default();
        let producer = graph.add_barrier_node("producer", |builder| {
            target = builder.acquire_virtual_resource(
                "scratch",
                VirtualResourceDesc::uav_buffer(4096),
                ResourceState::UNORDERED_ACCESS,
                VirtualResourceScope::Frame,
            );
        });
        graph.add_barrier_node("consumer", |builder| {
            builder.non_pixel_shader_resource(target);
            builder.release_virtual_resource(target);
        });

        let mut late = FrameResourceHandle::default();
        let late_node = graph.add_barrier_node("late", |builder| {
            late = builder.non_pixel_shader_resource(target);
        });

        assert!(target.is_valid());
        assert!(!late.is_valid());
        assert!(graph.node(late_node).unwrap().predecessors().is_empty());
        assert_eq!(graph.node(producer).unwrap().acquires(), &[target]);
    }
}
