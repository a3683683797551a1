//! 在 HeadlessDevice 上运行一个分簇光照形状的帧图
//!
//! depth prepass -> cluster bounds -> light bvh -> light lists -> shading -> tonemap -> present
//!
//! ```text
//! cargo run --bin clustered_frame -- configs/frame_graph.toml
//! ```

use std::sync::Arc;

use ash::vk;
use truvis_crate_tools::init_log::init_log;
use truvis_crate_tools::resource::TruvisPath;
use truvis_frame_graph::FrameGraphConfig;
use truvis_frame_graph::frame_graph::{
    ClearValue, DevicePool, FrameGraph, FrameGraphRuntime, FrameResourceHandle, ResourceState, VirtualResourceDesc,
    VirtualResourceScope,
};
use truvis_frame_graph::headless::HeadlessDevice;

const WIDTH: u32 = 1920;
const HEIGHT: u32 = 1080;
const CLUSTER_X: u32 = 16;
const CLUSTER_Y: u32 = 9;
const CLUSTER_Z: u32 = 24;
const MAX_LIGHTS_PER_CLUSTER: u64 = 64;
const FRAME_COUNT: usize = 3;

#[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct PointLight {
    position: [f32; 3],
    radius: f32,
}

/// 模拟场景中的点光源
fn scene_lights(frame: usize) -> Vec<PointLight> {
    (0..512)
        .map(|i| {
            let t = (i + frame * 7) as f32;
            PointLight {
                position: [t.sin() * 20.0, (t * 0.5).cos() * 5.0, t * 0.1],
                radius: 2.0 + (i % 5) as f32,
            }
        })
        .collect()
}

fn load_config() -> anyhow::Result<FrameGraphConfig> {
    if let Some(path) = std::env::args().nth(1) {
        return FrameGraphConfig::from_file(path);
    }

    let default_path = TruvisPath::config_path("frame_graph.toml");
    if default_path.is_file() {
        FrameGraphConfig::from_file(default_path)
    } else {
        Ok(FrameGraphConfig::default())
    }
}

#[derive(Default)]
struct ClusterData {
    depth: FrameResourceHandle,
    clusters: FrameResourceHandle,
}

#[derive(Default)]
struct LightListData {
    clusters: FrameResourceHandle,
    bvh: FrameResourceHandle,
    lists: FrameResourceHandle,
}

fn build_frame(
    graph: &mut FrameGraph<'_, HeadlessDevice>,
    frame: usize,
    back_buffer: FrameResourceHandle,
    light_buffer: FrameResourceHandle,
) {
    let culled_lights = graph.spawn_task("light culling", move || {
        scene_lights(frame).into_iter().filter(|light| light.position[2] > 0.0).collect::<Vec<_>>()
    });

    let mut depth = FrameResourceHandle::default();
    graph.add_node(
        "depth prepass",
        FrameResourceHandle::default(),
        |builder, target| {
            *target = builder.acquire_virtual_resource(
                "depth",
                VirtualResourceDesc::depth_target_2d(WIDTH, HEIGHT, vk::Format::D32_SFLOAT)
                    .with_clear(ClearValue::DepthStencil { depth: 1.0, stencil: 0 }),
                ResourceState::DEPTH_WRITE,
                VirtualResourceScope::Frame,
            );
            depth = *target;
        },
        |target, handler, _ctx, _| {
            log::debug!("depth prepass into {:?}", handler.get_resource(target));
        },
    );

    let mut clusters = FrameResourceHandle::default();
    graph.add_node(
        "cluster bounds",
        ClusterData::default(),
        |builder, data| {
            data.depth = builder.non_pixel_shader_resource(depth);
            data.clusters = builder.acquire_virtual_resource(
                "cluster aabbs",
                VirtualResourceDesc::uav_buffer((CLUSTER_X * CLUSTER_Y * CLUSTER_Z) as u64 * 32),
                ResourceState::UNORDERED_ACCESS,
                VirtualResourceScope::Frame,
            );
            clusters = data.clusters;
        },
        |data, handler, _ctx, _| {
            let (width, height) = handler.get_texture_wh(data.depth).unwrap_or((WIDTH, HEIGHT));
            log::debug!("cluster bounds from a {}x{} depth buffer", width, height);
        },
    );

    let mut bvh = FrameResourceHandle::default();
    graph.add_node(
        "light bvh",
        (FrameResourceHandle::default(), Some(culled_lights)),
        |builder, (target, _)| {
            builder.constant_buffer(light_buffer);
            *target = builder.acquire_virtual_resource(
                "light bvh",
                VirtualResourceDesc::uav_buffer(512 * 2 * 32),
                ResourceState::UNORDERED_ACCESS,
                VirtualResourceScope::Frame,
            );
            bvh = *target;
        },
        |(target, task), handler, _ctx, scratch| {
            let lights = task.and_then(|task| task.wait()).unwrap_or_default();
            let slice = scratch.push(&lights);
            log::debug!(
                "light bvh over {} lights ({} bytes staged) into {:?}",
                lights.len(),
                slice.len,
                handler.get_resource(target)
            );
        },
    );

    let mut lists = FrameResourceHandle::default();
    graph.add_parallel_node(
        "light lists",
        LightListData::default(),
        (CLUSTER_X * CLUSTER_Y * CLUSTER_Z) as usize,
        |builder, data| {
            data.clusters = builder.non_pixel_shader_resource(clusters);
            data.bvh = builder.non_pixel_shader_resource(bvh);
            data.lists = builder.acquire_virtual_resource(
                "light lists",
                VirtualResourceDesc::uav_buffer((CLUSTER_X * CLUSTER_Y * CLUSTER_Z) as u64 * MAX_LIGHTS_PER_CLUSTER * 4),
                ResourceState::UNORDERED_ACCESS,
                VirtualResourceScope::Frame,
            );
            builder.release_virtual_resource(clusters);
            builder.release_virtual_resource(bvh);
            lists = data.lists;
        },
        |data, range, handler, _ctx, scratch| {
            let counts: Vec<u32> = range.clone().map(|cluster| (cluster % 17) as u32).collect();
            scratch.push(&counts);
            log::trace!("light lists {:?} -> {:?}", range, handler.get_resource(data.lists));
        },
    );

    let mut hdr = FrameResourceHandle::default();
    graph.add_node(
        "shading",
        (),
        |builder, _| {
            builder.pixel_shader_resource(depth);
            builder.pixel_shader_resource(lists);
            hdr = builder.acquire_virtual_resource(
                "hdr",
                VirtualResourceDesc::render_target_2d(WIDTH, HEIGHT, vk::Format::R16G16B16A16_SFLOAT)
                    .with_clear(ClearValue::Color([0.0, 0.0, 0.0, 1.0])),
                ResourceState::RENDER_TARGET,
                VirtualResourceScope::Frame,
            );
            builder.release_virtual_resource(lists);
            builder.release_virtual_resource(depth);
        },
        |_, _handler, _ctx, _| {},
    );

    graph.add_node(
        "tonemap",
        (),
        |builder, _| {
            builder.pixel_shader_resource(hdr);
            builder.render_target(back_buffer);
            builder.release_virtual_resource(hdr);
        },
        |_, _handler, _ctx, _| {},
    );

    graph.add_barrier_node("present", |builder| {
        builder.present(back_buffer);
    });
}

fn main() -> anyhow::Result<()> {
    init_log();
    tracy_client::Client::start();
    tracy_client::set_thread_name!("FrameGraphMain");

    let config = load_config()?;
    let runtime = FrameGraphRuntime::new(config.clone())?;
    let device = Arc::new(HeadlessDevice::new());
    let mut pool = DevicePool::new(device.clone(), config.pool.clone());

    let back_buffer = device.create_texture_2d("swapchain", WIDTH, HEIGHT, ResourceState::PRESENT);
    let light_buffer = device.create_buffer("lights", 512 * 16, ResourceState::CONSTANT_BUFFER);

    for frame in 0..FRAME_COUNT {
        let mut graph = FrameGraph::new(device.as_ref(), &runtime);
        let back_buffer = graph.import(back_buffer);
        let light_buffer = graph.resources_mut().add_constant_buffer(light_buffer);

        build_frame(&mut graph, frame, back_buffer, light_buffer);

        let report = graph.compile().execute(&mut pool)?;
        log::info!(
            "frame {}: {} nodes executed, {} skipped, {} barriers, {} contexts, pool {} / {} bytes ({} resources)",
            frame,
            report.executed_nodes,
            report.skipped_nodes.len(),
            report.barrier_count,
            report.submitted_contexts,
            pool.allocated_bytes(),
            pool.budget_bytes(),
            pool.resource_count()
        );

        tracy_client::frame_mark();
    }

    log::info!(
        "device created {} resources, destroyed {}, {} submissions",
        device.created_count(),
        device.destroyed_count(),
        device.submission_count()
    );
    Ok(())
}
