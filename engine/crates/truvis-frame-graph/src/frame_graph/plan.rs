//! 执行计划打印

use ash::vk;
use itertools::Itertools;

use super::barrier::{Barrier, BarrierKind};
use super::device::DeviceResources;
use super::executor::CompiledFrameGraph;
use super::handle::FrameResourceHandle;
use super::node::ResourceUse;

const STAGE_NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
    (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
    (vk::PipelineStageFlags2::DRAW_INDIRECT, "DRAW_INDIRECT"),
    (vk::PipelineStageFlags2::VERTEX_INPUT, "VERTEX_INPUT"),
    (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
    (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
    (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
    (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
    (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
    (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
    (vk::PipelineStageFlags2::TRANSFER, "TRANSFER"),
    (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
    (vk::PipelineStageFlags2::ALL_GRAPHICS, "ALL_GRAPHICS"),
    (vk::PipelineStageFlags2::ALL_COMMANDS, "ALL_COMMANDS"),
];

const ACCESS_NAMES: &[(vk::AccessFlags2, &str)] = &[
    (vk::AccessFlags2::INDIRECT_COMMAND_READ, "INDIRECT_COMMAND_READ"),
    (vk::AccessFlags2::INDEX_READ, "INDEX_READ"),
    (vk::AccessFlags2::VERTEX_ATTRIBUTE_READ, "VERTEX_ATTRIBUTE_READ"),
    (vk::AccessFlags2::UNIFORM_READ, "UNIFORM_READ"),
    (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
    (vk::AccessFlags2::SHADER_STORAGE_READ, "SHADER_STORAGE_READ"),
    (vk::AccessFlags2::SHADER_STORAGE_WRITE, "SHADER_STORAGE_WRITE"),
    (vk::AccessFlags2::SHADER_READ, "SHADER_READ"),
    (vk::AccessFlags2::SHADER_WRITE, "SHADER_WRITE"),
    (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACHMENT_READ"),
    (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACHMENT_WRITE"),
    (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_STENCIL_READ"),
    (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_STENCIL_WRITE"),
    (vk::AccessFlags2::TRANSFER_READ, "TRANSFER_READ"),
    (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
    (vk::AccessFlags2::MEMORY_READ, "MEMORY_READ"),
    (vk::AccessFlags2::MEMORY_WRITE, "MEMORY_WRITE"),
];

/// 格式化 pipeline stage，多个 stage 用 `|` 连接
pub fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
    if stage == vk::PipelineStageFlags2::NONE {
        return "NONE".to_string();
    }
    STAGE_NAMES.iter().filter(|(flag, _)| stage.contains(*flag)).map(|(_, name)| *name).join("|")
}

/// 格式化 access flags，多个 access 用 `|` 连接
pub fn format_access_flags(access: vk::AccessFlags2) -> String {
    if access == vk::AccessFlags2::NONE {
        return "NONE".to_string();
    }
    ACCESS_NAMES.iter().filter(|(flag, _)| access.contains(*flag)).map(|(_, name)| *name).join("|")
}

impl<D: DeviceResources> CompiledFrameGraph<'_, D> {
    /// 打印执行计划（调试用）
    pub fn print_execution_plan(&self) {
        let waves = self.graph.waves();
        let mut wave_of = vec![0; self.nodes.len()];
        for (level, wave) in waves.iter().enumerate() {
            for &node in wave {
                wave_of[node] = level;
            }
        }

        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              FrameGraph Execution Plan                           ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Nodes: {}  |  Resources: {}  |  Edges: {}  |  Waves: {}",
            self.nodes.len(),
            self.resources.len(),
            self.graph.edge_count(),
            waves.len()
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (index, node) in self.nodes.iter().enumerate() {
            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!("│ [{}/{}] Node: \"{}\"  (wave {})", index + 1, self.nodes.len(), node.name, wave_of[index]);
            log::info!("├─────────────────────────────────────────────────────────────────┤");

            if !node.predecessors.is_empty() {
                log::info!(
                    "│ After: {}",
                    node.predecessors.iter().map(|p| format!("\"{}\"", self.nodes[p.index()].name)).join(", ")
                );
            }
            self.print_uses("Reads", "📖", &node.inputs);
            self.print_uses("Writes", "✏️ ", &node.outputs);

            for &handle in &node.acquires {
                log::info!("│ ➕ acquire \"{}\"", self.object_name(handle));
            }
            for &handle in &node.releases {
                log::info!("│ ➖ release \"{}\"", self.object_name(handle));
            }

            if node.barriers.is_empty() {
                log::info!("│ ✅ No barriers required");
            } else {
                log::info!("│ Barriers ({}):", node.barriers.len());
                for barrier in &node.barriers {
                    self.print_barrier(barrier);
                }
            }

            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        log::info!("");
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }

    fn object_name(&self, handle: FrameResourceHandle) -> &str {
        self.resources.get(handle).map(|object| object.name.as_str()).unwrap_or("<unknown>")
    }

    fn print_uses(&self, title: &str, icon: &str, uses: &[ResourceUse]) {
        if uses.is_empty() {
            return;
        }

        log::info!("│ {}:", title);
        for resource_use in uses {
            let state = resource_use.state;
            log::info!(
                "│   {} \"{}\" @ {:?} (stage: {}, access: {})",
                icon,
                self.object_name(resource_use.resource),
                state.layout,
                format_pipeline_stage(state.stage),
                format_access_flags(state.access)
            );
        }
    }

    fn print_barrier(&self, barrier: &Barrier) {
        match barrier.kind {
            BarrierKind::Global => {
                log::info!("│   🔒 <global>");
            }
            BarrierKind::Buffer => {
                log::info!("│   🔒 \"{}\"", self.object_name(barrier.resource));
            }
            BarrierKind::Texture {
                layout_before,
                layout_after,
                ..
            } => {
                log::info!("│   🔒 \"{}\"", self.object_name(barrier.resource));
                log::info!("│      layout: {:?} → {:?}", layout_before, layout_after);
            }
        }
        log::info!(
            "│      stage: {} → {}",
            format_pipeline_stage(barrier.sync_before),
            format_pipeline_stage(barrier.sync_after)
        );
        log::info!(
            "│      access: {} → {}",
            format_access_flags(barrier.access_before),
            format_access_flags(barrier.access_after)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_flags() {
        assert_eq!(format_pipeline_stage(vk::PipelineStageFlags2::NONE), "NONE");
        assert_eq!(
            format_pipeline_stage(vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER),
            "FRAGMENT_SHADER|COMPUTE_SHADER"
        );
        assert_eq!(format_access_flags(vk::AccessFlags2::TRANSFER_WRITE), "TRANSFER_WRITE");
    }
}
