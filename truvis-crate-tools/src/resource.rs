use std::path::{Path, PathBuf};

/// 统一路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
/// 避免使用硬编码相对路径，确保在不同构建环境下路径一致。
///
/// # 使用示例
/// ```ignore
/// let config = TruvisPath::config_path("frame_graph.toml"); // configs/frame_graph.toml
/// ```
pub struct TruvisPath {}

// 核心路径
impl TruvisPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // truvis-crate-tools 位于工作区根目录下
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().unwrap_or(manifest_dir).to_path_buf()
    }

    pub fn target_path() -> PathBuf {
        Self::workspace_path().join("target")
    }
}

// 根目录下
impl TruvisPath {
    pub fn engine_path() -> PathBuf {
        Self::workspace_path().join("engine")
    }

    /// 获取 `configs/` 目录下的配置文件路径
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("configs").join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_contains_crate_tools() {
        assert!(TruvisPath::workspace_path().join("truvis-crate-tools").is_dir());
        assert!(TruvisPath::config_path("frame_graph.toml").ends_with("configs/frame_graph.toml"));
    }
}
