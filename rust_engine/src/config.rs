//! 引擎运行配置
//!
//! 参数扁平化，模型在加载时读取一份快照，之后修改只影响新加载的模型。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 引擎配置
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    // ========== 蒙皮 ==========
    /// 顶点数达到该值时使用 rayon 并行蒙皮，默认 4096
    pub parallel_skinning_threshold: usize,
    /// 蒙皮后是否重新归一化法线，默认 true
    pub normalize_normals: bool,

    // ========== IK ==========
    /// 加载后 IK 是否默认启用，默认 true
    pub ik_enabled: bool,
    /// 单次 IK 迭代次数上限（覆盖模型数据中过大的值），默认 256
    pub max_ik_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // 顶点少时线程调度的开销比计算本身还大
            parallel_skinning_threshold: 4096,
            normalize_normals: true,

            ik_enabled: true,
            max_ik_iterations: 256,
        }
    }
}

/// 全局配置实例
static ENGINE_CONFIG: Lazy<RwLock<EngineConfig>> =
    Lazy::new(|| RwLock::new(EngineConfig::default()));

/// 获取当前配置（只读）
pub fn get_config() -> EngineConfig {
    ENGINE_CONFIG
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: EngineConfig) {
    *ENGINE_CONFIG
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    set_config(EngineConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.ik_enabled);
        assert!(config.normalize_normals);
        assert!(config.parallel_skinning_threshold > 0);
    }
}
