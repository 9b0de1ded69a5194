//! 任务方法权重表
//!
//! 任务处理器按名字注册在外部系统中，调度器只需要方法名和它的
//! 默认权重。权重表在启动时加载，配置文件可以覆盖单个方法的权重。

use std::collections::HashMap;

/// 方法名到默认权重的映射
#[derive(Debug, Clone)]
pub struct MethodRegistry {
    weights: HashMap<String, f64>,
    default_weight: f64,
}

impl MethodRegistry {
    /// 内置的常见构建方法权重
    pub fn new() -> Self {
        let mut weights = HashMap::new();
        weights.insert("build".to_string(), 0.2);
        weights.insert("buildArch".to_string(), 2.0);
        weights.insert("buildSRPMFromSCM".to_string(), 1.0);
        weights.insert("rebuildSRPM".to_string(), 1.0);
        weights.insert("buildNotification".to_string(), 0.2);
        weights.insert("newRepo".to_string(), 2.0);
        weights.insert("createrepo".to_string(), 1.5);
        weights.insert("tagBuild".to_string(), 0.2);
        weights.insert("waitrepo".to_string(), 0.2);
        weights.insert("image".to_string(), 3.0);
        Self {
            weights,
            default_weight: 1.0,
        }
    }

    /// 应用配置中的覆盖项
    pub fn with_overrides(mut self, overrides: &HashMap<String, f64>) -> Self {
        for (method, weight) in overrides {
            self.weights.insert(method.clone(), *weight);
        }
        self
    }

    /// 方法的默认权重，未注册的方法返回 1.0
    pub fn weight_for(&self, method: &str) -> f64 {
        self.weights
            .get(method)
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// 任务的有效权重：任务行上的权重优先，非正值回退到方法默认值
    pub fn effective_weight(&self, method: &str, task_weight: f64) -> f64 {
        if task_weight > 0.0 {
            task_weight
        } else {
            self.weight_for(method)
        }
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_method_weights() {
        let registry = MethodRegistry::new();
        assert_eq!(registry.weight_for("buildArch"), 2.0);
        assert_eq!(registry.weight_for("waitrepo"), 0.2);
    }

    #[test]
    fn test_unknown_method_falls_back() {
        let registry = MethodRegistry::new();
        assert_eq!(registry.weight_for("someNewMethod"), 1.0);
    }

    #[test]
    fn test_overrides_win() {
        let mut overrides = HashMap::new();
        overrides.insert("buildArch".to_string(), 4.0);
        overrides.insert("vmExec".to_string(), 2.5);
        let registry = MethodRegistry::new().with_overrides(&overrides);
        assert_eq!(registry.weight_for("buildArch"), 4.0);
        assert_eq!(registry.weight_for("vmExec"), 2.5);
    }

    #[test]
    fn test_effective_weight_prefers_task_row() {
        let registry = MethodRegistry::new();
        assert_eq!(registry.effective_weight("buildArch", 1.5), 1.5);
        assert_eq!(registry.effective_weight("buildArch", 0.0), 2.0);
        assert_eq!(registry.effective_weight("buildArch", -1.0), 2.0);
    }
}
