// env_setup.rs
// 环境准备：根据启动配置组装导出给外部启动器的环境变量（遥测、CUDA路径、可见设备、主端口等）。
use crate::config::LaunchConfig;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::process::Command;
use tracing::{debug, warn};

/// 有序的环境变量集合，后写入的同名变量覆盖先写入的值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchEnvironment {
    vars: Vec<(String, String)>,
}

impl LaunchEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// 组装启动环境
    ///
    /// `base` 用于查询当前进程已有的变量（例如 LD_LIBRARY_PATH 的原值），
    /// 测试中可以传入任意查找函数。
    pub fn from_config<F>(config: &LaunchConfig, port: u16, run_id: &str, base: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = Self::new();

        if config.disable_telemetry {
            env.set(ENV_TELEMETRY, TELEMETRY_DISABLED);
        }

        if let Some(cuda_home) = &config.cuda_home {
            if !cuda_home.exists() {
                warn!(cuda_home = %cuda_home.display(), "CUDA_HOME 目录不存在，训练进程可能无法加载CUDA库");
            }
            let lib64 = cuda_home.join("lib64");
            let ld_path = match base(ENV_LD_LIBRARY_PATH).filter(|s| !s.is_empty()) {
                Some(previous) => format!("{}:{}", lib64.display(), previous),
                None => lib64.display().to_string(),
            };
            env.set(ENV_CUDA_HOME, cuda_home.display().to_string());
            env.set(ENV_LD_LIBRARY_PATH, ld_path);
        }

        if let Some(devices) = &config.visible_devices {
            let list = devices
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(",");
            env.set(ENV_VISIBLE_DEVICES, list);
        }

        env.set(ENV_MASTER_PORT, port.to_string());
        env.set(ENV_RUN_ID, run_id);

        for (key, value) in &config.extra_env {
            env.set(key.as_str(), value.as_str());
        }

        debug!(count = env.len(), "启动环境组装完成");
        env
    }

    /// 写入变量，同名则覆盖原值并保持原位置
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.vars.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// 导出到子进程
    pub fn apply(&self, command: &mut Command) {
        for (key, value) in &self.vars {
            command.env(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn no_base(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_environment() {
        let config = LaunchConfig::default();
        let env = LaunchEnvironment::from_config(&config, 27001, "run-1", no_base);
        assert_eq!(env.get(ENV_TELEMETRY), Some("disabled"));
        assert_eq!(env.get(ENV_MASTER_PORT), Some("27001"));
        assert_eq!(env.get(ENV_RUN_ID), Some("run-1"));
        assert_eq!(env.get(ENV_CUDA_HOME), None);
        assert_eq!(env.get(ENV_VISIBLE_DEVICES), None);
    }

    #[test]
    fn test_cuda_paths_prepend_previous_value() {
        let config = LaunchConfig {
            cuda_home: Some(PathBuf::from("/opt/cuda-11.7")),
            visible_devices: Some(vec![0, 1, 3]),
            nproc_per_node: 3,
            disable_telemetry: false,
            ..Default::default()
        };
        let base = |key: &str| (key == ENV_LD_LIBRARY_PATH).then(|| "/usr/local/lib".to_string());
        let env = LaunchEnvironment::from_config(&config, 25000, "run-2", base);

        assert_eq!(env.get(ENV_TELEMETRY), None);
        assert_eq!(env.get(ENV_CUDA_HOME), Some("/opt/cuda-11.7"));
        assert_eq!(env.get(ENV_LD_LIBRARY_PATH), Some("/opt/cuda-11.7/lib64:/usr/local/lib"));
        assert_eq!(env.get(ENV_VISIBLE_DEVICES), Some("0,1,3"));

        let env = LaunchEnvironment::from_config(&config, 25000, "run-2", no_base);
        assert_eq!(env.get(ENV_LD_LIBRARY_PATH), Some("/opt/cuda-11.7/lib64"));
    }

    #[test]
    fn test_extra_env_overrides_in_place() {
        let mut extra = BTreeMap::new();
        extra.insert("WANDB_MODE".to_string(), "online".to_string());
        extra.insert("NCCL_DEBUG".to_string(), "INFO".to_string());
        let config = LaunchConfig { extra_env: extra, ..Default::default() };

        let env = LaunchEnvironment::from_config(&config, 26000, "run-3", no_base);
        let keys: Vec<&str> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["WANDB_MODE", "MASTER_PORT", "COLLIE_RUN_ID", "NCCL_DEBUG"]);
        assert_eq!(env.get("WANDB_MODE"), Some("online"));
    }
}
