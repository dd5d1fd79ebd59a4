// types.rs
// 定义通用类型，如启动方式、端口范围、环境变量名等常量。
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 分布式启动方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchVariant {
    /// 进程组启动器：每张卡持有完整副本，梯度同步（tensor / inplace SGD 训练器）
    #[serde(alias = "ddp", alias = "tensor")]
    Torchrun,
    /// 优化器状态切分启动器：切分并卸载优化器状态（zero 训练器）
    #[serde(alias = "zero")]
    DeepSpeed,
}

impl LaunchVariant {
    /// 默认的外部可执行程序名
    pub fn program(&self) -> &'static str {
        match self {
            LaunchVariant::Torchrun => "torchrun",
            LaunchVariant::DeepSpeed => "deepspeed",
        }
    }

    /// 便于展示的描述
    pub fn description(&self) -> &'static str {
        match self {
            LaunchVariant::Torchrun => "进程组启动（完整副本 + 梯度同步）",
            LaunchVariant::DeepSpeed => "优化器状态切分启动（ZeRO 卸载）",
        }
    }
}

impl Default for LaunchVariant {
    fn default() -> Self {
        LaunchVariant::Torchrun
    }
}

impl fmt::Display for LaunchVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for LaunchVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "torchrun" | "ddp" | "tensor" => Ok(LaunchVariant::Torchrun),
            "deepspeed" | "zero" => Ok(LaunchVariant::DeepSpeed),
            other => Err(Error::ConfigError(format!(
                "未知的启动方式 '{}'，可选: torchrun, deepspeed",
                other
            ))),
        }
    }
}

// 主端口随机范围（闭区间）
pub const PORT_RANGE_START: u16 = 25000;
pub const PORT_RANGE_END: u16 = 30000;

// 环境变量名，避免硬编码
pub const ENV_TELEMETRY: &str = "WANDB_MODE";
pub const TELEMETRY_DISABLED: &str = "disabled";
pub const ENV_CUDA_HOME: &str = "CUDA_HOME";
pub const ENV_LD_LIBRARY_PATH: &str = "LD_LIBRARY_PATH";
pub const ENV_VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";
pub const ENV_MASTER_PORT: &str = "MASTER_PORT";
pub const ENV_RUN_ID: &str = "COLLIE_RUN_ID";

/// 判断端口是否位于随机范围内
pub fn port_in_range(port: u16) -> bool {
    (PORT_RANGE_START..=PORT_RANGE_END).contains(&port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_parsing() {
        assert_eq!("torchrun".parse::<LaunchVariant>().unwrap(), LaunchVariant::Torchrun);
        assert_eq!("TENSOR".parse::<LaunchVariant>().unwrap(), LaunchVariant::Torchrun);
        assert_eq!("zero".parse::<LaunchVariant>().unwrap(), LaunchVariant::DeepSpeed);
        assert_eq!(" deepspeed ".parse::<LaunchVariant>().unwrap(), LaunchVariant::DeepSpeed);
        assert!("mpirun".parse::<LaunchVariant>().is_err());
    }

    #[test]
    fn test_variant_serde() {
        let v: LaunchVariant = serde_json::from_str("\"zero\"").unwrap();
        assert_eq!(v, LaunchVariant::DeepSpeed);
        assert_eq!(serde_json::to_string(&LaunchVariant::Torchrun).unwrap(), "\"torchrun\"");
    }

    #[test]
    fn test_variant_serde_accepts_parse_aliases() {
        for alias in ["torchrun", "ddp", "tensor", "deepspeed", "zero"] {
            let from_json: LaunchVariant = serde_json::from_str(&format!("\"{}\"", alias)).unwrap();
            assert_eq!(from_json, alias.parse::<LaunchVariant>().unwrap());
        }
    }

    #[test]
    fn test_port_range_bounds() {
        assert!(port_in_range(25000));
        assert!(port_in_range(30000));
        assert!(!port_in_range(24999));
        assert!(!port_in_range(30001));
    }
}
