// config.rs
// 启动配置结构体及其默认实现，包含启动方式、进程数、训练入口、配置文件路径、CUDA环境等；
// 以及从进程环境（和 .env 文件）读取的全局默认值。
use crate::error::{Error, Result};
use crate::types::{port_in_range, LaunchVariant, ENV_MASTER_PORT, PORT_RANGE_END, PORT_RANGE_START};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 训练任务的启动配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// 启动方式
    pub variant: LaunchVariant,
    /// 每个节点的进程数（通常等于卡数）
    pub nproc_per_node: u32,
    /// 训练入口脚本
    pub entry_point: PathBuf,
    /// 训练配置文件（YAML，由外部进程解析）
    pub config_path: PathBuf,
    /// 可见设备列表，None 表示不设置 CUDA_VISIBLE_DEVICES
    pub visible_devices: Option<Vec<u32>>,
    /// CUDA 安装目录
    pub cuda_home: Option<PathBuf>,
    /// 是否关闭遥测上报
    pub disable_telemetry: bool,
    /// 固定主端口；None 时随机选择
    pub port: Option<u16>,
    /// 随机选择端口时是否先探测可用性
    pub check_port: bool,
    /// 端口探测的最大次数
    pub port_attempts: u32,
    /// 张量并行大小
    pub tp_size: u32,
    /// 流水线并行大小
    pub pp_size: u32,
    /// 额外导出的环境变量
    pub extra_env: BTreeMap<String, String>,
    /// 追加在配置文件路径之后的参数
    pub extra_args: Vec<String>,
    /// 替换默认的外部启动程序
    pub launcher_program: Option<String>,
    /// 配置文件不存在时是否提前报错（默认交给外部进程处理）
    pub require_config_file: bool,
}

impl Default for LaunchConfig {
    /// 默认配置：torchrun 单进程，关闭遥测，train.py + config.yaml
    fn default() -> Self {
        Self {
            variant: LaunchVariant::Torchrun,
            nproc_per_node: 1,
            entry_point: PathBuf::from("train.py"),
            config_path: PathBuf::from("config.yaml"),
            visible_devices: None,
            cuda_home: None,
            disable_telemetry: true,
            port: None,
            check_port: true,
            port_attempts: 16,
            tp_size: 1,
            pp_size: 1,
            extra_env: BTreeMap::new(),
            extra_args: Vec::new(),
            launcher_program: None,
            require_config_file: false,
        }
    }
}

impl LaunchConfig {
    /// 从 JSON 文件读取启动配置，缺省字段使用默认值
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::ConfigError(format!("未找到启动配置文件 {}", path.display())));
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("读取 {} 失败: {}", path.display(), e)))?;
        let config: LaunchConfig = serde_json::from_str(&contents)
            .map_err(|e| Error::ConfigError(format!("解析 {} 失败: {}", path.display(), e)))?;
        debug!(path = %path.display(), ?config, "已加载启动配置");
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.nproc_per_node == 0 {
            return Err(Error::ConfigError("nproc_per_node 必须大于0".to_string()));
        }
        if let Some(devices) = &self.visible_devices {
            if devices.len() < self.nproc_per_node as usize {
                return Err(Error::ConfigError(format!(
                    "可见设备数 {} 小于进程数 {}",
                    devices.len(),
                    self.nproc_per_node
                )));
            }
        }
        if self.tp_size == 0 || self.pp_size == 0 {
            return Err(Error::ConfigError("tp_size 和 pp_size 必须大于0".to_string()));
        }
        let model_parallel = self.tp_size.checked_mul(self.pp_size).ok_or_else(|| {
            Error::ConfigError(format!(
                "tp_size * pp_size 溢出: {} * {}",
                self.tp_size, self.pp_size
            ))
        })?;
        if self.nproc_per_node % model_parallel != 0 {
            return Err(Error::ConfigError(format!(
                "进程数 {} 不能被 tp_size * pp_size = {} 整除",
                self.nproc_per_node, model_parallel
            )));
        }
        if let Some(port) = self.port {
            if !port_in_range(port) {
                return Err(Error::ConfigError(format!(
                    "端口 {} 超出范围 [{}, {}]",
                    port, PORT_RANGE_START, PORT_RANGE_END
                )));
            }
        }
        // 主端口只能来自 port 字段或随机选择，否则环境变量会与 --master_port 不一致
        if self.extra_env.contains_key(ENV_MASTER_PORT) {
            return Err(Error::ConfigError(format!(
                "extra_env 不能包含 {}，请使用 port 字段固定主端口",
                ENV_MASTER_PORT
            )));
        }
        if self.port_attempts == 0 {
            return Err(Error::ConfigError("port_attempts 必须大于0".to_string()));
        }
        if self.require_config_file && !self.config_path.exists() {
            return Err(Error::ConfigError(format!(
                "训练配置文件 {} 不存在",
                self.config_path.display()
            )));
        }
        Ok(())
    }

    /// 数据并行大小
    pub fn data_parallel_size(&self) -> u32 {
        match self.tp_size.checked_mul(self.pp_size) {
            Some(model_parallel) if model_parallel > 0 => self.nproc_per_node / model_parallel,
            _ => 0,
        }
    }

    /// 实际使用的外部启动程序
    pub fn program(&self) -> &str {
        self.launcher_program
            .as_deref()
            .unwrap_or_else(|| self.variant.program())
    }
}

// 全局默认值
const DEFAULT_DOCS_PORT: u16 = 8000;
const DEFAULT_DOCS_SOURCE: &str = "source";
const DEFAULT_DOCS_BUILD: &str = "build";
const DEFAULT_SPHINXBUILD: &str = "sphinx-build";

/// 从进程环境读取的全局默认值
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentVariables {
    /// 默认的启动配置文件（COLLIE_LAUNCH_CONFIG）
    pub launch_config: Option<PathBuf>,
    /// 文档服务端口（COLLIE_DOCS_PORT）
    pub docs_port: u16,
    /// 文档源目录（COLLIE_DOCS_SOURCE）
    pub docs_source: PathBuf,
    /// 文档构建目录（COLLIE_DOCS_BUILD）
    pub docs_build: PathBuf,
    /// 文档生成程序（SPHINXBUILD）
    pub sphinx_build: String,
    /// 文档生成参数（SPHINXOPTS）
    pub sphinx_opts: Vec<String>,
}

impl EnvironmentVariables {
    /// 读取 .env 与进程环境
    pub fn load() -> Result<Self> {
        Self::from_vars(&Self::process_vars())
    }

    /// 读取 .env 后返回进程环境变量表，不做任何解析
    pub fn process_vars() -> HashMap<String, String> {
        if dotenv::dotenv().is_ok() {
            debug!("已加载 .env 文件");
        }
        std::env::vars().collect()
    }

    /// 只取默认启动配置路径，启动子命令不依赖文档相关变量
    pub fn launch_config_from_vars(vars: &HashMap<String, String>) -> Option<PathBuf> {
        vars.get("COLLIE_LAUNCH_CONFIG").filter(|s| !s.is_empty()).map(PathBuf::from)
    }

    /// 从给定的变量表构建
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get_var = |key: &str| vars.get(key).map(String::as_str).filter(|s| !s.is_empty());

        let docs_port = match get_var("COLLIE_DOCS_PORT") {
            Some(s) => s.parse().map_err(|_| {
                Error::ConfigError(format!("COLLIE_DOCS_PORT 不是合法端口: {}", s))
            })?,
            None => DEFAULT_DOCS_PORT,
        };

        Ok(Self {
            launch_config: Self::launch_config_from_vars(vars),
            docs_port,
            docs_source: PathBuf::from(get_var("COLLIE_DOCS_SOURCE").unwrap_or(DEFAULT_DOCS_SOURCE)),
            docs_build: PathBuf::from(get_var("COLLIE_DOCS_BUILD").unwrap_or(DEFAULT_DOCS_BUILD)),
            sphinx_build: get_var("SPHINXBUILD")
                .unwrap_or_else(|| {
                    debug!("未设置 SPHINXBUILD，使用默认值 '{}'", DEFAULT_SPHINXBUILD);
                    DEFAULT_SPHINXBUILD
                })
                .to_string(),
            sphinx_opts: get_var("SPHINXOPTS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }
}
