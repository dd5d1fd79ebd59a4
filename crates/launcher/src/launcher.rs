// launcher.rs
// 训练任务启动器：生成启动计划（端口、环境、命令），启动外部进程并转发其退出码。
use crate::command_builder::{self, LaunchCommand};
use crate::config::LaunchConfig;
use crate::env_setup::LaunchEnvironment;
use crate::error::{Error, Result};
use crate::port::PortPicker;
use prettytable::{row, Table};
use serde::{Deserialize, Serialize};
use std::process::ExitStatus;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 启动计划：一次启动需要的全部信息，尚未执行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchPlan {
    /// 本次启动的唯一ID
    pub run_id: String,
    /// 主端口
    pub port: u16,
    /// 数据并行大小
    pub data_parallel_size: u32,
    /// 外部启动器命令
    pub command: LaunchCommand,
}

impl LaunchPlan {
    /// 以表格形式展示启动计划
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.add_row(row!["项目", "值"]);
        table.add_row(row!["run_id", self.run_id]);
        table.add_row(row!["master_port", self.port]);
        table.add_row(row!["data_parallel_size", self.data_parallel_size]);
        table.add_row(row!["program", self.command.program]);
        table.add_row(row!["args", self.command.args.join(" ")]);
        for (key, value) in self.command.env.iter() {
            table.add_row(row![format!("env {}", key), value]);
        }
        table
    }
}

/// 启动结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOutcome {
    pub run_id: String,
    pub port: u16,
    /// 外部进程的退出码
    pub exit_code: i32,
}

impl LaunchOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 训练任务启动器
pub struct JobLauncher {
    /// 启动配置
    pub config: LaunchConfig,
    /// 端口选择器
    pub port_picker: PortPicker,
}

impl JobLauncher {
    /// 校验配置并创建启动器
    pub fn new(config: LaunchConfig) -> Result<Self> {
        config.validate()?;
        let port_picker = PortPicker::from_config(&config);
        Ok(Self { config, port_picker })
    }

    /// 生成启动计划，不启动任何进程
    pub fn plan(&self) -> LaunchPlan {
        self.plan_with_base(|key| std::env::var(key).ok())
    }

    /// 使用给定的环境查询函数生成启动计划
    pub fn plan_with_base<F>(&self, base: F) -> LaunchPlan
    where
        F: Fn(&str) -> Option<String>,
    {
        let run_id = Uuid::new_v4().to_string();
        let port = self.port_picker.pick();
        let env = LaunchEnvironment::from_config(&self.config, port, &run_id, base);
        let command = command_builder::build(&self.config, port, env);

        info!(
            %run_id,
            port,
            variant = %self.config.variant,
            nproc_per_node = self.config.nproc_per_node,
            "生成启动计划: {}",
            self.config.variant.description()
        );

        LaunchPlan {
            run_id,
            port,
            data_parallel_size: self.config.data_parallel_size(),
            command,
        }
    }

    /// 生成计划并启动外部进程
    pub fn run(&self) -> Result<LaunchOutcome> {
        let plan = self.plan();
        execute(&plan)
    }
}

/// 执行启动计划，等待外部进程退出
pub fn execute(plan: &LaunchPlan) -> Result<LaunchOutcome> {
    info!(run_id = %plan.run_id, "执行: {}", plan.command.display());

    let status = plan
        .command
        .to_command()
        .status()
        .map_err(|e| Error::LaunchError(format!("无法启动 {}: {}", plan.command.program, e)))?;

    let exit_code = exit_code(status);
    if exit_code == 0 {
        info!(run_id = %plan.run_id, "训练进程正常退出");
    } else {
        error!(run_id = %plan.run_id, exit_code, "训练进程异常退出");
    }

    Ok(LaunchOutcome {
        run_id: plan.run_id.clone(),
        port: plan.port,
        exit_code,
    })
}

/// 将退出状态转换为退出码，被信号终止时为 128 + 信号值
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            warn!(signal, "训练进程被信号终止");
            return 128 + signal;
        }
    }
    1
}
