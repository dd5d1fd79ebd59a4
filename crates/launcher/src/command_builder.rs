// command_builder.rs
// 命令构建器：根据启动方式构建唯一的一条外部启动器命令（torchrun 或 deepspeed）。
use crate::config::LaunchConfig;
use crate::env_setup::LaunchEnvironment;
use crate::types::LaunchVariant;
use serde::{Deserialize, Serialize};
use std::process::{Command, Stdio};

/// 一条完整描述的外部进程调用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    /// 可执行程序
    pub program: String,
    /// 参数列表
    pub args: Vec<String>,
    /// 导出的环境变量
    pub env: LaunchEnvironment,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: LaunchEnvironment::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, env: LaunchEnvironment) -> Self {
        self.env = env;
        self
    }

    /// 渲染为类似 shell 的一行命令，便于日志与 dry-run 展示
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
            .collect();
        parts.push(shell_quote(&self.program));
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }

    /// 转换为标准库的 Command，继承标准输入输出
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        self.env.apply(&mut command);
        command
    }
}

fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// 构建外部启动器命令，每种启动方式只会生成一条命令
pub fn build(config: &LaunchConfig, port: u16, env: LaunchEnvironment) -> LaunchCommand {
    let process_flag = match config.variant {
        LaunchVariant::Torchrun => format!("--nproc_per_node={}", config.nproc_per_node),
        LaunchVariant::DeepSpeed => format!("--num_gpus={}", config.nproc_per_node),
    };

    LaunchCommand::new(config.program())
        .arg(process_flag)
        .arg(format!("--master_port={}", port))
        .arg(config.entry_point.display().to_string())
        .arg(config.config_path.display().to_string())
        .args(config.extra_args.iter().cloned())
        .with_env(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_torchrun_command() {
        let config = LaunchConfig {
            nproc_per_node: 2,
            entry_point: PathBuf::from("finetune.py"),
            config_path: PathBuf::from("configs/llama-7b.yaml"),
            ..Default::default()
        };
        let command = build(&config, 26543, LaunchEnvironment::new());
        assert_eq!(command.program, "torchrun");
        assert_eq!(
            command.args,
            vec!["--nproc_per_node=2", "--master_port=26543", "finetune.py", "configs/llama-7b.yaml"]
        );
    }

    #[test]
    fn test_deepspeed_command_with_extra_args() {
        let config = LaunchConfig {
            variant: LaunchVariant::DeepSpeed,
            nproc_per_node: 8,
            extra_args: vec!["--seed".to_string(), "42".to_string()],
            ..Default::default()
        };
        let command = build(&config, 25000, LaunchEnvironment::new());
        assert_eq!(command.program, "deepspeed");
        assert_eq!(
            command.args,
            vec!["--num_gpus=8", "--master_port=25000", "train.py", "config.yaml", "--seed", "42"]
        );
        assert!(!command.args.iter().any(|a| a.starts_with("--nproc_per_node")));
    }

    #[test]
    fn test_program_override() {
        let config = LaunchConfig {
            launcher_program: Some("/opt/venv/bin/torchrun".to_string()),
            ..Default::default()
        };
        let command = build(&config, 25001, LaunchEnvironment::new());
        assert_eq!(command.program, "/opt/venv/bin/torchrun");
    }

    #[test]
    fn test_display_quotes_unsafe_values() {
        let mut env = LaunchEnvironment::new();
        env.set("WANDB_MODE", "disabled");
        let command = LaunchCommand::new("torchrun")
            .arg("--master_port=25000")
            .arg("my config.yaml")
            .with_env(env);
        assert_eq!(
            command.display(),
            "WANDB_MODE=disabled torchrun --master_port=25000 'my config.yaml'"
        );
    }
}
