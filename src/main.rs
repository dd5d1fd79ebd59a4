//! collie-launch
//!
//! 分布式训练启动工具：随机选择主端口、准备 CUDA 与遥测环境变量，
//! 再把训练入口和 YAML 配置交给 torchrun 或 deepspeed；同时提供文档构建入口
//! 和对话数据准备子命令。

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use launcher::data_preparator::{ByteTokenizer, DataPreparator};
use launcher::docs::{DocsSettings, DocsTarget};
use launcher::port::PortPicker;
use launcher::template::{SpecialTokens, TemplateKind};
use launcher::{EnvironmentVariables, JobLauncher, LaunchConfig, LaunchVariant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "collie-launch", version, about = "Distributed training launcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 启动训练，退出码与训练进程一致
    Run(LaunchArgs),
    /// 只打印启动计划
    Plan {
        #[command(flatten)]
        launch: LaunchArgs,
        #[arg(long, help = "Print the plan as JSON instead of a table")]
        json: bool,
    },
    /// 打印一个随机主端口
    Port {
        #[arg(long, help = "Skip the bind check and draw exactly once")]
        no_check: bool,
    },
    /// 文档构建目标（help, clean, build, server, server-versions 或任意 sphinx 目标）
    Docs {
        #[arg(default_value = "help")]
        target: String,
    },
    /// 把 JSONL 对话转换为分词后的训练样本
    Prepare {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = "chatml", help = "chatml, moss or a tokenizer class name")]
        template: String,
        #[arg(long, default_value = "history")]
        text_field: String,
        #[arg(long, default_value = "<s>")]
        bos_token: String,
        #[arg(long)]
        add_generation_prompt: bool,
    },
}

#[derive(Debug, Args)]
struct LaunchArgs {
    #[arg(long, help = "JSON launch config; defaults to $COLLIE_LAUNCH_CONFIG")]
    config_file: Option<PathBuf>,

    #[arg(long, value_parser = parse_variant, help = "torchrun (tensor/ddp) or deepspeed (zero)")]
    variant: Option<LaunchVariant>,

    #[arg(long, help = "Processes per node")]
    nproc_per_node: Option<u32>,

    #[arg(long, help = "Training entry point")]
    entry_point: Option<PathBuf>,

    #[arg(long, help = "YAML training config passed to the entry point")]
    config_path: Option<PathBuf>,

    #[arg(long, value_delimiter = ',', help = "Comma separated device ids")]
    devices: Option<Vec<u32>>,

    #[arg(long, help = "CUDA toolkit install path")]
    cuda_home: Option<PathBuf>,

    #[arg(long, help = "Keep telemetry enabled")]
    enable_telemetry: bool,

    #[arg(long, help = "Fixed master port in [25000, 30000]")]
    port: Option<u16>,

    #[arg(long, help = "Do not check that the random port is free before use")]
    no_port_check: bool,

    #[arg(long, help = "Override the launcher executable")]
    launcher_program: Option<String>,

    #[arg(long, help = "Fail before launching when the YAML config is missing")]
    require_config_file: bool,

    #[arg(long, help = "Only print the plan")]
    dry_run: bool,

    #[arg(last = true, help = "Extra arguments forwarded after the config path")]
    extra_args: Vec<String>,
}

fn parse_variant(s: &str) -> std::result::Result<LaunchVariant, String> {
    s.parse().map_err(|e: launcher::Error| e.to_string())
}

impl LaunchArgs {
    /// 命令行参数 > JSON 配置文件 > 默认值
    fn resolve(&self, default_config: Option<&PathBuf>) -> Result<LaunchConfig> {
        let mut config = match self.config_file.as_ref().or(default_config) {
            Some(path) => LaunchConfig::from_file(path)
                .with_context(|| format!("failed to load launch config {}", path.display()))?,
            None => LaunchConfig::default(),
        };

        if let Some(variant) = self.variant {
            config.variant = variant;
        }
        if let Some(n) = self.nproc_per_node {
            config.nproc_per_node = n;
        }
        if let Some(entry) = &self.entry_point {
            config.entry_point = entry.clone();
        }
        if let Some(path) = &self.config_path {
            config.config_path = path.clone();
        }
        if let Some(devices) = &self.devices {
            config.visible_devices = Some(devices.clone());
        }
        if let Some(cuda_home) = &self.cuda_home {
            config.cuda_home = Some(cuda_home.clone());
        }
        if self.enable_telemetry {
            config.disable_telemetry = false;
        }
        if self.port.is_some() {
            config.port = self.port;
        }
        if self.no_port_check {
            config.check_port = false;
        }
        if let Some(program) = &self.launcher_program {
            config.launcher_program = Some(program.clone());
        }
        if self.require_config_file {
            config.require_config_file = true;
        }
        if !self.extra_args.is_empty() {
            config.extra_args = self.extra_args.clone();
        }
        Ok(config)
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("collie_launch=info,launcher=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run(cli: Cli) -> Result<ExitCode> {
    let vars = EnvironmentVariables::process_vars();
    let default_config = EnvironmentVariables::launch_config_from_vars(&vars);

    match cli.command {
        Commands::Run(args) => {
            let launcher = JobLauncher::new(args.resolve(default_config.as_ref())?)?;
            if args.dry_run {
                launcher.plan().to_table().printstd();
                return Ok(ExitCode::SUCCESS);
            }
            let outcome = launcher.run()?;
            info!(run_id = %outcome.run_id, exit_code = outcome.exit_code, "launch finished");
            Ok(exit_code(outcome.exit_code))
        }
        Commands::Plan { launch, json } => {
            let plan = JobLauncher::new(launch.resolve(default_config.as_ref())?)?.plan();
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                plan.to_table().printstd();
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Port { no_check } => {
            let picker = PortPicker { check_available: !no_check, ..Default::default() };
            println!("{}", picker.pick());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Docs { target } => {
            let env = EnvironmentVariables::from_vars(&vars)
                .context("failed to read docs environment")?;
            let settings = DocsSettings::from_env(&env);
            let code = settings.run(&DocsTarget::parse(&target))?;
            Ok(exit_code(code))
        }
        Commands::Prepare {
            input,
            output,
            template,
            text_field,
            bos_token,
            add_generation_prompt,
        } => {
            let template: TemplateKind = template.parse()?;
            let tokenizer = ByteTokenizer { special_tokens: SpecialTokens { bos_token } };
            let preparator = DataPreparator::new(tokenizer, template)
                .with_text_field(text_field)
                .with_generation_prompt(add_generation_prompt);

            let reader = BufReader::new(
                File::open(&input).with_context(|| format!("cannot open {}", input.display()))?,
            );
            let writer = BufWriter::new(
                File::create(&output).with_context(|| format!("cannot create {}", output.display()))?,
            );
            let count = preparator.prepare_jsonl(reader, writer)?;
            info!(count, output = %output.display(), "samples written");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("错误: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
