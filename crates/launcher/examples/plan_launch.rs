use launcher::{JobLauncher, LaunchConfig, LaunchVariant};
use std::path::PathBuf;

/// 打印两种启动方式的启动计划，不会真正启动训练
fn main() -> Result<(), Box<dyn std::error::Error>> {
    for variant in [LaunchVariant::Torchrun, LaunchVariant::DeepSpeed] {
        let config = LaunchConfig {
            variant,
            nproc_per_node: 2,
            entry_point: PathBuf::from("finetune_llama.py"),
            config_path: PathBuf::from("configs/llama-7b.yaml"),
            visible_devices: Some(vec![0, 1]),
            cuda_home: Some(PathBuf::from("/usr/local/cuda-11.7")),
            ..Default::default()
        };

        let launcher = JobLauncher::new(config)?;
        let plan = launcher.plan();

        println!("\n--- {} ---", variant.description());
        plan.to_table().printstd();
        println!("命令: {}", plan.command.display());
    }
    Ok(())
}
