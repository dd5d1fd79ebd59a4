use launcher::docs::{DocsSettings, DocsTarget};
use launcher::EnvironmentVariables;

/// 展示每个文档目标会执行哪些命令
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = EnvironmentVariables::load()?;
    let settings = DocsSettings::from_env(&env);

    for name in ["help", "clean", "build", "server", "server-versions", "latexpdf"] {
        let target = DocsTarget::parse(name);
        println!("\n目标 {}:", target);
        for command in settings.commands(&target) {
            println!("  {}", command.display());
        }
    }
    Ok(())
}
