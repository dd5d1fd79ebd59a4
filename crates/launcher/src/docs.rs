// docs.rs
// 文档构建入口：把 help/clean/build/server/server-versions 等目标映射为外部文档生成器
// 和静态文件服务的命令；未知目标一律转交给文档生成器处理。
use crate::command_builder::LaunchCommand;
use crate::config::EnvironmentVariables;
use crate::error::{Error, Result};
use crate::launcher::exit_code;
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info};

/// 文档构建目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocsTarget {
    Help,
    Clean,
    Build,
    /// 构建后启动静态文件服务
    Server,
    /// 多版本构建后启动静态文件服务
    ServerVersions,
    /// 其他目标，原样交给文档生成器
    Other(String),
}

impl DocsTarget {
    /// 解析目标名，不会失败
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "" | "help" => DocsTarget::Help,
            "clean" => DocsTarget::Clean,
            "build" => DocsTarget::Build,
            "server" => DocsTarget::Server,
            "server-versions" => DocsTarget::ServerVersions,
            other => DocsTarget::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DocsTarget::Help => "help",
            DocsTarget::Clean => "clean",
            DocsTarget::Build => "build",
            DocsTarget::Server => "server",
            DocsTarget::ServerVersions => "server-versions",
            DocsTarget::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for DocsTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 文档构建设置
#[derive(Debug, Clone, PartialEq)]
pub struct DocsSettings {
    pub sphinx_build: String,
    pub sphinx_opts: Vec<String>,
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub server_port: u16,
    pub multiversion: String,
    pub python: String,
}

impl Default for DocsSettings {
    fn default() -> Self {
        Self {
            sphinx_build: "sphinx-build".to_string(),
            sphinx_opts: Vec::new(),
            source_dir: PathBuf::from("source"),
            build_dir: PathBuf::from("build"),
            server_port: 8000,
            multiversion: "sphinx-multiversion".to_string(),
            python: "python3".to_string(),
        }
    }
}

impl DocsSettings {
    pub fn from_env(env: &EnvironmentVariables) -> Self {
        Self {
            sphinx_build: env.sphinx_build.clone(),
            sphinx_opts: env.sphinx_opts.clone(),
            source_dir: env.docs_source.clone(),
            build_dir: env.docs_build.clone(),
            server_port: env.docs_port,
            ..Default::default()
        }
    }

    fn html_dir(&self) -> PathBuf {
        self.build_dir.join("html")
    }

    /// `sphinx-build -M <builder> <source> <build> [opts]`
    fn sphinx(&self, builder: &str) -> LaunchCommand {
        LaunchCommand::new(self.sphinx_build.as_str())
            .arg("-M")
            .arg(builder)
            .arg(self.source_dir.display().to_string())
            .arg(self.build_dir.display().to_string())
            .args(self.sphinx_opts.iter().cloned())
    }

    fn server(&self) -> LaunchCommand {
        LaunchCommand::new(self.python.as_str())
            .args(["-m", "http.server"])
            .arg(self.server_port.to_string())
            .arg("--directory")
            .arg(self.html_dir().display().to_string())
    }

    /// 目标对应的命令序列
    pub fn commands(&self, target: &DocsTarget) -> Vec<LaunchCommand> {
        match target {
            DocsTarget::Help => vec![self.sphinx("help")],
            DocsTarget::Clean => vec![self.sphinx("clean")],
            DocsTarget::Build => vec![self.sphinx("html")],
            DocsTarget::Server => vec![self.sphinx("html"), self.server()],
            DocsTarget::ServerVersions => {
                let multiversion = LaunchCommand::new(self.multiversion.as_str())
                    .arg(self.source_dir.display().to_string())
                    .arg(self.html_dir().display().to_string())
                    .args(self.sphinx_opts.iter().cloned());
                vec![multiversion, self.server()]
            }
            DocsTarget::Other(name) => vec![self.sphinx(name)],
        }
    }

    /// 依次执行目标对应的命令，遇到非零退出码即停止并返回该退出码
    pub fn run(&self, target: &DocsTarget) -> Result<i32> {
        for command in self.commands(target) {
            info!(docs_target = %target, "执行: {}", command.display());
            let status = command
                .to_command()
                .status()
                .map_err(|e| Error::LaunchError(format!("无法启动 {}: {}", command.program, e)))?;
            let code = exit_code(status);
            if code != 0 {
                error!(docs_target = %target, exit_code = code, "文档命令失败");
                return Ok(code);
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_and_unknown_targets() {
        assert_eq!(DocsTarget::parse("help"), DocsTarget::Help);
        assert_eq!(DocsTarget::parse(""), DocsTarget::Help);
        assert_eq!(DocsTarget::parse("server-versions"), DocsTarget::ServerVersions);
        assert_eq!(DocsTarget::parse("latexpdf"), DocsTarget::Other("latexpdf".to_string()));
        assert_eq!(DocsTarget::parse("latexpdf").name(), "latexpdf");
    }

    #[test]
    fn test_unknown_target_routes_to_generator() {
        let settings = DocsSettings::default();
        let commands = settings.commands(&DocsTarget::parse("linkcheck"));
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].program, "sphinx-build");
        assert_eq!(commands[0].args, vec!["-M", "linkcheck", "source", "build"]);
    }

    #[test]
    fn test_server_builds_then_serves() {
        let settings = DocsSettings {
            server_port: 8123,
            sphinx_opts: vec!["-W".to_string()],
            ..Default::default()
        };
        let commands = settings.commands(&DocsTarget::Server);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].args, vec!["-M", "html", "source", "build", "-W"]);
        assert_eq!(commands[1].program, "python3");
        assert_eq!(
            commands[1].args,
            vec!["-m", "http.server", "8123", "--directory", "build/html"]
        );
    }

    #[test]
    fn test_server_versions_uses_multiversion() {
        let commands = DocsSettings::default().commands(&DocsTarget::ServerVersions);
        assert_eq!(commands[0].program, "sphinx-multiversion");
        assert_eq!(commands[0].args, vec!["source", "build/html"]);
        assert_eq!(commands[1].args[0], "-m");
    }

    #[test]
    fn test_missing_generator_is_launch_error() {
        let settings = DocsSettings {
            sphinx_build: "collie-no-such-sphinx".to_string(),
            ..Default::default()
        };
        assert!(matches!(settings.run(&DocsTarget::Clean), Err(Error::LaunchError(_))));
    }
}
