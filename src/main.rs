//! InfraFlow Deploy Agent - VM 拓扑部署代理
//!
//! Usage:
//! - Normal mode: `infraflow-agent`
//! - With custom port: `infraflow-agent --port 19999`
//! - With custom working directory: `infraflow-agent --work-dir /srv/infra`

use infraflow_agent::RuntimeConfig;
use std::path::PathBuf;

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
            }
            "--work-dir" if i + 1 < args.len() => {
                config.work_dir_override = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--version" | "-V" => {
                println!("infraflow-agent {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("InfraFlow Deploy Agent - VM 拓扑部署代理");
    println!();
    println!("USAGE:");
    println!("    infraflow-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>        Override the listening port");
    println!("    --work-dir <DIR>     Override the deployment working directory");
    println!("    -V, --version        Print version information");
    println!("    -h, --help           Print help information");
    println!();
    println!("EXAMPLES:");
    println!("    infraflow-agent                        # Normal mode");
    println!("    infraflow-agent --port 19999           # Custom port");
    println!("    infraflow-agent --work-dir /srv/infra  # Custom working directory");
}

#[tokio::main]
async fn main() {
    let config = parse_args();

    if let Err(e) = infraflow_agent::init_and_run_agent_with_config(config).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
