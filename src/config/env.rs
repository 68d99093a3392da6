//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::domain::DeployStrategy;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// API 密钥（未设置时不校验）
    pub api_key: Option<String>,
    /// 服务监听端口
    pub port: u16,
    /// 部署工作目录（Terraform 描述 + 每台 VM 的子目录）
    pub work_dir: PathBuf,
    /// 远程配置策略
    pub strategy: DeployStrategy,
    /// 同时配置的 VM 数量（1 = 严格顺序）
    pub vm_concurrency: usize,
    /// 单次部署最长时间（秒），None 表示不限制
    pub deploy_timeout_secs: Option<u64>,
    /// 外部工具
    pub tools: ToolConfig,
    /// SSH 客户端
    pub ssh: SshClientConfig,
    /// 主机可达性探测
    pub probe: ProbeConfig,
}

/// 外部工具配置
#[derive(Clone, Debug)]
pub struct ToolConfig {
    pub terraform_bin: String,
    pub ansible_playbook_bin: String,
    pub multipass_bin: String,
    /// 单个外部进程的最长运行时间（秒）
    pub timeout_secs: u64,
    /// 库存查询超时（秒）
    pub discovery_timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            terraform_bin: "terraform".to_string(),
            ansible_playbook_bin: "ansible-playbook".to_string(),
            multipass_bin: "multipass".to_string(),
            timeout_secs: 1800,
            discovery_timeout_secs: 30,
        }
    }
}

impl ToolConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            terraform_bin: env::var("TERRAFORM_BIN").unwrap_or(defaults.terraform_bin),
            ansible_playbook_bin: env::var("ANSIBLE_PLAYBOOK_BIN")
                .unwrap_or(defaults.ansible_playbook_bin),
            multipass_bin: env::var("MULTIPASS_BIN").unwrap_or(defaults.multipass_bin),
            timeout_secs: parse_env("TOOL_TIMEOUT_SECS", defaults.timeout_secs),
            discovery_timeout_secs: parse_env(
                "DISCOVERY_TIMEOUT_SECS",
                defaults.discovery_timeout_secs,
            ),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// SSH 客户端配置
#[derive(Clone, Debug)]
pub struct SshClientConfig {
    /// 私钥路径（直接会话策略必填；ansible 策略可选）
    pub key_path: Option<PathBuf>,
    /// 公钥路径，写入 cloud-init 的 authorized_keys
    pub public_key_path: Option<PathBuf>,
    pub port: u16,
    pub connect_timeout_secs: u64,
    /// 远程部署目录
    pub remote_dir: String,
}

impl Default for SshClientConfig {
    fn default() -> Self {
        Self {
            key_path: None,
            public_key_path: None,
            port: 22,
            connect_timeout_secs: 30,
            remote_dir: "/opt/infraflow".to_string(),
        }
    }
}

impl SshClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let key_path = path_env("SSH_KEY_PATH");
        // 未指定公钥时，尝试私钥旁边的 .pub
        let public_key_path = path_env("SSH_PUBLIC_KEY_PATH").or_else(|| {
            key_path
                .as_ref()
                .map(|k| PathBuf::from(format!("{}.pub", k.display())))
                .filter(|p| p.exists())
        });

        Self {
            key_path,
            public_key_path,
            port: parse_env("SSH_PORT", defaults.port),
            connect_timeout_secs: parse_env(
                "SSH_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            ),
            remote_dir: env::var("REMOTE_DEPLOY_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.remote_dir),
        }
    }
}

/// 探测模式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeMode {
    /// 主动探测 SSH 端口（指数退避 + 硬超时）
    Tcp,
    /// 固定等待
    Delay,
}

impl ProbeMode {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "delay" | "fixed" | "sleep" => ProbeMode::Delay,
            _ => ProbeMode::Tcp,
        }
    }
}

/// 可达性探测配置
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub mode: ProbeMode,
    pub timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 端口可连后额外等待（cloud-init 收尾）
    pub settle_secs: u64,
    pub fixed_delay_secs: u64,
    /// 探测超时后是否仍然尝试配置该 VM
    pub proceed_on_timeout: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            mode: ProbeMode::Tcp,
            timeout_secs: 180,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
            settle_secs: 0,
            fixed_delay_secs: 10,
            proceed_on_timeout: false,
        }
    }
}

impl ProbeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            mode: env::var("PROBE_MODE")
                .map(|v| ProbeMode::from_str(&v))
                .unwrap_or(defaults.mode),
            timeout_secs: parse_env("PROBE_TIMEOUT_SECS", defaults.timeout_secs),
            initial_backoff_ms: parse_env("PROBE_INITIAL_BACKOFF_MS", defaults.initial_backoff_ms),
            max_backoff_ms: parse_env("PROBE_MAX_BACKOFF_MS", defaults.max_backoff_ms),
            settle_secs: parse_env("PROBE_SETTLE_SECS", defaults.settle_secs),
            fixed_delay_secs: parse_env("PROBE_FIXED_DELAY_SECS", defaults.fixed_delay_secs),
            proceed_on_timeout: bool_env("PROBE_PROCEED_ON_TIMEOUT", defaults.proceed_on_timeout),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            port: 3001,
            work_dir: PathBuf::from("./infra"),
            strategy: DeployStrategy::Ansible,
            vm_concurrency: 1,
            deploy_timeout_secs: None,
            tools: ToolConfig::default(),
            ssh: SshClientConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // API Key - 支持旧名称兼容
        let api_key = load_with_fallback("INFRAFLOW_API_KEY", "API_KEY").filter(|k| !k.is_empty());
        if env::var("API_KEY").is_ok() && env::var("INFRAFLOW_API_KEY").is_err() {
            warn!("Deprecated environment variable API_KEY detected. Please use INFRAFLOW_API_KEY");
        }

        let strategy = env::var("DEPLOY_STRATEGY")
            .map(|v| DeployStrategy::from_str(&v))
            .unwrap_or(defaults.strategy);

        let vm_concurrency = parse_env("VM_CONCURRENCY", defaults.vm_concurrency).max(1);

        Self {
            api_key,
            port: parse_env("PORT", defaults.port),
            work_dir: path_env("INFRAFLOW_WORK_DIR").unwrap_or(defaults.work_dir),
            strategy,
            vm_concurrency,
            // 未设置或为 0 时不限制
            deploy_timeout_secs: Some(parse_env("DEPLOY_TIMEOUT_SECS", 0u64)).filter(|s| *s > 0),
            tools: ToolConfig::from_env(),
            ssh: SshClientConfig::from_env(),
            probe: ProbeConfig::from_env(),
        }
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn bool_env(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn path_env(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

/// 常量
pub mod constants {
    /// 任务历史最大保存数量
    pub const MAX_TASK_HISTORY: usize = 100;

    /// 最大活跃任务数
    pub const MAX_ACTIVE_TASKS: usize = 50;

    /// 历史任务保留时间（小时）
    pub const TASK_RETENTION_HOURS: i64 = 24;

    /// 清理任务间隔（秒）
    pub const CLEANUP_INTERVAL_SECS: u64 = 300;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_fallback() {
        env::set_var("INFRAFLOW_TEST_PRIMARY", "primary_value");
        env::set_var("INFRAFLOW_TEST_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("INFRAFLOW_TEST_PRIMARY", "INFRAFLOW_TEST_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("INFRAFLOW_TEST_PRIMARY");
        assert_eq!(
            load_with_fallback("INFRAFLOW_TEST_PRIMARY", "INFRAFLOW_TEST_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("INFRAFLOW_TEST_FALLBACK");
        assert_eq!(
            load_with_fallback("INFRAFLOW_TEST_PRIMARY", "INFRAFLOW_TEST_FALLBACK"),
            None
        );
    }

    #[test]
    fn test_parse_helpers() {
        env::set_var("INFRAFLOW_TEST_NUM", " 42 ");
        env::set_var("INFRAFLOW_TEST_BAD", "forty-two");
        env::set_var("INFRAFLOW_TEST_BOOL", "TRUE");

        assert_eq!(parse_env("INFRAFLOW_TEST_NUM", 1u64), 42);
        assert_eq!(parse_env("INFRAFLOW_TEST_BAD", 7u16), 7);
        assert_eq!(parse_env("INFRAFLOW_TEST_UNSET", 3usize), 3);
        assert!(bool_env("INFRAFLOW_TEST_BOOL", false));
        assert!(!bool_env("INFRAFLOW_TEST_UNSET", false));

        env::remove_var("INFRAFLOW_TEST_NUM");
        env::remove_var("INFRAFLOW_TEST_BAD");
        env::remove_var("INFRAFLOW_TEST_BOOL");
    }

    #[test]
    fn test_probe_mode_from_str() {
        assert_eq!(ProbeMode::from_str("delay"), ProbeMode::Delay);
        assert_eq!(ProbeMode::from_str("TCP"), ProbeMode::Tcp);
        assert_eq!(ProbeMode::from_str(""), ProbeMode::Tcp);
    }
}
