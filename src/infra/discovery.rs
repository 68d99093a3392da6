//! 基础设施发现
//!
//! 通过 Multipass 库存把派生资源名解析为 IPv4 地址

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::command::CommandRunner;

/// 地址解析能力
///
/// 找不到、库存查询失败都返回 None，由调用方当作可跳过的情况处理
#[async_trait]
pub trait InfraDiscovery: Send + Sync {
    async fn resolve_address(&self, infra_name: &str) -> Option<String>;
}

/// Multipass 库存查询
#[derive(Clone, Debug)]
pub struct MultipassDiscovery {
    binary: String,
    timeout: Duration,
}

impl MultipassDiscovery {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl InfraDiscovery for MultipassDiscovery {
    async fn resolve_address(&self, infra_name: &str) -> Option<String> {
        let output = match CommandRunner::run_simple(
            &self.binary,
            &["info", infra_name, "--format", "json"],
            self.timeout,
        )
        .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(infra_name = %infra_name, error = %e, "Inventory query failed");
                return None;
            }
        };

        if !output.status.success() {
            warn!(
                infra_name = %infra_name,
                code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Inventory query exited non-zero"
            );
            return None;
        }

        let address = parse_multipass_info(&String::from_utf8_lossy(&output.stdout), infra_name);
        debug!(infra_name = %infra_name, address = ?address, "Resolved address");
        address
    }
}

/// 解析 `multipass info --format json` 输出中的第一个 IPv4 地址
pub fn parse_multipass_info(json: &str, infra_name: &str) -> Option<String> {
    let value: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            warn!(infra_name = %infra_name, error = %e, "Inventory output is not valid JSON");
            return None;
        }
    };

    value
        .get("info")?
        .get(infra_name)?
        .get("ipv4")?
        .as_array()?
        .first()?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "errors": [],
        "info": {
            "web-box": {
                "cpu_count": "1",
                "ipv4": ["10.121.4.17", "172.17.0.1"],
                "state": "Running"
            },
            "db": {
                "ipv4": [],
                "state": "Starting"
            }
        }
    }"#;

    #[test]
    fn test_parse_first_ipv4() {
        assert_eq!(
            parse_multipass_info(SAMPLE, "web-box"),
            Some("10.121.4.17".to_string())
        );
    }

    #[test]
    fn test_parse_missing_entries() {
        // 尚未分配地址
        assert_eq!(parse_multipass_info(SAMPLE, "db"), None);
        // 名称不存在
        assert_eq!(parse_multipass_info(SAMPLE, "cache"), None);
        // 非法 JSON
        assert_eq!(parse_multipass_info("instance not found", "web-box"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_resolves_to_none() {
        let discovery = MultipassDiscovery::new("nonexistent_multipass_12345", Duration::from_secs(5));
        assert_eq!(discovery.resolve_address("web-box").await, None);
    }

    #[tokio::test]
    async fn test_nonzero_exit_resolves_to_none() {
        // `false` 忽略参数并以 1 退出
        let discovery = MultipassDiscovery::new("false", Duration::from_secs(5));
        assert_eq!(discovery.resolve_address("web-box").await, None);
    }
}
