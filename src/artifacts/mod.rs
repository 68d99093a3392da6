//! 部署产物生成
//!
//! 纯文本生成器：graph → 文本。编排器把输出原样写入磁盘，不做任何再编码。

pub mod cloud_init;
pub mod compose;
pub mod playbook;
pub mod proxy;
pub mod terraform;

use crate::domain::{Edge, InfraNames, Service, Vm};

/// 服务清单文件名（每台 VM 一份）
pub const MANIFEST_FILE: &str = "docker-compose.yml";
/// 反向代理配置文件名（每台 VM 一份）
pub const PROXY_FILE: &str = "nginx.conf";
/// 基础设施描述文件名（全局）
pub const INFRA_FILE: &str = "main.tf.json";
/// cloud-init user-data 文件名（全局）
pub const USER_DATA_FILE: &str = "cloud-config.yaml";
/// Ansible playbook 文件名（每台 VM 一份）
pub const PLAYBOOK_FILE: &str = "playbook.yml";

/// 产物生成器
///
/// 所有方法都是全函数：空输入返回最小的合法文本，从不报错
pub trait ArtifactGenerator: Send + Sync {
    /// docker compose 清单
    fn service_manifest(&self, services: &[&Service]) -> String;

    /// nginx 配置
    fn proxy_config(&self, services: &[&Service], edges: &[Edge]) -> String;

    /// Terraform JSON 描述
    fn infra_description(&self, vms: &[Vm], names: &InfraNames) -> String;

    /// cloud-init user-data
    fn bootstrap_user_data(&self, users: &[&str], authorized_keys: &[String]) -> String;

    /// 单台 VM 的 Ansible playbook
    fn playbook(&self, user: &str, remote_dir: &str) -> String;
}

/// 默认生成器
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultArtifacts;

impl ArtifactGenerator for DefaultArtifacts {
    fn service_manifest(&self, services: &[&Service]) -> String {
        compose::render(services)
    }

    fn proxy_config(&self, services: &[&Service], edges: &[Edge]) -> String {
        proxy::render(services, edges)
    }

    fn infra_description(&self, vms: &[Vm], names: &InfraNames) -> String {
        terraform::render(vms, names)
    }

    fn bootstrap_user_data(&self, users: &[&str], authorized_keys: &[String]) -> String {
        cloud_init::render(users, authorized_keys)
    }

    fn playbook(&self, user: &str, remote_dir: &str) -> String {
        playbook::render(user, remote_dir)
    }
}

pub use crate::domain::graph::compose_service_name;
