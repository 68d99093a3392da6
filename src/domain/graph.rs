//! 部署图领域模型
//!
//! VM、服务、连线以及一次部署请求。请求体同时兼容两种形态：
//! - 领域形态 `{ vms, services, edges }`
//! - 编辑器导出的 `{ nodes, edges }`（节点以 `type` 区分 `vm-node` / `service-node`）

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// 默认远程登录用户
pub const DEFAULT_SSH_USER: &str = "ubuntu";

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

/// VM 资源规格
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VmResources {
    pub cpus: u32,
    /// 内存大小 (e.g. "1G")
    pub memory: String,
    /// 磁盘大小 (e.g. "5G")
    pub disk: String,
}

impl Default for VmResources {
    fn default() -> Self {
        Self {
            cpus: 1,
            memory: "1G".to_string(),
            disk: "5G".to_string(),
        }
    }
}

/// 虚拟机
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Vm {
    pub id: String,
    pub label: String,
    /// 网络地址，只由编排器在发现阶段之后写入
    #[serde(default, skip_deserializing)]
    pub address: Option<String>,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default)]
    pub resources: VmResources,
}

impl Vm {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            address: None,
            ssh_user: default_ssh_user(),
            resources: VmResources::default(),
        }
    }
}

/// 服务类型
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    GenericImage,
    #[serde(alias = "nginx")]
    ReverseProxy,
    #[serde(alias = "whoami")]
    DebugEcho,
    #[serde(alias = "custom-git")]
    CustomBuild,
    #[serde(alias = "redis")]
    KeyValueStore,
    #[serde(alias = "postgres")]
    RelationalStore,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::GenericImage => "generic-image",
            ServiceKind::ReverseProxy => "reverse-proxy",
            ServiceKind::DebugEcho => "debug-echo",
            ServiceKind::CustomBuild => "custom-build",
            ServiceKind::KeyValueStore => "key-value-store",
            ServiceKind::RelationalStore => "relational-store",
        }
    }
}

/// 服务
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: String,
    pub kind: ServiceKind,
    pub internal_port: u16,
    /// 源码仓库（custom-build 使用）
    #[serde(default)]
    pub repository: Option<String>,
    /// 所属 VM，为空表示未放置
    #[serde(default)]
    pub vm_id: Option<String>,
}

impl Service {
    pub fn new(id: impl Into<String>, kind: ServiceKind, internal_port: u16) -> Self {
        Self {
            id: id.into(),
            kind,
            internal_port,
            repository: None,
            vm_id: None,
        }
    }

    pub fn on_vm(mut self, vm_id: impl Into<String>) -> Self {
        self.vm_id = Some(vm_id.into());
        self
    }
}

/// 服务之间的连线（仅用于生成反向代理路由）
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// 一次部署请求
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "RequestBody")]
pub struct DeploymentRequest {
    /// 调用方预先指定的部署 ID（便于先订阅事件流）
    pub deployment_id: Option<String>,
    pub vms: Vec<Vm>,
    pub services: Vec<Service>,
    pub edges: Vec<Edge>,
}

impl DeploymentRequest {
    /// 属于指定 VM 的服务
    pub fn services_for(&self, vm_id: &str) -> Vec<&Service> {
        self.services
            .iter()
            .filter(|s| s.vm_id.as_deref() == Some(vm_id))
            .collect()
    }

    /// 未放置的服务（没有 VM，或引用了请求中不存在的 VM）
    pub fn unplaced_services(&self) -> Vec<&Service> {
        let vm_ids: HashSet<&str> = self.vms.iter().map(|v| v.id.as_str()).collect();
        self.services
            .iter()
            .filter(|s| s.vm_id.as_deref().map_or(true, |id| !vm_ids.contains(id)))
            .collect()
    }

    /// 校验整张图并建立资源名映射表
    ///
    /// 登录用户会原样写进 cloud-init 和 playbook，compose 服务名会作为
    /// manifest 的键，两者都必须在生成产物之前拒绝非法值
    pub fn validate(&self) -> Result<InfraNames, GraphError> {
        let names = InfraNames::build(&self.vms)?;

        for vm in &self.vms {
            if !is_valid_ssh_user(&vm.ssh_user) {
                return Err(GraphError::InvalidSshUser {
                    vm_id: vm.id.clone(),
                    user: vm.ssh_user.clone(),
                });
            }
        }

        let mut owners: HashMap<String, &str> = HashMap::new();
        for service in &self.services {
            let name = compose_service_name(&service.id);
            if let Some(first) = owners.get(&name) {
                return Err(GraphError::DuplicateServiceName {
                    name,
                    first: first.to_string(),
                    second: service.id.clone(),
                });
            }
            owners.insert(name, &service.id);
        }

        Ok(names)
    }

    /// 所有 VM 使用到的登录用户（去重，保持声明顺序）
    pub fn ssh_users(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.vms
            .iter()
            .map(|v| v.ssh_user.as_str())
            .filter(|u| seen.insert(*u))
            .collect()
    }
}

/// 部署图校验错误
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("VM '{0}' is declared more than once")]
    DuplicateVmId(String),

    #[error("VM '{vm_id}' has a label that yields an empty infra name")]
    EmptyInfraName { vm_id: String },

    #[error("VMs '{first}' and '{second}' both map to infra name '{name}'")]
    DuplicateInfraName {
        name: String,
        first: String,
        second: String,
    },

    #[error("VM '{vm_id}' has an invalid ssh user '{user}'")]
    InvalidSshUser { vm_id: String, user: String },

    #[error("services '{first}' and '{second}' both map to compose service '{name}'")]
    DuplicateServiceName {
        name: String,
        first: String,
        second: String,
    },
}

/// 登录用户名：`[a-z_][a-z0-9_-]*`，最长 32 字符
fn is_valid_ssh_user(user: &str) -> bool {
    let mut chars = user.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    user.len() <= 32
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// compose 服务名：`service_<id>`，非字母数字字符替换为 `_`
pub fn compose_service_name(service_id: &str) -> String {
    let safe: String = service_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("service_{}", safe)
}

/// VM ID → 基础设施资源名映射表
///
/// 资源名由 label 派生（小写，空白替换为 `-`），是编排器与 Terraform / Multipass
/// 之间唯一的关联键。每次请求只计算一次，所有使用方都从这里读取。
#[derive(Clone, Debug, Default)]
pub struct InfraNames {
    by_vm: HashMap<String, String>,
}

impl InfraNames {
    /// 为请求中的全部 VM 建表并校验唯一性
    pub fn build(vms: &[Vm]) -> Result<Self, GraphError> {
        let mut by_vm = HashMap::new();
        let mut owners: HashMap<String, String> = HashMap::new();

        for vm in vms {
            if by_vm.contains_key(&vm.id) {
                return Err(GraphError::DuplicateVmId(vm.id.clone()));
            }

            let name = derive_infra_name(&vm.label);
            if name.is_empty() {
                return Err(GraphError::EmptyInfraName {
                    vm_id: vm.id.clone(),
                });
            }

            if let Some(first) = owners.get(&name) {
                return Err(GraphError::DuplicateInfraName {
                    name,
                    first: first.clone(),
                    second: vm.id.clone(),
                });
            }

            owners.insert(name.clone(), vm.id.clone());
            by_vm.insert(vm.id.clone(), name);
        }

        Ok(Self { by_vm })
    }

    /// 获取 VM 的资源名
    pub fn get(&self, vm_id: &str) -> Option<&str> {
        self.by_vm.get(vm_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_vm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_vm.is_empty()
    }
}

fn derive_infra_name(label: &str) -> String {
    label
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

// ========== 请求体解析 ==========

#[derive(Deserialize)]
#[serde(untagged)]
enum RequestBody {
    Graph(GraphState),
    Direct(DirectRequest),
}

#[derive(Deserialize)]
struct DirectRequest {
    #[serde(default)]
    deployment_id: Option<String>,
    vms: Vec<Vm>,
    #[serde(default)]
    services: Vec<Service>,
    #[serde(default)]
    edges: Vec<Edge>,
}

/// 编辑器导出的图
#[derive(Deserialize)]
struct GraphState {
    #[serde(default, alias = "deploymentId")]
    deployment_id: Option<String>,
    nodes: Vec<GraphNode>,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum GraphNode {
    #[serde(rename = "vm-node")]
    Vm {
        id: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        data: VmNodeData,
    },
    #[serde(rename = "service-node")]
    Service {
        id: String,
        #[serde(default, rename = "vmId")]
        vm_id: Option<String>,
        data: ServiceNodeData,
    },
    #[serde(other)]
    Other,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmNodeData {
    label: Option<String>,
    ssh_user: Option<String>,
    cpu: Option<u32>,
    ram: Option<String>,
    disk: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceNodeData {
    service_type: ServiceKind,
    internal_port: u16,
    #[serde(default)]
    git_repo: Option<String>,
}

impl From<RequestBody> for DeploymentRequest {
    fn from(body: RequestBody) -> Self {
        match body {
            RequestBody::Direct(direct) => Self {
                deployment_id: direct.deployment_id,
                vms: direct.vms,
                services: direct.services,
                edges: direct.edges,
            },
            RequestBody::Graph(graph) => graph.into(),
        }
    }
}

impl From<GraphState> for DeploymentRequest {
    fn from(graph: GraphState) -> Self {
        let mut vms = Vec::new();
        let mut services = Vec::new();

        for node in graph.nodes {
            match node {
                GraphNode::Vm { id, label, data } => {
                    let defaults = VmResources::default();
                    let label = data.label.or(label).unwrap_or_else(|| id.clone());
                    vms.push(Vm {
                        id,
                        label,
                        address: None,
                        ssh_user: data
                            .ssh_user
                            .filter(|u| !u.trim().is_empty())
                            .unwrap_or_else(default_ssh_user),
                        resources: VmResources {
                            cpus: data.cpu.unwrap_or(defaults.cpus),
                            memory: data.ram.unwrap_or(defaults.memory),
                            disk: data.disk.unwrap_or(defaults.disk),
                        },
                    });
                }
                GraphNode::Service { id, vm_id, data } => services.push(Service {
                    id,
                    kind: data.service_type,
                    internal_port: data.internal_port,
                    repository: data.git_repo.filter(|r| !r.is_empty()),
                    vm_id,
                }),
                GraphNode::Other => {}
            }
        }

        Self {
            deployment_id: graph.deployment_id,
            vms,
            services,
            edges: graph.edges,
        }
    }
}
