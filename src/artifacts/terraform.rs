//! Terraform JSON 描述（larstobi/multipass provider）

use serde_json::{json, Map, Value};

use super::USER_DATA_FILE;
use crate::domain::{InfraNames, Vm};

const PROVIDER_SOURCE: &str = "larstobi/multipass";
const PROVIDER_VERSION: &str = "~> 1.4.2";

/// 资源地址：`vm_<id>`，非字母数字字符替换为 `_`
pub fn resource_key(vm_id: &str) -> String {
    let safe: String = vm_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("vm_{}", safe)
}

pub fn render(vms: &[Vm], names: &InfraNames) -> String {
    let mut instances = Map::new();
    for vm in vms {
        let Some(name) = names.get(&vm.id) else {
            continue;
        };
        instances.insert(
            resource_key(&vm.id),
            json!({
                "name": name,
                "cpus": vm.resources.cpus,
                "memory": vm.resources.memory,
                "disk": vm.resources.disk,
                "cloudinit_file": format!("./{}", USER_DATA_FILE),
            }),
        );
    }

    let mut doc = json!({
        "terraform": {
            "required_providers": {
                "multipass": {
                    "source": PROVIDER_SOURCE,
                    "version": PROVIDER_VERSION,
                }
            }
        }
    });

    // 没有 VM 时省略 resource 块，terraform 仍可 init/apply
    if !instances.is_empty() {
        doc["resource"] = json!({ "multipass_instance": Value::Object(instances) });
    }

    format!("{:#}\n", doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_uses_infra_names() {
        let mut vm = Vm::new("vm-a", "Web Box");
        vm.resources.cpus = 2;
        let vms = vec![vm];
        let names = InfraNames::build(&vms).unwrap();

        let doc: Value = serde_json::from_str(&render(&vms, &names)).unwrap();
        let instance = &doc["resource"]["multipass_instance"]["vm_vm_a"];

        assert_eq!(instance["name"], "web-box");
        assert_eq!(instance["cpus"], 2);
        assert_eq!(instance["memory"], "1G");
        assert_eq!(instance["cloudinit_file"], "./cloud-config.yaml");
        assert_eq!(
            doc["terraform"]["required_providers"]["multipass"]["source"],
            "larstobi/multipass"
        );
    }

    #[test]
    fn test_render_without_vms() {
        let doc: Value = serde_json::from_str(&render(&[], &InfraNames::default())).unwrap();
        assert!(doc.get("resource").is_none());
        assert!(doc.get("terraform").is_some());
    }
}
