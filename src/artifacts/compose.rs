//! docker compose 清单

use super::{compose_service_name, PROXY_FILE};
use crate::domain::{Service, ServiceKind};

/// 服务类型对应的镜像与容器端口
pub struct ImageSpec {
    pub image: &'static str,
    /// None 表示容器内使用与 internal_port 相同的端口
    pub container_port: Option<u16>,
}

pub fn image_spec(kind: ServiceKind) -> ImageSpec {
    match kind {
        ServiceKind::GenericImage | ServiceKind::ReverseProxy => ImageSpec {
            image: "nginx:alpine",
            container_port: Some(80),
        },
        ServiceKind::DebugEcho => ImageSpec {
            image: "traefik/whoami",
            container_port: Some(80),
        },
        ServiceKind::KeyValueStore => ImageSpec {
            image: "redis:7-alpine",
            container_port: Some(6379),
        },
        ServiceKind::RelationalStore => ImageSpec {
            image: "postgres:16-alpine",
            container_port: Some(5432),
        },
        ServiceKind::CustomBuild => ImageSpec {
            image: "",
            container_port: None,
        },
    }
}

/// 服务在容器网络内监听的端口
pub fn container_port(service: &Service) -> u16 {
    image_spec(service.kind)
        .container_port
        .unwrap_or(service.internal_port)
}

pub fn render(services: &[&Service]) -> String {
    if services.is_empty() {
        return "services: {}\n".to_string();
    }

    let mut out = String::from("services:\n");
    for service in services {
        out.push_str(&format!("  {}:\n", compose_service_name(&service.id)));

        match service.kind {
            ServiceKind::CustomBuild => {
                let context = service.repository.as_deref().unwrap_or(".");
                out.push_str(&format!("    build: {}\n", yaml_quote(context)));
            }
            kind => {
                out.push_str(&format!("    image: {}\n", image_spec(kind).image));
            }
        }

        out.push_str("    ports:\n");
        out.push_str(&format!(
            "      - \"{}:{}\"\n",
            service.internal_port,
            container_port(service)
        ));

        match service.kind {
            ServiceKind::ReverseProxy => {
                out.push_str("    volumes:\n");
                out.push_str(&format!(
                    "      - ./{}:/etc/nginx/conf.d/default.conf:ro\n",
                    PROXY_FILE
                ));
            }
            ServiceKind::RelationalStore => {
                out.push_str("    environment:\n");
                out.push_str("      POSTGRES_PASSWORD: infraflow\n");
            }
            _ => {}
        }

        out.push_str("    restart: always\n");
    }
    out
}

/// YAML 双引号字符串
fn yaml_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
