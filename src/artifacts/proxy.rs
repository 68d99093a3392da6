//! nginx 反向代理配置
//!
//! 从代理服务出发的连线生成路由：第一个目标挂在 `/`，其余挂在 `/<service id>/`。
//! 没有代理服务或没有路由时输出欢迎页。

use super::compose::container_port;
use super::compose_service_name;
use crate::domain::{Edge, Service, ServiceKind};

const WELCOME: &str = "server {
    listen 80;
    location / {
        return 200 'Welcome to InfraFlow Local VM';
        add_header Content-Type text/plain;
    }
}
";

pub fn render(services: &[&Service], edges: &[Edge]) -> String {
    let Some(proxy) = services.iter().find(|s| s.kind == ServiceKind::ReverseProxy) else {
        return WELCOME.to_string();
    };

    let targets: Vec<&Service> = edges
        .iter()
        .filter(|e| e.source == proxy.id)
        .filter_map(|e| services.iter().find(|s| s.id == e.target).copied())
        .filter(|s| s.id != proxy.id)
        .collect();

    if targets.is_empty() {
        return WELCOME.to_string();
    }

    let mut out = String::from("server {\n    listen 80;\n");
    for (i, target) in targets.iter().enumerate() {
        let upstream = format!(
            "http://{}:{}",
            compose_service_name(&target.id),
            container_port(target)
        );
        out.push('\n');
        if i == 0 {
            out.push_str("    location / {\n");
            out.push_str(&format!("        proxy_pass {};\n", upstream));
        } else {
            out.push_str(&format!("    location /{}/ {{\n", target.id));
            out.push_str(&format!("        proxy_pass {}/;\n", upstream));
        }
        out.push_str("        proxy_set_header Host $host;\n");
        out.push_str("        proxy_set_header X-Real-IP $remote_addr;\n");
        out.push_str("    }\n");
    }
    out.push_str("}\n");
    out
}
