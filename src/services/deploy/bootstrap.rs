//! Remote bootstrap script
//!
//! Renders the single idempotent script run over a direct SSH session:
//! install the container runtime and compose plugin only when missing,
//! prepare the deployment directory, write the configs, start the stack.

use crate::artifacts::{MANIFEST_FILE, PROXY_FILE};

/// Wrap a value in single quotes for POSIX sh (`'` becomes `'\''`)
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

/// Command that writes `content` to `path` byte for byte
pub fn write_file_command(content: &str, path: &str) -> String {
    format!(
        "printf '%s' {} | sudo tee {} > /dev/null",
        shell_quote(content),
        shell_quote(path)
    )
}

/// Render the bootstrap script for one VM
pub fn render(user: &str, remote_dir: &str, manifest: &str, proxy_config: &str) -> String {
    let dir = shell_quote(remote_dir);
    let manifest_path = format!("{}/{}", remote_dir.trim_end_matches('/'), MANIFEST_FILE);
    let proxy_path = format!("{}/{}", remote_dir.trim_end_matches('/'), PROXY_FILE);

    let mut script = String::from("set -e\n");

    script.push_str("if ! command -v docker > /dev/null 2>&1; then\n");
    script.push_str("  echo 'Installing Docker'\n");
    script.push_str("  curl -fsSL https://get.docker.com | sudo sh\n");
    script.push_str("fi\n");

    script.push_str("if ! sudo docker compose version > /dev/null 2>&1; then\n");
    script.push_str("  echo 'Installing Docker Compose plugin'\n");
    script.push_str("  sudo apt-get update -y\n");
    script.push_str(
        "  sudo apt-get install -y docker-compose-plugin || sudo apt-get install -y docker-compose-v2\n",
    );
    script.push_str("fi\n");

    script.push_str(&format!("sudo mkdir -p {}\n", dir));
    script.push_str(&format!("sudo chown {}: {}\n", shell_quote(user), dir));

    script.push_str(&write_file_command(manifest, &manifest_path));
    script.push('\n');
    script.push_str(&write_file_command(proxy_config, &proxy_path));
    script.push('\n');

    script.push_str(&format!(
        "cd {} && sudo docker compose up -d --build --remove-orphans\n",
        dir
    ));
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_quoted_content_round_trips_through_sh() {
        let content = "return 200 'Welcome';\n$HOME `id` \"x\" \\n %s\n";
        let output = Command::new("sh")
            .arg("-c")
            .arg(format!("printf '%s' {}", shell_quote(content)))
            .output()
            .unwrap();

        assert!(output.status.success());
        assert_eq!(String::from_utf8(output.stdout).unwrap(), content);
    }

    #[test]
    fn test_install_steps_are_guarded() {
        let script = render("ubuntu", "/opt/infraflow", "services: {}\n", "server {}\n");

        // Install steps are skipped on a second run
        assert!(script.contains("if ! command -v docker > /dev/null 2>&1; then\n"));
        assert!(script.contains("if ! sudo docker compose version > /dev/null 2>&1; then\n"));
        assert!(script.contains("sudo mkdir -p '/opt/infraflow'\n"));
        assert!(script.contains("sudo chown 'ubuntu': '/opt/infraflow'\n"));
        assert!(script.contains("'/opt/infraflow/docker-compose.yml'"));
        assert!(script.contains("'/opt/infraflow/nginx.conf'"));
        assert!(script.ends_with("cd '/opt/infraflow' && sudo docker compose up -d --build --remove-orphans\n"));
        assert!(script.starts_with("set -e\n"));
    }

    #[test]
    fn test_script_is_valid_sh() {
        let script = render(
            "ubuntu",
            "/opt/infraflow/",
            "services:\n  service_s1:\n    image: nginx:alpine\n",
            "location / { return 200 'hi'; }\n",
        );
        // `sh -n` parses without executing
        let status = Command::new("sh").arg("-n").arg("-c").arg(&script).status().unwrap();
        assert!(status.success());
    }
}
