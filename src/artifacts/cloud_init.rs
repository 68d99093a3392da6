//! cloud-init user-data

use crate::domain::graph::DEFAULT_SSH_USER;

pub fn render(users: &[&str], authorized_keys: &[String]) -> String {
    let users: Vec<&str> = if users.is_empty() {
        vec![DEFAULT_SSH_USER]
    } else {
        users.to_vec()
    };

    let mut out = String::from("#cloud-config\nusers:\n");
    for user in users {
        out.push_str(&format!("  - name: {}\n", user));
        out.push_str("    groups: sudo\n");
        out.push_str("    shell: /bin/bash\n");
        out.push_str("    sudo: 'ALL=(ALL) NOPASSWD:ALL'\n");
        if !authorized_keys.is_empty() {
            out.push_str("    ssh_authorized_keys:\n");
            for key in authorized_keys {
                out.push_str(&format!("      - {}\n", key.trim()));
            }
        }
    }

    out.push_str("\npackage_update: true\n");
    out.push_str("packages:\n  - python3\n  - python3-apt\n");
    out.push_str("\nruncmd:\n");
    out.push_str("  - [ systemctl, enable, ssh ]\n");
    out.push_str("  - [ systemctl, start, ssh ]\n");
    out
}
