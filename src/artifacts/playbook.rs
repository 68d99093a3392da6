//! Ansible playbook

use super::{MANIFEST_FILE, PROXY_FILE};

pub fn render(user: &str, remote_dir: &str) -> String {
    format!(
        r#"- name: Configure InfraFlow VM
  hosts: all
  become: yes
  tasks:
    - name: Install Docker and compose plugin
      apt:
        name:
          - docker.io
          - docker-compose-v2
        state: present
        update_cache: yes

    - name: Add {user} to docker group
      user:
        name: {user}
        groups: docker
        append: yes

    - name: Ensure deployment directory
      file:
        path: {dir}
        state: directory
        owner: {user}
        mode: '0755'

    - name: Copy service configuration
      copy:
        src: "{{{{ item }}}}"
        dest: "{dir}/{{{{ item }}}}"
        owner: {user}
      loop:
        - {manifest}
        - {proxy}

    - name: Start services
      shell:
        cmd: docker compose up -d --build --remove-orphans
        chdir: {dir}
"#,
        user = user,
        dir = remote_dir,
        manifest = MANIFEST_FILE,
        proxy = PROXY_FILE,
    )
}
