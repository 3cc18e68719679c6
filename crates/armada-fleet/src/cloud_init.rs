//! Cloud-init user data for new servers
//!
//! Every managed server boots the same first-boot script: packages the
//! cluster software needs, plus a sentinel the bootstrapper checks via
//! `cloud-init status --wait`.

/// Assemble the cloud-init user data shipped at server creation.
pub fn user_data(environment: &str) -> String {
    format!(
        r#"#cloud-config
package_update: true
packages:
  - curl
  - ca-certificates
  - open-iscsi
  - wireguard
write_files:
  - path: /etc/armada/environment
    permissions: "0644"
    content: |
      {environment}
runcmd:
  - systemctl enable --now iscsid
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_data_embeds_environment() {
        let data = user_data("production");
        assert!(data.starts_with("#cloud-config"));
        assert!(data.contains("production"));
        assert!(data.contains("wireguard"));
    }
}
