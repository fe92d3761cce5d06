//! Where storage commands run: directly on this host or through ssh.

use std::fmt;
use zfsync_core::ZfsyncConfig;

/// Host descriptor plus the command prefix used to reach its `zfs` tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host: String,
    remote: bool,
    prefix: Vec<String>,
}

impl Target {
    /// Run `zfs_binary` directly.
    pub fn local(zfs_binary: impl Into<String>) -> Self {
        Self {
            host: "localhost".to_string(),
            remote: false,
            prefix: vec![zfs_binary.into()],
        }
    }

    /// Run `zfs_binary` on `host` through a batch-mode ssh session.
    pub fn remote(
        host: impl Into<String>,
        ssh_binary: impl Into<String>,
        cipher: impl Into<String>,
        zfs_binary: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let prefix = vec![
            ssh_binary.into(),
            "-o".to_string(),
            "BatchMode yes".to_string(),
            "-c".to_string(),
            cipher.into(),
            host.clone(),
            zfs_binary.into(),
        ];
        Self {
            host,
            remote: true,
            prefix,
        }
    }

    /// Pick a local or remote target for `host` according to `config.remote.local_hosts`.
    pub fn resolve(host: &str, config: &ZfsyncConfig) -> Self {
        if config.is_local_host(host) {
            let mut target = Self::local(config.zfs.binary.clone());
            target.host = host.to_string();
            target
        } else {
            Self::remote(
                host,
                config.remote.ssh_binary.clone(),
                config.remote.cipher.clone(),
                config.zfs.binary.clone(),
            )
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }

    /// Full argument vector for a storage tool subcommand.
    pub fn command(&self, args: Vec<String>) -> Vec<String> {
        let mut argv = self.prefix.clone();
        argv.extend(args);
        argv
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.remote {
            write!(f, "{} (ssh)", self.host)
        } else {
            write!(f, "{} (local)", self.host)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::list_args;

    #[test]
    fn local_hosts_invoke_tool_directly() {
        let config = ZfsyncConfig::default();
        let target = Target::resolve("127.0.0.1", &config);
        assert!(!target.is_remote());
        assert_eq!(
            target.command(list_args()),
            ["zfs", "list", "-r", "-t", "all", "-H"]
        );
    }

    #[test]
    fn remote_hosts_wrap_tool_in_batch_ssh() {
        let mut config = ZfsyncConfig::default();
        config.remote.cipher = "aes256-gcm@openssh.com".into();
        config.zfs.binary = "/sbin/zfs".into();

        let target = Target::resolve("backup.example.net", &config);
        assert!(target.is_remote());
        assert_eq!(target.host(), "backup.example.net");
        assert_eq!(
            target.prefix(),
            [
                "ssh",
                "-o",
                "BatchMode yes",
                "-c",
                "aes256-gcm@openssh.com",
                "backup.example.net",
                "/sbin/zfs"
            ]
        );
        assert_eq!(target.to_string(), "backup.example.net (ssh)");
    }
}
