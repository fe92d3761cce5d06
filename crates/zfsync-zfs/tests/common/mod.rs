//! Fake `zfs`, `ssh`, and meter executables for integration tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub fn write_executable(path: &Path, contents: &str) {
    fs::write(path, contents).expect("write fake binary");
    let mut perms = fs::metadata(path).expect("stat fake binary").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod fake binary");
}

/// Paths used by a fake `zfs` that keeps its namespace in a flat state file.
pub struct FakeZfs {
    pub binary: PathBuf,
    pub state: PathBuf,
    pub log: PathBuf,
    pub fail_marker: PathBuf,
}

impl FakeZfs {
    /// Install a fake `zfs` under `dir` seeded with `initial` listing paths.
    pub fn install(dir: &Path, name: &str, initial: &[&str]) -> Self {
        let binary = dir.join(name);
        let state = dir.join(format!("{name}.state"));
        let log = dir.join(format!("{name}.log"));
        let fail_marker = dir.join(format!("{name}.fail"));

        let mut seed = initial.join("\n");
        if !seed.is_empty() {
            seed.push('\n');
        }
        fs::write(&state, seed).expect("seed state");

        write_executable(
            &binary,
            &format!(
                r#"#!/bin/sh
STATE="{state}"
LOG="{log}"
echo "$*" >> "$LOG"
if [ -f "{fail}" ] && [ "$1" != "list" ]; then
  echo "cannot $1: permission denied" 1>&2
  exit 1
fi
case "$1" in
  list)
    while read -r line; do
      printf '%s\t0B\t-\t96K\t-\n' "$line"
    done < "$STATE"
    ;;
  create)
    echo "$4" >> "$STATE"
    ;;
  destroy)
    grep -v -e "^$3\$" -e "^$3/" -e "^$3@" "$STATE" > "$STATE.tmp"
    mv "$STATE.tmp" "$STATE"
    ;;
  snapshot)
    echo "$3" >> "$STATE"
    ;;
  *)
    echo "unsupported $1" 1>&2
    exit 2
    ;;
esac
"#,
                state = state.display(),
                log = log.display(),
                fail = fail_marker.display(),
            ),
        );

        Self {
            binary,
            state,
            log,
            fail_marker,
        }
    }

    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn list_count(&self) -> usize {
        self.invocations()
            .iter()
            .filter(|line| line.starts_with("list "))
            .count()
    }

    pub fn fail_mutations(&self) {
        fs::write(&self.fail_marker, "").expect("create fail marker");
    }
}

/// Fake `ssh` that logs its options and runs the remote command locally.
pub fn install_fake_ssh(dir: &Path) -> (PathBuf, PathBuf) {
    let binary = dir.join("ssh");
    let log = dir.join("ssh.log");
    write_executable(
        &binary,
        &format!(
            r#"#!/bin/sh
LOG="{log}"
printf '%s|' "$@" >> "$LOG"
echo >> "$LOG"
shift 5
exec "$@"
"#,
            log = log.display()
        ),
    );
    (binary, log)
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

/// True when `pid` no longer exists.
pub fn process_gone(pid: u32) -> bool {
    !Path::new(&format!("/proc/{pid}")).exists()
}
