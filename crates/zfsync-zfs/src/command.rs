//! Argument vectors for the `zfs` tool and a blocking runner for them.
//!
//! Keeping shell integration here lets the connection and pipeline logic be
//! exercised against fake binaries.

use log::debug;
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use zfsync_core::error::{ZfsyncError, ZfsyncResult};

pub fn list_args() -> Vec<String> {
    to_args(&["list", "-r", "-t", "all", "-H"])
}

pub fn create_args(name: &str) -> Vec<String> {
    to_args(&["create", "-o", "mountpoint=none", name])
}

pub fn destroy_args(name: &str) -> Vec<String> {
    to_args(&["destroy", "-r", name])
}

pub fn snapshot_args(name: &str, snapshot: &str) -> Vec<String> {
    vec![
        "snapshot".to_string(),
        "-r".to_string(),
        format!("{name}@{snapshot}"),
    ]
}

/// `send [-i FROM] -v NAME`; the stream goes to stdout.
pub fn send_args(name: &str, incremental_from: Option<&str>) -> Vec<String> {
    let mut args = vec!["send".to_string()];
    if let Some(from) = incremental_from {
        args.push("-i".to_string());
        args.push(from.to_string());
    }
    args.push("-v".to_string());
    args.push(name.to_string());
    args
}

/// `receive -vFu NAME`; the stream is read from stdin.
pub fn receive_args(name: &str) -> Vec<String> {
    to_args(&["receive", "-vFu", name])
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

#[derive(Debug)]
pub(crate) struct Output {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) status: i32,
}

/// Run `argv` to completion, capturing both output streams.
pub(crate) fn run(argv: &[String]) -> ZfsyncResult<Output> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ZfsyncError::InvalidConfig("empty command line".into()))?;
    debug!("running `{}`", argv.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ZfsyncError::Spawn {
            command: argv.to_vec(),
            source,
        })?;

    let stdout_handle = spawn_output_reader(child.stdout.take());
    let stderr_handle = spawn_output_reader(child.stderr.take());
    let status = child.wait()?;

    let stdout = stdout_handle
        .join()
        .map_err(|_| ZfsyncError::Io(std::io::Error::other("stdout reader thread panicked")))??;
    let stderr = stderr_handle
        .join()
        .map_err(|_| ZfsyncError::Io(std::io::Error::other("stderr reader thread panicked")))??;

    Ok(Output {
        stdout,
        stderr,
        status: exit_code(status),
    })
}

/// Run `argv` and return its stdout, failing with `CommandFailed` on a non-zero exit.
///
/// The failure carries the tool's stderr so the reason reaches the operator.
pub(crate) fn run_checked(argv: &[String]) -> ZfsyncResult<String> {
    let out = run(argv)?;
    if out.status != 0 {
        return Err(ZfsyncError::CommandFailed {
            command: argv.to_vec(),
            status: out.status,
            stderr: out.stderr.trim().to_string(),
        });
    }
    Ok(out.stdout)
}

/// Numeric exit status; processes ended by a signal report `-1`.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<ZfsyncResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> ZfsyncResult<String> {
        if let Some(mut reader) = pipe {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        } else {
            Ok(String::new())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_vectors_match_tool_contract() {
        assert_eq!(list_args(), ["list", "-r", "-t", "all", "-H"]);
        assert_eq!(
            create_args("tank/new"),
            ["create", "-o", "mountpoint=none", "tank/new"]
        );
        assert_eq!(destroy_args("tank/old"), ["destroy", "-r", "tank/old"]);
        assert_eq!(
            snapshot_args("tank/data", "nightly"),
            ["snapshot", "-r", "tank/data@nightly"]
        );
        assert_eq!(receive_args("backup/data"), ["receive", "-vFu", "backup/data"]);
    }

    #[test]
    fn send_places_incremental_base_before_verbose_flag() {
        assert_eq!(send_args("tank/data@b", None), ["send", "-v", "tank/data@b"]);
        assert_eq!(
            send_args("tank/data@b", Some("tank/data@a")),
            ["send", "-i", "tank/data@a", "-v", "tank/data@b"]
        );
    }

    #[test]
    fn run_checked_reports_status_and_argv() {
        let argv = to_args(&["sh", "-c", "echo oops >&2; exit 3"]);
        match run_checked(&argv) {
            Err(ZfsyncError::CommandFailed {
                command,
                status,
                stderr,
            }) => {
                assert_eq!(command, argv);
                assert_eq!(status, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn run_captures_stdout() {
        let out = run(&to_args(&["sh", "-c", "printf 'tank\\ntank/a\\n'"])).unwrap();
        assert_eq!(out.status, 0);
        assert_eq!(out.stdout, "tank\ntank/a\n");
        assert!(out.stderr.is_empty());
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let err = run(&to_args(&["/nonexistent/zfsync-test-binary"])).unwrap_err();
        assert!(matches!(err, ZfsyncError::Spawn { .. }));
    }
}
