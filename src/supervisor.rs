//! Lifecycle of the external teleoperation program.
//!
//! The program runs in its own process group. Stopping signals the whole
//! group (TERM, grace period, KILL) and then sweeps every process whose
//! command line matches the executable name, since teleop binaries fork
//! helpers that can leave the original group.

use std::fmt;
use std::io::Write as _;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, ExitStatus, Stdio};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::clock::sleep_secs;
use crate::error::{CalibError, Result};

/// Secret for the privilege-elevation front end. Never printed.
#[derive(Clone)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(***)")
    }
}

/// How privileged commands are run.
#[derive(Clone, Debug)]
pub enum Elevation {
    /// Run as the current user.
    Direct,
    /// `sudo -k -S`, secret written to the child's stdin and the pipe closed.
    /// `-k` makes sudo read it even when a cached timestamp would let it skip.
    Sudo(Credentials),
}

impl Elevation {
    pub fn from_password(password: Option<String>) -> Self {
        match password {
            Some(secret) if !secret.is_empty() => Elevation::Sudo(Credentials::new(secret)),
            _ => Elevation::Direct,
        }
    }

    fn command(&self, program: &Path, args: &[String]) -> StdCommand {
        match self {
            Elevation::Direct => {
                let mut cmd = StdCommand::new(program);
                cmd.args(args).stdin(Stdio::null());
                cmd
            }
            Elevation::Sudo(_) => {
                let mut cmd = StdCommand::new("sudo");
                cmd.args(["-k", "-S", "-p", ""]).arg(program).args(args).stdin(Stdio::piped());
                cmd
            }
        }
    }

    fn secret_line(&self) -> Option<String> {
        match self {
            Elevation::Direct => None,
            Elevation::Sudo(credentials) => Some(format!("{}\n", credentials.secret())),
        }
    }

    /// Run a short helper command (kill, pkill) to completion.
    fn run_blocking(&self, program: &str, args: &[String]) -> std::io::Result<ExitStatus> {
        let mut child = self
            .command(Path::new(program), args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        if let (Some(line), Some(mut stdin)) = (self.secret_line(), child.stdin.take()) {
            stdin.write_all(line.as_bytes())?;
        }
        child.wait()
    }
}

/// Timing of start and stop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub settle_s: f64, // wait after launch before returning
    pub grace_s: f64,  // TERM -> KILL escalation delay
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            settle_s: 2.0,
            grace_s: 1.0,
        }
    }
}

/// Arguments naming the two robot endpoints.
///
/// Binaries with `high_transparency` in their name take `-l/-r`, all others `-1/-2`.
pub fn teleop_args(exe: &Path, leader: &str, follower: &str) -> Vec<String> {
    let name = exe
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (leader_flag, follower_flag) = if name.contains("high_transparency") {
        ("-l", "-r")
    } else {
        ("-1", "-2")
    };
    vec![
        leader_flag.to_string(),
        leader.to_string(),
        follower_flag.to_string(),
        follower.to_string(),
    ]
}

/// Regex for `pkill -f` that cannot match the pkill command line itself.
pub fn sweep_pattern(name: &str) -> Option<String> {
    let mut chars = name.chars();
    let first = chars.next()?;
    let rest = escape_regex(chars.as_str());
    if first.is_alphanumeric() || first == '_' {
        Some(format!("[{first}]{rest}"))
    } else {
        Some(format!("{}{rest}", escape_regex(&first.to_string())))
    }
}

fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.^$*+?()[]{}|".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalOutcome {
    Delivered,
    Gone,
    Denied,
}

fn killpg(pgid: i32, signal: libc::c_int) -> SignalOutcome {
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid, signal) };
    if rc == 0 {
        return SignalOutcome::Delivered;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::EPERM) => SignalOutcome::Denied,
        _ => SignalOutcome::Gone,
    }
}

fn resolve_pgid(pid: u32) -> Option<i32> {
    let pid = i32::try_from(pid).ok()?;
    // SAFETY: getpgid only reads kernel state for the given pid.
    let pgid = unsafe { libc::getpgid(pid) };
    (pgid > 0).then_some(pgid)
}

/// True while any member of the group exists (EPERM means it does).
pub fn group_alive(pgid: i32) -> bool {
    killpg(pgid, 0) != SignalOutcome::Gone
}

fn signal_name(signal: libc::c_int) -> &'static str {
    match signal {
        libc::SIGTERM => "TERM",
        libc::SIGKILL => "KILL",
        _ => "0",
    }
}

/// Signal the group, falling back to an elevated `kill` for root-owned members.
fn signal_group(elevation: &Elevation, pgid: i32, signal: libc::c_int) {
    match killpg(pgid, signal) {
        SignalOutcome::Delivered => log::info!("[supervisor] SIG{} -> pgid {}", signal_name(signal), pgid),
        SignalOutcome::Gone => log::debug!("[supervisor] pgid {} already gone", pgid),
        SignalOutcome::Denied => {
            let args = vec![
                "-s".to_string(),
                signal_name(signal).to_string(),
                "--".to_string(),
                format!("-{pgid}"),
            ];
            match elevation.run_blocking("kill", &args) {
                Ok(_) => log::info!("[supervisor] elevated SIG{} -> pgid {}", signal_name(signal), pgid),
                Err(e) => log::warn!("[supervisor] elevated kill of pgid {} failed: {}", pgid, e),
            }
        }
    }
}

/// Kill every process whose command line matches `pattern`.
fn sweep(elevation: &Elevation, pattern: &str) {
    let args = vec!["-9".to_string(), "-f".to_string(), pattern.to_string()];
    match elevation.run_blocking("pkill", &args) {
        Ok(status) => match status.code() {
            Some(0) => log::info!("[supervisor] sweep killed matches of {}", pattern),
            Some(1) => log::debug!("[supervisor] sweep found no match for {}", pattern),
            other => log::warn!("[supervisor] pkill {} exited with {:?}", pattern, other),
        },
        Err(e) => log::warn!("[supervisor] pkill {} could not run: {}", pattern, e),
    }
}

/// The one live teleop process owned by a supervisor.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    pgid: i32,
    exe: PathBuf,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }
}

/// Owns at most one external process tree and guarantees its teardown.
#[derive(Debug)]
pub struct ProcessSupervisor {
    elevation: Elevation,
    settings: SupervisorSettings,
    handle: Option<ProcessHandle>,
    pattern: Option<String>,
}

impl ProcessSupervisor {
    pub fn new(elevation: Elevation, settings: SupervisorSettings) -> Self {
        Self {
            elevation,
            settings,
            handle: None,
            pattern: None,
        }
    }

    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    /// True while the launched child has not exited.
    pub fn is_running(&mut self) -> bool {
        match self.handle.as_mut() {
            Some(handle) => matches!(handle.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Launch `exe` in a new process group, then wait the settle delay.
    pub async fn start(&mut self, exe: &Path, args: &[String], cancel: &CancellationToken) -> Result<u32> {
        if self.handle.is_some() {
            if self.is_running() {
                return Err(CalibError::AlreadyRunning);
            }
            // Exited on its own; clear the group before relaunching
            self.stop().await;
        }

        log::info!("[supervisor] launching {} {}", exe.display(), args.join(" "));
        let command = self.elevation.command(exe, args);
        let pid = self.spawn(command, exe, self.elevation.secret_line()).await?;

        sleep_secs(self.settings.settle_s, cancel).await?;
        Ok(pid)
    }

    /// Spawn `command` in its own group and record it before the secret is
    /// written, so a failed write still leaves the child to `stop` and `Drop`.
    async fn spawn(&mut self, mut command: StdCommand, exe: &Path, secret: Option<String>) -> Result<u32> {
        command.process_group(0);
        let mut child = Command::from(command)
            .spawn()
            .map_err(|e| CalibError::Launch(format!("{}: {}", exe.display(), e)))?;
        let stdin = child.stdin.take();

        let pid = child
            .id()
            .ok_or_else(|| CalibError::Launch(format!("{} exited immediately", exe.display())))?;
        let pgid = pid as i32; // process_group(0): pgid == pid
        self.pattern = exe
            .file_name()
            .and_then(|n| sweep_pattern(&n.to_string_lossy()));
        self.handle = Some(ProcessHandle {
            child,
            pid,
            pgid,
            exe: exe.to_path_buf(),
        });
        log::info!("[supervisor] started pid {} (pgid {})", pid, pgid);

        if let (Some(line), Some(mut stdin)) = (secret, stdin) {
            stdin.write_all(line.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        Ok(pid)
    }

    /// Tear down the group and sweep leftovers. Idempotent and infallible.
    pub async fn stop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            match resolve_pgid(handle.pid) {
                Some(pgid) => {
                    signal_group(&self.elevation, pgid, libc::SIGTERM);
                    tokio::time::sleep(Duration::from_secs_f64(self.settings.grace_s.max(0.0))).await;
                    if group_alive(pgid) {
                        log::warn!("[supervisor] pgid {} survived TERM, escalating", pgid);
                        signal_group(&self.elevation, pgid, libc::SIGKILL);
                    }
                }
                None => log::debug!("[supervisor] pid {} has no group, already stopped", handle.pid),
            }
            let _ = handle.child.start_kill();
            match tokio::time::timeout(Duration::from_secs(2), handle.child.wait()).await {
                Ok(Ok(status)) => log::info!("[supervisor] pid {} reaped ({})", handle.pid, status),
                Ok(Err(e)) => log::debug!("[supervisor] reaping pid {}: {}", handle.pid, e),
                Err(_) => log::warn!("[supervisor] pid {} not reaped in time", handle.pid),
            }
        }

        if let Some(pattern) = self.pattern.clone() {
            let elevation = self.elevation.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || sweep(&elevation, &pattern)).await {
                log::warn!("[supervisor] sweep task failed: {}", e);
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        log::warn!("[supervisor] dropped with pid {} live, killing", handle.pid);
        if let Some(pgid) = resolve_pgid(handle.pid) {
            signal_group(&self.elevation, pgid, libc::SIGKILL);
        }
        let _ = handle.child.start_kill();
        if let Some(pattern) = &self.pattern {
            sweep(&self.elevation, pattern);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static SCRIPT_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn write_script(body: &str) -> PathBuf {
        let n = SCRIPT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("test_sup_{}_{}.sh", std::process::id(), n));
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Live (non-zombie) members of a group, read from /proc.
    fn running_members(pgid: i32) -> usize {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| std::fs::read_to_string(e.path().join("stat")).ok())
            .filter(|stat| {
                let Some(close) = stat.rfind(')') else {
                    return false;
                };
                let fields: Vec<&str> = stat[close + 1..].split_whitespace().collect();
                fields.len() > 2 && fields[0] != "Z" && fields[2] == pgid.to_string()
            })
            .count()
    }

    /// Live processes whose command line mentions `needle`.
    fn processes_matching(needle: &str) -> usize {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| std::fs::read(e.path().join("cmdline")).ok())
            .filter(|raw| String::from_utf8_lossy(raw).contains(needle))
            .count()
    }

    async fn settle_until_gone(needle: &str) -> usize {
        for _ in 0..40 {
            if processes_matching(needle) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        processes_matching(needle)
    }

    fn quick() -> SupervisorSettings {
        SupervisorSettings {
            settle_s: 0.1,
            grace_s: 0.2,
        }
    }

    #[test]
    fn test_teleop_args_flavours() {
        let plain = teleop_args(Path::new("/opt/test_teleop"), "L-1", "F-2");
        assert_eq!(plain, vec!["-1", "L-1", "-2", "F-2"]);

        let ht = teleop_args(Path::new("./test_high_transparency_v2"), "L", "F");
        assert_eq!(ht, vec!["-l", "L", "-r", "F"]);
    }

    #[test]
    fn test_sweep_pattern_brackets_first_char() {
        assert_eq!(sweep_pattern("test_teleop").as_deref(), Some("[t]est_teleop"));
        assert_eq!(sweep_pattern("test.v1+x").as_deref(), Some("[t]est\\.v1\\+x"));
        assert_eq!(sweep_pattern(""), None);
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let elevation = Elevation::from_password(Some("hunter2".to_string()));
        let text = format!("{:?}", elevation);
        assert!(!text.contains("hunter2"));
        assert!(matches!(Elevation::from_password(None), Elevation::Direct));
        assert!(matches!(Elevation::from_password(Some(String::new())), Elevation::Direct));
    }

    #[test]
    fn test_sudo_always_reads_secret() {
        let elevation = Elevation::from_password(Some("hunter2".to_string()));
        let command = elevation.command(Path::new("/opt/test_teleop"), &["-1".to_string(), "L".to_string()]);
        assert_eq!(command.get_program(), "sudo");
        let args: Vec<String> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["-k", "-S", "-p", "", "/opt/test_teleop", "-1", "L"]);
        assert!(!args.iter().any(|a| a.contains("hunter2")));
        assert_eq!(elevation.secret_line().as_deref(), Some("hunter2\n"));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut supervisor = ProcessSupervisor::new(Elevation::Direct, quick());
        supervisor.stop().await;
        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_stop_kills_whole_group_and_is_idempotent() {
        let script = write_script("sleep 30 &\nsleep 30");
        let cancel = CancellationToken::new();
        let mut supervisor = ProcessSupervisor::new(Elevation::Direct, quick());

        supervisor.start(&script, &[], &cancel).await.unwrap();
        assert!(supervisor.is_running());
        let pgid = supervisor.handle().map(|h| h.pgid()).unwrap();
        assert!(group_alive(pgid));
        assert!(running_members(pgid) >= 2);

        supervisor.stop().await;
        assert_eq!(running_members(pgid), 0);
        assert!(supervisor.handle().is_none());

        supervisor.stop().await;
        assert_eq!(running_members(pgid), 0);
        let _ = std::fs::remove_file(script);
    }

    #[tokio::test]
    async fn test_term_ignored_escalates_to_kill() {
        let script = write_script("trap '' TERM\nwhile true; do sleep 0.05; done");
        let cancel = CancellationToken::new();
        let mut supervisor = ProcessSupervisor::new(Elevation::Direct, quick());

        supervisor.start(&script, &[], &cancel).await.unwrap();
        let pgid = supervisor.handle().map(|h| h.pgid()).unwrap();

        supervisor.stop().await;
        assert_eq!(running_members(pgid), 0);
        let _ = std::fs::remove_file(script);
    }

    #[tokio::test]
    async fn test_sweep_catches_descendant_outside_group() {
        // The child re-runs the script in a session of its own, out of reach of killpg
        let script = write_script(
            "if [ \"$1\" = child ]; then\n  while true; do sleep 0.05; done\nfi\nsetsid \"$0\" child &\nsleep 30",
        );
        let name = script.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap();
        let cancel = CancellationToken::new();
        let mut supervisor = ProcessSupervisor::new(Elevation::Direct, quick());

        supervisor.start(&script, &[], &cancel).await.unwrap();
        for _ in 0..40 {
            if processes_matching(&name) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(processes_matching(&name) >= 2);

        supervisor.stop().await;
        assert_eq!(settle_until_gone(&name).await, 0);
        let _ = std::fs::remove_file(script);
    }

    #[tokio::test]
    async fn test_child_tracked_when_secret_write_fails() {
        // Closes its stdin at once, so a secret larger than the pipe buffer cannot be written
        let script = write_script("exec 0<&-\nsleep 30");
        let mut supervisor = ProcessSupervisor::new(Elevation::Direct, quick());
        let mut command = StdCommand::new(&script);
        command.stdin(Stdio::piped());

        let written = supervisor.spawn(command, &script, Some("x".repeat(1 << 20))).await;
        assert!(matches!(written, Err(CalibError::Io(_))));
        let pgid = supervisor.handle().map(|h| h.pgid()).unwrap();
        assert!(running_members(pgid) >= 1);

        supervisor.stop().await;
        assert_eq!(running_members(pgid), 0);
        assert!(supervisor.handle().is_none());
        let _ = std::fs::remove_file(script);
    }

    #[tokio::test]
    async fn test_second_start_rejected_while_running() {
        let script = write_script("sleep 30");
        let cancel = CancellationToken::new();
        let mut supervisor = ProcessSupervisor::new(Elevation::Direct, quick());

        supervisor.start(&script, &[], &cancel).await.unwrap();
        let second = supervisor.start(&script, &[], &cancel).await;
        assert!(matches!(second, Err(CalibError::AlreadyRunning)));

        supervisor.stop().await;
        let _ = std::fs::remove_file(script);
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let cancel = CancellationToken::new();
        let mut supervisor = ProcessSupervisor::new(Elevation::Direct, quick());
        let result = supervisor
            .start(Path::new("/nonexistent/test_nothing"), &[], &cancel)
            .await;
        assert!(matches!(result, Err(CalibError::Launch(_))));
        assert!(!supervisor.is_running());
    }
}
