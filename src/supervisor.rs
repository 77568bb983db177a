//!
//! Out-of-process lifecycle management for a local proxy instance.
//!
//! Unlike the rest of the crate, this module mutates only external OS
//! state — processes and ports — never shared memory with the running
//! [`crate::server`]. It is meant to run from a separate CLI entry point
//! (or a calling tool) before handing control to a client that expects an
//! Anthropic-compatible endpoint to already be listening.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::process::{Command, Stdio};
use std::time::Duration;

use serde_json::Value;

/* --- constants ------------------------------------------------------------------------------ */

/** command-line substring this proxy's own spawned processes carry, so the
 *  supervisor only ever touches instances of itself */
pub const PROXY_BINARY_MARKER: &str = "claude-model-router";

/** how many sequential ports to try beyond the requested one */
const PORT_HUNT_RANGE: u16 = 5;

/** attempts to poll `/health` after spawning before giving up */
const READY_POLL_ATTEMPTS: u32 = 10;

/** delay between readiness polls */
const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/* --- types ----------------------------------------------------------------------------------- */

/// Outcome of [`ensure_proxy_running`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A compatible proxy was already running; no action taken.
    Running,
    /// A new proxy was spawned (no compatible instance existed).
    Started,
    /// The target was forcibly restarted.
    Restarted,
    /// The target host isn't local; nothing was touched.
    Skip,
    /// No compatible proxy could be reached or started.
    Failed,
}

/// Parsed components of a proxy URL.
#[derive(Debug, Clone)]
pub struct ProxyUrl {
    pub host: String,
    pub port: u16,
    pub scheme: String,
}

/* --- start of code -------------------------------------------------------------------------- */

impl ProxyUrl {
    ///
    /// Parse a proxy base URL into host/port/scheme, defaulting the port to
    /// the scheme's standard port when the URL omits one.
    ///
    /// Hand-rolled rather than pulled through a URL-parsing crate: the
    /// surface here is deliberately narrow (`scheme://host[:port]`, no
    /// path/query/fragment ever appears in a proxy base URL).
    pub fn parse(proxy_url: &str) -> Self {
        let (scheme, rest) = proxy_url.split_once("://").unwrap_or(("http", proxy_url));
        let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
        let default_port = if scheme == "https" { 443 } else { 80 };

        let (host, port) = if let Some(bracket_end) = authority.strip_prefix('[').and_then(|r| r.find(']').map(|i| (r, i))) {
            let (inner, after) = bracket_end;
            let host = inner[..after].to_string();
            let port = inner[after + 1..].strip_prefix(':').and_then(|p| p.parse().ok()).unwrap_or(default_port);
            (host, port)
        } else if let Some((host, port_str)) = authority.rsplit_once(':') {
            match port_str.parse() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (authority.to_string(), default_port),
            }
        } else {
            (authority.to_string(), default_port)
        };

        let host = if host.is_empty() { "127.0.0.1".to_string() } else { host };
        Self { host, port, scheme: scheme.to_string() }
    }

    pub fn build(&self) -> String {
        let host_part = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("{}://{}:{}", self.scheme, host_part, self.port)
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self { host: self.host.clone(), port, scheme: self.scheme.clone() }
    }
}

/// Is `host` one of the loopback spellings this supervisor is willing to
/// manage? Non-local proxies are left alone entirely.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "127.0.0.1" | "localhost" | "::1")
}

/// Candidate URLs to probe/start on: the requested one, then `port+1..=port+5`.
pub fn candidate_proxy_urls(base: &ProxyUrl) -> Vec<ProxyUrl> {
    let mut candidates = vec![base.clone()];
    for offset in 1..=PORT_HUNT_RANGE {
        candidates.push(base.with_port(base.port + offset));
    }
    candidates
}

///
/// Probe `/health` on `proxy_url`, returning the parsed payload only if the
/// proxy answered 200 with `{"status":"ok",...}`.
pub async fn check_proxy_health(proxy_url: &str, timeout: Duration) -> Option<Value> {
    let client = reqwest::Client::builder().timeout(timeout).build().ok()?;
    let url = format!("{}/health", proxy_url.trim_end_matches('/'));
    let response = match client.get(&url).header(reqwest::header::USER_AGENT, "claude-model-router/1.0").send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(url, error = %e, "health probe unreachable");
            return None;
        }
    };
    if !response.status().is_success() {
        return None;
    }
    let payload: Value = response.json().await.ok()?;
    if payload.get("status").and_then(Value::as_str) != Some("ok") {
        return None;
    }
    Some(payload)
}

/// Does a `/health` payload advertise both capability flags this supervisor
/// requires?
pub fn is_proxy_compatible(payload: &Value) -> bool {
    let capabilities = match payload.get("capabilities") {
        Some(c) => c,
        None => return false,
    };
    capabilities.get("supports_responses").and_then(Value::as_bool).unwrap_or(false)
        && capabilities.get("retry_on_not_chat_model").and_then(Value::as_bool).unwrap_or(false)
}

/// List `(pid, command_line)` pairs for proxy processes other than the
/// current one, via `ps -ax` on POSIX or a PowerShell WMI query on Windows.
pub fn list_proxy_processes() -> Vec<(u32, String)> {
    let current_pid = std::process::id();

    #[cfg(windows)]
    {
        let command = format!(
            "Get-CimInstance Win32_Process -Filter \"CommandLine like '%{}%'\" | Select-Object ProcessId,CommandLine | ConvertTo-Json -Compress",
            PROXY_BINARY_MARKER
        );
        let Some(payload) = powershell_json(&command) else { return Vec::new() };
        let items: Vec<Value> = match payload {
            Value::Array(items) => items,
            other => vec![other],
        };
        return items
            .into_iter()
            .filter_map(|item| {
                let pid = item.get("ProcessId")?.as_u64()? as u32;
                if pid == current_pid {
                    return None;
                }
                let cmdline = item.get("CommandLine").and_then(Value::as_str).unwrap_or("").to_string();
                if !cmdline.to_lowercase().contains(&PROXY_BINARY_MARKER.to_lowercase()) {
                    return None;
                }
                Some((pid, cmdline))
            })
            .collect();
    }

    #[cfg(not(windows))]
    {
        let Ok(output) = Command::new("ps").args(["-ax", "-o", "pid=,command="]).output() else {
            return Vec::new();
        };
        let text = String::from_utf8_lossy(&output.stdout);
        text.lines()
            .filter_map(|line| {
                let line = line.trim();
                let (pid_str, cmdline) = line.split_once(char::is_whitespace)?;
                if !cmdline.contains(PROXY_BINARY_MARKER) {
                    return None;
                }
                let pid: u32 = pid_str.parse().ok()?;
                if pid == current_pid {
                    return None;
                }
                Some((pid, cmdline.trim().to_string()))
            })
            .collect()
    }
}

#[cfg(windows)]
fn powershell_json(command: &str) -> Option<Value> {
    let output = Command::new("powershell").args(["-NoProfile", "-NonInteractive", "-Command", command]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// List PIDs with a LISTENING socket on `port` (Windows only, via `netstat -ano`).
#[cfg(windows)]
pub fn list_listening_pids(port: u16) -> Vec<u32> {
    let Ok(output) = Command::new("netstat").args(["-ano", "-p", "tcp"]).output() else { return Vec::new() };
    let text = String::from_utf8_lossy(&output.stdout);
    let suffix = format!(":{port}");
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if !line.to_uppercase().contains("LISTENING") {
                return None;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 5 {
                return None;
            }
            if parts[3].to_uppercase() != "LISTENING" || !parts[1].ends_with(&suffix) {
                return None;
            }
            parts[4].parse().ok()
        })
        .collect()
}

#[cfg(not(windows))]
pub fn list_listening_pids(_port: u16) -> Vec<u32> {
    Vec::new()
}

/// Send the platform's termination signal to a single PID.
fn terminate_pid(pid: u32) {
    #[cfg(windows)]
    {
        let _ = Command::new("taskkill").args(["/PID", &pid.to_string(), "/T", "/F"]).stdout(Stdio::null()).stderr(Stdio::null()).status();
    }
    #[cfg(not(windows))]
    {
        let _ = Command::new("kill").args(["-TERM", &pid.to_string()]).stdout(Stdio::null()).stderr(Stdio::null()).status();
    }
}

///
/// Terminate every discoverable proxy process, plus (Windows only) any
/// process still holding the target port's listening socket.
///
/// # Returns
///  * PIDs that were sent a termination signal
pub async fn terminate_proxy_processes(proxy_url: &str) -> Vec<u32> {
    let mut killed = Vec::new();
    for (pid, cmdline) in list_proxy_processes() {
        tracing::info!(pid, cmdline = %cmdline, "terminating stale proxy process");
        terminate_pid(pid);
        killed.push(pid);
    }

    let target = ProxyUrl::parse(proxy_url);
    let health = check_proxy_health(proxy_url, Duration::from_millis(200)).await;
    if is_local_host(&target.host) && health.is_some() {
        let current_pid = std::process::id();
        for pid in list_listening_pids(target.port) {
            if killed.contains(&pid) || pid == current_pid {
                continue;
            }
            tracing::info!(pid, port = target.port, "terminating process still listening on target port");
            terminate_pid(pid);
            killed.push(pid);
        }
    }
    killed
}

///
/// Spawn a detached proxy process bound to `proxy_url`'s host/port, pointed
/// at `upstream_url`. The child survives this process's exit.
///
/// # Returns
///  * `Ok(())` on a successful spawn
///  * `Err` with a diagnostic message if the binary couldn't be launched
pub fn start_proxy_process(proxy_url: &str, upstream_url: &str) -> Result<(), String> {
    let target = ProxyUrl::parse(proxy_url);
    let exe = std::env::current_exe().map_err(|e| e.to_string())?;
    tracing::info!(proxy_url, upstream_url, "spawning detached proxy process");

    let mut command = Command::new(exe);
    command
        .args(["--host", &target.host, "--port", &target.port.to_string(), "--upstream", upstream_url])
        .env("MODEL_ROUTER_PROXY_URL", proxy_url)
        .env("MODEL_ROUTER_OPENAI_BASE_URL", upstream_url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    detach(&mut command);

    command.spawn().map(|_| ()).map_err(|e| e.to_string())
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // new process group, so SIGTERM/SIGINT to this process never reaches the child
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    command.creation_flags(CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS);
}

///
/// Spawn the proxy and poll `/health` until it reports a compatible
/// capability set, or give up after [`READY_POLL_ATTEMPTS`].
pub async fn start_proxy_and_wait(proxy_url: &str, upstream_url: &str) -> Result<(), String> {
    start_proxy_process(proxy_url, upstream_url)?;
    for _ in 0..READY_POLL_ATTEMPTS {
        if let Some(health) = check_proxy_health(proxy_url, Duration::from_millis(500)).await {
            if is_proxy_compatible(&health) {
                return Ok(());
            }
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
    Err(format!("Proxy startup failed: cannot connect to {proxy_url}"))
}

///
/// Ensure a compatible proxy is reachable at `proxy_url`, starting,
/// restarting, or port-hunting as needed. Non-local URLs are left
/// untouched.
///
/// # Returns
///  * the outcome, a human-readable message, and the URL callers should
///    actually use (may differ from `proxy_url` after a port hunt)
pub async fn ensure_proxy_running(proxy_url: &str, upstream_url: &str, force_restart: bool) -> (Outcome, String, String) {
    let (outcome, message, url) = ensure_proxy_running_inner(proxy_url, upstream_url, force_restart).await;
    match outcome {
        Outcome::Failed => tracing::warn!(proxy_url, %message, "supervisor could not reach a compatible proxy"),
        Outcome::Skip => tracing::debug!(proxy_url, %message, "supervisor skipped non-local proxy URL"),
        _ => tracing::info!(proxy_url, resolved_url = %url, %message, "supervisor resolved proxy"),
    }
    (outcome, message, url)
}

async fn ensure_proxy_running_inner(proxy_url: &str, upstream_url: &str, force_restart: bool) -> (Outcome, String, String) {
    let target = ProxyUrl::parse(proxy_url);
    if !is_local_host(&target.host) {
        return (Outcome::Skip, format!("Proxy URL {proxy_url} is not local, skipping auto-start."), proxy_url.to_string());
    }

    if force_restart {
        let killed = terminate_proxy_processes(proxy_url).await;
        if !killed.is_empty() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        if start_proxy_and_wait(proxy_url, upstream_url).await.is_ok() {
            return (Outcome::Restarted, format!("Proxy restarted: {proxy_url}"), proxy_url.to_string());
        }
        for candidate in candidate_proxy_urls(&target) {
            let candidate_url = candidate.build();
            if candidate_url == proxy_url {
                continue;
            }
            if start_proxy_and_wait(&candidate_url, upstream_url).await.is_ok() {
                return (
                    Outcome::Started,
                    format!("Stopped old proxy, trying to start new one. Proxy started: {candidate_url}"),
                    candidate_url,
                );
            }
        }
        return (Outcome::Failed, format!("Proxy startup failed: cannot connect to {proxy_url}"), proxy_url.to_string());
    }

    if let Some(health) = check_proxy_health(proxy_url, Duration::from_millis(500)).await {
        if is_proxy_compatible(&health) {
            return (Outcome::Running, format!("Proxy already running: {proxy_url}"), proxy_url.to_string());
        }
        let prefix = format!("Detected old proxy: {proxy_url}, trying to start new one.");
        for candidate in candidate_proxy_urls(&target) {
            let candidate_url = candidate.build();
            if candidate_url == proxy_url {
                continue;
            }
            if let Some(candidate_health) = check_proxy_health(&candidate_url, Duration::from_millis(500)).await {
                if is_proxy_compatible(&candidate_health) {
                    return (Outcome::Running, format!("{prefix} Found available proxy: {candidate_url}"), candidate_url);
                }
                continue;
            }
            if start_proxy_and_wait(&candidate_url, upstream_url).await.is_ok() {
                return (Outcome::Started, format!("{prefix} Proxy started: {candidate_url}"), candidate_url);
            }
        }
        return (Outcome::Failed, format!("{prefix} Startup failed, please manually stop old proxy and retry."), proxy_url.to_string());
    }

    match start_proxy_and_wait(proxy_url, upstream_url).await {
        Ok(()) => (Outcome::Started, format!("Proxy started: {proxy_url}"), proxy_url.to_string()),
        Err(error) => (Outcome::Failed, error, proxy_url.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_scheme() {
        let parsed = ProxyUrl::parse("http://127.0.0.1:19000");
        assert_eq!(parsed.host, "127.0.0.1");
        assert_eq!(parsed.port, 19000);
        assert_eq!(parsed.scheme, "http");
    }

    #[test]
    fn rejects_non_local_hosts() {
        assert!(!is_local_host("example.com"));
        assert!(is_local_host("127.0.0.1"));
        assert!(is_local_host("localhost"));
    }

    #[test]
    fn candidate_urls_walk_five_ports_past_the_base() {
        let base = ProxyUrl::parse("http://127.0.0.1:19000");
        let candidates = candidate_proxy_urls(&base);
        assert_eq!(candidates.len(), 6);
        assert_eq!(candidates[0].port, 19000);
        assert_eq!(candidates[5].port, 19005);
    }

    #[test]
    fn compatibility_requires_both_capability_flags() {
        let full = serde_json::json!({"capabilities": {"supports_responses": true, "retry_on_not_chat_model": true}});
        let partial = serde_json::json!({"capabilities": {"supports_responses": true, "retry_on_not_chat_model": false}});
        assert!(is_proxy_compatible(&full));
        assert!(!is_proxy_compatible(&partial));
        assert!(!is_proxy_compatible(&serde_json::json!({})));
    }
}
