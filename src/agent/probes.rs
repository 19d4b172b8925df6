//! Probe primitives: fallible section results, error accounting, and
//! external command execution with a timeout.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use lazy_static::lazy_static;
use log::{debug, error};
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// Process names that warrant a closer look.
    pub static ref SUSPICIOUS_PROCESS_RE: Regex =
        Regex::new(r"(?i)(miner|backdoor|shell|reverse)").expect("static pattern");
}

/// Remote ports commonly used by reverse shells and toy C2 servers.
pub const SUSPICIOUS_PORTS: [u16; 4] = [4444, 1337, 31337, 9999];

/// Result of one collection section. A failed probe still serializes into
/// the report, as `{"error": "..."}` in place of the section body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Probe<T> {
    Ok(T),
    Failed { error: String },
}

impl<T> Probe<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Probe::Failed { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Probe::Ok(v) => Some(v),
            Probe::Failed { .. } => None,
        }
    }
}

/// Running tally of agent-side failures. The budget survives across
/// cycles and is reset only by a successful upload; exhausting it stops
/// the agent.
#[derive(Debug)]
pub struct ErrorBudget {
    count: u32,
    max: u32,
}

impl ErrorBudget {
    pub fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    pub fn record(&mut self, message: &str) {
        self.count += 1;
        error!("AGENT_ERROR count={} message={}", self.count, message);
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn exhausted(&self) -> bool {
        self.count > self.max
    }
}

/// Convert a section result into a probe, charging failures to the budget.
pub fn probe<T>(budget: &mut ErrorBudget, result: anyhow::Result<T>) -> Probe<T> {
    match result {
        Ok(value) => Probe::Ok(value),
        Err(err) => {
            let error = format!("{:#}", err);
            budget.record(&error);
            Probe::Failed { error }
        }
    }
}

/// Run an external command and capture stdout, killing the child if it
/// exceeds `timeout`. Stdout is drained on a separate thread so a chatty
/// child cannot deadlock on a full pipe.
pub fn run_command(program: &str, args: &[&str], timeout: Duration) -> anyhow::Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawning {}", program))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("no stdout handle for {}", program))?;
    let reader = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stdout.read_to_string(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait().context("waiting for child")? {
            break status;
        }
        if Instant::now() >= deadline {
            kill_child(&mut child, program);
            let _ = reader.join();
            return Err(anyhow!("{} timed out after {:?}", program, timeout));
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let output = reader
        .join()
        .map_err(|_| anyhow!("stdout reader panicked for {}", program))?;
    if !status.success() {
        debug!(
            "COMMAND_NONZERO program={} status={:?} bytes={}",
            program,
            status.code(),
            output.len()
        );
    }
    Ok(output)
}

fn kill_child(child: &mut Child, program: &str) {
    if let Err(err) = child.kill() {
        error!("COMMAND_KILL_FAILED program={} error={}", program, err);
    }
    let _ = child.wait();
}

/// Count the lines a command prints, treating any failure as zero. Log
/// greps on absent files are a normal condition, not an agent error.
pub fn command_line_count(program: &str, args: &[&str], timeout: Duration) -> u64 {
    match run_command(program, args, timeout) {
        Ok(output) => output.lines().count() as u64,
        Err(err) => {
            debug!("COMMAND_PROBE_EMPTY program={} error={:#}", program, err);
            0
        }
    }
}

/// Line count of `grep <pattern> <file>`, zero when nothing matches or
/// the file is missing.
pub fn grep_count(pattern: &str, file: &str, timeout: Duration) -> u64 {
    command_line_count("grep", &[pattern, file], timeout)
}

/// Whether a command's output contains `needle`, case-insensitive.
pub fn command_output_contains(
    program: &str,
    args: &[&str],
    needle: &str,
    timeout: Duration,
) -> bool {
    match run_command(program, args, timeout) {
        Ok(output) => output.to_lowercase().contains(needle),
        Err(_) => false,
    }
}
