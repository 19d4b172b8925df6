//! Host telemetry collection.
//!
//! One `collect()` call produces a full report. Every section is probed
//! independently; a failing section becomes `{"error": ...}` in the
//! report and charges the error budget, but never aborts the cycle.

use std::collections::BTreeMap;
use std::os::unix::fs::MetadataExt;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{
    CpuExt, DiskExt, NetworkExt, NetworksExt, PidExt, ProcessExt, ProcessStatus, System,
    SystemExt, UserExt,
};

use super::config::AgentConfig;
use super::probes::{
    command_line_count, command_output_contains, grep_count, probe, run_command, ErrorBudget,
    Probe, SUSPICIOUS_PORTS, SUSPICIOUS_PROCESS_RE,
};

const AUTH_LOG: &str = "/var/log/auth.log";
const SYSLOG: &str = "/var/log/syslog";
const CRITICAL_FILES: [&str; 4] = ["/etc/passwd", "/etc/shadow", "/etc/hosts", "/etc/hostname"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub terminal: String,
    pub host: String,
    /// Login time as epoch seconds, zero when unreadable.
    pub started: i64,
    pub pid: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersSection {
    pub total_users: usize,
    pub users: Vec<SessionInfo>,
    pub monitoring_scope: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    pub failed_login_attempts: u64,
    pub successful_logins: u64,
    pub user_changes: u64,
    pub privilege_escalation: u64,
    pub ssh_key_changes: u64,
    pub account_lockouts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub user: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub cmdline: String,
    pub is_root: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSection {
    pub total_processes: usize,
    pub root_processes: usize,
    pub top_cpu_processes: Vec<ProcessInfo>,
    pub top_memory_processes: Vec<ProcessInfo>,
    pub load_average: [f64; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub open_ports: u64,
    pub suspicious_connections: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mtime: i64,
    pub mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIntegritySection {
    pub critical_files: BTreeMap<String, FileStat>,
    pub recently_modified: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    pub installed_packages_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemLogsSection {
    pub syslog_entries: u64,
    pub auth_entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySection {
    pub selinux_status: bool,
    pub firewall_status: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSection {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub zombie_processes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareSection {
    pub connected_devices: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSection {
    /// Boot time as epoch seconds.
    pub uptime: u64,
    pub scheduled_tasks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalySection {
    pub suspicious_processes: u64,
    pub unusual_connections: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtherSection {
    pub dns_requests: u64,
    pub container_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentErrors {
    pub total_errors: u32,
    pub high_error_rate: bool,
}

/// One collection cycle's full fact set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub timestamp: String,
    pub hostname: String,
    pub users_logged_in: Probe<UsersSection>,
    pub authentication: Probe<AuthSection>,
    pub process_system_activity: Probe<ProcessSection>,
    pub network_connection: Probe<NetworkSection>,
    pub file_directory_integrity: Probe<FileIntegritySection>,
    pub package_software_integrity: Probe<PackageSection>,
    pub system_logs_audit: Probe<SystemLogsSection>,
    pub security_tools: Probe<SecuritySection>,
    pub resource_anomalies: Probe<ResourceSection>,
    pub hardware_peripheral_security: Probe<HardwareSection>,
    pub environment_configuration: Probe<EnvironmentSection>,
    pub anomaly_threat_detection: Probe<AnomalySection>,
    pub other: Probe<OtherSection>,
    pub agent_errors: AgentErrors,
}

pub struct Collector {
    config: AgentConfig,
    system: System,
}

impl Collector {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            system: System::new_all(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.probe_timeout_secs)
    }

    /// Refresh the system view and probe every section.
    pub fn collect(&mut self, budget: &mut ErrorBudget) -> TelemetryReport {
        self.system.refresh_all();

        let users_logged_in = probe(budget, self.collect_sessions());
        let authentication = probe(budget, Ok(self.collect_authentication()));
        let process_system_activity = probe(budget, self.collect_processes());
        let network_connection = probe(budget, Ok(self.collect_network()));
        let file_directory_integrity = probe(budget, Ok(self.collect_file_integrity()));
        let package_software_integrity = probe(budget, Ok(self.collect_packages()));
        let system_logs_audit = probe(budget, Ok(self.collect_system_logs()));
        let security_tools = probe(budget, Ok(self.collect_security_tools()));
        let resource_anomalies = probe(budget, self.collect_resources());
        let hardware_peripheral_security = probe(budget, Ok(self.collect_hardware()));
        let environment_configuration = probe(budget, Ok(self.collect_environment()));
        let anomaly_threat_detection = probe(budget, Ok(self.collect_anomalies()));
        let other = probe(budget, Ok(self.collect_other()));

        TelemetryReport {
            timestamp: Utc::now().to_rfc3339(),
            hostname: self.config.hostname.clone(),
            users_logged_in,
            authentication,
            process_system_activity,
            network_connection,
            file_directory_integrity,
            package_software_integrity,
            system_logs_audit,
            security_tools,
            resource_anomalies,
            hardware_peripheral_security,
            environment_configuration,
            anomaly_threat_detection,
            other,
            agent_errors: AgentErrors {
                total_errors: budget.count(),
                high_error_rate: budget.exhausted(),
            },
        }
    }

    fn collect_sessions(&self) -> anyhow::Result<UsersSection> {
        let output =
            run_command("who", &["-u"], self.timeout()).context("listing login sessions")?;
        let users: Vec<SessionInfo> = parse_who_output(&output)
            .into_iter()
            .filter(|s| self.config.user_in_scope(&s.name))
            .collect();
        Ok(UsersSection {
            total_users: users.len(),
            users,
            monitoring_scope: self.config.monitoring_scope(),
        })
    }

    fn collect_authentication(&self) -> AuthSection {
        let t = self.timeout();
        AuthSection {
            failed_login_attempts: grep_count("Failed", AUTH_LOG, t),
            successful_logins: grep_count("Accepted", AUTH_LOG, t),
            user_changes: grep_count("useradd\\|usermod", AUTH_LOG, t),
            privilege_escalation: grep_count("sudo:", AUTH_LOG, t),
            ssh_key_changes: grep_count("ssh-key", AUTH_LOG, t),
            account_lockouts: grep_count("account locked", AUTH_LOG, t),
        }
    }

    fn collect_processes(&self) -> anyhow::Result<ProcessSection> {
        let total_memory = self.system.total_memory();
        let mut processes: Vec<ProcessInfo> = Vec::new();
        for (pid, process) in self.system.processes() {
            let user = process
                .user_id()
                .and_then(|uid| self.system.get_user_by_id(uid))
                .map(|u| u.name().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            if !self.config.user_in_scope(&user) {
                continue;
            }
            let memory_percent = if total_memory > 0 {
                process.memory() as f64 / total_memory as f64 * 100.0
            } else {
                0.0
            };
            processes.push(ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string(),
                user: user.clone(),
                cpu_percent: process.cpu_usage() as f64,
                memory_percent,
                cmdline: process.cmd().join(" "),
                is_root: user == "root",
            });
        }

        let mut top_cpu = processes.clone();
        top_cpu.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
        top_cpu.truncate(5);
        let mut top_memory = processes.clone();
        top_memory.sort_by(|a, b| b.memory_percent.total_cmp(&a.memory_percent));
        top_memory.truncate(5);

        let load = self.system.load_average();
        Ok(ProcessSection {
            total_processes: processes.len(),
            root_processes: processes.iter().filter(|p| p.is_root).count(),
            top_cpu_processes: top_cpu,
            top_memory_processes: top_memory,
            load_average: [load.one, load.five, load.fifteen],
        })
    }

    fn collect_network(&self) -> NetworkSection {
        let mut bytes_sent = 0;
        let mut bytes_recv = 0;
        for (_name, data) in self.system.networks().iter() {
            bytes_sent += data.total_transmitted();
            bytes_recv += data.total_received();
        }

        let t = self.timeout();
        let suspicious_connections = match run_command("ss", &["-ntu"], t) {
            Ok(output) => count_suspicious_peers(&output),
            Err(_) => 0,
        };
        NetworkSection {
            bytes_sent,
            bytes_recv,
            open_ports: command_line_count("ss", &["-tuln"], t),
            suspicious_connections,
        }
    }

    fn collect_file_integrity(&self) -> FileIntegritySection {
        let mut critical_files = BTreeMap::new();
        for path in CRITICAL_FILES {
            if let Ok(meta) = std::fs::metadata(path) {
                critical_files.insert(
                    path.to_string(),
                    FileStat {
                        size: meta.len(),
                        mtime: meta.mtime(),
                        mode: meta.mode(),
                    },
                );
            }
        }
        FileIntegritySection {
            critical_files,
            recently_modified: command_line_count(
                "find",
                &["/etc", "-type", "f", "-mtime", "-1"],
                self.timeout(),
            ),
        }
    }

    fn collect_packages(&self) -> PackageSection {
        let count = match run_command(
            "dpkg-query",
            &["-W", "-f=${Package} ${Version} ${Status}\n"],
            self.timeout(),
        ) {
            Ok(output) => output
                .lines()
                .filter(|l| l.contains("install ok installed"))
                .count() as u64,
            Err(_) => 0,
        };
        PackageSection {
            installed_packages_count: count,
        }
    }

    fn collect_system_logs(&self) -> SystemLogsSection {
        let t = self.timeout();
        SystemLogsSection {
            syslog_entries: command_line_count("tail", &["-50", SYSLOG], t),
            auth_entries: command_line_count("tail", &["-50", AUTH_LOG], t),
        }
    }

    fn collect_security_tools(&self) -> SecuritySection {
        let t = self.timeout();
        SecuritySection {
            selinux_status: command_output_contains("sestatus", &[], "enabled", t),
            firewall_status: command_output_contains("ufw", &["status"], "active", t),
        }
    }

    fn collect_resources(&self) -> anyhow::Result<ResourceSection> {
        let total_memory = self.system.total_memory();
        let memory_percent = if total_memory > 0 {
            self.system.used_memory() as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        // Prefer the root filesystem; fall back to aggregating every disk.
        let (disk_total, disk_avail) = self
            .system
            .disks()
            .iter()
            .find(|d| d.mount_point() == std::path::Path::new("/"))
            .map(|d| (d.total_space(), d.available_space()))
            .unwrap_or_else(|| {
                self.system
                    .disks()
                    .iter()
                    .fold((0, 0), |(t, a), d| (t + d.total_space(), a + d.available_space()))
            });
        let disk_percent = if disk_total > 0 {
            (disk_total - disk_avail) as f64 / disk_total as f64 * 100.0
        } else {
            0.0
        };

        let mut disk_read_bytes = 0;
        let mut disk_write_bytes = 0;
        let mut zombie_processes = 0;
        for process in self.system.processes().values() {
            let usage = process.disk_usage();
            disk_read_bytes += usage.total_read_bytes;
            disk_write_bytes += usage.total_written_bytes;
            if process.status() == ProcessStatus::Zombie {
                zombie_processes += 1;
            }
        }

        Ok(ResourceSection {
            cpu_percent: self.system.global_cpu_info().cpu_usage() as f64,
            memory_percent,
            disk_percent,
            disk_read_bytes,
            disk_write_bytes,
            zombie_processes,
        })
    }

    fn collect_hardware(&self) -> HardwareSection {
        HardwareSection {
            connected_devices: command_line_count("lsusb", &[], self.timeout()),
        }
    }

    fn collect_environment(&self) -> EnvironmentSection {
        EnvironmentSection {
            uptime: self.system.boot_time(),
            scheduled_tasks: command_line_count("crontab", &["-l"], self.timeout()),
        }
    }

    fn collect_anomalies(&self) -> AnomalySection {
        let suspicious_processes = self
            .system
            .processes()
            .values()
            .filter(|p| SUSPICIOUS_PROCESS_RE.is_match(p.name()))
            .count() as u64;
        let unusual_connections = match run_command("ss", &["-ntu"], self.timeout()) {
            Ok(output) => count_suspicious_peers(&output),
            Err(_) => 0,
        };
        AnomalySection {
            suspicious_processes,
            unusual_connections,
        }
    }

    fn collect_other(&self) -> OtherSection {
        let t = self.timeout();
        OtherSection {
            dns_requests: command_line_count("systemd-resolve", &["--statistics"], t),
            container_count: command_line_count("docker", &["ps", "-q"], t),
        }
    }
}

/// Parse `who -u` lines. Expected shape:
/// `alice  pts/0  2026-08-26 09:58  .  4242 (10.0.0.9)`
pub(crate) fn parse_who_output(output: &str) -> Vec<SessionInfo> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                return None;
            }
            let started = NaiveDateTime::parse_from_str(
                &format!("{} {}", parts[2], parts[3]),
                "%Y-%m-%d %H:%M",
            )
            .map(|naive| Utc.from_utc_datetime(&naive).timestamp())
            .unwrap_or(0);
            let pid = parts[5].parse().unwrap_or(0);
            let host = parts
                .get(6)
                .map(|h| h.trim_start_matches('(').trim_end_matches(')').to_string())
                .unwrap_or_default();
            Some(SessionInfo {
                name: parts[0].to_string(),
                terminal: parts[1].to_string(),
                host,
                started,
                pid,
            })
        })
        .collect()
}

/// Count `ss -ntu` rows whose peer port is on the suspicious list.
pub(crate) fn count_suspicious_peers(output: &str) -> u64 {
    output
        .lines()
        .filter_map(|line| {
            let peer = line.split_whitespace().last()?;
            let port: u16 = peer.rsplit(':').next()?.parse().ok()?;
            SUSPICIOUS_PORTS.contains(&port).then_some(())
        })
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::test_support::test_config;

    #[test]
    fn test_parse_who_output() {
        let output = "\
alice    pts/0        2026-08-26 09:58   .          4242 (10.0.0.9)
bob      tty1         2026-08-26 08:00  00:12       5151
short line\n";
        let sessions = parse_who_output(output);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].name, "alice");
        assert_eq!(sessions[0].terminal, "pts/0");
        assert_eq!(sessions[0].host, "10.0.0.9");
        assert_eq!(sessions[0].pid, 4242);
        assert!(sessions[0].started > 0);
        assert_eq!(sessions[1].host, "");
    }

    #[test]
    fn test_count_suspicious_peers() {
        let output = "\
Netid State  Recv-Q Send-Q Local Address:Port  Peer Address:Port
tcp   ESTAB  0      0      10.0.0.5:51000      93.184.216.34:443
tcp   ESTAB  0      0      10.0.0.5:51001      203.0.113.7:4444
tcp   ESTAB  0      0      10.0.0.5:51002      203.0.113.7:1337\n";
        assert_eq!(count_suspicious_peers(output), 2);
    }

    #[test]
    fn test_collect_produces_full_report() {
        let mut collector = Collector::new(test_config("web-01"));
        let mut budget = ErrorBudget::new(100);
        let report = collector.collect(&mut budget);

        assert_eq!(report.hostname, "web-01");
        let resources = report.resource_anomalies.value().expect("resource probe");
        assert!(resources.memory_percent >= 0.0 && resources.memory_percent <= 100.0);
        let processes = report.process_system_activity.value().expect("process probe");
        assert!(processes.total_processes > 0);
        assert!(processes.top_cpu_processes.len() <= 5);

        // The report serializes with every section present.
        let value = serde_json::to_value(&report).unwrap();
        for section in [
            "users_logged_in",
            "authentication",
            "resource_anomalies",
            "anomaly_threat_detection",
            "agent_errors",
        ] {
            assert!(value.get(section).is_some(), "missing section {}", section);
        }
    }

    #[test]
    fn test_scope_filters_process_list() {
        let mut config = test_config("web-01");
        config.monitor_all_users = false;
        config.specific_user = Some("no-such-user-on-this-host".to_string());
        let mut collector = Collector::new(config);
        let mut budget = ErrorBudget::new(100);
        let report = collector.collect(&mut budget);
        let processes = report.process_system_activity.value().expect("process probe");
        assert_eq!(processes.total_processes, 0);
    }
}
