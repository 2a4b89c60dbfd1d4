//! Restarting the serving containers before a test case
//!
//! Every configured host is restarted in order; loopback hosts are restarted
//! with a local command, everything else over SSH. One host failing does not
//! stop the others.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::clock::StopFlag;
use crate::command::{self, CommandSpec};
use crate::config::{BenchConfig, HostConfig};
use crate::error::LifecycleError;

pub const LOCAL_RESTART_TIMEOUT: Duration = Duration::from_secs(30);
pub const REMOTE_RESTART_TIMEOUT: Duration = Duration::from_secs(60);

/// Whether `ip` names this machine
pub fn is_loopback(ip: &str) -> bool {
    matches!(ip.trim(), "127.0.0.1" | "localhost")
}

/// Where a restart command runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartTarget {
    Local,
    Remote { ip: String, user: String, port: u16 },
}

/// A fully built restart command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPlan {
    pub target: RestartTarget,
    pub command: CommandSpec,
    pub timeout: Duration,
}

/// Brings the service under test back to a fresh state
pub trait ServiceRestarter {
    /// Restart every instance; true only if all of them succeeded
    fn restart_all(&self) -> bool;
}

/// Restarts containers with local commands or over SSH
pub struct ServiceController {
    container_name: String,
    restart_cmd: String,
    ssh_cmd: String,
    hosts: Vec<HostConfig>,
    local_timeout: Duration,
    remote_timeout: Duration,
    stop: StopFlag,
}

impl ServiceController {
    pub fn new(config: &BenchConfig, stop: StopFlag) -> Self {
        Self {
            container_name: config.container_name.clone(),
            restart_cmd: config.restart_cmd.clone(),
            ssh_cmd: config.ssh_cmd.clone(),
            hosts: config.hosts.clone(),
            local_timeout: LOCAL_RESTART_TIMEOUT,
            remote_timeout: REMOTE_RESTART_TIMEOUT,
            stop,
        }
    }

    /// Override the restart timeouts
    pub fn with_timeouts(mut self, local: Duration, remote: Duration) -> Self {
        self.local_timeout = local;
        self.remote_timeout = remote;
        self
    }

    /// Restart command for the container on this machine
    pub fn local_plan(&self) -> Result<RestartPlan, LifecycleError> {
        let command = CommandSpec::from_template(
            &self.restart_cmd,
            &[("container_name", self.container_name.as_str())],
        )?;
        Ok(RestartPlan {
            target: RestartTarget::Local,
            command,
            timeout: self.local_timeout,
        })
    }

    /// Restart command for `host`, routed locally for loopback addresses
    pub fn plan_for(&self, host: &HostConfig) -> Result<RestartPlan, LifecycleError> {
        if is_loopback(&host.ip) {
            return self.local_plan();
        }

        // The remote shell parses this string, so the container name is quoted.
        let quoted = shlex::try_quote(&self.container_name)
            .map_err(|_| LifecycleError::Quote(self.container_name.clone()))?;
        let remote_cmd = command::substitute(
            &self.restart_cmd,
            &self.restart_cmd,
            &[("container_name", quoted.as_ref())],
        )?;

        let port = host.port.to_string();
        let command = CommandSpec::from_template(
            &self.ssh_cmd,
            &[
                ("port", port.as_str()),
                ("user", host.user.as_str()),
                ("ip", host.ip.as_str()),
                ("cmd", remote_cmd.as_str()),
            ],
        )?;

        Ok(RestartPlan {
            target: RestartTarget::Remote {
                ip: host.ip.clone(),
                user: host.user.clone(),
                port: host.port,
            },
            command,
            timeout: self.remote_timeout,
        })
    }

    /// Execute one plan, logging the outcome
    pub fn execute(&self, plan: &RestartPlan) -> bool {
        let location = match &plan.target {
            RestartTarget::Local => "local".to_string(),
            RestartTarget::Remote { ip, user, port } => format!("{}@{}:{}", user, ip, port),
        };
        info!(container = %self.container_name, host = %location, "Restarting container");

        match command::run_checked(&plan.command, plan.timeout, &self.stop) {
            Ok(()) => {
                info!(host = %location, "Container restarted");
                true
            }
            Err(LifecycleError::Timeout(t)) => {
                error!(host = %location, "Restart timed out after {}s", t.as_secs());
                false
            }
            Err(e) => {
                error!(host = %location, command = %plan.command.display(), "Restart failed: {}", e);
                false
            }
        }
    }

    /// Restart the container on this machine
    pub fn restart_local(&self) -> bool {
        match self.local_plan() {
            Ok(plan) => self.execute(&plan),
            Err(e) => {
                error!("Cannot build local restart command: {}", e);
                false
            }
        }
    }

    /// Restart the container on `host`
    pub fn restart_host(&self, host: &HostConfig) -> bool {
        match self.plan_for(host) {
            Ok(plan) => self.execute(&plan),
            Err(e) => {
                error!(host = %host.ip, "Cannot build restart command: {}", e);
                false
            }
        }
    }
}

impl ServiceRestarter for ServiceController {
    fn restart_all(&self) -> bool {
        if self.hosts.is_empty() {
            warn!("No hosts configured, restarting the local container only");
            return self.restart_local();
        }

        let total = self.hosts.len();
        let mut success = true;
        for (i, host) in self.hosts.iter().enumerate() {
            if self.stop.is_triggered() {
                return false;
            }
            info!(host = %host.ip, "Restart progress: {}/{}", i + 1, total);
            if !self.restart_host(host) {
                success = false;
            }
        }

        if success {
            info!("All {} hosts restarted", total);
        } else {
            warn!("Restart finished but some hosts failed");
        }
        success
    }
}
