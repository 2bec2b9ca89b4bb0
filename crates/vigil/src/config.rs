//! vigil.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use vigil_core::{
    parse_duration, CheckConfig, SubjectKind, SubjectSnapshot, SubjectSource, SubjectState, Target,
};
use vigil_probe::{Factory, IcmpMode, Prober, ProberKind, DEFAULT_TCP_FALLBACK_PORT};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Timeout for subjects that set none, e.g. "5s".
    pub default_timeout: Option<String>,
    /// Operator override; anything but "" or "HEALTHY" degrades health.
    #[serde(default)]
    pub custom_status: String,
    #[serde(default)]
    pub subjects: Vec<SubjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectConfig {
    pub name: String,
    #[serde(default)]
    pub kind: SubjectKind,
    #[serde(default = "default_state")]
    pub state: SubjectState,
    pub probe: String,
    pub network: Option<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub status_code: u16,
    pub interval: Option<String>,
    pub timeout: Option<String>,
    pub success_threshold: Option<u32>,
    pub failure_threshold: Option<u32>,
    pub icmp_mode: Option<String>,
    pub icmp_port: Option<u16>,
    pub udp_payload: Option<String>,
    #[serde(default)]
    pub tls: bool,
}

fn default_state() -> SubjectState {
    SubjectState::Listening
}

impl VigilConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: VigilConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn default_timeout(&self) -> anyhow::Result<Duration> {
        match &self.default_timeout {
            Some(s) => duration_field("default_timeout", s),
            None => Ok(vigil_core::DEFAULT_TIMEOUT),
        }
    }

    /// Check every subject. Fails on the first invalid one.
    pub fn validate(&self) -> anyhow::Result<()> {
        let default_timeout = self.default_timeout()?;
        let mut seen = std::collections::HashSet::new();
        for subject in &self.subjects {
            if !seen.insert(subject.name.as_str()) {
                bail!("duplicate subject name: {}", subject.name);
            }
            subject
                .validate(default_timeout)
                .with_context(|| format!("subject {}", subject.name))?;
        }
        Ok(())
    }
}

impl SubjectConfig {
    pub fn validate(&self, default_timeout: Duration) -> anyhow::Result<()> {
        if self.name.is_empty() {
            bail!("subject name must not be empty");
        }
        let kind = self.prober_kind()?;
        self.check_config(default_timeout)?.validate()?;

        match kind {
            ProberKind::Exec if self.command.is_empty() => bail!("exec probe needs a command"),
            ProberKind::Exec => {}
            _ if self.address.is_empty() => bail!("{kind} probe needs an address"),
            _ => {}
        }
        if let Some(mode) = &self.icmp_mode {
            mode.parse::<IcmpMode>()?;
        }
        Ok(())
    }

    pub fn prober_kind(&self) -> anyhow::Result<ProberKind> {
        Ok(self.probe.parse::<ProberKind>()?)
    }

    /// Thresholds and timing, with defaults for anything unset. An unset
    /// timeout takes `default_timeout`.
    pub fn check_config(&self, default_timeout: Duration) -> anyhow::Result<CheckConfig> {
        let timeout = match &self.timeout {
            Some(s) => duration_field("timeout", s)?,
            None => default_timeout,
        };
        let mut config = CheckConfig::new().with_timeout(timeout);
        if let Some(s) = &self.interval {
            config = config.with_interval(duration_field("interval", s)?);
        }
        if let Some(n) = self.success_threshold {
            config = config.with_success_threshold(n);
        }
        if let Some(n) = self.failure_threshold {
            config = config.with_failure_threshold(n);
        }
        Ok(config)
    }

    pub fn target(&self) -> Target {
        let network = match (&self.network, self.probe.as_str()) {
            (Some(n), _) => n.clone(),
            (None, "udp") => "udp".to_string(),
            (None, "icmp") => "icmp".to_string(),
            (None, _) => "tcp".to_string(),
        };
        Target {
            network,
            address: self.address.clone(),
            path: self.path.clone(),
            service: self.service.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            method: self.method.clone(),
            status_code: self.status_code,
        }
    }

    /// Build this subject's prober, honoring per-kind options.
    pub fn build_prober(&self, factory: &Factory) -> anyhow::Result<Prober> {
        let timeout = self.check_config(factory.default_timeout())?.timeout;

        let prober = match self.prober_kind()? {
            ProberKind::Udp => match &self.udp_payload {
                Some(payload) => Prober::Udp(factory.create_udp_with_payload(timeout, payload.as_bytes())),
                None => Prober::Udp(factory.create_udp(timeout)),
            },
            ProberKind::Grpc if self.tls => Prober::Grpc(factory.create_secure_grpc(timeout)),
            ProberKind::Icmp => {
                let mode = match &self.icmp_mode {
                    Some(m) => m.parse::<IcmpMode>()?,
                    None => IcmpMode::Auto,
                };
                let port = self.icmp_port.unwrap_or(DEFAULT_TCP_FALLBACK_PORT);
                Prober::Icmp(factory.create_icmp_with(timeout, mode, port))
            }
            kind => factory.create_kind(kind, timeout),
        };
        Ok(prober)
    }
}

impl SubjectSource for SubjectConfig {
    fn snapshot(&self) -> SubjectSnapshot {
        SubjectSnapshot::new(self.name.clone(), self.kind, self.state)
    }
}

fn duration_field(field: &str, value: &str) -> anyhow::Result<Duration> {
    match parse_duration(value) {
        Some(d) => Ok(d),
        None => bail!("invalid duration for {field}: {value:?}"),
    }
}
