use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use serde::Serialize;

use super::error::ManifestError;

/// One validated service descriptor, ready to be launched.
///
/// Relative paths (build context, mount sources) are kept as written and
/// resolved against `manifest_dir` when the service is brought up.
#[derive(Clone, Debug)]
pub struct ServiceSpec {
    pub name: String,
    pub container_name: String,
    pub image: String,
    pub build: Option<BuildSpec>,
    pub ports: Vec<PortMapping>,
    pub mounts: Vec<BindMount>,
    pub env: Vec<EnvVar>,
    pub command: Option<Vec<String>>,
    pub manifest_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildSpec {
    pub context: PathBuf,
    pub dockerfile: String,
}

impl BuildSpec {
    pub fn new(context: impl Into<PathBuf>) -> Self {
        Self {
            context: context.into(),
            dockerfile: "Dockerfile".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl PortMapping {
    pub fn parse(entry: &str) -> Result<Self, ManifestError> {
        let invalid = |reason: &str| ManifestError::InvalidPortMapping {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };
        let (host, container) = entry
            .split_once(':')
            .ok_or_else(|| invalid("expected 'host:container'"))?;
        if container.contains(':') {
            return Err(invalid("expected 'host:container'"));
        }
        let host = host
            .parse::<u16>()
            .map_err(|_| invalid("host side is not a valid port number"))?;
        let container = container
            .parse::<u16>()
            .map_err(|_| invalid("container side is not a valid port number"))?;
        if host == 0 || container == 0 {
            return Err(invalid("port 0 is not bindable"));
        }
        Ok(Self { host, container })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn parse(entry: &str) -> Result<Self, ManifestError> {
        let invalid = |reason: &str| ManifestError::InvalidVolume {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };
        let mut parts = entry.split(':');
        let source = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("empty source path"))?;
        let target = parts.next().ok_or_else(|| invalid("expected 'source:target'"))?;
        let read_only = match parts.next() {
            None => false,
            Some("rw") => false,
            Some("ro") => true,
            Some(other) => return Err(invalid(&format!("unknown mount option '{other}'"))),
        };
        if parts.next().is_some() {
            return Err(invalid("expected 'source:target[:ro]'"));
        }
        if !target.starts_with('/') {
            return Err(invalid("container path must be absolute"));
        }
        Ok(Self {
            source: PathBuf::from(source),
            target: target.to_string(),
            read_only,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn parse(entry: &str) -> Result<Self, ManifestError> {
        let invalid = |reason: &str| ManifestError::InvalidEnvEntry {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| invalid("expected 'KEY=VALUE'"))?;
        if key.is_empty() {
            return Err(invalid("empty key"));
        }
        Ok(Self::new(key, value))
    }

    pub fn assignment(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

/// What the runtime is asked to create: the descriptor after image
/// resolution, with mount sources already absolute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerPlan {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub binds: Vec<BindMount>,
    pub env: Vec<String>,
    pub command: Option<Vec<String>>,
    pub labels: Vec<(String, String)>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ContainerSnapshot {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub launch_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct LaunchOutcome {
    pub container_id: String,
    pub image: String,
    pub built: bool,
    pub launch_id: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceStatus {
    pub service: String,
    pub container: Option<ContainerSnapshot>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogOptions {
    pub follow: bool,
    pub tail: Option<u32>,
}

#[derive(Clone, Debug)]
pub enum LogChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}
