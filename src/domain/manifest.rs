use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::Deserialize;
use serde_yaml::Value;

use super::error::ManifestError;
use super::model::{BindMount, BuildSpec, EnvVar, PortMapping, ServiceSpec};

pub const SUPPORTED_VERSION: &str = "1";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    version: Value,
    services: BTreeMap<String, ServiceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceEntry {
    build: Option<BuildEntry>,
    image: Option<String>,
    container_name: Option<String>,
    #[serde(default)]
    ports: Vec<String>,
    #[serde(default)]
    volumes: Vec<String>,
    environment: Option<EnvEntry>,
    command: Option<CommandEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BuildEntry {
    Context(String),
    Detailed {
        context: String,
        dockerfile: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnvEntry {
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandEntry {
    Argv(Vec<String>),
    Line(String),
}

/// Read and validate the service manifest at `path`.
pub fn load(path: &Path) -> Result<ServiceSpec, ManifestError> {
    let text = fs::read_to_string(path).map_err(|source| ManifestError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    parse_named(&text, &manifest_dir, path)
}

/// Parse manifest text, resolving relative paths against `manifest_dir`.
pub fn parse(text: &str, manifest_dir: &Path) -> Result<ServiceSpec, ManifestError> {
    parse_named(text, manifest_dir, Path::new("<inline>"))
}

fn parse_named(text: &str, manifest_dir: &Path, origin: &Path) -> Result<ServiceSpec, ManifestError> {
    let file: ManifestFile = serde_yaml::from_str(text).map_err(|source| ManifestError::Syntax {
        path: origin.to_path_buf(),
        source,
    })?;
    into_spec(file, manifest_dir)
}

fn into_spec(file: ManifestFile, manifest_dir: &Path) -> Result<ServiceSpec, ManifestError> {
    let version = scalar_string(&file.version)
        .ok_or_else(|| ManifestError::UnsupportedVersion(format!("{:?}", file.version)))?;
    if version != SUPPORTED_VERSION {
        return Err(ManifestError::UnsupportedVersion(version));
    }

    let count = file.services.len();
    let Some((name, entry)) = file.services.into_iter().next() else {
        return Err(ManifestError::ServiceCount(0));
    };
    if count != 1 {
        return Err(ManifestError::ServiceCount(count));
    }
    if !is_valid_name(&name) {
        return Err(ManifestError::InvalidName(name));
    }

    let container_name = entry.container_name.unwrap_or_else(|| name.clone());
    if !is_valid_name(&container_name) {
        return Err(ManifestError::InvalidName(container_name));
    }

    let build = entry.build.map(|build| match build {
        BuildEntry::Context(context) => BuildSpec::new(context),
        BuildEntry::Detailed { context, dockerfile } => BuildSpec {
            context: PathBuf::from(context),
            dockerfile: dockerfile.unwrap_or_else(|| "Dockerfile".to_string()),
        },
    });

    let image = match entry.image.filter(|image| !image.trim().is_empty()) {
        Some(image) => image,
        None if build.is_some() => format!("{name}:latest"),
        None => return Err(ManifestError::MissingImageAndBuild(name)),
    };

    let ports = entry
        .ports
        .iter()
        .map(|entry| PortMapping::parse(entry))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(port) = ports.iter().map(|mapping| mapping.host).duplicates().next() {
        return Err(ManifestError::InvalidPortMapping {
            entry: port.to_string(),
            reason: "host port mapped more than once".to_string(),
        });
    }

    let mounts = entry
        .volumes
        .iter()
        .map(|entry| BindMount::parse(entry))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(target) = mounts.iter().map(|mount| mount.target.as_str()).duplicates().next() {
        return Err(ManifestError::InvalidVolume {
            entry: target.to_string(),
            reason: "container path mounted more than once".to_string(),
        });
    }

    let env = match entry.environment {
        None => Vec::new(),
        Some(EnvEntry::List(entries)) => entries
            .iter()
            .map(|entry| EnvVar::parse(entry))
            .collect::<Result<Vec<_>, _>>()?,
        Some(EnvEntry::Map(map)) => map
            .into_iter()
            .map(|(key, value)| env_from_pair(key, value))
            .collect::<Result<Vec<_>, _>>()?,
    };
    if let Some(key) = env.iter().map(|var| var.key.as_str()).duplicates().next() {
        return Err(ManifestError::DuplicateEnvKey(key.to_string()));
    }

    let command = match entry.command {
        None => None,
        Some(CommandEntry::Argv(argv)) => Some(argv),
        Some(CommandEntry::Line(line)) => {
            Some(line.split_whitespace().map(str::to_string).collect())
        }
    };
    if let Some(argv) = &command {
        if argv.is_empty() {
            return Err(ManifestError::EmptyCommand(name));
        }
    }

    Ok(ServiceSpec {
        name,
        container_name,
        image,
        build,
        ports,
        mounts,
        env,
        command,
        manifest_dir: manifest_dir.to_path_buf(),
    })
}

fn env_from_pair(key: String, value: Value) -> Result<EnvVar, ManifestError> {
    if key.is_empty() || key.contains('=') {
        return Err(ManifestError::InvalidEnvEntry {
            entry: key,
            reason: "invalid key".to_string(),
        });
    }
    let value = match value {
        Value::Null => String::new(),
        other => scalar_string(&other).ok_or_else(|| ManifestError::InvalidEnvEntry {
            entry: key.clone(),
            reason: "value must be a scalar".to_string(),
        })?,
    };
    Ok(EnvVar::new(key, value))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

// Docker's rule: first character alphanumeric, then [a-zA-Z0-9_.-].
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        _ => false,
    }
}
