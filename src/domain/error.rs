use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("can't read manifest {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest {path:?} is not valid YAML: {source}")]
    Syntax {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unsupported manifest version '{0}', expected \"1\"")]
    UnsupportedVersion(String),

    #[error("manifest must declare exactly one service, found {0}")]
    ServiceCount(usize),

    #[error("invalid service or container name '{0}'")]
    InvalidName(String),

    #[error("invalid port mapping '{entry}': {reason}")]
    InvalidPortMapping { entry: String, reason: String },

    #[error("invalid volume '{entry}': {reason}")]
    InvalidVolume { entry: String, reason: String },

    #[error("invalid environment entry '{entry}': {reason}")]
    InvalidEnvEntry { entry: String, reason: String },

    #[error("duplicate environment key '{0}'")]
    DuplicateEnvKey(String),

    #[error("service '{0}' declares an empty command")]
    EmptyCommand(String),

    #[error("service '{0}' needs an image reference or a build section")]
    MissingImageAndBuild(String),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("service '{0}' has no build section to build from")]
    BuildConfigMissing(String),

    #[error("build context {0:?} does not exist")]
    BuildContextMissing(PathBuf),

    #[error("dockerfile {0:?} not found in the build context")]
    DockerfileMissing(PathBuf),

    #[error("build of image '{image}' failed: {message}")]
    Build { image: String, message: String },

    #[error("can't pull image '{image}': {message}")]
    ImagePull { image: String, message: String },

    #[error("host port {0} is already in use")]
    PortConflict(u16),

    #[error("container name '{0}' is already in use, remove the existing container first")]
    NameConflict(String),

    #[error("mount source {0:?} is missing or inaccessible on the host")]
    MountSourceMissing(PathBuf),

    #[error("service container '{0}' does not exist")]
    NotRunning(String),

    #[error("docker api error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
