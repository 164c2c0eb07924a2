use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use log::{info, warn};
use uuid::Uuid;

pub mod error;
pub mod manifest;
pub mod model;
pub mod port;

use error::LaunchError;
use model::{
    BindMount, BuildSpec, ContainerPlan, EnvVar, LaunchOutcome, LogOptions, ServiceSpec,
    ServiceStatus,
};
use port::{ContainerRuntime, LogStream};

pub const SERVICE_LABEL: &str = "dockhand.service";
pub const LAUNCH_ID_LABEL: &str = "dockhand.launch-id";

pub struct Launcher {
    pub runtime: Box<dyn ContainerRuntime + 'static + Sync + Send>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UpOptions {
    pub build: bool,
}

/// Bring the service up: resolve the image, create the container with its
/// ports, mounts, environment and command override, and start it.
pub async fn up(
    launcher: &Launcher,
    spec: &ServiceSpec,
    options: UpOptions,
) -> Result<LaunchOutcome, LaunchError> {
    if launcher
        .runtime
        .find_container(&spec.container_name)
        .await?
        .is_some()
    {
        return Err(LaunchError::NameConflict(spec.container_name.clone()));
    }
    for mapping in &spec.ports {
        ensure_host_port_free(mapping.host)?;
    }
    let binds = resolve_mounts(spec)?;
    let (image, built) = resolve_image(launcher, spec, options.build).await?;

    let launch_id = Uuid::new_v4().to_string();
    let plan = ContainerPlan {
        name: spec.container_name.clone(),
        image,
        ports: spec.ports.clone(),
        binds,
        env: spec.env.iter().map(EnvVar::assignment).collect(),
        command: spec.command.clone(),
        labels: vec![
            (SERVICE_LABEL.to_string(), spec.name.clone()),
            (LAUNCH_ID_LABEL.to_string(), launch_id.clone()),
        ],
    };

    let container_id = launcher.runtime.create_container(&plan).await?;
    info!("Created container {}", container_id);
    if let Err(err) = launcher.runtime.start_container(&container_id).await {
        warn!("Start of {} failed, removing the created container", container_id);
        if let Err(cleanup) = launcher.runtime.remove_container(&container_id).await {
            warn!("Can't remove container {} after failed start: {}", container_id, cleanup);
        }
        return Err(classify_start_error(err, &plan));
    }
    for mapping in &spec.ports {
        info!("Service {} published on {}", spec.name, mapping);
    }
    Ok(LaunchOutcome {
        container_id,
        image: plan.image,
        built,
        launch_id,
    })
}

/// Stop and remove the service container.
pub async fn down(launcher: &Launcher, spec: &ServiceSpec) -> Result<(), LaunchError> {
    match launcher.runtime.find_container(&spec.container_name).await? {
        Some(container) => {
            launcher.runtime.remove_container(&container.id).await?;
            info!("Removed container {}", spec.container_name);
            Ok(())
        }
        None => Err(LaunchError::NotRunning(spec.container_name.clone())),
    }
}

pub async fn status(launcher: &Launcher, spec: &ServiceSpec) -> Result<ServiceStatus, LaunchError> {
    let container = launcher.runtime.find_container(&spec.container_name).await?;
    Ok(ServiceStatus {
        service: spec.name.clone(),
        container,
    })
}

pub async fn logs(
    launcher: &Launcher,
    spec: &ServiceSpec,
    options: LogOptions,
) -> Result<LogStream, LaunchError> {
    if launcher
        .runtime
        .find_container(&spec.container_name)
        .await?
        .is_none()
    {
        return Err(LaunchError::NotRunning(spec.container_name.clone()));
    }
    launcher.runtime.container_logs(&spec.container_name, options).await
}

// The plan always carries the manifest's image reference; the id the engine
// reports for a build or pull is only logged.
async fn resolve_image(
    launcher: &Launcher,
    spec: &ServiceSpec,
    force_build: bool,
) -> Result<(String, bool), LaunchError> {
    if force_build {
        let build = spec
            .build
            .as_ref()
            .ok_or_else(|| LaunchError::BuildConfigMissing(spec.name.clone()))?;
        let image_id = run_build(launcher, spec, build).await?;
        info!("Image {} built ({})", spec.image, image_id);
        return Ok((spec.image.clone(), true));
    }
    if launcher.runtime.image_present(&spec.image).await? {
        return Ok((spec.image.clone(), false));
    }
    match &spec.build {
        Some(build) => {
            let image_id = run_build(launcher, spec, build).await?;
            info!("Image {} built ({})", spec.image, image_id);
            Ok((spec.image.clone(), true))
        }
        None => {
            info!("Pull image {}", spec.image);
            let image_id = launcher.runtime.pull_image(&spec.image).await?;
            info!("Image {} pulled ({})", spec.image, image_id);
            Ok((spec.image.clone(), false))
        }
    }
}

async fn run_build(
    launcher: &Launcher,
    spec: &ServiceSpec,
    build: &BuildSpec,
) -> Result<String, LaunchError> {
    let context = resolve_path(&spec.manifest_dir, &build.context);
    if !context.is_dir() {
        return Err(LaunchError::BuildContextMissing(context));
    }
    let dockerfile = context.join(&build.dockerfile);
    if !dockerfile.is_file() {
        return Err(LaunchError::DockerfileMissing(dockerfile));
    }
    let resolved = BuildSpec {
        context,
        dockerfile: build.dockerfile.clone(),
    };
    launcher.runtime.build_image(&resolved, &spec.image).await
}

fn resolve_mounts(spec: &ServiceSpec) -> Result<Vec<BindMount>, LaunchError> {
    spec.mounts
        .iter()
        .map(|mount| {
            let source = resolve_path(&spec.manifest_dir, &mount.source);
            let source = source
                .canonicalize()
                .map_err(|_| LaunchError::MountSourceMissing(source))?;
            Ok(BindMount {
                source,
                target: mount.target.clone(),
                read_only: mount.read_only,
            })
        })
        .collect()
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn ensure_host_port_free(port: u16) -> Result<(), LaunchError> {
    match TcpListener::bind(("0.0.0.0", port)) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AddrInUse => Err(LaunchError::PortConflict(port)),
        // Privileged ports can refuse the probe without CAP_NET_BIND_SERVICE;
        // the daemon still validates the binding on start.
        Err(_) => Ok(()),
    }
}

// TODO map the daemon's structured error once bollard exposes one instead of
// matching the message text.
fn classify_start_error(err: LaunchError, plan: &ContainerPlan) -> LaunchError {
    if let LaunchError::Docker(ref source) = err {
        let message = source.to_string();
        if message.contains("port is already allocated") {
            // The daemon reports "Bind for 0.0.0.0:<port> failed"; match the
            // terminated form so 4321 does not claim a failure on 43210.
            let mapping = plan
                .ports
                .iter()
                .find(|mapping| message.contains(&format!(":{} failed", mapping.host)))
                .or_else(|| plan.ports.first());
            if let Some(mapping) = mapping {
                return LaunchError::PortConflict(mapping.host);
            }
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupied_port_fails_the_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(matches!(
            ensure_host_port_free(port),
            Err(LaunchError::PortConflict(p)) if p == port
        ));
    }

    #[test]
    fn free_port_passes_the_probe() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(ensure_host_port_free(port).is_ok());
    }

    #[test]
    fn relative_paths_resolve_against_the_base() {
        assert_eq!(
            resolve_path(Path::new("/srv/app"), Path::new("./src")),
            PathBuf::from("/srv/app/./src")
        );
        assert_eq!(
            resolve_path(Path::new("/srv/app"), Path::new("/data")),
            PathBuf::from("/data")
        );
    }

    #[test]
    fn port_allocation_failures_are_classified() {
        let plan = ContainerPlan {
            name: "web".to_string(),
            image: "web:1".to_string(),
            ports: vec![model::PortMapping { host: 8080, container: 80 }],
            binds: vec![],
            env: vec![],
            command: None,
            labels: vec![],
        };
        let err = LaunchError::Docker(bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "driver failed programming external connectivity: Bind for 0.0.0.0:8080 failed: port is already allocated".to_string(),
        });
        assert!(matches!(
            classify_start_error(err, &plan),
            LaunchError::PortConflict(8080)
        ));

        let other = LaunchError::Docker(bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "some other failure".to_string(),
        });
        assert!(matches!(classify_start_error(other, &plan), LaunchError::Docker(_)));
    }

    #[test]
    fn conflict_is_blamed_on_the_exact_port() {
        // 4321 is a string prefix of 43210; the classifier must not let the
        // shorter port claim the longer port's failure text.
        let plan = ContainerPlan {
            name: "web".to_string(),
            image: "web:1".to_string(),
            ports: vec![
                model::PortMapping { host: 4321, container: 80 },
                model::PortMapping { host: 43210, container: 81 },
            ],
            binds: vec![],
            env: vec![],
            command: None,
            labels: vec![],
        };
        let err = LaunchError::Docker(bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "driver failed programming external connectivity on endpoint web: Bind for 0.0.0.0:43210 failed: port is already allocated".to_string(),
        });
        assert!(matches!(
            classify_start_error(err, &plan),
            LaunchError::PortConflict(43210)
        ));
    }
}
