//! [`ContainerRuntime`] backed by the `docker` command line client.

use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use api_types::ResourceKind;
use error_stack::Report;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::ContainerRuntime;
use super::ContainerState;
use super::ContainerSummary;
use super::NetworkSummary;
use super::PruneKind;
use super::RemoveOptions;
use super::RuntimeError;
use super::RuntimeResult;

const JSON_FORMAT: &str = "{{json .}}";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateJson {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ContainerJson {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Image", default)]
    image: String,
}

#[derive(Debug, Deserialize)]
struct NetworkJson {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
}

/// Drives a docker compatible CLI (`docker`, `podman`, ...).
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Runs one CLI invocation and returns its stdout.
    ///
    /// `target` names the resource the call is about so a "no such ..." failure
    /// can be reported as [`RuntimeError::NotFound`].
    fn run(
        &self,
        operation: &str,
        target: Option<(ResourceKind, &str)>,
        args: &[&str],
    ) -> RuntimeResult<String> {
        tracing::trace!(binary = %self.binary.display(), ?args, "running runtime command");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| {
                Report::new(RuntimeError::transport(operation, e.to_string()))
                    .attach_printable(format!("failed to spawn {}", self.binary.display()))
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if let Some((kind, id)) = target {
            if is_missing_message(&stderr) {
                return Err(Report::new(RuntimeError::not_found(kind, id))
                    .attach_printable(stderr));
            }
        }
        Err(Report::new(RuntimeError::transport(operation, stderr))
            .attach_printable(format!("exit status: {}", output.status)))
    }

    fn run_json_lines<T: DeserializeOwned>(
        &self,
        operation: &str,
        args: &[&str],
    ) -> RuntimeResult<Vec<T>> {
        let stdout = self.run(operation, None, args)?;
        decode_json_lines(operation, &stdout)
    }
}

fn is_missing_message(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such") || lower.contains("not found")
}

fn decode_json_lines<T: DeserializeOwned>(operation: &str, stdout: &str) -> RuntimeResult<Vec<T>> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| {
                Report::new(RuntimeError::Decode {
                    operation: operation.to_string(),
                    message: e.to_string(),
                })
                .attach_printable(line.to_string())
            })
        })
        .collect()
}

fn label_filter_args(label_filters: &[String]) -> Vec<String> {
    label_filters
        .iter()
        .flat_map(|label| ["--filter".to_string(), format!("label={label}")])
        .collect()
}

impl ContainerRuntime for DockerCli {
    fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerState> {
        let stdout = self.run(
            "inspect",
            Some((ResourceKind::Container, id)),
            &["inspect", "--type", "container", "--format", "{{json .State}}", id],
        )?;
        let state: StateJson = decode_json_lines("inspect", &stdout)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Report::new(RuntimeError::Decode {
                    operation: "inspect".to_string(),
                    message: "empty output".to_string(),
                })
            })?;
        Ok(ContainerState {
            running: state.running,
            status: state.status,
        })
    }

    fn kill_container(&self, id: &str) -> RuntimeResult<()> {
        self.run("kill", Some((ResourceKind::Container, id)), &["kill", id])
            .map(drop)
    }

    fn remove_container(&self, id: &str, options: RemoveOptions) -> RuntimeResult<()> {
        let mut args = vec!["rm"];
        if options.force {
            args.push("--force");
        }
        if options.remove_volumes {
            args.push("--volumes");
        }
        args.push(id);
        self.run("rm", Some((ResourceKind::Container, id)), &args)
            .map(drop)
    }

    fn list_containers(&self, label_filters: &[String]) -> RuntimeResult<Vec<ContainerSummary>> {
        let filters = label_filter_args(label_filters);
        let mut args = vec!["ps", "--all", "--no-trunc", "--format", JSON_FORMAT];
        args.extend(filters.iter().map(String::as_str));
        let containers: Vec<ContainerJson> = self.run_json_lines("ps", &args)?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id,
                image: c.image,
            })
            .collect())
    }

    fn list_networks_by_id(&self, id: &str) -> RuntimeResult<Vec<NetworkSummary>> {
        let id_filter = format!("id={id}");
        let networks: Vec<NetworkJson> = self.run_json_lines(
            "network ls",
            &[
                "network",
                "ls",
                "--no-trunc",
                "--filter",
                id_filter.as_str(),
                "--format",
                JSON_FORMAT,
            ],
        )?;
        Ok(networks
            .into_iter()
            .map(|n| NetworkSummary {
                id: n.id,
                name: n.name,
            })
            .collect())
    }

    fn remove_network(&self, id: &str) -> RuntimeResult<()> {
        self.run(
            "network rm",
            Some((ResourceKind::Network, id)),
            &["network", "rm", id],
        )
        .map(drop)
    }

    fn remove_image(&self, name: &str, force: bool) -> RuntimeResult<()> {
        let mut args = vec!["image", "rm"];
        if force {
            args.push("--force");
        }
        args.push(name);
        self.run("image rm", Some((ResourceKind::Image, name)), &args)
            .map(drop)
    }

    fn prune(&self, kind: PruneKind, label_filters: &[String]) -> RuntimeResult<()> {
        let object = match kind {
            PruneKind::Containers => "container",
            PruneKind::Networks => "network",
            PruneKind::Volumes => "volume",
            PruneKind::Images => "image",
        };
        let filters = label_filter_args(label_filters);
        let mut args = vec![object, "prune", "--force"];
        args.extend(filters.iter().map(String::as_str));
        let operation = format!("{object} prune");
        self.run(&operation, None, &args).map(drop)
    }
}
