use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::DirectorResult;
use crate::error::Error;
use crate::task::{TaskClientRequest, TaskHandle};

/// Narrow view of the BOSH Director used by the migration commands.
pub trait Director: Send + Sync {
    fn info(&self) -> DirectorResult<Info>;

    fn deployments(&self) -> DirectorResult<Vec<DeploymentSummary>>;

    /// Fails with [`Error::DeploymentNotFound`] when the Director does not know it.
    fn find_deployment(&self, name: &str) -> DirectorResult<Box<dyn Deployment>>;

    fn task(&self, id: u64) -> DirectorResult<TaskHandle>;

    fn with_context(&self, context_id: &str) -> Box<dyn Director>;
}

pub trait Deployment: Send + Sync {
    fn name(&self) -> &str;

    fn manifest(&self) -> DirectorResult<String>;

    fn vm_infos(&self) -> DirectorResult<Vec<VmInfo>>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub cpi: Option<String>,
    #[serde(default)]
    pub user_authentication: UserAuthentication,
}

impl Info {
    pub fn auth_type(&self) -> &str {
        &self.user_authentication.kind
    }

    pub fn is_uaa(&self) -> bool {
        self.auth_type() == "uaa"
    }

    pub fn uaa_url(&self) -> Option<&str> {
        self.user_authentication
            .options
            .get("url")
            .and_then(serde_json::Value::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct UserAuthentication {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DeploymentSummary {
    pub name: String,
    #[serde(default)]
    pub releases: Vec<NameVersion>,
    #[serde(default)]
    pub stemcells: Vec<NameVersion>,
    #[serde(default)]
    pub teams: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NameVersion {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct VmProcess {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
}

/// One record of `GET /deployments/{name}/vms?format=full`.
#[derive(Clone, Debug, PartialEq)]
pub struct VmInfo {
    pub agent_id: String,
    pub job_name: Option<String>,
    pub id: String,
    pub index: Option<u32>,
    pub process_state: String,
    pub bootstrap: bool,
    pub ips: Vec<String>,
    pub dns: Vec<String>,
    pub az: Option<String>,
    pub vm_id: Option<String>,
    pub vm_type: String,
    pub disk_ids: Vec<String>,
    pub ignore: bool,
    pub stemcell: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub processes: Vec<VmProcess>,
}

impl VmInfo {
    pub fn is_running(&self) -> bool {
        self.process_state == "running"
    }
}

#[derive(Deserialize)]
struct RawVmInfo {
    #[serde(default)]
    agent_id: String,
    #[serde(default)]
    job_name: Option<String>,
    #[serde(default)]
    id: String,
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    process_state: String,
    #[serde(default)]
    bootstrap: bool,
    #[serde(default)]
    ips: Vec<String>,
    #[serde(default)]
    dns: Vec<String>,
    #[serde(default)]
    az: Option<String>,
    #[serde(default, rename = "vm_cid")]
    vm_id: Option<String>,
    #[serde(default)]
    vm_type: String,
    #[serde(default, rename = "disk_cid")]
    disk_id: Option<String>,
    #[serde(default, rename = "disk_cids")]
    disk_ids: Vec<String>,
    #[serde(default)]
    ignore: bool,
    #[serde(default, rename = "stemcell_name")]
    stemcell: Option<String>,
    #[serde(default, rename = "vm_created_at")]
    created_at: String,
    #[serde(default)]
    processes: Vec<VmProcess>,
}

impl RawVmInfo {
    fn into_vm_info(self) -> DirectorResult<VmInfo> {
        let mut disk_ids = self.disk_ids;
        if disk_ids.is_empty()
            && let Some(disk_id) = self.disk_id.filter(|id| !id.is_empty())
        {
            disk_ids.push(disk_id);
        }

        let created_at = if self.created_at.is_empty() {
            None
        } else {
            let parsed = DateTime::parse_from_rfc3339(&self.created_at).map_err(|source| {
                Error::InvalidTimestamp {
                    field: "vm_created_at",
                    value: self.created_at.clone(),
                    source,
                }
            })?;
            Some(parsed.with_timezone(&Utc))
        };

        Ok(VmInfo {
            agent_id: self.agent_id,
            job_name: self.job_name,
            id: self.id,
            index: self.index,
            process_state: self.process_state,
            bootstrap: self.bootstrap,
            ips: self.ips,
            dns: self.dns,
            az: self.az,
            vm_id: self.vm_id,
            vm_type: self.vm_type,
            disk_ids,
            ignore: self.ignore,
            stemcell: self.stemcell,
            created_at,
            processes: self.processes,
        })
    }
}

/// Parses the newline-delimited JSON returned as a `vms` task result.
pub fn parse_vm_infos(result: &[u8]) -> DirectorResult<Vec<VmInfo>> {
    let mut vms = Vec::new();
    for line in result.split(|byte| *byte == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let raw: RawVmInfo =
            serde_json::from_slice(line).map_err(|source| Error::Deserialize {
                source,
                body: String::from_utf8_lossy(line).into_owned(),
            })?;
        vms.push(raw.into_vm_info()?);
    }
    Ok(vms)
}

#[derive(Clone, Debug)]
pub struct DirectorClient {
    tasks: TaskClientRequest,
}

impl DirectorClient {
    pub fn new(tasks: TaskClientRequest) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &TaskClientRequest {
        &self.tasks
    }

    pub fn endpoint(&self) -> &str {
        self.tasks.client_request().endpoint()
    }
}

impl Director for DirectorClient {
    fn info(&self) -> DirectorResult<Info> {
        self.tasks.client_request().get("/info")
    }

    fn deployments(&self) -> DirectorResult<Vec<DeploymentSummary>> {
        self.tasks
            .client_request()
            .get("/deployments?exclude_configs=true")
    }

    fn find_deployment(&self, name: &str) -> DirectorResult<Box<dyn Deployment>> {
        if !self.deployments()?.iter().any(|summary| summary.name == name) {
            return Err(Error::DeploymentNotFound {
                name: name.to_owned(),
            });
        }
        Ok(Box::new(DirectorDeployment {
            name: name.to_owned(),
            tasks: self.tasks.clone(),
        }))
    }

    fn task(&self, id: u64) -> DirectorResult<TaskHandle> {
        self.tasks.task(id)
    }

    fn with_context(&self, context_id: &str) -> Box<dyn Director> {
        Box::new(Self {
            tasks: self.tasks.with_context(context_id),
        })
    }
}

#[derive(Deserialize)]
struct ManifestResponse {
    #[serde(default)]
    manifest: String,
}

#[derive(Clone, Debug)]
pub struct DirectorDeployment {
    name: String,
    tasks: TaskClientRequest,
}

impl Deployment for DirectorDeployment {
    fn name(&self) -> &str {
        &self.name
    }

    fn manifest(&self) -> DirectorResult<String> {
        let response: ManifestResponse = self
            .tasks
            .client_request()
            .get(&format!("/deployments/{}", self.name))?;
        Ok(response.manifest)
    }

    fn vm_infos(&self) -> DirectorResult<Vec<VmInfo>> {
        let result = self
            .tasks
            .get_result(&format!("/deployments/{}/vms?format=full", self.name))?;
        parse_vm_infos(&result)
    }
}
