//! HTTP implementation of the remote service
//!
//! Endpoints per protocol generation:
//!
//! | Operation | Legacy | Modern |
//! |---|---|---|
//! | check registration | `GET /v1/systems/{id}` | `GET /inventory/v1/hosts?machine_id={id}` |
//! | register | `POST /v1/systems` | `POST /v1/systems` |
//! | unregister | `DELETE /v1/systems/{id}` | `DELETE /inventory/v1/hosts/{id}` |
//! | upload | `POST /v1/uploads/{id}` | `POST /ingress/v1/upload` |
//! | rules | `GET /v1/static/uploader.v2.json` | same |

use async_trait::async_trait;
use hostwatch_core::{
    AgentConfig, ArchiveArtifact, CollectionRules, HostwatchError, ProtocolGeneration, Result,
    UploadResponse,
};
use hostwatch_state::{MachineIdentity, StateStore};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::auth::{resolve_credentials, Credentials};
use crate::service::RemoteService;

const DURATION_HEADER: &str = "x-collection-duration";
const ARCHIVE_FILE_NAME: &str = "hostwatch-archive.tar.gz";

/// Map an upload status to a typed failure, or pass it through as a response
///
/// Legacy servers answer 412 for hosts they no longer know; modern servers
/// answer 415 for archives of the wrong type. Each generation only maps its own
/// code, any other status is returned for the caller to judge.
pub fn classify_upload_status(
    generation: ProtocolGeneration,
    status: u16,
    body: String,
) -> Result<UploadResponse> {
    match (generation, status) {
        (_, 413) => Err(HostwatchError::PayloadTooLarge),
        (ProtocolGeneration::Legacy, 412) => Err(HostwatchError::Unregistered),
        (ProtocolGeneration::Modern, 415) => Err(HostwatchError::InvalidContentType(body)),
        _ => Ok(UploadResponse::new(status, body)),
    }
}

#[derive(Debug, Deserialize)]
struct LegacySystem {
    #[serde(default)]
    unregistered_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HostList {
    #[serde(default)]
    total: u64,
}

/// Remote service over HTTPS
#[derive(Clone)]
pub struct HttpRemoteService {
    client: Client,
    base_url: String,
    generation: ProtocolGeneration,
    credentials: Option<Credentials>,
    store: StateStore,
    host_name: String,
}

impl HttpRemoteService {
    /// Build a client for `config`, reading the machine id from `store`
    ///
    /// Missing BASIC credentials are not an error here: they are only required
    /// by registration, which checks them itself before calling the network.
    pub fn new(config: &AgentConfig, store: StateStore) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("hostwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HostwatchError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            generation: config.protocol(),
            credentials: resolve_credentials(config).ok(),
            store,
            host_name: config.host_name(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn machine_id(&self) -> Result<MachineIdentity> {
        MachineIdentity::resolve(&self.store, false)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(Credentials::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            _ => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<(u16, String)> {
        let response = self.authorize(request).send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        debug!("HTTP status {}", status);
        Ok((status, body))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> HostwatchError {
    if e.is_timeout() {
        HostwatchError::Timeout
    } else {
        HostwatchError::Transport(e.to_string())
    }
}

fn expect_success(status: u16, body: String) -> Result<String> {
    if (200..300).contains(&status) {
        Ok(body)
    } else {
        Err(HostwatchError::Status { status, body })
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    #[instrument(skip(self), fields(generation = %self.generation))]
    async fn check_registration(&self) -> Result<bool> {
        let id = self.machine_id()?;
        match self.generation {
            ProtocolGeneration::Legacy => {
                let (status, body) = self
                    .send(self.client.get(self.url(&format!("/v1/systems/{}", id))))
                    .await?;
                if status == StatusCode::NOT_FOUND.as_u16() {
                    return Ok(false);
                }
                let body = expect_success(status, body)?;
                let system: LegacySystem = serde_json::from_str(&body)?;
                Ok(system.unregistered_at.is_none())
            }
            ProtocolGeneration::Modern => {
                let (status, body) = self
                    .send(
                        self.client
                            .get(self.url("/inventory/v1/hosts"))
                            .query(&[("machine_id", id.as_str())]),
                    )
                    .await?;
                let body = expect_success(status, body)?;
                let hosts: HostList = serde_json::from_str(&body)?;
                Ok(hosts.total > 0)
            }
        }
    }

    #[instrument(skip(self))]
    async fn register(&self) -> Result<()> {
        let id = self.machine_id()?;
        let payload = serde_json::json!({
            "machine_id": id.as_str(),
            "hostname": self.host_name,
        });
        let (status, body) = self
            .send(self.client.post(self.url("/v1/systems")).json(&payload))
            .await?;
        expect_success(status, body)?;
        Ok(())
    }

    #[instrument(skip(self), fields(generation = %self.generation))]
    async fn unregister(&self) -> Result<bool> {
        let id = self.machine_id()?;
        let path = match self.generation {
            ProtocolGeneration::Legacy => format!("/v1/systems/{}", id),
            ProtocolGeneration::Modern => format!("/inventory/v1/hosts/{}", id),
        };
        let (status, body) = self.send(self.client.delete(self.url(&path))).await?;
        if (200..300).contains(&status) {
            Ok(true)
        } else {
            debug!("Unregistration refused with status {}: {}", status, body);
            Ok(false)
        }
    }

    #[instrument(skip(self, artifact), fields(generation = %self.generation, size = artifact.len()))]
    async fn upload_archive(
        &self,
        artifact: &ArchiveArtifact,
        content_type: &str,
        duration_hint: Option<Duration>,
    ) -> Result<UploadResponse> {
        let mut part = Part::bytes(artifact.bytes.clone()).file_name(ARCHIVE_FILE_NAME);
        if !content_type.is_empty() {
            part = part
                .mime_str(content_type)
                .map_err(|e| HostwatchError::InvalidContentType(e.to_string()))?;
        }
        let form = Form::new().part("file", part);

        let path = match self.generation {
            ProtocolGeneration::Legacy => format!("/v1/uploads/{}", self.machine_id()?),
            ProtocolGeneration::Modern => "/ingress/v1/upload".to_string(),
        };

        let mut request = self.client.post(self.url(&path)).multipart(form);
        if let Some(duration) = duration_hint {
            request = request.header(DURATION_HEADER, duration.as_secs_f64().to_string());
        }

        let (status, body) = self.send(request).await?;
        classify_upload_status(self.generation, status, body)
    }

    #[instrument(skip(self))]
    async fn fetch_collection_rules(&self) -> Result<CollectionRules> {
        let (status, body) = self
            .send(self.client.get(self.url("/v1/static/uploader.v2.json")))
            .await?;
        let body = expect_success(status, body)?;
        let document: serde_json::Value = serde_json::from_str(&body)?;
        let version = document
            .get("version")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(CollectionRules { version, document })
    }
}
