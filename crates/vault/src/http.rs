//! `VaultKv` over the Vault HTTP API.

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use reskit_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::kv::{SecretData, VaultKv};

pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8200";
const TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub address: String,
    pub token: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self { address: DEFAULT_ADDRESS.to_string(), token: None }
    }
}

#[derive(Debug, Clone)]
pub struct VaultHttpClient {
    http: Client,
    config: VaultConfig,
    list: Method,
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
    #[serde(default)]
    data: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    keys: Vec<String>,
}

/// Flatten secret fields to strings; non-string JSON values keep their JSON text.
pub(crate) fn decode_secret(body: &[u8]) -> Result<SecretData> {
    let resp: SecretResponse =
        serde_json::from_slice(body).map_err(|e| Error::codec("decoding vault secret", e))?;
    Ok(resp
        .data
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

pub(crate) fn decode_keys(body: &[u8]) -> Result<Vec<String>> {
    let resp: ListResponse =
        serde_json::from_slice(body).map_err(|e| Error::codec("decoding vault key list", e))?;
    Ok(resp.data.keys)
}

impl VaultHttpClient {
    pub fn new(config: VaultConfig) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| Error::transport("building vault http client", e))?;
        let list = Method::from_bytes(b"LIST")
            .map_err(|e| Error::Internal(format!("LIST method: {e}")))?;
        Ok(Self { http, config, list })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.address.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn send(&self, mut req: RequestBuilder, context: String) -> Result<Option<Response>> {
        if let Some(token) = &self.config.token {
            req = req.header(TOKEN_HEADER, token);
        }
        let resp = req.send().await.map_err(|e| Error::transport(context.clone(), e))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_success() {
            return Ok(Some(resp));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::transport(context, format!("vault returned {status}: {}", body.trim())))
    }

    async fn body(resp: Response, context: &str) -> Result<Vec<u8>> {
        resp.bytes().await.map(|b| b.to_vec()).map_err(|e| Error::transport(context.to_string(), e))
    }
}

#[async_trait::async_trait]
impl VaultKv for VaultHttpClient {
    async fn read(&self, path: &str) -> Result<Option<SecretData>> {
        let context = format!("vault read {path}");
        match self.send(self.http.get(self.url(path)), context.clone()).await? {
            Some(resp) => decode_secret(&Self::body(resp, &context).await?).map(Some),
            None => Ok(None),
        }
    }

    async fn write(&self, path: &str, data: SecretData) -> Result<()> {
        let context = format!("vault write {path}");
        self.send(self.http.post(self.url(path)).json(&data), context).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let context = format!("vault delete {path}");
        self.send(self.http.delete(self.url(path)), context).await.map(|_| ())
    }

    async fn list_keys(&self, path: &str) -> Result<Vec<String>> {
        let context = format!("vault list {path}");
        let req = self.http.request(self.list.clone(), self.url(path));
        match self.send(req, context.clone()).await? {
            Some(resp) => decode_keys(&Self::body(resp, &context).await?),
            None => Ok(Vec::new()),
        }
    }
}
