//! `ConsulKv` over the agent HTTP API (`/v1/kv`).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use reskit_core::{Error, Result};
use serde::Deserialize;
use tracing::debug;

use crate::kv::{BlockingQuery, ConsulKv, KvList, KvPair};

pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8500";
const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Connection settings for [`ConsulHttpClient`].
#[derive(Debug, Clone)]
pub struct ConsulConfig {
    /// Agent base URL, e.g. `http://127.0.0.1:8500`.
    pub address: String,
    pub token: Option<String>,
    pub datacenter: Option<String>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self { address: DEFAULT_ADDRESS.to_string(), token: None, datacenter: None }
    }
}

#[derive(Debug, Clone)]
pub struct ConsulHttpClient {
    http: Client,
    config: ConsulConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireEntry {
    key: String,
    #[serde(default)]
    value: Option<String>,
    modify_index: u64,
}

/// Decode a `/v1/kv` response body; values arrive base64-encoded, `null` for empty.
pub(crate) fn decode_entries(body: &[u8]) -> Result<Vec<KvPair>> {
    let entries: Vec<WireEntry> =
        serde_json::from_slice(body).map_err(|e| Error::codec("decoding consul kv entries", e))?;
    entries
        .into_iter()
        .map(|entry| {
            let value = match entry.value {
                Some(v) => STANDARD
                    .decode(v.as_bytes())
                    .map_err(|e| Error::codec(format!("decoding value of {}", entry.key), e))?,
                None => Vec::new(),
            };
            Ok(KvPair { key: entry.key, value, modify_index: entry.modify_index })
        })
        .collect()
}

fn index_of(resp: &Response) -> u64 {
    resp.headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

impl ConsulHttpClient {
    pub fn new(config: ConsulConfig) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| Error::transport("building consul http client", e))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    fn url(&self, key: &str) -> String {
        let address = self.config.address.trim_end_matches('/');
        format!("{address}/v1/kv/{}", key.trim_start_matches('/'))
    }

    fn decorate(&self, mut req: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.config.token {
            req = req.header(TOKEN_HEADER, token);
        }
        if let Some(dc) = &self.config.datacenter {
            req = req.query(&[("dc", dc)]);
        }
        req
    }

    async fn send(&self, req: RequestBuilder, context: &str) -> Result<Response> {
        let resp =
            self.decorate(req).send().await.map_err(|e| Error::transport(context.to_string(), e))?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let detail = format!("consul returned {status}: {}", body.trim());
        Err(Error::transport(context.to_string(), detail))
    }

    async fn body(resp: Response, context: &str) -> Result<Vec<u8>> {
        resp.bytes().await.map(|b| b.to_vec()).map_err(|e| Error::transport(context.to_string(), e))
    }
}

#[async_trait::async_trait]
impl ConsulKv for ConsulHttpClient {
    async fn get(&self, key: &str) -> Result<Option<KvPair>> {
        let context = format!("consul get {key}");
        let resp = self.send(self.http.get(self.url(key)), &context).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::body(resp, &context).await?;
        Ok(decode_entries(&body)?.into_iter().find(|p| p.key == key))
    }

    async fn put_cas(&self, key: &str, value: Vec<u8>, cas: u64) -> Result<bool> {
        let context = format!("consul put {key}");
        let req = self.http.put(self.url(key)).query(&[("cas", cas)]).body(value);
        let resp = self.send(req, &context).await?;
        let body = Self::body(resp, &context).await?;
        let applied = String::from_utf8_lossy(&body).trim() == "true";
        debug!(key, cas, applied, "consul cas put");
        Ok(applied)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let context = format!("consul delete {key}");
        self.send(self.http.delete(self.url(key)), &context).await.map(|_| ())
    }

    async fn list(&self, prefix: &str, query: Option<BlockingQuery>) -> Result<KvList> {
        let context = format!("consul list {prefix}");
        let mut req = self.http.get(self.url(prefix)).query(&[("recurse", "true")]);
        if let Some(q) = query {
            let wait = format!("{}ms", q.wait.as_millis());
            req = req.query(&[("index", q.index.to_string()), ("wait", wait)]);
        }
        let resp = self.send(req, &context).await?;
        let index = index_of(&resp);
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(KvList { pairs: Vec::new(), index });
        }
        let body = Self::body(resp, &context).await?;
        Ok(KvList { pairs: decode_entries(&body)?, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_base64_values_and_null() {
        let body = br#"[
            {"Key":"root/ns/a","Value":"aGVsbG8=","ModifyIndex":12,
             "CreateIndex":3,"Flags":0,"LockIndex":0},
            {"Key":"root/ns/","Value":null,"ModifyIndex":4}
        ]"#;
        let pairs = decode_entries(body).unwrap();
        assert_eq!(pairs.len(), 2);
        let expected =
            KvPair { key: "root/ns/a".into(), value: b"hello".to_vec(), modify_index: 12 };
        assert_eq!(pairs[0], expected);
        assert!(pairs[1].value.is_empty());
    }

    #[test]
    fn bad_base64_is_a_codec_error() {
        let body = br#"[{"Key":"k","Value":"***","ModifyIndex":1}]"#;
        let err = decode_entries(body).unwrap_err();
        assert!(matches!(err, Error::Codec { .. }), "got {err:?}");
    }

    #[test]
    fn urls_join_cleanly() {
        let config = ConsulConfig { address: "http://consul:8500/".into(), ..Default::default() };
        let c = ConsulHttpClient::new(config).unwrap();
        assert_eq!(c.url("/gloo/ns/a"), "http://consul:8500/v1/kv/gloo/ns/a");
    }
}
