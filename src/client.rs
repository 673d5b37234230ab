//! C2: typed wrappers over the agent's HTTP API. Pure translator between
//! domain values and HTTP — no retry, no backoff, no state beyond the
//! immutable `{endpoint, token, transport}` triple.

use crate::domain::{DiscoveryTuple, Service, Status};
use crate::error::Error;
use crate::transport::{Method, Param, Transport, TransportRequest};
use std::sync::Arc;

/// Filters for the `services` discovery endpoint.
///
/// Preserves an observable quirk of the source this crate was ported
/// from: setting `passing_only` collapses the query to the bare
/// `?passing` flag and drops every other accumulated filter, rather than
/// combining with them. Do not "fix" this without confirming the agent's
/// behavior changed too — callers may depend on the current semantics.
#[derive(Debug, Clone, Default)]
pub struct ServiceFilters {
    /// `near=true` sorts by estimated RTT from the agent (`near=_agent`).
    pub near: bool,
    pub tag: Option<String>,
    pub dc: Option<String>,
    pub passing_only: bool,
}

impl ServiceFilters {
    fn to_params(&self) -> Vec<Param> {
        if self.passing_only {
            return vec![("passing".to_string(), None)];
        }
        let mut params = Vec::new();
        if self.near {
            params.push(("near".to_string(), Some("_agent".to_string())));
        }
        if let Some(tag) = &self.tag {
            params.push(("tag".to_string(), Some(tag.clone())));
        }
        if let Some(dc) = &self.dc {
            params.push(("dc".to_string(), Some(dc.clone())));
        }
        params
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionCreateOptions {
    pub lock_delay: Option<String>,
    pub ttl: Option<String>,
    pub behavior: Option<String>,
}

/// Holds `{endpoint, token, transport}`. Cheap to clone (transport is an
/// `Arc`); freely shareable across Announce Units, matching the
/// immutable-and-shared resource policy in the concurrency model.
#[derive(Clone)]
pub struct AgentClient {
    endpoint: String,
    token: Option<String>,
    transport: Arc<dyn Transport>,
}

impl AgentClient {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, transport: Arc<dyn Transport>) -> Self {
        AgentClient {
            endpoint: endpoint.into(),
            token,
            transport,
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Injects `token=<token>` into `params`, but only if the caller hasn't
    /// already supplied one — the caller's token always wins.
    fn with_token(&self, mut params: Vec<Param>) -> Vec<Param> {
        if let Some(token) = &self.token {
            let already_present = params.iter().any(|(name, _)| name == "token");
            if !already_present {
                params.push(("token".to_string(), Some(token.clone())));
            }
        }
        params
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        params: Vec<Param>,
    ) -> Result<crate::transport::TransportResponse, Error> {
        let params = self.with_token(params);
        let mut request = TransportRequest::new(method, self.url_for(path))
            .params(params)
            .header("Accept", "application/json");
        if let Some(bytes) = body {
            request = request.header("Content-Type", "application/json").body(bytes);
        }
        self.transport.call(request).await
    }

    async fn send_expecting_ok(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        params: Vec<Param>,
    ) -> Result<crate::transport::TransportResponse, Error> {
        let response = self.send(method, path, body, params).await?;
        if response.status != 200 {
            return Err(Error::http(response.status, response.headers, response.payload));
        }
        Ok(response)
    }

    /// `PUT /v1/agent/service/register`
    pub async fn service_register(&self, service: &Service) -> Result<(), Error> {
        let body = serde_json::to_vec(&service.dump())?;
        self.send_expecting_ok(Method::Put, "/v1/agent/service/register", Some(body), Vec::new())
            .await?;
        Ok(())
    }

    /// `POST /v1/agent/service/deregister/{id}`
    pub async fn service_deregister(&self, id: &str) -> Result<(), Error> {
        let path = format!("/v1/agent/service/deregister/{}", id);
        self.send_expecting_ok(Method::Post, &path, None, Vec::new()).await?;
        Ok(())
    }

    /// `PUT /v1/agent/check/update/{check_id}`. `Error::NotFound` if
    /// `service` carries neither `id` nor `name` and so has no check id.
    pub async fn check_update(&self, service: &Service, status: &Status) -> Result<(), Error> {
        let check_id = service.check_id().ok_or(Error::NotFound)?;
        let path = format!("/v1/agent/check/update/{}", check_id);
        let body = serde_json::to_vec(&status.dump())?;
        self.send_expecting_ok(Method::Put, &path, Some(body), Vec::new())
            .await?;
        Ok(())
    }

    /// `GET /v1/health/service/{name}`
    pub async fn services(
        &self,
        name: &str,
        filters: &ServiceFilters,
    ) -> Result<Vec<DiscoveryTuple>, Error> {
        let path = format!("/v1/health/service/{}", name);
        let response = self
            .send_expecting_ok(Method::Get, &path, None, filters.to_params())
            .await?;
        let value: serde_json::Value = serde_json::from_slice(&response.payload)?;
        crate::domain::parse_discovery_tuples(name, &value)
    }

    /// `PUT /v1/session/create`
    pub async fn session_create(&self, opts: &SessionCreateOptions) -> Result<String, Error> {
        let body = serde_json::json!({
            "LockDelay": opts.lock_delay,
            "TTL": opts.ttl,
            "Behavior": opts.behavior,
        });
        let response = self
            .send_expecting_ok(Method::Put, "/v1/session/create", Some(serde_json::to_vec(&body)?), Vec::new())
            .await?;
        let value: serde_json::Value = serde_json::from_slice(&response.payload)?;
        value
            .get("ID")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Driver("session create response missing ID".to_string()))
    }

    /// `PUT /v1/session/renew/{id}`
    pub async fn session_renew(&self, id: &str) -> Result<(), Error> {
        let path = format!("/v1/session/renew/{}", id);
        self.send_expecting_ok(Method::Put, &path, None, Vec::new()).await?;
        Ok(())
    }

    /// `PUT /v1/session/destroy/{id}`
    pub async fn session_destroy(&self, id: &str) -> Result<(), Error> {
        let path = format!("/v1/session/destroy/{}", id);
        self.send_expecting_ok(Method::Put, &path, None, Vec::new()).await?;
        Ok(())
    }

    /// `GET /v1/session/info/{id}`. `Error::NotFound` when the agent
    /// replies with a `null` or empty-array payload (a destroyed or
    /// unknown session looks like that, not like an HTTP error).
    pub async fn session_info(
        &self,
        id: &str,
    ) -> Result<(serde_json::Value, Vec<(String, String)>), Error> {
        let path = format!("/v1/session/info/{}", id);
        let response = self.send_expecting_ok(Method::Get, &path, None, Vec::new()).await?;
        let value: serde_json::Value = serde_json::from_slice(&response.payload)?;
        let is_empty = value.is_null() || matches!(&value, serde_json::Value::Array(a) if a.is_empty());
        if is_empty {
            return Err(Error::NotFound);
        }
        let consul_headers = response
            .headers
            .into_iter()
            .filter(|(name, _)| name.to_ascii_lowercase().starts_with("x-consul-"))
            .collect();
        Ok((value, consul_headers))
    }

    /// `PUT /v1/kv/{key}`
    pub async fn kv_put(&self, key: &str, body: Vec<u8>) -> Result<serde_json::Value, Error> {
        let path = format!("/v1/kv/{}", key);
        let response = self.send_expecting_ok(Method::Put, &path, Some(body), Vec::new()).await?;
        Ok(serde_json::from_slice(&response.payload)?)
    }

    /// `GET /v1/kv/{key}`
    pub async fn kv_get(&self, key: &str) -> Result<serde_json::Value, Error> {
        let path = format!("/v1/kv/{}", key);
        let response = self.send_expecting_ok(Method::Get, &path, None, Vec::new()).await?;
        Ok(serde_json::from_slice(&response.payload)?)
    }

    /// `DELETE /v1/kv/{key}`
    pub async fn kv_delete(&self, key: &str) -> Result<(), Error> {
        let path = format!("/v1/kv/{}", key);
        self.send_expecting_ok(Method::Delete, &path, None, Vec::new()).await?;
        Ok(())
    }
}
