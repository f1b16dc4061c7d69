//! Route resolution: actor identity to connect address

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::{BenchError, Result};

/// Maps identities to the address of the server node holding them
#[async_trait]
pub trait RouteResolver: Send + Sync {
    async fn resolve(&self, identities: &[String]) -> Result<HashMap<String, String>>;
}

/// Resolve every identity, failing if any is left without an address
pub async fn resolve_all(
    resolver: &dyn RouteResolver,
    identities: &[String],
) -> Result<HashMap<String, String>> {
    let routes = resolver.resolve(identities).await?;

    let missing: Vec<String> = identities
        .iter()
        .filter(|id| !routes.contains_key(*id))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if !missing.is_empty() {
        return Err(BenchError::Routing { missing });
    }

    let nodes: BTreeSet<&String> = routes.values().collect();
    info!(
        identities = identities.len(),
        nodes = nodes.len(),
        "Resolved routes"
    );
    Ok(routes)
}

/// Which address of a route record to connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrKind {
    Tcp,
    #[default]
    Ws,
    Wss,
}

/// One server node and the identities it serves
#[derive(Debug, Clone, Deserialize)]
pub struct RouteRecord {
    #[serde(default)]
    pub uids: Vec<String>,
    #[serde(default)]
    pub tcp_addr: String,
    #[serde(default)]
    pub ws_addr: String,
    #[serde(default)]
    pub wss_addr: String,
}

impl RouteRecord {
    fn addr(&self, kind: AddrKind) -> &str {
        match kind {
            AddrKind::Tcp => &self.tcp_addr,
            AddrKind::Ws => &self.ws_addr,
            AddrKind::Wss => &self.wss_addr,
        }
    }
}

/// Flatten route records into an identity to address map
pub fn flatten_routes(records: &[RouteRecord], kind: AddrKind) -> HashMap<String, String> {
    let mut routes = HashMap::new();
    for record in records {
        let addr = record.addr(kind);
        if addr.is_empty() {
            continue;
        }
        for uid in &record.uids {
            routes.insert(uid.clone(), addr.to_string());
        }
    }
    routes
}

/// Resolves routes with `POST {base_url}/route/batch`
pub struct HttpRouteResolver {
    client: reqwest::Client,
    base_url: String,
    kind: AddrKind,
}

impl HttpRouteResolver {
    pub fn new(base_url: impl Into<String>, kind: AddrKind) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            kind,
        }
    }
}

#[async_trait]
impl RouteResolver for HttpRouteResolver {
    async fn resolve(&self, identities: &[String]) -> Result<HashMap<String, String>> {
        let url = format!("{}/route/batch", self.base_url);
        debug!(%url, count = identities.len(), "Requesting routes");

        let resp = self
            .client
            .post(&url)
            .json(identities)
            .send()
            .await
            .map_err(|e| BenchError::RouteRequest(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(BenchError::RouteRequest(format!(
                "HTTP {} from {}",
                resp.status(),
                url
            )));
        }

        let records: Vec<RouteRecord> = resp
            .json()
            .await
            .map_err(|e| BenchError::RouteRequest(e.to_string()))?;

        Ok(flatten_routes(&records, self.kind))
    }
}

/// Routes every identity to one fixed address, with optional overrides
#[derive(Debug, Default)]
pub struct StaticRouteResolver {
    default_addr: Option<String>,
    overrides: HashMap<String, String>,
    requests: Mutex<Vec<Vec<String>>>,
}

impl StaticRouteResolver {
    pub fn new(default_addr: impl Into<String>) -> Self {
        Self {
            default_addr: Some(default_addr.into()),
            ..Default::default()
        }
    }

    /// Resolver that only knows the given identities
    pub fn with_routes(routes: HashMap<String, String>) -> Self {
        Self {
            default_addr: None,
            overrides: routes,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Identity lists received so far, in request order
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RouteResolver for StaticRouteResolver {
    async fn resolve(&self, identities: &[String]) -> Result<HashMap<String, String>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(identities.to_vec());
        }

        let mut routes = HashMap::new();
        for id in identities {
            let addr = self.overrides.get(id).or(self.default_addr.as_ref());
            if let Some(addr) = addr {
                routes.insert(id.clone(), addr.clone());
            }
        }
        Ok(routes)
    }
}
