// RDF graph store client
//
// The engine treats the store as an external service with per-graph
// isolation: load a Turtle document into a named graph, run a SPARQL query,
// clear a graph. The engine never holds its own locks while calling the
// store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::EngineError;

/// Graph store operations used by the stage handlers.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Load (append) a Turtle document into the named graph.
    async fn load_graph(&self, graph_uri: &str, turtle: &str) -> Result<(), EngineError>;

    /// Run a SPARQL query, returning SPARQL JSON results.
    async fn query(&self, sparql: &str) -> Result<serde_json::Value, EngineError>;

    /// Drop every triple in the named graph. Clearing an absent graph is a
    /// no-op.
    async fn clear_graph(&self, graph_uri: &str) -> Result<(), EngineError>;
}

// ============================================================================
// HTTP implementation (SPARQL 1.1 graph store protocol)
// ============================================================================

/// Client for a SPARQL endpoint exposing the graph-store protocol
/// (e.g. Fuseki: `{base}/{dataset}/data`, `/query`, `/update`).
pub struct HttpGraphStore {
    client: reqwest::Client,
    base_url: String,
    dataset: String,
}

impl HttpGraphStore {
    pub fn new(base_url: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            dataset: dataset.into(),
        }
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.dataset,
            suffix
        )
    }

    fn unavailable(context: &str, err: reqwest::Error) -> EngineError {
        EngineError::Unavailable(format!("graph store {context}: {err}"))
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    async fn load_graph(&self, graph_uri: &str, turtle: &str) -> Result<(), EngineError> {
        let response = self
            .client
            .post(self.endpoint("data"))
            .query(&[("graph", graph_uri)])
            .header("content-type", "text/turtle")
            .body(turtle.to_string())
            .send()
            .await
            .map_err(|e| Self::unavailable("load", e))?;

        if !response.status().is_success() {
            return Err(EngineError::Unavailable(format!(
                "graph store load returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn query(&self, sparql: &str) -> Result<serde_json::Value, EngineError> {
        let response = self
            .client
            .post(self.endpoint("query"))
            .header("content-type", "application/sparql-query")
            .header("accept", "application/sparql-results+json")
            .body(sparql.to_string())
            .send()
            .await
            .map_err(|e| Self::unavailable("query", e))?;

        if !response.status().is_success() {
            return Err(EngineError::Unavailable(format!(
                "graph store query returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Self::unavailable("query decode", e))
    }

    async fn clear_graph(&self, graph_uri: &str) -> Result<(), EngineError> {
        let update = format!("CLEAR SILENT GRAPH <{graph_uri}>");
        let response = self
            .client
            .post(self.endpoint("update"))
            .header("content-type", "application/sparql-update")
            .body(update)
            .send()
            .await
            .map_err(|e| Self::unavailable("clear", e))?;

        if !response.status().is_success() {
            return Err(EngineError::Unavailable(format!(
                "graph store clear returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// In-memory implementation (tests, graph-store-less deployments)
// ============================================================================

/// Graph store backed by a process-local map of graph URI to loaded Turtle
/// documents. Queries return empty SPARQL JSON results.
#[derive(Default)]
pub struct InMemoryGraphStore {
    graphs: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents loaded into a graph.
    pub fn document_count(&self, graph_uri: &str) -> usize {
        self.graphs
            .read()
            .get(graph_uri)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Rough statement count over a graph's documents (lines terminated with
    /// `.`, prefix declarations excluded).
    pub fn statement_count(&self, graph_uri: &str) -> usize {
        self.graphs
            .read()
            .get(graph_uri)
            .map(|docs| {
                docs.iter()
                    .flat_map(|d| d.lines())
                    .filter(|line| {
                        let line = line.trim();
                        line.ends_with('.') && !line.starts_with("@prefix")
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn load_graph(&self, graph_uri: &str, turtle: &str) -> Result<(), EngineError> {
        self.graphs
            .write()
            .entry(graph_uri.to_string())
            .or_default()
            .push(turtle.to_string());
        Ok(())
    }

    async fn query(&self, _sparql: &str) -> Result<serde_json::Value, EngineError> {
        Ok(serde_json::json!({
            "head": { "vars": [] },
            "results": { "bindings": [] }
        }))
    }

    async fn clear_graph(&self, graph_uri: &str) -> Result<(), EngineError> {
        self.graphs.write().remove(graph_uri);
        Ok(())
    }
}
