//! Edge operations

use super::pagination::{parse_count, Page};
use super::{Created, Deleted, GraphService};
use crate::core::error::{GraphError, Result};
use crate::core::types::{EdgeRecord, EdgeRef, Fields, Method};
use crate::schema::{EdgeConfig, TypeConfig};
use crate::storage::StorageError;
use crate::system::{Metrics, Timer};
use chrono::Utc;
use futures::future::join_all;

impl GraphService {
    /// Source type config and edge config for `src/name`
    fn edge_config(&self, src: &str, name: &str) -> Result<(&TypeConfig, &EdgeConfig)> {
        let config = self.registry.config_for_id(src)?;
        let edge = config.edge(name).ok_or_else(|| GraphError::UnknownEdge {
            src: src.to_string(),
            edge: name.to_string(),
        })?;
        Ok((config, edge))
    }

    /// Check that `src/name/dst` is a declared edge shape
    pub fn check_edge(&self, src: &str, name: &str, dst: &str) -> Result<&TypeConfig> {
        let (config, edge) = self.edge_config(src, name)?;
        let dst_type = self.registry.type_of(dst)?;
        if !edge.accepts(dst_type) {
            return Err(GraphError::UnsupportedDestinationObject {
                src: src.to_string(),
                edge: name.to_string(),
                dst: dst.to_string(),
            });
        }
        Ok(config)
    }

    /// Destination object of one edge
    pub async fn get_edge_object(&self, src: &str, name: &str, dst: &str) -> Result<Fields> {
        self.check_edge(src, name, dst)?;

        let (edge, object) = futures::join!(self.storage.get_edge(src, name, dst), self.storage.get_object(dst));
        if edge?.is_none() {
            return Err(GraphError::EdgeNotExists {
                src: src.to_string(),
                edge: name.to_string(),
                dst: dst.to_string(),
            });
        }
        object?.ok_or_else(|| GraphError::DestinationObjectNotExists {
            src: src.to_string(),
            edge: name.to_string(),
            dst: dst.to_string(),
        })
    }

    /// One page of destination objects, newest edge first.
    ///
    /// `count` is the raw query parameter; `after` an opaque cursor from a
    /// previous page.
    pub async fn get_edge_objects(
        &self,
        src: &str,
        name: &str,
        count: Option<&str>,
        after: Option<&str>,
    ) -> Result<Page> {
        let (_, edge) = self.edge_config(src, name)?;
        let count = parse_count(count, &edge.pagination)?;

        let (dsts, total) = futures::try_join!(
            self.storage.get_edges(src, name, count, after),
            self.storage.get_edge_count(src, name)
        )?;

        let fetched = join_all(dsts.iter().map(|dst| self.storage.get_object(dst))).await;
        let mut objects = Vec::with_capacity(dsts.len());
        for (dst, doc) in dsts.iter().zip(fetched) {
            match doc? {
                Some(doc) => objects.push(doc),
                None => tracing::debug!(src, name, dst = %dst, "Edge destination missing, omitted from page"),
            }
        }

        let cursors = self.storage.first_and_last_params(&dsts, after);
        Ok(Page::from_listing(objects, total, cursors, count, dsts.len()))
    }

    /// Create an edge between two existing objects
    pub async fn create_edge(&self, src: &str, name: &str, dst: &str, user: Option<&str>) -> Result<Created> {
        let timer = Timer::start(&Metrics::global().operations.operation_duration);
        let config = self.check_edge(src, name, dst)?;
        let already_exists = || GraphError::EdgeAlreadyExists {
            src: src.to_string(),
            edge: name.to_string(),
            dst: dst.to_string(),
        };

        let (edge, src_doc, dst_doc) = futures::join!(
            self.storage.get_edge(src, name, dst),
            self.storage.get_object(src),
            self.storage.get_object(dst)
        );
        if edge?.is_some() {
            return Err(already_exists());
        }
        let src_doc = src_doc?.ok_or_else(|| GraphError::ObjectNotExists(src.to_string()))?;
        if src_doc.get("deleted_at").is_some_and(|v| !v.is_null()) {
            return Err(GraphError::ObjectDeleted);
        }
        if dst_doc?.is_none() {
            return Err(GraphError::DestinationObjectNotExists {
                src: src.to_string(),
                edge: name.to_string(),
                dst: dst.to_string(),
            });
        }

        let now = Utc::now();
        let record = EdgeRecord {
            src: src.to_string(),
            edge_name: name.to_string(),
            dst: dst.to_string(),
            sort_value: self.sort_clock.sort_value(),
        };
        match self.storage.create_edge(&record).await {
            Ok(()) => {}
            Err(StorageError::AlreadyExists(_)) => return Err(already_exists()),
            Err(err) => return Err(err.into()),
        }

        Metrics::global().operations.edges_created.inc();
        tracing::info!(src, name, dst, "Edge created");

        if !config.suppress_event {
            let event = self.emitter.edge_event(self.registry.codec(), Method::Post, edge_ref(src, name, dst), user)?;
            self.emit(event).await?;
        }

        timer.finish();
        Ok(Created { created_at: now })
    }

    /// Delete an existing edge
    pub async fn delete_edge(&self, src: &str, name: &str, dst: &str, user: Option<&str>) -> Result<Deleted> {
        let timer = Timer::start(&Metrics::global().operations.operation_duration);
        let config = self.check_edge(src, name, dst)?;

        if self.storage.get_edge(src, name, dst).await?.is_none() {
            return Err(GraphError::EdgeNotExists {
                src: src.to_string(),
                edge: name.to_string(),
                dst: dst.to_string(),
            });
        }
        self.storage.delete_edge(src, name, dst).await?;
        let now = Utc::now();

        Metrics::global().operations.edges_deleted.inc();
        tracing::info!(src, name, dst, "Edge deleted");

        if !config.suppress_event {
            let event = self.emitter.edge_event(self.registry.codec(), Method::Delete, edge_ref(src, name, dst), user)?;
            self.emit(event).await?;
        }

        timer.finish();
        Ok(Deleted { deleted_at: now })
    }
}

fn edge_ref(src: &str, name: &str, dst: &str) -> EdgeRef {
    EdgeRef {
        src: src.to_string(),
        name: name.to_string(),
        dst: dst.to_string(),
    }
}
