//! Cluster API interface for compute claims and node records.
//!
//! The cluster API is an external collaborator. This crate reads claims
//! and nodes by provider instance ID and mutates claims only by
//! requesting deletion; teardown after a deletion request is owned
//! elsewhere. A memory implementation is provided for testing.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

/// The cluster's record of a requested machine, bound to at most one
/// provider instance at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeClaim {
    /// Claim name, unique in the cluster.
    pub name: String,

    /// Provider-assigned identifier of the bound instance.
    pub instance_id: String,

    /// Topology zone label.
    pub zone: Option<String>,

    /// Instance shape label.
    pub shape: Option<String>,

    /// Owning pool label.
    pub pool: Option<String>,

    /// Capacity market label (e.g. spot vs. on-demand).
    pub capacity_market: Option<String>,

    /// Set once removal has been requested; the idempotency gate.
    pub deletion_requested: bool,
}

impl ComputeClaim {
    /// A claim with no labels, bound to the given instance.
    pub fn new(name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_id: instance_id.into(),
            zone: None,
            shape: None,
            pool: None,
            capacity_market: None,
            deletion_requested: false,
        }
    }
}

/// The cluster's registration object for a joined machine.
///
/// May be absent for a claim: the machine has not joined yet, or was
/// already removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Node name, unique in the cluster.
    pub name: String,

    /// Provider-assigned identifier of the backing instance.
    pub instance_id: String,
}

/// Errors from the cluster API.
#[derive(Debug, Error, Clone)]
pub enum ClusterError {
    /// The target object no longer exists.
    ///
    /// Callers requesting deletion treat this as success.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other API failure.
    #[error("cluster api: {0}")]
    Api(String),
}

/// Cluster API interface.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List the claims currently bound to an instance.
    ///
    /// An empty list is a valid outcome: the instance may belong to
    /// capacity outside this controller's domain.
    async fn claims_for_instance(&self, instance_id: &str)
        -> Result<Vec<ComputeClaim>, ClusterError>;

    /// List the node records for an instance. At most one is expected;
    /// callers use the first match if duplicates exist.
    async fn nodes_for_instance(&self, instance_id: &str) -> Result<Vec<NodeRecord>, ClusterError>;

    /// Request deletion of a claim.
    ///
    /// Must report [`ClusterError::NotFound`] distinguishably when the
    /// claim is already gone.
    async fn delete_claim(&self, claim: &ComputeClaim) -> Result<(), ClusterError>;
}

/// Memory-backed cluster API for testing and development.
#[derive(Default)]
pub struct MemoryCluster {
    claims: Mutex<Vec<ComputeClaim>>,
    nodes: Mutex<Vec<NodeRecord>>,
    deleted: Mutex<Vec<String>>,
    fail_list_claims: Mutex<bool>,
    fail_list_nodes: Mutex<bool>,
    fail_delete: Mutex<bool>,
    fail_delete_of: Mutex<Vec<String>>,
    not_found_on_delete: Mutex<Vec<String>>,
}

impl MemoryCluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a claim.
    pub fn add_claim(&self, claim: ComputeClaim) {
        self.claims.lock().unwrap().push(claim);
    }

    /// Register a node record.
    pub fn add_node(&self, node: NodeRecord) {
        self.nodes.lock().unwrap().push(node);
    }

    /// Make claim listing fail.
    pub fn fail_list_claims(&self, fail: bool) {
        *self.fail_list_claims.lock().unwrap() = fail;
    }

    /// Make node listing fail.
    pub fn fail_list_nodes(&self, fail: bool) {
        *self.fail_list_nodes.lock().unwrap() = fail;
    }

    /// Make deletion requests fail.
    pub fn fail_delete(&self, fail: bool) {
        *self.fail_delete.lock().unwrap() = fail;
    }

    /// Make deletion requests fail for one named claim only.
    pub fn fail_delete_of(&self, name: impl Into<String>) {
        self.fail_delete_of.lock().unwrap().push(name.into());
    }

    /// Report `NotFound` on deletion of one named claim, as if it was
    /// removed between listing and deletion.
    pub fn not_found_on_delete(&self, name: impl Into<String>) {
        self.not_found_on_delete.lock().unwrap().push(name.into());
    }

    /// Names of claims whose deletion has been requested, in order.
    pub fn deleted_claims(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn claims_for_instance(
        &self,
        instance_id: &str,
    ) -> Result<Vec<ComputeClaim>, ClusterError> {
        if *self.fail_list_claims.lock().unwrap() {
            return Err(ClusterError::Api("injected list failure".to_string()));
        }
        Ok(self
            .claims
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn nodes_for_instance(&self, instance_id: &str) -> Result<Vec<NodeRecord>, ClusterError> {
        if *self.fail_list_nodes.lock().unwrap() {
            return Err(ClusterError::Api("injected list failure".to_string()));
        }
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn delete_claim(&self, claim: &ComputeClaim) -> Result<(), ClusterError> {
        if *self.fail_delete.lock().unwrap()
            || self.fail_delete_of.lock().unwrap().contains(&claim.name)
        {
            return Err(ClusterError::Api("injected delete failure".to_string()));
        }
        if self
            .not_found_on_delete
            .lock()
            .unwrap()
            .contains(&claim.name)
        {
            return Err(ClusterError::NotFound(claim.name.clone()));
        }
        let mut claims = self.claims.lock().unwrap();
        let Some(stored) = claims.iter_mut().find(|c| c.name == claim.name) else {
            return Err(ClusterError::NotFound(claim.name.clone()));
        };
        stored.deletion_requested = true;
        self.deleted.lock().unwrap().push(claim.name.clone());
        Ok(())
    }
}
