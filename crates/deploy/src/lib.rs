//! Dependency-ordered deployer: applies every requested resource into one
//! namespace, deploying each resource's prerequisites before the resource
//! itself.
//!
//! Dependencies are declared through the reserved
//! `x-truder.net/dependencies` annotation as a comma-separated list of
//! `kind/name` paths. Resolution is depth-first: a resource's prerequisites
//! are dispatched concurrently and joined before its own apply call, while
//! the top-level requested paths run strictly one after another. Repeated
//! references are NOT memoized — every reference triggers its own
//! deployment attempt — and dependency cycles are not detected; a cycle
//! recurses until the stack gives out.

#![forbid(unsafe_code)]

use futures::future::{join_all, BoxFuture};
use tracing::{debug, info};

use truder_core::{Applier, Configuration, DeployError, Resource};

/// Drives an [`Applier`] over a [`Configuration`] in dependency order.
///
/// The configuration is read-only for the lifetime of the deployer; a run is
/// a pure traversal whose only side effects happen inside the applier.
#[derive(Debug)]
pub struct Deployer<A> {
    config: Configuration,
    namespace: String,
    applier: A,
}

impl<A: Applier> Deployer<A> {
    /// Build a deployer, deriving the target namespace from the
    /// configuration's namespace definition.
    pub fn new(config: Configuration, applier: A) -> Result<Self, DeployError> {
        let namespace = config
            .namespace_name()
            .ok_or(DeployError::MissingNamespaceName)?
            .to_string();
        Ok(Self {
            config,
            namespace,
            applier,
        })
    }

    /// The namespace every resource is applied into.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// All configured resource paths in declaration order, namespace
    /// excluded. This is the default deployment sequence.
    pub fn resource_paths(&self) -> Vec<String> {
        self.config.resource_paths()
    }

    /// Resolve a path without deploying it. Absence shows up as a missing
    /// definition, not an error.
    pub fn resolve<'a>(&'a self, path: &'a str) -> Resource<'a> {
        self.config.resolve(path)
    }

    /// Deploy one resource, prerequisites first.
    ///
    /// Prerequisites run concurrently with respect to each other; the
    /// resource's own apply call starts only once all of them have
    /// completed. Siblings are not cancelled when one fails — the join
    /// waits for every sibling, then the first listed failure propagates.
    ///
    /// A path with no definition is a hard precondition failure
    /// ([`DeployError::ResourceNotDefined`]): it indicates a caller or
    /// configuration bug, not a recoverable condition.
    pub fn deploy_resource<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), DeployError>> {
        Box::pin(async move {
            let resource = self.resolve(path);
            let definition = resource
                .definition
                .ok_or_else(|| DeployError::ResourceNotDefined(path.to_string()))?;

            let dependencies = definition.dependencies();
            if !dependencies.is_empty() {
                debug!(path, count = dependencies.len(), "deploying prerequisites");
                let results =
                    join_all(dependencies.iter().map(|dep| self.deploy_resource(dep))).await;
                for result in results {
                    result?;
                }
            }

            info!(
                namespace = %self.namespace,
                kind = resource.kind,
                name = resource.name,
                "applying resource"
            );
            self.applier
                .apply(&self.namespace, resource.kind, resource.name, definition)
                .await?;
            Ok(())
        })
    }

    /// Deploy the namespace, then the requested paths.
    ///
    /// An empty `include` means every configured resource, in declaration
    /// order. The list is taken as given: no deduplication and no up-front
    /// validation — each path is checked inside [`Self::deploy_resource`].
    /// Top-level paths run strictly in sequence, each sub-tree fully
    /// complete before the next starts; the first failure stops the walk
    /// and later paths are never attempted.
    pub async fn deploy(&self, include: &[String]) -> Result<(), DeployError> {
        info!(namespace = %self.namespace, "applying namespace");
        self.applier
            .apply(
                &self.namespace,
                "namespace",
                &self.namespace,
                self.config.namespace(),
            )
            .await?;

        let targets: Vec<String> = if include.is_empty() {
            self.resource_paths()
        } else {
            include.to_vec()
        };

        for path in &targets {
            self.deploy_resource(path).await?;
        }
        Ok(())
    }
}
