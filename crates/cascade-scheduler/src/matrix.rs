//! The multi-architecture build matrix.
//!
//! Every repository gets a verification and a release builder per configured
//! architecture. Builders are addressed by name (`{repo}-colcon-{arch}`,
//! `{repo}-deb-{arch}`) or, for cascades, by triggerable name
//! (`{repo}-triggerable-{arch}`).

use crate::config::FleetConfig;
use cascade_core::pipeline::PipelineKind;
use cascade_core::repository::{Architecture, Repository};
use cascade_core::run::BuilderId;
use cascade_core::{Error, Result};
use std::collections::BTreeMap;

/// One cell of the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderSpec {
    pub id: BuilderId,
    pub repository: Repository,
    /// Workers of the builder's architecture.
    pub workers: Vec<String>,
}

impl BuilderSpec {
    pub fn name(&self) -> String {
        self.id.name()
    }

    /// Only release builders can be triggered by an upstream cascade.
    pub fn triggerable(&self) -> Option<String> {
        match self.id.kind {
            PipelineKind::Release => Some(self.id.triggerable_name()),
            PipelineKind::Verification => None,
        }
    }
}

/// Repositories × architectures × pipeline kinds.
#[derive(Debug, Clone)]
pub struct BuildMatrix {
    repositories: Vec<Repository>,
    architectures: Vec<Architecture>,
    builders: Vec<BuilderSpec>,
}

impl BuildMatrix {
    pub fn new(repositories: Vec<Repository>, pools: BTreeMap<Architecture, Vec<String>>) -> Self {
        let mut builders = Vec::with_capacity(repositories.len() * pools.len() * 2);

        for repository in &repositories {
            for (arch, workers) in &pools {
                for kind in [PipelineKind::Verification, PipelineKind::Release] {
                    builders.push(BuilderSpec {
                        id: BuilderId::new(&repository.name, *arch, kind),
                        repository: repository.clone(),
                        workers: workers.clone(),
                    });
                }
            }
        }

        Self {
            repositories,
            architectures: pools.keys().copied().collect(),
            builders,
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        let pools = config
            .architectures
            .iter()
            .map(|(arch, pool)| (*arch, pool.workers.clone()))
            .collect();
        Self::new(config.repositories(), pools)
    }

    pub fn builders(&self) -> &[BuilderSpec] {
        &self.builders
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repositories
    }

    pub fn architectures(&self) -> &[Architecture] {
        &self.architectures
    }

    pub fn get(&self, id: &BuilderId) -> Option<&BuilderSpec> {
        self.builders.iter().find(|b| &b.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Result<&BuilderSpec> {
        self.builders
            .iter()
            .find(|b| b.name() == name)
            .ok_or_else(|| Error::BuilderNotFound(name.to_string()))
    }

    pub fn find_by_triggerable(&self, name: &str) -> Option<&BuilderSpec> {
        self.builders
            .iter()
            .find(|b| b.triggerable().as_deref() == Some(name))
    }

    pub fn repository(&self, name: &str) -> Result<&Repository> {
        self.repositories
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::RepositoryNotFound(name.to_string()))
    }

    /// First repository of the cascade chain.
    pub fn chain_head(&self) -> Option<&Repository> {
        self.repositories.first()
    }

    /// Release builders a successful release of `source` triggers: the
    /// declared dependents, same architecture.
    pub fn downstream(&self, source: &BuilderId) -> Vec<BuilderId> {
        if source.kind != PipelineKind::Release {
            return Vec::new();
        }
        let Ok(repository) = self.repository(&source.repository) else {
            return Vec::new();
        };
        repository
            .dependents
            .iter()
            .map(|dependent| BuilderId::release(dependent, source.architecture))
            .filter(|id| self.get(id).is_some())
            .collect()
    }
}
