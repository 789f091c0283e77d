//! Dynamic pipeline expansion.
//!
//! Pure functions from discovered packages to stage groups. Nothing here runs
//! a command; the executor does that.

use crate::config::{CommandSet, FleetConfig};
use cascade_core::interpolation::{InterpolationContext, vars};
use cascade_core::package::{DiscoveredPackage, skip_keys};
use cascade_core::pipeline::{GroupRole, Stage, StageAction, StageGroup, StageKind};
use cascade_core::repository::{Architecture, Repository};
use std::path::PathBuf;

/// Variables shared by every command of one run.
pub fn run_context(
    repository: &Repository,
    source_ref: &str,
    architecture: Architecture,
) -> InterpolationContext {
    InterpolationContext::new()
        .with(vars::REPOSITORY_NAME, &repository.name)
        .with(vars::REPOSITORY_URL, &repository.url)
        .with(vars::SOURCE_REF, source_ref)
        .with(vars::ARCHITECTURE, architecture.as_str())
}

/// Builds stage groups from command templates.
#[derive(Debug, Clone)]
pub struct PipelineExpander {
    commands: CommandSet,
    artifact_store: PathBuf,
    helper_scripts: Vec<PathBuf>,
}

impl PipelineExpander {
    pub fn new(commands: CommandSet, artifact_store: impl Into<PathBuf>) -> Self {
        Self {
            commands,
            artifact_store: artifact_store.into(),
            helper_scripts: Vec::new(),
        }
    }

    pub fn with_helper_scripts(mut self, scripts: Vec<PathBuf>) -> Self {
        self.helper_scripts = scripts;
        self
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(config.commands.clone(), config.artifact_store.clone())
            .with_helper_scripts(config.helper_scripts.clone())
    }

    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    /// Index refresh under the publication lock, checkout, helper scripts.
    pub fn release_prelude(&self, ctx: &InterpolationContext) -> StageGroup {
        let mut stages = vec![
            Stage::run(
                "refresh-index",
                StageKind::RefreshIndex,
                self.commands.refresh_index.render(ctx),
            )
            .exclusive()
            .quiet(),
            Stage::run(
                "refresh-dependencies",
                StageKind::RefreshDependencies,
                self.commands.refresh_dependencies.render(ctx),
            )
            .exclusive()
            .quiet(),
            Stage::run("checkout", StageKind::Checkout, self.commands.checkout.render(ctx)),
        ];

        if !self.helper_scripts.is_empty() {
            stages.push(
                Stage::new(
                    "provision-helpers",
                    StageKind::ProvisionHelpers,
                    StageAction::Provision {
                        sources: self.helper_scripts.clone(),
                    },
                )
                .quiet(),
            );
        }

        StageGroup::new("prelude", GroupRole::Prelude, stages)
    }

    /// The whole verification run. Its shape does not depend on discovery.
    pub fn verification(&self, ctx: &InterpolationContext) -> Vec<StageGroup> {
        let prelude = StageGroup::new(
            "prelude",
            GroupRole::Prelude,
            vec![
                Stage::run(
                    "refresh-index",
                    StageKind::RefreshIndex,
                    self.commands.refresh_index.render(ctx),
                )
                .quiet(),
                Stage::run(
                    "refresh-dependencies",
                    StageKind::RefreshDependencies,
                    self.commands.refresh_dependencies.render(ctx),
                )
                .quiet(),
                Stage::run("checkout", StageKind::Checkout, self.commands.checkout.render(ctx)),
            ],
        );

        let build = StageGroup::new(
            "build",
            GroupRole::Verification,
            vec![
                Stage::run(
                    "install-deps",
                    StageKind::InstallDependencies {
                        skip_keys: Vec::new(),
                    },
                    self.commands.verify_install_dependencies.render(ctx),
                )
                .quiet(),
                Stage::run("build", StageKind::Build, self.commands.verify_build.render(ctx)),
            ],
        );

        vec![prelude, build]
    }

    /// One group per package in discovery order, then the collection group.
    ///
    /// Every package's dependency installation skips all discovered names, so
    /// a sibling is never resolved as an external dependency.
    pub fn expand(
        &self,
        packages: &[DiscoveredPackage],
        ctx: &InterpolationContext,
    ) -> Vec<StageGroup> {
        let keys = skip_keys(packages);
        let joined_keys = keys.join(",");

        let mut groups: Vec<StageGroup> = packages
            .iter()
            .map(|package| {
                let pkg_ctx = ctx
                    .clone()
                    .with(vars::PACKAGE_NAME, &package.name)
                    .with(vars::PACKAGE_PATH, &package.path)
                    .with(vars::PACKAGE_SKIP_KEYS, &joined_keys);
                self.package_group(package, &keys, &pkg_ctx)
            })
            .collect();

        groups.push(self.collection_group(ctx));
        groups
    }

    fn package_group(
        &self,
        package: &DiscoveredPackage,
        keys: &[String],
        ctx: &InterpolationContext,
    ) -> StageGroup {
        let name = &package.name;
        let mut stages = vec![
            Stage::run(
                format!("install-deps-{name}"),
                StageKind::InstallDependencies {
                    skip_keys: keys.to_vec(),
                },
                self.commands.install_dependencies.render(ctx),
            )
            .in_dir(&package.path)
            .quiet(),
            Stage::run(
                format!("generate-metadata-{name}"),
                StageKind::GenerateMetadata,
                self.commands.generate_metadata.render(ctx),
            )
            .in_dir(&package.path),
            Stage::run(
                format!("compile-{name}"),
                StageKind::Compile,
                self.commands.compile.render(ctx),
            )
            .in_dir(&package.path),
        ];

        if let Some(install) = &self.commands.install_locally {
            stages.push(Stage::run(
                format!("install-local-{name}"),
                StageKind::InstallLocally,
                install.render(ctx),
            ));
        }

        stages.push(Stage::run(
            format!("relocate-{name}"),
            StageKind::RelocateArtifact,
            self.commands.relocate_artifact.render(ctx),
        ));

        StageGroup::for_package(package.clone(), stages)
    }

    fn collection_group(&self, ctx: &InterpolationContext) -> StageGroup {
        StageGroup::new(
            "collect",
            GroupRole::Collection,
            vec![
                Stage::new(
                    "enumerate-artifacts",
                    StageKind::EnumerateArtifacts,
                    StageAction::Enumerate {
                        command: self.commands.enumerate_artifacts.render(ctx),
                    },
                )
                .quiet(),
                Stage::new(
                    "transfer-artifacts",
                    StageKind::TransferArtifacts,
                    StageAction::Transfer {
                        destination: self.artifact_store.clone(),
                    },
                ),
                Stage::new(
                    "publish-artifacts",
                    StageKind::PublishArtifacts,
                    StageAction::Publish {
                        template: self.commands.publish.clone(),
                    },
                ),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expander() -> PipelineExpander {
        PipelineExpander::new(CommandSet::default(), "/srv/binarydebs")
    }

    fn ctx() -> InterpolationContext {
        let repo = Repository {
            name: "hippo_common".to_string(),
            url: "https://example.org/hippo_common.git".to_string(),
            dependents: vec![],
        };
        run_context(&repo, "1.2.3", Architecture::Amd64)
    }

    fn packages() -> Vec<DiscoveredPackage> {
        vec![
            DiscoveredPackage::new("a", "p/a"),
            DiscoveredPackage::new("b", "p/b"),
        ]
    }

    #[test]
    fn test_expand_two_packages() {
        let groups = expander().expand(&packages(), &ctx());

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].name, "a");
        assert_eq!(groups[0].role, GroupRole::Package);
        assert_eq!(groups[1].name, "b");
        assert_eq!(groups[1].role, GroupRole::Package);
        assert_eq!(groups[2].role, GroupRole::Collection);
    }

    #[test]
    fn test_install_deps_skips_every_sibling() {
        let groups = expander().expand(&packages(), &ctx());
        let expected = vec!["a".to_string(), "b".to_string()];

        for group in &groups[..2] {
            let stage = &group.stages[0];
            assert_eq!(
                stage.kind,
                StageKind::InstallDependencies {
                    skip_keys: expected.clone()
                }
            );
            let command = stage.command().unwrap();
            assert!(command.args.contains(&"--skip-keys=a,b".to_string()));
            assert_eq!(stage.workdir.as_deref(), Some(group.package.as_ref().unwrap().path.as_str()));
        }
    }

    #[test]
    fn test_package_group_order() {
        let groups = expander().expand(&packages(), &ctx());
        let kinds: Vec<_> = groups[0].stages.iter().map(|s| s.kind.clone()).collect();

        assert_eq!(
            &kinds[1..],
            &[
                StageKind::GenerateMetadata,
                StageKind::Compile,
                StageKind::InstallLocally,
                StageKind::RelocateArtifact,
            ]
        );
        let relocate = groups[0].stage(&StageKind::RelocateArtifact).unwrap();
        assert_eq!(relocate.command().unwrap().to_string(), "./move_deb_to_builddir a p/a");
        assert!(relocate.workdir.is_none());
    }

    #[test]
    fn test_local_install_is_optional() {
        let mut commands = CommandSet::default();
        commands.install_locally = None;
        let groups = PipelineExpander::new(commands, "/srv").expand(&packages(), &ctx());

        assert!(groups[0].stage(&StageKind::InstallLocally).is_none());
        assert_eq!(groups[0].stages.len(), 4);
    }

    #[test]
    fn test_collection_group_shape() {
        let groups = expander().expand(&packages(), &ctx());
        let collect = groups.last().unwrap();

        assert!(matches!(collect.stages[0].action, StageAction::Enumerate { .. }));
        assert_eq!(
            collect.stages[1].action,
            StageAction::Transfer {
                destination: PathBuf::from("/srv/binarydebs")
            }
        );
        assert!(collect.stages[2].action.consumes_previous());
    }

    #[test]
    fn test_no_packages_still_collects() {
        let groups = expander().expand(&[], &ctx());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].role, GroupRole::Collection);
    }

    #[test]
    fn test_release_prelude_is_locked() {
        let prelude = expander()
            .with_helper_scripts(vec![PathBuf::from("scripts/install_deb")])
            .release_prelude(&ctx());

        assert!(prelude.stages[0].exclusive);
        assert!(prelude.stages[1].exclusive);
        assert!(!prelude.stages[2].exclusive);
        assert_eq!(
            prelude.stages[2].command().unwrap().to_string(),
            "git clone --recurse-submodules --branch 1.2.3 https://example.org/hippo_common.git ."
        );
        assert_eq!(prelude.stages[3].kind, StageKind::ProvisionHelpers);
    }

    #[test]
    fn test_verification_is_never_locked() {
        let groups = expander().verification(&ctx());
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().flat_map(|g| &g.stages).all(|s| !s.exclusive));
        assert_eq!(groups[1].stages[1].kind, StageKind::Build);
    }
}
