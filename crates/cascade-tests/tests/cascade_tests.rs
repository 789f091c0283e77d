//! End-to-end trigger and cascade tests.
//!
//! Run with: `cargo test -p cascade-tests --test cascade_tests`

use cascade_core::events::Event;
use cascade_core::repository::Architecture;
use cascade_core::run::{BuilderId, BuilderState, RunStatus};
use cascade_core::version::ReleaseVersion;
use cascade_scheduler::TriggerEvent;
use cascade_scheduler::schedule::ScheduleBook;
use cascade_tests::{FleetFixture, ScriptedRunner, init_test_logging};
use std::sync::Arc;

fn push(repository: &str, branch: &str) -> TriggerEvent {
    TriggerEvent::Push {
        repository: repository.to_string(),
        branch: branch.to_string(),
    }
}

#[tokio::test]
async fn test_release_tag_cascades_to_dependent() {
    init_test_logging();
    let fleet = FleetFixture::chain(&["hippo_msgs", "hippo_control"]).build();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_packages("hippo_msgs", &["hippo_msgs", "hippo_common"])
            .with_packages("hippo_control", &["hippo_control"]),
    );
    let (orchestrator, bus) = fleet.orchestrator(runner.clone());

    let runs = orchestrator
        .handle_trigger(push("hippo_msgs", "1.2.0"))
        .await
        .expect("Trigger failed");
    assert_eq!(runs.len(), 1);

    let summaries = orchestrator.wait_idle().await;
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.status == RunStatus::Success));
    assert_eq!(summaries[0].builder.name(), "hippo-msgs-deb-amd64");
    assert_eq!(summaries[0].published.len(), 2);
    assert_eq!(summaries[1].builder.name(), "hippo-control-deb-amd64");
    assert_eq!(summaries[1].published.len(), 1);

    let triggers = bus.history_matching("trigger.>").await;
    assert_eq!(triggers.len(), 1);
    let Event::TriggerEmitted(payload) = &triggers[0] else {
        panic!("Expected a trigger event");
    };
    assert!(payload.full_build);
    assert_eq!(payload.target.triggerable_name(), "hippo-control-triggerable-amd64");
    assert_eq!(payload.origin.repository, "hippo_msgs");
    assert_eq!(payload.origin.source_ref, "1.2.0");
    assert_eq!(payload.origin.version, Some(ReleaseVersion::new(1, 2, 0)));

    // The dependent builds its main branch, not the upstream tag.
    let checkouts = runner.calls_matching("checkout");
    assert_eq!(checkouts.len(), 2);
    let downstream = &checkouts[1].command.args;
    assert!(downstream.iter().any(|a| a.ends_with("/hippo_control.git")));
    assert!(downstream.contains(&"main".to_string()));

    // Packages are relocated with the default command line.
    let relocate = runner.calls_matching("relocate-hippo_msgs");
    assert_eq!(relocate[0].command.program, "./move_deb_to_builddir");
    assert_eq!(relocate[0].command.args, vec!["hippo_msgs", "hippo_msgs"]);

    // Every sibling is skipped during dependency resolution.
    let install = runner.calls_matching("install-deps-hippo_common");
    assert_eq!(install.len(), 1);
    assert!(
        install[0]
            .command
            .args
            .contains(&"--skip-keys=hippo_msgs,hippo_common".to_string())
    );

    assert_eq!(
        orchestrator
            .builder_state(&BuilderId::release("hippo_control", Architecture::Amd64))
            .await,
        BuilderState::ReleaseDone
    );
}

#[tokio::test]
async fn test_compile_failure_stops_run_and_chain() {
    init_test_logging();
    let fleet = FleetFixture::chain(&["a", "b"]).build();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_packages("a", &["a_msgs", "a_core"])
            .with_packages("b", &["b_nodes"])
            .fail_on("compile-a_core", 2),
    );
    let (orchestrator, bus) = fleet.orchestrator(runner.clone());

    orchestrator
        .handle_trigger(push("a", "1.0.0"))
        .await
        .unwrap();
    let summaries = orchestrator.wait_idle().await;

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].status, RunStatus::Failure);
    assert!(
        summaries[0]
            .error
            .as_deref()
            .unwrap()
            .contains("compile-a_core")
    );

    let labels = runner.labels();
    assert!(labels.contains(&"compile-a_msgs".to_string()));
    assert!(!labels.iter().any(|l| l == "relocate-a_core"));
    assert!(!labels.iter().any(|l| l == "enumerate-artifacts"));
    assert!(runner.calls_matching("includedeb-").is_empty());

    assert!(bus.history_matching("trigger.>").await.is_empty());
    assert!(bus.history_matching("publish.>").await.is_empty());
    assert_eq!(
        orchestrator
            .builder_state(&BuilderId::release("a", Architecture::Amd64))
            .await,
        BuilderState::ReleaseFailed
    );
}

#[tokio::test]
async fn test_main_push_verifies_on_every_architecture() {
    let fleet = FleetFixture::chain(&["a", "b"])
        .architectures(&["amd64", "arm64"])
        .build();
    let runner = Arc::new(ScriptedRunner::new().with_packages("a", &["a_msgs"]));
    let (orchestrator, bus) = fleet.orchestrator(runner.clone());

    let runs = orchestrator.handle_trigger(push("a", "main")).await.unwrap();
    assert_eq!(runs.len(), 2);

    let summaries = orchestrator.wait_idle().await;
    let mut builders: Vec<String> = summaries.iter().map(|s| s.builder.name()).collect();
    builders.sort();
    assert_eq!(builders, vec!["a-colcon-amd64", "a-colcon-arm64"]);

    // Verification never discovers, publishes or cascades.
    assert!(runner.calls_matching("discover").is_empty());
    assert!(runner.calls_matching("includedeb-").is_empty());
    assert!(bus.history_matching("trigger.>").await.is_empty());
    assert_eq!(runner.calls_matching("build").len(), 2);
}

#[tokio::test]
async fn test_verified_main_push_starts_releases_when_enabled() {
    let fleet = FleetFixture::chain(&["a", "b"])
        .architectures(&["amd64", "arm64"])
        .release_after_verification()
        .build();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_packages("a", &["a_msgs"])
            .with_packages("b", &["b_nodes"]),
    );
    let (orchestrator, bus) = fleet.orchestrator(runner.clone());

    let runs = orchestrator.handle_trigger(push("a", "main")).await.unwrap();
    assert_eq!(runs.len(), 2);

    let summaries = orchestrator.wait_idle().await;
    assert_eq!(summaries.len(), 4);
    assert!(summaries.iter().all(|s| s.status == RunStatus::Success));

    // Releases start only once both verifications are done.
    let mut verified: Vec<String> = summaries[..2].iter().map(|s| s.builder.name()).collect();
    let mut released: Vec<String> = summaries[2..].iter().map(|s| s.builder.name()).collect();
    verified.sort();
    released.sort();
    assert_eq!(verified, vec!["a-colcon-amd64", "a-colcon-arm64"]);
    assert_eq!(released, vec!["a-deb-amd64", "a-deb-arm64"]);
    assert!(summaries[2..].iter().all(|s| s.published.len() == 1));

    // Not a full build, so the chain stays put.
    assert!(bus.history_matching("trigger.>").await.is_empty());
    assert!(!summaries.iter().any(|s| s.builder.repository == "b"));
}

#[tokio::test]
async fn test_failed_verification_holds_back_release() {
    let fleet = FleetFixture::chain(&["a"])
        .architectures(&["amd64", "arm64"])
        .release_after_verification()
        .build();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_packages("a", &["a_msgs"])
            .fail_on("build", 1),
    );
    let (orchestrator, _bus) = fleet.orchestrator(runner.clone());

    orchestrator.handle_trigger(push("a", "main")).await.unwrap();
    let summaries = orchestrator.wait_idle().await;

    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.status == RunStatus::Failure));
    assert!(runner.calls_matching("discover").is_empty());
}

#[tokio::test]
async fn test_feature_branch_triggers_nothing() {
    let fleet = FleetFixture::chain(&["a"]).build();
    let runner = Arc::new(ScriptedRunner::new());
    let (orchestrator, _bus) = fleet.orchestrator(runner.clone());

    let runs = orchestrator
        .handle_trigger(push("a", "feature/faster-startup"))
        .await
        .unwrap();
    assert!(runs.is_empty());
    assert!(orchestrator.wait_idle().await.is_empty());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_schedule_starts_chain_head() {
    let fleet = FleetFixture::chain(&["a", "b"])
        .architectures(&["amd64", "arm64"])
        .schedule("nightly-arm64", "arm64", "0 0 1 * * *")
        .build();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_packages("a", &["a_msgs"])
            .with_packages("b", &["b_nodes"]),
    );
    let (orchestrator, bus) = fleet.orchestrator(runner.clone());

    let book = ScheduleBook::from_config(&fleet.config.schedules).unwrap();
    assert_eq!(book.entries().len(), 1);

    orchestrator
        .handle_trigger(book.entries()[0].trigger())
        .await
        .unwrap();
    let summaries = orchestrator.wait_idle().await;

    let builders: Vec<String> = summaries.iter().map(|s| s.builder.name()).collect();
    assert_eq!(builders, vec!["a-deb-arm64", "b-deb-arm64"]);
    assert!(summaries.iter().all(|s| s.status == RunStatus::Success));
    assert_eq!(bus.history_matching("trigger.>").await.len(), 1);
}

#[tokio::test]
async fn test_manual_release_stays_put_without_full_build() {
    let fleet = FleetFixture::chain(&["a", "b"]).build();
    let runner = Arc::new(ScriptedRunner::new().with_packages("a", &["a_msgs"]));
    let (orchestrator, bus) = fleet.orchestrator(runner.clone());

    orchestrator
        .handle_trigger(TriggerEvent::Manual {
            builder: "a-deb-amd64".to_string(),
            source_ref: Some("0.9.1".to_string()),
            full_build: false,
        })
        .await
        .unwrap();
    let summaries = orchestrator.wait_idle().await;

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].status, RunStatus::Success);
    assert!(bus.history_matching("trigger.>").await.is_empty());

    let checkout = &runner.calls_matching("checkout")[0];
    assert!(checkout.command.args.contains(&"0.9.1".to_string()));
}
