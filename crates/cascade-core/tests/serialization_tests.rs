//! Serialization tests for cascade-core types that cross process boundaries.

use cascade_core::artifact::PublicationTarget;
use cascade_core::events::*;
use cascade_core::ids::*;
use cascade_core::interpolation::CommandLine;
use cascade_core::pipeline::*;
use cascade_core::repository::Architecture;
use cascade_core::run::*;
use cascade_core::version::ReleaseVersion;
use chrono::Utc;

#[test]
fn test_trigger_emitted_event_shape() {
    let event = Event::TriggerEmitted(TriggerEmittedPayload {
        trigger_id: TriggerId::new(),
        source_run: RunId::new(),
        source: BuilderId::release("hippo_common", Architecture::Amd64),
        target: BuilderId::release("hippo_msgs", Architecture::Amd64),
        full_build: true,
        origin: Origin {
            repository: "hippo_common".to_string(),
            source_ref: "1.4.0".to_string(),
            version: Some(ReleaseVersion::new(1, 4, 0)),
        },
        emitted_at: Utc::now(),
    });

    let json = serde_json::to_value(&event).expect("serialize");
    assert_eq!(json["type"], "trigger_emitted");
    assert_eq!(json["full_build"], true);
    assert_eq!(json["target"]["architecture"], "amd64");
    assert_eq!(json["target"]["kind"], "release");
    assert_eq!(event.subject(), "trigger.hippo-msgs-triggerable-amd64");

    let parsed: Event = serde_json::from_value(json).expect("deserialize");
    match parsed {
        Event::TriggerEmitted(p) => {
            assert!(p.full_build);
            assert_eq!(p.origin.version, Some(ReleaseVersion::new(1, 4, 0)));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_artifact_published_subject() {
    let event = Event::ArtifactPublished(ArtifactPublishedPayload {
        run_id: RunId::new(),
        file_name: "ros-jazzy-a_1.0.0noble_arm64.deb".to_string(),
        target: PublicationTarget::parse("ros-jazzy-a_1.0.0noble_arm64.deb").unwrap(),
        published_at: Utc::now(),
    });
    assert_eq!(event.subject(), "publish.arm64.ros-jazzy-a");
}

#[test]
fn test_stage_kind_serialization() {
    let stage = Stage::run(
        "rosdep-install-a",
        StageKind::InstallDependencies {
            skip_keys: vec!["a".to_string(), "b".to_string()],
        },
        CommandLine::new("rosdep", &["install"]),
    )
    .in_dir("p/a");

    let json = serde_json::to_value(&stage).expect("serialize");
    assert_eq!(json["kind"]["kind"], "install_dependencies");
    assert_eq!(json["kind"]["skip_keys"][1], "b");
    assert_eq!(json["action"]["action"], "run");

    let parsed: Stage = serde_json::from_value(json).expect("deserialize");
    assert_eq!(parsed, stage);
}
