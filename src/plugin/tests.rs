//! 插件分派测试

use super::testing::{Behavior, RecordingPlugin};
use super::*;
use crate::config::EngineConfig;
use crate::connection::ScriptedConnection;
use crate::context::{RunContext, ShellMode};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

fn arb_phase() -> impl Strategy<Value = Phase> {
    (0..Phase::ALL.len()).prop_map(|i| Phase::ALL[i])
}

fn arb_platform() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("ASR9K".to_string()),
        Just("NCS5500".to_string()),
        Just("NCS6K".to_string()),
        Just("CRS".to_string()),
    ]
}

fn ctx() -> RunContext {
    RunContext::in_memory("r1", "/tmp/installcast-dispatch")
        .with_shell(ShellMode::User)
        .with_config(EngineConfig::immediate())
        .with_platform("NCS5500", "eXR")
}

proptest! {
    /// **Feature: plugin-dispatch, Property 1: 空平台集合匹配任意平台**
    #[test]
    fn prop_empty_platform_set_matches_any(
        platform in arb_platform(),
        phases in proptest::collection::btree_set(arb_phase(), 0..4),
    ) {
        let descriptor = PluginDescriptor::new("Any Platform").with_phases(phases);
        prop_assert!(PluginFilter::new().platform(platform).matches(&descriptor));
    }

    /// **Feature: plugin-dispatch, Property 2: 不在阶段集合中的阶段不被选中**
    #[test]
    fn prop_unsupported_phase_excluded(
        phases in proptest::collection::btree_set(arb_phase(), 1..5),
        requested in arb_phase(),
    ) {
        let descriptor = PluginDescriptor::new("Phased").with_phases(phases.clone());
        let selected = PluginFilter::new().phase(requested).matches(&descriptor);
        prop_assert_eq!(selected, phases.contains(&requested));
    }

    /// **Feature: plugin-dispatch, Property 3: 条件之间为与关系**
    #[test]
    fn prop_filters_are_conjunctive(
        platforms in proptest::collection::btree_set(arb_platform(), 0..3),
        phases in proptest::collection::btree_set(arb_phase(), 0..3),
        platform in arb_platform(),
        phase in arb_phase(),
    ) {
        let descriptor = PluginDescriptor::new("Both")
            .with_platforms(platforms.clone())
            .with_phases(phases.clone());
        let both = PluginFilter::new().platform(platform.clone()).phase(phase).matches(&descriptor);
        let each = PluginFilter::new().platform(platform).matches(&descriptor)
            && PluginFilter::new().phase(phase).matches(&descriptor);
        prop_assert_eq!(both, each);
    }

    /// **Feature: plugin-dispatch, Property 4: 选择结果按阶段顺序排列**
    #[test]
    fn prop_selection_ordered_by_phase(
        phase_sets in proptest::collection::vec(
            proptest::collection::btree_set(arb_phase(), 0..3),
            1..8,
        ),
    ) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        for (i, phases) in phase_sets.iter().enumerate() {
            let descriptor = PluginDescriptor::new(format!("p{i}")).with_phases(phases.clone());
            registry
                .register(RecordingPlugin::new(descriptor, Behavior::Pass, calls.clone()))
                .unwrap();
        }

        let keys: Vec<(u8, Option<Phase>)> = registry
            .select(&PluginFilter::new())
            .iter()
            .map(|p| match p.descriptor().earliest_phase() {
                Some(phase) => (0, Some(phase)),
                None => (1, None),
            })
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        prop_assert_eq!(keys, sorted);
    }
}

#[test]
fn test_duplicate_registration_rejected() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    let descriptor = PluginDescriptor::new("Install Add Plugin");
    registry
        .register(RecordingPlugin::new(descriptor.clone(), Behavior::Pass, calls.clone()))
        .unwrap();
    let error = registry
        .register(RecordingPlugin::new(descriptor, Behavior::Pass, calls))
        .unwrap_err();
    assert_eq!(error, PluginError::AlreadyRegistered("Install Add Plugin".into()));
}

#[tokio::test]
async fn test_dispatch_continues_after_failures() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    for (name, behavior) in [
        ("raises", Behavior::Raise),
        ("panics", Behavior::Panic),
        ("fails", Behavior::Fail),
        ("passes", Behavior::Pass),
    ] {
        let descriptor = PluginDescriptor::new(name).with_phases([Phase::Activate]);
        registry
            .register(RecordingPlugin::new(descriptor, behavior, calls.clone()))
            .unwrap();
    }

    let mut ctx = ctx();
    let mut conn = ScriptedConnection::new("r1");
    let results = registry.dispatch(Phase::Activate, &mut ctx, &mut conn).await;

    assert_eq!(results.len(), 4);
    assert_eq!(
        results.iter().map(|r| r.success).collect::<Vec<_>>(),
        vec![false, false, false, true]
    );
    assert!(results[1].error.as_deref().unwrap().contains("plugin exploded"));
    assert_eq!(calls.lock().unwrap().len(), 4);
    assert!(!ctx.success);
    assert_eq!(ctx.requested_phase, Some(Phase::Activate));
}

#[tokio::test]
async fn test_run_named_ignores_filters() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    let descriptor = PluginDescriptor::new("panics")
        .with_phases([Phase::Commit])
        .with_platforms(["ASR9K"]);
    registry
        .register(RecordingPlugin::new(descriptor, Behavior::Panic, calls.clone()))
        .unwrap();

    let mut ctx = ctx();
    let mut conn = ScriptedConnection::new("r1");
    let result = registry.run_named("panics", &mut ctx, &mut conn).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.phase, None);
    assert!(!ctx.success);

    let missing = registry.run_named("absent", &mut ctx, &mut conn).await;
    assert!(matches!(missing, Err(PluginError::NotFound(name)) if name == "absent"));
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dispatch_filters_by_context_platform() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    registry
        .register(RecordingPlugin::new(
            PluginDescriptor::new("classic add")
                .with_platforms(["ASR9K", "CRS"])
                .with_phases([Phase::Add])
                .with_os(["XR"]),
            Behavior::Pass,
            calls.clone(),
        ))
        .unwrap();
    registry
        .register(RecordingPlugin::new(
            PluginDescriptor::new("exr add")
                .with_platforms(["NCS5500"])
                .with_phases([Phase::Add])
                .with_os(["eXR"]),
            Behavior::Pass,
            calls.clone(),
        ))
        .unwrap();

    let mut ctx = ctx();
    let mut conn = ScriptedConnection::new("r1");
    let results = registry.dispatch(Phase::Add, &mut ctx, &mut conn).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].plugin_name, "exr add");
    assert!(ctx.success);
}

#[tokio::test]
async fn test_dispatch_phases_in_canonical_order() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    for (name, phase) in [
        ("commit", Phase::Commit),
        ("activate", Phase::Activate),
        ("add", Phase::Add),
    ] {
        registry
            .register(RecordingPlugin::new(
                PluginDescriptor::new(name).with_phases([phase]),
                if phase == Phase::Activate {
                    Behavior::Fail
                } else {
                    Behavior::Pass
                },
                calls.clone(),
            ))
            .unwrap();
    }

    let mut ctx = ctx();
    let mut conn = ScriptedConnection::new("r1");
    registry
        .dispatch_phases(&[Phase::Commit, Phase::Add, Phase::Activate], &mut ctx, &mut conn)
        .await;

    assert_eq!(*calls.lock().unwrap(), vec!["add", "activate", "commit"]);
    assert!(!ctx.success);
}

#[test]
fn test_describe_brief() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    registry
        .register(RecordingPlugin::new(
            PluginDescriptor::new("Custom Commands Capture Plugin")
                .with_platforms(["ASR9K"])
                .with_phases([Phase::PreUpgrade]),
            Behavior::Pass,
            calls,
        ))
        .unwrap();

    let text = registry.describe(&PluginFilter::new(), true);
    assert_eq!(
        text,
        "[ASR9K] [Pre-Upgrade] [Any] Custom Commands Capture Plugin\n"
    );
    assert!(registry
        .describe(&PluginFilter::new().phase(Phase::Commit), true)
        .is_empty());
    assert!(registry
        .describe(&PluginFilter::new().name("Install Add Plugin"), true)
        .is_empty());
}

#[test]
fn test_empty_phase_set_is_wildcard() {
    let descriptor = PluginDescriptor {
        name: "anything".into(),
        platforms: BTreeSet::new(),
        phases: BTreeSet::new(),
        os: BTreeSet::new(),
        description: String::new(),
    };
    for phase in Phase::ALL {
        assert!(descriptor.supports_phase(phase));
    }
}
