#![forbid(unsafe_code)]

//! Open-strategy behavior through the public facade.
//!
//! Each strategy is driven with sync loads so every open resolves inline;
//! async scheduling has its own suite.
//!
//! Run:
//!   cargo test -p ftui-panels --test open_strategies

use std::cell::RefCell;
use std::rc::Rc;

use ftui_panels::{
    EventKind, InstanceState, LayerKind, LifecycleSettings, LoadMode, OpenOptions, OpenStrategy,
    Orchestrator, PanelCaps, PanelConfig, PanelError, PanelEvent, Payload, PoolSettings,
    RuntimeConfig,
};
use ftui_panels_harness::{PanelCall, ScriptedAssetSource};

fn runtime(panels: Vec<PanelConfig>) -> Orchestrator<ScriptedAssetSource> {
    let mut config = RuntimeConfig::default().pool(PoolSettings::disabled());
    for panel in panels {
        config = config.panel(panel.load_mode(LoadMode::Sync));
    }
    Orchestrator::new(ScriptedAssetSource::new(), config)
}

fn open(ui: &mut Orchestrator<ScriptedAssetSource>, name: &str, payload: Payload) -> ftui_panels::InstanceId {
    ui.open_ui(name, payload, OpenOptions::new())
        .expect("open")
        .instance()
        .expect("sync open is ready")
}

// ============================================================================
// Single
// ============================================================================

#[test]
fn single_replaces_previous_instance() {
    let mut ui = runtime(vec![PanelConfig::new("Settings").strategy(OpenStrategy::Single)]);
    let first = open(&mut ui, "Settings", Payload::new("audio"));
    let second = open(&mut ui, "Settings", Payload::new("video"));

    assert_ne!(first, second);
    assert!(ui.instance(first).is_none());
    let live = ui.get_instances("Settings");
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id(), second);
    assert_eq!(
        live[0].payload().downcast_ref::<&str>().copied(),
        Some("video")
    );
}

#[test]
fn single_hides_old_before_showing_new() {
    let mut ui = runtime(vec![PanelConfig::new("Settings")]);
    open(&mut ui, "Settings", Payload::none());
    ui.source().journal().take();
    open(&mut ui, "Settings", Payload::none());

    let calls: Vec<(u64, PanelCall)> = ui
        .source()
        .journal()
        .entries()
        .into_iter()
        .filter(|e| !matches!(e.call, PanelCall::Attach { .. } | PanelCall::Bind))
        .map(|e| (e.panel, e.call))
        .collect();
    assert_eq!(
        calls,
        vec![
            (1, PanelCall::Hide(None)),
            (2, PanelCall::Show(None)),
            (1, PanelCall::Dispose),
        ]
    );
}

#[test]
fn single_emits_conflict_then_open() {
    let mut ui = runtime(vec![PanelConfig::new("Settings")]);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let _sub = ui.subscribe_all(move |e| sink.borrow_mut().push(e.kind()));

    let first = open(&mut ui, "Settings", Payload::none());
    seen.borrow_mut().clear();
    open(&mut ui, "Settings", Payload::none());

    let kinds = seen.borrow().clone();
    let conflict = kinds.iter().position(|k| *k == EventKind::StrategyConflict);
    let opened = kinds.iter().position(|k| *k == EventKind::UiOpened);
    assert!(kinds.contains(&EventKind::UiClosed));
    assert!(conflict.is_some() && opened.is_some());
    assert!(conflict < opened, "conflict must precede open: {kinds:?}");
    assert!(ui.instance(first).is_none());
}

// ============================================================================
// Stack
// ============================================================================

#[test]
fn stack_hides_instead_of_destroying() {
    let mut ui = runtime(vec![PanelConfig::new("Dialog").strategy(OpenStrategy::Stack)]);
    let d1 = open(&mut ui, "Dialog", Payload::none());
    let d2 = open(&mut ui, "Dialog", Payload::none());
    let d3 = open(&mut ui, "Dialog", Payload::none());

    assert_eq!(ui.instance(d1).map(|i| i.state()), Some(InstanceState::Hidden));
    assert_eq!(ui.instance(d2).map(|i| i.state()), Some(InstanceState::Hidden));
    assert_eq!(ui.instance(d3).map(|i| i.state()), Some(InstanceState::Shown));
    assert_eq!(ui.get_instances("Dialog").len(), 3);
}

#[test]
fn stack_unwinds_one_level_per_back_step() {
    let mut ui = runtime(vec![PanelConfig::new("Dialog").strategy(OpenStrategy::Stack)]);
    let d1 = open(&mut ui, "Dialog", Payload::none());
    let d2 = open(&mut ui, "Dialog", Payload::none());
    let d3 = open(&mut ui, "Dialog", Payload::none());

    assert!(ui.go_back());
    assert!(ui.instance(d3).is_none());
    assert!(ui.lifecycle().is_active(d2));
    assert!(!ui.lifecycle().is_active(d1));

    assert!(ui.go_back());
    assert!(ui.instance(d2).is_none());
    assert!(ui.lifecycle().is_active(d1));

    assert!(ui.go_back());
    assert!(!ui.is_ui_open("Dialog"));
    assert!(ui.get_instances("Dialog").is_empty());
    assert!(!ui.go_back());
}

#[test]
fn stack_restore_can_be_disabled() {
    let config = RuntimeConfig::default()
        .pool(PoolSettings::disabled())
        .lifecycle(LifecycleSettings {
            restore_stacked: false,
            ..LifecycleSettings::default()
        })
        .panel(
            PanelConfig::new("Dialog")
                .strategy(OpenStrategy::Stack)
                .load_mode(LoadMode::Sync),
        );
    let mut ui = Orchestrator::new(ScriptedAssetSource::new(), config);
    let d1 = open(&mut ui, "Dialog", Payload::none());
    open(&mut ui, "Dialog", Payload::none());

    assert!(ui.go_back());
    assert!(!ui.lifecycle().is_active(d1));
    assert_eq!(ui.instance(d1).map(|i| i.state()), Some(InstanceState::Hidden));
}

#[test]
fn show_ui_brings_hidden_stack_entry_back_on_top() {
    let mut ui = runtime(vec![PanelConfig::new("Dialog").strategy(OpenStrategy::Stack)]);
    let d1 = open(&mut ui, "Dialog", Payload::none());
    let d2 = open(&mut ui, "Dialog", Payload::none());

    ui.show_ui(d1).expect("show hidden");
    assert!(ui.lifecycle().is_active(d1));
    assert!(!ui.lifecycle().is_active(d2));
    assert_eq!(
        ui.navigation().back_target(|id| ui.lifecycle().is_active(id)).map(|e| e.instance_id),
        Some(d1)
    );
}

// ============================================================================
// Limited / Queue
// ============================================================================

#[test]
fn limited_evicts_oldest_at_capacity() {
    let mut ui = runtime(vec![
        PanelConfig::new("Toast")
            .strategy(OpenStrategy::Limited)
            .max_instances(2),
    ]);
    let t1 = open(&mut ui, "Toast", Payload::none());
    let t2 = open(&mut ui, "Toast", Payload::none());
    assert_eq!(ui.get_instances("Toast").len(), 2);

    let t3 = open(&mut ui, "Toast", Payload::none());
    assert!(ui.instance(t1).is_none(), "oldest toast evicted");
    let ids: Vec<_> = ui.get_instances("Toast").iter().map(|i| i.id()).collect();
    assert_eq!(ids, vec![t2, t3]);
}

#[test]
fn queue_behaves_as_eviction_on_demand() {
    let mut ui = runtime(vec![
        PanelConfig::new("Notice")
            .strategy(OpenStrategy::Queue)
            .max_instances(2),
    ]);
    let n1 = open(&mut ui, "Notice", Payload::none());
    open(&mut ui, "Notice", Payload::none());
    open(&mut ui, "Notice", Payload::none());

    assert!(ui.instance(n1).is_none());
    assert_eq!(ui.get_instances("Notice").len(), 2);
    assert_eq!(ui.scheduler().waiting_len(), 0);
}

#[test]
fn queue_and_multiple_are_not_back_eligible() {
    let mut ui = runtime(vec![
        PanelConfig::new("Notice").strategy(OpenStrategy::Queue).max_instances(3),
        PanelConfig::new("Chip").strategy(OpenStrategy::Multiple),
    ]);
    open(&mut ui, "Notice", Payload::none());
    open(&mut ui, "Chip", Payload::none());

    assert!(!ui.can_go_back());
    assert!(!ui.go_back());
    assert_eq!(ui.get_instances("Notice").len(), 1);
    assert_eq!(ui.get_instances("Chip").len(), 1);
}

// ============================================================================
// Multiple
// ============================================================================

#[test]
fn multiple_rejects_beyond_hard_cap() {
    let config = RuntimeConfig::default()
        .pool(PoolSettings::disabled())
        .lifecycle(LifecycleSettings {
            multiple_hard_cap: 3,
            ..LifecycleSettings::default()
        })
        .panel(
            PanelConfig::new("Chip")
                .strategy(OpenStrategy::Multiple)
                .load_mode(LoadMode::Sync),
        );
    let mut ui = Orchestrator::new(ScriptedAssetSource::new(), config);
    for _ in 0..3 {
        open(&mut ui, "Chip", Payload::none());
    }
    let err = ui
        .open_ui("Chip", Payload::none(), OpenOptions::new())
        .unwrap_err();
    assert!(matches!(
        err,
        PanelError::StrategyRejected {
            strategy: OpenStrategy::Multiple,
            active: 3,
            ..
        }
    ));
    assert_eq!(ui.get_instances("Chip").len(), 3);
    assert_eq!(ui.source().sync_loads(), 3, "rejected before loading");
}

#[test]
fn multiple_default_cap_is_ten() {
    let mut ui = runtime(vec![PanelConfig::new("Chip").strategy(OpenStrategy::Multiple)]);
    for _ in 0..10 {
        open(&mut ui, "Chip", Payload::none());
    }
    assert!(ui.open_ui("Chip", Payload::none(), OpenOptions::new()).is_err());
    assert_eq!(ui.get_instances("Chip").len(), 10);
}

// ============================================================================
// Failure paths leave prior state untouched
// ============================================================================

#[test]
fn failed_load_keeps_existing_single_instance() {
    let mut ui = runtime(vec![PanelConfig::new("Settings")]);
    let first = open(&mut ui, "Settings", Payload::none());
    ui.source_mut().fail("Settings");

    let err = ui
        .open_ui("Settings", Payload::none(), OpenOptions::new())
        .unwrap_err();
    assert!(matches!(err, PanelError::AssetLoadFailure { .. }));
    assert!(ui.lifecycle().is_active(first));
}

#[test]
fn rejected_payload_keeps_existing_single_instance() {
    let mut ui = runtime(vec![PanelConfig::new("Settings")]);
    let first = open(&mut ui, "Settings", Payload::none());
    ui.source_mut().reject_payload("Settings");

    let err = ui
        .open_ui("Settings", Payload::new(7_u32), OpenOptions::new())
        .unwrap_err();
    assert!(matches!(err, PanelError::CreationFailure { .. }));
    assert!(ui.lifecycle().is_active(first));
    assert_eq!(ui.get_instances("Settings").len(), 1);
}

#[test]
fn handle_without_visibility_is_rejected() {
    let source = ScriptedAssetSource::new().with_caps(PanelCaps::REUSABLE);
    let config = RuntimeConfig::default()
        .panel(PanelConfig::new("Broken").load_mode(LoadMode::Sync));
    let mut ui = Orchestrator::new(source, config);

    let err = ui
        .open_ui("Broken", Payload::none(), OpenOptions::new())
        .unwrap_err();
    assert!(matches!(err, PanelError::CreationFailure { .. }));
    assert!(ui.lifecycle().is_empty());
}

#[test]
fn show_failure_leaves_no_instance() {
    let mut ui = runtime(vec![PanelConfig::new("Glitch")]);
    ui.source_mut().fail_show("Glitch");
    assert!(ui.open_ui("Glitch", Payload::none(), OpenOptions::new()).is_err());
    assert!(ui.get_instances("Glitch").is_empty());
    assert!(ui.navigation().is_empty());
}

#[test]
fn show_failure_keeps_existing_single_instance() {
    let mut ui = runtime(vec![PanelConfig::new("Settings")]);
    let first = open(&mut ui, "Settings", Payload::none());
    ui.source_mut().fail_show("Settings");

    let err = ui
        .open_ui("Settings", Payload::none(), OpenOptions::new())
        .unwrap_err();
    assert!(matches!(err, PanelError::CreationFailure { .. }));
    assert!(ui.lifecycle().is_active(first));
    assert!(ui.is_ui_open("Settings"));
    assert_eq!(ui.get_instances("Settings").len(), 1);
    assert_eq!(ui.navigation().len(), 1);
    assert_eq!(
        ui.source()
            .journal()
            .calls_for("Settings")
            .iter()
            .filter(|c| matches!(c, PanelCall::Show(_)))
            .count(),
        2,
        "the displaced panel is shown again"
    );
}

#[test]
fn show_failure_keeps_limited_instances() {
    let mut ui = runtime(vec![
        PanelConfig::new("Toast")
            .strategy(OpenStrategy::Limited)
            .max_instances(2),
    ]);
    let t1 = open(&mut ui, "Toast", Payload::none());
    let t2 = open(&mut ui, "Toast", Payload::none());
    ui.source_mut().fail_show("Toast");

    assert!(ui.open_ui("Toast", Payload::none(), OpenOptions::new()).is_err());
    let ids: Vec<_> = ui.get_instances("Toast").iter().map(|i| i.id()).collect();
    assert_eq!(ids, vec![t1, t2]);
    assert!(ui.lifecycle().is_active(t1) && ui.lifecycle().is_active(t2));
}

#[test]
fn show_failure_keeps_stack_top_visible() {
    let mut ui = runtime(vec![PanelConfig::new("Dialog").strategy(OpenStrategy::Stack)]);
    let d1 = open(&mut ui, "Dialog", Payload::none());
    let d2 = open(&mut ui, "Dialog", Payload::none());
    ui.source_mut().fail_show("Dialog");

    assert!(ui.open_ui("Dialog", Payload::none(), OpenOptions::new()).is_err());
    assert_eq!(ui.instance(d2).map(|i| i.state()), Some(InstanceState::Shown));
    assert_eq!(ui.instance(d1).map(|i| i.state()), Some(InstanceState::Hidden));
    assert_eq!(ui.get_instances("Dialog").len(), 2);

    // The stack still unwinds as before.
    assert!(ui.go_back());
    assert!(ui.lifecycle().is_active(d1));
}

#[test]
fn panel_that_failed_to_show_is_disposed_not_pooled() {
    let config = RuntimeConfig::default()
        .pool(PoolSettings::default())
        .panel(PanelConfig::new("Glitch").load_mode(LoadMode::Sync));
    let mut ui = Orchestrator::new(ScriptedAssetSource::new(), config);
    ui.source_mut().fail_show("Glitch");

    assert!(ui.open_ui("Glitch", Payload::none(), OpenOptions::new()).is_err());
    assert_eq!(ui.lifecycle().pool_size_of("Glitch"), 0);
    assert_eq!(
        ui.source().journal().calls_for("Glitch").last(),
        Some(&PanelCall::Dispose)
    );

    ui.source_mut().heal("Glitch");
    let id = open(&mut ui, "Glitch", Payload::none());
    assert!(ui.lifecycle().is_active(id));
}

#[test]
fn unknown_panel_without_synthesis_is_config_not_found() {
    let config = RuntimeConfig::default().synthesize_missing_configs(false);
    let mut ui = Orchestrator::new(ScriptedAssetSource::new(), config);
    let err = ui
        .open_ui("Nowhere", Payload::none(), OpenOptions::new())
        .unwrap_err();
    assert!(matches!(err, PanelError::ConfigNotFound { .. }));
}

#[test]
fn empty_name_is_invalid() {
    let mut ui = runtime(Vec::new());
    assert!(matches!(
        ui.open_ui("", Payload::none(), OpenOptions::new()),
        Err(PanelError::InvalidArgument(_))
    ));
}

// ============================================================================
// Layers and animation tags
// ============================================================================

#[test]
fn layer_override_and_render_order() {
    let mut ui = runtime(vec![PanelConfig::new("Help").layer(LayerKind::Popup)]);
    let id = ui
        .open_ui("Help", Payload::none(), OpenOptions::new().layer(LayerKind::System))
        .expect("open")
        .instance()
        .expect("ready");
    let inst = ui.instance(id).expect("live");
    assert_eq!(inst.layer(), LayerKind::System);
    assert_eq!(inst.render_order(), LayerKind::System.default_render_order());
    assert_eq!(ui.layers().panel_count_of(LayerKind::System), 1);

    ui.close_ui(id);
    assert_eq!(ui.layers().panel_count_of(LayerKind::System), 0);
}

#[test]
fn animation_tags_follow_capabilities() {
    let mut ui = runtime(vec![
        PanelConfig::new("Fancy").animations(Some("fade_in"), Some("fade_out")),
    ]);
    let opened = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&opened);
    let _sub = ui.subscribe(EventKind::UiOpened, move |e| {
        if let PanelEvent::UiOpened { animation, .. } = e {
            sink.borrow_mut().push(animation.clone());
        }
    });

    let id = open(&mut ui, "Fancy", Payload::none());
    ui.close_ui(id);
    assert_eq!(
        ui.source().journal().calls_for("Fancy")
            .into_iter()
            .filter(|c| matches!(c, PanelCall::Show(_) | PanelCall::Hide(_)))
            .collect::<Vec<_>>(),
        vec![
            PanelCall::Show(Some("fade_in".into())),
            PanelCall::Hide(Some("fade_out".into())),
        ]
    );

    ui.source_mut().set_caps("Fancy", PanelCaps::VISIBILITY);
    open(&mut ui, "Fancy", Payload::none());
    assert_eq!(*opened.borrow(), vec![Some("fade_in".to_owned()), None]);
}

#[test]
fn skip_animation_drops_tags() {
    let mut ui = runtime(vec![PanelConfig::new("Fancy").animations(Some("pop"), None)]);
    ui.open_ui("Fancy", Payload::none(), OpenOptions::new().skip_animation())
        .expect("open");
    assert!(ui
        .source()
        .journal()
        .calls_for("Fancy")
        .contains(&PanelCall::Show(None)));
}
