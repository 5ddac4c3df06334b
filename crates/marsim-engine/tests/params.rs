//! World parameter writes land between steps, never during one.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use marsim_core::{MemoryProperties, NodeId, PropertyService, PropertyValue, Vector3};
use marsim_engine::{Collaborators, ConfigError, SimConfig, Simulator};
use marsim_test_utils::{fast_config, init_logging, wait_until, Harness, MockPhysics, MockScene};

#[test]
fn concurrent_gravity_writes_never_tear() {
    let config = SimConfig {
        gravity: Vector3::new(-1.0, -1.0, -1.0),
        ..fast_config()
    };
    let h = Harness::new(config);
    h.sim.start_simulation();

    let writers: Vec<_> = (1..=4)
        .map(|k| {
            let sim = h.sim.handle();
            thread::spawn(move || {
                for i in 0..200 {
                    let g = (k * 1000 + i) as f64;
                    sim.set_gravity(Vector3::new(g, g, g)).unwrap();
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }
    let target = h.physics.step_count() + 5;
    assert!(h.wait_steps(target));
    h.sim.stop_simulation();

    for step in h.physics.steps() {
        let g = step.gravity;
        assert!(g.x == g.y && g.y == g.z, "torn gravity {g}");
    }
    assert_eq!(h.physics.overlaps(), 0);
}

#[test]
fn gravity_applies_before_next_step() {
    let h = Harness::new(fast_config());
    h.step_n(1);
    h.sim.set_gravity(Vector3::new(0.0, 0.0, -1.62)).unwrap();
    h.step_n(1);
    let steps = h.physics.steps();
    assert_eq!(steps[0].gravity, Vector3::new(0.0, 0.0, -9.81));
    assert_eq!(steps[1].gravity, Vector3::new(0.0, 0.0, -1.62));
    assert_eq!(
        h.sim.latest_frame().unwrap().gravity,
        Vector3::new(0.0, 0.0, -1.62)
    );
}

#[test]
fn invalid_writes_are_rejected_at_the_call() {
    let h = Harness::new(fast_config());
    assert_eq!(
        h.sim.set_gravity(Vector3::new(f64::NAN, 0.0, 0.0)),
        Err(ConfigError::InvalidGravity)
    );
    assert!(matches!(
        h.sim.rescale_environment(Vector3::new(1.0, 0.0, 1.0)),
        Err(ConfigError::InvalidWorldParameter { .. })
    ));
    h.sim.rescale_environment(Vector3::new(2.0, 2.0, 2.0)).unwrap();
    h.step_n(1);
    assert_eq!(h.physics.steps()[0].world.scale, Vector3::new(2.0, 2.0, 2.0));
}

#[test]
fn node_connections_go_through_the_loop() {
    let h = Harness::new(fast_config());
    h.sim.connect_nodes(NodeId(1), NodeId(2));
    h.step_n(1);
    assert!(h.physics.is_connected(NodeId(1), NodeId(2)));
    assert!(!h.sim.has_sim_fault());

    h.sim.disconnect_nodes(NodeId(1), NodeId(2));
    h.step_n(1);
    assert!(!h.physics.is_connected(NodeId(1), NodeId(2)));

    // The mock refuses to join a node to itself.
    h.sim.connect_nodes(NodeId(3), NodeId(3));
    h.step_n(1);
    assert!(h.sim.has_sim_fault());
}

#[test]
fn property_changes_update_gravity_component() {
    let h = Harness::new(fast_config());
    let control = h.sim.control_center().unwrap();
    control
        .properties()
        .set("gravity_z", PropertyValue::Double(-3.0));
    control
        .properties()
        .set("no_such_key", PropertyValue::Double(1.0));
    control
        .properties()
        .set("world_erp", PropertyValue::Text("high".into()));
    assert!(wait_until(Duration::from_secs(5), || h.physics.gravity().z
        == -3.0));
    assert_eq!(h.physics.world().erp, 0.1);
}

#[test]
fn existing_properties_override_config_at_startup() {
    init_logging();
    let props = Arc::new(MemoryProperties::new());
    props.set("realtime", PropertyValue::Bool(false));
    props.set("gravity_x", PropertyValue::Double(1.5));
    let physics = MockPhysics::new();
    let log = physics.log();
    let collaborators =
        Collaborators::new(physics, MockScene::new()).with_properties(props.clone());
    let mut sim = Simulator::new(SimConfig::default(), collaborators).unwrap();
    sim.single_step();
    assert!(wait_until(Duration::from_secs(5), || log.step_count() == 1));
    assert_eq!(log.steps()[0].gravity.x, 1.5);
    sim.exit();

    let props = Arc::new(MemoryProperties::new());
    props.set("calc_ms", PropertyValue::Bool(true));
    let collaborators =
        Collaborators::new(MockPhysics::new(), MockScene::new()).with_properties(props);
    assert!(matches!(
        Simulator::new(SimConfig::default(), collaborators),
        Err(ConfigError::InvalidProperty { .. })
    ));
}

#[test]
fn startup_import_reads_qualified_property_names() {
    init_logging();
    let props = Arc::new(MemoryProperties::new());
    props.set("simulator/gravity_z", PropertyValue::Double(-3.0));
    props.set("gravity_y", PropertyValue::Double(2.0));
    props.set("gravity_x", PropertyValue::Double(1.0));
    props.set("simulator/gravity_x", PropertyValue::Double(4.0));
    let physics = MockPhysics::new();
    let log = physics.log();
    let collaborators =
        Collaborators::new(physics, MockScene::new()).with_properties(props.clone());
    let mut sim = Simulator::new(fast_config(), collaborators).unwrap();
    sim.single_step();
    assert!(wait_until(Duration::from_secs(5), || log.step_count() == 1));
    assert_eq!(log.steps()[0].gravity, Vector3::new(4.0, 2.0, -3.0));
    sim.exit();
}
