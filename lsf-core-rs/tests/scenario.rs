//! Controller scenarios against simulated lamps
//!
//! - Group of two lamps, scene over the group, apply: two transitions, one
//!   `ScenesApplied`
//! - Dependency integrity and size bound through the managers
//! - Restart from disk, including a corrupted blob
//! - Fan-out reduction with replies released concurrently in random order

use std::sync::Arc;
use std::time::Duration;

use lsf_core::clock::ManualClock;
use lsf_core::error::{LsfError, ResponseCode};
use lsf_core::fanout::{ConnectionState, LampCall, LampClients};
use lsf_core::lamp::LampRequest;
use lsf_core::notify::{EventKind, Notification};
use lsf_core::sim::SimLampLink;
use lsf_core::{ControllerConfig, ControllerService, EntityKind, LampGroup, LampState, Scene, TransitionToState};
use rand::seq::SliceRandom;
use tokio::sync::broadcast;

fn controller(dir: &std::path::Path, sim: Arc<SimLampLink>) -> ControllerService {
    let mut config = ControllerConfig::new("ctrl-a", dir);
    config.rank.mac = Some("00:11:22:33:44:55".to_string());
    ControllerService::new(config, sim, Arc::new(ManualClock::new(1_000))).unwrap()
}

async fn wait_connected(lamps: &LampClients, ids: &[&str]) {
    for _ in 0..2000 {
        if ids
            .iter()
            .all(|id| lamps.connection_state(id) == Some(ConnectionState::Connected))
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("lamps {:?} never connected", ids);
}

fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut seen = Vec::new();
    while let Ok(n) = rx.try_recv() {
        seen.push(n);
    }
    seen
}

#[tokio::test]
async fn test_apply_scene_over_group() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimLampLink::new());
    let service = controller(dir.path(), sim.clone());
    service.start().unwrap();

    for id in ["l1", "l2"] {
        let endpoint = sim.add_lamp(id, id);
        service.lamp_clients().lamp_found(endpoint);
    }
    wait_connected(service.lamp_clients(), &["l1", "l2"]).await;

    let group = service
        .lamp_groups()
        .create("Kitchen", "en", LampGroup::new(vec!["l1".into(), "l2".into()], vec![]))
        .unwrap();
    let warm = LampState::new(true, 0, 0, 2700, 80);
    let scene = Scene {
        transition_to_state: vec![TransitionToState {
            lamps: vec![],
            lamp_groups: vec![group.clone()],
            state: warm,
            transition_period: 500,
        }],
        ..Default::default()
    };
    let scene_id = service.scenes().create("Dinner", "en", scene).unwrap();

    let mut signals = service.notifications().subscribe();
    let reply = service.scenes().apply(&[scene_id.clone()]).await.unwrap();

    assert_eq!(reply.code, ResponseCode::Ok);
    assert_eq!(reply.counter.success_count, 2);
    assert_eq!(reply.counter.not_found_count, 0);

    let transitions: Vec<_> = sim
        .calls()
        .into_iter()
        .filter(|(_, request)| matches!(request, LampRequest::TransitionState { .. }))
        .collect();
    assert_eq!(transitions.len(), 2);
    assert_eq!(sim.state("l1"), Some(warm));
    assert_eq!(sim.state("l2"), Some(warm));

    let applied: Vec<_> = drain(&mut signals)
        .into_iter()
        .filter(|n| n.entity == EntityKind::Scene && n.event == EventKind::Applied)
        .collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].ids, vec![scene_id]);
    assert_eq!(applied[0].signal_name(), "ScenesApplied");
}

#[tokio::test]
async fn test_dependency_integrity() {
    let dir = tempfile::tempdir().unwrap();
    let service = controller(dir.path(), Arc::new(SimLampLink::new()));

    let group = service
        .lamp_groups()
        .create("Hall", "en", LampGroup::new(vec!["l1".into()], vec![]))
        .unwrap();
    let scene = Scene {
        transition_to_state: vec![TransitionToState {
            lamp_groups: vec![group.clone()],
            ..Default::default()
        }],
        ..Default::default()
    };
    let scene_id = service.scenes().create("Night", "en", scene).unwrap();

    let err = service.lamp_groups().delete(&group).unwrap_err();
    assert_eq!(err.code(), ResponseCode::Dependency);
    assert!(service.lamp_groups().get(&group).is_ok());
    assert!(service.scenes().get(&scene_id).is_ok());

    service.scenes().delete(&scene_id).unwrap();
    service.lamp_groups().delete(&group).unwrap();
    assert!(matches!(service.lamp_groups().get(&group), Err(LsfError::NotFound(_))));
}

#[tokio::test]
async fn test_size_bound_leaves_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ControllerConfig::new("ctrl-a", dir.path());
    config.rank.mac = Some("00:11:22:33:44:55".to_string());
    config.limits.max_blob_len = 400;
    let service = ControllerService::new(config, Arc::new(SimLampLink::new()), Arc::new(ManualClock::new(1))).unwrap();

    let mut created = Vec::new();
    let err = loop {
        match service.presets().create("Preset", "en", LampState::new(true, 1, 2, 3000, 4)) {
            Ok(id) => created.push(id),
            Err(e) => break e,
        }
        assert!(created.len() < 100, "size bound never hit");
    };
    assert_eq!(err.code(), ResponseCode::OutOfResources);
    assert_eq!(service.presets().get_all_ids().unwrap(), {
        let mut ids = created.clone();
        ids.sort();
        ids
    });
}

#[tokio::test]
async fn test_restart_restores_entities() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimLampLink::new());

    let (preset, group) = {
        let service = controller(dir.path(), sim.clone());
        let preset = service
            .presets()
            .create("Reading", "en", LampState::new(true, 10, 20, 4000, 90))
            .unwrap();
        let group = service
            .lamp_groups()
            .create("Desk", "en", LampGroup::new(vec!["l9".into()], vec![]))
            .unwrap();
        service.persistence().run_cycle();
        (preset, group)
    };

    // Corrupt the group file: it must read back as empty, presets survive
    let group_file = dir.path().join(lsf_core::BlobType::LampGroup.file_name());
    let mut bytes = std::fs::read(&group_file).unwrap();
    let last = bytes.len() - 2;
    bytes[last] ^= 0x01;
    std::fs::write(&group_file, bytes).unwrap();

    let service = controller(dir.path(), sim);
    assert_eq!(service.presets().get_name(&preset, "en").unwrap(), "Reading");
    assert_eq!(
        service.presets().get(&preset).unwrap().payload,
        LampState::new(true, 10, 20, 4000, 90)
    );
    assert!(service.lamp_groups().get(&group).is_err());
    assert!(service.lamp_groups().get_all_ids().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fanout_reduction_random_release_order() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimLampLink::new());
    let service = controller(dir.path(), sim.clone());
    service.start().unwrap();

    let ok_lamps = ["a1", "a2", "a3", "a4"];
    let failing = ["f1", "f2"];
    for id in ok_lamps.iter().chain(failing.iter()) {
        let endpoint = sim.add_lamp(id, id);
        service.lamp_clients().lamp_found(endpoint);
    }
    let all: Vec<&str> = ok_lamps.iter().chain(failing.iter()).copied().collect();
    wait_connected(service.lamp_clients(), &all).await;
    for id in failing {
        sim.fail_with(id, Some(ResponseCode::Rejected));
    }

    let mut calls: Vec<LampCall> = all
        .iter()
        .map(|id| LampCall::new(*id, LampRequest::GetState))
        .collect();
    calls.push(LampCall::new("ghost1", LampRequest::GetState));
    calls.push(LampCall::new("ghost2", LampRequest::GetState));

    let mut signals = service.notifications().subscribe();
    let marker = Notification::new(EntityKind::Lamp, EventKind::StateChanged, vec!["marker".into()]);

    sim.set_hold(true);
    let pending = service.lamp_clients().submit(calls, Some(marker)).unwrap();
    sim.wait_held(all.len()).await;

    // Replies race each other on the worker threads
    let mut order = all.clone();
    order.shuffle(&mut rand::thread_rng());
    let releases: Vec<_> = order
        .into_iter()
        .map(|id| {
            let sim = sim.clone();
            tokio::spawn(async move { sim.release(id) })
        })
        .collect();
    for release in releases {
        assert!(release.await.unwrap());
    }

    let reply = pending.wait().await.unwrap();
    assert_eq!(reply.code, ResponseCode::PartialSuccess);
    assert_eq!(reply.counter.success_count, 4);
    assert_eq!(reply.counter.fail_count, 2);
    assert_eq!(reply.counter.not_found_count, 2);
    assert_eq!(reply.counter.num_waiting, 0);
    assert_eq!(reply.results.len(), 8);

    let markers = drain(&mut signals)
        .into_iter()
        .filter(|n| n.ids == vec!["marker".to_string()])
        .count();
    assert_eq!(markers, 1);
}
