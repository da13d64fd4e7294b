
use std::collections::HashMap;
use std::net::Ipv4Addr;

use test_helpers::*;
use weave::queue::{doorbell, MsuQueue};
use weave::routing::strategies;
use weave::{Endpoint, RouteSet};
use weave_api::{ControlAction, ControlMsg, EndpointSpec, InitData, MsgKey, MsuId, MsuMessage, MsuTypeId, RuntimeId};

fn control(runtime: &weave::Runtime, msu: u32, action: ControlAction) -> anyhow::Result<()> {
    runtime.send_control(ControlMsg::new(MsuId(msu), action))?;
    Ok(())
}

fn add_local(runtime: &weave::Runtime, from: u32, type_id: u32, to: u32) -> anyhow::Result<()> {
    control(
        runtime,
        from,
        ControlAction::AddRoute {
            type_id: MsuTypeId(type_id),
            endpoint: EndpointSpec::local(MsuId(to), runtime.runtime_id()),
        },
    )
}

#[test]
fn test_round_robin_visits_every_local_instance() -> anyhow::Result<()> {
    let (forward, _) = Forward::new(1, 2);
    let (collector, seen) = Collector::new(2, Policy::RoundRobin(Ipv4Addr::UNSPECIFIED));
    let runtime = start(config(1, 2), vec![forward, collector])?;

    runtime.place_msu(0, MsuTypeId(1), MsuId(10), InitData::empty())?;
    let targets = [21, 22, 23, 24];
    for (i, msu) in targets.iter().enumerate() {
        runtime.place_msu(i % 2, MsuTypeId(2), MsuId(*msu), InitData::empty())?;
        add_local(&runtime, 10, 2, *msu)?;
    }
    // A remote endpoint never matches the local selector.
    control(
        &runtime,
        10,
        ControlAction::AddRoute {
            type_id: MsuTypeId(2),
            endpoint: EndpointSpec::remote(MsuId(90), RuntimeId(9), Ipv4Addr::new(10, 0, 0, 9)),
        },
    )?;

    for flow in 0..8 {
        runtime.enqueue(MsuId(10), DropCounter::new().message(flow, b"rr"))?;
    }
    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 8));

    let mut per_instance: HashMap<MsuId, usize> = HashMap::new();
    for received in seen.lock().unwrap().iter() {
        *per_instance.entry(received.msu).or_default() += 1;
    }
    for msu in targets {
        assert_eq!(per_instance.get(&MsuId(msu)), Some(&2), "instance {}", msu);
    }
    Ok(())
}

#[test]
fn test_shortest_queue_picks_first_minimum() {
    let (bell, _waiter) = doorbell();
    let mut routes = RouteSet::new();
    let mut queues = Vec::new();
    for (i, depth) in [3, 1, 4, 1, 5].into_iter().enumerate() {
        let queue = MsuQueue::new(8, bell.clone());
        for flow in 0..depth {
            queue.handle().try_push(MsuMessage::new(MsgKey::new(flow), "queued")).unwrap();
        }
        let endpoint = Endpoint::local(MsuId(i as u32), RuntimeId(1), Ipv4Addr::LOCALHOST, queue.handle());
        routes.add(MsuTypeId(2), endpoint, None).unwrap();
        queues.push(queue);
    }

    let chosen = strategies::shortest_queue(&mut routes, MsuTypeId(2)).unwrap();
    assert_eq!(chosen.msu, MsuId(1));
    assert_eq!(chosen.queue_len(), Some(1));
}

#[test]
fn test_add_then_remove_restores_routes() -> anyhow::Result<()> {
    let (forward, snapshots) = Forward::new(1, 2);
    let (collector, _) = Collector::new(2, Policy::KeyBased);
    let runtime = start(config(1, 1), vec![forward, collector])?;

    runtime.place_msu(0, MsuTypeId(1), MsuId(10), InitData::empty())?;
    runtime.place_msu(0, MsuTypeId(2), MsuId(20), InitData::empty())?;
    runtime.place_msu(0, MsuTypeId(2), MsuId(21), InitData::empty())?;

    let empty = snapshot(&runtime, MsuId(10), &snapshots)?;
    assert!(empty.is_empty());

    add_local(&runtime, 10, 2, 20)?;
    let one = snapshot(&runtime, MsuId(10), &snapshots)?;
    assert_eq!(one.endpoint_count(), 1);

    add_local(&runtime, 10, 2, 21)?;
    control(
        &runtime,
        10,
        ControlAction::AddRoute {
            type_id: MsuTypeId(7),
            endpoint: EndpointSpec::remote(MsuId(70), RuntimeId(2), Ipv4Addr::new(10, 0, 0, 2)),
        },
    )?;
    let three = snapshot(&runtime, MsuId(10), &snapshots)?;
    assert_eq!(three.endpoint_count(), 3);

    control(
        &runtime,
        10,
        ControlAction::RemoveRoute {
            type_id: MsuTypeId(7),
            msu: MsuId(70),
        },
    )?;
    control(
        &runtime,
        10,
        ControlAction::RemoveRoute {
            type_id: MsuTypeId(2),
            msu: MsuId(21),
        },
    )?;
    assert_eq!(snapshot(&runtime, MsuId(10), &snapshots)?, one);

    control(
        &runtime,
        10,
        ControlAction::RemoveRoute {
            type_id: MsuTypeId(2),
            msu: MsuId(20),
        },
    )?;
    assert_eq!(snapshot(&runtime, MsuId(10), &snapshots)?, empty);
    Ok(())
}

#[test]
fn test_invalid_commands_leave_routes_alone() -> anyhow::Result<()> {
    let (forward, snapshots) = Forward::new(1, 2);
    let (collector, _) = Collector::new(2, Policy::KeyBased);
    let runtime = start(config(1, 1), vec![forward, collector])?;

    runtime.place_msu(0, MsuTypeId(1), MsuId(10), InitData::empty())?;
    runtime.place_msu(0, MsuTypeId(2), MsuId(20), InitData::empty())?;
    add_local(&runtime, 10, 2, 20)?;
    let before = snapshot(&runtime, MsuId(10), &snapshots)?;

    // Duplicate, wrong type for a local instance, unknown local instance,
    // remote without an address, missing removal, zero weight.
    add_local(&runtime, 10, 2, 20)?;
    add_local(&runtime, 10, 5, 20)?;
    add_local(&runtime, 10, 2, 99)?;
    control(
        &runtime,
        10,
        ControlAction::AddRoute {
            type_id: MsuTypeId(2),
            endpoint: EndpointSpec::local(MsuId(50), RuntimeId(3)),
        },
    )?;
    control(
        &runtime,
        10,
        ControlAction::RemoveRoute {
            type_id: MsuTypeId(2),
            msu: MsuId(77),
        },
    )?;
    control(&runtime, 10, ControlAction::SetWeight(0))?;
    control(
        &runtime,
        10,
        ControlAction::Custom {
            code: 555,
            payload: bytes::Bytes::new(),
        },
    )?;

    assert_eq!(snapshot(&runtime, MsuId(10), &snapshots)?, before);
    Ok(())
}

#[test]
fn test_key_ranges_split_traffic() -> anyhow::Result<()> {
    let (forward, snapshots) = Forward::new(1, 2);
    let (collector, seen) = Collector::new(2, Policy::KeyBased);
    let runtime = start(config(1, 1), vec![forward, collector])?;

    runtime.place_msu(0, MsuTypeId(1), MsuId(10), InitData::empty())?;
    for (msu, bound) in [(20, 10), (21, 100)] {
        runtime.place_msu(0, MsuTypeId(2), MsuId(msu), InitData::empty())?;
        control(
            &runtime,
            10,
            ControlAction::AddRoute {
                type_id: MsuTypeId(2),
                endpoint: EndpointSpec::local(MsuId(msu), runtime.runtime_id()).with_key_range(bound),
            },
        )?;
    }
    snapshot(&runtime, MsuId(10), &snapshots)?;

    for flow in [0u64, 9, 10, 99, 105] {
        runtime.enqueue(MsuId(10), DropCounter::new().message(flow, b"k"))?;
    }
    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 5));

    let mut by_flow: Vec<(u64, MsuId)> = seen.lock().unwrap().iter().map(|r| (r.key.flow, r.msu)).collect();
    by_flow.sort();
    assert_eq!(
        by_flow,
        vec![
            (0, MsuId(20)),
            (9, MsuId(20)),
            (10, MsuId(21)),
            (99, MsuId(21)),
            (105, MsuId(20)),
        ]
    );

    // Moving the first bound shifts keys 10..50 onto it.
    control(
        &runtime,
        10,
        ControlAction::ModifyRoute {
            type_id: MsuTypeId(2),
            msu: MsuId(20),
            key_range: 50,
        },
    )?;
    runtime.enqueue(MsuId(10), DropCounter::new().message(30, b"k"))?;
    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 6));
    assert_eq!(seen.lock().unwrap()[5].msu, MsuId(20));
    Ok(())
}
