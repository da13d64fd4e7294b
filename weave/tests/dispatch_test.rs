
use std::sync::Arc;

use test_helpers::*;
use weave::{MsuContext, MsuType, Next};
use weave_api::{
    ControlAction, ControlMsg, EndpointSpec, InitData, MsuError, MsuId, MsuMessage, MsuResult, MsuTypeId,
    RuntimeId, StatKind,
};

/// A type without a receive capability.
struct Mute;

impl MsuType for Mute {
    fn id(&self) -> MsuTypeId {
        MsuTypeId(40)
    }

    fn name(&self) -> &str {
        "mute"
    }
}

/// Fails on every message.
struct Broken;

impl MsuType for Broken {
    fn id(&self) -> MsuTypeId {
        MsuTypeId(41)
    }

    fn name(&self) -> &str {
        "broken"
    }

    fn receive(&self, _ctx: &mut MsuContext<'_>, _msg: MsuMessage) -> MsuResult<Next> {
        Err(MsuError::Code(-22))
    }
}

/// Sends every message to both collectors through `call_type`.
struct FanOut;

impl MsuType for FanOut {
    fn id(&self) -> MsuTypeId {
        MsuTypeId(42)
    }

    fn name(&self) -> &str {
        "fan-out"
    }

    fn receive(&self, ctx: &mut MsuContext<'_>, msg: MsuMessage) -> MsuResult<Next> {
        let copy = MsuMessage::with_header(msg.header.clone(), msg.payload.clone());
        ctx.call_type(MsuTypeId(2), copy)
            .map_err(|err| MsuError::Other(err.into()))?;
        Ok(Next::route(MsuTypeId(5), msg))
    }
}

fn add_route(runtime: &weave::Runtime, from: u32, type_id: u32, to: u32) -> anyhow::Result<()> {
    runtime.send_control(ControlMsg::new(
        MsuId(from),
        ControlAction::AddRoute {
            type_id: MsuTypeId(type_id),
            endpoint: EndpointSpec::local(MsuId(to), runtime.runtime_id()),
        },
    ))?;
    Ok(())
}

#[test]
fn test_every_message_released_exactly_once() -> anyhow::Result<()> {
    let (forward, _) = Forward::new(1, 2);
    let (to_nowhere, _) = Forward::new(6, 99);
    let (collector, seen) = Collector::new(2, Policy::KeyBased);
    let runtime = start(
        config(1, 2),
        vec![forward, to_nowhere, collector, Arc::new(Mute) as Arc<dyn MsuType>, Arc::new(Broken)],
    )?;
    let drops = DropCounter::new();

    runtime.place_msu(0, MsuTypeId(1), MsuId(10), InitData::empty())?;
    runtime.place_msu(0, MsuTypeId(6), MsuId(11), InitData::empty())?;
    runtime.place_msu(1, MsuTypeId(2), MsuId(20), InitData::empty())?;
    runtime.place_msu(1, MsuTypeId(40), MsuId(40), InitData::empty())?;
    runtime.place_msu(1, MsuTypeId(41), MsuId(41), InitData::empty())?;

    // No route yet: released by the engine.
    runtime.enqueue(MsuId(10), drops.message(1, b"early"))?;
    assert!(wait_until(WAIT, || drops.released() == 1));

    add_route(&runtime, 10, 2, 20)?;
    for flow in 0..5 {
        runtime.enqueue(MsuId(10), drops.message(flow, b"delivered"))?;
    }
    // Unknown next-hop type, missing capability, failing capability.
    runtime.enqueue(MsuId(11), drops.message(7, b"unknown"))?;
    runtime.enqueue(MsuId(40), drops.message(8, b"mute"))?;
    runtime.enqueue(MsuId(41), drops.message(9, b"broken"))?;

    assert!(wait_until(WAIT, || drops.released() == 9));
    assert_eq!(seen.lock().unwrap().len(), 5);

    let stats = runtime.stats();
    assert!(wait_until(WAIT, || {
        [10, 11, 40, 41]
            .iter()
            .all(|msu| stats.last_value(StatKind::ErrorCount, *msu) == Some(1.0))
    }));
    assert!(wait_until(WAIT, || {
        stats.last_value(StatKind::ItemsProcessed, 10) == Some(5.0)
            && stats.last_value(StatKind::ItemsProcessed, 20) == Some(5.0)
    }));

    runtime.shutdown()?;
    assert_eq!(drops.released(), 9);
    Ok(())
}

#[test]
fn test_provenance_records_each_hop() -> anyhow::Result<()> {
    let (forward, _) = Forward::new(1, 2);
    let (collector, seen) = Collector::new(2, Policy::KeyBased);
    let runtime = start(config(4, 1), vec![forward, collector])?;

    runtime.place_msu(0, MsuTypeId(1), MsuId(10), InitData::empty())?;
    runtime.place_msu(0, MsuTypeId(2), MsuId(20), InitData::empty())?;
    add_route(&runtime, 10, 2, 20)?;
    runtime.enqueue(MsuId(10), DropCounter::new().message(3, b"x"))?;

    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 1));
    let received = seen.lock().unwrap()[0].clone();
    assert_eq!(received.msu, MsuId(20));
    assert_eq!(received.hops.len(), 1);
    assert_eq!(received.hops[0].runtime, RuntimeId(4));
    assert_eq!(received.hops[0].msu, MsuId(10));
    assert_eq!(received.hops[0].type_id, MsuTypeId(1));
    Ok(())
}

#[test]
fn test_by_id_reaches_the_named_instance() -> anyhow::Result<()> {
    let (forward, _) = Forward::new(1, 2);
    let (collector, seen) = Collector::new(2, Policy::ById(MsuId(22)));
    let runtime = start(config(1, 2), vec![forward, collector])?;

    runtime.place_msu(0, MsuTypeId(1), MsuId(10), InitData::empty())?;
    for (worker, msu) in [(0, 21), (1, 22), (1, 23)] {
        runtime.place_msu(worker, MsuTypeId(2), MsuId(msu), InitData::empty())?;
        add_route(&runtime, 10, 2, msu)?;
    }
    for flow in 0..12 {
        runtime.enqueue(MsuId(10), DropCounter::new().message(flow, b"pinned"))?;
    }

    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 12));
    assert!(seen.lock().unwrap().iter().all(|r| r.msu == MsuId(22)));
    Ok(())
}

#[test]
fn test_call_type_fans_out() -> anyhow::Result<()> {
    let (left, left_seen) = Collector::new(2, Policy::KeyBased);
    let (right, right_seen) = Collector::new(5, Policy::KeyBased);
    let runtime = start(config(1, 1), vec![Arc::new(FanOut) as Arc<dyn MsuType>, left, right])?;
    let drops = DropCounter::new();

    runtime.place_msu(0, MsuTypeId(42), MsuId(42), InitData::empty())?;
    runtime.place_msu(0, MsuTypeId(2), MsuId(20), InitData::empty())?;
    runtime.place_msu(0, MsuTypeId(5), MsuId(50), InitData::empty())?;
    add_route(&runtime, 42, 2, 20)?;
    add_route(&runtime, 42, 5, 50)?;

    for flow in 0..3 {
        runtime.enqueue(MsuId(42), drops.message(flow, b"both"))?;
    }
    assert!(wait_until(WAIT, || {
        left_seen.lock().unwrap().len() == 3 && right_seen.lock().unwrap().len() == 3
    }));
    // Clones share one payload: it goes once both copies are done.
    assert!(wait_until(WAIT, || drops.released() == 3));
    Ok(())
}
