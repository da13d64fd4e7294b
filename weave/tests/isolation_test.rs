
use bytes::Bytes;
use std::sync::Arc;

use test_helpers::*;
use weave::{CreateError, MsuContext, MsuType, Next, RuntimeEvent, SystemError};
use weave_api::{ControlAction, ControlMsg, InitData, MsuError, MsuId, MsuMessage, MsuResult, MsuTypeId, StatKind};

/// Panics in whichever capability its input asks for.
struct Faulty;

impl MsuType for Faulty {
    fn id(&self) -> MsuTypeId {
        MsuTypeId(50)
    }

    fn name(&self) -> &str {
        "faulty"
    }

    fn init(&self, _ctx: &mut MsuContext<'_>, data: &InitData) -> MsuResult<()> {
        if data.as_str() == Some("panic") {
            panic!("init bug");
        }
        Ok(())
    }

    fn destroy(&self, _ctx: &mut MsuContext<'_>) {
        panic!("destroy bug");
    }

    fn receive(&self, _ctx: &mut MsuContext<'_>, msg: MsuMessage) -> MsuResult<Next> {
        if &msg.payload[..] == b"panic" {
            panic!("type bug");
        }
        Ok(Next::Done(msg))
    }

    fn receive_ctrl(&self, _ctx: &mut MsuContext<'_>, _code: u32, _payload: Bytes) -> MsuResult<()> {
        panic!("control bug");
    }
}

fn faulty_with_collector() -> anyhow::Result<(weave::Runtime, Log<Received>)> {
    let (collector, seen) = Collector::new(2, Policy::KeyBased);
    let runtime = start(config(1, 1), vec![Arc::new(Faulty) as Arc<dyn MsuType>, collector])?;
    runtime.place_msu(0, MsuTypeId(50), MsuId(50), InitData::empty())?;
    runtime.place_msu(0, MsuTypeId(2), MsuId(20), InitData::empty())?;
    Ok((runtime, seen))
}

#[test]
fn test_panicking_receive_spares_its_worker() -> anyhow::Result<()> {
    let (runtime, seen) = faulty_with_collector()?;
    let drops = DropCounter::new();

    runtime.enqueue(MsuId(50), drops.message(1, b"panic"))?;
    assert!(wait_until(WAIT, || runtime.stats().last_value(StatKind::ErrorCount, 50) == Some(1.0)));
    assert_eq!(drops.released(), 1);

    // The sibling on the same worker keeps receiving.
    runtime.enqueue(MsuId(20), drops.message(2, b"after"))?;
    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 1));
    assert_eq!(seen.lock().unwrap()[0].payload, b"after");

    // So does the instance that panicked.
    runtime.enqueue(MsuId(50), drops.message(3, b"fine"))?;
    assert!(wait_until(WAIT, || runtime.stats().last_value(StatKind::ItemsProcessed, 50) == Some(1.0)));

    runtime.place_msu(0, MsuTypeId(2), MsuId(21), InitData::empty())?;
    assert_eq!(runtime.msu_ids(), vec![MsuId(20), MsuId(21), MsuId(50)]);
    Ok(())
}

#[test]
fn test_panicking_init_rolls_back_creation() -> anyhow::Result<()> {
    let runtime = start(config(1, 1), vec![Arc::new(Faulty) as Arc<dyn MsuType>])?;

    let err = runtime
        .place_msu(0, MsuTypeId(50), MsuId(51), InitData::from("panic"))
        .unwrap_err();
    match err {
        SystemError::Create(CreateError::CreationFailed {
            msu,
            source: MsuError::Panic { capability, message },
        }) => {
            assert_eq!(msu, MsuId(51));
            assert_eq!(capability, "init");
            assert_eq!(message, "init bug");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(runtime.msu_ids().is_empty());
    assert!(runtime
        .events()
        .try_iter()
        .any(|event| matches!(event, RuntimeEvent::CreationFailed { msu: MsuId(51), .. })));

    // The id is free again and the worker still places instances.
    runtime.place_msu(0, MsuTypeId(50), MsuId(51), InitData::empty())?;
    assert_eq!(runtime.msu_ids(), vec![MsuId(51)]);
    Ok(())
}

#[test]
fn test_panicking_control_and_destroy_are_contained() -> anyhow::Result<()> {
    let (runtime, seen) = faulty_with_collector()?;

    runtime.send_control(ControlMsg::new(
        MsuId(50),
        ControlAction::Custom {
            code: 7,
            payload: Bytes::new(),
        },
    ))?;
    runtime.remove_msu(MsuId(50))?;
    assert_eq!(runtime.msu_ids(), vec![MsuId(20)]);

    runtime.enqueue(MsuId(20), DropCounter::new().message(4, b"still here"))?;
    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 1));
    runtime.shutdown()?;
    Ok(())
}
