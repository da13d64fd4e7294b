use std::sync::Arc;
use std::time::Duration;

use weave::{logging, MsuContext, MsuType, Next, NullTransport, Runtime, RuntimeConfig, TypeRegistry};
use weave_api::{
    ControlAction, ControlMsg, EndpointSpec, InitData, MsgKey, MsuId, MsuMessage, MsuResult, MsuTypeId, RuntimeId,
    StatKind,
};

const PARSE: MsuTypeId = MsuTypeId(1);
const RESPOND: MsuTypeId = MsuTypeId(2);

// Splits the request line and hands the path on.
struct Parse;

impl MsuType for Parse {
    fn id(&self) -> MsuTypeId {
        PARSE
    }

    fn name(&self) -> &str {
        "parse"
    }

    fn receive(&self, _ctx: &mut MsuContext<'_>, msg: MsuMessage) -> MsuResult<Next> {
        let path = msg
            .payload
            .split(|b| *b == b' ')
            .nth(1)
            .map(|path| path.to_vec())
            .unwrap_or_default();
        Ok(Next::route(RESPOND, MsuMessage::with_header(msg.header, path)))
    }
}

// Counts requests per flow and prints them.
struct Respond;

impl MsuType for Respond {
    fn id(&self) -> MsuTypeId {
        RESPOND
    }

    fn name(&self) -> &str {
        "respond"
    }

    fn receive(&self, ctx: &mut MsuContext<'_>, msg: MsuMessage) -> MsuResult<Next> {
        let flow = msg.key().flow;
        let seen = match ctx.state().get_mut::<u32>(flow) {
            Some(count) => {
                *count += 1;
                *count
            }
            None => {
                ctx.state().insert(flow, 1u32);
                1
            }
        };
        println!(
            "[{}] flow {} request #{}: {}",
            ctx.msu_id(),
            flow,
            seen,
            String::from_utf8_lossy(&msg.payload)
        );
        Ok(Next::Done(msg))
    }

    fn generate_id(&self, msg: &MsuMessage) -> Option<u32> {
        Some(weave::dispatch::default_generate_id(msg))
    }
}

fn main() -> anyhow::Result<()> {
    logging::init_development();

    let registry = TypeRegistry::new().with_type(Parse)?.with_type(Respond)?;
    let config = RuntimeConfig::new(RuntimeId(1)).with_worker_count(2);
    let runtime = Runtime::start(config, registry, Arc::new(NullTransport))?;

    runtime.place_msu(0, PARSE, MsuId(10), InitData::empty())?;
    for (worker, msu) in [(0, 20), (1, 21)] {
        runtime.place_msu(worker, RESPOND, MsuId(msu), InitData::empty())?;
        runtime.send_control(ControlMsg::new(
            MsuId(10),
            ControlAction::AddRoute {
                type_id: RESPOND,
                endpoint: EndpointSpec::local(MsuId(msu), runtime.runtime_id()),
            },
        ))?;
    }

    for (flow, path) in [(1, "/index.html"), (2, "/logo.png"), (1, "/style.css"), (3, "/index.html")] {
        let request = format!("GET {} HTTP/1.1", path);
        runtime.enqueue(MsuId(10), MsuMessage::new(MsgKey::new(flow), request.into_bytes()))?;
    }
    std::thread::sleep(Duration::from_millis(200));

    for sample in runtime.sample_stats(StatKind::ItemsProcessed, Duration::from_secs(1), 4)? {
        println!("{} {}: {:?}", sample.kind, sample.item_id, sample.points.last());
    }
    runtime.shutdown()?;
    Ok(())
}
