//! Control-plane commands applied to a live instance.
//!
//! Commands reach an instance through its control queue and are applied by
//! the owning worker, in order, between data messages. A failing command is
//! logged and consumed; it never stops the instance.

use tracing::{debug, warn};
use weave_api::{ControlAction, ControlMsg, EndpointSpec, MsuError, MsuTypeId};

use crate::error::{ControlError, RouteError};
use crate::log_error;
use crate::msu::{catch_panic, LocalMsu};
use crate::routing::Endpoint;
use crate::runtime::RuntimeShared;

/// Applies `cmd` to `msu`.
pub fn handle(shared: &RuntimeShared, msu: &mut LocalMsu, cmd: ControlMsg) -> Result<(), ControlError> {
    if cmd.msu != msu.id {
        return Err(ControlError::Misaddressed {
            expected: msu.id,
            got: cmd.msu,
        });
    }

    match cmd.action {
        ControlAction::AddRoute { type_id, endpoint } => {
            let key_range = endpoint.key_range;
            let resolved = resolve_endpoint(shared, type_id, endpoint)?;
            msu.routes.add(type_id, resolved, key_range)?;
            debug!(msu_id = %msu.id, type_id = %type_id, "route added");
        }
        ControlAction::RemoveRoute { type_id, msu: target } => match msu.routes.remove(type_id, target) {
            Ok(_) => debug!(msu_id = %msu.id, type_id = %type_id, "route removed"),
            Err(RouteError::NoSuchEndpoint { .. }) => {
                warn!(msu_id = %msu.id, type_id = %type_id, endpoint = %target, "no such route to remove");
            }
            Err(err) => return Err(err.into()),
        },
        ControlAction::ModifyRoute {
            type_id,
            msu: target,
            key_range,
        } => {
            msu.routes.modify(type_id, target, key_range)?;
        }
        ControlAction::SetWeight(0) => return Err(ControlError::InvalidWeight),
        ControlAction::SetWeight(weight) => msu.weight = weight,
        ControlAction::Custom { code, payload } => {
            let msu_type = msu.msu_type.clone();
            catch_panic("receive_ctrl", || msu_type.receive_ctrl(&mut msu.context(shared), code, payload))
                .and_then(|r| r)
                .map_err(|err| match err {
                    MsuError::MissingCapability(_) => ControlError::Unhandled(code),
                    other => ControlError::Type(other),
                })?;
        }
    }
    Ok(())
}

/// [`handle`], logging the failure. Used by the worker loop.
pub(crate) fn apply(shared: &RuntimeShared, msu: &mut LocalMsu, cmd: ControlMsg) {
    let code = cmd.action.code();
    if let Err(err) = handle(shared, msu, cmd) {
        log_error!(err, msu.id, msu.msu_type.name(), code = code);
    }
}

/// Turns the controller's description into an endpoint. An endpoint on this
/// runtime must name an instance of `type_id` hosted here.
fn resolve_endpoint(shared: &RuntimeShared, type_id: MsuTypeId, spec: EndpointSpec) -> Result<Endpoint, RouteError> {
    if spec.runtime != shared.runtime_id() {
        return Endpoint::remote(spec.msu, spec.runtime, spec.address);
    }
    let entry = shared
        .directory()
        .get(spec.msu)
        .ok_or_else(|| RouteError::MalformedEndpoint(format!("{} is not hosted on this runtime", spec.msu)))?;
    if entry.type_id != type_id {
        return Err(RouteError::MalformedEndpoint(format!(
            "{} is of type {}, not {}",
            spec.msu, entry.type_id, type_id
        )));
    }
    Ok(Endpoint::local(spec.msu, spec.runtime, shared.address(), entry.data))
}
