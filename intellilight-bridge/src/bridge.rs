//! Kasa request handling
//!
//! Decodes one ciphered request, applies it to the light model, hands the
//! resulting GATT actions to the BLE driver and composes the ciphered reply.

use std::sync::{mpsc, MutexGuard, PoisonError};

use intellilight_proto::message::{
    LightStateReply, Reply, Request, TransitionLightState, BIND, CLOUD, GET_INFO, GET_LIGHT_STATE,
    GET_SYSINFO, LIGHTING_SERVICE, OK, SYSTEM, TRANSITION_LIGHT_STATE,
};
use intellilight_proto::sysinfo::{DeviceIdentity, SysInfo, CLOUD_INFO};
use intellilight_proto::{decode, encode};
use log::*;

use crate::gatt::GattAction;
use crate::state::{Shared, SharedState};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("BLE driver is not running")]
    Closed,
}

/// Hands GATT actions to whoever owns the BLE stack
pub trait BulbLink {
    fn submit(&self, action: GattAction) -> Result<(), LinkError>;
}

impl BulbLink for mpsc::Sender<GattAction> {
    fn submit(&self, action: GattAction) -> Result<(), LinkError> {
        self.send(action).map_err(|_| LinkError::Closed)
    }
}

/// LAN side of the bridge, cheap to clone into every server thread
#[derive(Debug, Clone)]
pub struct Bridge<L> {
    state: Shared,
    link: L,
    identity: DeviceIdentity,
}

impl<L: BulbLink> Bridge<L> {
    pub fn new(state: Shared, link: L, identity: DeviceIdentity) -> Self {
        Self { state, link, identity }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn state(&self) -> &Shared {
        &self.state
    }

    /// Handle one ciphered request; an empty result means nothing to send
    pub fn handle_request(&self, raw: &[u8], has_header: bool) -> Vec<u8> {
        let plain = decode(raw, has_header);
        if plain.is_empty() {
            debug!("empty request ({} raw bytes)", raw.len());
            return Vec::new();
        }
        debug!("request: {}", String::from_utf8_lossy(&plain));

        let request = match Request::from_slice(&plain) {
            Ok(request) => request,
            Err(e) => {
                warn!("dropping undecodable request: {e}");
                return Vec::new();
            }
        };

        let mut actions = Vec::new();
        let reply = {
            let mut state = self.lock();
            self.respond(&mut state, &request, &mut actions)
        };

        for action in actions {
            if let Err(e) = self.link.submit(action) {
                error!("failed to reach the bulb: {e}");
            }
        }

        let body = match reply.and_then(|reply| reply.to_vec().map(|body| (reply, body))) {
            Ok((reply, _)) if reply.is_empty() => return Vec::new(),
            Ok((_, body)) => body,
            Err(e) => {
                error!("failed to encode reply: {e}");
                return Vec::new();
            }
        };
        debug!("reply: {}", String::from_utf8_lossy(&body));
        encode(&body, has_header)
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn respond(
        &self,
        state: &mut SharedState,
        request: &Request,
        actions: &mut Vec<GattAction>,
    ) -> serde_json::Result<Reply> {
        let mut reply = Reply::new();

        if let Some(lighting) = &request.lighting {
            if let Some(transition) = &lighting.transition_light_state {
                let body = transition_light_state(state, transition, actions);
                reply.insert(LIGHTING_SERVICE, TRANSITION_LIGHT_STATE, &body)?;
            }
            if lighting.get_light_state.is_some() {
                reply.insert(LIGHTING_SERVICE, GET_LIGHT_STATE, &state.light.reply().with_err_code(0))?;
            }
        }

        if let Some(system) = &request.system {
            if system.get_sysinfo.is_some() {
                match state.gatt.request_state() {
                    Ok(action) => actions.push(action),
                    Err(e) => debug!("not refreshing state: {e}"),
                }
                reply.insert(SYSTEM, GET_SYSINFO, &SysInfo::new(&self.identity, state.light.reply()))?;
            }
        }

        if let Some(cloud) = &request.cloud {
            if cloud.get_info.is_some() {
                reply.insert(CLOUD, GET_INFO, &CLOUD_INFO)?;
            }
            if cloud.bind.is_some() {
                reply.insert(CLOUD, BIND, &OK)?;
            }
        }

        Ok(reply)
    }
}

/// Apply a transition and return its reply body
fn transition_light_state(
    state: &mut SharedState,
    transition: &TransitionLightState,
    actions: &mut Vec<GattAction>,
) -> LightStateReply {
    let power = transition.on_off.map(|v| v != 0.0);

    if power == Some(false) {
        return match state.gatt.turn_off() {
            Ok(action) => {
                info!("turning bulb off");
                actions.push(action);
                state.light.on_off = false;
                state.light.up_to_date = false;
                LightStateReply::off_ack()
            }
            Err(e) => {
                warn!("cannot turn off: {e}");
                state.light.reply().with_err_code(0)
            }
        };
    }

    if power == Some(true) || transition.has_colour() {
        state.light.merge(transition);
        let rgb = state.light.rgb();
        match state.gatt.set_color(rgb) {
            Ok(action) => {
                info!("setting colour {:?} -> {rgb:?}", state.light.colour);
                actions.push(action);
                state.light.on_off = true;
                state.light.up_to_date = false;
            }
            Err(e) => warn!("cannot set colour: {e}"),
        }
    }

    state.light.reply().with_err_code(0)
}
