//! Vehicle models.

use std::any::Any;
use std::net::{IpAddr, Ipv4Addr};

use tracing::{debug, trace};
use vanetsim_core::event::{Event, Payload};
use vanetsim_core::id::Priority;
use vanetsim_core::model::{EventContext, Model, ModelCore, ModelError};
use vanetsim_core::params::{
    GpsPoint, ParamDescriptor, ParamKind, ParamMap, ParamMapExt, ParamSchema, format_gps,
    format_yes_no, param_map,
};

use crate::{
    BEACON, CAR_MODEL_TAG, FIXED_CAR, MAP_MODEL_TAG, MESSAGE, NETWORK_CAR, NETWORK_MODEL_TAG,
};

/// Position announcement broadcast by a [`FixedCarModel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beacon {
    pub position: GpsPoint,
    /// Metres per second.
    pub speed: f64,
}

/// Application message exchanged with a [`NetworkCarModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: String,
    /// Set on replies so that two network cars never echo each other forever.
    pub echo: bool,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            echo: false,
        }
    }
}

// ---------------------------------------------------------------------------
// FixedCarModel
// ---------------------------------------------------------------------------

/// A vehicle parked at a configured GPS position.
///
/// Broadcasts one [`Beacon`] when a run starts (if `beacon = yes`) and counts
/// the beacons it hears from other vehicles.
#[derive(Debug)]
pub struct FixedCarModel {
    core: ModelCore,
    position: GpsPoint,
    speed: f64,
    beacon: bool,
    beacon_priority: Priority,
    heard: Vec<(String, Beacon)>,
}

impl FixedCarModel {
    pub fn new(name: &str) -> Self {
        Self {
            core: ModelCore::new(name),
            position: GpsPoint { lat: 0.0, lon: 0.0 },
            speed: 0.0,
            beacon: true,
            beacon_priority: 0,
            heard: Vec::new(),
        }
    }

    pub fn position(&self) -> GpsPoint {
        self.position
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Beacons received this run, with the name of the sender.
    pub fn heard(&self) -> &[(String, Beacon)] {
        &self.heard
    }
}

impl Model for FixedCarModel {
    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn type_name(&self) -> &str {
        FIXED_CAR
    }

    fn type_tags(&self) -> &'static [&'static str] {
        &[CAR_MODEL_TAG]
    }

    fn params(&self) -> ParamSchema {
        ParamSchema::new()
            .with(
                "position",
                ParamDescriptor::new(ParamKind::GpsPoint, "0,0").describe("lat,lon in degrees"),
            )
            .with(
                "speed",
                ParamDescriptor::new(ParamKind::Float, "13.9")
                    .range(0.0, 70.0)
                    .randomizable()
                    .aux("unit", "m/s"),
            )
            .with("beacon", ParamDescriptor::new(ParamKind::YesNo, "yes"))
            .with(
                "beacon_priority",
                ParamDescriptor::new(ParamKind::Int, "0").range(-1000.0, 1000.0),
            )
    }

    fn init(&mut self, params: &ParamMap) -> Result<(), ModelError> {
        let params = self.resolve_params(params)?;
        self.position = params.get_gps("position")?;
        self.speed = params.get_f64("speed")?;
        self.beacon = params.get_yes_no("beacon")?;
        self.beacon_priority = params.get_i64("beacon_priority")? as Priority;
        Ok(())
    }

    fn save(&self) -> ParamMap {
        param_map([
            ("position", format_gps(self.position)),
            ("speed", self.speed.to_string()),
            ("beacon", format_yes_no(self.beacon)),
            ("beacon_priority", self.beacon_priority.to_string()),
        ])
    }

    fn pre_run(&mut self, ctx: &mut EventContext<'_>) -> Result<(), ModelError> {
        self.heard.clear();
        if self.beacon {
            let beacon = Beacon {
                position: self.position,
                speed: self.speed,
            };
            ctx.emit(
                Event::new(ctx.now(), BEACON)
                    .with_priority(self.beacon_priority)
                    .with_payload(Payload::new(beacon)),
            );
            debug!(car = %self.core.name, "beacon sent");
        }
        Ok(())
    }

    fn handle_event(
        &mut self,
        event: &mut Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<(), ModelError> {
        if event.kind == BEACON
            && let Some(beacon) = event.payload.get::<Beacon>()
        {
            trace!(car = %self.core.name, from = %event.origin, "beacon heard");
            self.heard.push((event.origin.clone(), *beacon));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// NetworkCarModel
// ---------------------------------------------------------------------------

/// A vehicle mirrored from a network peer at `ip:port`.
///
/// Counts incoming [`MESSAGE`] events and answers each original message with
/// an echo addressed to its sender. Echoes are counted but never answered.
#[derive(Debug)]
pub struct NetworkCarModel {
    core: ModelCore,
    ip: IpAddr,
    port: u16,
    map: String,
    received: u64,
    echoed: u64,
}

impl NetworkCarModel {
    pub fn new(name: &str) -> Self {
        Self {
            core: ModelCore::new(name),
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 5000,
            map: String::new(),
            received: 0,
            echoed: 0,
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Name of the map model this car drives on, empty if none.
    pub fn map(&self) -> &str {
        &self.map
    }

    /// Messages received this run, echoes included.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Echoes sent this run.
    pub fn echoed(&self) -> u64 {
        self.echoed
    }
}

impl Model for NetworkCarModel {
    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn type_name(&self) -> &str {
        NETWORK_CAR
    }

    fn type_tags(&self) -> &'static [&'static str] {
        &[CAR_MODEL_TAG, NETWORK_MODEL_TAG]
    }

    fn params(&self) -> ParamSchema {
        ParamSchema::new()
            .with("ip", ParamDescriptor::new(ParamKind::Ip, "0.0.0.0"))
            .with(
                "port",
                ParamDescriptor::new(ParamKind::Int, "5000").range(1.0, 65535.0),
            )
            .with(
                "map",
                ParamDescriptor::new(ParamKind::ModelRef, "").model_type(MAP_MODEL_TAG),
            )
    }

    fn init(&mut self, params: &ParamMap) -> Result<(), ModelError> {
        let params = self.resolve_params(params)?;
        self.ip = params.get_ip("ip")?;
        // Range-checked by the schema.
        self.port = params.get_i64("port")? as u16;
        self.map = params.get_str("map")?.trim().to_string();
        Ok(())
    }

    fn save(&self) -> ParamMap {
        param_map([
            ("ip", self.ip.to_string()),
            ("port", self.port.to_string()),
            ("map", self.map.clone()),
        ])
    }

    fn pre_run(&mut self, _ctx: &mut EventContext<'_>) -> Result<(), ModelError> {
        self.received = 0;
        self.echoed = 0;
        Ok(())
    }

    fn post_run(&mut self, _ctx: &mut EventContext<'_>) -> Result<(), ModelError> {
        debug!(
            car = %self.core.name,
            peer = %self.ip,
            received = self.received,
            echoed = self.echoed,
            "network car finished"
        );
        Ok(())
    }

    fn handle_event(
        &mut self,
        event: &mut Event,
        ctx: &mut EventContext<'_>,
    ) -> Result<(), ModelError> {
        if event.kind != MESSAGE {
            return Ok(());
        }
        self.received += 1;
        if event.origin.is_empty() || event.payload.get::<Message>().is_some_and(|m| m.echo) {
            return Ok(());
        }
        let body = event
            .payload
            .take::<Message>()
            .map(|m| m.body)
            .unwrap_or_default();
        ctx.emit(
            Event::new(ctx.now(), MESSAGE)
                .with_priority(event.priority)
                .with_destination(event.origin.clone())
                .with_payload(Payload::new(Message { body, echo: true })),
        );
        self.echoed += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ===========================================================================
// Tests
// ===========================================================================
