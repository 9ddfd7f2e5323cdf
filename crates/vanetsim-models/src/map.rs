//! Road geometry.

use std::any::Any;

use vanetsim_core::event::Event;
use vanetsim_core::model::{EventContext, Model, ModelCore, ModelError};
use vanetsim_core::params::{
    ParamDescriptor, ParamKind, ParamMap, ParamMapExt, ParamSchema, format_coords, param_map,
};

use crate::{MAP_MODEL_TAG, ROAD_MAP};

/// A polyline road network, given inline as `x,y;x,y;...` or by file name.
///
/// Vehicle models list a map in their dependencies so that the map is
/// evaluated first.
#[derive(Debug)]
pub struct RoadMapModel {
    core: ModelCore,
    roads: Vec<(f64, f64)>,
    file: String,
}

impl RoadMapModel {
    pub fn new(name: &str) -> Self {
        Self {
            core: ModelCore::new(name),
            roads: Vec::new(),
            file: String::new(),
        }
    }

    pub fn roads(&self) -> &[(f64, f64)] {
        &self.roads
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Total length of the polyline in map units.
    pub fn length(&self) -> f64 {
        self.roads
            .windows(2)
            .map(|w| (w[1].0 - w[0].0).hypot(w[1].1 - w[0].1))
            .sum()
    }
}

impl Model for RoadMapModel {
    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn type_name(&self) -> &str {
        ROAD_MAP
    }

    fn type_tags(&self) -> &'static [&'static str] {
        &[MAP_MODEL_TAG]
    }

    fn params(&self) -> ParamSchema {
        ParamSchema::new()
            .with("roads", ParamDescriptor::new(ParamKind::CoordinateList, ""))
            .with(
                "file",
                ParamDescriptor::new(ParamKind::File, "").aux("filter", "*.osm;*.xml"),
            )
    }

    fn init(&mut self, params: &ParamMap) -> Result<(), ModelError> {
        let params = self.resolve_params(params)?;
        self.roads = params.get_coords("roads")?;
        self.file = params.get_str("file")?.to_string();
        Ok(())
    }

    fn save(&self) -> ParamMap {
        param_map([("roads", format_coords(&self.roads)), ("file", self.file.clone())])
    }

    fn handle_event(
        &mut self,
        _event: &mut Event,
        _ctx: &mut EventContext<'_>,
    ) -> Result<(), ModelError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
