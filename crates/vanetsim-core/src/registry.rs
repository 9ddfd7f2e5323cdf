use std::collections::BTreeMap;

use tracing::debug;

use crate::model::{Model, ModelFactory};
use crate::params::ParamSchema;

/// A model type ready to register: its factory plus the capability tags and
/// parameter schema read once from a prototype instance.
///
/// Registry queries only read this data, so they never call into a model.
pub struct ModelType {
    factory: ModelFactory,
    tags: &'static [&'static str],
    schema: ParamSchema,
}

impl ModelType {
    /// Build a prototype with `factory` and record what it reports. The
    /// prototype must report `type_name` as its own type.
    pub fn describe(type_name: &str, factory: ModelFactory) -> Result<Self, RegistryError> {
        let prototype = factory(&format!("<prototype:{type_name}>"));
        if prototype.type_name() != type_name {
            return Err(RegistryError::TypeNameMismatch {
                registered: type_name.to_string(),
                reported: prototype.type_name().to_string(),
            });
        }
        let tags = prototype.type_tags();
        let schema = prototype.params();
        Ok(Self {
            factory,
            tags,
            schema,
        })
    }

    /// Whether a type registered as `type_name` satisfies `target`: its own
    /// name or one of its tags.
    fn satisfies(&self, type_name: &str, target: &str) -> bool {
        type_name == target || self.tags.contains(&target)
    }
}

/// Maps model type names to factories.
///
/// There is no process-wide registry: each [`ModelGraph`](crate::graph::ModelGraph)
/// owns one, so independent simulations can coexist in one process.
/// Types are kept sorted by name so every listing is deterministic.
#[derive(Default)]
pub struct ModelRegistry {
    types: BTreeMap<String, ModelType>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `type_name`.
    ///
    /// The factory is called once here to build the prototype, which must
    /// report `type_name` as its own type.
    pub fn register_model<F>(&mut self, type_name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&str) -> Box<dyn Model> + Send + Sync + 'static,
    {
        self.register_factory(type_name, std::sync::Arc::new(factory))
    }

    /// Register an already shared factory under `type_name`.
    pub fn register_factory(
        &mut self,
        type_name: &str,
        factory: ModelFactory,
    ) -> Result<(), RegistryError> {
        if self.types.contains_key(type_name) {
            return Err(RegistryError::DuplicateType(type_name.to_string()));
        }
        self.insert_type(type_name, ModelType::describe(type_name, factory)?)
    }

    /// Register a type described ahead of time with [`ModelType::describe`].
    pub fn insert_type(
        &mut self,
        type_name: &str,
        model_type: ModelType,
    ) -> Result<(), RegistryError> {
        if self.types.contains_key(type_name) {
            return Err(RegistryError::DuplicateType(type_name.to_string()));
        }
        debug!(type_name, tags = ?model_type.tags, "model type registered");
        self.types.insert(type_name.to_string(), model_type);
        Ok(())
    }

    pub fn unregister_model(&mut self, type_name: &str) -> Result<(), RegistryError> {
        match self.types.remove(type_name) {
            Some(_) => {
                debug!(type_name, "model type unregistered");
                Ok(())
            }
            None => Err(RegistryError::UnknownType(type_name.to_string())),
        }
    }

    pub fn is_registered_model(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Whether instances of `type_name` satisfy `target`, as reported by the
    /// type's prototype at registration. Unknown types satisfy nothing.
    pub fn is_model_type_of(&self, type_name: &str, target: &str) -> bool {
        self.types
            .get(type_name)
            .is_some_and(|t| t.satisfies(type_name, target))
    }

    pub fn get_model_creator(&self, type_name: &str) -> Result<ModelFactory, RegistryError> {
        self.types
            .get(type_name)
            .map(|t| t.factory.clone())
            .ok_or_else(|| RegistryError::UnknownType(type_name.to_string()))
    }

    /// Construct an uninitialized model of `type_name` named `name`.
    pub fn create(&self, type_name: &str, name: &str) -> Result<Box<dyn Model>, RegistryError> {
        Ok(self.get_model_creator(type_name)?(name))
    }

    /// Parameter schema of `type_name`.
    pub fn params_for(&self, type_name: &str) -> Result<ParamSchema, RegistryError> {
        self.types
            .get(type_name)
            .map(|t| t.schema.clone())
            .ok_or_else(|| RegistryError::UnknownType(type_name.to_string()))
    }

    /// Registered type names in sorted order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Registered types satisfying `target`, in sorted order.
    pub fn types_of(&self, target: &str) -> Vec<&str> {
        self.types
            .iter()
            .filter(|(name, t)| t.satisfies(name, target))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("model type already registered: {0}")]
    DuplicateType(String),
    #[error("unknown model type: {0}")]
    UnknownType(String),
    #[error("factory for '{registered}' builds models reporting type '{reported}'")]
    TypeNameMismatch { registered: String, reported: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn setup() -> ModelRegistry {
        let mut r = ModelRegistry::new();
        r.register_model(NULL_MODEL, |name| Box::new(NullModel::new(name)))
            .unwrap();
        r.register_model(TEST_CAR, |name| Box::new(ProbeModel::car(name)))
            .unwrap();
        r
    }

    #[test]
    fn register_and_query() {
        let r = setup();
        assert_eq!(r.len(), 2);
        assert!(r.is_registered_model(NULL_MODEL));
        assert!(!r.is_registered_model("Nope"));
    }

    #[test]
    fn duplicate_type_rejected() {
        let mut r = setup();
        let err = r
            .register_model(NULL_MODEL, |name| Box::new(NullModel::new(name)))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateType(NULL_MODEL.into()));
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn unregister_unknown_fails() {
        let mut r = setup();
        assert_eq!(
            r.unregister_model("Nope"),
            Err(RegistryError::UnknownType("Nope".into()))
        );
        r.unregister_model(NULL_MODEL).unwrap();
        assert!(!r.is_registered_model(NULL_MODEL));
    }

    #[test]
    fn capability_matching_uses_prototype_tags() {
        let r = setup();
        assert!(r.is_model_type_of(TEST_CAR, TEST_CAR));
        assert!(r.is_model_type_of(TEST_CAR, crate::graph::CAR_MODEL_TAG));
        assert!(!r.is_model_type_of(NULL_MODEL, crate::graph::CAR_MODEL_TAG));
        assert!(!r.is_model_type_of("Nope", NULL_MODEL));
        assert_eq!(r.types_of(crate::graph::CAR_MODEL_TAG), vec![TEST_CAR]);
    }

    #[test]
    fn creator_builds_named_instances() {
        let r = setup();
        let factory = r.get_model_creator(NULL_MODEL).unwrap();
        let m = factory("m1");
        assert_eq!(m.name(), "m1");
        assert_eq!(m.type_name(), NULL_MODEL);
        assert!(matches!(
            r.get_model_creator("Nope"),
            Err(RegistryError::UnknownType(_))
        ));
    }

    #[test]
    fn mismatched_factory_rejected() {
        let mut r = ModelRegistry::new();
        let err = r
            .register_model("Alias", |name| Box::new(NullModel::new(name)))
            .unwrap_err();
        assert!(matches!(err, RegistryError::TypeNameMismatch { .. }));
        assert!(r.is_empty());
    }

    #[test]
    fn described_type_registers_once() {
        let mut r = setup();
        let factory: ModelFactory = std::sync::Arc::new(|name: &str| -> Box<dyn Model> {
            Box::new(FailingModel::new(name))
        });
        let described = ModelType::describe(FAILING_MODEL, factory).unwrap();
        r.insert_type(FAILING_MODEL, described).unwrap();
        assert!(r.is_model_type_of(FAILING_MODEL, FAILING_MODEL));
        assert!(r.params_for(FAILING_MODEL).unwrap().get("valid").is_some());

        let null: ModelFactory = std::sync::Arc::new(|name: &str| -> Box<dyn Model> {
            Box::new(NullModel::new(name))
        });
        let again = ModelType::describe(NULL_MODEL, null).unwrap();
        assert_eq!(
            r.insert_type(NULL_MODEL, again).err(),
            Some(RegistryError::DuplicateType(NULL_MODEL.into()))
        );
    }

    #[test]
    fn params_for_reports_schema() {
        let r = setup();
        assert!(r.params_for(NULL_MODEL).unwrap().is_empty());
        assert!(r.params_for(TEST_CAR).unwrap().get("speed").is_some());
    }

    #[test]
    fn type_names_sorted() {
        let r = setup();
        let names: Vec<_> = r.type_names().collect();
        assert_eq!(names, vec![NULL_MODEL, TEST_CAR]);
    }
}
