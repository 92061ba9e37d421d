//! Extension points and extensions
//!
//! Modules declare extension points and contribute extensions to them. The
//! runtime stores both, binds a validator to each point and remembers the
//! verdict for each extension.

mod registry;
pub mod validator;

pub use registry::{ExtensionRegistry, Extensions, RegistryError};
pub use validator::{
    AcceptAll, ElementSchema, FnValidator, ValidationReport, Validator, ValidatorCatalog,
};

use crate::element::ConfigurationElement;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Named slot that other modules contribute extensions to
pub struct ExtensionPoint {
    id: String,
    module: String,
    schema: Option<String>,
    enabled: AtomicBool,
    validator: OnceLock<Arc<dyn Validator>>,
}

impl ExtensionPoint {
    pub fn new(id: impl Into<String>, module: impl Into<String>, schema: Option<String>) -> Self {
        Self {
            id: id.into(),
            module: module.into(),
            schema,
            enabled: AtomicBool::new(true),
            validator: OnceLock::new(),
        }
    }

    /// Point with a validator bound up front instead of through a schema name
    pub fn with_validator(
        id: impl Into<String>,
        module: impl Into<String>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        let point = Self::new(id, module, None);
        let _ = point.validator.set(validator);
        point
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier of the declaring module
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// A disabled point hides all of its extensions from validated queries
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether the validator has been created yet
    pub fn has_validator(&self) -> bool {
        self.validator.get().is_some()
    }

    /// The point's validator, created from the catalog on first use
    pub fn validator(&self, catalog: &ValidatorCatalog) -> &Arc<dyn Validator> {
        self.validator
            .get_or_init(|| catalog.resolve(self.schema.as_deref()))
    }
}

impl fmt::Debug for ExtensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionPoint")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("schema", &self.schema)
            .field("enabled", &self.is_enabled())
            .field("validator", &self.has_validator())
            .finish()
    }
}

/// Memoized verdict of a validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(ValidationReport),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    fn from_report(report: ValidationReport) -> Self {
        if report.is_valid() {
            Validation::Valid
        } else {
            Validation::Invalid(report)
        }
    }
}

/// Contribution of a module to an extension point
#[derive(Debug)]
pub struct Extension {
    id: Option<String>,
    point: String,
    module: String,
    body: Arc<ConfigurationElement>,
    enabled: AtomicBool,
    validity: OnceLock<Validation>,
}

impl Extension {
    pub fn new(
        id: Option<String>,
        point: impl Into<String>,
        module: impl Into<String>,
        body: Arc<ConfigurationElement>,
    ) -> Self {
        Self {
            id,
            point: point.into(),
            module: module.into(),
            body,
            enabled: AtomicBool::new(true),
            validity: OnceLock::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Identifier of the implemented extension point
    pub fn point(&self) -> &str {
        &self.point
    }

    /// Identifier of the contributing module
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn body(&self) -> &Arc<ConfigurationElement> {
        &self.body
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Cached verdict, `None` until first validated
    pub fn validity(&self) -> Option<&Validation> {
        self.validity.get()
    }

    /// Label used in logs and errors
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => format!("{}:{}", self.module, id),
            None => format!("{}:<{}>", self.module, self.point),
        }
    }
}
