//! Extension registry
//!
//! Stores extension points by id and extensions in registration order.

use super::{Extension, ExtensionPoint, Validation, ValidatorCatalog};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the extension registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Extension point '{point}' of module '{rejected}' already declared by '{owner}'")]
    DuplicateExtensionPoint {
        point: String,
        owner: String,
        rejected: String,
    },

    #[error("Extension '{extension}' implements unknown extension point '{point}'")]
    InvalidPointReference { extension: String, point: String },
}

/// Registry of extension points and extensions
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    points: BTreeMap<String, Arc<ExtensionPoint>>,
    extensions: Vec<Arc<Extension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension point; the first declaration of an id wins
    pub fn register_extension_point(
        &mut self,
        point: ExtensionPoint,
    ) -> Result<Arc<ExtensionPoint>, RegistryError> {
        if let Some(existing) = self.points.get(point.id()) {
            return Err(RegistryError::DuplicateExtensionPoint {
                point: point.id().to_string(),
                owner: existing.module().to_string(),
                rejected: point.module().to_string(),
            });
        }

        let point = Arc::new(point);
        tracing::debug!(point = %point.id(), module = %point.module(), "Extension point registered");
        self.points.insert(point.id().to_string(), Arc::clone(&point));
        Ok(point)
    }

    /// Register an extension; the point may be declared later or never
    pub fn register_extension(&mut self, extension: Extension) -> Arc<Extension> {
        let extension = Arc::new(extension);
        tracing::debug!(
            extension = %extension.label(),
            point = %extension.point(),
            "Extension registered"
        );
        self.extensions.push(Arc::clone(&extension));
        extension
    }

    pub fn find_extension_point(&self, id: &str) -> Option<&Arc<ExtensionPoint>> {
        self.points.get(id)
    }

    pub fn extension_points(&self) -> impl Iterator<Item = &Arc<ExtensionPoint>> {
        self.points.values()
    }

    /// Extensions carrying `id`, usually at most one
    pub fn extensions_with_id<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Arc<Extension>> {
        self.extensions.iter().filter(move |e| e.id() == Some(id))
    }

    /// Every extension implementing `point`, without validation
    pub fn extensions_for<'a>(&'a self, point: &'a str) -> Extensions<'a> {
        Extensions {
            inner: self.extensions.iter(),
            point,
        }
    }

    /// Validate an extension against its point
    ///
    /// The first verdict is cached on the extension. An unknown point is an
    /// error and nothing is cached, so the extension can still be validated
    /// once the point appears.
    pub fn validate<'e>(
        &self,
        extension: &'e Extension,
        catalog: &ValidatorCatalog,
    ) -> Result<&'e Validation, RegistryError> {
        if let Some(validity) = extension.validity.get() {
            return Ok(validity);
        }

        let point = self.points.get(extension.point()).ok_or_else(|| {
            RegistryError::InvalidPointReference {
                extension: extension.label(),
                point: extension.point().to_string(),
            }
        })?;

        Ok(extension.validity.get_or_init(|| {
            let report = point.validator(catalog).validate(extension.body());
            if !report.is_valid() {
                tracing::warn!(
                    extension = %extension.label(),
                    point = %point.id(),
                    violations = %report.error_log(),
                    "Extension rejected by validator"
                );
            }
            Validation::from_report(report)
        }))
    }

    /// Valid, enabled extensions of `point` whose module passes `module_enabled`
    ///
    /// A disabled point yields nothing.
    pub fn valid_extensions_for(
        &self,
        point: &str,
        catalog: &ValidatorCatalog,
        module_enabled: impl Fn(&str) -> bool,
    ) -> Result<Vec<Arc<Extension>>, RegistryError> {
        let mut valid = Vec::new();
        if self.points.get(point).is_some_and(|p| !p.is_enabled()) {
            return Ok(valid);
        }
        for extension in self.extensions_for(point) {
            if !extension.is_enabled() || !module_enabled(extension.module()) {
                continue;
            }
            if self.validate(extension, catalog)?.is_valid() {
                valid.push(Arc::clone(extension));
            }
        }
        Ok(valid)
    }
}

/// Restartable iterator over the extensions of one point
#[derive(Clone)]
pub struct Extensions<'a> {
    inner: std::slice::Iter<'a, Arc<Extension>>,
    point: &'a str,
}

impl<'a> Iterator for Extensions<'a> {
    type Item = &'a Arc<Extension>;

    fn next(&mut self) -> Option<Self::Item> {
        let point = self.point;
        self.inner.by_ref().find(|e| e.point() == point)
    }
}
