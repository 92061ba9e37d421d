//! Module descriptor model
//!
//! A [`Descriptor`] is the typed record of one module: identity, version,
//! optional native library, requirements, declared extension points and
//! extensions. It is built once from a [`ConfigurationElement`] tree and is
//! immutable afterwards, except for the `enabled` flag which belongs to the
//! configuration layer.
//!
//! Every validity check happens in [`Descriptor::from_element`]; a
//! descriptor that exists is well formed.

pub mod xml;

use crate::element::ConfigurationElement;
use crate::version::{Version, VersionConstraint, VersionError};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use xml::{parse_descriptor, read_descriptor, DESCRIPTOR_FILE};

pub(crate) const PLUGIN: &str = "plugin";
pub(crate) const ID: &str = "id";
pub(crate) const VERSION: &str = "version";
pub(crate) const CLASS: &str = "class";
pub(crate) const LIBRARY: &str = "library";
pub(crate) const NAME: &str = "name";
pub(crate) const REQUIREMENT: &str = "requirement";
pub(crate) const EXTENSION_POINT: &str = "extension-point";
pub(crate) const POINT: &str = "point";
pub(crate) const SCHEMA: &str = "schema";
pub(crate) const EXTENSION: &str = "extension";
pub(crate) const IMPLEMENTS: &str = "implements";
pub(crate) const PARAM: &str = "param";
pub(crate) const VALUE: &str = "value";

/// Errors that reject a descriptor at construction time
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Failed to read descriptor {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse descriptor {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },

    #[error("Unexpected root element <{found}>, expected <{expected}>")]
    UnexpectedRoot {
        expected: &'static str,
        found: String,
    },

    #[error("Element <{element}> is missing attribute '{attribute}'")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("Module identifier must not be empty")]
    EmptyIdentifier,

    #[error("Module '{module}': {source}")]
    Version {
        module: String,
        #[source]
        source: VersionError,
    },

    #[error("Module '{0}' requires itself")]
    SelfRequirement(String),

    #[error("Module '{module}' declares requirement '{requirement}' more than once")]
    DuplicateRequirement { module: String, requirement: String },

    #[error("Module '{0}' declares more than one library")]
    MultipleLibraries(String),

    #[error("Module '{module}' declares extension point '{point}' more than once")]
    DuplicateExtensionPoint { module: String, point: String },
}

/// Directed edge of the module dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub id: String,
    pub version: Option<VersionConstraint>,
}

/// Extension point declared by a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPointDeclaration {
    pub id: String,
    /// Name of the validator schema bound to this point
    pub schema: Option<String>,
}

/// Extension contributed by a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionDeclaration {
    pub id: Option<String>,
    /// Identifier of the implemented extension point
    pub point: String,
    /// The whole `<extension>` element, shared with every consumer
    pub body: Arc<ConfigurationElement>,
}

/// Typed record of a module
#[derive(Debug, Clone)]
pub struct Descriptor {
    id: String,
    version: Option<Version>,
    class: Option<String>,
    library: Option<String>,
    location: PathBuf,
    requirements: Vec<Requirement>,
    extension_points: Vec<ExtensionPointDeclaration>,
    extensions: Vec<ExtensionDeclaration>,
    parameters: BTreeMap<String, String>,
    enabled: bool,
}

impl Descriptor {
    /// Start building a descriptor programmatically
    pub fn builder(id: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(id)
    }

    /// Build a descriptor from a `<plugin>` element tree
    ///
    /// `location` is the module root directory, which native library names
    /// are resolved against.
    pub fn from_element(
        root: &ConfigurationElement,
        location: impl AsRef<Path>,
    ) -> Result<Self, DescriptorError> {
        if root.name() != PLUGIN {
            return Err(DescriptorError::UnexpectedRoot {
                expected: PLUGIN,
                found: root.name().to_string(),
            });
        }

        let id = root
            .attribute(ID)
            .ok_or(DescriptorError::MissingAttribute {
                element: PLUGIN,
                attribute: ID,
            })?
            .trim()
            .to_string();
        if id.is_empty() {
            return Err(DescriptorError::EmptyIdentifier);
        }

        let version = root
            .attribute(VERSION)
            .map(|v| v.parse::<Version>())
            .transpose()
            .map_err(|source| DescriptorError::Version {
                module: id.clone(),
                source,
            })?;

        let class = non_empty(root.attribute(CLASS));

        let mut library = non_empty(root.attribute(LIBRARY));
        let mut requirements: Vec<Requirement> = Vec::new();
        let mut extension_points: Vec<ExtensionPointDeclaration> = Vec::new();
        let mut extensions = Vec::new();
        let mut parameters = BTreeMap::new();

        for child in root.children() {
            match child.name() {
                LIBRARY => {
                    let name = required(child, LIBRARY, NAME)?;
                    if library.replace(name).is_some() {
                        return Err(DescriptorError::MultipleLibraries(id));
                    }
                }
                REQUIREMENT => {
                    let target = required(child, REQUIREMENT, ID)?;
                    if target == id {
                        return Err(DescriptorError::SelfRequirement(id));
                    }
                    if requirements.iter().any(|r| r.id == target) {
                        return Err(DescriptorError::DuplicateRequirement {
                            module: id,
                            requirement: target,
                        });
                    }
                    let version = child
                        .attribute(VERSION)
                        .map(|v| v.parse::<VersionConstraint>())
                        .transpose()
                        .map_err(|source| DescriptorError::Version {
                            module: id.clone(),
                            source,
                        })?;
                    requirements.push(Requirement {
                        id: target,
                        version,
                    });
                }
                EXTENSION_POINT => {
                    let point = required(child, EXTENSION_POINT, ID)?;
                    if extension_points.iter().any(|p| p.id == point) {
                        return Err(DescriptorError::DuplicateExtensionPoint { module: id, point });
                    }
                    extension_points.push(ExtensionPointDeclaration {
                        id: point,
                        schema: non_empty(child.attribute(SCHEMA)),
                    });
                }
                // Shorthand: a point plus one extension per <implements> child,
                // identified by the child's text
                POINT => {
                    let point = required(child, POINT, ID)?;
                    if extension_points.iter().any(|p| p.id == point) {
                        return Err(DescriptorError::DuplicateExtensionPoint { module: id, point });
                    }
                    for implements in child.find_all(IMPLEMENTS) {
                        extensions.push(ExtensionDeclaration {
                            id: non_empty(Some(implements.value())),
                            point: point.clone(),
                            body: Arc::new(implements.clone()),
                        });
                    }
                    extension_points.push(ExtensionPointDeclaration {
                        id: point,
                        schema: non_empty(child.attribute(SCHEMA)),
                    });
                }
                EXTENSION => {
                    let point = required(child, EXTENSION, IMPLEMENTS)?;
                    extensions.push(ExtensionDeclaration {
                        id: non_empty(child.attribute(ID)),
                        point,
                        body: Arc::new(child.clone()),
                    });
                }
                PARAM => {
                    let name = required(child, PARAM, ID)?;
                    let value = child.attribute(VALUE).unwrap_or_default().to_string();
                    parameters.insert(name, value);
                }
                _ => {}
            }
        }

        Ok(Self {
            id,
            version,
            class,
            library,
            location: location.as_ref().to_path_buf(),
            requirements,
            extension_points,
            extensions,
            parameters,
            enabled: true,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Factory key of the plugin executable, if any
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    /// Undecorated native library name, if the module has native code
    pub fn library(&self) -> Option<&str> {
        self.library.as_deref()
    }

    /// Module root directory
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn extension_points(&self) -> &[ExtensionPointDeclaration] {
        &self.extension_points
    }

    pub fn extensions(&self) -> &[ExtensionDeclaration] {
        &self.extensions
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether this module directly requires `id`
    pub fn requires(&self, id: &str) -> bool {
        self.requirements.iter().any(|r| r.id == id)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}-{}", self.id, version),
            None => f.write_str(&self.id),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(
    element: &ConfigurationElement,
    name: &'static str,
    attribute: &'static str,
) -> Result<String, DescriptorError> {
    non_empty(element.attribute(attribute)).ok_or(DescriptorError::MissingAttribute {
        element: name,
        attribute,
    })
}

/// Programmatic descriptor construction
///
/// The builder assembles the same element tree a `plugin.xml` file would
/// produce, so the result goes through the exact same validation.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    root: ConfigurationElement,
    location: PathBuf,
}

impl DescriptorBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            root: ConfigurationElement::new(PLUGIN).with_attribute(ID, id),
            location: PathBuf::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.root.set_attribute(VERSION, version);
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.root.set_attribute(CLASS, class);
        self
    }

    pub fn library(mut self, name: impl Into<String>) -> Self {
        self.root
            .push_child(ConfigurationElement::new(LIBRARY).with_attribute(NAME, name));
        self
    }

    pub fn location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = location.into();
        self
    }

    pub fn requires(mut self, id: impl Into<String>) -> Self {
        self.root
            .push_child(ConfigurationElement::new(REQUIREMENT).with_attribute(ID, id));
        self
    }

    pub fn requires_version(mut self, id: impl Into<String>, constraint: impl Into<String>) -> Self {
        self.root.push_child(
            ConfigurationElement::new(REQUIREMENT)
                .with_attribute(ID, id)
                .with_attribute(VERSION, constraint),
        );
        self
    }

    pub fn extension_point(mut self, id: impl Into<String>) -> Self {
        self.root
            .push_child(ConfigurationElement::new(EXTENSION_POINT).with_attribute(ID, id));
        self
    }

    pub fn extension_point_with_schema(
        mut self,
        id: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        self.root.push_child(
            ConfigurationElement::new(EXTENSION_POINT)
                .with_attribute(ID, id)
                .with_attribute(SCHEMA, schema),
        );
        self
    }

    /// Add an extension; `body` children and attributes are merged into the
    /// generated `<extension implements=...>` element
    pub fn extension(mut self, point: impl Into<String>, body: ConfigurationElement) -> Self {
        let mut element = ConfigurationElement::new(EXTENSION).with_attribute(IMPLEMENTS, point);
        for (name, value) in body.attributes() {
            element.set_attribute(name, value);
        }
        element.append_value(body.value());
        for child in body.children() {
            element.push_child(child.clone());
        }
        self.root.push_child(element);
        self
    }

    pub fn param(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.root.push_child(
            ConfigurationElement::new(PARAM)
                .with_attribute(ID, id)
                .with_attribute(VALUE, value),
        );
        self
    }

    pub fn build(self) -> Result<Descriptor, DescriptorError> {
        Descriptor::from_element(&self.root, &self.location)
    }
}
