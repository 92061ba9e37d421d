//! Extension validators
//!
//! A validator receives the raw body of an extension and reports every rule
//! it violates, not only the first one. The runtime never interprets the
//! rules; it only binds a validator to each extension point and records the
//! verdict.

use crate::element::ConfigurationElement;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Outcome of validating one extension body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    violations: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violated rule
    pub fn push(&mut self, violation: impl Into<String>) {
        self.violations.push(violation.into());
    }

    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Human readable log, one violation per line
    pub fn error_log(&self) -> String {
        self.violations.join("\n")
    }
}

/// Validation strategy bound to an extension point
pub trait Validator: Send + Sync {
    fn validate(&self, body: &ConfigurationElement) -> ValidationReport;
}

/// Accepts every body; used for points that declare no schema
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _body: &ConfigurationElement) -> ValidationReport {
        ValidationReport::new()
    }
}

/// Validator backed by a closure that records violations into a report
pub struct FnValidator<F> {
    check: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&ConfigurationElement, &mut ValidationReport) + Send + Sync,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&ConfigurationElement, &mut ValidationReport) + Send + Sync,
{
    fn validate(&self, body: &ConfigurationElement) -> ValidationReport {
        let mut report = ValidationReport::new();
        (self.check)(body, &mut report);
        report
    }
}

struct MissingSchema {
    schema: String,
}

impl Validator for MissingSchema {
    fn validate(&self, _body: &ConfigurationElement) -> ValidationReport {
        let mut report = ValidationReport::new();
        report.push(format!("no validator registered for schema '{}'", self.schema));
        report
    }
}

/// Cardinality and nested rules for a child element
#[derive(Debug, Clone)]
pub struct ChildRule {
    name: String,
    min: usize,
    max: Option<usize>,
    schema: Option<ElementSchema>,
}

/// Structural rules for an element
///
/// A small hand-written checker: required attributes, closed value sets for
/// attributes, child cardinalities and nested child schemas.
#[derive(Debug, Clone, Default)]
pub struct ElementSchema {
    required_attributes: Vec<String>,
    allowed_values: BTreeMap<String, Vec<String>>,
    children: Vec<ChildRule>,
    require_value: bool,
}

impl ElementSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_attribute(mut self, name: impl Into<String>) -> Self {
        self.required_attributes.push(name.into());
        self
    }

    /// Restrict an attribute, when present, to a closed set of values
    pub fn allow_values<I, S>(mut self, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values.insert(
            attribute.into(),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Require between `min` and `max` (inclusive) children named `name`
    pub fn child(mut self, name: impl Into<String>, min: usize, max: Option<usize>) -> Self {
        self.children.push(ChildRule {
            name: name.into(),
            min,
            max,
            schema: None,
        });
        self
    }

    /// Like [`child`](Self::child), and check every such child against `schema`
    pub fn child_with_schema(
        mut self,
        name: impl Into<String>,
        min: usize,
        max: Option<usize>,
        schema: ElementSchema,
    ) -> Self {
        self.children.push(ChildRule {
            name: name.into(),
            min,
            max,
            schema: Some(schema),
        });
        self
    }

    pub fn require_value(mut self) -> Self {
        self.require_value = true;
        self
    }

    fn check(&self, element: &ConfigurationElement, path: &str, report: &mut ValidationReport) {
        for attribute in &self.required_attributes {
            if !element.has_attribute(attribute) {
                report.push(format!("{path}: missing attribute '{attribute}'"));
            }
        }

        for (attribute, allowed) in &self.allowed_values {
            if let Some(value) = element.attribute(attribute) {
                if !allowed.iter().any(|a| a == value) {
                    report.push(format!(
                        "{path}: attribute '{attribute}' has value '{value}', expected one of [{}]",
                        allowed.join(", ")
                    ));
                }
            }
        }

        if self.require_value && element.value().trim().is_empty() {
            report.push(format!("{path}: text value is required"));
        }

        for rule in &self.children {
            let matching: Vec<_> = element.find_all(&rule.name).collect();
            if matching.len() < rule.min {
                report.push(format!(
                    "{path}: expected at least {} <{}> element(s), found {}",
                    rule.min,
                    rule.name,
                    matching.len()
                ));
            }
            if let Some(max) = rule.max {
                if matching.len() > max {
                    report.push(format!(
                        "{path}: expected at most {max} <{}> element(s), found {}",
                        rule.name,
                        matching.len()
                    ));
                }
            }
            if let Some(schema) = &rule.schema {
                for (index, child) in matching.iter().enumerate() {
                    schema.check(child, &format!("{path}/{}[{index}]", rule.name), report);
                }
            }
        }
    }
}

impl Validator for ElementSchema {
    fn validate(&self, body: &ConfigurationElement) -> ValidationReport {
        let mut report = ValidationReport::new();
        self.check(body, body.name(), &mut report);
        report
    }
}

type ValidatorFactory = Arc<dyn Fn() -> Arc<dyn Validator> + Send + Sync>;

/// Validators available to extension points, by schema name
///
/// Holds constructors rather than instances; each extension point builds its
/// validator the first time one of its extensions is validated.
#[derive(Default, Clone)]
pub struct ValidatorCatalog {
    factories: HashMap<String, ValidatorFactory>,
}

impl ValidatorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validator constructor for a schema name
    pub fn register<F, V>(&mut self, schema: impl Into<String>, factory: F)
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Validator + 'static,
    {
        self.factories.insert(
            schema.into(),
            Arc::new(move || Arc::new(factory()) as Arc<dyn Validator>),
        );
    }

    pub fn contains(&self, schema: &str) -> bool {
        self.factories.contains_key(schema)
    }

    /// Build the validator for a point's schema
    ///
    /// No schema accepts everything; an unknown schema rejects everything
    /// with a message naming it.
    pub fn resolve(&self, schema: Option<&str>) -> Arc<dyn Validator> {
        match schema {
            None => Arc::new(AcceptAll),
            Some(name) => match self.factories.get(name) {
                Some(factory) => factory(),
                None => {
                    tracing::warn!(schema = %name, "No validator registered for schema");
                    Arc::new(MissingSchema {
                        schema: name.to_string(),
                    })
                }
            },
        }
    }
}

impl fmt::Debug for ValidatorCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorCatalog")
            .field("schemas", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
