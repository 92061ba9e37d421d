//! Configuration element tree
//!
//! The owned, parser-independent form of a descriptor subtree. Descriptors
//! are built from it and extension bodies are handed to validators and
//! consumers as shared references to it.

use serde::Serialize;
use std::collections::BTreeMap;

/// A node of a configuration tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigurationElement {
    name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    value: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<ConfigurationElement>,
}

impl ConfigurationElement {
    /// Create an element with no attributes, text or children
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Add a child element
    pub fn with_child(mut self, child: ConfigurationElement) -> Self {
        self.children.push(child);
        self
    }

    /// Set the text value
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn push_child(&mut self, child: ConfigurationElement) {
        self.children.push(child);
    }

    pub fn append_value(&mut self, text: &str) {
        self.value.push_str(text);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn children(&self) -> &[ConfigurationElement] {
        &self.children
    }

    /// First child with the given name
    pub fn find(&self, name: &str) -> Option<&ConfigurationElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given name, in document order
    pub fn find_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ConfigurationElement> {
        self.children.iter().filter(move |c| c.name == name)
    }
}
