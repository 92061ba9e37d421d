//! `plugin.xml` reader
//!
//! Converts an XML document into a [`ConfigurationElement`] tree and hands
//! it to [`Descriptor::from_element`]. Only the tree shape matters to the
//! runtime; no schema is applied to the descriptor file itself.

use super::{Descriptor, DescriptorError};
use crate::element::ConfigurationElement;
use std::path::Path;

/// Default descriptor file name inside a module directory
pub const DESCRIPTOR_FILE: &str = "plugin.xml";

/// Read and parse the descriptor file at `path`
///
/// The module root is the directory containing the file.
pub fn read_descriptor(path: impl AsRef<Path>) -> Result<Descriptor, DescriptorError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| DescriptorError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let location = path.parent().unwrap_or_else(|| Path::new("."));
    parse_descriptor_at(&text, location, path)
}

/// Parse descriptor text for a module rooted at `location`
pub fn parse_descriptor(
    text: &str,
    location: impl AsRef<Path>,
) -> Result<Descriptor, DescriptorError> {
    let location = location.as_ref();
    parse_descriptor_at(text, location, &location.join(DESCRIPTOR_FILE))
}

fn parse_descriptor_at(
    text: &str,
    location: &Path,
    source_path: &Path,
) -> Result<Descriptor, DescriptorError> {
    let document = roxmltree::Document::parse(text).map_err(|source| DescriptorError::Parse {
        path: source_path.to_path_buf(),
        source,
    })?;
    let root = element_from_node(document.root_element());
    Descriptor::from_element(&root, location)
}

/// Convert an XML element node into an owned configuration element
pub fn element_from_node(node: roxmltree::Node<'_, '_>) -> ConfigurationElement {
    let mut element = ConfigurationElement::new(node.tag_name().name());

    for attribute in node.attributes() {
        element.set_attribute(attribute.name(), attribute.value());
    }

    for child in node.children() {
        if child.is_element() {
            element.push_child(element_from_node(child));
        } else if child.is_text() {
            if let Some(text) = child.text() {
                let text = text.trim();
                if !text.is_empty() {
                    element.append_value(text);
                }
            }
        }
    }

    element
}
