//! Extension queries and validation through the runtime

use mosaic_runtime::descriptor::parse_descriptor;
use mosaic_runtime::extension::{AcceptAll, FnValidator};
use mosaic_runtime::{
    ConfigurationElement, Descriptor, ElementSchema, Extension, ExtensionPoint, RegistryError,
    Runtime, RuntimeError, Validation, ValidationReport,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn reader_runtime() -> Runtime {
    let runtime = Runtime::new();
    runtime
        .register_validator("reader", || {
            ElementSchema::new()
                .require_attribute("id")
                .child_with_schema(
                    "format",
                    1,
                    None,
                    ElementSchema::new().require_attribute("extension"),
                )
        })
        .unwrap();
    runtime
        .add_module(
            Descriptor::builder("io")
                .extension_point_with_schema("io.reader", "reader")
                .location("/virtual/io")
                .build()
                .unwrap(),
        )
        .unwrap();
    runtime
}

fn reader(id: &str, format: Option<&str>) -> ConfigurationElement {
    let mut format_element = ConfigurationElement::new("format");
    if let Some(extension) = format {
        format_element.set_attribute("extension", extension);
    }
    ConfigurationElement::new("extension")
        .with_attribute("id", id)
        .with_child(format_element)
}

#[test]
fn test_invalid_extension_is_hidden_but_kept() {
    let runtime = reader_runtime();
    runtime
        .add_module(
            Descriptor::builder("vtk")
                .extension("io.reader", reader("vtk-reader", None))
                .location("/virtual/vtk")
                .build()
                .unwrap(),
        )
        .unwrap();
    runtime
        .add_module(
            Descriptor::builder("stl")
                .extension("io.reader", reader("stl-reader", Some(".stl")))
                .location("/virtual/stl")
                .build()
                .unwrap(),
        )
        .unwrap();

    let valid = runtime.get_all_extensions_for_point("io.reader").unwrap();
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].id(), Some("stl-reader"));
    assert_eq!(valid[0].module(), "stl");

    let raw = runtime.extensions_for_point("io.reader").unwrap();
    assert_eq!(raw.len(), 2);
    let rejected = raw.iter().find(|e| e.module() == "vtk").unwrap();
    match rejected.validity() {
        Some(Validation::Invalid(report)) => {
            assert!(report.error_log().contains("missing attribute 'extension'"))
        }
        other => panic!("unexpected validity {other:?}"),
    }
}

#[test]
fn test_validator_created_lazily_and_once() {
    let built = Arc::new(AtomicUsize::new(0));
    let runtime = Runtime::new();
    let counter = built.clone();
    runtime
        .register_validator("counted", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            AcceptAll
        })
        .unwrap();
    runtime
        .add_module(
            Descriptor::builder("host")
                .extension_point_with_schema("host.point", "counted")
                .extension("host.point", ConfigurationElement::new("extension"))
                .extension("host.point", ConfigurationElement::new("extension"))
                .location("/virtual/host")
                .build()
                .unwrap(),
        )
        .unwrap();

    assert_eq!(built.load(Ordering::SeqCst), 0);
    let point = runtime.find_extension_point("host.point").unwrap().unwrap();
    assert!(!point.has_validator());

    assert_eq!(runtime.get_all_extensions_for_point("host.point").unwrap().len(), 2);
    assert_eq!(runtime.get_all_extensions_for_point("host.point").unwrap().len(), 2);
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(point.has_validator());
}

#[test]
fn test_unregistered_schema_rejects_everything() {
    let runtime = Runtime::new();
    runtime
        .add_module(
            Descriptor::builder("host")
                .extension_point_with_schema("host.point", "nowhere")
                .extension("host.point", ConfigurationElement::new("extension"))
                .location("/virtual/host")
                .build()
                .unwrap(),
        )
        .unwrap();

    assert!(runtime
        .get_all_extensions_for_point("host.point")
        .unwrap()
        .is_empty());
    let raw = runtime.extensions_for_point("host.point").unwrap();
    let verdict = runtime.validate_extension(&raw[0]).unwrap();
    assert!(matches!(verdict, Validation::Invalid(ref r) if r.error_log().contains("'nowhere'")));
}

#[test]
fn test_extension_for_unknown_point() {
    let runtime = Runtime::new();
    let orphan = runtime
        .register_extension(Extension::new(
            Some("orphan".into()),
            "later.point",
            "host",
            Arc::new(ConfigurationElement::new("extension")),
        ))
        .unwrap();

    assert!(runtime
        .get_all_extensions_for_point("later.point")
        .unwrap()
        .is_empty());
    assert!(matches!(
        runtime.validate_extension(&orphan),
        Err(RuntimeError::Registry(RegistryError::InvalidPointReference { .. }))
    ));

    runtime
        .register_extension_point(ExtensionPoint::new("later.point", "host", None))
        .unwrap();
    assert_eq!(
        runtime.get_all_extensions_for_point("later.point").unwrap().len(),
        1
    );
}

#[test]
fn test_duplicate_point_keeps_first_validator() {
    let runtime = Runtime::new();
    let strict = FnValidator::new(|_: &ConfigurationElement, report: &mut ValidationReport| {
        report.push("strict point rejects everything");
    });
    runtime
        .register_extension_point(ExtensionPoint::with_validator(
            "p",
            "first",
            Arc::new(strict),
        ))
        .unwrap();
    let err = runtime
        .register_extension_point(ExtensionPoint::with_validator(
            "p",
            "second",
            Arc::new(AcceptAll),
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Registry(RegistryError::DuplicateExtensionPoint { .. })
    ));

    runtime
        .register_extension(Extension::new(
            None,
            "p",
            "user",
            Arc::new(ConfigurationElement::new("extension")),
        ))
        .unwrap();
    assert_eq!(
        runtime.find_extension_point("p").unwrap().unwrap().module(),
        "first"
    );
    assert!(runtime.get_all_extensions_for_point("p").unwrap().is_empty());
}

#[test]
fn test_disabled_extension_and_module_are_hidden() {
    let runtime = Runtime::new();
    runtime
        .add_module(
            Descriptor::builder("host")
                .extension_point("menu")
                .location("/virtual/host")
                .build()
                .unwrap(),
        )
        .unwrap();
    for (module, id) in [("file", "menu.file"), ("edit", "menu.edit"), ("view", "menu.view")] {
        runtime
            .add_module(
                Descriptor::builder(module)
                    .extension("menu", ConfigurationElement::new("extension").with_attribute("id", id))
                    .location(format!("/virtual/{module}"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }

    runtime.set_extension_enabled("menu.edit", false).unwrap();
    runtime.set_module_enabled("view", false).unwrap();

    let ids: Vec<_> = runtime
        .get_all_extensions_for_point("menu")
        .unwrap()
        .iter()
        .filter_map(|e| e.id().map(str::to_string))
        .collect();
    assert_eq!(ids, vec!["menu.file"]);
    assert_eq!(runtime.extensions_for_point("menu").unwrap().len(), 3);

    runtime.set_extension_enabled("menu.edit", true).unwrap();
    assert_eq!(runtime.get_all_extensions_for_point("menu").unwrap().len(), 2);
    assert!(matches!(
        runtime.set_extension_enabled("menu.none", true),
        Err(RuntimeError::UnknownExtension(_))
    ));
}

#[test]
fn test_extension_body_is_shared() {
    let runtime = Runtime::new();
    runtime
        .add_module(
            Descriptor::builder("host")
                .extension_point("p")
                .extension(
                    "p",
                    ConfigurationElement::new("extension")
                        .with_child(ConfigurationElement::new("label").with_value("Open")),
                )
                .location("/virtual/host")
                .build()
                .unwrap(),
        )
        .unwrap();

    let first = runtime.get_all_extensions_for_point("p").unwrap();
    let second = runtime.get_all_extensions_for_point("p").unwrap();
    assert!(Arc::ptr_eq(first[0].body(), second[0].body()));
    assert_eq!(first[0].body().find("label").map(|l| l.value()), Some("Open"));
}

#[test]
fn test_point_element_and_point_switch() {
    let runtime = Runtime::new();
    let descriptor = parse_descriptor(
        r#"<plugin id="ui">
            <point id="ui.actions">
                <implements>ui.open</implements>
                <implements>ui.save</implements>
            </point>
        </plugin>"#,
        "/virtual/ui",
    )
    .unwrap();
    runtime.add_module(descriptor).unwrap();

    let ids: Vec<_> = runtime
        .get_all_extensions_for_point("ui.actions")
        .unwrap()
        .iter()
        .filter_map(|e| e.id().map(str::to_string))
        .collect();
    assert_eq!(ids, vec!["ui.open", "ui.save"]);

    runtime.set_extension_point_enabled("ui.actions", false).unwrap();
    assert!(runtime.get_all_extensions_for_point("ui.actions").unwrap().is_empty());
    assert!(!runtime.find_extension_point("ui.actions").unwrap().unwrap().is_enabled());
    // Extensions stay registered while their point is off
    assert_eq!(runtime.extensions_for_point("ui.actions").unwrap().len(), 2);

    runtime.set_extension_point_enabled("ui.actions", true).unwrap();
    assert_eq!(runtime.get_all_extensions_for_point("ui.actions").unwrap().len(), 2);

    assert!(matches!(
        runtime.set_extension_point_enabled("ui.none", false),
        Err(RuntimeError::UnknownExtensionPoint(_))
    ));
}

#[test]
fn test_switch_from_validator_is_rejected() {
    let runtime = Arc::new(Runtime::new());
    let rejected: Arc<Mutex<Option<bool>>> = Arc::default();

    let inner = Arc::downgrade(&runtime);
    let seen = rejected.clone();
    let validator = FnValidator::new(move |_: &ConfigurationElement, _: &mut ValidationReport| {
        if let Some(runtime) = inner.upgrade() {
            let result = runtime.set_extension_enabled("menu.file", false);
            *seen.lock().unwrap() = Some(matches!(
                result,
                Err(RuntimeError::Reentrant {
                    operation: "set_extension_enabled"
                })
            ));
        }
    });
    runtime
        .register_extension_point(ExtensionPoint::with_validator("menu", "menu", Arc::new(validator)))
        .unwrap();
    runtime
        .add_module(
            Descriptor::builder("file")
                .extension(
                    "menu",
                    ConfigurationElement::new("extension").with_attribute("id", "menu.file"),
                )
                .location("/virtual/file")
                .build()
                .unwrap(),
        )
        .unwrap();

    assert_eq!(runtime.get_all_extensions_for_point("menu").unwrap().len(), 1);
    assert_eq!(*rejected.lock().unwrap(), Some(true));
}
