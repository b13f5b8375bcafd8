//! Pulls the package metadata fields out of a decoded [`ManifestTree`].

use std::collections::BTreeSet;

use crate::android::binary_xml::{AttributeValue, ManifestTree};
use crate::android::value::{ResourceId, TYPE_INT_BOOLEAN, TYPE_INT_DEC, TYPE_INT_HEX, TYPE_REFERENCE};

/// Tags whose `name` attribute declares a permission.
pub const PERMISSION_NAME_TAGS: [&str; 2] = ["uses-permission", "permission-group"];

/// Tags whose `permission` attribute requires a permission.
pub const PERMISSION_GUARD_TAGS: [&str; 5] = [
    "uses-permission",
    "permission-group",
    "service",
    "provider",
    "activity",
];

/// Literal resource references found while reading the manifest.
///
/// Only the fields that may need the resource table are tracked. An empty set means the
/// resource table does not have to be read at all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceRequests {
    pub version_name: Option<ResourceId>,
    pub label: Option<ResourceId>,
    pub icon: Option<ResourceId>,
}

impl ResourceRequests {
    pub fn is_empty(&self) -> bool {
        self.version_name.is_none() && self.label.is_none() && self.icon.is_none()
    }

    pub fn ids(&self) -> BTreeSet<ResourceId> {
        [self.version_name, self.label, self.icon]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Scalar fields and permissions as written in the manifest, before resource resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestFields {
    pub package_name: Option<String>,
    pub version_code: Option<String>,
    pub version_name: Option<String>,
    pub min_sdk_version: Option<String>,
    pub target_sdk_version: Option<String>,
    pub label: Option<String>,
    pub icon: Option<String>,
    pub debuggable: bool,
    pub permissions: BTreeSet<String>,
}

/// Reads the metadata fields and records which of them are literal resource references.
pub fn extract_fields(tree: &ManifestTree) -> (ManifestFields, ResourceRequests) {
    let mut requests = ResourceRequests::default();

    let version_name = tree
        .find_attribute("manifest", "versionName")
        .or_else(|| tree.fuzzy_find("versionName"));
    let label = tree.find_attribute("application", "label");
    let icon = tree
        .find_attribute("application", "icon")
        .or_else(|| tree.fuzzy_find("icon"));
    requests.version_name = version_name.and_then(literal_reference);
    requests.label = label.and_then(literal_reference);
    requests.icon = icon.and_then(literal_reference);

    let fields = ManifestFields {
        package_name: text(tree.find_attribute("manifest", "package")),
        version_code: text(
            tree.find_attribute("manifest", "versionCode")
                .or_else(|| tree.fuzzy_find("versionCode")),
        ),
        version_name: text(version_name),
        min_sdk_version: text(tree.find_attribute("uses-sdk", "minSdkVersion")),
        target_sdk_version: text(tree.find_attribute("uses-sdk", "targetSdkVersion")),
        label: text(label),
        icon: text(icon),
        debuggable: tree
            .find_attribute("application", "debuggable")
            .is_some_and(is_true),
        permissions: collect_permissions(tree),
    };
    (fields, requests)
}

/// Every permission the manifest declares or requires, sorted and deduplicated.
pub fn collect_permissions(tree: &ManifestTree) -> BTreeSet<String> {
    let mut permissions = BTreeSet::new();
    for element in tree.elements() {
        let tag = element.name.as_str();
        if PERMISSION_NAME_TAGS.contains(&tag) {
            permissions.extend(element.attribute("name").map(|v| v.to_string()));
        }
        if PERMISSION_GUARD_TAGS.contains(&tag) {
            permissions.extend(element.attribute("permission").map(|v| v.to_string()));
        }
    }
    permissions
}

/// The resource id a value stands for, if it is a literal reference.
///
/// Typed references and typed integers are taken as ids, as is a raw string of the form
/// `@7F0B0001` or `@0x7f0b0001`. Symbolic strings like `@string/app_name` and short hex
/// like `@Cafe` are plain text.
pub fn literal_reference(value: &AttributeValue) -> Option<ResourceId> {
    match value {
        AttributeValue::Typed {
            data_type: TYPE_REFERENCE | TYPE_INT_DEC | TYPE_INT_HEX,
            data,
        } if *data != 0 => Some(ResourceId(*data)),
        AttributeValue::Typed { .. } => None,
        AttributeValue::String(text) => {
            if text.starts_with('@') {
                text.parse().ok()
            } else {
                None
            }
        }
    }
}

fn text(value: Option<&AttributeValue>) -> Option<String> {
    value.map(|v| v.to_string())
}

fn is_true(value: &AttributeValue) -> bool {
    match value {
        AttributeValue::Typed {
            data_type: TYPE_INT_BOOLEAN,
            data,
        } => *data != 0,
        AttributeValue::Typed { .. } => false,
        AttributeValue::String(text) => text.eq_ignore_ascii_case("true"),
    }
}
