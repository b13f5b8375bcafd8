//! Ties the manifest decoder and the resource table together into a [`PackageInfo`].

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::android::binary_xml::ManifestTree;
use crate::android::error::{ExtractError, ExtractResult};
use crate::android::manifest::{extract_fields, ManifestFields, ResourceRequests};
use crate::android::resources::{ResourceTable, ResourceValue};
use crate::android::value::ResourceId;
use crate::android::zip::EntrySource;

/// `ResTable_config` density for drawables that scale to any density. It and `nodpi`
/// (0xFFFF) are never picked as the highest density.
pub const DENSITY_ANY: u16 = 0xFFFE;

/// Metadata of one application package.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub package_name: Option<String>,
    pub version_code: Option<String>,
    pub version_name: Option<String>,
    pub min_sdk_version: Option<String>,
    pub target_sdk_version: Option<String>,
    pub debuggable: bool,
    pub permissions: BTreeSet<String>,
    pub label: Option<String>,
    /// Label per locale; `""` is the default locale.
    pub labels: BTreeMap<String, String>,
    /// Archive path of the chosen icon.
    pub icon: Option<String>,
    /// Icon path per screen density, taken from the default locale where it has one.
    pub icons: BTreeMap<u16, String>,
    /// Every distinct (locale, density) icon, in resource table order.
    pub icon_variants: Vec<IconVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_bytes: Option<Vec<u8>>,
}

/// One configuration-specific icon path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconVariant {
    /// `""` for the default locale.
    pub locale: String,
    pub density: u16,
    pub path: String,
}

/// Options for [`extract_package_info`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractConfig {
    pub manifest_entry: String,
    pub resources_entry: String,
    /// Density to prefer when choosing among icon variants.
    pub preferred_density: Option<u16>,
    /// Treat an unresolvable or missing icon as an error instead of leaving it empty.
    pub require_icon: bool,
    pub load_icon_bytes: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            manifest_entry: "AndroidManifest.xml".to_string(),
            resources_entry: "resources.arsc".to_string(),
            preferred_density: None,
            require_icon: false,
            load_icon_bytes: true,
        }
    }
}

impl ExtractConfig {
    pub fn with_manifest_entry(mut self, name: impl Into<String>) -> Self {
        self.manifest_entry = name.into();
        self
    }

    pub fn with_resources_entry(mut self, name: impl Into<String>) -> Self {
        self.resources_entry = name.into();
        self
    }

    pub fn with_preferred_density(mut self, density: u16) -> Self {
        self.preferred_density = Some(density);
        self
    }

    pub fn with_require_icon(mut self, require: bool) -> Self {
        self.require_icon = require;
        self
    }

    pub fn with_load_icon_bytes(mut self, load: bool) -> Self {
        self.load_icon_bytes = load;
        self
    }
}

/// Extracts package metadata from an archive.
///
/// The resource table entry is only read when the manifest holds a literal resource
/// reference for the version name, label or icon.
///
/// # Examples
///
/// ```no_run
/// use apkmeta::android::package_info::{extract_package_info, ExtractConfig};
/// use apkmeta::android::zip::ApkFile;
///
/// let apk = ApkFile::from_file("app.apk").unwrap();
/// let info = extract_package_info(&apk, &ExtractConfig::default()).unwrap();
/// println!("{:?} {:?}", info.package_name, info.version_name);
/// ```
pub fn extract_package_info<S: EntrySource + ?Sized>(
    source: &S,
    config: &ExtractConfig,
) -> ExtractResult<PackageInfo> {
    let manifest = source
        .read_entry(&config.manifest_entry)?
        .ok_or_else(|| ExtractError::MissingEntry(config.manifest_entry.clone()))?;
    let mut package = extract(
        &manifest,
        || {
            source
                .read_entry(&config.resources_entry)?
                .map(Cow::Owned)
                .ok_or_else(|| ExtractError::MissingEntry(config.resources_entry.clone()))
        },
        config,
    )?;

    if config.load_icon_bytes {
        if let Some(icon) = package.icon.clone() {
            match source.read_entry(&icon)? {
                Some(bytes) => package.icon_bytes = Some(bytes),
                None if config.require_icon => return Err(ExtractError::MissingEntry(icon)),
                None => warn!("icon entry '{icon}' is missing from the archive"),
            }
        }
    }
    log_summary(&package);
    Ok(package)
}

/// Extracts package metadata from already loaded entries. No icon bytes are attached.
pub fn extract_from_buffers(
    manifest: &[u8],
    resources: &[u8],
    config: &ExtractConfig,
) -> ExtractResult<PackageInfo> {
    let package = extract(manifest, || Ok(Cow::Borrowed(resources)), config)?;
    log_summary(&package);
    Ok(package)
}

fn extract<'a, F>(
    manifest: &[u8],
    load_resources: F,
    config: &ExtractConfig,
) -> ExtractResult<PackageInfo>
where
    F: FnOnce() -> ExtractResult<Cow<'a, [u8]>>,
{
    let tree = ManifestTree::from_bytes(manifest).map_err(ExtractError::Manifest)?;
    debug!("manifest decoded into {} elements", tree.len());
    let (fields, requests) = extract_fields(&tree);

    let table = if requests.is_empty() {
        None
    } else {
        let resources = load_resources()?;
        Some(ResourceTable::parse(&resources).map_err(ExtractError::Resources)?)
    };
    merge(fields, &requests, table.as_ref(), config)
}

fn merge(
    fields: ManifestFields,
    requests: &ResourceRequests,
    table: Option<&ResourceTable>,
    config: &ExtractConfig,
) -> ExtractResult<PackageInfo> {
    let mut package = PackageInfo {
        package_name: fields.package_name,
        version_code: fields.version_code,
        version_name: fields.version_name,
        min_sdk_version: fields.min_sdk_version,
        target_sdk_version: fields.target_sdk_version,
        debuggable: fields.debuggable,
        permissions: fields.permissions,
        label: fields.label,
        ..PackageInfo::default()
    };

    // A requested reference replaces the literal text, even when it resolves to nothing.
    if requests.version_name.is_some() {
        package.version_name = lookup(table, requests.version_name)
            .first()
            .map(|value| value.value.clone());
    }

    let labels = lookup(table, requests.label);
    if requests.label.is_some() {
        package.label = labels.first().map(|value| value.value.clone());
    }
    for value in labels {
        package
            .labels
            .entry(value.config.locale())
            .or_insert_with(|| value.value.clone());
    }
    if requests.label.is_none() {
        if let Some(label) = &package.label {
            package.labels.insert(String::new(), label.clone());
        }
    }

    match requests.icon {
        Some(id) => {
            let paths: Vec<&ResourceValue> = lookup(table, Some(id))
                .iter()
                .filter(|value| value.value.contains('/'))
                .collect();
            for value in &paths {
                let locale = value.config.locale();
                let density = value.config.density;
                if package
                    .icon_variants
                    .iter()
                    .any(|variant| variant.locale == locale && variant.density == density)
                {
                    continue;
                }
                if locale.is_empty() {
                    package.icons.insert(density, value.value.clone());
                } else {
                    package
                        .icons
                        .entry(density)
                        .or_insert_with(|| value.value.clone());
                }
                package.icon_variants.push(IconVariant {
                    locale,
                    density,
                    path: value.value.clone(),
                });
            }
            package.icon = choose_icon(&package.icons, config.preferred_density)
                .or_else(|| paths.first().map(|value| value.value.clone()));
            if package.icon.is_none() {
                if config.require_icon {
                    return Err(ExtractError::UnresolvedIcon(id.to_string()));
                }
                warn!("icon {id} did not resolve to a path");
            }
        }
        None => package.icon = fields.icon,
    }
    Ok(package)
}

fn lookup(table: Option<&ResourceTable>, id: Option<ResourceId>) -> &[ResourceValue] {
    match (table, id) {
        (Some(table), Some(id)) => table.values(id),
        _ => &[],
    }
}

/// The preferred density if present, otherwise the highest concrete density.
fn choose_icon(icons: &BTreeMap<u16, String>, preferred: Option<u16>) -> Option<String> {
    if let Some(path) = preferred.and_then(|density| icons.get(&density)) {
        return Some(path.clone());
    }
    icons
        .range(..DENSITY_ANY)
        .next_back()
        .map(|(_, path)| path.clone())
}

fn log_summary(package: &PackageInfo) {
    info!(
        "{} version {} ({}): {} permissions, {} labels, {} icon variants",
        package.package_name.as_deref().unwrap_or("<unknown>"),
        package.version_name.as_deref().unwrap_or("?"),
        package.version_code.as_deref().unwrap_or("?"),
        package.permissions.len(),
        package.labels.len(),
        package.icon_variants.len()
    );
}
