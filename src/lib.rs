//! # Apkmeta
//!
//! A library for reading package metadata out of Android APK files: package name, version,
//! SDK bounds, permissions, and the application label and icon across locales and densities.
//!
//! The binary manifest (AXML) and the compiled resource table (ARSC) are decoded from
//! in-memory buffers. Archive access goes through the [`EntrySource`] trait, implemented by the
//! zip-backed [`ApkFile`].
//!
//! # Examples
//!
//! ```no_run
//!  use apkmeta::{extract_package_info, ApkFile, ExtractConfig};
//!
//!  let apk = ApkFile::from_file("app.apk").unwrap();
//!  let config = ExtractConfig::default().with_preferred_density(480);
//!  let info = extract_package_info(&apk, &config).unwrap();
//!  println!("{:?} requests {} permissions", info.package_name, info.permissions.len());
//! ```

pub mod android;
#[cfg(test)]
mod tests;

pub use android::binary_xml::{AttributeValue, Element, ManifestTree};
pub use android::error::{ArchiveError, ExtractError, FormatError, ParseResourceIdError};
pub use android::package_info::{
    extract_from_buffers, extract_package_info, ExtractConfig, IconVariant, PackageInfo,
};
pub use android::resources::{resolve, ResourceTable};
pub use android::value::ResourceId;
pub use android::zip::{ApkFile, EntrySource};
