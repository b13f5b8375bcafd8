//! Decoders for the binary formats found inside an APK.

pub mod binary_xml;
pub mod chunk;
pub mod error;
pub mod manifest;
pub mod package_info;
pub mod resources;
pub mod string_pool;
pub mod value;
pub mod zip;
