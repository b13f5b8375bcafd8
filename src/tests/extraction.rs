use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use zip::write::FileOptions;
use zip::ZipWriter;

use crate::android::error::{ArchiveError, ExtractError, FormatError};
use crate::android::package_info::{
    extract_from_buffers, extract_package_info, ExtractConfig, IconVariant, PackageInfo,
};
use crate::android::value::{TYPE_INT_DEC, TYPE_REFERENCE};
use crate::android::zip::{ApkFile, EntrySource};
use crate::tests::fixtures::{
    ArscBuilder, AxmlBuilder, EntryFixture, FixtureValue, PackageFixture, TypeFixture,
};

const VERSION_ID: u32 = 0x7f01_0000;
const LABEL_ID: u32 = 0x7f01_0001;
const DRAWABLE_ID: u32 = 0x7f02_0000;
const NOT_A_PATH_ID: u32 = 0x7f02_0001;
const MIPMAP_ID: u32 = 0x7f03_0000;
const MISSING_ID: u32 = 0x7f05_0000;

const MDPI_ICON: &str = "res/mipmap-mdpi/ic_launcher.png";
const XXHDPI_ICON: &str = "res/mipmap-xxhdpi/ic_launcher.png";

fn manifest(version_name: FixtureValue<'_>, application: &[(&str, FixtureValue<'_>)]) -> Vec<u8> {
    let mut axml = AxmlBuilder::new();
    axml.start_namespace();
    axml.start_element(
        "manifest",
        &[
            ("android:versionCode", FixtureValue::Typed(TYPE_INT_DEC, 3)),
            ("android:versionName", version_name),
            ("package", FixtureValue::Str("com.example.app")),
        ],
    );
    axml.start_element(
        "uses-permission",
        &[("android:name", FixtureValue::Str("android.permission.INTERNET"))],
    );
    axml.end_element("uses-permission");
    axml.start_element("application", application);
    axml.text("\n    ");
    axml.end_element("application");
    axml.end_element("manifest");
    axml.end_namespace();
    axml.build()
}

fn literal_manifest() -> Vec<u8> {
    manifest(
        FixtureValue::Str("1.2.3"),
        &[("android:label", FixtureValue::Str("Plain"))],
    )
}

fn reference(id: u32) -> FixtureValue<'static> {
    FixtureValue::Typed(TYPE_REFERENCE, id)
}

fn resource_table() -> Vec<u8> {
    ArscBuilder::new(vec![PackageFixture::new(
        0x7f,
        vec![
            TypeFixture::new(
                0x01,
                vec![
                    Some(EntryFixture::string("2.0.0")),
                    Some(EntryFixture::string("My App")),
                ],
            ),
            TypeFixture::new(0x01, vec![None, Some(EntryFixture::string("Mon Appli"))])
                .locale("fr", ""),
            TypeFixture::new(0x01, vec![None, Some(EntryFixture::string("Meine App"))])
                .locale("de", "DE"),
            TypeFixture::new(
                0x02,
                vec![
                    Some(EntryFixture::string(MDPI_ICON)),
                    Some(EntryFixture::Typed(TYPE_INT_DEC, 5)),
                ],
            )
            .density(160),
            TypeFixture::new(0x02, vec![Some(EntryFixture::string(XXHDPI_ICON)), None])
                .density(480),
            TypeFixture::new(0x03, vec![Some(EntryFixture::Reference(DRAWABLE_ID))]),
        ],
    )])
    .build()
}

fn referencing_manifest(icon: u32) -> Vec<u8> {
    manifest(
        reference(VERSION_ID),
        &[
            ("android:label", reference(LABEL_ID)),
            ("android:icon", reference(icon)),
        ],
    )
}

/// Records every entry name it is asked for.
struct RecordingSource {
    entries: BTreeMap<String, Vec<u8>>,
    reads: RefCell<Vec<String>>,
}

impl RecordingSource {
    fn new(entries: &[(&str, Vec<u8>)]) -> Self {
        RecordingSource {
            entries: entries
                .iter()
                .map(|(name, data)| (name.to_string(), data.clone()))
                .collect(),
            reads: RefCell::new(Vec::new()),
        }
    }

    fn reads(&self) -> Vec<String> {
        self.reads.borrow().clone()
    }
}

impl EntrySource for RecordingSource {
    fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        self.reads.borrow_mut().push(name.to_string());
        self.entries.read_entry(name)
    }
}

#[test]
fn literal_fields_never_touch_the_resource_table() {
    // The table is garbage: reading it would fail the extraction.
    let info = extract_from_buffers(&literal_manifest(), b"garbage", &ExtractConfig::default())
        .expect("extract literal manifest");
    assert_eq!(info.package_name.as_deref(), Some("com.example.app"));
    assert_eq!(info.version_name.as_deref(), Some("1.2.3"));
    assert_eq!(info.version_code.as_deref(), Some("3"));
    assert_eq!(info.label.as_deref(), Some("Plain"));
    assert_eq!(info.labels.get(""), Some(&"Plain".to_string()));
    assert!(info.permissions.contains("android.permission.INTERNET"));

    let source = RecordingSource::new(&[
        ("AndroidManifest.xml", literal_manifest()),
        ("resources.arsc", b"garbage".to_vec()),
    ]);
    extract_package_info(&source, &ExtractConfig::default()).unwrap();
    assert_eq!(source.reads(), vec!["AndroidManifest.xml"]);
}

#[test]
fn referenced_version_name_is_resolved() {
    let manifest = manifest(reference(VERSION_ID), &[]);
    let info = extract_from_buffers(&manifest, &resource_table(), &ExtractConfig::default())
        .unwrap();
    assert_eq!(info.version_name.as_deref(), Some("2.0.0"));
    assert_eq!(info.label, None);
    assert_eq!(info.icon, None);
}

#[test]
fn labels_per_locale_and_icons_per_density() {
    let info = extract_from_buffers(
        &referencing_manifest(MIPMAP_ID),
        &resource_table(),
        &ExtractConfig::default(),
    )
    .unwrap();
    assert_eq!(info.label.as_deref(), Some("My App"));
    let labels: Vec<(&str, &str)> = info
        .labels
        .iter()
        .map(|(locale, label)| (locale.as_str(), label.as_str()))
        .collect();
    assert_eq!(
        labels,
        vec![("", "My App"), ("de-DE", "Meine App"), ("fr", "Mon Appli")]
    );
    assert_eq!(info.icons.get(&160).map(String::as_str), Some(MDPI_ICON));
    assert_eq!(info.icons.get(&480).map(String::as_str), Some(XXHDPI_ICON));
    assert_eq!(info.icon.as_deref(), Some(XXHDPI_ICON));
    assert_eq!(info.icon_bytes, None);

    let preferred = extract_from_buffers(
        &referencing_manifest(MIPMAP_ID),
        &resource_table(),
        &ExtractConfig::default().with_preferred_density(160),
    )
    .unwrap();
    assert_eq!(preferred.icon.as_deref(), Some(MDPI_ICON));
}

#[test]
fn unresolved_text_references_become_none() {
    let typed = manifest(
        reference(MISSING_ID),
        &[("android:label", reference(MISSING_ID + 1))],
    );
    let raw = manifest(
        FixtureValue::Str("@7F050000"),
        &[("android:label", FixtureValue::Str("@0x7f050001"))],
    );
    for manifest in [typed, raw] {
        let info = extract_from_buffers(&manifest, &resource_table(), &ExtractConfig::default())
            .unwrap();
        assert_eq!(info.version_name, None);
        assert_eq!(info.label, None);
        assert!(info.labels.is_empty());
        assert_eq!(info.package_name.as_deref(), Some("com.example.app"));
    }
}

#[test]
fn hex_looking_text_is_not_a_reference() {
    let manifest = manifest(
        FixtureValue::Str("@Cafe"),
        &[("android:label", FixtureValue::Str("@+1"))],
    );
    let source = RecordingSource::new(&[
        ("AndroidManifest.xml", manifest),
        ("resources.arsc", b"garbage".to_vec()),
    ]);
    let info = extract_package_info(&source, &ExtractConfig::default()).unwrap();
    assert_eq!(info.version_name.as_deref(), Some("@Cafe"));
    assert_eq!(info.label.as_deref(), Some("@+1"));
    assert_eq!(info.labels.get(""), Some(&"@+1".to_string()));
    assert_eq!(source.reads(), vec!["AndroidManifest.xml"]);
}

#[test]
fn icon_variants_keep_locale_and_density() {
    const FR_XXHDPI_ICON: &str = "res/mipmap-fr-xxhdpi/ic_launcher.png";
    let table = ArscBuilder::new(vec![PackageFixture::new(
        0x7f,
        vec![
            TypeFixture::new(0x02, vec![Some(EntryFixture::string(FR_XXHDPI_ICON))])
                .locale("fr", "")
                .density(480),
            TypeFixture::new(0x02, vec![Some(EntryFixture::string(XXHDPI_ICON))]).density(480),
            TypeFixture::new(0x02, vec![Some(EntryFixture::string(MDPI_ICON))]).density(160),
            TypeFixture::new(0x02, vec![Some(EntryFixture::string("res/other.png"))])
                .locale("fr", "")
                .density(480),
        ],
    )])
    .build();
    let manifest = manifest(
        FixtureValue::Str("1.0"),
        &[("android:icon", reference(DRAWABLE_ID))],
    );
    let info = extract_from_buffers(&manifest, &table, &ExtractConfig::default()).unwrap();

    let variant = |locale: &str, density, path: &str| IconVariant {
        locale: locale.to_string(),
        density,
        path: path.to_string(),
    };
    assert_eq!(
        info.icon_variants,
        vec![
            variant("fr", 480, FR_XXHDPI_ICON),
            variant("", 480, XXHDPI_ICON),
            variant("", 160, MDPI_ICON),
        ]
    );
    assert_eq!(info.icons.get(&480).map(String::as_str), Some(XXHDPI_ICON));
    assert_eq!(info.icons.get(&160).map(String::as_str), Some(MDPI_ICON));
    assert_eq!(info.icon.as_deref(), Some(XXHDPI_ICON));
}

#[test]
fn unresolved_icon_degrades_unless_required() {
    for icon in [MISSING_ID, NOT_A_PATH_ID] {
        let manifest = referencing_manifest(icon);
        let info = extract_from_buffers(&manifest, &resource_table(), &ExtractConfig::default())
            .expect("icon failure is not fatal by default");
        assert_eq!(info.icon, None);
        assert!(info.icons.is_empty());
        assert!(info.icon_variants.is_empty());
        assert_eq!(info.version_name.as_deref(), Some("2.0.0"));

        let strict = ExtractConfig::default().with_require_icon(true);
        match extract_from_buffers(&manifest, &resource_table(), &strict) {
            Err(ExtractError::UnresolvedIcon(id)) => assert_eq!(id, format!("@{icon:08X}")),
            other => panic!("expected UnresolvedIcon, got {other:?}"),
        }
    }
}

#[test]
fn icon_bytes_come_from_the_archive() {
    let source = RecordingSource::new(&[
        ("AndroidManifest.xml", referencing_manifest(MIPMAP_ID)),
        ("resources.arsc", resource_table()),
        (XXHDPI_ICON, b"\x89PNG xxhdpi".to_vec()),
    ]);
    let info = extract_package_info(&source, &ExtractConfig::default()).unwrap();
    assert_eq!(info.icon_bytes.as_deref(), Some(&b"\x89PNG xxhdpi"[..]));
    assert_eq!(
        source.reads(),
        vec!["AndroidManifest.xml", "resources.arsc", XXHDPI_ICON]
    );

    let skip = ExtractConfig::default().with_load_icon_bytes(false);
    assert_eq!(extract_package_info(&source, &skip).unwrap().icon_bytes, None);

    let strict = ExtractConfig::default()
        .with_require_icon(true)
        .with_preferred_density(160);
    assert!(matches!(
        extract_package_info(&source, &strict),
        Err(ExtractError::MissingEntry(name)) if name == MDPI_ICON
    ));
    let lenient = ExtractConfig::default().with_preferred_density(160);
    let info = extract_package_info(&source, &lenient).unwrap();
    assert_eq!(info.icon.as_deref(), Some(MDPI_ICON));
    assert_eq!(info.icon_bytes, None);
}

#[test]
fn failures_identify_the_stage() {
    assert!(matches!(
        extract_from_buffers(&[], &resource_table(), &ExtractConfig::default()),
        Err(ExtractError::Manifest(FormatError::EmptyInput))
    ));

    let mut broken_table = resource_table();
    broken_table.truncate(broken_table.len() - 4);
    assert!(matches!(
        extract_from_buffers(
            &referencing_manifest(MIPMAP_ID),
            &broken_table,
            &ExtractConfig::default()
        ),
        Err(ExtractError::Resources(FormatError::SizeMismatch { .. }))
    ));

    let no_manifest: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    assert!(matches!(
        extract_package_info(&no_manifest, &ExtractConfig::default()),
        Err(ExtractError::MissingEntry(name)) if name == "AndroidManifest.xml"
    ));

    let mut no_table = BTreeMap::new();
    no_table.insert("AndroidManifest.xml".to_string(), referencing_manifest(MIPMAP_ID));
    assert!(matches!(
        extract_package_info(&no_table, &ExtractConfig::default()),
        Err(ExtractError::MissingEntry(name)) if name == "resources.arsc"
    ));
}

#[test]
fn extracts_from_a_zip_archive() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let entries = [
        ("AndroidManifest.xml", referencing_manifest(MIPMAP_ID)),
        ("resources.arsc", resource_table()),
        (XXHDPI_ICON, b"icon".to_vec()),
        (MDPI_ICON, b"small icon".to_vec()),
    ];
    for (name, data) in &entries {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    let bytes = writer.finish().unwrap().into_inner();

    let apk = ApkFile::from_bytes(bytes).unwrap();
    let info = extract_package_info(&apk, &ExtractConfig::default()).unwrap();
    assert_eq!(info.package_name.as_deref(), Some("com.example.app"));
    assert_eq!(info.version_name.as_deref(), Some("2.0.0"));
    assert_eq!(info.label.as_deref(), Some("My App"));
    assert_eq!(info.icon_bytes.as_deref(), Some(&b"icon"[..]));

    let json = serde_json::to_string(&info).unwrap();
    let back: PackageInfo = serde_json::from_str(&json).unwrap();
    assert_eq!(back, info);
}
