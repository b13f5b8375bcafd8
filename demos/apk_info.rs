use apkmeta::android::binary_xml::ManifestTree;
use apkmeta::{extract_package_info, ApkFile, ExtractConfig};
use std::env;
use std::error::Error;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("usage: apk_info <app.apk> [--xml]");
        return;
    }

    match print_info(&args[1], args.iter().any(|a| a == "--xml")) {
        Ok(_) => {}
        Err(e) => {
            println!("Aborted due to error: {}", e);
        }
    }
}

fn print_info(apk_path: &str, dump_xml: bool) -> Result<(), Box<dyn Error>> {
    let apk = ApkFile::from_file(apk_path)?;
    let config = ExtractConfig::default().with_preferred_density(480);
    let info = extract_package_info(&apk, &config)?;

    println!("package:    {}", info.package_name.as_deref().unwrap_or("-"));
    println!(
        "version:    {} ({})",
        info.version_name.as_deref().unwrap_or("-"),
        info.version_code.as_deref().unwrap_or("-")
    );
    println!(
        "sdk:        min {} target {}",
        info.min_sdk_version.as_deref().unwrap_or("-"),
        info.target_sdk_version.as_deref().unwrap_or("-")
    );
    println!("debuggable: {}", info.debuggable);
    println!("label:      {}", info.label.as_deref().unwrap_or("-"));
    for (locale, label) in &info.labels {
        let locale = if locale.is_empty() { "default" } else { locale };
        println!("  [{locale}] {label}");
    }
    println!("icon:       {}", info.icon.as_deref().unwrap_or("-"));
    for (density, path) in &info.icons {
        println!("  [{density}dpi] {path}");
    }
    if let Some(bytes) = &info.icon_bytes {
        println!("  {} bytes", bytes.len());
    }
    println!("permissions:");
    for permission in &info.permissions {
        println!("  {permission}");
    }

    if dump_xml {
        if let Some(entry) = apk.entry(&config.manifest_entry) {
            let tree = ManifestTree::from_bytes(&entry.data)?;
            println!("{}", tree.to_xml_string()?);
        }
    }
    Ok(())
}
