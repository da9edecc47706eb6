#![no_main]
use libfuzzer_sys::fuzz_target;
use modhost::{enable_order, Manifest, ManifestValidator};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Parsing and validation must reject bad manifests with errors, never panics
    if let Ok(manifest) = Manifest::from_toml_str(text) {
        let _ = ManifestValidator::new().validate(&manifest);
        let _ = manifest.detailed_name();
        let _ = enable_order(&[&manifest]);
    }
});
