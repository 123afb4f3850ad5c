//! Reading definition resources from disk
//!
//! Accepts a JSON file, a directory of JSON files, or an NPM package tarball such as
//! `hl7.fhir.r4.core-4.0.1.tgz`. Examples shipped inside a package are ignored.

use flate2::read::GzDecoder;
use serde_json::Value;
use std::fs;
use std::io::Read;
use std::path::Path;
use tar::Archive;

use crate::error::{Error, Result};

const PACKAGE_PREFIX: &str = "package/";
const SKIPPED_FILES: &[&str] = &["package.json", ".index.json"];

/// Load every JSON resource found at `path`.
pub fn load_resources(path: &Path) -> Result<Vec<Value>> {
    if path.is_dir() {
        return load_directory(path);
    }

    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
        return from_tar_gz(fs::File::open(path)?);
    }

    Ok(vec![parse_json(&fs::read(path)?)?])
}

/// Load the resources of a package tarball.
pub fn from_tar_gz<R: Read>(reader: R) -> Result<Vec<Value>> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut resources = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();
        let Some(relative) = path.strip_prefix(PACKAGE_PREFIX) else {
            continue;
        };
        if !relative.ends_with(".json")
            || relative.contains('/')
            || SKIPPED_FILES.contains(&relative)
        {
            continue;
        }

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        resources.push(parse_json(&contents).map_err(|err| {
            Error::Package(format!("{path}: {err}"))
        })?);
    }

    tracing::debug!(resources = resources.len(), "Read package tarball");
    Ok(resources)
}

fn load_directory(dir: &Path) -> Result<Vec<Value>> {
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<_>>()?;
    paths.sort();

    let mut resources = Vec::new();
    for path in paths {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if path.extension() == Some("json".as_ref()) && !SKIPPED_FILES.contains(&name) {
            resources.push(parse_json(&fs::read(&path)?)?);
        }
    }
    Ok(resources)
}

fn parse_json(bytes: &[u8]) -> Result<Value> {
    Ok(serde_json::from_str(clean_bytes(bytes)?)?)
}

/// Strip a UTF-8 byte order mark.
fn clean_bytes(bytes: &[u8]) -> Result<&str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    std::str::from_utf8(bytes).map_err(|err| Error::Package(format!("invalid UTF-8: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn reads_package_resources_only() {
        let bytes = tarball(&[
            ("package/package.json", r#"{"name": "demo"}"#),
            ("package/.index.json", r#"{"files": []}"#),
            ("package/StructureDefinition-A.json", "\u{feff}{\"resourceType\": \"StructureDefinition\"}"),
            ("package/examples/Patient-1.json", r#"{"resourceType": "Patient"}"#),
            ("package/readme.md", "hello"),
        ]);
        let resources = from_tar_gz(bytes.as_slice()).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0]["resourceType"], "StructureDefinition");
    }

    #[test]
    fn strips_byte_order_mark() {
        assert_eq!(clean_bytes(b"\xEF\xBB\xBF{}").unwrap(), "{}");
        assert!(matches!(clean_bytes(b"\xFF\xFE"), Err(Error::Package(_))));
    }
}
