//! Software bill of materials over everything an image is built from.

use std::{
    fs,
    io::{self, Read as _},
    path::Path,
};

use appliance_update_core::InstanceConfig;
use serde::Serialize;
use sha2::{Digest as _, Sha256};
use walkdir::WalkDir;

use crate::Error;

/// Files in a module build directory that pin its dependencies.
const MODULE_INPUTS: &[&str] = &["go.mod", "go.sum"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FileHash {
    pub path: String,
    pub sha256: String,
}

/// Field order is the serialized order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Sbom {
    pub config_hash: String,
    pub module_inputs: Vec<FileHash>,
    pub extra_files: Vec<FileHash>,
}

/// An SBOM with its rendered form and the hash of that form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSbom {
    pub sbom: Sbom,
    pub json: Vec<u8>,
    pub hash: String,
}

impl Sbom {
    /// Collects the inputs of an instance.
    ///
    /// `instance_dir` resolves relative `ExtraFilePaths`; module inputs are the
    /// `go.mod`/`go.sum` files below `build_dir`, named relative to it.
    pub fn generate(
        config: &InstanceConfig,
        instance_dir: &Path,
        build_dir: &Path,
    ) -> Result<Self, Error> {
        let canonical = config.canonical_json().map_err(|source| Error::Config {
            path: instance_dir.join("config.json"),
            source,
        })?;
        let config_hash = hex::encode(Sha256::digest(&canonical));

        let mut module_inputs = Vec::new();
        if build_dir.is_dir() {
            for entry in WalkDir::new(build_dir).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    Error::io(
                        format!("failed walking `{}`", build_dir.display()),
                        io::Error::from(e),
                    )
                })?;
                let is_input = entry.file_type().is_file()
                    && MODULE_INPUTS
                        .iter()
                        .any(|name| entry.file_name() == *name);
                if !is_input {
                    continue;
                }
                let relative = entry.path().strip_prefix(build_dir).unwrap_or(entry.path());
                module_inputs.push(FileHash {
                    path: slash_path(relative),
                    sha256: hash_file(entry.path())?,
                });
            }
        }

        let mut extra_files = Vec::new();
        for package in config.package_config.values() {
            for (destination, source) in &package.extra_file_paths {
                let source = instance_dir.join(source);
                extra_files.push(FileHash {
                    path: destination.clone(),
                    sha256: hash_file(&source)?,
                });
            }
            for (destination, contents) in &package.extra_file_contents {
                extra_files.push(FileHash {
                    path: destination.clone(),
                    sha256: hex::encode(Sha256::digest(contents.as_bytes())),
                });
            }
        }

        module_inputs.sort();
        extra_files.sort();
        Ok(Self {
            config_hash,
            module_inputs,
            extra_files,
        })
    }

    /// Two space indented JSON with a trailing newline, plus its SHA-256.
    pub fn render(self) -> RenderedSbom {
        let mut json = Vec::new();
        // A struct of strings always serializes.
        let _ = serde_json::to_writer_pretty(&mut json, &self);
        json.push(b'\n');
        let hash = hex::encode(Sha256::digest(&json));
        RenderedSbom {
            sbom: self,
            json,
            hash,
        }
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn hash_file(path: &Path) -> Result<String, Error> {
    let mut file = fs::File::open(path)
        .map_err(|e| Error::io(format!("failed opening `{}`", path.display()), e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::io(format!("failed reading `{}`", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use appliance_update_core::PackageConfig;

    use super::*;

    fn fixture(dir: &Path) -> InstanceConfig {
        let build = dir.join("builddir");
        for module in ["github.com/gokrazy/hello", "example.com/app"] {
            let module_dir = build.join(module);
            fs::create_dir_all(&module_dir).unwrap();
            fs::write(module_dir.join("go.mod"), format!("module {module}\n")).unwrap();
            fs::write(module_dir.join("main.go"), "package main\n").unwrap();
        }
        fs::write(build.join("example.com/app/go.sum"), "h1:abc\n").unwrap();
        fs::write(dir.join("app.json"), "{}\n").unwrap();

        let mut config = InstanceConfig::new("hello", false);
        let mut pkg = PackageConfig::default();
        pkg.extra_file_paths
            .insert("/etc/app.json".into(), "app.json".into());
        pkg.extra_file_contents
            .insert("/etc/motd".into(), "hello\n".into());
        config.package_config.insert("example.com/app".into(), pkg);
        config
    }

    #[test]
    fn inputs_are_sorted_and_relative() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        let sbom = Sbom::generate(&config, dir.path(), &dir.path().join("builddir")).unwrap();
        let modules: Vec<_> = sbom.module_inputs.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            modules,
            [
                "example.com/app/go.mod",
                "example.com/app/go.sum",
                "github.com/gokrazy/hello/go.mod"
            ]
        );
        let extras: Vec<_> = sbom.extra_files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(extras, ["/etc/app.json", "/etc/motd"]);
    }

    #[test]
    fn rendering_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        let build = dir.path().join("builddir");
        let first = Sbom::generate(&config, dir.path(), &build).unwrap().render();
        let second = Sbom::generate(&config, dir.path(), &build).unwrap().render();
        assert_eq!(first.json, second.json);
        assert_eq!(first.hash, second.hash);

        let text = String::from_utf8(first.json).unwrap();
        assert!(text.starts_with("{\n  \"ConfigHash\": "));
        assert!(text.ends_with("}\n"));
        let config_hash = text.find("ConfigHash").unwrap();
        let modules = text.find("ModuleInputs").unwrap();
        let extras = text.find("ExtraFiles").unwrap();
        assert!(config_hash < modules && modules < extras);
    }

    #[test]
    fn changing_an_input_changes_the_hash() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        let build = dir.path().join("builddir");
        let before = Sbom::generate(&config, dir.path(), &build).unwrap().render();
        fs::write(build.join("example.com/app/go.sum"), "h1:def\n").unwrap();
        let after = Sbom::generate(&config, dir.path(), &build).unwrap().render();
        assert_ne!(before.hash, after.hash);
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        fs::remove_file(dir.path().join("app.json")).unwrap();
        let err = Sbom::generate(&config, dir.path(), &dir.path().join("builddir"));
        assert!(err.is_err());
    }
}
