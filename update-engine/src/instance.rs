//! Instance directories on the operator's workstation.
//!
//! ```text
//! <parent>/<instance>/
//!     config.json
//!     .lock
//!     builddir/<import path>/go.mod
//!     hosts/<host>/credential
//!     hosts/<host>/cert.pem
//!     hosts/<host>/key.pem
//! ```

use std::{
    fs,
    io::{self, Write as _},
    os::unix::fs::OpenOptionsExt as _,
    path::{Path, PathBuf},
};

use appliance_update_core::InstanceConfig;
use rand::{Rng as _, distributions::Alphanumeric};
use secrecy::SecretString;
use tracing::{debug, info};

use crate::Error;

const CONFIG_FILE: &str = "config.json";
const BUILD_DIR: &str = "builddir";
const HOSTS_DIR: &str = "hosts";
const CREDENTIAL_LEN: usize = 20;

/// A named instance directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    name: String,
    dir: PathBuf,
}

impl Instance {
    /// Refers to an existing instance, failing if it has no configuration.
    pub fn open(parent: &Path, name: &str) -> Result<Self, Error> {
        let instance = Self {
            name: name.to_owned(),
            dir: parent.join(name),
        };
        if !instance.config_path().is_file() {
            return Err(Error::io(
                format!("instance `{name}` not found in `{}`", parent.display()),
                io::Error::from(io::ErrorKind::NotFound),
            ));
        }
        Ok(instance)
    }

    /// Creates a new instance directory with a fresh configuration and a
    /// random credential for its host.
    pub fn create(parent: &Path, name: &str, config: &InstanceConfig) -> Result<Self, Error> {
        let instance = Self {
            name: name.to_owned(),
            dir: parent.join(name),
        };
        if instance.config_path().exists() {
            return Err(Error::io(
                format!("instance `{name}` already exists"),
                io::Error::from(io::ErrorKind::AlreadyExists),
            ));
        }
        fs::create_dir_all(instance.dir.join(BUILD_DIR)).map_err(|e| {
            Error::io(format!("failed creating `{}`", instance.dir.display()), e)
        })?;
        instance.save_config(config)?;

        let credential: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CREDENTIAL_LEN)
            .map(char::from)
            .collect();
        instance.write_secret(
            &instance.credential_path(config.update_hostname()),
            credential.as_bytes(),
        )?;
        info!(instance = name, dir = %instance.dir.display(), "created instance");
        Ok(instance)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(".lock")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.dir.join(BUILD_DIR)
    }

    pub fn host_dir(&self, host: &str) -> PathBuf {
        self.dir.join(HOSTS_DIR).join(host)
    }

    pub fn credential_path(&self, host: &str) -> PathBuf {
        self.host_dir(host).join("credential")
    }

    pub fn certificate_path(&self, host: &str) -> PathBuf {
        self.host_dir(host).join("cert.pem")
    }

    pub fn key_path(&self, host: &str) -> PathBuf {
        self.host_dir(host).join("key.pem")
    }

    pub fn load_config(&self) -> Result<InstanceConfig, Error> {
        let path = self.config_path();
        let contents = fs::read(&path)
            .map_err(|e| Error::io(format!("failed reading `{}`", path.display()), e))?;
        serde_json::from_slice(&contents).map_err(|source| Error::Config { path, source })
    }

    /// Writes the configuration next to the old one and renames it into place.
    pub fn save_config(&self, config: &InstanceConfig) -> Result<(), Error> {
        let path = self.config_path();
        let mut contents = serde_json::to_vec_pretty(config).map_err(|source| {
            Error::Config {
                path: path.clone(),
                source,
            }
        })?;
        contents.push(b'\n');
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &contents)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| Error::io(format!("failed writing `{}`", path.display()), e))?;
        debug!(path = %path.display(), "saved instance configuration");
        Ok(())
    }

    pub fn read_credential(&self, host: &str) -> Result<SecretString, Error> {
        let path = self.credential_path(host);
        match fs::read_to_string(&path) {
            Ok(s) if !s.trim().is_empty() => Ok(SecretString::new(s.trim().to_owned())),
            Ok(_) => Err(Error::MissingCredential {
                host: host.to_owned(),
                path,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::MissingCredential {
                host: host.to_owned(),
                path,
            }),
            Err(e) => Err(Error::io(format!("failed reading `{}`", path.display()), e)),
        }
    }

    /// Writes a file readable and writable by its owner only.
    pub fn write_secret(&self, path: &Path, contents: &[u8]) -> Result<(), Error> {
        write_private(path, contents)
            .map_err(|e| Error::io(format!("failed writing `{}`", path.display()), e))
    }

    /// Pins `import_path` in its own build directory and records it in the
    /// configuration. Returns the module build directory.
    pub fn add_package(&self, source: &PackageSource) -> Result<PathBuf, Error> {
        let mut config = self.load_config()?;
        let import_path = source.import_path();
        let module_dir = self.build_dir().join(import_path);
        fs::create_dir_all(&module_dir).map_err(|e| {
            Error::io(format!("failed creating `{}`", module_dir.display()), e)
        })?;
        let go_mod = module_dir.join("go.mod");
        fs::write(&go_mod, source.go_mod())
            .map_err(|e| Error::io(format!("failed writing `{}`", go_mod.display()), e))?;

        if config.add_package(import_path) {
            self.save_config(&config)?;
            info!(package = import_path, "added package");
        } else {
            info!(package = import_path, "package already present, updated pin");
        }
        Ok(module_dir)
    }
}

pub(crate) fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// How a package given to `add` is referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// Whatever version the builder resolves.
    Latest { import_path: String },
    /// `import/path@version`
    Versioned { import_path: String, version: String },
    /// A directory on disk with a `go.mod`; the module it declares is
    /// replaced by that directory.
    Local { import_path: String, dir: PathBuf },
}

impl PackageSource {
    /// Interprets an `add` argument. Existing directories take precedence over
    /// import paths.
    pub fn parse(arg: &str) -> Result<Self, Error> {
        let path = Path::new(arg);
        if path.is_dir() {
            let dir = fs::canonicalize(path)
                .map_err(|e| Error::io(format!("failed resolving `{arg}`"), e))?;
            let go_mod = dir.join("go.mod");
            let contents = fs::read_to_string(&go_mod).map_err(|e| {
                Error::io(format!("failed reading `{}`", go_mod.display()), e)
            })?;
            let import_path = module_path(&contents).ok_or_else(|| {
                Error::io(
                    format!("`{}` has no module directive", go_mod.display()),
                    io::Error::from(io::ErrorKind::InvalidData),
                )
            })?;
            return Ok(Self::Local { import_path, dir });
        }
        match arg.split_once('@') {
            Some((import_path, version)) if !import_path.is_empty() && !version.is_empty() => {
                Ok(Self::Versioned {
                    import_path: import_path.to_owned(),
                    version: version.to_owned(),
                })
            }
            Some(_) => Err(Error::io(
                format!("invalid package reference `{arg}`"),
                io::Error::from(io::ErrorKind::InvalidInput),
            )),
            None => Ok(Self::Latest {
                import_path: arg.to_owned(),
            }),
        }
    }

    pub fn import_path(&self) -> &str {
        match self {
            Self::Latest { import_path }
            | Self::Versioned { import_path, .. }
            | Self::Local { import_path, .. } => import_path,
        }
    }

    /// Contents of the module build directory's `go.mod`.
    pub fn go_mod(&self) -> String {
        let import_path = self.import_path();
        let mut out = format!("module appctl/build/{import_path}\n\ngo 1.22\n");
        match self {
            Self::Latest { .. } => {}
            Self::Versioned { version, .. } => {
                out.push_str(&format!("\nrequire {import_path} {version}\n"));
            }
            Self::Local { dir, .. } => {
                out.push_str(&format!(
                    "\nrequire {import_path} v0.0.0-00010101000000-000000000000\n\nreplace {import_path} => {}\n",
                    dir.display()
                ));
            }
        }
        out
    }
}

fn module_path(go_mod: &str) -> Option<String> {
    go_mod.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("module")?;
        let name = rest.trim().trim_matches('"');
        (!name.is_empty() && rest.starts_with(char::is_whitespace)).then(|| name.to_owned())
    })
}
