use std::{fs::File, io, path::PathBuf};

use fd_lock::{RwLock, RwLockWriteGuard};
use tracing::debug;

use crate::{Error, Instance};

/// Advisory lock on an instance directory.
///
/// Mutating verbs hold the write guard for their whole duration. Contention is
/// reported immediately as [`Error::Conflict`]; nobody waits for the lock.
#[derive(Debug)]
pub struct InstanceLock {
    instance: String,
    path: PathBuf,
    lock: RwLock<File>,
}

impl InstanceLock {
    pub fn open(instance: &Instance) -> Result<Self, Error> {
        let path = instance.lock_path();
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::io(format!("failed opening `{}`", path.display()), e))?;
        Ok(Self {
            instance: instance.name().to_owned(),
            path,
            lock: RwLock::new(file),
        })
    }

    /// Takes the lock without blocking. Released when the guard drops.
    pub fn try_acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>, Error> {
        match self.lock.try_write() {
            Ok(guard) => {
                debug!(path = %self.path.display(), "acquired instance lock");
                Ok(guard)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(Error::Conflict {
                instance: self.instance.clone(),
                path: self.path.clone(),
            }),
            Err(e) => Err(Error::io(
                format!("failed locking `{}`", self.path.display()),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use appliance_update_core::InstanceConfig;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn second_holder_conflicts() {
        let parent = tempfile::tempdir().unwrap();
        let instance =
            Instance::create(parent.path(), "hello", &InstanceConfig::new("hello", true))
                .unwrap();
        let mut first = InstanceLock::open(&instance).unwrap();
        let mut second = InstanceLock::open(&instance).unwrap();

        let guard = first.try_acquire().unwrap();
        let err = second.try_acquire().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        drop(guard);
        assert!(second.try_acquire().is_ok());
    }
}
