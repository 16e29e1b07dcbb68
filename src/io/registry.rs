//! Sharded fd -> registration table. Splitting it into
//! [`HSET_LOCK_NUM`] independent locks avoids serializing every
//! watch/unwatch on unrelated fds through a single mutex.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use super::ready::Ready;
use crate::error::Error;

/// Number of registration-table shards.
pub(crate) const HSET_LOCK_NUM: usize = 16;

pub(crate) type Callback = Arc<dyn Fn(Ready) + Send + Sync>;

pub(crate) struct Registration {
    pub(crate) poller: usize,
    pub(crate) callback: Callback,
}

pub(crate) struct Registry {
    shards: [Mutex<HashMap<RawFd, Registration>>; HSET_LOCK_NUM],
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry {
            shards: Default::default(),
        }
    }

    fn shard_for(fd: RawFd) -> usize {
        (fd as usize) % HSET_LOCK_NUM
    }

    pub(crate) fn insert(&self, fd: RawFd, poller: usize, callback: Callback) -> Result<(), Error> {
        let mut shard = self.shards[Self::shard_for(fd)].lock().unwrap();
        if shard.contains_key(&fd) {
            return Err(Error::AlreadyRegistered);
        }
        shard.insert(fd, Registration { poller, callback });
        Ok(())
    }

    pub(crate) fn remove(&self, fd: RawFd) -> Result<Registration, Error> {
        let mut shard = self.shards[Self::shard_for(fd)].lock().unwrap();
        shard.remove(&fd).ok_or(Error::NotFound)
    }

    pub(crate) fn callback(&self, fd: RawFd) -> Option<Callback> {
        let shard = self.shards[Self::shard_for(fd)].lock().unwrap();
        shard.get(&fd).map(|reg| reg.callback.clone())
    }

    pub(crate) fn poller_of(&self, fd: RawFd) -> Result<usize, Error> {
        let shard = self.shards[Self::shard_for(fd)].lock().unwrap();
        shard.get(&fd).map(|reg| reg.poller).ok_or(Error::NotFound)
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }
}
