//! Fixed-size pool of expensive, reusable resources.
//!
//! Every resource is created up front and recycled until shutdown; the pool
//! never creates more than its configured size. A counting semaphore tracks
//! how many resources are free, so callers block (without spinning) until
//! one is returned.
//!
//! ```text
//!   acquire:  semaphore.acquire() ──► lock free list ──► pop_front
//!   release:  lock free list ──► push_back ──► semaphore.release()
//! ```
//!
//! Prefer [`ResourcePool::scoped`]: its guard puts the resource back on every
//! exit path, including early returns, `?` and panics.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use parking_lot::Mutex;

use crate::semaphore::Semaphore;

/// Connection parameters handed verbatim to [`Manage::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Name of the resource to connect to, such as a database.
    pub database: String,
    /// Number of resources created up front.
    pub size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            size: 12,
        }
    }
}

/// Creates and destroys the resources held by a [`ResourcePool`].
pub trait Manage: Send + Sync {
    type Resource: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    fn create(&self, config: &PoolConfig) -> Result<Self::Resource, Self::Error>;

    /// Tears a resource down for good. Defaults to dropping it.
    fn destroy(&self, resource: Self::Resource) {
        drop(resource);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to create pooled resource {index} of {size}: {source}")]
    Create {
        index: usize,
        size: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("resource pool is shut down")]
    Closed,
}

struct FreeList<R> {
    resources: VecDeque<R>,
    closed: bool,
}

/// A semaphore-gated pool of pre-created resources.
pub struct ResourcePool<M: Manage> {
    manager: M,
    free: Mutex<FreeList<M::Resource>>,
    /// One permit per resource in `free`.
    permits: Semaphore,
    size: usize,
}

impl<M: Manage> ResourcePool<M> {
    /// Creates `config.size` resources with `manager`.
    ///
    /// If any creation fails, the resources built so far are destroyed and
    /// the error is returned.
    ///
    /// # Panics
    ///
    /// Panics if `config.size` is zero.
    pub fn new(manager: M, config: &PoolConfig) -> Result<Self, PoolError> {
        assert!(config.size > 0, "pool size must be greater than zero");

        let mut resources = VecDeque::with_capacity(config.size);
        for index in 0..config.size {
            match manager.create(config) {
                Ok(resource) => resources.push_back(resource),
                Err(e) => {
                    log::warn!(
                        "creating resource {} of {} for {}:{} failed: {}",
                        index,
                        config.size,
                        config.host,
                        config.port,
                        e
                    );
                    for resource in resources.drain(..) {
                        manager.destroy(resource);
                    }
                    return Err(PoolError::Create {
                        index,
                        size: config.size,
                        source: Box::new(e),
                    });
                }
            }
        }
        log::debug!(
            "resource pool ready with {} resources for {}:{}",
            config.size,
            config.host,
            config.port
        );

        Ok(Self {
            manager,
            free: Mutex::new(FreeList {
                resources,
                closed: false,
            }),
            permits: Semaphore::new(config.size),
            size: config.size,
        })
    }

    /// Takes a resource, blocking until one is free.
    ///
    /// The caller must hand it back with [`release`](Self::release).
    pub fn acquire(&self) -> Result<M::Resource, PoolError> {
        self.permits.acquire().map_err(|_| PoolError::Closed)?;
        self.take()
    }

    /// Takes a resource only if one is free right now.
    pub fn try_acquire(&self) -> Option<M::Resource> {
        match self.permits.try_acquire() {
            Ok(true) => self.take().ok(),
            _ => None,
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    ///
    /// Returns `Ok(None)` if no resource was returned in time.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Option<M::Resource>, PoolError> {
        match self.permits.acquire_timeout(timeout) {
            Ok(true) => self.take().map(Some),
            Ok(false) => Ok(None),
            Err(_) => Err(PoolError::Closed),
        }
    }

    fn take(&self) -> Result<M::Resource, PoolError> {
        let mut free = self.free.lock();
        if free.closed {
            return Err(PoolError::Closed);
        }
        free.resources.pop_front().ok_or(PoolError::Closed)
    }

    /// Returns a resource taken with [`acquire`](Self::acquire) and wakes one
    /// blocked acquirer. After shutdown the resource is destroyed instead.
    pub fn release(&self, resource: M::Resource) {
        let mut free = self.free.lock();
        if free.closed {
            drop(free);
            log::debug!("destroying resource returned after pool shutdown");
            self.manager.destroy(resource);
            return;
        }
        free.resources.push_back(resource);
        drop(free);
        self.permits.release();
    }

    /// Takes a resource that goes back to the pool when the guard drops.
    ///
    /// ```rust, ignore
    /// fn load_user(pool: &ResourcePool<Db>, id: u64) -> Result<User, Error> {
    ///     let mut conn = pool.scoped()?;
    ///     let row = conn.query_row(id)?; // released even if this fails
    ///     Ok(User::from(row))
    /// }
    /// ```
    pub fn scoped(&self) -> Result<PooledResource<'_, M>, PoolError> {
        let resource = self.acquire()?;
        Ok(PooledResource {
            pool: self,
            resource: Some(resource),
        })
    }

    /// Fails all blocked and future acquisitions and destroys every free
    /// resource. Resources still checked out are destroyed when released.
    /// Idempotent.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut free = self.free.lock();
            if free.closed {
                return;
            }
            free.closed = true;
            free.resources.drain(..).collect()
        };
        self.permits.close();

        log::debug!(
            "resource pool shutting down, destroying {} of {} resources",
            drained.len(),
            self.size
        );
        for resource in drained {
            self.manager.destroy(resource);
        }
    }

    /// Resources currently free.
    pub fn available_count(&self) -> usize {
        self.free.lock().resources.len()
    }

    /// Total number of resources managed by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.free.lock().closed
    }
}

impl<M: Manage> Drop for ResourcePool<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<M: Manage> fmt::Debug for ResourcePool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("size", &self.size)
            .field("available", &self.available_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A resource on loan from a [`ResourcePool`], released exactly once when
/// dropped.
pub struct PooledResource<'a, M: Manage> {
    pool: &'a ResourcePool<M>,
    resource: Option<M::Resource>,
}

impl<M: Manage> Deref for PooledResource<'_, M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        match self.resource.as_ref() {
            Some(resource) => resource,
            None => unreachable!("pooled resource used after release"),
        }
    }
}

impl<M: Manage> DerefMut for PooledResource<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.resource.as_mut() {
            Some(resource) => resource,
            None => unreachable!("pooled resource used after release"),
        }
    }
}

impl<M: Manage> Drop for PooledResource<'_, M> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(resource);
        }
    }
}
