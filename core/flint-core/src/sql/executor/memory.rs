//! Per-execution memory accounting.
//!
//! Operators that buffer input (sort, join build sides, aggregation state)
//! hold a [`MemoryReservation`] and grow it before keeping more data. The
//! reservation is returned to the pool when the operator is dropped.

use crate::error::{FlintError, FlintResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Byte budget shared by all operators of one execution.
#[derive(Debug, Default)]
pub struct MemoryPool {
    limit: Option<usize>,
    used: AtomicUsize,
}

impl MemoryPool {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// Bytes held by one operator.
#[derive(Debug)]
pub struct MemoryReservation {
    pool: Arc<MemoryPool>,
    operator: &'static str,
    size: usize,
}

impl MemoryReservation {
    pub fn new(pool: &Arc<MemoryPool>, operator: &'static str) -> Self {
        Self {
            pool: Arc::clone(pool),
            operator,
            size: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Reserve `bytes` more, failing with `ResourcesExhausted` past the limit.
    pub fn try_grow(&mut self, bytes: usize) -> FlintResult<()> {
        let limit = self.pool.limit;
        let result = self
            .pool
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                let next = used.checked_add(bytes)?;
                match limit {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            });
        match result {
            Ok(_) => {
                self.size += bytes;
                Ok(())
            }
            Err(used) => Err(FlintError::ResourcesExhausted {
                operator: self.operator.to_string(),
                requested: bytes,
                used,
                limit: limit.unwrap_or(usize::MAX),
            }),
        }
    }

    /// Hold exactly `bytes`, growing or handing back the difference.
    pub fn resize(&mut self, bytes: usize) -> FlintResult<()> {
        if bytes >= self.size {
            return self.try_grow(bytes - self.size);
        }
        self.pool
            .used
            .fetch_sub(self.size - bytes, Ordering::SeqCst);
        self.size = bytes;
        Ok(())
    }

    /// Return everything held to the pool.
    pub fn free(&mut self) {
        if self.size > 0 {
            self.pool.used.fetch_sub(self.size, Ordering::SeqCst);
            self.size = 0;
        }
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grow_within_limit() {
        let pool = Arc::new(MemoryPool::new(Some(100)));
        let mut a = MemoryReservation::new(&pool, "sort");
        let mut b = MemoryReservation::new(&pool, "join");
        a.try_grow(60).unwrap();
        b.try_grow(40).unwrap();
        assert_eq!(pool.used(), 100);

        match b.try_grow(1) {
            Err(FlintError::ResourcesExhausted {
                operator,
                requested,
                used,
                limit,
            }) => {
                assert_eq!(operator, "join");
                assert_eq!((requested, used, limit), (1, 100, 100));
            }
            other => panic!("expected ResourcesExhausted, got {other:?}"),
        }
        assert_eq!(b.size(), 40);
    }

    #[test]
    fn test_drop_releases() {
        let pool = Arc::new(MemoryPool::new(Some(10)));
        {
            let mut r = MemoryReservation::new(&pool, "sort");
            r.try_grow(10).unwrap();
        }
        assert_eq!(pool.used(), 0);
        let mut r = MemoryReservation::new(&pool, "sort");
        assert!(r.try_grow(10).is_ok());
    }

    #[test]
    fn test_unbounded() {
        let pool = Arc::new(MemoryPool::unbounded());
        let mut r = MemoryReservation::new(&pool, "aggregate");
        r.try_grow(usize::MAX / 2).unwrap();
        assert_eq!(pool.limit(), None);
    }

    #[test]
    fn test_resize_both_ways() {
        let pool = Arc::new(MemoryPool::new(Some(100)));
        let mut r = MemoryReservation::new(&pool, "sort");
        r.try_grow(80).unwrap();
        r.resize(30).unwrap();
        assert_eq!((r.size(), pool.used()), (30, 30));
        r.resize(100).unwrap();
        assert!(r.resize(101).is_err());
        assert_eq!((r.size(), pool.used()), (100, 100));
    }
}
