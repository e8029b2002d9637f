use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use strato_common::{Result, StratoError};

pub const DEFAULT_PORT_START: u16 = 4000;
pub const DEFAULT_PORT_END: u16 = 9000;

/// Inclusive range of host ports the allocator may hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 || start > end {
            return Err(StratoError::InvalidPortRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: DEFAULT_PORT_START,
            end: DEFAULT_PORT_END,
        }
    }
}

/// Hands out random host ports from a fixed range, never the same one twice.
///
/// Clones share one pool, so allocations from concurrent tasks cannot collide.
/// The pool only lives as long as the process; call [`PortAllocator::reserve`]
/// with the ports of previously generated clusters to avoid reusing them.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    range: PortRange,
    check_host: bool,
    used: Arc<Mutex<HashSet<u16>>>,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            check_host: false,
            used: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Also check that a sampled port can be bound on the host before
    /// handing it out.
    pub fn with_host_check(mut self, check: bool) -> Self {
        self.check_host = check;
        self
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub fn capacity(&self) -> usize {
        self.range.len()
    }

    pub async fn in_use(&self) -> usize {
        self.used.lock().await.len()
    }

    pub async fn allocate(&self) -> Result<u16> {
        let mut used = self.used.lock().await;
        self.allocate_locked(&mut used).await
    }

    /// Allocate `n` distinct ports at once. Either all are handed out or none.
    pub async fn allocate_many(&self, n: usize) -> Result<Vec<u16>> {
        let mut used = self.used.lock().await;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match self.allocate_locked(&mut used).await {
                Ok(port) => out.push(port),
                Err(e) => {
                    for port in &out {
                        used.remove(port);
                    }
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    /// Mark ports as taken without returning them. Ports outside the range
    /// are ignored.
    pub async fn reserve(&self, ports: impl IntoIterator<Item = u16>) {
        let mut used = self.used.lock().await;
        for port in ports {
            if self.range.contains(port) {
                used.insert(port);
            }
        }
    }

    /// Return a port to the pool. Returns false if it was not taken.
    pub async fn release(&self, port: u16) -> bool {
        self.used.lock().await.remove(&port)
    }

    async fn allocate_locked(&self, used: &mut HashSet<u16>) -> Result<u16> {
        loop {
            if used.len() >= self.range.len() {
                return Err(StratoError::PortsExhausted {
                    start: self.range.start,
                    end: self.range.end,
                    in_use: used.len(),
                });
            }

            let port = rand::thread_rng().gen_range(self.range.start..=self.range.end);
            if !used.insert(port) {
                continue;
            }

            if self.check_host && !host_port_free(port).await {
                // stays in `used` so it is not sampled again
                tracing::debug!(port, "host port busy, sampling another");
                continue;
            }

            return Ok(port);
        }
    }
}

async fn host_port_free(port: u16) -> bool {
    match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(start: u16, end: u16) -> PortAllocator {
        PortAllocator::new(PortRange::new(start, end).unwrap())
    }

    #[test]
    fn test_invalid_range() {
        assert!(PortRange::new(10, 9).is_err());
        assert!(PortRange::new(0, 9).is_err());
        assert_eq!(PortRange::new(7, 7).unwrap().len(), 1);
        assert_eq!(PortRange::default().len(), 5001);
    }

    #[tokio::test]
    async fn test_allocations_stay_in_range_and_never_repeat() {
        let alloc = allocator(5000, 5049);
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let port = alloc.allocate().await.unwrap();
            assert!((5000..=5049).contains(&port), "{port} out of range");
            assert!(seen.insert(port), "{port} handed out twice");
        }
        assert_eq!(alloc.in_use().await, 50);
    }

    #[tokio::test]
    async fn test_exhausted_range_errors() {
        let alloc = allocator(6000, 6002);
        alloc.allocate_many(3).await.unwrap();
        let err = alloc.allocate().await.unwrap_err();
        assert!(matches!(err, StratoError::PortsExhausted { in_use: 3, .. }));
    }

    #[tokio::test]
    async fn test_allocate_many_is_all_or_nothing() {
        let alloc = allocator(6000, 6004);
        alloc.allocate_many(2).await.unwrap();
        assert!(alloc.allocate_many(4).await.is_err());
        assert_eq!(alloc.in_use().await, 2);
        assert_eq!(alloc.allocate_many(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let alloc = allocator(7000, 7002);
        alloc.reserve([7000, 7001, 80]).await;
        assert_eq!(alloc.in_use().await, 2);
        assert_eq!(alloc.allocate().await.unwrap(), 7002);

        assert!(alloc.release(7001).await);
        assert!(!alloc.release(7001).await);
        assert_eq!(alloc.allocate().await.unwrap(), 7001);
    }

    #[tokio::test]
    async fn test_clones_share_pool_across_tasks() {
        let alloc = allocator(8000, 8199);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let a = alloc.clone();
            handles.push(tokio::spawn(async move { a.allocate_many(10).await }));
        }
        let mut seen = HashSet::new();
        for h in handles {
            for port in h.await.unwrap().unwrap() {
                assert!(seen.insert(port), "{port} handed out twice");
            }
        }
        assert_eq!(seen.len(), 200);
        assert!(alloc.allocate().await.is_err());
    }

    #[tokio::test]
    async fn test_host_check_skips_bound_port() {
        let listener = std::net::TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let busy = listener.local_addr().unwrap().port();

        let alloc = PortAllocator::new(PortRange::new(busy, busy).unwrap()).with_host_check(true);
        assert!(matches!(
            alloc.allocate().await,
            Err(StratoError::PortsExhausted { .. })
        ));
        drop(listener);
    }
}
