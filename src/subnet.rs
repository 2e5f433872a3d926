//! SubnetAllocator / PortAllocator (§4.6). The subnet side is file-backed
//! and persisted atomically; port offsets are pure functions of node index
//! and need no shared state at all.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const RANGE_START: u8 = 1;
const RANGE_END: u8 = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    /// Third octet of the 127.x.0.0/24 block.
    pub octet: u8,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubnetTable {
    assignments: BTreeMap<String, Subnet>,
}

pub struct SubnetAllocator {
    path: PathBuf,
    state: Mutex<SubnetTable>,
}

impl SubnetAllocator {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let path = data_dir.as_ref().join("subnets.json");
        let path_clone = path.clone();
        let table = tokio::task::spawn_blocking(move || -> Result<SubnetTable> {
            match std::fs::read(&path_clone) {
                Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SubnetTable::default()),
                Err(e) => Err(Error::from(e)),
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("subnet table load panicked: {e}")))??;

        Ok(Self { path, state: Mutex::new(table) })
    }

    /// Idempotent: returns the existing assignment if `devnet_name` already
    /// has one (§4.4.1's Provisioning idempotency requirement).
    pub fn allocate(&self, devnet_name: &str) -> Result<Subnet> {
        let mut table = self.state.lock();
        if let Some(existing) = table.assignments.get(devnet_name) {
            return Ok(*existing);
        }
        let taken: std::collections::HashSet<u8> = table.assignments.values().map(|s| s.octet).collect();
        let octet = (RANGE_START..=RANGE_END)
            .find(|o| !taken.contains(o))
            .ok_or_else(|| Error::precondition("no free /24 subnet remains in 127.0.0.0/8"))?;
        let subnet = Subnet { octet };
        table.assignments.insert(devnet_name.to_string(), subnet);
        self.persist(&table)?;
        Ok(subnet)
    }

    pub fn release(&self, devnet_name: &str) -> Result<()> {
        let mut table = self.state.lock();
        if table.assignments.remove(devnet_name).is_some() {
            self.persist(&table)?;
        }
        Ok(())
    }

    pub fn lookup(&self, devnet_name: &str) -> Option<Subnet> {
        self.state.lock().assignments.get(devnet_name).copied()
    }

    fn persist(&self, table: &SubnetTable) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(table)?;
        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp = std::fs::OpenOptions::new().write(true).create(true).truncate(true).open(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        drop(tmp);
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

pub const BASE_PORT: u16 = 20000;
pub const PORT_BLOCK_SIZE: u16 = 100;

#[derive(Debug, Clone, Copy)]
pub struct PortOffset {
    pub p2p: u16,
    pub rpc: u16,
    pub rest: u16,
    pub grpc: u16,
}

impl PortOffset {
    /// Deterministic from node index alone (§3.5); no allocator needed.
    pub fn for_index(index: u32) -> Self {
        let base = BASE_PORT + (index as u16).saturating_mul(PORT_BLOCK_SIZE);
        Self { p2p: base, rpc: base + 1, rest: base + 2, grpc: base + 3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocation_is_idempotent_and_lowest_free() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = SubnetAllocator::open(dir.path()).await.unwrap();
        let a = allocator.allocate("dev-a").unwrap();
        let again = allocator.allocate("dev-a").unwrap();
        assert_eq!(a, again);
        let b = allocator.allocate("dev-b").unwrap();
        assert_eq!(b.octet, a.octet + 1);
    }

    #[tokio::test]
    async fn release_frees_the_octet_for_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = SubnetAllocator::open(dir.path()).await.unwrap();
        let a = allocator.allocate("dev-a").unwrap();
        allocator.release("dev-a").unwrap();
        let b = allocator.allocate("dev-b").unwrap();
        assert_eq!(a.octet, b.octet);
    }

    #[tokio::test]
    async fn reload_reproduces_the_same_mapping() {
        let dir = tempfile::tempdir().unwrap();
        {
            let allocator = SubnetAllocator::open(dir.path()).await.unwrap();
            allocator.allocate("dev-a").unwrap();
            allocator.allocate("dev-b").unwrap();
        }
        let reopened = SubnetAllocator::open(dir.path()).await.unwrap();
        assert_eq!(reopened.lookup("dev-a").unwrap().octet, 1);
        assert_eq!(reopened.lookup("dev-b").unwrap().octet, 2);
    }

    #[test]
    fn port_offsets_are_deterministic() {
        let p0 = PortOffset::for_index(0);
        let p1 = PortOffset::for_index(1);
        assert_eq!(p1.p2p - p0.p2p, PORT_BLOCK_SIZE);
    }
}
