//! Test utilities for `PinConnector` implementations.
//!
//! # Usage
//!
//! In your connector crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! pinset_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test file:
//!
//! ```ignore
//! use pinset_core::testutil::ConnectorTests;
//!
//! #[tokio::test]
//! async fn test_my_connector() {
//!     let connector = MyConnector::new(...);
//!     ConnectorTests::new(&connector).run_all().await.unwrap();
//! }
//! ```

use crate::{Cid, ConnectorResult, DaemonPinStatus, PinConnector, PinDepth, PinTypeFilter};
use rand::Rng;

/// Conformance suite for `PinConnector` implementations.
///
/// Every test works on freshly generated CIDs, so the suite can run
/// against a daemon that already holds other pins.
pub struct ConnectorTests<'a, C> {
    connector: &'a C,
}

/// Generates a random raw CID.
pub fn random_cid() -> Cid {
    let seed: [u8; 32] = rand::rng().random();
    Cid::new_raw(seed)
}

impl<'a, C: PinConnector> ConnectorTests<'a, C> {
    pub fn new(connector: &'a C) -> Self {
        Self { connector }
    }

    /// Run all tests.
    pub async fn run_all(&self) -> ConnectorResult<()> {
        self.test_pin_recursive().await?;
        self.test_pin_direct().await?;
        self.test_pin_twice().await?;
        self.test_unpin().await?;
        self.test_unpin_not_pinned().await?;
        self.test_pin_ls().await?;
        Ok(())
    }

    pub async fn test_pin_recursive(&self) -> ConnectorResult<()> {
        let cid = random_cid();
        assert_eq!(
            self.connector.pin_ls_cid(&cid).await?,
            DaemonPinStatus::Unpinned,
            "a fresh cid should not be pinned"
        );
        self.connector.pin(&cid, PinDepth::Unbounded).await?;
        let status = self.connector.pin_ls_cid(&cid).await?;
        assert!(
            status.is_pinned(PinDepth::Unbounded),
            "recursive pin should be reported as recursive, got {status}"
        );
        self.connector.unpin(&cid).await
    }

    pub async fn test_pin_direct(&self) -> ConnectorResult<()> {
        let cid = random_cid();
        self.connector.pin(&cid, PinDepth::DIRECT).await?;
        let status = self.connector.pin_ls_cid(&cid).await?;
        assert_eq!(status, DaemonPinStatus::Direct, "depth 0 should pin directly");
        self.connector.unpin(&cid).await
    }

    pub async fn test_pin_twice(&self) -> ConnectorResult<()> {
        let cid = random_cid();
        self.connector.pin(&cid, PinDepth::Unbounded).await?;
        self.connector.pin(&cid, PinDepth::Unbounded).await?;
        assert!(self.connector.pin_ls_cid(&cid).await?.is_pinned(PinDepth::Unbounded));
        self.connector.unpin(&cid).await
    }

    pub async fn test_unpin(&self) -> ConnectorResult<()> {
        let cid = random_cid();
        self.connector.pin(&cid, PinDepth::Unbounded).await?;
        self.connector.unpin(&cid).await?;
        assert_eq!(
            self.connector.pin_ls_cid(&cid).await?,
            DaemonPinStatus::Unpinned,
            "cid should be unpinned after unpin"
        );
        Ok(())
    }

    pub async fn test_unpin_not_pinned(&self) -> ConnectorResult<()> {
        let cid = random_cid();
        self.connector.unpin(&cid).await?;
        Ok(())
    }

    pub async fn test_pin_ls(&self) -> ConnectorResult<()> {
        let recursive = random_cid();
        let direct = random_cid();
        self.connector.pin(&recursive, PinDepth::Unbounded).await?;
        self.connector.pin(&direct, PinDepth::DIRECT).await?;

        let all = self.connector.pin_ls(PinTypeFilter::All).await?;
        assert_eq!(all.get(&recursive), Some(&DaemonPinStatus::Recursive));
        assert_eq!(all.get(&direct), Some(&DaemonPinStatus::Direct));

        let only_recursive = self.connector.pin_ls(PinTypeFilter::Recursive).await?;
        assert!(only_recursive.contains_key(&recursive));
        assert!(
            !only_recursive.contains_key(&direct),
            "recursive filter should exclude direct pins"
        );

        self.connector.unpin(&recursive).await?;
        self.connector.unpin(&direct).await
    }
}
