// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tree configuration (spec §6, `brt_open`): a builder that gathers
//! everything a [`crate::Brt`] needs to open — file path, sub-database
//! name, node size, cache budget, comparator, and the capability set
//! described in spec §9 (log capability) — before handing them to
//! [`crate::brt::BrtFile::open`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use crate::node::FanoutPolicy;
use crate::{
    brt::Brt,
    dbt::{Comparator, LexicographicComparator},
    log_capability::{LogCapability, NoopLogCapability},
    node::DEFAULT_FANOUT,
    CompressionType,
};

/// Default node size: 1 MiB (spec §3.1: "configurable, typically 1
/// MiB; 4 KiB in tests").
pub const DEFAULT_NODESIZE: u32 = 1024 * 1024;

/// Default cachetable capacity, in resident pages.
pub const DEFAULT_CACHESIZE: usize = 256;

/// Whether a tree allows more than one value per key (spec §1,
/// "duplicate-key semantics beyond a 'duplicates allowed'/'duplicates
/// sorted' mode flag").
///
/// The source distinguishes "duplicates allowed" (insertion order) from
/// "duplicates sorted" (a secondary comparator orders the values too);
/// this crate only implements the latter, since it's the mode the node
/// engine's put/split code actually needs to resolve ordering and the
/// delete-on-pivot replication rule (spec §9's second open question).
/// Plain "duplicates allowed" without a value ordering is not exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Keys are unique; a second `insert` of an existing key replaces
    /// its value.
    #[default]
    Unique,
    /// Multiple values may share a key, ordered against each other by
    /// the same comparator applied to the value half of the pair.
    SortedDuplicates,
}

impl DuplicatePolicy {
    pub(crate) fn duplicates_sorted(self) -> bool {
        matches!(self, Self::SortedDuplicates)
    }
}

/// Builder for opening or creating a [`crate::Brt`] (spec §6:
/// `brt_open(path, sub_db?, create_flag, nodesize, cachetable, txn,
/// comparator, user_handle) -> brt`).
pub struct Config {
    pub(crate) path: PathBuf,
    pub(crate) sub_db: Option<String>,
    pub(crate) create: bool,
    pub(crate) nodesize: u32,
    pub(crate) cachesize: usize,
    pub(crate) compression: CompressionType,
    pub(crate) comparator: Arc<dyn Comparator>,
    pub(crate) duplicate_policy: DuplicatePolicy,
    pub(crate) fanout_policy: FanoutPolicy,
    pub(crate) fanout: usize,
    pub(crate) log_capability: Arc<dyn LogCapability>,
}

impl Config {
    /// Starts a builder for the tree file at `path`, with the default
    /// (unnamed) sub-database, 1 MiB nodes, no compression, and a
    /// plain byte-lexicographic comparator.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sub_db: None,
            create: true,
            nodesize: DEFAULT_NODESIZE,
            cachesize: DEFAULT_CACHESIZE,
            compression: CompressionType::None,
            comparator: Arc::new(LexicographicComparator),
            duplicate_policy: DuplicatePolicy::default(),
            fanout_policy: FanoutPolicy::GrowBeyondNodesize,
            fanout: DEFAULT_FANOUT,
            log_capability: Arc::new(NoopLogCapability::new()),
        }
    }

    /// Opens a named sub-database within the file instead of the
    /// default one (spec §8, Scenario E).
    #[must_use]
    pub fn sub_db(mut self, name: impl Into<String>) -> Self {
        self.sub_db = Some(name.into());
        self
    }

    /// Whether to create the file (or the named sub-database within an
    /// existing file) if it doesn't already exist. Defaults to `true`.
    #[must_use]
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Maximum serialized size of a node, in bytes.
    #[must_use]
    pub fn nodesize(mut self, nodesize: u32) -> Self {
        self.nodesize = nodesize;
        self
    }

    /// Number of pages the shared cachetable may hold resident before
    /// it starts evicting.
    #[must_use]
    pub fn cachesize(mut self, cachesize: usize) -> Self {
        self.cachesize = cachesize;
        self
    }

    /// Compression method applied to every node's serialized payload.
    #[must_use]
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Overrides the default byte-lexicographic key comparator (spec
    /// §8, Scenario F).
    #[must_use]
    pub fn comparator(mut self, comparator: impl Comparator + 'static) -> Self {
        self.comparator = Arc::new(comparator);
        self
    }

    /// Sets the duplicate-key mode (spec §1, "duplicates allowed"/"duplicates sorted").
    #[must_use]
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Chooses how a 2-child nonleaf that must split is handled (spec
    /// §9, fan-out bound open question).
    #[must_use]
    pub fn fanout_policy(mut self, policy: FanoutPolicy) -> Self {
        self.fanout_policy = policy;
        self
    }

    /// Maximum number of children a nonleaf may hold before it must
    /// split, regardless of its serialized size (spec §3.1, "Fan-out
    /// bound"; spec §4.2.2). Defaults to [`DEFAULT_FANOUT`].
    #[must_use]
    pub fn fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Supplies the capability the core calls into to describe
    /// mutations (spec §4.4). Defaults to [`NoopLogCapability`].
    #[must_use]
    pub fn log_capability(mut self, log_capability: impl LogCapability + 'static) -> Self {
        self.log_capability = Arc::new(log_capability);
        self
    }

    /// Opens (creating if needed and requested) the configured
    /// sub-database, returning a ready-to-use handle.
    pub fn open(self) -> crate::Result<Brt> {
        let sub_db = self.sub_db.clone();
        let create = self.create;
        let file = crate::brt::BrtFile::open(self)?;
        file.open_db(sub_db.as_deref(), create)
    }
}
