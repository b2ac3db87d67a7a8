//! Transaction state

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{Attributes, DocumentId, Patch};

/// Transaction identifier. Issued from 1 upward per engine instance.
pub type TxnId = u64;

/// Identifies an execution context (a connection, a request, a thread).
/// At most one transaction is open per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Lifecycle: `Open → Committing → Committed | RolledBack`, or
/// `Open → RolledBack`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    Open,
    /// WAL batch write in progress; no longer cancellable
    Committing,
    Committed,
    RolledBack,
}

impl TxnStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnStatus::Committed | TxnStatus::RolledBack)
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnStatus::Open => "open",
            TxnStatus::Committing => "committing",
            TxnStatus::Committed => "committed",
            TxnStatus::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// A buffered mutation, resolved against current state at commit
#[derive(Debug, Clone, PartialEq)]
pub enum StagedOp {
    /// Fails with `DuplicateIdentifier` if the id exists at commit
    Create { id: DocumentId, attributes: Attributes },
    /// Shallow patch; fails with `NotFound` if the id is absent at commit
    Update { id: DocumentId, patch: Patch },
    /// Whole-document replacement of an existing document
    Replace { id: DocumentId, attributes: Attributes },
    /// Fails with `NotFound` if the id is absent at commit
    Delete { id: DocumentId },
}

impl StagedOp {
    pub fn target(&self) -> &DocumentId {
        match self {
            StagedOp::Create { id, .. }
            | StagedOp::Update { id, .. }
            | StagedOp::Replace { id, .. }
            | StagedOp::Delete { id } => id,
        }
    }
}

/// An open transaction
#[derive(Debug, Clone)]
pub struct Transaction {
    pub(crate) id: TxnId,
    pub(crate) context: ContextId,
    pub(crate) ops: Vec<StagedOp>,
    pub(crate) status: TxnStatus,
}

impl Transaction {
    pub(crate) fn new(id: TxnId, context: ContextId) -> Self {
        Self {
            id,
            context,
            ops: Vec::new(),
            status: TxnStatus::Open,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn ops(&self) -> &[StagedOp] {
        &self.ops
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }
}
