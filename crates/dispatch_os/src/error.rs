#![forbid(unsafe_code)]

use dispatch_kernel_contracts::roster::TeamTag;
use dispatch_kernel_contracts::ContractViolation;
use dispatch_storage::roster::StorageError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown team tag {0}")]
    UnknownTag(TeamTag),
    #[error("team tag {0} configured twice")]
    DuplicateTag(TeamTag),
    #[error("dispatch view is closed")]
    ViewClosed,
    #[error("not authorized")]
    Unauthorized,
    #[error("invalid input: {0}")]
    Contract(ContractViolation),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ContractViolation> for DispatchError {
    fn from(v: ContractViolation) -> Self {
        DispatchError::Contract(v)
    }
}
