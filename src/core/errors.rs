/*!
 * Error Types
 * Centralized pool error handling with thiserror and miette
 */

use miette::Diagnostic;
use thiserror::Error;

/// Pool operation result
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by the pool family and the concurrent bucket
///
/// Configuration errors are raised at construction. Protocol violations
/// (`DuplicateReturn`, `ForeignPointer`, `IndexOutOfRange`) mean the caller
/// broke the rent/return contract; they are reported, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum PoolError {
    #[error("Invalid argument `{name}` = {value}: {reason}")]
    #[diagnostic(
        code(pool::invalid_argument),
        help("Check the pool sizing parameters passed at construction.")
    )]
    InvalidArgument {
        name: &'static str,
        value: i64,
        reason: &'static str,
    },

    #[error("Capacity exceeded: requested {requested}, capacity {capacity}")]
    #[diagnostic(
        code(pool::capacity_exceeded),
        help("The slab size is a hard per-pool maximum. Create the pool with a larger slab size.")
    )]
    CapacityExceeded { requested: usize, capacity: usize },

    #[error("Duplicate return of slot {index}")]
    #[diagnostic(
        code(pool::duplicate_return),
        help("The slot was already returned. Every rent must be matched by exactly one return.")
    )]
    DuplicateReturn { index: usize },

    #[error("Pointer 0x{address:x} does not belong to this pool")]
    #[diagnostic(
        code(pool::foreign_pointer),
        help("The pointer lies outside this pool's slabs or off a slot boundary. Return it to the pool that rented it.")
    )]
    ForeignPointer { address: usize },

    #[error("Index {index} out of range for capacity {capacity}")]
    #[diagnostic(
        code(pool::index_out_of_range),
        help("Only indices handed out by this bucket may be returned to it.")
    )]
    IndexOutOfRange { index: usize, capacity: usize },
}

impl PoolError {
    /// True for errors caused by breaking the rent/return protocol
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            PoolError::DuplicateReturn { .. }
                | PoolError::ForeignPointer { .. }
                | PoolError::IndexOutOfRange { .. }
        )
    }

    pub(crate) fn invalid(name: &'static str, value: i64, reason: &'static str) -> Self {
        PoolError::InvalidArgument {
            name,
            value,
            reason,
        }
    }
}
