//! Classification of accelerator memory exhaustion.

use std::error::Error;

use crate::error::RenderError;

/// Maximum number of errors inspected along a cause chain.
pub const MAX_CHAIN_DEPTH: usize = 16;

/// Substrings that identify allocator failures in error messages.
///
/// Matched case-insensitively. Covers converter processes that only report
/// through text, such as a Python traceback on stderr.
pub const OUT_OF_MEMORY_SIGNALS: &[&str] = &[
    "out of memory",
    "cuda out of memory",
    "cudaerrormemoryallocation",
    "cublas_status_alloc_failed",
    "outofmemoryerror",
    "mps backend out of memory",
    "hip out of memory",
];

/// Returns true when any error in the cause chain reports exhausted
/// accelerator memory, either as a typed error or through its message.
pub fn is_resource_exhausted(error: &(dyn Error + 'static)) -> bool {
    let mut current: Option<&(dyn Error + 'static)> = Some(error);
    let mut depth = 0;

    while let Some(err) = current {
        if depth >= MAX_CHAIN_DEPTH {
            break;
        }
        if matches!(
            err.downcast_ref::<RenderError>(),
            Some(RenderError::AcceleratorOutOfMemory { .. })
        ) {
            return true;
        }
        if mentions_out_of_memory(&err.to_string()) {
            return true;
        }
        current = err.source();
        depth += 1;
    }

    false
}

fn mentions_out_of_memory(message: &str) -> bool {
    let lowered = message.to_lowercase();
    OUT_OF_MEMORY_SIGNALS
        .iter()
        .any(|signal| lowered.contains(signal))
}
