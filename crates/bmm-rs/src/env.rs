use std::env;
use std::sync::OnceLock;

static BMMRS_NATIVE_BATCH: OnceLock<Option<usize>> = OnceLock::new();
static BMMRS_FAER_THREADS: OnceLock<Option<usize>> = OnceLock::new();

fn parse_count(value: &str) -> Option<usize> {
    match value.trim().parse::<usize>() {
        Ok(0) | Err(_) => None,
        Ok(count) => Some(count),
    }
}

fn read_count(name: &str) -> Option<usize> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_count(&value),
        _ => None,
    }
}

/// Cap on matrices handed to one primitive call (`BMMRS_NATIVE_BATCH`).
///
/// Unset, empty, zero or unparsable values leave the primitive's own limit in charge.
pub fn native_batch_limit() -> Option<usize> {
    *BMMRS_NATIVE_BATCH.get_or_init(|| read_count("BMMRS_NATIVE_BATCH"))
}

/// Worker count requested for the faer primitive (`BMMRS_FAER_THREADS`).
pub fn faer_threads() -> Option<usize> {
    *BMMRS_FAER_THREADS.get_or_init(|| read_count("BMMRS_FAER_THREADS"))
}
