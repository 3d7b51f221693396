use std::thread;

pub const MIN_WORKERS: usize = 8;
pub const MAX_WORKERS: usize = 32;

/// Number of concurrent probe tasks for `targets` targets.
///
/// An explicit `configured` value wins. Otherwise the available parallelism
/// clamped to `MIN_WORKERS..=MAX_WORKERS`. Never more than there are targets.
pub fn worker_count(targets: usize, configured: Option<usize>) -> usize {
    let wanted = match configured {
        Some(n) if n > 0 => n,
        _ => thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .clamp(MIN_WORKERS, MAX_WORKERS),
    };
    wanted.min(targets).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_clamped() {
        let n = worker_count(1_000, None);
        assert!((MIN_WORKERS..=MAX_WORKERS).contains(&n));
    }

    #[test]
    fn never_exceeds_targets() {
        assert_eq!(worker_count(3, None), 3);
        assert_eq!(worker_count(3, Some(64)), 3);
        assert_eq!(worker_count(0, None), 1);
    }

    #[test]
    fn configured_value_wins() {
        assert_eq!(worker_count(100, Some(4)), 4);
        assert_eq!(worker_count(100, Some(0)), worker_count(100, None));
    }
}
