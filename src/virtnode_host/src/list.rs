use std::cmp::min;

use log::warn;

use crate::error::VirtnodeError;
use crate::{log_then_return, Result};

/// The generic count-then-fetch enumeration protocol.
///
/// The native API has no single "get all" call returning owned,
/// self-describing results; enumeration is a count call followed by a fetch
/// into a caller-sized buffer. Between the two calls the true count may
/// change, so the fetch reports how many entries it actually wrote and only
/// that many are consumed, never the original count.
///
/// `translate` builds the error for a failing step from the step's
/// operation name; it is expected to capture the connection so the driver's
/// last-error record is fetched at the moment of failure.
pub(crate) fn fetch_names<C, F, E>(
    count_op: &'static str,
    fetch_op: &'static str,
    max_capacity: usize,
    count: C,
    fetch: F,
    translate: E,
) -> Result<Vec<String>>
where
    C: FnOnce() -> i32,
    F: FnOnce(&mut [Option<String>]) -> i32,
    E: Fn(&'static str) -> VirtnodeError,
{
    let num = count();
    if num < 0 {
        log_then_return!(translate(count_op));
    }
    if num == 0 {
        // a zero-capacity fetch is not a meaningful driver call
        return Ok(Vec::new());
    }

    let mut capacity = num as usize;
    if capacity > max_capacity {
        warn!(
            "{} reported {} entries, clamping fetch buffer to {}",
            count_op, capacity, max_capacity
        );
        capacity = max_capacity;
    }

    let mut names: Vec<Option<String>> = vec![None; capacity];
    let written = fetch(&mut names);
    if written < 0 {
        log_then_return!(translate(fetch_op));
    }

    let written = min(written as usize, names.len());
    Ok(names.drain(..written).flatten().collect())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::fetch_names;
    use crate::driver::DriverError;
    use crate::error::VirtnodeError;

    fn translate(op: &'static str) -> VirtnodeError {
        VirtnodeError::Retrieve(op, DriverError::new(1, "enumeration failed"))
    }

    fn fill(names: &mut [Option<String>], n: usize) -> i32 {
        for (i, slot) in names.iter_mut().take(n).enumerate() {
            *slot = Some(format!("dev-{i}"));
        }
        n as i32
    }

    #[test]
    fn zero_count_skips_fetch() {
        let result = fetch_names(
            "count",
            "fetch",
            1024,
            || 0,
            |_| panic!("fetch must not run when the count is zero"),
            translate,
        )
        .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn negative_count_is_a_retrieve_error_naming_the_count_op() {
        let err = fetch_names(
            "count",
            "fetch",
            1024,
            || -1,
            |_| panic!("fetch must not run when the count failed"),
            translate,
        )
        .unwrap_err();
        assert!(matches!(err, VirtnodeError::Retrieve("count", _)));
    }

    #[test]
    fn negative_fetch_is_a_retrieve_error_naming_the_fetch_op() {
        let err = fetch_names("count", "fetch", 1024, || 4, |_| -1, translate).unwrap_err();
        assert!(matches!(err, VirtnodeError::Retrieve("fetch", _)));
    }

    #[test]
    fn consumes_only_what_the_fetch_wrote() {
        // two devices vanished between the count and the fetch
        let result =
            fetch_names("count", "fetch", 1024, || 5, |names| fill(names, 3), translate).unwrap();
        assert_eq!(result, vec!["dev-0", "dev-1", "dev-2"]);
    }

    #[test]
    fn oversized_count_is_clamped() {
        let mut seen_capacity = 0;
        let result = fetch_names(
            "count",
            "fetch",
            16,
            || 1_000_000,
            |names| {
                seen_capacity = names.len();
                fill(names, names.len())
            },
            translate,
        )
        .unwrap();
        assert_eq!(seen_capacity, 16);
        assert_eq!(result.len(), 16);
    }

    #[test]
    fn lying_fetch_count_is_limited_to_the_buffer() {
        // a fetch claiming more entries than the buffer holds must not be
        // trusted past the buffer's end
        let result = fetch_names(
            "count",
            "fetch",
            1024,
            || 2,
            |names| {
                fill(names, 2);
                99
            },
            translate,
        )
        .unwrap();
        assert_eq!(result.len(), 2);
    }

    proptest! {
        #[test]
        fn result_length_matches_written(count in 0usize..64, drop in 0usize..64) {
            let written = count.saturating_sub(drop);
            let result = fetch_names(
                "count",
                "fetch",
                1024,
                || count as i32,
                |names| fill(names, written),
                translate,
            )
            .unwrap();
            prop_assert_eq!(result.len(), written);
        }
    }
}
