//! Read chunk planning and address-probe sequencing
//!
//! Pure helpers driven by the connection's locked read path. Splitting and
//! probe ordering live here so they can be tested without any I/O.

/// One protocol-legal sub-request of a larger read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub address: u16,
    pub count: u16,
}

/// Split `count` items starting at `address` into sub-requests of at most
/// `max_per_request`, in ascending address order.
///
/// A zero limit is clamped to 1 so a misconfigured device limit cannot
/// produce an empty plan. A range running past the top of the 16-bit
/// address space is truncated at 65535: probe rebasing can shift a
/// validated range upward, and truncation surfaces as a short read rather
/// than a wrapped address.
pub(crate) fn plan_chunks(address: u16, count: u16, max_per_request: u16) -> Vec<Chunk> {
    let max = u32::from(max_per_request.max(1));
    let start = u32::from(address);
    let end = (start + u32::from(count)).min(0x1_0000);
    let mut chunks = Vec::with_capacity(count.div_ceil(max_per_request.max(1)) as usize);

    let mut cursor = start;
    while cursor < end {
        let size = (end - cursor).min(max);
        chunks.push(Chunk {
            address: cursor as u16,
            count: size as u16,
        });
        cursor += size;
    }

    chunks
}

/// Probe addresses around `address` in the order `+1, -1, +2, -2, ...` up
/// to `radius`, skipping offsets that leave the 16-bit address space.
pub(crate) fn probe_addresses(address: u16, radius: u16) -> Vec<u16> {
    let mut candidates = Vec::with_capacity(2 * radius as usize);
    let base = i64::from(address);

    for step in 1..=i64::from(radius) {
        for candidate in [base + step, base - step] {
            if (0..=i64::from(u16::MAX)).contains(&candidate) {
                candidates.push(candidate as u16);
            }
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== Chunk planning tests ==========

    #[test]
    fn test_single_chunk_at_limit() {
        let chunks = plan_chunks(0, 100, 100);
        assert_eq!(chunks, vec![Chunk { address: 0, count: 100 }]);
    }

    #[test]
    fn test_chunk_count_is_ceil_of_ratio() {
        let chunks = plan_chunks(10, 250, 100);
        assert_eq!(
            chunks,
            vec![
                Chunk { address: 10, count: 100 },
                Chunk { address: 110, count: 100 },
                Chunk { address: 210, count: 50 },
            ]
        );
    }

    #[test]
    fn test_chunks_ascend_and_cover_range() {
        let chunks = plan_chunks(500, 7, 3);
        let mut expected_addr = 500;
        let mut total = 0u16;
        for chunk in &chunks {
            assert_eq!(chunk.address, expected_addr);
            expected_addr += chunk.count;
            total += chunk.count;
        }
        assert_eq!(total, 7);
    }

    #[test]
    fn test_zero_limit_clamped() {
        let chunks = plan_chunks(0, 3, 0);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_plan_truncates_at_address_space_top() {
        let chunks = plan_chunks(65435, 101, 100);
        assert_eq!(
            chunks,
            vec![
                Chunk { address: 65435, count: 100 },
                Chunk { address: 65535, count: 1 },
            ]
        );

        // Rebased past the top: truncated, never wrapped to address 0
        let chunks = plan_chunks(65500, 200, 100);
        assert_eq!(chunks, vec![Chunk { address: 65500, count: 36 }]);
    }

    // ========== Probe ordering tests ==========

    #[test]
    fn test_probe_order_alternates_outward() {
        assert_eq!(probe_addresses(100, 3), vec![101, 99, 102, 98, 103, 97]);
    }

    #[test]
    fn test_probe_skips_below_zero() {
        assert_eq!(probe_addresses(1, 2), vec![2, 0, 3]);
        assert_eq!(probe_addresses(0, 1), vec![1]);
    }

    #[test]
    fn test_probe_skips_above_max() {
        assert_eq!(probe_addresses(u16::MAX, 2), vec![u16::MAX - 1, u16::MAX - 2]);
    }

    #[test]
    fn test_zero_radius_yields_no_probes() {
        assert!(probe_addresses(42, 0).is_empty());
    }
}
