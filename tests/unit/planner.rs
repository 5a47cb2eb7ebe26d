//! Block planning through the public API

use grid_extract::extractor::planner::plan;
use grid_extract::ExtractError;

#[test]
fn test_plan_examples() {
    let cases = [
        // (total, max, len) -> (count, length)
        ((160.0, 40.0, 10), (4, 3)),
        ((0.0, 64.0, 31), (1, 31)),
        ((64.0, 64.0, 31), (1, 31)),
        ((64.5, 64.0, 31), (2, 16)),
        ((7.0, 1.0, 10), (5, 2)),
        ((3.0, 1.0, 1), (1, 1)),
    ];

    for ((total, max, len), (count, length)) in cases {
        let plan = plan(total, max, len).unwrap();
        assert_eq!(
            (plan.block_count, plan.block_length),
            (count, length),
            "plan({total}, {max}, {len})"
        );
    }
}

#[test]
fn test_blocks_iterator_matches_count() {
    let plan = plan(10.0, 3.0, 29).unwrap();
    let blocks: Vec<_> = plan.blocks().collect();

    assert_eq!(blocks.len(), plan.block_count);
    assert_eq!(plan.blocks().len(), plan.block_count);
    assert_eq!(blocks.iter().map(|b| b.len()).sum::<usize>(), 29);
}

#[test]
fn test_rejects_non_positive_cap() {
    assert!(matches!(plan(1.0, 0.0, 3), Err(ExtractError::InvalidConfig(_))));
}
