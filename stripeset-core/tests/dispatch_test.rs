// Dispatch policy and node selection tests

use pretty_assertions::assert_eq;
use stripeset_core::{
    fops::FopSpec,
    types::{NodeErrno, ReplyValue, RequestBody},
    DispatchPolicy, Minimum, NodeMask, StripesetError,
};
use tracing_test::traced_test;

mod common;
use common::{finish, test_set};

#[tokio::test]
async fn test_all_policy_sends_to_every_node() {
    let t = test_set(4, 2);
    let (_, loc) = t.file("/all");

    let answer = finish(FopSpec::lookup().fop(&t.set).loc(loc).submit())
        .await
        .unwrap();

    assert_eq!(answer.good, NodeMask::first(4));
    assert_eq!(answer.bad, NodeMask::EMPTY);
    assert_eq!(answer.minimum, 2);
    assert_eq!(answer.expected, 4);
    assert_eq!(t.sim.total_sends(), answer.expected as u64);
}

#[tokio::test]
async fn test_exactly_minimum_starts_after_cursor() {
    let t = test_set(5, 3);
    let (_, loc) = t.file("/min");
    let cursor = t.set.cursor();

    let answer = finish(FopSpec::read(0, 16).fop(&t.set).loc(loc).submit())
        .await
        .unwrap();

    let start = (cursor + 1) % 5;
    let expected = NodeMask::from_nodes((0..3).map(|i| (start + i) % 5));
    assert_eq!(t.sim.contacted(), expected);
    assert_eq!(answer.good, expected);
    assert_eq!(answer.bad, NodeMask::EMPTY);
    assert_eq!(answer.expected, 3);
    assert_eq!(t.set.cursor(), start);
}

#[tokio::test]
async fn test_single_dispatch_visits_every_eligible_node() {
    let t = test_set(5, 1);
    let (_, loc) = t.file("/rr");
    let eligible = NodeMask::from_nodes([0, 2, 4]);

    let mut visited = Vec::new();
    for _ in 0..3 {
        t.sim.reset_counters();
        let answer = finish(
            FopSpec::lookup()
                .with_policy(DispatchPolicy::One)
                .with_minimum(Minimum::One)
                .fop(&t.set)
                .loc(loc.clone())
                .mask(eligible)
                .submit(),
        )
        .await
        .unwrap();
        assert_eq!(answer.good.count(), 1);
        assert_eq!(t.sim.contacted(), answer.good);
        visited.extend(answer.good.iter());
    }

    visited.sort_unstable();
    assert_eq!(visited, vec![0, 2, 4]);
}

#[tokio::test]
async fn test_one_retry_moves_past_unreachable_node() {
    let t = test_set(3, 1);
    let (inode, loc) = t.file("/retry");
    let first = (t.set.cursor() + 1) % 3;
    let next = (first + 1) % 3;
    t.sim.set_unreachable(first, true);

    let answer = finish(
        FopSpec::lookup()
            .with_policy(DispatchPolicy::OneRetry)
            .with_minimum(Minimum::One)
            .fop(&t.set)
            .loc(loc)
            .submit(),
    )
    .await
    .unwrap();

    assert_eq!(t.sim.sends(first), 1);
    assert_eq!(t.sim.sends(next), 1);
    assert_eq!(answer.good, NodeMask::single(next));
    assert_eq!(answer.bad, NodeMask::single(first));
    assert!(inode.bad().contains(first));
}

#[tokio::test]
async fn test_one_retry_does_not_retry_node_errors() {
    let t = test_set(3, 1);
    let (_, loc) = t.file("/no-retry");
    let first = (t.set.cursor() + 1) % 3;
    t.sim.fail_node(first, NodeErrno::Io);

    let result = finish(
        FopSpec::lookup()
            .with_policy(DispatchPolicy::OneRetry)
            .with_minimum(Minimum::One)
            .fop(&t.set)
            .loc(loc)
            .submit(),
    )
    .await;

    assert_eq!(result, Err(StripesetError::NodeFailure { errno: NodeErrno::Io }));
    assert_eq!(t.sim.total_sends(), 1);
}

#[tokio::test]
async fn test_incremental_sends_in_node_order() {
    let t = test_set(4, 2);
    let (_, loc) = t.file("/inc");

    let answer = finish(
        FopSpec::lookup()
            .with_policy(DispatchPolicy::Incremental)
            .fop(&t.set)
            .loc(loc)
            .submit(),
    )
    .await
    .unwrap();

    // Nodes 0 and 1 already agree on the minimum, so 2 and 3 are never asked
    let order: Vec<usize> = t.sim.requests().into_iter().map(|(node, _)| node).collect();
    assert_eq!(order, vec![0, 1]);
    assert_eq!(answer.expected, 4);
    assert_eq!(answer.good, NodeMask::first(2));
    assert_eq!(answer.bad, NodeMask::EMPTY);
}

#[tokio::test]
async fn test_incremental_continues_past_disagreeing_nodes() {
    let t = test_set(4, 2);
    let (_, loc) = t.file("/inc-split");
    t.sim.set_reply(1, ReplyValue::ok(9));

    let answer = finish(
        FopSpec::lookup()
            .with_policy(DispatchPolicy::Incremental)
            .fop(&t.set)
            .loc(loc)
            .submit(),
    )
    .await
    .unwrap();

    let order: Vec<usize> = t.sim.requests().into_iter().map(|(node, _)| node).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(answer.good, NodeMask::from_nodes([0, 2]));
    assert_eq!(answer.bad, NodeMask::single(1));
}

#[tokio::test]
async fn test_single_dispatch_answers_below_fragment_threshold() {
    let t = test_set(5, 3);
    let (_, loc) = t.file("/single");
    let first = (t.set.cursor() + 1) % 5;

    let answer = finish(
        FopSpec::lookup()
            .with_policy(DispatchPolicy::One)
            .fop(&t.set)
            .loc(loc)
            .submit(),
    )
    .await
    .unwrap();

    assert_eq!(t.sim.total_sends(), 1);
    assert_eq!(t.sim.contacted(), NodeMask::single(first));
    assert_eq!(answer.good, NodeMask::single(first));
    assert_eq!(answer.bad, NodeMask::EMPTY);
    assert_eq!(answer.expected, 1);
    assert_eq!(answer.minimum, 3);
}

#[tokio::test]
async fn test_one_retry_answers_below_fragment_threshold() {
    let t = test_set(5, 3);
    let (inode, loc) = t.file("/single-retry");
    let first = (t.set.cursor() + 1) % 5;
    let next = (first + 1) % 5;
    t.sim.set_unreachable(first, true);

    let answer = finish(
        FopSpec::lookup()
            .with_policy(DispatchPolicy::OneRetry)
            .fop(&t.set)
            .loc(loc)
            .submit(),
    )
    .await
    .unwrap();

    assert_eq!(t.sim.total_sends(), 2);
    assert_eq!(t.sim.contacted(), NodeMask::from_nodes([first, next]));
    assert_eq!(answer.good, NodeMask::single(next));
    assert_eq!(answer.bad, NodeMask::single(first));
    assert!(inode.bad().contains(first));
}

#[tokio::test]
async fn test_requests_carry_body_and_target() {
    let t = test_set(3, 2);
    let (inode, loc) = t.file("/dir/file");

    finish(FopSpec::read(8, 32).fop(&t.set).loc(loc).submit())
        .await
        .unwrap();

    let requests = t.sim.requests();
    assert_eq!(requests.len(), 2);
    for (_, request) in requests {
        assert_eq!(request.body, RequestBody::Read { offset: 8, len: 32 });
        let target = request.target.unwrap();
        assert_eq!(target.id, inode.id());
        assert_eq!(target.path, "/dir/file");
    }
}

#[tokio::test]
async fn test_too_few_live_nodes_is_infeasible() {
    let t = test_set(4, 3);
    let (_, loc) = t.file("/down");
    t.set.node_down(0);
    t.set.node_down(1);

    let result = finish(FopSpec::lookup().fop(&t.set).loc(loc).submit()).await;

    match result {
        Err(StripesetError::QuorumInfeasible {
            available,
            required,
            eligible,
        }) => {
            assert_eq!(available, 2);
            assert_eq!(required, 3);
            assert_eq!(eligible, NodeMask::from_nodes([2, 3]));
        }
        other => panic!("expected QuorumInfeasible, got {:?}", other),
    }
    assert_eq!(t.sim.total_sends(), 0);
}

#[tokio::test]
async fn test_requested_mask_outside_set_is_ignored() {
    let t = test_set(3, 2);
    let (_, loc) = t.file("/mask");

    let answer = finish(
        FopSpec::lookup()
            .fop(&t.set)
            .loc(loc)
            .mask(NodeMask::from_nodes([1, 2, 7, 40]))
            .submit(),
    )
    .await
    .unwrap();

    assert_eq!(answer.mask, NodeMask::from_nodes([1, 2]));
    assert_eq!(t.sim.contacted(), NodeMask::from_nodes([1, 2]));
}

#[tokio::test]
#[traced_test]
async fn test_degraded_execution_is_logged() {
    let t = test_set(4, 2);
    let (_, loc) = t.file("/degraded");
    t.set.node_down(3);

    let answer = finish(FopSpec::lookup().fop(&t.set).loc(loc).submit())
        .await
        .unwrap();

    assert_eq!(answer.mask, NodeMask::first(3));
    assert_eq!(t.sim.sends(3), 0);
    assert!(logs_contain("Executing operation with some nodes unavailable"));
}
