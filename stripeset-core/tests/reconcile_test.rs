// Reply voting, bad-node tracking and repair scheduling

use pretty_assertions::assert_eq;
use stripeset_core::{
    config::StripesetConfigBuilder,
    fops::FopSpec,
    types::{ObjectAttr, ReplyValue},
    NodeMask, StripesetError,
};

mod common;
use common::{finish, test_set, test_set_with, wait_for_condition, TEST_TIMEOUT};

#[tokio::test]
async fn test_majority_answers_despite_unreachable_nodes() {
    let t = test_set(5, 3);
    let (inode, loc) = t.file("/five");
    t.sim.set_attr(NodeMask::first(5), inode.id(), ObjectAttr { size: 12, version: 1 });
    t.sim.set_unreachable(2, true);
    t.sim.set_unreachable(4, true);

    let answer = finish(FopSpec::lookup().fop(&t.set).loc(loc).submit())
        .await
        .unwrap();

    assert_eq!(answer.good, NodeMask::from_nodes([0, 1, 3]));
    assert_eq!(answer.bad, NodeMask::from_nodes([2, 4]));
    assert_eq!(
        answer.value.and_then(|value| value.attr),
        Some(ObjectAttr { size: 12, version: 1 })
    );
    assert_eq!(inode.bad(), NodeMask::from_nodes([2, 4]));

    // Nodes 2 and 4 are live but not good, so a repair is requested
    assert!(wait_for_condition(|| !t.sim.heals().is_empty(), TEST_TIMEOUT).await);
    let heal = &t.sim.heals()[0];
    assert_eq!(heal.object.id, inode.id());
    assert!(!heal.by_fd);
    assert_eq!(heal.nodes, NodeMask::first(5));
}

#[tokio::test]
async fn test_split_replies_fail_reconciliation() {
    let t = test_set(4, 3);
    let (_, loc) = t.file("/split");
    for node in 0..2 {
        t.sim.set_reply(node, ReplyValue::ok(1));
    }
    for node in 2..4 {
        t.sim.set_reply(node, ReplyValue::ok(2));
    }

    let result = finish(FopSpec::lookup().fop(&t.set).loc(loc).submit()).await;

    assert_eq!(
        result,
        Err(StripesetError::ReconciliationFailure {
            replies: 4,
            groups: 2,
            minimum: 3,
        })
    );
}

#[tokio::test]
async fn test_all_unreachable_reports_unreachable_nodes() {
    let t = test_set(3, 2);
    let (_, loc) = t.file("/gone");
    for node in 0..3 {
        t.sim.set_unreachable(node, true);
    }

    let result = finish(FopSpec::lookup().fop(&t.set).loc(loc).submit()).await;

    assert_eq!(
        result,
        Err(StripesetError::NodeUnreachable {
            nodes: NodeMask::first(3)
        })
    );
}

#[tokio::test]
async fn test_known_bad_nodes_are_skipped_until_repaired() {
    let t = test_set(4, 2);
    let (inode, loc) = t.file("/repair");
    t.sim.set_unreachable(3, true);

    finish(FopSpec::lookup().fop(&t.set).loc(loc.clone()).submit())
        .await
        .unwrap();
    assert_eq!(inode.bad(), NodeMask::single(3));
    assert!(t.sim.is_stale(3, inode.id()));

    // The first repair runs while node 3 is still unreachable
    assert!(wait_for_condition(|| t.sim.heals().len() == 1, TEST_TIMEOUT).await);
    assert_eq!(inode.bad(), NodeMask::single(3));

    t.sim.restore(3);
    t.sim.reset_counters();
    let answer = finish(FopSpec::lookup().fop(&t.set).loc(loc).submit())
        .await
        .unwrap();

    // Node 3 is excluded by the object's context, which schedules a repair
    assert_eq!(answer.mask, NodeMask::first(3));
    assert_eq!(t.sim.sends(3), 0);
    assert!(wait_for_condition(|| inode.bad().is_empty(), TEST_TIMEOUT).await);
    assert!(!t.sim.is_stale(3, inode.id()));
}

#[tokio::test]
async fn test_no_repair_without_auto_heal() {
    let config = StripesetConfigBuilder::new()
        .nodes(3)
        .fragments(2)
        .auto_heal(false)
        .build()
        .unwrap();
    let t = test_set_with(config);
    let (inode, loc) = t.file("/manual");
    t.sim.set_unreachable(0, true);

    let answer = finish(FopSpec::lookup().fop(&t.set).loc(loc).submit())
        .await
        .unwrap();

    assert_eq!(answer.bad, NodeMask::single(0));
    assert_eq!(inode.bad(), NodeMask::single(0));
    tokio::task::yield_now().await;
    assert!(t.sim.heals().is_empty());
}

#[tokio::test]
async fn test_child_operations_leave_contexts_alone() {
    use std::sync::Arc;
    use stripeset_core::{
        dispatch,
        manager::{FopHandler, State, Step},
        types::{NodeRequest, RequestBody},
        Fop,
    };

    /// Dispatches one child lookup and then ends
    struct Parent {
        child_loc: stripeset_core::inode::Loc,
    }

    impl FopHandler for Parent {
        fn name(&self) -> &'static str {
            "parent"
        }

        fn manage(&self, fop: &Arc<Fop>, step: Step) -> State {
            match step {
                Step::Run(State::INIT) => {
                    let _ = FopSpec::lookup()
                        .fop(fop.set())
                        .loc(self.child_loc.clone())
                        .parent(fop)
                        .submit();
                    State::DISPATCH
                }
                Step::Run(State::DISPATCH) => {
                    if let Err(e) = dispatch::dispatch(fop, stripeset_core::DispatchPolicy::All) {
                        fop.set_error(e);
                    }
                    State::END
                }
                _ => State::END,
            }
        }

        fn wind(&self, fop: &Fop, _node: usize) -> NodeRequest {
            NodeRequest {
                fop: fop.id(),
                target: fop.loc(0).and_then(|loc| loc.object_ref()),
                body: RequestBody::Lookup,
                creds: fop.creds(),
            }
        }
    }

    let t = test_set(3, 2);
    let (parent_inode, parent_loc) = t.file("/outer");
    let (child_inode, child_loc) = t.file("/inner");
    t.sim.set_unreachable(2, true);

    let handle = t
        .set
        .fop(Arc::new(Parent { child_loc }))
        .loc(parent_loc)
        .submit();
    let answer = finish(handle).await.unwrap();

    // The child saw node 2 fail too, but only top-level operations update
    // object contexts
    assert_eq!(answer.bad, NodeMask::single(2));
    assert_eq!(parent_inode.bad(), NodeMask::single(2));
    assert_eq!(child_inode.bad(), NodeMask::EMPTY);
    assert_eq!(t.sim.total_sends(), 6);
}
