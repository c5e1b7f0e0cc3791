//! Common-ancestor and side-chain walks against an in-memory node.

mod common;

use common::{block_with, hash, FakeNode};
use consensus_core::Hash;
use rpc_core::{ChainTip, TipStatus};
use vanta_explorer::rpc_client::{
    common_ancestor, common_ancestor_within, side_chain_full, side_chains, ChainWalkError,
};

/// Build the fork used by most tests:
///
/// ```text
/// m0 - m1 - m2 - m3 - a4 - a5      (branch A, old main chain)
///                  \
///                   `- b4 - b5 - b6 (branch B, side chain)
/// ```
fn forked_node() -> (std::sync::Arc<FakeNode>, Hash, Hash, Hash) {
    let node = FakeNode::new();
    let m3 = node.extend_main(0, 3, Hash::ZERO);

    let mut prev = m3;
    let mut a_tip = m3;
    for h in 4..=5u32 {
        let mut bytes = [0u8; 32];
        bytes[0..4].copy_from_slice(&h.to_le_bytes());
        bytes[31] = 0xa0;
        a_tip = Hash::new(bytes);
        node.add_block(block_with(a_tip, h, prev, vec![], vec![]), true);
        prev = a_tip;
    }

    let mut prev = m3;
    let mut b_tip = m3;
    for h in 4..=6u32 {
        let mut bytes = [0u8; 32];
        bytes[0..4].copy_from_slice(&h.to_le_bytes());
        bytes[31] = 0xb0;
        b_tip = Hash::new(bytes);
        node.add_block(block_with(b_tip, h, prev, vec![], vec![]), false);
        prev = b_tip;
    }

    (node, m3, a_tip, b_tip)
}

#[tokio::test]
async fn ancestor_of_unequal_branches() {
    let (node, m3, a_tip, b_tip) = forked_node();
    let (ancestor, chain_a, chain_b) = common_ancestor(node.as_ref(), a_tip, b_tip).await.unwrap();

    assert_eq!(ancestor, m3);
    assert_eq!(chain_a.len(), 2, "a4, a5");
    assert_eq!(chain_b.len(), 3, "b4, b5, b6");
    // Oldest first, tips last, ancestor excluded.
    assert_eq!(*chain_a.last().unwrap(), a_tip);
    assert_eq!(*chain_b.last().unwrap(), b_tip);
    assert!(!chain_a.contains(&m3));
    assert!(!chain_b.contains(&m3));
}

#[tokio::test]
async fn equal_tips_share_the_block_and_ancestor_is_its_parent() {
    let (node, _, a_tip, _) = forked_node();
    let (ancestor, chain_a, chain_b) = common_ancestor(node.as_ref(), a_tip, a_tip).await.unwrap();

    // The input tip is never the ancestor; both branches contain it.
    assert_ne!(ancestor, a_tip);
    assert_eq!(chain_a, vec![a_tip]);
    assert_eq!(chain_b, vec![a_tip]);
}

#[tokio::test]
async fn disjoint_chains_fail_at_genesis() {
    let node = FakeNode::new();
    // Two independent chains rooted at different "genesis" blocks.
    let a = node.extend_main(0, 2, Hash::ZERO);
    let g = hash(0x77);
    node.add_block(block_with(g, 0, Hash::ZERO, vec![], vec![]), false);
    let b = {
        let b1 = hash(0x78);
        node.add_block(block_with(b1, 1, g, vec![], vec![]), false);
        let b2 = hash(0x79);
        node.add_block(block_with(b2, 2, b1, vec![], vec![]), false);
        b2
    };

    let err = common_ancestor(node.as_ref(), a, b).await.unwrap_err();
    assert!(matches!(err, ChainWalkError::AtGenesis));
}

#[tokio::test]
async fn walk_bound_is_enforced() {
    let (node, _, a_tip, b_tip) = forked_node();
    // The full walk needs 5 steps; a bound of 3 must trip.
    let err = common_ancestor_within(node.as_ref(), a_tip, b_tip, 3)
        .await
        .unwrap_err();
    assert!(matches!(err, ChainWalkError::MaxChainLength));
}

#[tokio::test]
async fn side_chain_walk_stops_at_the_main_chain() {
    let (node, _, _, b_tip) = forked_node();
    let chain = side_chain_full(node.as_ref(), b_tip).await.unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(*chain.last().unwrap(), b_tip);
    // Lowest height first; the ancestor (main chain) is excluded.
    for pair in chain.windows(2) {
        use rpc_core::NodeApi;
        let lower = node.block_header(pair[0]).await.unwrap().header.height;
        let upper = node.block_header(pair[1]).await.unwrap().header.height;
        assert_eq!(lower + 1, upper);
    }
}

#[tokio::test]
async fn main_chain_tip_is_not_a_side_chain() {
    let (node, _, a_tip, _) = forked_node();
    assert!(side_chain_full(node.as_ref(), a_tip).await.is_err());
}

#[tokio::test]
async fn side_chain_tip_filter() {
    let (node, _, a_tip, b_tip) = forked_node();
    node.set_tips(vec![
        ChainTip { hash: a_tip, height: 5, status: TipStatus::Active },
        ChainTip { hash: b_tip, height: 6, status: TipStatus::ValidFork },
        ChainTip { hash: hash(0x99), height: 2, status: TipStatus::Invalid },
    ]);
    let side = side_chains(node.as_ref()).await.unwrap();
    assert_eq!(side.len(), 1);
    assert_eq!(side[0].hash, b_tip);
}
