//! Multi-node integration: two independent `Node` instances relaying
//! mined blocks to each other through `submit_block`, the only surface
//! a peer-to-peer layer would call (P2P transport itself is out of
//! scope for the core).

use std::thread::sleep;
use std::time::Duration;

use tempfile::tempdir;

use umbra_core::crypto::KeyPair;
use umbra_core::genesis;
use umbra_node_lib::{Node, NodeConfig};
use umbra_plots::write_plot;
use umbra_tests::helpers::mine_empty_block;

fn node_with_plot() -> (std::sync::Arc<Node>, tempfile::TempDir, tempfile::TempDir) {
    let data_dir = tempdir().unwrap();
    let plot_dir = tempdir().unwrap();
    let keypairs: Vec<KeyPair> = (0..8).map(|_| KeyPair::generate()).collect();
    write_plot(plot_dir.path().join("umbra_v1_k3_20260101-000000_deadbeef.dat"), &keypairs).unwrap();

    let config = NodeConfig {
        data_dir: data_dir.path().to_path_buf(),
        plot_dirs: vec![plot_dir.path().to_path_buf()],
        ..NodeConfig::default()
    };
    let node = Node::in_memory(config).unwrap();
    (node, data_dir, plot_dir)
}

/// Blocks mined by one node and relayed to another bring both to the
/// same tip, exactly as a P2P layer forwarding `submit_block` calls
/// would.
#[test]
fn two_nodes_converge_after_block_relay() {
    let (node_a, _a_data, _a_plot) = node_with_plot();
    let (node_b, _b_data, _b_plot) = node_with_plot();
    assert_eq!(node_a.get_tip().unwrap(), node_b.get_tip().unwrap());

    let block1 = node_a.force_mine().unwrap().expect("genesis difficulty is wide open");
    node_b.submit_block(block1).unwrap();
    assert_eq!(node_a.get_tip().unwrap(), node_b.get_tip().unwrap());
    assert_eq!(node_a.get_tip().unwrap().0, 1);

    // Real wall-clock mining needs a fresh second so the next block's
    // timestamp clears the monotonicity check against the one just mined.
    sleep(Duration::from_millis(1100));

    let block2 = node_a.force_mine().unwrap().expect("genesis difficulty is still wide open");
    node_b.submit_block(block2).unwrap();
    assert_eq!(node_a.get_tip().unwrap(), node_b.get_tip().unwrap());
    assert_eq!(node_a.get_tip().unwrap().0, 2);
}

/// A block that doesn't extend a node's current tip (wrong `prev_hash`)
/// is rejected rather than silently ignored or treated as a fork.
#[test]
fn node_rejects_a_block_that_does_not_extend_its_tip() {
    let (node, _data, _plot) = node_with_plot();
    let farmer = KeyPair::generate();

    let orphan = mine_empty_block(
        &farmer,
        umbra_core::types::Hash256([0x42; 32]),
        1,
        genesis::GENESIS_TIMESTAMP + 100,
        u64::MAX,
    );

    assert!(node.submit_block(orphan).is_err());
    assert_eq!(node.get_tip().unwrap().0, 0);
}

/// Two nodes that each mine their own block at height 1 independently:
/// the second node refuses to accept the first's competing block once
/// it already has one of its own at that height (single-block relay
/// never reorgs past an equal-height competitor).
#[test]
fn competing_blocks_at_the_same_height_do_not_silently_overwrite_each_other() {
    let (node_a, _a_data, _a_plot) = node_with_plot();
    let (node_b, _b_data, _b_plot) = node_with_plot();

    let block_from_a = node_a.force_mine().unwrap().expect("genesis difficulty is wide open");
    let block_from_b = node_b.force_mine().unwrap().expect("genesis difficulty is wide open");

    assert_ne!(block_from_a.header.hash(), block_from_b.header.hash());
    assert_eq!(node_a.get_tip().unwrap().0, 1);
    assert_eq!(node_b.get_tip().unwrap().0, 1);

    // node_b already connected its own block 1; node_a's competing block
    // 1 cannot also extend node_b's tip (height mismatch), so it's
    // rejected rather than silently replacing node_b's chain.
    assert!(node_b.submit_block(block_from_a).is_err());
    assert_eq!(node_b.get_tip().unwrap().1, block_from_b.header.hash());
}
