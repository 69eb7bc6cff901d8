//! Security-property coverage that spans component boundaries: a
//! tampered plot quarantined rather than trusted, a forged block
//! commitment rejected, a spent output that stays spent, a replayed
//! block rejected as a duplicate, and a mempool entry evicted once a
//! conflicting spend confirms on chain.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tempfile::tempdir;

use umbra_consensus::dispatch::{ChainParams, ConsensusEvent, ConsensusLoop};
use umbra_core::address::Address;
use umbra_core::chain_state::{ChainStore, MemoryChainStore};
use umbra_core::constants::{COINBASE_MATURITY, DEFAULT_MIN_FEE_SATOSHI};
use umbra_core::crypto::KeyPair;
use umbra_core::genesis;
use umbra_core::mempool::Mempool;
use umbra_core::reward::RewardSchedule;
use umbra_core::traits::{FixedClock, NullPeerIngress};
use umbra_core::types::OutPoint;
use umbra_farm::FarmingIndex;
use umbra_node_lib::{Node, NodeConfig};
use umbra_plots::{write_plot, PlotHandle};
use umbra_tests::helpers::{connect_unchecked, mine_block_with_reward, mine_empty_block, spend};

/// A plot file whose secret key bytes are corrupted after writing fails
/// the farming index's verification pass and is quarantined: left out of
/// `loaded`, not trusted to answer challenges.
#[test]
fn tampered_plot_entry_is_quarantined_not_loaded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("umbra_v1_k3_20260101-000000_deadbeef.dat");
    let keypairs: Vec<KeyPair> = (0..8).map(|_| KeyPair::generate()).collect();
    write_plot(&path, &keypairs).unwrap();
    assert!(PlotHandle::open(&path).unwrap().verify(true).is_ok());

    {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.seek(SeekFrom::End(0)).unwrap();
        file.seek(SeekFrom::Start(len - 1)).unwrap();
        file.write_all(&[0xFF]).unwrap();
    }

    let db_dir = tempdir().unwrap();
    let index = FarmingIndex::open(db_dir.path().join("farm-index")).unwrap();
    let indexed = index.index(&[dir.path().to_path_buf()]).unwrap();
    assert_eq!(indexed, 0, "a corrupted plot must not count as indexed");
    assert_eq!(index.loaded_plot_count(), 0, "a corrupted plot must not be loaded");
}

/// A block already connected to the chain cannot be replayed to connect
/// a second time.
#[test]
fn resubmitting_an_already_connected_block_is_rejected_as_duplicate() {
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

    let block = node.force_mine().unwrap().expect("genesis difficulty is wide open");
    assert_eq!(node.get_tip().unwrap().0, 1);

    let err = node.submit_block(block).unwrap_err();
    assert_eq!(node.get_tip().unwrap().0, 1, "the replayed block must not connect a second time");
    assert!(format!("{err:?}").contains("Duplicate") || format!("{err:?}").contains("HeightMismatch"));
}

/// A block whose header claims a `farmer_address` that doesn't match the
/// public key it also carries is rejected, independent of whether the
/// proof signature itself verifies.
#[test]
fn block_with_mismatched_farmer_address_is_rejected() {
    let farmer = KeyPair::generate();
    let mut block = mine_empty_block(&farmer, genesis::genesis_hash(), 1, genesis::GENESIS_TIMESTAMP + 50, u64::MAX);
    block.header.farmer_address = Address::standard([0x99; 20]);

    let mut chain = MemoryChainStore::new();
    connect_unchecked(&mut chain, genesis::genesis_block(), 0);
    let err = umbra_core::block_validation::check_proof_of_storage(&block).unwrap_err();
    assert!(matches!(err, umbra_core::error::BlockError::InvalidFarmerSignature));
}

/// Once a coinbase output has been spent in a connected block, the same
/// outpoint no longer resolves to a UTXO — a second attempt to spend it
/// is rejected as an unknown input, not a double payout.
#[test]
fn spent_output_cannot_be_spent_again_once_confirmed() {
    let farmer = KeyPair::generate();
    let recipient = KeyPair::generate();
    let mut chain = MemoryChainStore::new();
    connect_unchecked(&mut chain, genesis::genesis_block(), 0);

    let mut timestamp = genesis::genesis_block().header.timestamp + 1;
    let block1 = mine_empty_block(&farmer, genesis::genesis_hash(), 1, timestamp, u64::MAX);
    let coinbase_outpoint = OutPoint { tx_hash: block1.transactions[0].tx_hash, index: 0 };
    let coinbase_value = block1.transactions[0].raw_tx.outputs[0].value;
    connect_unchecked(&mut chain, &block1, 1);
    let mut prev_hash = block1.header.hash();

    for height in 2..=COINBASE_MATURITY {
        timestamp += 1;
        let filler = mine_empty_block(&farmer, prev_hash, height, timestamp, u64::MAX);
        connect_unchecked(&mut chain, &filler, height);
        prev_hash = filler.header.hash();
    }

    timestamp += 1;
    let fee = DEFAULT_MIN_FEE_SATOSHI * 2;
    let spend_value = coinbase_value - fee;
    let spend_tx = spend(&farmer, coinbase_outpoint.clone(), spend_value, Address::from_public_key(&recipient.public_key()), timestamp, 0);
    let next_height = COINBASE_MATURITY + 1;
    let reward = RewardSchedule::default().block_reward(next_height);
    let spend_block = mine_block_with_reward(&farmer, prev_hash, next_height, timestamp, u64::MAX, reward + fee, vec![spend_tx]);
    connect_unchecked(&mut chain, &spend_block, next_height);

    assert!(chain.get_utxo(&coinbase_outpoint).unwrap().is_none());

    let replay = spend(&farmer, coinbase_outpoint.clone(), spend_value, Address::from_public_key(&recipient.public_key()), timestamp + 1, 1);
    let err = umbra_core::validation::validate_transaction(
        &replay,
        |op| chain.get_utxo(op).ok().flatten(),
        next_height,
        timestamp + 1,
    )
    .unwrap_err();
    assert!(matches!(err, umbra_core::error::TransactionError::UnknownInput(_)));
}

/// A transaction sitting in the mempool is evicted once a different
/// block, spending the same outpoint, is accepted onto the chain first
/// — the mempool must not keep offering a transaction whose input is
/// already gone.
#[test]
fn mempool_entry_evicted_when_a_conflicting_spend_confirms_first() {
    let farmer = KeyPair::generate();
    let honest_recipient = KeyPair::generate();
    let other_recipient = KeyPair::generate();

    let mut store: Box<dyn ChainStore> = Box::new(MemoryChainStore::new());
    store.connect_block(genesis::genesis_block(), 0).unwrap();

    let mut timestamp = genesis::genesis_block().header.timestamp + 1;
    let block1 = mine_empty_block(&farmer, genesis::genesis_hash(), 1, timestamp, u64::MAX);
    let coinbase_outpoint = OutPoint { tx_hash: block1.transactions[0].tx_hash, index: 0 };
    let coinbase_value = block1.transactions[0].raw_tx.outputs[0].value;
    store.connect_block(&block1, 1).unwrap();
    let mut prev_hash = block1.header.hash();

    for height in 2..=COINBASE_MATURITY {
        timestamp += 1;
        let filler = mine_empty_block(&farmer, prev_hash, height, timestamp, u64::MAX);
        store.connect_block(&filler, height).unwrap();
        prev_hash = filler.header.hash();
    }

    let chain = Arc::new(RwLock::new(store));
    let mempool = Arc::new(Mutex::new(Mempool::default()));
    let ingress = Arc::new(NullPeerIngress::new());
    timestamp += 1;
    let dispatcher = ConsensusLoop::new(
        chain.clone(),
        mempool.clone(),
        ingress,
        Arc::new(FixedClock(timestamp + 10)),
        ChainParams { retarget_interval: 2016, target_interval_seconds: 600 },
    );

    let fee = DEFAULT_MIN_FEE_SATOSHI * 2;
    let mempool_tx = spend(
        &farmer,
        coinbase_outpoint.clone(),
        coinbase_value - fee,
        Address::from_public_key(&honest_recipient.public_key()),
        timestamp,
        0,
    );
    let mempool_tx_hash = mempool_tx.tx_hash;
    {
        let guard = chain.read();
        mempool
            .lock()
            .admit(mempool_tx, |op| guard.get_utxo(op).ok().flatten(), COINBASE_MATURITY, timestamp)
            .unwrap();
    }
    assert!(mempool.lock().contains(&mempool_tx_hash));

    let confirming_tx = spend(
        &farmer,
        coinbase_outpoint,
        coinbase_value - fee,
        Address::from_public_key(&other_recipient.public_key()),
        timestamp,
        1,
    );
    let next_height = COINBASE_MATURITY + 1;
    let reward = RewardSchedule::default().block_reward(next_height);
    let confirming_block = mine_block_with_reward(
        &farmer,
        prev_hash,
        next_height,
        timestamp,
        u64::MAX,
        reward + fee,
        vec![confirming_tx],
    );

    dispatcher
        .dispatch(ConsensusEvent::LocalCandidate(confirming_block))
        .unwrap();

    assert!(!mempool.lock().contains(&mempool_tx_hash), "conflicting mempool entry must be evicted on reconcile");
}
