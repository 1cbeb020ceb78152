//! Per-network chain parameters.
//!
//! Everything that differs between parameter sets is carried here as
//! explicit data so main-network, test-network, and synthetic test params
//! can coexist in one process. Nothing in this module is mutable global
//! state.

use serde::{Deserialize, Serialize};

use crate::types::{Amount, Hash};

/// Network identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Main,
    Testnet,
}

/// One mining algorithm valid within a fork era.
///
/// The proof-of-work hash is injectable so that algorithms whose hash
/// function lives outside this crate still validate through the same path;
/// the default is double-SHA256 over the 80-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgoSpec {
    pub name: &'static str,
    /// Block version value identifying this algorithm.
    pub version: i32,
    /// Compact encoding of this algorithm's proof-of-work limit (the
    /// minimum-difficulty floor).
    pub min_bits: u32,
    /// Target seconds between blocks of this algorithm.
    pub target_spacing: u64,
    /// Emission-curve interval constant for the post-fork subsidy formula.
    pub version_interval: u64,
    /// Proof-of-work hash over the serialized header.
    pub pow_hash: fn(&[u8; 80]) -> Hash,
}

/// Double-SHA256 proof-of-work hash, the default for all built-in algorithms.
pub fn sha256d_pow_hash(header: &[u8; 80]) -> Hash {
    Hash::double_sha256(header)
}

/// A fork era: the set of concurrently valid algorithms from an activation
/// height onward.
#[derive(Debug, Clone)]
pub struct ForkEra {
    pub activation_height: u64,
    pub algos: Vec<AlgoSpec>,
}

/// One entry of the one-time hard-fork disbursement list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payee {
    pub amount: Amount,
    /// 20-byte hash embedded in the payee's pay-to-pubkey-hash script.
    pub script_address: [u8; 20],
}

/// Soft-fork deployment identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentId {
    /// Relative lock-time (sequence) enforcement.
    Csv = 0,
    /// Segregated witness enforcement.
    Segwit = 1,
}

pub const DEPLOYMENT_COUNT: usize = 2;

/// Version-bits deployment schedule for one soft fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    /// Bit position in the block version signalling readiness.
    pub bit: u8,
    /// Median-time-past at which signalling may begin.
    pub start_time: u64,
    /// Median-time-past after which a deployment that has not locked in
    /// fails.
    pub expire_time: u64,
}

/// A hard-coded known-good (height, hash) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: u64,
    pub hash: Hash,
}

/// Chain parameters: the full constant table one validator instance runs
/// against.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub network: Network,
    pub genesis_hash: Hash,
    /// Starting subsidy, halved every `subsidy_halving_interval` blocks
    /// before the hard fork.
    pub base_subsidy: Amount,
    pub subsidy_halving_interval: u64,
    /// Blocks a coinbase output must age before it may be spent.
    pub coinbase_maturity: u64,
    /// Timestamp from which pay-to-script-hash evaluation rules apply.
    pub bip16_activation_time: u64,
    /// Height from which coinbases must embed the serialized block height.
    /// Also the height from which the duplicate-output (BIP0030) scan is no
    /// longer required.
    pub bip34_height: u64,
    /// Height from which absolute-lock-time opcode enforcement applies to
    /// version 4+ blocks.
    pub bip65_height: u64,
    /// Height from which strict DER signatures apply to version 3+ blocks.
    pub bip66_height: u64,
    /// Version-bits window length in blocks.
    pub miner_confirmation_window: u64,
    /// Signalling blocks per window required to lock a deployment in.
    pub rule_change_activation_threshold: u64,
    pub deployments: [Deployment; DEPLOYMENT_COUNT],
    pub checkpoints: Vec<Checkpoint>,
    /// Grandfathered nodes exempt from the duplicate-output scan.
    pub bip30_exceptions: Vec<(u64, Hash)>,
    /// Fork eras in ascending activation order. Era zero must activate at
    /// height zero.
    pub forks: Vec<ForkEra>,
    /// Same-algorithm ancestors examined by the difficulty retarget.
    pub retarget_window: u64,
    /// Retarget clamp: actual timespan is bounded within
    /// `[target/factor, target*factor]`.
    pub max_adjustment_factor: u64,
    /// Ordered one-time disbursement list for the hard-fork block.
    pub hard_fork_payees: Vec<Payee>,
    /// Exact core-development fund amount in the hard-fork coinbase.
    pub core_amount: Amount,
    /// Ordered core public keys embedded in the core-fund script.
    pub core_pubkeys: Vec<Vec<u8>>,
}

impl ChainParams {
    /// Index of the fork era in effect at `height`.
    pub fn fork_era(&self, height: u64) -> usize {
        let mut era = 0;
        for (i, fork) in self.forks.iter().enumerate() {
            if height >= fork.activation_height {
                era = i;
            }
        }
        era
    }

    /// Hard-fork activation height, if a second era is configured.
    pub fn hard_fork_height(&self) -> Option<u64> {
        self.forks.get(1).map(|f| f.activation_height)
    }

    /// Whether `height` is exactly the one-time disbursement block.
    pub fn is_hard_fork_height(&self, height: u64) -> bool {
        self.hard_fork_height() == Some(height)
    }

    /// The algorithm a block of `version` at `height` was mined with. An
    /// unrecognized version maps to the era's first algorithm.
    pub fn algo_for_version(&self, version: i32, height: u64) -> &AlgoSpec {
        let era = &self.forks[self.fork_era(height)];
        era.algos
            .iter()
            .find(|a| a.version == version)
            .unwrap_or(&era.algos[0])
    }

    /// Look up an algorithm by name within the era at `height`.
    pub fn algo(&self, name: &str, height: u64) -> &AlgoSpec {
        let era = &self.forks[self.fork_era(height)];
        era.algos
            .iter()
            .find(|a| a.name == name)
            .unwrap_or(&era.algos[0])
    }

    /// Compact proof-of-work limit for `name` at `height`.
    pub fn pow_limit_bits(&self, name: &str, height: u64) -> u32 {
        self.algo(name, height).min_bits
    }

    /// Whether the node at (height, hash) is exempt from the
    /// duplicate-output scan.
    pub fn is_bip30_exception(&self, height: u64, hash: &Hash) -> bool {
        self.bip30_exceptions
            .iter()
            .any(|(h, ex)| *h == height && ex == hash)
    }

    /// Main network parameters.
    pub fn mainnet() -> ChainParams {
        ChainParams {
            network: Network::Main,
            genesis_hash: hash_literal(
                "00000000dc6f180359b357eb2e86577ad25fdd28fdbfc4d3a0f4a4bc0fa521ef",
            ),
            base_subsidy: 2 * crate::constants::UNITS_PER_COIN,
            subsidy_halving_interval: 210_000,
            coinbase_maturity: 100,
            bip16_activation_time: 1_333_238_400,
            bip34_height: 100_000,
            bip65_height: 120_000,
            bip66_height: 110_000,
            miner_confirmation_window: 2_016,
            rule_change_activation_threshold: 1_916,
            deployments: [
                // Csv
                Deployment { bit: 0, start_time: 1_462_060_800, expire_time: 1_493_596_800 },
                // Segwit
                Deployment { bit: 1, start_time: 1_479_168_000, expire_time: 1_510_704_000 },
            ],
            checkpoints: vec![],
            bip30_exceptions: vec![
                (
                    91_842,
                    hash_literal(
                        "00000000000a4d0a398161ffc163c503763b1f4360639393e0e4c8e300e0caec",
                    ),
                ),
                (
                    91_880,
                    hash_literal(
                        "00000000000743f190a18c5577a3c2d2a1f610ae9601ac046a38084ccb7cd721",
                    ),
                ),
            ],
            forks: vec![
                ForkEra {
                    activation_height: 0,
                    algos: vec![
                        AlgoSpec {
                            name: "sha256d",
                            version: 2,
                            min_bits: 0x1d00ffff,
                            target_spacing: 300,
                            version_interval: 300,
                            pow_hash: sha256d_pow_hash,
                        },
                        AlgoSpec {
                            name: "scrypt",
                            version: 514,
                            min_bits: 0x1e0fffff,
                            target_spacing: 300,
                            version_interval: 300,
                            pow_hash: sha256d_pow_hash,
                        },
                    ],
                },
                ForkEra {
                    activation_height: 250_000,
                    algos: vec![
                        AlgoSpec {
                            name: "sha256d",
                            version: 2,
                            min_bits: 0x1d00ffff,
                            target_spacing: 600,
                            version_interval: 2_700,
                            pow_hash: sha256d_pow_hash,
                        },
                        AlgoSpec {
                            name: "scrypt",
                            version: 514,
                            min_bits: 0x1e0fffff,
                            target_spacing: 600,
                            version_interval: 2_700,
                            pow_hash: sha256d_pow_hash,
                        },
                    ],
                },
            ],
            retarget_window: 10,
            max_adjustment_factor: 4,
            hard_fork_payees: vec![
                Payee { amount: 1_000_000_000_000, script_address: [0x11; 20] },
                Payee { amount: 500_000_000_000, script_address: [0x22; 20] },
                Payee { amount: 250_000_000_000, script_address: [0x33; 20] },
                Payee { amount: 125_000_000_000, script_address: [0x44; 20] },
            ],
            core_amount: 2_000_000_000_000,
            core_pubkeys: vec![
                core_key(0x02, 0xa1),
                core_key(0x03, 0xb2),
                core_key(0x02, 0xc3),
            ],
        }
    }

    /// Test network parameters: shorter windows, lower thresholds, small
    /// disbursement.
    pub fn testnet() -> ChainParams {
        let mut params = ChainParams::mainnet();
        params.network = Network::Testnet;
        params.genesis_hash = hash_literal(
            "000000071f8cdbb59d9a03f2f1a5ee8470e5ed0b9b7f5d6b3b4f1d3c8f6a9b21",
        );
        params.coinbase_maturity = 100;
        params.miner_confirmation_window = 100;
        params.rule_change_activation_threshold = 75;
        params.bip34_height = 21;
        params.bip65_height = 581;
        params.bip66_height = 330;
        params.bip30_exceptions = vec![];
        params.forks[1].activation_height = 100;
        params.hard_fork_payees = vec![
            Payee { amount: 10_000_000_000, script_address: [0x55; 20] },
            Payee { amount: 5_000_000_000, script_address: [0x66; 20] },
        ];
        params.core_amount = 20_000_000_000;
        params
    }
}

fn hash_literal(s: &str) -> Hash {
    s.parse().expect("invalid hash literal in chain params")
}

fn core_key(prefix: u8, fill: u8) -> Vec<u8> {
    let mut key = vec![prefix];
    key.extend_from_slice(&[fill; 32]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_era_selection() {
        let params = ChainParams::mainnet();
        assert_eq!(params.fork_era(0), 0);
        assert_eq!(params.fork_era(249_999), 0);
        assert_eq!(params.fork_era(250_000), 1);
        assert_eq!(params.fork_era(1_000_000), 1);
        assert!(params.is_hard_fork_height(250_000));
        assert!(!params.is_hard_fork_height(250_001));
    }

    #[test]
    fn algo_lookup_by_version_and_name() {
        let params = ChainParams::mainnet();
        assert_eq!(params.algo_for_version(514, 0).name, "scrypt");
        assert_eq!(params.algo_for_version(2, 0).name, "sha256d");
        // Unknown versions fall back to the era's first algorithm.
        assert_eq!(params.algo_for_version(7, 0).name, "sha256d");
        assert_eq!(params.algo("scrypt", 0).min_bits, 0x1e0fffff);
    }

    #[test]
    fn bip30_exceptions_match_height_and_hash() {
        let params = ChainParams::mainnet();
        let (height, hash) = params.bip30_exceptions[0];
        assert!(params.is_bip30_exception(height, &hash));
        assert!(!params.is_bip30_exception(height + 1, &hash));
        assert!(!params.is_bip30_exception(height, &Hash::ZERO));
    }

    #[test]
    fn checkpoints_serialize_as_json() {
        let table = vec![
            Checkpoint { height: 11_111, hash: Hash([7; 32]) },
            Checkpoint { height: 33_333, hash: Hash([9; 32]) },
        ];
        let encoded = serde_json::to_string(&table).unwrap();
        let decoded: Vec<Checkpoint> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, table);
    }
}
