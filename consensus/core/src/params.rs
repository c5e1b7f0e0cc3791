//! Per-network consensus parameters relevant to indexing: stake pool
//! geometry, maturity windows, activation heights, and the agenda
//! deployment table with its lifecycle milestones.

use std::collections::HashMap;

use crate::errors::ChainError;
use crate::Atoms;

/// One selectable outcome of an agenda vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgendaChoice {
    pub id: String,
    /// Bit pattern within the agenda's mask that selects this choice.
    pub bits: u16,
}

/// A consensus rule-change deployment voted on through vote bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agenda {
    pub id: String,
    pub vote_version: u32,
    pub mask: u16,
    pub choices: Vec<AgendaChoice>,
}

/// Block heights at which an agenda crossed each lifecycle milestone.
/// Heights of 0 mean the milestone has not occurred on this network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgendaMilestones {
    pub locked_in: u32,
    pub activated: u32,
    pub hard_forked: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub name: &'static str,
    /// Default JSON-RPC port of a `vantad` node on this network.
    pub rpc_port: u16,
    pub tickets_per_block: u16,
    pub ticket_pool_size: u32,
    /// Blocks before a purchased ticket enters the live pool.
    pub ticket_maturity: u32,
    /// Blocks a live ticket may wait before it expires unvoted.
    pub ticket_expiry: u32,
    pub coinbase_maturity: u32,
    /// Height at which tickets may first be purchased.
    pub stake_enabled_height: u32,
    /// Height at which votes become required and miss accounting begins.
    pub stake_validation_height: u32,
    pub stake_diff_window_size: u32,
    pub minimum_stake_diff: Atoms,
    pub deployments: Vec<Agenda>,
    milestones: HashMap<String, AgendaMilestones>,
}

impl ChainParams {
    pub fn mainnet() -> Self {
        let deployments = vec![
            Agenda {
                id: "sdiffalgorithm".into(),
                vote_version: 7,
                mask: 0x0006,
                choices: vec![
                    AgendaChoice { id: "abstain".into(), bits: 0x0000 },
                    AgendaChoice { id: "no".into(), bits: 0x0002 },
                    AgendaChoice { id: "yes".into(), bits: 0x0004 },
                ],
            },
            Agenda {
                id: "lnsupport".into(),
                vote_version: 7,
                mask: 0x0018,
                choices: vec![
                    AgendaChoice { id: "abstain".into(), bits: 0x0000 },
                    AgendaChoice { id: "no".into(), bits: 0x0008 },
                    AgendaChoice { id: "yes".into(), bits: 0x0010 },
                ],
            },
        ];
        let mut milestones = HashMap::new();
        milestones.insert(
            "sdiffalgorithm".to_string(),
            AgendaMilestones { locked_in: 149_248, activated: 157_312, hard_forked: 149_328 },
        );
        milestones.insert(
            "lnsupport".to_string(),
            AgendaMilestones { locked_in: 141_184, activated: 149_248, hard_forked: 0 },
        );
        ChainParams {
            name: "mainnet",
            rpc_port: 14010,
            tickets_per_block: 5,
            ticket_pool_size: 8192,
            ticket_maturity: 512,
            ticket_expiry: 40_960,
            coinbase_maturity: 512,
            stake_enabled_height: 1024,
            stake_validation_height: 4096,
            stake_diff_window_size: 288,
            minimum_stake_diff: 2 * crate::ATOMS_PER_COIN,
            deployments,
            milestones,
        }
    }

    pub fn testnet() -> Self {
        ChainParams {
            name: "testnet",
            rpc_port: 12010,
            tickets_per_block: 5,
            ticket_pool_size: 1024,
            ticket_maturity: 16,
            ticket_expiry: 6144,
            coinbase_maturity: 16,
            stake_enabled_height: 32,
            stake_validation_height: 768,
            stake_diff_window_size: 144,
            minimum_stake_diff: crate::ATOMS_PER_COIN / 5,
            milestones: HashMap::new(),
            ..Self::mainnet()
        }
    }

    pub fn simnet() -> Self {
        ChainParams {
            name: "simnet",
            rpc_port: 13010,
            tickets_per_block: 5,
            ticket_pool_size: 64,
            ticket_maturity: 16,
            ticket_expiry: 384,
            coinbase_maturity: 16,
            stake_enabled_height: 32,
            stake_validation_height: 144,
            stake_diff_window_size: 8,
            minimum_stake_diff: 20_000,
            milestones: HashMap::new(),
            ..Self::mainnet()
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ChainError> {
        match name {
            "mainnet" => Ok(Self::mainnet()),
            "testnet" => Ok(Self::testnet()),
            "simnet" => Ok(Self::simnet()),
            other => Err(ChainError::UnknownNetwork(other.to_string())),
        }
    }

    /// Lifecycle milestones for an agenda, if any have occurred on this
    /// network.
    pub fn voting_milestones(&self, agenda_id: &str) -> Option<AgendaMilestones> {
        self.milestones.get(agenda_id).copied()
    }

    /// First height at which ticket purchases in a block at `purchase_height`
    /// are live.
    pub fn maturity_height(&self, purchase_height: u32) -> u32 {
        purchase_height + self.ticket_maturity
    }

    /// Height at which a still-unvoted ticket purchased at `purchase_height`
    /// expires.
    pub fn expiry_height(&self, purchase_height: u32) -> u32 {
        purchase_height + self.ticket_maturity + self.ticket_expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_lookup() {
        assert_eq!(ChainParams::from_name("mainnet").unwrap().name, "mainnet");
        assert_eq!(ChainParams::from_name("simnet").unwrap().tickets_per_block, 5);
        assert!(ChainParams::from_name("nonesuch").is_err());
    }

    #[test]
    fn maturity_windows() {
        let p = ChainParams::mainnet();
        assert_eq!(p.maturity_height(100), 612);
        assert_eq!(p.expiry_height(100), 612 + 40_960);
    }

    #[test]
    fn milestones_present_on_mainnet_only() {
        assert!(ChainParams::mainnet().voting_milestones("lnsupport").is_some());
        assert!(ChainParams::testnet().voting_milestones("lnsupport").is_none());
    }
}
