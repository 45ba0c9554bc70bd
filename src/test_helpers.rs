use std::sync::{Arc, Mutex};

use alloy_json_abi::JsonAbi;
use alloy_primitives::{keccak256, Address, Bytes, B256};
use alloy_sol_types::{sol, SolEvent};
use async_trait::async_trait;

use crate::event_decoder::DecodedEvent;
use crate::handlers::EventHandler;
use crate::store::StoreTransaction;
use crate::types::{EventPayload, ProcessedEvent, RawLog};

mod lottery_events {
    alloy_sol_types::sol! {
        event RoundCreated(uint256 indexed roundId, uint256 ticketPrice, uint256[] prizes, uint256 endBlock);
        event TicketPurchased(uint256 indexed ticketId, address indexed buyer, uint256 indexed roundId, uint256 price);
        event AmountIncreased(uint256 indexed roundId, uint256 amount);
        event NextRoundDetailsUpdated(uint256 oldPrice, uint256 newPrice, uint256[] newPrizes);
        event RoundRevealed(uint256 indexed roundId, address[] winners, uint256[] prizes, uint256 totalPrize);
        event RoleGranted(bytes32 indexed role, address indexed account, address indexed sender);
        event RoleRevoked(bytes32 indexed role, address indexed account, address indexed sender);
    }
}

mod xallocation_events {
    alloy_sol_types::sol! {
        event RoundCreated(uint256 roundId, address proposer, uint48 voteStart, uint48 voteEnd, bytes32[] appsIds);
    }
}

pub use lottery_events::*;
pub use xallocation_events::RoundCreated as XRoundCreated;

sol! {
    event Unrelated(uint256 value);
}

pub fn lottery_abi() -> JsonAbi {
    crate::abi::parse_abi(include_bytes!("../abis/Lottery.json")).unwrap()
}

pub fn xallocation_abi() -> JsonAbi {
    crate::abi::parse_abi(include_bytes!("../abis/XAllocationVoting.json")).unwrap()
}

pub fn tx_id_for(block: u64, log_index: u32) -> B256 {
    keccak256(format!("{block}:{log_index}"))
}

/// A payload carrying `event` as emitted by `contract`.
pub fn payload_for<E: SolEvent>(contract: Address, event: &E, block: u64, log_index: u32) -> EventPayload {
    let log_data = event.encode_log_data();
    EventPayload {
        block_number: block,
        block_timestamp: 1_700_000_000 + block * 10,
        log_index,
        clause_index: 0,
        tx_id: tx_id_for(block, log_index),
        tx_origin: Address::repeat_byte(0xee),
        contract_address: contract,
        raw: RawLog {
            topics: log_data.topics().to_vec(),
            data: log_data.data,
        },
    }
}

/// `AmountIncreased(roundId = block, amount = log_index)` emitted by `contract`.
pub fn amount_increased_payload(contract: Address, block: u64, log_index: u32) -> EventPayload {
    let event = AmountIncreased {
        roundId: alloy_primitives::U256::from(block),
        amount: alloy_primitives::U256::from(log_index),
    };
    payload_for(contract, &event, block, log_index)
}

/// A payload whose log matches no event of the shipped ABIs.
pub fn undecodable_payload(contract: Address, block: u64, log_index: u32) -> EventPayload {
    EventPayload {
        block_number: block,
        block_timestamp: 1_700_000_000 + block * 10,
        log_index,
        clause_index: 0,
        tx_id: tx_id_for(block, log_index),
        tx_origin: Address::repeat_byte(0xee),
        contract_address: contract,
        raw: RawLog {
            topics: vec![Unrelated::SIGNATURE_HASH],
            data: Bytes::from(vec![0u8; 32]),
        },
    }
}

/// Records every call and returns a `ProcessedEvent` named after the decoded event.
#[derive(Default)]
pub struct RecordingHandler {
    pub seen: Arc<Mutex<Vec<(u64, u32)>>>,
    pub skip: bool,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(
        &self,
        event: &DecodedEvent,
        payload: &EventPayload,
        _tx: &mut (dyn StoreTransaction + '_),
    ) -> anyhow::Result<Option<ProcessedEvent>> {
        self.seen
            .lock()
            .unwrap()
            .push((payload.block_number, payload.log_index));

        if self.skip {
            return Ok(None);
        }
        Ok(Some(ProcessedEvent {
            event_name: event.name.clone(),
            decoded: event.args_json(),
        }))
    }
}

/// Fails every call with a plain handler error.
#[derive(Default)]
pub struct FailingHandler {
    pub calls: Arc<Mutex<usize>>,
}

#[async_trait]
impl EventHandler for FailingHandler {
    async fn handle(
        &self,
        _event: &DecodedEvent,
        _payload: &EventPayload,
        _tx: &mut (dyn StoreTransaction + '_),
    ) -> anyhow::Result<Option<ProcessedEvent>> {
        *self.calls.lock().unwrap() += 1;
        Err(anyhow::anyhow!("handler exploded"))
    }
}
