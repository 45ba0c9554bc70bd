use alloy_primitives::{b256, Address, B256, U256};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::EventHandler;
use crate::event_decoder::DecodedEvent;
use crate::store::StoreTransaction;
use crate::types::{EventPayload, ProcessedEvent};

// uint256 values travel as decimal text and are cast to NUMERIC(78,0) server-side
const INSERT_ROUND: &str = r#"
    INSERT INTO rounds (round_id, ticket_price, prizes, end_block)
    VALUES ($1::TEXT::NUMERIC, $2::TEXT::NUMERIC, $3::jsonb, $4::TEXT::NUMERIC)
    ON CONFLICT (round_id) DO NOTHING
"#;

const ENSURE_USER: &str = r#"
    INSERT INTO users (address) VALUES ($1)
    ON CONFLICT (address) DO NOTHING
"#;

const INSERT_TICKET: &str = r#"
    INSERT INTO tickets (ticket_id, round_id, buyer, event_tx_id, event_log_index)
    VALUES ($1::TEXT::NUMERIC, $2::TEXT::NUMERIC, $3, $4, $5)
    ON CONFLICT (ticket_id, round_id) DO NOTHING
"#;

const INCREASE_PRIZE_POOL: &str = r#"
    UPDATE rounds
    SET prize_pool = prize_pool + $2::TEXT::NUMERIC
    WHERE round_id = $1::TEXT::NUMERIC
"#;

const REVEAL_ROUND: &str = r#"
    UPDATE rounds SET revealed = TRUE WHERE round_id = $1::TEXT::NUMERIC
"#;

const INSERT_WINNER: &str = r#"
    INSERT INTO winners (round_id, position, winner, prize_won)
    VALUES ($1::TEXT::NUMERIC, $2, $3, $4::TEXT::NUMERIC)
    ON CONFLICT (round_id, position) DO NOTHING
"#;

const GRANT_ROLE: &str = r#"
    INSERT INTO user_roles (user_address, role, event_tx_id, event_log_index)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (user_address, role) DO NOTHING
"#;

const REVOKE_ROLE: &str = r#"
    DELETE FROM user_roles WHERE user_address = $1 AND role = $2
"#;

const OPERATOR_ROLE: B256 = b256!("97667070c54ef182b0f5858b034beac1b6f3089aa2d3188bb1e8929f4fa9b929");
const TREASURER_ROLE: B256 = b256!("3496e2e73c4d42b75d702e60d9e48102720b8691234415963a5a857b86425d07");
const PAUSER_ROLE: B256 = b256!("65d7a28e3265b37a6474929f336521b332c1681b933f6cb9f3376673440d862a");

/// Maps an AccessControl role hash to the name stored in `user_roles`.
pub fn role_name(role: B256) -> &'static str {
    match role {
        B256::ZERO => "DEFAULT_ADMIN_ROLE",
        OPERATOR_ROLE => "OPERATOR_ROLE",
        TREASURER_ROLE => "TREASURER_ROLE",
        PAUSER_ROLE => "PAUSER_ROLE",
        _ => "UNKNOWN",
    }
}

fn address_text(address: Address) -> String {
    format!("{:#x}", address)
}

/// Maintains rounds, tickets, winners and roles of the lottery contract.
pub struct LotteryHandler;

impl LotteryHandler {
    async fn round_created(
        &self,
        event: &DecodedEvent,
        tx: &mut (dyn StoreTransaction + '_),
    ) -> anyhow::Result<()> {
        let round_id = event.uint("roundId")?.to_string();
        let ticket_price = event.uint("ticketPrice")?.to_string();
        let end_block = event.uint("endBlock")?.to_string();
        let prizes = Value::Array(
            event
                .uint_array("prizes")?
                .iter()
                .map(|p| Value::String(p.to_string()))
                .collect(),
        );

        tx.execute(INSERT_ROUND, &[&round_id, &ticket_price, &prizes, &end_block])
            .await?;
        info!(round_id = %round_id, "Round created");
        Ok(())
    }

    async fn ticket_purchased(
        &self,
        event: &DecodedEvent,
        payload: &EventPayload,
        tx: &mut (dyn StoreTransaction + '_),
    ) -> anyhow::Result<()> {
        let ticket_id = event.uint("ticketId")?.to_string();
        let round_id = event.uint("roundId")?.to_string();
        let buyer = address_text(event.address("buyer")?);
        let price = event.uint("price")?.to_string();
        let tx_id = format!("{:#x}", payload.tx_id);
        let log_index = i32::try_from(payload.log_index)?;

        tx.execute(ENSURE_USER, &[&buyer]).await?;
        tx.execute(INSERT_TICKET, &[&ticket_id, &round_id, &buyer, &tx_id, &log_index])
            .await?;
        tx.execute(INCREASE_PRIZE_POOL, &[&round_id, &price]).await?;

        info!(ticket_id = %ticket_id, round_id = %round_id, "Ticket saved and prize pool updated");
        Ok(())
    }

    async fn amount_increased(
        &self,
        event: &DecodedEvent,
        tx: &mut (dyn StoreTransaction + '_),
    ) -> anyhow::Result<()> {
        let round_id = event.uint("roundId")?.to_string();
        let amount = event.uint("amount")?.to_string();

        tx.execute(INCREASE_PRIZE_POOL, &[&round_id, &amount]).await?;
        info!(round_id = %round_id, amount = %amount, "Prize pool increased");
        Ok(())
    }

    async fn round_revealed(
        &self,
        event: &DecodedEvent,
        tx: &mut (dyn StoreTransaction + '_),
    ) -> anyhow::Result<()> {
        let round_id = event.uint("roundId")?.to_string();
        let winners = event.address_array("winners")?;
        let prizes = event.uint_array("prizes")?;

        for winner in &winners {
            tx.execute(ENSURE_USER, &[&address_text(*winner)]).await?;
        }

        tx.execute(REVEAL_ROUND, &[&round_id]).await?;

        for (index, winner) in winners.iter().enumerate() {
            let position = i32::try_from(index + 1)?;
            let prize = prizes.get(index).copied().unwrap_or(U256::ZERO).to_string();
            tx.execute(
                INSERT_WINNER,
                &[&round_id, &position, &address_text(*winner), &prize],
            )
            .await?;
        }

        info!(round_id = %round_id, winners = winners.len(), "Round revealed");
        Ok(())
    }

    async fn role_granted(
        &self,
        event: &DecodedEvent,
        payload: &EventPayload,
        tx: &mut (dyn StoreTransaction + '_),
    ) -> anyhow::Result<()> {
        let role = role_name(event.fixed_bytes("role")?);
        let account = address_text(event.address("account")?);
        let tx_id = format!("{:#x}", payload.tx_id);
        let log_index = i32::try_from(payload.log_index)?;

        tx.execute(ENSURE_USER, &[&account]).await?;
        tx.execute(GRANT_ROLE, &[&account, &role, &tx_id, &log_index])
            .await?;
        info!(account = %account, role, "Role granted");
        Ok(())
    }

    async fn role_revoked(
        &self,
        event: &DecodedEvent,
        tx: &mut (dyn StoreTransaction + '_),
    ) -> anyhow::Result<()> {
        let role = role_name(event.fixed_bytes("role")?);
        let account = address_text(event.address("account")?);

        tx.execute(REVOKE_ROLE, &[&account, &role]).await?;
        info!(account = %account, role, "Role revoked");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for LotteryHandler {
    async fn handle(
        &self,
        event: &DecodedEvent,
        payload: &EventPayload,
        tx: &mut (dyn StoreTransaction + '_),
    ) -> anyhow::Result<Option<ProcessedEvent>> {
        debug!(block = payload.block_number, "Lottery {} received", event.name);

        match event.name.as_str() {
            "RoundCreated" => self.round_created(event, tx).await?,
            "TicketPurchased" => self.ticket_purchased(event, payload, tx).await?,
            "AmountIncreased" => self.amount_increased(event, tx).await?,
            // Configuration change for the next round, recorded but not materialized
            "NextRoundDetailsUpdated" => {
                info!(block = payload.block_number, "Next round details updated")
            }
            "RoundRevealed" => self.round_revealed(event, tx).await?,
            "RoleGranted" => self.role_granted(event, payload, tx).await?,
            "RoleRevoked" => self.role_revoked(event, tx).await?,
            other => {
                info!(block = payload.block_number, "Unhandled Lottery event: {}", other);
                return Ok(None);
            }
        }

        Ok(Some(ProcessedEvent {
            event_name: event.name.clone(),
            decoded: event.args_json(),
        }))
    }
}
