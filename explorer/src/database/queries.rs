//! Read operations over the relational mirror: the query layer consumed by
//! the presentation collaborators, plus the lookups the sync engine and
//! reorg coordinator drive.
//!
//! Queries never retry; the caller's deadline governs. Wrap any of these in
//! [`with_timeout`] to surface `ExplorerError::DbTimeout` for a 503.

use std::future::Future;
use std::time::Duration;

use tracing::error;

use consensus_core::Hash;

use crate::charts::{ChartData, ChartType};
use crate::database::ChainDb;
use crate::error::{ExplorerError, Result};
use crate::models::*;

/// Enforce a caller-supplied deadline on a query future. On expiry the
/// future is dropped, which releases its pool connection; no transaction is
/// left open because reads run in auto-commit mode.
pub async fn with_timeout<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(res) => res,
        Err(_) => Err(ExplorerError::DbTimeout),
    }
}

impl ChainDb {
    /// Best main-chain block, if any blocks are stored.
    pub async fn best_block(&self) -> Result<Option<(i64, Hash)>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT height, hash FROM blocks WHERE is_mainchain = TRUE
             ORDER BY height DESC LIMIT 1;",
        )
        .fetch_optional(self.pool())
        .await?;
        parse_height_hash(row)
    }

    /// Best stored block regardless of chain, for recovery inspection.
    pub async fn best_block_any(&self) -> Result<Option<(i64, Hash)>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT height, hash FROM blocks ORDER BY height DESC LIMIT 1;")
                .fetch_optional(self.pool())
                .await?;
        parse_height_hash(row)
    }

    /// Main-chain block hash at a height. Not-found is an expected
    /// sentinel.
    pub async fn block_hash_at(&self, height: i64) -> Result<Hash> {
        let hash: Option<String> = sqlx::query_scalar(
            "SELECT hash FROM blocks WHERE height = $1 AND is_mainchain = TRUE LIMIT 1;",
        )
        .bind(height)
        .fetch_optional(self.pool())
        .await?;
        match hash {
            Some(h) => h
                .parse()
                .map_err(|_| ExplorerError::Integrity(format!("bad hash at height {height}"))),
            None => Err(ExplorerError::NotFound(format!("no main-chain block at {height}"))),
        }
    }

    pub async fn block_height(&self, hash: Hash) -> Result<i64> {
        let height: Option<i64> = sqlx::query_scalar("SELECT height FROM blocks WHERE hash = $1 LIMIT 1;")
            .bind(hash.to_string())
            .fetch_optional(self.pool())
            .await?;
        height.ok_or_else(|| ExplorerError::NotFound(format!("block {hash}")))
    }

    pub async fn block_flags(&self, hash: Hash) -> Result<(bool, bool)> {
        let flags: Option<(bool, bool)> =
            sqlx::query_as("SELECT is_valid, is_mainchain FROM blocks WHERE hash = $1 LIMIT 1;")
                .bind(hash.to_string())
                .fetch_optional(self.pool())
                .await?;
        flags.ok_or_else(|| ExplorerError::NotFound(format!("block {hash}")))
    }

    /// Chain placement of a block, including the recorded next hash on its
    /// branch.
    pub async fn block_status(&self, hash: Hash) -> Result<BlockStatus> {
        let row: Option<(String, String, Option<String>, i64, bool, bool)> = sqlx::query_as(
            "SELECT b.hash, b.previous_hash, bc.next_hash, b.height, b.is_valid, b.is_mainchain
             FROM blocks b LEFT JOIN block_chain bc ON bc.this_hash = b.hash
             WHERE b.hash = $1 LIMIT 1;",
        )
        .bind(hash.to_string())
        .fetch_optional(self.pool())
        .await?;
        let (hash, previous_hash, next_hash, height, is_valid, is_mainchain) =
            row.ok_or_else(|| ExplorerError::NotFound(format!("block {hash}")))?;
        Ok(BlockStatus { hash, previous_hash, next_hash, height, is_valid, is_mainchain })
    }

    /// All known side-chain blocks, by descending height.
    pub async fn side_chain_blocks(&self) -> Result<Vec<BlockStatus>> {
        self.block_status_listing(
            "SELECT b.hash, b.previous_hash, bc.next_hash, b.height, b.is_valid, b.is_mainchain
             FROM blocks b LEFT JOIN block_chain bc ON bc.this_hash = b.hash
             WHERE b.is_mainchain = FALSE ORDER BY b.height DESC;",
        )
        .await
    }

    /// Side-chain blocks that no stored block extends.
    pub async fn side_chain_tips(&self) -> Result<Vec<BlockStatus>> {
        self.block_status_listing(
            "SELECT b.hash, b.previous_hash, bc.next_hash, b.height, b.is_valid, b.is_mainchain
             FROM blocks b LEFT JOIN block_chain bc ON bc.this_hash = b.hash
             WHERE b.is_mainchain = FALSE AND (bc.next_hash IS NULL OR bc.next_hash = '')
             ORDER BY b.height DESC;",
        )
        .await
    }

    /// Main-chain blocks whose regular transactions were invalidated by
    /// stakeholder disapproval.
    pub async fn disapproved_blocks(&self) -> Result<Vec<BlockStatus>> {
        self.block_status_listing(
            "SELECT b.hash, b.previous_hash, bc.next_hash, b.height, b.is_valid, b.is_mainchain
             FROM blocks b LEFT JOIN block_chain bc ON bc.this_hash = b.hash
             WHERE b.is_valid = FALSE ORDER BY b.height DESC;",
        )
        .await
    }

    async fn block_status_listing(&self, stmt: &str) -> Result<Vec<BlockStatus>> {
        let rows: Vec<(String, String, Option<String>, i64, bool, bool)> =
            sqlx::query_as(stmt).fetch_all(self.pool()).await?;
        Ok(rows
            .into_iter()
            .map(|(hash, previous_hash, next_hash, height, is_valid, is_mainchain)| BlockStatus {
                hash,
                previous_hash,
                next_hash,
                height,
                is_valid,
                is_mainchain,
            })
            .collect())
    }

    // --- address queries ---

    /// Spent/unspent totals for an address, plus the distinct spending
    /// transaction count (merged debits).
    pub async fn address_balance(&self, address: &str) -> Result<AddressBalance> {
        let rows: Vec<(i64, Option<i64>, bool, bool)> = sqlx::query_as(
            "SELECT COUNT(*), SUM(value), is_funding, (matching_tx_hash IS NULL)
             FROM addresses
             WHERE address = $1 AND valid_mainchain = TRUE
             GROUP BY is_funding, (matching_tx_hash IS NULL);",
        )
        .bind(address)
        .fetch_all(self.pool())
        .await?;

        let mut balance = AddressBalance::default();
        for (count, total, is_funding, no_matching) in rows {
            let total = total.unwrap_or_default();
            if is_funding && no_matching {
                balance.num_unspent = count;
                balance.amt_unspent = total;
            }
            if !is_funding {
                if no_matching {
                    error!("spending rows with matching_tx_hash unset for {address}");
                    continue;
                }
                balance.num_spent += count;
                balance.amt_spent += total;
            }
        }

        let merged: Option<i64> = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT tx_hash) FROM addresses
             WHERE address = $1 AND is_funding = FALSE AND valid_mainchain = TRUE;",
        )
        .bind(address)
        .fetch_one(self.pool())
        .await?;
        balance.num_merged_spent = merged.unwrap_or_default();
        Ok(balance)
    }

    /// Unspent outputs paying to an address. Confirmations are computed
    /// against the supplied current height.
    pub async fn address_utxos(&self, address: &str, current_height: i64) -> Result<Vec<AddressUtxo>> {
        let rows: Vec<(String, String, i64, i64, Vec<u8>, i32)> = sqlx::query_as(
            "SELECT a.address, a.tx_hash, a.value, t.block_height, v.pkscript, v.tx_index
             FROM addresses a
             JOIN vouts v ON a.vin_vout_db_id = v.id
             JOIN transactions t ON t.tx_hash = a.tx_hash AND t.is_mainchain = TRUE
             WHERE a.address = $1 AND a.is_funding = TRUE
               AND a.matching_tx_hash IS NULL AND a.valid_mainchain = TRUE
             ORDER BY a.block_time DESC;",
        )
        .bind(address)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(address, tx_hash, atoms, height, pkscript, vout)| AddressUtxo {
                address,
                tx_hash,
                vout,
                script_pub_key: hex::encode(pkscript),
                atoms,
                height,
                confirmations: current_height - height + 1,
            })
            .collect())
    }

    /// Address history ordered by block time descending. The merged-debits
    /// view collapses rows sharing a spending transaction into one row
    /// with `merged_count` populated.
    pub async fn address_history(
        &self,
        address: &str,
        limit: i64,
        offset: i64,
        view: AddrTxViewType,
    ) -> Result<Vec<AddressHistoryRow>> {
        if view == AddrTxViewType::MergedDebits {
            let rows: Vec<(String, bool, i64, i64, i64)> = sqlx::query_as(
                "SELECT tx_hash, BOOL_AND(valid_mainchain), MAX(block_time), SUM(value), COUNT(*)
                 FROM addresses
                 WHERE address = $1 AND is_funding = FALSE
                 GROUP BY tx_hash
                 ORDER BY MAX(block_time) DESC
                 LIMIT $2 OFFSET $3;",
            )
            .bind(address)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;
            return Ok(rows
                .into_iter()
                .map(|(tx_hash, valid_mainchain, block_time, value, merged_count)| AddressHistoryRow {
                    address: address.to_string(),
                    tx_hash,
                    matching_tx_hash: None,
                    value,
                    block_time,
                    is_funding: false,
                    valid_mainchain,
                    merged_count,
                })
                .collect());
        }

        let filter = match view {
            AddrTxViewType::All => "",
            AddrTxViewType::Credits => "AND is_funding = TRUE",
            AddrTxViewType::Debits => "AND is_funding = FALSE",
            AddrTxViewType::MergedDebits => unreachable!(),
        };
        let stmt = format!(
            "SELECT tx_hash, matching_tx_hash, value, block_time, is_funding, valid_mainchain
             FROM addresses
             WHERE address = $1 {filter}
             ORDER BY block_time DESC
             LIMIT $2 OFFSET $3;"
        );
        let rows: Vec<(String, Option<String>, i64, i64, bool, bool)> = sqlx::query_as(&stmt)
            .bind(address)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|(tx_hash, matching_tx_hash, value, block_time, is_funding, valid_mainchain)| {
                AddressHistoryRow {
                    address: address.to_string(),
                    tx_hash,
                    matching_tx_hash,
                    value,
                    block_time,
                    is_funding,
                    valid_mainchain,
                    merged_count: 0,
                }
            })
            .collect())
    }

    /// Every block placement of a transaction, best placement first: a
    /// transaction may appear in multiple blocks across forks, so
    /// main-chain and valid placements sort ahead.
    pub async fn tx_block_placements(&self, tx_hash: Hash) -> Result<Vec<TxBlockPlacement>> {
        let rows: Vec<(String, i64, i32, bool, bool)> = sqlx::query_as(
            "SELECT block_hash, block_height, block_index, is_valid, is_mainchain
             FROM transactions WHERE tx_hash = $1
             ORDER BY is_mainchain DESC, is_valid DESC, block_height DESC;",
        )
        .bind(tx_hash.to_string())
        .fetch_all(self.pool())
        .await?;
        if rows.is_empty() {
            return Err(ExplorerError::NotFound(format!("transaction {tx_hash}")));
        }
        Ok(rows
            .into_iter()
            .map(|(block_hash, block_height, block_index, is_valid, is_mainchain)| {
                TxBlockPlacement { block_hash, block_height, block_index, is_valid, is_mainchain }
            })
            .collect())
    }

    // --- stake queries ---

    pub async fn ticket_status(&self, ticket_hash: Hash) -> Result<TicketStatus> {
        let row: Option<(TicketSpendType, TicketPoolStatus, i64, bool)> = sqlx::query_as(
            "SELECT spend_type, pool_status, block_height, is_mainchain
             FROM tickets WHERE tx_hash = $1
             ORDER BY is_mainchain DESC LIMIT 1;",
        )
        .bind(ticket_hash.to_string())
        .fetch_optional(self.pool())
        .await?;
        let (spend_type, pool_status, block_height, is_mainchain) =
            row.ok_or_else(|| ExplorerError::NotFound(format!("ticket {ticket_hash}")))?;
        Ok(TicketStatus { spend_type, pool_status, block_height, is_mainchain })
    }

    /// Tickets that were called to vote in the given block but missed.
    pub async fn missed_votes_in_block(&self, block_hash: Hash) -> Result<Vec<Hash>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT ticket_hash FROM misses WHERE block_hash = $1;")
                .bind(block_hash.to_string())
                .fetch_all(self.pool())
                .await?;
        rows.into_iter()
            .map(|h| {
                h.parse()
                    .map_err(|_| ExplorerError::Integrity(format!("bad ticket hash in misses: {h}")))
            })
            .collect()
    }

    /// Per-choice vote tallies for an agenda. By block when `by_block`,
    /// otherwise cumulative by UTC day.
    pub async fn agenda_vote_choices(&self, agenda_id: &str, by_block: bool) -> Result<AgendaVoteChoices> {
        let stmt = if by_block {
            "SELECT block_height AS bucket,
                    COUNT(*) FILTER (WHERE choice_index = 2),
                    COUNT(*) FILTER (WHERE choice_index = 0),
                    COUNT(*) FILTER (WHERE choice_index = 1),
                    COUNT(*)
             FROM agendas WHERE agenda_id = $1
             GROUP BY bucket ORDER BY bucket;"
        } else {
            "SELECT (block_time / 86400) * 86400 AS bucket,
                    COUNT(*) FILTER (WHERE choice_index = 2),
                    COUNT(*) FILTER (WHERE choice_index = 0),
                    COUNT(*) FILTER (WHERE choice_index = 1),
                    COUNT(*)
             FROM agendas WHERE agenda_id = $1
             GROUP BY bucket ORDER BY bucket;"
        };
        let rows: Vec<(i64, i64, i64, i64, i64)> = sqlx::query_as(stmt)
            .bind(agenda_id)
            .fetch_all(self.pool())
            .await?;

        let mut out = AgendaVoteChoices::default();
        let (mut yes, mut abstain, mut no, mut total) = (0i64, 0i64, 0i64, 0i64);
        for (bucket, y, a, n, t) in rows {
            if by_block {
                // Per-block tallies.
                (yes, abstain, no, total) = (y, a, n, t);
                out.height.push(bucket);
            } else {
                // Cumulative over days.
                yes += y;
                abstain += a;
                no += n;
                total += t;
                out.time.push(bucket);
            }
            out.yes.push(yes);
            out.abstain.push(abstain);
            out.no.push(no);
            out.total.push(total);
        }
        Ok(out)
    }

    /// Main-chain blocks at or past `from_height` whose votes + misses do
    /// not balance to `expected`. Empty means the stake mirror is
    /// consistent.
    pub async fn vote_miss_imbalance(&self, from_height: i64, expected: i64) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT hash, votes_n + misses_n FROM (
                 SELECT b.hash,
                        (SELECT COUNT(*) FROM votes v WHERE v.block_hash = b.hash) AS votes_n,
                        (SELECT COUNT(*) FROM misses m WHERE m.block_hash = b.hash) AS misses_n
                 FROM blocks b
                 WHERE b.is_mainchain = TRUE AND b.height >= $1
             ) t WHERE votes_n + misses_n <> $2;",
        )
        .bind(from_height)
        .bind(expected)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    // --- chart data sources ---

    pub async fn chart_data(&self, chart: ChartType) -> Result<ChartData> {
        match chart {
            ChartType::TxPerDay => self.chart_tx_per_day().await,
            ChartType::PoolSize => self.chart_block_series("pool_size").await,
            ChartType::PoolValue => self.chart_block_series("pool_value").await,
            ChartType::TicketPrice => self.chart_block_series("sbits").await,
            ChartType::ChainWork => self.chart_chain_work().await,
            ChartType::CoinSupply => self.chart_coin_supply().await,
        }
    }

    async fn chart_tx_per_day(&self) -> Result<ChartData> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT (time / 86400) * 86400 AS day, COUNT(*)
             FROM transactions WHERE is_mainchain = TRUE
             GROUP BY day ORDER BY day;",
        )
        .fetch_all(self.pool())
        .await?;
        let mut data = ChartData::default();
        for (day, count) in rows {
            data.time.push(day);
            data.value.push(count as f64);
        }
        Ok(data)
    }

    async fn chart_block_series(&self, column: &str) -> Result<ChartData> {
        let stmt = format!(
            "SELECT height, time, {column}::FLOAT8 FROM blocks
             WHERE is_mainchain = TRUE ORDER BY height;"
        );
        let rows: Vec<(i64, i64, f64)> = sqlx::query_as(&stmt).fetch_all(self.pool()).await?;
        let mut data = ChartData::default();
        for (height, time, value) in rows {
            data.height.push(height);
            data.time.push(time);
            data.value.push(value);
        }
        Ok(data)
    }

    async fn chart_chain_work(&self) -> Result<ChartData> {
        let rows: Vec<(i64, i64, String)> = sqlx::query_as(
            "SELECT height, time, chainwork FROM blocks
             WHERE is_mainchain = TRUE ORDER BY height;",
        )
        .fetch_all(self.pool())
        .await?;
        let mut data = ChartData::default();
        for (height, time, chainwork) in rows {
            data.height.push(height);
            data.time.push(time);
            data.value.push(chainwork_to_f64(&chainwork));
        }
        Ok(data)
    }

    /// Cumulative coin supply from subsidy-bearing inputs (null previous
    /// outpoints) in valid main-chain transactions.
    async fn chart_coin_supply(&self) -> Result<ChartData> {
        let zero = Hash::ZERO.to_string();
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT block_time, value_in FROM vins
             WHERE prev_out_hash = $1 AND is_mainchain = TRUE AND is_valid = TRUE
             ORDER BY block_time;",
        )
        .bind(zero)
        .fetch_all(self.pool())
        .await?;
        let mut data = ChartData::default();
        let mut sum = 0f64;
        for (time, value) in rows {
            sum += (value.max(0)) as f64;
            data.time.push(time);
            data.value.push(sum);
        }
        Ok(data)
    }
}

fn parse_height_hash(row: Option<(i64, String)>) -> Result<Option<(i64, Hash)>> {
    match row {
        None => Ok(None),
        Some((height, hash)) => {
            let hash = hash
                .parse()
                .map_err(|_| ExplorerError::Integrity(format!("bad block hash at {height}")))?;
            Ok(Some((height, hash)))
        }
    }
}

/// Big-endian hex chain-work to a lossy float for charting.
pub fn chainwork_to_f64(hex: &str) -> f64 {
    let mut value = 0f64;
    for c in hex.chars() {
        let Some(digit) = c.to_digit(16) else { return 0.0 };
        value = value * 16.0 + digit as f64;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chainwork_parses_hex_magnitudes() {
        assert_eq!(chainwork_to_f64("0"), 0.0);
        assert_eq!(chainwork_to_f64("ff"), 255.0);
        assert_eq!(chainwork_to_f64("100"), 256.0);
        assert!(chainwork_to_f64("0000000000000000000000000000000000000000000001c0509c2d9d55ea81b1") > 1e20);
        assert_eq!(chainwork_to_f64("zz"), 0.0);
    }

    #[tokio::test]
    async fn with_timeout_maps_deadline_to_db_timeout() {
        let res: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(ExplorerError::DbTimeout)));
    }
}
