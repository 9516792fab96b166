//! Durable storage for mutations awaiting replay.
//!
//! Rows are ordered by an autoincrement `seq`, which is the FIFO order replay
//! must follow. An action is only ever mutated by bumping `attempt_count`
//! (and, at the ceiling, flipping its state to `exhausted`).

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Replay state of a stored action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Eligible for automatic replay.
    Pending,
    /// Retry ceiling reached; waits for a manual retry or discard.
    Exhausted,
}

impl ActionState {
    fn as_str(&self) -> &'static str {
        match self {
            ActionState::Pending => "pending",
            ActionState::Exhausted => "exhausted",
        }
    }

    fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "pending" => Ok(ActionState::Pending),
            "exhausted" => Ok(ActionState::Exhausted),
            other => Err(Error::Corrupt(format!("unknown action state: {other}"))),
        }
    }
}

/// A queued mutating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub created_at: i64,
    pub attempt_count: u32,
    pub state: ActionState,
    pub last_error: Option<String>,
}

impl PendingAction {
    /// New action with a random id and no attempts.
    pub fn new(
        method: impl Into<String>, url: impl Into<String>, headers: Vec<(String, String)>, body: Vec<u8>,
        created_at: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            method: method.into(),
            headers,
            body,
            created_at,
            attempt_count: 0,
            state: ActionState::Pending,
            last_error: None,
        }
    }
}

const SELECT_ACTION: &str = "SELECT id, url, method, headers_json, body, created_at, attempt_count, state, last_error
     FROM pending_actions";

fn read_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<(PendingAction, String, String)> {
    let headers_json: String = row.get(3)?;
    let state: String = row.get(7)?;
    let action = PendingAction {
        id: row.get(0)?,
        url: row.get(1)?,
        method: row.get(2)?,
        headers: Vec::new(),
        body: row.get(4)?,
        created_at: row.get(5)?,
        attempt_count: row.get(6)?,
        state: ActionState::Pending,
        last_error: row.get(8)?,
    };
    Ok((action, headers_json, state))
}

fn finish_action((mut action, headers_json, state): (PendingAction, String, String)) -> Result<PendingAction, Error> {
    action.headers = serde_json::from_str(&headers_json)?;
    action.state = ActionState::parse(&state)?;
    Ok(action)
}

fn query_actions(conn: &rusqlite::Connection, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<PendingAction>, Error> {
    let sql = format!("{SELECT_ACTION} {filter} ORDER BY seq ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, read_action)?;
    rows.map(|row| finish_action(row?)).collect()
}

impl CacheDb {
    /// Persist a new action at the tail of the queue.
    pub async fn enqueue_action(&self, action: &PendingAction) -> Result<(), Error> {
        let action = action.clone();
        let headers_json = serde_json::to_string(&action.headers)?;
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO pending_actions (
                        id, method, url, headers_json, body, created_at, attempt_count, state, last_error
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        &action.id,
                        &action.method,
                        &action.url,
                        headers_json,
                        &action.body,
                        action.created_at,
                        action.attempt_count,
                        action.state.as_str(),
                        &action.last_error,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Actions eligible for automatic replay, oldest first.
    pub async fn pending_actions(&self) -> Result<Vec<PendingAction>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<PendingAction>, Error> {
                query_actions(conn, "WHERE state = 'pending'", &[])
            })
            .await
            .map_err(Error::from)
    }

    /// Every stored action regardless of state, oldest first.
    pub async fn all_actions(&self) -> Result<Vec<PendingAction>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<PendingAction>, Error> { query_actions(conn, "", &[]) })
            .await
            .map_err(Error::from)
    }

    /// Look up one action by id.
    pub async fn get_action(&self, id: &str) -> Result<Option<PendingAction>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<PendingAction>, Error> {
                let mut found = query_actions(conn, "WHERE id = ?1", &[&id])?;
                Ok(found.pop())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete an action. Returns whether it was still queued.
    pub async fn remove_action(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM pending_actions WHERE id = ?1", params![id])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Record a failed replay attempt.
    ///
    /// Increments `attempt_count`; once it reaches `max_attempts` the action is
    /// marked exhausted. Returns the updated action, or None if it was removed.
    pub async fn record_failed_attempt(
        &self, id: &str, error: &str, max_attempts: u32,
    ) -> Result<Option<PendingAction>, Error> {
        let id = id.to_string();
        let error = error.to_string();
        self.conn
            .call(move |conn| -> Result<Option<PendingAction>, Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "UPDATE pending_actions SET
                        attempt_count = attempt_count + 1,
                        last_error = ?2,
                        state = CASE WHEN attempt_count + 1 >= ?3 THEN 'exhausted' ELSE state END
                     WHERE id = ?1",
                    params![id, error, max_attempts],
                )?;
                let mut found = query_actions(&tx, "WHERE id = ?1", &[&id])?;
                tx.commit()?;
                Ok(found.pop())
            })
            .await
            .map_err(Error::from)
    }

    /// Return an exhausted action to the pending state with a fresh attempt budget.
    ///
    /// The action keeps its original queue position.
    pub async fn reset_action(&self, id: &str) -> Result<bool, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "UPDATE pending_actions SET state = 'pending', attempt_count = 0, last_error = NULL
                     WHERE id = ?1",
                    params![id],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of actions in the given state.
    pub async fn count_actions(&self, state: ActionState) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM pending_actions WHERE state = ?1",
                    params![state.as_str()],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
