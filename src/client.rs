use crate::connection::QueryOutcome;
use crate::connection::pool::PoolStats;
use crate::core::{Result, RouterError};
use crate::router::{Router, Session};
use std::sync::Arc;

/// Routes and executes statements for one logical request
///
/// Wraps a shared [`Router`] and owns the request's [`Session`], so sticky
/// writes carry over from one statement to the next.
///
/// # Examples
///
/// ```ignore
/// let router = Arc::new(Router::builder(topology, connector).build()?);
/// let mut client = Client::new(Arc::clone(&router));
///
/// client.query("UPDATE wp_posts SET post_status = 'draft' WHERE ID = 7").await?;
/// // Goes to the primary too: wp_posts was written in this session.
/// let rows = client.query("SELECT * FROM wp_posts WHERE ID = 7").await?;
/// ```
pub struct Client {
    router: Arc<Router>,
    session: Session,
}

impl Client {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            session: Session::new(),
        }
    }

    /// Continue an existing session
    pub fn with_session(router: Arc<Router>, session: Session) -> Self {
        Self { router, session }
    }

    /// Execute a SQL statement
    ///
    /// Driver errors from the statement itself are returned as
    /// [`RouterError::Execution`] and never retried. The outcome is recorded
    /// on the pooled connection for the heartbeat policy.
    pub async fn query(&mut self, sql: &str) -> Result<QueryOutcome> {
        let conn = self.router.route(&mut self.session, sql).await?;
        let outcome = conn.execute(sql).await;

        let errno = outcome.as_ref().err().and_then(|err| err.code);
        self.router.pool().record_query(&conn.key, errno).await;

        outcome.map_err(|err| {
            tracing::debug!(host = %conn.host, port = conn.port, errno = ?err.code, "statement failed");
            RouterError::Execution {
                code: err.code.unwrap_or_default(),
                message: err.message,
            }
        })
    }

    /// Execute a statement (alias for query)
    pub async fn execute(&mut self, sql: &str) -> Result<QueryOutcome> {
        self.query(sql).await
    }

    /// Force every following statement of this client to a primary
    pub fn send_writes_only(&mut self) {
        self.session.send_writes_only();
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Get pool statistics
    pub async fn stats(&self) -> PoolStats {
        self.router.stats().await
    }

    /// Closes the connection used by the most recent statement.
    pub async fn disconnect(&mut self) -> bool {
        match self.session.last_key() {
            Some(key) => self.router.disconnect(key).await,
            None => false,
        }
    }

    pub fn into_session(self) -> Session {
        self.session
    }
}
