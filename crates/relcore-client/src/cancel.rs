//! Cooperative cancellation.
//!
//! Every async operation accepts an optional [`CancellationToken`]. The token
//! is checked before any native call is made, so a pre-cancelled operation
//! fails with [`Error::Cancelled`] without touching connection state. While a
//! native call is in flight, cancelling the token drops the native future.
//!
//! ## Example
//!
//! ```rust,ignore
//! use relcore_client::CancellationToken;
//! use std::time::Duration;
//!
//! let token = CancellationToken::new();
//! let child = token.clone();
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     child.cancel();
//! });
//!
//! let rows = command
//!     .execute_non_query(&mut connection, CommandArgs::new().cancellation(&token))
//!     .await?;
//! ```
//!
//! Cleanup (closing a connection, disposing a command) never observes the
//! token; it always runs to completion.

use std::future::Future;

pub use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Fail with [`Error::Cancelled`] if the token has already fired.
pub(crate) fn check_cancelled(token: Option<&CancellationToken>) -> Result<()> {
    match token {
        Some(t) if t.is_cancelled() => Err(Error::Cancelled),
        _ => Ok(()),
    }
}

/// Run `fut` until it completes or the token fires.
pub(crate) async fn cancellable<T, F>(token: Option<&CancellationToken>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match token {
        None => fut.await,
        Some(token) => {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    tracing::debug!("operation cancelled while in flight");
                    Err(Error::Cancelled)
                }
                result = fut => result,
            }
        }
    }
}
