//! Streamed-response assembly.
//!
//! Token-by-token generation is modelled as a producer pushing partial text
//! into a bounded channel. The consumer assembles the completed text and only
//! then hands it to the numeric validator: claims can span several tokens, so
//! validating per token would be meaningless.
//!
//! # Example
//!
//! ```rust
//! use engram_runtime::stream::{collect_streamed, token_channel};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (tx, rx) = token_channel(16);
//! tokio::spawn(async move {
//!     for token in ["Your ", "heart rate ", "was 87 bpm"] {
//!         tx.send(token.to_string()).await.ok();
//!     }
//! });
//! let text = collect_streamed(rx).await;
//! assert_eq!(text, "Your heart rate was 87 bpm");
//! # }
//! ```

use tokio::sync::mpsc;

/// Create a bounded token channel. `capacity` is the backpressure bound: a
/// producer that outruns the consumer parks on `send`.
pub fn token_channel(capacity: usize) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(capacity.max(1))
}

/// Drain `rx` until the producer side is dropped and return the assembled
/// text. Token order is preserved; a disconnected producer simply ends the
/// stream with whatever arrived.
pub async fn collect_streamed(mut rx: mpsc::Receiver<String>) -> String {
    let mut text = String::new();
    while let Some(token) = rx.recv().await {
        text.push_str(&token);
    }
    text
}
