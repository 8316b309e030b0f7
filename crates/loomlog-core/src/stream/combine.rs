//! Combinators that spawn a forwarder task: channel conversion, merge,
//! dupe, and fanout.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::entry::LogEntry;
use crate::stream::{from_channel, BoxedStream, CHANNEL_CAPACITY};

/// Converts a stream into a channel of entries.
///
/// Spawns a forwarder task that pulls the stream to completion. The channel
/// closes when the stream ends; if the receiver is dropped early, the
/// forwarder drains the rest of the stream.
#[must_use]
pub fn as_channel(mut stream: BoxedStream) -> mpsc::Receiver<LogEntry> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        loop {
            match stream.next_entry().await {
                Ok((entry, _)) => {
                    if tx.send(entry).await.is_err() {
                        while stream.next_entry().await.is_ok() {}
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    });
    rx
}

/// Interleaves two streams into one.
///
/// Entries from each input keep their relative order; the interleaving
/// between inputs is whichever side is ready first. The output ends when
/// both inputs have ended. Reading from `a` or `b` after passing them here
/// is a programmer error.
#[must_use]
pub fn merge(a: BoxedStream, b: BoxedStream) -> BoxedStream {
    let mut a = Some(as_channel(a));
    let mut b = Some(as_channel(b));
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        while a.is_some() || b.is_some() {
            tokio::select! {
                entry = recv_side(&mut a) => match entry {
                    Some(entry) => {
                        if tx.send(entry).await.is_err() {
                            return;
                        }
                    }
                    None => a = None,
                },
                entry = recv_side(&mut b) => match entry {
                    Some(entry) => {
                        if tx.send(entry).await.is_err() {
                            return;
                        }
                    }
                    None => b = None,
                },
            }
        }
    });
    from_channel(rx)
}

/// Receives from a side of a merge, parking forever once that side is
/// closed so the other select branch keeps winning.
async fn recv_side(rx: &mut Option<mpsc::Receiver<LogEntry>>) -> Option<LogEntry> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Branches a stream into two identical streams.
///
/// Every entry is handed to both outputs before the source advances past
/// it. The hand-offs run concurrently behind a two-permit semaphore: the
/// source task may pull one entry ahead, but never leaves more than one
/// delivery per branch in flight, so a stalled branch stalls the source
/// instead of deadlocking it. Both outputs close when the source ends.
#[must_use]
pub fn dupe(mut stream: BoxedStream) -> (BoxedStream, BoxedStream) {
    let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let gate = Arc::new(Semaphore::new(2));
        while let Ok((entry, _)) = stream.next_entry().await {
            let Ok(permit) = Arc::clone(&gate).acquire_owned().await else {
                break;
            };
            let tx = a_tx.clone();
            let copy = entry.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let _ = tx.send(copy).await;
            });

            let Ok(permit) = Arc::clone(&gate).acquire_owned().await else {
                break;
            };
            let tx = b_tx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let _ = tx.send(entry).await;
            });
        }
        // Both permits reacquirable only once the in-flight sends finished.
        let _permits = gate.acquire_many(2).await;
    });

    (from_channel(a_rx), from_channel(b_rx))
}

/// Splits a stream across two outputs, load-balancing style.
///
/// Each entry goes to whichever output is ready first; this is a
/// partition, not a broadcast. If one consumer stalls, the other receives
/// the entries. Both outputs close when the source ends.
#[must_use]
pub fn fanout(mut stream: BoxedStream) -> (BoxedStream, BoxedStream) {
    let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        while let Ok((entry, _)) = stream.next_entry().await {
            tokio::select! {
                slot = a_tx.reserve() => match slot {
                    Ok(slot) => slot.send(entry),
                    Err(_) => {
                        if b_tx.send(entry).await.is_err() {
                            return;
                        }
                    }
                },
                slot = b_tx.reserve() => match slot {
                    Ok(slot) => slot.send(entry),
                    Err(_) => {
                        if a_tx.send(entry).await.is_err() {
                            return;
                        }
                    }
                },
            }
        }
    });

    (from_channel(a_rx), from_channel(b_rx))
}
