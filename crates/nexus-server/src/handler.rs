//! Per-connection handler: frame reassembly, upstream dispatch, and
//! the outbound write loop.
//!
//! Each accepted channel gets one task running [`handle_channel`]. The
//! handler owns the read side; a second task drains an outbound queue
//! into the channel. Every subscription on the connection shares one
//! event queue feeding that writer, so events are delivered in the
//! order they were posted even across objects.

use std::collections::HashSet;
use std::sync::Arc;

use nexus_transport::Channel;
use nexus_wire::{
    frame, BinReader, BinWriter, Downstream, FrameReader, ObjectId, Upstream,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::ServerState;

enum Outbound {
    Frame(Vec<u8>),
    Shutdown,
}

/// Drop guard that detaches the connection's subscriptions when the
/// handler exits, clean close or not.
struct SubscriberGuard {
    subscriber: u64,
    state: Arc<ServerState>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.state.space.drop_subscriber(self.subscriber);
    }
}

pub(crate) async fn handle_channel<C: Channel>(
    channel: C,
    state: Arc<ServerState>,
) {
    let channel = Arc::new(channel);
    let subscriber = channel.id().into_inner();
    debug!(channel = %channel.id(), "handling new connection");

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(channel.clone(), outbound_rx));

    // One event queue per connection, shared by every subscription on
    // it, so events keep their post order across objects.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    forward_events(event_rx, outbound_tx.clone());

    let _guard = SubscriberGuard {
        subscriber,
        state: state.clone(),
    };

    let mut frames = FrameReader::new();
    let mut subscriptions: HashSet<ObjectId> = HashSet::new();

    'outer: loop {
        let chunk = match channel.recv().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                info!(channel = %channel.id(), "connection closed cleanly");
                break;
            }
            Err(err) => {
                debug!(channel = %channel.id(), %err, "recv error");
                break;
            }
        };
        frames.feed(&chunk);
        loop {
            let payload = match frames.next_frame() {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(err) => {
                    warn!(
                        channel = %channel.id(),
                        %err,
                        "framing violation, closing"
                    );
                    break 'outer;
                }
            };
            let mut r = BinReader::new(&payload);
            let message = match Upstream::read(&mut r, &state.registry) {
                Ok(message) => message,
                Err(err) => {
                    warn!(
                        channel = %channel.id(),
                        %err,
                        "undecodable message, closing"
                    );
                    break 'outer;
                }
            };
            if handle_message(
                message,
                &state,
                subscriber,
                &outbound_tx,
                &event_tx,
                &mut subscriptions,
            )
            .is_err()
            {
                break 'outer;
            }
        }
    }

    let _ = outbound_tx.send(Outbound::Shutdown);
    // _guard drops here and detaches every subscription.
}

/// Routes one upstream message. `Err` means the outbound queue is gone
/// and the handler should stop.
fn handle_message(
    message: Upstream,
    state: &Arc<ServerState>,
    subscriber: u64,
    outbound: &mpsc::UnboundedSender<Outbound>,
    event_tx: &mpsc::UnboundedSender<Vec<u8>>,
    subscriptions: &mut HashSet<ObjectId>,
) -> Result<(), ()> {
    match message {
        Upstream::Subscribe { req_id, addr } => {
            let result = match state.space.attach_subscriber(
                addr.id,
                subscriber,
                event_tx.clone(),
            ) {
                Some(snapshot) => {
                    subscriptions.insert(addr.id);
                    Ok(snapshot)
                }
                None => Err(format!("no object {} on this host", addr.id.0)),
            };
            send_reply(
                state,
                outbound,
                Downstream::SubscribeResult { req_id, result },
            )
        }
        Upstream::Unsubscribe { id } => {
            if subscriptions.remove(&id) {
                state.space.detach_subscriber(id, subscriber);
            }
            Ok(())
        }
        Upstream::ServiceCall {
            call_id,
            service,
            method,
            args,
        } => {
            let future = state.services.dispatch(service, method, args);
            let state = state.clone();
            let outbound = outbound.clone();
            tokio::spawn(async move {
                let result = future.await;
                let _ = send_reply(
                    &state,
                    &outbound,
                    Downstream::CallResult { call_id, result },
                );
            });
            Ok(())
        }
    }
}

/// Pumps the connection's event frames into its outbound queue. Ends
/// when either side goes away.
fn forward_events(
    mut events: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Outbound>,
) {
    tokio::spawn(async move {
        while let Some(framed) = events.recv().await {
            if outbound.send(Outbound::Frame(framed)).is_err() {
                break;
            }
        }
    });
}

fn send_reply(
    state: &Arc<ServerState>,
    outbound: &mpsc::UnboundedSender<Outbound>,
    message: Downstream,
) -> Result<(), ()> {
    let mut w = BinWriter::new();
    let framed = message
        .write(&mut w, &state.registry)
        .and_then(|()| frame(&w.into_bytes()));
    match framed {
        Ok(framed) => {
            outbound.send(Outbound::Frame(framed)).map_err(|_| ())
        }
        Err(err) => {
            warn!(%err, "reply not encodable, dropping");
            Ok(())
        }
    }
}

async fn write_loop<C: Channel>(
    channel: Arc<C>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(bytes) => {
                if let Err(err) = channel.send(&bytes).await {
                    debug!(channel = %channel.id(), %err, "send failed");
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    let _ = channel.close().await;
}
