// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routes RPC envelopes to the proxy registered for their `route` field.
//! One route per connected client (one per UI WebSocket, one per the
//! server's own embedded core, one per a bare internal client); messages
//! addressed to a route land on that route's outbound channel, which the
//! transport (WS pump, internal channel) drains and forwards.
//!
//! Grounded in the teacher's `transport/ws.rs` per-connection send-task
//! shape (a dedicated outbound channel drained by a loop that writes WS
//! frames) generalized from one fixed session to an arbitrary route id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::rpc::broker::Broker;
use crate::rpc::envelope::Envelope;

const OUTBOUND_CAPACITY: usize = 256;

/// Error returned when a message cannot be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    UnknownRoute,
    /// The route's outbound channel is full or its receiver is gone.
    Dropped,
}

struct RouteEntry {
    outbound_tx: mpsc::Sender<Envelope>,
    #[allow(dead_code)]
    durable: bool,
}

/// Process-wide map of `RouteId -> Proxy`, plus the broker that route
/// lifecycle events publish through.
pub struct Router {
    broker: Arc<Broker>,
    routes: RwLock<HashMap<String, RouteEntry>>,
}

/// A registered route's handle: the caller uses `route_id` to address
/// replies to other routes, and drains `outbound_rx` to learn what to send
/// out over its transport.
pub struct RouteProxy {
    pub route_id: String,
    pub outbound_rx: mpsc::Receiver<Envelope>,
}

impl Router {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker, routes: RwLock::new(HashMap::new()) }
    }

    /// Register a new route, publishing `route:up`. `durable` routes (e.g.
    /// the server's own embedded core route) are exempt from idle pruning
    /// policies a caller may apply; the router itself treats every route
    /// identically.
    pub fn register(&self, route_id: &str, durable: bool) -> RouteProxy {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        self.routes.write().insert(route_id.to_owned(), RouteEntry { outbound_tx: outbound_tx.clone(), durable });
        self.broker.attach_route(route_id, outbound_tx);
        self.broker.publish("route:up", Some(vec![route_id.to_owned()]), None, Some(route_id), None);
        RouteProxy { route_id: route_id.to_owned(), outbound_rx }
    }

    /// Unregister a route: any inflight sends already queued on its
    /// outbound channel are left for the drained receiver to deliver (the
    /// channel itself is not closed here, just removed from the map so new
    /// sends see `UnknownRoute`); `route:down` is published with the route
    /// id as `sender`.
    pub fn unregister(&self, route_id: &str) {
        self.routes.write().remove(route_id);
        self.broker.detach_route(route_id);
        self.broker.publish("route:down", Some(vec![route_id.to_owned()]), None, Some(route_id), None);
    }

    /// Send `envelope` to the route named by `envelope.route`.
    pub fn send(&self, envelope: Envelope) -> Result<(), RouteError> {
        let tx = {
            let routes = self.routes.read();
            routes.get(&envelope.route).map(|e| e.outbound_tx.clone())
        };
        match tx {
            None => Err(RouteError::UnknownRoute),
            Some(tx) => tx.try_send(envelope).map_err(|_| RouteError::Dropped),
        }
    }

    pub fn is_registered(&self, route_id: &str) -> bool {
        self.routes.read().contains_key(route_id)
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
