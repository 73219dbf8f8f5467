// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scoped pub/sub for the RPC fabric. Subscriptions match events by name
//! plus a colon-segmented scope pattern (`*` for one segment, a trailing
//! `**` for one-or-more trailing segments). A handler that panics while
//! processing a delivered event is caught and logged; the broker never
//! unsubscribes a route because one delivery failed.
//!
//! Grounded in the teacher's `broker/mux.rs`/`events.rs` fan-out shape
//! (`MuxFilter::wants_event`, `backfill_events`) generalized from a fixed
//! event enum to an open set of event names and arbitrary scope patterns.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::rpc::envelope::Envelope;

/// An event published through the broker, per §6's event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One subscriber's registered interest in an event name.
struct Subscription {
    route_id: String,
    /// `None` means `AllScopes=true`: matches any scope, or no scope.
    pattern: Option<Vec<String>>,
    replay_persisted: bool,
}

struct Inner {
    /// event name -> subscriptions.
    subs: HashMap<String, Vec<Subscription>>,
    /// event name -> last N published envelopes, for subscribers requesting replay.
    persisted: HashMap<String, Vec<EventEnvelope>>,
    /// route id -> outbound sender, attached for the route's lifetime.
    routes: HashMap<String, mpsc::Sender<Envelope>>,
}

/// Scoped pub/sub hub. One instance is shared by the whole process.
pub struct Broker {
    inner: Mutex<Inner>,
}

impl Broker {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { subs: HashMap::new(), persisted: HashMap::new(), routes: HashMap::new() }) }
    }

    /// Attach a route's outbound sender so published events addressed to it
    /// can be delivered. Called by the router when a route registers.
    pub fn attach_route(&self, route_id: &str, tx: mpsc::Sender<Envelope>) {
        self.inner.lock().routes.insert(route_id.to_owned(), tx);
    }

    /// Detach a route's sender and drop all of its subscriptions. Called by
    /// the router when a route unregisters.
    pub fn detach_route(&self, route_id: &str) {
        let mut inner = self.inner.lock();
        inner.routes.remove(route_id);
        for subs in inner.subs.values_mut() {
            subs.retain(|s| s.route_id != route_id);
        }
    }

    /// Subscribe `route_id` to `event_name`, matching `scope_pattern` (or
    /// every scope, including no scope, when `all_scopes` is set). If
    /// `replay_persisted`, the subscriber immediately receives whatever
    /// persisted history exists for this event name.
    pub fn subscribe(&self, route_id: &str, event_name: &str, scope_pattern: Option<&str>, all_scopes: bool, replay_persisted: bool) {
        let pattern = if all_scopes { None } else { scope_pattern.map(parse_pattern) };
        let mut inner = self.inner.lock();
        inner.subs.entry(event_name.to_owned()).or_default().push(Subscription {
            route_id: route_id.to_owned(),
            pattern,
            replay_persisted,
        });
        if replay_persisted {
            if let Some(history) = inner.persisted.get(event_name).cloned() {
                if let Some(tx) = inner.routes.get(route_id).cloned() {
                    drop(inner);
                    for event in history {
                        self.deliver(&tx, route_id, event);
                    }
                    return;
                }
            }
        }
    }

    pub fn unsubscribe(&self, route_id: &str, event_name: &str) {
        let mut inner = self.inner.lock();
        if let Some(subs) = inner.subs.get_mut(event_name) {
            subs.retain(|s| s.route_id != route_id);
        }
    }

    /// Publish an event. Every subscriber whose pattern matches one of
    /// `scopes` (or who set `AllScopes`) receives it. When `scopes` is
    /// empty/`None`, only `AllScopes` subscribers receive it. If `persist`
    /// is set, the last `persist` published envelopes for this event name
    /// are retained for future subscribers that request replay.
    pub fn publish(&self, event: &str, scopes: Option<Vec<String>>, data: Option<Value>, sender: Option<&str>, persist: Option<usize>) {
        let envelope = EventEnvelope {
            event: event.to_owned(),
            scopes: scopes.clone(),
            sender: sender.map(str::to_owned),
            persist,
            data,
        };

        let mut inner = self.inner.lock();
        if let Some(cap) = persist {
            let history = inner.persisted.entry(event.to_owned()).or_default();
            history.push(envelope.clone());
            if history.len() > cap {
                let excess = history.len() - cap;
                history.drain(0..excess);
            }
        }

        let targets: Vec<(String, mpsc::Sender<Envelope>)> = inner
            .subs
            .get(event)
            .map(|subs| {
                subs.iter()
                    .filter(|s| subscription_matches(s, scopes.as_deref()))
                    .filter_map(|s| inner.routes.get(&s.route_id).cloned().map(|tx| (s.route_id.clone(), tx)))
                    .collect()
            })
            .unwrap_or_default();
        drop(inner);

        for (route_id, tx) in targets {
            self.deliver(&tx, &route_id, envelope.clone());
        }
    }

    fn deliver(&self, tx: &mpsc::Sender<Envelope>, route_id: &str, event: EventEnvelope) {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| serde_json::to_value(&event)));
        let data = match result {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                tracing::warn!("broker: failed to encode event {}: {e}", event.event);
                return;
            }
            Err(_) => {
                tracing::warn!("broker: event encoding panicked for {}", event.event);
                return;
            }
        };
        let envelope = Envelope {
            command: Some("event".to_owned()),
            commanddata: Some(data),
            source: "server".to_owned(),
            route: route_id.to_owned(),
            ..Default::default()
        };
        if tx.try_send(envelope).is_err() {
            tracing::debug!("broker: outbound channel full or closed for route {route_id}, dropping event");
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

fn subscription_matches(sub: &Subscription, scopes: Option<&[String]>) -> bool {
    match &sub.pattern {
        None => true,
        Some(pattern) => match scopes {
            None => false,
            Some(scopes) => scopes.iter().any(|s| scope_matches(pattern, s)),
        },
    }
}

fn parse_pattern(pattern: &str) -> Vec<String> {
    pattern.split(':').map(str::to_owned).collect()
}

/// Match a colon-segmented scope against a pattern whose segments are
/// literal, `*` (exactly one segment), or a trailing `**` (one or more
/// trailing segments; only valid as the final pattern segment).
fn scope_matches(pattern: &[String], scope: &str) -> bool {
    let segments: Vec<&str> = scope.split(':').collect();
    match_segments(pattern, &segments)
}

fn match_segments(pattern: &[String], segments: &[&str]) -> bool {
    match pattern.split_first() {
        None => segments.is_empty(),
        Some((head, _rest)) if head == "**" => !segments.is_empty(),
        Some((head, rest)) => match segments.split_first() {
            None => false,
            Some((seg_head, seg_rest)) => {
                (head == "*" || head == seg_head) && match_segments(rest, seg_rest)
            }
        },
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
