// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The symmetric RPC fabric: JSON envelopes carried over WebSocket text
//! frames, routed by [`router::Router`], fanned out by [`broker::Broker`],
//! and dispatched against the declarative method table in [`methods`].

pub mod broker;
pub mod envelope;
pub mod methods;
pub mod router;
pub mod widget;

pub use broker::Broker;
pub use envelope::{Envelope, WsFrame};
pub use router::{RouteError, RouteProxy, Router};
pub use widget::WidgetStore;
