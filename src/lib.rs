//! civicd — live chat and notification fan-out for the civic network.
//!
//! Clients hold two WebSocket channels: `/ws/{user_id}` for direct chat and
//! `/ws/notifications` for the notification stream. Anything that produces
//! a message or notification writes it to the [`db::Store`] first and then
//! pushes it through a [`dispatch::Dispatcher`] to whichever channel the
//! recipient has open, if any.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod routes;
pub mod state;
pub mod types;
pub mod ws;
