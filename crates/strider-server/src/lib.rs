//! HTTP control plane over a running scheduler: status, summary, idleness and stop.

pub mod auth;
pub mod dto;
pub mod error;
pub mod routes;
pub mod state;
