// ABOUTME: Root library module exposing the gateway adapter building blocks
// ABOUTME: Frame classification, dispatch, correlation, sessions, and lifecycle

pub mod adapter;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod metrics;
pub mod outbound;
pub mod response;
pub mod routing;
pub mod session;
pub mod watchdog;
