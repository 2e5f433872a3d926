//! `devnetd`: a daemon that reconciles declared local multi-node blockchain
//! devnets against observed process/health state, exposed over gRPC.

pub mod apikeys;
pub mod chain;
pub mod config;
pub mod controller;
pub mod error;
pub mod grpc;
pub mod health;
pub mod metadata;
pub mod model;
pub mod network;
pub mod orchestrator;
pub mod provision_log;
pub mod reconcile;
pub mod runtime;
pub mod store;
pub mod subnet;
pub mod telemetry;
pub mod wiring;
pub mod workqueue;
