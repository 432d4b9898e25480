//! Infrastructure layer: event store, dispatch, projections, services, config.

pub mod alerts;
pub mod catalog;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod numbering;
pub mod projections;
pub mod read_model;
pub mod services;
pub mod workers;

mod integration_tests;
