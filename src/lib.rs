pub mod abi;
pub mod bus;
pub mod config;
pub mod event_decoder;
pub mod fetcher;
pub mod handlers;
pub mod health;
pub mod node;
pub mod pipeline;
pub mod poller;
pub mod processor;
pub mod registry;
pub mod resume;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
