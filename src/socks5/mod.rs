pub mod codec;
pub mod connector;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
