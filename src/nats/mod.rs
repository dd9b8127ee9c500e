pub mod client;
pub mod messages;
pub mod services;

pub use client::NatsClient;
pub use services::{NatsImageDescriber, NatsReasoner, NatsSynthesizer, NatsTranscriber};
