//! Test-only scaffolding shared by the runtime's integration tests: an
//! in-memory transport pair and a hand-written demo service standing in
//! for code-generator output.

pub mod demo_service;
pub mod mock_transport;

pub use demo_service::{
    BatchedCountArgs, BatchedIntegerStream, DemoServiceClient, DemoServiceProvider, IntegerStream,
    PayloadArgs, ReversedStrings, SendStrings, SERVICE_FQN,
};
pub use mock_transport::MockTransport;
