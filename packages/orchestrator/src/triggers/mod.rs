//! External stimuli in, job admissions out: webhook and pub/sub channel
//! triggers routed through the scheduler's admission path.

mod router;
mod transport;

pub use router::{TriggerRouter, TriggerStatus};
pub use transport::{
    ChannelMessage, ChannelTransport, InMemoryChannelTransport, NatsChannelTransport,
};
